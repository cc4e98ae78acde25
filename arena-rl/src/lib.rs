pub mod coordinator;
pub mod data;
pub mod environment;
pub mod logging;
pub mod module;
pub mod objective;
pub mod rng;

mod error;

pub use error::{Error, Result};
