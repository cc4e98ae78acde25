pub mod exploration;
pub mod nn;
pub mod policy;
