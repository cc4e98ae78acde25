pub mod memory;
pub mod rollout;
pub mod util;
