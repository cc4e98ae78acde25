pub mod a2c;
pub mod dqn;
pub mod temporal_difference;
