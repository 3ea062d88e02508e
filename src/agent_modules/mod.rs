pub mod clock;
pub mod config;
pub mod sampler;
pub mod sensors;
pub mod shutdown;
