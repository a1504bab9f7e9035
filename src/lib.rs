pub mod artifacts;
pub mod config;
pub mod error;
pub mod job;
pub mod renderer;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use error::{Result, SimError};
