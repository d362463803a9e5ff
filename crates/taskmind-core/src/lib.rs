pub mod config;
pub mod error;
pub mod lifecycle;
pub mod types;

pub use config::TaskmindConfig;
pub use error::{Result, TaskmindError};
pub use lifecycle::InvalidTransition;
pub use types::*;
