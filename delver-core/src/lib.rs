//! Delver Core - shared types, errors, configuration and logging
//!
//! This crate defines the data model and ambient infrastructure used by the
//! rest of the delver workspace.

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod types;

pub use async_utils::*;
pub use config::*;
pub use error::*;
pub use logging::*;
pub use session::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;
