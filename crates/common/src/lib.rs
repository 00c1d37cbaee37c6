//! Shared types for the lesson planner workspace
//!
//! Holds the pieces every crate needs but none owns: the redacting `Secret`
//! wrapper used for provider keys and database keys, and the configuration
//! error type returned while loading service settings.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
