//! Key rotation and retry around a generation provider
//!
//! `GenerationController` sits between the application and a
//! `GenerationProvider`. It keeps one key from a `CredentialPool`, reuses it
//! across calls while it works, and when the provider rejects it for quota or
//! authentication reasons reports it exhausted and retries with a fresh key,
//! up to a bounded number of attempts.

pub mod controller;
pub mod error;

pub use controller::{DEFAULT_MAX_ATTEMPTS, GenerationController, GenerationRequest};
pub use error::{GenerateError, Result};
