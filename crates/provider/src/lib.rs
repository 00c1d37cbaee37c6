//! Generation provider abstraction
//!
//! Defines the `GenerationProvider` trait that decouples the rotation
//! controller from the concrete content backend. A provider receives one API
//! key and one prompt and answers with text or a `ProviderError`. The error
//! carries whatever structure the backend exposed (HTTP status, status code,
//! reason) so `classify` can decide whether rotating to another key could help.

pub mod classify;
pub mod gemini;

pub use classify::{RotationClass, classify};
pub use gemini::GeminiProvider;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Errors from a single provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider answered with a non-2xx response.
    #[error("upstream returned {status}: {message}")]
    Upstream {
        status: u16,
        /// Canonical status string from the error body, e.g. `RESOURCE_EXHAUSTED`
        code: Option<String>,
        /// Machine-readable reason from the error details, e.g. `API_KEY_INVALID`
        reason: Option<String>,
        message: String,
    },

    /// Connection, DNS or TLS failure before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// The per-attempt deadline expired.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// A 2xx response whose body could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Failure with no structured information, only a message.
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Upstream { .. } => "upstream",
            ProviderError::Transport(_) => "transport",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Other(_) => "other",
        }
    }

    /// Classify this error for key rotation.
    pub fn rotation_class(&self) -> RotationClass {
        classify(self)
    }
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// A content backend that turns a prompt into text using one API key.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn GenerationProvider>`).
pub trait GenerationProvider: Send + Sync {
    /// Identifier for logging (e.g. "gemini")
    fn id(&self) -> &str;

    /// Issue one generation request authenticated with `api_key`.
    ///
    /// A successful response with no text yields `Ok(String::new())`.
    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}
