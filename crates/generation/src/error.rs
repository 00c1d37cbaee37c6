//! Terminal outcomes of a generation call

use provider::ProviderError;

/// Why a `generate` call gave up.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// The pool has no active key left.
    #[error("no active credentials available: {0}")]
    PoolEmpty(String),

    /// The pool could not be reached while acquiring a key.
    #[error("credential pool unavailable: {0}")]
    Pool(String),

    /// The provider failed for a reason another key would not fix.
    #[error("provider error: {0}")]
    Provider(#[source] ProviderError),

    #[error("all credentials exhausted or retry limit reached after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

impl GenerateError {
    /// Stable label for metrics and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerateError::PoolEmpty(_) => "pool_empty",
            GenerateError::Pool(_) => "pool_unavailable",
            GenerateError::Provider(_) => "provider",
            GenerateError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    /// True when no usable key is left, as opposed to a broken request or outage.
    pub fn is_saturation(&self) -> bool {
        matches!(
            self,
            GenerateError::PoolEmpty(_) | GenerateError::RetriesExhausted { .. }
        )
    }
}

/// Result alias for generation calls.
pub type Result<T> = std::result::Result<T, GenerateError>;
