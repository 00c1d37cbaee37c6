//! Credential type and the pool contract

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use common::Secret;

use crate::error::Result;

/// Characters of a key shown in logs.
const FINGERPRINT_CHARS: usize = 5;

/// An opaque provider API key.
///
/// Compares by value so a controller can tell whether the key it holds is
/// the one that just failed. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Secret<String>);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Secret::new(value.into()))
    }

    /// The raw key, for the provider call only.
    pub fn expose(&self) -> &str {
        self.0.expose()
    }

    /// Short prefix for log lines.
    pub fn fingerprint(&self) -> String {
        self.0.fingerprint(FINGERPRINT_CHARS)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

/// Source of provider keys.
///
/// `report_exhausted` must be idempotent and safe to call concurrently from
/// several controllers: reporting a key twice has the same effect as once.
pub trait CredentialPool: Send + Sync {
    /// Backend name for logs and health ("remote", "file")
    fn id(&self) -> &str;

    /// Return one currently active key, or `Error::NotFound` when none is left.
    fn acquire_credential(&self) -> Pin<Box<dyn Future<Output = Result<Credential>> + Send + '_>>;

    /// Mark `credential` exhausted so later acquisitions skip it.
    fn report_exhausted<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Backend status summary for the health endpoint.
    fn health(&self) -> Pin<Box<dyn Future<Output = serde_json::Value> + Send + '_>>;
}
