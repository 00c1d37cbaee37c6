//! Provider API key pool
//!
//! A pool hands out one active provider key at a time and accepts reports
//! that a key hit its quota or was rejected. Two backends implement the
//! `CredentialPool` contract:
//!
//! - `RemotePool`: the shared key table in the remote database, reached via
//!   the `get_valid_api_key` and `mark_key_exhausted` functions. Selection
//!   policy lives in the database.
//! - `FilePool`: a JSON key file for single-node deployments. Round-robin
//!   over active keys, exhaustion persisted atomically, optional automatic
//!   reactivation once a quota window has passed.
//!
//! Key lifecycle:
//! 1. Key added to the backing store as `active`
//! 2. Controller acquires it and calls the provider
//! 3. Provider rejects it (quota or auth) → controller reports it exhausted
//! 4. Backend stops handing it out (until reactivated, file backend only)

pub mod credential;
pub mod error;
pub mod file;
pub mod remote;

pub use credential::{Credential, CredentialPool};
pub use error::{Error, Result};
pub use file::{FilePool, KeyRecord, KeyStatus};
pub use remote::RemotePool;
