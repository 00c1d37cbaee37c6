//! File-backed key pool with round-robin selection
//!
//! The key file is a JSON array of records:
//!
//! ```json
//! [{"key": "AIza...", "status": "active"},
//!  {"key": "AIza...", "status": "exhausted", "exhausted_at": 1760745600000}]
//! ```
//!
//! Every exhaustion is written back with temp-file + rename so a crash never
//! leaves a half-written key file. When `reactivate_after` is set, an
//! exhausted key whose mark is older than that window transitions back to
//! active the next time the pool selects a key.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialPool};
use crate::error::{Error, Result};

/// Status of a stored key.
///
/// Transitions:
/// - Active → Exhausted (provider rejected the key)
/// - Exhausted → Active (reactivation window elapsed, if configured)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    #[default]
    Active,
    Exhausted,
}

/// One entry of the key file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key: String,
    #[serde(default)]
    pub status: KeyStatus,
    /// When the key was marked exhausted, unix milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhausted_at: Option<u64>,
}

impl KeyRecord {
    pub fn active(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: KeyStatus::Active,
            exhausted_at: None,
        }
    }
}

/// Key pool persisted in a local JSON file.
///
/// A tokio `Mutex` serializes selection and exhaustion so a report can never
/// be lost between a read and the following write.
pub struct FilePool {
    path: PathBuf,
    records: Mutex<Vec<KeyRecord>>,
    next_index: AtomicUsize,
    reactivate_after: Option<Duration>,
}

impl FilePool {
    /// Load the key file at `path`.
    ///
    /// A missing file is created as `[]`; the pool then reports every
    /// acquisition as `NotFound` until keys are added to the file.
    pub async fn load(path: PathBuf, reactivate_after: Option<Duration>) -> Result<Self> {
        let records = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading key file: {e}")))?;
            let records: Vec<KeyRecord> = serde_json::from_str(&contents)
                .map_err(|e| Error::Store(format!("parsing key file: {e}")))?;
            info!(path = %path.display(), keys = records.len(), "loaded key file");
            records
        } else {
            warn!(path = %path.display(), "key file not found, starting with empty pool");
            let records = Vec::new();
            write_atomic(&path, &records).await?;
            records
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
            next_index: AtomicUsize::new(0),
            reactivate_after,
        })
    }

    /// Snapshot of all records (keys included; never expose over HTTP).
    pub async fn records(&self) -> Vec<KeyRecord> {
        self.records.lock().await.clone()
    }

    async fn acquire(&self) -> Result<Credential> {
        let mut records = self.records.lock().await;

        if self.reactivate_expired(&mut records) {
            if let Err(e) = write_atomic(&self.path, &records).await {
                warn!(error = %e, "failed to persist reactivated keys");
            }
        }

        let n = records.len();
        if n == 0 {
            return Err(Error::NotFound(exhausted_message(&records)));
        }

        let start = self.next_index.fetch_add(1, Ordering::Relaxed) % n;
        for offset in 0..n {
            let record = &records[(start + offset) % n];
            if record.status == KeyStatus::Active {
                let credential = Credential::new(record.key.clone());
                debug!(key = %credential.fingerprint(), "selected key");
                return Ok(credential);
            }
        }

        Err(Error::NotFound(exhausted_message(&records)))
    }

    async fn mark_exhausted(&self, credential: &Credential) -> Result<()> {
        let mut records = self.records.lock().await;
        let Some(index) = records.iter().position(|r| r.key == credential.expose()) else {
            warn!(key = %credential.fingerprint(), "reported key is not in the pool, ignoring");
            return Ok(());
        };

        if records[index].status == KeyStatus::Exhausted {
            debug!(key = %credential.fingerprint(), "key already exhausted");
            return Ok(());
        }

        let previous = records[index].clone();
        records[index].status = KeyStatus::Exhausted;
        records[index].exhausted_at = Some(now_millis());

        // Memory must not run ahead of the file
        if let Err(e) = write_atomic(&self.path, &records).await {
            records[index] = previous;
            return Err(e);
        }
        info!(key = %credential.fingerprint(), "key marked exhausted");
        Ok(())
    }

    /// Flip exhausted keys whose window has elapsed back to active.
    /// Returns whether anything changed.
    fn reactivate_expired(&self, records: &mut [KeyRecord]) -> bool {
        let Some(window) = self.reactivate_after else {
            return false;
        };
        let now = now_millis();
        let window_millis = window.as_millis() as u64;
        let mut changed = false;

        for record in records.iter_mut() {
            if record.status != KeyStatus::Exhausted {
                continue;
            }
            if let Some(at) = record.exhausted_at
                && at.saturating_add(window_millis) <= now
            {
                record.status = KeyStatus::Active;
                record.exhausted_at = None;
                info!(
                    key = %Credential::new(record.key.clone()).fingerprint(),
                    "reactivation window elapsed, key active again"
                );
                changed = true;
            }
        }
        changed
    }

    async fn summary(&self) -> serde_json::Value {
        let records = self.records.lock().await;
        let total = records.len();
        let active = records
            .iter()
            .filter(|r| r.status == KeyStatus::Active)
            .count();
        let status = if active == total && total > 0 {
            "healthy"
        } else if active > 0 {
            "degraded"
        } else {
            "unhealthy"
        };
        serde_json::json!({
            "backend": "file",
            "status": status,
            "keys_total": total,
            "keys_active": active,
            "keys_exhausted": total - active,
        })
    }
}

impl CredentialPool for FilePool {
    fn id(&self) -> &str {
        "file"
    }

    fn acquire_credential(&self) -> Pin<Box<dyn Future<Output = Result<Credential>> + Send + '_>> {
        Box::pin(self.acquire())
    }

    fn report_exhausted<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.mark_exhausted(credential))
    }

    fn health(&self) -> Pin<Box<dyn Future<Output = serde_json::Value> + Send + '_>> {
        Box::pin(self.summary())
    }
}

fn exhausted_message(records: &[KeyRecord]) -> String {
    let exhausted = records
        .iter()
        .filter(|r| r.status == KeyStatus::Exhausted)
        .count();
    format!(
        "key file has {} keys, {exhausted} exhausted",
        records.len()
    )
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Write the key file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 on unix since the file holds API keys.
async fn write_atomic(path: &Path, records: &[KeyRecord]) -> Result<()> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| Error::Store(format!("serializing keys: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("key file path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".keys.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp key file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting key file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp key file: {e}")))?;

    debug!(path = %path.display(), "persisted key file");
    Ok(())
}
