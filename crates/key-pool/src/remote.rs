//! Key pool backed by the shared key table in the remote database
//!
//! Selection and exhaustion are server-side functions, so every replica of
//! the service sees the same pool state:
//!
//! - `get_valid_api_key()` returns one active key, or null when none is left
//! - `mark_key_exhausted(target_key)` flags a key; unknown keys are a no-op.
//!   Whatever it returns is ignored.

use std::future::Future;
use std::pin::Pin;

use remote_db::RemoteDb;
use tracing::{debug, info};

use crate::credential::{Credential, CredentialPool};
use crate::error::{Error, Result};

const ACQUIRE_FN: &str = "get_valid_api_key";
const EXHAUST_FN: &str = "mark_key_exhausted";

pub struct RemotePool {
    db: RemoteDb,
}

impl RemotePool {
    pub fn new(db: RemoteDb) -> Self {
        Self { db }
    }

    async fn acquire(&self) -> Result<Credential> {
        let key: Option<String> = self
            .db
            .rpc(ACQUIRE_FN, &serde_json::json!({}))
            .await
            .map_err(|e| Error::Remote(format!("{ACQUIRE_FN}: {e}")))?;

        match key {
            Some(key) if !key.trim().is_empty() => {
                let credential = Credential::new(key);
                debug!(key = %credential.fingerprint(), "remote pool returned key");
                Ok(credential)
            }
            _ => Err(Error::NotFound("remote pool has no active keys".into())),
        }
    }

    async fn mark_exhausted(&self, credential: &Credential) -> Result<()> {
        self.db
            .rpc::<serde::de::IgnoredAny>(
                EXHAUST_FN,
                &serde_json::json!({ "target_key": credential.expose() }),
            )
            .await
            .map_err(|e| Error::Remote(format!("{EXHAUST_FN}: {e}")))?;
        info!(key = %credential.fingerprint(), "key marked exhausted in remote pool");
        Ok(())
    }
}

impl CredentialPool for RemotePool {
    fn id(&self) -> &str {
        "remote"
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
        // Counting keys would need a privileged query; report reachability only
        Box::pin(async {
            serde_json::json!({
                "backend": "remote",
                "status": "unknown",
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::Json;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use common::Secret;
    use tokio::net::TcpListener;

    /// In-memory stand-in for the key table: (key, exhausted).
    type Table = Arc<Mutex<Vec<(String, bool)>>>;

    async fn get_valid_api_key(State(table): State<Table>) -> Json<serde_json::Value> {
        let table = table.lock().unwrap();
        let key = table.iter().find(|(_, exhausted)| !exhausted).map(|(k, _)| k.clone());
        Json(serde_json::json!(key))
    }

    async fn mark_key_exhausted(
        State(table): State<Table>,
        Json(args): Json<serde_json::Value>,
    ) -> StatusCode {
        let target = args["target_key"].as_str().unwrap_or_default().to_string();
        let mut table = table.lock().unwrap();
        for (key, exhausted) in table.iter_mut() {
            if *key == target {
                *exhausted = true;
            }
        }
        StatusCode::NO_CONTENT
    }

    async fn start_mock_db(keys: &[&str]) -> (String, Table) {
        let table: Table = Arc::new(Mutex::new(
            keys.iter().map(|k| (k.to_string(), false)).collect(),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let app = axum::Router::new()
            .route("/rest/v1/rpc/get_valid_api_key", post(get_valid_api_key))
            .route("/rest/v1/rpc/mark_key_exhausted", post(mark_key_exhausted))
            .with_state(table.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (url, table)
    }

    fn pool(url: &str) -> RemotePool {
        RemotePool::new(RemoteDb::new(
            reqwest::Client::new(),
            url,
            Secret::new("anon".to_string()),
        ))
    }

    #[tokio::test]
    async fn acquire_returns_first_active_key() {
        let (url, _) = start_mock_db(&["k1", "k2"]).await;
        let credential = pool(&url).acquire_credential().await.unwrap();
        assert_eq!(credential.expose(), "k1");
    }

    #[tokio::test]
    async fn report_moves_selection_to_next_key() {
        let (url, table) = start_mock_db(&["k1", "k2"]).await;
        let pool = pool(&url);

        let first = pool.acquire_credential().await.unwrap();
        pool.report_exhausted(&first).await.unwrap();
        assert!(table.lock().unwrap()[0].1);

        let second = pool.acquire_credential().await.unwrap();
        assert_eq!(second.expose(), "k2");
    }

    #[tokio::test]
    async fn null_result_is_not_found() {
        let (url, _) = start_mock_db(&[]).await;
        let err = pool(&url).acquire_credential().await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn blank_key_is_not_found() {
        let (url, _) = start_mock_db(&["  "]).await;
        let err = pool(&url).acquire_credential().await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn unreachable_database_is_remote_error() {
        let pool = pool("http://127.0.0.1:1");
        assert!(matches!(
            pool.acquire_credential().await.unwrap_err(),
            Error::Remote(_)
        ));
        assert!(matches!(
            pool.report_exhausted(&Credential::new("k1")).await.unwrap_err(),
            Error::Remote(_)
        ));
    }

    #[tokio::test]
    async fn health_does_not_query_database() {
        let pool = pool("http://127.0.0.1:1");
        let health = pool.health().await;
        assert_eq!(health["backend"], "remote");
        assert_eq!(pool.id(), "remote");
    }

    #[tokio::test]
    async fn report_ignores_returned_value() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let app = axum::Router::new()
            .route(
                "/rest/v1/rpc/mark_key_exhausted",
                post(|| async { Json(serde_json::json!(true)) }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        pool(&url)
            .report_exhausted(&Credential::new("k1"))
            .await
            .unwrap();
    }
}
