//! HTTP client for PostgREST-style endpoints
//!
//! Thin wrapper over `reqwest` that stamps the project key on every request,
//! builds `/rest/v1/...` URLs, and turns non-2xx responses into
//! `Error::Status` with the response body attached for diagnostics.

use common::Secret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};

/// A single query pair appended to a table URL.
///
/// PostgREST encodes filters as `column=op.value` and ordering as
/// `order=column.direction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    key: String,
    value: String,
}

impl Filter {
    /// `column=eq.value`
    pub fn eq(column: &str, value: impl std::fmt::Display) -> Self {
        Self {
            key: column.to_string(),
            value: format!("eq.{value}"),
        }
    }

    /// `order=column.desc`
    pub fn order_desc(column: &str) -> Self {
        Self {
            key: "order".to_string(),
            value: format!("{column}.desc"),
        }
    }

    /// `limit=n`
    pub fn limit(n: usize) -> Self {
        Self {
            key: "limit".to_string(),
            value: n.to_string(),
        }
    }
}

/// Remote database client.
///
/// Cheap to clone: `reqwest::Client` is reference counted internally.
#[derive(Debug, Clone)]
pub struct RemoteDb {
    client: reqwest::Client,
    base_url: String,
    api_key: Secret<String>,
}

impl RemoteDb {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Secret<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Call a stored function and decode its JSON result.
    ///
    /// Functions returning a scalar come back as a bare JSON value
    /// (`"text"`, `true`, `null`), so `T` is usually `Option<String>` or `bool`.
    pub async fn rpc<T: DeserializeOwned>(&self, function: &str, args: &serde_json::Value) -> Result<T> {
        let url = self.url(&format!("rpc/{function}"), &[])?;
        debug!(function, "remote rpc call");

        let response = self
            .authorized(self.client.post(url))
            .json(args)
            .send()
            .await
            .map_err(|e| Error::Http(format!("rpc {function} failed: {e}")))?;

        decode(check_status(response).await?).await
    }

    /// Select all columns of `table` matching `filters`.
    pub async fn select<T: DeserializeOwned>(&self, table: &str, filters: &[Filter]) -> Result<Vec<T>> {
        let mut pairs = vec![Filter {
            key: "select".to_string(),
            value: "*".to_string(),
        }];
        pairs.extend_from_slice(filters);
        let url = self.url(table, &pairs)?;
        debug!(table, filters = filters.len(), "remote select");

        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| Error::Http(format!("select from {table} failed: {e}")))?;

        decode(check_status(response).await?).await
    }

    /// Insert rows into `table`. The inserted rows are not returned.
    pub async fn insert<T: Serialize>(&self, table: &str, rows: &[T]) -> Result<()> {
        if rows.is_empty() {
            return Err(Error::InvalidRequest(format!("no rows to insert into {table}")));
        }
        let url = self.url(table, &[])?;
        debug!(table, rows = rows.len(), "remote insert");

        let response = self
            .authorized(self.client.post(url))
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await
            .map_err(|e| Error::Http(format!("insert into {table} failed: {e}")))?;

        check_status(response).await?;
        Ok(())
    }

    /// Delete rows of `table` matching `filters`.
    ///
    /// An unfiltered delete is refused: PostgREST would wipe the table.
    pub async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()> {
        if filters.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "refusing unfiltered delete on {table}"
            )));
        }
        let url = self.url(table, filters)?;
        debug!(table, "remote delete");

        let response = self
            .authorized(self.client.delete(url))
            .header("Prefer", "return=minimal")
            .send()
            .await
            .map_err(|e| Error::Http(format!("delete from {table} failed: {e}")))?;

        check_status(response).await?;
        Ok(())
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", self.api_key.expose().as_str())
            .bearer_auth(self.api_key.expose())
    }

    fn url(&self, path: &str, filters: &[Filter]) -> Result<reqwest::Url> {
        let raw = format!("{}/rest/v1/{path}", self.base_url.trim_end_matches('/'));
        let mut url = reqwest::Url::parse(&raw)
            .map_err(|e| Error::InvalidRequest(format!("invalid url {raw}: {e}")))?;
        if !filters.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for filter in filters {
                pairs.append_pair(&filter.key, &filter.value);
            }
        }
        Ok(url)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    Err(Error::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::Http(format!("reading response body: {e}")))?;
    // Void functions answer 204 with no body; treat that as JSON null
    let body: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        &bytes
    };
    serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))
}
