//! Client for the remote database's REST interface
//!
//! The lesson planner keeps all durable state (provider keys, allow-list,
//! generated plans, per-country curriculum records) in a hosted Postgres
//! exposed through a PostgREST-style HTTP API. This crate wraps the four
//! interactions the workspace needs:
//!
//! - `rpc`: `POST /rest/v1/rpc/{function}` with a JSON argument object
//! - `select`: `GET /rest/v1/{table}` with filter/order query pairs
//! - `insert`: `POST /rest/v1/{table}` with a JSON array of rows
//! - `delete`: `DELETE /rest/v1/{table}` with filter query pairs
//!
//! Every request carries the project key as both `apikey` and Bearer token.

pub mod client;
pub mod error;

pub use client::{Filter, RemoteDb};
pub use error::{Error, Result};
