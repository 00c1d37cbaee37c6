//! Application data: allow-list, country norms, plan history
//!
//! `RemoteBackend` talks to the shared database:
//!
//! | data | table / function |
//! |---|---|
//! | saved plans | `planeaciones` (id, created_at, tema, grado, contenido) |
//! | allow-list | `usuarios_autorizados` (id, email, created_at) |
//! | country norms | `normativa_paises` (pais_id, pais_nombre, marco_curricular, terminologia) |
//! | login check | `is_email_authorized(email_check)` |
//!
//! `MemoryBackend` keeps the same data in process for database-less runs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use remote_db::{Filter, RemoteDb};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const PLANS: &str = "planeaciones";
const USERS: &str = "usuarios_autorizados";
const NORMS: &str = "normativa_paises";

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("already exists: {0}")]
    Conflict(String),

    #[error("backend unavailable: {0}")]
    Remote(String),
}

impl From<remote_db::Error> for BackendError {
    fn from(err: remote_db::Error) -> Self {
        match err {
            remote_db::Error::Status { status: 409, body } => BackendError::Conflict(body),
            other => BackendError::Remote(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A saved lesson plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub id: i64,
    pub created_at: String,
    pub topic: String,
    pub grade: String,
    pub content: String,
}

/// A plan about to be saved.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub topic: String,
    pub grade: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizedUser {
    pub id: i64,
    pub email: String,
    pub created_at: String,
}

/// Official curriculum framing for one country.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryNorms {
    pub country_name: String,
    pub curriculum_framework: String,
    pub terminology: String,
}

/// Storage used by the HTTP handlers.
pub trait Backend: Send + Sync {
    fn id(&self) -> &str;

    /// Whether `email` (already normalized) is on the allow-list.
    fn is_email_authorized<'a>(&'a self, email: &'a str) -> BoxFuture<'a, bool>;

    /// Norms for a country code; `None` when the country has no record.
    fn country_norms<'a>(&'a self, country: &'a str) -> BoxFuture<'a, Option<CountryNorms>>;

    fn save_plan(&self, plan: NewPlan) -> BoxFuture<'_, ()>;

    /// All plans, newest first.
    fn list_plans(&self) -> BoxFuture<'_, Vec<Plan>>;

    /// Delete a plan. Deleting a missing id succeeds.
    fn delete_plan(&self, id: i64) -> BoxFuture<'_, ()>;

    /// Allow-list entries, newest first.
    fn list_users(&self) -> BoxFuture<'_, Vec<AuthorizedUser>>;

    /// Add an email (already normalized). Duplicates are `Conflict`.
    fn add_user<'a>(&'a self, email: &'a str) -> BoxFuture<'a, ()>;

    fn delete_user(&self, id: i64) -> BoxFuture<'_, ()>;
}

#[derive(Debug, Deserialize)]
struct PlanRow {
    id: i64,
    #[serde(default)]
    created_at: String,
    tema: String,
    grado: String,
    #[serde(default)]
    contenido: String,
}

#[derive(Debug, Serialize)]
struct PlanInsert<'a> {
    tema: &'a str,
    grado: &'a str,
    contenido: &'a str,
}

#[derive(Debug, Deserialize)]
struct UserRow {
    id: i64,
    email: String,
    #[serde(default)]
    created_at: String,
}

#[derive(Debug, Serialize)]
struct UserInsert<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct NormsRow {
    pais_nombre: String,
    marco_curricular: String,
    terminologia: String,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at,
            topic: row.tema,
            grade: row.grado,
            content: row.contenido,
        }
    }
}

impl From<UserRow> for AuthorizedUser {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            created_at: row.created_at,
        }
    }
}

impl From<NormsRow> for CountryNorms {
    fn from(row: NormsRow) -> Self {
        Self {
            country_name: row.pais_nombre,
            curriculum_framework: row.marco_curricular,
            terminology: row.terminologia,
        }
    }
}

/// Backend over the remote database.
pub struct RemoteBackend {
    db: RemoteDb,
}

impl RemoteBackend {
    pub fn new(db: RemoteDb) -> Self {
        Self { db }
    }
}

impl Backend for RemoteBackend {
    fn id(&self) -> &str {
        "remote"
    }

    fn is_email_authorized<'a>(&'a self, email: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let authorized: Option<bool> = self
                .db
                .rpc(
                    "is_email_authorized",
                    &serde_json::json!({ "email_check": email }),
                )
                .await?;
            Ok(authorized.unwrap_or(false))
        })
    }

    fn country_norms<'a>(&'a self, country: &'a str) -> BoxFuture<'a, Option<CountryNorms>> {
        Box::pin(async move {
            let rows: Vec<NormsRow> = self
                .db
                .select(NORMS, &[Filter::eq("pais_id", country), Filter::limit(1)])
                .await?;
            Ok(rows.into_iter().next().map(CountryNorms::from))
        })
    }

    fn save_plan(&self, plan: NewPlan) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let row = PlanInsert {
                tema: &plan.topic,
                grado: &plan.grade,
                contenido: &plan.content,
            };
            self.db.insert(PLANS, &[row]).await?;
            Ok(())
        })
    }

    fn list_plans(&self) -> BoxFuture<'_, Vec<Plan>> {
        Box::pin(async move {
            let rows: Vec<PlanRow> = self
                .db
                .select(PLANS, &[Filter::order_desc("created_at")])
                .await?;
            Ok(rows.into_iter().map(Plan::from).collect())
        })
    }

    fn delete_plan(&self, id: i64) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.db.delete(PLANS, &[Filter::eq("id", id)]).await?;
            Ok(())
        })
    }

    fn list_users(&self) -> BoxFuture<'_, Vec<AuthorizedUser>> {
        Box::pin(async move {
            let rows: Vec<UserRow> = self
                .db
                .select(USERS, &[Filter::order_desc("created_at")])
                .await?;
            Ok(rows.into_iter().map(AuthorizedUser::from).collect())
        })
    }

    fn add_user<'a>(&'a self, email: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.db.insert(USERS, &[UserInsert { email }]).await?;
            Ok(())
        })
    }

    fn delete_user(&self, id: i64) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.db.delete(USERS, &[Filter::eq("id", id)]).await?;
            Ok(())
        })
    }
}

#[derive(Default)]
struct MemoryState {
    plans: Vec<Plan>,
    users: Vec<AuthorizedUser>,
    norms: HashMap<String, CountryNorms>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process backend. Data is lost on restart.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_norms(&self, country: &str, norms: CountryNorms) {
        self.state
            .lock()
            .await
            .norms
            .insert(country.to_string(), norms);
    }
}

fn timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

impl Backend for MemoryBackend {
    fn id(&self) -> &str {
        "memory"
    }

    fn is_email_authorized<'a>(&'a self, email: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.users.iter().any(|u| u.email == email))
        })
    }

    fn country_norms<'a>(&'a self, country: &'a str) -> BoxFuture<'a, Option<CountryNorms>> {
        Box::pin(async move { Ok(self.state.lock().await.norms.get(country).cloned()) })
    }

    fn save_plan(&self, plan: NewPlan) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let id = state.next_id();
            state.plans.push(Plan {
                id,
                created_at: timestamp(),
                topic: plan.topic,
                grade: plan.grade,
                content: plan.content,
            });
            Ok(())
        })
    }

    fn list_plans(&self) -> BoxFuture<'_, Vec<Plan>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.plans.iter().rev().cloned().collect())
        })
    }

    fn delete_plan(&self, id: i64) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.state.lock().await.plans.retain(|p| p.id != id);
            Ok(())
        })
    }

    fn list_users(&self) -> BoxFuture<'_, Vec<AuthorizedUser>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.users.iter().rev().cloned().collect())
        })
    }

    fn add_user<'a>(&'a self, email: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.users.iter().any(|u| u.email == email) {
                return Err(BackendError::Conflict(email.to_string()));
            }
            let id = state.next_id();
            state.users.push(AuthorizedUser {
                id,
                email: email.to_string(),
                created_at: timestamp(),
            });
            Ok(())
        })
    }

    fn delete_user(&self, id: i64) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.state.lock().await.users.retain(|u| u.id != id);
            Ok(())
        })
    }
}
