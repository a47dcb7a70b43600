//! services/api/src/adapters/storage.rs
//!
//! This module contains the persistence adapter, the concrete implementation
//! of the `StorageService` port from the `core` crate. Each entity
//! collection is stored as one keyed JSON blob in PostgreSQL using `sqlx`,
//! matching the port's load-whole / replace-whole contract.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use study_session_core::domain::{Activity, DocumentWorkspace, QuizAttempt};
use study_session_core::ports::{PortError, PortResult, StorageService};

/// Stable blob names, one per entity collection.
const WORKSPACES: &str = "workspaces";
const QUIZ_ATTEMPTS: &str = "quiz_attempts";
const ACTIVITY: &str = "activity";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A persistence adapter that implements the `StorageService` port.
#[derive(Clone)]
pub struct PgStorageAdapter {
    pool: PgPool,
}

impl PgStorageAdapter {
    /// Creates a new `PgStorageAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn load<T: DeserializeOwned>(&self, name: &str) -> PortResult<Vec<T>> {
        let blob: Option<Value> =
            sqlx::query_scalar("SELECT data FROM collections WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;

        match blob {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                PortError::Unexpected(format!("collection '{name}' failed to decode: {e}"))
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn save<T: Serialize>(&self, name: &str, items: &[T]) -> PortResult<()> {
        let data = serde_json::to_value(items)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        sqlx::query(
            "INSERT INTO collections (name, data) VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE SET data = EXCLUDED.data, updated_at = now()",
        )
        .bind(name)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}

//=========================================================================================
// `StorageService` Trait Implementation
//=========================================================================================

#[async_trait]
impl StorageService for PgStorageAdapter {
    async fn load_workspaces(&self) -> PortResult<Vec<DocumentWorkspace>> {
        self.load(WORKSPACES).await
    }

    async fn save_workspaces(&self, workspaces: &[DocumentWorkspace]) -> PortResult<()> {
        self.save(WORKSPACES, workspaces).await
    }

    async fn load_attempts(&self) -> PortResult<Vec<QuizAttempt>> {
        self.load(QUIZ_ATTEMPTS).await
    }

    async fn save_attempts(&self, attempts: &[QuizAttempt]) -> PortResult<()> {
        self.save(QUIZ_ATTEMPTS, attempts).await
    }

    async fn load_activity(&self) -> PortResult<Vec<Activity>> {
        self.load(ACTIVITY).await
    }

    async fn save_activity(&self, entries: &[Activity]) -> PortResult<()> {
        self.save(ACTIVITY, entries).await
    }
}
