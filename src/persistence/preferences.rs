use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use super::DatabaseError;

/// Preference key holding the simulation on/off switch.
pub const SIMULATION_ENABLED_KEY: &str = "simulation_enabled";

/// Durable key/value preferences that outlive the process.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// `None` when the key was never written.
    async fn load_bool(&self, key: &str) -> Result<Option<bool>, DatabaseError>;

    async fn save_bool(&self, key: &str, value: bool) -> Result<(), DatabaseError>;
}

/// Preferences stored in the `preferences` table.
#[derive(Debug, Clone)]
pub struct SqlitePreferenceStore {
    pool: SqlitePool,
}

impl SqlitePreferenceStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqlitePreferenceStore { pool }
    }
}

#[async_trait]
impl PreferenceStore for SqlitePreferenceStore {
    async fn load_bool(&self, key: &str) -> Result<Option<bool>, DatabaseError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM preferences WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match value.as_deref() {
            None => Ok(None),
            Some("true") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            Some(other) => Err(DatabaseError::QueryError(format!(
                "preference '{}' holds non-boolean value '{}'",
                key, other
            ))),
        }
    }

    async fn save_bool(&self, key: &str, value: bool) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO preferences (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        debug!("Saved preference {} = {}", key, value);
        Ok(())
    }
}

/// Process-local store, for tests and for running without a database.
#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    values: Mutex<HashMap<String, bool>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn load_bool(&self, key: &str) -> Result<Option<bool>, DatabaseError> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        Ok(values.get(key).copied())
    }

    async fn save_bool(&self, key: &str, value: bool) -> Result<(), DatabaseError> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(key.to_string(), value);
        Ok(())
    }
}
