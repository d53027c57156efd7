// SQLite-backed audit event store.
//
// Tables:
// - security_events: append-only audit trail of detector and mitigation
//   actions (and giveaway lifecycle actions, which share the trail)

use crate::core::security::{SecurityError, SecurityEvent, SecurityEventStore};
use async_trait::async_trait;
use sqlx::{Pool, Sqlite};

pub struct SqliteSecurityEventStore {
    pool: Pool<Sqlite>,
}

impl SqliteSecurityEventStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), SecurityError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS security_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                subject_id INTEGER,
                details TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SecurityError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_security_events_guild
                ON security_events(guild_id, timestamp);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SecurityError::Storage(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl SecurityEventStore for SqliteSecurityEventStore {
    async fn append(&self, event: SecurityEvent) -> Result<(), SecurityError> {
        sqlx::query(
            r#"
            INSERT INTO security_events (guild_id, kind, subject_id, details, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.guild_id as i64)
        .bind(event.kind.as_str())
        .bind(event.subject_id.map(|id| id as i64))
        .bind(&event.details)
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| SecurityError::Storage(e.to_string()))?;

        Ok(())
    }
}
