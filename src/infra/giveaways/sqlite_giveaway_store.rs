// SQLite-backed giveaway store.
//
// Tables:
// - giveaways: one row per giveaway; `active` flips to 0 exactly once via a
//   compare-and-set UPDATE, which is what makes concurrent ends idempotent

use crate::core::giveaways::{Giveaway, GiveawayError, GiveawayStore, NewGiveaway};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteGiveawayStore {
    pool: Pool<Sqlite>,
}

impl SqliteGiveawayStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), GiveawayError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS giveaways (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                channel_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL UNIQUE,
                prize TEXT NOT NULL,
                end_time TEXT NOT NULL,
                winner_count INTEGER NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| GiveawayError::Storage(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_giveaways_active ON giveaways(active)")
            .execute(&self.pool)
            .await
            .map_err(|e| GiveawayError::Storage(e.to_string()))?;

        Ok(())
    }

    fn row_to_giveaway(row: &sqlx::sqlite::SqliteRow) -> Giveaway {
        let end_time_str: String = row.get("end_time");
        let end_time = DateTime::parse_from_rfc3339(&end_time_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Giveaway {
            id: row.get::<i64, _>("id"),
            guild_id: row.get::<i64, _>("guild_id") as u64,
            channel_id: row.get::<i64, _>("channel_id") as u64,
            message_id: row.get::<i64, _>("message_id") as u64,
            prize: row.get("prize"),
            end_time,
            winner_count: row.get::<i64, _>("winner_count") as u32,
            active: row.get::<bool, _>("active"),
        }
    }
}

#[async_trait]
impl GiveawayStore for SqliteGiveawayStore {
    async fn create(&self, giveaway: NewGiveaway) -> Result<Giveaway, GiveawayError> {
        let result = sqlx::query(
            r#"
            INSERT INTO giveaways (guild_id, channel_id, message_id, prize, end_time, winner_count, active)
            VALUES (?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(giveaway.guild_id as i64)
        .bind(giveaway.channel_id as i64)
        .bind(giveaway.message_id as i64)
        .bind(&giveaway.prize)
        .bind(giveaway.end_time.to_rfc3339())
        .bind(giveaway.winner_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| GiveawayError::Storage(e.to_string()))?;

        Ok(Giveaway {
            id: result.last_insert_rowid(),
            guild_id: giveaway.guild_id,
            channel_id: giveaway.channel_id,
            message_id: giveaway.message_id,
            prize: giveaway.prize,
            end_time: giveaway.end_time,
            winner_count: giveaway.winner_count,
            active: true,
        })
    }

    async fn get(&self, id: i64) -> Result<Option<Giveaway>, GiveawayError> {
        let row = sqlx::query("SELECT * FROM giveaways WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GiveawayError::Storage(e.to_string()))?;

        Ok(row.as_ref().map(Self::row_to_giveaway))
    }

    async fn get_by_message(&self, message_id: u64) -> Result<Option<Giveaway>, GiveawayError> {
        let row = sqlx::query("SELECT * FROM giveaways WHERE message_id = ?")
            .bind(message_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GiveawayError::Storage(e.to_string()))?;

        Ok(row.as_ref().map(Self::row_to_giveaway))
    }

    async fn list_active(&self) -> Result<Vec<Giveaway>, GiveawayError> {
        let rows = sqlx::query("SELECT * FROM giveaways WHERE active = 1 ORDER BY end_time")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| GiveawayError::Storage(e.to_string()))?;

        Ok(rows.iter().map(Self::row_to_giveaway).collect())
    }

    async fn mark_ended(&self, id: i64) -> Result<bool, GiveawayError> {
        let result = sqlx::query("UPDATE giveaways SET active = 0 WHERE id = ? AND active = 1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| GiveawayError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteGiveawayStore {
        // One connection, or a fresh pool connection would see an empty db
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteGiveawayStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    fn new_giveaway(message_id: u64) -> NewGiveaway {
        NewGiveaway {
            guild_id: 1,
            channel_id: 10,
            message_id,
            prize: "Nitro".to_string(),
            end_time: Utc::now() + chrono::Duration::hours(1),
            winner_count: 2,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_round_trip() {
        let store = memory_store().await;

        let created = store.create(new_giveaway(100)).await.unwrap();
        let fetched = store.get(created.id).await.unwrap().unwrap();

        assert_eq!(fetched.message_id, 100);
        assert_eq!(fetched.prize, "Nitro");
        assert_eq!(fetched.winner_count, 2);
        assert!(fetched.active);
        // RFC 3339 round trip keeps the deadline within a second
        assert!((fetched.end_time - created.end_time).num_seconds().abs() <= 1);
    }

    #[tokio::test]
    async fn get_by_message_finds_the_right_row() {
        let store = memory_store().await;

        store.create(new_giveaway(100)).await.unwrap();
        let second = store.create(new_giveaway(200)).await.unwrap();

        let found = store.get_by_message(200).await.unwrap().unwrap();
        assert_eq!(found.id, second.id);
        assert!(store.get_by_message(300).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_active_excludes_ended() {
        let store = memory_store().await;

        let first = store.create(new_giveaway(100)).await.unwrap();
        store.create(new_giveaway(200)).await.unwrap();

        store.mark_ended(first.id).await.unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].message_id, 200);
    }

    #[tokio::test]
    async fn mark_ended_is_a_compare_and_set() {
        let store = memory_store().await;

        let created = store.create(new_giveaway(100)).await.unwrap();

        assert!(store.mark_ended(created.id).await.unwrap());
        // Second end observes the flag already cleared
        assert!(!store.mark_ended(created.id).await.unwrap());
        // Unknown id is not an error, just a no-op
        assert!(!store.mark_ended(9999).await.unwrap());
    }
}
