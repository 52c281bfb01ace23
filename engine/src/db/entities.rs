/// Entity state persistence
///
/// A record is written with a single upsert, so every field of an entity
/// (both memory tiers included) changes together or not at all.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use sdk::errors::EngineError;
use sqlx::{Row, SqlitePool};

use super::now_millis;
use crate::entity::EntityRecord;

/// Load/save contract for entity state
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// `Ok(None)` when no entity has this id. Undecodable state is an
    /// `EngineError::PersistenceCorrupt`.
    async fn load(&self, id: &str) -> Result<Option<EntityRecord>>;

    /// Insert or replace the entity
    async fn save(&self, record: &EntityRecord) -> Result<()>;

    /// Returns false if nothing was deleted
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn list_ids(&self) -> Result<Vec<String>>;
}

pub struct SqliteEntityStore {
    pool: SqlitePool,
}

impl SqliteEntityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn corrupt(id: &str, reason: impl std::fmt::Display) -> anyhow::Error {
    EngineError::PersistenceCorrupt {
        id: id.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn load(&self, id: &str) -> Result<Option<EntityRecord>> {
        let row = sqlx::query(
            "SELECT id, model, stm, ltm, adapters, time_offset, sleep_until, max_messages, password
             FROM entities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch entity")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stm = serde_json::from_str(row.get::<String, _>("stm").as_str())
            .map_err(|e| corrupt(id, format!("short-term memory: {}", e)))?;
        let ltm = serde_json::from_str(row.get::<String, _>("ltm").as_str())
            .map_err(|e| corrupt(id, format!("long-term memory: {}", e)))?;
        let adapters = serde_json::from_str(row.get::<String, _>("adapters").as_str())
            .map_err(|e| corrupt(id, format!("adapters: {}", e)))?;

        let sleep_until = match row.get::<Option<i64>, _>("sleep_until") {
            Some(ms) => Some(
                DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| corrupt(id, format!("sleep_until out of range: {}", ms)))?,
            ),
            None => None,
        };

        let max_messages = row.get::<i64, _>("max_messages");
        let max_messages = u32::try_from(max_messages)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| corrupt(id, format!("max_messages {}", max_messages)))?;

        Ok(Some(EntityRecord {
            id: row.get("id"),
            model: row.get("model"),
            stm,
            ltm,
            adapters,
            time_offset: row.get("time_offset"),
            sleep_until,
            max_messages,
            password: row.get("password"),
        }))
    }

    async fn save(&self, record: &EntityRecord) -> Result<()> {
        let now = now_millis();

        let stm = serde_json::to_string(&record.stm).context("Failed to encode short-term memory")?;
        let ltm = serde_json::to_string(&record.ltm).context("Failed to encode long-term memory")?;
        let adapters = serde_json::to_string(&record.adapters).context("Failed to encode adapters")?;

        sqlx::query(
            "INSERT INTO entities
                (id, model, stm, ltm, adapters, time_offset, sleep_until, max_messages, password, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                model = excluded.model,
                stm = excluded.stm,
                ltm = excluded.ltm,
                adapters = excluded.adapters,
                time_offset = excluded.time_offset,
                sleep_until = excluded.sleep_until,
                max_messages = excluded.max_messages,
                password = excluded.password,
                updated_at = excluded.updated_at",
        )
        .bind(&record.id)
        .bind(&record.model)
        .bind(stm)
        .bind(ltm)
        .bind(adapters)
        .bind(record.time_offset)
        .bind(record.sleep_until.map(|t| t.timestamp_millis()))
        .bind(record.max_messages as i64)
        .bind(&record.password)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to save entity")?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let result = sqlx::query("DELETE FROM entities WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete entity")?;

        sqlx::query("DELETE FROM runs WHERE entity_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete run history")?;

        tx.commit().await.context("Failed to commit delete")?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT id FROM entities ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list entities")?;

        Ok(ids)
    }
}
