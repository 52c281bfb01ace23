/// Run history
///
/// One row per run attempt. A row starts as `running` and ends as
/// `completed` or `failed`; a row left in `running` means the process died
/// mid-run.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use super::now_millis;
use crate::entity::RunSummary;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            _ => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub entity_id: String,
    pub status: RunStatus,
    pub turns: i64,
    /// Epoch millis
    pub slept_until: Option<i64>,
    pub error: Option<String>,
    /// Epoch millis
    pub started_at: i64,
    /// Epoch millis
    pub finished_at: Option<i64>,
}

pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record the start of a run and return its id
    pub async fn start_run(&self, entity_id: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO runs (id, entity_id, status, started_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(entity_id)
            .bind(RunStatus::Running.as_str())
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .context("Failed to record run start")?;

        Ok(id)
    }

    pub async fn complete_run(&self, run_id: &str, summary: &RunSummary) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET status = ?, turns = ?, slept_until = ?, finished_at = ? WHERE id = ?",
        )
        .bind(RunStatus::Completed.as_str())
        .bind(summary.turns as i64)
        .bind(summary.slept_until.map(|t| t.timestamp_millis()))
        .bind(now_millis())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("Failed to complete run")?;

        Ok(())
    }

    pub async fn fail_run(&self, run_id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE runs SET status = ?, error = ?, finished_at = ? WHERE id = ?")
            .bind(RunStatus::Failed.as_str())
            .bind(error)
            .bind(now_millis())
            .bind(run_id)
            .execute(&self.pool)
            .await
            .context("Failed to mark run as failed")?;

        Ok(())
    }

    /// Most recent runs of an entity, newest first
    pub async fn recent_runs(&self, entity_id: &str, limit: i64) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            "SELECT id, entity_id, status, turns, slept_until, error, started_at, finished_at
             FROM runs WHERE entity_id = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(entity_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch run history")?;

        Ok(rows
            .into_iter()
            .map(|r| RunRecord {
                id: r.get("id"),
                entity_id: r.get("entity_id"),
                status: RunStatus::parse(r.get::<String, _>("status").as_str()),
                turns: r.get("turns"),
                slept_until: r.get("slept_until"),
                error: r.get("error"),
                started_at: r.get("started_at"),
                finished_at: r.get("finished_at"),
            })
            .collect())
    }
}
