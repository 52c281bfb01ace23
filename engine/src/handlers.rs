//! Command handlers for CLI operations
//!
//! Each handler opens the database, performs one core operation and prints
//! the result as text or JSON. Runs started from the CLI go through a local
//! `Scheduler`, so they are recorded in the run history like daemon runs.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::CapabilityAction;
use crate::config::Config;
use crate::daemon::DaemonManager;
use crate::db::{Database, EntityStore, SqliteEntityStore};
use crate::entity::{ChatOptions, Entity, EntityOptions, EntityRecord, EntityServices, RunSummary};
use crate::scheduler::Scheduler;
use sdk::errors::EngineError;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Database, store and services for one CLI invocation
struct Engine {
    database: Database,
    store: Arc<SqliteEntityStore>,
    services: Arc<EntityServices>,
    scan_interval: std::time::Duration,
}

impl Engine {
    async fn open(config: &Config) -> Result<Self> {
        let database = Database::new(&config.db_path())
            .await
            .context("Failed to open database")?;
        let store = Arc::new(database.entities());
        Ok(Self {
            database,
            store,
            services: Arc::new(EntityServices::from_config(config)),
            scan_interval: std::time::Duration::from_secs(config.scheduler.scan_interval_secs),
        })
    }

    fn scheduler(&self) -> Scheduler {
        let store: Arc<dyn EntityStore> = Arc::clone(&self.store) as Arc<dyn EntityStore>;
        Scheduler::new(store, Arc::clone(&self.services), self.scan_interval)
            .with_history(self.database.runs())
    }

    /// Load an entity that must already exist
    async fn existing(&self, id: &str) -> Result<Entity> {
        self.services
            .load_existing(self.store.as_ref(), id)
            .await?
            .ok_or_else(|| EngineError::EntityNotFound(id.to_string()).into())
    }

    async fn save(&self, entity: &Entity) -> Result<()> {
        self.store.save(&entity.to_record()).await
    }

    async fn close(self) -> Result<()> {
        self.database.close().await
    }
}

/// Serializable overview of an entity. Never includes the credential.
#[derive(Debug, Serialize)]
struct EntityView {
    id: String,
    model: String,
    adapters: Vec<String>,
    max_messages: u32,
    time_offset: i64,
    current_time: DateTime<Utc>,
    sleep_until: Option<DateTime<Utc>>,
    dormant: bool,
    stm_entries: usize,
    ltm_entries: usize,
    latest_journal_entry: Option<String>,
}

impl From<&Entity> for EntityView {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id().to_string(),
            model: entity.model().to_string(),
            adapters: entity.adapters().to_vec(),
            max_messages: entity.max_messages(),
            time_offset: entity.time_offset(),
            current_time: entity.current_time(),
            sleep_until: entity.sleep_until(),
            dormant: entity.is_dormant(),
            stm_entries: entity.stm().len(),
            ltm_entries: entity.ltm().len(),
            latest_journal_entry: entity.ltm().iter().last().cloned(),
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_millis(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(format_time)
        .unwrap_or_else(|| "Unknown".to_string())
}

fn sleep_state(entity: &Entity) -> String {
    match (entity.sleep_until(), entity.remaining_sleep()) {
        (Some(until), Some(remaining)) => format!(
            "asleep until {} ({} min left)",
            format_time(until),
            remaining.num_minutes()
        ),
        (Some(until), None) => format!("due (slept until {})", format_time(until)),
        (None, _) => "awake".to_string(),
    }
}

fn print_run_summary(id: &str, summary: &RunSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!(
                "{} ran {} turn(s), {} tool call(s) executed",
                id, summary.turns, summary.tools_executed
            );
            match summary.slept_until {
                Some(until) => println!("Now asleep until {}", format_time(until)),
                None => println!("Turn budget exhausted; still awake"),
            }
        }
        OutputFormat::Json => print_json(&json!({ "id": id, "run": summary }))?,
    }
    Ok(())
}

pub fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let status = DaemonManager::status(config)?;

    match format {
        OutputFormat::Text => {
            match status.pid {
                Some(pid) if status.is_running => println!("Somnus daemon is running (PID {})", pid),
                _ => println!("Somnus daemon is not running."),
            }
            println!("Provider:      {}", status.provider);
            println!("Scan interval: {}s", status.scan_interval_secs);
            println!("PID file:      {}", status.pid_file.display());
        }
        OutputFormat::Json => print_json(&json!({
            "running": status.is_running,
            "pid": status.pid,
            "pid_file": status.pid_file,
            "provider": status.provider,
            "scan_interval_secs": status.scan_interval_secs,
        }))?,
    }
    Ok(())
}

/// Run the daemon in the foreground until SIGTERM or Ctrl-C
pub async fn handle_start(config: &Config) -> Result<()> {
    let manager = DaemonManager::new(config)?;
    manager.start()?;

    let engine = Engine::open(config).await?;
    let scheduler = Arc::new(engine.scheduler());

    println!("Somnus daemon started (PID {})", std::process::id());
    manager.serve(scheduler, &engine.database).await?;

    engine.close().await
}

pub async fn handle_list(config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::open(config).await?;

    let mut views = Vec::new();
    for id in engine.store.list_ids().await? {
        if let Some(entity) = engine
            .services
            .load_existing(engine.store.as_ref(), &id)
            .await?
        {
            views.push(EntityView::from(&entity));
        }
    }

    match format {
        OutputFormat::Text => {
            if views.is_empty() {
                println!("No entities. Create one with 'somnus create <id>'.");
            }
            for view in &views {
                let state = match view.sleep_until {
                    Some(until) if view.dormant => format!("asleep until {}", format_time(until)),
                    _ => "awake".to_string(),
                };
                println!("{:<20} {:<20} {}", view.id, view.model, state);
            }
        }
        OutputFormat::Json => print_json(&json!({ "entities": views, "count": views.len() }))?,
    }

    engine.close().await
}

pub async fn handle_create(
    id: String,
    options: EntityOptions,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let engine = Engine::open(config).await?;

    if engine.store.load(&id).await.ok().flatten().is_some() {
        anyhow::bail!("Entity '{}' already exists", id);
    }

    let entity = engine.services.create(&id, options)?;
    engine.save(&entity).await?;
    tracing::info!(entity = %id, "Entity created");

    match format {
        OutputFormat::Text => println!("Created entity '{}' (model {})", id, entity.model()),
        OutputFormat::Json => print_json(&EntityView::from(&entity))?,
    }

    engine.close().await
}

pub async fn handle_get(id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::open(config).await?;
    let entity = engine.existing(&id).await?;

    match format {
        OutputFormat::Text => {
            println!("Entity:        {}", entity.id());
            println!("Model:         {}", entity.model());
            println!("State:         {}", sleep_state(&entity));
            println!("Clock:         {}", format_time(entity.current_time()));
            if entity.time_offset() != 0 {
                println!("Time offset:   {} min", entity.time_offset());
            }
            println!("Turn budget:   {}", entity.max_messages());
            let adapters = if entity.adapters().is_empty() {
                "(none)".to_string()
            } else {
                entity.adapters().join(", ")
            };
            println!("Adapters:      {}", adapters);
            println!("Short-term:    {} message(s)", entity.stm().len());
            println!("Journal:       {} entries", entity.ltm().len());
            if let Some(latest) = entity.ltm().entries().last() {
                println!();
                println!("Latest journal entry ({}):", format_time(latest.timestamp));
                println!("  {}", latest.message);
            }
        }
        OutputFormat::Json => print_json(&EntityView::from(&entity))?,
    }

    engine.close().await
}

pub async fn handle_delete(id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::open(config).await?;

    if !engine.store.delete(&id).await? {
        return Err(EngineError::EntityNotFound(id).into());
    }
    tracing::info!(entity = %id, "Entity deleted");

    match format {
        OutputFormat::Text => println!("Deleted entity '{}'", id),
        OutputFormat::Json => print_json(&json!({ "id": id, "deleted": true }))?,
    }

    engine.close().await
}

/// Wake now (run under the guard), or set `sleep_until` to now + delay
pub async fn handle_wake(
    id: String,
    delay: Option<i64>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let engine = Engine::open(config).await?;

    match delay {
        Some(minutes) if minutes < 0 => {
            return Err(EngineError::InvalidParameter {
                name: "delay".to_string(),
                reason: "must not be negative".to_string(),
            }
            .into());
        }
        Some(minutes) if minutes > 0 => {
            let mut entity = engine.existing(&id).await?;
            let until = Duration::try_minutes(minutes)
                .and_then(|d| entity.current_time().checked_add_signed(d))
                .ok_or_else(|| EngineError::InvalidParameter {
                    name: "delay".to_string(),
                    reason: "out of range".to_string(),
                })?;
            entity.set_sleep_until(Some(until));
            engine.save(&entity).await?;

            match format {
                OutputFormat::Text => println!("{} will wake at {}", id, format_time(until)),
                OutputFormat::Json => print_json(&json!({ "id": id, "sleep_until": until }))?,
            }
        }
        _ => {
            engine.existing(&id).await?;
            let summary = engine
                .scheduler()
                .run_now(&id)
                .await?
                .ok_or_else(|| EngineError::EntityBusy(id.clone()))?;
            print_run_summary(&id, &summary, format)?;
        }
    }

    engine.close().await
}

pub async fn handle_capability(
    action: CapabilityAction,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let engine = Engine::open(config).await?;

    match action {
        CapabilityAction::List { id } => {
            let entity = engine.existing(&id).await?;
            let adapters: Vec<_> = engine
                .services
                .catalog
                .iter()
                .map(|adapter| {
                    json!({
                        "name": adapter.name(),
                        "description": adapter.description(),
                        "enabled": entity.adapters().iter().any(|a| a == adapter.name()),
                        "tools": adapter.tools().iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
                    })
                })
                .collect();

            match format {
                OutputFormat::Text => {
                    println!("Adapters for {}:", id);
                    for adapter in engine.services.catalog.iter() {
                        let enabled = entity.adapters().iter().any(|a| a == adapter.name());
                        let tools: Vec<String> =
                            adapter.tools().iter().map(|t| t.name().to_string()).collect();
                        println!(
                            "  [{}] {:<12} {} ({})",
                            if enabled { "x" } else { " " },
                            adapter.name(),
                            adapter.description(),
                            tools.join(", ")
                        );
                    }
                }
                OutputFormat::Json => print_json(&json!({ "id": id, "adapters": adapters }))?,
            }
        }

        CapabilityAction::Add { id, name } => {
            let mut entity = engine.existing(&id).await?;
            let added = entity.add_adapter(&name)?;
            if added {
                engine.save(&entity).await?;
            }

            match format {
                OutputFormat::Text if added => println!("Enabled '{}' for {}", name, id),
                OutputFormat::Text => println!("'{}' is already enabled for {}", name, id),
                OutputFormat::Json => print_json(&json!({ "id": id, "adapter": name, "changed": added }))?,
            }
        }

        CapabilityAction::Remove { id, name } => {
            let mut entity = engine.existing(&id).await?;
            let removed = entity.remove_adapter(&name);
            if removed {
                engine.save(&entity).await?;
            }

            match format {
                OutputFormat::Text if removed => println!("Disabled '{}' for {}", name, id),
                OutputFormat::Text => println!("'{}' was not enabled for {}", name, id),
                OutputFormat::Json => print_json(&json!({ "id": id, "adapter": name, "changed": removed }))?,
            }
        }
    }

    engine.close().await
}

/// Run now, materializing a fresh entity if none is stored under `id`
pub async fn handle_run(id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::open(config).await?;
    engine
        .services
        .load_or_recover(engine.store.as_ref(), &id)
        .await?;

    let summary = engine
        .scheduler()
        .run_now(&id)
        .await?
        .ok_or_else(|| EngineError::EntityBusy(id.clone()))?;
    print_run_summary(&id, &summary, format)?;

    engine.close().await
}

pub async fn handle_chat(
    id: String,
    text: String,
    options: ChatOptions,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let engine = Engine::open(config).await?;
    let scheduler = engine.scheduler();
    let _guard = scheduler
        .try_claim(&id)
        .ok_or_else(|| EngineError::EntityBusy(id.clone()))?;

    let mut entity = engine
        .services
        .load_or_recover(engine.store.as_ref(), &id)
        .await?;
    let result = entity.chat(&text, options).await;
    engine.save(&entity).await?;
    let reply = result?;

    match format {
        OutputFormat::Text => println!("{}", reply),
        OutputFormat::Json => print_json(&json!({ "id": id, "reply": reply }))?,
    }

    engine.close().await
}

pub async fn handle_shift_time(
    id: String,
    minutes: i64,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let engine = Engine::open(config).await?;
    let mut entity = engine
        .services
        .load_or_recover(engine.store.as_ref(), &id)
        .await?;

    entity.shift_time(minutes);
    engine.save(&entity).await?;

    match format {
        OutputFormat::Text => println!(
            "{} clock is now {} (offset {} min)",
            id,
            format_time(entity.current_time()),
            entity.time_offset()
        ),
        OutputFormat::Json => print_json(&json!({
            "id": id,
            "time_offset": entity.time_offset(),
            "current_time": entity.current_time(),
        }))?,
    }

    engine.close().await
}

pub async fn handle_export(id: String, out: Option<PathBuf>, config: &Config) -> Result<()> {
    let engine = Engine::open(config).await?;
    let entity = engine.existing(&id).await?;
    let json = serde_json::to_string_pretty(&entity.to_record())?;

    match out {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Exported {} to {}", id, path.display());
        }
        None => println!("{}", json),
    }

    engine.close().await
}

pub async fn handle_import(path: &Path, config: &Config, format: OutputFormat) -> Result<()> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let record: EntityRecord = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not an entity export", path.display()))?;

    let engine = Engine::open(config).await?;
    let entity = engine.services.restore(record);
    engine.save(&entity).await?;
    tracing::info!(entity = %entity.id(), "Entity imported");

    match format {
        OutputFormat::Text => println!(
            "Imported {} ({} short-term, {} journal entries)",
            entity.id(),
            entity.stm().len(),
            entity.ltm().len()
        ),
        OutputFormat::Json => print_json(&EntityView::from(&entity))?,
    }

    engine.close().await
}

pub async fn handle_history(
    id: String,
    limit: usize,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let engine = Engine::open(config).await?;
    let runs = engine
        .database
        .runs()
        .recent_runs(&id, limit as i64)
        .await
        .context("Failed to fetch run history")?;

    match format {
        OutputFormat::Text => {
            if runs.is_empty() {
                println!("No runs recorded for {}", id);
            } else {
                println!("Run history for {} (last {}):", id, limit);
                println!();
            }
            for run in &runs {
                println!("Run {}", run.id);
                println!("  Status:  {}", run.status.as_str());
                println!("  Started: {}", format_millis(run.started_at));
                if let Some(finished) = run.finished_at {
                    println!("  Ended:   {}", format_millis(finished));
                }
                println!("  Turns:   {}", run.turns);
                if let Some(until) = run.slept_until {
                    println!("  Slept until {}", format_millis(until));
                }
                if let Some(error) = &run.error {
                    println!("  Error:   {}", error);
                }
                println!();
            }
        }
        OutputFormat::Json => print_json(&json!({
            "id": id,
            "runs": runs,
            "count": runs.len(),
            "limit": limit,
        }))?,
    }

    engine.close().await
}
