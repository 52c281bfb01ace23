//! Entities: persistent autonomous agents
//!
//! An `Entity` owns its two memory tiers, its enabled adapters, a simulated
//! clock offset and its sleep state. The run loop lives in `run.rs`, context
//! assembly in `prompt.rs`.
//!
//! # State machine
//!
//! - **Awake**: `sleep_until` is `None` or in the (simulated) past
//! - **Sleeping**: `sleep_until` is in the (simulated) future
//!
//! `run()` forces Awake; only the `sleep` capability moves an entity back to
//! Sleeping.
//!
//! The entity clock, the short-term memory clock and the long-term memory
//! clock always carry the same offset. `shift_time` is the only way to change
//! it and moves all three together.

mod prompt;
mod run;

use chrono::{DateTime, Duration, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::capability::AdapterCatalog;
use crate::config::{Config, EntityDefaults};
use crate::db::EntityStore;
use crate::llm::{build_provider, LLMProvider, Message};
use crate::memory::{Memory, MemoryEntry};

/// Serialized form of an entity, as persisted and exported
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRecord {
    pub id: String,
    pub model: String,
    #[serde(default)]
    pub stm: Vec<MemoryEntry<Message>>,
    #[serde(default)]
    pub ltm: Vec<MemoryEntry<String>>,
    #[serde(default)]
    pub adapters: Vec<String>,
    /// Minutes
    #[serde(default)]
    pub time_offset: i64,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub sleep_until: Option<DateTime<Utc>>,
    pub max_messages: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Options for creating an entity; unset fields take configured defaults
#[derive(Debug, Clone, Default)]
pub struct EntityOptions {
    pub model: Option<String>,
    pub max_messages: Option<u32>,
    pub adapters: Option<Vec<String>>,
    pub password: Option<String>,
}

/// Metadata for a chat message
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub channel: Option<String>,
    pub sender: Option<String>,
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Backend round trips made
    pub turns: u32,
    /// Tool results recorded
    pub tools_executed: u32,
    /// Set when the run ended with a sleep decision
    pub slept_until: Option<DateTime<Utc>>,
}

/// What `check_wakeup` did
#[derive(Debug, Clone, PartialEq)]
pub enum WakeOutcome {
    Ran(RunSummary),
    /// Still asleep. Informational only; nothing re-checks on its own.
    Dormant { remaining: Duration },
}

/// Shared collaborators every entity runs against
pub struct EntityServices {
    pub provider: Arc<dyn LLMProvider>,
    pub catalog: Arc<AdapterCatalog>,
    pub default_model: String,
    pub defaults: EntityDefaults,
}

impl EntityServices {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        catalog: AdapterCatalog,
        default_model: impl Into<String>,
        defaults: EntityDefaults,
    ) -> Self {
        Self {
            provider,
            catalog: Arc::new(catalog),
            default_model: default_model.into(),
            defaults,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            build_provider(&config.llm),
            AdapterCatalog::standard(),
            config.llm.default_model(),
            config.entity.clone(),
        )
    }

    /// A brand-new entity with every setting at its default
    pub fn fresh_entity(self: &Arc<Self>, id: &str) -> Entity {
        Entity {
            id: id.to_string(),
            model: self.default_model.clone(),
            stm: Memory::new(),
            ltm: Memory::new(),
            adapters: self.defaults.adapters.clone(),
            time_offset: 0,
            sleep_until: None,
            max_messages: self.defaults.max_messages,
            password: None,
            services: Arc::clone(self),
        }
    }

    /// Create an entity, validating the requested options
    pub fn create(self: &Arc<Self>, id: &str, options: EntityOptions) -> Result<Entity, EngineError> {
        validate_id(id)?;

        let mut entity = self.fresh_entity(id);
        if let Some(model) = options.model {
            entity.model = model;
        }
        if let Some(max_messages) = options.max_messages {
            if max_messages == 0 {
                return Err(EngineError::InvalidParameter {
                    name: "max_messages".to_string(),
                    reason: "must be greater than 0".to_string(),
                });
            }
            entity.max_messages = max_messages;
        }
        if let Some(adapters) = options.adapters {
            entity.adapters.clear();
            for name in adapters {
                entity.add_adapter(&name)?;
            }
        }
        entity.password = options.password;

        Ok(entity)
    }

    pub fn restore(self: &Arc<Self>, record: EntityRecord) -> Entity {
        Entity::from_record(record, Arc::clone(self))
    }

    /// Load an entity, materializing (and persisting) a fresh one when the
    /// stored state is missing or corrupt.
    pub async fn load_or_recover(
        self: &Arc<Self>,
        store: &dyn EntityStore,
        id: &str,
    ) -> anyhow::Result<Entity> {
        match self.load_existing(store, id).await? {
            Some(entity) => Ok(entity),
            None => {
                validate_id(id)?;
                let entity = self.fresh_entity(id);
                store.save(&entity.to_record()).await?;
                Ok(entity)
            }
        }
    }

    /// Load an entity that is known to exist. Corrupt state is replaced by a
    /// fresh entity; a missing row yields `None`.
    pub async fn load_existing(
        self: &Arc<Self>,
        store: &dyn EntityStore,
        id: &str,
    ) -> anyhow::Result<Option<Entity>> {
        match store.load(id).await {
            Ok(Some(record)) => Ok(Some(self.restore(record))),
            Ok(None) => Ok(None),
            Err(err) => match err.root_cause().downcast_ref::<EngineError>() {
                Some(EngineError::PersistenceCorrupt { reason, .. }) => {
                    warn!(entity = %id, "Stored state is corrupt ({}), resetting entity", reason);
                    let entity = self.fresh_entity(id);
                    store.save(&entity.to_record()).await?;
                    Ok(Some(entity))
                }
                _ => Err(err),
            },
        }
    }
}

fn validate_id(id: &str) -> Result<(), EngineError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidParameter {
            name: "id".to_string(),
            reason: "use 1-64 letters, digits, '-', '_' or '.'".to_string(),
        })
    }
}

pub struct Entity {
    id: String,
    model: String,
    stm: Memory<Message>,
    ltm: Memory<String>,
    adapters: Vec<String>,
    time_offset: i64,
    sleep_until: Option<DateTime<Utc>>,
    max_messages: u32,
    password: Option<String>,
    services: Arc<EntityServices>,
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("stm", &self.stm.len())
            .field("ltm", &self.ltm.len())
            .field("adapters", &self.adapters)
            .field("time_offset", &self.time_offset)
            .field("sleep_until", &self.sleep_until)
            .field("max_messages", &self.max_messages)
            .finish_non_exhaustive()
    }
}

impl Entity {
    pub fn from_record(record: EntityRecord, services: Arc<EntityServices>) -> Self {
        Self {
            id: record.id,
            model: record.model,
            stm: Memory::from_entries(record.stm, record.time_offset),
            ltm: Memory::from_entries(record.ltm, record.time_offset),
            adapters: record.adapters,
            time_offset: record.time_offset,
            sleep_until: record.sleep_until,
            max_messages: record.max_messages.max(1),
            password: record.password,
            services,
        }
    }

    pub fn to_record(&self) -> EntityRecord {
        EntityRecord {
            id: self.id.clone(),
            model: self.model.clone(),
            stm: self.stm.to_entries(),
            ltm: self.ltm.to_entries(),
            adapters: self.adapters.clone(),
            time_offset: self.time_offset,
            sleep_until: self.sleep_until,
            max_messages: self.max_messages,
            password: self.password.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn stm(&self) -> &Memory<Message> {
        &self.stm
    }

    pub fn ltm(&self) -> &Memory<String> {
        &self.ltm
    }

    pub fn adapters(&self) -> &[String] {
        &self.adapters
    }

    pub fn time_offset(&self) -> i64 {
        self.time_offset
    }

    pub fn sleep_until(&self) -> Option<DateTime<Utc>> {
        self.sleep_until
    }

    pub fn set_sleep_until(&mut self, until: Option<DateTime<Utc>>) {
        self.sleep_until = until;
    }

    pub fn max_messages(&self) -> u32 {
        self.max_messages
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Real time shifted by the entity's offset
    pub fn current_time(&self) -> DateTime<Utc> {
        Utc::now() + Duration::minutes(self.time_offset)
    }

    /// Remaining dormancy, if the entity is asleep
    pub fn remaining_sleep(&self) -> Option<Duration> {
        let until = self.sleep_until?;
        let now = self.current_time();
        (now < until).then(|| until - now)
    }

    pub fn is_dormant(&self) -> bool {
        self.remaining_sleep().is_some()
    }

    /// Move the simulated clock of the entity and both memories together
    pub fn shift_time(&mut self, minutes: i64) {
        self.time_offset += minutes;
        self.stm.shift_time(minutes);
        self.ltm.shift_time(minutes);
    }

    /// Enable an adapter from the catalog. Returns false if already enabled.
    pub fn add_adapter(&mut self, name: &str) -> Result<bool, EngineError> {
        if !self.services.catalog.contains(name) {
            return Err(EngineError::CapabilityNotFound(name.to_string()));
        }
        if self.adapters.iter().any(|a| a == name) {
            return Ok(false);
        }
        self.adapters.push(name.to_string());
        Ok(true)
    }

    /// Disable an adapter. Returns false if it was not enabled.
    pub fn remove_adapter(&mut self, name: &str) -> bool {
        let before = self.adapters.len();
        self.adapters.retain(|a| a != name);
        self.adapters.len() != before
    }
}
