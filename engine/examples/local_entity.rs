//! Example: one wake/sleep cycle against a local Ollama instance
//!
//! Creates a throwaway entity with the clock adapter, runs it once and
//! prints what ended up in its memory. Nothing is persisted.
//!
//! Prerequisites:
//! - Ollama must be installed and running (https://ollama.ai)
//! - A model with tool support must be pulled (e.g., `ollama pull llama3.1:8b`)
//!
//! Run with: cargo run --example local_entity

use somnus_engine::capability::AdapterCatalog;
use somnus_engine::config::EntityDefaults;
use somnus_engine::entity::{EntityOptions, EntityServices};
use somnus_engine::llm::ollama::OllamaProvider;
use somnus_engine::llm::LLMProvider;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Local Entity Example ===\n");

    let provider = Arc::new(OllamaProvider::new("http://localhost:11434"));
    if !provider.check_health().await {
        eprintln!("Ollama is not reachable at http://localhost:11434");
        eprintln!("  1. Install Ollama from https://ollama.ai");
        eprintln!("  2. Pull a model: ollama pull llama3.1:8b");
        return Ok(());
    }

    let services = Arc::new(EntityServices::new(
        provider,
        AdapterCatalog::standard(),
        "llama3.1:8b",
        EntityDefaults::default(),
    ));

    let mut entity = services.create(
        "demo",
        EntityOptions {
            max_messages: Some(5),
            adapters: Some(vec!["clock".to_string()]),
            ..Default::default()
        },
    )?;

    let summary = entity.run().await?;
    println!("Turns:          {}", summary.turns);
    println!("Tools executed: {}", summary.tools_executed);
    match summary.slept_until {
        Some(until) => println!("Sleeping until: {}", until.to_rfc3339()),
        None => println!("Still awake (turn budget exhausted)"),
    }

    println!("\nJournal:");
    for entry in entity.ltm().entries() {
        println!("  [{}] {}", entry.timestamp.format("%H:%M"), entry.message);
    }

    println!("\nUnconsolidated messages: {}", entity.stm().len());
    Ok(())
}
