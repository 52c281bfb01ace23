// Somnus entity engine
// Main entry point for the somnus binary

use clap::Parser;
use sdk::errors::{EngineError, ErrorExt};
use somnus_engine::cli::{Cli, Command};
use somnus_engine::config::Config;
use somnus_engine::daemon::DaemonManager;
use somnus_engine::entity::{ChatOptions, EntityOptions};
use somnus_engine::handlers::{self, OutputFormat};
use somnus_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    tracing::info!(
        "Somnus v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let result = dispatch(cli.command, &config, format).await;

    if let Err(e) = &result {
        if let Some(engine_err) = e.root_cause().downcast_ref::<EngineError>() {
            eprintln!("Hint: {}", engine_err.user_hint());
        }
    }
    result
}

async fn dispatch(command: Command, config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Command::Start => {
            tracing::info!("Starting daemon...");
            handlers::handle_start(config).await
        }

        Command::Stop => {
            tracing::info!("Stopping daemon...");
            DaemonManager::stop(config).await?;
            println!("Somnus daemon stopped.");
            Ok(())
        }

        Command::Status => handlers::handle_status(config, format),

        Command::List => handlers::handle_list(config, format).await,

        Command::Create {
            id,
            model,
            max_messages,
            adapters,
            password,
        } => {
            let options = EntityOptions {
                model,
                max_messages,
                adapters: (!adapters.is_empty()).then_some(adapters),
                password,
            };
            handlers::handle_create(id, options, config, format).await
        }

        Command::Get { id } => handlers::handle_get(id, config, format).await,

        Command::Delete { id } => handlers::handle_delete(id, config, format).await,

        Command::Wake { id, delay } => {
            tracing::info!(entity = %id, ?delay, "Wake requested");
            handlers::handle_wake(id, delay, config, format).await
        }

        Command::Capability { action } => {
            tracing::debug!("Capability management: {:?}", action);
            handlers::handle_capability(action, config, format).await
        }

        Command::Run { id } => {
            tracing::info!(entity = %id, "Run requested");
            handlers::handle_run(id, config, format).await
        }

        Command::Chat {
            id,
            text,
            channel,
            sender,
        } => {
            let options = ChatOptions { channel, sender };
            handlers::handle_chat(id, text, options, config, format).await
        }

        Command::ShiftTime { id, minutes } => {
            handlers::handle_shift_time(id, minutes, config, format).await
        }

        Command::Export { id, out } => handlers::handle_export(id, out, config).await,

        Command::Import { path } => handlers::handle_import(&path, config, format).await,

        Command::History { id, limit } => {
            handlers::handle_history(id, limit, config, format).await
        }
    }
}
