//! CLI interface for Somnus
//!
//! Defines every command and global flag with clap's derive API. Entity
//! commands act on the database directly; `start` hosts the wake scheduler.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Somnus entity engine
///
/// Hosts persistent, autonomous entities that wake up, act through their
/// capabilities and go back to sleep, keeping a journal of what they did.
#[derive(Parser, Debug)]
#[command(name = "somnus")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the daemon that wakes entities when they are due
    Start,

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// List entities and their sleep state
    List,

    /// Create a new entity
    Create {
        /// Entity id
        id: String,

        /// Model identifier (defaults to the configured provider's model)
        #[arg(long)]
        model: Option<String>,

        /// Turn budget per run
        #[arg(long)]
        max_messages: Option<u32>,

        /// Adapter to enable (repeatable)
        #[arg(long = "adapter", value_name = "NAME")]
        adapters: Vec<String>,

        /// Access credential stored with the entity
        #[arg(long)]
        password: Option<String>,
    },

    /// Show one entity
    Get {
        id: String,
    },

    /// Delete an entity and its run history
    Delete {
        id: String,
    },

    /// Wake an entity now, or schedule it to wake after a delay
    Wake {
        id: String,

        /// Minutes from now instead of immediately
        #[arg(long, value_name = "MINUTES")]
        delay: Option<i64>,
    },

    /// Manage an entity's capabilities
    Capability {
        #[command(subcommand)]
        action: CapabilityAction,
    },

    /// Run an entity now, ignoring its sleep state
    Run {
        id: String,
    },

    /// Send a message to an entity and print its reply
    Chat {
        id: String,

        /// Message text
        text: String,

        /// Channel the message arrived on
        #[arg(long)]
        channel: Option<String>,

        /// Who sent the message
        #[arg(long = "from", value_name = "SENDER")]
        sender: Option<String>,
    },

    /// Shift an entity's simulated clock
    ShiftTime {
        id: String,

        /// Minutes to add (negative to go back)
        #[arg(allow_hyphen_values = true)]
        minutes: i64,
    },

    /// Export an entity's state as JSON
    Export {
        id: String,

        /// Write to a file instead of stdout
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },

    /// Import entity state from a JSON export, replacing any existing entity
    Import {
        path: PathBuf,
    },

    /// Show an entity's recent runs
    History {
        id: String,

        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum CapabilityAction {
    /// List installed adapters and whether the entity has them
    List {
        id: String,
    },

    /// Enable an adapter
    Add {
        id: String,
        name: String,
    },

    /// Disable an adapter
    Remove {
        id: String,
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_create_with_adapters() {
        let cli = Cli::try_parse_from([
            "somnus", "create", "ada", "--adapter", "clock", "--adapter", "journal",
            "--max-messages", "5",
        ])
        .unwrap();

        match cli.command {
            Command::Create {
                id,
                adapters,
                max_messages,
                ..
            } => {
                assert_eq!(id, "ada");
                assert_eq!(adapters, vec!["clock", "journal"]);
                assert_eq!(max_messages, Some(5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_negative_shift() {
        let cli = Cli::try_parse_from(["somnus", "shift-time", "ada", "-90"]).unwrap();
        assert!(matches!(cli.command, Command::ShiftTime { minutes: -90, .. }));
    }

    #[test]
    fn test_parse_chat_with_origin_and_global_json() {
        let cli = Cli::try_parse_from([
            "somnus", "chat", "ada", "hello there", "--channel", "sms", "--from", "Alice", "--json",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Command::Chat {
                text,
                channel,
                sender,
                ..
            } => {
                assert_eq!(text, "hello there");
                assert_eq!(channel.as_deref(), Some("sms"));
                assert_eq!(sender.as_deref(), Some("Alice"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_wake_with_delay() {
        let cli = Cli::try_parse_from(["somnus", "wake", "ada", "--delay", "30"]).unwrap();
        assert!(matches!(cli.command, Command::Wake { delay: Some(30), .. }));
    }
}
