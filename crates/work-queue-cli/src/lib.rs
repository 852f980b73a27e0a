//! # Work Queue CLI
//!
//! Command-line interface for a single work queue.
//!
//! This module wires configuration, logging, the backend and the queue
//! adapter together, then runs one queue operation and prints its result as
//! JSON on stdout. Logs go to stderr.
//!
//! ## Configuration
//!
//! Sources, later ones overriding earlier ones:
//!  1. The file given by `--config` / `WORK_QUEUE_CONFIG` (YAML, TOML or JSON,
//!     chosen by extension)
//!  2. Environment variables prefixed `WORK_QUEUE__` with `__` separating
//!     levels, e.g. `WORK_QUEUE__BACKEND__TYPE=in_memory` or
//!     `WORK_QUEUE__QUEUE__DEFAULT_VISIBILITY_TIMEOUT=120`

use chrono::Duration;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use work_queue::{
    create_backend, AdapterConfig, BackendConfig, QueueAdapter, QueueError, QueueMessage,
    QueueName, ReceiptHandle, ReleaseOptions, SubmitOptions, WorkQueue,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

const ENV_PREFIX: &str = "WORK_QUEUE";

// ============================================================================
// CLI Structure
// ============================================================================

/// Work Queue CLI - operate a visibility-timeout work queue
#[derive(Parser, Debug)]
#[command(name = "work-queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Submit, consume and inspect messages on a work queue")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WORK_QUEUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Queue name
    #[arg(short, long, env = "WORK_QUEUE_NAME")]
    pub queue: String,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Submit a JSON payload
    Submit {
        /// Payload as JSON text
        payload: String,

        /// Seconds before the message first becomes visible
        #[arg(short, long)]
        delay: Option<i64>,
    },

    /// Receive one message and delete it immediately
    Take {
        /// Seconds to wait for a message (at most 20 are honoured)
        #[arg(short, long, default_value = "20")]
        timeout: i64,
    },

    /// Receive one message and hide it until finished or released
    Reserve {
        /// Visibility timeout in seconds; defaults to the queue setting
        #[arg(short, long)]
        timeout: Option<i64>,
    },

    /// Make a reserved message visible again
    Release {
        /// Receipt handle returned by `reserve`
        handle: String,

        /// Seconds until the message reappears; defaults to the queue setting
        #[arg(short, long)]
        delay: Option<i64>,
    },

    /// Delete a reserved message
    Finish {
        /// Receipt handle returned by `reserve`
        handle: String,
    },

    /// Give up on a reserved message (no effect on this backend)
    Abort {
        /// Receipt handle returned by `reserve`
        handle: String,
    },

    /// Look at ready messages without reserving them
    Peek {
        /// Maximum number of messages
        #[arg(short = 'n', long, default_value = "10")]
        limit: u32,
    },

    /// Show approximate message counts
    Stats,

    /// Delete every message in the queue
    Flush {
        /// Confirm the purge
        #[arg(short, long)]
        yes: bool,
    },
}

// ============================================================================
// CLI Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::InvalidArgument { .. } => 2,
            Self::Queue(QueueError::ConfigurationError(_) | QueueError::ValidationError(_)) => 2,
            Self::Queue(e) if e.is_stale_handle() => 4,
            Self::Queue(e) if e.is_transient() => 5,
            Self::Queue(_) => 3,
            Self::Output(_) => 6,
            Self::Logging { .. } => 6,
        }
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Settings loaded from file and environment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliSettings {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub queue: AdapterConfig,
}

/// Load settings from an optional file and the process environment
pub fn load_settings(path: Option<&Path>) -> Result<CliSettings, CliError> {
    load_settings_with_env(path, None)
}

/// Load settings, reading environment variables from `env` when given
/// instead of the process environment
pub fn load_settings_with_env(
    path: Option<&Path>,
    env: Option<config::Map<String, String>>,
) -> Result<CliSettings, CliError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        debug!(path = %path.display(), "Loading configuration file");
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
        .build()?
        .try_deserialize::<CliSettings>()?;

    Ok(settings)
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Parse arguments from the process, run the command and print its result
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let settings = load_settings(cli.config.as_deref())?;
    let output = run(cli, settings).await?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Run a parsed command against the configured queue and return its output
pub async fn run(cli: Cli, settings: CliSettings) -> Result<Value, CliError> {
    // Checked before connecting so a refused flush makes no backend call
    if let Commands::Flush { yes: false } = cli.command {
        return Err(CliError::InvalidArgument {
            arg: "--yes".to_string(),
            message: "flush deletes every message; pass --yes to confirm".to_string(),
        });
    }

    let name = QueueName::new(cli.queue).map_err(QueueError::from)?;
    let backend = create_backend(settings.backend).await?;
    let queue = QueueAdapter::connect(name, settings.queue, Arc::clone(&backend)).await?;

    info!(
        queue = %queue.name(),
        endpoint = %queue.endpoint(),
        provider = backend.provider_name(),
        "Connected to queue"
    );

    execute(&queue, cli.command).await
}

async fn execute(queue: &QueueAdapter, command: Commands) -> Result<Value, CliError> {
    let output = match command {
        Commands::Submit { payload, delay } => {
            let payload: Value =
                serde_json::from_str(&payload).map_err(|e| CliError::InvalidArgument {
                    arg: "payload".to_string(),
                    message: format!("not valid JSON: {}", e),
                })?;
            let mut options = SubmitOptions::new();
            if let Some(delay) = delay {
                options = options.with_delay(Duration::seconds(delay));
            }

            let message_id = queue.submit(payload, options).await?;
            json!({ "message_id": message_id.as_str() })
        }
        Commands::Take { timeout } => {
            let message = queue.wait_and_take(Duration::seconds(timeout)).await?;
            message.as_ref().map_or(Value::Null, message_json)
        }
        Commands::Reserve { timeout } => {
            let message = queue.wait_and_reserve(timeout.map(Duration::seconds)).await?;
            message.as_ref().map_or(Value::Null, message_json)
        }
        Commands::Release { handle, delay } => {
            let mut options = ReleaseOptions::new();
            if let Some(delay) = delay {
                options = options.with_delay(Duration::seconds(delay));
            }

            queue
                .release(&ReceiptHandle::from_raw(handle.clone()), options)
                .await?;
            json!({ "released": handle })
        }
        Commands::Finish { handle } => {
            let finished = queue.finish(&ReceiptHandle::from_raw(handle.clone())).await?;
            json!({ "finished": finished, "handle": handle })
        }
        Commands::Abort { handle } => {
            queue.abort(&ReceiptHandle::from_raw(handle.clone())).await?;
            json!({ "aborted": handle })
        }
        Commands::Peek { limit } => {
            let messages = queue.peek(limit).await?;
            Value::Array(messages.iter().map(message_json).collect())
        }
        Commands::Stats => json!({
            "queue": queue.name().as_str(),
            "endpoint": queue.endpoint().as_str(),
            "ready": queue.count_ready().await?,
            "reserved": queue.count_reserved().await?,
            "failed": queue.count_failed().await?,
        }),
        Commands::Flush { .. } => {
            queue.flush().await?;
            json!({ "flushed": queue.name().as_str() })
        }
    };

    Ok(output)
}

/// JSON view of a delivered message
pub fn message_json(message: &QueueMessage) -> Value {
    json!({
        "handle": message.handle.handle(),
        "expires_at": message.handle.expires_at().map(|at| at.to_string()),
        "payload": message.payload,
        "delivery_count": message.delivery_count,
        "message_id": message.backend_message_id,
        "received_at": message.received_at.to_string(),
    })
}

// ============================================================================
// Logging
// ============================================================================

fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "work_queue={level},work_queue_cli={level}",
            level = cli.log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}
