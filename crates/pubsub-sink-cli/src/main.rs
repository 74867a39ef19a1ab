//! pubsub-sink CLI
//!
//! Publishes newline-delimited JSON records to a Google Cloud Pub/Sub topic
//! through the batching sink connector.
//!
//! ## Quick Start
//!
//! ```bash
//! # Against a local emulator
//! export PUBSUB_EMULATOR_HOST=localhost:8085
//!
//! # Publish records read from stdin
//! echo '{"partition": 0, "key": "k1", "value": "hello"}' \
//!     | pubsub-sink --project my-project --topic orders publish
//!
//! # Publish a file with larger batches
//! pubsub-sink --project my-project --topic orders --min-batch-size 5000 \
//!     publish --input records.ndjson
//!
//! # Show the effective configuration
//! pubsub-sink --config sink.toml config show
//! ```
//!
//! ## Configuration
//!
//! Settings are read from `--config` (or `~/.pubsub-sink/config.toml`) and
//! overridden by flags. Flags can also be given as environment variables:
//! - `PUBSUB_SINK_PROJECT`, `PUBSUB_SINK_TOPIC`: destination topic
//! - `PUBSUB_SINK_ENDPOINT`: API root, or `emulator:///host:port`
//! - `PUBSUB_SINK_BEARER_TOKEN`: OAuth access token
//! - `PUBSUB_EMULATOR_HOST`: emulator `host:port`, takes priority over the endpoint
//! - `RUST_LOG`: log filter (default `info`); logs go to stderr
//!
//! The process exits non-zero if any publish fails, if a record is rejected
//! as malformed, or if the input could not be read to the end.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, BufReader};
use tracing_subscriber::EnvFilter;

use pubsub_sink::emulator::to_emulator_endpoint;
use pubsub_sink::{ConnectorConfig, ConnectorRuntime, PubSubSinkTask};

mod config;
mod input;

use config::{Config, Overrides};
use input::LineSource;

#[derive(Parser)]
#[command(name = "pubsub-sink")]
#[command(about = "Publish records to a Google Cloud Pub/Sub topic", long_about = None)]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Destination GCP project
    #[arg(long, global = true, env = "PUBSUB_SINK_PROJECT")]
    project: Option<String>,

    /// Destination topic
    #[arg(long, global = true, env = "PUBSUB_SINK_TOPIC")]
    topic: Option<String>,

    /// API root, or emulator:///host:port
    #[arg(long, global = true, env = "PUBSUB_SINK_ENDPOINT")]
    endpoint: Option<String>,

    /// Pub/Sub emulator host:port (shorthand for --endpoint emulator:///host:port)
    #[arg(long, global = true, conflicts_with = "endpoint")]
    emulator_host: Option<String>,

    /// OAuth access token sent with every request
    #[arg(long, global = true, env = "PUBSUB_SINK_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,

    /// Buffered messages per partition that trigger a publish
    #[arg(long, global = true)]
    min_batch_size: Option<usize>,

    /// Number of concurrent publishers
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    /// Milliseconds between commit barriers
    #[arg(long, global = true)]
    commit_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish newline-delimited JSON records
    Publish {
        /// Input file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Source topic for records that do not name one
        #[arg(long, default_value = "stdin")]
        source_topic: String,

        /// Records handed to the sink per put
        #[arg(long)]
        read_batch_size: Option<usize>,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML (secrets omitted)
    Show,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            project: self.project.clone(),
            topic: self.topic.clone(),
            endpoint: self
                .emulator_host
                .as_deref()
                .map(to_emulator_endpoint)
                .or_else(|| self.endpoint.clone()),
            bearer_token: self.bearer_token.clone(),
            min_batch_size: self.min_batch_size,
            pool_size: self.pool_size,
            commit_interval_ms: self.commit_interval_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply(cli.overrides());

    match cli.command {
        Commands::Publish {
            input,
            source_topic,
            read_batch_size,
        } => {
            if let Some(size) = read_batch_size {
                config.runtime.read_batch_size = size;
            }
            publish(config, input, source_topic).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", config.to_toml()?);
            }
        },
    }

    Ok(())
}

async fn publish(config: Config, input: Option<PathBuf>, source_topic: String) -> Result<()> {
    config.validate()?;

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let options = config.runtime.options();
    let (input_state, record_source) = LineSource::new(reader, source_topic.clone())
        .with_linger(options.poll_backoff)
        .into_record_source(config.runtime.read_batch_size);

    let name = config.connector_name.clone();
    let connector = ConnectorConfig {
        topics: vec![source_topic],
        ..ConnectorConfig::new(name.clone(), "PubSubSink")
    };
    let sink = PubSubSinkTask::with_config(&name, config.sink.clone());

    tracing::info!(
        connector = %name,
        topic = %format!("projects/{}/topics/{}", config.sink.project, config.sink.topic),
        input = %input.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "stdin".to_string()),
        "Publishing records"
    );

    let mut runtime = ConnectorRuntime::new();
    runtime
        .start_sink(connector, Box::new(sink), record_source, options)
        .await
        .context("failed to start sink")?;

    let finished = tokio::select! {
        result = runtime.wait(&name) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            tracing::info!(connector = %name, "Interrupted, flushing buffered records");
            runtime.stop(&name).await
        }
    };
    result.with_context(|| format!("connector '{}' failed", name))?;

    let state = input_state.lock().await;
    let stats = state.stats();
    if let Some(e) = state.read_error() {
        bail!(
            "input ended early after {} records: {}",
            stats.records,
            e
        );
    }

    tracing::info!(
        records = stats.records,
        skipped = stats.skipped,
        "All records published"
    );
    Ok(())
}
