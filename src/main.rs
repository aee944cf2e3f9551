//! textgate - Authenticated HTTP frontend for an OpenAI-compatible inference backend
//!
//! A thin gateway that validates a shared-secret header, forwards the prompt
//! to an already-running chat-completion backend, and relays the result
//! buffered or as an incremental stream.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use textgate::config::{Config, KeySource};

#[derive(Parser)]
#[command(name = "textgate")]
#[command(about = "Authenticated HTTP frontend for an OpenAI-compatible inference backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

/// Initialize tracing. RUST_LOG wins; the config level is the fallback.
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("textgate={},tower_http=info", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn report_key_source(source: &KeySource) {
    match source {
        KeySource::None => {
            tracing::warn!("No inbound API key resolved - all requests will be rejected")
        }
        source => tracing::info!(source = %source, "Inbound API key loaded"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut config, key_source) = Config::from_file_with_env(&config)?;
            init_tracing(&config.logging.level);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            report_key_source(&key_source);
            textgate::relay::run_server(config).await
        }

        Commands::Check { config } => {
            let path = config;
            let (config, key_source) = Config::from_file_with_env(&path)?;
            init_tracing(&config.logging.level);

            tracing::info!(config = %path, "Checking configuration");
            report_key_source(&key_source);
            tracing::info!(
                listen = %config.server.listen,
                backend = %config.backend.url,
                model = %config.backend.model,
                "Configuration OK"
            );
            Ok(())
        }
    }
}
