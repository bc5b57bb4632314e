//! Parlance CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use parlance::settings::SettingsOverlay;
use parlance::{Bot, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parlance", version)]
#[command(about = "A conversational-bot framework with a staged thought process")]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Bot display name
    #[arg(long)]
    name: Option<String>,

    /// Alternate name for direct matching
    #[arg(long)]
    alias: Option<String>,

    /// Minimum log level (silent, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Message adapter to load
    #[arg(long)]
    message_adapter: Option<String>,

    /// NLU adapter to load
    #[arg(long)]
    nlu_adapter: Option<String>,

    /// Storage adapter to load
    #[arg(long)]
    storage_adapter: Option<String>,

    /// Enable periodic memory snapshotting
    #[arg(long)]
    auto_save: Option<bool>,

    /// Adapter operation timeout in milliseconds
    #[arg(long)]
    request_timeout: Option<u64>,
}

impl Cli {
    fn overlay(&self) -> SettingsOverlay {
        SettingsOverlay {
            name: self.name.clone(),
            alias: self.alias.clone(),
            log_level: self.log_level.clone(),
            message_adapter: self.message_adapter.clone(),
            nlu_adapter: self.nlu_adapter.clone(),
            storage_adapter: self.storage_adapter.clone(),
            auto_save: self.auto_save,
            request_timeout: self.request_timeout,
            ..Default::default()
        }
    }
}

fn init_tracing(log_level: &str) {
    let directive = match log_level {
        "silent" => "off".to_string(),
        level => level.to_string(),
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::resolve(cli.config.as_deref(), std::env::vars(), cli.overlay())
        .context("failed to resolve settings")?;
    init_tracing(&settings.log_level);

    let bot = Bot::new(settings);
    if bot.start().await.is_err() {
        std::process::exit(bot.exit_code());
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    bot.shutdown().await;
    let code = bot.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
