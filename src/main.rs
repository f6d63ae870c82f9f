//! ClearCall - voice complaint backend
//!
//! Accepts recorded customer complaints, transcribes them, and answers each
//! one with a generated support reply. Also serves accounts, call-log
//! analytics and a live support chat.
//!
//! `clearcall` runs the HTTP server; `clearcall --check-env` only reports
//! missing configuration.

mod config;
mod models;
mod server;

use config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("clearcall=info".parse()?))
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--check-env") {
        let missing = Config::missing_vars(|name| std::env::var(name).ok());
        if missing.is_empty() {
            tracing::info!("All required environment variables are set");
            return Ok(());
        }
        for (category, names) in &missing {
            tracing::error!("Missing {} variables: {}", category, names.join(", "));
        }
        std::process::exit(1);
    }

    let config = Config::from_env()?;
    for (category, names) in Config::missing_vars(|name| std::env::var(name).ok()) {
        tracing::warn!("{} not fully configured, missing: {}", category, names.join(", "));
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            tracing::info!("Starting ClearCall server on port {}", config.port);
            server::run_server(config).await
        })
}
