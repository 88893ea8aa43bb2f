//! Main application entry point for the chat server.
//!
//! Parses the command line, loads the configuration file, installs logging
//! and runs the server until a termination signal arrives.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::{Context, Result};
use chat_server::ChatServer;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use cli::CliArgs;
use config::AppConfig;

/// The running application: configuration plus the server it drives.
pub struct Application {
    config: AppConfig,
    server: Arc<ChatServer>,
}

impl Application {
    /// Loads configuration, applies CLI overrides and sets up logging.
    pub async fn new(args: CliArgs) -> Result<Self> {
        // Load configuration first (before logging setup)
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .context("Configuration validation failed")?;

        logging::setup_logging(&config.logging)?;

        let server = Arc::new(ChatServer::new(config.to_server_config()?));

        info!("💬 Chat server v{}", env!("CARGO_PKG_VERSION"));
        info!("📂 Config: {}", args.config_path.display());

        Ok(Self { config, server })
    }

    /// Runs the server until a shutdown signal, then drains it.
    pub async fn run(self) -> Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!("  ⏱️ Write timeout: {}ms", self.config.server.write_timeout_ms);

        // Bind before spawning so a bind failure stops startup.
        let listener = self.server.bind()?;

        let mut server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            signal = signals::shutdown_signal() => {
                let name = signal.context("Failed to install signal handlers")?;
                info!("📡 Received {name}, initiating graceful shutdown...");
            }
            finished = &mut server_handle => {
                // serve only returns after shutdown, so getting here means it failed.
                finished.context("Server task panicked")??;
                return Ok(());
            }
        }

        self.server.shutdown().await?;

        info!("⏳ Waiting for connections to close...");
        server_handle.await.context("Server task panicked")??;
        info!("✅ All sessions closed");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Application error: {:?}", e);
        std::process::exit(1);
    }

    info!("👋 Chat server shutdown complete");
    Ok(())
}
