//! Scheduled database backup tool
//!
//! Dumps one MySQL or PostgreSQL database, optionally compresses the dump,
//! optionally rotates and uploads it to S3, then removes the local copy.

// dbbackup/src/main.rs
mod backup;
mod config;
mod errors;
mod logging;
mod utils;

use anyhow::{Context, Result};
use config::AppConfig;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Main entry point. The exit code tells which step failed.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    logging::init();

    let app_config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("cannot load configuration: {:?}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("starting backup process");
    match backup::run_backup_flow(&app_config).await {
        Ok(()) => {
            info!("backup process completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}. Exiting", e);
            ExitCode::from(e.exit_code())
        }
    }
}

/// Reads a JSON config file when a path is given, the environment otherwise.
fn load_config() -> Result<AppConfig> {
    let args: Vec<String> = env::args().collect();
    match args.get(1).map(|arg| arg.trim()).filter(|arg| !arg.is_empty()) {
        Some(path) => {
            let config_path = PathBuf::from(path);
            AppConfig::load_from_json(&config_path).context(format!(
                "Failed to load application configuration from {}",
                config_path.display()
            ))
        }
        None => Ok(AppConfig::load_from_env()),
    }
}
