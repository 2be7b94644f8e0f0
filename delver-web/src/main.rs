//! Delver web server binary
//!
//! Exit codes: 0 normal shutdown, 1 unrecoverable configuration error,
//! 2 datastore initialisation failure.

use delver_core::{init_logging, AppConfig, LoggingConfig};
use delver_web::{DelverServer, WebError};
use std::path::Path;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let config_path =
        std::env::var("DELVER_CONFIG").unwrap_or_else(|_| "research.toml".to_string());

    let config = if Path::new(&config_path).exists() {
        match AppConfig::from_file(&config_path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Configuration error: {}", err);
                return 1;
            }
        }
    } else {
        eprintln!(
            "Config file {} not found, using built-in defaults",
            config_path
        );
        AppConfig::default()
    };

    if let Err(err) = init_logging(&LoggingConfig::default()) {
        eprintln!("Failed to initialize logging: {}", err);
        return 1;
    }

    let server = match DelverServer::new(config).await {
        Ok(server) => server,
        Err(WebError::Datastore(message)) => {
            eprintln!("Datastore initialisation failed: {}", message);
            return 2;
        }
        Err(err) => {
            eprintln!("Startup failed: {}", err);
            return 1;
        }
    };

    match server.start().await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Server error: {}", err);
            return 1;
        }
    }
}
