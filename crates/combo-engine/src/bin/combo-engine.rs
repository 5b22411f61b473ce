//! # Combo Engine
//!
//! Runs the recompute worker, safety monitor and ledger reconciler against
//! one SQLite database until interrupted.
//!
//! ## Usage
//! ```bash
//! cargo run -p combo-engine
//!
//! # Explicit config file and database
//! cargo run -p combo-engine -- --config ./engine.toml --db ./data/combo.db
//!
//! # One monitor pass plus one recompute batch, then exit
//! cargo run -p combo-engine -- --once
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use combo_db::Database;
use combo_engine::{
    process_batch, run_monitor_pass, shutdown_signal, EngineConfig, EngineRuntime, SingleFlight,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut db_path: Option<PathBuf> = None;
    let mut once = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--once" => once = true,
            "--help" | "-h" => {
                println!("Combo Bundles Engine");
                println!();
                println!("Usage: combo-engine [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: platform config dir/engine.toml)");
                println!("  -d, --db <PATH>      Database file path, overrides the config file");
                println!("      --once           Run one monitor pass and one recompute batch, then exit");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,combo_engine=debug")),
        )
        .with_target(true)
        .init();

    let mut config = EngineConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }
    info!(
        instance = %config.instance.name,
        db = %config.database.path.display(),
        "Configuration loaded"
    );

    let db = Arc::new(Database::new(config.db_config()).await?);
    info!("Database ready");

    if once {
        let monitor = run_monitor_pass(&db, Utc::now()).await?;
        let batch = process_batch(&db, &config, &SingleFlight::new()).await?;
        info!(?monitor, ?batch, "Single pass complete");
        db.close().await;
        return Ok(());
    }

    let handle = EngineRuntime::new(config, db.clone()).start();
    shutdown_signal().await;
    handle.shutdown().await?;

    db.close().await;
    info!("Engine shutdown complete");
    Ok(())
}
