// src/main.rs
// Binary entry point: resolve config, set up logging, open a single
// connection, run the orchestrator end to end.

use std::path::Path;

use clap::Parser;
use sqlx::Connection;

use db_cleaner::cli::CliArgs;
use db_cleaner::config::{resolve_config_path, Config};
use db_cleaner::{logging, orchestrator};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let config_path = resolve_config_path(args.config.clone());

    let config = match Config::load(Path::new(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[ERROR] failed to load config '{config_path}': {e}");
            std::process::exit(1);
        }
    };

    let _logging_guard = match logging::init(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("[ERROR] failed to initialize logging: {e}");
            std::process::exit(1);
        }
    };

    let dry_run = args.resolve_dry_run(config.dry_run);

    let mut conn = match sqlx::PgConnection::connect(&config.db_uri).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(target: "main", "[ERROR] failed to connect to database: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(target: "main", tables = config.tables.len(), dry_run, "[START] db-cleaner run starting");

    let result = orchestrator::run(&mut conn, &config, dry_run).await;
    let _ = conn.close().await;

    match result {
        Ok(()) => {
            tracing::info!(target: "main", "[DONE] db-cleaner run completed successfully");
        }
        Err(e) => {
            tracing::error!(target: "main", "[ERROR] db-cleaner run aborted: {e}");
            std::process::exit(1);
        }
    }
}
