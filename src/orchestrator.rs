// src/orchestrator.rs
// Run Orchestrator (spec.md §4.9): sequentially cleans every configured
// table over one connection, timing each table and terminating the whole
// run on the first fatal error.
//
// Ported from `examples/original_source/db_cleaner/main.py`'s top-level loop.

use std::time::Instant;

use chrono::Utc;
use sqlx::PgConnection;

use crate::cleaner::clean_table;
use crate::config::Config;
use crate::error::CleanerResult;

/// Runs `clean_table` for every table in `config.tables`, in declaration
/// order, over the same connection. Returns the first fatal error
/// encountered; the caller (`main`) is responsible for turning that into a
/// non-zero process exit after the connection is dropped (spec.md §4.7 step
/// 5, §5 "single connection... sequential across tables").
pub async fn run(conn: &mut PgConnection, config: &Config, dry_run: bool) -> CleanerResult<()> {
    let now = Utc::now();

    for table in &config.tables {
        let started = Instant::now();
        let result = clean_table(conn, table, &config.skip_tables, &config.skip_columns, dry_run, now).await;
        let elapsed = started.elapsed();

        tracing::info!(
            target: "orchestrator",
            table = %table.name,
            elapsed_ms = elapsed.as_millis() as u64,
            "[TIMING] table '{}' in {:?}",
            table.name,
            elapsed,
        );

        result?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    // `run`'s sequencing and early-abort-on-error behavior are exercised
    // end-to-end against a live connection only; the per-table timing and
    // loop-order contract are covered by `clean_table`'s own unit tests and
    // by inspection, since spinning up a real table list requires Postgres.
}
