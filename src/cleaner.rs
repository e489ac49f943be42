// src/cleaner.rs
// Table Cleaner (spec.md §4.7): per-table batch loop. Builds the relation
// graph once, then repeatedly fetches a batch of expired parent keys, sets a
// per-batch statement timeout, invokes the cascade walker inside one
// transaction, commits, archives, and sleeps before the next batch.
//
// Ported from `examples/original_source/db_cleaner/cleaner.py::clean_table`.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};

use crate::config::TableConfig;
use crate::error::CleanerResult;
use crate::fetch::fetch_batch;
use crate::graph::build_graph;
use crate::model::{ArchiveBuffer, DeleteTotals, QualifiedName};
use crate::walker::{cascade_delete, WalkMode, WalkOptions};

/// Politeness delay between batches of the same table (spec.md §4.7 step 4,
/// §5 "fixed 200 ms sleep throttles lock pressure").
const INTER_BATCH_SLEEP: Duration = Duration::from_millis(200);

/// Computes `now - expire_days`, truncated to the start of day, or `None`
/// when `disable_cutoff` is set (spec.md GLOSSARY "Cutoff").
pub fn compute_cutoff(disable_cutoff: bool, expire_days: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if disable_cutoff {
        return None;
    }
    let naive_midnight = (now - chrono::Duration::days(expire_days)).date_naive().and_hms_opt(0, 0, 0).expect("midnight always valid");
    Some(DateTime::from_naive_utc_and_offset(naive_midnight, Utc))
}

/// Runs the retention loop for one table to completion (or until the run is
/// aborted by a fatal database error). Returns `Ok(())` on a clean finish;
/// a fatal error is returned for the orchestrator to turn into a non-zero
/// process exit (spec.md §4.7 step 5, §7 "all DB errors are fatal").
pub async fn clean_table(
    conn: &mut PgConnection,
    table: &TableConfig,
    skip_tables: &[String],
    skip_columns: &[String],
    dry_run: bool,
    now: DateTime<Utc>,
) -> CleanerResult<()> {
    let qualified = QualifiedName::parse(&table.name);

    if !table.enable {
        tracing::warn!(target: "cleaner", table = %qualified, "[SKIP] table '{qualified}' skipped due to disabled");
        return Ok(());
    }
    if skip_tables.iter().any(|s| s == &table.name || s == &qualified.qualified())
        || skip_columns.iter().any(|c| c == &table.date_column)
    {
        tracing::warn!(target: "cleaner", table = %qualified, "[SKIP] table '{qualified}' skipped due to filter rules");
        return Ok(());
    }

    let (mut graph, mut discovered_auto) = build_graph(conn, table, skip_tables, skip_columns).await?;

    let cutoff = compute_cutoff(table.disable_cutoff, table.expire_days, now);
    let opts = WalkOptions {
        auto_discover: table.auto_discover_related,
        exclude_cascade_fk: table.exclude_cascade_fk,
        skip_tables,
        skip_columns,
        mode: if dry_run { WalkMode::DryRun } else { WalkMode::Execute },
        archive: table.archive,
    };

    tracing::info!(
        target: "cleaner",
        table = %qualified,
        cutoff = ?cutoff,
        conditions = table.conditions.len(),
        "[START] cleaning table '{qualified}'{}",
        match cutoff {
            Some(c) => format!(" older than {} days (before {c})", table.expire_days),
            None => " without a cutoff".to_string(),
        },
    );

    let conditions = table
        .conditions
        .iter()
        .cloned()
        .map(crate::config::PredicateConfig::into_predicate)
        .collect::<CleanerResult<Vec<_>>>()?;

    let key_types = crate::catalog::column_types(conn, &qualified, &table.key_columns).await?;

    let mut total_deleted: i64 = 0;
    let mut run_totals = DeleteTotals::default();

    loop {
        let keys = fetch_batch(
            conn,
            &qualified,
            &table.key_columns,
            &key_types,
            &table.date_column,
            cutoff,
            table.batch_size,
            &conditions,
        )
        .await?;

        if keys.is_empty() {
            tracing::info!(target: "cleaner", table = %qualified, total = total_deleted, "[DONE] table '{qualified}' cleaned, total deleted: {total_deleted}");
            if !dry_run && !run_totals.run.is_empty() {
                tracing::info!(target: "cleaner", "[TOTAL] per-table deletion summary:");
                for (tbl, cnt) in &run_totals.run {
                    tracing::info!(target: "cleaner", table = %tbl, count = cnt, "[TOTAL] {tbl}: {cnt} rows");
                }
            }
            return Ok(());
        }

        if dry_run {
            // Dry-run never opens an explicit transaction (nothing commits),
            // so the statement timeout is set directly on the connection;
            // `SET LOCAL` outside a transaction block is a silent no-op in
            // Postgres, which is exactly why the execute path below sets it
            // only after `BEGIN` instead.
            set_batch_statement_timeout(conn, table.time_out_s).await?;

            tracing::info!(target: "cleaner", table = %qualified, batch = keys.len(), "[DRY-RUN] {qualified}: would delete up to {} rows in this batch", keys.len());
            let mut edge_path = HashSet::new();
            let mut dry_run_totals = DeleteTotals::default();
            let mut archive_buffer = ArchiveBuffer::default();

            cascade_delete(
                conn,
                &qualified,
                &table.key_columns,
                &keys,
                &mut graph,
                &mut discovered_auto,
                &opts,
                &mut edge_path,
                &mut dry_run_totals,
                &mut archive_buffer,
            )
            .await?;

            if !dry_run_totals.batch.is_empty() {
                tracing::info!(target: "cleaner", "[SUMMARY] dry-run totals (per table):");
                for (tbl, cnt) in &dry_run_totals.batch {
                    tracing::info!(target: "cleaner", table = %tbl, count = cnt, "[SUMMARY] (dry-run) {tbl}: {cnt} rows");
                }
            }
            // Dry-run is a preview, not a full sweep: exit after one batch
            // (spec.md §4.7 step 3, an explicit Open Question resolution).
            return Ok(());
        }

        let batch_start = Instant::now();
        let result = run_batch(
            conn,
            &qualified,
            &table.key_columns,
            &keys,
            &mut graph,
            &mut discovered_auto,
            &opts,
            table.archive_path.as_deref(),
            table.time_out_s,
        )
        .await;

        match result {
            Ok(batch_totals) => {
                total_deleted += keys.len() as i64;
                let elapsed = batch_start.elapsed();

                if !batch_totals.batch.is_empty() {
                    tracing::info!(target: "cleaner", "[SUMMARY] per-table deletion in this batch:");
                    for (tbl, cnt) in &batch_totals.batch {
                        tracing::info!(target: "cleaner", table = %tbl, count = cnt, "[SUMMARY] {tbl}: {cnt} rows in this batch");
                        *run_totals.run.entry(tbl.clone()).or_insert(0) += cnt;
                    }
                }

                tracing::info!(
                    target: "cleaner",
                    table = %qualified,
                    batch = keys.len(),
                    total = total_deleted,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "[BATCH] {qualified}: completed batch of {} keys in {:?}. Total deleted parents: {total_deleted}",
                    keys.len(),
                    elapsed,
                );
            }
            Err(err) => {
                // `run_batch`'s `tx` is dropped without a commit on this path,
                // which sqlx rolls back automatically.
                tracing::error!(target: "cleaner", table = %qualified, "[ERROR] rolled back transaction for '{qualified}': {err}");
                return Err(err);
            }
        }

        tokio::time::sleep(INTER_BATCH_SLEEP).await;
    }
}

/// Runs one batch's cascade inside a transaction, commits, and flushes the
/// archive buffer after commit (spec.md §4.7 step 4, §5 "archive-iff-commit").
async fn run_batch(
    conn: &mut PgConnection,
    table: &QualifiedName,
    key_columns: &[String],
    keys: &[crate::model::CellRow],
    graph: &mut crate::model::RelationGraph,
    discovered_auto: &mut HashSet<QualifiedName>,
    opts: &WalkOptions<'_>,
    archive_path: Option<&str>,
    time_out_s: i64,
) -> CleanerResult<DeleteTotals> {
    let mut tx = conn.begin().await?;
    set_batch_statement_timeout(&mut tx, time_out_s).await?;

    let mut edge_path = HashSet::new();
    let mut batch_totals = DeleteTotals::default();
    let mut archive_buffer = ArchiveBuffer::default();

    cascade_delete(
        &mut tx,
        table,
        key_columns,
        keys,
        graph,
        discovered_auto,
        opts,
        &mut edge_path,
        &mut batch_totals,
        &mut archive_buffer,
    )
    .await?;

    tx.commit().await?;

    if opts.archive {
        if let Some(dir) = archive_path {
            let timestamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
            for (tbl, rows) in &archive_buffer.rows {
                if let Err(e) = crate::archiver::archive_to_csv(rows, dir, tbl, &timestamp) {
                    // Archive I/O failure after commit is non-fatal: the
                    // delete already committed (spec.md §7 `ArchiveIoError`).
                    tracing::error!(target: "archiver", table = %tbl, "[ERROR] archive write failed for {tbl}: {e}");
                }
            }
        }
    }

    Ok(batch_totals)
}

/// `SET LOCAL statement_timeout` for the current transaction; falls back to
/// session-level `SET` if issued outside a transaction (spec.md §4.7 step 2).
/// A `time_out_s` of 0 disables the timeout entirely.
async fn set_batch_statement_timeout(conn: &mut PgConnection, time_out_s: i64) -> CleanerResult<()> {
    if time_out_s <= 0 {
        return Ok(());
    }
    let stmt = format!("SET LOCAL statement_timeout = '{time_out_s}s'");
    if sqlx::query(&stmt).execute(&mut *conn).await.is_err() {
        let fallback = format!("SET statement_timeout = '{time_out_s}s'");
        sqlx::query(&fallback).execute(&mut *conn).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cutoff_disabled_returns_none() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        assert_eq!(compute_cutoff(true, 30, now), None);
    }

    #[test]
    fn cutoff_truncates_to_start_of_day() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 15, 30, 0).unwrap();
        let cutoff = compute_cutoff(false, 365, now).unwrap();
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2025, 7, 28, 0, 0, 0).unwrap());
    }
}
