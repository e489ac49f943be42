// src/archiver.rs
// Archiver (spec.md §4.6): snapshots rows slated for deletion during a
// batch's transaction, and flushes them to timestamped CSV only after that
// transaction commits. Ported from `examples/original_source/db_cleaner/archive.py`.

use std::path::Path;

use sqlx::PgConnection;

use crate::error::CleanerResult;
use crate::model::{CellRow, QualifiedName};
use crate::walker::select_by_keys;

/// `SELECT *` equivalent: snapshots every column of the rows matching
/// `key_columns`/`keys`, in catalog (`attnum`) order, for CSV archival.
pub async fn select_rows_for_archive(
    conn: &mut PgConnection,
    table: &QualifiedName,
    key_columns: &[String],
    keys: &[CellRow],
) -> CleanerResult<Vec<CellRow>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let all = crate::catalog::all_columns(conn, table).await?;
    let select_columns: Vec<String> = all.iter().map(|c| c.column.clone()).collect();
    select_by_keys(conn, table, &select_columns, key_columns, keys, &[]).await
}

/// Writes `rows` to `<dir>/<schema>_<table>_<YYYYMMDDhhmmss>.CSV`, RFC-4180
/// quoted, no header row. Creates `dir` if absent. A no-op when `rows` is
/// empty — a subsequent batch gets its own file.
pub fn archive_to_csv(rows: &[CellRow], dir: &str, table: &QualifiedName, timestamp: &str) -> CleanerResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;

    let filename = format!("{}_{}_{}.CSV", table.schema, table.name, timestamp);
    let path = Path::new(dir).join(filename);

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(&path)?;
    for row in rows {
        let fields: Vec<String> = row.iter().map(|cell| cell.to_csv_field()).collect();
        writer.write_record(&fields)?;
    }
    writer.flush()?;

    tracing::info!(
        target: "archiver",
        table = %table,
        count = rows.len(),
        path = %path.display(),
        "[ARCHIVE] {table}: archived {} rows to {}",
        rows.len(),
        path.display(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CellValue;

    #[test]
    fn archive_to_csv_is_noop_on_empty_rows() {
        let dir = tempfile::tempdir().unwrap();
        let table = QualifiedName::parse("public.events");
        archive_to_csv(&[], dir.path().to_str().unwrap(), &table, "20260101000000").unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn archive_to_csv_writes_one_file_with_no_header() {
        let dir = tempfile::tempdir().unwrap();
        let table = QualifiedName::parse("public.events");
        let rows = vec![
            vec![CellValue::Uuid(uuid::Uuid::nil()), CellValue::Text("a".into())],
            vec![CellValue::Uuid(uuid::Uuid::nil()), CellValue::Text("b".into())],
        ];
        archive_to_csv(&rows, dir.path().to_str().unwrap(), &table, "20260101000000").unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].as_ref().unwrap().file_name().into_string().unwrap();
        assert_eq!(name, "public_events_20260101000000.CSV");

        let contents = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), format!("{},a", uuid::Uuid::nil()));
        assert_eq!(lines.next().unwrap(), format!("{},b", uuid::Uuid::nil()));
        assert!(lines.next().is_none());
    }
}
