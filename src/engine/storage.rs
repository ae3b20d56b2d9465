use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    sync::Arc,
};
use tracing::debug;

use super::{
    catalog::{Catalog, TableSchema},
    id::generate_id,
    layout::{self, Layout},
    row_id, Row, Value, ID_FIELD,
};
use crate::error::{DbError, DbResult};

/// Durable row storage, one newline-delimited JSON file per table.
///
/// ## File Structure
/// ```text
/// products.jsonl:
/// {"id":"p1","name":"Widget","price":"9.99"}
/// {"id":"p2","name":"Gadget","price":"19.99"}
/// ```
///
/// Every mutation loads the full row set, edits it in memory and replaces the
/// file with [`layout::write_atomic`]. There is no in-place update, so a
/// crash at any point leaves either the old or the new file.
///
/// ## Concurrency
/// One reader/writer lock covers every table. Scans run in parallel, while
/// any write excludes all other reads and writes, including those on other
/// tables.
pub struct RowStore {
    layout: Layout,
    catalog: Arc<Catalog>,
    lock: RwLock<()>,
}

impl RowStore {
    pub fn new(layout: Layout, catalog: Arc<Catalog>) -> Self {
        Self {
            layout,
            catalog,
            lock: RwLock::new(()),
        }
    }

    /// Inserts a row and returns its id.
    ///
    /// A missing, null or empty `id` is replaced by a fresh time-ordered id.
    /// Fails with `UnknownColumn` for undeclared fields, `NotNullViolation`
    /// for missing required columns and `DuplicateKey` if the id is taken.
    pub fn insert(&self, table: &str, mut row: Row) -> DbResult<String> {
        let schema = self.catalog.get_table(table)?;
        schema.check_columns(row.keys().filter(|k| k.as_str() != ID_FIELD))?;

        let id = match row_id(&row) {
            Some(id) => id,
            None => {
                let id = generate_id();
                row.insert(ID_FIELD.to_string(), Value::Text(id.clone()));
                id
            }
        };
        check_not_null(&schema, &row)?;

        let _guard = self.lock.write();
        // the table may have been dropped while the row was being checked
        self.ensure_table(table)?;
        let path = self.layout.rows_path(table);
        let mut rows = read_rows(&path)?;
        if rows.iter().any(|r| row_id(r).as_deref() == Some(id.as_str())) {
            return Err(DbError::DuplicateKey {
                table: table.to_string(),
                id,
            });
        }
        rows.push(row);
        write_rows(&path, &rows)?;
        debug!(table, %id, rows = rows.len(), "inserted row");
        Ok(id)
    }

    /// Row with the given id.
    ///
    /// ## Returns
    /// * `Ok(row)` - the stored row, including its `id`
    /// * `Err(NotFound)` - no such table
    /// * `Err(RowNotFound)` - the table has no row with that id
    pub fn get(&self, table: &str, id: &str) -> DbResult<Row> {
        let _guard = self.lock.read();
        self.ensure_table(table)?;
        read_rows(&self.layout.rows_path(table))?
            .into_iter()
            .find(|r| row_id(r).as_deref() == Some(id))
            .ok_or_else(|| row_not_found(table, id))
    }

    /// Merges `fields` over the row with the given id.
    ///
    /// The `id` field itself cannot be changed.
    pub fn update(&self, table: &str, id: &str, fields: BTreeMap<String, Value>) -> DbResult<()> {
        let schema = self.catalog.get_table(table)?;
        if fields.contains_key(ID_FIELD) {
            return Err(DbError::ImmutableColumn {
                table: table.to_string(),
                column: ID_FIELD.to_string(),
            });
        }
        schema.check_columns(fields.keys())?;

        let _guard = self.lock.write();
        self.ensure_table(table)?;
        let path = self.layout.rows_path(table);
        let mut rows = read_rows(&path)?;
        let row = rows
            .iter_mut()
            .find(|r| row_id(r).as_deref() == Some(id))
            .ok_or_else(|| row_not_found(table, id))?;
        row.extend(fields);
        write_rows(&path, &rows)?;
        debug!(table, id, "updated row");
        Ok(())
    }

    /// Removes the row with the given id, rewriting the table file once.
    pub fn delete(&self, table: &str, id: &str) -> DbResult<()> {
        let _guard = self.lock.write();
        self.ensure_table(table)?;
        let path = self.layout.rows_path(table);
        let mut rows = read_rows(&path)?;
        let pos = rows
            .iter()
            .position(|r| row_id(r).as_deref() == Some(id))
            .ok_or_else(|| row_not_found(table, id))?;
        rows.remove(pos);
        write_rows(&path, &rows)?;
        debug!(table, id, rows = rows.len(), "deleted row");
        Ok(())
    }

    /// Every row of `table` in file order. A table without a row file is
    /// empty, not an error.
    pub fn scan(&self, table: &str) -> DbResult<Vec<Row>> {
        let _guard = self.lock.read();
        self.ensure_table(table)?;
        read_rows(&self.layout.rows_path(table))
    }

    pub fn count(&self, table: &str) -> DbResult<usize> {
        Ok(self.scan(table)?.len())
    }

    /// Runs a catalog change while holding the store's write lock, so a
    /// table's row file is never created or removed under a concurrent row
    /// write.
    pub(crate) fn exclusive<T>(&self, f: impl FnOnce() -> DbResult<T>) -> DbResult<T> {
        let _guard = self.lock.write();
        f()
    }

    fn ensure_table(&self, table: &str) -> DbResult<()> {
        if self.catalog.table_exists(table) {
            Ok(())
        } else {
            Err(DbError::NotFound(table.to_string()))
        }
    }
}

fn row_not_found(table: &str, id: &str) -> DbError {
    DbError::RowNotFound {
        table: table.to_string(),
        id: id.to_string(),
    }
}

fn check_not_null(schema: &TableSchema, row: &Row) -> DbResult<()> {
    for col in schema.columns.iter().filter(|c| c.not_null && c.name != ID_FIELD) {
        if row.get(&col.name).map_or(true, Value::is_null) {
            return Err(DbError::NotNullViolation {
                table: schema.name.clone(),
                column: col.name.clone(),
            });
        }
    }
    Ok(())
}

/// Reads one row per line, skipping blank lines.
fn read_rows(path: &Path) -> DbResult<Vec<Row>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut rows = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: Row = serde_json::from_str(&line).map_err(|e| DbError::Corrupt {
            path: format!("{}:{}", path.display(), lineno + 1),
            reason: e.to_string(),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

fn write_rows(path: &Path, rows: &[Row]) -> DbResult<()> {
    let mut buf = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut buf, row)?;
        buf.push(b'\n');
    }
    layout::write_atomic(path, &buf)
}
