use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::PathBuf, sync::Arc};
use tracing::info;

use crate::error::DbResult;

mod catalog;
mod executor;
pub mod id;
pub mod layout;
mod storage;

pub use catalog::{Catalog, Column, TableSchema};
pub use executor::{execute_select_scan, Predicate};
pub use layout::Layout;
pub use storage::RowStore;

/// Reserved field every row carries.
pub const ID_FIELD: &str = "id";

/// A dynamically typed value stored in a row.
///
/// Serialised untagged, so a row line on disk is a plain JSON object such as
/// `{"id":"p1","price":9.99,"active":true,"note":null}`. SQL writes only
/// produce text and null; the other arms keep files written by other tools
/// readable. Objects and arrays land in [`Value::Json`] and are sent to
/// clients as their compact JSON text.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    Json(serde_json::Value),
}

impl Value {
    /// Text form sent to clients. `None` for null.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Json(v) => Some(v.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        v.map_or(Value::Null, Value::Text)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

/// A row: column name to value. Field order carries no meaning.
pub type Row = BTreeMap<String, Value>;

/// Text form of a row's `id`, if it has a usable one.
pub fn row_id(row: &Row) -> Option<String> {
    row.get(ID_FIELD)
        .and_then(Value::to_text)
        .filter(|s| !s.is_empty())
}

/// Top-level handle over one data directory.
///
/// The engine owns the schema catalog and the row store and is shared between
/// connections behind an `Arc`.
///
/// ```text
/// ┌─────────────┐     ┌─────────────┐
/// │   Catalog   │◄────│  Row Store  │
/// │  _schema/*  │     │  *.jsonl    │
/// └─────────────┘     └─────────────┘
///        ▲                   ▲
///        └───────┬───────────┘
///         ┌──────┴──────┐
///         │   Engine    │
///         └─────────────┘
/// ```
pub struct Engine {
    catalog: Arc<Catalog>,
    rows: RowStore,
}

impl Engine {
    /// Opens (creating if needed) the data directory and loads the catalog.
    pub fn open<P: Into<PathBuf>>(dir: P) -> DbResult<Self> {
        let data_dir: PathBuf = dir.into();
        fs::create_dir_all(&data_dir)?;

        let layout = Layout::new(&data_dir);
        let catalog = Arc::new(Catalog::open(layout.clone())?);
        let rows = RowStore::new(layout, catalog.clone());

        info!(data_dir = %data_dir.display(), "engine opened");
        Ok(Self { catalog, rows })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn rows(&self) -> &RowStore {
        &self.rows
    }

    /// Creates a table: schema record plus an empty row file.
    ///
    /// ## Arguments
    /// * `schema` - table name and its declared columns
    ///
    /// ## Returns
    /// * `Ok(())` - both files are in place and the table is visible
    /// * `Err(AlreadyExists)` / `Err(InvalidName)` - nothing was written
    ///
    /// Runs under the row store's write lock so no row write can race with
    /// the row file being provisioned.
    pub fn create_table(&self, schema: TableSchema) -> DbResult<()> {
        self.rows.exclusive(|| self.catalog.create_table(schema))
    }

    /// Drops a table and its rows under the row store's write lock. An
    /// insert that validated against the old schema fails with `NotFound`
    /// instead of recreating the row file.
    pub fn drop_table(&self, name: &str) -> DbResult<()> {
        self.rows.exclusive(|| self.catalog.drop_table(name))
    }
}
