use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs};
use tracing::{debug, info, warn};

use super::layout::{self, Layout};
use crate::error::{DbError, DbResult};

fn is_false(b: &bool) -> bool {
    !*b
}

/// Definition of a single column within a table.
///
/// The declared type is an opaque lowercase tag (`text`, `int`, `uuid`, ...).
/// It is persisted and reported back but never used to coerce values.
///
/// ## Example
/// ```rust
/// use jsonl_pg::engine::Column;
///
/// let id = Column::new("id", "text").primary_key();
/// assert!(id.primary_key && id.not_null);
/// ```
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub col_type: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub not_null: bool,
    /// Default as text: either a literal value or an id generator call such
    /// as `gen_random_uuid()`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            col_type: col_type.into(),
            primary_key: false,
            unique: false,
            not_null: false,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Schema of one table: its name plus the ordered column list.
///
/// Column order drives `SELECT *` projection and `INSERT` without an explicit
/// column list. The set of column names is the table's write schema.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Fails with `UnknownColumn` for the first field not declared here.
    pub fn check_columns<'a, I>(&self, fields: I) -> DbResult<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for f in fields {
            if !self.has_column(f) {
                return Err(DbError::UnknownColumn {
                    table: self.name.clone(),
                    column: f.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Registry of table schemas.
///
/// Each table is persisted as its own pretty-printed JSON record under
/// `<data>/_schema/`. The in-memory cache is authoritative at runtime and is
/// populated once, when the catalog is opened.
///
/// A single reader/writer lock covers both the cache and the schema directory,
/// so catalog writers are linearised and readers never see a schema file that
/// is only partly written.
pub struct Catalog {
    layout: Layout,
    tables: RwLock<HashMap<String, TableSchema>>,
}

impl Catalog {
    /// Loads every schema record found under `_schema/`.
    ///
    /// A missing directory is an empty catalog. Temp files left behind by an
    /// interrupted write are skipped.
    pub fn open(layout: Layout) -> DbResult<Self> {
        let dir = layout.schema_dir();
        let mut tables = HashMap::new();
        match fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries {
                    let path = entry?.path();
                    if layout::is_temp_path(&path) {
                        warn!(path = %path.display(), "ignoring stray schema temp file");
                        continue;
                    }
                    if path.extension().map_or(true, |e| e != "json") {
                        continue;
                    }
                    let bytes = fs::read(&path)?;
                    let schema: TableSchema =
                        serde_json::from_slice(&bytes).map_err(|e| DbError::Corrupt {
                            path: path.display().to_string(),
                            reason: e.to_string(),
                        })?;
                    tables.insert(schema.name.clone(), schema);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(tables = tables.len(), "catalog loaded");
        Ok(Self {
            layout,
            tables: RwLock::new(tables),
        })
    }

    /// Registers a new table, persisting its schema and provisioning an empty
    /// row file.
    pub fn create_table(&self, schema: TableSchema) -> DbResult<()> {
        layout::validate_table_name(&schema.name)?;
        let mut tables = self.tables.write();
        if tables.contains_key(&schema.name) {
            return Err(DbError::AlreadyExists(schema.name));
        }

        fs::create_dir_all(self.layout.schema_dir())?;
        let record = serde_json::to_vec_pretty(&schema)?;
        layout::write_atomic(&self.layout.schema_path(&schema.name), &record)?;
        layout::write_atomic(&self.layout.rows_path(&schema.name), b"")?;

        info!(table = %schema.name, columns = schema.columns.len(), "created table");
        tables.insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Looks up a table definition in the in-memory cache.
    ///
    /// ## Arguments
    /// * `name` - table name, matched case-sensitively
    ///
    /// ## Returns
    /// * `Ok(schema)` - a copy of the cached definition
    /// * `Err(NotFound)` - no such table
    ///
    /// ## Example
    /// ```rust
    /// use jsonl_pg::engine::{Column, Engine, TableSchema};
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let engine = Engine::open(dir.path()).unwrap();
    /// engine
    ///     .create_table(TableSchema::new("users", vec![Column::new("id", "text").primary_key()]))
    ///     .unwrap();
    /// let schema = engine.catalog().get_table("users").unwrap();
    /// assert!(schema.has_column("id"));
    /// assert!(engine.catalog().get_table("nope").unwrap_err().is_not_found());
    /// ```
    pub fn get_table(&self, name: &str) -> DbResult<TableSchema> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(name.to_string()))
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    /// All table names, in no particular order.
    pub fn list_tables(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Removes a table's schema record and its rows.
    ///
    /// The schema record goes first and the table is evicted from the cache
    /// before the row file is deleted. If that last step fails the error is
    /// returned but the eviction stands.
    pub fn drop_table(&self, name: &str) -> DbResult<()> {
        let mut tables = self.tables.write();
        if !tables.contains_key(name) {
            return Err(DbError::NotFound(name.to_string()));
        }
        layout::remove_if_exists(&self.layout.schema_path(name))?;
        tables.remove(name);
        debug!(table = name, "schema record removed");

        layout::remove_if_exists(&self.layout.rows_path(name))?;
        info!(table = name, "dropped table");
        Ok(())
    }
}
