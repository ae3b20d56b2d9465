use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::error::{DbError, DbResult};

/// Directory (under the data dir) holding one schema record per table.
pub const SCHEMA_DIR: &str = "_schema";

const TMP_SUFFIX: &str = "tmp";

/// On-disk path scheme for a data directory.
///
/// ```text
/// <data>/_schema/<table>.json   pretty-printed table definition
/// <data>/<table>.jsonl          one compact JSON object per row
/// ```
#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// `<data>/_schema`
    pub fn schema_dir(&self) -> PathBuf {
        self.root.join(SCHEMA_DIR)
    }

    /// `<data>/_schema/<table>.json`
    pub fn schema_path(&self, table: &str) -> PathBuf {
        self.schema_dir().join(format!("{table}.json"))
    }

    /// `<data>/<table>.jsonl`. Table names are validated before they reach
    /// here, so the result never escapes the data directory.
    pub fn rows_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.jsonl"))
    }
}

/// Sibling path a new version of `path` is staged at before the rename.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

pub fn is_temp_path(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == TMP_SUFFIX)
}

/// Replaces `path` with `contents` so that readers see either the old file or
/// the new one, never a mix.
///
/// The data is written to a sibling temp file, flushed and synced, then moved
/// over the live path with a single rename. A crash before the rename leaves
/// the live file untouched; the stray temp file is overwritten next time.
pub fn write_atomic(path: &Path, contents: &[u8]) -> DbResult<()> {
    let tmp = temp_path(path);
    {
        let file = File::create(&tmp)?;
        let mut w = BufWriter::new(file);
        w.write_all(contents)?;
        w.flush()?;
        w.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Removes `path`, treating an already missing file as success.
pub fn remove_if_exists(path: &Path) -> DbResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Table names double as file names, so they must not escape the data
/// directory or collide with the reserved schema directory.
pub fn validate_table_name(name: &str) -> DbResult<()> {
    let bad = name.is_empty()
        || name.starts_with('_')
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.contains("..");
    if bad {
        return Err(DbError::InvalidName(name.to_string()));
    }
    Ok(())
}
