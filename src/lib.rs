//! # jsonl_pg - a JSON-lines table store behind the PostgreSQL wire protocol
//!
//! Unmodified PostgreSQL clients connect over TCP, send SQL with the simple
//! query protocol, and read or write tables that live on disk as plain JSON.
//!
//! ## Architecture Overview
//!
//! 1. **Server Layer** (`server` module): startup handshake, simple-query
//!    loop and message encoding
//! 2. **SQL Layer** (`sql` module): parses statements with `sqlparser` and
//!    maps them onto catalog and row store calls
//! 3. **Engine Layer** (`engine` module): schema catalog, row store,
//!    identifier generation and the atomic file-replace primitive
//!
//! ## On-disk Layout
//!
//! ```text
//! <data>/_schema/<table>.json   one pretty-printed schema record per table
//! <data>/<table>.jsonl          one JSON object per row
//! ```
//!
//! Every write replaces a whole file through write-temp-then-rename; there is
//! no write-ahead log.
//!
//! ## Usage Example
//!
//! ```bash
//! cargo run -- --data ./dbdata --listen 127.0.0.1:5432
//! psql -h 127.0.0.1 -p 5432 -c "CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT)"
//! psql -h 127.0.0.1 -p 5432 -c "INSERT INTO users (id, name) VALUES ('u1', 'Alice')"
//! psql -h 127.0.0.1 -p 5432 -c "SELECT * FROM users"
//! ```

/// Command-line and listener configuration
pub mod config;

/// Schema catalog, row store and on-disk layout
pub mod engine;

/// Crate error type
pub mod error;

/// PostgreSQL wire protocol server
pub mod server;

/// SQL parsing and execution
pub mod sql;

pub use error::{DbError, DbResult};
