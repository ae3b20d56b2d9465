use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:5432";

/// Process-level settings: where data lives and where to listen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Data directory holding `_schema/` and the `<table>.jsonl` files.
    pub data_dir: PathBuf,
    /// TCP address for the wire protocol listener.
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: matches
                .get_one::<String>("data")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            listen: matches
                .get_one::<String>("listen")
                .cloned()
                .unwrap_or(defaults.listen),
        }
    }
}

/// Command-line definition.
///
/// - `--data DIR`: required data directory (created if missing)
/// - `--listen ADDR`: listen address, default `127.0.0.1:5432`
pub fn cli() -> Command {
    Command::new("jsonl_pg")
        .about("JSON-lines table store speaking the PostgreSQL wire protocol")
        .arg(
            Arg::new("data")
                .long("data")
                .value_name("DIR")
                .required(true)
                .help("Data directory for table schemas and row files"),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .default_value(DEFAULT_LISTEN)
                .help("Listen address for PostgreSQL clients"),
        )
}
