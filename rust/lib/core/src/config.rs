use std::path::PathBuf;

/// Storage configuration shared by the daemon and its offline commands.
///
/// The binary fills this from its config file and command-line flags, then
/// passes it to storage initialization.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Directory holding the database and any other runtime state.
    pub data_dir: Option<PathBuf>,

    /// Path to the SQLite database file.
    /// Defaults to `{data_dir}/reftrack.sqlite` if not specified.
    pub sqlite_path: Option<PathBuf>,
}

impl ServiceConfig {
    /// Resolve the SQLite database path, falling back to `{data_dir}/reftrack.sqlite`.
    pub fn resolve_sqlite_path(&self) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| self.resolve_data_subpath("reftrack.sqlite"))
    }

    fn resolve_data_subpath(&self, name: &str) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(|d| d.join(name))
            .unwrap_or_else(|| PathBuf::from(name))
    }
}
