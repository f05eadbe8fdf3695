use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;

use crate::db;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    /// Trimmed string param, `None` when absent or not a string.
    pub fn str_param(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
    }
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    /// Open (or create) the workspace database and make it current.
    /// On failure the previously selected workspace stays active.
    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        let conn = db::open_db(path)?;
        self.workspace = Some(path.to_path_buf());
        self.db = Some(conn);
        info!(workspace = %path.display(), "workspace opened");
        Ok(())
    }
}
