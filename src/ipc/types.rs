use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::cache::ReportCache;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Role of the user the host is acting for. Absent means admin.
    #[serde(default)]
    pub role: Option<String>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub cache: ReportCache,
}

impl AppState {
    pub fn new(cache: ReportCache) -> Self {
        Self {
            workspace: None,
            db: None,
            cache,
        }
    }
}
