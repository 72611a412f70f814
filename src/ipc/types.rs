use std::path::PathBuf;

use crate::finalize::SessionLocks;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub locks: SessionLocks,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            locks: SessionLocks::new(),
        }
    }
}
