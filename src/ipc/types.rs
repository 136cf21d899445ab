use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::engine::search::RunOutcome;
use crate::engine::{SectionMap, Strategy};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The run the UI is currently looking at: final section map plus the
/// assembled result, kept so manual overrides and export work without
/// re-running the engine.
pub struct RunState {
    pub id: String,
    pub created_at: String,
    pub strategy: Strategy,
    pub sections: SectionMap,
    pub outcome: RunOutcome,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub run: Option<RunState>,
}
