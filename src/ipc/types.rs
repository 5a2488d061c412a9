use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::editor::EditReconciler;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Credential-bearing request context. Set once via `auth.setContext` and
/// passed explicitly to everything that writes; there is no ambient token.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    pub token: String,
    pub user_id: String,
    pub role: String,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub ctx: Option<RequestCtx>,
    /// Open attendance edits, one state machine per session id.
    pub edits: HashMap<String, EditReconciler>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            workspace: None,
            db: None,
            ctx: None,
            edits: HashMap::new(),
        }
    }
}
