//! Local configuration state: the applied documents and the version they
//! correspond to, persisted as a JSON file so the applied version survives
//! restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::AppConfig;

const STATE_FILE: &str = "state.json";

/// The on-disk shape: kind → tag → document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    pub applied_version: i64,
    #[serde(default)]
    pub documents: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct AgentState {
    pub cfg: AppConfig,
    pub persisted: PersistedState,
}

pub type SharedState = Arc<Mutex<AgentState>>;

fn state_path(state_dir: &str) -> PathBuf {
    Path::new(state_dir).join(STATE_FILE)
}

/// Loads persisted state from the configured directory; a missing file is a
/// fresh agent at version 0.
pub fn load_persisted(state_dir: &str) -> anyhow::Result<PersistedState> {
    let path = state_path(state_dir);
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
        Err(err) => Err(err.into()),
    }
}

/// Writes the state file, creating the directory when missing. The write
/// goes through a temp file and rename so a crash never leaves a torn file.
pub fn save_persisted(state_dir: &str, state: &PersistedState) -> anyhow::Result<()> {
    std::fs::create_dir_all(state_dir)?;
    let path = state_path(state_dir);
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

pub fn new_state(cfg: AppConfig) -> anyhow::Result<SharedState> {
    let persisted = load_persisted(&cfg.state_dir)?;
    Ok(Arc::new(Mutex::new(AgentState { cfg, persisted })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_state_file_is_a_fresh_agent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = load_persisted(dir.path().to_str().expect("utf8 path")).expect("load");
        assert_eq!(state.applied_version, 0);
        assert!(state.documents.is_empty());
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dir_str = dir.path().to_str().expect("utf8 path");

        let mut state = PersistedState {
            applied_version: 7,
            applied_at: Some(Utc::now()),
            ..Default::default()
        };
        state
            .documents
            .entry("inbound".into())
            .or_default()
            .insert("vless-in".into(), json!({"tag": "vless-in", "port": 443}));

        save_persisted(dir_str, &state).expect("save");
        let loaded = load_persisted(dir_str).expect("load");
        assert_eq!(loaded, state);
    }

    #[test]
    fn save_creates_missing_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("deep/nested");
        let nested_str = nested.to_str().expect("utf8 path");

        save_persisted(nested_str, &PersistedState::default()).expect("save");
        assert!(nested.join("state.json").exists());
    }
}
