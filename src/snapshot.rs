use crate::errors::{AppError, AppResult};
use crate::models::Note;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub id: i64,
    pub title: String,
    pub is_dirty: bool,
    pub note: Option<Note>,
    pub content: String,
}

/// Durable form of the session: open tabs with their live buffers, the
/// active tab, and the filter/sidebar bits worth surviving a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSnapshot {
    pub tabs: Vec<TabSnapshot>,
    pub active_tab_id: Option<i64>,
    pub search_query: String,
    pub selected_tag_ids: Vec<i64>,
    pub sidebar_open: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            tabs: Vec::new(),
            active_tab_id: None,
            search_query: String::new(),
            selected_tag_ids: Vec::new(),
            sidebar_open: true,
        }
    }
}

impl SessionSnapshot {
    /// Structural sanitation only: drop tabs without a note snapshot (a
    /// corrupt or pre-migration record), drop duplicate ids, and repoint a
    /// dangling active id at the last remaining tab.
    pub fn sanitized(mut self) -> Self {
        let mut seen = HashSet::new();
        self.tabs
            .retain(|tab| tab.note.is_some() && seen.insert(tab.id));

        let active_still_open = self
            .active_tab_id
            .map(|id| self.tabs.iter().any(|tab| tab.id == id))
            .unwrap_or(false);
        if !active_still_open {
            self.active_tab_id = self.tabs.last().map(|tab| tab.id);
        }

        self
    }

    pub fn load(path: &Path) -> Option<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read session snapshot");
                return None;
            }
        };

        match serde_json::from_str::<Self>(&raw) {
            Ok(snapshot) => Some(snapshot.sanitized()),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "discarding corrupt session snapshot");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json).map_err(|err| AppError::Io(err.to_string()))?;
        fs::rename(&staging, path).map_err(|err| AppError::Io(err.to_string()))?;
        Ok(())
    }
}
