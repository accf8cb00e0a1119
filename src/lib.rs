pub mod db;
pub mod errors;
pub mod markdown;
pub mod models;
pub mod notify;
pub mod repository;
pub mod session;
pub mod settings;
pub mod snapshot;

pub use crate::db::SqliteNoteRepository;
pub use crate::errors::{AppError, AppResult};
pub use crate::markdown::{note_to_markdown, parse_front_matter, ParsedMarkdown};
pub use crate::models::{
    CreateNotePayload, ListNotesFilters, Note, NoteTab, NotesPage, Tag, UpdateNotePayload,
};
pub use crate::notify::{
    ChannelConfirmer, ChannelNotifier, ConfirmRequest, Confirmer, Notification, Notifier, Severity,
};
pub use crate::repository::{MemoryNoteRepository, NoteRepository};
pub use crate::session::{SessionState, SessionStore};
pub use crate::settings::{Locale, Settings, ThemeMode};
pub use crate::snapshot::SessionSnapshot;

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// On-disk layout for one data directory: database, session snapshot,
/// settings, logs, and the default export target.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
    pub db_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub settings_path: PathBuf,
    pub log_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl DataPaths {
    pub fn new(root: PathBuf) -> Self {
        Self {
            db_path: root.join("notes.db"),
            snapshot_path: root.join("session.json"),
            settings_path: root.join("settings.json"),
            log_dir: root.join("logs"),
            export_dir: root.join("exports"),
            root,
        }
    }

    pub fn default_dir() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notedesk");
        Self::new(root)
    }
}

pub fn init_tracing(log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir).context("create log directory")?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "notedesk.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| anyhow::anyhow!(error))
        .context("install tracing subscriber")
}
