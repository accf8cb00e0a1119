use crate::errors::AppResult;
use crate::markdown;
use crate::models::{
    CreateNotePayload, ListNotesFilters, Note, NoteTab, Tag, UpdateNotePayload, DEFAULT_PAGE_LIMIT,
};
use crate::notify::{ConfirmRequest, Confirmer, Notifier};
use crate::repository::NoteRepository;
use crate::snapshot::{SessionSnapshot, TabSnapshot};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_NOTE_TITLE: &str = "New Note";
const DEFAULT_IMPORT_TITLE: &str = "Imported note";

/// UI-facing session state. The store hands out clones; all mutation goes
/// through store operations.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub tabs: Vec<NoteTab>,
    pub active_tab_id: Option<i64>,
    pub notes: Vec<Note>,
    pub total: u64,
    pub tags: Vec<Tag>,
    pub search_query: String,
    pub selected_tag_ids: Vec<i64>,
    pub limit: u32,
    pub offset: u32,
    pub sidebar_open: bool,
    pub is_loading_notes: bool,
    pub is_loading_tags: bool,
    pub is_loading_note: bool,
    pub is_saving: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            tabs: Vec::new(),
            active_tab_id: None,
            notes: Vec::new(),
            total: 0,
            tags: Vec::new(),
            search_query: String::new(),
            selected_tag_ids: Vec::new(),
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
            sidebar_open: true,
            is_loading_notes: false,
            is_loading_tags: false,
            is_loading_note: false,
            is_saving: false,
        }
    }
}

impl SessionState {
    pub fn active_tab(&self) -> Option<&NoteTab> {
        self.active_tab_id.and_then(|id| self.tab(id))
    }

    /// Last server-acknowledged snapshot of the note shown in the editor.
    pub fn current_note(&self) -> Option<&Note> {
        self.active_tab().and_then(|tab| tab.note.as_ref())
    }

    /// Live edit buffer of the active tab.
    pub fn current_content(&self) -> Option<&str> {
        self.active_tab().map(|tab| tab.content.as_str())
    }

    fn tab(&self, id: i64) -> Option<&NoteTab> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    fn tab_mut(&mut self, id: i64) -> Option<&mut NoteTab> {
        self.tabs.iter_mut().find(|tab| tab.id == id)
    }

    fn activate(&mut self, id: i64) {
        for tab in &mut self.tabs {
            tab.is_active = tab.id == id;
        }
        self.active_tab_id = Some(id);
    }

    /// Removes a tab; when the active one goes, the most-recently-opened
    /// remaining tab takes over.
    fn remove_tab(&mut self, id: i64) {
        let was_active = self.active_tab_id == Some(id);
        self.tabs.retain(|tab| tab.id != id);

        if was_active {
            match self.tabs.last().map(|tab| tab.id) {
                Some(next) => self.activate(next),
                None => self.active_tab_id = None,
            }
        }
    }

    fn filters(&self) -> ListNotesFilters {
        ListNotesFilters {
            search: Some(self.search_query.clone()).filter(|query| !query.is_empty()),
            tag_ids: Some(self.selected_tag_ids.clone()).filter(|ids| !ids.is_empty()),
            limit: self.limit,
            offset: self.offset,
        }
    }

    fn to_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            tabs: self
                .tabs
                .iter()
                .map(|tab| TabSnapshot {
                    id: tab.id,
                    title: tab.title.clone(),
                    is_dirty: tab.is_dirty,
                    note: tab.note.clone(),
                    content: tab.content.clone(),
                })
                .collect(),
            active_tab_id: self.active_tab_id,
            search_query: self.search_query.clone(),
            selected_tag_ids: self.selected_tag_ids.clone(),
            sidebar_open: self.sidebar_open,
        }
    }

    fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let active_tab_id = snapshot.active_tab_id;
        let tabs = snapshot
            .tabs
            .into_iter()
            .map(|tab| {
                let mut tab = NoteTab {
                    id: tab.id,
                    title: tab.title,
                    is_dirty: tab.is_dirty,
                    is_active: active_tab_id == Some(tab.id),
                    note: tab.note,
                    content: tab.content,
                };
                tab.recompute_dirty();
                tab
            })
            .collect();

        Self {
            tabs,
            active_tab_id,
            search_query: snapshot.search_query,
            selected_tag_ids: snapshot.selected_tag_ids,
            sidebar_open: snapshot.sidebar_open,
            ..Default::default()
        }
    }
}

/// The tab session store: single source of truth for which notes are open,
/// which is active, and what has unsaved edits. All repository access goes
/// through here; completions are applied by the tab id captured when the
/// call was issued, never by re-reading the active tab.
pub struct SessionStore {
    repo: Arc<dyn NoteRepository>,
    notifier: Arc<dyn Notifier>,
    confirmer: Arc<dyn Confirmer>,
    snapshot_path: Option<PathBuf>,
    state: Mutex<SessionState>,
}

impl SessionStore {
    pub fn new(
        repo: Arc<dyn NoteRepository>,
        notifier: Arc<dyn Notifier>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        Self {
            repo,
            notifier,
            confirmer,
            snapshot_path: None,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Rehydrates from the snapshot at `path` (structural sanitation only)
    /// and persists back to it after every mutation. Call [`reconcile`]
    /// afterwards for the best-effort live refresh.
    ///
    /// [`reconcile`]: SessionStore::reconcile
    pub fn with_snapshot(
        repo: Arc<dyn NoteRepository>,
        notifier: Arc<dyn Notifier>,
        confirmer: Arc<dyn Confirmer>,
        path: PathBuf,
    ) -> Self {
        let snapshot = SessionSnapshot::load(&path).unwrap_or_default();
        Self {
            repo,
            notifier,
            confirmer,
            snapshot_path: Some(path),
            state: Mutex::new(SessionState::from_snapshot(snapshot)),
        }
    }

    /// Full state clone for rendering.
    pub fn view(&self) -> SessionState {
        self.state().clone()
    }

    // The state mutex is never held across an await; contention is
    // impossible to poison short of a panicking reader, so recover the
    // inner value instead of propagating.
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &SessionState) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        if let Err(err) = state.to_snapshot().save(path) {
            tracing::warn!(error = %err, "failed to persist session snapshot");
        }
    }

    /// Best-effort refresh after rehydration: notes list, tags, and the
    /// active tab's note. Restored local content wins over the server copy;
    /// dirtiness is re-derived from the fresh snapshot. Never fails — a dead
    /// repository at startup must not prevent rendering the restored state.
    pub async fn reconcile(&self) {
        self.load_notes().await;
        self.load_tags().await;

        let active_id = self.state().active_tab_id;
        let Some(note_id) = active_id else {
            return;
        };

        match self.repo.get_by_id(note_id).await {
            Ok(note) => {
                let mut state = self.state();
                if let Some(tab) = state.tab_mut(note_id) {
                    tab.title = note.title.clone();
                    tab.note = Some(note);
                    tab.recompute_dirty();
                }
                self.persist(&state);
            }
            Err(err) => {
                tracing::warn!(note_id, error = %err, "skipping active tab refresh after restore");
            }
        }
    }

    /// Opens a note in a tab. An already-open tab is activated as-is: its
    /// cached note and live buffer are authoritative, so no refetch is
    /// issued. Otherwise the note is fetched and appended as a clean tab.
    pub async fn open_note_in_tab(&self, note_id: i64) {
        {
            let mut state = self.state();
            if state.tab(note_id).is_some() {
                state.activate(note_id);
                self.persist(&state);
                return;
            }
            state.is_loading_note = true;
        }

        match self.repo.get_by_id(note_id).await {
            Ok(note) => {
                let mut state = self.state();
                state.is_loading_note = false;
                if state.tab(note_id).is_none() {
                    state.tabs.push(NoteTab::from_note(note));
                }
                state.activate(note_id);
                self.persist(&state);
            }
            Err(err) => {
                self.state().is_loading_note = false;
                tracing::warn!(note_id, error = %err, "open note failed");
                self.notifier.error("Failed to load note");
            }
        }
    }

    /// Updates the active tab's live buffer. Pure local mutation, safe on
    /// every keystroke; debouncing belongs to the UI.
    pub fn set_current_note_content(&self, content: &str) {
        let mut state = self.state();
        let Some(active_id) = state.active_tab_id else {
            return;
        };
        if let Some(tab) = state.tab_mut(active_id) {
            tab.content = content.to_string();
            tab.recompute_dirty();
            self.persist(&state);
        }
    }

    /// Switches the active tab. Never refetches and never autosaves: the
    /// outgoing tab keeps its live buffer, the incoming tab republishes its
    /// cached note and buffer.
    pub fn set_active_tab(&self, tab_id: i64) {
        let mut state = self.state();
        if state.active_tab_id == Some(tab_id) || state.tab(tab_id).is_none() {
            return;
        }
        state.activate(tab_id);
        self.persist(&state);
    }

    /// Saves the active tab's buffer. The target tab id and buffer are
    /// captured before the repository call; the completion is applied to
    /// that tab, or dropped if it was closed in the meantime.
    pub async fn save_current_note(&self) {
        let (tab_id, content) = {
            let mut state = self.state();
            let Some(tab) = state.active_tab() else {
                return;
            };
            let captured = (tab.id, tab.content.clone());
            state.is_saving = true;
            captured
        };

        let payload = UpdateNotePayload {
            content: Some(content),
            ..Default::default()
        };
        match self.repo.update(tab_id, payload).await {
            Ok(note) => {
                {
                    let mut state = self.state();
                    state.is_saving = false;
                    if let Some(tab) = state.tab_mut(tab_id) {
                        tab.title = note.title.clone();
                        tab.content = note.content.clone();
                        tab.note = Some(note);
                        tab.is_dirty = false;
                    }
                    self.persist(&state);
                }
                self.notifier.success("Note saved");
                self.load_notes().await;
            }
            Err(err) => {
                self.state().is_saving = false;
                tracing::warn!(note_id = tab_id, error = %err, "save failed");
                self.notifier.error("Failed to save note");
            }
        }
    }

    /// Closes a tab. A dirty tab asks for confirmation first; the tab is
    /// looked up again once the dialog resolves, so a tab that vanished
    /// while the prompt was open is a no-op.
    pub async fn close_tab(&self, tab_id: i64) {
        let needs_confirmation = {
            let state = self.state();
            match state.tab(tab_id) {
                Some(tab) => tab.is_dirty,
                None => return,
            }
        };

        if needs_confirmation {
            let request = ConfirmRequest::new(
                "Unsaved changes",
                "This tab has unsaved changes. Close it anyway?",
                "Close",
                "Keep editing",
            );
            if !self.confirmer.request(request).await {
                return;
            }
        }

        let mut state = self.state();
        state.remove_tab(tab_id);
        self.persist(&state);
    }

    /// Creates a note with the default title and opens it in a tab.
    pub async fn create_new_note(&self) {
        let payload = CreateNotePayload {
            title: DEFAULT_NOTE_TITLE.to_string(),
            content: String::new(),
            tag_names: Vec::new(),
        };
        match self.repo.create(payload).await {
            Ok(note) => {
                self.load_notes().await;
                self.open_note_in_tab(note.id).await;
                self.notifier.success("Note created");
            }
            Err(err) => {
                tracing::warn!(error = %err, "create note failed");
                self.notifier.error("Failed to create note");
            }
        }
    }

    /// Creates a note from already-parsed fields and opens it. Used by the
    /// file-import flow after the codec has run.
    pub async fn import_note(&self, title: &str, content: &str, tag_names: Vec<String>) {
        let payload = CreateNotePayload {
            title: title.to_string(),
            content: content.to_string(),
            tag_names,
        };
        match self.repo.create(payload).await {
            Ok(note) => {
                self.load_notes().await;
                self.load_tags().await;
                self.open_note_in_tab(note.id).await;
                self.notifier.success("Note imported");
            }
            Err(err) => {
                tracing::warn!(error = %err, "import note failed");
                self.notifier.error("Failed to import note");
            }
        }
    }

    /// Imports a markdown file. Non-markdown extensions are rejected before
    /// any parse attempt. Documents without usable front matter become a new
    /// note titled after the file name.
    pub async fn import_note_from_file(&self, path: &Path) {
        if !markdown::is_markdown_file(path) {
            self.notifier.warning("Only markdown files can be imported");
            return;
        }

        let raw = match markdown::read_markdown_file(path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "import read failed");
                self.notifier.error("Failed to read file");
                return;
            }
        };

        let parsed = markdown::parse_front_matter(&raw);
        let tags = parsed.tags.unwrap_or_default();
        match parsed.title.filter(|_| parsed.is_valid) {
            Some(title) => self.import_note(&title, &parsed.content, tags).await,
            None => {
                let title = fallback_title(path);
                self.import_note(&title, &parsed.content, Vec::new()).await;
            }
        }
    }

    /// Writes the active tab to `dir` as markdown with front matter. The
    /// live buffer is exported, so unsaved edits are included.
    pub fn export_current_note(&self, dir: &Path) -> Option<PathBuf> {
        let (title, tags, content) = {
            let state = self.state();
            let tab = state.active_tab()?;
            let note = tab.note.as_ref()?;
            (note.title.clone(), note.tag_names(), tab.content.clone())
        };

        let written = markdown::note_to_markdown(&title, &tags, &content)
            .and_then(|document| markdown::write_export_file(dir, &title, &document));
        match written {
            Ok(path) => {
                self.notifier.success("Note exported");
                Some(path)
            }
            Err(err) => {
                tracing::warn!(error = %err, "export failed");
                self.notifier.error("Failed to export note");
                None
            }
        }
    }

    /// Deletes the note behind the active tab and closes the tab without
    /// the dirty gate. The only operation that re-raises after notifying,
    /// so a caller-side flow can run its own failure branch.
    pub async fn delete_current_note(&self) -> AppResult<()> {
        let Some(tab_id) = self.state().active_tab_id else {
            return Ok(());
        };

        match self.repo.delete(tab_id).await {
            Ok(()) => {
                {
                    let mut state = self.state();
                    state.remove_tab(tab_id);
                    self.persist(&state);
                }
                self.load_notes().await;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(note_id = tab_id, error = %err, "delete failed");
                self.notifier.error("Failed to delete note");
                Err(err)
            }
        }
    }

    /// Renames the note behind the active tab. The live buffer is left
    /// untouched; only the note snapshot and cached title refresh.
    pub async fn rename_current_note(&self, title: &str) {
        let Some(tab_id) = ({
            let state = self.state();
            state
                .active_tab()
                .filter(|tab| {
                    tab.note
                        .as_ref()
                        .map(|note| note.title != title.trim())
                        .unwrap_or(false)
                })
                .map(|tab| tab.id)
        }) else {
            return;
        };

        let payload = UpdateNotePayload {
            title: Some(title.to_string()),
            ..Default::default()
        };
        match self.repo.update(tab_id, payload).await {
            Ok(note) => {
                {
                    let mut state = self.state();
                    if let Some(tab) = state.tab_mut(tab_id) {
                        tab.title = note.title.clone();
                        tab.note = Some(note);
                        tab.recompute_dirty();
                    }
                    self.persist(&state);
                }
                self.load_notes().await;
            }
            Err(err) => {
                tracing::warn!(note_id = tab_id, error = %err, "rename failed");
                self.notifier.error("Failed to rename note");
            }
        }
    }

    /// Adds a tag to the active tab's note (full tag-set replacement on the
    /// wire). The live buffer is untouched.
    pub async fn add_tag_to_current(&self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }

        let Some((tab_id, mut tag_names)) = self.current_tag_names() else {
            return;
        };
        if tag_names.iter().any(|existing| existing == name) {
            return;
        }
        tag_names.push(name.to_string());

        if self
            .update_current_tags(tab_id, tag_names, "Failed to add tag")
            .await
        {
            self.notifier.success("Tag added");
        }
    }

    /// Removes a tag from the active tab's note.
    pub async fn remove_tag_from_current(&self, name: &str) {
        let Some((tab_id, mut tag_names)) = self.current_tag_names() else {
            return;
        };
        let before = tag_names.len();
        tag_names.retain(|existing| existing != name);
        if tag_names.len() == before {
            return;
        }

        self.update_current_tags(tab_id, tag_names, "Failed to remove tag")
            .await;
    }

    fn current_tag_names(&self) -> Option<(i64, Vec<String>)> {
        let state = self.state();
        let tab = state.active_tab()?;
        let note = tab.note.as_ref()?;
        Some((tab.id, note.tag_names()))
    }

    async fn update_current_tags(
        &self,
        tab_id: i64,
        tag_names: Vec<String>,
        failure_message: &str,
    ) -> bool {
        let payload = UpdateNotePayload {
            tag_names: Some(tag_names),
            ..Default::default()
        };
        match self.repo.update(tab_id, payload).await {
            Ok(note) => {
                {
                    let mut state = self.state();
                    if let Some(tab) = state.tab_mut(tab_id) {
                        tab.title = note.title.clone();
                        tab.note = Some(note);
                        tab.recompute_dirty();
                    }
                    self.persist(&state);
                }
                self.load_notes().await;
                self.load_tags().await;
                true
            }
            Err(err) => {
                tracing::warn!(note_id = tab_id, error = %err, "tag update failed");
                self.notifier.error(failure_message);
                false
            }
        }
    }

    /// Loads the current filter window. Offset zero replaces the cached
    /// list; a nonzero offset appends to it, preserving earlier pages.
    pub async fn load_notes(&self) {
        let filters = {
            let mut state = self.state();
            state.is_loading_notes = true;
            state.filters()
        };
        let offset = filters.offset;

        match self.repo.list(filters).await {
            Ok(page) => {
                let mut state = self.state();
                state.is_loading_notes = false;
                if offset == 0 {
                    state.notes = page.notes;
                } else {
                    state.notes.extend(page.notes);
                }
                state.total = page.total;
            }
            Err(err) => {
                self.state().is_loading_notes = false;
                tracing::warn!(error = %err, "load notes failed");
                self.notifier.error("Failed to load notes");
            }
        }
    }

    pub async fn load_tags(&self) {
        self.state().is_loading_tags = true;

        match self.repo.list_tags().await {
            Ok(tags) => {
                let mut state = self.state();
                state.is_loading_tags = false;
                state.tags = tags;
            }
            Err(err) => {
                self.state().is_loading_tags = false;
                tracing::warn!(error = %err, "load tags failed");
                self.notifier.error("Failed to load tags");
            }
        }
    }

    pub async fn set_search_query(&self, query: &str) {
        {
            let mut state = self.state();
            state.search_query = query.to_string();
            state.offset = 0;
            self.persist(&state);
        }
        self.load_notes().await;
    }

    pub async fn set_selected_tag_ids(&self, tag_ids: Vec<i64>) {
        {
            let mut state = self.state();
            state.selected_tag_ids = tag_ids;
            state.offset = 0;
            self.persist(&state);
        }
        self.load_notes().await;
    }

    /// Moves the pagination window; nonzero offsets accumulate onto the
    /// already-fetched pages.
    pub async fn set_offset(&self, offset: u32) {
        self.state().offset = offset;
        self.load_notes().await;
    }

    pub fn toggle_sidebar(&self) {
        let mut state = self.state();
        state.sidebar_open = !state.sidebar_open;
        self.persist(&state);
    }

    pub fn set_sidebar_open(&self, open: bool) {
        let mut state = self.state();
        state.sidebar_open = open;
        self.persist(&state);
    }
}

fn fallback_title(path: &Path) -> String {
    let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
    let stem = strip_markdown_suffix(name).trim();
    if stem.is_empty() {
        DEFAULT_IMPORT_TITLE.to_string()
    } else {
        stem.to_string()
    }
}

fn strip_markdown_suffix(name: &str) -> &str {
    for suffix in [".markdown", ".md"] {
        if name.len() < suffix.len() {
            continue;
        }
        let cut = name.len() - suffix.len();
        if let (Some(head), Some(tail)) = (name.get(..cut), name.get(cut..)) {
            if tail.eq_ignore_ascii_case(suffix) {
                return head;
            }
        }
    }
    name
}
