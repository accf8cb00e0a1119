use crate::errors::{AppError, AppResult};
use crate::models::{CreateNotePayload, ListNotesFilters, Note, NotesPage, Tag, UpdateNotePayload};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send + 'a>>;

/// Persistence contract for notes and tags. Any concrete transport (embedded
/// database, HTTP client, in-process store) implements the same surface.
pub trait NoteRepository: Send + Sync {
    /// Fails with `AppError::Validation` on an empty or oversized title.
    fn create(&self, payload: CreateNotePayload) -> RepoFuture<'_, Note>;
    /// Fails with `AppError::NotFound` when the note does not exist.
    fn get_by_id(&self, id: i64) -> RepoFuture<'_, Note>;
    /// Partial update; `tag_names` replaces the full tag set when present.
    fn update(&self, id: i64, payload: UpdateNotePayload) -> RepoFuture<'_, Note>;
    fn delete(&self, id: i64) -> RepoFuture<'_, ()>;
    /// `search` matches title or content substring; `tag_ids` keeps notes
    /// with at least one matching tag; ordered most-recently-updated first.
    fn list(&self, filters: ListNotesFilters) -> RepoFuture<'_, NotesPage>;
    /// All known tags, ordered by name ascending.
    fn list_tags(&self) -> RepoFuture<'_, Vec<Tag>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    notes: HashMap<i64, Note>,
    tags: BTreeMap<String, Tag>,
    next_note_id: i64,
    next_tag_id: i64,
}

/// In-process repository with the same observable contract as the SQLite
/// implementation. Useful as a test double and for ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryNoteRepository {
    state: Mutex<MemoryState>,
}

impl MemoryNoteRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, op: impl FnOnce(&mut MemoryState) -> AppResult<T>) -> AppResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| AppError::Internal("memory repository mutex poisoned".to_string()))?;
        op(&mut state)
    }
}

impl MemoryState {
    fn resolve_tags(&mut self, names: &[String]) -> Vec<Tag> {
        let mut tags = Vec::new();
        for name in names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let tag = match self.tags.get(name) {
                Some(tag) => tag.clone(),
                None => {
                    self.next_tag_id += 1;
                    let tag = Tag {
                        id: self.next_tag_id,
                        name: name.to_string(),
                        created_at: Utc::now(),
                    };
                    self.tags.insert(name.to_string(), tag.clone());
                    tag
                }
            };
            tags.push(tag);
        }
        tags.sort_by_key(|tag| tag.id);
        tags.dedup_by_key(|tag| tag.id);
        tags
    }
}

impl NoteRepository for MemoryNoteRepository {
    fn create(&self, payload: CreateNotePayload) -> RepoFuture<'_, Note> {
        Box::pin(async move {
            payload.validate()?;
            self.with_state(|state| {
                state.next_note_id += 1;
                let now = Utc::now();
                let note = Note {
                    id: state.next_note_id,
                    title: payload.title.trim().to_string(),
                    content: payload.content.clone(),
                    tags: state.resolve_tags(&payload.tag_names),
                    created_at: now,
                    updated_at: now,
                };
                state.notes.insert(note.id, note.clone());
                Ok(note)
            })
        })
    }

    fn get_by_id(&self, id: i64) -> RepoFuture<'_, Note> {
        Box::pin(async move {
            self.with_state(|state| {
                state
                    .notes
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| AppError::NotFound(format!("Note {} not found", id)))
            })
        })
    }

    fn update(&self, id: i64, payload: UpdateNotePayload) -> RepoFuture<'_, Note> {
        Box::pin(async move {
            payload.validate()?;
            self.with_state(|state| {
                if !state.notes.contains_key(&id) {
                    return Err(AppError::NotFound(format!("Note {} not found", id)));
                }
                let tags = payload
                    .tag_names
                    .as_ref()
                    .map(|names| state.resolve_tags(names));
                let note = state.notes.get_mut(&id).expect("note presence checked");
                if let Some(title) = payload.title {
                    note.title = title.trim().to_string();
                }
                if let Some(content) = payload.content {
                    note.content = content;
                }
                if let Some(tags) = tags {
                    note.tags = tags;
                }
                note.updated_at = Utc::now();
                Ok(note.clone())
            })
        })
    }

    fn delete(&self, id: i64) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            self.with_state(|state| {
                state
                    .notes
                    .remove(&id)
                    .map(|_| ())
                    .ok_or_else(|| AppError::NotFound(format!("Note {} not found", id)))
            })
        })
    }

    fn list(&self, filters: ListNotesFilters) -> RepoFuture<'_, NotesPage> {
        Box::pin(async move {
            self.with_state(|state| {
                let mut notes: Vec<Note> = state.notes.values().cloned().collect();

                if let Some(search) = filters.search.as_deref().filter(|s| !s.is_empty()) {
                    let needle = search.to_lowercase();
                    notes.retain(|note| {
                        note.title.to_lowercase().contains(&needle)
                            || note.content.to_lowercase().contains(&needle)
                    });
                }

                if let Some(tag_ids) = filters.tag_ids.as_ref().filter(|ids| !ids.is_empty()) {
                    notes.retain(|note| note.tags.iter().any(|tag| tag_ids.contains(&tag.id)));
                }

                notes.sort_by(|a, b| {
                    b.updated_at
                        .cmp(&a.updated_at)
                        .then_with(|| b.id.cmp(&a.id))
                });

                let total = notes.len() as u64;
                let notes = notes
                    .into_iter()
                    .skip(filters.offset as usize)
                    .take(filters.limit as usize)
                    .collect();

                Ok(NotesPage { notes, total })
            })
        })
    }

    fn list_tags(&self) -> RepoFuture<'_, Vec<Tag>> {
        Box::pin(async move {
            // BTreeMap is keyed by name, so iteration is already name-ascending.
            self.with_state(|state| Ok(state.tags.values().cloned().collect()))
        })
    }
}
