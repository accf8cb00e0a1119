use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_TAG_NAME_LEN: usize = 50;

pub const DEFAULT_PAGE_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub tags: Vec<Tag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|tag| tag.name.clone()).collect()
    }
}

/// One open editor tab. `content` is the live edit buffer; `note` is the
/// last server-acknowledged snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteTab {
    pub id: i64,
    pub title: String,
    pub is_dirty: bool,
    pub is_active: bool,
    pub note: Option<Note>,
    pub content: String,
}

impl NoteTab {
    pub fn from_note(note: Note) -> Self {
        Self {
            id: note.id,
            title: note.title.clone(),
            is_dirty: false,
            is_active: false,
            content: note.content.clone(),
            note: Some(note),
        }
    }

    /// Dirtiness is content inequality against the last saved snapshot.
    pub fn recompute_dirty(&mut self) {
        self.is_dirty = match &self.note {
            Some(note) => self.content != note.content,
            None => false,
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotePayload {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tag_names: Vec<String>,
}

impl CreateNotePayload {
    pub fn validate(&self) -> AppResult<()> {
        validate_title(&self.title)?;
        for name in &self.tag_names {
            validate_tag_name(name)?;
        }
        Ok(())
    }
}

/// Partial update: omitted fields are left unchanged; `tag_names` replaces
/// the full tag set when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotePayload {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tag_names: Option<Vec<String>>,
}

impl UpdateNotePayload {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(names) = &self.tag_names {
            for name in names {
                validate_tag_name(name)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotesFilters {
    pub search: Option<String>,
    pub tag_ids: Option<Vec<i64>>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ListNotesFilters {
    fn default() -> Self {
        Self {
            search: None,
            tag_ids: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesPage {
    pub notes: Vec<Note>,
    pub total: u64,
}

fn validate_title(title: &str) -> AppResult<()> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Title cannot be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::Validation(format!(
            "Title exceeds {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(())
}

fn validate_tag_name(name: &str) -> AppResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Tag name cannot be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_TAG_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Tag name exceeds {} characters",
            MAX_TAG_NAME_LEN
        )));
    }
    Ok(())
}
