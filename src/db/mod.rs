use crate::errors::{AppError, AppResult};
use crate::models::{CreateNotePayload, ListNotesFilters, Note, NotesPage, Tag, UpdateNotePayload};
use crate::repository::{NoteRepository, RepoFuture};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// SQLite-backed note repository. The connection lives behind a mutex; each
/// operation runs to completion while holding it.
#[derive(Debug)]
pub struct SqliteNoteRepository {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteNoteRepository {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    fn create_sync(&self, payload: CreateNotePayload) -> AppResult<Note> {
        payload.validate()?;
        let now = Utc::now();

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notes (title, content, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![payload.title.trim(), payload.content, now, now],
        )?;
        let note_id = conn.last_insert_rowid();

        if !payload.tag_names.is_empty() {
            sync_note_tags(&conn, note_id, &payload.tag_names)?;
        }

        load_note(&conn, note_id)?
            .ok_or_else(|| AppError::Internal("note vanished after insert".to_string()))
    }

    fn get_sync(&self, id: i64) -> AppResult<Note> {
        let conn = self.conn()?;
        load_note(&conn, id)?.ok_or_else(|| AppError::NotFound(format!("Note {} not found", id)))
    }

    fn update_sync(&self, id: i64, payload: UpdateNotePayload) -> AppResult<Note> {
        payload.validate()?;
        let now = Utc::now();

        let conn = self.conn()?;
        let exists: Option<i64> = conn
            .query_row("SELECT id FROM notes WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(AppError::NotFound(format!("Note {} not found", id)));
        }

        match (&payload.title, &payload.content) {
            (Some(title), Some(content)) => {
                conn.execute(
                    "UPDATE notes SET title = ?1, content = ?2, updated_at = ?3 WHERE id = ?4",
                    params![title.trim(), content, now, id],
                )?;
            }
            (Some(title), None) => {
                conn.execute(
                    "UPDATE notes SET title = ?1, updated_at = ?2 WHERE id = ?3",
                    params![title.trim(), now, id],
                )?;
            }
            (None, Some(content)) => {
                conn.execute(
                    "UPDATE notes SET content = ?1, updated_at = ?2 WHERE id = ?3",
                    params![content, now, id],
                )?;
            }
            (None, None) => {
                conn.execute(
                    "UPDATE notes SET updated_at = ?1 WHERE id = ?2",
                    params![now, id],
                )?;
            }
        }

        if let Some(tag_names) = &payload.tag_names {
            sync_note_tags(&conn, id, tag_names)?;
        }

        load_note(&conn, id)?
            .ok_or_else(|| AppError::Internal("note vanished during update".to_string()))
    }

    fn delete_sync(&self, id: i64) -> AppResult<()> {
        let conn = self.conn()?;
        let affected = conn.execute("DELETE FROM notes WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(AppError::NotFound(format!("Note {} not found", id)));
        }
        Ok(())
    }

    fn list_sync(&self, filters: ListNotesFilters) -> AppResult<NotesPage> {
        let conn = self.conn()?;

        let mut where_sql = String::from(" WHERE 1 = 1");
        let mut params_vec: Vec<String> = Vec::new();

        if let Some(search) = filters.search.as_deref().filter(|s| !s.is_empty()) {
            where_sql.push_str(" AND (title LIKE ? ESCAPE '\\' OR content LIKE ? ESCAPE '\\')");
            let pattern = format!("%{}%", escape_like(search));
            params_vec.push(pattern.clone());
            params_vec.push(pattern);
        }

        if let Some(tag_ids) = filters.tag_ids.as_ref().filter(|ids| !ids.is_empty()) {
            let placeholders = vec!["?"; tag_ids.len()].join(", ");
            where_sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM note_tags nt WHERE nt.note_id = notes.id AND nt.tag_id IN ({}))",
                placeholders
            ));
            for tag_id in tag_ids {
                params_vec.push(tag_id.to_string());
            }
        }

        let dyn_params: Vec<&dyn rusqlite::ToSql> = params_vec
            .iter()
            .map(|param| param as &dyn rusqlite::ToSql)
            .collect();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM notes{}", where_sql),
            rusqlite::params_from_iter(dyn_params.clone()),
            |row| row.get(0),
        )?;

        let query = format!(
            "SELECT id, title, content, created_at, updated_at FROM notes{} \
             ORDER BY updated_at DESC, id DESC LIMIT ? OFFSET ?",
            where_sql
        );
        let limit = filters.limit as i64;
        let offset = filters.offset as i64;
        let mut page_params = dyn_params;
        page_params.push(&limit);
        page_params.push(&offset);

        let mut statement = conn.prepare(&query)?;
        let rows = statement.query_map(rusqlite::params_from_iter(page_params), note_row)?;

        let mut notes = Vec::new();
        for row in rows {
            let (id, title, content, created_at, updated_at) = row?;
            notes.push(Note {
                id,
                title,
                content,
                tags: load_note_tags(&conn, id)?,
                created_at,
                updated_at,
            });
        }

        Ok(NotesPage {
            notes,
            total: total.max(0) as u64,
        })
    }

    fn list_tags_sync(&self) -> AppResult<Vec<Tag>> {
        let conn = self.conn()?;
        let mut statement =
            conn.prepare("SELECT id, name, created_at FROM tags ORDER BY name ASC")?;
        let rows = statement.query_map([], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;

        let mut tags = Vec::new();
        for tag in rows {
            tags.push(tag?);
        }
        Ok(tags)
    }
}

type NoteRow = (i64, String, String, DateTime<Utc>, DateTime<Utc>);

fn note_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NoteRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn load_note(conn: &Connection, id: i64) -> AppResult<Option<Note>> {
    let row = conn
        .query_row(
            "SELECT id, title, content, created_at, updated_at FROM notes WHERE id = ?1",
            [id],
            note_row,
        )
        .optional()?;

    let Some((id, title, content, created_at, updated_at)) = row else {
        return Ok(None);
    };

    Ok(Some(Note {
        id,
        title,
        content,
        tags: load_note_tags(conn, id)?,
        created_at,
        updated_at,
    }))
}

fn load_note_tags(conn: &Connection, note_id: i64) -> AppResult<Vec<Tag>> {
    let mut statement = conn.prepare(
        "SELECT t.id, t.name, t.created_at FROM tags t \
         JOIN note_tags nt ON nt.tag_id = t.id WHERE nt.note_id = ?1 ORDER BY t.id",
    )?;
    let rows = statement.query_map([note_id], |row| {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
        })
    })?;

    let mut tags = Vec::new();
    for tag in rows {
        tags.push(tag?);
    }
    Ok(tags)
}

/// Replaces the note's tag set, creating missing tags by name.
fn sync_note_tags(conn: &Connection, note_id: i64, tag_names: &[String]) -> AppResult<()> {
    conn.execute("DELETE FROM note_tags WHERE note_id = ?1", [note_id])?;

    for name in tag_names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }

        let existing: Option<i64> = conn
            .query_row("SELECT id FROM tags WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        let tag_id = match existing {
            Some(id) => id,
            None => {
                conn.execute(
                    "INSERT INTO tags (name, created_at) VALUES (?1, ?2)",
                    params![name, Utc::now()],
                )?;
                conn.last_insert_rowid()
            }
        };

        conn.execute(
            "INSERT OR IGNORE INTO note_tags (note_id, tag_id) VALUES (?1, ?2)",
            params![note_id, tag_id],
        )?;
    }

    Ok(())
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl NoteRepository for SqliteNoteRepository {
    fn create(&self, payload: CreateNotePayload) -> RepoFuture<'_, Note> {
        Box::pin(async move { self.create_sync(payload) })
    }

    fn get_by_id(&self, id: i64) -> RepoFuture<'_, Note> {
        Box::pin(async move { self.get_sync(id) })
    }

    fn update(&self, id: i64, payload: UpdateNotePayload) -> RepoFuture<'_, Note> {
        Box::pin(async move { self.update_sync(id, payload) })
    }

    fn delete(&self, id: i64) -> RepoFuture<'_, ()> {
        Box::pin(async move { self.delete_sync(id) })
    }

    fn list(&self, filters: ListNotesFilters) -> RepoFuture<'_, NotesPage> {
        Box::pin(async move { self.list_sync(filters) })
    }

    fn list_tags(&self) -> RepoFuture<'_, Vec<Tag>> {
        Box::pin(async move { self.list_tags_sync() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_repo(dir: &TempDir) -> SqliteNoteRepository {
        SqliteNoteRepository::new(&dir.path().join("notes.db")).expect("open repository")
    }

    fn payload(title: &str, content: &str, tags: &[&str]) -> CreateNotePayload {
        CreateNotePayload {
            title: title.to_string(),
            content: content.to_string(),
            tag_names: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);

        let created = repo
            .create(payload("Shopping", "milk, eggs", &["home", "errands"]))
            .await
            .unwrap();
        assert!(created.id > 0);

        let fetched = repo.get_by_id(created.id).await.unwrap();
        assert_eq!(fetched.title, "Shopping");
        assert_eq!(fetched.content, "milk, eggs");
        assert_eq!(fetched.tag_names(), vec!["home", "errands"]);
    }

    #[tokio::test]
    async fn create_rejects_blank_title() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);
        let err = repo.create(payload("  ", "", &[])).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn update_is_partial_and_replaces_tags() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);
        let note = repo.create(payload("Title", "body", &["a", "b"])).await.unwrap();

        let updated = repo
            .update(
                note.id,
                UpdateNotePayload {
                    content: Some("new body".to_string()),
                    tag_names: Some(vec!["b".to_string(), "c".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.title, "Title");
        assert_eq!(updated.content, "new body");
        assert_eq!(updated.tag_names(), vec!["b", "c"]);
        assert!(updated.updated_at >= note.updated_at);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);
        let note = repo.create(payload("Doomed", "", &[])).await.unwrap();

        repo.delete(note.id).await.unwrap();
        assert!(repo.get_by_id(note.id).await.unwrap_err().is_not_found());
        assert!(repo.delete(note.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn search_matches_title_or_content() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);
        repo.create(payload("Recipe", "flour and sugar", &[])).await.unwrap();
        repo.create(payload("Sugar log", "daily intake", &[])).await.unwrap();
        repo.create(payload("Unrelated", "nothing here", &[])).await.unwrap();

        let page = repo
            .list(ListNotesFilters {
                search: Some("sugar".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn like_wildcards_in_search_are_literal() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);
        repo.create(payload("Percent", "value is 100%", &[])).await.unwrap();
        repo.create(payload("Plain", "value is 100", &[])).await.unwrap();

        let page = repo
            .list(ListNotesFilters {
                search: Some("100%".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.notes[0].title, "Percent");
    }

    #[tokio::test]
    async fn tag_filter_keeps_notes_with_any_matching_tag() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);
        repo.create(payload("One", "", &["work"])).await.unwrap();
        repo.create(payload("Two", "", &["home"])).await.unwrap();
        repo.create(payload("Three", "", &["work", "home"])).await.unwrap();

        let tags = repo.list_tags().await.unwrap();
        let work_id = tags.iter().find(|t| t.name == "work").unwrap().id;

        let page = repo
            .list(ListNotesFilters {
                tag_ids: Some(vec![work_id]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn pagination_reports_unpaginated_total() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);
        for index in 0..5 {
            repo.create(payload(&format!("Note {}", index), "", &[])).await.unwrap();
        }

        let page = repo
            .list(ListNotesFilters {
                limit: 2,
                offset: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.notes.len(), 2);
        assert_eq!(page.total, 5);
    }

    #[tokio::test]
    async fn tags_survive_note_deletion() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);
        let note = repo.create(payload("Tagged", "", &["keep"])).await.unwrap();
        repo.delete(note.id).await.unwrap();

        let names: Vec<String> = repo
            .list_tags()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["keep"]);
    }
}
