use notedesk::notify::ConfirmFuture;
use notedesk::repository::RepoFuture;
use notedesk::{
    AppError, ConfirmRequest, Confirmer, CreateNotePayload, ListNotesFilters, Note, NoteRepository,
    NotesPage, Notifier, SessionStore, Severity, SqliteNoteRepository, Tag, UpdateNotePayload,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _message: &str, _severity: Severity) {}
}

struct AutoConfirmer;

impl Confirmer for AutoConfirmer {
    fn request(&self, _request: ConfirmRequest) -> ConfirmFuture<'_> {
        Box::pin(async { true })
    }
}

/// A repository that is unreachable, as after a failed startup.
struct DeadRepository;

impl NoteRepository for DeadRepository {
    fn create(&self, _payload: CreateNotePayload) -> RepoFuture<'_, Note> {
        Box::pin(async { Err(AppError::Transport("unreachable".to_string())) })
    }

    fn get_by_id(&self, _id: i64) -> RepoFuture<'_, Note> {
        Box::pin(async { Err(AppError::Transport("unreachable".to_string())) })
    }

    fn update(&self, _id: i64, _payload: UpdateNotePayload) -> RepoFuture<'_, Note> {
        Box::pin(async { Err(AppError::Transport("unreachable".to_string())) })
    }

    fn delete(&self, _id: i64) -> RepoFuture<'_, ()> {
        Box::pin(async { Err(AppError::Transport("unreachable".to_string())) })
    }

    fn list(&self, _filters: ListNotesFilters) -> RepoFuture<'_, NotesPage> {
        Box::pin(async { Err(AppError::Transport("unreachable".to_string())) })
    }

    fn list_tags(&self) -> RepoFuture<'_, Vec<Tag>> {
        Box::pin(async { Err(AppError::Transport("unreachable".to_string())) })
    }
}

fn open_repo(dir: &TempDir) -> Arc<SqliteNoteRepository> {
    Arc::new(SqliteNoteRepository::new(&dir.path().join("notes.db")).expect("open repository"))
}

fn store_with_snapshot(repo: Arc<dyn NoteRepository>, snapshot_path: PathBuf) -> SessionStore {
    SessionStore::with_snapshot(
        repo,
        Arc::new(SilentNotifier),
        Arc::new(AutoConfirmer),
        snapshot_path,
    )
}

#[tokio::test]
async fn full_editing_session_over_sqlite() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir);
    let store = SessionStore::new(repo.clone(), Arc::new(SilentNotifier), Arc::new(AutoConfirmer));

    store.create_new_note().await;
    let note_id = store.view().active_tab_id.expect("tab opened");

    store.set_current_note_content("# Plan\n\n- write tests");
    store.save_current_note().await;
    store.rename_current_note("Weekly plan").await;
    store.add_tag_to_current("planning").await;

    let state = store.view();
    let tab = state.active_tab().unwrap();
    assert_eq!(tab.title, "Weekly plan");
    assert!(!tab.is_dirty);
    assert_eq!(tab.note.as_ref().unwrap().tag_names(), vec!["planning"]);

    // the repository is the authoritative record
    let persisted = repo.get_by_id(note_id).await.unwrap();
    assert_eq!(persisted.title, "Weekly plan");
    assert_eq!(persisted.content, "# Plan\n\n- write tests");

    store.close_tab(note_id).await;
    assert!(store.view().tabs.is_empty());
}

#[tokio::test]
async fn restart_restores_tabs_and_keeps_local_edits() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir);
    let snapshot_path = dir.path().join("session.json");

    let note_id = {
        let store = store_with_snapshot(repo.clone(), snapshot_path.clone());
        store.create_new_note().await;
        let note_id = store.view().active_tab_id.unwrap();
        store.save_current_note().await;
        store.set_current_note_content("unsaved local edit");
        note_id
        // process "exits" here with a dirty tab on disk
    };

    // the note changes server-side while the app is down
    repo.update(
        note_id,
        UpdateNotePayload {
            content: Some("server-side change".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let store = store_with_snapshot(repo.clone(), snapshot_path);
    store.reconcile().await;

    let state = store.view();
    assert_eq!(state.active_tab_id, Some(note_id));
    let tab = state.active_tab().unwrap();
    assert_eq!(tab.content, "unsaved local edit", "restored content wins");
    assert_eq!(
        tab.note.as_ref().unwrap().content,
        "server-side change",
        "snapshot refreshed from the repository"
    );
    assert!(tab.is_dirty, "dirtiness re-derived against fresh content");
    assert!(!state.notes.is_empty(), "notes list refreshed");
}

#[tokio::test]
async fn restart_restores_filters_and_sidebar() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir);
    let snapshot_path = dir.path().join("session.json");

    {
        let store = store_with_snapshot(repo.clone(), snapshot_path.clone());
        store.set_search_query("meeting").await;
        store.set_sidebar_open(false);
    }

    let store = store_with_snapshot(repo, snapshot_path);
    let state = store.view();
    assert_eq!(state.search_query, "meeting");
    assert!(!state.sidebar_open);
}

#[tokio::test]
async fn restart_with_dead_repository_still_renders_restored_state() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir);
    let snapshot_path = dir.path().join("session.json");

    let note_id = {
        let store = store_with_snapshot(repo, snapshot_path.clone());
        store.create_new_note().await;
        store.set_current_note_content("offline edit");
        store.view().active_tab_id.unwrap()
    };

    let store = store_with_snapshot(Arc::new(DeadRepository), snapshot_path);
    store.reconcile().await;

    let state = store.view();
    assert_eq!(state.active_tab_id, Some(note_id));
    assert_eq!(state.current_content(), Some("offline edit"));
    assert!(!state.is_loading_notes, "loading flags cleared after failure");
    assert!(!state.is_loading_tags);
}

#[tokio::test]
async fn export_import_round_trip_between_sessions() {
    let export_dir = TempDir::new().unwrap();

    // session one exports a note
    let exported_path = {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir);
        let store =
            SessionStore::new(repo, Arc::new(SilentNotifier), Arc::new(AutoConfirmer));

        store
            .import_note("Trip checklist", "- passport\n- tickets", vec![
                "travel".to_string(),
                "todo".to_string(),
            ])
            .await;
        store.export_current_note(export_dir.path()).expect("export")
    };
    assert_eq!(
        exported_path.file_name().and_then(|name| name.to_str()),
        Some("Trip checklist.md")
    );

    // session two, against a fresh database, imports the file
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir);
    let store = SessionStore::new(repo.clone(), Arc::new(SilentNotifier), Arc::new(AutoConfirmer));
    store.import_note_from_file(&exported_path).await;

    let state = store.view();
    let tab = state.active_tab().expect("imported note opened");
    assert_eq!(tab.title, "Trip checklist");
    assert_eq!(tab.content, "- passport\n- tickets");
    assert_eq!(
        tab.note.as_ref().unwrap().tag_names(),
        vec!["travel", "todo"],
        "tags recreated lazily in creation order"
    );

    let tags: Vec<String> = repo
        .list_tags()
        .await
        .unwrap()
        .into_iter()
        .map(|tag| tag.name)
        .collect();
    assert_eq!(tags, vec!["todo", "travel"]);
}

#[tokio::test]
async fn deleting_an_externally_removed_note_surfaces_not_found() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir);
    let store = SessionStore::new(repo.clone(), Arc::new(SilentNotifier), Arc::new(AutoConfirmer));

    store.create_new_note().await;
    let note_id = store.view().active_tab_id.unwrap();

    // another client deletes the note from under the session
    repo.delete(note_id).await.unwrap();

    let err = store.delete_current_note().await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.view().active_tab_id, Some(note_id), "tab left open");
}
