//! File-backed persistence.

use hearth_engine::{
    DurableStore, FileStore, Message, SESSIONS_KEY, SessionStore,
};
use std::fs;
use std::time::UNIX_EPOCH;

#[test]
fn missing_key_reads_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    assert!(store.read("hearth.nothing").unwrap().is_none());
}

#[test]
fn write_creates_directory_and_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("data").join("sessions");
    let store = FileStore::new(&nested).without_sync();

    store.write(SESSIONS_KEY, "[]").unwrap();
    assert_eq!(store.read(SESSIONS_KEY).unwrap().as_deref(), Some("[]"));
    assert!(store.path_for(SESSIONS_KEY).exists());
}

#[test]
fn interrupted_swap_is_recovered_from_backup() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let path = store.path_for(SESSIONS_KEY);
    fs::write(path.with_extension("bak"), "[]").unwrap();

    assert_eq!(store.read(SESSIONS_KEY).unwrap().as_deref(), Some("[]"));
    assert!(path.exists());
}

#[test]
fn sessions_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let mut store = SessionStore::load(Box::new(FileStore::new(dir.path()).without_sync()), "m");
        let id = store.create();
        store.set_active(Some(id.clone()));
        store.update_messages(&id, |mut messages| {
            messages.push(Message::user("Close the garage", UNIX_EPOCH));
            messages.push(Message::assistant("Garage closed.", UNIX_EPOCH));
            messages
        });
        store.flush();
        id
    };

    let store = SessionStore::load(Box::new(FileStore::new(dir.path())), "m");
    assert_eq!(store.active_id(), Some(&id));
    let session = store.get(&id).unwrap();
    assert_eq!(session.title, "Close the garage");
    assert_eq!(session.messages[1].content(), "Garage closed.");
}

#[test]
fn corrupt_sessions_file_falls_back_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    fs::write(store.path_for(SESSIONS_KEY), "{not json").unwrap();

    let sessions = SessionStore::load(Box::new(store), "m");
    assert!(sessions.list().is_empty());
}
