//! Event persistence behind the [`EventStore`] interface.
//!
//! The store is the only state shared between sessions, so
//! `insert_if_absent` must be atomic: two concurrent inserts of the same id
//! yield exactly one `true`.

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use rand::{seq::SliceRandom, thread_rng};
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    event::{Event, EventId},
    identity::verify_event,
};

/// Durable mapping from event id to event, unique by id and insert-only.
pub trait EventStore: Send + Sync {
    /// Insert `event` unless its id is already present. Returns `true` if
    /// this call inserted it.
    fn insert_if_absent(&self, event: &Event) -> Result<bool, StoreError>;

    fn get(&self, id: &EventId) -> Result<Option<Event>, StoreError>;

    /// The `limit` newest events, returned oldest first.
    fn most_recent(&self, limit: usize) -> Result<Vec<Event>, StoreError>;

    fn contains(&self, id: &EventId) -> Result<bool, StoreError> {
        Ok(self.get(id)?.is_some())
    }
}

/// Sort ascending by `(created_at, id)` and keep the newest `limit`.
fn newest_ascending(mut events: Vec<Event>, limit: usize) -> Vec<Event> {
    events.sort_by_key(|e| (e.created_at, e.id));
    let skip = events.len().saturating_sub(limit);
    events.split_off(skip)
}

/// Process-local store, mainly for tests and short-lived sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: Mutex<HashMap<EventId, Event>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventStore for MemoryStore {
    fn insert_if_absent(&self, event: &Event) -> Result<bool, StoreError> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.contains_key(&event.id) {
            return Ok(false);
        }
        events.insert(event.id, event.clone());
        Ok(true)
    }

    fn get(&self, id: &EventId) -> Result<Option<Event>, StoreError> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(events.get(id).cloned())
    }

    fn most_recent(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let all: Vec<Event> = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        Ok(newest_ascending(all, limit))
    }
}

/// File-backed store rooted at `root`.
///
/// Layout:
/// - `events/<aa>/<bb>/<id>.json`: one file per event, sharded by id prefix
/// - `log/events.ndjson`: append-only log in insertion order
///
/// Uniqueness comes from creating the event file with no-clobber semantics,
/// so it holds across processes sharing the same root.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<(), StoreError> {
        for d in ["events", "log"] {
            fs::create_dir_all(self.root.join(d))?;
        }
        Ok(())
    }

    /// Verify id and signature for a random sample of stored events.
    ///
    /// Returns how many were checked; fails on the first invalid one.
    pub fn verify_sample(&self, sample: usize) -> Result<usize, StoreError> {
        let mut paths = self.event_files()?;
        paths.shuffle(&mut thread_rng());
        let take = sample.min(paths.len());
        for path in paths.iter().take(take) {
            let ev = read_event(path)?;
            verify_event(&ev).map_err(|source| StoreError::Invalid {
                path: path.clone(),
                source,
            })?;
        }
        Ok(take)
    }

    fn event_path(&self, id: &EventId) -> PathBuf {
        let hex = id.to_hex();
        self.root
            .join("events")
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{hex}.json"))
    }

    fn event_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let events_dir = self.root.join("events");
        if !events_dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = vec![];
        for entry in walkdir::WalkDir::new(events_dir) {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "json")
            {
                paths.push(entry.into_path());
            }
        }
        Ok(paths)
    }

    fn append_log(&self, ev: &Event) -> Result<(), StoreError> {
        let log_dir = self.root.join("log");
        fs::create_dir_all(&log_dir)?;
        let mut line = serde_json::to_vec(ev)?;
        line.push(b'\n');
        let mut log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("events.ndjson"))?;
        log_file.write_all(&line)?;
        Ok(())
    }
}

impl EventStore for FileStore {
    fn insert_if_absent(&self, ev: &Event) -> Result<bool, StoreError> {
        let path = self.event_path(&ev.id);
        if path.exists() {
            return Ok(false);
        }
        let parent_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent_dir)?;
        // Write to a temp file first so readers never see a partial event.
        let mut tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
        serde_json::to_writer(&mut tmp, ev)?;
        tmp.flush()?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => {}
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!(event_id = %ev.id, "lost insert race; event already stored");
                return Ok(false);
            }
            Err(e) => return Err(e.error.into()),
        }
        // The event file is the record; the log is an audit trail.
        if let Err(e) = self.append_log(ev) {
            warn!(event_id = %ev.id, error = %e, "event stored but log append failed");
        }
        Ok(true)
    }

    fn get(&self, id: &EventId) -> Result<Option<Event>, StoreError> {
        let path = self.event_path(id);
        match fs::read(&path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, id: &EventId) -> Result<bool, StoreError> {
        Ok(self.event_path(id).exists())
    }

    fn most_recent(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let events = self
            .event_files()?
            .iter()
            .map(|p| read_event(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(newest_ascending(events, limit))
    }
}

fn read_event(path: &Path) -> Result<Event, StoreError> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::Tag,
        identity::{build_event, AuxRand, SigningKey},
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    fn signed_event(created_at: i64, content: &str) -> Event {
        let key = SigningKey::from_slice(&[1u8; 32]).unwrap();
        build_event(
            content,
            created_at,
            1,
            vec![Tag::new(["t", "test"])],
            &key,
            AuxRand::Fixed([0u8; 32]),
        )
        .unwrap()
    }

    fn stores() -> (TempDir, Vec<Box<dyn EventStore>>) {
        let dir = TempDir::new().unwrap();
        let file = FileStore::new(dir.path().to_path_buf());
        file.init().unwrap();
        (dir, vec![Box::new(MemoryStore::new()), Box::new(file)])
    }

    #[test]
    fn insert_if_absent_is_idempotent() {
        let (_dir, stores) = stores();
        let ev = signed_event(1, "a");
        for store in stores {
            assert!(store.insert_if_absent(&ev).unwrap());
            assert!(!store.insert_if_absent(&ev).unwrap());
            assert!(store.contains(&ev.id).unwrap());
            assert_eq!(store.get(&ev.id).unwrap(), Some(ev.clone()));
        }
    }

    #[test]
    fn get_missing_is_none() {
        let (_dir, stores) = stores();
        let id = EventId::from_bytes([9u8; 32]);
        for store in stores {
            assert_eq!(store.get(&id).unwrap(), None);
            assert!(!store.contains(&id).unwrap());
        }
    }

    #[test]
    fn most_recent_returns_newest_oldest_first() {
        let (_dir, stores) = stores();
        let events: Vec<Event> = [30, 10, 50, 20, 40]
            .into_iter()
            .map(|ts| signed_event(ts, &format!("at {ts}")))
            .collect();
        for store in stores {
            for ev in &events {
                store.insert_if_absent(ev).unwrap();
            }
            let recent: Vec<i64> = store
                .most_recent(3)
                .unwrap()
                .iter()
                .map(|e| e.created_at)
                .collect();
            assert_eq!(recent, vec![30, 40, 50]);
            assert_eq!(store.most_recent(100).unwrap().len(), 5);
            assert!(store.most_recent(0).unwrap().is_empty());
        }
    }

    #[test]
    fn file_store_layout_and_log() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.init().unwrap();
        let ev = signed_event(1, "logged");
        store.insert_if_absent(&ev).unwrap();
        store.insert_if_absent(&ev).unwrap();
        let hex = ev.id.to_hex();
        let path = dir
            .path()
            .join("events")
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{hex}.json"));
        assert!(path.exists());
        let log = fs::read_to_string(dir.path().join("log/events.ndjson")).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let ev = signed_event(5, "persisted");
        {
            let store = FileStore::new(dir.path().to_path_buf());
            store.init().unwrap();
            assert!(store.insert_if_absent(&ev).unwrap());
        }
        let reopened = FileStore::new(dir.path().to_path_buf());
        assert!(!reopened.insert_if_absent(&ev).unwrap());
        assert_eq!(reopened.most_recent(10).unwrap(), vec![ev]);
    }

    #[test]
    fn unwritable_log_does_not_lose_the_insert() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("log"), b"not a directory").unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        let ev = signed_event(8, "log blocked");
        assert!(store.insert_if_absent(&ev).unwrap());
        assert!(!store.insert_if_absent(&ev).unwrap());
        assert_eq!(store.get(&ev.id).unwrap(), Some(ev));
    }

    #[test]
    fn concurrent_inserts_yield_one_winner() {
        let dir = TempDir::new().unwrap();
        let file = FileStore::new(dir.path().to_path_buf());
        file.init().unwrap();
        let stores: Vec<Arc<dyn EventStore>> = vec![Arc::new(MemoryStore::new()), Arc::new(file)];
        let ev = signed_event(1, "race");
        for store in stores {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let ev = ev.clone();
                    std::thread::spawn(move || store.insert_if_absent(&ev).unwrap())
                })
                .collect();
            let wins = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|inserted| *inserted)
                .count();
            assert_eq!(wins, 1);
        }
    }

    #[test]
    fn verify_sample_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.init().unwrap();
        let ev1 = signed_event(1, "one");
        let ev2 = signed_event(2, "two");
        store.insert_if_absent(&ev1).unwrap();
        store.insert_if_absent(&ev2).unwrap();
        assert_eq!(store.verify_sample(10).unwrap(), 2);
        assert_eq!(store.verify_sample(1).unwrap(), 1);

        let mut bad = ev1.clone();
        bad.content = "edited".into();
        fs::write(store.event_path(&ev1.id), serde_json::to_string(&bad).unwrap()).unwrap();
        assert!(matches!(
            store.verify_sample(10),
            Err(StoreError::Invalid { .. })
        ));
    }

    #[test]
    fn empty_store_has_nothing_recent() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("missing"));
        assert!(store.most_recent(5).unwrap().is_empty());
        assert_eq!(store.verify_sample(5).unwrap(), 0);
    }
}
