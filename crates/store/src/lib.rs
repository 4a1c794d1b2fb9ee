mod bytes;
mod kv;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use kv::{LAST_TEMPO_KEY, PreferenceStore, SETTINGS_KEY};

const META_FILE: &str = "store.json";
const RECORD_EXT: &str = "rec";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordingId(pub u64);

impl std::fmt::Display for RecordingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encoded audio together with its container type.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub mime_type: String,
    #[serde(with = "bytes")]
    pub bytes: Vec<u8>,
}

impl Blob {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A stored practice clip. Never modified after [`RecordingStore::add`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    pub id: RecordingId,
    /// RFC 3339 timestamp in UTC, millisecond precision.
    pub date: String,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub blob: Blob,
}

/// A recording that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecording {
    pub date: String,
    pub duration_ms: u64,
    pub blob: Blob,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("recording store is not initialized")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreMeta {
    next_id: u64,
}

/// Directory backed recording collection: one MessagePack file per record
/// plus `store.json` holding the id counter.
#[derive(Debug)]
pub struct RecordingStore {
    dir: PathBuf,
    next_id: Option<u64>,
}

impl RecordingStore {
    /// `data_dir/recordings` is used as the store directory.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join("recordings"),
            next_id: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_initialized(&self) -> bool {
        self.next_id.is_some()
    }

    /// Create the directory and metadata if missing. Calling it again is a no-op.
    pub async fn init(&mut self) -> Result<(), StoreError> {
        if self.next_id.is_some() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        let from_meta = self.read_meta().await?;
        let from_records = self
            .record_ids()
            .await?
            .into_iter()
            .max()
            .map_or(1, |max| max + 1);
        let next_id = from_meta.max(from_records).max(1);

        self.write_meta(next_id).await?;
        self.next_id = Some(next_id);

        log::debug!("recording store ready at {:?}, next id {next_id}", self.dir);
        Ok(())
    }

    /// Persist a recording and return the id assigned to it.
    pub async fn add(&mut self, recording: NewRecording) -> Result<RecordingId, StoreError> {
        let id = self.next_id.ok_or(StoreError::NotInitialized)?;

        // counter is persisted before the record so ids are never reused
        self.write_meta(id + 1).await?;
        self.next_id = Some(id + 1);

        let record = Recording {
            id: RecordingId(id),
            date: recording.date,
            duration_ms: recording.duration_ms,
            blob: recording.blob,
        };
        let bytes = rmp_serde::encode::to_vec_named(&record)?;
        write_atomic(&self.record_path(record.id), &bytes).await?;

        log::info!(
            "stored recording {id} ({} ms, {} bytes)",
            record.duration_ms,
            record.blob.len()
        );
        Ok(record.id)
    }

    /// Every stored recording in no particular order. Unreadable records are
    /// skipped with a warning.
    pub async fn list_all(&self) -> Result<Vec<Recording>, StoreError> {
        self.ensure_init()?;

        let mut recordings = Vec::new();
        for id in self.record_ids().await? {
            match self.read_record(RecordingId(id)).await {
                Ok(recording) => recordings.push(recording),
                Err(e) => log::warn!("skipping unreadable recording {id}: {e}"),
            }
        }
        Ok(recordings)
    }

    pub async fn get(&self, id: RecordingId) -> Result<Option<Recording>, StoreError> {
        self.ensure_init()?;

        match self.read_record(id).await {
            Ok(recording) => Ok(Some(recording)),
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove a recording. Returns `false` if it did not exist.
    pub async fn delete(&self, id: RecordingId) -> Result<bool, StoreError> {
        self.ensure_init()?;

        match tokio::fs::remove_file(self.record_path(id)).await {
            Ok(()) => {
                log::info!("deleted recording {id}");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_init(&self) -> Result<(), StoreError> {
        if self.next_id.is_some() {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    fn record_path(&self, id: RecordingId) -> PathBuf {
        self.dir.join(format!("{}.{RECORD_EXT}", id.0))
    }

    async fn read_record(&self, id: RecordingId) -> Result<Recording, StoreError> {
        let bytes = tokio::fs::read(self.record_path(id)).await?;
        Ok(rmp_serde::decode::from_slice(&bytes)?)
    }

    async fn record_ids(&self) -> Result<Vec<u64>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn read_meta(&self) -> Result<u64, StoreError> {
        match tokio::fs::read(self.dir.join(META_FILE)).await {
            Ok(bytes) => match serde_json::from_slice::<StoreMeta>(&bytes) {
                Ok(meta) => Ok(meta.next_id),
                Err(e) => {
                    log::warn!("ignoring corrupt {META_FILE}: {e}");
                    Ok(1)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(1),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_meta(&self, next_id: u64) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&StoreMeta { next_id })?;
        write_atomic(&self.dir.join(META_FILE), &json).await
    }
}

/// Write through a sibling temp file so readers never see a partial file.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(date: &str, duration_ms: u64) -> NewRecording {
        NewRecording {
            date: date.to_string(),
            duration_ms,
            blob: Blob::new("audio/wav", vec![b'R', b'I', b'F', b'F', 0, 1, 2, 3]),
        }
    }

    #[tokio::test]
    async fn test_operations_before_init_fail() {
        let dir = tempdir().expect("tempdir");
        let mut store = RecordingStore::new(dir.path());

        assert!(matches!(
            store.add(sample("2024-01-01T00:00:00.000Z", 1)).await,
            Err(StoreError::NotInitialized)
        ));
        assert!(matches!(
            store.list_all().await,
            Err(StoreError::NotInitialized)
        ));
        assert!(matches!(
            store.delete(RecordingId(1)).await,
            Err(StoreError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let mut store = RecordingStore::new(dir.path());

        store.init().await.expect("init");
        store.init().await.expect("second init");

        assert!(store.dir().join("store.json").exists());
        assert!(store.list_all().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_add_then_list_returns_same_fields() {
        let dir = tempdir().expect("tempdir");
        let mut store = RecordingStore::new(dir.path());
        store.init().await.expect("init");

        let new = sample("2024-05-01T10:00:00.000Z", 3000);
        let id = store.add(new.clone()).await.expect("add");

        let all = store.list_all().await.expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].date, new.date);
        assert_eq!(all[0].duration_ms, 3000);
        assert_eq!(all[0].blob, new.blob);
    }

    #[tokio::test]
    async fn test_delete_removes_and_reports_missing() {
        let dir = tempdir().expect("tempdir");
        let mut store = RecordingStore::new(dir.path());
        store.init().await.expect("init");

        let a = store.add(sample("2024-05-01T10:00:00.000Z", 1000)).await.unwrap();
        let b = store.add(sample("2024-05-02T10:00:00.000Z", 2000)).await.unwrap();

        assert!(store.delete(a).await.expect("delete"));
        assert!(!store.delete(a).await.expect("second delete"));

        let remaining: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(remaining, vec![b]);
    }

    #[tokio::test]
    async fn test_ids_are_never_reused() {
        let dir = tempdir().expect("tempdir");

        let first = {
            let mut store = RecordingStore::new(dir.path());
            store.init().await.unwrap();
            let id = store.add(sample("2024-05-01T10:00:00.000Z", 1)).await.unwrap();
            store.delete(id).await.unwrap();
            id
        };

        let mut reopened = RecordingStore::new(dir.path());
        reopened.init().await.unwrap();
        let second = reopened.add(sample("2024-05-01T11:00:00.000Z", 1)).await.unwrap();

        assert!(second > first);
    }

    #[tokio::test]
    async fn test_counter_reconciled_with_existing_records() {
        let dir = tempdir().expect("tempdir");
        let mut store = RecordingStore::new(dir.path());
        store.init().await.unwrap();
        store.add(sample("2024-05-01T10:00:00.000Z", 1)).await.unwrap();
        store.add(sample("2024-05-01T10:01:00.000Z", 1)).await.unwrap();

        // a stale counter must not hand out an id that is on disk
        std::fs::write(store.dir().join("store.json"), br#"{"next_id": 1}"#).unwrap();

        let mut reopened = RecordingStore::new(dir.path());
        reopened.init().await.unwrap();
        let id = reopened.add(sample("2024-05-01T10:02:00.000Z", 1)).await.unwrap();

        assert_eq!(id, RecordingId(3));
        assert_eq!(reopened.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_skipped() {
        let dir = tempdir().expect("tempdir");
        let mut store = RecordingStore::new(dir.path());
        store.init().await.unwrap();
        store.add(sample("2024-05-01T10:00:00.000Z", 1)).await.unwrap();

        std::fs::write(store.dir().join("99.rec"), b"not msgpack").unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(store.get(RecordingId(99)).await.is_err());
        assert!(store.get(RecordingId(42)).await.unwrap().is_none());
    }

    #[test]
    fn test_record_uses_named_fields_and_binary_blob() {
        let record = Recording {
            id: RecordingId(7),
            date: "2024-05-01T10:00:00.000Z".to_string(),
            duration_ms: 1500,
            blob: Blob::new("audio/wav", vec![1, 2, 3]),
        };

        let bytes = rmp_serde::encode::to_vec_named(&record).expect("serialize");
        assert!(bytes.windows(8).any(|w| w == b"duration"));
        assert!(bytes.windows(9).any(|w| w == b"mime_type"));
        // bin8 marker, length, payload
        assert!(bytes.windows(5).any(|w| w == [0xc4, 3, 1, 2, 3]));

        let decoded: Recording = rmp_serde::decode::from_slice(&bytes).expect("deserialize");
        assert_eq!(decoded, record);
    }
}
