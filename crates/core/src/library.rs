use chrono::{DateTime, Utc};
use metro_store::{NewRecording, Recording, RecordingId, RecordingStore, StoreError};

use crate::playback::{PlaybackError, PlaybackManager, ToggleOutcome};

/// The stored recordings, cached newest first, together with the player.
pub struct RecordingLibrary {
    store: RecordingStore,
    playback: PlaybackManager,
    recordings: Vec<Recording>,
}

impl RecordingLibrary {
    pub fn new(store: RecordingStore, playback: PlaybackManager) -> Self {
        Self {
            store,
            playback,
            recordings: Vec::new(),
        }
    }

    pub async fn init(&mut self) -> Result<(), StoreError> {
        self.store.init().await?;
        self.refresh().await
    }

    /// Reload the cache from the store. The old list is kept on failure.
    pub async fn refresh(&mut self) -> Result<(), StoreError> {
        let mut recordings = self.store.list_all().await?;
        sort_newest_first(&mut recordings);
        self.recordings = recordings;
        Ok(())
    }

    /// Persist a recording. Once the store has it the id is returned even if
    /// the list cannot be reloaded; the new record is cached directly then.
    pub async fn add(&mut self, recording: NewRecording) -> Result<RecordingId, StoreError> {
        let cached = recording.clone();
        let id = self.store.add(recording).await?;

        if let Err(e) = self.refresh().await {
            log::warn!("recording {id} saved but the list could not be reloaded: {e}");
            self.recordings.retain(|r| r.id != id);
            self.recordings.push(Recording {
                id,
                date: cached.date,
                duration_ms: cached.duration_ms,
                blob: cached.blob,
            });
            sort_newest_first(&mut self.recordings);
        }
        Ok(id)
    }

    /// Stop the recording if it is playing, then delete it.
    pub async fn delete(&mut self, id: RecordingId) -> Result<bool, StoreError> {
        self.playback.stop_if_active(id);

        let deleted = self.store.delete(id).await?;
        if deleted {
            self.recordings.retain(|r| r.id != id);
        }
        Ok(deleted)
    }

    pub fn toggle(&mut self, id: RecordingId) -> Result<ToggleOutcome, PlaybackError> {
        let recording = self
            .recordings
            .iter()
            .find(|r| r.id == id)
            .ok_or(PlaybackError::NotFound(id))?;
        self.playback.toggle(recording)
    }

    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    pub fn get(&self, id: RecordingId) -> Option<&Recording> {
        self.recordings.iter().find(|r| r.id == id)
    }

    pub fn playback(&self) -> &PlaybackManager {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackManager {
        &mut self.playback
    }
}

fn sort_newest_first(recordings: &mut [Recording]) {
    recordings.sort_by(|a, b| {
        let key = |r: &Recording| {
            DateTime::parse_from_rfc3339(&r.date)
                .map(|d| d.with_timezone(&Utc))
                .ok()
        };
        key(b)
            .cmp(&key(a))
            .then_with(|| b.date.cmp(&a.date))
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::tests::{FakeBackend, wav_recording};
    use metro_transport::Status;
    use metro_transport::TakeId;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn library(dir: &std::path::Path) -> (RecordingLibrary, Arc<Mutex<FakeBackend>>) {
        let backend = Arc::new(Mutex::new(FakeBackend::default()));
        let mut lib = RecordingLibrary::new(
            RecordingStore::new(dir),
            PlaybackManager::new(backend.clone()),
        );
        lib.init().await.expect("init");
        (lib, backend)
    }

    fn new_recording(date: &str) -> NewRecording {
        let template = wav_recording(0, 400);
        NewRecording {
            date: date.to_string(),
            duration_ms: template.duration_ms,
            blob: template.blob,
        }
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let dir = tempdir().expect("tempdir");
        let (mut lib, _) = library(dir.path()).await;

        lib.add(new_recording("2024-05-01T10:00:00.000Z")).await.unwrap();
        lib.add(new_recording("2024-05-03T10:00:00.000Z")).await.unwrap();
        lib.add(new_recording("2024-05-02T10:00:00.000Z")).await.unwrap();

        let dates: Vec<&str> = lib.recordings().iter().map(|r| r.date.as_str()).collect();
        assert_eq!(
            dates,
            vec![
                "2024-05-03T10:00:00.000Z",
                "2024-05-02T10:00:00.000Z",
                "2024-05-01T10:00:00.000Z",
            ]
        );
    }

    #[tokio::test]
    async fn test_deleting_playing_recording_stops_it_first() {
        let dir = tempdir().expect("tempdir");
        let (mut lib, backend) = library(dir.path()).await;

        let id = lib.add(new_recording("2024-05-01T10:00:00.000Z")).await.unwrap();
        lib.toggle(id).expect("play");

        backend.lock().pending.push(Status::TakePosition {
            take: TakeId(1),
            frame: 200,
        });
        lib.playback_mut().poll();
        assert_eq!(lib.playback().progress(), 50.0);

        assert!(lib.delete(id).await.unwrap());

        assert_eq!(lib.playback().active_recording(), None);
        assert_eq!(lib.playback().progress(), 0.0);
        assert!(backend.lock().live_takes().is_empty());
        assert!(lib.recordings().is_empty());
        assert!(lib.toggle(id).is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_keeps_list() {
        let dir = tempdir().expect("tempdir");
        let (mut lib, _) = library(dir.path()).await;
        lib.add(new_recording("2024-05-01T10:00:00.000Z")).await.unwrap();

        assert!(!lib.delete(RecordingId(999)).await.unwrap());
        assert_eq!(lib.recordings().len(), 1);
    }

    #[tokio::test]
    async fn test_store_io_failure_keeps_cached_list() {
        let dir = tempdir().expect("tempdir");
        let (mut lib, _) = library(dir.path()).await;
        let id = lib.add(new_recording("2024-05-01T10:00:00.000Z")).await.unwrap();

        let store_dir = dir.path().join("recordings");
        std::fs::remove_dir_all(&store_dir).unwrap();
        std::fs::write(&store_dir, b"").unwrap();

        assert!(matches!(
            lib.add(new_recording("2024-05-02T10:00:00.000Z")).await,
            Err(StoreError::Io(_))
        ));
        assert!(matches!(lib.delete(id).await, Err(StoreError::Io(_))));
        assert!(lib.refresh().await.is_err());

        let ids: Vec<RecordingId> = lib.recordings().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![id]);
    }

    #[tokio::test]
    async fn test_only_one_recording_plays() {
        let dir = tempdir().expect("tempdir");
        let (mut lib, backend) = library(dir.path()).await;

        let a = lib.add(new_recording("2024-05-01T10:00:00.000Z")).await.unwrap();
        let b = lib.add(new_recording("2024-05-02T10:00:00.000Z")).await.unwrap();

        lib.toggle(a).unwrap();
        lib.toggle(b).unwrap();

        assert_eq!(lib.playback().active_recording(), Some(b));
        assert_eq!(backend.lock().live_takes().len(), 1);
    }
}
