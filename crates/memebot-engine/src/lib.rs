mod compositor;
mod dispatch;

pub use compositor::{
    caption_baselines, encode_png, render_caption, scale_to_width, scaled_dimensions, wrap_text,
    CaptionFont, RenderOptions, FONT_SIZE, OUTPUT_WIDTH,
};
pub use dispatch::{
    Attachment, CaptionRenderer, ChatMessage, Dispatcher, FontRenderer, Outcome, PermissionGate,
    Reply, StaticGate,
};

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use memebot_contracts::error::BotError;
use memebot_contracts::events::{EventPayload, EventWriter};
use memebot_contracts::templates::{
    validate_name, SnapshotStore, TemplateRecord, TemplateRegistry,
};
use serde_json::{json, Value};
use url::Url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Where an `add` gets its pixels from: a URL to download, or bytes that
/// arrived as a chat attachment.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Url(Url),
    Bytes(Vec<u8>),
}

/// The owned, injectable template service: in-memory registry, snapshot
/// file, raster directory and event log behind one mutation lock.
///
/// The lock covers every check-then-act sequence, so two concurrent adds of
/// the same name cannot both pass the uniqueness check. The snapshot file is
/// the authoritative state; `open` rebuilds the registry from it.
pub struct TemplateStore {
    registry: Mutex<TemplateRegistry>,
    snapshot: SnapshotStore,
    images_dir: PathBuf,
    events: EventWriter,
    http: reqwest::blocking::Client,
}

impl TemplateStore {
    /// Idempotent startup: seed an empty snapshot if none exists, create the
    /// raster directory, load the registry from the snapshot.
    pub fn open(data_dir: &Path, events: EventWriter) -> Result<Self, BotError> {
        let snapshot = SnapshotStore::new(data_dir.join("config.json"));
        snapshot.ensure_initialized()?;

        let images_dir = data_dir.join("images");
        std::fs::create_dir_all(&images_dir)?;

        let registry = TemplateRegistry::from_records(snapshot.load()?);
        let http = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|err| BotError::Fetch(err.to_string()))?;

        Ok(Self {
            registry: Mutex::new(registry),
            snapshot,
            images_dir,
            events,
            http,
        })
    }

    /// Fetch, decode and rescale the source image, write it under the
    /// derived filename, insert the record and rewrite the snapshot.
    /// All-or-nothing: a failed fetch or decode leaves no trace, and a
    /// failed write rolls the insert back.
    pub fn add(
        &self,
        name: &str,
        source: ImageSource,
        custom_prefix: Option<String>,
    ) -> Result<TemplateRecord, BotError> {
        validate_name(name)?;
        {
            // Fail fast before paying for the fetch; re-checked under the
            // same lock once the image is in hand.
            let registry = self.lock_registry();
            if registry.get(name).is_some() {
                return Err(BotError::DuplicateName(name.to_string()));
            }
            if let Some(prefix) = custom_prefix.as_deref() {
                if registry.prefix_in_use(prefix) {
                    return Err(BotError::DuplicatePrefix(prefix.to_string()));
                }
            }
        }

        let bytes = self.fetch(&source)?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|err| BotError::UnsupportedImage(err.to_string()))?;
        let scaled = compositor::scale_to_width(&decoded, compositor::OUTPUT_WIDTH);

        let record = TemplateRecord::new(name, custom_prefix);
        let mut registry = self.lock_registry();
        registry.insert(record.clone())?;

        let raster_path = self.images_dir.join(&record.filename);
        let committed = scaled
            .save(&raster_path)
            .map_err(|err| BotError::Persist(std::io::Error::other(err.to_string())))
            .and_then(|()| self.snapshot.save(&registry.records()));
        if let Err(err) = committed {
            let _ = registry.remove(&record.name);
            let _ = std::fs::remove_file(&raster_path);
            return Err(err);
        }
        drop(registry);

        self.emit_event("template_added", payload(json!({ "template": record.name })));
        Ok(record)
    }

    /// Remove the record and rewrite the snapshot, then delete the raster
    /// best-effort: once the snapshot no longer lists the template the
    /// removal has happened, and a stuck file is only log-worthy.
    pub fn remove(&self, name: &str) -> Result<TemplateRecord, BotError> {
        let record = {
            let mut registry = self.lock_registry();
            let record = registry.remove(name)?;
            if let Err(err) = self.snapshot.save(&registry.records()) {
                let _ = registry.insert(record);
                return Err(err);
            }
            record
        };

        let raster_path = self.images_dir.join(&record.filename);
        if let Err(err) = std::fs::remove_file(&raster_path) {
            self.emit_event(
                "raster_delete_failed",
                payload(json!({ "template": record.name, "error": err.to_string() })),
            );
        }

        self.emit_event("template_removed", payload(json!({ "template": record.name })));
        Ok(record)
    }

    pub fn get(&self, name: &str) -> Option<TemplateRecord> {
        self.lock_registry().get(name).cloned()
    }

    /// Snapshot of all records in insertion ("date added") order.
    pub fn list(&self) -> Vec<TemplateRecord> {
        self.lock_registry().records()
    }

    /// Match a message against registered custom prefixes; on a hit, the
    /// caption text is everything after the first space.
    pub fn resolve_custom_prefix(&self, content: &str) -> Option<(TemplateRecord, String)> {
        let registry = self.lock_registry();
        let record = registry.match_custom_prefix(content)?.clone();
        let text = content
            .split_once(' ')
            .map(|(_, rest)| rest.trim().to_string())
            .unwrap_or_default();
        Some((record, text))
    }

    pub fn image_path(&self, record: &TemplateRecord) -> PathBuf {
        self.images_dir.join(&record.filename)
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn snapshot_path(&self) -> &Path {
        self.snapshot.path()
    }

    pub fn read_raster(&self, record: &TemplateRecord) -> Result<Vec<u8>, BotError> {
        Ok(std::fs::read(self.image_path(record))?)
    }

    pub fn fetch(&self, source: &ImageSource) -> Result<Vec<u8>, BotError> {
        match source {
            ImageSource::Bytes(bytes) => Ok(bytes.clone()),
            ImageSource::Url(url) => {
                let response = self
                    .http
                    .get(url.as_str())
                    .send()
                    .map_err(|err| BotError::Fetch(err.to_string()))?;
                if !response.status().is_success() {
                    return Err(BotError::Fetch(format!(
                        "{url} returned {}",
                        response.status()
                    )));
                }
                Ok(response
                    .bytes()
                    .map_err(|err| BotError::Fetch(err.to_string()))?
                    .to_vec())
            }
        }
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Best-effort event emission; logging never gets in the way of the
    /// operation it describes.
    pub fn emit_event(&self, event_type: &str, payload: EventPayload) {
        let _ = self.events.emit(event_type, payload);
    }

    fn lock_registry(&self) -> MutexGuard<'_, TemplateRegistry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, RgbImage};
    use memebot_contracts::error::BotError;
    use memebot_contracts::events::EventWriter;
    use memebot_contracts::templates::SnapshotStore;

    use super::{ImageSource, TemplateStore};

    fn test_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::new(width, height);
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("encode test png");
        cursor.into_inner()
    }

    fn open_store(data_dir: &std::path::Path) -> anyhow::Result<TemplateStore> {
        let events = EventWriter::new(data_dir.join("events.jsonl"), "test-session");
        Ok(TemplateStore::open(data_dir, events)?)
    }

    #[test]
    fn open_seeds_snapshot_and_images_dir() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path())?;

        assert!(store.snapshot_path().exists());
        assert!(store.images_dir().is_dir());
        assert!(store.list().is_empty());
        Ok(())
    }

    #[test]
    fn add_writes_raster_record_and_snapshot() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path())?;

        let record = store.add(
            "doge",
            ImageSource::Bytes(test_png(400, 300)),
            Some("!doge".to_string()),
        )?;
        assert_eq!(record.name, "doge");
        assert_eq!(record.filename, "doge.png");

        assert_eq!(store.get("doge").map(|r| r.name), Some("doge".to_string()));
        assert!(store.image_path(&record).exists());

        // Stored raster is already rescaled to the output width.
        let raster = image::open(store.image_path(&record))?;
        assert_eq!((raster.width(), raster.height()), (500, 375));

        let persisted = SnapshotStore::new(store.snapshot_path()).load()?;
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].custom_prefix.as_deref(), Some("!doge"));
        Ok(())
    }

    #[test]
    fn duplicate_name_and_prefix_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path())?;
        store.add(
            "doge",
            ImageSource::Bytes(test_png(40, 30)),
            Some("!d".to_string()),
        )?;

        let err = store
            .add("doge", ImageSource::Bytes(test_png(40, 30)), None)
            .unwrap_err();
        assert!(matches!(err, BotError::DuplicateName(_)));

        let err = store
            .add(
                "cat",
                ImageSource::Bytes(test_png(40, 30)),
                Some("!d".to_string()),
            )
            .unwrap_err();
        assert!(matches!(err, BotError::DuplicatePrefix(_)));

        assert_eq!(store.list().len(), 1);
        Ok(())
    }

    #[test]
    fn reserved_name_rejected_before_any_io() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path())?;

        let err = store
            .add("config", ImageSource::Bytes(test_png(40, 30)), None)
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidName(_)));
        assert!(store.list().is_empty());
        Ok(())
    }

    #[test]
    fn undecodable_image_leaves_no_state_behind() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path())?;

        let err = store
            .add("doge", ImageSource::Bytes(b"junk".to_vec()), None)
            .unwrap_err();
        assert!(matches!(err, BotError::UnsupportedImage(_)));

        assert!(store.get("doge").is_none());
        assert!(!temp.path().join("images/doge.png").exists());
        assert!(SnapshotStore::new(store.snapshot_path()).load()?.is_empty());
        Ok(())
    }

    #[test]
    fn remove_deletes_record_snapshot_entry_and_raster() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path())?;
        let record = store.add("doge", ImageSource::Bytes(test_png(40, 30)), None)?;
        let raster_path = store.image_path(&record);

        let removed = store.remove("doge")?;
        assert_eq!(removed.name, "doge");
        assert!(store.get("doge").is_none());
        assert!(!raster_path.exists());
        assert!(SnapshotStore::new(store.snapshot_path()).load()?.is_empty());

        let err = store.remove("doge").unwrap_err();
        assert!(matches!(err, BotError::NotFound(_)));
        Ok(())
    }

    #[test]
    fn remove_survives_a_missing_raster_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path())?;
        let record = store.add("doge", ImageSource::Bytes(test_png(40, 30)), None)?;
        std::fs::remove_file(store.image_path(&record))?;

        // Logical removal still succeeds; the failure only hits the event log.
        store.remove("doge")?;
        assert!(store.get("doge").is_none());

        let log = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        assert!(log.contains("raster_delete_failed"));
        Ok(())
    }

    #[test]
    fn reopen_rebuilds_registry_from_snapshot() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        {
            let store = open_store(temp.path())?;
            store.add("doge", ImageSource::Bytes(test_png(40, 30)), None)?;
            store.add(
                "cat",
                ImageSource::Bytes(test_png(40, 30)),
                Some("!cat".to_string()),
            )?;
        }

        let store = open_store(temp.path())?;
        let names: Vec<String> = store.list().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["doge".to_string(), "cat".to_string()]);
        Ok(())
    }

    #[test]
    fn custom_prefix_resolution_extracts_caption_text() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path())?;
        store.add(
            "doge",
            ImageSource::Bytes(test_png(40, 30)),
            Some("!doge".to_string()),
        )?;

        let (record, text) = store.resolve_custom_prefix("!doge much wow").expect("hit");
        assert_eq!(record.name, "doge");
        assert_eq!(text, "much wow");

        assert!(store.resolve_custom_prefix("plain chatter").is_none());
        Ok(())
    }
}
