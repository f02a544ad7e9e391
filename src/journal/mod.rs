//! Transfer journal (spec.md §4.8): durable record of in-flight transfers,
//! keyed by device + handle, used to resume reads and reconcile orphaned
//! partial writes on session open.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{MtpError, MtpResult};
use crate::types::{Etag, TransferKind, TransferState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    pub device_id: String,
    pub kind: TransferKind,
    pub handle: Option<u32>,
    pub remote_handle: Option<u32>,
    pub name: String,
    pub total_bytes: Option<u64>,
    pub committed_bytes: u64,
    pub temp_url: Option<PathBuf>,
    pub final_url: Option<PathBuf>,
    pub source_url: Option<PathBuf>,
    pub supports_partial: bool,
    pub etag: Option<Etag>,
    pub state: TransferState,
    pub last_error: Option<String>,
}

/// External collaborator interface (spec.md §4.8). Implementations must be
/// durable across process restarts and safe for concurrent use by multiple
/// session actors (one per device).
#[async_trait]
pub trait TransferJournal: Send + Sync {
    async fn begin_read(&self, record: TransferRecord) -> MtpResult<()>;
    async fn begin_write(&self, record: TransferRecord) -> MtpResult<()>;
    async fn update_progress(&self, id: &str, committed_bytes: u64) -> MtpResult<()>;
    async fn record_remote_handle(&self, id: &str, remote_handle: u32) -> MtpResult<()>;
    async fn record_throughput(&self, device_id: &str, bytes_per_sec: f64) -> MtpResult<()>;
    async fn complete(&self, id: &str) -> MtpResult<()>;
    async fn fail(&self, id: &str, error: &str) -> MtpResult<()>;
    async fn loadresumables(&self, device_id: &str) -> MtpResult<Vec<TransferRecord>>;
}

/// File-backed implementation: one JSON document per device under
/// `journal_root`, written atomically, indexed in memory with `dashmap` for
/// concurrent access by multiple session actors.
pub struct JsonFileJournal {
    root: PathBuf,
    /// device_id -> (record_id -> record), loaded lazily per device.
    cache: DashMap<String, HashMap<String, TransferRecord>>,
    write_lock: Mutex<()>,
}

impl JsonFileJournal {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, device_id: &str) -> PathBuf {
        self.root.join(format!("{device_id}.json"))
    }

    fn load_device(&self, device_id: &str) -> MtpResult<HashMap<String, TransferRecord>> {
        let path = self.path_for(device_id);
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| MtpError::Journal(format!("corrupt journal for {device_id}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(MtpError::LocalIo { source: e, path: Some(path) }),
        }
    }

    fn ensure_loaded(&self, device_id: &str) -> MtpResult<()> {
        if !self.cache.contains_key(device_id) {
            let loaded = self.load_device(device_id)?;
            self.cache.insert(device_id.to_string(), loaded);
        }
        Ok(())
    }

    fn persist(&self, device_id: &str) -> MtpResult<()> {
        let _guard = self.write_lock.lock();
        std::fs::create_dir_all(&self.root).map_err(|e| MtpError::LocalIo {
            source: e,
            path: Some(self.root.clone()),
        })?;
        let records = self
            .cache
            .get(device_id)
            .map(|r| r.clone())
            .unwrap_or_default();
        let json = serde_json::to_vec_pretty(&records)
            .map_err(|e| MtpError::Journal(format!("failed to serialize journal: {e}")))?;
        let final_path = self.path_for(device_id);
        let tmp_path = final_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| MtpError::LocalIo {
            source: e,
            path: Some(tmp_path.clone()),
        })?;
        std::fs::rename(&tmp_path, &final_path).map_err(|e| MtpError::LocalIo {
            source: e,
            path: Some(final_path),
        })
    }

    fn with_record_mut<F: FnOnce(&mut TransferRecord) -> MtpResult<()>>(
        &self,
        device_id: &str,
        id: &str,
        f: F,
    ) -> MtpResult<()> {
        self.ensure_loaded(device_id)?;
        {
            let mut device_records = self
                .cache
                .get_mut(device_id)
                .ok_or_else(|| MtpError::Journal(format!("no journal loaded for {device_id}")))?;
            let record = device_records
                .get_mut(id)
                .ok_or_else(|| MtpError::Journal(format!("no transfer record {id}")))?;
            f(record)?;
        }
        self.persist(device_id)
    }
}

#[async_trait]
impl TransferJournal for JsonFileJournal {
    async fn begin_read(&self, record: TransferRecord) -> MtpResult<()> {
        self.ensure_loaded(&record.device_id)?;
        let device_id = record.device_id.clone();
        self.cache
            .get_mut(&device_id)
            .unwrap()
            .insert(record.id.clone(), record);
        self.persist(&device_id)
    }

    async fn begin_write(&self, record: TransferRecord) -> MtpResult<()> {
        self.begin_read(record).await
    }

    async fn update_progress(&self, id: &str, committed_bytes: u64) -> MtpResult<()> {
        let device_id = self.device_id_for(id)?;
        self.with_record_mut(&device_id, id, |r| {
            r.committed_bytes = committed_bytes;
            Ok(())
        })
    }

    async fn record_remote_handle(&self, id: &str, remote_handle: u32) -> MtpResult<()> {
        let device_id = self.device_id_for(id)?;
        self.with_record_mut(&device_id, id, |r| {
            r.remote_handle = Some(remote_handle);
            Ok(())
        })
    }

    async fn record_throughput(&self, _device_id: &str, _bytes_per_sec: f64) -> MtpResult<()> {
        // Throughput samples feed the learned-profile store, not the
        // journal's own record shape; the session actor forwards these
        // directly to `LearnedProfileStore::record_observation`.
        Ok(())
    }

    async fn complete(&self, id: &str) -> MtpResult<()> {
        let device_id = self.device_id_for(id)?;
        self.with_record_mut(&device_id, id, |r| {
            r.state = TransferState::Succeeded;
            Ok(())
        })
    }

    async fn fail(&self, id: &str, error: &str) -> MtpResult<()> {
        let device_id = self.device_id_for(id)?;
        self.with_record_mut(&device_id, id, |r| {
            r.state = TransferState::Failed;
            r.last_error = Some(error.to_string());
            Ok(())
        })
    }

    async fn loadresumables(&self, device_id: &str) -> MtpResult<Vec<TransferRecord>> {
        self.ensure_loaded(device_id)?;
        Ok(self
            .cache
            .get(device_id)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default())
    }
}

impl JsonFileJournal {
    /// Journal records don't carry a secondary device index, so callers that
    /// only have an `id` must already know the device; this module-internal
    /// helper is used when only the record id is at hand (the public trait
    /// never needs it, since `begin_read`/`begin_write` take the full record).
    fn device_id_for(&self, id: &str) -> MtpResult<String> {
        for entry in self.cache.iter() {
            if entry.value().contains_key(id) {
                return Ok(entry.key().clone());
            }
        }
        Err(MtpError::Journal(format!("no transfer record {id} in any loaded device journal")))
    }
}

pub fn default_journal_root() -> MtpResult<PathBuf> {
    let base = dirs::data_dir().ok_or_else(|| {
        MtpError::Configuration("could not resolve a user data directory for the journal".to_string())
    })?;
    Ok(base.join("mtp-host").join("journal"))
}

/// Shared handle type used by session actors: one journal instance, many
/// devices.
pub type SharedJournal = Arc<dyn TransferJournal>;
