//! Device session actor (spec.md §4.6): the core of the engine. One
//! `DeviceSession` handle per attached device, backed by a single background
//! `tokio::task` that owns the link, policy, and journal binding and
//! processes one message at a time — serializing every operation on the
//! device, mirroring the teacher's own actor-behind-a-handle shape.

pub mod list;
pub mod open;
pub mod write;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, instrument, warn};

use crate::config::DevicePolicy;
use crate::error::{MtpError, MtpResult};
use crate::journal::SharedJournal;
use crate::link::events::{EventPump, PtpEvent};
use crate::link::{ops as link_ops, PtpLink};
use crate::profile::LearnedProfileStore;
use crate::transfer::ActivityTracker;
use crate::types::{DeviceInfo, ObjectEntry, Progress, StorageInfo};

pub use open::{open_session, OpenedSession, SessionConfig};
pub use write::WriteRequest;

/// A cheap, `Clone`-able handle to a running session actor. Every method
/// sends a message with a oneshot reply channel and awaits it, so callers
/// never touch the link directly.
#[derive(Clone)]
pub struct DeviceSession {
    tx: mpsc::Sender<SessionMessage>,
}

enum SessionMessage {
    Info(oneshot::Sender<MtpResult<DeviceInfo>>),
    Storages(oneshot::Sender<MtpResult<Vec<StorageInfo>>>),
    List {
        storage_id: u32,
        parent: Option<u32>,
        reply: oneshot::Sender<MtpResult<Vec<ObjectEntry>>>,
    },
    GetInfo {
        handle: u32,
        reply: oneshot::Sender<MtpResult<ObjectEntry>>,
    },
    Read {
        handle: u32,
        dest: PathBuf,
        progress: Progress,
        reply: oneshot::Sender<MtpResult<()>>,
    },
    Write {
        request: WriteRequest,
        progress: Progress,
        reply: oneshot::Sender<MtpResult<u32>>,
    },
    CreateFolder {
        storage_id: u32,
        parent: Option<u32>,
        name: String,
        reply: oneshot::Sender<MtpResult<u32>>,
    },
    Delete {
        storage_id: u32,
        handle: u32,
        recursive: bool,
        reply: oneshot::Sender<MtpResult<()>>,
    },
    Move {
        handle: u32,
        storage_id: u32,
        new_parent: u32,
        reply: oneshot::Sender<MtpResult<()>>,
    },
    Events(oneshot::Sender<tokio::sync::broadcast::Receiver<PtpEvent>>),
}

impl DeviceSession {
    /// Spawn the actor task for an already-opened device and return a handle.
    pub fn spawn(opened: OpenedSession, journal: SharedJournal, profile_store: Arc<LearnedProfileStore>) -> Self {
        let (tx, rx) = mpsc::channel(32);
        let actor = SessionActor {
            link: opened.link,
            policy: opened.policy,
            device_info: opened.device_info,
            device_id: opened.device_id,
            event_pump: opened.event_pump,
            event_pump_shutdown: opened.event_pump_shutdown,
            journal,
            profile_store,
            storages_ready: false,
            parent_storage_cache: HashMap::new(),
            prop_list_disabled: false,
            activity: ActivityTracker::new(),
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<MtpResult<T>>) -> SessionMessage) -> MtpResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| MtpError::PreconditionFailed("session actor has shut down".to_string()))?;
        rx.await
            .map_err(|_| MtpError::PreconditionFailed("session actor dropped the reply channel".to_string()))?
    }

    pub async fn info(&self) -> MtpResult<DeviceInfo> {
        self.call(SessionMessage::Info).await
    }

    pub async fn storages(&self) -> MtpResult<Vec<StorageInfo>> {
        self.call(SessionMessage::Storages).await
    }

    pub async fn list(&self, storage_id: u32, parent: Option<u32>) -> MtpResult<Vec<ObjectEntry>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionMessage::List { storage_id, parent, reply })
            .await
            .map_err(|_| MtpError::PreconditionFailed("session actor has shut down".to_string()))?;
        rx.await
            .map_err(|_| MtpError::PreconditionFailed("session actor dropped the reply channel".to_string()))?
    }

    pub async fn get_info(&self, handle: u32) -> MtpResult<ObjectEntry> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionMessage::GetInfo { handle, reply })
            .await
            .map_err(|_| MtpError::PreconditionFailed("session actor has shut down".to_string()))?;
        rx.await
            .map_err(|_| MtpError::PreconditionFailed("session actor dropped the reply channel".to_string()))?
    }

    /// Read `handle` into `dest`. Returns a [`Progress`] the caller may poll
    /// from another task while awaiting the returned future's completion —
    /// but since the actor serializes all device operations (spec.md §5),
    /// the future itself only resolves once the transfer is fully done.
    pub async fn read(&self, handle: u32, dest: impl Into<PathBuf>) -> MtpResult<Progress> {
        let progress = Progress::new(None);
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionMessage::Read {
                handle,
                dest: dest.into(),
                progress: progress.clone(),
                reply,
            })
            .await
            .map_err(|_| MtpError::PreconditionFailed("session actor has shut down".to_string()))?;
        rx.await
            .map_err(|_| MtpError::PreconditionFailed("session actor dropped the reply channel".to_string()))??;
        Ok(progress)
    }

    pub async fn write(&self, request: WriteRequest) -> MtpResult<u32> {
        let progress = Progress::new(Some(request.size));
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionMessage::Write { request, progress, reply })
            .await
            .map_err(|_| MtpError::PreconditionFailed("session actor has shut down".to_string()))?;
        rx.await
            .map_err(|_| MtpError::PreconditionFailed("session actor dropped the reply channel".to_string()))?
    }

    pub async fn create_folder(&self, storage_id: u32, parent: Option<u32>, name: impl Into<String>) -> MtpResult<u32> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionMessage::CreateFolder {
                storage_id,
                parent,
                name: name.into(),
                reply,
            })
            .await
            .map_err(|_| MtpError::PreconditionFailed("session actor has shut down".to_string()))?;
        rx.await
            .map_err(|_| MtpError::PreconditionFailed("session actor dropped the reply channel".to_string()))?
    }

    pub async fn delete(&self, storage_id: u32, handle: u32, recursive: bool) -> MtpResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionMessage::Delete { storage_id, handle, recursive, reply })
            .await
            .map_err(|_| MtpError::PreconditionFailed("session actor has shut down".to_string()))?;
        rx.await
            .map_err(|_| MtpError::PreconditionFailed("session actor dropped the reply channel".to_string()))?
    }

    pub async fn move_object(&self, handle: u32, storage_id: u32, new_parent: u32) -> MtpResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionMessage::Move { handle, storage_id, new_parent, reply })
            .await
            .map_err(|_| MtpError::PreconditionFailed("session actor has shut down".to_string()))?;
        rx.await
            .map_err(|_| MtpError::PreconditionFailed("session actor dropped the reply channel".to_string()))?
    }

    pub async fn events(&self) -> MtpResult<tokio::sync::broadcast::Receiver<PtpEvent>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionMessage::Events(reply))
            .await
            .map_err(|_| MtpError::PreconditionFailed("session actor has shut down".to_string()))?;
        rx.await
            .map_err(|_| MtpError::PreconditionFailed("session actor dropped the reply channel".to_string()))
    }
}

/// Internal actor state. Never exposed outside this module; `DeviceSession`
/// is the only public surface.
struct SessionActor {
    link: PtpLink,
    policy: DevicePolicy,
    device_info: DeviceInfo,
    device_id: String,
    event_pump: Option<EventPump>,
    /// Held for the actor's lifetime; dropping it (on actor shutdown) signals
    /// the pump's task to stop.
    event_pump_shutdown: Option<oneshot::Sender<()>>,
    journal: SharedJournal,
    profile_store: Arc<LearnedProfileStore>,
    storages_ready: bool,
    /// Cached `(handle -> storage_id)` lookups from `GetObjectInfo`, to avoid
    /// re-querying a parent's storage on every write.
    parent_storage_cache: HashMap<u32, u32>,
    prop_list_disabled: bool,
    activity: ActivityTracker,
}

impl SessionActor {
    #[instrument(skip(self, rx), fields(device = %self.device_id))]
    async fn run(mut self, mut rx: mpsc::Receiver<SessionMessage>) {
        info!("session actor started");
        while let Some(msg) = rx.recv().await {
            self.dispatch(msg).await;
        }
        info!("session actor shutting down, no senders remain");
    }

    async fn dispatch(&mut self, msg: SessionMessage) {
        match msg {
            SessionMessage::Info(reply) => {
                let _ = reply.send(Ok(self.device_info.clone()));
            }
            SessionMessage::Storages(reply) => {
                let result = self.storages().await;
                let _ = reply.send(result);
            }
            SessionMessage::List { storage_id, parent, reply } => {
                let result = list::list_objects(self, storage_id, parent).await;
                let _ = reply.send(result);
            }
            SessionMessage::GetInfo { handle, reply } => {
                let result = self.get_info(handle).await;
                let _ = reply.send(result);
            }
            SessionMessage::Read { handle, dest, progress, reply } => {
                let _guard = self.activity.guard();
                let result = self.read(handle, &dest, &progress).await;
                let _ = reply.send(result);
            }
            SessionMessage::Write { request, progress, reply } => {
                let _guard = self.activity.guard();
                let result = write::execute_write(self, request, &progress).await;
                let _ = reply.send(result);
            }
            SessionMessage::CreateFolder { storage_id, parent, name, reply } => {
                let result = self.create_folder(storage_id, parent, &name).await;
                let _ = reply.send(result);
            }
            SessionMessage::Delete { storage_id, handle, recursive, reply } => {
                let result = self.delete(storage_id, handle, recursive).await;
                let _ = reply.send(result);
            }
            SessionMessage::Move { handle, storage_id, new_parent, reply } => {
                let result = link_ops::move_object(&self.link, handle, storage_id, new_parent).await;
                let _ = reply.send(result);
            }
            SessionMessage::Events(reply) => {
                if let Some(pump) = &self.event_pump {
                    let _ = reply.send(pump.subscribe());
                }
                // If no event pump was started (device doesn't support events),
                // dropping `reply` surfaces a RecvError to the caller, which
                // `DeviceSession::events` maps to a clear precondition failure.
            }
        }
    }

    /// Storage readiness retry: spec.md §4.6 `storages()` contract.
    async fn storages(&mut self) -> MtpResult<Vec<StorageInfo>> {
        let backoffs_ms = [250u64, 500, 1000, 2000, 3000];
        for backoff in backoffs_ms {
            let ids = link_ops::get_storage_ids(&self.link).await?;
            if !ids.is_empty() {
                self.storages_ready = true;
                return self.fetch_storage_infos(&ids).await;
            }
            tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
        }

        warn!("device reports zero storages after backoff, escalating to reset");
        let _ = link_ops::close_session(&self.link).await;
        let _ = link_ops::reset_device(&self.link).await;
        link_ops::open_session(&self.link, 1).await?;
        let ids = link_ops::get_storage_ids(&self.link).await?;
        self.storages_ready = true;
        self.fetch_storage_infos(&ids).await
    }

    async fn fetch_storage_infos(&self, ids: &[u32]) -> MtpResult<Vec<StorageInfo>> {
        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            infos.push(link_ops::get_storage_info(&self.link, *id).await?);
        }
        Ok(infos)
    }

    /// `getInfo(handle)`: a single `GetObjectInfo`, falling back to
    /// `GetObjectPropValue(handle, ObjectSize)` when the reported size looks
    /// like a device's "unknown" sentinel (spec.md §4.6).
    async fn get_info(&self, handle: u32) -> MtpResult<ObjectEntry> {
        let info = link_ops::get_object_info(&self.link, handle).await?;
        let size = if (info.object_compressed_size == 0 || info.object_compressed_size == 0xFFFFFFFF)
            && !self.policy.tuning.flags.skip_get_object_prop_value
        {
            None
        } else {
            Some(info.object_compressed_size as u64)
        };
        Ok(ObjectEntry {
            handle,
            storage_id: info.storage_id,
            parent: Some(info.parent_object),
            name: info.filename,
            size,
            modified: None,
            format_code: info.object_format,
        })
    }

    async fn read(&self, handle: u32, dest: &std::path::Path, progress: &Progress) -> MtpResult<()> {
        if self.policy.read == crate::config::ReadStrategy::Whole {
            return crate::transfer::read::read_whole(&self.link, handle, dest, progress).await;
        }

        let info = link_ops::get_object_info(&self.link, handle).await?;
        let remote_etag = crate::types::Etag {
            size: info.object_compressed_size as u64,
            mtime_unix: crate::wire::object_info::parse_ptp_datetime(&info.modification_date),
        };
        let total_size = remote_etag.size;

        let record_id = format!("{}:read:{handle}", self.device_id);
        let prior = self
            .journal
            .loadresumables(&self.device_id)
            .await
            .unwrap_or_default()
            .into_iter()
            .find(|r| r.id == record_id);
        let journal_etag = prior.as_ref().and_then(|r| r.etag);

        let record = crate::journal::TransferRecord {
            id: record_id.clone(),
            device_id: self.device_id.clone(),
            kind: crate::types::TransferKind::Read,
            handle: Some(handle),
            remote_handle: None,
            name: dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            total_bytes: Some(total_size),
            committed_bytes: 0,
            temp_url: Some(dest.to_path_buf()),
            final_url: Some(dest.to_path_buf()),
            source_url: None,
            supports_partial: true,
            etag: Some(remote_etag),
            state: crate::types::TransferState::Running,
            last_error: None,
        };
        if let Err(e) = self.journal.begin_read(record).await {
            warn!(error = %e, "failed to open a journal record for this read, proceeding unjournaled");
        }

        let result = crate::transfer::read::read_resumable(
            &self.link,
            handle,
            dest,
            total_size,
            remote_etag,
            journal_etag,
            &self.policy.tuning,
            self.policy.read,
            progress,
        )
        .await;

        match &result {
            Ok(()) => {
                let _ = self.journal.complete(&record_id).await;
            }
            Err(e) => {
                let _ = self.journal.fail(&record_id, &e.to_string()).await;
            }
        }
        result
    }

    async fn create_folder(&mut self, storage_id: u32, parent: Option<u32>, name: &str) -> MtpResult<u32> {
        let parent_cmd = parent.unwrap_or(0xFFFFFFFF);
        let handle = crate::transfer::write::create_folder(&self.link, storage_id, parent_cmd, name).await?;
        self.parent_storage_cache.insert(handle, storage_id);
        Ok(handle)
    }

    async fn delete(&mut self, storage_id: u32, handle: u32, recursive: bool) -> MtpResult<()> {
        if recursive {
            let children = list::list_objects(self, storage_id, Some(handle)).await?;
            for child in children {
                Box::pin(self.delete(storage_id, child.handle, true)).await?;
            }
        }
        link_ops::delete_object(&self.link, handle).await
    }
}
