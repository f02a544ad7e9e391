//! Write recovery ladder (spec.md §4.6 "createFolder"/§4.7 "Write recovery
//! ladder", property P9): resolves a target folder, then drives
//! `SendObjectInfo`/`SendObject` through up to 12 rungs of escalating
//! workarounds before giving up.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tokio::fs::File;
use tracing::{debug, warn};

use crate::error::{MtpError, MtpResult};
use crate::journal::TransferRecord;
use crate::target_ladder::{self, ResolvedTarget};
use crate::transfer::write as xfer_write;
use crate::types::{Progress, TransferKind, TransferState};
use crate::wire::codes::ObjectFormatCode;
use crate::wire::object_info::{format_ptp_datetime, ObjectInfo};

use super::list;
use super::SessionActor;

/// A write left entirely to the ladder (no caller-chosen target), or pinned
/// to an explicit storage/parent the caller already resolved.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub storage_id: Option<u32>,
    pub parent: Option<u32>,
    pub source_path: PathBuf,
    pub dest_name: String,
    pub size: u64,
    pub object_format: u16,
}

/// Writes whose destination name carries this prefix are a connectivity
/// smoke test, not a real transfer; they run exactly once and never enter
/// the retry ladder (spec.md §4.7).
pub const LAB_SMOKE_PREFIX: &str = "swiftmtp-smoke-";

const MAX_RUNGS: usize = 12;
const MAX_CLIMBS: usize = 4;

/// Cumulative set of workarounds applied to the `SendObjectInfo` dataset and
/// the command-phase parent, one flag added per rung as the ladder escalates.
#[derive(Debug, Clone, Copy, Default)]
struct DatasetOverrides {
    format_undefined: bool,
    dataset_parent_zero: bool,
    unknown_size: bool,
    omit_optional_fields: bool,
    root_command_parent: bool,
    use_prop_list: bool,
}

pub(super) async fn execute_write(actor: &mut SessionActor, request: WriteRequest, progress: &Progress) -> MtpResult<u32> {
    let is_lab_smoke = request.dest_name.starts_with(LAB_SMOKE_PREFIX);

    // Lab-smoke writes characterize connectivity, not a real transfer; they
    // never enter the ladder, so there is nothing for reconciliation to clean
    // up and no journal record is opened for them.
    let transfer_id = if is_lab_smoke { None } else { Some(uuid::Uuid::new_v4().to_string()) };
    if let Some(id) = &transfer_id {
        let record = TransferRecord {
            id: id.clone(),
            device_id: actor.device_id.clone(),
            kind: TransferKind::Write,
            handle: None,
            remote_handle: None,
            name: request.dest_name.clone(),
            total_bytes: Some(request.size),
            committed_bytes: 0,
            temp_url: None,
            final_url: None,
            source_url: Some(request.source_path.clone()),
            supports_partial: false,
            etag: None,
            state: TransferState::Running,
            last_error: None,
        };
        if let Err(e) = actor.journal.begin_write(record).await {
            warn!(error = %e, "failed to open a journal record for this write, proceeding unjournaled");
        }
    }

    let result = run_ladder(actor, &request, progress, transfer_id.as_deref()).await;

    if let Some(id) = &transfer_id {
        match &result {
            Ok(_) => {
                let _ = actor.journal.complete(id).await;
            }
            Err(e) => {
                let _ = actor.journal.fail(id, &e.to_string()).await;
            }
        }
    }

    result
}

async fn run_ladder(
    actor: &mut SessionActor,
    request: &WriteRequest,
    progress: &Progress,
    transfer_id: Option<&str>,
) -> MtpResult<u32> {
    let is_lab_smoke = request.dest_name.starts_with(LAB_SMOKE_PREFIX);
    let deadline = tokio::time::Instant::now() + actor.policy.tuning.overall_deadline();

    let mut storage_id = match request.storage_id {
        Some(id) => id,
        None => actor
            .storages()
            .await?
            .into_iter()
            .find(|s| !s.read_only)
            .map(|s| s.storage_id)
            .ok_or_else(|| MtpError::PreconditionFailed("no writable storage available".to_string()))?,
    };

    let mut excluded_parents: HashSet<u32> = HashSet::new();
    let mut command_parent_was_root;
    let mut parent = match request.parent {
        Some(p) => {
            command_parent_was_root = p == 0 || p == 0xFFFFFFFF;
            p
        }
        None => {
            let preferred = actor.policy.tuning.flags.preferred_write_folder.clone();
            let target = resolve_target_async(actor, storage_id, preferred.as_deref(), &excluded_parents).await?;
            storage_id = target.storage_id;
            command_parent_was_root = false;
            target.parent_handle
        }
    };

    let mut overrides = DatasetOverrides::default();
    let mut climbs = 0usize;

    for rung in 0..MAX_RUNGS {
        if tokio::time::Instant::now() >= deadline {
            return Err(MtpError::DeadlineExceeded);
        }

        let file = File::open(&request.source_path)
            .await
            .map_err(|e| MtpError::LocalIo { source: e, path: Some(request.source_path.clone()) })?;

        let attempt = attempt_once(actor, storage_id, parent, request, overrides, file, progress, transfer_id).await;
        let err = match attempt {
            Ok(handle) => return Ok(handle),
            Err(e) => e,
        };

        if is_lab_smoke {
            return Err(err);
        }

        debug!(rung, error = %err, "write attempt failed, classifying for ladder advance");

        if err.is_transient() {
            tokio::time::sleep(Duration::from_millis(250)).await;
            continue;
        }

        if err.requires_hard_recovery() {
            hard_recover(actor).await?;
            if actor.policy.tuning.flags.write_to_subfolder_only {
                // Quirk-marked devices skip straight to climbing rather than
                // retrying the same parent after a hard reset.
                excluded_parents.insert(parent);
                climbs += 1;
                if climbs > MAX_CLIMBS {
                    return Err(MtpError::PreconditionFailed(
                        "exceeded maximum write-target climb attempts".to_string(),
                    ));
                }
                let target = resolve_target_async(actor, storage_id, None, &excluded_parents).await?;
                storage_id = target.storage_id;
                parent = target.parent_handle;
                command_parent_was_root = false;
                overrides = DatasetOverrides::default();
            }
            continue;
        }

        match &err {
            MtpError::InvalidParameter { .. } | MtpError::InvalidStorageId { .. } => {
                advance_dataset_rung(&mut overrides, actor, command_parent_was_root);
            }
            MtpError::ObjectNotFound { .. } => {
                // Stale parent/handle: refresh the cache entry and climb to
                // the next candidate rather than looping on the same parent.
                actor.parent_storage_cache.remove(&parent);
                excluded_parents.insert(parent);
                climbs += 1;
                if climbs > MAX_CLIMBS {
                    return Err(MtpError::PreconditionFailed(
                        "exceeded maximum write-target climb attempts".to_string(),
                    ));
                }
                let target = resolve_target_async(actor, storage_id, None, &excluded_parents).await?;
                storage_id = target.storage_id;
                parent = target.parent_handle;
                command_parent_was_root = false;
                overrides = DatasetOverrides::default();
            }
            _ => return Err(err),
        }
    }

    Err(MtpError::PreconditionFailed(
        "write recovery ladder exhausted without success".to_string(),
    ))
}

/// Advance to the next not-yet-tried dataset workaround, in spec.md §4.7
/// order: format-undefined, dataset-parent-zero (only when the command
/// parent was already root), unknown-size, omit-optional-fields,
/// root-command-parent, send-object-prop-list, then fall through to a target
/// climb.
fn advance_dataset_rung(overrides: &mut DatasetOverrides, actor: &SessionActor, command_parent_was_root: bool) {
    if !overrides.format_undefined {
        overrides.format_undefined = true;
    } else if !overrides.dataset_parent_zero && command_parent_was_root {
        overrides.dataset_parent_zero = true;
    } else if !overrides.unknown_size && actor.policy.tuning.flags.unknown_size_in_send_object_info {
        overrides.unknown_size = true;
    } else if !overrides.omit_optional_fields {
        overrides.omit_optional_fields = true;
    } else if !overrides.root_command_parent {
        overrides.root_command_parent = true;
    } else if !overrides.use_prop_list && actor.policy.tuning.flags.supports_send_object_prop_list {
        overrides.use_prop_list = true;
    }
    // Once every dataset workaround has been tried, the next failure falls
    // into the `_` arm above and climbs the target ladder instead.
}

async fn hard_recover(actor: &mut SessionActor) -> MtpResult<()> {
    warn!("write hit SessionNotOpen, running hard recovery");
    let _ = crate::link::ops::close_session(&actor.link).await;
    crate::link::ops::open_session(&actor.link, 1).await?;
    actor.parent_storage_cache.clear();
    Ok(())
}

/// Rung 4 (omit-optional-fields): drop `capture_date`/`modification_date`/
/// `keywords` by encoding them as empty PTP strings. Otherwise, stamp the
/// source file's real mtime so that rung has something to drop in the first
/// place (spec.md §4.7).
fn apply_optional_fields(dataset: &mut ObjectInfo, omit: bool, modified: Option<std::time::SystemTime>) {
    if omit {
        dataset.capture_date.clear();
        dataset.modification_date.clear();
        dataset.keywords.clear();
        return;
    }
    if let Some(modified) = modified {
        let stamp = format_ptp_datetime(modified);
        dataset.capture_date = stamp.clone();
        dataset.modification_date = stamp;
    }
}

async fn attempt_once(
    actor: &SessionActor,
    storage_id: u32,
    parent: u32,
    request: &WriteRequest,
    overrides: DatasetOverrides,
    file: File,
    progress: &Progress,
    transfer_id: Option<&str>,
) -> MtpResult<u32> {
    let command_parent = if overrides.root_command_parent { 0xFFFFFFFF } else { parent };
    let dataset_parent = if overrides.dataset_parent_zero { 0 } else { parent };
    let format = if overrides.format_undefined {
        ObjectFormatCode::Undefined.into()
    } else {
        request.object_format
    };
    let size = if overrides.unknown_size { 0xFFFF_FFFF } else { request.size as u32 };

    let mut dataset = ObjectInfo::for_new_file(storage_id, dataset_parent, format, size, &request.dest_name);
    let modified = if overrides.omit_optional_fields { None } else { file.metadata().await.ok().and_then(|m| m.modified().ok()) };
    apply_optional_fields(&mut dataset, overrides.omit_optional_fields, modified);

    if overrides.use_prop_list {
        return send_via_prop_list(actor, storage_id, command_parent, &dataset, file, request.size, progress, transfer_id).await;
    }

    let result = xfer_write::send_object_info(&actor.link, storage_id, command_parent, &dataset).await?;
    if let Some(id) = transfer_id {
        let _ = actor.journal.record_remote_handle(id, result.new_handle).await;
    }
    xfer_write::send_object_whole(&actor.link, file, request.size, progress).await?;
    Ok(result.new_handle)
}

/// Rung 6: `SendObjectPropList` instead of `SendObjectInfo`, for devices
/// that reject the classic dataset but support the PTP-vendor-extension
/// property-list variant.
async fn send_via_prop_list(
    actor: &SessionActor,
    storage_id: u32,
    command_parent: u32,
    dataset: &ObjectInfo,
    file: File,
    size: u64,
    progress: &Progress,
    transfer_id: Option<&str>,
) -> MtpResult<u32> {
    use crate::wire::codes::OperationCode;
    use crate::wire::prop_list::send_object_prop_list_minimal;

    let payload = send_object_prop_list_minimal(storage_id, command_parent, &dataset.filename, dataset.object_format, size)?;
    let mut offset = 0usize;
    let mut producer = |buf: &mut [u8]| -> MtpResult<usize> {
        let remaining = &payload[offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        offset += n;
        Ok(n)
    };
    let result = actor
        .link
        .execute_streaming_command(
            OperationCode::SendObjectPropList.into(),
            &[storage_id, command_parent, dataset.object_format as u32, size as u32, 0],
            Some(payload.len() as u64),
            Some(&mut producer),
            None,
        )
        .await?;
    let new_handle = *result.params.first().ok_or_else(|| {
        MtpError::ProtocolError("SendObjectPropList response carried no new object handle".to_string())
    })?;
    if let Some(id) = transfer_id {
        let _ = actor.journal.record_remote_handle(id, new_handle).await;
    }
    xfer_write::send_object_whole(&actor.link, file, size, progress).await?;
    Ok(new_handle)
}

/// Async-native twin of [`target_ladder::resolve_write_target`]: the pure
/// module's [`target_ladder::FolderLister`] seam is deliberately synchronous
/// so C9 stays unit-testable without I/O, but the session actor only has an
/// async link — so this walks the identical preference order against
/// `list::list_objects` instead of bridging to that trait.
async fn resolve_target_async(
    actor: &mut SessionActor,
    storage_id: u32,
    preferred: Option<&str>,
    excluding: &HashSet<u32>,
) -> MtpResult<ResolvedTarget> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(p) = preferred {
        candidates.push(p);
    }
    candidates.extend_from_slice(target_ladder::PREFERENCE_ORDER);

    for candidate in candidates {
        if let Some(handle) = resolve_existing_path(actor, storage_id, candidate, excluding).await? {
            return Ok(ResolvedTarget { storage_id, parent_handle: handle });
        }
    }

    let handle = actor
        .create_folder(storage_id, None, target_ladder::FALLBACK_FOLDER_NAME)
        .await?;
    Ok(ResolvedTarget { storage_id, parent_handle: handle })
}

async fn resolve_existing_path(
    actor: &mut SessionActor,
    storage_id: u32,
    path: &str,
    excluding: &HashSet<u32>,
) -> MtpResult<Option<u32>> {
    let mut parent: Option<u32> = None;
    for (i, segment) in path.split('/').enumerate() {
        target_ladder::sanitize_component(segment)?;
        let children = list::list_objects(actor, storage_id, parent).await?;
        let handle = children
            .iter()
            .find(|c| c.name == segment)
            .or_else(|| children.iter().find(|c| c.name.eq_ignore_ascii_case(segment)))
            .map(|c| c.handle);
        match handle {
            Some(h) if !(i == 0 && excluding.contains(&h)) => parent = Some(h),
            _ => return Ok(None),
        }
    }
    Ok(parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DevicePolicy, EffectiveTuning};
    use crate::journal::JsonFileJournal;
    use crate::transport::mock::MockTransport;
    use crate::types::{DeviceInfo, InterfaceDescriptor};
    use crate::wire::container::ParamContainer;
    use crate::wire::ContainerType;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn descriptor() -> InterfaceDescriptor {
        InterfaceDescriptor {
            interface_number: 0,
            class: 6,
            subclass: 1,
            protocol: 1,
            bulk_in_ep: 0x81,
            bulk_out_ep: 0x01,
            interrupt_in_ep: Some(0x82),
        }
    }

    fn test_actor(mock: Arc<MockTransport>) -> (SessionActor, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let link = crate::link::PtpLink::new(mock, 1000);
        let actor = SessionActor {
            link,
            policy: DevicePolicy::from_tuning(EffectiveTuning::baseline()),
            device_info: DeviceInfo {
                manufacturer: "Acme".to_string(),
                model: "Phone".to_string(),
                firmware_version: "1.0".to_string(),
                serial_number: None,
                supported_operations: vec![],
                supported_events: vec![],
                supported_object_formats: vec![],
            },
            device_id: "dev1".to_string(),
            event_pump: None,
            event_pump_shutdown: None,
            journal: Arc::new(JsonFileJournal::new(dir.path())),
            profile_store: Arc::new(crate::profile::LearnedProfileStore::new(dir.path())),
            storages_ready: false,
            parent_storage_cache: std::collections::HashMap::new(),
            prop_list_disabled: false,
            activity: crate::transfer::ActivityTracker::new(),
        };
        (actor, dir)
    }

    fn response(mock: &MockTransport, code: u16, txid: u32, params: Vec<u32>) {
        let resp = ParamContainer { kind: ContainerType::Response, code, txid, params };
        mock.push_inbound(resp.encode().unwrap());
    }

    #[tokio::test]
    async fn write_to_explicit_target_succeeds_on_first_attempt() {
        let mock = Arc::new(MockTransport::new(descriptor()));
        response(&mock, 0x2001, 1, vec![1, 0xFFFFFFFF, 777]); // SendObjectInfo
        response(&mock, 0x2001, 2, vec![]); // SendObject

        let (mut actor, dir) = test_actor(mock);
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let request = WriteRequest {
            storage_id: Some(1),
            parent: Some(0xFFFFFFFF),
            source_path: path,
            dest_name: "a.txt".to_string(),
            size: 5,
            object_format: 0x3000,
        };
        let progress = Progress::new(Some(5));
        let handle = execute_write(&mut actor, request, &progress).await.unwrap();
        assert_eq!(handle, 777);
    }

    #[tokio::test]
    async fn invalid_parameter_advances_to_format_undefined_rung() {
        let mock = Arc::new(MockTransport::new(descriptor()));
        // First SendObjectInfo attempt: rejected as InvalidParameterValue.
        response(&mock, 0x201D, 1, vec![]);
        // Second attempt (format-undefined rung) succeeds.
        response(&mock, 0x2001, 2, vec![1, 0xFFFFFFFF, 42]);
        response(&mock, 0x2001, 3, vec![]);

        let (mut actor, dir) = test_actor(mock);
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"hi").await.unwrap();

        let request = WriteRequest {
            storage_id: Some(1),
            parent: Some(0xFFFFFFFF),
            source_path: path,
            dest_name: "a.txt".to_string(),
            size: 2,
            object_format: 0x3000,
        };
        let progress = Progress::new(Some(2));
        let handle = execute_write(&mut actor, request, &progress).await.unwrap();
        assert_eq!(handle, 42);
    }

    #[tokio::test]
    async fn lab_smoke_write_is_never_retried() {
        let mock = Arc::new(MockTransport::new(descriptor()));
        response(&mock, 0x201D, 1, vec![]);

        let (mut actor, dir) = test_actor(mock);
        let path = dir.path().join("probe.bin");
        tokio::fs::write(&path, b"x").await.unwrap();

        let request = WriteRequest {
            storage_id: Some(1),
            parent: Some(0xFFFFFFFF),
            source_path: path,
            dest_name: format!("{LAB_SMOKE_PREFIX}abc123"),
            size: 1,
            object_format: 0x3000,
        };
        let progress = Progress::new(Some(1));
        let err = execute_write(&mut actor, request, &progress).await.unwrap_err();
        assert!(matches!(err, MtpError::InvalidParameter { .. }));
    }

    #[tokio::test]
    async fn successful_write_records_remote_handle_and_completes_the_journal() {
        use crate::journal::TransferJournal;
        use crate::types::{TransferKind, TransferState};

        let mock = Arc::new(MockTransport::new(descriptor()));
        response(&mock, 0x2001, 1, vec![1, 0xFFFFFFFF, 777]); // SendObjectInfo
        response(&mock, 0x2001, 2, vec![]); // SendObject

        let (mut actor, dir) = test_actor(mock);
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let request = WriteRequest {
            storage_id: Some(1),
            parent: Some(0xFFFFFFFF),
            source_path: path,
            dest_name: "a.txt".to_string(),
            size: 5,
            object_format: 0x3000,
        };
        let progress = Progress::new(Some(5));
        execute_write(&mut actor, request, &progress).await.unwrap();

        let records = actor.journal.loadresumables("dev1").await.unwrap();
        let record = records.iter().find(|r| r.kind == TransferKind::Write).unwrap();
        assert_eq!(record.remote_handle, Some(777));
        assert_eq!(record.state, TransferState::Succeeded);
    }

    #[test]
    fn omit_optional_fields_rung_clears_dataset_dates_and_keywords() {
        let mut dataset = ObjectInfo::for_new_file(1, 0xFFFFFFFF, 0x3000, 2, "a.txt");
        dataset.capture_date = "20260101T000000".to_string();
        dataset.modification_date = "20260101T000000".to_string();
        dataset.keywords = "vacation".to_string();

        apply_optional_fields(&mut dataset, true, Some(std::time::SystemTime::now()));

        assert_eq!(dataset.capture_date, "");
        assert_eq!(dataset.modification_date, "");
        assert_eq!(dataset.keywords, "");
    }

    #[test]
    fn non_omitted_rung_stamps_real_modification_date() {
        let mut dataset = ObjectInfo::for_new_file(1, 0xFFFFFFFF, 0x3000, 2, "a.txt");
        let modified = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);

        apply_optional_fields(&mut dataset, false, Some(modified));

        assert!(!dataset.modification_date.is_empty());
        assert_eq!(dataset.capture_date, dataset.modification_date);
        assert!(dataset.keywords.is_empty());
    }
}
