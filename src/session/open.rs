//! The open-if-needed sequence (spec.md §4.6): fingerprint the device,
//! resolve an initial policy, open the PTP session with its reset/reopen
//! ladder, then re-probe real capabilities and rebuild the policy before
//! handing control to the actor loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{DevicePolicy, EffectiveTuning, EnvOverrides, Phase};
use crate::error::{MtpError, MtpResult};
use crate::journal::SharedJournal;
use crate::link::events::EventPump;
use crate::link::{ops as link_ops, PtpLink};
use crate::profile::LearnedProfileStore;
use crate::quirks::policy::{merge, CapabilityProbe};
use crate::quirks::QuirkDatabase;
use crate::transport::TransportOpener;
use crate::types::{DeviceFingerprint, DeviceInfo, DeviceSummary, ProbeReceipt};
use crate::wire::codes::OperationCode;

/// Shared collaborators every session on this host draws from, independent
/// of which physical device is being opened.
pub struct SessionConfig {
    pub opener: Arc<dyn TransportOpener>,
    pub journal: SharedJournal,
    pub profile_store: Arc<LearnedProfileStore>,
    pub quirk_db: QuirkDatabase,
    pub overrides: EnvOverrides,
}

/// Everything [`super::DeviceSession::spawn`] needs to start the actor loop.
pub struct OpenedSession {
    pub link: PtpLink,
    pub policy: DevicePolicy,
    pub device_info: DeviceInfo,
    pub device_id: String,
    pub event_pump: Option<EventPump>,
    /// Held by the actor for as long as it runs; dropping it signals the
    /// event pump's shutdown select arm, so no explicit stop message exists.
    pub event_pump_shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    pub probe: ProbeReceipt,
}

/// Run the full open sequence against a freshly enumerated device.
pub async fn open_session(config: &SessionConfig, summary: &DeviceSummary) -> MtpResult<OpenedSession> {
    let fingerprint = DeviceFingerprint::from_summary(summary);
    let device_id = fingerprint.as_key();

    let quirk = if config.overrides.strict {
        None
    } else {
        config.quirk_db.match_device(&fingerprint)
    };
    let learned = if config.overrides.strict {
        None
    } else {
        config.profile_store.load(&device_id)?
    };

    let mut tuning = merge(CapabilityProbe::default(), learned.as_ref(), quirk, &config.overrides);
    let mut policy = DevicePolicy::from_tuning(tuning.clone());

    let boxed_transport = config.opener.open(summary, policy.tuning.io_timeout_ms).await?;
    let transport: Arc<dyn crate::transport::UsbTransport> = Arc::from(boxed_transport);
    let mut link = PtpLink::new(transport.clone(), policy.tuning.io_timeout_ms);

    run_hooks(&policy.tuning, Phase::PostOpenUsb).await;

    // Preemptive close: some devices refuse OpenSession while a stale session
    // from a previous, uncleanly-terminated host process is still open.
    let _ = link_ops::close_session(&link).await;

    open_with_retry(&link, &policy.tuning).await?;

    tokio::time::sleep(Duration::from_millis(policy.tuning.stabilize_ms)).await;
    run_hooks(&policy.tuning, Phase::PostOpenSession).await;

    let device_info = link_ops::get_device_info(&link).await?;
    let capabilities = CapabilityProbe {
        partial_read_32: device_info.supports_operation(OperationCode::GetPartialObject.into()),
        partial_read_64: device_info.supports_operation(OperationCode::GetPartialObject64.into()),
        partial_write: device_info.supports_operation(OperationCode::SendPartialObject.into()),
        supports_events: !device_info.supported_events.is_empty(),
        supports_prop_list: device_info.supports_operation(OperationCode::GetObjectPropList.into()),
    };

    tuning = merge(capabilities, learned.as_ref(), quirk, &config.overrides);
    policy = DevicePolicy::from_tuning(tuning.clone());
    link.set_io_timeout_ms(policy.tuning.io_timeout_ms);

    let probe = ProbeReceipt {
        fingerprint_key: device_id.clone(),
        matched_quirk_id: quirk.map(|q| q.id.clone()),
        resolved_max_chunk_bytes: policy.tuning.max_chunk_bytes,
        resolved_io_timeout_ms: policy.tuning.io_timeout_ms,
        supports_get_object_prop_list: policy.tuning.flags.supports_get_object_prop_list,
        supports_get_partial_object: policy.tuning.flags.supports_get_partial_object,
        supports_get_partial_object64: policy.tuning.flags.supports_get_partial_object64,
        supports_send_partial_object: policy.tuning.flags.supports_send_partial_object,
        supports_send_object_prop_list: policy.tuning.flags.supports_send_object_prop_list,
    };

    config.profile_store.record_observation(&device_id, &policy.tuning)?;

    let (event_pump, event_pump_shutdown) = if capabilities.supports_events {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (Some(EventPump::start(transport, policy.tuning.io_timeout_ms, rx)), Some(tx))
    } else {
        (None, None)
    };

    reconcile_orphaned_writes(config, &link, &device_id).await;

    info!(device = %device_id, model = %device_info.model, "session opened");
    Ok(OpenedSession {
        link,
        policy,
        device_info,
        device_id,
        event_pump,
        event_pump_shutdown,
        probe,
    })
}

async fn run_hooks(tuning: &EffectiveTuning, phase: Phase) {
    for hook in tuning.hooks_for(phase) {
        if let Some(ms) = hook.delay_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

/// `OpenSession`, retried once on `SessionAlreadyOpen` (closing first), and
/// escalated to a reset+reopen ladder on timeout or IO error when the
/// resolved policy carries `resetReopenOnOpenSessionIOError`.
async fn open_with_retry(link: &PtpLink, tuning: &EffectiveTuning) -> MtpResult<()> {
    match link_ops::open_session(link, 1).await {
        Ok(()) => Ok(()),
        Err(MtpError::SessionAlreadyOpen { .. }) => {
            debug!("device reports a session already open, closing and retrying once");
            let _ = link_ops::close_session(link).await;
            link_ops::open_session(link, 1).await
        }
        Err(e) if (matches!(e, MtpError::Timeout { .. } | MtpError::TransportIo(_)))
            && tuning.flags.reset_reopen_on_open_session_io_error =>
        {
            warn!(error = %e, "OpenSession failed, resetting device and retrying");
            let _ = link_ops::reset_device(link).await;
            link_ops::open_session(link, 1).await
        }
        Err(e) => Err(e),
    }
}

/// Partial-write reconciliation (spec.md §4.6 step 11, property P5): for
/// every journal record left `Running` by a previous process with a known
/// `remote_handle`, probe the device. If the object is gone, the prior write
/// already got cleaned up (by the device or a previous run) and the record
/// is just marked failed. If it is still there but smaller than the
/// transfer's declared total, the partial object is deleted outright — a
/// half-written file is worse than no file, since nothing else in the engine
/// will ever resume a write, only a read.
async fn reconcile_orphaned_writes(config: &SessionConfig, link: &PtpLink, device_id: &str) {
    let records = match config.journal.loadresumables(device_id).await {
        Ok(records) => records,
        Err(e) => {
            warn!(device = device_id, error = %e, "failed to load journal for reconciliation");
            return;
        }
    };

    for record in records {
        if record.kind != crate::types::TransferKind::Write || record.state != crate::types::TransferState::Running {
            continue;
        }
        let Some(handle) = record.remote_handle else {
            continue;
        };

        match link_ops::get_object_info(link, handle).await {
            Ok(info) => {
                let expected = record.total_bytes.unwrap_or(u64::MAX);
                if (info.object_compressed_size as u64) < expected {
                    match link_ops::delete_object(link, handle).await {
                        Ok(()) => {
                            info!(device = device_id, handle, "deleted orphaned partial write from a prior run");
                        }
                        Err(e) => {
                            warn!(device = device_id, handle, error = %e, "failed to delete orphaned partial write");
                        }
                    }
                }
            }
            Err(MtpError::ObjectNotFound { .. }) => {
                debug!(device = device_id, handle, "orphaned write's remote object no longer exists, treating as cleaned");
            }
            Err(e) => {
                warn!(device = device_id, handle, error = %e, "failed to probe orphaned write for reconciliation");
                continue;
            }
        }

        let _ = config.journal.fail(&record.id, "orphaned write reconciled on session open").await;
    }
}
