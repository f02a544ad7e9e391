//! The five-layer policy merge (spec.md §4.4 / property P7): baseline
//! defaults ← capability probe ← learned profile ← matched quirk ← user
//! overrides. Implemented as a pure function so the merge is deterministic
//! and independently testable.

use crate::config::{EffectiveTuning, EnvOverrides, FeatureFlags};
use crate::profile::LearnedProfile;

use super::QuirkEntry;

/// Capability-probe results, layer 2 of the merge (spec.md §4.6 step 8).
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityProbe {
    pub partial_read_32: bool,
    pub partial_read_64: bool,
    pub partial_write: bool,
    pub supports_events: bool,
    pub supports_prop_list: bool,
}

impl CapabilityProbe {
    fn apply(&self, flags: &mut FeatureFlags) {
        flags.supports_get_partial_object = self.partial_read_32;
        flags.supports_get_partial_object64 = self.partial_read_64;
        flags.supports_send_partial_object = self.partial_write;
        flags.supports_get_object_prop_list = self.supports_prop_list;
    }
}

/// Run the full merge, in spec order. `quirk` and `learned` are `None` under
/// `MTP_STRICT`; `overrides.safe` clamps at the very end.
pub fn merge(
    capabilities: CapabilityProbe,
    learned: Option<&LearnedProfile>,
    quirk: Option<&QuirkEntry>,
    overrides: &EnvOverrides,
) -> EffectiveTuning {
    let mut tuning = EffectiveTuning::baseline();

    capabilities.apply(&mut tuning.flags);

    if let Some(p) = learned {
        p.apply(&mut tuning);
    }

    if let Some(q) = quirk {
        apply_quirk(q, &mut tuning);
    }

    overrides.apply(&mut tuning);

    if overrides.safe {
        tuning.clamp_to_safe_bounds();
    }

    tuning
}

fn apply_quirk(q: &QuirkEntry, tuning: &mut EffectiveTuning) {
    let t = &q.tuning;
    if let Some(v) = t.max_chunk_bytes {
        tuning.max_chunk_bytes = v;
    }
    if let Some(v) = t.io_timeout_ms {
        tuning.io_timeout_ms = v;
    }
    if let Some(v) = t.handshake_timeout_ms {
        tuning.handshake_timeout_ms = v;
    }
    if let Some(v) = t.inactivity_timeout_ms {
        tuning.inactivity_timeout_ms = v;
    }
    if let Some(v) = t.overall_deadline_ms {
        tuning.overall_deadline_ms = v;
    }
    if let Some(v) = t.stabilize_ms {
        tuning.stabilize_ms = v;
    }
    for (name, value) in &q.ops.flags {
        apply_named_flag(&mut tuning.flags, name, *value);
    }
    tuning.hooks.extend(q.hooks.iter().cloned());
}

fn apply_named_flag(flags: &mut FeatureFlags, name: &str, value: bool) {
    match name {
        "supportsGetObjectPropList" => flags.supports_get_object_prop_list = value,
        "supportsGetPartialObject" => flags.supports_get_partial_object = value,
        "supportsGetPartialObject64" => flags.supports_get_partial_object64 = value,
        "supportsSendPartialObject" => flags.supports_send_partial_object = value,
        "supportsSendObjectPropList" => flags.supports_send_object_prop_list = value,
        "writeToSubfolderOnly" => flags.write_to_subfolder_only = value,
        "forceFFFFFFFForSendObject" => flags.force_ffffffff_for_send_object = value,
        "emptyDatesInSendObject" => flags.empty_dates_in_send_object = value,
        "unknownSizeInSendObjectInfo" => flags.unknown_size_in_send_object_info = value,
        "skipGetObjectPropValue" => flags.skip_get_object_prop_value = value,
        "resetReopenOnOpenSessionIOError" => flags.reset_reopen_on_open_session_io_error = value,
        _ => {}
    }
}
