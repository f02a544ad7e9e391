//! Effective tuning policy, phase hooks, feature flags, and environment
//! overrides (spec.md §3, §4.4, §6).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Points at which a device may need a scripted delay or busy-backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    PostOpenUsb,
    PostClaimInterface,
    PostOpenSession,
    BeforeGetDeviceInfo,
    BeforeGetStorageIds,
    BeforeGetObjectHandles,
    BeforeTransfer,
    AfterTransfer,
    OnDeviceBusy,
    OnDetach,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyBackoff {
    pub retries: u32,
    pub base_ms: u64,
    pub jitter_pct: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseHook {
    pub phase: Phase,
    pub delay_ms: Option<u64>,
    pub busy_backoff: Option<BusyBackoff>,
}

/// Feature flags read off the merged policy (spec.md §4.4).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub supports_get_object_prop_list: bool,
    pub supports_get_partial_object: bool,
    pub supports_get_partial_object64: bool,
    pub supports_send_partial_object: bool,
    pub supports_send_object_prop_list: bool,
    pub write_to_subfolder_only: bool,
    pub preferred_write_folder: Option<String>,
    pub force_ffffffff_for_send_object: bool,
    pub empty_dates_in_send_object: bool,
    pub unknown_size_in_send_object_info: bool,
    pub skip_get_object_prop_value: bool,
    pub reset_reopen_on_open_session_io_error: bool,
}

/// `{maxChunkBytes, ioTimeoutMs, ...}` plus feature flags and phase hooks
/// (spec.md §3 "Effective Tuning").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveTuning {
    pub max_chunk_bytes: u64,
    pub io_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub inactivity_timeout_ms: u64,
    pub overall_deadline_ms: u64,
    pub stabilize_ms: u64,
    pub post_claim_stabilize_ms: u64,
    pub flags: FeatureFlags,
    pub hooks: Vec<PhaseHook>,
}

impl EffectiveTuning {
    /// Baseline defaults, the first layer of the C4 merge (spec.md §4.4 item 1).
    pub fn baseline() -> Self {
        Self {
            max_chunk_bytes: 2 * 1024 * 1024,
            io_timeout_ms: 10_000,
            handshake_timeout_ms: 6_000,
            inactivity_timeout_ms: 8_000,
            overall_deadline_ms: 60_000,
            stabilize_ms: 0,
            post_claim_stabilize_ms: 0,
            flags: FeatureFlags::default(),
            hooks: Vec::new(),
        }
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_millis(self.overall_deadline_ms)
    }

    /// Clamp every numeric field to the safe bounds from spec.md §4.5, used
    /// both by the learned-profile store and by `MTP_SAFE`.
    pub fn clamp_to_safe_bounds(&mut self) {
        self.max_chunk_bytes = self.max_chunk_bytes.clamp(64 * 1024, 16 * 1024 * 1024);
        for ms in [
            &mut self.io_timeout_ms,
            &mut self.handshake_timeout_ms,
            &mut self.inactivity_timeout_ms,
        ] {
            *ms = (*ms).clamp(1_000, 10 * 60 * 1000);
        }
    }

    /// `MTP_SAFE`: pin every field to the conservative end of its bound.
    pub fn force_conservative(&mut self) {
        self.max_chunk_bytes = 64 * 1024;
        self.io_timeout_ms = 10 * 60 * 1000;
        self.handshake_timeout_ms = 10 * 60 * 1000;
        self.inactivity_timeout_ms = 10 * 60 * 1000;
    }

    pub fn hooks_for(&self, phase: Phase) -> impl Iterator<Item = &PhaseHook> {
        self.hooks.iter().filter(move |h| h.phase == phase)
    }
}

/// Fallback strategy selections (spec.md §3 "Device Policy").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnumerationStrategy {
    PropList,
    HandlesThenInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadStrategy {
    Partial64,
    Partial32,
    Whole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteStrategy {
    Partial,
    Whole,
}

/// Effective tuning plus the fallback-strategy choices derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePolicy {
    pub tuning: EffectiveTuning,
    pub enumeration: EnumerationStrategy,
    pub read: ReadStrategy,
    pub write: WriteStrategy,
}

impl DevicePolicy {
    /// Strategies are derived purely from the feature flags already merged
    /// into `tuning` — there is no sixth layer, just a projection.
    pub fn from_tuning(tuning: EffectiveTuning) -> Self {
        let enumeration = if tuning.flags.supports_get_object_prop_list {
            EnumerationStrategy::PropList
        } else {
            EnumerationStrategy::HandlesThenInfo
        };
        let read = if tuning.flags.supports_get_partial_object64 {
            ReadStrategy::Partial64
        } else if tuning.flags.supports_get_partial_object {
            ReadStrategy::Partial32
        } else {
            ReadStrategy::Whole
        };
        let write = if tuning.flags.supports_send_partial_object {
            WriteStrategy::Partial
        } else {
            WriteStrategy::Whole
        };
        Self {
            tuning,
            enumeration,
            read,
            write,
        }
    }
}

/// User overrides parsed from the `MTP_*` environment variables (spec.md §6).
/// The fifth and final layer of the C4 merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub io_timeout_ms: Option<u64>,
    pub max_chunk_bytes: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub inactivity_timeout_ms: Option<u64>,
    pub overall_deadline_ms: Option<u64>,
    pub stabilize_ms: Option<u64>,
    pub quirks_path: Option<std::path::PathBuf>,
    pub debug: bool,
    /// Disables quirk-database and learned-profile lookups for bring-up.
    pub strict: bool,
    /// Clamps tuning to the most conservative end of every bound.
    pub safe: bool,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            io_timeout_ms: env_u64("MTP_IO_TIMEOUT_MS"),
            max_chunk_bytes: env_u64("MTP_MAX_CHUNK_BYTES"),
            handshake_timeout_ms: env_u64("MTP_HANDSHAKE_TIMEOUT_MS"),
            inactivity_timeout_ms: env_u64("MTP_INACTIVITY_TIMEOUT_MS"),
            overall_deadline_ms: env_u64("MTP_OVERALL_DEADLINE_MS"),
            stabilize_ms: env_u64("MTP_STABILIZE_MS"),
            quirks_path: std::env::var_os("MTP_QUIRKS_PATH").map(std::path::PathBuf::from),
            debug: env_flag("MTP_DEBUG"),
            strict: env_flag("MTP_STRICT"),
            safe: env_flag("MTP_SAFE"),
        }
    }

    /// Apply this layer on top of an already-merged tuning (the 5th merge layer).
    pub fn apply(&self, tuning: &mut EffectiveTuning) {
        if let Some(v) = self.io_timeout_ms {
            tuning.io_timeout_ms = v;
        }
        if let Some(v) = self.max_chunk_bytes {
            tuning.max_chunk_bytes = v;
        }
        if let Some(v) = self.handshake_timeout_ms {
            tuning.handshake_timeout_ms = v;
        }
        if let Some(v) = self.inactivity_timeout_ms {
            tuning.inactivity_timeout_ms = v;
        }
        if let Some(v) = self.overall_deadline_ms {
            tuning.overall_deadline_ms = v;
        }
        if let Some(v) = self.stabilize_ms {
            tuning.stabilize_ms = v;
        }
        if self.safe {
            tuning.force_conservative();
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_matches_documented_defaults() {
        let t = EffectiveTuning::baseline();
        assert_eq!(t.max_chunk_bytes, 2 * 1024 * 1024);
        assert_eq!(t.io_timeout_ms, 10_000);
        assert_eq!(t.overall_deadline_ms, 60_000);
    }

    #[test]
    fn clamp_enforces_documented_bounds() {
        let mut t = EffectiveTuning::baseline();
        t.max_chunk_bytes = 1;
        t.io_timeout_ms = 1;
        t.clamp_to_safe_bounds();
        assert_eq!(t.max_chunk_bytes, 64 * 1024);
        assert_eq!(t.io_timeout_ms, 1_000);
    }

    #[test]
    fn policy_projection_prefers_fastest_supported_strategy() {
        let mut tuning = EffectiveTuning::baseline();
        tuning.flags.supports_get_partial_object64 = true;
        tuning.flags.supports_get_partial_object = true;
        tuning.flags.supports_get_object_prop_list = true;
        let policy = DevicePolicy::from_tuning(tuning);
        assert_eq!(policy.enumeration, EnumerationStrategy::PropList);
        assert_eq!(policy.read, ReadStrategy::Partial64);
        assert_eq!(policy.write, WriteStrategy::Whole);
    }
}
