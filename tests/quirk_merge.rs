//! Five-layer policy merge determinism (spec.md §8 scenario 6, property P7),
//! exercised through the public `quirks::policy::merge` entry point.

use std::collections::BTreeMap;

use mtp_host::config::{EffectiveTuning, EnvOverrides};
use mtp_host::profile::LearnedProfileStore;
use mtp_host::quirks::policy::{merge, CapabilityProbe};
use mtp_host::quirks::{MatchDescriptor, OpsOverrides, QuirkEntry, TuningOverrides};

fn quirk_with_chunk(bytes: u64) -> QuirkEntry {
    QuirkEntry {
        id: "xiaomi-mi11".to_string(),
        match_descriptor: MatchDescriptor { vid: 0x2717, pid: 0xFF40, bcd_device: None, iface: None },
        tuning: TuningOverrides { max_chunk_bytes: Some(bytes), ..Default::default() },
        ops: OpsOverrides { flags: BTreeMap::new() },
        hooks: Vec::new(),
        status: None,
        confidence: Some(0.8),
    }
}

/// Baseline maxChunk is 2MiB; a learned profile of 1MiB is superseded by a
/// quirk entry pinning 4MiB, and no env override is present, so the
/// effective value is the quirk's.
#[tokio::test]
async fn quirk_wins_over_learned_profile_when_no_override_present() {
    let dir = tempfile::tempdir().unwrap();
    let store = LearnedProfileStore::new(dir.path());
    let mut learned_tuning = EffectiveTuning::baseline();
    learned_tuning.max_chunk_bytes = 1024 * 1024;
    store.record_observation("fp-xiaomi", &learned_tuning).unwrap();
    let learned = store.load("fp-xiaomi").unwrap();

    assert_eq!(EffectiveTuning::baseline().max_chunk_bytes, 2 * 1024 * 1024);

    let quirk = quirk_with_chunk(4 * 1024 * 1024);
    let overrides = EnvOverrides::default();

    let tuning = merge(CapabilityProbe::default(), learned.as_ref(), Some(&quirk), &overrides);
    assert_eq!(tuning.max_chunk_bytes, 4 * 1024 * 1024);
}

/// The same inputs, but with an env override present: the override wins as
/// the final merge layer regardless of what the quirk or learned profile say.
#[tokio::test]
async fn env_override_wins_over_quirk_and_learned_profile() {
    let dir = tempfile::tempdir().unwrap();
    let store = LearnedProfileStore::new(dir.path());
    let mut learned_tuning = EffectiveTuning::baseline();
    learned_tuning.max_chunk_bytes = 1024 * 1024;
    store.record_observation("fp-xiaomi", &learned_tuning).unwrap();
    let learned = store.load("fp-xiaomi").unwrap();

    let quirk = quirk_with_chunk(4 * 1024 * 1024);
    let overrides = EnvOverrides { max_chunk_bytes: Some(512 * 1024), ..Default::default() };

    let tuning = merge(CapabilityProbe::default(), learned.as_ref(), Some(&quirk), &overrides);
    assert_eq!(tuning.max_chunk_bytes, 512 * 1024);
}

/// Running the merge twice over identical inputs produces identical output:
/// the merge is a pure function of its four arguments.
#[tokio::test]
async fn merge_is_deterministic_across_repeated_calls() {
    let quirk = quirk_with_chunk(4 * 1024 * 1024);
    let overrides = EnvOverrides::default();
    let a = merge(CapabilityProbe::default(), None, Some(&quirk), &overrides);
    let b = merge(CapabilityProbe::default(), None, Some(&quirk), &overrides);
    assert_eq!(a, b);
}

/// `MTP_STRICT` bypasses quirk and learned-profile layers entirely: the open
/// sequence itself skips loading them, but the merge function is also
/// checked directly here against a bare baseline for the no-quirk/no-learned
/// case the strict path produces.
#[tokio::test]
async fn baseline_only_merge_matches_effective_tuning_baseline() {
    let overrides = EnvOverrides::default();
    let tuning = merge(CapabilityProbe::default(), None, None, &overrides);
    assert_eq!(tuning, EffectiveTuning::baseline());
}
