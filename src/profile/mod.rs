//! Learned profile store (spec.md §4.5): per-fingerprint EMA-smoothed tuning
//! observations, persisted as one JSON document per device under a
//! user-scoped directory, with a 90-day TTL.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EffectiveTuning;
use crate::error::{MtpError, MtpResult};

const EMA_ALPHA: f64 = 0.2;
const TTL_DAYS: i64 = 90;

/// `{lastSeen, firstSeen, samples, maxChunkBytes, ...}` (spec.md §4.5, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedProfile {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub samples: u64,
    pub max_chunk_bytes: f64,
    pub io_timeout_ms: f64,
    pub handshake_timeout_ms: f64,
    pub inactivity_timeout_ms: f64,
    pub overall_deadline_ms: f64,
}

impl LearnedProfile {
    fn from_tuning(tuning: &EffectiveTuning, now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            samples: 1,
            max_chunk_bytes: tuning.max_chunk_bytes as f64,
            io_timeout_ms: tuning.io_timeout_ms as f64,
            handshake_timeout_ms: tuning.handshake_timeout_ms as f64,
            inactivity_timeout_ms: tuning.inactivity_timeout_ms as f64,
            overall_deadline_ms: tuning.overall_deadline_ms as f64,
        }
    }

    fn observe(&mut self, tuning: &EffectiveTuning, now: DateTime<Utc>) {
        fn ema(prev: f64, sample: f64) -> f64 {
            EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * prev
        }
        self.max_chunk_bytes = ema(self.max_chunk_bytes, tuning.max_chunk_bytes as f64);
        self.io_timeout_ms = ema(self.io_timeout_ms, tuning.io_timeout_ms as f64);
        self.handshake_timeout_ms = ema(self.handshake_timeout_ms, tuning.handshake_timeout_ms as f64);
        self.inactivity_timeout_ms = ema(self.inactivity_timeout_ms, tuning.inactivity_timeout_ms as f64);
        self.overall_deadline_ms = ema(self.overall_deadline_ms, tuning.overall_deadline_ms as f64);
        self.samples += 1;
        self.last_seen = now;
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.last_seen).num_days() > TTL_DAYS
    }

    /// Apply this profile as a merge layer (spec.md §4.4 item 3).
    pub fn apply(&self, tuning: &mut EffectiveTuning) {
        tuning.max_chunk_bytes = self.max_chunk_bytes.round() as u64;
        tuning.io_timeout_ms = self.io_timeout_ms.round() as u64;
        tuning.handshake_timeout_ms = self.handshake_timeout_ms.round() as u64;
        tuning.inactivity_timeout_ms = self.inactivity_timeout_ms.round() as u64;
        tuning.overall_deadline_ms = self.overall_deadline_ms.round() as u64;
        tuning.clamp_to_safe_bounds();
    }
}

/// Persists one JSON document per fingerprint under `root` (resolved by the
/// caller with `dirs::data_dir()`, mirroring how the pack's desktop app
/// resolves its own per-user config directory).
pub struct LearnedProfileStore {
    root: PathBuf,
}

impl LearnedProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default location: `dirs::data_dir()/mtp-host/profiles`.
    pub fn default_location() -> MtpResult<Self> {
        let base = dirs::data_dir().ok_or_else(|| {
            MtpError::Configuration("could not resolve a user data directory".to_string())
        })?;
        Ok(Self::new(base.join("mtp-host").join("profiles")))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Load a fingerprint's profile, or `None` if absent or older than the TTL.
    pub fn load(&self, fingerprint_key: &str) -> MtpResult<Option<LearnedProfile>> {
        let path = self.path_for(fingerprint_key);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MtpError::LocalIo { source: e, path: Some(path) }),
        };
        let profile: LearnedProfile = serde_json::from_str(&text)
            .map_err(|e| MtpError::Journal(format!("corrupt learned profile {fingerprint_key}: {e}")))?;
        if profile.is_expired(Utc::now()) {
            debug!(fingerprint = fingerprint_key, "learned profile expired past TTL, ignoring");
            return Ok(None);
        }
        Ok(Some(profile))
    }

    /// Record a successful session's resolved tuning, re-smoothing the
    /// stored EMA. Written via temp-file-then-rename for atomicity.
    pub fn record_observation(&self, fingerprint_key: &str, tuning: &EffectiveTuning) -> MtpResult<()> {
        let now = Utc::now();
        let mut profile = self.load(fingerprint_key)?.unwrap_or_else(|| LearnedProfile::from_tuning(tuning, now));
        if profile.samples > 0 && profile.last_seen != now {
            profile.observe(tuning, now);
        }
        self.write_atomic(fingerprint_key, &profile)
    }

    fn write_atomic(&self, fingerprint_key: &str, profile: &LearnedProfile) -> MtpResult<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| MtpError::LocalIo {
            source: e,
            path: Some(self.root.clone()),
        })?;
        let final_path = self.path_for(fingerprint_key);
        let tmp_path = final_path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(profile)
            .map_err(|e| MtpError::Journal(format!("failed to serialize learned profile: {e}")))?;
        std::fs::write(&tmp_path, json).map_err(|e| MtpError::LocalIo {
            source: e,
            path: Some(tmp_path.clone()),
        })?;
        std::fs::rename(&tmp_path, &final_path).map_err(|e| MtpError::LocalIo {
            source: e,
            path: Some(final_path),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tuning_with_chunk(bytes: u64) -> EffectiveTuning {
        let mut t = EffectiveTuning::baseline();
        t.max_chunk_bytes = bytes;
        t
    }

    #[test]
    fn records_and_loads_a_fresh_profile() {
        let dir = tempdir().unwrap();
        let store = LearnedProfileStore::new(dir.path());
        store.record_observation("fp1", &tuning_with_chunk(1024 * 1024)).unwrap();
        let loaded = store.load("fp1").unwrap().unwrap();
        assert_eq!(loaded.samples, 1);
    }

    #[test]
    fn ema_smooths_toward_new_samples() {
        let mut profile = LearnedProfile::from_tuning(&tuning_with_chunk(1_000_000), Utc::now());
        profile.observe(&tuning_with_chunk(2_000_000), Utc::now());
        // alpha=0.2: 0.2*2_000_000 + 0.8*1_000_000 = 1_200_000
        assert_eq!(profile.max_chunk_bytes.round() as u64, 1_200_000);
        assert_eq!(profile.samples, 2);
    }

    #[test]
    fn missing_profile_returns_none() {
        let dir = tempdir().unwrap();
        let store = LearnedProfileStore::new(dir.path());
        assert!(store.load("nonexistent").unwrap().is_none());
    }

    #[test]
    fn expired_profile_is_ignored_on_load() {
        let dir = tempdir().unwrap();
        let store = LearnedProfileStore::new(dir.path());
        let mut profile = LearnedProfile::from_tuning(&tuning_with_chunk(1024), Utc::now());
        profile.last_seen = Utc::now() - chrono::Duration::days(TTL_DAYS + 1);
        store.write_atomic("old", &profile).unwrap();
        assert!(store.load("old").unwrap().is_none());
    }
}
