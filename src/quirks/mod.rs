//! Quirk database: external device-specific overrides, matched by USB
//! identity and merged into the effective tuning policy (spec.md §4.4, §6).

pub mod matcher;
pub mod policy;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{BusyBackoff, Phase, PhaseHook};
use crate::error::{MtpError, MtpResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDescriptor {
    #[serde(with = "hexnum::u16_fmt")]
    pub vid: u16,
    #[serde(with = "hexnum::u16_fmt")]
    pub pid: u16,
    #[serde(default, with = "hexnum::opt_u16_fmt")]
    pub bcd_device: Option<u16>,
    pub iface: Option<IfaceMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfaceMatch {
    pub class: Option<u8>,
    pub subclass: Option<u8>,
    pub protocol: Option<u8>,
}

/// Quirk-file hex fields accept either `"0x…"` or a plain decimal string/number
/// (spec.md §6).
mod hexnum {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    fn parse(s: &str) -> Result<u16, std::num::ParseIntError> {
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u16::from_str_radix(hex, 16)
        } else {
            s.parse()
        }
    }

    pub mod u16_fmt {
        use super::*;

        pub fn serialize<S: Serializer>(v: &u16, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_u16(*v)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
            #[derive(Deserialize)]
            #[serde(untagged)]
            enum Repr {
                Num(u16),
                Str(String),
            }
            match Repr::deserialize(d)? {
                Repr::Num(n) => Ok(n),
                Repr::Str(s) => parse(&s).map_err(D::Error::custom),
            }
        }
    }

    pub mod opt_u16_fmt {
        use super::*;

        pub fn serialize<S: Serializer>(v: &Option<u16>, s: S) -> Result<S::Ok, S::Error> {
            match v {
                Some(n) => s.serialize_some(n),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u16>, D::Error> {
            #[derive(Deserialize)]
            #[serde(untagged)]
            enum Repr {
                Num(u16),
                Str(String),
                Null,
            }
            match Option::<Repr>::deserialize(d)? {
                None | Some(Repr::Null) => Ok(None),
                Some(Repr::Num(n)) => Ok(Some(n)),
                Some(Repr::Str(s)) => parse(&s).map_err(D::Error::custom).map(Some),
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuningOverrides {
    pub max_chunk_bytes: Option<u64>,
    pub io_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub inactivity_timeout_ms: Option<u64>,
    pub overall_deadline_ms: Option<u64>,
    pub stabilize_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsOverrides {
    #[serde(flatten)]
    pub flags: std::collections::BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuirkStatus {
    Proposed,
    Experimental,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuirkEntry {
    pub id: String,
    #[serde(rename = "match")]
    pub match_descriptor: MatchDescriptor,
    #[serde(default)]
    pub tuning: TuningOverrides,
    #[serde(default)]
    pub ops: OpsOverrides,
    #[serde(default)]
    pub hooks: Vec<PhaseHook>,
    pub status: Option<QuirkStatus>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuirkDatabase {
    pub schema_version: u32,
    pub entries: Vec<QuirkEntry>,
}

impl QuirkDatabase {
    pub fn empty() -> Self {
        Self {
            schema_version: 1,
            entries: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> MtpResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| MtpError::LocalIo {
            source: e,
            path: Some(path.to_path_buf()),
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> MtpResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| MtpError::Configuration(format!("invalid quirk database: {e}")))
    }

    /// Best match for a device fingerprint, per spec.md §4.4 scoring, or
    /// `None` if no entry's mandatory fields (VID/PID) match.
    pub fn match_device(&self, fp: &crate::types::DeviceFingerprint) -> Option<&QuirkEntry> {
        matcher::best_match(&self.entries, fp)
    }
}

pub(crate) fn hook(phase: Phase, delay_ms: Option<u64>) -> PhaseHook {
    PhaseHook {
        phase,
        delay_ms,
        busy_backoff: None,
    }
}

pub(crate) fn backoff_hook(phase: Phase, backoff: BusyBackoff) -> PhaseHook {
    PhaseHook {
        phase,
        delay_ms: None,
        busy_backoff: Some(backoff),
    }
}
