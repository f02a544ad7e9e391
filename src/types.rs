//! Core domain types shared across the engine (spec.md §3).

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Cached USB interface descriptor for a device, captured at enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub bulk_in_ep: u8,
    pub bulk_out_ep: u8,
    pub interrupt_in_ep: Option<u8>,
}

/// Immutable identity captured at enumeration; lives from enumeration to detach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub vid: u16,
    pub pid: u16,
    pub bus: u8,
    pub address: u8,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub interface: InterfaceDescriptor,
    /// USB `bcdDevice` (device release number), when the descriptor carries
    /// one; used by quirk matching to disambiguate firmware revisions that
    /// share a vid/pid.
    pub bcd_device: Option<u16>,
}

/// Stable key for learned-profile and quirk matching; survives reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    pub vid: u16,
    pub pid: u16,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub endpoint_signature: u32,
    pub bcd_device: Option<u16>,
}

impl DeviceFingerprint {
    pub fn from_summary(s: &DeviceSummary) -> Self {
        let ep = &s.interface;
        let endpoint_signature = (ep.bulk_in_ep as u32) << 16
            | (ep.bulk_out_ep as u32) << 8
            | ep.interrupt_in_ep.unwrap_or(0) as u32;
        Self {
            vid: s.vid,
            pid: s.pid,
            interface_class: ep.class,
            interface_subclass: ep.subclass,
            interface_protocol: ep.protocol,
            endpoint_signature,
            bcd_device: s.bcd_device,
        }
    }

    /// Stable string form used as a filename component for learned-profile
    /// and probe-receipt storage.
    pub fn as_key(&self) -> String {
        format!(
            "{:04x}_{:04x}_{:02x}{:02x}{:02x}_{:06x}",
            self.vid,
            self.pid,
            self.interface_class,
            self.interface_subclass,
            self.interface_protocol,
            self.endpoint_signature
        )
    }
}

/// Parsed `GetDeviceInfo` response; one per open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
    pub serial_number: Option<String>,
    pub supported_operations: Vec<u16>,
    pub supported_events: Vec<u16>,
    pub supported_object_formats: Vec<u16>,
}

impl DeviceInfo {
    pub fn supports_operation(&self, code: u16) -> bool {
        self.supported_operations.contains(&code)
    }
}

/// One entry from `GetStorageIDs` + `GetStorageInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub storage_id: u32,
    pub free_bytes: u64,
    pub capacity_bytes: u64,
    pub description: String,
    pub read_only: bool,
}

/// Domain-level object metadata, as distinct from the wire `ObjectInfo`
/// dataset in [`crate::wire::object_info::ObjectInfo`] — this is the
/// resolved view handed to callers after parent/size normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub handle: u32,
    pub storage_id: u32,
    pub parent: Option<u32>,
    pub name: String,
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
    pub format_code: u16,
}

impl ObjectEntry {
    /// Per spec.md invariant 6: parent absent, `0`, or `0xFFFFFFFF` all mean root.
    pub fn is_root_parent(&self) -> bool {
        matches!(self.parent, None | Some(0) | Some(0xFFFFFFFF))
    }
}

/// Kind of an in-flight or completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Read,
    Write,
}

/// Lifecycle state of a [`crate::journal::TransferRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// `(size, mtime)` used to detect whether a remote object changed between a
/// resumed transfer's prior attempt and now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Etag {
    pub size: u64,
    pub mtime_unix: Option<i64>,
}

/// Lock-free-read progress tracker handed to transfer consumer/producer
/// callbacks; cloned cheaply (backed by an `Arc<AtomicU64>` pair).
#[derive(Debug, Clone)]
pub struct Progress {
    inner: std::sync::Arc<ProgressInner>,
}

#[derive(Debug)]
struct ProgressInner {
    committed: std::sync::atomic::AtomicU64,
    total: std::sync::atomic::AtomicU64,
}

impl Progress {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            inner: std::sync::Arc::new(ProgressInner {
                committed: std::sync::atomic::AtomicU64::new(0),
                total: std::sync::atomic::AtomicU64::new(total.unwrap_or(u64::MAX)),
            }),
        }
    }

    pub fn add(&self, bytes: u64) {
        self.inner
            .committed
            .fetch_add(bytes, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn committed(&self) -> u64 {
        self.inner.committed.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn total(&self) -> Option<u64> {
        match self.inner.total.load(std::sync::atomic::Ordering::Relaxed) {
            u64::MAX => None,
            n => Some(n),
        }
    }
}

/// Result of the first-open capability probe + policy resolution, surfaced
/// to callers for diagnostics (not part of the original distilled spec;
/// supplements it per SPEC_FULL.md's `ProbeReceipt` addition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReceipt {
    pub fingerprint_key: String,
    pub matched_quirk_id: Option<String>,
    pub resolved_max_chunk_bytes: u64,
    pub resolved_io_timeout_ms: u64,
    pub supports_get_object_prop_list: bool,
    pub supports_get_partial_object: bool,
    pub supports_get_partial_object64: bool,
    pub supports_send_partial_object: bool,
    pub supports_send_object_prop_list: bool,
}
