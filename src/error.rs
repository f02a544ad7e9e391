//! Unified error taxonomy for the MTP host engine.
//!
//! Mirrors the three-tier taxonomy from the design: `Transport` (USB-level),
//! `Protocol` (PTP response codes), and `Core` (engine-level invariants).
//! Callers branch on `category()`/`is_transient()` rather than string matching.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::wire::codes::ResponseCode;

/// Result alias used throughout the engine.
pub type MtpResult<T> = Result<T, MtpError>;

/// Main error type for all mtp-host operations.
#[derive(Error, Debug)]
pub enum MtpError {
    // --- Transport (C2) ---
    #[error("USB transfer timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("device reported busy")]
    Busy,

    #[error("access to the USB device was denied")]
    AccessDenied,

    #[error("no such device (disconnected or never attached)")]
    NoDevice,

    #[error("endpoint stalled (pipe error)")]
    PipeStall,

    #[error("USB I/O error: {0}")]
    TransportIo(String),

    // --- Protocol framing (C1/C3) ---
    #[error("malformed PTP container: {0}")]
    ProtocolError(String),

    #[error("PTP response mismatch: expected txid {expected}, got {actual}")]
    TransactionMismatch { expected: u32, actual: u32 },

    // --- Typed PTP response codes (spec.md §7) ---
    #[error("operation not supported by device (0x{code:04X})")]
    NotSupported { code: u16 },

    #[error("object not found on device (0x{code:04X})")]
    ObjectNotFound { code: u16 },

    #[error("storage is full (0x{code:04X})")]
    StorageFull { code: u16 },

    #[error("object is write protected (0x{code:04X})")]
    ObjectWriteProtected { code: u16 },

    #[error("storage is read-only (0x{code:04X})")]
    ReadOnly { code: u16 },

    #[error("permission denied by device (0x{code:04X})")]
    PermissionDenied { code: u16 },

    #[error("device reports session already open (0x{code:04X})")]
    SessionAlreadyOpen { code: u16 },

    #[error("invalid parameter (0x{code:04X}): {message}")]
    InvalidParameter { code: u16, message: String },

    #[error("invalid storage id (0x{code:04X})")]
    InvalidStorageId { code: u16 },

    #[error("session is not open (0x{code:04X})")]
    SessionNotOpen { code: u16 },

    #[error("PTP protocol error 0x{code:04X}: {message}")]
    OtherProtocol { code: u16, message: String },

    // --- Core invariants ---
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("overall deadline exceeded")]
    DeadlineExceeded,

    #[error("local I/O error: {source} (path: {path:?})")]
    LocalIo {
        #[source]
        source: io::Error,
        path: Option<PathBuf>,
    },

    #[error("journal error: {0}")]
    Journal(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MtpError {
    /// Build the typed variant for a non-OK PTP response code, per spec.md §7.
    pub fn from_response_code(code: u16, context: &str) -> Self {
        match code {
            0x2005 => MtpError::NotSupported { code },
            0x2009 => MtpError::ObjectNotFound { code },
            0x200C => MtpError::StorageFull { code },
            0x200D => MtpError::ObjectWriteProtected { code },
            0x200E => MtpError::ReadOnly { code },
            0x200F | 0x2011 => MtpError::PermissionDenied { code },
            0x2019 => MtpError::Busy,
            0x201E => MtpError::SessionAlreadyOpen { code },
            0x201D => MtpError::InvalidParameter {
                code,
                message: context.to_string(),
            },
            0x2008 => MtpError::InvalidStorageId { code },
            0x2003 => MtpError::SessionNotOpen { code },
            _ => MtpError::OtherProtocol {
                code,
                message: context.to_string(),
            },
        }
    }

    /// Human-readable PTP code in hex, when this error carries one.
    pub fn ptp_code_hex(&self) -> Option<String> {
        let code = match self {
            MtpError::NotSupported { code }
            | MtpError::ObjectNotFound { code }
            | MtpError::StorageFull { code }
            | MtpError::ObjectWriteProtected { code }
            | MtpError::ReadOnly { code }
            | MtpError::PermissionDenied { code }
            | MtpError::SessionAlreadyOpen { code }
            | MtpError::InvalidParameter { code, .. }
            | MtpError::InvalidStorageId { code }
            | MtpError::SessionNotOpen { code }
            | MtpError::OtherProtocol { code, .. } => *code,
            _ => return None,
        };
        Some(format!("0x{code:04X}"))
    }

    /// Whether the session actor's write/transfer retry logic should treat
    /// this as transient (worth retrying within the current ladder rung).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MtpError::Timeout { .. }
                | MtpError::Busy
                | MtpError::PipeStall
                | MtpError::TransportIo(_)
        )
    }

    /// Whether this error demands the hard-recovery path (close/reopen link).
    pub fn requires_hard_recovery(&self) -> bool {
        matches!(self, MtpError::SessionNotOpen { .. })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            MtpError::Timeout { .. }
            | MtpError::Busy
            | MtpError::AccessDenied
            | MtpError::NoDevice
            | MtpError::PipeStall
            | MtpError::TransportIo(_) => ErrorCategory::Transport,

            MtpError::ProtocolError(_) | MtpError::TransactionMismatch { .. } => {
                ErrorCategory::Protocol
            }

            MtpError::NotSupported { .. }
            | MtpError::ObjectNotFound { .. }
            | MtpError::StorageFull { .. }
            | MtpError::ObjectWriteProtected { .. }
            | MtpError::ReadOnly { .. }
            | MtpError::PermissionDenied { .. }
            | MtpError::SessionAlreadyOpen { .. }
            | MtpError::InvalidParameter { .. }
            | MtpError::InvalidStorageId { .. }
            | MtpError::SessionNotOpen { .. }
            | MtpError::OtherProtocol { .. } => ErrorCategory::Protocol,

            MtpError::PreconditionFailed(_)
            | MtpError::Cancelled
            | MtpError::DeadlineExceeded
            | MtpError::Journal(_)
            | MtpError::Configuration(_) => ErrorCategory::Core,

            MtpError::LocalIo { .. } => ErrorCategory::FileSystem,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Protocol,
    Core,
    FileSystem,
}

impl From<io::Error> for MtpError {
    fn from(e: io::Error) -> Self {
        MtpError::TransportIo(e.to_string())
    }
}

/// Convenience check for the common "decode a response code" call site.
pub fn check_ok(code: u16, context: &str) -> MtpResult<()> {
    if code == ResponseCode::Ok as u16 {
        Ok(())
    } else {
        Err(MtpError::from_response_code(code, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_variants_from_response_codes() {
        assert!(matches!(
            MtpError::from_response_code(0x2019, "busy"),
            MtpError::Busy
        ));
        assert!(matches!(
            MtpError::from_response_code(0x201E, "open"),
            MtpError::SessionAlreadyOpen { code: 0x201E }
        ));
        assert!(matches!(
            MtpError::from_response_code(0xABCD, "vendor"),
            MtpError::OtherProtocol { code: 0xABCD, .. }
        ));
    }

    #[test]
    fn hex_rendering_is_uppercase_four_digit() {
        let e = MtpError::from_response_code(0x2009, "missing");
        assert_eq!(e.ptp_code_hex().unwrap(), "0x2009");
    }

    #[test]
    fn transient_classification() {
        assert!(MtpError::Busy.is_transient());
        assert!(MtpError::Timeout { timeout_ms: 10 }.is_transient());
        assert!(!MtpError::ObjectNotFound { code: 0x2009 }.is_transient());
    }

    #[test]
    fn check_ok_accepts_only_0x2001() {
        assert!(check_ok(0x2001, "").is_ok());
        assert!(check_ok(0x2005, "list").is_err());
    }
}
