//! USB bulk transport (spec.md §4.2): open/claim, bulk in/out, interrupt in,
//! reset, and the cached interface descriptor. `UsbTransport` is the seam the
//! PTP link (C3) drives; production code uses [`nusb`], tests use
//! [`mock::MockTransport`].

pub mod mock;
pub mod nusb_transport;

use async_trait::async_trait;

use crate::error::MtpResult;
use crate::types::{DeviceSummary, InterfaceDescriptor};

/// One open USB link to a device. Implementors must release the claimed
/// interface on `close()` and on drop, even on error paths.
#[async_trait]
pub trait UsbTransport: Send + Sync {
    async fn bulk_in(&self, buf: &mut [u8], timeout_ms: u64) -> MtpResult<usize>;
    async fn bulk_out(&self, data: &[u8], timeout_ms: u64) -> MtpResult<usize>;
    async fn interrupt_in(&self, buf: &mut [u8], timeout_ms: u64) -> MtpResult<usize>;

    async fn reset_device(&self) -> MtpResult<()>;
    async fn reset_endpoints(&self) -> MtpResult<()>;

    fn interface_descriptor(&self) -> &InterfaceDescriptor;

    async fn close(&self) -> MtpResult<()>;
}

/// Opens a transport for a previously-enumerated device summary, claiming
/// its cached interface. Implemented once per backend (nusb in production,
/// an in-memory script in tests).
#[async_trait]
pub trait TransportOpener: Send + Sync {
    async fn open(&self, summary: &DeviceSummary, io_timeout_ms: u64) -> MtpResult<Box<dyn UsbTransport>>;
}
