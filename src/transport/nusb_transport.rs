//! `nusb`-backed [`UsbTransport`]: pure-Rust, async-native, cross-platform
//! bulk transport (spec.md §4.2).

use std::time::Duration;

use async_trait::async_trait;
use futures_lite::future;
use tracing::{debug, warn};

use crate::error::MtpError;
use crate::error::MtpResult;
use crate::types::{DeviceSummary, InterfaceDescriptor};

use super::{TransportOpener, UsbTransport};

pub struct NusbTransport {
    interface: nusb::Interface,
    descriptor: InterfaceDescriptor,
}

impl NusbTransport {
    fn map_transfer_error(e: nusb::transfer::TransferError) -> MtpError {
        use nusb::transfer::TransferError;
        match e {
            TransferError::Cancelled => MtpError::Cancelled,
            TransferError::Stall => MtpError::PipeStall,
            TransferError::Disconnected => MtpError::NoDevice,
            other => MtpError::TransportIo(other.to_string()),
        }
    }

    async fn with_timeout<T>(
        fut: impl std::future::Future<Output = T>,
        timeout_ms: u64,
    ) -> MtpResult<T> {
        match future::or(
            async { Some(fut.await) },
            async {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                None
            },
        )
        .await
        {
            Some(v) => Ok(v),
            None => Err(MtpError::Timeout { timeout_ms }),
        }
    }
}

#[async_trait]
impl UsbTransport for NusbTransport {
    async fn bulk_in(&self, buf: &mut [u8], timeout_ms: u64) -> MtpResult<usize> {
        let ep = self.descriptor.bulk_in_ep;
        let len = buf.len();
        let result = Self::with_timeout(
            self.interface.bulk_in(ep, nusb::transfer::RequestBuffer::new(len)),
            timeout_ms,
        )
        .await?;
        let data = result.map_err(Self::map_transfer_error)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn bulk_out(&self, data: &[u8], timeout_ms: u64) -> MtpResult<usize> {
        let ep = self.descriptor.bulk_out_ep;
        let owned = data.to_vec();
        let len = owned.len();
        let result = Self::with_timeout(self.interface.bulk_out(ep, owned), timeout_ms).await?;
        result.map_err(Self::map_transfer_error)?;
        Ok(len)
    }

    async fn interrupt_in(&self, buf: &mut [u8], timeout_ms: u64) -> MtpResult<usize> {
        let Some(ep) = self.descriptor.interrupt_in_ep else {
            return Err(MtpError::PreconditionFailed(
                "device has no interrupt-in endpoint".to_string(),
            ));
        };
        let len = buf.len();
        let result = Self::with_timeout(
            self.interface.interrupt_in(ep, nusb::transfer::RequestBuffer::new(len)),
            timeout_ms,
        )
        .await?;
        let data = result.map_err(Self::map_transfer_error)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn reset_device(&self) -> MtpResult<()> {
        debug!("resetting USB device");
        // nusb has no portable reset primitive; fall back to endpoint clears,
        // which is what the recovery ladder actually needs most of the time.
        self.reset_endpoints().await
    }

    async fn reset_endpoints(&self) -> MtpResult<()> {
        self.interface
            .clear_halt(self.descriptor.bulk_in_ep)
            .map_err(|e| MtpError::TransportIo(e.to_string()))?;
        self.interface
            .clear_halt(self.descriptor.bulk_out_ep)
            .map_err(|e| MtpError::TransportIo(e.to_string()))?;
        Ok(())
    }

    fn interface_descriptor(&self) -> &InterfaceDescriptor {
        &self.descriptor
    }

    async fn close(&self) -> MtpResult<()> {
        // Interface is released when `nusb::Interface` drops; nothing
        // additional to flush here.
        Ok(())
    }
}

/// Enumerates and opens devices via `nusb`, matching on the cached
/// (vid, pid, bus, address) from a [`DeviceSummary`].
pub struct NusbOpener;

#[async_trait]
impl TransportOpener for NusbOpener {
    async fn open(&self, summary: &DeviceSummary, _io_timeout_ms: u64) -> MtpResult<Box<dyn UsbTransport>> {
        let summary = summary.clone();
        tokio::task::spawn_blocking(move || open_blocking(&summary))
            .await
            .map_err(|e| MtpError::TransportIo(e.to_string()))?
    }
}

/// The actual `nusb` calls `open()` wraps; all blocking, so callers must run
/// this on a blocking-capable thread (`spawn_blocking`) rather than an async task.
fn open_blocking(summary: &DeviceSummary) -> MtpResult<Box<dyn UsbTransport>> {
    let device_info = nusb::list_devices()
        .map_err(|e| MtpError::TransportIo(e.to_string()))?
        .find(|d| {
            d.vendor_id() == summary.vid
                && d.product_id() == summary.pid
                && d.bus_number() == summary.bus
                && d.device_address() == summary.address
        })
        .ok_or(MtpError::NoDevice)?;

    let device = device_info.open().map_err(|e| MtpError::TransportIo(e.to_string()))?;
    let interface = device
        .claim_interface(summary.interface.interface_number)
        .map_err(|_| MtpError::AccessDenied)
        .or_else(|_: MtpError| {
            warn!("falling back to interface 0 claim");
            device
                .claim_interface(0)
                .map_err(|e| MtpError::TransportIo(e.to_string()))
        })?;

    Ok(Box::new(NusbTransport {
        interface,
        descriptor: summary.interface.clone(),
    }))
}

/// MTP interfaces show up under the PTP still-image class triplet
/// (6, 1, 1) or, on most Android devices, under the vendor-specific
/// (0xFF, 0xFF, 0x00) triplet MTP borrowed from the same USB-IF allocation
/// ADB uses — spec.md §4.1 "Discovery".
fn looks_like_mtp_interface(class: u8, subclass: u8, protocol: u8) -> bool {
    (class, subclass, protocol) == (6, 1, 1) || (class, subclass, protocol) == (0xFF, 0xFF, 0x00)
}

/// Scans the USB bus for devices exposing an MTP-shaped interface
/// (spec.md §4.1 "Discovery"). Devices with no matching interface are
/// skipped rather than erroring, since most attached USB devices aren't MTP.
pub async fn enumerate() -> MtpResult<Vec<DeviceSummary>> {
    tokio::task::spawn_blocking(enumerate_blocking)
        .await
        .map_err(|e| MtpError::TransportIo(e.to_string()))?
}

fn enumerate_blocking() -> MtpResult<Vec<DeviceSummary>> {
    let mut summaries = Vec::new();

    for device_info in nusb::list_devices().map_err(|e| MtpError::TransportIo(e.to_string()))? {
        let Some(iface_info) = device_info
            .interfaces()
            .find(|i| looks_like_mtp_interface(i.class(), i.subclass(), i.protocol()))
        else {
            continue;
        };

        let interface_number = iface_info.interface_number();
        let descriptor = match device_info.open().and_then(|device| device.claim_interface(interface_number)) {
            Ok(claimed) => match claimed.descriptor() {
                Some(desc) => interface_descriptor_from_nusb(interface_number, &desc),
                None => continue,
            },
            Err(e) => {
                debug!(vid = device_info.vendor_id(), pid = device_info.product_id(), error = %e, "skipping device whose MTP interface couldn't be claimed during enumeration");
                continue;
            }
        };

        summaries.push(DeviceSummary {
            vid: device_info.vendor_id(),
            pid: device_info.product_id(),
            bus: device_info.bus_number(),
            address: device_info.device_address(),
            manufacturer: device_info.manufacturer_string().map(str::to_string),
            model: device_info.product_string().map(str::to_string),
            interface: descriptor,
            bcd_device: Some(device_info.device_version()),
        });
    }

    Ok(summaries)
}

fn interface_descriptor_from_nusb(interface_number: u8, desc: &nusb::descriptors::InterfaceDescriptor) -> InterfaceDescriptor {
    use nusb::transfer::{Direction, EndpointType};

    let mut bulk_in_ep = 0;
    let mut bulk_out_ep = 0;
    let mut interrupt_in_ep = None;
    for ep in desc.endpoints() {
        match (ep.transfer_type(), ep.direction()) {
            (EndpointType::Bulk, Direction::In) => bulk_in_ep = ep.address(),
            (EndpointType::Bulk, Direction::Out) => bulk_out_ep = ep.address(),
            (EndpointType::Interrupt, Direction::In) => interrupt_in_ep = Some(ep.address()),
            _ => {}
        }
    }

    InterfaceDescriptor {
        interface_number,
        class: desc.class(),
        subclass: desc.subclass(),
        protocol: desc.protocol(),
        bulk_in_ep,
        bulk_out_ep,
        interrupt_in_ep,
    }
}
