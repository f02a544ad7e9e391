//! An in-memory [`UsbTransport`] double driven by a scripted queue of
//! responses, used to test the link/session/transfer layers without real
//! hardware (spec.md §8 properties P4–P6, P9).

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{MtpError, MtpResult};
use crate::types::InterfaceDescriptor;

use super::UsbTransport;

/// One scripted outcome for a single `bulk_in`/`bulk_out` call.
#[derive(Debug, Clone)]
pub enum ScriptedIo {
    Bytes(Vec<u8>),
    Err(MockFault),
}

/// Injectable fault types, covering the transient/hard-recovery split the
/// session actor branches on.
#[derive(Debug, Clone, Copy)]
pub enum MockFault {
    Timeout,
    Busy,
    PipeStall,
    NoDevice,
    Io,
}

impl MockFault {
    fn into_error(self) -> MtpError {
        match self {
            MockFault::Timeout => MtpError::Timeout { timeout_ms: 1000 },
            MockFault::Busy => MtpError::Busy,
            MockFault::PipeStall => MtpError::PipeStall,
            MockFault::NoDevice => MtpError::NoDevice,
            MockFault::Io => MtpError::TransportIo("mock I/O fault".to_string()),
        }
    }
}

pub struct MockTransport {
    inbound: Mutex<VecDeque<ScriptedIo>>,
    outbound_log: Mutex<Vec<Vec<u8>>>,
    descriptor: InterfaceDescriptor,
    reset_count: Mutex<u32>,
}

impl MockTransport {
    pub fn new(descriptor: InterfaceDescriptor) -> Self {
        Self {
            inbound: Mutex::new(VecDeque::new()),
            outbound_log: Mutex::new(Vec::new()),
            descriptor,
            reset_count: Mutex::new(0),
        }
    }

    /// Queue bytes to be returned by the next `bulk_in`/`interrupt_in` call.
    pub fn push_inbound(&self, bytes: Vec<u8>) {
        self.inbound.lock().push_back(ScriptedIo::Bytes(bytes));
    }

    /// Queue a fault to be returned by the next `bulk_in` call.
    pub fn push_fault(&self, fault: MockFault) {
        self.inbound.lock().push_back(ScriptedIo::Err(fault));
    }

    pub fn outbound_writes(&self) -> Vec<Vec<u8>> {
        self.outbound_log.lock().clone()
    }

    pub fn reset_count(&self) -> u32 {
        *self.reset_count.lock()
    }
}

#[async_trait]
impl UsbTransport for MockTransport {
    async fn bulk_in(&self, buf: &mut [u8], _timeout_ms: u64) -> MtpResult<usize> {
        let next = self.inbound.lock().pop_front();
        match next {
            Some(ScriptedIo::Bytes(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if bytes.len() > n {
                    // Caller's buffer was shorter than this scripted chunk;
                    // requeue the remainder so the next read picks it up,
                    // mirroring a real bulk-in stream split across calls.
                    bytes.drain(..n);
                    self.inbound.lock().push_front(ScriptedIo::Bytes(bytes));
                }
                Ok(n)
            }
            Some(ScriptedIo::Err(fault)) => Err(fault.into_error()),
            None => Ok(0),
        }
    }

    async fn bulk_out(&self, data: &[u8], _timeout_ms: u64) -> MtpResult<usize> {
        self.outbound_log.lock().push(data.to_vec());
        Ok(data.len())
    }

    async fn interrupt_in(&self, buf: &mut [u8], timeout_ms: u64) -> MtpResult<usize> {
        self.bulk_in(buf, timeout_ms).await
    }

    async fn reset_device(&self) -> MtpResult<()> {
        *self.reset_count.lock() += 1;
        Ok(())
    }

    async fn reset_endpoints(&self) -> MtpResult<()> {
        Ok(())
    }

    fn interface_descriptor(&self) -> &InterfaceDescriptor {
        &self.descriptor
    }

    async fn close(&self) -> MtpResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> InterfaceDescriptor {
        InterfaceDescriptor {
            interface_number: 0,
            class: 6,
            subclass: 1,
            protocol: 1,
            bulk_in_ep: 0x81,
            bulk_out_ep: 0x01,
            interrupt_in_ep: Some(0x82),
        }
    }

    #[tokio::test]
    async fn replays_scripted_bytes_in_order() {
        let t = MockTransport::new(descriptor());
        t.push_inbound(vec![1, 2, 3]);
        t.push_inbound(vec![4, 5]);
        let mut buf = [0u8; 8];
        assert_eq!(t.bulk_in(&mut buf, 0).await.unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(t.bulk_in(&mut buf, 0).await.unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
    }

    #[tokio::test]
    async fn replays_scripted_faults() {
        let t = MockTransport::new(descriptor());
        t.push_fault(MockFault::Busy);
        let mut buf = [0u8; 4];
        assert!(matches!(t.bulk_in(&mut buf, 0).await, Err(MtpError::Busy)));
    }

    #[tokio::test]
    async fn records_outbound_writes() {
        let t = MockTransport::new(descriptor());
        t.bulk_out(&[9, 8, 7], 0).await.unwrap();
        assert_eq!(t.outbound_writes(), vec![vec![9, 8, 7]]);
    }
}
