//! Event pump (spec.md §4.3): a long-lived interrupt-in reader decoding
//! container `type=4` into typed events, independent of command/response
//! serialization on the bulk endpoints.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::MtpResult;
use crate::transport::UsbTransport;
use crate::wire::container::HEADER_LEN;
use crate::wire::ContainerType;

/// A decoded event: a code plus up to three params (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtpEvent {
    pub code: u16,
    pub params: Vec<u32>,
}

/// Spawns the interrupt-in reader loop and returns a broadcast receiver
/// handle; the loop stops when `shutdown` resolves or the device detaches.
pub struct EventPump {
    _task: tokio::task::JoinHandle<()>,
    sender: broadcast::Sender<PtpEvent>,
}

impl EventPump {
    pub fn start(transport: Arc<dyn UsbTransport>, io_timeout_ms: u64, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> Self {
        let (sender, _) = broadcast::channel(64);
        let task_sender = sender.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        debug!("event pump shutting down");
                        break;
                    }
                    result = transport.interrupt_in(&mut buf, io_timeout_ms) => {
                        match result {
                            Ok(n) if n >= HEADER_LEN as usize => {
                                match decode_event(&buf[..n]) {
                                    Ok(event) => {
                                        let _ = task_sender.send(event);
                                    }
                                    Err(e) => warn!(error = %e, "failed to decode event container"),
                                }
                            }
                            Ok(_) => {
                                // short/empty interrupt read; nothing to decode yet.
                                tokio::time::sleep(Duration::from_millis(50)).await;
                            }
                            Err(e) if e.category() == crate::error::ErrorCategory::Transport => {
                                debug!(error = %e, "event pump transport error, stopping");
                                break;
                            }
                            Err(e) => {
                                warn!(error = %e, "unexpected event pump error");
                                break;
                            }
                        }
                    }
                }
            }
        });
        Self { _task: task, sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PtpEvent> {
        self.sender.subscribe()
    }
}

fn decode_event(buf: &[u8]) -> MtpResult<PtpEvent> {
    let (length, kind, code, _txid) = crate::wire::container::decode_header(buf)?;
    if kind != ContainerType::Event {
        return Err(crate::error::MtpError::ProtocolError(format!(
            "interrupt read decoded as non-event container type {kind:?}"
        )));
    }
    let payload_len = (length as usize).saturating_sub(HEADER_LEN as usize).min(buf.len().saturating_sub(HEADER_LEN as usize));
    let n_params = (payload_len / 4).min(3);
    let mut params = Vec::with_capacity(n_params);
    for i in 0..n_params {
        let start = HEADER_LEN as usize + i * 4;
        params.push(u32::from_le_bytes(buf[start..start + 4].try_into().unwrap()));
    }
    Ok(PtpEvent { code, params })
}
