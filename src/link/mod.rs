//! PTP link (spec.md §4.3): executes one command transaction at a time —
//! command, optional data phase, response — over a [`UsbTransport`].

pub mod events;
pub mod ops;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::error::{check_ok, MtpError, MtpResult};
use crate::transport::UsbTransport;
use crate::wire::container::{self, ParamContainer, HEADER_LEN};
use crate::wire::ContainerType;

/// A streaming command's data-out producer: called repeatedly, returns the
/// number of bytes written into `buf`, `0` signals end of stream.
pub type DataProducer<'a> = &'a mut dyn FnMut(&mut [u8]) -> MtpResult<usize>;

/// A streaming command's data-in consumer: called with each received slice,
/// returns how many bytes it consumed (normally all of them).
pub type DataConsumer<'a> = &'a mut dyn FnMut(&[u8]) -> MtpResult<usize>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseResult {
    pub code: u16,
    pub params: Vec<u32>,
}

/// Runs the per-link transaction state machine (spec.md §4.3). Owns the
/// monotonic txid counter; txid starts at 1 per spec.md §9's resolved open
/// question and increments per command.
pub struct PtpLink {
    transport: Arc<dyn UsbTransport>,
    next_txid: AtomicU32,
    io_timeout_ms: u64,
}

impl PtpLink {
    pub fn new(transport: Arc<dyn UsbTransport>, io_timeout_ms: u64) -> Self {
        Self {
            transport,
            next_txid: AtomicU32::new(1),
            io_timeout_ms,
        }
    }

    pub fn set_io_timeout_ms(&mut self, ms: u64) {
        self.io_timeout_ms = ms;
    }

    fn alloc_txid(&self) -> u32 {
        self.next_txid.fetch_add(1, Ordering::SeqCst)
    }

    /// Execute one command, with no data phase.
    pub async fn execute_command(&self, code: u16, params: &[u32]) -> MtpResult<ResponseResult> {
        self.execute_streaming_command(code, params, None, None, None)
            .await
    }

    /// Execute one command, optionally streaming a data-out or data-in phase
    /// (exactly one of `out_producer`/`in_consumer` should be `Some`).
    ///
    /// `expected_data_len` is only used for the data-out phase's container
    /// header; the data-in phase always reads whatever length the device's
    /// own data-container header declares.
    pub async fn execute_streaming_command(
        &self,
        code: u16,
        params: &[u32],
        expected_data_len: Option<u64>,
        out_producer: Option<DataProducer<'_>>,
        in_consumer: Option<DataConsumer<'_>>,
    ) -> MtpResult<ResponseResult> {
        let txid = self.alloc_txid();
        let command = ParamContainer::command(code, txid, params);
        trace!(code = format!("0x{code:04X}"), txid, "writing command container");
        let bytes = command.encode()?;
        self.transport.bulk_out(&bytes, self.io_timeout_ms).await?;

        if let Some(producer) = out_producer {
            self.write_data_phase(code, txid, expected_data_len.unwrap_or(0), producer)
                .await?;
        }

        let mut first = self.read_container_header_and_maybe_payload(txid, in_consumer).await?;

        // A device may skip the data phase entirely and go straight to the
        // response, even when one was expected (spec.md §4.3 key rule).
        if first.kind != ContainerType::Response {
            first = self.read_response(txid).await?;
        }

        check_ok(first.code, &format!("operation 0x{code:04X}"))?;
        Ok(ResponseResult {
            code: first.code,
            params: first.params,
        })
    }

    async fn write_data_phase(
        &self,
        code: u16,
        txid: u32,
        expected_len: u64,
        producer: DataProducer<'_>,
    ) -> MtpResult<()> {
        let header = container::encode_data_header(code, txid, expected_len)?;
        self.transport.bulk_out(&header, self.io_timeout_ms).await?;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = producer(&mut buf)?;
            if n == 0 {
                break;
            }
            self.transport.bulk_out(&buf[..n], self.io_timeout_ms).await?;
        }
        Ok(())
    }

    /// Reads either a data container (consuming the consumer callback over
    /// its payload, then the trailing response) or, if the device skipped
    /// straight to the response, just that response — returned as a raw
    /// `ParamContainer` the caller inspects by `kind`.
    async fn read_container_header_and_maybe_payload(
        &self,
        expected_txid: u32,
        in_consumer: Option<DataConsumer<'_>>,
    ) -> MtpResult<ParamContainer> {
        let mut header = [0u8; HEADER_LEN as usize];
        self.read_exact(&mut header).await?;
        let (length, kind, code, txid) = container::decode_header(&header)?;
        if txid != expected_txid {
            return Err(MtpError::TransactionMismatch {
                expected: expected_txid,
                actual: txid,
            });
        }

        match kind {
            ContainerType::Data => {
                let payload_len = length as u64 - HEADER_LEN as u64;
                if let Some(consumer) = in_consumer {
                    self.stream_payload(payload_len, consumer).await?;
                } else {
                    self.drain_payload(payload_len).await?;
                }
                self.read_response(expected_txid).await
            }
            ContainerType::Response => {
                let payload_len = length as u64 - HEADER_LEN as u64;
                let params = self.read_params(payload_len).await?;
                Ok(ParamContainer { kind, code, txid, params })
            }
            other => Err(MtpError::ProtocolError(format!(
                "unexpected container type {other:?} where data/response expected"
            ))),
        }
    }

    async fn read_response(&self, expected_txid: u32) -> MtpResult<ParamContainer> {
        let mut header = [0u8; HEADER_LEN as usize];
        self.read_exact(&mut header).await?;
        let (length, kind, code, txid) = container::decode_header(&header)?;
        if kind != ContainerType::Response {
            return Err(MtpError::ProtocolError(format!(
                "expected response container, got {kind:?}"
            )));
        }
        if txid != expected_txid {
            return Err(MtpError::TransactionMismatch {
                expected: expected_txid,
                actual: txid,
            });
        }
        let payload_len = length as u64 - HEADER_LEN as u64;
        let params = self.read_params(payload_len).await?;
        Ok(ParamContainer { kind, code, txid, params })
    }

    async fn read_params(&self, payload_len: u64) -> MtpResult<Vec<u32>> {
        let mut buf = vec![0u8; payload_len as usize];
        self.read_exact(&mut buf).await?;
        let mut params = Vec::with_capacity(buf.len() / 4);
        for chunk in buf.chunks_exact(4) {
            params.push(u32::from_le_bytes(chunk.try_into().unwrap()));
        }
        Ok(params)
    }

    async fn stream_payload(&self, total_len: u64, consumer: DataConsumer<'_>) -> MtpResult<()> {
        let mut remaining = total_len;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = self.transport.bulk_in(&mut buf[..want], self.io_timeout_ms).await?;
            if n == 0 {
                break;
            }
            let mut offset = 0;
            while offset < n {
                let consumed = consumer(&buf[offset..n])?;
                if consumed == 0 {
                    return Err(MtpError::ProtocolError(
                        "data consumer made no progress".to_string(),
                    ));
                }
                offset += consumed;
            }
            remaining -= n as u64;
        }
        Ok(())
    }

    async fn drain_payload(&self, total_len: u64) -> MtpResult<()> {
        let mut discard: MtpResult<usize> = Ok(0);
        let mut remaining = total_len;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = self.transport.bulk_in(&mut buf[..want], self.io_timeout_ms).await?;
            discard = Ok(n);
            if n == 0 {
                break;
            }
            remaining -= n as u64;
        }
        discard.map(|_| ())
    }

    async fn read_exact(&self, buf: &mut [u8]) -> MtpResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .transport
                .bulk_in(&mut buf[filled..], self.io_timeout_ms)
                .await?;
            if n == 0 {
                return Err(MtpError::ProtocolError(
                    "short read: transport returned 0 bytes before header/payload complete"
                        .to_string(),
                ));
            }
            filled += n;
        }
        Ok(())
    }
}
