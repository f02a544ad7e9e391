//! Whole-object and partial writes (spec.md §4.7). The write recovery ladder
//! itself lives in [`crate::session::write`]; this module is the primitive
//! `SendObjectInfo`/`SendObject`/`SendPartialObject` layer it retries on.

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::MtpResult;
use crate::link::PtpLink;
use crate::types::Progress;
use crate::wire::codes::{ObjectFormatCode, OperationCode};
use crate::wire::object_info::ObjectInfo;

/// `AssociationType` value for a generic folder (spec.md §6).
const ASSOCIATION_GENERIC_FOLDER: u16 = 1;

/// Result of a successful `SendObjectInfo`: response params are
/// `[storage, parent, newHandle]` (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendObjectInfoResult {
    pub storage_id: u32,
    pub parent_handle: u32,
    pub new_handle: u32,
}

pub async fn send_object_info(
    link: &PtpLink,
    command_storage: u32,
    command_parent: u32,
    dataset: &ObjectInfo,
) -> MtpResult<SendObjectInfoResult> {
    let payload = dataset.encode()?;
    let mut offset = 0usize;
    let mut producer = |buf: &mut [u8]| -> MtpResult<usize> {
        let remaining = &payload[offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        offset += n;
        Ok(n)
    };
    let result = link
        .execute_streaming_command(
            OperationCode::SendObjectInfo.into(),
            &[command_storage, command_parent],
            Some(payload.len() as u64),
            Some(&mut producer),
            None,
        )
        .await?;
    let [storage_id, parent_handle, new_handle] = result.params[..] else {
        return Err(crate::error::MtpError::ProtocolError(format!(
            "SendObjectInfo response expected 3 params, got {}",
            result.params.len()
        )));
    };
    Ok(SendObjectInfoResult { storage_id, parent_handle, new_handle })
}

/// Stream a local file's full contents as the `SendObject` data-out phase,
/// reporting progress as bytes are read (read, not yet device-acked, but
/// the closest synchronous signal available from this callback shape).
pub async fn send_object_whole(link: &PtpLink, mut file: File, size: u64, progress: &Progress) -> MtpResult<()> {
    // Buffered in the same style as transfer::read::read_whole: the
    // synchronous producer callback can't itself await, so the file is read
    // fully up front. Acceptable for the chunk sizes this engine targets
    // (spec.md bounds max_chunk_bytes at 16 MiB; whole-object writes larger
    // than that should go through `send_object_partial` instead).
    let mut buffer = Vec::with_capacity(size as usize);
    file.read_to_end(&mut buffer)
        .await
        .map_err(|e| crate::error::MtpError::LocalIo { source: e, path: None })?;

    let mut offset = 0usize;
    let mut producer = |buf: &mut [u8]| -> MtpResult<usize> {
        let remaining = &buffer[offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        offset += n;
        progress.add(n as u64);
        Ok(n)
    };
    link.execute_streaming_command(
        OperationCode::SendObject.into(),
        &[],
        Some(size),
        Some(&mut producer),
        None,
    )
    .await?;
    Ok(())
}

/// `SendObject` with a zero-length data phase, used by `createFolder`
/// (spec.md §4.6 `createFolder`).
pub async fn send_object_zero_length(link: &PtpLink) -> MtpResult<()> {
    let mut producer = |_buf: &mut [u8]| -> MtpResult<usize> { Ok(0) };
    link.execute_streaming_command(OperationCode::SendObject.into(), &[], Some(0), Some(&mut producer), None)
        .await?;
    Ok(())
}

/// `createFolder` (spec.md §4.6): a zero-size `Association`/`GenericFolder`
/// object, the standard PTP idiom for creating a directory.
pub async fn create_folder(link: &PtpLink, storage_id: u32, parent_object: u32, name: &str) -> MtpResult<u32> {
    let mut dataset = ObjectInfo::for_new_file(storage_id, parent_object, ObjectFormatCode::Association.into(), 0, name);
    dataset.association_type = ASSOCIATION_GENERIC_FOLDER;
    let result = send_object_info(link, storage_id, parent_object, &dataset).await?;
    send_object_zero_length(link).await?;
    Ok(result.new_handle)
}

/// One chunk of a partial write via `SendPartialObject(handle, offset, size)`
/// (spec.md §4.7 "Partial write").
pub async fn send_partial_object(
    link: &PtpLink,
    handle: u32,
    offset: u64,
    file: &mut File,
    chunk_len: u64,
    progress: &Progress,
) -> MtpResult<()> {
    file.seek(std::io::SeekFrom::Start(offset))
        .await
        .map_err(|e| crate::error::MtpError::LocalIo { source: e, path: None })?;
    let mut buffer = vec![0u8; chunk_len as usize];
    let mut read = 0usize;
    while read < buffer.len() {
        let n = file
            .read(&mut buffer[read..])
            .await
            .map_err(|e| crate::error::MtpError::LocalIo { source: e, path: None })?;
        if n == 0 {
            break;
        }
        read += n;
    }
    buffer.truncate(read);

    let offset_lo = (offset & 0xFFFF_FFFF) as u32;
    let offset_hi = (offset >> 32) as u32;
    let mut sent = 0usize;
    let mut producer = |buf: &mut [u8]| -> MtpResult<usize> {
        let remaining = &buffer[sent..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        sent += n;
        progress.add(n as u64);
        Ok(n)
    };
    link.execute_streaming_command(
        OperationCode::SendPartialObject.into(),
        &[handle, offset_lo, offset_hi, read as u32],
        Some(read as u64),
        Some(&mut producer),
        None,
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::types::InterfaceDescriptor;
    use crate::wire::container::ParamContainer;
    use crate::wire::ContainerType;
    use std::sync::Arc;

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
    async fn send_object_info_parses_new_handle_from_response_params() {
        let mock = Arc::new(MockTransport::new(descriptor()));
        let resp = ParamContainer {
            kind: ContainerType::Response,
            code: 0x2001,
            txid: 1,
            params: vec![1, 0xFFFFFFFF, 555],
        };
        mock.push_inbound(resp.encode().unwrap());
        let link = PtpLink::new(mock.clone(), 1000);

        let dataset = ObjectInfo::for_new_file(1, 0xFFFFFFFF, 0x3000, 10, "a.txt");
        let result = send_object_info(&link, 1, 0xFFFFFFFF, &dataset).await.unwrap();
        assert_eq!(result.new_handle, 555);

        // Data-out phase: a data header followed by the encoded dataset.
        let writes = mock.outbound_writes();
        assert!(writes.len() >= 3, "expected command, data header, and >=1 payload write");
    }

    #[tokio::test]
    async fn send_object_zero_length_writes_empty_data_phase() {
        let mock = Arc::new(MockTransport::new(descriptor()));
        let resp = ParamContainer {
            kind: ContainerType::Response,
            code: 0x2001,
            txid: 1,
            params: vec![1, 0, 10],
        };
        mock.push_inbound(resp.encode().unwrap());
        let link = PtpLink::new(mock, 1000);
        send_object_zero_length(&link).await.unwrap();
    }

    #[tokio::test]
    async fn create_folder_returns_new_handle() {
        let mock = Arc::new(MockTransport::new(descriptor()));
        // SendObjectInfo response, then SendObject response.
        for txid in [1u32, 2] {
            let resp = ParamContainer {
                kind: ContainerType::Response,
                code: 0x2001,
                txid,
                params: if txid == 1 { vec![1, 0xFFFFFFFF, 900] } else { vec![] },
            };
            mock.push_inbound(resp.encode().unwrap());
        }
        let link = PtpLink::new(mock, 1000);
        let handle = create_folder(&link, 1, 0xFFFFFFFF, "SwiftMTP").await.unwrap();
        assert_eq!(handle, 900);
    }
}
