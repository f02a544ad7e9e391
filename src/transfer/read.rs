//! Whole-object and resumable reads (spec.md §4.7).

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::{EffectiveTuning, ReadStrategy};
use crate::error::{MtpError, MtpResult};
use crate::link::PtpLink;
use crate::types::{Etag, Progress};
use crate::wire::codes::OperationCode;

use super::atomic::atomic_replace;

/// Part-file suffix used for in-progress downloads (spec.md §4.7).
fn part_path(dest: &Path) -> PathBuf {
    let mut s = dest.as_os_str().to_owned();
    s.push(".part");
    PathBuf::from(s)
}

/// Whole-object read: `GetObject`, streamed into `dest.part`, atomically
/// renamed to `dest` on success.
pub async fn read_whole(
    link: &PtpLink,
    handle: u32,
    dest: &Path,
    progress: &Progress,
) -> MtpResult<()> {
    let tmp = part_path(dest);

    // The link's data-in consumer callback is synchronous (it drives the USB
    // read loop directly); chunks are accumulated here and flushed to the
    // `.part` file in one async write rather than bridging sync callback to
    // async I/O per-chunk.
    let mut buffer = Vec::new();
    {
        let mut consumer = |slice: &[u8]| -> MtpResult<usize> {
            buffer.extend_from_slice(slice);
            progress.add(slice.len() as u64);
            Ok(slice.len())
        };
        link.execute_streaming_command(OperationCode::GetObject.into(), &[handle], None, None, Some(&mut consumer))
            .await?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .await
        .map_err(|e| MtpError::LocalIo { source: e, path: Some(tmp.clone()) })?;
    file.write_all(&buffer)
        .await
        .map_err(|e| MtpError::LocalIo { source: e, path: Some(tmp.clone()) })?;

    atomic_replace(&tmp, dest).await?;
    info!(handle, dest = %dest.display(), "whole-object read complete");
    Ok(())
}

/// Resumable read driven by `GetPartialObject64`/`GetPartialObject`
/// (spec.md §4.7 "Resumable read"). `prior_committed` is the byte offset
/// already present in `dest.part` from a previous attempt; `remote_etag`
/// must match the device's current report or the temp file is discarded.
pub async fn read_resumable(
    link: &PtpLink,
    handle: u32,
    dest: &Path,
    total_size: u64,
    remote_etag: Etag,
    journal_etag: Option<Etag>,
    tuning: &EffectiveTuning,
    strategy: ReadStrategy,
    progress: &Progress,
) -> MtpResult<()> {
    let tmp = part_path(dest);

    let mut resume_from = 0u64;
    if let Some(prior) = journal_etag {
        if prior == remote_etag {
            if let Ok(meta) = tokio::fs::metadata(&tmp).await {
                resume_from = meta.len();
                debug!(resume_from, "resuming partial download from prior .part file");
            }
        } else {
            debug!("etag mismatch since last attempt, discarding partial file");
            let _ = tokio::fs::remove_file(&tmp).await;
        }
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&tmp)
        .await
        .map_err(|e| MtpError::LocalIo { source: e, path: Some(tmp.clone()) })?;
    progress.add(resume_from);

    let mut offset = resume_from;
    let chunk = tuning.max_chunk_bytes;
    while offset < total_size {
        let want = chunk.min(total_size - offset);
        let bytes = read_one_chunk(link, handle, offset, want, strategy).await?;
        file.write_all(&bytes)
            .await
            .map_err(|e| MtpError::LocalIo { source: e, path: Some(tmp.clone()) })?;
        progress.add(bytes.len() as u64);
        offset += bytes.len() as u64;
        if bytes.is_empty() {
            return Err(MtpError::ProtocolError(
                "device returned an empty partial-object chunk before completion".to_string(),
            ));
        }
    }

    atomic_replace(&tmp, dest).await?;
    Ok(())
}

async fn read_one_chunk(
    link: &PtpLink,
    handle: u32,
    offset: u64,
    max_bytes: u64,
    strategy: ReadStrategy,
) -> MtpResult<Vec<u8>> {
    let mut payload = Vec::new();
    let params: Vec<u32> = match strategy {
        ReadStrategy::Partial64 => {
            let offset_lo = (offset & 0xFFFF_FFFF) as u32;
            let offset_hi = (offset >> 32) as u32;
            vec![handle, offset_lo, offset_hi, max_bytes as u32]
        }
        ReadStrategy::Partial32 => vec![handle, offset as u32, max_bytes as u32],
        ReadStrategy::Whole => {
            return Err(MtpError::PreconditionFailed(
                "read_one_chunk called without partial-read support".to_string(),
            ))
        }
    };
    let code: u16 = match strategy {
        ReadStrategy::Partial64 => OperationCode::GetPartialObject64.into(),
        ReadStrategy::Partial32 | ReadStrategy::Whole => OperationCode::GetPartialObject.into(),
    };
    {
        let mut consumer = |slice: &[u8]| -> MtpResult<usize> {
            payload.extend_from_slice(slice);
            Ok(slice.len())
        };
        link.execute_streaming_command(code, &params, None, None, Some(&mut consumer))
            .await?;
    }
    Ok(payload)
}
