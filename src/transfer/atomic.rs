//! Atomic temp-file replace (spec.md §4.7 "Atomic replace").

use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::error::{MtpError, MtpResult};

/// Finalize `tmp` as `dest` on the same filesystem. Tries a plain rename
/// first; if the OS only supplies non-atomic rename semantics (observed as
/// a transient failure), falls back to delete-then-rename with a small
/// retry window.
pub async fn atomic_replace(tmp: &Path, dest: &Path) -> MtpResult<()> {
    match tokio::fs::rename(tmp, dest).await {
        Ok(()) => Ok(()),
        Err(first_err) => {
            warn!(error = %first_err, "rename failed, falling back to delete-then-rename");
            let mut last_err = first_err;
            for attempt in 0..5 {
                let _ = tokio::fs::remove_file(dest).await;
                match tokio::fs::rename(tmp, dest).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        last_err = e;
                        tokio::time::sleep(Duration::from_millis(20 * (attempt + 1))).await;
                    }
                }
            }
            Err(MtpError::LocalIo {
                source: last_err,
                path: Some(dest.to_path_buf()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn rename_succeeds_on_same_filesystem() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("a.part");
        let dest = dir.path().join("a.txt");
        tokio::fs::write(&tmp, b"hello").await.unwrap();
        atomic_replace(&tmp, &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello");
        assert!(tokio::fs::metadata(&tmp).await.is_err());
    }

    #[tokio::test]
    async fn replaces_existing_destination() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("a.part");
        let dest = dir.path().join("a.txt");
        tokio::fs::write(&dest, b"old").await.unwrap();
        tokio::fs::write(&tmp, b"new").await.unwrap();
        atomic_replace(&tmp, &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"new");
    }
}
