//! Write Target Ladder (spec.md §4.9): given a storage and optional parent,
//! walk a preference list of writable folders, creating a working subfolder
//! if none of the preferred names exist.

use std::collections::HashSet;

use crate::error::{MtpError, MtpResult};
use crate::types::ObjectEntry;

pub const FALLBACK_FOLDER_NAME: &str = "SwiftMTP";

/// Exposed so the session actor's async-native resolver (§4.6's write-target
/// step, which cannot use this module's synchronous [`FolderLister`] seam
/// against a live link) can walk the identical preference order without
/// duplicating it.
pub(crate) const PREFERENCE_ORDER: &[&str] = &[
    "Download",
    "DCIM",
    "DCIM/Camera",
    "Pictures",
    "Movies",
    "Music",
];

/// What the ladder resolved to: a storage id and the handle of the chosen
/// folder (an existing association, or a freshly created one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub storage_id: u32,
    pub parent_handle: u32,
}

/// Minimal view of the storage root this algorithm needs: the children of
/// storage root (one level; `DCIM/Camera` is resolved by first finding
/// `DCIM` then looking inside it), and a way to create a new association.
/// Implemented by the session actor against its parent-storage cache, kept
/// free of I/O here so the resolution logic stays a pure, testable function.
pub trait FolderLister {
    fn children_of(&self, storage_id: u32, parent: Option<u32>) -> MtpResult<Vec<ObjectEntry>>;
    fn create_association(&mut self, storage_id: u32, parent: Option<u32>, name: &str) -> MtpResult<u32>;
}

pub(crate) fn sanitize_component(name: &str) -> MtpResult<&str> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(MtpError::PreconditionFailed(format!(
            "write target component {name:?} is not a valid folder name"
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(MtpError::PreconditionFailed(format!(
            "write target component {name:?} contains a path separator or NUL"
        )));
    }
    Ok(name)
}

fn find_child_by_name(children: &[ObjectEntry], name: &str, case_sensitive: bool) -> Option<u32> {
    children.iter().find_map(|c| {
        let matches = if case_sensitive {
            c.name == name
        } else {
            c.name.eq_ignore_ascii_case(name)
        };
        matches.then_some(c.handle)
    })
}

/// Resolve one preference-list candidate (possibly a multi-segment path like
/// `DCIM/Camera`) against the storage root, descending segment by segment.
/// Returns `Ok(None)` if any segment is missing (caller tries the next
/// candidate) rather than creating intermediate folders.
fn resolve_existing_path(
    lister: &impl FolderLister,
    storage_id: u32,
    path: &str,
    excluding: &HashSet<u32>,
) -> MtpResult<Option<u32>> {
    let mut parent: Option<u32> = None;
    for (i, segment) in path.split('/').enumerate() {
        sanitize_component(segment)?;
        let children = lister.children_of(storage_id, parent)?;
        // First segment prefers exact case; subsequent/ fallback segments
        // also try exact first, then case-insensitive.
        let handle = find_child_by_name(&children, segment, true)
            .or_else(|| find_child_by_name(&children, segment, false));
        match handle {
            Some(h) if !(i == 0 && excluding.contains(&h)) => parent = Some(h),
            _ => return Ok(None),
        }
    }
    Ok(parent)
}

/// Walk the preference list for `storage_id`, optionally starting with
/// `preferred_write_folder` first, excluding any handle in `excluding`.
/// Falls back to creating `"SwiftMTP"` in the storage root if nothing matched.
pub fn resolve_write_target(
    lister: &mut impl FolderLister,
    storage_id: u32,
    preferred_write_folder: Option<&str>,
    excluding: &HashSet<u32>,
) -> MtpResult<ResolvedTarget> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(p) = preferred_write_folder {
        candidates.push(p);
    }
    candidates.extend_from_slice(PREFERENCE_ORDER);

    for candidate in candidates {
        if let Some(handle) = resolve_existing_path(lister, storage_id, candidate, excluding)? {
            return Ok(ResolvedTarget {
                storage_id,
                parent_handle: handle,
            });
        }
    }

    let handle = lister.create_association(storage_id, None, FALLBACK_FOLDER_NAME)?;
    Ok(ResolvedTarget {
        storage_id,
        parent_handle: handle,
    })
}
