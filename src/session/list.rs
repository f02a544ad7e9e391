//! Directory enumeration (spec.md §4.6 `list`): prefers `GetObjectPropList`
//! in one round trip, permanently falling back to `GetObjectHandles` + one
//! `GetObjectInfo` per handle the first time a device rejects the fast path.

use std::time::SystemTime;

use tracing::{debug, warn};

use crate::config::EnumerationStrategy;
use crate::error::{MtpError, MtpResult};
use crate::link::ops as link_ops;
use crate::types::ObjectEntry;
use crate::wire::codes::ObjectPropCode;
use crate::wire::prop_list::PropValue;

use super::SessionActor;

pub(super) async fn list_objects(
    actor: &mut SessionActor,
    storage_id: u32,
    parent: Option<u32>,
) -> MtpResult<Vec<ObjectEntry>> {
    let parent_cmd = parent.unwrap_or(0xFFFFFFFF);

    if actor.policy.enumeration == EnumerationStrategy::PropList && !actor.prop_list_disabled {
        match link_ops::get_object_prop_list(&actor.link, parent_cmd, 1).await {
            Ok(entries) => return Ok(group_prop_entries(entries, storage_id, parent)),
            Err(MtpError::NotSupported { .. }) => {
                warn!("device rejected GetObjectPropList, permanently falling back to GetObjectHandles");
                actor.prop_list_disabled = true;
            }
            Err(e) => return Err(e),
        }
    }

    list_via_handles(actor, storage_id, parent_cmd, parent).await
}

async fn list_via_handles(
    actor: &mut SessionActor,
    storage_id: u32,
    parent_cmd: u32,
    parent: Option<u32>,
) -> MtpResult<Vec<ObjectEntry>> {
    let handles = link_ops::get_object_handles(&actor.link, storage_id, parent_cmd).await?;
    let mut entries = Vec::with_capacity(handles.len());
    for handle in handles {
        let info = link_ops::get_object_info(&actor.link, handle).await?;
        actor.parent_storage_cache.insert(handle, info.storage_id);
        entries.push(ObjectEntry {
            handle,
            storage_id: info.storage_id,
            parent: Some(parent.unwrap_or(info.parent_object)),
            name: info.filename,
            size: Some(info.object_compressed_size as u64),
            modified: None,
            format_code: info.object_format,
        });
    }
    debug!(count = entries.len(), "listed via GetObjectHandles/GetObjectInfo");
    Ok(entries)
}

/// Each object contributes several `PropEntry` rows (one per requested
/// property); group them back into one [`ObjectEntry`] per handle.
fn group_prop_entries(entries: Vec<crate::wire::prop_list::PropEntry>, storage_id: u32, parent: Option<u32>) -> Vec<ObjectEntry> {
    use std::collections::BTreeMap;

    let mut by_handle: BTreeMap<u32, ObjectEntry> = BTreeMap::new();
    for entry in entries {
        let slot = by_handle.entry(entry.object_handle).or_insert_with(|| ObjectEntry {
            handle: entry.object_handle,
            storage_id,
            parent,
            name: String::new(),
            size: None,
            modified: None,
            format_code: 0,
        });
        apply_prop(slot, entry.prop_code, entry.value);
    }
    by_handle.into_values().collect()
}

fn apply_prop(entry: &mut ObjectEntry, code: u16, value: PropValue) {
    let Ok(code) = ObjectPropCode::try_from(code) else { return };
    match (code, value) {
        (ObjectPropCode::ObjectFileName, PropValue::Str(name)) => entry.name = name,
        (ObjectPropCode::ObjectSize, PropValue::U64(size)) => entry.size = Some(size),
        (ObjectPropCode::ObjectSize, PropValue::U32(size)) => entry.size = Some(size as u64),
        (ObjectPropCode::ObjectFormat, PropValue::U16(fmt)) => entry.format_code = fmt,
        (ObjectPropCode::ParentObject, PropValue::U32(p)) => entry.parent = Some(p),
        (ObjectPropCode::DateModified, PropValue::Str(_s)) => {
            // Device-formatted PTP date string; parsing into a `SystemTime`
            // is not load-bearing for any invariant this engine checks, so
            // it's left unset rather than hand-rolling a fragile parser.
            let _: Option<SystemTime> = None;
        }
        _ => {}
    }
}
