//! `GetObjectPropList` / `SendObjectPropList` dataset codec (spec.md §6).
//!
//! Both datasets share the same entry shape: `u32 handle, u16 propCode, u16
//! dataType, value` where `value`'s width is determined by `dataType`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{MtpError, MtpResult};
use crate::wire::codes::{DataTypeCode, ObjectPropCode};
use crate::wire::strings::{decode_ptp_string, encode_ptp_string};

/// A single property value, tagged by the PTP `dataType` it was read as or
/// will be written as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Str(String),
}

impl PropValue {
    fn data_type(&self) -> DataTypeCode {
        match self {
            PropValue::U8(_) => DataTypeCode::Uint8,
            PropValue::U16(_) => DataTypeCode::Uint16,
            PropValue::U32(_) => DataTypeCode::Uint32,
            PropValue::U64(_) => DataTypeCode::Uint64,
            PropValue::Str(_) => DataTypeCode::String,
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) -> MtpResult<()> {
        match self {
            PropValue::U8(v) => buf.write_u8(*v)?,
            PropValue::U16(v) => buf.write_u16::<LittleEndian>(*v)?,
            PropValue::U32(v) => buf.write_u32::<LittleEndian>(*v)?,
            PropValue::U64(v) => buf.write_u64::<LittleEndian>(*v)?,
            PropValue::Str(s) => buf.extend_from_slice(&encode_ptp_string(s)?),
        }
        Ok(())
    }

    fn decode(cur: &mut Cursor<&[u8]>, data_type: DataTypeCode) -> MtpResult<Self> {
        Ok(match data_type {
            DataTypeCode::Uint8 => PropValue::U8(cur.read_u8()?),
            DataTypeCode::Uint16 => PropValue::U16(cur.read_u16::<LittleEndian>()?),
            DataTypeCode::Uint32 => PropValue::U32(cur.read_u32::<LittleEndian>()?),
            DataTypeCode::Uint64 => PropValue::U64(cur.read_u64::<LittleEndian>()?),
            DataTypeCode::String => PropValue::Str(decode_ptp_string(cur)?),
        })
    }
}

/// One `(handle, propCode, dataType, value)` tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropEntry {
    pub object_handle: u32,
    pub prop_code: u16,
    pub value: PropValue,
}

impl PropEntry {
    pub fn new(object_handle: u32, prop_code: ObjectPropCode, value: PropValue) -> Self {
        Self {
            object_handle,
            prop_code: prop_code.into(),
            value,
        }
    }
}

/// Encode a `count; count x entry` dataset, used by both the `GetObjectPropList`
/// response and the `SendObjectPropList` request.
pub fn encode_prop_list(entries: &[PropEntry]) -> MtpResult<Vec<u8>> {
    if entries.len() > 1_000_000 {
        return Err(MtpError::ProtocolError(
            "prop list entry count exceeds sanity bound".to_string(),
        ));
    }
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(entries.len() as u32)?;
    for e in entries {
        buf.write_u32::<LittleEndian>(e.object_handle)?;
        buf.write_u16::<LittleEndian>(e.prop_code)?;
        let dt: u16 = e.value.data_type().into();
        buf.write_u16::<LittleEndian>(dt)?;
        e.value.encode(&mut buf)?;
    }
    Ok(buf)
}

pub fn decode_prop_list(buf: &[u8]) -> MtpResult<Vec<PropEntry>> {
    let mut cur = Cursor::new(buf);
    let count = cur.read_u32::<LittleEndian>()?;
    if count as u64 > 1_000_000 {
        return Err(MtpError::ProtocolError(format!(
            "prop list count {count} exceeds sanity bound"
        )));
    }
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let object_handle = cur.read_u32::<LittleEndian>()?;
        let prop_code = cur.read_u16::<LittleEndian>()?;
        let data_type_raw = cur.read_u16::<LittleEndian>()?;
        let data_type = DataTypeCode::try_from(data_type_raw).map_err(|_| {
            MtpError::ProtocolError(format!("unsupported propList dataType 0x{data_type_raw:04X}"))
        })?;
        let value = PropValue::decode(&mut cur, data_type)?;
        entries.push(PropEntry {
            object_handle,
            prop_code,
            value,
        });
    }
    Ok(entries)
}

/// Build the minimal `SendObjectPropList` dataset for a new file: `StorageID,
/// ParentObject, ObjectFileName, ObjectFormat, ObjectSize`, all with
/// `objectHandle = 0` as the spec requires for not-yet-created objects.
pub fn send_object_prop_list_minimal(
    storage_id: u32,
    parent_object: u32,
    filename: &str,
    object_format: u16,
    object_size: u64,
) -> MtpResult<Vec<u8>> {
    let entries = vec![
        PropEntry::new(0, ObjectPropCode::StorageID, PropValue::U32(storage_id)),
        PropEntry::new(0, ObjectPropCode::ParentObject, PropValue::U32(parent_object)),
        PropEntry::new(
            0,
            ObjectPropCode::ObjectFileName,
            PropValue::Str(filename.to_string()),
        ),
        PropEntry::new(
            0,
            ObjectPropCode::ObjectFormat,
            PropValue::U16(object_format),
        ),
        PropEntry::new(0, ObjectPropCode::ObjectSize, PropValue::U64(object_size)),
    ];
    encode_prop_list(&entries)
}
