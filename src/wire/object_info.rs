//! `ObjectInfo` dataset codec, bit-exact per spec.md §6.
//!
//! Field order: `StorageID, ObjectFormat, ProtectionStatus, ObjectCompressedSize,
//! ThumbFormat, ThumbCompressedSize, ThumbPixWidth, ThumbPixHeight, ImagePixWidth,
//! ImagePixHeight, ImageBitDepth, ParentObject, AssociationType, AssociationDesc,
//! SequenceNumber, Filename, CaptureDate, ModificationDate, Keywords`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Local, TimeZone};
use std::io::Cursor;
use std::time::SystemTime;

use crate::error::MtpResult;
use crate::wire::strings::{decode_ptp_string, encode_ptp_string};

/// Formats a timestamp as a PTP DateTime string (`YYYYMMDDThhmmss`, local time,
/// no UTC offset suffix — the form every device in the wild actually expects).
pub fn format_ptp_datetime(time: SystemTime) -> String {
    let datetime: DateTime<Local> = time.into();
    datetime.format("%Y%m%dT%H%M%S").to_string()
}

/// Parses a PTP DateTime string back to a Unix timestamp, for comparing a
/// device's reported `ModificationDate` against a journal etag. Tolerates a
/// trailing `.s`/timezone suffix some devices append by only reading the
/// fixed `YYYYMMDDThhmmss` prefix.
pub fn parse_ptp_datetime(s: &str) -> Option<i64> {
    let prefix = s.get(0..15)?;
    let naive = chrono::NaiveDateTime::parse_from_str(prefix, "%Y%m%dT%H%M%S").ok()?;
    Local.from_local_datetime(&naive).single().map(|dt| dt.timestamp())
}

/// An `ObjectInfo` dataset as sent on `SendObjectInfo` / returned by `GetObjectInfo`.
///
/// Fixed-width fields that devices never vary are pinned to their spec default
/// and not independently settable; the ladder in §4.6 mutates a handful of
/// these (`object_compressed_size`, `parent_object`, optional strings) on the
/// already-built value rather than at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub storage_id: u32,
    pub object_format: u16,
    pub protection_status: u16,
    pub object_compressed_size: u32,
    pub thumb_format: u16,
    pub thumb_compressed_size: u32,
    pub thumb_pix_width: u32,
    pub thumb_pix_height: u32,
    pub image_pix_width: u32,
    pub image_pix_height: u32,
    pub image_bit_depth: u32,
    pub parent_object: u32,
    pub association_type: u16,
    pub association_desc: u32,
    pub sequence_number: u32,
    pub filename: String,
    pub capture_date: String,
    pub modification_date: String,
    pub keywords: String,
}

impl ObjectInfo {
    /// A new file's dataset with every size/thumbnail/association field at
    /// its spec default and a concrete storage/parent/format/size/name.
    pub fn for_new_file(
        storage_id: u32,
        parent_object: u32,
        object_format: u16,
        size: u32,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            storage_id,
            object_format,
            protection_status: 0,
            object_compressed_size: size,
            thumb_format: 0,
            thumb_compressed_size: 0,
            thumb_pix_width: 0,
            thumb_pix_height: 0,
            image_pix_width: 0,
            image_pix_height: 0,
            image_bit_depth: 0,
            parent_object,
            association_type: 0,
            association_desc: 0,
            sequence_number: 0,
            filename: filename.into(),
            capture_date: String::new(),
            modification_date: String::new(),
            keywords: String::new(),
        }
    }

    pub fn encode(&self) -> MtpResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(52);
        buf.write_u32::<LittleEndian>(self.storage_id)?;
        buf.write_u16::<LittleEndian>(self.object_format)?;
        buf.write_u16::<LittleEndian>(self.protection_status)?;
        buf.write_u32::<LittleEndian>(self.object_compressed_size)?;
        buf.write_u16::<LittleEndian>(self.thumb_format)?;
        buf.write_u32::<LittleEndian>(self.thumb_compressed_size)?;
        buf.write_u32::<LittleEndian>(self.thumb_pix_width)?;
        buf.write_u32::<LittleEndian>(self.thumb_pix_height)?;
        buf.write_u32::<LittleEndian>(self.image_pix_width)?;
        buf.write_u32::<LittleEndian>(self.image_pix_height)?;
        buf.write_u32::<LittleEndian>(self.image_bit_depth)?;
        buf.write_u32::<LittleEndian>(self.parent_object)?;
        buf.write_u16::<LittleEndian>(self.association_type)?;
        buf.write_u32::<LittleEndian>(self.association_desc)?;
        buf.write_u32::<LittleEndian>(self.sequence_number)?;
        buf.extend_from_slice(&encode_ptp_string(&self.filename)?);
        buf.extend_from_slice(&encode_ptp_string(&self.capture_date)?);
        buf.extend_from_slice(&encode_ptp_string(&self.modification_date)?);
        buf.extend_from_slice(&encode_ptp_string(&self.keywords)?);
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> MtpResult<Self> {
        let mut cur = Cursor::new(buf);
        let storage_id = cur.read_u32::<LittleEndian>()?;
        let object_format = cur.read_u16::<LittleEndian>()?;
        let protection_status = cur.read_u16::<LittleEndian>()?;
        let object_compressed_size = cur.read_u32::<LittleEndian>()?;
        let thumb_format = cur.read_u16::<LittleEndian>()?;
        let thumb_compressed_size = cur.read_u32::<LittleEndian>()?;
        let thumb_pix_width = cur.read_u32::<LittleEndian>()?;
        let thumb_pix_height = cur.read_u32::<LittleEndian>()?;
        let image_pix_width = cur.read_u32::<LittleEndian>()?;
        let image_pix_height = cur.read_u32::<LittleEndian>()?;
        let image_bit_depth = cur.read_u32::<LittleEndian>()?;
        let parent_object = cur.read_u32::<LittleEndian>()?;
        let association_type = cur.read_u16::<LittleEndian>()?;
        let association_desc = cur.read_u32::<LittleEndian>()?;
        let sequence_number = cur.read_u32::<LittleEndian>()?;
        let filename = decode_ptp_string(&mut cur)?;
        let capture_date = decode_ptp_string(&mut cur)?;
        let modification_date = decode_ptp_string(&mut cur)?;
        let keywords = decode_ptp_string(&mut cur)?;
        Ok(Self {
            storage_id,
            object_format,
            protection_status,
            object_compressed_size,
            thumb_format,
            thumb_compressed_size,
            thumb_pix_width,
            thumb_pix_height,
            image_pix_width,
            image_pix_height,
            image_bit_depth,
            parent_object,
            association_type,
            association_desc,
            sequence_number,
            filename,
            capture_date,
            modification_date,
            keywords,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_portion_is_52_bytes_before_strings() {
        let info = ObjectInfo::for_new_file(1, 0xFFFFFFFF, 0x3000, 1024, "");
        let bytes = info.encode().unwrap();
        // 52 bytes fixed fields + 4 empty strings (1 byte each).
        assert_eq!(bytes.len(), 52 + 4);
    }

    #[test]
    fn p3_roundtrip_with_all_optional_fields() {
        let info = ObjectInfo {
            storage_id: 0x00010001,
            object_format: 0x3000,
            protection_status: 0,
            object_compressed_size: 123456,
            thumb_format: 0,
            thumb_compressed_size: 0,
            thumb_pix_width: 0,
            thumb_pix_height: 0,
            image_pix_width: 0,
            image_pix_height: 0,
            image_bit_depth: 0,
            parent_object: 42,
            association_type: 0,
            association_desc: 0,
            sequence_number: 0,
            filename: "IMG_0001.JPG".to_string(),
            capture_date: "20260101T000000".to_string(),
            modification_date: "20260102T000000".to_string(),
            keywords: "vacation".to_string(),
        };
        let bytes = info.encode().unwrap();
        let decoded = ObjectInfo::decode(&bytes).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn ptp_datetime_roundtrips_through_format_and_parse() {
        let now = SystemTime::now();
        let formatted = format_ptp_datetime(now);
        assert_eq!(formatted.len(), 15);
        let parsed = parse_ptp_datetime(&formatted).unwrap();
        let expected = now.duration_since(std::time::UNIX_EPOCH).unwrap().as_secs() as i64;
        // Formatting truncates to whole seconds, so allow for that rounding.
        assert!((parsed - expected).abs() <= 1);
    }

    #[test]
    fn parse_ptp_datetime_rejects_garbage() {
        assert!(parse_ptp_datetime("not-a-date").is_none());
    }

    #[test]
    fn parent_zero_means_root_on_some_devices() {
        // The dataset itself just carries whatever u32 the caller set; the
        // root<->0xFFFFFFFF/0 remapping is a ladder-rung concern (session/write.rs),
        // not a codec concern. This only documents that 0 round-trips cleanly.
        let info = ObjectInfo::for_new_file(1, 0, 0x3000, 10, "a.txt");
        let bytes = info.encode().unwrap();
        assert_eq!(ObjectInfo::decode(&bytes).unwrap().parent_object, 0);
    }
}
