//! High-level PTP operations built on [`super::PtpLink`] (spec.md §4.3).

use crate::error::MtpResult;
use crate::types::{DeviceInfo, StorageInfo};
use crate::wire::codes::OperationCode;
use crate::wire::object_info::ObjectInfo;
use crate::wire::prop_list::{decode_prop_list, PropEntry};
use crate::wire::strings::decode_ptp_string;

use super::PtpLink;

pub async fn open_session(link: &PtpLink, session_id: u32) -> MtpResult<()> {
    link.execute_command(OperationCode::OpenSession.into(), &[session_id])
        .await?;
    Ok(())
}

pub async fn close_session(link: &PtpLink) -> MtpResult<()> {
    link.execute_command(OperationCode::CloseSession.into(), &[])
        .await?;
    Ok(())
}

pub async fn reset_device(link: &PtpLink) -> MtpResult<()> {
    link.execute_command(OperationCode::ResetDevice.into(), &[])
        .await?;
    Ok(())
}

pub async fn get_device_info(link: &PtpLink) -> MtpResult<DeviceInfo> {
    let mut payload = Vec::new();
    {
        let mut consumer = |slice: &[u8]| -> MtpResult<usize> {
            payload.extend_from_slice(slice);
            Ok(slice.len())
        };
        link.execute_streaming_command(
            OperationCode::GetDeviceInfo.into(),
            &[],
            None,
            None,
            Some(&mut consumer),
        )
        .await?;
    }
    parse_device_info(&payload)
}

fn parse_device_info(buf: &[u8]) -> MtpResult<DeviceInfo> {
    use byteorder::{LittleEndian, ReadBytesExt};
    use std::io::Cursor;

    let mut cur = Cursor::new(buf);
    let _standard_version = cur.read_u16::<LittleEndian>()?;
    let _vendor_extension_id = cur.read_u32::<LittleEndian>()?;
    let _vendor_extension_version = cur.read_u16::<LittleEndian>()?;
    let _vendor_extension_desc = decode_ptp_string(&mut cur)?;
    let _functional_mode = cur.read_u16::<LittleEndian>()?;
    let supported_operations = read_u16_array(&mut cur)?;
    let supported_events = read_u16_array(&mut cur)?;
    let _device_properties_supported = read_u16_array(&mut cur)?;
    let supported_object_formats_capture = read_u16_array(&mut cur)?;
    let supported_object_formats_playback = read_u16_array(&mut cur)?;
    let manufacturer = decode_ptp_string(&mut cur)?;
    let model = decode_ptp_string(&mut cur)?;
    let firmware_version = decode_ptp_string(&mut cur)?;
    let serial_number = decode_ptp_string(&mut cur)?;

    let mut supported_object_formats = supported_object_formats_capture;
    supported_object_formats.extend(supported_object_formats_playback);

    Ok(DeviceInfo {
        manufacturer,
        model,
        firmware_version,
        serial_number: (!serial_number.is_empty()).then_some(serial_number),
        supported_operations,
        supported_events,
        supported_object_formats,
    })
}

fn read_u16_array(cur: &mut std::io::Cursor<&[u8]>) -> MtpResult<Vec<u16>> {
    use byteorder::{LittleEndian, ReadBytesExt};
    let count = cur.read_u32::<LittleEndian>()?;
    if count > 1_000_000 {
        return Err(crate::error::MtpError::ProtocolError(format!(
            "array count {count} exceeds sanity bound"
        )));
    }
    (0..count).map(|_| Ok(cur.read_u16::<LittleEndian>()?)).collect()
}

pub async fn get_storage_ids(link: &PtpLink) -> MtpResult<Vec<u32>> {
    use byteorder::{LittleEndian, ReadBytesExt};
    use std::io::Cursor;

    let mut payload = Vec::new();
    {
        let mut consumer = |slice: &[u8]| -> MtpResult<usize> {
            payload.extend_from_slice(slice);
            Ok(slice.len())
        };
        link.execute_streaming_command(
            OperationCode::GetStorageIDs.into(),
            &[],
            None,
            None,
            Some(&mut consumer),
        )
        .await?;
    }
    let mut cur = Cursor::new(payload.as_slice());
    let count = cur.read_u32::<LittleEndian>()?;
    (0..count).map(|_| Ok(cur.read_u32::<LittleEndian>()?)).collect()
}

pub async fn get_storage_info(link: &PtpLink, storage_id: u32) -> MtpResult<StorageInfo> {
    use byteorder::{LittleEndian, ReadBytesExt};
    use std::io::Cursor;

    let mut payload = Vec::new();
    {
        let mut consumer = |slice: &[u8]| -> MtpResult<usize> {
            payload.extend_from_slice(slice);
            Ok(slice.len())
        };
        link.execute_streaming_command(
            OperationCode::GetStorageInfo.into(),
            &[storage_id],
            None,
            None,
            Some(&mut consumer),
        )
        .await?;
    }
    let mut cur = Cursor::new(payload.as_slice());
    let _storage_type = cur.read_u16::<LittleEndian>()?;
    let _filesystem_type = cur.read_u16::<LittleEndian>()?;
    let access_capability = cur.read_u16::<LittleEndian>()?;
    let capacity_bytes = cur.read_u64::<LittleEndian>()?;
    let free_bytes = cur.read_u64::<LittleEndian>()?;
    let _free_space_in_objects = cur.read_u32::<LittleEndian>()?;
    let description = decode_ptp_string(&mut cur)?;

    Ok(StorageInfo {
        storage_id,
        free_bytes,
        capacity_bytes,
        description,
        read_only: access_capability != 0,
    })
}

pub async fn get_object_handles(link: &PtpLink, storage_id: u32, parent: u32) -> MtpResult<Vec<u32>> {
    use byteorder::{LittleEndian, ReadBytesExt};
    use std::io::Cursor;

    let mut payload = Vec::new();
    {
        let mut consumer = |slice: &[u8]| -> MtpResult<usize> {
            payload.extend_from_slice(slice);
            Ok(slice.len())
        };
        link.execute_streaming_command(
            OperationCode::GetObjectHandles.into(),
            &[storage_id, 0, parent],
            None,
            None,
            Some(&mut consumer),
        )
        .await?;
    }
    let mut cur = Cursor::new(payload.as_slice());
    let count = cur.read_u32::<LittleEndian>()?;
    (0..count).map(|_| Ok(cur.read_u32::<LittleEndian>()?)).collect()
}

pub async fn get_object_info(link: &PtpLink, handle: u32) -> MtpResult<ObjectInfo> {
    let mut payload = Vec::new();
    {
        let mut consumer = |slice: &[u8]| -> MtpResult<usize> {
            payload.extend_from_slice(slice);
            Ok(slice.len())
        };
        link.execute_streaming_command(
            OperationCode::GetObjectInfo.into(),
            &[handle],
            None,
            None,
            Some(&mut consumer),
        )
        .await?;
    }
    ObjectInfo::decode(&payload)
}

/// `GetObjectPropList(objectHandle, format=0, property=0xFFFFFFFF, groupCode=0,
/// depth)`, used by the PropList enumeration strategy to fetch every child's
/// metadata in a single round trip (spec.md §4.3 `EnumerationStrategy::PropList`).
pub async fn get_object_prop_list(link: &PtpLink, parent_handle: u32, depth: u32) -> MtpResult<Vec<PropEntry>> {
    let mut payload = Vec::new();
    {
        let mut consumer = |slice: &[u8]| -> MtpResult<usize> {
            payload.extend_from_slice(slice);
            Ok(slice.len())
        };
        link.execute_streaming_command(
            OperationCode::GetObjectPropList.into(),
            &[parent_handle, 0, 0xFFFFFFFF, 0, depth],
            None,
            None,
            Some(&mut consumer),
        )
        .await?;
    }
    decode_prop_list(&payload)
}

pub async fn delete_object(link: &PtpLink, handle: u32) -> MtpResult<()> {
    link.execute_command(OperationCode::DeleteObject.into(), &[handle])
        .await?;
    Ok(())
}

pub async fn move_object(link: &PtpLink, handle: u32, storage_id: u32, new_parent: u32) -> MtpResult<()> {
    link.execute_command(OperationCode::MoveObject.into(), &[handle, storage_id, new_parent])
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::types::InterfaceDescriptor;
    use crate::wire::container::{self, ParamContainer};
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

    fn push_data_then_response(mock: &MockTransport, code: u16, txid: u32, payload: &[u8]) {
        let mut data = container::encode_data_header(code, txid, payload.len() as u64).unwrap();
        data.extend_from_slice(payload);
        mock.push_inbound(data);
        let resp = ParamContainer {
            kind: ContainerType::Response,
            code: 0x2001,
            txid,
            params: vec![],
        };
        mock.push_inbound(resp.encode().unwrap());
    }

    #[tokio::test]
    async fn get_storage_ids_decodes_u32_array() {
        let mock = Arc::new(MockTransport::new(descriptor()));
        let mut payload = Vec::new();
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(&0x00010001u32.to_le_bytes());
        payload.extend_from_slice(&0x00020001u32.to_le_bytes());
        push_data_then_response(&mock, OperationCode::GetStorageIDs.into(), 1, &payload);

        let link = crate::link::PtpLink::new(mock, 1000);
        let ids = get_storage_ids(&link).await.unwrap();
        assert_eq!(ids, vec![0x00010001, 0x00020001]);
    }

    #[tokio::test]
    async fn get_object_info_roundtrips_through_wire_codec() {
        let info = ObjectInfo::for_new_file(1, 0xFFFFFFFF, 0x3000, 2048, "a.txt");
        let payload = info.encode().unwrap();
        let mock = Arc::new(MockTransport::new(descriptor()));
        push_data_then_response(&mock, OperationCode::GetObjectInfo.into(), 1, &payload);

        let link = crate::link::PtpLink::new(mock, 1000);
        let decoded = get_object_info(&link, 5).await.unwrap();
        assert_eq!(decoded, info);
    }

    #[tokio::test]
    async fn get_object_prop_list_decodes_entries() {
        use crate::wire::codes::ObjectPropCode;
        use crate::wire::prop_list::{encode_prop_list, PropValue};

        let entries = vec![
            PropEntry::new(7, ObjectPropCode::ObjectFileName, PropValue::Str("a.txt".to_string())),
            PropEntry::new(7, ObjectPropCode::ObjectSize, PropValue::U64(42)),
        ];
        let payload = encode_prop_list(&entries).unwrap();
        let mock = Arc::new(MockTransport::new(descriptor()));
        push_data_then_response(&mock, OperationCode::GetObjectPropList.into(), 1, &payload);

        let link = crate::link::PtpLink::new(mock, 1000);
        let decoded = get_object_prop_list(&link, 0xFFFFFFFF, 0).await.unwrap();
        assert_eq!(decoded, entries);
    }
}
