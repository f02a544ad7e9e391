//! PTP/MTP operation, response and format codes (spec.md §6).

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Container type tag in the 12-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ContainerType {
    Command = 1,
    Data = 2,
    Response = 3,
    Event = 4,
}

/// Operation codes used by the engine (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum OperationCode {
    GetDeviceInfo = 0x1001,
    OpenSession = 0x1002,
    CloseSession = 0x1003,
    GetStorageIDs = 0x1004,
    GetStorageInfo = 0x1005,
    GetObjectHandles = 0x1007,
    GetObjectInfo = 0x1008,
    GetObject = 0x1009,
    DeleteObject = 0x100B,
    SendObjectInfo = 0x100C,
    SendObject = 0x100D,
    ResetDevice = 0x1010,
    MoveObject = 0x1019,
    GetPartialObject = 0x101B,
    GetObjectPropList = 0x9805,
    GetObjectPropValue = 0x9806,
    SendPartialObject = 0x95C1,
    GetPartialObject64 = 0x95C4,
    SendObjectPropList = 0x9808,
}

/// Response codes the core branches on (spec.md §6/§7). `Ok` is success;
/// every other value maps through [`crate::error::MtpError::from_response_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ResponseCode {
    Ok = 0x2001,
    SessionNotOpen = 0x2003,
    OperationNotSupported = 0x2005,
    InvalidStorageID = 0x2008,
    InvalidObjectHandle = 0x2009,
    StoreNotAvailable = 0x200B,
    StorageFull = 0x200C,
    WriteProtected = 0x200D,
    ReadOnly = 0x200E,
    PermissionDenied = 0x200F,
    AccessDenied = 0x2011,
    DeviceBusy = 0x2019,
    InvalidParameterValue = 0x201D,
    SessionAlreadyOpen = 0x201E,
}

/// Object format codes referenced by the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ObjectFormatCode {
    Undefined = 0x3000,
    Association = 0x3001,
}

/// Object property codes used by GetObjectPropList / SendObjectPropList.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ObjectPropCode {
    StorageID = 0xDC01,
    ObjectFormat = 0xDC02,
    ParentObject = 0xDC0B,
    ObjectFileName = 0xDC07,
    ObjectSize = 0xDC04,
    DateModified = 0xDC09,
}

/// PTP dataset value type tags (GetObjectPropDesc `dataType` / PropList entries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum DataTypeCode {
    Uint8 = 0x0002,
    Uint16 = 0x0004,
    Uint32 = 0x0006,
    Uint64 = 0x0008,
    String = 0xFFFF,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_ok_is_0x2001() {
        assert_eq!(ResponseCode::Ok as u16, 0x2001);
    }

    #[test]
    fn opcode_roundtrip() {
        let raw: u16 = OperationCode::GetObjectPropList.into();
        assert_eq!(raw, 0x9805);
        assert_eq!(
            OperationCode::try_from(0x9805u16).unwrap(),
            OperationCode::GetObjectPropList
        );
    }
}
