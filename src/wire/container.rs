//! PTP container framing: the 12-byte header plus up to 5 command/response
//! params, or an opaque payload for data containers (spec.md §4.1, §6).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::error::{MtpError, MtpResult};
use crate::wire::codes::ContainerType;

pub const HEADER_LEN: u32 = 12;
pub const MAX_PARAMS: usize = 5;

/// A fully-formed command or response container: header + up to 5 params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamContainer {
    pub kind: ContainerType,
    pub code: u16,
    pub txid: u32,
    pub params: Vec<u32>,
}

impl ParamContainer {
    pub fn command(code: u16, txid: u32, params: &[u32]) -> Self {
        Self {
            kind: ContainerType::Command,
            code,
            txid,
            params: params.to_vec(),
        }
    }

    pub fn encode(&self) -> MtpResult<Vec<u8>> {
        if self.params.len() > MAX_PARAMS {
            return Err(MtpError::ProtocolError(format!(
                "too many params: {} > {}",
                self.params.len(),
                MAX_PARAMS
            )));
        }
        let length = HEADER_LEN + 4 * self.params.len() as u32;
        let mut buf = Vec::with_capacity(length as usize);
        buf.write_u32::<LittleEndian>(length)
            .map_err(io_err)?;
        buf.write_u16::<LittleEndian>(self.kind as u16)
            .map_err(io_err)?;
        buf.write_u16::<LittleEndian>(self.code).map_err(io_err)?;
        buf.write_u32::<LittleEndian>(self.txid).map_err(io_err)?;
        for p in &self.params {
            buf.write_u32::<LittleEndian>(*p).map_err(io_err)?;
        }
        Ok(buf)
    }

    /// Decode a full container (header already known to be `buf[0..12]`,
    /// remaining params inferred from `length`).
    pub fn decode(buf: &[u8]) -> MtpResult<Self> {
        let (length, kind, code, txid) = decode_header(buf)?;
        let payload_len = length
            .checked_sub(HEADER_LEN)
            .ok_or_else(|| MtpError::ProtocolError("length < 12".to_string()))?;
        if payload_len % 4 != 0 {
            return Err(MtpError::ProtocolError(
                "param payload not a multiple of 4 bytes".to_string(),
            ));
        }
        let n_params = (payload_len / 4) as usize;
        if n_params > MAX_PARAMS {
            return Err(MtpError::ProtocolError(format!(
                "too many params in container: {n_params}"
            )));
        }
        if buf.len() < length as usize {
            return Err(MtpError::ProtocolError(
                "truncated container: fewer bytes than declared length".to_string(),
            ));
        }
        let mut cur = Cursor::new(&buf[HEADER_LEN as usize..length as usize]);
        let mut params = Vec::with_capacity(n_params);
        for _ in 0..n_params {
            params.push(cur.read_u32::<LittleEndian>().map_err(io_err)?);
        }
        Ok(Self {
            kind,
            code,
            txid,
            params,
        })
    }
}

/// Decode just the 12-byte header, returning `(length, kind, code, txid)`.
pub fn decode_header(buf: &[u8]) -> MtpResult<(u32, ContainerType, u16, u32)> {
    if buf.len() < HEADER_LEN as usize {
        return Err(MtpError::ProtocolError(
            "malformed-container: shorter than 12 bytes".to_string(),
        ));
    }
    let mut cur = Cursor::new(&buf[..HEADER_LEN as usize]);
    let length = cur.read_u32::<LittleEndian>().map_err(io_err)?;
    if length < HEADER_LEN {
        return Err(MtpError::ProtocolError(format!(
            "malformed-container: length {length} < 12"
        )));
    }
    let kind_raw = cur.read_u16::<LittleEndian>().map_err(io_err)?;
    let kind = ContainerType::try_from(kind_raw)
        .map_err(|_| MtpError::ProtocolError(format!("malformed-container: bad type {kind_raw}")))?;
    let code = cur.read_u16::<LittleEndian>().map_err(io_err)?;
    let txid = cur.read_u32::<LittleEndian>().map_err(io_err)?;
    Ok((length, kind, code, txid))
}

/// Encode a data container header (`type = Data`) for a payload of `payload_len`
/// bytes. The payload itself is streamed separately (spec.md §4.3 step 2).
pub fn encode_data_header(code: u16, txid: u32, payload_len: u64) -> MtpResult<Vec<u8>> {
    let length = HEADER_LEN as u64 + payload_len;
    if length > u32::MAX as u64 {
        return Err(MtpError::ProtocolError(
            "data container length overflows u32".to_string(),
        ));
    }
    let mut buf = Vec::with_capacity(HEADER_LEN as usize);
    buf.write_u32::<LittleEndian>(length as u32)
        .map_err(io_err)?;
    buf.write_u16::<LittleEndian>(ContainerType::Data as u16)
        .map_err(io_err)?;
    buf.write_u16::<LittleEndian>(code).map_err(io_err)?;
    buf.write_u32::<LittleEndian>(txid).map_err(io_err)?;
    Ok(buf)
}

fn io_err(e: io::Error) -> MtpError {
    MtpError::TransportIo(e.to_string())
}

/// Helper used by tests and mock transports: write a container to any `Write`.
pub fn write_container<W: Write>(w: &mut W, c: &ParamContainer) -> MtpResult<()> {
    w.write_all(&c.encode()?).map_err(io_err)
}

/// Helper used by tests and mock transports: read a full container (header +
/// params) from any `Read`.
pub fn read_container<R: Read>(r: &mut R) -> MtpResult<ParamContainer> {
    let mut header = [0u8; HEADER_LEN as usize];
    r.read_exact(&mut header).map_err(io_err)?;
    let (length, kind, code, txid) = decode_header(&header)?;
    let mut full = header.to_vec();
    full.resize(length as usize, 0);
    r.read_exact(&mut full[HEADER_LEN as usize..]).map_err(io_err)?;
    ParamContainer::decode(&full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn header_is_exactly_12_bytes() {
        let c = ParamContainer::command(0x1001, 1, &[]);
        let bytes = c.encode().unwrap();
        assert_eq!(&bytes[0..4], &12u32.to_le_bytes());
    }

    #[test]
    fn rejects_short_header() {
        assert!(decode_header(&[0u8; 4]).is_err());
    }

    #[test]
    fn rejects_length_less_than_12() {
        let mut buf = vec![0u8; 12];
        buf[0..4].copy_from_slice(&4u32.to_le_bytes());
        assert!(decode_header(&buf).is_err());
    }

    proptest! {
        // P1: for every command (code, params) with 0..=5 params, encode/decode round-trips,
        // and header length == 12 + 4*|params|.
        #[test]
        fn p1_framing_roundtrip(code in any::<u16>(), txid in any::<u32>(), n in 0usize..=5, seed in any::<u32>()) {
            let params: Vec<u32> = (0..n).map(|i| seed.wrapping_add(i as u32)).collect();
            let c = ParamContainer::command(code, txid, &params);
            let bytes = c.encode().unwrap();
            prop_assert_eq!(bytes.len() as u32, 12 + 4 * n as u32);
            let decoded = ParamContainer::decode(&bytes).unwrap();
            prop_assert_eq!(decoded.code, code);
            prop_assert_eq!(decoded.txid, txid);
            prop_assert_eq!(decoded.params, params);
        }
    }
}
