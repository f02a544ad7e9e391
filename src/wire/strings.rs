//! PTP variable-length strings: a 1-byte UCS-2 code-unit count (including the
//! null terminator) followed by that many little-endian u16 code units.
//! Empty strings encode as a single `0x00` byte (spec.md §4.1, §6).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::error::{MtpError, MtpResult};

/// Maximum representable length: count byte is a single `u8`, and one unit is
/// reserved for the null terminator.
pub const MAX_STRING_UNITS: usize = 254;

pub fn encode_ptp_string(s: &str) -> MtpResult<Vec<u8>> {
    if s.is_empty() {
        return Ok(vec![0u8]);
    }
    let units: Vec<u16> = s.encode_utf16().collect();
    if units.len() > MAX_STRING_UNITS {
        return Err(MtpError::ProtocolError(format!(
            "string too long for PTP encoding: {} UCS-2 units > {}",
            units.len(),
            MAX_STRING_UNITS
        )));
    }
    let count_including_null = units.len() as u8 + 1;
    let mut buf = Vec::with_capacity(1 + units.len() * 2 + 2);
    buf.write_u8(count_including_null).map_err(io_err)?;
    for u in units {
        buf.write_u16::<LittleEndian>(u).map_err(io_err)?;
    }
    buf.write_u16::<LittleEndian>(0).map_err(io_err)?; // null terminator
    Ok(buf)
}

/// Decode a PTP string from a cursor positioned at the count byte; advances
/// the cursor past the string.
pub fn decode_ptp_string<R: Read>(cur: &mut R) -> MtpResult<String> {
    let count = cur.read_u8().map_err(io_err)?;
    if count == 0 {
        return Ok(String::new());
    }
    let mut units = Vec::with_capacity(count as usize);
    for _ in 0..count {
        units.push(cur.read_u16::<LittleEndian>().map_err(io_err)?);
    }
    // Drop the trailing null terminator unit, if present, before decoding.
    if units.last() == Some(&0) {
        units.pop();
    }
    String::from_utf16(&units)
        .map_err(|e| MtpError::ProtocolError(format!("bad UCS-2 string data: {e}")))
}

/// Convenience for decoding from a byte slice, returning the number of bytes
/// consumed alongside the string.
pub fn decode_ptp_string_from_slice(buf: &[u8]) -> MtpResult<(String, usize)> {
    let mut cur = Cursor::new(buf);
    let s = decode_ptp_string(&mut cur)?;
    Ok((s, cur.position() as usize))
}

fn io_err(e: std::io::Error) -> MtpError {
    MtpError::TransportIo(e.to_string())
}

/// Helper for tests exercising encode-into-writer directly.
pub fn write_ptp_string<W: Write>(w: &mut W, s: &str) -> MtpResult<()> {
    w.write_all(&encode_ptp_string(s)?).map_err(io_err)
}
