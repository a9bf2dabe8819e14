//! MessagePack reading over [`Bytes`].
//!
//! `rmp` reads from `io::Read`, which would copy every string out of the
//! frame. These helpers classify markers with [`rmp::Marker`] and hand out
//! [`Bytes`] slices instead, so decoded strings share the reply buffer.

use bytes::{Buf, Bytes};
use rmp::Marker;

use crate::error::{Error, Result};

fn need(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::protocol(format!(
            "truncated value: need {} bytes, have {}",
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

pub(crate) fn peek_marker(buf: &Bytes) -> Result<Marker> {
    need(buf, 1)?;
    Ok(Marker::from_u8(buf[0]))
}

pub(crate) fn read_marker(buf: &mut Bytes) -> Result<Marker> {
    need(buf, 1)?;
    Ok(Marker::from_u8(buf.get_u8()))
}

pub(crate) fn read_u8(buf: &mut Bytes) -> Result<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub(crate) fn read_u16(buf: &mut Bytes) -> Result<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16())
}

pub(crate) fn read_u32(buf: &mut Bytes) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

pub(crate) fn read_u64(buf: &mut Bytes) -> Result<u64> {
    need(buf, 8)?;
    Ok(buf.get_u64())
}

pub(crate) fn read_f32(buf: &mut Bytes) -> Result<f32> {
    need(buf, 4)?;
    Ok(buf.get_f32())
}

pub(crate) fn read_f64(buf: &mut Bytes) -> Result<f64> {
    need(buf, 8)?;
    Ok(buf.get_f64())
}

/// Split `len` bytes off the front without copying.
pub(crate) fn read_slice(buf: &mut Bytes, len: usize) -> Result<Bytes> {
    need(buf, len)?;
    Ok(buf.split_to(len))
}

pub(crate) fn read_array_len(buf: &mut Bytes) -> Result<u32> {
    match read_marker(buf)? {
        Marker::FixArray(n) => Ok(n as u32),
        Marker::Array16 => Ok(read_u16(buf)? as u32),
        Marker::Array32 => read_u32(buf),
        m => Err(Error::protocol(format!("expected array, got {:?}", m))),
    }
}

pub(crate) fn read_map_len(buf: &mut Bytes) -> Result<u32> {
    match read_marker(buf)? {
        Marker::FixMap(n) => Ok(n as u32),
        Marker::Map16 => Ok(read_u16(buf)? as u32),
        Marker::Map32 => read_u32(buf),
        m => Err(Error::protocol(format!("expected map, got {:?}", m))),
    }
}

/// Read a non-negative integer, whichever marker encodes it.
pub(crate) fn read_uint(buf: &mut Bytes) -> Result<u64> {
    let marker = read_marker(buf)?;
    let value = match marker {
        Marker::FixPos(n) => n as i128,
        Marker::U8 => read_u8(buf)? as i128,
        Marker::U16 => read_u16(buf)? as i128,
        Marker::U32 => read_u32(buf)? as i128,
        Marker::U64 => read_u64(buf)? as i128,
        Marker::I8 => read_u8(buf)? as i8 as i128,
        Marker::I16 => read_u16(buf)? as i16 as i128,
        Marker::I32 => read_u32(buf)? as i32 as i128,
        Marker::I64 => read_u64(buf)? as i64 as i128,
        m => return Err(Error::protocol(format!("expected unsigned integer, got {:?}", m))),
    };
    u64::try_from(value).map_err(|_| Error::protocol(format!("negative integer {}", value)))
}

/// Length of a string or binary payload following `marker`.
pub(crate) fn read_data_len(buf: &mut Bytes, marker: Marker) -> Result<usize> {
    let len = match marker {
        Marker::FixStr(n) => n as usize,
        Marker::Str8 | Marker::Bin8 => read_u8(buf)? as usize,
        Marker::Str16 | Marker::Bin16 => read_u16(buf)? as usize,
        Marker::Str32 | Marker::Bin32 => read_u32(buf)? as usize,
        m => return Err(Error::protocol(format!("expected string or binary, got {:?}", m))),
    };
    Ok(len)
}

pub(crate) fn read_str(buf: &mut Bytes) -> Result<Bytes> {
    let marker = read_marker(buf)?;
    match marker {
        Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
            let len = read_data_len(buf, marker)?;
            read_slice(buf, len)
        }
        m => Err(Error::protocol(format!("expected string, got {:?}", m))),
    }
}

/// Skip one complete value, including nested containers.
pub(crate) fn skip_value(buf: &mut Bytes) -> Result<()> {
    let mut pending: u64 = 1;
    while pending > 0 {
        pending -= 1;
        let marker = read_marker(buf)?;
        let skip = match marker {
            Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => 0,
            Marker::U8 | Marker::I8 => 1,
            Marker::U16 | Marker::I16 => 2,
            Marker::U32 | Marker::I32 | Marker::F32 => 4,
            Marker::U64 | Marker::I64 | Marker::F64 => 8,
            Marker::FixStr(_)
            | Marker::Str8
            | Marker::Str16
            | Marker::Str32
            | Marker::Bin8
            | Marker::Bin16
            | Marker::Bin32 => read_data_len(buf, marker)?,
            Marker::FixArray(n) => {
                pending += n as u64;
                0
            }
            Marker::Array16 => {
                pending += read_u16(buf)? as u64;
                0
            }
            Marker::Array32 => {
                pending += read_u32(buf)? as u64;
                0
            }
            Marker::FixMap(n) => {
                pending += 2 * n as u64;
                0
            }
            Marker::Map16 => {
                pending += 2 * read_u16(buf)? as u64;
                0
            }
            Marker::Map32 => {
                pending += 2 * read_u32(buf)? as u64;
                0
            }
            // type byte plus payload
            Marker::FixExt1 => 2,
            Marker::FixExt2 => 3,
            Marker::FixExt4 => 5,
            Marker::FixExt8 => 9,
            Marker::FixExt16 => 17,
            Marker::Ext8 => read_u8(buf)? as usize + 1,
            Marker::Ext16 => read_u16(buf)? as usize + 1,
            Marker::Ext32 => read_u32(buf)? as usize + 1,
            Marker::Reserved => return Err(Error::protocol("reserved marker 0xc1")),
        };
        need(buf, skip)?;
        buf.advance(skip);
    }
    Ok(())
}

/// Split one complete encoded value off the front of `buf`.
pub(crate) fn read_value_bytes(buf: &mut Bytes) -> Result<Bytes> {
    let start = buf.clone();
    skip_value(buf)?;
    let consumed = start.len() - buf.len();
    Ok(start.slice(..consumed))
}
