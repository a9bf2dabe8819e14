//! Value types crossing the wire.
//!
//! [`Cell`] is a decoded result column, [`ParamValue`] an input parameter.
//! Driver-layer callers that only have a type code and native bytes bind
//! through [`HostType`], which resolves them into a [`ParamValue`].

use bytes::Bytes;
use rmp::{encode, Marker};

use super::msgpack;
use crate::error::{Error, Result};

// ============================================================================
// Decoded Cells
// ============================================================================

/// Wire type tag of a decoded cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Nil,
    Int,
    UInt,
    Float,
    Double,
    Str,
    Bin,
}

/// One decoded result column.
///
/// String and binary payloads are views into the reply frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Nil,
    Int(i64),
    UInt(u64),
    Float(f64),
    Double(f64),
    Str(Bytes),
    Bin(Bytes),
}

impl Cell {
    /// Build a string cell by copying `s`.
    pub fn str(s: &str) -> Self {
        Cell::Str(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Build a binary cell by copying `b`.
    pub fn bin(b: &[u8]) -> Self {
        Cell::Bin(Bytes::copy_from_slice(b))
    }

    pub fn wire_type(&self) -> WireType {
        match self {
            Cell::Nil => WireType::Nil,
            Cell::Int(_) => WireType::Int,
            Cell::UInt(_) => WireType::UInt,
            Cell::Float(_) => WireType::Float,
            Cell::Double(_) => WireType::Double,
            Cell::Str(_) => WireType::Str,
            Cell::Bin(_) => WireType::Bin,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Nil)
    }

    /// Byte length: payload length for strings and binaries, 8 for numbers.
    pub fn len(&self) -> usize {
        match self {
            Cell::Nil => 0,
            Cell::Int(_) | Cell::UInt(_) | Cell::Float(_) | Cell::Double(_) => 8,
            Cell::Str(b) | Cell::Bin(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer value. Unsigned values are reinterpreted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            Cell::UInt(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Integer value. Signed values are reinterpreted.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Cell::Int(v) => Some(*v as u64),
            Cell::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(v) | Cell::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Cell::Str(b) | Cell::Bin(b) => Some(b),
            _ => None,
        }
    }

    /// Decode one cell from the front of `buf`.
    ///
    /// Booleans, arrays, maps and extensions are not valid SQL column values.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let marker = msgpack::read_marker(buf)?;
        let cell = match marker {
            Marker::Null => Cell::Nil,
            Marker::FixPos(n) => Cell::UInt(n as u64),
            Marker::U8 => Cell::UInt(msgpack::read_u8(buf)? as u64),
            Marker::U16 => Cell::UInt(msgpack::read_u16(buf)? as u64),
            Marker::U32 => Cell::UInt(msgpack::read_u32(buf)? as u64),
            Marker::U64 => Cell::UInt(msgpack::read_u64(buf)?),
            Marker::FixNeg(n) => Cell::Int(n as i64),
            Marker::I8 => Cell::Int(msgpack::read_u8(buf)? as i8 as i64),
            Marker::I16 => Cell::Int(msgpack::read_u16(buf)? as i16 as i64),
            Marker::I32 => Cell::Int(msgpack::read_u32(buf)? as i32 as i64),
            Marker::I64 => Cell::Int(msgpack::read_u64(buf)? as i64),
            Marker::F32 => Cell::Float(msgpack::read_f32(buf)? as f64),
            Marker::F64 => Cell::Double(msgpack::read_f64(buf)?),
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                let len = msgpack::read_data_len(buf, marker)?;
                Cell::Str(msgpack::read_slice(buf, len)?)
            }
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => {
                let len = msgpack::read_data_len(buf, marker)?;
                Cell::Bin(msgpack::read_slice(buf, len)?)
            }
            m => {
                return Err(Error::protocol(format!(
                    "unsupported column value {:?}",
                    m
                )))
            }
        };
        Ok(cell)
    }
}

// ============================================================================
// Host Type Codes
// ============================================================================

/// Type codes used by the driver layer for raw parameter binding.
///
/// Widths are native: `Long`/`ULong` are 64-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum HostType {
    Nil = 0,
    Bool = 1,
    Tiny = 2,
    UTiny = 3,
    Short = 4,
    UShort = 5,
    Int = 6,
    UInt = 7,
    Long = 8,
    ULong = 9,
    BigInt = 10,
    UBigInt = 11,
    Float = 12,
    Double = 13,
    Char = 14,
    Bin = 15,
}

impl TryFrom<i32> for HostType {
    type Error = i32;

    fn try_from(code: i32) -> std::result::Result<Self, i32> {
        let ty = match code {
            0 => HostType::Nil,
            1 => HostType::Bool,
            2 => HostType::Tiny,
            3 => HostType::UTiny,
            4 => HostType::Short,
            5 => HostType::UShort,
            6 => HostType::Int,
            7 => HostType::UInt,
            8 => HostType::Long,
            9 => HostType::ULong,
            10 => HostType::BigInt,
            11 => HostType::UBigInt,
            12 => HostType::Float,
            13 => HostType::Double,
            14 => HostType::Char,
            15 => HostType::Bin,
            other => return Err(other),
        };
        Ok(ty)
    }
}

impl HostType {
    /// Bytes needed for a fixed-width value, `None` for variable-length types.
    pub fn width(self) -> Option<usize> {
        match self {
            HostType::Nil | HostType::Char | HostType::Bin => None,
            HostType::Bool | HostType::Tiny | HostType::UTiny => Some(1),
            HostType::Short | HostType::UShort => Some(2),
            HostType::Int | HostType::UInt | HostType::Float => Some(4),
            HostType::Long
            | HostType::ULong
            | HostType::BigInt
            | HostType::UBigInt
            | HostType::Double => Some(8),
        }
    }

    /// Read a native-endian value of this type from `data`.
    ///
    /// Returns `None` when `data` is shorter than the type's width.
    pub fn resolve(self, data: &Bytes) -> Option<ParamValue> {
        if let Some(width) = self.width() {
            if data.len() < width {
                return None;
            }
        }

        fn arr<const N: usize>(data: &[u8]) -> [u8; N] {
            let mut out = [0u8; N];
            out.copy_from_slice(&data[..N]);
            out
        }

        let value = match self {
            HostType::Nil => ParamValue::Nil,
            HostType::Bool => ParamValue::Bool(data[0] != 0),
            HostType::Tiny => ParamValue::I8(data[0] as i8),
            HostType::UTiny => ParamValue::U8(data[0]),
            HostType::Short => ParamValue::I16(i16::from_ne_bytes(arr(data))),
            HostType::UShort => ParamValue::U16(u16::from_ne_bytes(arr(data))),
            HostType::Int => ParamValue::I32(i32::from_ne_bytes(arr(data))),
            HostType::UInt => ParamValue::U32(u32::from_ne_bytes(arr(data))),
            HostType::Long | HostType::BigInt => ParamValue::I64(i64::from_ne_bytes(arr(data))),
            HostType::ULong | HostType::UBigInt => {
                ParamValue::U64(u64::from_ne_bytes(arr(data)))
            }
            HostType::Float => ParamValue::F32(f32::from_ne_bytes(arr(data))),
            HostType::Double => ParamValue::F64(f64::from_ne_bytes(arr(data))),
            HostType::Char => ParamValue::Char(data.clone()),
            HostType::Bin => ParamValue::Bin(data.clone()),
        };
        Some(value)
    }
}

// ============================================================================
// Input Parameters
// ============================================================================

/// An input parameter value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ParamValue {
    #[default]
    Nil,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Character data, sent as a wire string of exactly this length.
    Char(Bytes),
    Bin(Bytes),
    /// Driver-layer value: host type code plus native bytes.
    Raw { code: i32, data: Bytes },
}

impl ParamValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Nil)
    }

    /// Append the MessagePack encoding of this value.
    ///
    /// `index` identifies the parameter in errors.
    pub fn encode(&self, index: usize, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            ParamValue::Nil => encode::write_nil(buf)?,
            ParamValue::Bool(v) => encode::write_bool(buf, *v)?,
            ParamValue::I8(v) => {
                encode::write_sint(buf, *v as i64)?;
            }
            ParamValue::I16(v) => {
                encode::write_sint(buf, *v as i64)?;
            }
            ParamValue::I32(v) => {
                encode::write_sint(buf, *v as i64)?;
            }
            ParamValue::I64(v) => {
                encode::write_sint(buf, *v)?;
            }
            ParamValue::U8(v) => {
                encode::write_uint(buf, *v as u64)?;
            }
            ParamValue::U16(v) => {
                encode::write_uint(buf, *v as u64)?;
            }
            ParamValue::U32(v) => {
                encode::write_uint(buf, *v as u64)?;
            }
            ParamValue::U64(v) => {
                encode::write_uint(buf, *v)?;
            }
            ParamValue::F32(v) => encode::write_f32(buf, *v)?,
            ParamValue::F64(v) => encode::write_f64(buf, *v)?,
            ParamValue::Char(s) => {
                let len = u32::try_from(s.len()).map_err(|_| Error::InvalidParameter {
                    index,
                    reason: "string longer than 4 GiB".to_string(),
                })?;
                encode::write_str_len(buf, len)?;
                buf.extend_from_slice(s);
            }
            ParamValue::Bin(b) => {
                if u32::try_from(b.len()).is_err() {
                    return Err(Error::InvalidParameter {
                        index,
                        reason: "binary longer than 4 GiB".to_string(),
                    });
                }
                encode::write_bin(buf, b)?;
            }
            ParamValue::Raw { code, data } => {
                let ty = HostType::try_from(*code)
                    .map_err(|code| Error::UnsupportedBindType { index, code })?;
                let value = ty.resolve(data).ok_or_else(|| Error::InvalidParameter {
                    index,
                    reason: format!(
                        "{} bytes supplied for type {:?}",
                        data.len(),
                        ty
                    ),
                })?;
                value.encode(index, buf)?;
            }
        }
        Ok(())
    }
}

macro_rules! param_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(v: $ty) -> Self {
                    ParamValue::$variant(v)
                }
            }

            impl From<$ty> for Param {
                fn from(v: $ty) -> Self {
                    Param::new(ParamValue::$variant(v))
                }
            }
        )*
    };
}

param_from! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Char(Bytes::copy_from_slice(v.as_bytes()))
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Char(Bytes::from(v))
    }
}

impl From<&[u8]> for ParamValue {
    fn from(v: &[u8]) -> Self {
        ParamValue::Bin(Bytes::copy_from_slice(v))
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(v: Vec<u8>) -> Self {
        ParamValue::Bin(Bytes::from(v))
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::new(v)
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::new(v)
    }
}

impl From<&[u8]> for Param {
    fn from(v: &[u8]) -> Self {
        Param::new(v)
    }
}

impl From<Vec<u8>> for Param {
    fn from(v: Vec<u8>) -> Self {
        Param::new(v)
    }
}

impl From<ParamValue> for Param {
    fn from(v: ParamValue) -> Self {
        Param::new(v)
    }
}

/// A bound input parameter: value, optional name and null flag.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Param {
    pub value: ParamValue,
    pub name: Option<String>,
    /// Send nil regardless of `value`.
    pub is_null: bool,
}

impl Param {
    pub fn new(value: impl Into<ParamValue>) -> Self {
        Param {
            value: value.into(),
            name: None,
            is_null: false,
        }
    }

    pub fn null() -> Self {
        Param::default()
    }

    /// A parameter sent as a one-entry map `{name: value}`.
    pub fn named(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Param {
            value: value.into(),
            name: Some(name.into()),
            is_null: false,
        }
    }

    /// Driver-layer form: a host type code and native bytes. A missing
    /// value binds nil.
    pub fn raw(code: i32, data: Option<&[u8]>) -> Self {
        match data {
            Some(data) => Param::new(ParamValue::Raw {
                code,
                data: Bytes::copy_from_slice(data),
            }),
            None => Param::null(),
        }
    }

    pub fn with_null(mut self, is_null: bool) -> Self {
        self.is_null = is_null;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether this parameter goes out as wire nil.
    pub fn sends_nil(&self) -> bool {
        self.is_null || self.value.is_null()
    }
}
