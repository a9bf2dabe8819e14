//! Conversion of decoded cells into caller-owned output buffers.
//!
//! Conversion problems never fail a fetch. They are reported per column in
//! the binding's error slot as a [`Conversion`].

use std::mem::size_of;

use super::types::Cell;

/// Outcome of storing one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conversion {
    #[default]
    Ok,
    /// A value was written but lost range or precision, or did not fit.
    Truncated,
    /// No conversion exists for this pairing; nothing was written.
    Unsupported,
}

/// Destination buffer of an output binding.
#[derive(Debug)]
pub enum Target<'a> {
    /// Indicator slots only.
    None,
    I8(&'a mut i8),
    U8(&'a mut u8),
    I16(&'a mut i16),
    U16(&'a mut u16),
    I32(&'a mut i32),
    U32(&'a mut u32),
    I64(&'a mut i64),
    U64(&'a mut u64),
    F32(&'a mut f32),
    F64(&'a mut f64),
    /// Character buffer; a NUL terminator is added when it fits.
    Str(&'a mut [u8]),
    Bin(&'a mut [u8]),
}

/// A caller-supplied output column.
///
/// The buffer is borrowed, never owned. Each indicator slot is optional:
/// a slot that was not requested is never written.
#[derive(Debug)]
pub struct OutputBinding<'a> {
    target: Target<'a>,
    length: Option<usize>,
    is_null: Option<bool>,
    status: Option<Conversion>,
}

impl<'a> OutputBinding<'a> {
    /// Binding with all indicator slots.
    pub fn new(target: Target<'a>) -> Self {
        OutputBinding {
            target,
            length: Some(0),
            is_null: Some(false),
            status: Some(Conversion::Ok),
        }
    }

    /// Binding without indicator slots.
    pub fn bare(target: Target<'a>) -> Self {
        OutputBinding {
            target,
            length: None,
            is_null: None,
            status: None,
        }
    }

    pub fn with_length(mut self) -> Self {
        self.length.get_or_insert(0);
        self
    }

    pub fn with_null_indicator(mut self) -> Self {
        self.is_null.get_or_insert(false);
        self
    }

    pub fn with_error_flag(mut self) -> Self {
        self.status.get_or_insert(Conversion::Ok);
        self
    }

    /// Bytes written (or needed, for truncated numeric text).
    pub fn length(&self) -> Option<usize> {
        self.length
    }

    pub fn is_null(&self) -> Option<bool> {
        self.is_null
    }

    pub fn status(&self) -> Option<Conversion> {
        self.status
    }

    pub fn target(&self) -> &Target<'a> {
        &self.target
    }

    pub fn into_target(self) -> Target<'a> {
        self.target
    }

    fn set_length(&mut self, len: usize) {
        if let Some(slot) = self.length.as_mut() {
            *slot = len;
        }
    }

    fn set_null(&mut self, is_null: bool) {
        if let Some(slot) = self.is_null.as_mut() {
            *slot = is_null;
        }
    }

    fn set_status(&mut self, status: Conversion) {
        if let Some(slot) = self.status.as_mut() {
            *slot = status;
        }
    }
}

/// Store `cell` into `binding`. `offset` skips leading bytes of string and
/// binary values for piecewise retrieval; it is ignored for numbers.
pub fn store(cell: &Cell, binding: &mut OutputBinding<'_>, offset: usize) -> Conversion {
    binding.set_status(Conversion::Ok);

    if cell.is_null() {
        binding.set_null(true);
        binding.set_length(0);
        return Conversion::Ok;
    }
    binding.set_null(false);

    let (status, length) = match &mut binding.target {
        Target::None => (Conversion::Ok, cell.len()),
        Target::Str(buf) => store_bytes(cell, buf, offset, true),
        Target::Bin(buf) => store_bytes(cell, buf, offset, false),
        Target::I8(dst) => store_int(cell, &mut **dst),
        Target::U8(dst) => store_int(cell, &mut **dst),
        Target::I16(dst) => store_int(cell, &mut **dst),
        Target::U16(dst) => store_int(cell, &mut **dst),
        Target::I32(dst) => store_int(cell, &mut **dst),
        Target::U32(dst) => store_int(cell, &mut **dst),
        Target::I64(dst) => store_int(cell, &mut **dst),
        Target::U64(dst) => store_int(cell, &mut **dst),
        Target::F64(dst) => match numeric(cell) {
            Some(v) => {
                **dst = v;
                (Conversion::Ok, size_of::<f64>())
            }
            None => (Conversion::Unsupported, size_of::<f64>()),
        },
        Target::F32(dst) => match numeric(cell) {
            Some(v) => {
                let (f, exact) = double_to_float(v);
                **dst = f;
                let status = if exact {
                    Conversion::Ok
                } else {
                    Conversion::Truncated
                };
                (status, size_of::<f32>())
            }
            None => (Conversion::Unsupported, size_of::<f32>()),
        },
    };

    binding.set_length(length);
    binding.set_status(status);
    status
}

fn numeric(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Int(v) => Some(*v as f64),
        Cell::UInt(v) => Some(*v as f64),
        Cell::Float(v) | Cell::Double(v) => Some(*v),
        _ => None,
    }
}

/// Integer destinations.
trait WrappingInt: Copy {
    const MIN: i128;
    const MAX: i128;
    fn wrap(v: i128) -> Self;
}

macro_rules! wrapping_int {
    ($($ty:ty),*) => {
        $(
            impl WrappingInt for $ty {
                const MIN: i128 = <$ty>::MIN as i128;
                const MAX: i128 = <$ty>::MAX as i128;

                #[inline]
                fn wrap(v: i128) -> Self {
                    v as $ty
                }
            }
        )*
    };
}

wrapping_int!(i8, u8, i16, u16, i32, u32, i64, u64);

/// Range-checked integer store. Out-of-range values keep their low bits.
fn store_int<T: WrappingInt>(cell: &Cell, dst: &mut T) -> (Conversion, usize) {
    let v = match cell {
        Cell::Int(v) => *v as i128,
        Cell::UInt(v) => *v as i128,
        _ => return (Conversion::Unsupported, size_of::<T>()),
    };
    *dst = T::wrap(v);
    let status = if (T::MIN..=T::MAX).contains(&v) {
        Conversion::Ok
    } else {
        Conversion::Truncated
    };
    (status, size_of::<T>())
}

/// Binary exponent of `v` in the `frexp` convention (mantissa in [0.5, 1)).
fn frexp_exponent(v: f64) -> i32 {
    let biased = ((v.to_bits() >> 52) & 0x7ff) as i32;
    if biased == 0 {
        // subnormal: below every f32 exponent
        return -1022 - (v.abs().to_bits().leading_zeros() as i32 - 12);
    }
    biased - 1022
}

/// Narrow to f32. Returns false when the value fell outside f32's range and
/// was replaced by a signed zero or a signed `f32::MAX`. NaN becomes zero.
pub(crate) fn double_to_float(v: f64) -> (f32, bool) {
    if v == 0.0 {
        return (v as f32, true);
    }
    if v.is_nan() {
        return (0.0, false);
    }
    if v.is_infinite() {
        return (f32::MAX.copysign(v as f32), false);
    }
    let exp = frexp_exponent(v);
    if exp < f32::MIN_EXP {
        return ((0.0f64).copysign(v) as f32, false);
    }
    if exp > f32::MAX_EXP {
        return (f32::MAX.copysign(v as f32), false);
    }
    let f = v as f32;
    if f.is_infinite() {
        return (f32::MAX.copysign(f), false);
    }
    (f, true)
}

fn store_bytes(cell: &Cell, buf: &mut [u8], offset: usize, terminate: bool) -> (Conversion, usize) {
    match cell {
        // only string destinations take numeric text
        Cell::Int(_) | Cell::UInt(_) | Cell::Float(_) | Cell::Double(_) if !terminate => {
            (Conversion::Unsupported, 0)
        }
        Cell::Str(src) | Cell::Bin(src) => {
            let start = offset.min(src.len());
            let remaining = src.len() - start;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&src[start..start + n]);
            if terminate && n < buf.len() {
                buf[n] = 0;
            }
            let status = if remaining > n {
                Conversion::Truncated
            } else {
                Conversion::Ok
            };
            (status, n)
        }
        Cell::Int(v) => {
            let mut fmt = itoa::Buffer::new();
            write_text(fmt.format(*v).as_bytes(), buf)
        }
        Cell::UInt(v) => {
            let mut fmt = itoa::Buffer::new();
            write_text(fmt.format(*v).as_bytes(), buf)
        }
        Cell::Float(v) | Cell::Double(v) => write_text(format!("{:.6}", v).as_bytes(), buf),
        Cell::Nil => (Conversion::Ok, 0),
    }
}

/// Numeric text goes in whole with its terminator, or not at all.
fn write_text(text: &[u8], buf: &mut [u8]) -> (Conversion, usize) {
    if text.len() + 1 > buf.len() {
        return (Conversion::Truncated, text.len());
    }
    buf[..text.len()].copy_from_slice(text);
    buf[text.len()] = 0;
    (Conversion::Ok, text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_out_of_range_wraps() {
        let mut v = 0u8;
        let mut b = OutputBinding::new(Target::U8(&mut v));
        assert_eq!(store(&Cell::UInt(300), &mut b, 0), Conversion::Truncated);
        assert_eq!(b.length(), Some(1));
        drop(b);
        assert_eq!(v, 44);
    }

    #[test]
    fn test_int_in_range() {
        let mut v = 0i16;
        let mut b = OutputBinding::new(Target::I16(&mut v));
        assert_eq!(store(&Cell::Int(-1234), &mut b, 0), Conversion::Ok);
        assert_eq!(b.status(), Some(Conversion::Ok));
        assert_eq!(b.is_null(), Some(false));
        drop(b);
        assert_eq!(v, -1234);
    }

    #[test]
    fn test_negative_into_unsigned_is_truncated() {
        let mut v = 0u32;
        let mut b = OutputBinding::new(Target::U32(&mut v));
        assert_eq!(store(&Cell::Int(-1), &mut b, 0), Conversion::Truncated);
        drop(b);
        assert_eq!(v, u32::MAX);
    }

    #[test]
    fn test_large_uint_into_i64_is_truncated() {
        let mut v = 0i64;
        let mut b = OutputBinding::new(Target::I64(&mut v));
        assert_eq!(store(&Cell::UInt(u64::MAX), &mut b, 0), Conversion::Truncated);
        drop(b);
        assert_eq!(v, -1);
    }

    #[test]
    fn test_double_to_float_range() {
        assert_eq!(double_to_float(1.5), (1.5, true));
        assert_eq!(double_to_float(1e-300), (0.0, false));
        let (f, ok) = double_to_float(-1e-300);
        assert!(!ok);
        assert!(f == 0.0 && f.is_sign_negative());
        assert_eq!(double_to_float(1e300), (f32::MAX, false));
        assert_eq!(double_to_float(-1e300), (-f32::MAX, false));
    }

    #[test]
    fn test_float_target_flags_overflow() {
        let mut v = 0f32;
        let mut b = OutputBinding::new(Target::F32(&mut v));
        assert_eq!(store(&Cell::Double(1e300), &mut b, 0), Conversion::Truncated);
        assert_eq!(b.length(), Some(4));
        drop(b);
        assert_eq!(v, f32::MAX);
    }

    #[test]
    fn test_int_to_double() {
        let mut v = 0f64;
        let mut b = OutputBinding::new(Target::F64(&mut v));
        assert_eq!(store(&Cell::Int(-7), &mut b, 0), Conversion::Ok);
        drop(b);
        assert_eq!(v, -7.0);
    }

    #[test]
    fn test_double_to_int_unsupported() {
        let mut v = 5i32;
        let mut b = OutputBinding::new(Target::I32(&mut v));
        assert_eq!(store(&Cell::Double(1.0), &mut b, 0), Conversion::Unsupported);
        assert_eq!(b.status(), Some(Conversion::Unsupported));
        drop(b);
        assert_eq!(v, 5);
    }

    #[test]
    fn test_string_to_number_unsupported() {
        let mut v = 0f64;
        let mut b = OutputBinding::new(Target::F64(&mut v));
        assert_eq!(store(&Cell::str("1.5"), &mut b, 0), Conversion::Unsupported);
    }

    #[test]
    fn test_number_to_text() {
        let mut buf = [0xffu8; 8];
        let mut b = OutputBinding::new(Target::Str(&mut buf));
        assert_eq!(store(&Cell::Int(-42), &mut b, 0), Conversion::Ok);
        assert_eq!(b.length(), Some(3));
        drop(b);
        assert_eq!(&buf[..4], b"-42\0");
    }

    #[test]
    fn test_double_to_text_six_digits() {
        let mut buf = [0u8; 16];
        let mut b = OutputBinding::new(Target::Str(&mut buf));
        assert_eq!(store(&Cell::Double(2.5), &mut b, 0), Conversion::Ok);
        assert_eq!(b.length(), Some(8));
        drop(b);
        assert_eq!(&buf[..9], b"2.500000\0");
    }

    #[test]
    fn test_number_text_needs_room_for_terminator() {
        let mut buf = [0xffu8; 3];
        let mut b = OutputBinding::new(Target::Str(&mut buf));
        assert_eq!(store(&Cell::UInt(123), &mut b, 0), Conversion::Truncated);
        assert_eq!(b.length(), Some(3));
        drop(b);
        // nothing written
        assert_eq!(buf, [0xff; 3]);
    }

    #[test]
    fn test_string_copy_and_terminator() {
        let mut buf = [0xffu8; 6];
        let mut b = OutputBinding::new(Target::Str(&mut buf));
        assert_eq!(store(&Cell::str("abc"), &mut b, 0), Conversion::Ok);
        assert_eq!(b.length(), Some(3));
        drop(b);
        assert_eq!(&buf[..4], b"abc\0");
        assert_eq!(buf[4], 0xff);
    }

    #[test]
    fn test_string_exact_fit_has_no_terminator() {
        let mut buf = [0xffu8; 3];
        let mut b = OutputBinding::new(Target::Str(&mut buf));
        assert_eq!(store(&Cell::str("abc"), &mut b, 0), Conversion::Ok);
        drop(b);
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_piecewise_retrieval() {
        let cell = Cell::bin(b"abcdefgh");
        let mut buf = [0u8; 3];

        let mut b = OutputBinding::new(Target::Bin(&mut buf));
        assert_eq!(store(&cell, &mut b, 0), Conversion::Truncated);
        assert_eq!(b.length(), Some(3));

        assert_eq!(store(&cell, &mut b, 6), Conversion::Ok);
        assert_eq!(b.length(), Some(2));
        drop(b);
        assert_eq!(&buf[..2], b"gh");
    }

    #[test]
    fn test_offset_past_end() {
        let mut buf = [0u8; 4];
        let mut b = OutputBinding::new(Target::Str(&mut buf));
        assert_eq!(store(&Cell::str("ab"), &mut b, 10), Conversion::Ok);
        assert_eq!(b.length(), Some(0));
    }

    #[test]
    fn test_zero_capacity() {
        let mut buf: [u8; 0] = [];
        let mut b = OutputBinding::new(Target::Str(&mut buf));
        assert_eq!(store(&Cell::str("ab"), &mut b, 0), Conversion::Truncated);
        assert_eq!(b.length(), Some(0));
    }

    #[test]
    fn test_nil_sets_indicator_only() {
        let mut v = 9i64;
        let mut b = OutputBinding::new(Target::I64(&mut v));
        assert_eq!(store(&Cell::Nil, &mut b, 0), Conversion::Ok);
        assert_eq!(b.is_null(), Some(true));
        assert_eq!(b.length(), Some(0));
        drop(b);
        assert_eq!(v, 9);
    }

    #[test]
    fn test_nil_after_value_clears_length() {
        let mut buf = [0u8; 8];
        let mut b = OutputBinding::new(Target::Str(&mut buf));
        store(&Cell::str("hello"), &mut b, 0);
        assert_eq!(b.length(), Some(5));
        assert_eq!(store(&Cell::Nil, &mut b, 0), Conversion::Ok);
        assert_eq!(b.is_null(), Some(true));
        assert_eq!(b.length(), Some(0));
    }

    #[test]
    fn test_number_to_binary_unsupported() {
        for cell in [Cell::Int(42), Cell::UInt(7), Cell::Float(1.5), Cell::Double(-2.0)] {
            let mut buf = [0xffu8; 8];
            let mut b = OutputBinding::new(Target::Bin(&mut buf));
            assert_eq!(store(&cell, &mut b, 0), Conversion::Unsupported);
            assert_eq!(b.status(), Some(Conversion::Unsupported));
            drop(b);
            assert_eq!(buf, [0xff; 8]);
        }
    }

    #[test]
    fn test_binary_to_binary_copies() {
        let mut buf = [0u8; 4];
        let mut b = OutputBinding::new(Target::Bin(&mut buf));
        assert_eq!(store(&Cell::bin(b"\x01\x02"), &mut b, 0), Conversion::Ok);
        assert_eq!(b.length(), Some(2));
        drop(b);
        assert_eq!(buf, [1, 2, 0, 0]);
    }

    #[test]
    fn test_non_finite_into_float_is_flagged() {
        assert_eq!(double_to_float(f64::INFINITY), (f32::MAX, false));
        assert_eq!(double_to_float(f64::NEG_INFINITY), (-f32::MAX, false));
        assert_eq!(double_to_float(f64::NAN), (0.0, false));

        let mut v = 1.0f32;
        let mut b = OutputBinding::new(Target::F32(&mut v));
        assert_eq!(store(&Cell::Double(f64::NAN), &mut b, 0), Conversion::Truncated);
        drop(b);
        assert_eq!(v, 0.0);
    }

    #[test]
    fn test_bare_binding_writes_no_slots() {
        let mut v = 0i64;
        let mut b = OutputBinding::bare(Target::I64(&mut v)).with_length();
        store(&Cell::Nil, &mut b, 0);
        assert_eq!(b.is_null(), None);
        store(&Cell::UInt(3), &mut b, 0);
        assert_eq!(b.status(), None);
        assert_eq!(b.length(), Some(8));
        drop(b);
        assert_eq!(v, 3);
    }

    #[test]
    fn test_indicator_only_target() {
        let mut b = OutputBinding::new(Target::None);
        assert_eq!(store(&Cell::str("hello"), &mut b, 0), Conversion::Ok);
        assert_eq!(b.length(), Some(5));
    }
}
