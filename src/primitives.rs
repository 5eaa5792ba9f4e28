use std::borrow::Cow;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
#[cfg(feature = "smol_str")]
use smol_str::SmolStr;
#[cfg(feature = "ulid")]
use ulid::Ulid;
use uuid::Uuid;

use crate::cache::IntervalBits;
use crate::tags::TAG_NULL;
use crate::{Decode, DecodeContext, Encode, EncodeContext, MalformedStreamError, Result};

/// Payload whose format the codec does not interpret, tagged with optional content and codec
/// kinds. Absent fields and empty fields are distinct on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Opaque {
    pub content_kind: Option<String>,
    pub codec_kind: Option<String>,
    pub payload: Option<Bytes>,
}

/// Splits an interval into whole seconds and non-negative nanoseconds.
pub(crate) fn interval_bits(value: &TimeDelta) -> IntervalBits {
    let secs = value.num_seconds();
    let nanos = value.subsec_nanos();
    if nanos < 0 {
        (secs - 1, (nanos + 1_000_000_000) as u32)
    } else {
        (secs, nanos as u32)
    }
}

pub(crate) fn interval_from_bits((secs, nanos): IntervalBits) -> Option<TimeDelta> {
    TimeDelta::new(secs, nanos)
}

// --- bool, char ---
/// Encodes a `bool` as a single tag byte.
impl Encode for bool {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_bool(*self);
        Ok(())
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("bool")
    }
}
impl Decode for bool {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_bool()
    }
}

impl Encode for char {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_char(*self);
        Ok(())
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("char")
    }
}
impl Decode for char {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_char()
    }
}

// --- integers ---
// Values in -1..=20 take a one-byte literal regardless of width. Only 64-bit values are cached.
// Decoding accepts any integer tag and range-checks into the target width.
macro_rules! impl_integer {
    ($($ty:ty => $write:ident as $wire:ty, $name:literal;)*) => {$(
        impl Encode for $ty {
            #[inline]
            fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
                cx.$write(*self as $wire);
                Ok(())
            }

            fn type_name() -> Cow<'static, str> {
                Cow::Borrowed($name)
            }
        }
        impl Decode for $ty {
            #[inline]
            fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
                let value = cx.read_integer()?;
                <$ty>::try_from(value).map_err(|_| {
                    MalformedStreamError::OutOfRange { value, target: $name }.into()
                })
            }
        }
    )*};
}

impl_integer! {
    i8 => write_i8 as i8, "i8";
    u8 => write_u8 as u8, "u8";
    i16 => write_i16 as i16, "i16";
    u16 => write_u16 as u16, "u16";
    i32 => write_i32 as i32, "i32";
    u32 => write_u32 as u32, "u32";
    i64 => write_i64 as i64, "i64";
    u64 => write_u64 as u64, "u64";
    isize => write_i64 as i64, "isize";
    usize => write_u64 as u64, "usize";
}

// --- floats ---
impl Encode for f32 {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_f32(*self);
        Ok(())
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("f32")
    }
}
impl Decode for f32 {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_f32()
    }
}

impl Encode for f64 {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_f64(*self);
        Ok(())
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("f64")
    }
}
/// Also accepts single-precision values, widened.
impl Decode for f64 {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_f64()
    }
}

// --- strings and binary ---
impl Encode for String {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_str(self)
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("string")
    }
}
impl Decode for String {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_string()
    }
}

impl Encode for str {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_str(self)
    }
}

impl Encode for Bytes {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_binary(self)
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("binary")
    }
}
impl Decode for Bytes {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_binary()
    }
}

impl Encode for Opaque {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_opaque(self)
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("opaque")
    }
}
impl Decode for Opaque {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_opaque()
    }
}

// --- rust_decimal ---
/// Encodes `rust_decimal::Decimal` as its 16-byte serialized form. Scale is preserved.
impl Encode for Decimal {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_decimal(self);
        Ok(())
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("decimal")
    }
}
impl Decode for Decimal {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_decimal()
    }
}

// --- chrono ---
/// Encodes `chrono::NaiveDateTime` as seconds and nanoseconds since the Unix epoch.
impl Encode for NaiveDateTime {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_date(self);
        Ok(())
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("date")
    }
}
impl Decode for NaiveDateTime {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_date()
    }
}

/// Shares the date category with `NaiveDateTime`.
impl Encode for DateTime<Utc> {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_date_utc(self);
        Ok(())
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("date")
    }
}
impl Decode for DateTime<Utc> {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_date_utc()
    }
}

/// Encodes the instant plus the UTC offset in seconds.
impl Encode for DateTime<FixedOffset> {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_date_offset(self);
        Ok(())
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("date_offset")
    }
}
impl Decode for DateTime<FixedOffset> {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_date_offset()
    }
}

impl Encode for TimeDelta {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_interval(self);
        Ok(())
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("interval")
    }
}
impl Decode for TimeDelta {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_interval()
    }
}

// --- identifiers ---
impl Encode for Uuid {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_guid(*self.as_bytes());
        Ok(())
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("guid")
    }
}
impl Decode for Uuid {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_guid().map(Uuid::from_bytes)
    }
}

/// Shares the identifier category with `uuid::Uuid`.
#[cfg(feature = "ulid")]
impl Encode for Ulid {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_guid(self.to_bytes());
        Ok(())
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("guid")
    }
}
#[cfg(feature = "ulid")]
impl Decode for Ulid {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_guid().map(Ulid::from_bytes)
    }
}

#[cfg(feature = "smol_str")]
impl Encode for SmolStr {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_str(self.as_str())
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("string")
    }
}
#[cfg(feature = "smol_str")]
impl Decode for SmolStr {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_string().map(SmolStr::from)
    }
}

// --- wrappers ---
/// `None` is written as the null tag; `Some` writes the inner value directly.
impl<T: Encode> Encode for Option<T> {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        match self {
            Some(value) => value.encode(cx),
            None => {
                cx.write_null();
                Ok(())
            }
        }
    }

    fn type_name() -> Cow<'static, str> {
        T::type_name()
    }
}
impl<T: Decode> Decode for Option<T> {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        if cx.peek_tag()? == TAG_NULL {
            cx.read_tag()?;
            return Ok(None);
        }
        T::decode(cx).map(Some)
    }
}

// Smart pointers are transparent. Identity is only tracked through `Shared`.
macro_rules! impl_transparent {
    ($($ptr:ident),*) => {$(
        impl<T: Encode> Encode for $ptr<T> {
            #[inline]
            fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
                (**self).encode(cx)
            }

            fn type_name() -> Cow<'static, str> {
                T::type_name()
            }
        }
        impl<T: Decode> Decode for $ptr<T> {
            #[inline]
            fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
                T::decode(cx).map($ptr::new)
            }
        }
    )*};
}

impl_transparent!(Box, Rc, Arc);

impl<T: Encode + ?Sized> Encode for &T {
    #[inline]
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        (**self).encode(cx)
    }
}
