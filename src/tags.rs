//! Type tags used in the refpack binary format.
//!
//! Every encoded unit starts with one of these bytes, and each tag selects exactly one decoding rule.
//! Most users do not need to use these directly.
//!
//! - 0..=12: structural markers (stream framing, type envelopes, bodies, object back-references)
//! - 13..=22: null and default-value shortcuts (no payload)
//! - 32..=53: small integer literals -1..=20 (no payload)
//! - 64..=82: full-value encodings
//! - 96..=121: value-cache back-references, narrow (u8 index) and wide (u16 index) pairs
//! - Tags are stable and part of the wire format.

// --- structural ---
pub const TAG_NULL: u8 = 0;
pub const TAG_STREAM_START: u8 = 1;
pub const TAG_STREAM_END: u8 = 2;
///< Type definition blob follows (u32 length + UTF-8 `Name;Prop1;Prop2`)
pub const TAG_TYPE_START: u8 = 3;
pub const TAG_TYPE_REF: u8 = 4;
pub const TAG_TYPE_REF_WIDE: u8 = 5;
pub const TAG_TYPE_END: u8 = 6;
pub const TAG_ARRAY_START: u8 = 7;
pub const TAG_SEQUENCE_START: u8 = 8;
pub const TAG_MAP_START: u8 = 9;
pub const TAG_PROPERTIES_START: u8 = 10;
pub const TAG_OBJECT_REF: u8 = 11;
pub const TAG_OBJECT_REF_WIDE: u8 = 12;

// --- default-value shortcuts ---
pub const TAG_FALSE: u8 = 13;
pub const TAG_TRUE: u8 = 14;
pub const TAG_STRING_EMPTY: u8 = 15;
///< Positive zero only; -0.0 is written in full
pub const TAG_FLOAT_ZERO: u8 = 16;
pub const TAG_DOUBLE_ZERO: u8 = 17;
///< Decimal zero with scale 0 and positive sign
pub const TAG_DECIMAL_ZERO: u8 = 18;
///< 1970-01-01T00:00:00
pub const TAG_DATE_EPOCH: u8 = 19;
///< 1970-01-01T00:00:00+00:00
pub const TAG_DATE_OFFSET_EPOCH: u8 = 20;
pub const TAG_INTERVAL_ZERO: u8 = 21;
pub const TAG_GUID_NIL: u8 = 22;

// --- small integer literals ---
pub const TAG_INT_MINUS_ONE: u8 = 32;
pub const TAG_INT_ZERO: u8 = 33;
pub const TAG_INT_TWENTY: u8 = 53;
pub const SMALL_INT_MIN: i64 = -1;
pub const SMALL_INT_MAX: i64 = 20;

// --- full values ---
pub const TAG_INT8: u8 = 64;
pub const TAG_UINT8: u8 = 65;
pub const TAG_INT16: u8 = 66;
pub const TAG_UINT16: u8 = 67;
pub const TAG_INT32: u8 = 68;
pub const TAG_UINT32: u8 = 69;
pub const TAG_INT64: u8 = 70;
pub const TAG_UINT64: u8 = 71;
pub const TAG_FLOAT: u8 = 72;
pub const TAG_DOUBLE: u8 = 73;
///< rust_decimal::Decimal, 16 bytes
pub const TAG_DECIMAL: u8 = 74;
///< i64 seconds + u32 nanoseconds since the Unix epoch
pub const TAG_DATE: u8 = 75;
///< i64 seconds + u32 nanoseconds + i32 offset seconds
pub const TAG_DATE_OFFSET: u8 = 76;
///< i64 seconds + u32 nanoseconds, nanoseconds always non-negative
pub const TAG_INTERVAL: u8 = 77;
pub const TAG_GUID: u8 = 78;
pub const TAG_CHAR: u8 = 79;
///< u32 byte length + UTF-8
pub const TAG_STRING: u8 = 80;
///< u32 byte length + raw bytes
pub const TAG_BINARY: u8 = 81;
///< content kind, codec kind, payload; each i32-length-prefixed, -1 = absent
pub const TAG_OPAQUE: u8 = 82;

// --- back-references ---
pub const TAG_INT64_REF: u8 = 96;
pub const TAG_INT64_REF_WIDE: u8 = 97;
pub const TAG_UINT64_REF: u8 = 98;
pub const TAG_UINT64_REF_WIDE: u8 = 99;
pub const TAG_FLOAT_REF: u8 = 100;
pub const TAG_FLOAT_REF_WIDE: u8 = 101;
pub const TAG_DOUBLE_REF: u8 = 102;
pub const TAG_DOUBLE_REF_WIDE: u8 = 103;
pub const TAG_DECIMAL_REF: u8 = 104;
pub const TAG_DECIMAL_REF_WIDE: u8 = 105;
pub const TAG_DATE_REF: u8 = 106;
pub const TAG_DATE_REF_WIDE: u8 = 107;
pub const TAG_DATE_OFFSET_REF: u8 = 108;
pub const TAG_DATE_OFFSET_REF_WIDE: u8 = 109;
pub const TAG_INTERVAL_REF: u8 = 110;
pub const TAG_INTERVAL_REF_WIDE: u8 = 111;
pub const TAG_GUID_REF: u8 = 112;
pub const TAG_GUID_REF_WIDE: u8 = 113;
///< Strings of up to 8 characters
pub const TAG_STRING8_REF: u8 = 114;
pub const TAG_STRING8_REF_WIDE: u8 = 115;
pub const TAG_STRING16_REF: u8 = 116;
pub const TAG_STRING16_REF_WIDE: u8 = 117;
pub const TAG_STRING32_REF: u8 = 118;
pub const TAG_STRING32_REF_WIDE: u8 = 119;
pub const TAG_STRING_LONG_REF: u8 = 120;
pub const TAG_STRING_LONG_REF_WIDE: u8 = 121;

/// Narrow/wide back-reference tag pair of one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefTags {
    pub narrow: u8,
    pub wide: u8,
}

impl RefTags {
    pub const fn new(narrow: u8) -> Self {
        Self {
            narrow,
            wide: narrow + 1,
        }
    }
}

pub const TYPE_REFS: RefTags = RefTags::new(TAG_TYPE_REF);
pub const OBJECT_REFS: RefTags = RefTags::new(TAG_OBJECT_REF);
pub const INT64_REFS: RefTags = RefTags::new(TAG_INT64_REF);
pub const UINT64_REFS: RefTags = RefTags::new(TAG_UINT64_REF);
pub const FLOAT_REFS: RefTags = RefTags::new(TAG_FLOAT_REF);
pub const DOUBLE_REFS: RefTags = RefTags::new(TAG_DOUBLE_REF);
pub const DECIMAL_REFS: RefTags = RefTags::new(TAG_DECIMAL_REF);
pub const DATE_REFS: RefTags = RefTags::new(TAG_DATE_REF);
pub const DATE_OFFSET_REFS: RefTags = RefTags::new(TAG_DATE_OFFSET_REF);
pub const INTERVAL_REFS: RefTags = RefTags::new(TAG_INTERVAL_REF);
pub const GUID_REFS: RefTags = RefTags::new(TAG_GUID_REF);
/// One pair per string length bucket, shortest bucket first.
pub const STRING_REFS: [RefTags; 4] = [
    RefTags::new(TAG_STRING8_REF),
    RefTags::new(TAG_STRING16_REF),
    RefTags::new(TAG_STRING32_REF),
    RefTags::new(TAG_STRING_LONG_REF),
];

/// Returns the literal tag for a small integer, if `value` is in -1..=20.
#[inline]
pub fn small_int_tag(value: i128) -> Option<u8> {
    if (SMALL_INT_MIN as i128..=SMALL_INT_MAX as i128).contains(&value) {
        Some((value + TAG_INT_ZERO as i128) as u8)
    } else {
        None
    }
}

/// Returns the integer a literal tag stands for.
#[inline]
pub fn small_int_value(tag: u8) -> Option<i64> {
    if (TAG_INT_MINUS_ONE..=TAG_INT_TWENTY).contains(&tag) {
        Some(tag as i64 - TAG_INT_ZERO as i64)
    } else {
        None
    }
}

/// Human readable tag name used in error messages.
pub fn tag_name(tag: u8) -> &'static str {
    match tag {
        TAG_NULL => "null",
        TAG_STREAM_START => "stream start",
        TAG_STREAM_END => "stream end",
        TAG_TYPE_START => "type definition",
        TAG_TYPE_REF | TAG_TYPE_REF_WIDE => "type reference",
        TAG_TYPE_END => "type end",
        TAG_ARRAY_START => "array body",
        TAG_SEQUENCE_START => "sequence body",
        TAG_MAP_START => "map body",
        TAG_PROPERTIES_START => "properties body",
        TAG_OBJECT_REF | TAG_OBJECT_REF_WIDE => "object reference",
        TAG_FALSE | TAG_TRUE => "bool",
        TAG_STRING_EMPTY | TAG_STRING => "string",
        TAG_FLOAT_ZERO | TAG_FLOAT => "float",
        TAG_DOUBLE_ZERO | TAG_DOUBLE => "double",
        TAG_DECIMAL_ZERO | TAG_DECIMAL => "decimal",
        TAG_DATE_EPOCH | TAG_DATE => "date",
        TAG_DATE_OFFSET_EPOCH | TAG_DATE_OFFSET => "date with offset",
        TAG_INTERVAL_ZERO | TAG_INTERVAL => "time interval",
        TAG_GUID_NIL | TAG_GUID => "identifier",
        TAG_INT_MINUS_ONE..=TAG_INT_TWENTY => "small integer",
        TAG_INT8 | TAG_UINT8 | TAG_INT16 | TAG_UINT16 | TAG_INT32 | TAG_UINT32 | TAG_INT64
        | TAG_UINT64 => "integer",
        TAG_CHAR => "char",
        TAG_BINARY => "binary",
        TAG_OPAQUE => "opaque payload",
        TAG_INT64_REF..=TAG_STRING_LONG_REF_WIDE => "value reference",
        _ => "unknown",
    }
}
