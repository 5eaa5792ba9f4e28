use std::io::Read;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cache::{DateBits, DateOffsetBits, DecodeCaches, IntervalBits, Slot};
use crate::config::CodecConfig;
use crate::descriptor::{self, Composite, Shape, TypeDefinition};
use crate::primitives::{interval_from_bits, Opaque};
use crate::tags::*;
use crate::value::{NativeObject, Node, NodeHandle, NodeKind, Primitive, Value};
use crate::{CodecError, Decode, Encoder, MalformedStreamError, Result, Shared};

/// Reusable stream decoder; the counterpart of [`Encoder`](crate::Encoder).
///
/// Must be configured with the same [`CodecConfig`] as the encoder that produced the stream.
#[derive(Debug)]
pub struct Decoder {
    caches: DecodeCaches,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_config(CodecConfig::default())
    }

    pub fn with_config(config: CodecConfig) -> Self {
        Self {
            caches: DecodeCaches::new(config),
        }
    }

    pub fn config(&self) -> &CodecConfig {
        self.caches.config()
    }

    pub fn caches(&self) -> &DecodeCaches {
        &self.caches
    }

    /// Reads one framed stream as a `T`.
    ///
    /// # Errors
    /// Returns `CodecError::InsufficientData` on truncated input, `CodecError::Malformed` if the
    /// stream violates the format, or `CodecError::Activation` if a described type cannot be
    /// instantiated.
    pub fn decode<T: Decode>(&mut self, reader: &mut Bytes) -> Result<T> {
        self.run(reader, |cx| T::decode(cx))
    }

    /// Reads one framed stream into the generic value model.
    pub fn decode_value(&mut self, reader: &mut Bytes) -> Result<Value> {
        self.run(reader, |cx| cx.read_value())
    }

    /// Reads `source` to the end and decodes the stream it holds.
    pub fn decode_from_reader<T: Decode, R: Read>(&mut self, source: &mut R) -> Result<T> {
        let mut buffer = Vec::new();
        source.read_to_end(&mut buffer)?;
        self.decode(&mut Bytes::from(buffer))
    }

    fn run<T>(
        &mut self,
        reader: &mut Bytes,
        read: impl FnOnce(&mut DecodeContext<'_>) -> Result<T>,
    ) -> Result<T> {
        self.caches.clear();
        let start = reader.remaining();
        let result = {
            let mut cx = DecodeContext::new(&mut *reader, &mut self.caches);
            cx.expect_tag(TAG_STREAM_START, "stream start")
                .and_then(|()| read(&mut cx))
                .and_then(|value| {
                    cx.expect_tag(TAG_STREAM_END, "stream end")?;
                    Ok(value)
                })
        };
        self.caches.clear();
        match &result {
            Ok(_) => tracing::trace!(bytes = start - reader.remaining(), "decoded stream"),
            Err(error) => tracing::debug!(%error, offset = start - reader.remaining(), "decode failed"),
        }
        result
    }
}

fn unexpected(expected: &'static str, actual: u8) -> CodecError {
    if tag_name(actual) == "unknown" {
        MalformedStreamError::UnknownTag { tag: actual }.into()
    } else {
        MalformedStreamError::UnexpectedTag { expected, actual }.into()
    }
}

fn invalid(kind: &'static str) -> CodecError {
    MalformedStreamError::InvalidPayload { kind }.into()
}

fn incompatible(index: usize, expected: impl Into<String>) -> CodecError {
    MalformedStreamError::IncompatibleReference {
        index,
        expected: expected.into(),
    }
    .into()
}

/// Per-stream decoding state handed to [`Decode`] implementations.
pub struct DecodeContext<'a> {
    reader: &'a mut Bytes,
    caches: &'a mut DecodeCaches,
    // slots of nodes whose members are still being read
    open_nodes: Vec<usize>,
}

impl<'a> DecodeContext<'a> {
    pub fn new(reader: &'a mut Bytes, caches: &'a mut DecodeCaches) -> Self {
        Self {
            reader,
            caches,
            open_nodes: Vec::new(),
        }
    }

    pub fn config(&self) -> &CodecConfig {
        self.caches.config()
    }

    /// Bytes left in the input.
    pub fn remaining(&self) -> usize {
        self.reader.remaining()
    }

    #[inline]
    fn need(&self, len: usize) -> Result<()> {
        if self.reader.remaining() < len {
            return Err(CodecError::InsufficientData);
        }
        Ok(())
    }

    #[inline]
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.need(N)?;
        let mut bytes = [0u8; N];
        self.reader.copy_to_slice(&mut bytes);
        Ok(bytes)
    }

    fn take_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.need(len)?;
        Ok(self.reader.split_to(len))
    }

    #[inline]
    pub fn peek_tag(&self) -> Result<u8> {
        self.reader
            .first()
            .copied()
            .ok_or(CodecError::InsufficientData)
    }

    #[inline]
    pub fn read_tag(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.reader.get_u8())
    }

    /// Consumes one tag and fails unless it equals `expected`.
    pub fn expect_tag(&mut self, expected: u8, what: &'static str) -> Result<()> {
        let tag = self.read_tag()?;
        if tag != expected {
            return Err(unexpected(what, tag));
        }
        Ok(())
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn read_len(&mut self) -> Result<usize> {
        Ok(self.read_u32()? as usize)
    }

    fn read_index(&mut self, tag: u8, refs: RefTags) -> Result<usize> {
        if tag == refs.narrow {
            Ok(self.take::<1>()?[0] as usize)
        } else {
            Ok(u16::from_le_bytes(self.take()?) as usize)
        }
    }

    // --- integers ---

    /// Reads an integer written at any width, including literals and cached longs.
    pub fn read_integer(&mut self) -> Result<i128> {
        let tag = self.read_tag()?;
        self.integer_with_tag(tag)
    }

    fn integer_with_tag(&mut self, tag: u8) -> Result<i128> {
        if let Some(value) = small_int_value(tag) {
            return Ok(value as i128);
        }
        match tag {
            TAG_INT8 => Ok(i8::from_le_bytes(self.take()?) as i128),
            TAG_UINT8 => Ok(u8::from_le_bytes(self.take()?) as i128),
            TAG_INT16 => Ok(i16::from_le_bytes(self.take()?) as i128),
            TAG_UINT16 => Ok(u16::from_le_bytes(self.take()?) as i128),
            TAG_INT32 => Ok(i32::from_le_bytes(self.take()?) as i128),
            TAG_UINT32 => Ok(u32::from_le_bytes(self.take()?) as i128),
            TAG_INT64 => Ok(self.long_payload()? as i128),
            TAG_INT64_REF | TAG_INT64_REF_WIDE => Ok(self.long_ref(tag)? as i128),
            TAG_UINT64 => Ok(self.ulong_payload()? as i128),
            TAG_UINT64_REF | TAG_UINT64_REF_WIDE => Ok(self.ulong_ref(tag)? as i128),
            other => Err(unexpected("integer", other)),
        }
    }

    fn long_payload(&mut self) -> Result<i64> {
        let value = i64::from_le_bytes(self.take()?);
        self.caches.long.push(value);
        Ok(value)
    }

    fn long_ref(&mut self, tag: u8) -> Result<i64> {
        let index = self.read_index(tag, INT64_REFS)?;
        self.caches.long.get(index).copied()
    }

    fn ulong_payload(&mut self) -> Result<u64> {
        let value = u64::from_le_bytes(self.take()?);
        self.caches.ulong.push(value);
        Ok(value)
    }

    fn ulong_ref(&mut self, tag: u8) -> Result<u64> {
        let index = self.read_index(tag, UINT64_REFS)?;
        self.caches.ulong.get(index).copied()
    }

    // --- scalars ---

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_tag()? {
            TAG_FALSE => Ok(false),
            TAG_TRUE => Ok(true),
            other => Err(unexpected("bool", other)),
        }
    }

    pub fn read_char(&mut self) -> Result<char> {
        match self.read_tag()? {
            TAG_CHAR => self.char_payload(),
            other => Err(unexpected("char", other)),
        }
    }

    fn char_payload(&mut self) -> Result<char> {
        char::from_u32(self.read_u32()?).ok_or_else(|| invalid("char"))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let tag = self.read_tag()?;
        self.f32_with_tag(tag)
    }

    fn f32_with_tag(&mut self, tag: u8) -> Result<f32> {
        match tag {
            TAG_FLOAT_ZERO => Ok(0.0),
            TAG_FLOAT => {
                let value = f32::from_le_bytes(self.take()?);
                self.caches.float.push(value);
                Ok(value)
            }
            TAG_FLOAT_REF | TAG_FLOAT_REF_WIDE => {
                let index = self.read_index(tag, FLOAT_REFS)?;
                self.caches.float.get(index).copied()
            }
            other => Err(unexpected("float", other)),
        }
    }

    /// Reads a double; single-precision values are widened.
    pub fn read_f64(&mut self) -> Result<f64> {
        let tag = self.read_tag()?;
        self.f64_with_tag(tag)
    }

    fn f64_with_tag(&mut self, tag: u8) -> Result<f64> {
        match tag {
            TAG_DOUBLE_ZERO => Ok(0.0),
            TAG_DOUBLE => {
                let value = f64::from_le_bytes(self.take()?);
                self.caches.double.push(value);
                Ok(value)
            }
            TAG_DOUBLE_REF | TAG_DOUBLE_REF_WIDE => {
                let index = self.read_index(tag, DOUBLE_REFS)?;
                self.caches.double.get(index).copied()
            }
            TAG_FLOAT_ZERO | TAG_FLOAT | TAG_FLOAT_REF | TAG_FLOAT_REF_WIDE => {
                self.f32_with_tag(tag).map(f64::from)
            }
            other => Err(unexpected("double", other)),
        }
    }

    pub fn read_decimal(&mut self) -> Result<Decimal> {
        let tag = self.read_tag()?;
        self.decimal_with_tag(tag)
    }

    fn decimal_with_tag(&mut self, tag: u8) -> Result<Decimal> {
        match tag {
            TAG_DECIMAL_ZERO => Ok(Decimal::ZERO),
            TAG_DECIMAL => {
                let value = Decimal::deserialize(self.take()?);
                self.caches.decimal.push(value);
                Ok(value)
            }
            TAG_DECIMAL_REF | TAG_DECIMAL_REF_WIDE => {
                let index = self.read_index(tag, DECIMAL_REFS)?;
                self.caches.decimal.get(index).copied()
            }
            other => Err(unexpected("decimal", other)),
        }
    }

    // --- dates and intervals ---

    fn date_bits(&mut self, tag: u8) -> Result<DateBits> {
        match tag {
            TAG_DATE_EPOCH => Ok((0, 0)),
            TAG_DATE => {
                let secs = i64::from_le_bytes(self.take()?);
                let bits = (secs, self.read_u32()?);
                self.caches.date.push(bits);
                Ok(bits)
            }
            TAG_DATE_REF | TAG_DATE_REF_WIDE => {
                let index = self.read_index(tag, DATE_REFS)?;
                self.caches.date.get(index).copied()
            }
            other => Err(unexpected("date", other)),
        }
    }

    fn date_with_tag(&mut self, tag: u8) -> Result<DateTime<Utc>> {
        let (secs, nanos) = self.date_bits(tag)?;
        DateTime::from_timestamp(secs, nanos).ok_or_else(|| invalid("date"))
    }

    pub fn read_date(&mut self) -> Result<NaiveDateTime> {
        self.read_date_utc().map(|date| date.naive_utc())
    }

    pub fn read_date_utc(&mut self) -> Result<DateTime<Utc>> {
        let tag = self.read_tag()?;
        self.date_with_tag(tag)
    }

    fn date_offset_bits(&mut self, tag: u8) -> Result<DateOffsetBits> {
        match tag {
            TAG_DATE_OFFSET_EPOCH => Ok((0, 0, 0)),
            TAG_DATE_OFFSET => {
                let secs = i64::from_le_bytes(self.take()?);
                let nanos = self.read_u32()?;
                let offset = i32::from_le_bytes(self.take()?);
                let bits = (secs, nanos, offset);
                self.caches.date_offset.push(bits);
                Ok(bits)
            }
            TAG_DATE_OFFSET_REF | TAG_DATE_OFFSET_REF_WIDE => {
                let index = self.read_index(tag, DATE_OFFSET_REFS)?;
                self.caches.date_offset.get(index).copied()
            }
            other => Err(unexpected("date with offset", other)),
        }
    }

    fn date_offset_with_tag(&mut self, tag: u8) -> Result<DateTime<FixedOffset>> {
        let (secs, nanos, offset) = self.date_offset_bits(tag)?;
        let offset = FixedOffset::east_opt(offset).ok_or_else(|| invalid("date with offset"))?;
        DateTime::from_timestamp(secs, nanos)
            .map(|date| date.with_timezone(&offset))
            .ok_or_else(|| invalid("date with offset"))
    }

    pub fn read_date_offset(&mut self) -> Result<DateTime<FixedOffset>> {
        let tag = self.read_tag()?;
        self.date_offset_with_tag(tag)
    }

    fn interval_with_tag(&mut self, tag: u8) -> Result<TimeDelta> {
        let bits: IntervalBits = match tag {
            TAG_INTERVAL_ZERO => (0, 0),
            TAG_INTERVAL => {
                let secs = i64::from_le_bytes(self.take()?);
                let bits = (secs, self.read_u32()?);
                self.caches.interval.push(bits);
                bits
            }
            TAG_INTERVAL_REF | TAG_INTERVAL_REF_WIDE => {
                let index = self.read_index(tag, INTERVAL_REFS)?;
                *self.caches.interval.get(index)?
            }
            other => return Err(unexpected("time interval", other)),
        };
        interval_from_bits(bits).ok_or_else(|| invalid("time interval"))
    }

    pub fn read_interval(&mut self) -> Result<TimeDelta> {
        let tag = self.read_tag()?;
        self.interval_with_tag(tag)
    }

    // --- identifiers, strings, blobs ---

    fn guid_with_tag(&mut self, tag: u8) -> Result<[u8; 16]> {
        match tag {
            TAG_GUID_NIL => Ok([0; 16]),
            TAG_GUID => {
                let bytes: [u8; 16] = self.take()?;
                self.caches.guid.push(bytes);
                Ok(bytes)
            }
            TAG_GUID_REF | TAG_GUID_REF_WIDE => {
                let index = self.read_index(tag, GUID_REFS)?;
                self.caches.guid.get(index).copied()
            }
            other => Err(unexpected("identifier", other)),
        }
    }

    /// Reads a 16-byte identifier.
    pub fn read_guid(&mut self) -> Result<[u8; 16]> {
        let tag = self.read_tag()?;
        self.guid_with_tag(tag)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let tag = self.read_tag()?;
        self.string_with_tag(tag)
    }

    fn string_with_tag(&mut self, tag: u8) -> Result<String> {
        match tag {
            TAG_STRING_EMPTY => Ok(String::new()),
            TAG_STRING => {
                let len = self.read_len()?;
                let bytes = self.take_bytes(len)?;
                let value = String::from_utf8(bytes.to_vec()).map_err(MalformedStreamError::from)?;
                let bucket = self.caches.config.string_bucket(value.chars().count());
                self.caches.strings[bucket].push(value.clone());
                Ok(value)
            }
            TAG_STRING8_REF..=TAG_STRING_LONG_REF_WIDE => {
                let bucket = ((tag - TAG_STRING8_REF) / 2) as usize;
                let index = self.read_index(tag, STRING_REFS[bucket])?;
                self.caches.strings[bucket].get(index).cloned()
            }
            other => Err(unexpected("string", other)),
        }
    }

    pub fn read_binary(&mut self) -> Result<Bytes> {
        match self.read_tag()? {
            TAG_BINARY => self.binary_payload(),
            other => Err(unexpected("binary", other)),
        }
    }

    fn binary_payload(&mut self) -> Result<Bytes> {
        let len = self.read_len()?;
        self.take_bytes(len)
    }

    pub fn read_opaque(&mut self) -> Result<Opaque> {
        match self.read_tag()? {
            TAG_OPAQUE => self.opaque_payload(),
            other => Err(unexpected("opaque payload", other)),
        }
    }

    fn opaque_payload(&mut self) -> Result<Opaque> {
        let text = |bytes: Option<Bytes>| -> Result<Option<String>> {
            bytes
                .map(|b| {
                    String::from_utf8(b.to_vec())
                        .map_err(|e| CodecError::from(MalformedStreamError::from(e)))
                })
                .transpose()
        };
        let content_kind = text(self.opaque_field()?)?;
        let codec_kind = text(self.opaque_field()?)?;
        let payload = self.opaque_field()?;
        Ok(Opaque {
            content_kind,
            codec_kind,
            payload,
        })
    }

    fn opaque_field(&mut self) -> Result<Option<Bytes>> {
        match i32::from_le_bytes(self.take()?) {
            -1 => Ok(None),
            len if len < 0 => Err(invalid("opaque payload")),
            len => self.take_bytes(len as usize).map(Some),
        }
    }

    /// Reads any primitive category, keeping the width it was written with.
    pub fn read_primitive(&mut self) -> Result<Primitive> {
        let tag = self.read_tag()?;
        self.primitive_with_tag(tag)
    }

    fn primitive_with_tag(&mut self, tag: u8) -> Result<Primitive> {
        if let Some(value) = small_int_value(tag) {
            return Ok(Primitive::I64(value));
        }
        Ok(match tag {
            TAG_FALSE => Primitive::Bool(false),
            TAG_TRUE => Primitive::Bool(true),
            TAG_CHAR => Primitive::Char(self.char_payload()?),
            TAG_INT8 => Primitive::I8(i8::from_le_bytes(self.take()?)),
            TAG_UINT8 => Primitive::U8(u8::from_le_bytes(self.take()?)),
            TAG_INT16 => Primitive::I16(i16::from_le_bytes(self.take()?)),
            TAG_UINT16 => Primitive::U16(u16::from_le_bytes(self.take()?)),
            TAG_INT32 => Primitive::I32(i32::from_le_bytes(self.take()?)),
            TAG_UINT32 => Primitive::U32(u32::from_le_bytes(self.take()?)),
            TAG_INT64 => Primitive::I64(self.long_payload()?),
            TAG_INT64_REF | TAG_INT64_REF_WIDE => Primitive::I64(self.long_ref(tag)?),
            TAG_UINT64 => Primitive::U64(self.ulong_payload()?),
            TAG_UINT64_REF | TAG_UINT64_REF_WIDE => Primitive::U64(self.ulong_ref(tag)?),
            TAG_FLOAT_ZERO | TAG_FLOAT | TAG_FLOAT_REF | TAG_FLOAT_REF_WIDE => {
                Primitive::F32(self.f32_with_tag(tag)?)
            }
            TAG_DOUBLE_ZERO | TAG_DOUBLE | TAG_DOUBLE_REF | TAG_DOUBLE_REF_WIDE => {
                Primitive::F64(self.f64_with_tag(tag)?)
            }
            TAG_DECIMAL_ZERO | TAG_DECIMAL | TAG_DECIMAL_REF | TAG_DECIMAL_REF_WIDE => {
                Primitive::Decimal(self.decimal_with_tag(tag)?)
            }
            TAG_DATE_EPOCH | TAG_DATE | TAG_DATE_REF | TAG_DATE_REF_WIDE => {
                Primitive::Date(self.date_with_tag(tag)?.naive_utc())
            }
            TAG_DATE_OFFSET_EPOCH | TAG_DATE_OFFSET | TAG_DATE_OFFSET_REF
            | TAG_DATE_OFFSET_REF_WIDE => Primitive::DateOffset(self.date_offset_with_tag(tag)?),
            TAG_INTERVAL_ZERO | TAG_INTERVAL | TAG_INTERVAL_REF | TAG_INTERVAL_REF_WIDE => {
                Primitive::Interval(self.interval_with_tag(tag)?)
            }
            TAG_GUID_NIL | TAG_GUID | TAG_GUID_REF | TAG_GUID_REF_WIDE => {
                Primitive::Guid(Uuid::from_bytes(self.guid_with_tag(tag)?))
            }
            TAG_STRING_EMPTY | TAG_STRING | TAG_STRING8_REF..=TAG_STRING_LONG_REF_WIDE => {
                Primitive::String(self.string_with_tag(tag)?)
            }
            TAG_BINARY => Primitive::Binary(self.binary_payload()?),
            TAG_OPAQUE => Primitive::Opaque(self.opaque_payload()?),
            other => return Err(unexpected("value", other)),
        })
    }

    // --- composites ---

    fn read_type_definition(&mut self, tag: u8) -> Result<Arc<TypeDefinition>> {
        match tag {
            TAG_TYPE_START => {
                let len = self.read_len()?;
                let blob = self.take_bytes(len)?;
                let definition = Arc::new(TypeDefinition::parse(&blob)?);
                self.caches.types.push(definition.clone());
                Ok(definition)
            }
            TAG_TYPE_REF | TAG_TYPE_REF_WIDE => {
                let index = self.read_index(tag, TYPE_REFS)?;
                self.caches.types.get(index).cloned()
            }
            other => Err(unexpected("type definition", other)),
        }
    }

    /// Consumes the body tag of `shape` and returns its member count.
    pub fn read_body_start(&mut self, shape: Shape) -> Result<usize> {
        let tag = self.read_tag()?;
        if tag != shape.body_tag() {
            return Err(unexpected(shape.name(), tag));
        }
        self.read_len()
    }

    /// Consumes a properties body tag and checks its count against the definition.
    pub fn read_properties_start(&mut self, definition: &TypeDefinition) -> Result<usize> {
        let count = self.read_body_start(Shape::Object)?;
        if count != definition.properties().len() {
            return Err(MalformedStreamError::PropertyCountMismatch {
                type_name: definition.name().to_string(),
                expected: definition.properties().len(),
                actual: count,
            }
            .into());
        }
        Ok(count)
    }

    /// Reads an owned composite. Its identity slot is consumed but never resolvable.
    pub fn read_composite<T: Composite>(&mut self) -> Result<T> {
        let tag = self.read_tag()?;
        match tag {
            TAG_TYPE_START | TAG_TYPE_REF | TAG_TYPE_REF_WIDE => {
                let definition = self.read_type_definition(tag)?;
                self.caches.objects.reserve();
                let mut value = T::activate()?;
                value.decode_body(self, &definition)?;
                self.expect_tag(TAG_TYPE_END, "type end")?;
                Ok(value)
            }
            TAG_OBJECT_REF | TAG_OBJECT_REF_WIDE => {
                let index = self.read_index(tag, OBJECT_REFS)?;
                self.caches.objects.get(index)?;
                Err(incompatible(index, format!("an owned {}", T::type_name())))
            }
            other => Err(unexpected("type definition", other)),
        }
    }

    /// Reads an identity-tracked composite, resolving object back-references.
    pub fn read_shared<T: Composite>(&mut self) -> Result<Shared<T>> {
        let tag = self.read_tag()?;
        match tag {
            TAG_TYPE_START | TAG_TYPE_REF | TAG_TYPE_REF_WIDE => {
                let definition = self.read_type_definition(tag)?;
                let slot = self.caches.objects.reserve();
                let shared = self.populate_shared::<T>(&definition, slot)?;
                self.expect_tag(TAG_TYPE_END, "type end")?;
                Ok(shared)
            }
            TAG_OBJECT_REF | TAG_OBJECT_REF_WIDE => {
                let index = self.read_index(tag, OBJECT_REFS)?;
                match self.caches.objects.get(index)? {
                    Slot::Native(native) => native
                        .downcast::<T>()
                        .ok_or_else(|| incompatible(index, T::type_name())),
                    Slot::Node(node) if !self.open_nodes.contains(&index) => {
                        let node = node.clone();
                        let shared = self.materialize::<T>(&node)?;
                        self.caches
                            .objects
                            .fill(Some(index), Slot::Native(NativeObject::from_shared(&shared)?));
                        Ok(shared)
                    }
                    _ => Err(incompatible(index, T::type_name())),
                }
            }
            other => Err(unexpected("type definition", other)),
        }
    }

    /// Rebuilds a completed fallback node as `T`.
    ///
    /// The node was read generically because its type was unknown at that point, e.g. while
    /// skipping a property. The slot then holds the typed instance, so later references share it.
    fn materialize<T: Composite>(&self, node: &NodeHandle) -> Result<Shared<T>> {
        tracing::debug!(type_name = %node.type_name(), "materializing node as {}", T::type_name());
        let config = self.config().clone();
        let mut buffer = BytesMut::new();
        Encoder::with_config(config.clone()).encode(&mut buffer, &Value::Node(node.clone()))?;
        Decoder::with_config(config).decode::<Shared<T>>(&mut buffer.freeze())
    }

    /// Activates `T` and publishes it in `slot` before decoding its body, so members can
    /// reference it.
    pub(crate) fn populate_shared<T: Composite>(
        &mut self,
        definition: &TypeDefinition,
        slot: Option<usize>,
    ) -> Result<Shared<T>> {
        let shared = Shared::new(T::activate()?);
        self.caches
            .objects
            .fill(slot, Slot::Native(NativeObject::from_shared(&shared)?));
        shared.try_borrow_for_decode()?.decode_body(self, definition)?;
        Ok(shared)
    }

    /// Reads any value into the generic model.
    ///
    /// Composites whose type name is registered decode through that type; all others become
    /// [`Node`]s.
    pub fn read_value(&mut self) -> Result<Value> {
        let tag = self.read_tag()?;
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_OBJECT_REF | TAG_OBJECT_REF_WIDE => {
                let index = self.read_index(tag, OBJECT_REFS)?;
                match self.caches.objects.get(index)? {
                    Slot::Node(node) => Ok(Value::Node(node.clone())),
                    Slot::Native(native) => Ok(Value::Native(native.clone())),
                    Slot::Pending => Err(incompatible(index, "a shared object")),
                }
            }
            TAG_TYPE_START | TAG_TYPE_REF | TAG_TYPE_REF_WIDE => {
                let definition = self.read_type_definition(tag)?;
                let slot = self.caches.objects.reserve();
                let value = match descriptor::resolve(definition.name()) {
                    Some(descriptor) => {
                        Value::Native((descriptor.routines().decode)(self, &definition, slot)?)
                    }
                    None => Value::Node(self.read_node_body(&definition, slot)?),
                };
                self.expect_tag(TAG_TYPE_END, "type end")?;
                Ok(value)
            }
            _ => self.primitive_with_tag(tag).map(Value::Primitive),
        }
    }

    /// Skips one value of any kind. Cache entries it introduces are still recorded.
    pub fn skip_value(&mut self) -> Result<()> {
        self.read_value().map(drop)
    }

    fn read_node_body(
        &mut self,
        definition: &TypeDefinition,
        slot: Option<usize>,
    ) -> Result<NodeHandle> {
        let node = NodeHandle::new(Node::new(
            definition.name(),
            NodeKind::Object(Default::default()),
        ));
        self.caches.objects.fill(slot, Slot::Node(node.clone()));
        self.open_nodes.extend(slot);
        let kind = self.read_node_kind(definition);
        if slot.is_some() {
            self.open_nodes.pop();
        }
        node.set_kind(kind?);
        Ok(node)
    }

    fn read_node_kind(&mut self, definition: &TypeDefinition) -> Result<NodeKind> {
        let tag = self.read_tag()?;
        let shape = Shape::from_body_tag(tag).ok_or_else(|| unexpected("composite body", tag))?;
        let count = self.read_len()?;
        Ok(match shape {
            Shape::Array | Shape::Sequence => {
                let mut items = Vec::with_capacity(count.min(self.remaining()));
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                if shape == Shape::Array {
                    NodeKind::Array(items)
                } else {
                    NodeKind::Sequence(items)
                }
            }
            Shape::Map => {
                let mut entries = Vec::with_capacity(count.min(self.remaining()));
                for _ in 0..count {
                    let key = self.read_value()?;
                    let value = self.read_value()?;
                    entries.push((key, value));
                }
                NodeKind::Map(entries)
            }
            Shape::Object => {
                if count != definition.properties().len() {
                    return Err(MalformedStreamError::PropertyCountMismatch {
                        type_name: definition.name().to_string(),
                        expected: definition.properties().len(),
                        actual: count,
                    }
                    .into());
                }
                let mut properties = indexmap::IndexMap::with_capacity(count);
                for name in definition.properties() {
                    let value = self.read_value()?;
                    properties.insert(name.clone(), value);
                }
                NodeKind::Object(properties)
            }
        })
    }
}
