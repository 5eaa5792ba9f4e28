use std::hash::Hash;
use std::io::Write;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, Utc};
use rust_decimal::Decimal;

use crate::cache::{DateBits, EncodeCaches, ValueCache};
use crate::config::CodecConfig;
use crate::descriptor::{Composite, Shape};
use crate::primitives::{interval_bits, Opaque};
use crate::tags::*;
use crate::value::{NativeObject, NodeHandle, NodeKind};
use crate::{CodecError, Decode, Encode, Result, Shared};

/// Reusable stream encoder.
///
/// Holds one set of per-stream caches, cleared at the start and end of every
/// [`encode`](Self::encode) call. One encoder serves one stream at a time.
#[derive(Debug)]
pub struct Encoder {
    caches: EncodeCaches,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_config(CodecConfig::default())
    }

    pub fn with_config(config: CodecConfig) -> Self {
        Self {
            caches: EncodeCaches::new(config),
        }
    }

    pub fn config(&self) -> &CodecConfig {
        self.caches.config()
    }

    pub fn caches(&self) -> &EncodeCaches {
        &self.caches
    }

    /// Writes one framed stream holding `value`.
    ///
    /// Caches are cleared on every exit path, so a failed encode leaves the encoder reusable.
    /// On failure `writer` may hold a partial stream.
    ///
    /// # Errors
    /// Returns `CodecError::Encode` if a name is not representable, a length overflows `u32`,
    /// or a cycle cannot be expressed.
    pub fn encode<T: Encode + ?Sized>(&mut self, writer: &mut BytesMut, value: &T) -> Result<()> {
        self.caches.clear();
        let start = writer.len();
        let result = {
            let mut cx = EncodeContext::new(&mut *writer, &mut self.caches);
            cx.writer.put_u8(TAG_STREAM_START);
            value.encode(&mut cx).map(|()| cx.writer.put_u8(TAG_STREAM_END))
        };
        self.caches.clear();
        match &result {
            Ok(()) => tracing::trace!(bytes = writer.len() - start, "encoded stream"),
            Err(error) => tracing::debug!(%error, "encode failed"),
        }
        result
    }

    /// Materializes `items` and writes them as one sequence.
    pub fn encode_iter<I>(&mut self, writer: &mut BytesMut, items: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Encode + Decode + 'static,
    {
        let items: Vec<I::Item> = items.into_iter().collect();
        self.encode(writer, &items)
    }

    /// Encodes into a buffer and writes it to `sink` only after the whole stream succeeded.
    ///
    /// Returns the number of bytes written.
    pub fn encode_to_writer<T, W>(&mut self, sink: &mut W, value: &T) -> Result<usize>
    where
        T: Encode + ?Sized,
        W: Write,
    {
        let mut buffer = BytesMut::new();
        self.encode(&mut buffer, value)?;
        sink.write_all(&buffer)?;
        Ok(buffer.len())
    }
}

#[inline]
fn put_reference(writer: &mut BytesMut, refs: RefTags, index: u16) {
    if index <= u8::MAX as u16 {
        writer.put_u8(refs.narrow);
        writer.put_u8(index as u8);
    } else {
        writer.put_u8(refs.wide);
        writer.put_u16_le(index);
    }
}

/// Writes a back-reference on a cache hit, otherwise the full payload followed by a cache insert.
#[inline]
fn put_cached<K: Hash + Eq>(
    writer: &mut BytesMut,
    cache: &mut ValueCache<K>,
    key: K,
    refs: RefTags,
    full: impl FnOnce(&mut BytesMut),
) {
    match cache.lookup(&key) {
        Some(index) => put_reference(writer, refs, index),
        None => {
            full(writer);
            cache.insert(key);
        }
    }
}

fn checked_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| CodecError::Encode(format!("{} length {} exceeds u32::MAX", what, len)))
}

macro_rules! write_fixed_int {
    ($($name:ident($ty:ty) => $tag:expr, $put:ident;)*) => {$(
        #[inline]
        pub fn $name(&mut self, value: $ty) {
            match small_int_tag(value as i128) {
                Some(tag) => self.writer.put_u8(tag),
                None => {
                    self.writer.put_u8($tag);
                    self.writer.$put(value);
                }
            }
        }
    )*};
}

/// Per-stream encoding state handed to [`Encode`] implementations.
pub struct EncodeContext<'a> {
    writer: &'a mut BytesMut,
    caches: &'a mut EncodeCaches,
}

impl<'a> EncodeContext<'a> {
    pub fn new(writer: &'a mut BytesMut, caches: &'a mut EncodeCaches) -> Self {
        Self { writer, caches }
    }

    pub fn config(&self) -> &CodecConfig {
        self.caches.config()
    }

    /// Number of bytes in the output buffer.
    pub fn position(&self) -> usize {
        self.writer.len()
    }

    #[inline]
    pub fn write_null(&mut self) {
        self.writer.put_u8(TAG_NULL);
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.writer.put_u8(if value { TAG_TRUE } else { TAG_FALSE });
    }

    #[inline]
    pub fn write_char(&mut self, value: char) {
        self.writer.put_u8(TAG_CHAR);
        self.writer.put_u32_le(value as u32);
    }

    write_fixed_int! {
        write_i8(i8) => TAG_INT8, put_i8;
        write_u8(u8) => TAG_UINT8, put_u8;
        write_i16(i16) => TAG_INT16, put_i16_le;
        write_u16(u16) => TAG_UINT16, put_u16_le;
        write_i32(i32) => TAG_INT32, put_i32_le;
        write_u32(u32) => TAG_UINT32, put_u32_le;
    }

    pub fn write_i64(&mut self, value: i64) {
        if let Some(tag) = small_int_tag(value as i128) {
            self.writer.put_u8(tag);
            return;
        }
        put_cached(self.writer, &mut self.caches.long, value, INT64_REFS, |w| {
            w.put_u8(TAG_INT64);
            w.put_i64_le(value);
        });
    }

    pub fn write_u64(&mut self, value: u64) {
        if let Some(tag) = small_int_tag(value as i128) {
            self.writer.put_u8(tag);
            return;
        }
        put_cached(self.writer, &mut self.caches.ulong, value, UINT64_REFS, |w| {
            w.put_u8(TAG_UINT64);
            w.put_u64_le(value);
        });
    }

    /// Only positive zero takes the shortcut; `-0.0` and NaN payloads are written bit-exact.
    pub fn write_f32(&mut self, value: f32) {
        let bits = value.to_bits();
        if bits == 0 {
            self.writer.put_u8(TAG_FLOAT_ZERO);
            return;
        }
        put_cached(self.writer, &mut self.caches.float, bits, FLOAT_REFS, |w| {
            w.put_u8(TAG_FLOAT);
            w.put_u32_le(bits);
        });
    }

    pub fn write_f64(&mut self, value: f64) {
        let bits = value.to_bits();
        if bits == 0 {
            self.writer.put_u8(TAG_DOUBLE_ZERO);
            return;
        }
        put_cached(self.writer, &mut self.caches.double, bits, DOUBLE_REFS, |w| {
            w.put_u8(TAG_DOUBLE);
            w.put_u64_le(bits);
        });
    }

    /// Decimals are keyed by their serialized form, so `1.0` and `1.00` stay distinct.
    pub fn write_decimal(&mut self, value: &Decimal) {
        let bytes = value.serialize();
        if bytes == Decimal::ZERO.serialize() {
            self.writer.put_u8(TAG_DECIMAL_ZERO);
            return;
        }
        put_cached(self.writer, &mut self.caches.decimal, bytes, DECIMAL_REFS, |w| {
            w.put_u8(TAG_DECIMAL);
            w.put_slice(&bytes);
        });
    }

    pub fn write_date(&mut self, value: &NaiveDateTime) {
        let utc = value.and_utc();
        self.write_date_bits((utc.timestamp(), utc.timestamp_subsec_nanos()));
    }

    pub fn write_date_utc(&mut self, value: &DateTime<Utc>) {
        self.write_date_bits((value.timestamp(), value.timestamp_subsec_nanos()));
    }

    fn write_date_bits(&mut self, bits: DateBits) {
        if bits == (0, 0) {
            self.writer.put_u8(TAG_DATE_EPOCH);
            return;
        }
        put_cached(self.writer, &mut self.caches.date, bits, DATE_REFS, |w| {
            w.put_u8(TAG_DATE);
            w.put_i64_le(bits.0);
            w.put_u32_le(bits.1);
        });
    }

    /// Values with equal instants but different offsets are distinct.
    pub fn write_date_offset(&mut self, value: &DateTime<FixedOffset>) {
        let bits = (
            value.timestamp(),
            value.timestamp_subsec_nanos(),
            value.offset().local_minus_utc(),
        );
        if bits == (0, 0, 0) {
            self.writer.put_u8(TAG_DATE_OFFSET_EPOCH);
            return;
        }
        put_cached(
            self.writer,
            &mut self.caches.date_offset,
            bits,
            DATE_OFFSET_REFS,
            |w| {
                w.put_u8(TAG_DATE_OFFSET);
                w.put_i64_le(bits.0);
                w.put_u32_le(bits.1);
                w.put_i32_le(bits.2);
            },
        );
    }

    pub fn write_interval(&mut self, value: &TimeDelta) {
        let bits = interval_bits(value);
        if bits == (0, 0) {
            self.writer.put_u8(TAG_INTERVAL_ZERO);
            return;
        }
        put_cached(self.writer, &mut self.caches.interval, bits, INTERVAL_REFS, |w| {
            w.put_u8(TAG_INTERVAL);
            w.put_i64_le(bits.0);
            w.put_u32_le(bits.1);
        });
    }

    /// Writes a 16-byte identifier.
    pub fn write_guid(&mut self, bytes: [u8; 16]) {
        if bytes == [0; 16] {
            self.writer.put_u8(TAG_GUID_NIL);
            return;
        }
        put_cached(self.writer, &mut self.caches.guid, bytes, GUID_REFS, |w| {
            w.put_u8(TAG_GUID);
            w.put_slice(&bytes);
        });
    }

    /// Strings are cached per length bucket, measured in characters.
    pub fn write_str(&mut self, value: &str) -> Result<()> {
        if value.is_empty() {
            self.writer.put_u8(TAG_STRING_EMPTY);
            return Ok(());
        }
        let bucket = self.caches.config.string_bucket(value.chars().count());
        let cache = &mut self.caches.strings[bucket];
        match cache.lookup(value) {
            Some(index) => put_reference(self.writer, STRING_REFS[bucket], index),
            None => {
                let len = checked_len(value.len(), "string")?;
                self.writer.put_u8(TAG_STRING);
                self.writer.put_u32_le(len);
                self.writer.put_slice(value.as_bytes());
                cache.insert(value.to_owned());
            }
        }
        Ok(())
    }

    /// Binary payloads are never cached.
    pub fn write_binary(&mut self, value: &[u8]) -> Result<()> {
        let len = checked_len(value.len(), "binary")?;
        self.writer.put_u8(TAG_BINARY);
        self.writer.put_u32_le(len);
        self.writer.put_slice(value);
        Ok(())
    }

    pub fn write_opaque(&mut self, value: &Opaque) -> Result<()> {
        self.writer.put_u8(TAG_OPAQUE);
        self.write_opaque_field(value.content_kind.as_deref().map(str::as_bytes))?;
        self.write_opaque_field(value.codec_kind.as_deref().map(str::as_bytes))?;
        self.write_opaque_field(value.payload.as_deref())
    }

    fn write_opaque_field(&mut self, field: Option<&[u8]>) -> Result<()> {
        match field {
            None => self.writer.put_i32_le(-1),
            Some(bytes) => {
                let len = i32::try_from(bytes.len()).map_err(|_| {
                    CodecError::Encode(format!("opaque field length {} exceeds i32", bytes.len()))
                })?;
                self.writer.put_i32_le(len);
                self.writer.put_slice(bytes);
            }
        }
        Ok(())
    }

    /// Opens an array or sequence body of `len` elements.
    pub fn begin_elements(&mut self, shape: Shape, len: usize) -> Result<()> {
        debug_assert!(matches!(shape, Shape::Array | Shape::Sequence));
        self.begin_body(shape, len)
    }

    /// Opens a map body of `len` key/value pairs.
    pub fn begin_entries(&mut self, len: usize) -> Result<()> {
        self.begin_body(Shape::Map, len)
    }

    /// Opens a properties body; `count` must equal the definition's property count.
    pub fn begin_properties(&mut self, count: usize) -> Result<()> {
        self.begin_body(Shape::Object, count)
    }

    fn begin_body(&mut self, shape: Shape, len: usize) -> Result<()> {
        let len = checked_len(len, shape.name())?;
        self.writer.put_u8(shape.body_tag());
        self.writer.put_u32_le(len);
        Ok(())
    }

    /// Writes an owned composite. It consumes an identity slot but is never referenced back.
    pub fn write_composite<T: Composite>(&mut self, value: &T) -> Result<()> {
        let descriptor = T::descriptor()?;
        self.write_envelope(None, descriptor.blob(), |cx| value.encode_body(cx))
    }

    /// Writes elements as an array body using the descriptor of `Box<[T]>`.
    pub fn write_slice<T: Encode + Decode + 'static>(&mut self, items: &[T]) -> Result<()> {
        let descriptor = <Box<[T]> as Composite>::descriptor()?;
        self.write_envelope(None, descriptor.blob(), |cx| {
            cx.begin_elements(Shape::Array, items.len())?;
            items.iter().try_for_each(|item| item.encode(cx))
        })
    }

    /// Materializes a lazy sequence and writes it as a `Vec`.
    pub fn write_iter<I>(&mut self, items: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Encode + Decode + 'static,
    {
        let items: Vec<I::Item> = items.into_iter().collect();
        self.write_composite(&items)
    }

    pub fn write_shared<T: Composite>(&mut self, shared: &Shared<T>) -> Result<()> {
        let address = shared.address();
        if self.try_write_object_ref(address) {
            return Ok(());
        }
        let descriptor = T::descriptor()?;
        self.write_tracked(address, descriptor.blob(), |cx| {
            shared.try_borrow_for_encode()?.encode_body(cx)
        })
    }

    pub(crate) fn write_native(&mut self, native: &NativeObject) -> Result<()> {
        let address = native.address();
        if self.try_write_object_ref(address) {
            return Ok(());
        }
        let descriptor = native.descriptor().clone();
        let encode = descriptor.routines().encode;
        self.write_tracked(address, descriptor.blob(), |cx| encode(native.object(), cx))
    }

    pub(crate) fn write_node(&mut self, node: &NodeHandle) -> Result<()> {
        let address = node.address();
        if self.try_write_object_ref(address) {
            return Ok(());
        }
        let blob = node.borrow().definition()?.to_blob();
        self.write_tracked(address, &blob, |cx| {
            let node = node.borrow();
            match &node.kind {
                NodeKind::Array(items) | NodeKind::Sequence(items) => {
                    cx.begin_elements(node.shape(), items.len())?;
                    items.iter().try_for_each(|item| item.encode(cx))
                }
                NodeKind::Map(entries) => {
                    cx.begin_entries(entries.len())?;
                    entries.iter().try_for_each(|(key, value)| {
                        key.encode(cx)?;
                        value.encode(cx)
                    })
                }
                NodeKind::Object(properties) => {
                    cx.begin_properties(properties.len())?;
                    properties.values().try_for_each(|value| value.encode(cx))
                }
            }
        })
    }

    fn try_write_object_ref(&mut self, address: usize) -> bool {
        match self.caches.objects.lookup(address) {
            Some(index) => {
                put_reference(self.writer, OBJECT_REFS, index);
                true
            }
            None => false,
        }
    }

    /// Writes an identity-bearing envelope. An allocation reached again while its own body is
    /// still being written, without having been registered, cannot be expressed.
    fn write_tracked(
        &mut self,
        address: usize,
        blob: &Bytes,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        if !self.caches.active.insert(address) {
            return Err(CodecError::Encode(
                "cyclic reference cannot be written: object cache is full".to_string(),
            ));
        }
        let result = self.write_envelope(Some(address), blob, body);
        self.caches.active.remove(&address);
        result
    }

    fn write_envelope(
        &mut self,
        address: Option<usize>,
        blob: &Bytes,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        self.caches.objects.register(address);
        self.write_type(blob)?;
        body(self)?;
        self.writer.put_u8(TAG_TYPE_END);
        Ok(())
    }

    fn write_type(&mut self, blob: &Bytes) -> Result<()> {
        if let Some(index) = self.caches.types.lookup(blob) {
            put_reference(self.writer, TYPE_REFS, index);
            return Ok(());
        }
        let len = checked_len(blob.len(), "type definition")?;
        self.writer.put_u8(TAG_TYPE_START);
        self.writer.put_u32_le(len);
        self.writer.put_slice(blob);
        self.caches.types.insert(blob.clone());
        Ok(())
    }
}
