//! Per-stream reference caches.
//!
//! The encoder and decoder each keep one cache per value category. A value that misses the
//! encoder's cache is written in full and appended; the decoder appends every full payload it
//! reads, so both sides assign the same dense index to the same value. Back-references are only
//! correct while that insertion order stays identical on both sides.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use bytes::Bytes;
use rust_decimal::Decimal;

use crate::config::CodecConfig;
use crate::descriptor::TypeDefinition;
use crate::value::{NativeObject, NodeHandle};
use crate::{MalformedStreamError, Result};

/// Seconds and nanoseconds since the Unix epoch.
pub type DateBits = (i64, u32);
/// Seconds and nanoseconds since the Unix epoch plus the UTC offset in seconds.
pub type DateOffsetBits = (i64, u32, i32);
/// Normalized seconds and non-negative nanoseconds.
pub type IntervalBits = (i64, u32);

/// Encode-side cache mapping previously written values to their index.
#[derive(Debug)]
pub struct ValueCache<K> {
    name: &'static str,
    index: HashMap<K, u16>,
    capacity: usize,
}

impl<K: Hash + Eq> ValueCache<K> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            index: HashMap::new(),
            capacity,
        }
    }

    #[inline]
    pub fn lookup<Q>(&self, key: &Q) -> Option<u16>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(key).copied()
    }

    /// Appends `key` and returns its index, or `None` once the cache is full.
    ///
    /// Callers must only insert keys that missed [`lookup`](Self::lookup).
    pub fn insert(&mut self, key: K) -> Option<u16> {
        let len = self.index.len();
        if len >= self.capacity {
            return None;
        }
        let index = len as u16;
        self.index.insert(key, index);
        if len + 1 == self.capacity {
            tracing::debug!(cache = self.name, capacity = self.capacity, "value cache full");
        }
        Some(index)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.index.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }
}

/// Decode-side cache: an array indexed by insertion order.
#[derive(Debug)]
pub struct ReadCache<V> {
    name: &'static str,
    values: Vec<V>,
    capacity: usize,
}

impl<V> ReadCache<V> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            values: Vec::new(),
            capacity,
        }
    }

    /// Appends a value read in full. Values beyond capacity are dropped, matching the encoder.
    #[inline]
    pub fn push(&mut self, value: V) {
        if self.values.len() < self.capacity {
            self.values.push(value);
        }
    }

    /// Resolves a back-reference.
    ///
    /// # Errors
    /// Returns `MalformedStreamError::ReferenceOutOfRange` if `index` has not been populated in
    /// this stream.
    pub fn get(&self, index: usize) -> Result<&V> {
        self.values.get(index).ok_or_else(|| {
            MalformedStreamError::ReferenceOutOfRange {
                cache: self.name,
                index,
                len: self.values.len(),
            }
            .into()
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Encode-side object identity registry.
///
/// Every composite envelope consumes one slot. Only values with a stable shared allocation
/// (`Shared<T>`, fallback nodes, native objects) pass a key and can be found again.
#[derive(Debug)]
pub struct IdentityCache {
    index: HashMap<usize, u16>,
    len: usize,
    capacity: usize,
}

impl IdentityCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::new(),
            len: 0,
            capacity,
        }
    }

    #[inline]
    pub fn lookup(&self, address: usize) -> Option<u16> {
        self.index.get(&address).copied()
    }

    /// Consumes the next slot; returns `None` once the cache is full.
    pub fn register(&mut self, address: Option<usize>) -> Option<u16> {
        if self.len >= self.capacity {
            return None;
        }
        let index = self.len as u16;
        if let Some(address) = address {
            self.index.insert(address, index);
        }
        self.len += 1;
        Some(index)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.len = 0;
    }
}

/// What a decoded object slot resolves to.
#[derive(Debug, Clone)]
pub enum Slot {
    /// Owned composite; never the target of a back-reference.
    Pending,
    Node(NodeHandle),
    Native(NativeObject),
}

/// Decode-side object identity table.
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Slot>,
    capacity: usize,
}

impl SlotTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
        }
    }

    /// Claims the next slot before the composite's members are decoded.
    pub fn reserve(&mut self) -> Option<usize> {
        if self.slots.len() >= self.capacity {
            return None;
        }
        self.slots.push(Slot::Pending);
        Some(self.slots.len() - 1)
    }

    pub fn fill(&mut self, index: Option<usize>, slot: Slot) {
        if let Some(entry) = index.and_then(|i| self.slots.get_mut(i)) {
            *entry = slot;
        }
    }

    pub fn get(&self, index: usize) -> Result<&Slot> {
        self.slots.get(index).ok_or_else(|| {
            MalformedStreamError::ReferenceOutOfRange {
                cache: "object",
                index,
                len: self.slots.len(),
            }
            .into()
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

/// All encode-side caches of one [`Encoder`](crate::Encoder).
#[derive(Debug)]
pub struct EncodeCaches {
    pub(crate) config: CodecConfig,
    pub decimal: ValueCache<[u8; 16]>,
    pub double: ValueCache<u64>,
    pub float: ValueCache<u32>,
    pub long: ValueCache<i64>,
    pub ulong: ValueCache<u64>,
    pub date: ValueCache<DateBits>,
    pub date_offset: ValueCache<DateOffsetBits>,
    pub interval: ValueCache<IntervalBits>,
    pub guid: ValueCache<[u8; 16]>,
    pub strings: [ValueCache<String>; 4],
    pub types: ValueCache<Bytes>,
    pub objects: IdentityCache,
    /// Shared allocations whose body is currently being written.
    pub(crate) active: HashSet<usize>,
}

impl EncodeCaches {
    pub fn new(config: CodecConfig) -> Self {
        let capacity = config.cache_capacity();
        Self {
            decimal: ValueCache::new("decimal", capacity),
            double: ValueCache::new("double", capacity),
            float: ValueCache::new("float", capacity),
            long: ValueCache::new("long", capacity),
            ulong: ValueCache::new("unsigned long", capacity),
            date: ValueCache::new("date", capacity),
            date_offset: ValueCache::new("date with offset", capacity),
            interval: ValueCache::new("time interval", capacity),
            guid: ValueCache::new("identifier", capacity),
            strings: [
                ValueCache::new("string/8", capacity),
                ValueCache::new("string/16", capacity),
                ValueCache::new("string/32", capacity),
                ValueCache::new("string/long", capacity),
            ],
            types: ValueCache::new("type", capacity),
            objects: IdentityCache::new(capacity),
            active: HashSet::new(),
            config,
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn clear(&mut self) {
        self.decimal.clear();
        self.double.clear();
        self.float.clear();
        self.long.clear();
        self.ulong.clear();
        self.date.clear();
        self.date_offset.clear();
        self.interval.clear();
        self.guid.clear();
        self.strings.iter_mut().for_each(ValueCache::clear);
        self.types.clear();
        self.objects.clear();
        self.active.clear();
    }

    /// True when every cache is empty.
    pub fn is_clear(&self) -> bool {
        self.decimal.is_empty()
            && self.double.is_empty()
            && self.float.is_empty()
            && self.long.is_empty()
            && self.ulong.is_empty()
            && self.date.is_empty()
            && self.date_offset.is_empty()
            && self.interval.is_empty()
            && self.guid.is_empty()
            && self.strings.iter().all(ValueCache::is_empty)
            && self.types.is_empty()
            && self.objects.is_empty()
            && self.active.is_empty()
    }
}

/// All decode-side caches of one [`Decoder`](crate::Decoder).
#[derive(Debug)]
pub struct DecodeCaches {
    pub(crate) config: CodecConfig,
    pub decimal: ReadCache<Decimal>,
    pub double: ReadCache<f64>,
    pub float: ReadCache<f32>,
    pub long: ReadCache<i64>,
    pub ulong: ReadCache<u64>,
    pub date: ReadCache<DateBits>,
    pub date_offset: ReadCache<DateOffsetBits>,
    pub interval: ReadCache<IntervalBits>,
    pub guid: ReadCache<[u8; 16]>,
    pub strings: [ReadCache<String>; 4],
    pub types: ReadCache<Arc<TypeDefinition>>,
    pub objects: SlotTable,
}

impl DecodeCaches {
    pub fn new(config: CodecConfig) -> Self {
        let capacity = config.cache_capacity();
        Self {
            decimal: ReadCache::new("decimal", capacity),
            double: ReadCache::new("double", capacity),
            float: ReadCache::new("float", capacity),
            long: ReadCache::new("long", capacity),
            ulong: ReadCache::new("unsigned long", capacity),
            date: ReadCache::new("date", capacity),
            date_offset: ReadCache::new("date with offset", capacity),
            interval: ReadCache::new("time interval", capacity),
            guid: ReadCache::new("identifier", capacity),
            strings: [
                ReadCache::new("string/8", capacity),
                ReadCache::new("string/16", capacity),
                ReadCache::new("string/32", capacity),
                ReadCache::new("string/long", capacity),
            ],
            types: ReadCache::new("type", capacity),
            objects: SlotTable::new(capacity),
            config,
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn clear(&mut self) {
        self.decimal.clear();
        self.double.clear();
        self.float.clear();
        self.long.clear();
        self.ulong.clear();
        self.date.clear();
        self.date_offset.clear();
        self.interval.clear();
        self.guid.clear();
        self.strings.iter_mut().for_each(ReadCache::clear);
        self.types.clear();
        self.objects.clear();
    }

    pub fn is_clear(&self) -> bool {
        self.decimal.is_empty()
            && self.double.is_empty()
            && self.float.is_empty()
            && self.long.is_empty()
            && self.ulong.is_empty()
            && self.date.is_empty()
            && self.date_offset.is_empty()
            && self.interval.is_empty()
            && self.guid.is_empty()
            && self.strings.iter().all(ReadCache::is_empty)
            && self.types.is_empty()
            && self.objects.is_empty()
    }
}
