use crate::{CodecError, Result};

/// Default number of live entries per value cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 2047;

/// Largest capacity still addressable by a wide (u16) back-reference.
pub const MAX_CACHE_CAPACITY: usize = u16::MAX as usize + 1;

/// Default upper character counts of the first three string buckets; longer strings use the fourth.
pub const DEFAULT_STRING_BUCKETS: [usize; 3] = [8, 16, 32];

/// File extension reserved for refpack streams.
pub const FILE_EXTENSION: &str = "rpk";

/// MIME type reserved for refpack streams.
pub const MIME_TYPE: &str = "application/x-refpack";

/// How callers label refpack streams for content negotiation.
///
/// These values are not part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentIdentity {
    pub file_extension: String,
    pub mime_type: String,
}

impl Default for ContentIdentity {
    fn default() -> Self {
        Self {
            file_extension: FILE_EXTENSION.to_string(),
            mime_type: MIME_TYPE.to_string(),
        }
    }
}

/// Settings shared by an [`Encoder`](crate::Encoder) and the [`Decoder`](crate::Decoder) reading its output.
///
/// Both peers must agree on `cache_capacity` and `string_buckets`; a mismatch silently
/// misaligns back-references.
///
/// # Example
/// ```rust
/// use refpack::CodecConfig;
///
/// let config = CodecConfig::default().with_cache_capacity(255).unwrap();
/// assert_eq!(config.cache_capacity(), 255);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    cache_capacity: usize,
    string_buckets: [usize; 3],
    identity: ContentIdentity,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            string_buckets: DEFAULT_STRING_BUCKETS,
            identity: ContentIdentity::default(),
        }
    }
}

impl CodecConfig {
    /// Sets the per-cache capacity.
    ///
    /// # Errors
    /// Returns `CodecError::Config` unless `1 <= capacity <= 65536`.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_CACHE_CAPACITY {
            return Err(CodecError::Config(format!(
                "cache capacity must be within 1..={}, got {}",
                MAX_CACHE_CAPACITY, capacity
            )));
        }
        self.cache_capacity = capacity;
        Ok(self)
    }

    /// Sets the upper character counts of the first three string buckets.
    ///
    /// # Errors
    /// Returns `CodecError::Config` if the bounds are not strictly increasing.
    pub fn with_string_buckets(mut self, buckets: [usize; 3]) -> Result<Self> {
        if !(buckets[0] < buckets[1] && buckets[1] < buckets[2]) {
            return Err(CodecError::Config(format!(
                "string buckets must be strictly increasing, got {:?}",
                buckets
            )));
        }
        self.string_buckets = buckets;
        Ok(self)
    }

    pub fn with_identity(mut self, identity: ContentIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    pub fn string_buckets(&self) -> [usize; 3] {
        self.string_buckets
    }

    pub fn identity(&self) -> &ContentIdentity {
        &self.identity
    }

    /// Index of the string cache a string with `chars` characters belongs to.
    #[inline]
    pub fn string_bucket(&self, chars: usize) -> usize {
        self.string_buckets
            .iter()
            .position(|&bound| chars <= bound)
            .unwrap_or(self.string_buckets.len())
    }
}
