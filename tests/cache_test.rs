use refpack::cache::{IdentityCache, ReadCache, Slot, SlotTable, ValueCache};
use refpack::{CodecConfig, CodecError, MalformedStreamError};

#[test]
fn test_value_cache_assigns_dense_indices() {
    let mut cache = ValueCache::new("long", 3);
    assert!(cache.is_empty());
    assert_eq!(cache.insert(10i64), Some(0));
    assert_eq!(cache.insert(20), Some(1));
    assert_eq!(cache.lookup(&10), Some(0));
    assert_eq!(cache.lookup(&20), Some(1));
    assert_eq!(cache.lookup(&30), None);
    assert_eq!(cache.insert(30), Some(2));
    assert!(cache.is_full());

    // full caches stop growing; existing entries stay addressable
    assert_eq!(cache.insert(40), None);
    assert_eq!(cache.lookup(&40), None);
    assert_eq!(cache.lookup(&30), Some(2));
    assert_eq!(cache.len(), 3);

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.lookup(&10), None);
}

#[test]
fn test_string_cache_borrowed_lookup() {
    let mut cache: ValueCache<String> = ValueCache::new("string/8", 8);
    cache.insert("hello".to_string());
    assert_eq!(cache.lookup("hello"), Some(0));
    assert_eq!(cache.lookup("world"), None);
}

#[test]
fn test_read_cache_mirrors_capacity() {
    let mut cache = ReadCache::new("double", 2);
    cache.push(1.5f64);
    cache.push(2.5);
    cache.push(3.5);
    assert_eq!(cache.len(), 2);
    assert_eq!(*cache.get(1).unwrap(), 2.5);

    match cache.get(2) {
        Err(CodecError::Malformed(MalformedStreamError::ReferenceOutOfRange {
            cache: name,
            index,
            len,
        })) => {
            assert_eq!(name, "double");
            assert_eq!(index, 2);
            assert_eq!(len, 2);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_identity_cache_consumes_slots_for_anonymous_envelopes() {
    let mut cache = IdentityCache::new(3);
    assert_eq!(cache.register(None), Some(0));
    assert_eq!(cache.register(Some(0x1000)), Some(1));
    assert_eq!(cache.lookup(0x1000), Some(1));
    assert_eq!(cache.register(Some(0x2000)), Some(2));
    assert_eq!(cache.register(Some(0x3000)), None);
    assert_eq!(cache.lookup(0x3000), None);
    assert_eq!(cache.len(), 3);
}

#[test]
fn test_slot_table() {
    let mut table = SlotTable::new(2);
    assert_eq!(table.reserve(), Some(0));
    assert_eq!(table.reserve(), Some(1));
    assert_eq!(table.reserve(), None);
    assert!(matches!(table.get(0), Ok(Slot::Pending)));
    assert!(table.get(2).is_err());

    // filling an unreserved slot is a no-op
    table.fill(None, Slot::Pending);
    assert_eq!(table.len(), 2);

    table.clear();
    assert!(table.is_empty());
}

#[test]
fn test_string_bucket_selection() {
    let config = CodecConfig::default();
    assert_eq!(config.string_bucket(1), 0);
    assert_eq!(config.string_bucket(8), 0);
    assert_eq!(config.string_bucket(9), 1);
    assert_eq!(config.string_bucket(16), 1);
    assert_eq!(config.string_bucket(32), 2);
    assert_eq!(config.string_bucket(33), 3);
    assert_eq!(config.string_bucket(100_000), 3);
}
