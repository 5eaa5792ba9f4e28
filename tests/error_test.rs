use bytes::{BufMut, Bytes, BytesMut};
use refpack::tags::*;
use refpack::{
    decode, decode_value, encode, CodecConfig, CodecError, Decoder, Encoder, MalformedStreamError,
    Node, NodeHandle, Object, Shared, Value,
};

#[derive(Object, Default, Debug, PartialEq)]
struct Point {
    x: i32,
    y: i32,
}

/// Builds a raw stream from framed body bytes.
fn stream(body: impl FnOnce(&mut BytesMut)) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(TAG_STREAM_START);
    body(&mut buf);
    buf.put_u8(TAG_STREAM_END);
    buf.freeze()
}

fn put_definition(buf: &mut BytesMut, blob: &str) {
    buf.put_u8(TAG_TYPE_START);
    buf.put_u32_le(blob.len() as u32);
    buf.put_slice(blob.as_bytes());
}

fn malformed(err: CodecError) -> MalformedStreamError {
    match err {
        CodecError::Malformed(inner) => inner,
        other => panic!("expected malformed stream error, got {:?}", other),
    }
}

#[test]
fn test_unknown_tag() {
    let mut bytes = stream(|b| b.put_u8(250));
    let err = malformed(decode_value(&mut bytes).unwrap_err());
    assert!(matches!(err, MalformedStreamError::UnknownTag { tag: 250 }));
    assert_eq!(err.to_string(), "Unknown tag 250");
}

#[test]
fn test_reference_before_any_entry() {
    let mut bytes = stream(|b| {
        b.put_u8(TAG_INT64_REF);
        b.put_u8(5);
    });
    let err = malformed(decode::<i64>(&mut bytes).unwrap_err());
    assert!(
        matches!(
            err,
            MalformedStreamError::ReferenceOutOfRange {
                cache: "long",
                index: 5,
                len: 0
            }
        ),
        "{:?}",
        err
    );
}

#[test]
fn test_wide_reference_out_of_range() {
    let mut bytes = stream(|b| {
        b.put_u8(TAG_STRING8_REF_WIDE);
        b.put_u16_le(300);
    });
    let err = malformed(decode::<String>(&mut bytes).unwrap_err());
    assert!(matches!(
        err,
        MalformedStreamError::ReferenceOutOfRange { index: 300, .. }
    ));
}

#[test]
fn test_truncated_input() {
    let full = encode(&1000i64).unwrap();
    for cut in 0..full.len() - 1 {
        let mut partial = full.slice(..cut);
        let err = decode::<i64>(&mut partial).unwrap_err();
        assert!(matches!(err, CodecError::InsufficientData), "cut {}: {:?}", cut, err);
    }

    let full = encode(&vec!["abc".to_string()]).unwrap();
    let mut partial = full.slice(..full.len() - 4);
    assert!(matches!(
        decode::<Vec<String>>(&mut partial).unwrap_err(),
        CodecError::InsufficientData
    ));
}

#[test]
fn test_missing_stream_start() {
    let mut bytes = Bytes::from_static(&[TAG_INT_ZERO, TAG_STREAM_END]);
    let err = malformed(decode::<i32>(&mut bytes).unwrap_err());
    assert!(matches!(
        err,
        MalformedStreamError::UnexpectedTag {
            expected: "stream start",
            actual: TAG_INT_ZERO
        }
    ));
    assert_eq!(
        err.to_string(),
        "Expected stream start, got tag 33 (small integer)"
    );
}

#[test]
fn test_trailing_value_before_stream_end() {
    let mut bytes = stream(|b| {
        b.put_u8(TAG_INT_ZERO);
        b.put_u8(TAG_INT_ZERO);
    });
    let err = malformed(decode::<i32>(&mut bytes).unwrap_err());
    assert!(matches!(
        err,
        MalformedStreamError::UnexpectedTag {
            expected: "stream end",
            ..
        }
    ));
}

#[test]
fn test_integer_out_of_range() {
    let mut bytes = encode(&300i32).unwrap();
    let err = malformed(decode::<u8>(&mut bytes).unwrap_err());
    assert!(matches!(
        err,
        MalformedStreamError::OutOfRange {
            value: 300,
            target: "u8"
        }
    ));

    let mut bytes = encode(&-1i64).unwrap();
    assert!(decode::<u64>(&mut bytes).is_err());
}

#[test]
fn test_category_mismatch() {
    let mut bytes = encode("yes").unwrap();
    let err = malformed(decode::<bool>(&mut bytes).unwrap_err());
    assert!(matches!(
        err,
        MalformedStreamError::UnexpectedTag {
            expected: "bool",
            actual: TAG_STRING
        }
    ));

    let mut bytes = encode(&vec![1i32]).unwrap();
    assert!(decode::<String>(&mut bytes).is_err());

    let mut bytes = encode(&1.5f64).unwrap();
    assert!(decode::<f32>(&mut bytes).is_err());
}

#[test]
fn test_body_shape_mismatch() {
    let mut bytes = encode(&std::collections::HashMap::<i32, i32>::new()).unwrap();
    let err = malformed(decode::<Vec<i32>>(&mut bytes).unwrap_err());
    assert!(matches!(
        err,
        MalformedStreamError::UnexpectedTag {
            expected: "sequence",
            actual: TAG_MAP_START
        }
    ));
}

#[test]
fn test_invalid_utf8() {
    let mut bytes = stream(|b| {
        b.put_u8(TAG_STRING);
        b.put_u32_le(2);
        b.put_slice(&[0xff, 0xfe]);
    });
    let err = malformed(decode::<String>(&mut bytes).unwrap_err());
    assert!(matches!(err, MalformedStreamError::Utf8(_)));
}

#[test]
fn test_invalid_char() {
    let mut bytes = stream(|b| {
        b.put_u8(TAG_CHAR);
        b.put_u32_le(0xD800);
    });
    let err = malformed(decode::<char>(&mut bytes).unwrap_err());
    assert!(matches!(err, MalformedStreamError::InvalidPayload { kind: "char" }));
}

#[test]
fn test_property_count_mismatch() {
    let body = |b: &mut BytesMut| {
        put_definition(b, "Point;x;y");
        b.put_u8(TAG_PROPERTIES_START);
        b.put_u32_le(1);
        b.put_u8(TAG_INT_ZERO);
        b.put_u8(TAG_TYPE_END);
    };

    let err = malformed(decode::<Point>(&mut stream(body)).unwrap_err());
    assert!(
        matches!(
            &err,
            MalformedStreamError::PropertyCountMismatch {
                type_name,
                expected: 2,
                actual: 1
            } if type_name == "Point"
        ),
        "{:?}",
        err
    );

    let err = malformed(decode_value(&mut stream(body)).unwrap_err());
    assert!(matches!(err, MalformedStreamError::PropertyCountMismatch { .. }));
}

#[test]
fn test_invalid_type_definition() {
    let mut bytes = stream(|b| {
        put_definition(b, ";x");
        b.put_u8(TAG_PROPERTIES_START);
        b.put_u32_le(1);
        b.put_u8(TAG_INT_ZERO);
        b.put_u8(TAG_TYPE_END);
    });
    let err = malformed(decode_value(&mut bytes).unwrap_err());
    assert!(matches!(err, MalformedStreamError::InvalidTypeDefinition(_)));
}

#[test]
fn test_object_reference_to_owned_value() {
    // a list of points whose second element points back at the first
    let mut bytes = stream(|b| {
        put_definition(b, "List<Point>");
        b.put_u8(TAG_SEQUENCE_START);
        b.put_u32_le(2);
        put_definition(b, "Point;x;y");
        b.put_u8(TAG_PROPERTIES_START);
        b.put_u32_le(2);
        b.put_u8(TAG_INT_ZERO);
        b.put_u8(TAG_INT_ZERO);
        b.put_u8(TAG_TYPE_END);
        b.put_u8(TAG_OBJECT_REF);
        b.put_u8(1);
        b.put_u8(TAG_TYPE_END);
    });
    let err = malformed(decode::<Vec<Point>>(&mut bytes.clone()).unwrap_err());
    assert!(matches!(
        err,
        MalformedStreamError::IncompatibleReference { index: 1, .. }
    ));

    // the same stream still reads generically
    let value = decode_value(&mut bytes).unwrap();
    assert_eq!(value.element(0).unwrap(), value.element(1).unwrap());
}

#[test]
fn test_object_reference_out_of_range() {
    let mut bytes = stream(|b| {
        b.put_u8(TAG_OBJECT_REF);
        b.put_u8(0);
    });
    let err = malformed(decode::<Shared<Point>>(&mut bytes).unwrap_err());
    assert!(matches!(
        err,
        MalformedStreamError::ReferenceOutOfRange { cache: "object", .. }
    ));
}

#[test]
fn test_decoder_caches_are_cleared_after_failure() {
    let mut bytes = stream(|b| {
        put_definition(b, "List<i64>");
        b.put_u8(TAG_SEQUENCE_START);
        b.put_u32_le(3);
        b.put_u8(TAG_INT64);
        b.put_i64_le(1000);
        b.put_u8(TAG_STRING);
        b.put_u32_le(1);
        b.put_u8(b'x');
    });
    let mut decoder = Decoder::new();
    assert!(decoder.decode::<Vec<i64>>(&mut bytes).is_err());
    assert!(decoder.caches().is_clear());

    let mut good = encode(&vec![1000i64]).unwrap();
    assert_eq!(decoder.decode::<Vec<i64>>(&mut good).unwrap(), vec![1000]);
}

#[test]
fn test_unrepresentable_names_fail_to_encode() {
    let mut encoder = Encoder::new();
    let mut writer = BytesMut::new();

    let bad_type = NodeHandle::new(Node::object("Bad;Type", [("a", Value::Null)]));
    let err = encoder
        .encode(&mut writer, &Value::Node(bad_type))
        .unwrap_err();
    assert!(matches!(err, CodecError::Encode(_)));
    assert!(encoder.caches().is_clear());

    let bad_property = NodeHandle::new(Node::object("Good", [("a;b", Value::Null)]));
    let err = encoder
        .encode(&mut writer, &Value::Node(bad_property))
        .unwrap_err();
    assert!(matches!(err, CodecError::Encode(_)));

    let mut writer = BytesMut::new();
    encoder.encode(&mut writer, &Point { x: 1, y: 2 }).unwrap();
    let decoded: Point = decode(&mut writer.freeze()).unwrap();
    assert_eq!(decoded, Point { x: 1, y: 2 });
}

#[test]
fn test_config_validation() {
    assert!(matches!(
        CodecConfig::default().with_cache_capacity(0),
        Err(CodecError::Config(_))
    ));
    assert!(matches!(
        CodecConfig::default().with_cache_capacity(65537),
        Err(CodecError::Config(_))
    ));
    assert_eq!(
        CodecConfig::default()
            .with_cache_capacity(65536)
            .unwrap()
            .cache_capacity(),
        65536
    );
    assert!(matches!(
        CodecConfig::default().with_string_buckets([8, 8, 32]),
        Err(CodecError::Config(_))
    ));
    assert!(matches!(
        CodecConfig::default().with_string_buckets([16, 8, 32]),
        Err(CodecError::Config(_))
    ));
}

#[test]
fn test_content_identity() {
    let config = CodecConfig::default();
    assert_eq!(config.identity().file_extension, refpack::FILE_EXTENSION);
    assert_eq!(config.identity().mime_type, refpack::MIME_TYPE);

    let custom = config.with_identity(refpack::ContentIdentity {
        file_extension: "bin".into(),
        mime_type: "application/octet-stream".into(),
    });
    assert_eq!(custom.identity().file_extension, "bin");
}
