use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use bytes::BytesMut;
use indexmap::{IndexMap, IndexSet};
use refpack::{
    decode, encode, CodecConfig, CodecError, Decode, Encode, EncodeContext, Encoder, NativeObject,
    Node, NodeHandle, Object, Shared, Value,
};

#[derive(Object, Default, Debug)]
#[refpack(name = "Person")]
struct Person {
    name: String,
    friend: Option<Shared<Person>>,
}

fn person(name: &str) -> Shared<Person> {
    Shared::new(Person {
        name: name.to_string(),
        friend: None,
    })
}

/// Breaks reference cycles so test graphs are freed.
fn unlink(people: &[Shared<Person>]) {
    for p in people {
        p.borrow_mut().friend = None;
    }
}

fn roundtrip<T: Encode + Decode>(value: &T) -> T {
    let mut bytes = encode(value).unwrap();
    let decoded = decode(&mut bytes).unwrap();
    assert!(bytes.is_empty());
    decoded
}

#[test]
fn test_shared_value_is_written_once() {
    let ada = person("ada");
    let team = vec![ada.clone(), ada.clone(), ada.clone()];

    let bytes = encode(&team).unwrap();
    let single = encode(&vec![ada.clone()]).unwrap();
    // each repeat costs one narrow object reference
    assert_eq!(bytes.len(), single.len() + 2 * 2);

    let decoded: Vec<Shared<Person>> = decode(&mut bytes.clone()).unwrap();
    assert_eq!(decoded.len(), 3);
    assert!(decoded[0].ptr_eq(&decoded[1]));
    assert!(decoded[1].ptr_eq(&decoded[2]));
    assert_eq!(decoded[0].borrow().name, "ada");
    assert_eq!(decoded[0].handle_count(), 3);
}

#[test]
fn test_distinct_equal_values_stay_distinct() {
    let team = vec![person("ada"), person("ada")];
    let decoded = roundtrip(&team);
    assert!(!decoded[0].ptr_eq(&decoded[1]));
    assert_eq!(decoded[0].borrow().name, decoded[1].borrow().name);
}

#[test]
fn test_self_cycle() {
    let ada = person("ada");
    ada.borrow_mut().friend = Some(ada.clone());

    let decoded = roundtrip(&ada);
    let friend = decoded.borrow().friend.clone().unwrap();
    assert!(friend.ptr_eq(&decoded));
    assert_eq!(friend.borrow().name, "ada");

    unlink(&[ada, decoded]);
}

#[test]
fn test_two_node_cycle() {
    let a = person("a");
    let b = person("b");
    a.borrow_mut().friend = Some(b.clone());
    b.borrow_mut().friend = Some(a.clone());

    let decoded = roundtrip(&a);
    let decoded_b = decoded.borrow().friend.clone().unwrap();
    assert_eq!(decoded_b.borrow().name, "b");
    let back = decoded_b.borrow().friend.clone().unwrap();
    assert!(back.ptr_eq(&decoded));

    unlink(&[a, b, decoded, decoded_b]);
}

#[test]
fn test_shared_across_collection_members() {
    let hub = person("hub");
    let spoke_a = Shared::new(Person {
        name: "a".into(),
        friend: Some(hub.clone()),
    });
    let spoke_b = Shared::new(Person {
        name: "b".into(),
        friend: Some(hub.clone()),
    });

    let decoded = roundtrip(&vec![spoke_a, hub.clone(), spoke_b]);
    let hub_via_a = decoded[0].borrow().friend.clone().unwrap();
    let hub_via_b = decoded[2].borrow().friend.clone().unwrap();
    assert!(hub_via_a.ptr_eq(&decoded[1]));
    assert!(hub_via_b.ptr_eq(&decoded[1]));
}

#[test]
fn test_cycle_beyond_identity_capacity_is_an_error() {
    let config = CodecConfig::default().with_cache_capacity(1).unwrap();
    let a = person("a");
    let b = person("b");
    a.borrow_mut().friend = Some(b.clone());
    b.borrow_mut().friend = Some(b.clone());

    let mut encoder = Encoder::with_config(config);
    let mut writer = BytesMut::new();
    let err = encoder.encode(&mut writer, &a).unwrap_err();
    assert!(matches!(err, CodecError::Encode(_)), "{:?}", err);
    assert!(encoder.caches().is_clear());

    // the encoder is still usable for acyclic input
    b.borrow_mut().friend = None;
    let mut writer = BytesMut::new();
    encoder.encode(&mut writer, &a).unwrap();

    unlink(&[a, b]);
}

#[test]
fn test_sharing_beyond_identity_capacity_is_rewritten() {
    let config = CodecConfig::default().with_cache_capacity(1).unwrap();
    let ada = person("ada");
    let team = vec![ada.clone(), ada.clone()];

    let mut writer = BytesMut::new();
    Encoder::with_config(config.clone())
        .encode(&mut writer, &team)
        .unwrap();
    let decoded: Vec<Shared<Person>> = refpack::Decoder::with_config(config)
        .decode(&mut writer.freeze())
        .unwrap();
    // the list envelope took the only slot, so both members were written in full
    assert!(!decoded[0].ptr_eq(&decoded[1]));
    assert_eq!(decoded[1].borrow().name, "ada");
}

#[test]
fn test_sequences() {
    let list = vec![1i32, 2, 3];
    assert_eq!(roundtrip(&list), list);

    let deque: VecDeque<String> = ["x", "y"].into_iter().map(String::from).collect();
    assert_eq!(roundtrip(&deque), deque);

    let sorted: BTreeSet<i64> = [5, 1, 3000].into_iter().collect();
    assert_eq!(roundtrip(&sorted), sorted);

    let set: HashSet<u16> = [7, 8, 9000].into_iter().collect();
    assert_eq!(roundtrip(&set), set);

    let ordered: IndexSet<String> = ["z", "a", "m"].into_iter().map(String::from).collect();
    let decoded = roundtrip(&ordered);
    assert!(decoded.iter().eq(ordered.iter()));

    let empty: Vec<i32> = Vec::new();
    assert_eq!(roundtrip(&empty), empty);
}

#[test]
fn test_maps() {
    let map: HashMap<String, f64> = [("pi".to_string(), 3.14), ("e".to_string(), 2.71)]
        .into_iter()
        .collect();
    assert_eq!(roundtrip(&map), map);

    let sorted: BTreeMap<i32, Vec<String>> =
        [(1, vec!["one".to_string()]), (2, vec![])].into_iter().collect();
    assert_eq!(roundtrip(&sorted), sorted);

    let ordered: IndexMap<String, i64> = [("b".to_string(), 2), ("a".to_string(), 1)]
        .into_iter()
        .collect();
    let decoded = roundtrip(&ordered);
    assert!(decoded.iter().eq(ordered.iter()));
}

#[test]
fn test_arrays() {
    let fixed = [1u8, 2, 3, 4];
    assert_eq!(roundtrip(&fixed), fixed);

    let boxed: Box<[String]> = vec!["a".to_string(), "b".to_string()].into_boxed_slice();
    assert_eq!(roundtrip(&boxed), boxed);

    // slices are written exactly like boxed slices
    let slice: &[String] = &boxed;
    assert_eq!(encode(slice).unwrap(), encode(&boxed).unwrap());
}

#[test]
fn test_array_length_mismatch() {
    let mut bytes = encode(&[1i32, 2, 3]).unwrap();
    let err = decode::<[i32; 2]>(&mut bytes).unwrap_err();
    assert!(
        matches!(
            err,
            CodecError::Malformed(refpack::MalformedStreamError::LengthMismatch {
                expected: 2,
                actual: 3,
                ..
            })
        ),
        "{:?}",
        err
    );
}

#[test]
fn test_nested_collections() {
    let nested: Vec<HashMap<String, Vec<Option<i64>>>> = vec![
        [("k".to_string(), vec![Some(1), None, Some(5000)])]
            .into_iter()
            .collect(),
        HashMap::new(),
    ];
    assert_eq!(roundtrip(&nested), nested);
}

#[test]
fn test_iterator_is_written_as_list() {
    let mut encoder = Encoder::new();
    let mut writer = BytesMut::new();
    encoder
        .encode_iter(&mut writer, (1..=4).map(|i| i * 1000i64))
        .unwrap();
    assert_eq!(writer.freeze(), encode(&vec![1000i64, 2000, 3000, 4000]).unwrap());
}

#[test]
fn test_encode_to_writer() {
    let mut sink = Vec::new();
    let written = Encoder::new()
        .encode_to_writer(&mut sink, &vec!["a".to_string()])
        .unwrap();
    assert_eq!(written, sink.len());

    let decoded: Vec<String> = refpack::Decoder::new()
        .decode_from_reader(&mut sink.as_slice())
        .unwrap();
    assert_eq!(decoded, vec!["a".to_string()]);
}

/// Writes its countdown lazily as a list of longs.
struct Countdown(i64);

impl Encode for Countdown {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> refpack::Result<()> {
        cx.write_iter((1..=self.0).rev().map(|i| i * 1000))
    }
}

#[test]
fn test_hand_written_impl_streams_an_iterator() {
    let bytes = encode(&Countdown(3)).unwrap();
    assert_eq!(bytes, encode(&vec![3000i64, 2000, 1000]).unwrap());
    let decoded: Vec<i64> = decode(&mut bytes.clone()).unwrap();
    assert_eq!(decoded, vec![3000, 2000, 1000]);
}

#[derive(Object, Default, Debug)]
#[refpack(name = "Leaf")]
struct Leaf {
    label: String,
}

#[derive(Object, Default, Debug)]
#[refpack(name = "Holder")]
struct Holder {
    any: Value,
    typed: Option<Shared<Leaf>>,
}

#[test]
fn test_typed_reference_to_generically_read_object() {
    let leaf = Shared::new(Leaf {
        label: "shared".into(),
    });
    let holder = Holder {
        any: Value::Native(NativeObject::from_shared(&leaf).unwrap()),
        typed: Some(leaf.clone()),
    };
    let bytes = encode(&holder).unwrap();

    // "Leaf" is never registered, so `any` reads back as a node
    let decoded: Holder = decode(&mut bytes.clone()).unwrap();
    assert_eq!(decoded.any.as_node().unwrap().type_name(), "Leaf");
    let typed = decoded.typed.unwrap();
    assert_eq!(typed.borrow().label, "shared");
}

#[test]
fn test_typed_reference_to_skipped_property() {
    #[derive(Object, Default)]
    #[refpack(name = "Basket")]
    struct BasketV1 {
        extra: Option<Shared<Leaf>>,
        keep: Option<Shared<Leaf>>,
    }

    #[derive(Object, Default, Debug)]
    #[refpack(name = "Basket")]
    struct BasketV2 {
        keep: Option<Shared<Leaf>>,
    }

    let leaf = Shared::new(Leaf {
        label: "apple".into(),
    });
    let old = BasketV1 {
        extra: Some(leaf.clone()),
        keep: Some(leaf),
    };
    let decoded: BasketV2 = decode(&mut encode(&old).unwrap()).unwrap();
    assert_eq!(decoded.keep.unwrap().borrow().label, "apple");
}

#[test]
fn test_repeated_typed_references_to_a_node_share_one_instance() {
    #[derive(Object, Default, Debug)]
    #[refpack(name = "Sprout")]
    struct Sprout {
        height: i64,
    }

    #[derive(Object, Default, Debug)]
    #[refpack(name = "Bed")]
    struct Bed {
        first: Option<Shared<Sprout>>,
        second: Option<Shared<Sprout>>,
    }

    // a generic writer produced the stream; the sprout comes first under an unknown property
    let sprout = NodeHandle::new(Node::object("Sprout", [("height", Value::from(1500i64))]));
    let bed = NodeHandle::new(Node::object(
        "Bed",
        [
            ("seedling", Value::Node(sprout.clone())),
            ("first", Value::Node(sprout.clone())),
            ("second", Value::Node(sprout)),
        ],
    ));
    let bytes = encode(&Value::Node(bed)).unwrap();

    let decoded: Bed = decode(&mut bytes.clone()).unwrap();
    let first = decoded.first.unwrap();
    let second = decoded.second.unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(first.borrow().height, 1500);
}

#[test]
fn test_reference_into_an_unfinished_node_is_rejected() {
    #[derive(Object, Default, Debug)]
    #[refpack(name = "Twig")]
    struct Twig {
        parent: Option<Shared<Twig>>,
    }

    refpack::register::<Twig>().unwrap();
    // an unregistered branch holds a twig whose typed parent points back at the branch
    let branch = NodeHandle::new(Node::object("Branch", [("twig", Value::Null)]));
    let twig = NodeHandle::new(Node::object(
        "Twig",
        [("parent", Value::Node(branch.clone()))],
    ));
    branch.borrow_mut().kind = refpack::NodeKind::Object(
        [("twig".to_string(), Value::Node(twig))].into_iter().collect(),
    );
    let bytes = encode(&Value::Node(branch.clone())).unwrap();

    let err = refpack::decode_value(&mut bytes.clone()).unwrap_err();
    assert!(matches!(
        err,
        CodecError::Malformed(refpack::MalformedStreamError::IncompatibleReference { index: 0, .. })
    ));

    branch.borrow_mut().kind = refpack::NodeKind::Object(Default::default());
}
