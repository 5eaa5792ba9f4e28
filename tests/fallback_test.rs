use std::collections::HashMap;

use refpack::{
    decode, decode_value, encode, Node, NodeHandle, NodeKind, Object, Primitive, Shape, Shared,
    Value,
};

#[derive(Object, Default, Debug)]
#[refpack(name = "Invoice")]
struct Invoice {
    number: i64,
    lines: Vec<String>,
    paid: bool,
}

#[derive(Object, Default, Debug)]
#[refpack(name = "Person")]
struct Person {
    name: String,
    friend: Option<Shared<Person>>,
}

#[derive(Object, Default, Debug, PartialEq)]
#[refpack(name = "Account")]
struct Account {
    id: i64,
    owner: String,
}

#[derive(Object, Default, Debug, PartialEq)]
#[refpack(name = "Greeting")]
struct Greeting {
    text: String,
    repeat: u8,
}

#[test]
fn test_unregistered_type_decodes_to_node() {
    let invoice = Invoice {
        number: 1001,
        lines: vec!["widget".into(), "gadget".into()],
        paid: true,
    };
    let value = decode_value(&mut encode(&invoice).unwrap()).unwrap();

    let node = value.as_node().expect("node");
    assert_eq!(node.type_name(), "Invoice");
    assert_eq!(node.shape(), Shape::Object);
    assert_eq!(node.len(), 3);

    assert_eq!(value.property("number").unwrap().unwrap().as_i64(), Some(1001));
    assert_eq!(value.property("paid").unwrap().unwrap().as_bool(), Some(true));
    assert_eq!(value.property("missing").unwrap(), None);

    let lines = value.property("lines").unwrap().unwrap();
    assert_eq!(lines.as_node().unwrap().type_name(), "List<string>");
    assert_eq!(lines.as_node().unwrap().shape(), Shape::Sequence);
    assert_eq!(lines.element(1).unwrap().unwrap().as_str(), Some("gadget"));
    assert_eq!(lines.element(2).unwrap(), None);
}

#[test]
fn test_accessor_shape_mismatch() {
    let value = decode_value(&mut encode(&vec![1i32, 2]).unwrap()).unwrap();
    let err = value.property("x").unwrap_err();
    assert_eq!(err.accessor, "property name");
    assert_eq!(err.actual, "sequence");
    assert!(value.entry(&Value::from(1i32)).is_err());
    assert!(value.element(0).is_ok());

    let primitive = Value::from(5i64);
    assert!(primitive.property("x").is_err());
    assert!(primitive.element(0).is_err());
    assert!(Value::Null.entry(&Value::Null).is_err());
}

#[test]
fn test_map_entries() {
    let map: HashMap<String, i64> = [("a".to_string(), 1), ("b".to_string(), 5000)]
        .into_iter()
        .collect();
    let value = decode_value(&mut encode(&map).unwrap()).unwrap();
    let node = value.as_node().unwrap();
    assert_eq!(node.shape(), Shape::Map);
    assert_eq!(node.type_name(), "Map<string,i64>");
    assert_eq!(
        value.entry(&Value::from("b")).unwrap().unwrap().as_i64(),
        Some(5000)
    );
    assert_eq!(value.entry(&Value::from("z")).unwrap(), None);
}

#[test]
fn test_map_entries_match_integer_keys_of_any_width() {
    let map: std::collections::BTreeMap<i32, String> =
        [(5, "five".to_string()), (1000, "thousand".to_string())]
            .into_iter()
            .collect();
    let value = decode_value(&mut encode(&map).unwrap()).unwrap();

    // 5 travels as a literal and comes back as i64; 1000 keeps its i32 width
    assert_eq!(
        value.entry(&Value::from(5i32)).unwrap().unwrap().as_str(),
        Some("five")
    );
    assert_eq!(
        value.entry(&Value::Primitive(Primitive::U8(5))).unwrap().unwrap().as_str(),
        Some("five")
    );
    assert_eq!(
        value.entry(&Value::from(1000i64)).unwrap().unwrap().as_str(),
        Some("thousand")
    );
    assert_eq!(value.entry(&Value::from(6i32)).unwrap(), None);
    assert_eq!(value.entry(&Value::from("5")).unwrap(), None);
}

#[test]
fn test_array_node() {
    let value = decode_value(&mut encode(&[10i64, 20, 30]).unwrap()).unwrap();
    let node = value.as_node().unwrap();
    assert_eq!(node.shape(), Shape::Array);
    assert_eq!(node.type_name(), "i64[]");
    assert_eq!(value.element(0).unwrap(), Some(Value::Primitive(Primitive::I64(10))));
}

#[test]
fn test_shared_node_keeps_identity() {
    let ada = Shared::new(Person {
        name: "ada".into(),
        friend: None,
    });
    let value = decode_value(&mut encode(&vec![ada.clone(), ada]).unwrap()).unwrap();
    let first = value.element(0).unwrap().unwrap();
    let second = value.element(1).unwrap().unwrap();
    assert!(first.as_node().unwrap().ptr_eq(second.as_node().unwrap()));
    assert_eq!(first, second);
}

#[test]
fn test_cyclic_graph_reencodes_identically() {
    let a = Shared::new(Person {
        name: "a".into(),
        friend: None,
    });
    let b = Shared::new(Person {
        name: "b".into(),
        friend: Some(a.clone()),
    });
    a.borrow_mut().friend = Some(b.clone());

    let original = encode(&a).unwrap();
    let value = decode_value(&mut original.clone()).unwrap();

    let friend = value.property("friend").unwrap().unwrap();
    let back = friend.property("friend").unwrap().unwrap();
    assert_eq!(back, value);
    assert_eq!(friend.property("name").unwrap().unwrap().as_str(), Some("b"));

    let reencoded = encode(&value).unwrap();
    assert_eq!(reencoded, original);

    a.borrow_mut().friend = None;
    if let NodeKind::Object(properties) = &mut value.as_node().unwrap().borrow_mut().kind {
        properties.insert("friend".to_string(), Value::Null);
    };
}

#[test]
fn test_hand_built_node_decodes_as_typed() {
    let node = NodeHandle::new(Node::object(
        "Greeting",
        [("text", Value::from("hello")), ("repeat", Value::from(3i32))],
    ));
    let bytes = encode(&Value::from(node)).unwrap();
    let greeting: Greeting = decode(&mut bytes.clone()).unwrap();
    assert_eq!(
        greeting,
        Greeting {
            text: "hello".into(),
            repeat: 3,
        }
    );
}

#[test]
fn test_hand_built_self_reference() {
    let node = NodeHandle::new(Node::object("Loop", [("next", Value::Null)]));
    if let NodeKind::Object(properties) = &mut node.borrow_mut().kind {
        properties.insert("next".to_string(), Value::Node(node.clone()));
    }

    let bytes = encode(&Value::Node(node.clone())).unwrap();
    let value = decode_value(&mut bytes.clone()).unwrap();
    let next = value.property("next").unwrap().unwrap();
    assert_eq!(next, value);
    assert_eq!(encode(&value).unwrap(), bytes);

    for handle in [node, value.as_node().unwrap().clone()] {
        if let NodeKind::Object(properties) = &mut handle.borrow_mut().kind {
            properties.clear();
        };
    }
}

#[test]
fn test_registered_type_decodes_to_native() {
    let descriptor = refpack::register::<Account>().unwrap();
    assert_eq!(descriptor.name(), "Account");
    assert!(refpack::resolve("Account").is_some());

    let account = Account {
        id: 77,
        owner: "grace".into(),
    };
    let original = encode(&account).unwrap();
    let value = decode_value(&mut original.clone()).unwrap();

    let native = value.as_native().expect("native object");
    assert_eq!(native.type_name(), "Account");
    let shared = native.downcast::<Account>().expect("Account");
    assert_eq!(*shared.borrow(), account);
    assert!(native.downcast::<Greeting>().is_none());

    assert_eq!(encode(&value).unwrap(), original);
}

#[test]
fn test_registered_members_inside_nodes() {
    refpack::register::<Account>().unwrap();
    let shared = Shared::new(Account {
        id: 1,
        owner: "x".into(),
    });
    let value = decode_value(&mut encode(&vec![shared.clone(), shared]).unwrap()).unwrap();
    assert_eq!(value.as_node().unwrap().type_name(), "List<Account>");

    let first = value.element(0).unwrap().unwrap();
    let second = value.element(1).unwrap().unwrap();
    assert!(first.as_native().unwrap().ptr_eq(second.as_native().unwrap()));
    assert_eq!(
        first.as_native().unwrap().downcast::<Account>().unwrap().borrow().id,
        1
    );
}

#[test]
fn test_first_registration_wins() {
    #[derive(Object, Default)]
    #[refpack(name = "Account")]
    struct Impostor {
        id: i64,
    }

    refpack::register::<Account>().unwrap();
    let kept = refpack::register::<Impostor>().unwrap();
    assert_eq!(kept.type_id(), std::any::TypeId::of::<Account>());
}

#[test]
fn test_unknown_type_name_falls_back_even_when_others_registered() {
    refpack::register::<Account>().unwrap();
    let value = decode_value(
        &mut encode(&Greeting {
            text: "hi".into(),
            repeat: 0,
        })
        .unwrap(),
    )
    .unwrap();
    assert!(value.as_node().is_some());
    assert_eq!(
        value.property("repeat").unwrap(),
        Some(Value::Primitive(Primitive::I64(0)))
    );
}
