//! Generic value model produced when decoding without a target type.
//!
//! Composite values whose type name is not registered become [`Node`]s that keep their type
//! name, shape and members, so they can be inspected and re-encoded to the same bytes.
//! Registered type names decode into [`NativeObject`]s instead.

use std::any::Any;
use std::borrow::Cow;
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::descriptor::{Composite, Shape, TypeDefinition, TypeDescriptor};
use crate::{
    Decode, DecodeContext, Encode, EncodeContext, Opaque, Result, Shared, ShapeMismatchError,
};

/// A decoded primitive, tagged with the category it was written in.
///
/// Small integer literals carry no width on the wire and decode as `I64`.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Bool(bool),
    Char(char),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Date(NaiveDateTime),
    DateOffset(DateTime<FixedOffset>),
    Interval(TimeDelta),
    Guid(Uuid),
    String(String),
    Binary(Bytes),
    Opaque(Opaque),
}

impl Primitive {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Primitive::Bool(_) => "bool",
            Primitive::Char(_) => "char",
            Primitive::I8(_)
            | Primitive::U8(_)
            | Primitive::I16(_)
            | Primitive::U16(_)
            | Primitive::I32(_)
            | Primitive::U32(_)
            | Primitive::I64(_)
            | Primitive::U64(_) => "integer",
            Primitive::F32(_) => "float",
            Primitive::F64(_) => "double",
            Primitive::Decimal(_) => "decimal",
            Primitive::Date(_) => "date",
            Primitive::DateOffset(_) => "date with offset",
            Primitive::Interval(_) => "time interval",
            Primitive::Guid(_) => "identifier",
            Primitive::String(_) => "string",
            Primitive::Binary(_) => "binary",
            Primitive::Opaque(_) => "opaque payload",
        }
    }

    /// Widens any integer variant to `i128`.
    pub fn as_integer(&self) -> Option<i128> {
        match *self {
            Primitive::I8(v) => Some(v as i128),
            Primitive::U8(v) => Some(v as i128),
            Primitive::I16(v) => Some(v as i128),
            Primitive::U16(v) => Some(v as i128),
            Primitive::I32(v) => Some(v as i128),
            Primitive::U32(v) => Some(v as i128),
            Primitive::I64(v) => Some(v as i128),
            Primitive::U64(v) => Some(v as i128),
            _ => None,
        }
    }
}

impl Encode for Primitive {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        match self {
            Primitive::Bool(v) => cx.write_bool(*v),
            Primitive::Char(v) => cx.write_char(*v),
            Primitive::I8(v) => cx.write_i8(*v),
            Primitive::U8(v) => cx.write_u8(*v),
            Primitive::I16(v) => cx.write_i16(*v),
            Primitive::U16(v) => cx.write_u16(*v),
            Primitive::I32(v) => cx.write_i32(*v),
            Primitive::U32(v) => cx.write_u32(*v),
            Primitive::I64(v) => cx.write_i64(*v),
            Primitive::U64(v) => cx.write_u64(*v),
            Primitive::F32(v) => cx.write_f32(*v),
            Primitive::F64(v) => cx.write_f64(*v),
            Primitive::Decimal(v) => cx.write_decimal(v),
            Primitive::Date(v) => cx.write_date(v),
            Primitive::DateOffset(v) => cx.write_date_offset(v),
            Primitive::Interval(v) => cx.write_interval(v),
            Primitive::Guid(v) => cx.write_guid(*v.as_bytes()),
            Primitive::String(v) => return cx.write_str(v),
            Primitive::Binary(v) => return cx.write_binary(v),
            Primitive::Opaque(v) => return cx.write_opaque(v),
        }
        Ok(())
    }
}

/// A decoded value of any category.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Primitive(Primitive),
    /// Composite of an unregistered type.
    Node(NodeHandle),
    /// Composite of a registered type.
    Native(NativeObject),
}

impl Value {
    fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Primitive(p) => p.kind_name(),
            Value::Node(node) => node.shape().name(),
            Value::Native(_) => "native object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Value::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeHandle> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&NativeObject> {
        match self {
            Value::Native(native) => Some(native),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Primitive(Primitive::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Any integer variant that fits in `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_primitive()
            .and_then(Primitive::as_integer)
            .and_then(|v| i64::try_from(v).ok())
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_primitive()
            .and_then(Primitive::as_integer)
            .and_then(|v| u64::try_from(v).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Primitive(Primitive::F64(v)) => Some(*v),
            Value::Primitive(Primitive::F32(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Primitive(Primitive::String(v)) => Some(v),
            _ => None,
        }
    }

    /// Member of an object node by property name.
    ///
    /// # Errors
    /// Returns `ShapeMismatchError` unless this is an object-shaped node.
    pub fn property(&self, name: &str) -> std::result::Result<Option<Value>, ShapeMismatchError> {
        match self {
            Value::Node(node) => node.property(name),
            other => Err(mismatch("property name", other.kind_name())),
        }
    }

    /// Element of an array or sequence node by position.
    ///
    /// # Errors
    /// Returns `ShapeMismatchError` unless this is an array- or sequence-shaped node.
    pub fn element(&self, index: usize) -> std::result::Result<Option<Value>, ShapeMismatchError> {
        match self {
            Value::Node(node) => node.element(index),
            other => Err(mismatch("position", other.kind_name())),
        }
    }

    /// Value of a map node by key.
    ///
    /// # Errors
    /// Returns `ShapeMismatchError` unless this is a map-shaped node.
    pub fn entry(&self, key: &Value) -> std::result::Result<Option<Value>, ShapeMismatchError> {
        match self {
            Value::Node(node) => node.entry(key),
            other => Err(mismatch("key", other.kind_name())),
        }
    }
}

/// Map keys match integers by value whatever width they were written with, since small
/// literals decode as `i64`.
fn same_key(stored: &Value, key: &Value) -> bool {
    match (stored, key) {
        (Value::Primitive(a), Value::Primitive(b)) => match (a.as_integer(), b.as_integer()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => stored == key,
    }
}

/// Primitives compare by value; nodes and native objects compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Primitive(a), Value::Primitive(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a.ptr_eq(b),
            (Value::Native(a), Value::Native(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::Primitive(Primitive::$variant(value.into()))
            }
        }
    )*};
}

impl_value_from!(
    bool => Bool,
    i32 => I32,
    i64 => I64,
    u64 => U64,
    f64 => F64,
    String => String,
    &str => String,
    Decimal => Decimal,
    Uuid => Guid,
);

impl From<NodeHandle> for Value {
    fn from(node: NodeHandle) -> Self {
        Value::Node(node)
    }
}

impl Encode for Value {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        match self {
            Value::Null => {
                cx.write_null();
                Ok(())
            }
            Value::Primitive(p) => p.encode(cx),
            Value::Node(node) => cx.write_node(node),
            Value::Native(native) => cx.write_native(native),
        }
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("object")
    }
}

impl Decode for Value {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_value()
    }
}

fn mismatch(accessor: &'static str, actual: &'static str) -> ShapeMismatchError {
    ShapeMismatchError { accessor, actual }
}

/// Members of a fallback node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Array(Vec<Value>),
    Sequence(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Object(IndexMap<String, Value>),
}

impl NodeKind {
    pub fn shape(&self) -> Shape {
        match self {
            NodeKind::Array(_) => Shape::Array,
            NodeKind::Sequence(_) => Shape::Sequence,
            NodeKind::Map(_) => Shape::Map,
            NodeKind::Object(_) => Shape::Object,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NodeKind::Array(items) | NodeKind::Sequence(items) => items.len(),
            NodeKind::Map(entries) => entries.len(),
            NodeKind::Object(properties) => properties.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A composite value of a type not known to this process.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub type_name: String,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(type_name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            type_name: type_name.into(),
            kind,
        }
    }

    pub fn object<K: Into<String>>(
        type_name: impl Into<String>,
        properties: impl IntoIterator<Item = (K, Value)>,
    ) -> Self {
        Self::new(
            type_name,
            NodeKind::Object(
                properties
                    .into_iter()
                    .map(|(name, value)| (name.into(), value))
                    .collect(),
            ),
        )
    }

    pub fn shape(&self) -> Shape {
        self.kind.shape()
    }

    pub fn property(&self, name: &str) -> std::result::Result<Option<&Value>, ShapeMismatchError> {
        match &self.kind {
            NodeKind::Object(properties) => Ok(properties.get(name)),
            other => Err(mismatch("property name", other.shape().name())),
        }
    }

    pub fn element(&self, index: usize) -> std::result::Result<Option<&Value>, ShapeMismatchError> {
        match &self.kind {
            NodeKind::Array(items) | NodeKind::Sequence(items) => Ok(items.get(index)),
            other => Err(mismatch("position", other.shape().name())),
        }
    }

    pub fn entry(&self, key: &Value) -> std::result::Result<Option<&Value>, ShapeMismatchError> {
        match &self.kind {
            NodeKind::Map(entries) => Ok(entries
                .iter()
                .find(|(k, _)| same_key(k, key))
                .map(|(_, v)| v)),
            other => Err(mismatch("key", other.shape().name())),
        }
    }

    /// Definition this node is written with.
    ///
    /// # Errors
    /// Returns `CodecError::Encode` if a name contains the definition separator.
    pub fn definition(&self) -> Result<TypeDefinition> {
        let properties = match &self.kind {
            NodeKind::Object(properties) => properties.keys().cloned().collect(),
            _ => Vec::new(),
        };
        TypeDefinition::new(self.type_name.clone(), properties)
    }
}

/// Shared, identity-bearing handle to a [`Node`].
#[derive(Clone)]
pub struct NodeHandle(Rc<RefCell<Node>>);

impl NodeHandle {
    pub fn new(node: Node) -> Self {
        Self(Rc::new(RefCell::new(node)))
    }

    /// # Panics
    /// Panics if the node is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, Node> {
        self.0.borrow()
    }

    /// # Panics
    /// Panics if the node is currently borrowed.
    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, Node> {
        self.0.borrow_mut()
    }

    pub fn type_name(&self) -> String {
        self.0.borrow().type_name.clone()
    }

    pub fn shape(&self) -> Shape {
        self.0.borrow().shape()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn property(&self, name: &str) -> std::result::Result<Option<Value>, ShapeMismatchError> {
        self.0.borrow().property(name).map(|v| v.cloned())
    }

    pub fn element(&self, index: usize) -> std::result::Result<Option<Value>, ShapeMismatchError> {
        self.0.borrow().element(index).map(|v| v.cloned())
    }

    pub fn entry(&self, key: &Value) -> std::result::Result<Option<Value>, ShapeMismatchError> {
        self.0.borrow().entry(key).map(|v| v.cloned())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn set_kind(&self, kind: NodeKind) {
        self.0.borrow_mut().kind = kind;
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(node) => write!(
                f,
                "NodeHandle({} {} x{} @ {:#x})",
                node.type_name,
                node.shape().name(),
                node.kind.len(),
                self.address()
            ),
            Err(_) => write!(f, "NodeHandle(@ {:#x})", self.address()),
        }
    }
}

/// A composite decoded into a registered Rust type, held behind `Rc<dyn Any>`.
#[derive(Clone)]
pub struct NativeObject {
    descriptor: Arc<TypeDescriptor>,
    object: Rc<dyn Any>,
}

impl NativeObject {
    /// Wraps a shared handle so it can be carried by a [`Value`].
    ///
    /// # Errors
    /// Returns `CodecError::Encode` if `T`'s descriptor cannot be built.
    pub fn from_shared<T: Composite>(shared: &Shared<T>) -> Result<Self> {
        Ok(Self {
            descriptor: T::descriptor()?,
            object: shared.to_any(),
        })
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn type_name(&self) -> &str {
        self.descriptor.name()
    }

    /// Recovers the typed handle; `None` if the object is not a `T`.
    pub fn downcast<T: 'static>(&self) -> Option<Shared<T>> {
        Shared::from_any(self.object.clone())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }

    pub(crate) fn object(&self) -> &dyn Any {
        self.object.as_ref()
    }

    pub(crate) fn address(&self) -> usize {
        Rc::as_ptr(&self.object) as *const () as usize
    }
}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NativeObject({} @ {:#x})",
            self.descriptor.name(),
            self.address()
        )
    }
}
