//! Type definitions and the process-wide type descriptor table.
//!
//! A [`TypeDefinition`] is the self-describing header written in front of every composite body
//! (`Name;Prop1;Prop2`). A [`TypeDescriptor`] pairs that definition with the type-erased
//! encode/decode routines of one Rust type. Descriptors are built lazily on first use and shared
//! by every encoder and decoder in the process.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use dashmap::DashMap;

use crate::tags::*;
use crate::value::NativeObject;
use crate::{CodecError, Decode, DecodeContext, Encode, EncodeContext, MalformedStreamError, Result};

/// Separator between the type name and the property names of a definition blob.
pub const DEFINITION_SEPARATOR: char = ';';

/// Body layout of a composite value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Fixed-length ordered elements (`Box<[T]>`, `[T; N]`).
    Array,
    /// Variable-length ordered elements (`Vec<T>`, sets).
    Sequence,
    /// Key/value pairs.
    Map,
    /// Named properties, in definition order.
    Object,
}

impl Shape {
    /// Tag that opens a body of this shape.
    pub const fn body_tag(self) -> u8 {
        match self {
            Shape::Array => TAG_ARRAY_START,
            Shape::Sequence => TAG_SEQUENCE_START,
            Shape::Map => TAG_MAP_START,
            Shape::Object => TAG_PROPERTIES_START,
        }
    }

    pub const fn from_body_tag(tag: u8) -> Option<Shape> {
        match tag {
            TAG_ARRAY_START => Some(Shape::Array),
            TAG_SEQUENCE_START => Some(Shape::Sequence),
            TAG_MAP_START => Some(Shape::Map),
            TAG_PROPERTIES_START => Some(Shape::Object),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Shape::Array => "array",
            Shape::Sequence => "sequence",
            Shape::Map => "map",
            Shape::Object => "object",
        }
    }
}

/// Type name plus ordered property names, as written on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDefinition {
    name: String,
    properties: Vec<String>,
}

impl TypeDefinition {
    /// Creates a definition.
    ///
    /// # Errors
    /// Returns `CodecError::Encode` if the name is empty or any name contains `;`.
    pub fn new(name: impl Into<String>, properties: Vec<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CodecError::Encode("type name must not be empty".to_string()));
        }
        if let Some(bad) = std::iter::once(&name)
            .chain(properties.iter())
            .find(|part| part.contains(DEFINITION_SEPARATOR))
        {
            return Err(CodecError::Encode(format!(
                "type definition part {:?} contains the reserved separator '{}'",
                bad, DEFINITION_SEPARATOR
            )));
        }
        Ok(Self { name, properties })
    }

    /// Parses a definition blob read from a stream.
    ///
    /// # Errors
    /// Returns `MalformedStreamError::InvalidTypeDefinition` if the blob is not UTF-8 or has an empty name.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(blob).map_err(|_| {
            MalformedStreamError::InvalidTypeDefinition("definition is not valid UTF-8".to_string())
        })?;
        let mut parts = text.split(DEFINITION_SEPARATOR);
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err(MalformedStreamError::InvalidTypeDefinition(format!(
                "missing type name in {:?}",
                text
            ))
            .into());
        }
        Ok(Self {
            name: name.to_string(),
            properties: parts.map(str::to_string).collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// Renders the wire form; a definition without properties is just its name.
    pub fn to_blob(&self) -> Bytes {
        let mut text = self.name.clone();
        for property in &self.properties {
            text.push(DEFINITION_SEPARATOR);
            text.push_str(property);
        }
        Bytes::from(text)
    }
}

impl fmt::Display for TypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for property in &self.properties {
            write!(f, "{}{}", DEFINITION_SEPARATOR, property)?;
        }
        Ok(())
    }
}

/// Writes the body of a native object held behind `&dyn Any`.
pub type EncodeRoutine = fn(&dyn Any, &mut EncodeContext<'_>) -> Result<()>;

/// Activates and populates a native object, filling the reserved identity slot before the body
/// is decoded.
pub type DecodeRoutine =
    fn(&mut DecodeContext<'_>, &TypeDefinition, Option<usize>) -> Result<NativeObject>;

/// Type-erased routines of one described type.
#[derive(Clone, Copy)]
pub struct Routines {
    pub encode: EncodeRoutine,
    pub decode: DecodeRoutine,
}

/// Cached metadata for one composite Rust type.
pub struct TypeDescriptor {
    type_id: TypeId,
    shape: Shape,
    definition: Arc<TypeDefinition>,
    blob: Bytes,
    routines: Routines,
}

impl TypeDescriptor {
    fn build<T: Composite>() -> Result<Self> {
        let properties = T::property_names()
            .into_iter()
            .map(|name| name.into_owned())
            .collect();
        let definition = TypeDefinition::new(<T as Encode>::type_name(), properties)?;
        let blob = definition.to_blob();
        Ok(Self {
            type_id: TypeId::of::<T>(),
            shape: T::SHAPE,
            definition: Arc::new(definition),
            blob,
            routines: Routines {
                encode: encode_erased::<T>,
                decode: decode_erased::<T>,
            },
        })
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &Arc<TypeDefinition> {
        &self.definition
    }

    /// Rendered definition, used as the type cache key.
    pub fn blob(&self) -> &Bytes {
        &self.blob
    }

    pub fn routines(&self) -> Routines {
        self.routines
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type_id", &self.type_id)
            .field("shape", &self.shape)
            .field("definition", &self.definition.to_string())
            .finish_non_exhaustive()
    }
}

/// A type with a described body: structs with named properties and collections.
///
/// Implemented by `#[derive(Object)]` and by the built-in collection types. `Encode` and `Decode`
/// impls of a composite delegate to [`EncodeContext::write_composite`] and
/// [`DecodeContext::read_composite`].
pub trait Composite: Encode + Decode + 'static {
    const SHAPE: Shape;

    /// Property names in body order. Empty for every shape but [`Shape::Object`].
    fn property_names() -> Vec<std::borrow::Cow<'static, str>> {
        Vec::new()
    }

    /// Writes the body tag, count and members.
    fn encode_body(&self, cx: &mut EncodeContext<'_>) -> Result<()>;

    /// Creates the empty instance that [`decode_body`](Self::decode_body) populates.
    ///
    /// # Errors
    /// Returns `ActivationError` if the type cannot be instantiated.
    fn activate() -> Result<Self>;

    /// Reads the body tag, count and members into an activated instance.
    fn decode_body(&mut self, cx: &mut DecodeContext<'_>, definition: &TypeDefinition)
        -> Result<()>;

    fn descriptor() -> Result<Arc<TypeDescriptor>> {
        descriptor_of::<Self>()
    }
}

fn encode_erased<T: Composite>(object: &dyn Any, cx: &mut EncodeContext<'_>) -> Result<()> {
    let cell = object
        .downcast_ref::<std::cell::RefCell<T>>()
        .ok_or_else(|| {
            CodecError::Encode(format!(
                "native object is not a {}",
                <T as Encode>::type_name()
            ))
        })?;
    let value = cell.try_borrow().map_err(|_| {
        CodecError::Encode(format!(
            "{} is mutably borrowed during encode",
            <T as Encode>::type_name()
        ))
    })?;
    value.encode_body(cx)
}

fn decode_erased<T: Composite>(
    cx: &mut DecodeContext<'_>,
    definition: &TypeDefinition,
    slot: Option<usize>,
) -> Result<NativeObject> {
    let shared = cx.populate_shared::<T>(definition, slot)?;
    NativeObject::from_shared(&shared)
}

fn descriptors() -> &'static DashMap<TypeId, Arc<TypeDescriptor>> {
    static DESCRIPTORS: OnceLock<DashMap<TypeId, Arc<TypeDescriptor>>> = OnceLock::new();
    DESCRIPTORS.get_or_init(DashMap::new)
}

fn registry() -> &'static DashMap<String, Arc<TypeDescriptor>> {
    static REGISTRY: OnceLock<DashMap<String, Arc<TypeDescriptor>>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

/// Returns the descriptor of `T`, building it on first use.
///
/// Concurrent first calls may each build a descriptor; exactly one is kept and every caller
/// receives that one.
///
/// # Errors
/// Returns `CodecError::Encode` if the type's name or property names are not representable.
pub fn descriptor_of<T: Composite>() -> Result<Arc<TypeDescriptor>> {
    let table = descriptors();
    let type_id = TypeId::of::<T>();
    if let Some(found) = table.get(&type_id) {
        return Ok(found.value().clone());
    }
    // Built outside the shard lock: building may describe nested types.
    let built = Arc::new(TypeDescriptor::build::<T>()?);
    let descriptor = table.entry(type_id).or_insert(built).value().clone();
    tracing::debug!(
        type_name = descriptor.name(),
        shape = descriptor.shape().name(),
        "type descriptor built"
    );
    Ok(descriptor)
}

/// Makes `T` resolvable by its type name, so generic decoding produces [`NativeObject`]s of `T`
/// instead of fallback nodes.
///
/// The first registration of a name wins.
///
/// # Example
/// ```rust
/// use refpack::Object;
///
/// #[derive(Object, Default)]
/// #[refpack(name = "Point")]
/// struct Point {
///     x: i32,
///     y: i32,
/// }
///
/// let descriptor = refpack::register::<Point>().unwrap();
/// assert_eq!(descriptor.name(), "Point");
/// assert!(refpack::resolve("Point").is_some());
/// ```
pub fn register<T: Composite>() -> Result<Arc<TypeDescriptor>> {
    let descriptor = descriptor_of::<T>()?;
    let kept = registry()
        .entry(descriptor.name().to_string())
        .or_insert_with(|| descriptor.clone())
        .value()
        .clone();
    if kept.type_id() != descriptor.type_id() {
        tracing::warn!(
            type_name = descriptor.name(),
            "type name already registered to another type; keeping the first registration"
        );
    } else {
        tracing::debug!(type_name = descriptor.name(), "type registered");
    }
    Ok(kept)
}

/// Looks up a registered descriptor by type name.
pub fn resolve(name: &str) -> Option<Arc<TypeDescriptor>> {
    registry().get(name).map(|entry| entry.value().clone())
}
