//! # refpack
//!
//! A compact, reference-aware binary object serializer.
//!
//! - Every encoded unit starts with a tag byte; small integers (-1..=20) and default values cost a single byte
//! - Repeated primitive values (longs, doubles, decimals, dates, identifiers, strings, ...) are written once and
//!   referenced by index afterwards
//! - Composite values carry a self-describing type definition (`Name;Prop1;Prop2`) written once per stream
//! - Shared and cyclic object graphs round-trip through [`Shared`] handles
//! - Streams whose types are unknown locally decode into the generic [`Value`] model
//!
//! ## Attribute Macros
//!
//! `#[derive(Object)]` generates the per-type encode/decode routines for a struct with named fields.
//!
//! - `#[refpack(name = "Name")]` - Type name written to the type definition. Defaults to the struct name.
//! - `#[refpack(no_default)]` - The type cannot be activated; decoding it fails with [`ActivationError`].
//! - `#[refpack(activator = "path::to::fn")]` - Function used to create the empty instance before its
//!   properties are decoded. Defaults to `Default::default`.
//! - `#[refpack(skip)]` - The field is not serialized and keeps its activated value on decode.
//! - `#[refpack(rename = "name")]` - Property name written to the type definition.
//!
//! ## Feature Flags
//!
//! - `ulid` - Encodes `ulid::Ulid` in the identifier category (shares the tag with `uuid::Uuid`).
//! - `smol_str` - Encodes `smol_str::SmolStr` in the string category.
//!
//! ## Example
//! ```rust
//! use refpack::{decode, encode, Object};
//!
//! #[derive(Object, Default, PartialEq, Debug)]
//! struct Order {
//!     id: i64,
//!     customer: String,
//!     lines: Vec<String>,
//! }
//!
//! let order = Order { id: 7, customer: "acme".into(), lines: vec!["bolt".into(), "bolt".into()] };
//! let mut bytes = encode(&order).unwrap();
//! let decoded: Order = decode(&mut bytes).unwrap();
//! assert_eq!(order, decoded);
//! ```

pub mod cache;
mod collections;
pub mod config;
mod decoder;
pub mod descriptor;
mod encoder;
mod primitives;
mod shared;
pub mod tags;
pub mod value;

use bytes::{Bytes, BytesMut};
use std::borrow::Cow;

pub use config::{CodecConfig, ContentIdentity, FILE_EXTENSION, MIME_TYPE};
pub use decoder::{DecodeContext, Decoder};
pub use descriptor::{register, resolve, Composite, Shape, TypeDefinition, TypeDescriptor};
pub use encoder::{EncodeContext, Encoder};
pub use primitives::Opaque;
pub use refpack_derive::Object;
pub use shared::Shared;
pub use value::{NativeObject, Node, NodeHandle, NodeKind, Primitive, Value};

/// Errors that can occur during encoding or decoding operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The value could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),
    /// The buffer did not contain enough data to complete the operation.
    #[error("Insufficient data in buffer")]
    InsufficientData,
    /// The stream does not follow the wire format.
    #[error(transparent)]
    Malformed(#[from] MalformedStreamError),
    /// A described type could not be instantiated.
    #[error(transparent)]
    Activation(#[from] ActivationError),
    /// The generic value model was accessed with an accessor its shape does not support.
    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatchError),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The result type used throughout this crate for encode/decode operations.
pub type Result<T> = std::result::Result<T, CodecError>;

fn tag_label(tag: &u8) -> &'static str {
    tags::tag_name(*tag)
}

/// Stream-level decode failures.
#[derive(Debug, thiserror::Error)]
pub enum MalformedStreamError {
    #[error("Unknown tag {tag}")]
    UnknownTag { tag: u8 },
    #[error("Expected {expected}, got tag {actual} ({})", tag_label(.actual))]
    UnexpectedTag { expected: &'static str, actual: u8 },
    #[error("Back-reference {index} exceeds the {len} populated entries of the {cache} cache")]
    ReferenceOutOfRange {
        cache: &'static str,
        index: usize,
        len: usize,
    },
    #[error("Object reference {index} does not resolve to {expected}")]
    IncompatibleReference { index: usize, expected: String },
    #[error("Invalid type definition: {0}")]
    InvalidTypeDefinition(String),
    #[error("Property count mismatch for {type_name}: definition has {expected}, body has {actual}")]
    PropertyCountMismatch {
        type_name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Length mismatch for {type_name}: expected {expected}, got {actual}")]
    LengthMismatch {
        type_name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Value {value} out of range for {target}")]
    OutOfRange { value: i128, target: &'static str },
    #[error("Invalid {kind} payload")]
    InvalidPayload { kind: &'static str },
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// A described type could not be instantiated during decode.
#[derive(Debug, thiserror::Error)]
#[error("Cannot activate {type_name}: {reason}")]
pub struct ActivationError {
    pub type_name: String,
    pub reason: String,
}

impl ActivationError {
    pub fn new(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }
}

/// A generic [`Value`] was indexed in a way its shape does not support.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot index {actual} by {accessor}")]
pub struct ShapeMismatchError {
    pub accessor: &'static str,
    pub actual: &'static str,
}

/// Trait for types that can be encoded into the refpack binary format.
///
/// Primitive categories write themselves directly; composite types delegate to
/// [`EncodeContext::write_composite`]. Most users should use `#[derive(Object)]`.
///
/// # Errors
/// Returns `CodecError` if the value cannot be encoded.
pub trait Encode {
    /// Encode the value through the per-stream context.
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()>;

    /// Name written into type definitions that mention this type.
    fn type_name() -> Cow<'static, str>
    where
        Self: Sized,
    {
        Cow::Borrowed(std::any::type_name::<Self>())
    }
}

/// Trait for types that can be decoded from the refpack binary format.
///
/// # Errors
/// Returns `CodecError` if the value cannot be decoded or the data is invalid.
pub trait Decode: Sized {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self>;
}

/// Convenience function to encode a value to bytes with a fresh [`Encoder`].
///
/// # Example
/// ```rust
/// let bytes = refpack::encode(&5i32).unwrap();
/// // stream start, one literal tag, stream end
/// assert_eq!(bytes.len(), 3);
/// ```
pub fn encode<T: Encode + ?Sized>(value: &T) -> Result<Bytes> {
    let mut writer = BytesMut::new();
    Encoder::new().encode(&mut writer, value)?;
    Ok(writer.freeze())
}

/// Convenience function to decode a value from bytes with a fresh [`Decoder`].
///
/// # Example
/// ```rust
/// let mut bytes = refpack::encode("hello").unwrap();
/// let decoded: String = refpack::decode(&mut bytes).unwrap();
/// assert_eq!(decoded, "hello");
/// ```
pub fn decode<T: Decode>(reader: &mut Bytes) -> Result<T> {
    Decoder::new().decode(reader)
}

/// Convenience function to decode a stream into the generic [`Value`] model.
pub fn decode_value(reader: &mut Bytes) -> Result<Value> {
    Decoder::new().decode_value(reader)
}
