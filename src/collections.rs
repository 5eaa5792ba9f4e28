//! Composite impls of the standard and `indexmap` collections.
//!
//! Ordered collections use the sequence shape, fixed-length ones the array shape and keyed
//! collections the map shape. Type names are composed from member type names
//! (`List<i32>`, `Map<string,f64>`, `i64[]`).

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};

use indexmap::{IndexMap, IndexSet};

use crate::descriptor::{Composite, Shape, TypeDefinition};
use crate::{Decode, DecodeContext, Encode, EncodeContext, MalformedStreamError, Result};

/// Caps preallocation by the bytes actually left, so a forged count cannot reserve unbounded memory.
fn capacity_hint(cx: &DecodeContext<'_>, len: usize) -> usize {
    len.min(cx.remaining())
}

fn encode_elements<'v, T: Encode + 'v>(
    cx: &mut EncodeContext<'_>,
    shape: Shape,
    len: usize,
    items: impl IntoIterator<Item = &'v T>,
) -> Result<()> {
    cx.begin_elements(shape, len)?;
    items.into_iter().try_for_each(|item| item.encode(cx))
}

fn encode_entries<'v, K: Encode + 'v, V: Encode + 'v>(
    cx: &mut EncodeContext<'_>,
    len: usize,
    entries: impl IntoIterator<Item = (&'v K, &'v V)>,
) -> Result<()> {
    cx.begin_entries(len)?;
    entries.into_iter().try_for_each(|(key, value)| {
        key.encode(cx)?;
        value.encode(cx)
    })
}

/// Implements `Encode`/`Decode` by delegating to the composite envelope.
macro_rules! impl_envelope {
    ([$($generics:tt)*] $ty:ty, $name:expr) => {
        impl<$($generics)*> Encode for $ty {
            fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
                cx.write_composite(self)
            }

            fn type_name() -> Cow<'static, str> {
                $name
            }
        }
        impl<$($generics)*> Decode for $ty {
            fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
                cx.read_composite()
            }
        }
    };
}

// --- sequences ---
macro_rules! impl_sequence {
    ([$($generics:tt)*] $ty:ty, $label:literal, $elem:ident, |$this:ident, $item:ident| $push:expr) => {
        impl_envelope!([$($generics)*] $ty, Cow::Owned(format!(concat!($label, "<{}>"), $elem::type_name())));

        impl<$($generics)*> Composite for $ty {
            const SHAPE: Shape = Shape::Sequence;

            fn encode_body(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
                encode_elements(cx, Shape::Sequence, self.len(), self.iter())
            }

            fn activate() -> Result<Self> {
                Ok(Self::default())
            }

            fn decode_body(
                &mut self,
                cx: &mut DecodeContext<'_>,
                _definition: &TypeDefinition,
            ) -> Result<()> {
                let len = cx.read_body_start(Shape::Sequence)?;
                let $this = self;
                for _ in 0..len {
                    let $item = $elem::decode(cx)?;
                    $push;
                }
                Ok(())
            }
        }
    };
}

impl_sequence!([T: Encode + Decode + 'static] Vec<T>, "List", T, |this, item| this.push(item));
impl_sequence!([T: Encode + Decode + 'static] VecDeque<T>, "Deque", T, |this, item| this.push_back(item));
impl_sequence!(
    [T: Encode + Decode + Ord + 'static] BTreeSet<T>, "SortedSet", T,
    |this, item| { this.insert(item); }
);
impl_sequence!(
    [T: Encode + Decode + Eq + Hash + 'static, S: BuildHasher + Default + 'static] HashSet<T, S>,
    "Set", T,
    |this, item| { this.insert(item); }
);
impl_sequence!(
    [T: Encode + Decode + Eq + Hash + 'static, S: BuildHasher + Default + 'static] IndexSet<T, S>,
    "OrderedSet", T,
    |this, item| { this.insert(item); }
);

// --- maps ---
macro_rules! impl_map {
    ([$($generics:tt)*] $ty:ty, $label:literal) => {
        impl_envelope!(
            [$($generics)*] $ty,
            Cow::Owned(format!(concat!($label, "<{},{}>"), K::type_name(), V::type_name()))
        );

        impl<$($generics)*> Composite for $ty {
            const SHAPE: Shape = Shape::Map;

            fn encode_body(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
                encode_entries(cx, self.len(), self.iter())
            }

            fn activate() -> Result<Self> {
                Ok(Self::default())
            }

            fn decode_body(
                &mut self,
                cx: &mut DecodeContext<'_>,
                _definition: &TypeDefinition,
            ) -> Result<()> {
                let len = cx.read_body_start(Shape::Map)?;
                for _ in 0..len {
                    let key = K::decode(cx)?;
                    let value = V::decode(cx)?;
                    self.insert(key, value);
                }
                Ok(())
            }
        }
    };
}

impl_map!(
    [K: Encode + Decode + Eq + Hash + 'static, V: Encode + Decode + 'static, S: BuildHasher + Default + 'static]
    HashMap<K, V, S>,
    "Map"
);
impl_map!(
    [K: Encode + Decode + Ord + 'static, V: Encode + Decode + 'static] BTreeMap<K, V>,
    "SortedMap"
);
impl_map!(
    [K: Encode + Decode + Eq + Hash + 'static, V: Encode + Decode + 'static, S: BuildHasher + Default + 'static]
    IndexMap<K, V, S>,
    "OrderedMap"
);

// --- arrays ---
impl_envelope!(
    [T: Encode + Decode + 'static] Box<[T]>,
    Cow::Owned(format!("{}[]", T::type_name()))
);

impl<T: Encode + Decode + 'static> Composite for Box<[T]> {
    const SHAPE: Shape = Shape::Array;

    fn encode_body(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        encode_elements(cx, Shape::Array, self.len(), self.iter())
    }

    fn activate() -> Result<Self> {
        Ok(Box::default())
    }

    fn decode_body(&mut self, cx: &mut DecodeContext<'_>, _definition: &TypeDefinition) -> Result<()> {
        let len = cx.read_body_start(Shape::Array)?;
        let mut items = Vec::with_capacity(capacity_hint(cx, len));
        for _ in 0..len {
            items.push(T::decode(cx)?);
        }
        *self = items.into_boxed_slice();
        Ok(())
    }
}

/// Written exactly like `Box<[T]>`.
impl<T: Encode + Decode + 'static> Encode for [T] {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_slice(self)
    }
}

impl_envelope!(
    [T: Encode + Decode + Default + 'static, const N: usize] [T; N],
    Cow::Owned(format!("{}[]", T::type_name()))
);

/// Decoding requires the stream to carry exactly `N` elements.
impl<T: Encode + Decode + Default + 'static, const N: usize> Composite for [T; N] {
    const SHAPE: Shape = Shape::Array;

    fn encode_body(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        encode_elements(cx, Shape::Array, N, self.iter())
    }

    fn activate() -> Result<Self> {
        Ok(std::array::from_fn(|_| T::default()))
    }

    fn decode_body(&mut self, cx: &mut DecodeContext<'_>, definition: &TypeDefinition) -> Result<()> {
        let len = cx.read_body_start(Shape::Array)?;
        if len != N {
            return Err(MalformedStreamError::LengthMismatch {
                type_name: definition.name().to_string(),
                expected: N,
                actual: len,
            }
            .into());
        }
        for slot in self.iter_mut() {
            *slot = T::decode(cx)?;
        }
        Ok(())
    }
}
