use std::any::Any;
use std::borrow::Cow;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::{ActivationError, CodecError, Composite, Decode, DecodeContext, Encode, EncodeContext, Result};

/// Identity-tracked handle to a composite value.
///
/// Two clones of the same `Shared` encode as one object plus a back-reference, and decode as two
/// clones of one allocation. Cyclic graphs are expressed by storing `Shared` handles (usually
/// inside `Option`) in the members of the target type.
///
/// # Example
/// ```rust
/// use refpack::{Object, Shared};
///
/// #[derive(Object, Default)]
/// struct Employee {
///     name: String,
///     manager: Option<Shared<Employee>>,
/// }
///
/// let boss = Shared::new(Employee { name: "ada".into(), manager: None });
/// boss.borrow_mut().manager = Some(boss.clone());
///
/// let mut bytes = refpack::encode(&boss).unwrap();
/// let decoded: Shared<Employee> = refpack::decode(&mut bytes).unwrap();
/// let manager = decoded.borrow().manager.clone().unwrap();
/// assert!(manager.ptr_eq(&decoded));
/// # decoded.borrow_mut().manager = None;
/// # boss.borrow_mut().manager = None;
/// ```
pub struct Shared<T>(Rc<RefCell<T>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// # Panics
    /// Panics if the value is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// # Panics
    /// Panics if the value is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Returns the inner value if this is the only handle.
    pub fn try_unwrap(self) -> std::result::Result<T, Self> {
        Rc::try_unwrap(self.0)
            .map(RefCell::into_inner)
            .map_err(Shared)
    }

    /// Number of live handles to the allocation.
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Identity key used by the encoder's object cache.
    pub(crate) fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn try_borrow_for_encode(&self) -> Result<Ref<'_, T>>
    where
        T: Encode,
    {
        self.0.try_borrow().map_err(|_| {
            CodecError::Encode(format!("{} is mutably borrowed during encode", T::type_name()))
        })
    }

    pub(crate) fn try_borrow_for_decode(&self) -> Result<RefMut<'_, T>>
    where
        T: Encode,
    {
        self.0
            .try_borrow_mut()
            .map_err(|_| ActivationError::new(T::type_name(), "instance is already borrowed").into())
    }
}

impl<T: 'static> Shared<T> {
    pub(crate) fn to_any(&self) -> Rc<dyn Any> {
        self.0.clone()
    }

    pub(crate) fn from_any(object: Rc<dyn Any>) -> Option<Self> {
        object.downcast::<RefCell<T>>().ok().map(Shared)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

// Contents are not printed: a cyclic graph would recurse forever.
impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared({:#x})", self.address())
    }
}

/// Writes the full envelope on first sight, an object back-reference afterwards.
impl<T: Composite> Encode for Shared<T> {
    fn encode(&self, cx: &mut EncodeContext<'_>) -> Result<()> {
        cx.write_shared(self)
    }

    fn type_name() -> Cow<'static, str> {
        T::type_name()
    }
}

impl<T: Composite> Decode for Shared<T> {
    fn decode(cx: &mut DecodeContext<'_>) -> Result<Self> {
        cx.read_shared()
    }
}
