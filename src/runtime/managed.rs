use std::{
    any::{Any, TypeId},
    error::Error,
    fmt,
    rc::Rc,
};

/// Runtime type of a managed instance; the key the type registry uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagedType {
    id: TypeId,
    name: &'static str,
}

impl ManagedType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(self) -> TypeId {
        self.id
    }

    pub fn name(self) -> &'static str {
        self.name
    }
}

/// A managed-heap object being exposed to the foreign heap.
///
/// Cloning shares the underlying object. Error-like instances keep a second
/// view of the same allocation as `dyn Error` so exception normalization can
/// read the message and causal chain.
#[derive(Clone)]
pub struct ManagedInstance {
    value: Rc<dyn Any>,
    ty: ManagedType,
    error: Option<Rc<dyn Error>>,
}

impl ManagedInstance {
    pub fn new<T: Any>(value: T) -> Self {
        Self {
            value: Rc::new(value),
            ty: ManagedType::of::<T>(),
            error: None,
        }
    }

    pub fn from_rc<T: Any>(value: Rc<T>) -> Self {
        Self {
            value,
            ty: ManagedType::of::<T>(),
            error: None,
        }
    }

    pub fn from_error<E: Error + 'static>(error: E) -> Self {
        let error = Rc::new(error);
        Self {
            value: Rc::clone(&error) as Rc<dyn Any>,
            ty: ManagedType::of::<E>(),
            error: Some(error as Rc<dyn Error>),
        }
    }

    pub fn managed_type(&self) -> ManagedType {
        self.ty
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    pub fn as_error(&self) -> Option<&(dyn Error + 'static)> {
        self.error.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Identity comparison: both values share one managed allocation.
    pub fn ptr_eq(&self, other: &ManagedInstance) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for ManagedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "<{} error: {}>", self.ty.name, error),
            None => write!(f, "<{} instance>", self.ty.name),
        }
    }
}

/// Owned copy of one link of an error's `source()` chain.
///
/// `source()` only lends the cause, so the chain is captured by value before
/// it crosses into the foreign heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedError {
    message: String,
    source: Option<Box<CapturedError>>,
}

impl CapturedError {
    pub fn capture(error: &(dyn Error + 'static)) -> Self {
        Self {
            message: error.to_string(),
            source: error.source().map(|source| Box::new(Self::capture(source))),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for CapturedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|source| source as &(dyn Error + 'static))
    }
}
