//! Tracking handles.
//!
//! A tracking handle is the opaque word a foreign object carries in its
//! tracking slot so the managed side can find its way back. Each category is
//! its own type; a handle only becomes a bare word through [`RawHandle`].
//!
//! Raw word layout (low to high bits):
//!
//! | bits   | field      |
//! |--------|------------|
//! | 0..2   | category   |
//! | 2..16  | table epoch |
//! | 16..32 | generation |
//! | 32..64 | index      |
//!
//! Category `0` never occurs, so a zeroed slot is never a valid handle.

use std::fmt;

const TAG_BITS: u32 = 2;
const EPOCH_BITS: u32 = 14;
const GENERATION_BITS: u32 = 16;

const TAG_MASK: u64 = (1 << TAG_BITS) - 1;
const EPOCH_SHIFT: u32 = TAG_BITS;
const GENERATION_SHIFT: u32 = EPOCH_SHIFT + EPOCH_BITS;
const INDEX_SHIFT: u32 = GENERATION_SHIFT + GENERATION_BITS;

pub(crate) const EPOCH_MASK: u16 = (1 << EPOCH_BITS) - 1;

const WRAPPER_TAG: u64 = 1;
const EXTENSION_TAG: u64 = 2;

/// Table coordinates shared by every handle category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HandleKey {
    pub(crate) index: u32,
    pub(crate) generation: u16,
    pub(crate) epoch: u16,
}

impl HandleKey {
    fn encode(self, tag: u64) -> RawHandle {
        RawHandle(
            tag | (u64::from(self.epoch & EPOCH_MASK) << EPOCH_SHIFT)
                | (u64::from(self.generation) << GENERATION_SHIFT)
                | (u64::from(self.index) << INDEX_SHIFT),
        )
    }

    fn decode(raw: RawHandle) -> Self {
        HandleKey {
            index: (raw.0 >> INDEX_SHIFT) as u32,
            generation: (raw.0 >> GENERATION_SHIFT) as u16,
            epoch: ((raw.0 >> EPOCH_SHIFT) as u16) & EPOCH_MASK,
        }
    }
}

/// Handle to a wrapper object.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WrapperHandle(pub(crate) HandleKey);

/// Handle to a managed extension object (a managed type implementing
/// foreign-side behavior directly, rather than a wrapped instance).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionHandle(pub(crate) HandleKey);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingHandle {
    Wrapper(WrapperHandle),
    Extension(ExtensionHandle),
}

impl TrackingHandle {
    pub fn category(self) -> &'static str {
        match self {
            TrackingHandle::Wrapper(_) => "wrapper",
            TrackingHandle::Extension(_) => "extension",
        }
    }

    pub(crate) fn key(self) -> HandleKey {
        match self {
            TrackingHandle::Wrapper(h) => h.0,
            TrackingHandle::Extension(h) => h.0,
        }
    }

    pub fn to_raw(self) -> RawHandle {
        match self {
            TrackingHandle::Wrapper(h) => h.0.encode(WRAPPER_TAG),
            TrackingHandle::Extension(h) => h.0.encode(EXTENSION_TAG),
        }
    }

    /// Decodes a slot word. Returns `None` for the empty word and for words
    /// with an unknown category.
    pub fn from_raw(raw: RawHandle) -> Option<Self> {
        let key = HandleKey::decode(raw);
        match raw.0 & TAG_MASK {
            WRAPPER_TAG => Some(TrackingHandle::Wrapper(WrapperHandle(key))),
            EXTENSION_TAG => Some(TrackingHandle::Extension(ExtensionHandle(key))),
            _ => None,
        }
    }
}

impl From<WrapperHandle> for TrackingHandle {
    fn from(handle: WrapperHandle) -> Self {
        TrackingHandle::Wrapper(handle)
    }
}

impl From<ExtensionHandle> for TrackingHandle {
    fn from(handle: ExtensionHandle) -> Self {
        TrackingHandle::Extension(handle)
    }
}

impl fmt::Debug for WrapperHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wrapper({}v{}e{})", self.0.index, self.0.generation, self.0.epoch)
    }
}

impl fmt::Debug for ExtensionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Extension({}v{}e{})", self.0.index, self.0.generation, self.0.epoch)
    }
}

/// The verbatim word stored in a foreign object's tracking slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub u64);

impl RawHandle {
    pub const EMPTY: RawHandle = RawHandle(0);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}
