//! Foreign-heap type descriptors.
//!
//! A descriptor fixes the word layout of every instance allocated from it.
//! Layout, in order: exception `args`/`cause` words (exception types only),
//! the per-instance dict word (subclass types only), then the tracking word.
//! The offsets are private to this crate; only `foreign::slot` reads them.

use std::{fmt, ops::BitOr, rc::Rc};

use serde::{Deserialize, Serialize};

/// Word index into an instance's slot storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WordOffset(pub(crate) usize);

impl WordOffset {
    pub fn get(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeFlags(u32);

impl TypeFlags {
    pub const NONE: TypeFlags = TypeFlags(0);
    /// Foreign-side subclass of a managed type; instances carry a dict.
    pub const SUBCLASS: TypeFlags = TypeFlags(1 << 0);
    /// Instances carry the foreign exception protocol fields.
    pub const BASE_EXC_SUBCLASS: TypeFlags = TypeFlags(1 << 1);

    pub fn contains(self, other: TypeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for TypeFlags {
    type Output = TypeFlags;

    fn bitor(self, rhs: TypeFlags) -> TypeFlags {
        TypeFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Layout {
    pub(crate) basic_size: usize,
    pub(crate) exception: Option<(WordOffset, WordOffset)>,
    pub(crate) dict: Option<WordOffset>,
    pub(crate) tracking: WordOffset,
}

impl Layout {
    fn compute(flags: TypeFlags) -> Self {
        let mut next = 0;
        let mut take = || {
            let offset = WordOffset(next);
            next += 1;
            offset
        };

        let exception = if flags.contains(TypeFlags::BASE_EXC_SUBCLASS) {
            Some((take(), take()))
        } else {
            None
        };
        let dict = flags.contains(TypeFlags::SUBCLASS).then(&mut take);
        let tracking = take();

        Layout {
            basic_size: next,
            exception,
            dict,
            tracking,
        }
    }

    /// Words that hold owned object references, released on dealloc.
    pub(crate) fn reference_words(&self) -> Vec<WordOffset> {
        let mut words = Vec::with_capacity(3);
        if let Some((args, cause)) = self.exception {
            words.push(args);
            words.push(cause);
        }
        if let Some(dict) = self.dict {
            words.push(dict);
        }
        words
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeObject {
    name: String,
    flags: TypeFlags,
    layout: Layout,
}

/// Shared, read-only handle to a foreign type. Never owned by a wrapper.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor(Rc<TypeObject>);

impl TypeDescriptor {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn flags(&self) -> TypeFlags {
        self.0.flags
    }

    pub fn is_subclass(&self) -> bool {
        self.0.flags.contains(TypeFlags::SUBCLASS)
    }

    pub fn has_exception_layout(&self) -> bool {
        self.0.layout.exception.is_some()
    }

    /// Instance size in words.
    pub fn basic_size(&self) -> usize {
        self.0.layout.basic_size
    }

    pub(crate) fn layout(&self) -> &Layout {
        &self.0.layout
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<type {} flags={:#x}>", self.0.name, self.0.flags.bits())
    }
}

pub struct TypeBuilder {
    name: String,
    flags: TypeFlags,
}

impl TypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: TypeFlags::NONE,
        }
    }

    pub fn subclass(mut self) -> Self {
        self.flags = self.flags | TypeFlags::SUBCLASS;
        self
    }

    pub fn exception(mut self) -> Self {
        self.flags = self.flags | TypeFlags::BASE_EXC_SUBCLASS;
        self
    }

    pub fn flags(mut self, flags: TypeFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    pub fn build(self) -> TypeDescriptor {
        TypeDescriptor(Rc::new(TypeObject {
            layout: Layout::compute(self.flags),
            name: self.name,
            flags: self.flags,
        }))
    }
}
