use serde::{Deserialize, Serialize};

/// Identity of an object on the foreign heap.
///
/// An `ObjectId` is the value handed to foreign-heap code. Inside object
/// slots it is stored as a raw word (`index + 1`) so that a zeroed slot
/// reads back as null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub(crate) u32);

impl ObjectId {
    /// Returns the raw arena index backing this identity.
    pub fn index(self) -> u32 {
        self.0
    }

    pub fn to_word(self) -> u64 {
        u64::from(self.0) + 1
    }

    /// Decodes a slot word; `0` is the null word.
    pub fn from_word(word: u64) -> Option<Self> {
        match word {
            0 => None,
            w => u32::try_from(w - 1).ok().map(ObjectId),
        }
    }

    #[cfg(test)]
    pub fn new_for_test(index: u32) -> Self {
        Self(index)
    }
}
