use sha2::{Digest, Sha256};

use crate::{error::BridgeError, foreign::memory_heap::HeapState};

/// A sealed image of the whole in-memory heap.
///
/// The image is the serde_json encoding of the heap state; the digest is the
/// SHA-256 of the image and is checked again before the image is opened.
#[derive(Debug, Clone)]
pub struct SavedHeap {
    image: Vec<u8>,
    digest: [u8; 32],
}

impl SavedHeap {
    pub(crate) fn seal(state: &HeapState) -> Result<Self, BridgeError> {
        let image = serde_json::to_vec(state)?;
        let digest = hash_bytes(&image);
        Ok(Self { image, digest })
    }

    pub(crate) fn open(&self) -> Result<HeapState, BridgeError> {
        if hash_bytes(&self.image) != self.digest {
            return Err(BridgeError::DigestMismatch);
        }
        Ok(serde_json::from_slice(&self.image)?)
    }

    pub fn from_parts(image: Vec<u8>, digest: [u8; 32]) -> Self {
        Self { image, digest }
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    pub fn digest_hex(&self) -> String {
        to_hex(&self.digest)
    }
}

pub fn hash_bytes(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

fn to_hex(bytes: &[u8; 32]) -> String {
    let mut out = String::with_capacity(64);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
