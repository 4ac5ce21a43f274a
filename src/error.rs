use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Exception context reported by the foreign runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignError {
    /// Foreign exception type name, e.g. `"SyntaxError"`.
    pub kind: String,
    pub message: String,
}

impl ForeignError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn memory(message: impl Into<String>) -> Self {
        Self::new("MemoryError", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new("SystemError", message)
    }
}

impl fmt::Display for ForeignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ForeignError {}

/// Failures surfaced by the bridge. None of these are retried internally.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to allocate foreign object of type `{type_name}`")]
    Allocation {
        type_name: String,
        #[source]
        source: ForeignError,
    },

    #[error("foreign registry rejected write of `{key}`")]
    RegistryWrite {
        key: String,
        #[source]
        source: ForeignError,
    },

    #[error("failed to compile module `{name}`")]
    Compile {
        name: String,
        #[source]
        source: ForeignError,
    },

    #[error("failed to import module `{name}`")]
    Import {
        name: String,
        #[source]
        source: ForeignError,
    },

    #[error("failed to reload module `{name}`")]
    Reload {
        name: String,
        #[source]
        source: ForeignError,
    },

    #[error("foreign heap rejected slot access")]
    SlotAccess(#[source] ForeignError),

    #[error("no type descriptor registered for managed type `{0}`")]
    UnregisteredType(&'static str),

    #[error("tracking slot of object #{0} is empty")]
    EmptySlot(u32),

    #[error("tracking handle of object #{0} is stale")]
    StaleHandle(u32),

    #[error("tracking handle of object #{object} is a {found} handle, expected a wrapper")]
    WrongCategory { object: u32, found: &'static str },

    #[error("wrapper for object #{0} was loaded without a matching save")]
    NotSaved(u32),

    #[error("wrapper for object #{0} is already saved")]
    AlreadySaved(u32),

    #[error("wrapper for object #{0} has been released")]
    Released(u32),

    #[error("type `{0}` has no exception layout for an error-like instance")]
    ExceptionLayout(String),

    #[error("heap snapshot could not be encoded or decoded")]
    Snapshot(#[from] serde_json::Error),

    #[error("heap snapshot digest mismatch")]
    DigestMismatch,

    #[error("heap snapshot is corrupt: {0}")]
    CorruptSnapshot(String),

    #[error("failed to read `{path}`")]
    Config {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BridgeError {
    /// Foreign exception context attached to this error, if any.
    pub fn foreign(&self) -> Option<&ForeignError> {
        match self {
            BridgeError::Allocation { source, .. }
            | BridgeError::RegistryWrite { source, .. }
            | BridgeError::Compile { source, .. }
            | BridgeError::Import { source, .. }
            | BridgeError::Reload { source, .. }
            | BridgeError::SlotAccess(source) => Some(source),
            _ => None,
        }
    }
}
