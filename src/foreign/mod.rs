//! The foreign heap as seen by the bridge.
//!
//! [`ForeignHeap`] is the primitive API of the foreign dynamic-language
//! runtime. The bridge consumes it and never reaches around it. Methods that
//! return a fresh object hand the caller a new reference; lookups into dicts,
//! module globals and the builtins return borrowed references.

pub mod memory_heap;
pub mod object_id;
pub mod owned_ref;
pub mod slot;
pub mod type_descriptor;

pub use memory_heap::InMemoryHeap;
pub use object_id::ObjectId;
pub use owned_ref::OwnedRef;
pub use type_descriptor::{TypeBuilder, TypeDescriptor, TypeFlags, WordOffset};

use std::rc::Weak;

use crate::{error::ForeignError, runtime::gil::Gil};

/// An instance of a bridged type the heap has just deallocated, with its slot
/// words as they were when it died.
#[derive(Debug, Clone)]
pub struct FreedInstance {
    pub object: ObjectId,
    pub ty: TypeDescriptor,
    pub words: Vec<u64>,
}

/// Told about every deallocated instance of a bridged type.
pub trait DeallocObserver {
    fn instance_freed(&self, gil: Gil<'_>, freed: &FreedInstance);
}

/// How `ForeignHeap::compile` interprets its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// A whole module body.
    File,
    /// A single statement.
    Single,
}

pub trait ForeignHeap {
    // -- objects ----------------------------------------------------------

    /// Allocates a zeroed instance of `ty` with no extra words.
    fn alloc_instance(&self, gil: Gil<'_>, ty: &TypeDescriptor) -> Result<ObjectId, ForeignError>;

    /// Type of an instance allocated by `alloc_instance`.
    fn type_of(&self, gil: Gil<'_>, obj: ObjectId) -> Result<TypeDescriptor, ForeignError>;

    fn read_word(&self, gil: Gil<'_>, obj: ObjectId, offset: WordOffset) -> Result<u64, ForeignError>;

    fn write_word(
        &self,
        gil: Gil<'_>,
        obj: ObjectId,
        offset: WordOffset,
        word: u64,
    ) -> Result<(), ForeignError>;

    fn incref(&self, gil: Gil<'_>, obj: ObjectId);

    /// Drops one reference; the object is deallocated when none remain.
    fn decref(&self, gil: Gil<'_>, obj: ObjectId);

    /// Installs the observer for deallocated instances, replacing any
    /// previous one. Held weakly; called with no heap state borrowed, after
    /// the call that freed the instance has finished mutating the heap.
    fn set_dealloc_observer(&self, observer: Weak<dyn DeallocObserver>);

    /// Current reference count, `0` for a dead or unknown object.
    fn refcount(&self, gil: Gil<'_>, obj: ObjectId) -> usize;

    fn new_str(&self, gil: Gil<'_>, text: &str) -> Result<ObjectId, ForeignError>;

    fn new_tuple(&self, gil: Gil<'_>, items: &[ObjectId]) -> Result<ObjectId, ForeignError>;

    fn str_value(&self, gil: Gil<'_>, obj: ObjectId) -> Option<String>;

    fn repr(&self, gil: Gil<'_>, obj: ObjectId) -> String;

    // -- dicts ------------------------------------------------------------

    fn new_dict(&self, gil: Gil<'_>) -> Result<ObjectId, ForeignError>;

    fn dict_get_item(&self, gil: Gil<'_>, dict: ObjectId, key: &str) -> Option<ObjectId>;

    fn dict_set_item(
        &self,
        gil: Gil<'_>,
        dict: ObjectId,
        key: &str,
        value: ObjectId,
    ) -> Result<(), ForeignError>;

    /// Keys in insertion-independent, sorted order.
    fn dict_keys(&self, gil: Gil<'_>, dict: ObjectId) -> Vec<String>;

    // -- modules ----------------------------------------------------------

    /// The module registry dict (`name -> module`).
    fn module_registry(&self, gil: Gil<'_>) -> ObjectId;

    /// Globals of the builtins module.
    fn builtins(&self, gil: Gil<'_>) -> Result<ObjectId, ForeignError>;

    fn module_new(&self, gil: Gil<'_>, name: &str) -> Result<ObjectId, ForeignError>;

    fn module_dict(&self, gil: Gil<'_>, module: ObjectId) -> Result<ObjectId, ForeignError>;

    fn module_name(&self, gil: Gil<'_>, module: ObjectId) -> Result<String, ForeignError>;

    fn compile(
        &self,
        gil: Gil<'_>,
        source: &str,
        filename: &str,
        mode: CompileMode,
    ) -> Result<ObjectId, ForeignError>;

    /// Executes a compiled unit as module `name` and registers it.
    fn exec_code_module(&self, gil: Gil<'_>, name: &str, code: ObjectId) -> Result<ObjectId, ForeignError>;

    fn import_module(&self, gil: Gil<'_>, name: &str) -> Result<ObjectId, ForeignError>;

    fn reload_module(&self, gil: Gil<'_>, module: ObjectId) -> Result<ObjectId, ForeignError>;
}
