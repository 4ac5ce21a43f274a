use std::{fmt, rc::Rc};

use crate::{
    foreign::{ForeignHeap, ObjectId},
    runtime::gil::Gil,
};

/// One owned reference to a foreign object.
///
/// The reference is released exactly once: either explicitly through
/// [`OwnedRef::release`] or, on any other exit path, when the guard drops.
pub struct OwnedRef {
    heap: Rc<dyn ForeignHeap>,
    obj: Option<ObjectId>,
}

impl OwnedRef {
    /// Takes a new reference to `obj`.
    pub fn acquire(gil: Gil<'_>, heap: &Rc<dyn ForeignHeap>, obj: ObjectId) -> Self {
        heap.incref(gil, obj);
        Self::steal(heap, obj)
    }

    /// Adopts a reference the caller already owns, e.g. one returned by an
    /// allocating heap call.
    pub fn steal(heap: &Rc<dyn ForeignHeap>, obj: ObjectId) -> Self {
        Self {
            heap: Rc::clone(heap),
            obj: Some(obj),
        }
    }

    pub fn object(&self) -> ObjectId {
        self.obj.expect("OwnedRef used after release")
    }

    pub fn heap(&self) -> &Rc<dyn ForeignHeap> {
        &self.heap
    }

    pub fn release(mut self, gil: Gil<'_>) {
        if let Some(obj) = self.obj.take() {
            self.heap.decref(gil, obj);
        }
    }

    /// Gives up ownership without releasing; the caller now owns the reference.
    pub fn into_raw(mut self) -> ObjectId {
        self.obj.take().expect("OwnedRef used after release")
    }
}

impl Drop for OwnedRef {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            Gil::with(|gil| self.heap.decref(gil, obj));
        }
    }
}

impl fmt::Debug for OwnedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedRef").field(&self.obj).finish()
    }
}
