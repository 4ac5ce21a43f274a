//! Typed access to the reserved words of foreign instances.
//!
//! This is the only module that turns a [`TypeDescriptor`] into word
//! offsets. Everything else goes through [`ObjectLayout`].

use crate::{
    error::{BridgeError, ForeignError},
    foreign::{ForeignHeap, FreedInstance, ObjectId, TypeDescriptor, WordOffset},
    runtime::{
        gil::Gil,
        tracking::{RawHandle, TrackingHandle},
    },
};

/// Reads and writes the tracking slot of a foreign object.
pub trait TrackingSlotAccess {
    fn read_tracking_handle(&self, gil: Gil<'_>, obj: ObjectId) -> Result<RawHandle, BridgeError>;

    fn write_tracking_handle(
        &self,
        gil: Gil<'_>,
        obj: ObjectId,
        handle: TrackingHandle,
    ) -> Result<(), BridgeError>;
}

/// Tracking word of an instance the heap has already freed.
pub fn freed_tracking_handle(freed: &FreedInstance) -> RawHandle {
    freed
        .words
        .get(freed.ty.layout().tracking.get())
        .copied()
        .map_or(RawHandle::EMPTY, RawHandle)
}

/// Slot accessors for instances of one foreign type.
pub struct ObjectLayout<'a> {
    heap: &'a dyn ForeignHeap,
    ty: &'a TypeDescriptor,
}

impl<'a> ObjectLayout<'a> {
    pub fn new(heap: &'a dyn ForeignHeap, ty: &'a TypeDescriptor) -> Self {
        Self { heap, ty }
    }

    fn read(&self, gil: Gil<'_>, obj: ObjectId, offset: WordOffset) -> Result<u64, BridgeError> {
        self.heap
            .read_word(gil, obj, offset)
            .map_err(BridgeError::SlotAccess)
    }

    fn write(
        &self,
        gil: Gil<'_>,
        obj: ObjectId,
        offset: WordOffset,
        word: u64,
    ) -> Result<(), BridgeError> {
        self.heap
            .write_word(gil, obj, offset, word)
            .map_err(BridgeError::SlotAccess)
    }

    fn exception_words(&self) -> Result<(WordOffset, WordOffset), BridgeError> {
        self.ty
            .layout()
            .exception
            .ok_or_else(|| BridgeError::ExceptionLayout(self.ty.name().to_string()))
    }

    /// The per-instance dict, or `None` if the type has no dict slot or the
    /// slot is still null.
    pub fn read_dict(&self, gil: Gil<'_>, obj: ObjectId) -> Result<Option<ObjectId>, BridgeError> {
        match self.ty.layout().dict {
            Some(offset) => Ok(ObjectId::from_word(self.read(gil, obj, offset)?)),
            None => Ok(None),
        }
    }

    /// Stores `dict` in the dict slot, taking over the caller's reference.
    pub fn write_dict(&self, gil: Gil<'_>, obj: ObjectId, dict: ObjectId) -> Result<(), BridgeError> {
        let offset = self.ty.layout().dict.ok_or_else(|| {
            BridgeError::SlotAccess(ForeignError::type_error(format!(
                "type `{}` has no instance dict",
                self.ty.name()
            )))
        })?;
        self.write(gil, obj, offset, dict.to_word())
    }

    pub fn read_exception_args(
        &self,
        gil: Gil<'_>,
        obj: ObjectId,
    ) -> Result<Option<ObjectId>, BridgeError> {
        let (args, _) = self.exception_words()?;
        Ok(ObjectId::from_word(self.read(gil, obj, args)?))
    }

    pub fn read_exception_cause(
        &self,
        gil: Gil<'_>,
        obj: ObjectId,
    ) -> Result<Option<ObjectId>, BridgeError> {
        let (_, cause) = self.exception_words()?;
        Ok(ObjectId::from_word(self.read(gil, obj, cause)?))
    }

    /// Stores `args`, taking over the caller's reference.
    pub fn write_exception_args(
        &self,
        gil: Gil<'_>,
        obj: ObjectId,
        args: ObjectId,
    ) -> Result<(), BridgeError> {
        let (offset, _) = self.exception_words()?;
        self.write(gil, obj, offset, args.to_word())
    }

    /// Stores `cause`, taking over the caller's reference.
    pub fn write_exception_cause(
        &self,
        gil: Gil<'_>,
        obj: ObjectId,
        cause: ObjectId,
    ) -> Result<(), BridgeError> {
        let (_, offset) = self.exception_words()?;
        self.write(gil, obj, offset, cause.to_word())
    }
}

impl TrackingSlotAccess for ObjectLayout<'_> {
    fn read_tracking_handle(&self, gil: Gil<'_>, obj: ObjectId) -> Result<RawHandle, BridgeError> {
        self.read(gil, obj, self.ty.layout().tracking).map(RawHandle)
    }

    fn write_tracking_handle(
        &self,
        gil: Gil<'_>,
        obj: ObjectId,
        handle: TrackingHandle,
    ) -> Result<(), BridgeError> {
        self.write(gil, obj, self.ty.layout().tracking, handle.to_raw().0)
    }
}
