use std::{
    any::Any,
    cell::RefCell,
    rc::{Rc, Weak},
};

use tracing::debug;

use crate::{
    config::BridgeConfig,
    error::BridgeError,
    foreign::{
        DeallocObserver, ForeignHeap, FreedInstance, ObjectId,
        slot::{self, ObjectLayout, TrackingSlotAccess},
    },
    runtime::{
        gil::Gil,
        managed::ManagedInstance,
        tracking::{ExtensionHandle, HandleTable, Tracked, TrackingHandle, WrapperHandle},
        type_registry::TypeRegistry,
        wrapper::{
            WrapperObject,
            exceptions::{ExceptionProtocol, StandardExceptions},
        },
    },
};

/// The handle table, shared with the heap so that a wrapped object freed on
/// the foreign side takes its handle with it.
struct SharedHandles {
    table: RefCell<HandleTable>,
}

impl DeallocObserver for SharedHandles {
    fn instance_freed(&self, _gil: Gil<'_>, freed: &FreedInstance) {
        let Some(TrackingHandle::Wrapper(handle)) = TrackingHandle::from_raw(slot::freed_tracking_handle(freed))
        else {
            return;
        };

        // Only the wrapper whose object just died loses its handle.
        let released = {
            let mut table = self.table.borrow_mut();
            let owned = table
                .resolve_wrapper(handle)
                .is_some_and(|wrapper| wrapper.object() == freed.object);
            if owned { table.revoke(handle) } else { None }
        };

        if let Some(Tracked::Wrapper(wrapper)) = &released {
            wrapper.mark_collected();
            debug!(object = freed.object.index(), ?handle, "wrapped object collected");
        }
    }
}

/// Shared context of one embedded foreign runtime.
///
/// Owns the tracking-handle table for the lifetime of the embedding and
/// holds the collaborators the wrapper mechanism consumes: the foreign heap,
/// the type registry and the exception protocol.
pub struct Bridge {
    heap: Rc<dyn ForeignHeap>,
    handles: Rc<SharedHandles>,
    registry: Box<dyn TypeRegistry>,
    exceptions: Box<dyn ExceptionProtocol>,
    config: BridgeConfig,
}

impl Bridge {
    /// Creates the bridge and installs its handle table as `heap`'s dealloc
    /// observer.
    pub fn new(heap: Rc<dyn ForeignHeap>, registry: impl TypeRegistry + 'static) -> Self {
        let handles = Rc::new(SharedHandles {
            table: RefCell::new(HandleTable::new()),
        });
        let observer: Rc<dyn DeallocObserver> = handles.clone();
        let observer: Weak<dyn DeallocObserver> = Rc::downgrade(&observer);
        heap.set_dealloc_observer(observer);

        Self {
            heap,
            handles,
            registry: Box::new(registry),
            exceptions: Box::new(StandardExceptions),
            config: BridgeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_exception_protocol(mut self, exceptions: impl ExceptionProtocol + 'static) -> Self {
        self.exceptions = Box::new(exceptions);
        self
    }

    pub fn heap(&self) -> &Rc<dyn ForeignHeap> {
        &self.heap
    }

    pub fn registry(&self) -> &dyn TypeRegistry {
        self.registry.as_ref()
    }

    pub fn exceptions(&self) -> &dyn ExceptionProtocol {
        self.exceptions.as_ref()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Wraps `instance` with the descriptor the registry has for its type.
    pub fn wrap(&self, gil: Gil<'_>, instance: ManagedInstance) -> Result<Rc<WrapperObject>, BridgeError> {
        WrapperObject::get_instance(gil, self, instance)
    }

    pub(crate) fn allocate_wrapper_handle(&self, _gil: Gil<'_>, wrapper: Rc<WrapperObject>) -> WrapperHandle {
        let handle = self.handles.table.borrow_mut().allocate_wrapper(wrapper);
        debug!(?handle, "allocated tracking handle");
        handle
    }

    /// Revokes `handle`. Whatever it tracked is dropped after the table is
    /// unlocked.
    pub(crate) fn revoke(&self, _gil: Gil<'_>, handle: impl Into<TrackingHandle>) -> bool {
        let handle = handle.into();
        let released = self.handles.table.borrow_mut().revoke(handle);
        debug!(?handle, live = released.is_some(), "revoked tracking handle");
        released.is_some()
    }

    pub fn track_extension(&self, _gil: Gil<'_>, object: Rc<dyn Any>) -> ExtensionHandle {
        self.handles.table.borrow_mut().allocate_extension(object)
    }

    pub fn resolve_extension(&self, _gil: Gil<'_>, handle: ExtensionHandle) -> Option<Rc<dyn Any>> {
        self.handles.table.borrow().resolve_extension(handle)
    }

    pub fn is_live(&self, _gil: Gil<'_>, handle: impl Into<TrackingHandle>) -> bool {
        self.handles.table.borrow().is_live(handle.into())
    }

    pub fn live_handles(&self) -> usize {
        self.handles.table.borrow().live_count()
    }

    /// Recovers the wrapper a foreign object stands for by decoding its
    /// tracking slot.
    pub fn resolve(&self, gil: Gil<'_>, obj: ObjectId) -> Result<Rc<WrapperObject>, BridgeError> {
        let ty = self.heap.type_of(gil, obj).map_err(BridgeError::SlotAccess)?;
        let raw = ObjectLayout::new(self.heap.as_ref(), &ty).read_tracking_handle(gil, obj)?;
        if raw.is_empty() {
            return Err(BridgeError::EmptySlot(obj.index()));
        }

        let handle = match TrackingHandle::from_raw(raw) {
            Some(TrackingHandle::Wrapper(handle)) => handle,
            Some(other) => {
                return Err(BridgeError::WrongCategory {
                    object: obj.index(),
                    found: other.category(),
                });
            }
            None => return Err(BridgeError::StaleHandle(obj.index())),
        };

        self.handles
            .table
            .borrow()
            .resolve_wrapper(handle)
            .filter(|wrapper| wrapper.object() == obj)
            .ok_or(BridgeError::StaleHandle(obj.index()))
    }

    pub fn instance_of(&self, gil: Gil<'_>, obj: ObjectId) -> Result<ManagedInstance, BridgeError> {
        self.resolve(gil, obj).map(|wrapper| wrapper.instance().clone())
    }

    /// Tears down the managed side of the tracking table, as happens when
    /// the managed runtime is unloaded across a save boundary. Every handle
    /// issued so far becomes stale. Returns how many handles were dropped.
    pub fn reset_tracking(&self, _gil: Gil<'_>) -> usize {
        let released: Vec<Tracked> = self.handles.table.borrow_mut().reset();
        let count = released.len();
        debug!(count, "reset tracking handle table");
        drop(released);
        count
    }
}
