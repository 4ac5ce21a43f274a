//! Wrapper objects: one managed instance presented as one foreign object.
//!
//! The foreign object carries a tracking handle in its tracking slot. While
//! the object is reachable and not mid-save that handle is live and resolves
//! back to this wrapper. Across a save boundary the handle is given up and a
//! compensating foreign reference keeps the object alive until `on_load`
//! writes a fresh handle.

pub mod exceptions;

use std::{cell::RefCell, fmt, mem, rc::Rc};

use tracing::debug;

use crate::{
    error::BridgeError,
    foreign::{
        ObjectId, OwnedRef, TypeDescriptor,
        slot::{ObjectLayout, TrackingSlotAccess},
    },
    runtime::{
        bridge::Bridge,
        gil::Gil,
        leak_detector,
        managed::{ManagedInstance, ManagedType},
        tracking::WrapperHandle,
    },
};

enum WrapperState {
    /// Not attached to a handle: mid-construction or released.
    Detached,
    Live(WrapperHandle),
    /// Between `on_save` and `on_load`; holds the compensating reference.
    Saved(OwnedRef),
}

pub struct WrapperObject {
    ty: TypeDescriptor,
    object: ObjectId,
    instance: ManagedInstance,
    state: RefCell<WrapperState>,
}

impl WrapperObject {
    /// Allocates a foreign object of type `ty` for `instance` and tracks it.
    ///
    /// Each call allocates a new foreign object; wrapping the same instance
    /// twice yields two distinct foreign identities. The caller receives the
    /// initial foreign reference and gives it back exactly once, through
    /// [`WrapperObject::release`] or a foreign-side decref. If the object is
    /// collected, the bridge revokes its handle.
    pub fn construct(
        gil: Gil<'_>,
        bridge: &Bridge,
        instance: ManagedInstance,
        ty: &TypeDescriptor,
    ) -> Result<Rc<Self>, BridgeError> {
        let heap = bridge.heap();
        let object = heap
            .alloc_instance(gil, ty)
            .map_err(|source| BridgeError::Allocation {
                type_name: ty.name().to_string(),
                source,
            })?;
        // Frees the object on every early return below.
        let initial = OwnedRef::steal(heap, object);
        let layout = ObjectLayout::new(heap.as_ref(), ty);

        if bridge.registry().supports_instance_dict(ty) && layout.read_dict(gil, object)?.is_none() {
            let dict = heap
                .new_dict(gil)
                .map_err(|source| BridgeError::Allocation {
                    type_name: "dict".to_string(),
                    source,
                })?;
            let dict = OwnedRef::steal(heap, dict);
            layout.write_dict(gil, object, dict.object())?;
            dict.into_raw();
        }

        let wrapper = Rc::new(WrapperObject {
            ty: ty.clone(),
            object,
            instance,
            state: RefCell::new(WrapperState::Detached),
        });

        let handle = bridge.allocate_wrapper_handle(gil, Rc::clone(&wrapper));
        if let Err(err) = layout.write_tracking_handle(gil, object, handle.into()) {
            bridge.revoke(gil, handle);
            return Err(err);
        }
        *wrapper.state.borrow_mut() = WrapperState::Live(handle);

        if let Err(err) = bridge.exceptions().set_args_and_cause(gil, bridge, &wrapper) {
            wrapper.detach(gil, bridge);
            return Err(err);
        }

        leak_detector::record_wrapper();
        debug!(
            object = object.index(),
            ty = ty.name(),
            managed = wrapper.instance.managed_type().name(),
            "constructed wrapper"
        );
        initial.into_raw();
        Ok(wrapper)
    }

    /// Wraps `instance` using the descriptor registered for its runtime type.
    pub fn get_instance(
        gil: Gil<'_>,
        bridge: &Bridge,
        instance: ManagedInstance,
    ) -> Result<Rc<Self>, BridgeError> {
        let ty = descriptor_for(bridge, instance.managed_type())?;
        Self::construct(gil, bridge, instance, &ty)
    }

    pub fn get_inst_handle(
        gil: Gil<'_>,
        bridge: &Bridge,
        instance: ManagedInstance,
        ty: &TypeDescriptor,
    ) -> Result<ObjectId, BridgeError> {
        Self::construct(gil, bridge, instance, ty).map(|wrapper| wrapper.object)
    }

    /// Wraps `instance` as `managed`, e.g. to expose a value as one of the
    /// types it can stand in for.
    pub fn get_inst_handle_for(
        gil: Gil<'_>,
        bridge: &Bridge,
        instance: ManagedInstance,
        managed: ManagedType,
    ) -> Result<ObjectId, BridgeError> {
        let ty = descriptor_for(bridge, managed)?;
        Self::get_inst_handle(gil, bridge, instance, &ty)
    }

    pub fn get_inst_handle_of(
        gil: Gil<'_>,
        bridge: &Bridge,
        instance: ManagedInstance,
    ) -> Result<ObjectId, BridgeError> {
        Self::get_instance(gil, bridge, instance).map(|wrapper| wrapper.object)
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn instance(&self) -> &ManagedInstance {
        &self.instance
    }

    pub fn type_descriptor(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn tracking_handle(&self) -> Option<WrapperHandle> {
        match &*self.state.borrow() {
            WrapperState::Live(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(&*self.state.borrow(), WrapperState::Saved(_))
    }

    /// Called right before the foreign runtime serializes the object.
    ///
    /// Takes one extra foreign reference and gives up the tracking handle,
    /// which will not survive the save boundary.
    pub fn on_save(self: &Rc<Self>, gil: Gil<'_>, bridge: &Bridge) -> Result<(), BridgeError> {
        let mut state = self.state.borrow_mut();
        let handle = match &*state {
            WrapperState::Live(handle) => *handle,
            WrapperState::Saved(_) => return Err(BridgeError::AlreadySaved(self.object.index())),
            WrapperState::Detached => return Err(BridgeError::Released(self.object.index())),
        };

        let extra = OwnedRef::acquire(gil, bridge.heap(), self.object);
        *state = WrapperState::Saved(extra);
        drop(state);
        bridge.revoke(gil, handle);

        leak_detector::record_save();
        debug!(object = self.object.index(), "wrapper saved");
        Ok(())
    }

    /// Called right after the foreign runtime restores the object.
    ///
    /// Writes a fresh tracking handle, then drops the reference taken by
    /// `on_save`.
    pub fn on_load(self: &Rc<Self>, gil: Gil<'_>, bridge: &Bridge) -> Result<(), BridgeError> {
        let mut state = self.state.borrow_mut();
        let extra = match mem::replace(&mut *state, WrapperState::Detached) {
            WrapperState::Saved(extra) => extra,
            other => {
                *state = other;
                return Err(BridgeError::NotSaved(self.object.index()));
            }
        };

        let handle = bridge.allocate_wrapper_handle(gil, Rc::clone(self));
        let layout = ObjectLayout::new(bridge.heap().as_ref(), &self.ty);
        if let Err(err) = layout.write_tracking_handle(gil, self.object, handle.into()) {
            *state = WrapperState::Saved(extra);
            drop(state);
            bridge.revoke(gil, handle);
            return Err(err);
        }
        *state = WrapperState::Live(handle);
        drop(state);
        extra.release(gil);

        leak_detector::record_load();
        debug!(object = self.object.index(), ?handle, "wrapper loaded");
        Ok(())
    }

    /// Gives back the foreign reference handed out at construction, along
    /// with the tracking handle.
    ///
    /// That reference has one owner: whoever holds it either passes it here
    /// or decrefs it on the foreign side, never both. Releasing twice, or
    /// after the foreign object was collected, is a no-op.
    pub fn release(self: &Rc<Self>, gil: Gil<'_>, bridge: &Bridge) -> Result<(), BridgeError> {
        let live = match &*self.state.borrow() {
            WrapperState::Detached => return Ok(()),
            WrapperState::Live(handle) => Some(*handle),
            WrapperState::Saved(_) => None,
        };

        // The slot may have been freed and reused without the heap telling us.
        if let Some(handle) = live {
            let owned = bridge
                .resolve(gil, self.object)
                .is_ok_and(|wrapper| Rc::ptr_eq(&wrapper, self));
            if !owned {
                bridge.revoke(gil, handle);
                self.mark_collected();
                debug!(object = self.object.index(), "released wrapper no longer owns its object");
                return Ok(());
            }
        }

        self.detach(gil, bridge);
        bridge.heap().decref(gil, self.object);
        debug!(object = self.object.index(), "wrapper released");
        Ok(())
    }

    /// The foreign object is gone. Forgets the handle and any compensating
    /// reference without touching the heap.
    pub(crate) fn mark_collected(&self) {
        let previous = mem::replace(&mut *self.state.borrow_mut(), WrapperState::Detached);
        if let WrapperState::Saved(extra) = previous {
            extra.into_raw();
        }
    }

    fn detach(&self, gil: Gil<'_>, bridge: &Bridge) {
        let previous = mem::replace(&mut *self.state.borrow_mut(), WrapperState::Detached);
        match previous {
            WrapperState::Live(handle) => {
                bridge.revoke(gil, handle);
            }
            WrapperState::Saved(extra) => extra.release(gil),
            WrapperState::Detached => {}
        }
    }
}

fn descriptor_for(bridge: &Bridge, managed: ManagedType) -> Result<TypeDescriptor, BridgeError> {
    bridge
        .registry()
        .descriptor_for(managed)
        .ok_or(BridgeError::UnregisteredType(managed.name()))
}

impl fmt::Debug for WrapperObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.borrow() {
            WrapperState::Detached => "detached",
            WrapperState::Live(_) => "live",
            WrapperState::Saved(_) => "saved",
        };
        f.debug_struct("WrapperObject")
            .field("ty", &self.ty)
            .field("object", &self.object)
            .field("instance", &self.instance)
            .field("state", &state)
            .finish()
    }
}
