use std::{any::Any, rc::Rc};

use gcbridge::{
    Bridge, BridgeError, GilGuard,
    foreign::{
        ForeignHeap, InMemoryHeap, TypeBuilder,
        slot::{ObjectLayout, TrackingSlotAccess},
    },
    runtime::{
        managed::{ManagedInstance, ManagedType},
        tracking::TrackingHandle,
        type_registry::ClassRegistry,
        wrapper::WrapperObject,
    },
};

#[derive(Debug, PartialEq)]
struct Widget {
    id: u32,
}

struct Gadget;

struct Unregistered;

fn bridge() -> (Rc<InMemoryHeap>, Bridge) {
    let heap = Rc::new(InMemoryHeap::new());
    let mut registry = ClassRegistry::new();
    registry.register_plain(ManagedType::of::<Widget>());
    registry.register(
        ManagedType::of::<Gadget>(),
        TypeBuilder::new("Gadget").subclass().build(),
    );
    (heap.clone(), Bridge::new(heap, registry))
}

#[test]
fn wrapped_object_resolves_to_its_instance() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (_heap, bridge) = bridge();

    let instance = ManagedInstance::new(Widget { id: 7 });
    let wrapper = bridge.wrap(gil, instance.clone()).unwrap();

    let resolved = bridge.resolve(gil, wrapper.object()).unwrap();
    assert!(Rc::ptr_eq(&resolved, &wrapper));
    assert!(bridge.instance_of(gil, wrapper.object()).unwrap().ptr_eq(&instance));
    assert_eq!(
        resolved.instance().downcast_ref::<Widget>(),
        Some(&Widget { id: 7 })
    );
    assert_eq!(wrapper.type_descriptor().name(), "Widget");
}

#[test]
fn each_wrap_allocates_a_new_foreign_object() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (_heap, bridge) = bridge();

    let instance = ManagedInstance::new(Widget { id: 1 });
    let first = bridge.wrap(gil, instance.clone()).unwrap();
    let second = bridge.wrap(gil, instance.clone()).unwrap();

    assert_ne!(first.object(), second.object());
    assert_ne!(first.tracking_handle(), second.tracking_handle());
    assert!(first.instance().ptr_eq(second.instance()));
    assert_eq!(bridge.live_handles(), 2);
}

#[test]
fn new_reference_belongs_to_the_caller() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    let before = heap.live_count();

    let object = WrapperObject::get_inst_handle_of(gil, &bridge, ManagedInstance::new(Widget { id: 2 })).unwrap();
    assert_eq!(heap.refcount(gil, object), 1);
    assert_eq!(heap.live_count(), before + 1);
    assert!(bridge.resolve(gil, object).is_ok());
}

#[test]
fn foreign_decref_revokes_the_handle() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    let before = heap.live_count();

    for id in 0..100 {
        let object = WrapperObject::get_inst_handle_of(gil, &bridge, ManagedInstance::new(Widget { id })).unwrap();
        heap.decref(gil, object);
    }

    assert_eq!(bridge.live_handles(), 0);
    assert_eq!(heap.live_count(), before);
}

#[test]
fn lookup_by_stand_in_type_uses_its_descriptor() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();

    let object = WrapperObject::get_inst_handle_for(
        gil,
        &bridge,
        ManagedInstance::new(Widget { id: 3 }),
        ManagedType::of::<Gadget>(),
    )
    .unwrap();

    let ty = heap.type_of(gil, object).unwrap();
    assert_eq!(ty.name(), "Gadget");
    assert!(ty.is_subclass());
    let dict = ObjectLayout::new(heap.as_ref(), &ty).read_dict(gil, object).unwrap();
    assert!(dict.is_some());
}

#[test]
fn explicit_descriptor_overrides_the_registry() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    let ty = TypeBuilder::new("Anonymous").build();

    let object = WrapperObject::get_inst_handle(gil, &bridge, ManagedInstance::new(Unregistered), &ty).unwrap();
    assert_eq!(heap.type_of(gil, object).unwrap(), ty);
    assert!(ObjectLayout::new(heap.as_ref(), &ty).read_dict(gil, object).unwrap().is_none());
}

#[test]
fn unregistered_type_is_rejected_before_allocation() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    let before = heap.live_count();

    let err = bridge.wrap(gil, ManagedInstance::new(Unregistered)).unwrap_err();
    assert!(matches!(err, BridgeError::UnregisteredType(name) if name.ends_with("Unregistered")));
    assert_eq!(heap.live_count(), before);
}

#[test]
fn object_without_handle_reports_empty_slot() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    let ty = TypeBuilder::new("Bare").build();

    let object = heap.alloc_instance(gil, &ty).unwrap();
    let err = bridge.resolve(gil, object).unwrap_err();
    assert!(matches!(err, BridgeError::EmptySlot(_)));
}

#[test]
fn extension_handle_is_not_a_wrapper() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    let wrapper = bridge.wrap(gil, ManagedInstance::new(Widget { id: 4 })).unwrap();

    let extension = bridge.track_extension(gil, Rc::new(99u64) as Rc<dyn Any>);
    ObjectLayout::new(heap.as_ref(), wrapper.type_descriptor())
        .write_tracking_handle(gil, wrapper.object(), TrackingHandle::Extension(extension))
        .unwrap();

    let err = bridge.resolve(gil, wrapper.object()).unwrap_err();
    assert!(matches!(err, BridgeError::WrongCategory { found: "extension", .. }));
    let tracked = bridge.resolve_extension(gil, extension).unwrap();
    assert_eq!(tracked.downcast_ref::<u64>(), Some(&99));
}

#[test]
fn released_wrapper_handle_goes_stale() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    let wrapper = bridge.wrap(gil, ManagedInstance::new(Widget { id: 5 })).unwrap();
    let object = wrapper.object();
    let handle = wrapper.tracking_handle().unwrap();

    // Someone else still holds the object.
    heap.incref(gil, object);
    wrapper.release(gil, &bridge).unwrap();

    assert!(!bridge.is_live(gil, handle));
    assert_eq!(heap.refcount(gil, object), 1);
    assert!(matches!(bridge.resolve(gil, object), Err(BridgeError::StaleHandle(_))));
}

#[test]
fn non_bridged_objects_cannot_be_resolved() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();

    let text = heap.new_str(gil, "plain").unwrap();
    let err = bridge.resolve(gil, text).unwrap_err();
    assert_eq!(err.foreign().unwrap().kind, "TypeError");
}
