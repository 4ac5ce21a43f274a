use std::rc::Rc;

use gcbridge::{
    Bridge, BridgeError, GilGuard,
    foreign::{ForeignHeap, InMemoryHeap},
    runtime::{
        leak_detector,
        managed::{ManagedInstance, ManagedType},
        type_registry::ClassRegistry,
    },
};

#[derive(Debug)]
struct Session {
    user: &'static str,
}

fn bridge() -> (Rc<InMemoryHeap>, Bridge) {
    let heap = Rc::new(InMemoryHeap::new());
    let mut registry = ClassRegistry::new();
    registry.register_plain(ManagedType::of::<Session>());
    (heap.clone(), Bridge::new(heap, registry))
}

#[test]
fn save_then_load_leaves_refcount_unchanged() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    let wrapper = bridge.wrap(gil, ManagedInstance::new(Session { user: "ada" })).unwrap();
    let object = wrapper.object();
    let before = heap.refcount(gil, object);

    wrapper.on_save(gil, &bridge).unwrap();
    assert_eq!(heap.refcount(gil, object), before + 1);
    assert!(wrapper.tracking_handle().is_none());

    wrapper.on_load(gil, &bridge).unwrap();
    assert_eq!(heap.refcount(gil, object), before);
    assert!(wrapper.tracking_handle().is_some());
}

#[test]
fn saved_object_outlives_its_last_foreign_reference() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    let wrapper = bridge.wrap(gil, ManagedInstance::new(Session { user: "ada" })).unwrap();
    let object = wrapper.object();

    wrapper.on_save(gil, &bridge).unwrap();
    // The foreign side drops its reference while the save is in flight.
    heap.decref(gil, object);
    assert_eq!(heap.refcount(gil, object), 1);

    wrapper.on_load(gil, &bridge).unwrap();
    assert_eq!(heap.refcount(gil, object), 0);
    assert!(wrapper.tracking_handle().is_none());
    assert_eq!(bridge.live_handles(), 0);
}

#[test]
fn handle_is_stale_between_save_and_load() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (_heap, bridge) = bridge();
    let wrapper = bridge.wrap(gil, ManagedInstance::new(Session { user: "ada" })).unwrap();
    let old = wrapper.tracking_handle().unwrap();

    wrapper.on_save(gil, &bridge).unwrap();
    assert!(matches!(
        bridge.resolve(gil, wrapper.object()),
        Err(BridgeError::StaleHandle(_))
    ));

    wrapper.on_load(gil, &bridge).unwrap();
    let fresh = wrapper.tracking_handle().unwrap();
    assert_ne!(old, fresh);
    assert!(!bridge.is_live(gil, old));
    assert!(Rc::ptr_eq(&bridge.resolve(gil, wrapper.object()).unwrap(), &wrapper));
}

#[test]
fn wrappers_survive_heap_snapshot_and_tracking_reset() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();

    let saved = bridge.wrap(gil, ManagedInstance::new(Session { user: "ada" })).unwrap();
    let unsaved = bridge.wrap(gil, ManagedInstance::new(Session { user: "bob" })).unwrap();

    saved.on_save(gil, &bridge).unwrap();
    let image = heap.snapshot(gil).unwrap();
    heap.restore(gil, &image).unwrap();
    assert_eq!(bridge.reset_tracking(gil), 1);
    saved.on_load(gil, &bridge).unwrap();

    let session = bridge.instance_of(gil, saved.object()).unwrap();
    assert_eq!(session.downcast_ref::<Session>().unwrap().user, "ada");
    assert!(matches!(
        bridge.resolve(gil, unsaved.object()),
        Err(BridgeError::StaleHandle(_))
    ));
    assert_eq!(bridge.live_handles(), 1);
}

#[test]
fn counters_record_save_and_load() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (_heap, bridge) = bridge();
    let before = leak_detector::snapshot();

    let wrapper = bridge.wrap(gil, ManagedInstance::new(Session { user: "ada" })).unwrap();
    wrapper.on_save(gil, &bridge).unwrap();
    wrapper.on_load(gil, &bridge).unwrap();

    // Counters are process-wide and other tests run concurrently.
    let after = leak_detector::snapshot();
    assert!(after.wrappers > before.wrappers);
    assert!(after.saves > before.saves);
    assert!(after.loads > before.loads);
    assert!(after.handles_allocated >= before.handles_allocated + 2);
}
