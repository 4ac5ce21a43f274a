use std::rc::{Rc, Weak};

use gcbridge::{
    Bridge, BridgeConfig, BridgeError, ForeignError, Gil, GilGuard,
    foreign::{CompileMode, DeallocObserver, ForeignHeap, InMemoryHeap, ObjectId, TypeDescriptor, WordOffset},
    runtime::{module::ForeignModule, type_registry::ClassRegistry},
};

fn bridge() -> (Rc<InMemoryHeap>, Bridge) {
    let heap = Rc::new(InMemoryHeap::new());
    (heap.clone(), Bridge::new(heap, ClassRegistry::new()))
}

#[test]
fn create_registers_a_fresh_module_once() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();

    assert!(!ForeignModule::exists(gil, &bridge, "plugins"));
    let module = ForeignModule::create(gil, &bridge, "plugins", "synthetic")
        .unwrap()
        .into_module()
        .unwrap();
    assert!(ForeignModule::exists(gil, &bridge, "plugins"));

    assert_eq!(module.name(gil).unwrap(), "plugins");
    assert_eq!(module.get_str(gil, "__file__").unwrap().as_deref(), Some("synthetic"));
    assert_eq!(
        module.get(gil, "__builtins__").unwrap(),
        Some(heap.builtins(gil).unwrap())
    );
    insta::assert_snapshot!(module.keys(gil).unwrap().join(", "), @"__builtins__, __file__, __name__");

    let again = ForeignModule::create(gil, &bridge, "plugins", "elsewhere").unwrap();
    assert!(again.already_exists());
    assert_eq!(module.get_str(gil, "__file__").unwrap().as_deref(), Some("synthetic"));
}

#[test]
fn create_default_uses_configured_origin() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let heap = Rc::new(InMemoryHeap::new());
    let config = BridgeConfig::from_json_str(r#"{ "default_module_origin": "generated" }"#).unwrap();
    let bridge = Bridge::new(heap, ClassRegistry::new()).with_config(config);

    let module = ForeignModule::create_default(gil, &bridge, "gen")
        .unwrap()
        .into_module()
        .unwrap();
    assert_eq!(module.get_str(gil, "__file__").unwrap().as_deref(), Some("generated"));
}

#[test]
fn builtins_module_already_exists() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (_heap, bridge) = bridge();

    assert!(ForeignModule::exists(gil, &bridge, "builtins"));
    assert!(ForeignModule::create_default(gil, &bridge, "builtins").unwrap().already_exists());
}

#[test]
fn from_string_executes_source_as_a_module() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (_heap, bridge) = bridge();

    let code = "# settings\ngreeting = \"hello\"\nanswer = 42\nalias = greeting\n";
    let module = ForeignModule::from_string(gil, &bridge, "settings", code).unwrap();

    assert!(ForeignModule::exists(gil, &bridge, "settings"));
    assert_eq!(module.get_str(gil, "__file__").unwrap().as_deref(), Some("none"));
    assert_eq!(module.get_str(gil, "alias").unwrap().as_deref(), Some("hello"));
    insta::assert_snapshot!(
        module.keys(gil).unwrap().join(", "),
        @"__builtins__, __file__, __name__, alias, answer, greeting"
    );
}

#[test]
fn from_string_reports_syntax_errors() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (_heap, bridge) = bridge();

    let err = ForeignModule::from_string(gil, &bridge, "broken", "ok = 1\nthis is not valid\n").unwrap_err();
    assert!(matches!(err, BridgeError::Compile { ref name, .. } if name == "broken"));
    let foreign = err.foreign().unwrap();
    assert_eq!(foreign.kind, "SyntaxError");
    assert_eq!(foreign.message, "invalid syntax (none, line 2)");
    assert!(!ForeignModule::exists(gil, &bridge, "broken"));
}

#[test]
fn failed_execution_unregisters_the_module() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    let before = heap.live_count();

    let err = ForeignModule::from_string(gil, &bridge, "faulty", "x = 1\nraise setup failed\n").unwrap_err();
    assert!(matches!(err, BridgeError::Import { .. }));
    assert_eq!(err.foreign().unwrap().to_string(), "RuntimeError: setup failed");
    assert!(!ForeignModule::exists(gil, &bridge, "faulty"));
    assert_eq!(heap.live_count(), before);

    let err = ForeignModule::from_string(gil, &bridge, "faulty", "x = y\n").unwrap_err();
    assert_eq!(err.foreign().unwrap().message, "name 'y' is not defined");
}

#[test]
fn import_loads_registered_sources() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    heap.add_source("pkg.util", "version = \"1.0\"\n");
    heap.add_source("app", "import pkg.util as util\nname = \"app\"\n");

    let app = ForeignModule::import(gil, &bridge, "app").unwrap();
    assert!(ForeignModule::exists(gil, &bridge, "pkg.util"));
    assert_eq!(app.get_str(gil, "__file__").unwrap().as_deref(), Some("<source:app>"));

    let util = app.get(gil, "util").unwrap().unwrap();
    assert_eq!(heap.module_name(gil, util).unwrap(), "pkg.util");

    let again = ForeignModule::import(gil, &bridge, "app").unwrap();
    assert_eq!(again.object(), app.object());
}

#[test]
fn import_of_unknown_module_fails() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (_heap, bridge) = bridge();

    let err = ForeignModule::import(gil, &bridge, "missing").unwrap_err();
    assert!(matches!(err, BridgeError::Import { ref name, .. } if name == "missing"));
    assert_eq!(
        err.foreign().unwrap().to_string(),
        "ModuleNotFoundError: No module named 'missing'"
    );
}

#[test]
fn reload_reexecutes_into_the_same_module() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    heap.add_source("feature", "flag = \"off\"\nstale = 1\n");

    let module = ForeignModule::import(gil, &bridge, "feature").unwrap();
    heap.add_source("feature", "flag = \"on\"\n");
    let reloaded = module.reload(gil).unwrap();

    assert_eq!(reloaded.object(), module.object());
    assert_eq!(module.get_str(gil, "flag").unwrap().as_deref(), Some("on"));
    // Bindings the new source no longer assigns are kept.
    assert!(module.get(gil, "stale").unwrap().is_some());
}

#[test]
fn reload_without_source_fails() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (_heap, bridge) = bridge();

    let module = ForeignModule::from_string(gil, &bridge, "scratch", "x = 1\n").unwrap();
    let err = module.reload(gil).unwrap_err();
    assert!(matches!(err, BridgeError::Reload { ref name, .. } if name == "scratch"));
    assert_eq!(err.foreign().unwrap().kind, "ModuleNotFoundError");
}

#[test]
fn reload_of_unregistered_module_fails() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    heap.add_source("orphan", "x = 1\n");

    let module = ForeignModule::import(gil, &bridge, "orphan").unwrap();
    let registry = heap.module_registry(gil);
    let placeholder = heap.new_str(gil, "placeholder").unwrap();
    heap.dict_set_item(gil, registry, "orphan", placeholder).unwrap();

    let err = module.reload(gil).unwrap_err();
    assert_eq!(
        err.foreign().unwrap().to_string(),
        "ImportError: module orphan not in sys.modules"
    );
}

#[test]
fn create_surfaces_allocation_failures() {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let (heap, bridge) = bridge();
    heap.set_max_objects(Some(heap.live_count()));

    let err = ForeignModule::create_default(gil, &bridge, "late").unwrap_err();
    assert!(matches!(err, BridgeError::Allocation { ref type_name, .. } if type_name == "module"));
    assert!(!ForeignModule::exists(gil, &bridge, "late"));
}

/// Delegates to an in-memory heap but refuses dict writes under one key.
struct RejectingHeap {
    inner: InMemoryHeap,
    rejected_key: &'static str,
}

impl ForeignHeap for RejectingHeap {
    fn alloc_instance(&self, gil: Gil<'_>, ty: &TypeDescriptor) -> Result<ObjectId, ForeignError> {
        self.inner.alloc_instance(gil, ty)
    }

    fn type_of(&self, gil: Gil<'_>, obj: ObjectId) -> Result<TypeDescriptor, ForeignError> {
        self.inner.type_of(gil, obj)
    }

    fn read_word(&self, gil: Gil<'_>, obj: ObjectId, offset: WordOffset) -> Result<u64, ForeignError> {
        self.inner.read_word(gil, obj, offset)
    }

    fn write_word(&self, gil: Gil<'_>, obj: ObjectId, offset: WordOffset, word: u64) -> Result<(), ForeignError> {
        self.inner.write_word(gil, obj, offset, word)
    }

    fn incref(&self, gil: Gil<'_>, obj: ObjectId) {
        self.inner.incref(gil, obj)
    }

    fn decref(&self, gil: Gil<'_>, obj: ObjectId) {
        self.inner.decref(gil, obj)
    }

    fn set_dealloc_observer(&self, observer: Weak<dyn DeallocObserver>) {
        self.inner.set_dealloc_observer(observer)
    }

    fn refcount(&self, gil: Gil<'_>, obj: ObjectId) -> usize {
        self.inner.refcount(gil, obj)
    }

    fn new_str(&self, gil: Gil<'_>, text: &str) -> Result<ObjectId, ForeignError> {
        self.inner.new_str(gil, text)
    }

    fn new_tuple(&self, gil: Gil<'_>, items: &[ObjectId]) -> Result<ObjectId, ForeignError> {
        self.inner.new_tuple(gil, items)
    }

    fn str_value(&self, gil: Gil<'_>, obj: ObjectId) -> Option<String> {
        self.inner.str_value(gil, obj)
    }

    fn repr(&self, gil: Gil<'_>, obj: ObjectId) -> String {
        self.inner.repr(gil, obj)
    }

    fn new_dict(&self, gil: Gil<'_>) -> Result<ObjectId, ForeignError> {
        self.inner.new_dict(gil)
    }

    fn dict_get_item(&self, gil: Gil<'_>, dict: ObjectId, key: &str) -> Option<ObjectId> {
        self.inner.dict_get_item(gil, dict, key)
    }

    fn dict_set_item(&self, gil: Gil<'_>, dict: ObjectId, key: &str, value: ObjectId) -> Result<(), ForeignError> {
        if key == self.rejected_key {
            return Err(ForeignError::memory(format!("cannot store '{key}'")));
        }
        self.inner.dict_set_item(gil, dict, key, value)
    }

    fn dict_keys(&self, gil: Gil<'_>, dict: ObjectId) -> Vec<String> {
        self.inner.dict_keys(gil, dict)
    }

    fn module_registry(&self, gil: Gil<'_>) -> ObjectId {
        self.inner.module_registry(gil)
    }

    fn builtins(&self, gil: Gil<'_>) -> Result<ObjectId, ForeignError> {
        self.inner.builtins(gil)
    }

    fn module_new(&self, gil: Gil<'_>, name: &str) -> Result<ObjectId, ForeignError> {
        self.inner.module_new(gil, name)
    }

    fn module_dict(&self, gil: Gil<'_>, module: ObjectId) -> Result<ObjectId, ForeignError> {
        self.inner.module_dict(gil, module)
    }

    fn module_name(&self, gil: Gil<'_>, module: ObjectId) -> Result<String, ForeignError> {
        self.inner.module_name(gil, module)
    }

    fn compile(&self, gil: Gil<'_>, source: &str, filename: &str, mode: CompileMode) -> Result<ObjectId, ForeignError> {
        self.inner.compile(gil, source, filename, mode)
    }

    fn exec_code_module(&self, gil: Gil<'_>, name: &str, code: ObjectId) -> Result<ObjectId, ForeignError> {
        self.inner.exec_code_module(gil, name, code)
    }

    fn import_module(&self, gil: Gil<'_>, name: &str) -> Result<ObjectId, ForeignError> {
        self.inner.import_module(gil, name)
    }

    fn reload_module(&self, gil: Gil<'_>, module: ObjectId) -> Result<ObjectId, ForeignError> {
        self.inner.reload_module(gil, module)
    }
}

fn create_with_rejected_key(rejected_key: &'static str) -> (BridgeError, bool, usize, usize) {
    let guard = GilGuard::acquire();
    let gil = guard.token();
    let heap = Rc::new(RejectingHeap {
        inner: InMemoryHeap::new(),
        rejected_key,
    });
    let bridge = Bridge::new(heap.clone(), ClassRegistry::new());
    let before = heap.inner.live_count();

    let err = ForeignModule::create(gil, &bridge, "plugins", "synthetic").unwrap_err();
    let registered = ForeignModule::exists(gil, &bridge, "plugins");
    (err, registered, before, heap.inner.live_count())
}

#[test]
fn rejected_file_write_frees_the_module() {
    let (err, registered, before, after) = create_with_rejected_key("__file__");

    assert!(matches!(err, BridgeError::RegistryWrite { ref key, .. } if key == "__file__"));
    insta::assert_snapshot!(err.to_string(), @"foreign registry rejected write of `__file__`");
    assert_eq!(err.foreign().unwrap().kind, "MemoryError");
    assert!(!registered);
    assert_eq!(after, before);
}

#[test]
fn rejected_registry_write_frees_the_module() {
    let (err, registered, before, after) = create_with_rejected_key("plugins");

    assert!(matches!(err, BridgeError::RegistryWrite { ref key, .. } if key == "plugins"));
    assert_eq!(err.foreign().unwrap().message, "cannot store 'plugins'");
    assert!(!registered);
    assert_eq!(after, before);
}
