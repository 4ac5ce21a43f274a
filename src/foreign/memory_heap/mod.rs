//! A complete foreign runtime living in process memory.
//!
//! Refcounted arena with free-list reuse, string-keyed dicts, a module
//! registry pre-populated with `builtins`, and a source finder that backs
//! import and reload. Used by tests, benches and the CLI.

pub mod heap_object;
pub mod snapshot;
pub mod source;

use std::{
    cell::RefCell,
    collections::BTreeMap,
    mem,
    rc::Weak,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::HeapConfig,
    error::{BridgeError, ForeignError},
    foreign::{
        CompileMode, DeallocObserver, ForeignHeap, FreedInstance, ObjectId, TypeDescriptor, WordOffset,
    },
    runtime::gil::Gil,
};

use heap_object::{ForeignData, HeapEntry};
use snapshot::SavedHeap;
use source::{Expr, Statement};

const BUILTINS: &str = "builtins";
const IMMORTAL: usize = usize::MAX / 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct HeapState {
    entries: Vec<Option<HeapEntry>>,
    free_list: Vec<u32>,
    live: usize,
    max_objects: Option<usize>,
    none: ObjectId,
    modules: ObjectId,
    builtins: ObjectId,
    sources: BTreeMap<String, String>,
    /// Instances freed since the observer was last notified.
    #[serde(skip)]
    freed: Vec<FreedInstance>,
}

impl HeapState {
    fn new(max_objects: Option<usize>) -> Self {
        let mut state = HeapState {
            entries: Vec::new(),
            free_list: Vec::new(),
            live: 0,
            max_objects: None,
            none: ObjectId(0),
            modules: ObjectId(0),
            builtins: ObjectId(0),
            sources: BTreeMap::new(),
            freed: Vec::new(),
        };

        // Bootstrap objects are created before the ceiling applies, so these
        // allocations cannot fail.
        state.none = state.push(ForeignData::None);
        state.entry_mut(state.none).refcount = IMMORTAL;
        state.modules = state.push(ForeignData::Dict(BTreeMap::new()));
        let builtins_dict = state.push(ForeignData::Dict(BTreeMap::new()));
        state.builtins = state.push(ForeignData::Module {
            name: BUILTINS.to_string(),
            dict: builtins_dict,
        });
        let name = state.push(ForeignData::Str(BUILTINS.to_string()));
        state.dict_insert(builtins_dict, "__name__", name);
        state.incref(state.builtins);
        state.dict_insert(state.modules, BUILTINS, state.builtins);

        state.max_objects = max_objects;
        state
    }

    fn push(&mut self, data: ForeignData) -> ObjectId {
        let entry = HeapEntry { refcount: 1, data };
        self.live += 1;
        if let Some(idx) = self.free_list.pop() {
            self.entries[idx as usize] = Some(entry);
            ObjectId(idx)
        } else {
            let idx = self.entries.len() as u32;
            self.entries.push(Some(entry));
            ObjectId(idx)
        }
    }

    fn alloc(&mut self, data: ForeignData) -> Result<ObjectId, ForeignError> {
        if let Some(limit) = self.max_objects {
            if self.live >= limit {
                return Err(ForeignError::memory(format!(
                    "foreign heap limit of {limit} objects reached"
                )));
            }
        }
        Ok(self.push(data))
    }

    fn entry(&self, obj: ObjectId) -> Result<&HeapEntry, ForeignError> {
        self.entries
            .get(obj.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| ForeignError::system(format!("dead object #{}", obj.0)))
    }

    fn entry_mut(&mut self, obj: ObjectId) -> &mut HeapEntry {
        self.entries[obj.0 as usize]
            .as_mut()
            .expect("HeapState::entry_mut: invalid or free object")
    }

    fn data(&self, obj: ObjectId) -> Result<&ForeignData, ForeignError> {
        self.entry(obj).map(|entry| &entry.data)
    }

    fn incref(&mut self, obj: ObjectId) {
        if let Some(Some(entry)) = self.entries.get_mut(obj.0 as usize) {
            entry.refcount += 1;
        }
    }

    fn decref(&mut self, obj: ObjectId) {
        let mut worklist = vec![obj];

        while let Some(id) = worklist.pop() {
            let Some(Some(entry)) = self.entries.get_mut(id.0 as usize) else {
                continue;
            };
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount > 0 {
                continue;
            }

            // Release children after the slot is freed so cycles terminate.
            if let Some(entry) = self.entries[id.0 as usize].take() {
                entry.data.owned_refs(&mut worklist);
                self.free_list.push(id.0);
                self.live -= 1;
                if let ForeignData::Instance { ty, words } = entry.data {
                    self.freed.push(FreedInstance { object: id, ty, words });
                }
            }
        }
    }

    fn instance_words(&mut self, obj: ObjectId) -> Result<&mut Vec<u64>, ForeignError> {
        match self.entries.get_mut(obj.0 as usize).and_then(Option::as_mut) {
            Some(HeapEntry {
                data: ForeignData::Instance { words, .. },
                ..
            }) => Ok(words),
            Some(entry) => Err(ForeignError::type_error(format!(
                "'{}' object has no slots",
                entry.data.type_name()
            ))),
            None => Err(ForeignError::system(format!("dead object #{}", obj.0))),
        }
    }

    fn dict_map(&mut self, dict: ObjectId) -> Result<&mut BTreeMap<String, ObjectId>, ForeignError> {
        match self.entries.get_mut(dict.0 as usize).and_then(Option::as_mut) {
            Some(HeapEntry {
                data: ForeignData::Dict(map),
                ..
            }) => Ok(map),
            Some(entry) => Err(ForeignError::type_error(format!(
                "expected dict, got '{}'",
                entry.data.type_name()
            ))),
            None => Err(ForeignError::system(format!("dead object #{}", dict.0))),
        }
    }

    fn dict_get(&self, dict: ObjectId, key: &str) -> Option<ObjectId> {
        match self.data(dict) {
            Ok(ForeignData::Dict(map)) => map.get(key).copied(),
            _ => None,
        }
    }

    /// Stores `value` under `key`, stealing the caller's reference.
    fn dict_insert(&mut self, dict: ObjectId, key: &str, value: ObjectId) {
        if let Ok(map) = self.dict_map(dict) {
            if let Some(old) = map.insert(key.to_string(), value) {
                self.decref(old);
            }
        }
    }

    fn dict_set(&mut self, dict: ObjectId, key: &str, value: ObjectId) -> Result<(), ForeignError> {
        self.entry(value)?;
        self.dict_map(dict)?;
        self.incref(value);
        self.dict_insert(dict, key, value);
        Ok(())
    }

    fn dict_remove(&mut self, dict: ObjectId, key: &str) {
        if let Ok(map) = self.dict_map(dict) {
            if let Some(old) = map.remove(key) {
                self.decref(old);
            }
        }
    }

    fn module_dict(&self, module: ObjectId) -> Result<ObjectId, ForeignError> {
        match self.data(module)? {
            ForeignData::Module { dict, .. } => Ok(*dict),
            other => Err(ForeignError::type_error(format!(
                "expected module, got '{}'",
                other.type_name()
            ))),
        }
    }

    fn module_name(&self, module: ObjectId) -> Result<String, ForeignError> {
        match self.data(module)? {
            ForeignData::Module { name, .. } => Ok(name.clone()),
            other => Err(ForeignError::type_error(format!(
                "expected module, got '{}'",
                other.type_name()
            ))),
        }
    }

    fn new_str(&mut self, text: &str) -> Result<ObjectId, ForeignError> {
        self.alloc(ForeignData::Str(text.to_string()))
    }

    fn module_new(&mut self, name: &str) -> Result<ObjectId, ForeignError> {
        let dict = self.alloc(ForeignData::Dict(BTreeMap::new()))?;
        let module = match self.alloc(ForeignData::Module {
            name: name.to_string(),
            dict,
        }) {
            Ok(module) => module,
            Err(err) => {
                self.decref(dict);
                return Err(err);
            }
        };
        let name_obj = match self.new_str(name) {
            Ok(name_obj) => name_obj,
            Err(err) => {
                self.decref(module);
                return Err(err);
            }
        };
        self.dict_insert(dict, "__name__", name_obj);
        Ok(module)
    }

    fn exec_code_module(&mut self, name: &str, code: ObjectId) -> Result<ObjectId, ForeignError> {
        let (filename, body) = match self.data(code)? {
            ForeignData::Code { filename, body } => (filename.clone(), body.clone()),
            other => {
                return Err(ForeignError::type_error(format!(
                    "expected code, got '{}'",
                    other.type_name()
                )));
            }
        };

        let module = match self.dict_get(self.modules, name) {
            Some(existing) => {
                self.incref(existing);
                existing
            }
            None => {
                let module = self.module_new(name)?;
                if let Err(err) = self.dict_set(self.modules, name, module) {
                    self.decref(module);
                    return Err(err);
                }
                module
            }
        };

        let result = self.exec_in_module(module, &filename, &body);
        if let Err(err) = result {
            self.dict_remove(self.modules, name);
            self.decref(module);
            return Err(err);
        }
        Ok(module)
    }

    fn exec_in_module(
        &mut self,
        module: ObjectId,
        filename: &str,
        body: &[Statement],
    ) -> Result<(), ForeignError> {
        let globals = self.module_dict(module)?;

        if self.dict_get(globals, "__builtins__").is_none() {
            let builtins = self.module_dict(self.builtins)?;
            self.dict_set(globals, "__builtins__", builtins)?;
        }
        let file = self.new_str(filename)?;
        self.dict_insert(globals, "__file__", file);

        for statement in body {
            match statement {
                Statement::Assign { target, value } => {
                    let value = self.eval(globals, value)?;
                    self.dict_insert(globals, target, value);
                }
                Statement::Import { module, alias } => {
                    let imported = self.import_module(module)?;
                    let binding = Statement::import_binding(module, alias.as_deref());
                    self.dict_insert(globals, &binding, imported);
                }
                Statement::Raise { message } => {
                    return Err(ForeignError::new("RuntimeError", message.clone()));
                }
            }
        }
        Ok(())
    }

    /// Evaluates to a new reference.
    fn eval(&mut self, globals: ObjectId, expr: &Expr) -> Result<ObjectId, ForeignError> {
        match expr {
            Expr::None => {
                self.incref(self.none);
                Ok(self.none)
            }
            Expr::Str(text) => self.new_str(text),
            Expr::Int(n) => self.alloc(ForeignData::Int(*n)),
            Expr::Name(name) => {
                let value = self
                    .dict_get(globals, name)
                    .ok_or_else(|| ForeignError::new("NameError", format!("name '{name}' is not defined")))?;
                self.incref(value);
                Ok(value)
            }
        }
    }

    fn compile(&mut self, text: &str, filename: &str, mode: CompileMode) -> Result<ObjectId, ForeignError> {
        let body = source::compile(text, filename, mode)?;
        self.alloc(ForeignData::Code {
            filename: filename.to_string(),
            body,
        })
    }

    fn import_module(&mut self, name: &str) -> Result<ObjectId, ForeignError> {
        if let Some(existing) = self.dict_get(self.modules, name) {
            self.incref(existing);
            return Ok(existing);
        }

        let text = self
            .sources
            .get(name)
            .cloned()
            .ok_or_else(|| ForeignError::new("ModuleNotFoundError", format!("No module named '{name}'")))?;
        let code = self.compile(&text, &source_filename(name), CompileMode::File)?;
        let result = self.exec_code_module(name, code);
        self.decref(code);
        result
    }

    fn reload_module(&mut self, module: ObjectId) -> Result<ObjectId, ForeignError> {
        let name = self.module_name(module)?;
        if self.dict_get(self.modules, &name) != Some(module) {
            return Err(ForeignError::new(
                "ImportError",
                format!("module {name} not in sys.modules"),
            ));
        }
        let text = self.sources.get(&name).cloned().ok_or_else(|| {
            ForeignError::new(
                "ModuleNotFoundError",
                format!("spec not found for the module '{name}'"),
            )
        })?;

        let body = source::compile(&text, &source_filename(&name), CompileMode::File)?;
        self.exec_in_module(module, &source_filename(&name), &body)?;
        self.incref(module);
        Ok(module)
    }

    /// Rejects images whose instances do not match their type's layout.
    pub(crate) fn check_layouts(&self) -> Result<(), BridgeError> {
        for (idx, entry) in self.entries.iter().enumerate() {
            if let Some(HeapEntry {
                data: ForeignData::Instance { ty, words },
                ..
            }) = entry
            {
                if words.len() != ty.basic_size() {
                    return Err(BridgeError::CorruptSnapshot(format!(
                        "object #{idx} of type '{}' has {} words, expected {}",
                        ty.name(),
                        words.len(),
                        ty.basic_size()
                    )));
                }
            }
        }
        Ok(())
    }

    fn repr(&self, obj: ObjectId) -> String {
        let Ok(data) = self.data(obj) else {
            return format!("<dead object #{}>", obj.0);
        };
        match data {
            ForeignData::None => "None".to_string(),
            ForeignData::Int(n) => n.to_string(),
            ForeignData::Str(text) => format!("{text:?}"),
            ForeignData::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|item| self.repr(*item)).collect();
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            ForeignData::Dict(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(key, value)| format!("{key:?}: {}", self.repr(*value)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            ForeignData::Instance { ty, .. } => format!("<{} object #{}>", ty.name(), obj.0),
            ForeignData::Module { name, .. } => format!("<module '{name}'>"),
            ForeignData::Code { filename, .. } => format!("<code object from '{filename}'>"),
        }
    }
}

fn source_filename(name: &str) -> String {
    format!("<source:{name}>")
}

/// In-process implementation of [`ForeignHeap`].
pub struct InMemoryHeap {
    state: RefCell<HeapState>,
    observer: RefCell<Option<Weak<dyn DeallocObserver>>>,
}

impl Default for InMemoryHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHeap {
    pub fn new() -> Self {
        Self::with_config(&HeapConfig::default())
    }

    pub fn with_config(config: &HeapConfig) -> Self {
        Self {
            state: RefCell::new(HeapState::new(config.max_objects)),
            observer: RefCell::new(None),
        }
    }

    /// Runs a mutation that may free objects, then reports freed instances
    /// once the state borrow is released.
    fn mutate<T>(&self, gil: Gil<'_>, f: impl FnOnce(&mut HeapState) -> T) -> T {
        let out = f(&mut self.state.borrow_mut());
        self.notify_freed(gil);
        out
    }

    fn notify_freed(&self, gil: Gil<'_>) {
        let freed = mem::take(&mut self.state.borrow_mut().freed);
        if freed.is_empty() {
            return;
        }
        let observer = self.observer.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(observer) = observer {
            for instance in &freed {
                observer.instance_freed(gil, instance);
            }
        }
    }

    /// Makes `name` importable from `text`.
    pub fn add_source(&self, name: impl Into<String>, text: impl Into<String>) {
        self.state.borrow_mut().sources.insert(name.into(), text.into());
    }

    pub fn set_max_objects(&self, max_objects: Option<usize>) {
        self.state.borrow_mut().max_objects = max_objects;
    }

    /// Number of live objects, bootstrap objects included.
    pub fn live_count(&self) -> usize {
        self.state.borrow().live
    }

    /// Seals the whole heap into an image at a save boundary.
    pub fn snapshot(&self, _gil: Gil<'_>) -> Result<SavedHeap, BridgeError> {
        let state = self.state.borrow();
        let saved = SavedHeap::seal(&state)?;
        debug!(objects = state.live, bytes = saved.image().len(), "sealed heap snapshot");
        Ok(saved)
    }

    /// Replaces the heap contents with a sealed image. Object identities in
    /// the image are preserved.
    pub fn restore(&self, _gil: Gil<'_>, saved: &SavedHeap) -> Result<(), BridgeError> {
        let restored = saved.open()?;
        restored.check_layouts()?;
        debug!(objects = restored.live, "restored heap snapshot");
        *self.state.borrow_mut() = restored;
        Ok(())
    }
}

impl ForeignHeap for InMemoryHeap {
    fn alloc_instance(&self, _gil: Gil<'_>, ty: &TypeDescriptor) -> Result<ObjectId, ForeignError> {
        self.state.borrow_mut().alloc(ForeignData::Instance {
            ty: ty.clone(),
            words: vec![0; ty.basic_size()],
        })
    }

    fn type_of(&self, _gil: Gil<'_>, obj: ObjectId) -> Result<TypeDescriptor, ForeignError> {
        match self.state.borrow().data(obj)? {
            ForeignData::Instance { ty, .. } => Ok(ty.clone()),
            other => Err(ForeignError::type_error(format!(
                "'{}' is not a bridged type",
                other.type_name()
            ))),
        }
    }

    fn read_word(&self, _gil: Gil<'_>, obj: ObjectId, offset: WordOffset) -> Result<u64, ForeignError> {
        let mut state = self.state.borrow_mut();
        let words = state.instance_words(obj)?;
        words
            .get(offset.get())
            .copied()
            .ok_or_else(|| ForeignError::system(format!("slot {} out of range", offset.get())))
    }

    fn write_word(
        &self,
        _gil: Gil<'_>,
        obj: ObjectId,
        offset: WordOffset,
        word: u64,
    ) -> Result<(), ForeignError> {
        let mut state = self.state.borrow_mut();
        let words = state.instance_words(obj)?;
        let slot = words
            .get_mut(offset.get())
            .ok_or_else(|| ForeignError::system(format!("slot {} out of range", offset.get())))?;
        *slot = word;
        Ok(())
    }

    fn incref(&self, _gil: Gil<'_>, obj: ObjectId) {
        self.state.borrow_mut().incref(obj);
    }

    fn decref(&self, gil: Gil<'_>, obj: ObjectId) {
        self.mutate(gil, |state| state.decref(obj));
    }

    fn set_dealloc_observer(&self, observer: Weak<dyn DeallocObserver>) {
        *self.observer.borrow_mut() = Some(observer);
    }

    fn refcount(&self, _gil: Gil<'_>, obj: ObjectId) -> usize {
        self.state
            .borrow()
            .entry(obj)
            .map(|entry| entry.refcount)
            .unwrap_or(0)
    }

    fn new_str(&self, _gil: Gil<'_>, text: &str) -> Result<ObjectId, ForeignError> {
        self.state.borrow_mut().new_str(text)
    }

    fn new_tuple(&self, _gil: Gil<'_>, items: &[ObjectId]) -> Result<ObjectId, ForeignError> {
        let mut state = self.state.borrow_mut();
        for item in items {
            state.entry(*item)?;
        }
        let tuple = state.alloc(ForeignData::Tuple(items.to_vec()))?;
        for item in items {
            state.incref(*item);
        }
        Ok(tuple)
    }

    fn str_value(&self, _gil: Gil<'_>, obj: ObjectId) -> Option<String> {
        match self.state.borrow().data(obj) {
            Ok(ForeignData::Str(text)) => Some(text.clone()),
            _ => None,
        }
    }

    fn repr(&self, _gil: Gil<'_>, obj: ObjectId) -> String {
        self.state.borrow().repr(obj)
    }

    fn new_dict(&self, _gil: Gil<'_>) -> Result<ObjectId, ForeignError> {
        self.state.borrow_mut().alloc(ForeignData::Dict(BTreeMap::new()))
    }

    fn dict_get_item(&self, _gil: Gil<'_>, dict: ObjectId, key: &str) -> Option<ObjectId> {
        self.state.borrow().dict_get(dict, key)
    }

    fn dict_set_item(
        &self,
        gil: Gil<'_>,
        dict: ObjectId,
        key: &str,
        value: ObjectId,
    ) -> Result<(), ForeignError> {
        self.mutate(gil, |state| state.dict_set(dict, key, value))
    }

    fn dict_keys(&self, _gil: Gil<'_>, dict: ObjectId) -> Vec<String> {
        match self.state.borrow().data(dict) {
            Ok(ForeignData::Dict(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn module_registry(&self, _gil: Gil<'_>) -> ObjectId {
        self.state.borrow().modules
    }

    fn builtins(&self, _gil: Gil<'_>) -> Result<ObjectId, ForeignError> {
        let state = self.state.borrow();
        state.module_dict(state.builtins)
    }

    fn module_new(&self, gil: Gil<'_>, name: &str) -> Result<ObjectId, ForeignError> {
        self.mutate(gil, |state| state.module_new(name))
    }

    fn module_dict(&self, _gil: Gil<'_>, module: ObjectId) -> Result<ObjectId, ForeignError> {
        self.state.borrow().module_dict(module)
    }

    fn module_name(&self, _gil: Gil<'_>, module: ObjectId) -> Result<String, ForeignError> {
        self.state.borrow().module_name(module)
    }

    fn compile(
        &self,
        _gil: Gil<'_>,
        source: &str,
        filename: &str,
        mode: CompileMode,
    ) -> Result<ObjectId, ForeignError> {
        self.state.borrow_mut().compile(source, filename, mode)
    }

    fn exec_code_module(&self, gil: Gil<'_>, name: &str, code: ObjectId) -> Result<ObjectId, ForeignError> {
        self.mutate(gil, |state| state.exec_code_module(name, code))
    }

    fn import_module(&self, gil: Gil<'_>, name: &str) -> Result<ObjectId, ForeignError> {
        self.mutate(gil, |state| state.import_module(name))
    }

    fn reload_module(&self, gil: Gil<'_>, module: ObjectId) -> Result<ObjectId, ForeignError> {
        self.mutate(gil, |state| state.reload_module(module))
    }
}
