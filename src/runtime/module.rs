use tracing::info;

use crate::{
    error::{BridgeError, ForeignError},
    foreign::{CompileMode, ObjectId, OwnedRef},
    runtime::{bridge::Bridge, gil::Gil},
};

/// Filename given to source compiled by [`ForeignModule::from_string`].
const STRING_SOURCE_FILENAME: &str = "none";

/// A module object on the foreign heap.
#[derive(Debug)]
pub struct ForeignModule {
    module: OwnedRef,
}

/// Result of [`ForeignModule::create`].
#[derive(Debug)]
pub enum CreateOutcome {
    Created(ForeignModule),
    /// A module of that name is already registered; nothing was changed.
    AlreadyExists,
}

impl CreateOutcome {
    pub fn into_module(self) -> Option<ForeignModule> {
        match self {
            CreateOutcome::Created(module) => Some(module),
            CreateOutcome::AlreadyExists => None,
        }
    }

    pub fn already_exists(&self) -> bool {
        matches!(self, CreateOutcome::AlreadyExists)
    }
}

impl ForeignModule {
    /// Imports `name`, executing it if it is not loaded yet.
    pub fn import(gil: Gil<'_>, bridge: &Bridge, name: &str) -> Result<Self, BridgeError> {
        let heap = bridge.heap();
        let module = heap
            .import_module(gil, name)
            .map_err(|source| BridgeError::Import {
                name: name.to_string(),
                source,
            })?;
        info!(module = name, "imported module");
        Ok(Self {
            module: OwnedRef::steal(heap, module),
        })
    }

    /// Re-executes the module and returns the refreshed module object.
    pub fn reload(&self, gil: Gil<'_>) -> Result<Self, BridgeError> {
        let heap = self.module.heap();
        let name = heap
            .module_name(gil, self.module.object())
            .map_err(BridgeError::SlotAccess)?;
        let module = heap
            .reload_module(gil, self.module.object())
            .map_err(|source| BridgeError::Reload {
                name: name.clone(),
                source,
            })?;
        info!(module = %name, "reloaded module");
        Ok(Self {
            module: OwnedRef::steal(heap, module),
        })
    }

    /// Compiles `code` as a whole file and executes it as module `name`.
    pub fn from_string(gil: Gil<'_>, bridge: &Bridge, name: &str, code: &str) -> Result<Self, BridgeError> {
        let heap = bridge.heap();
        let compiled = heap
            .compile(gil, code, STRING_SOURCE_FILENAME, CompileMode::File)
            .map_err(|source| BridgeError::Compile {
                name: name.to_string(),
                source,
            })?;
        let compiled = OwnedRef::steal(heap, compiled);
        let module = heap
            .exec_code_module(gil, name, compiled.object())
            .map_err(|source| BridgeError::Import {
                name: name.to_string(),
                source,
            });
        compiled.release(gil);
        Ok(Self {
            module: OwnedRef::steal(heap, module?),
        })
    }

    /// Whether `name` is in the module registry. Pure query.
    pub fn exists(gil: Gil<'_>, bridge: &Bridge, name: &str) -> bool {
        let heap = bridge.heap();
        let registry = heap.module_registry(gil);
        heap.dict_get_item(gil, registry, name).is_some()
    }

    /// Creates an empty module with `__builtins__` and `__file__` set and
    /// registers it under `name`, unless `name` is already registered.
    pub fn create(
        gil: Gil<'_>,
        bridge: &Bridge,
        name: &str,
        origin: &str,
    ) -> Result<CreateOutcome, BridgeError> {
        if Self::exists(gil, bridge, name) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        let heap = bridge.heap();
        let module = heap
            .module_new(gil, name)
            .map_err(|source| BridgeError::Allocation {
                type_name: "module".to_string(),
                source,
            })?;
        let module = OwnedRef::steal(heap, module);

        let registry_write = |key: &str| {
            let key = key.to_string();
            move |source: ForeignError| BridgeError::RegistryWrite { key, source }
        };

        let globals = heap
            .module_dict(gil, module.object())
            .map_err(registry_write("__dict__"))?;
        let builtins = heap.builtins(gil).map_err(registry_write("__builtins__"))?;
        heap.dict_set_item(gil, globals, "__builtins__", builtins)
            .map_err(registry_write("__builtins__"))?;

        let file = heap
            .new_str(gil, origin)
            .map_err(|source| BridgeError::Allocation {
                type_name: "str".to_string(),
                source,
            })?;
        let file = OwnedRef::steal(heap, file);
        heap.dict_set_item(gil, globals, "__file__", file.object())
            .map_err(registry_write("__file__"))?;
        file.release(gil);

        let registry = heap.module_registry(gil);
        heap.dict_set_item(gil, registry, name, module.object())
            .map_err(registry_write(name))?;

        info!(module = name, origin, "created module");
        Ok(CreateOutcome::Created(Self { module }))
    }

    /// [`ForeignModule::create`] with the configured default origin label.
    pub fn create_default(gil: Gil<'_>, bridge: &Bridge, name: &str) -> Result<CreateOutcome, BridgeError> {
        let origin = bridge.config().default_module_origin.clone();
        Self::create(gil, bridge, name, &origin)
    }

    pub fn object(&self) -> ObjectId {
        self.module.object()
    }

    pub fn name(&self, gil: Gil<'_>) -> Result<String, BridgeError> {
        self.module
            .heap()
            .module_name(gil, self.module.object())
            .map_err(BridgeError::SlotAccess)
    }

    /// Borrowed reference to the module globals.
    pub fn globals(&self, gil: Gil<'_>) -> Result<ObjectId, BridgeError> {
        self.module
            .heap()
            .module_dict(gil, self.module.object())
            .map_err(BridgeError::SlotAccess)
    }

    /// Borrowed reference to global `key`, if bound.
    pub fn get(&self, gil: Gil<'_>, key: &str) -> Result<Option<ObjectId>, BridgeError> {
        let globals = self.globals(gil)?;
        Ok(self.module.heap().dict_get_item(gil, globals, key))
    }

    /// Global `key` if it is bound to a string.
    pub fn get_str(&self, gil: Gil<'_>, key: &str) -> Result<Option<String>, BridgeError> {
        Ok(self
            .get(gil, key)?
            .and_then(|value| self.module.heap().str_value(gil, value)))
    }

    /// Sorted global names.
    pub fn keys(&self, gil: Gil<'_>) -> Result<Vec<String>, BridgeError> {
        let globals = self.globals(gil)?;
        Ok(self.module.heap().dict_keys(gil, globals))
    }
}
