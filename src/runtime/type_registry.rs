use std::{any::TypeId, collections::HashMap};

use crate::{
    foreign::{TypeBuilder, TypeDescriptor},
    runtime::managed::ManagedType,
};

/// Maps managed types to the foreign shape their wrappers are allocated as.
pub trait TypeRegistry {
    fn descriptor_for(&self, ty: ManagedType) -> Option<TypeDescriptor>;

    /// Whether instances of `descriptor` carry a per-instance dict.
    fn supports_instance_dict(&self, descriptor: &TypeDescriptor) -> bool {
        descriptor.is_subclass()
    }
}

/// In-memory registry keyed by the managed type's `TypeId`.
#[derive(Default)]
pub struct ClassRegistry {
    classes: HashMap<TypeId, TypeDescriptor>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ty: ManagedType, descriptor: TypeDescriptor) -> Option<TypeDescriptor> {
        self.classes.insert(ty.id(), descriptor)
    }

    /// Registers `ty` under a plain descriptor named after its short type name.
    pub fn register_plain(&mut self, ty: ManagedType) -> TypeDescriptor {
        let descriptor = TypeBuilder::new(short_name(ty.name())).build();
        self.classes.insert(ty.id(), descriptor.clone());
        descriptor
    }

    /// Registers an error type with the exception layout.
    pub fn register_exception(&mut self, ty: ManagedType) -> TypeDescriptor {
        let descriptor = TypeBuilder::new(short_name(ty.name())).exception().build();
        self.classes.insert(ty.id(), descriptor.clone());
        descriptor
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl TypeRegistry for ClassRegistry {
    fn descriptor_for(&self, ty: ManagedType) -> Option<TypeDescriptor> {
        self.classes.get(&ty.id()).cloned()
    }
}

/// `my_crate::widgets::Widget<u8>` -> `Widget<u8>`.
fn short_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}
