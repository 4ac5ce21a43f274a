use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::foreign::{ObjectId, TypeDescriptor, memory_heap::source::Statement};

/// Objects that live on the in-memory foreign heap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ForeignData {
    None,
    Int(i64),
    Str(String),
    Tuple(Vec<ObjectId>),
    /// String-keyed dict. Values are owned references.
    Dict(BTreeMap<String, ObjectId>),
    /// Instance of a bridged type: raw slot words laid out by `ty`.
    Instance { ty: TypeDescriptor, words: Vec<u64> },
    Module { name: String, dict: ObjectId },
    Code { filename: String, body: Vec<Statement> },
}

impl ForeignData {
    pub fn type_name(&self) -> &str {
        match self {
            ForeignData::None => "NoneType",
            ForeignData::Int(_) => "int",
            ForeignData::Str(_) => "str",
            ForeignData::Tuple(_) => "tuple",
            ForeignData::Dict(_) => "dict",
            ForeignData::Instance { ty, .. } => ty.name(),
            ForeignData::Module { .. } => "module",
            ForeignData::Code { .. } => "code",
        }
    }

    /// Pushes every reference this object owns.
    pub fn owned_refs(&self, out: &mut Vec<ObjectId>) {
        match self {
            ForeignData::Tuple(items) => out.extend(items.iter().copied()),
            ForeignData::Dict(entries) => out.extend(entries.values().copied()),
            ForeignData::Module { dict, .. } => out.push(*dict),
            ForeignData::Instance { ty, words } => {
                for offset in ty.layout().reference_words() {
                    if let Some(id) = words.get(offset.get()).copied().and_then(ObjectId::from_word) {
                        out.push(id);
                    }
                }
            }
            ForeignData::None | ForeignData::Int(_) | ForeignData::Str(_) | ForeignData::Code { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapEntry {
    pub refcount: usize,
    pub data: ForeignData,
}
