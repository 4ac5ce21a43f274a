use std::{any::Any, rc::Rc};

use crate::runtime::{
    leak_detector,
    tracking::tracking_handle::{
        EPOCH_MASK, ExtensionHandle, HandleKey, TrackingHandle, WrapperHandle,
    },
    wrapper::WrapperObject,
};

/// What a tracking handle refers to. One variant per handle category.
#[derive(Clone)]
pub enum Tracked {
    Wrapper(Rc<WrapperObject>),
    Extension(Rc<dyn Any>),
}

struct HandleEntry {
    generation: u16,
    tracked: Option<Tracked>,
}

/// Generational table of live tracking handles.
///
/// Slots freed by [`HandleTable::revoke`] are reused through a free-list,
/// but every reuse bumps the slot generation, so a revoked handle never
/// resolves again. [`HandleTable::reset`] moves to a new epoch, which
/// invalidates every handle issued before it.
pub struct HandleTable {
    entries: Vec<HandleEntry>,
    free_list: Vec<u32>,
    epoch: u16,
    total_allocated: usize,
    total_revoked: usize,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::with_epoch(0)
    }

    pub fn with_epoch(epoch: u16) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            epoch: epoch & EPOCH_MASK,
            total_allocated: 0,
            total_revoked: 0,
        }
    }

    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    pub fn allocate_wrapper(&mut self, wrapper: Rc<WrapperObject>) -> WrapperHandle {
        WrapperHandle(self.insert(Tracked::Wrapper(wrapper)))
    }

    pub fn allocate_extension(&mut self, object: Rc<dyn Any>) -> ExtensionHandle {
        ExtensionHandle(self.insert(Tracked::Extension(object)))
    }

    fn insert(&mut self, tracked: Tracked) -> HandleKey {
        leak_detector::record_handle_alloc();
        self.total_allocated += 1;

        if let Some(index) = self.free_list.pop() {
            let entry = &mut self.entries[index as usize];
            entry.tracked = Some(tracked);
            HandleKey {
                index,
                generation: entry.generation,
                epoch: self.epoch,
            }
        } else {
            let index = self.entries.len() as u32;
            self.entries.push(HandleEntry {
                generation: 0,
                tracked: Some(tracked),
            });
            HandleKey {
                index,
                generation: 0,
                epoch: self.epoch,
            }
        }
    }

    fn entry(&self, key: HandleKey) -> Option<&HandleEntry> {
        if key.epoch != self.epoch {
            return None;
        }
        self.entries
            .get(key.index as usize)
            .filter(|entry| entry.generation == key.generation)
    }

    pub fn resolve(&self, handle: TrackingHandle) -> Option<&Tracked> {
        self.entry(handle.key())?.tracked.as_ref()
    }

    pub fn resolve_wrapper(&self, handle: WrapperHandle) -> Option<Rc<WrapperObject>> {
        match self.resolve(handle.into())? {
            Tracked::Wrapper(wrapper) => Some(Rc::clone(wrapper)),
            Tracked::Extension(_) => None,
        }
    }

    pub fn resolve_extension(&self, handle: ExtensionHandle) -> Option<Rc<dyn Any>> {
        match self.resolve(handle.into())? {
            Tracked::Extension(object) => Some(Rc::clone(object)),
            Tracked::Wrapper(_) => None,
        }
    }

    pub fn is_live(&self, handle: TrackingHandle) -> bool {
        self.resolve(handle).is_some()
    }

    /// Frees the handle's slot. Returns what it tracked, or `None` if the
    /// handle was already stale.
    pub fn revoke(&mut self, handle: impl Into<TrackingHandle>) -> Option<Tracked> {
        let key = handle.into().key();
        self.entry(key)?;

        let entry = &mut self.entries[key.index as usize];
        let tracked = entry.tracked.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free_list.push(key.index);

        leak_detector::record_handle_revoke();
        self.total_revoked += 1;
        Some(tracked)
    }

    /// Drops every handle and starts a new epoch. Returns the released
    /// entries so the caller decides when they are dropped.
    pub fn reset(&mut self) -> Vec<Tracked> {
        let released = self
            .entries
            .drain(..)
            .filter_map(|entry| entry.tracked)
            .collect();
        self.free_list.clear();
        self.epoch = self.epoch.wrapping_add(1) & EPOCH_MASK;
        released
    }

    pub fn live_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.tracked.is_some())
            .count()
    }

    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }

    pub fn total_revoked(&self) -> usize {
        self.total_revoked
    }
}
