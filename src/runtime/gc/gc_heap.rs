use serde::Serialize;

#[cfg(feature = "gc-telemetry")]
use crate::runtime::gc::telemetry::{GcTelemetry, HeapSnapshot};
use crate::runtime::{
    gc::{
        gc_handle::GcHandle,
        heap_entry::{HeapEntry, HeapSlot},
        heap_object::HeapObject,
    },
    value::Value,
};

pub const DEFAULT_FIRST_GC: usize = 10 * 1024 * 1024;
pub const DEFAULT_GROW_RATE: f64 = 2.0;
const MIN_NEXT_GC: usize = 1024 * 1024;

/// Counters describing the heap, cheap to read at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GcStats {
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub live_objects: usize,
    pub collections: usize,
    pub allocations: usize,
}

/// Stop-the-world mark-and-sweep heap.
///
/// Objects live in an arena of generation-checked slots. The heap only
/// provides the mechanics of a cycle (marking, tracing, sweeping); root
/// enumeration belongs to the VM, which owns every root.
///
/// A cycle is driven as:
/// 1. [`Self::mark_value`] / [`Self::mark_handle`] for each root,
/// 2. [`Self::trace_references`] to drain the gray worklist,
/// 3. [`Self::sweep`],
/// 4. [`Self::finish_cycle`] to compute the next threshold.
pub struct GcHeap {
    slots: Vec<HeapSlot>,
    free_list: Vec<u32>,
    live: usize,
    bytes_allocated: usize,
    next_gc: usize,
    grow_rate: f64,
    enabled: bool,
    gray: Vec<GcHandle>,
    scratch: Vec<GcHandle>,
    total_collections: usize,
    total_allocations: usize,
    #[cfg(feature = "gc-telemetry")]
    telemetry: GcTelemetry,
}

impl Default for GcHeap {
    fn default() -> Self {
        Self::new(DEFAULT_FIRST_GC, DEFAULT_GROW_RATE)
    }
}

impl GcHeap {
    /// Creates an empty heap whose first collection triggers once `first_gc`
    /// bytes are allocated.
    pub fn new(first_gc: usize, grow_rate: f64) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
            bytes_allocated: 0,
            next_gc: first_gc,
            grow_rate,
            enabled: true,
            gray: Vec::with_capacity(64),
            scratch: Vec::new(),
            total_collections: 0,
            total_allocations: 0,
            #[cfg(feature = "gc-telemetry")]
            telemetry: GcTelemetry::new(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns `true` when collection is enabled and allocating `incoming`
    /// more bytes would cross the threshold.
    pub fn should_collect(&self, incoming: usize) -> bool {
        self.enabled && self.bytes_allocated + incoming > self.next_gc
    }

    /// Moves `object` into the heap and returns a handle to it.
    ///
    /// Never collects; the caller decides when a cycle runs. Freed slots are
    /// reused before the arena grows.
    pub fn alloc(&mut self, object: HeapObject, class: Option<GcHandle>) -> GcHandle {
        let size = object.shallow_size_bytes();

        #[cfg(feature = "gc-telemetry")]
        self.telemetry.record_alloc(object.kind(), size);

        self.bytes_allocated += size;
        self.total_allocations += 1;
        self.live += 1;

        let entry = HeapEntry {
            object,
            class,
            marked: false,
            size,
        };

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            GcHandle::from_parts(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(HeapSlot {
                generation: 0,
                entry: Some(entry),
            });
            GcHandle::from_parts(index, 0)
        }
    }

    fn entry(&self, handle: GcHandle) -> Option<&HeapEntry> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, handle: GcHandle) -> Option<&mut HeapEntry> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Returns the object behind `handle`.
    ///
    /// Panics if the handle is stale (its object was collected) or out of
    /// bounds.
    pub fn get(&self, handle: GcHandle) -> &HeapObject {
        match self.entry(handle) {
            Some(entry) => &entry.object,
            None => panic!("GcHeap::get: stale or invalid handle {:?}", handle),
        }
    }

    pub fn get_mut(&mut self, handle: GcHandle) -> &mut HeapObject {
        match self.entry_mut(handle) {
            Some(entry) => &mut entry.object,
            None => panic!("GcHeap::get_mut: stale or invalid handle {:?}", handle),
        }
    }

    pub fn try_get(&self, handle: GcHandle) -> Option<&HeapObject> {
        self.entry(handle).map(|entry| &entry.object)
    }

    pub fn is_live(&self, handle: GcHandle) -> bool {
        self.entry(handle).is_some()
    }

    /// Class recorded in the object header.
    pub fn class_of(&self, handle: GcHandle) -> Option<GcHandle> {
        self.entry(handle).and_then(|entry| entry.class)
    }

    pub fn set_class(&mut self, handle: GcHandle, class: GcHandle) {
        if let Some(entry) = self.entry_mut(handle) {
            entry.class = Some(class);
        }
    }

    /// Fills in the class of every live object that has none, using `class_for`.
    pub fn patch_classes(&mut self, mut class_for: impl FnMut(&HeapObject) -> Option<GcHandle>) {
        for slot in &mut self.slots {
            if let Some(entry) = slot.entry.as_mut()
                && entry.class.is_none()
            {
                entry.class = class_for(&entry.object);
            }
        }
    }

    /// Re-measures an object whose backing storage grew or shrank after
    /// allocation and adjusts the allocation counter.
    pub fn recharge(&mut self, handle: GcHandle) {
        let Some(entry) = self.entry_mut(handle) else {
            return;
        };
        let size = entry.object.shallow_size_bytes();
        let old = std::mem::replace(&mut entry.size, size);
        self.bytes_allocated = self.bytes_allocated - old + size;
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    pub fn total_collections(&self) -> usize {
        self.total_collections
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            bytes_allocated: self.bytes_allocated,
            next_gc: self.next_gc,
            live_objects: self.live,
            collections: self.total_collections,
            allocations: self.total_allocations,
        }
    }

    /// Starts a cycle. Only bookkeeping; marking begins with the first root.
    pub fn begin_cycle(&mut self) {
        #[cfg(feature = "gc-telemetry")]
        self.telemetry
            .begin_cycle(self.next_gc, self.bytes_allocated, self.live);
    }

    #[inline]
    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(handle) = value {
            self.mark_handle(handle);
        }
    }

    /// Marks `handle` reached and queues it for tracing.
    pub fn mark_handle(&mut self, handle: GcHandle) {
        let Some(entry) = self.entry_mut(handle) else {
            return;
        };
        if entry.marked {
            return;
        }
        entry.marked = true;
        self.gray.push(handle);
    }

    /// Marks every handle `object` refers to without allocating it. Used to
    /// protect the children of an object that is about to be allocated.
    pub fn mark_children_of(&mut self, object: &HeapObject) {
        let mut children = std::mem::take(&mut self.scratch);
        children.clear();
        object.trace(&mut children);
        for &child in &children {
            self.mark_handle(child);
        }
        self.scratch = children;
    }

    /// Drains the gray worklist, marking everything reachable from it.
    ///
    /// Uses an explicit stack, so deep object graphs do not recurse.
    pub fn trace_references(&mut self) {
        let mut children = std::mem::take(&mut self.scratch);

        while let Some(handle) = self.gray.pop() {
            #[cfg(feature = "gc-telemetry")]
            self.telemetry.update_peak_mark_stack(self.gray.len() + 1);

            children.clear();
            let Some(entry) = self.entry(handle) else {
                continue;
            };
            if let Some(class) = entry.class {
                children.push(class);
            }
            entry.object.trace(&mut children);

            for &child in &children {
                self.mark_handle(child);
            }
        }

        children.clear();
        self.scratch = children;
    }

    pub fn is_marked(&self, handle: GcHandle) -> bool {
        self.entry(handle).is_some_and(|entry| entry.marked)
    }

    /// Frees every unmarked object and clears the mark on survivors.
    /// Returns the number of objects freed.
    ///
    /// Dropping a freed object releases whatever it owns outside the heap
    /// (backing arrays, dynamic libraries).
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        let mut index = 0;
        let len = self.slots.len();

        while index < len {
            let slot = &mut self.slots[index];
            match slot.entry.as_mut() {
                Some(entry) if entry.marked => {
                    entry.marked = false;
                    #[cfg(feature = "gc-telemetry")]
                    self.telemetry
                        .record_survival(entry.object.kind(), entry.size);
                }
                Some(_) => {
                    if let Some(entry) = slot.entry.take() {
                        self.bytes_allocated -= entry.size;
                    }
                    slot.generation = slot.generation.wrapping_add(1);
                    self.free_list.push(index as u32);
                    self.live -= 1;
                    freed += 1;
                }
                None => {}
            }
            index += 1;
        }

        freed
    }

    /// Ends a cycle: the next one triggers at `bytes_allocated * grow_rate`.
    pub fn finish_cycle(&mut self) {
        let scaled = (self.bytes_allocated as f64 * self.grow_rate) as usize;
        self.next_gc = scaled.max(MIN_NEXT_GC);
        self.total_collections += 1;

        #[cfg(feature = "gc-telemetry")]
        self.telemetry
            .end_cycle(self.live, self.bytes_allocated, self.next_gc);
    }

    #[cfg(feature = "gc-telemetry")]
    pub fn telemetry(&self) -> &GcTelemetry {
        &self.telemetry
    }

    /// Captures a summary of the live heap, listing the `top_n` largest objects.
    #[cfg(feature = "gc-telemetry")]
    pub fn snapshot(&self, top_n: usize) -> HeapSnapshot {
        let mut snapshot = HeapSnapshot {
            capacity: self.slots.len(),
            live_count: self.live,
            free_list_len: self.free_list.len(),
            ..HeapSnapshot::default()
        };
        let mut sizes = Vec::with_capacity(self.live);

        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(entry) = &slot.entry {
                let kind = entry.object.kind();
                snapshot.by_kind[kind as usize].0 += 1;
                snapshot.by_kind[kind as usize].1 += entry.size;
                snapshot.total_live_bytes += entry.size;
                sizes.push((index as u32, kind, entry.size));
            }
        }

        sizes.sort_by(|a, b| b.2.cmp(&a.2));
        sizes.truncate(top_n);
        snapshot.largest_objects = sizes;
        snapshot
    }
}
