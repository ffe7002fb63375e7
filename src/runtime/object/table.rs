use crate::runtime::{gc::GcHandle, value::Value};

pub(crate) const TABLE_MIN_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy)]
pub enum TableSlot {
    Empty,
    Tombstone,
    Occupied { key: Value, hash: u32, value: Value },
}

/// Guest-visible map from arbitrary values to values.
///
/// Only storage lives here. Hashing and key comparison may call guest
/// `__hash__`/`__eq__`, so probing is driven by the VM (see `vm::table_ops`),
/// which reads one slot at a time through [`Table::slot`]. Each entry keeps the
/// hash it was inserted with, so growing never calls back into the guest.
#[derive(Debug, Clone, Default)]
pub struct Table {
    slots: Vec<TableSlot>,
    count: usize,
    tombstones: usize,
}

impl Table {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> TableSlot {
        self.slots[index]
    }

    /// Whether inserting one more entry would exceed the 75% load factor.
    pub fn needs_grow(&self) -> bool {
        (self.count + self.tombstones + 1) * 4 > self.slots.len() * 3
    }

    /// Doubles the slot array, re-placing entries by their stored hash.
    pub fn grow(&mut self) {
        let capacity = (self.slots.len() * 2).max(TABLE_MIN_CAPACITY);
        let old = std::mem::replace(&mut self.slots, vec![TableSlot::Empty; capacity]);
        self.tombstones = 0;
        let mask = capacity - 1;

        for slot in old {
            if let TableSlot::Occupied { hash, .. } = slot {
                let mut index = hash as usize & mask;
                while !matches!(self.slots[index], TableSlot::Empty) {
                    index = (index + 1) & mask;
                }
                self.slots[index] = slot;
            }
        }
    }

    /// Stores an entry at a slot chosen by the VM's probe. Returns `true` when
    /// the slot did not already hold a live entry.
    pub fn store(&mut self, index: usize, key: Value, hash: u32, value: Value) -> bool {
        let is_new = match self.slots[index] {
            TableSlot::Empty => true,
            TableSlot::Tombstone => {
                self.tombstones -= 1;
                true
            }
            TableSlot::Occupied { .. } => false,
        };
        if is_new {
            self.count += 1;
        }
        self.slots[index] = TableSlot::Occupied { key, hash, value };
        is_new
    }

    pub fn remove_at(&mut self, index: usize) {
        if let TableSlot::Occupied { .. } = self.slots[index] {
            self.slots[index] = TableSlot::Tombstone;
            self.count -= 1;
            self.tombstones += 1;
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.count = 0;
        self.tombstones = 0;
    }

    /// First occupied slot at or after `from`.
    pub fn next_index(&self, from: usize) -> Option<usize> {
        (from..self.slots.len())
            .find(|&i| matches!(self.slots[i], TableSlot::Occupied { .. }))
    }

    pub(crate) fn trace(&self, out: &mut Vec<GcHandle>) {
        for slot in &self.slots {
            if let TableSlot::Occupied { key, value, .. } = slot {
                if let Value::Obj(handle) = key {
                    out.push(*handle);
                }
                if let Value::Obj(handle) = value {
                    out.push(*handle);
                }
            }
        }
    }
}
