//! Open-addressing hashtable keyed by interned strings.
//!
//! Used for module globals, class method tables, instance fields and the string
//! intern pool. Keys carry their precomputed hash; because every key is an
//! interned string, key equality is handle identity.
//!
//! Layout: a power-of-two slot array probed linearly. Deleting leaves a
//! tombstone so that probe sequences through the slot stay intact; tombstones
//! are reused by later inserts and dropped when the table grows.
//!
//! Values are stored NaN-boxed when the `nan-tagging` feature is on.

use crate::runtime::{gc::GcHandle, packed::ValueRepr, value::Value};

#[cfg(feature = "nan-tagging")]
type Stored = crate::runtime::packed::PackedValue;
#[cfg(not(feature = "nan-tagging"))]
type Stored = Value;

const MIN_CAPACITY: usize = 8;

/// A string key: the interned string's handle plus its content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrKey {
    pub handle: GcHandle,
    pub hash: u32,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Empty,
    Tombstone,
    Occupied(StrKey, Stored),
}

#[derive(Debug, Clone, Default)]
pub struct HashTable {
    slots: Vec<Slot>,
    /// Occupied slots.
    count: usize,
    tombstones: usize,
}

impl HashTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the index of the slot holding `key`, or of the slot where it
    /// should be inserted (the first tombstone seen, else the terminating empty slot).
    fn find_slot(slots: &[Slot], key: StrKey) -> usize {
        let mask = slots.len() - 1;
        let mut index = key.hash as usize & mask;
        let mut tombstone = None;

        loop {
            match slots[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Occupied(existing, _) => {
                    if existing.handle == key.handle {
                        return index;
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    fn grow(&mut self) {
        let new_capacity = (self.slots.len() * 2).max(MIN_CAPACITY);
        let old = std::mem::replace(&mut self.slots, vec![Slot::Empty; new_capacity]);
        self.tombstones = 0;

        for slot in old {
            if let Slot::Occupied(key, value) = slot {
                let index = Self::find_slot(&self.slots, key);
                self.slots[index] = Slot::Occupied(key, value);
            }
        }
    }

    /// Inserts or overwrites `key`. Returns `true` when the key was not present.
    pub fn put(&mut self, key: StrKey, value: Value) -> bool {
        if (self.count + self.tombstones + 1) * 4 > self.slots.len() * 3 {
            self.grow();
        }

        let index = Self::find_slot(&self.slots, key);
        let is_new = match self.slots[index] {
            Slot::Empty => true,
            Slot::Tombstone => {
                self.tombstones -= 1;
                true
            }
            Slot::Occupied(..) => false,
        };
        if is_new {
            self.count += 1;
        }
        self.slots[index] = Slot::Occupied(key, Stored::encode(value));
        is_new
    }

    pub fn get(&self, key: StrKey) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        match self.slots[Self::find_slot(&self.slots, key)] {
            Slot::Occupied(_, value) => Some(value.decode()),
            _ => None,
        }
    }

    pub fn contains(&self, key: StrKey) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`, leaving a tombstone. Returns `true` when the key existed.
    pub fn delete(&mut self, key: StrKey) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_slot(&self.slots, key);
        if let Slot::Occupied(..) = self.slots[index] {
            self.slots[index] = Slot::Tombstone;
            self.count -= 1;
            self.tombstones += 1;
            true
        } else {
            false
        }
    }

    /// Looks a key up by hash and a content predicate. Used by the intern pool,
    /// where the candidate string is not a heap object yet.
    pub fn find_by(&self, hash: u32, mut matches: impl FnMut(StrKey) -> bool) -> Option<StrKey> {
        if self.count == 0 {
            return None;
        }
        let mask = self.slots.len() - 1;
        let mut index = hash as usize & mask;

        loop {
            match self.slots[index] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Occupied(key, _) => {
                    if key.hash == hash && matches(key) {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Copies every entry of `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: &HashTable) {
        for (key, value) in other.iter() {
            self.put(key, value);
        }
    }

    /// Tombstones every entry for which `keep` returns `false`.
    pub fn retain(&mut self, mut keep: impl FnMut(StrKey, Value) -> bool) {
        for slot in self.slots.iter_mut() {
            if let Slot::Occupied(key, value) = *slot
                && !keep(key, value.decode())
            {
                *slot = Slot::Tombstone;
                self.count -= 1;
                self.tombstones += 1;
            }
        }
    }

    /// Iterates live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (StrKey, Value)> + '_ {
        self.slots.iter().filter_map(|slot| match *slot {
            Slot::Occupied(key, value) => Some((key, value.decode())),
            _ => None,
        })
    }

    /// Returns the first occupied slot index at or after `from`, for
    /// resumable iteration.
    pub fn next_index(&self, from: usize) -> Option<usize> {
        (from..self.slots.len()).find(|&i| matches!(self.slots[i], Slot::Occupied(..)))
    }

    pub fn entry_at(&self, index: usize) -> Option<(StrKey, Value)> {
        match self.slots.get(index) {
            Some(Slot::Occupied(key, value)) => Some((*key, value.decode())),
            _ => None,
        }
    }

    /// Pushes every handle reachable from the table, keys included.
    pub(crate) fn trace(&self, out: &mut Vec<GcHandle>) {
        for (key, value) in self.iter() {
            out.push(key.handle);
            if let Value::Obj(handle) = value {
                out.push(handle);
            }
        }
    }
}
