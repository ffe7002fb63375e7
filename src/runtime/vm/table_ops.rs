//! Guest `Table` storage. Unlike the string-keyed [`HashTable`], keys are
//! arbitrary values, so hashing and equality of objects call back into guest
//! code (`__hash__`, `__eq__`).
//!
//! [`HashTable`]: crate::runtime::hashtable::HashTable

use crate::runtime::{Raised, object::TableSlot, value::Value};

use super::{Name, VM};

fn hash_number(n: f64) -> u32 {
    // -0.0 and 0.0 must land in the same bucket.
    let n = if n == 0.0 { 0.0 } else { n };
    let bits = n.to_bits();
    let mixed = bits ^ (bits >> 32);
    (mixed as u32).wrapping_mul(0x9E37_79B1)
}

impl VM {
    pub(crate) fn table_key_hash(&mut self, key: Value) -> Result<u32, Raised> {
        match key {
            Value::Null => Err(self.raise("TypeException", "Key of Table cannot be null.")),
            Value::Boolean(b) => Ok(b as u32),
            Value::Number(n) => Ok(hash_number(n)),
            Value::Handle(ptr) => Ok(hash_number(ptr.0 as usize as f64)),
            Value::Obj(_) => {
                if let Some(s) = self.as_string(key) {
                    return Ok(s.hash());
                }
                let result = self.call_method_with(key, Name::Hash, &[])?;
                match result {
                    Value::Number(n) => Ok(n as u32),
                    other => {
                        let type_name = self.type_name_of(other);
                        Err(self.raise(
                            "TypeException",
                            format!("__hash__() return value must be a number, got {}.", type_name),
                        ))
                    }
                }
            }
        }
    }

    pub(crate) fn table_keys_equal(&mut self, a: Value, b: Value) -> Result<bool, Raised> {
        match a {
            Value::Null | Value::Boolean(_) | Value::Number(_) | Value::Handle(_) => Ok(a == b),
            Value::Obj(_) => {
                if let (Some(l), Some(r)) = (self.as_string(a), self.as_string(b)) {
                    return Ok(l.content_eq(r));
                }
                if a == b {
                    return Ok(true);
                }
                Ok(self.call_method_with(a, Name::Eq, &[b])?.is_truthy())
            }
        }
    }

    /// Probes `table` for `key`. Returns the slot holding it, or the slot an
    /// insert should use, and whether the key was found. Guest `__eq__` calls
    /// may resize the table, in which case the probe restarts.
    fn table_find(&mut self, table: Value, key: Value, hash: u32) -> Result<(usize, bool), Raised> {
        'probe: loop {
            let capacity = self.as_table(table).map_or(0, |t| t.capacity());
            if capacity == 0 {
                return Ok((0, false));
            }
            let mask = capacity - 1;
            let mut index = hash as usize & mask;
            let mut tombstone = None;

            loop {
                let Some(slot) = self.as_table(table).map(|t| t.slot(index)) else {
                    return Ok((0, false));
                };
                match slot {
                    TableSlot::Empty => return Ok((tombstone.unwrap_or(index), false)),
                    TableSlot::Tombstone => {
                        tombstone.get_or_insert(index);
                    }
                    TableSlot::Occupied {
                        key: existing,
                        hash: existing_hash,
                        ..
                    } if existing_hash == hash => {
                        let equal = self.table_keys_equal(key, existing)?;
                        if self.as_table(table).map_or(0, |t| t.capacity()) != capacity {
                            continue 'probe;
                        }
                        if equal {
                            return Ok((index, true));
                        }
                    }
                    TableSlot::Occupied { .. } => {}
                }
                index = (index + 1) & mask;
            }
        }
    }

    pub(crate) fn table_get(&mut self, table: Value, key: Value) -> Result<Option<Value>, Raised> {
        let hash = self.table_key_hash(key)?;
        let (index, found) = self.table_find(table, key, hash)?;
        if !found {
            return Ok(None);
        }
        Ok(match self.as_table(table).map(|t| t.slot(index)) {
            Some(TableSlot::Occupied { value, .. }) => Some(value),
            _ => None,
        })
    }

    /// Inserts or overwrites `key`. Returns `true` when the key is new.
    pub(crate) fn table_set(&mut self, table: Value, key: Value, value: Value) -> Result<bool, Raised> {
        let hash = self.table_key_hash(key)?;
        loop {
            if let Some(t) = self.as_table_mut(table)
                && t.needs_grow()
            {
                t.grow();
            }
            let (index, found) = self.table_find(table, key, hash)?;
            let Some(t) = self.as_table_mut(table) else {
                return Ok(false);
            };
            if !found && t.needs_grow() {
                continue;
            }
            let is_new = t.store(index, key, hash, value);
            self.recharge(table);
            return Ok(is_new);
        }
    }

    /// Removes `key`. Returns `true` when it was present.
    pub(crate) fn table_delete(&mut self, table: Value, key: Value) -> Result<bool, Raised> {
        let hash = self.table_key_hash(key)?;
        let (index, found) = self.table_find(table, key, hash)?;
        if found && let Some(t) = self.as_table_mut(table) {
            t.remove_at(index);
        }
        Ok(found)
    }

    /// Calls `receiver.name(args...)` and returns the result.
    pub(crate) fn call_method_with(&mut self, receiver: Value, name: Name, args: &[Value]) -> Result<Value, Raised> {
        self.push(receiver);
        self.stack.extend_from_slice(args);
        self.call_method_key(self.name(name), args.len() as u8)?;
        Ok(self.pop())
    }
}
