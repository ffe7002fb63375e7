use crate::runtime::{
    gc::{GcHandle, HeapObject},
    object::Upvalue,
    value::Value,
};

use super::VM;

impl VM {
    /// Returns the open upvalue for stack `slot`, creating it if no closure
    /// captured the slot yet. Closures capturing the same slot share it.
    pub(super) fn capture_upvalue(&mut self, slot: usize) -> GcHandle {
        let position = match self.open_upvalues.binary_search_by_key(&slot, |&(s, _)| s) {
            Ok(index) => return self.open_upvalues[index].1,
            Err(index) => index,
        };
        let upvalue = self.alloc(HeapObject::Upvalue(Upvalue::Open(slot)));
        self.open_upvalues.insert(position, (slot, upvalue));
        upvalue
    }

    /// Closes every open upvalue pointing at `from` or above, copying the
    /// slot's current value into it.
    pub(super) fn close_upvalues(&mut self, from: usize) {
        let split = self.open_upvalues.partition_point(|&(slot, _)| slot < from);
        for index in split..self.open_upvalues.len() {
            let (slot, upvalue) = self.open_upvalues[index];
            let value = self.stack[slot];
            *self.heap.get_mut(upvalue) = HeapObject::Upvalue(Upvalue::Closed(value));
        }
        self.open_upvalues.truncate(split);
    }

    pub(super) fn read_upvalue(&self, upvalue: GcHandle) -> Value {
        match self.heap.get(upvalue) {
            HeapObject::Upvalue(Upvalue::Open(slot)) => self.stack[*slot],
            HeapObject::Upvalue(Upvalue::Closed(value)) => *value,
            other => panic!("expected upvalue, found {}", other.kind()),
        }
    }

    pub(super) fn write_upvalue(&mut self, upvalue: GcHandle, value: Value) {
        match self.heap.get_mut(upvalue) {
            HeapObject::Upvalue(Upvalue::Open(slot)) => {
                let slot = *slot;
                self.stack[slot] = value;
            }
            HeapObject::Upvalue(Upvalue::Closed(closed)) => *closed = value,
            other => panic!("expected upvalue, found {}", other.kind()),
        }
    }
}
