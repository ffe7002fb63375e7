//! Natives of the guest `Table` class. Storage and key hashing live in the VM;
//! these only adapt the calling convention.

use crate::runtime::{NativeResult, Raised, object::TableSlot, value::Value, vm::VM};

fn receiver(vm: &mut VM) -> Result<Value, Raised> {
    vm.check_table(0, "this")?;
    Ok(vm.value_at(0))
}

/// Table.new() - an empty table.
pub(super) fn table_new(vm: &mut VM) -> NativeResult {
    vm.push_table();
    Ok(())
}

/// Table.__get__(key) - the value under `key`, or `null`.
pub(super) fn table_get(vm: &mut VM) -> NativeResult {
    let table = receiver(vm)?;
    let value = vm.table_get(table, vm.value_at(1))?;
    vm.push_value(value.unwrap_or(Value::Null));
    Ok(())
}

/// Table.__set__(key, value)
pub(super) fn table_set(vm: &mut VM) -> NativeResult {
    let table = receiver(vm)?;
    let (key, value) = (vm.value_at(1), vm.value_at(2));
    vm.table_set(table, key, value)?;
    Ok(())
}

/// Table.delete(key) - whether `key` was present.
pub(super) fn table_delete(vm: &mut VM) -> NativeResult {
    let table = receiver(vm)?;
    let removed = vm.table_delete(table, vm.value_at(1))?;
    vm.push_bool(removed);
    Ok(())
}

pub(super) fn table_contains(vm: &mut VM) -> NativeResult {
    let table = receiver(vm)?;
    let found = vm.table_get(table, vm.value_at(1))?.is_some();
    vm.push_bool(found);
    Ok(())
}

pub(super) fn table_len(vm: &mut VM) -> NativeResult {
    let table = receiver(vm)?;
    let len = vm.as_table(table).map_or(0, |t| t.len());
    vm.push_number(len as f64);
    Ok(())
}

/// Table.__iter__(state) - walks occupied slots; the state is a slot index.
pub(super) fn table_iter(vm: &mut VM) -> NativeResult {
    let table = receiver(vm)?;
    let from = match vm.value_at(1) {
        Value::Null => Some(0),
        Value::Number(n) if n >= 0.0 => Some(n as usize + 1),
        _ => None,
    };
    let next = from.and_then(|from| vm.as_table(table).and_then(|t| t.next_index(from)));
    match next {
        Some(index) => vm.push_number(index as f64),
        None => vm.push_bool(false),
    }
    Ok(())
}

/// Table.__next__(state) - the key stored in the slot.
pub(super) fn table_next(vm: &mut VM) -> NativeResult {
    let table = receiver(vm)?;
    let key = match vm.value_at(1) {
        Value::Number(n) if n >= 0.0 => vm.as_table(table).and_then(|t| {
            let index = n as usize;
            if index >= t.capacity() {
                return None;
            }
            match t.slot(index) {
                TableSlot::Occupied { key, .. } => Some(key),
                _ => None,
            }
        }),
        _ => None,
    };
    vm.push_value(key.unwrap_or(Value::Null));
    Ok(())
}
