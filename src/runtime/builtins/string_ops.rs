use crate::runtime::{NativeResult, Raised, value::Value, vm::VM};

use super::helpers::{iterate_indices, state_index};

/// Length in bytes of the receiver.
fn string_length(vm: &mut VM) -> Result<usize, Raised> {
    match vm.as_string(vm.value_at(0)).map(|s| s.len()) {
        Some(len) => Ok(len),
        None => Err(vm.raise("TypeException", "this must be a String.")),
    }
}

pub(super) fn string_len(vm: &mut VM) -> NativeResult {
    let len = string_length(vm)?;
    vm.push_number(len as f64);
    Ok(())
}

pub(super) fn string_iter(vm: &mut VM) -> NativeResult {
    let len = string_length(vm)?;
    iterate_indices(vm, len)
}

/// String.__next__(i) - the one-byte string at `i`.
pub(super) fn string_next(vm: &mut VM) -> NativeResult {
    let len = string_length(vm)?;
    let byte = state_index(vm, len)
        .and_then(|index| vm.as_string(vm.value_at(0)).map(|s| s.as_bytes()[index]));
    match byte {
        Some(byte) => {
            let key = vm.intern_bytes(&[byte]);
            vm.push_value(Value::Obj(key.handle));
        }
        None => vm.push_null(),
    }
    Ok(())
}
