use crate::runtime::{NativeResult, Raised, vm::VM};

use super::helpers::{iterate_indices, state_index};

fn list_length(vm: &mut VM) -> Result<usize, Raised> {
    vm.check_list(0, "this")?;
    Ok(vm.list_len(0).unwrap_or(0))
}

fn tuple_length(vm: &mut VM) -> Result<usize, Raised> {
    vm.check_tuple(0, "this")?;
    Ok(vm.tuple_len(0).unwrap_or(0))
}

/// List.new(*args) - a list holding the arguments.
pub(super) fn list_new(vm: &mut VM) -> NativeResult {
    let items = vm.sequence_items(vm.value_at(1)).unwrap_or_default();
    vm.push_list();
    for item in items {
        vm.push_value(item);
        vm.list_push(-2);
    }
    Ok(())
}

/// List.add(e) - appends `e`.
pub(super) fn list_add(vm: &mut VM) -> NativeResult {
    vm.check_list(0, "this")?;
    vm.push_slot(1);
    vm.list_push(0);
    Ok(())
}

pub(super) fn list_len(vm: &mut VM) -> NativeResult {
    let len = list_length(vm)?;
    vm.push_number(len as f64);
    Ok(())
}

pub(super) fn list_iter(vm: &mut VM) -> NativeResult {
    let len = list_length(vm)?;
    iterate_indices(vm, len)
}

pub(super) fn list_next(vm: &mut VM) -> NativeResult {
    let len = list_length(vm)?;
    match state_index(vm, len) {
        Some(index) => vm.list_get(0, index),
        None => {
            vm.push_null();
            Ok(())
        }
    }
}

pub(super) fn tuple_len(vm: &mut VM) -> NativeResult {
    let len = tuple_length(vm)?;
    vm.push_number(len as f64);
    Ok(())
}

pub(super) fn tuple_iter(vm: &mut VM) -> NativeResult {
    let len = tuple_length(vm)?;
    iterate_indices(vm, len)
}

pub(super) fn tuple_next(vm: &mut VM) -> NativeResult {
    let len = tuple_length(vm)?;
    match state_index(vm, len) {
        Some(index) => vm.tuple_get(0, index),
        None => {
            vm.push_null();
            Ok(())
        }
    }
}
