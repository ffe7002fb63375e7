use crate::runtime::{NativeResult, value::Value, vm::VM};

/// `__iter__` over `0..len`: the state goes `null -> 0 -> 1 ...` and ends
/// with `false`.
pub(super) fn iterate_indices(vm: &mut VM, len: usize) -> NativeResult {
    match vm.value_at(1) {
        Value::Null if len != 0 => vm.push_number(0.0),
        Value::Number(n) if n >= 0.0 && (n as usize) + 1 < len => vm.push_number(n + 1.0),
        _ => vm.push_bool(false),
    }
    Ok(())
}

/// The index an `__next__` state refers to, if it is inside `0..len`.
pub(super) fn state_index(vm: &VM, len: usize) -> Option<usize> {
    match vm.value_at(1) {
        Value::Number(n) if n >= 0.0 && (n as usize) < len => Some(n as usize),
        _ => None,
    }
}

/// Spreads a 64-bit identity over 32 bits.
pub(super) fn mix_hash(bits: u64) -> u32 {
    let mut x = bits;
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    (x ^ (x >> 31)) as u32
}
