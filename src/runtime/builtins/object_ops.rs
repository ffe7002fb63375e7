use crate::runtime::{NativeResult, value::Value, vm::VM};

use super::helpers::mix_hash;

/// Object.__eq__(other): identity.
pub(super) fn object_eq(vm: &mut VM) -> NativeResult {
    let same = vm.value_at(0) == vm.value_at(1);
    vm.push_bool(same);
    Ok(())
}

/// Object.__hash__(): derived from identity, so it agrees with `__eq__`.
pub(super) fn object_hash(vm: &mut VM) -> NativeResult {
    let bits = match vm.value_at(0) {
        Value::Obj(handle) => ((handle.generation() as u64) << 32) | handle.index() as u64,
        Value::Number(n) => n.to_bits(),
        Value::Boolean(b) => b as u64,
        Value::Handle(ptr) => ptr.0 as usize as u64,
        Value::Null => 0,
    };
    vm.push_number(mix_hash(bits) as f64);
    Ok(())
}
