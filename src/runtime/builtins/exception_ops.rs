use crate::runtime::{
    NativeResult,
    value::Value,
    vm::{Name, VM},
};

/// Exception.new(err="", cause=null)
pub(super) fn exception_new(vm: &mut VM) -> NativeResult {
    let this = vm.value_at(0);
    let (err, cause) = (vm.value_at(1), vm.value_at(2));
    let err_key = vm.name(Name::ExcErr);
    let cause_key = vm.name(Name::ExcCause);
    if let Some(instance) = vm.as_instance_mut(this) {
        instance.fields.put(err_key, err);
        instance.fields.put(cause_key, cause);
    }
    vm.recharge(this);
    vm.push_slot(0);
    Ok(())
}

/// Exception.err() - the message, `null` if it was never set.
pub(super) fn exception_err(vm: &mut VM) -> NativeResult {
    let err_key = vm.name(Name::ExcErr);
    let err = vm
        .as_instance(vm.value_at(0))
        .and_then(|i| i.fields.get(err_key))
        .unwrap_or(Value::Null);
    vm.push_value(err);
    Ok(())
}

/// Exception.getStacktrace() - traceback, cause chain included, as a String.
pub(super) fn exception_get_stacktrace(vm: &mut VM) -> NativeResult {
    let text = vm.format_exception(vm.value_at(0));
    vm.push_string(&text);
    Ok(())
}
