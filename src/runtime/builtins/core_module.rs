use crate::runtime::{
    gc::{GcHandle, HeapObject},
    object::{Class, Native, Proto},
    value::Value,
    vm::{CORE_MODULE, CoreClasses, VM},
};

use super::{CORE_NATIVES, NativeDefault};

/// Subclasses of `Exception` the VM raises on its own.
const EXCEPTION_CLASSES: &[&str] = &[
    "TypeException",
    "NameException",
    "FieldException",
    "MethodException",
    "ImportException",
    "StackOverflowException",
    "IndexOutOfBoundException",
    "InvalidArgException",
];

/// Creates the core module and its classes. Runs once, from [`VM::new`],
/// with collection disabled: nothing created here is rooted until
/// `finish_bootstrap` installs the class table.
pub(crate) fn bootstrap(vm: &mut VM) {
    let module = vm.module_named(CORE_MODULE);

    let class = define_class(vm, module, "Class", None);
    let object = define_class(vm, module, "Object", None);
    bind_natives(vm, module, object, "Object");
    if let Some(c) = vm.as_class_mut(Value::Obj(class)) {
        c.superclass = Some(object);
    }
    inherit_methods(vm, class, object);

    let builtin = |vm: &mut VM, name: &str| {
        let handle = define_class(vm, module, name, Some(object));
        bind_natives(vm, module, handle, name);
        handle
    };
    let core = CoreClasses {
        class,
        object,
        string: builtin(vm, "String"),
        boolean: builtin(vm, "Boolean"),
        number: builtin(vm, "Number"),
        null: builtin(vm, "Null"),
        function: builtin(vm, "Function"),
        module: builtin(vm, "Module"),
        list: builtin(vm, "List"),
        tuple: builtin(vm, "Tuple"),
        table: builtin(vm, "Table"),
        stack_trace: builtin(vm, "StackTrace"),
        exception: builtin(vm, "Exception"),
    };

    for name in EXCEPTION_CLASSES {
        define_class(vm, module, name, Some(core.exception));
    }

    vm.finish_bootstrap(core, module);
}

/// Allocates class `name` in `module`, inheriting `superclass`'s methods.
fn define_class(vm: &mut VM, module: GcHandle, name: &str, superclass: Option<GcHandle>) -> GcHandle {
    let key = vm.intern(name);
    let class = vm.alloc(HeapObject::Class(Class::new(key.handle, superclass)));
    if let Some(superclass) = superclass {
        inherit_methods(vm, class, superclass);
    }
    if let Some(m) = vm.as_module_mut(Value::Obj(module)) {
        m.globals.put(key, Value::Obj(class));
    }
    class
}

fn inherit_methods(vm: &mut VM, class: GcHandle, superclass: GcHandle) {
    let Some(methods) = vm.as_class(Value::Obj(superclass)).map(|c| c.methods.clone()) else {
        return;
    };
    if let Some(c) = vm.as_class_mut(Value::Obj(class)) {
        c.methods.merge(&methods);
    }
}

fn bind_natives(vm: &mut VM, module: GcHandle, class: GcHandle, class_name: &str) {
    for entry in CORE_NATIVES.iter().filter(|e| e.class == Some(class_name)) {
        let defaults: Box<[Value]> = entry
            .defaults
            .iter()
            .map(|default| match *default {
                NativeDefault::Null => Value::Null,
                NativeDefault::Number(n) => Value::Number(n),
                NativeDefault::Str(s) => vm.intern_value(s),
            })
            .collect();
        let name = vm.intern(entry.name);
        let native = vm.alloc(HeapObject::Native(Native {
            proto: Proto {
                name: name.handle,
                module,
                arity: entry.arity,
                defaults,
                vararg: entry.vararg,
            },
            func: Some(entry.func),
        }));
        if let Some(c) = vm.as_class_mut(Value::Obj(class)) {
            c.methods.put(name, Value::Obj(native));
        }
    }
}
