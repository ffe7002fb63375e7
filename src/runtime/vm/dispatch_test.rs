use std::ptr;

use crate::{
    bytecode::{assembler::Assembler, chunk::Constant, op_code::OpCode},
    config::VmConfig,
    runtime::{
        NativeResult,
        native_ext::{ABI_VERSION, ExtensionEntry, ExtensionTable, NativeExtension},
        value::Value,
        vm::{CORE_MODULE, MAIN_MODULE, VM},
    },
};

fn new_vm() -> VM {
    VM::new(VmConfig::default())
}

fn eval(vm: &mut VM, build: impl FnOnce(&mut Assembler)) -> Result<Value, Value> {
    let mut asm = Assembler::new("main");
    build(&mut asm);
    asm.emit(OpCode::OpReturn, &[]);
    vm.evaluate(MAIN_MODULE, &asm.finish(), &[])
}

/// Pushes `TypeException(message)` and raises it.
fn emit_raise(asm: &mut Assembler, message: &str) {
    asm.emit_named(OpCode::OpGetGlobal, "TypeException");
    asm.emit_str(message);
    asm.emit(OpCode::OpCall, &[1]);
    asm.emit(OpCode::OpRaise, &[]);
}

#[test]
fn globals_round_trip() {
    let mut vm = new_vm();
    let result = eval(&mut vm, |asm| {
        asm.emit_number(3.0);
        asm.emit_named(OpCode::OpDefineGlobal, "x");
        asm.emit_number(4.0);
        asm.emit_named(OpCode::OpSetGlobal, "x");
        asm.emit(OpCode::OpPop, &[]);
        asm.emit_named(OpCode::OpGetGlobal, "x");
    });
    assert_eq!(result, Ok(Value::Number(4.0)));

    vm.get_global(Some(MAIN_MODULE), "x").unwrap();
    assert_eq!(vm.get_number(-1), Some(4.0));
}

#[test]
fn undefined_global_raises_name_exception() {
    let mut vm = new_vm();
    let exception = eval(&mut vm, |asm| {
        asm.emit_named(OpCode::OpGetGlobal, "missing");
    })
    .unwrap_err();
    assert_eq!(vm.type_name_of(exception), "NameException");
    assert_eq!(
        vm.exception_message(exception),
        "Name `missing` is not defined in module `__main__`."
    );
}

#[test]
fn conditional_jumps() {
    let mut vm = new_vm();
    for (condition, expected) in [(true, 1.0), (false, 2.0)] {
        let result = eval(&mut vm, |asm| {
            asm.emit_const(Constant::Bool(condition));
            let otherwise = asm.emit_jump(OpCode::OpJumpF);
            asm.emit_number(1.0);
            asm.emit(OpCode::OpReturn, &[]);
            asm.patch(otherwise);
            asm.emit_number(2.0);
        });
        assert_eq!(result, Ok(Value::Number(expected)));
    }
}

#[test]
fn while_loop_with_locals() {
    let mut vm = new_vm();
    // i = 0; sum = 0; while i < 10 { i = i + 1; sum = sum + i }
    let result = eval(&mut vm, |asm| {
        asm.emit_number(0.0);
        asm.emit_number(0.0);
        let start = asm.offset();
        asm.emit(OpCode::OpGetLocal, &[1]);
        asm.emit_number(10.0);
        asm.emit(OpCode::OpLt, &[]);
        let exit = asm.emit_jump(OpCode::OpJumpF);
        asm.emit(OpCode::OpGetLocal, &[1]);
        asm.emit_number(1.0);
        asm.emit(OpCode::OpAdd, &[]);
        asm.emit(OpCode::OpSetLocal, &[1]);
        asm.emit(OpCode::OpPop, &[]);
        asm.emit(OpCode::OpGetLocal, &[2]);
        asm.emit(OpCode::OpGetLocal, &[1]);
        asm.emit(OpCode::OpAdd, &[]);
        asm.emit(OpCode::OpSetLocal, &[2]);
        asm.emit(OpCode::OpPop, &[]);
        asm.emit_loop(OpCode::OpJump, start);
        asm.patch(exit);
        asm.emit(OpCode::OpGetLocal, &[2]);
    });
    assert_eq!(result, Ok(Value::Number(55.0)));
}

#[test]
fn for_loop_over_list() {
    let mut vm = new_vm();
    let result = eval(&mut vm, |asm| {
        asm.emit_number(0.0);
        asm.emit(OpCode::OpNewList, &[]);
        for n in [1.0, 2.0, 3.0] {
            asm.emit_number(n);
            asm.emit(OpCode::OpAppendList, &[]);
        }
        asm.emit(OpCode::OpNull, &[]);
        asm.emit(OpCode::OpForPrep, &[]);
        let start = asm.offset();
        asm.emit(OpCode::OpForIter, &[]);
        let exit = asm.emit_jump(OpCode::OpForNext);
        asm.emit(OpCode::OpGetLocal, &[1]);
        asm.emit(OpCode::OpGetLocal, &[6]);
        asm.emit(OpCode::OpAdd, &[]);
        asm.emit(OpCode::OpSetLocal, &[1]);
        asm.emit(OpCode::OpPop, &[]);
        asm.emit(OpCode::OpPop, &[]);
        asm.emit_loop(OpCode::OpJump, start);
        asm.patch(exit);
        asm.emit(OpCode::OpPopN, &[4]);
        asm.emit(OpCode::OpGetLocal, &[1]);
    });
    assert_eq!(result, Ok(Value::Number(6.0)));
}

#[test]
fn for_prep_requires_iteration_protocol() {
    let mut vm = new_vm();
    let exception = eval(&mut vm, |asm| {
        asm.emit_number(1.0);
        asm.emit(OpCode::OpNull, &[]);
        asm.emit(OpCode::OpForPrep, &[]);
    })
    .unwrap_err();
    assert_eq!(vm.type_name_of(exception), "MethodException");
    assert_eq!(
        vm.exception_message(exception),
        "Class Number does not implement __iter__ and __next__"
    );
}

#[test]
fn except_handler_catches_raise() {
    let mut vm = new_vm();
    let result = eval(&mut vm, |asm| {
        let handler = asm.setup_handler(OpCode::OpSetupExcept);
        emit_raise(asm, "boom");
        asm.emit(OpCode::OpPopHandler, &[]);
        asm.emit(OpCode::OpNull, &[]);
        asm.emit(OpCode::OpReturn, &[]);
        asm.patch(handler);
        asm.emit(OpCode::OpPop, &[]);
        asm.emit_invoke(0, "err");
    });
    let message = result.unwrap();
    assert_eq!(vm.string_value(message).as_deref(), Some("boom"));
}

#[test]
fn ensure_runs_before_return() {
    let mut vm = new_vm();
    let result = eval(&mut vm, |asm| {
        let ensure = asm.setup_handler(OpCode::OpSetupEnsure);
        asm.emit_number(1.0);
        asm.emit(OpCode::OpReturn, &[]);
        asm.emit(OpCode::OpPopHandler, &[]);
        asm.emit(OpCode::OpNull, &[]);
        asm.emit(OpCode::OpNull, &[]);
        asm.patch(ensure);
        asm.emit_const(Constant::Bool(true));
        asm.emit_named(OpCode::OpDefineGlobal, "ran");
        asm.emit(OpCode::OpEndHandler, &[]);
        asm.emit(OpCode::OpPopN, &[2]);
        asm.emit_number(2.0);
    });
    assert_eq!(result, Ok(Value::Number(1.0)));

    vm.get_global(Some(MAIN_MODULE), "ran").unwrap();
    assert_eq!(vm.get_bool(-1), Some(true));
}

#[test]
fn ensure_runs_on_normal_completion() {
    let mut vm = new_vm();
    let result = eval(&mut vm, |asm| {
        let ensure = asm.setup_handler(OpCode::OpSetupEnsure);
        asm.emit(OpCode::OpPopHandler, &[]);
        asm.emit(OpCode::OpNull, &[]);
        asm.emit(OpCode::OpNull, &[]);
        asm.patch(ensure);
        asm.emit_number(5.0);
        asm.emit_named(OpCode::OpDefineGlobal, "ran");
        asm.emit(OpCode::OpEndHandler, &[]);
        asm.emit(OpCode::OpPopN, &[2]);
        asm.emit_named(OpCode::OpGetGlobal, "ran");
    });
    assert_eq!(result, Ok(Value::Number(5.0)));
}

#[test]
fn ensure_runs_then_exception_continues() {
    let mut vm = new_vm();
    let exception = eval(&mut vm, |asm| {
        let ensure = asm.setup_handler(OpCode::OpSetupEnsure);
        emit_raise(asm, "escaping");
        asm.emit(OpCode::OpPopHandler, &[]);
        asm.emit(OpCode::OpNull, &[]);
        asm.emit(OpCode::OpNull, &[]);
        asm.patch(ensure);
        asm.emit_const(Constant::Bool(true));
        asm.emit_named(OpCode::OpDefineGlobal, "ran");
        asm.emit(OpCode::OpEndHandler, &[]);
        asm.emit(OpCode::OpPopN, &[2]);
        asm.emit(OpCode::OpNull, &[]);
    })
    .unwrap_err();
    assert_eq!(vm.exception_message(exception), "escaping");

    vm.get_global(Some(MAIN_MODULE), "ran").unwrap();
    assert_eq!(vm.get_bool(-1), Some(true));
}

#[test]
fn raise_requires_an_exception() {
    let mut vm = new_vm();
    let exception = eval(&mut vm, |asm| {
        asm.emit_number(3.0);
        asm.emit(OpCode::OpRaise, &[]);
    })
    .unwrap_err();
    assert_eq!(
        vm.exception_message(exception),
        "Can only raise Exception instances, got Number."
    );
}

#[test]
fn too_many_nested_handlers() {
    let config = VmConfig {
        max_handlers: 2,
        ..VmConfig::default()
    };
    let mut vm = VM::new(config);
    let exception = eval(&mut vm, |asm| {
        let labels: Vec<_> = (0..3)
            .map(|_| asm.setup_handler(OpCode::OpSetupExcept))
            .collect();
        asm.emit(OpCode::OpNull, &[]);
        asm.emit(OpCode::OpReturn, &[]);
        // Every handler re-raises what it caught.
        for label in labels {
            asm.patch(label);
        }
        asm.emit(OpCode::OpPop, &[]);
        asm.emit(OpCode::OpRaise, &[]);
    })
    .unwrap_err();
    assert_eq!(
        vm.exception_message(exception),
        "Exceeded maximum number of nested try blocks (2)"
    );
}

#[test]
fn classes_fields_and_methods() {
    let mut vm = new_vm();
    // class P { new(x) { this.x = x } get() { return this.x } }; P(9).get()
    let result = eval(&mut vm, |asm| {
        asm.emit_named(OpCode::OpNewClass, "P");

        let mut ctor = Assembler::new("new").params(1, vec![], false);
        ctor.emit(OpCode::OpGetLocal, &[1]);
        ctor.emit(OpCode::OpGetLocal, &[0]);
        ctor.emit_named(OpCode::OpSetField, "x");
        ctor.emit(OpCode::OpPop, &[]);
        ctor.emit(OpCode::OpGetLocal, &[0]);
        ctor.emit(OpCode::OpReturn, &[]);
        asm.emit_closure(ctor.finish(), &[]);
        asm.emit_named(OpCode::OpDefMethod, "new");

        let mut get = Assembler::new("get");
        get.emit(OpCode::OpGetLocal, &[0]);
        get.emit_named(OpCode::OpGetField, "x");
        get.emit(OpCode::OpReturn, &[]);
        asm.emit_closure(get.finish(), &[]);
        asm.emit_named(OpCode::OpDefMethod, "get");

        asm.emit_number(9.0);
        asm.emit(OpCode::OpCall, &[1]);
        asm.emit_invoke(0, "get");
    });
    assert_eq!(result, Ok(Value::Number(9.0)));
}

#[test]
fn missing_field_raises() {
    let mut vm = new_vm();
    let exception = eval(&mut vm, |asm| {
        asm.emit_named(OpCode::OpNewClass, "P");
        asm.emit(OpCode::OpCall, &[0]);
        asm.emit_named(OpCode::OpGetField, "nope");
    })
    .unwrap_err();
    assert_eq!(vm.type_name_of(exception), "FieldException");
    assert_eq!(
        vm.exception_message(exception),
        "Object P doesn't have field `nope`."
    );
}

#[test]
fn subclass_inherits_and_super_calls_parent() {
    let mut vm = new_vm();
    let result = eval(&mut vm, |asm| {
        asm.emit_named(OpCode::OpNewClass, "A");
        let mut f = Assembler::new("f");
        f.emit_number(1.0);
        f.emit(OpCode::OpReturn, &[]);
        asm.emit_closure(f.finish(), &[]);
        asm.emit_named(OpCode::OpDefMethod, "f");
        asm.emit_named(OpCode::OpDefineGlobal, "A");

        asm.emit_named(OpCode::OpGetGlobal, "A");
        asm.emit_named(OpCode::OpNewClass, "B");
        asm.emit(OpCode::OpSubclass, &[]);
        // B.f() { return super.f() + 10 }
        let mut g = Assembler::new("f");
        g.emit(OpCode::OpGetLocal, &[0]);
        g.emit_named(OpCode::OpGetGlobal, "A");
        g.emit_super(0, "f");
        g.emit_number(10.0);
        g.emit(OpCode::OpAdd, &[]);
        g.emit(OpCode::OpReturn, &[]);
        asm.emit_closure(g.finish(), &[]);
        asm.emit_named(OpCode::OpDefMethod, "f");
        asm.emit_named(OpCode::OpDefineGlobal, "B");
        asm.emit(OpCode::OpPop, &[]);

        asm.emit_named(OpCode::OpGetGlobal, "B");
        asm.emit(OpCode::OpCall, &[0]);
        asm.emit_invoke(0, "f");
    });
    assert_eq!(result, Ok(Value::Number(11.0)));
}

#[test]
fn super_bind_makes_bound_method() {
    let mut vm = new_vm();
    let result = eval(&mut vm, |asm| {
        asm.emit_named(OpCode::OpGetGlobal, "List");
        asm.emit(OpCode::OpCall, &[0]);
        asm.emit_named(OpCode::OpGetGlobal, "List");
        asm.emit_named(OpCode::OpSuperBind, "len");
        asm.emit(OpCode::OpCall, &[0]);
    });
    assert_eq!(result, Ok(Value::Number(0.0)));
}

#[test]
fn builtin_classes_cannot_be_subclassed() {
    let mut vm = new_vm();
    let exception = eval(&mut vm, |asm| {
        asm.emit_named(OpCode::OpGetGlobal, "List");
        asm.emit_named(OpCode::OpNewClass, "MyList");
        asm.emit(OpCode::OpSubclass, &[]);
    })
    .unwrap_err();
    assert_eq!(
        vm.exception_message(exception),
        "Cannot subclass builtin class List"
    );
}

#[test]
fn superclass_must_be_a_class() {
    let mut vm = new_vm();
    let exception = eval(&mut vm, |asm| {
        asm.emit_number(1.0);
        asm.emit_named(OpCode::OpNewClass, "C");
        asm.emit(OpCode::OpSubclass, &[]);
    })
    .unwrap_err();
    assert_eq!(
        vm.exception_message(exception),
        "Superclass in class declaration must be a Class."
    );
}

#[test]
fn collections_and_unpack() {
    let mut vm = new_vm();
    // (a, b) = (1, 2); return b - a
    let result = eval(&mut vm, |asm| {
        asm.emit_number(1.0);
        asm.emit_number(2.0);
        asm.emit(OpCode::OpNewTuple, &[2]);
        asm.emit(OpCode::OpUnpack, &[2]);
        asm.emit(OpCode::OpSub, &[]);
        asm.emit(OpCode::OpNeg, &[]);
    });
    assert_eq!(result, Ok(Value::Number(1.0)));

    let tuple = eval(&mut vm, |asm| {
        asm.emit(OpCode::OpNewList, &[]);
        asm.emit_number(4.0);
        asm.emit(OpCode::OpAppendList, &[]);
        asm.emit(OpCode::OpListToTuple, &[]);
    })
    .unwrap();
    assert_eq!(vm.sequence_items(tuple), Some(vec![Value::Number(4.0)]));
    assert_eq!(vm.type_name_of(tuple), "Tuple");
}

#[test]
fn unpack_too_few_values() {
    let mut vm = new_vm();
    let exception = eval(&mut vm, |asm| {
        asm.emit(OpCode::OpNewList, &[]);
        asm.emit(OpCode::OpUnpack, &[2]);
    })
    .unwrap_err();
    assert_eq!(
        vm.exception_message(exception),
        "Too few values to unpack: expected 2, got 0"
    );
}

#[test]
fn table_subscripts_dispatch_to_get_and_set() {
    let mut vm = new_vm();
    let result = eval(&mut vm, |asm| {
        asm.emit(OpCode::OpNewTable, &[]);
        asm.emit_number(5.0);
        asm.emit_str("k");
        asm.emit(OpCode::OpGetLocal, &[1]);
        asm.emit(OpCode::OpSubscrSet, &[]);
        asm.emit(OpCode::OpPop, &[]);
        asm.emit(OpCode::OpGetLocal, &[1]);
        asm.emit_str("k");
        asm.emit(OpCode::OpSubscrGet, &[]);
    });
    assert_eq!(result, Ok(Value::Number(5.0)));
}

#[test]
fn import_runs_module_once() {
    let mut vm = new_vm();
    vm.set_importer(|name| {
        if name != "lib" {
            return None;
        }
        let mut asm = Assembler::new("main");
        asm.emit_number(21.0);
        asm.emit_named(OpCode::OpDefineGlobal, "answer");
        asm.emit(OpCode::OpNull, &[]);
        asm.emit(OpCode::OpReturn, &[]);
        Some(asm.finish())
    });

    let result = eval(&mut vm, |asm| {
        asm.emit_named(OpCode::OpImport, "lib");
        asm.emit(OpCode::OpPopN, &[2]);
        asm.emit_named(OpCode::OpImport, "lib");
        asm.emit(OpCode::OpPop, &[]);
        asm.emit_named(OpCode::OpGetField, "answer");
        let module = asm.name("lib");
        let name = asm.name("answer");
        asm.emit(OpCode::OpImportName, &[module, name]);
        asm.emit(OpCode::OpAdd, &[]);
    });
    assert_eq!(result, Ok(Value::Number(42.0)));
    assert!(vm.is_module_loaded("lib"));
}

#[test]
fn unknown_module_raises_import_exception() {
    let mut vm = new_vm();
    let exception = eval(&mut vm, |asm| {
        asm.emit_named(OpCode::OpImport, "nowhere");
    })
    .unwrap_err();
    assert_eq!(vm.type_name_of(exception), "ImportException");
    assert_eq!(
        vm.exception_message(exception),
        "Cannot load module `nowhere`."
    );
}

#[test]
fn native_method_binds_core_body() {
    let mut vm = new_vm();
    let mut asm = Assembler::new("main");
    asm.emit_named(OpCode::OpNewClass, "List");
    asm.emit_native(true, "len", 0, vec![], false);
    asm.emit_named(OpCode::OpDefMethod, "len");
    asm.emit(OpCode::OpNewList, &[]);
    asm.emit_number(1.0);
    asm.emit(OpCode::OpAppendList, &[]);
    asm.emit(OpCode::OpGetLocal, &[1]);
    asm.emit_super(0, "len");
    asm.emit(OpCode::OpReturn, &[]);

    let result = vm.evaluate(CORE_MODULE, &asm.finish(), &[]);
    assert_eq!(result, Ok(Value::Number(1.0)));
}

#[test]
fn unresolved_native_raises() {
    let mut vm = new_vm();
    let exception = eval(&mut vm, |asm| {
        asm.emit_native(false, "mystery", 0, vec![], false);
    })
    .unwrap_err();
    assert_eq!(
        vm.exception_message(exception),
        "Cannot resolve native __main__.mystery()."
    );
}

#[test]
fn recursion_limit() {
    let config = VmConfig {
        max_frames: 64,
        ..VmConfig::default()
    };
    let mut vm = VM::new(config);
    let exception = eval(&mut vm, |asm| {
        let mut f = Assembler::new("f");
        f.emit_named(OpCode::OpGetGlobal, "f");
        f.emit(OpCode::OpCall, &[0]);
        f.emit(OpCode::OpReturn, &[]);
        asm.emit_closure(f.finish(), &[]);
        asm.emit_named(OpCode::OpDefineGlobal, "f");
        asm.emit_named(OpCode::OpGetGlobal, "f");
        asm.emit(OpCode::OpCall, &[0]);
    })
    .unwrap_err();
    assert_eq!(vm.type_name_of(exception), "StackOverflowException");
    assert_eq!(vm.frame_depth(), 0);
    assert_eq!(vm.stack_depth(), 0);
}

fn answer(vm: &mut VM) -> NativeResult {
    vm.push_number(42.0);
    Ok(())
}

fn double(vm: &mut VM) -> NativeResult {
    let n = vm.check_number(1, "n")?;
    vm.push_number(n * 2.0);
    Ok(())
}

/// Attaches an extension exporting `answer()` and `Calc.double(n)` to `module`.
fn attach_calc_extension(vm: &mut VM, module: &str) {
    let entries = [
        ExtensionEntry {
            class: ptr::null(),
            name: c"answer".as_ptr(),
            func: answer,
        },
        ExtensionEntry {
            class: c"Calc".as_ptr(),
            name: c"double".as_ptr(),
            func: double,
        },
    ];
    let table = ExtensionTable {
        version: ABI_VERSION,
        entry_count: entries.len(),
        entries: entries.as_ptr(),
    };
    let extension = NativeExtension::from_table("calc", &table).unwrap();
    vm.attach_extension(module, extension);
}

#[test]
fn native_binds_from_module_extension() {
    let mut vm = new_vm();
    attach_calc_extension(&mut vm, "calc");

    let mut asm = Assembler::new("main");
    asm.emit_native(false, "answer", 0, vec![], false);
    asm.emit(OpCode::OpCall, &[0]);
    asm.emit(OpCode::OpReturn, &[]);
    let result = vm.evaluate("calc", &asm.finish(), &[]);
    assert_eq!(result, Ok(Value::Number(42.0)));
}

#[test]
fn native_method_binds_from_module_extension() {
    let mut vm = new_vm();
    attach_calc_extension(&mut vm, "calc");

    let mut asm = Assembler::new("main");
    asm.emit_named(OpCode::OpNewClass, "Calc");
    asm.emit_native(true, "double", 1, vec![], false);
    asm.emit_named(OpCode::OpDefMethod, "double");
    asm.emit(OpCode::OpCall, &[0]);
    asm.emit_number(21.0);
    asm.emit_invoke(1, "double");
    asm.emit(OpCode::OpReturn, &[]);
    let result = vm.evaluate("calc", &asm.finish(), &[]);
    assert_eq!(result, Ok(Value::Number(42.0)));
}

#[test]
fn extension_of_another_module_is_not_consulted() {
    let mut vm = new_vm();
    attach_calc_extension(&mut vm, "calc");
    let exception = eval(&mut vm, |asm| {
        asm.emit_native(false, "answer", 0, vec![], false);
    })
    .unwrap_err();
    assert_eq!(
        vm.exception_message(exception),
        "Cannot resolve native __main__.answer()."
    );
}
