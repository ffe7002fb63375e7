mod common;

use std::{cell::Cell, rc::Rc};

use common::{define_function, emit_for, emit_list, new_vm, run};
use ember::{
    bytecode::{assembler::Assembler, op_code::OpCode},
    config::VmConfig,
    runtime::{
        value::Value,
        vm::{MAIN_MODULE, VM},
    },
};

fn define_fib(asm: &mut Assembler) {
    define_function(asm, "fib", 1, |f| {
        f.emit(OpCode::OpGetLocal, &[1]);
        f.emit_number(2.0);
        f.emit(OpCode::OpLt, &[]);
        let recurse = f.emit_jump(OpCode::OpJumpF);
        f.emit(OpCode::OpGetLocal, &[1]);
        f.emit(OpCode::OpReturn, &[]);
        f.patch(recurse);
        for step in [1.0, 2.0] {
            f.emit_named(OpCode::OpGetGlobal, "fib");
            f.emit(OpCode::OpGetLocal, &[1]);
            f.emit_number(step);
            f.emit(OpCode::OpSub, &[]);
            f.emit(OpCode::OpCall, &[1]);
        }
        f.emit(OpCode::OpAdd, &[]);
    });
}

#[test]
fn test_recursive_fib() {
    let mut vm = new_vm();
    let result = run(&mut vm, |asm| {
        define_fib(asm);
        asm.emit_named(OpCode::OpGetGlobal, "fib");
        asm.emit_number(15.0);
        asm.emit(OpCode::OpCall, &[1]);
    });
    assert_eq!(result, Ok(Value::Number(610.0)));
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn test_host_calls_guest_function() {
    let mut vm = new_vm();
    run(&mut vm, |asm| {
        define_fib(asm);
        asm.emit(OpCode::OpNull, &[]);
    })
    .unwrap();

    vm.get_global(Some(MAIN_MODULE), "fib").unwrap();
    vm.push_number(10.0);
    vm.call(1).unwrap();
    assert_eq!(vm.get_number(-1), Some(55.0));
    vm.pop_value();
    assert_eq!(vm.stack_depth(), 0);
}

#[test]
fn test_push_function_with_arguments() {
    let mut vm = new_vm();
    let mut asm = Assembler::new("scale").params(2, vec![], false);
    asm.emit(OpCode::OpGetLocal, &[1]);
    asm.emit(OpCode::OpGetLocal, &[2]);
    asm.emit(OpCode::OpMul, &[]);
    asm.emit(OpCode::OpReturn, &[]);
    let proto = asm.finish();

    vm.push_function("geometry", &proto);
    vm.push_number(6.0);
    vm.push_number(7.0);
    vm.call(2).unwrap();
    assert_eq!(vm.get_number(-1), Some(42.0));
    assert!(vm.is_module_loaded("geometry"));
}

#[test]
fn test_list_natives() {
    let mut vm = new_vm();
    let len = run(&mut vm, |asm| {
        emit_list(asm, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        asm.emit_invoke(0, "len");
    });
    assert_eq!(len, Ok(Value::Number(5.0)));

    let built = run(&mut vm, |asm| {
        asm.emit_named(OpCode::OpGetGlobal, "List");
        for n in [1.0, 2.0, 3.0] {
            asm.emit_number(n);
        }
        asm.emit(OpCode::OpCall, &[3]);
        asm.emit(OpCode::OpDup, &[]);
        asm.emit_number(4.0);
        asm.emit_invoke(1, "add");
        asm.emit(OpCode::OpPop, &[]);
    })
    .unwrap();
    assert_eq!(
        vm.sequence_items(built),
        Some(vec![
            Value::Number(1.0),
            Value::Number(2.0),
            Value::Number(3.0),
            Value::Number(4.0),
        ])
    );
}

#[test]
fn test_for_loop_sums_a_list() {
    let mut vm = new_vm();
    let result = run(&mut vm, |asm| {
        asm.emit_number(0.0);
        emit_list(asm, &[1.0, 2.0, 3.0, 4.0]);
        emit_for(asm, |body| {
            body.emit(OpCode::OpGetLocal, &[1]);
            body.emit(OpCode::OpGetLocal, &[6]);
            body.emit(OpCode::OpAdd, &[]);
            body.emit(OpCode::OpSetLocal, &[1]);
            body.emit(OpCode::OpPop, &[]);
        });
        asm.emit(OpCode::OpGetLocal, &[1]);
    });
    assert_eq!(result, Ok(Value::Number(10.0)));
}

#[test]
fn test_for_loop_over_string_bytes() {
    let mut vm = new_vm();
    let result = run(&mut vm, |asm| {
        asm.emit_str("");
        asm.emit_str("abc");
        emit_for(asm, |body| {
            body.emit(OpCode::OpGetLocal, &[6]);
            body.emit(OpCode::OpGetLocal, &[1]);
            body.emit(OpCode::OpAdd, &[]);
            body.emit(OpCode::OpSetLocal, &[1]);
            body.emit(OpCode::OpPop, &[]);
        });
        asm.emit(OpCode::OpGetLocal, &[1]);
    })
    .unwrap();
    assert_eq!(vm.string_value(result).as_deref(), Some("cba"));
}

#[test]
fn test_table_subscripts_and_iteration() {
    let mut vm = new_vm();
    let result = run(&mut vm, |asm| {
        asm.emit_named(OpCode::OpGetGlobal, "Table");
        asm.emit(OpCode::OpCall, &[0]);
        for key in [1.0, 2.0, 3.0] {
            asm.emit_number(key * 10.0);
            asm.emit_number(key);
            asm.emit(OpCode::OpGetLocal, &[1]);
            asm.emit(OpCode::OpSubscrSet, &[]);
            asm.emit(OpCode::OpPop, &[]);
        }

        asm.emit_number(0.0);
        asm.emit(OpCode::OpGetLocal, &[1]);
        emit_for(asm, |body| {
            // sum += table[key]
            body.emit(OpCode::OpGetLocal, &[2]);
            body.emit(OpCode::OpGetLocal, &[1]);
            body.emit(OpCode::OpGetLocal, &[7]);
            body.emit(OpCode::OpSubscrGet, &[]);
            body.emit(OpCode::OpAdd, &[]);
            body.emit(OpCode::OpSetLocal, &[2]);
            body.emit(OpCode::OpPop, &[]);
        });
        asm.emit(OpCode::OpGetLocal, &[2]);
    });
    assert_eq!(result, Ok(Value::Number(60.0)));
}

#[test]
fn test_table_methods() {
    let mut vm = new_vm();
    vm.get_global(None, "Table").unwrap();
    vm.call(0).unwrap();

    vm.push_slot(-1);
    vm.push_string("k");
    vm.push_bool(true);
    vm.call_method("__set__", 2).unwrap();
    vm.pop_value();

    vm.push_slot(-1);
    vm.push_string("k");
    vm.call_method("contains", 1).unwrap();
    assert_eq!(vm.get_bool(-1), Some(true));
    vm.pop_value();

    vm.push_slot(-1);
    vm.push_string("k");
    vm.call_method("delete", 1).unwrap();
    vm.pop_value();

    vm.push_slot(-1);
    vm.call_method("len", 0).unwrap();
    assert_eq!(vm.get_number(-1), Some(0.0));
}

fn module_proto() -> ember::bytecode::chunk::FunctionProto {
    let mut asm = Assembler::new("main");
    define_function(&mut asm, "square", 1, |f| {
        f.emit(OpCode::OpGetLocal, &[1]);
        f.emit(OpCode::OpGetLocal, &[1]);
        f.emit(OpCode::OpMul, &[]);
    });
    asm.emit(OpCode::OpNull, &[]);
    asm.emit(OpCode::OpReturn, &[]);
    asm.finish()
}

#[test]
fn test_import_runs_module_once() {
    let mut vm = new_vm();
    let loads = Rc::new(Cell::new(0));
    let counter = Rc::clone(&loads);
    vm.set_importer(move |name| {
        if name != "math" {
            return None;
        }
        counter.set(counter.get() + 1);
        Some(module_proto())
    });

    let result = run(&mut vm, |asm| {
        for _ in 0..2 {
            asm.emit_named(OpCode::OpImport, "math");
            asm.emit(OpCode::OpPopN, &[2]);
        }
        let module = asm.name("math");
        let name = asm.name("square");
        asm.emit(OpCode::OpImportName, &[module, name]);
        asm.emit_number(7.0);
        asm.emit(OpCode::OpCall, &[1]);
    });
    assert_eq!(result, Ok(Value::Number(49.0)));
    assert_eq!(loads.get(), 1);
    assert!(vm.is_module_loaded("math"));
}

#[test]
fn test_unknown_import() {
    let mut vm = new_vm();
    vm.set_importer(|_| None);
    let exception = run(&mut vm, |asm| {
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
fn test_core_globals_are_visible_from_any_module() {
    let mut vm = new_vm();
    let mut asm = Assembler::new("main");
    asm.emit_named(OpCode::OpGetGlobal, "List");
    asm.emit(OpCode::OpReturn, &[]);
    let class = vm.evaluate("app", &asm.finish(), &[]).unwrap();
    assert_eq!(vm.type_name_of(class), "Class");
}

#[test]
fn test_tracing_does_not_change_results() {
    let mut vm = VM::new(VmConfig {
        trace: true,
        ..VmConfig::default()
    });
    let result = run(&mut vm, |asm| {
        emit_list(asm, &[1.0, 2.0]);
        asm.emit_invoke(0, "len");
    });
    assert_eq!(result, Ok(Value::Number(2.0)));

    vm.set_trace(false);
    let result = run(&mut vm, |asm| {
        asm.emit_number(1.0);
    });
    assert_eq!(result, Ok(Value::Number(1.0)));
}

#[test]
fn test_host_argument_checks() {
    let mut vm = new_vm();
    vm.push_string("x");
    assert!(vm.check_number(-1, "count").is_err());
    let exception = vm.value_at(-1);
    assert_eq!(vm.type_name_of(exception), "TypeException");
    assert_eq!(vm.exception_message(exception), "count must be a number.");
}
