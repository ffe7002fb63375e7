mod common;

use common::{emit_list, new_vm, run};
use ember::{
    bytecode::{assembler::Assembler, op_code::OpCode},
    config::VmConfig,
    runtime::{
        value::Value,
        vm::{MAIN_MODULE, VM},
    },
};
use serde_json::json;

/// `f` reads an undefined global on line 3; main calls it on line 5.
fn failing_call(vm: &mut VM) -> Value {
    let mut f = Assembler::new("f");
    f.line(3);
    f.emit_named(OpCode::OpGetGlobal, "missing");
    f.emit(OpCode::OpReturn, &[]);

    let mut main = Assembler::new("main");
    main.emit_closure(f.finish(), &[]);
    main.emit_named(OpCode::OpDefineGlobal, "f");
    main.line(5);
    main.emit_named(OpCode::OpGetGlobal, "f");
    main.emit(OpCode::OpCall, &[0]);
    main.emit(OpCode::OpReturn, &[]);
    vm.evaluate(MAIN_MODULE, &main.finish(), &[]).unwrap_err()
}

fn emit_raise(asm: &mut Assembler, class: &str, message: &str) {
    asm.emit_named(OpCode::OpGetGlobal, class);
    asm.emit_str(message);
    asm.emit(OpCode::OpCall, &[1]);
    asm.emit(OpCode::OpRaise, &[]);
}

#[test]
fn traceback_lists_frames_most_recent_last() {
    let mut vm = new_vm();
    let exception = failing_call(&mut vm);
    insta::assert_snapshot!(vm.format_exception(exception), @r"
    Traceback (most recent call last):
        [line 5] in __main__.main()
        [line 3] in __main__.f()
    NameException: Name `missing` is not defined in module `__main__`.
    ");
}

#[test]
fn traceback_folds_recursion() {
    let mut vm = VM::new(VmConfig {
        max_frames: 10,
        ..VmConfig::default()
    });
    let mut f = Assembler::new("f");
    f.line(2);
    f.emit_named(OpCode::OpGetGlobal, "f");
    f.emit(OpCode::OpCall, &[0]);
    f.emit(OpCode::OpReturn, &[]);

    let exception = run(&mut vm, |asm| {
        asm.emit_closure(f.finish(), &[]);
        asm.emit_named(OpCode::OpDefineGlobal, "f");
        asm.emit_named(OpCode::OpGetGlobal, "f");
        asm.emit(OpCode::OpCall, &[0]);
    })
    .unwrap_err();

    insta::assert_snapshot!(vm.format_exception(exception), @r"
    Traceback (most recent call last):
        [line 1] in __main__.main()
        [line 2] in __main__.f()
        ...
        [Previous line repeated 7 times]
    StackOverflowException: Exceeded maximum recursion depth
    ");
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn traceback_exports_as_json() {
    let mut vm = new_vm();
    let exception = failing_call(&mut vm);
    assert_eq!(
        vm.exception_trace_json(exception),
        Some(json!({
            "records": [
                { "module": "__main__", "function": "f", "line": 3, "repeat": 1 },
                { "module": "__main__", "function": "main", "line": 5, "repeat": 1 },
            ]
        }))
    );
}

#[test]
fn handler_catches_native_errors() {
    let mut vm = new_vm();
    let result = run(&mut vm, |asm| {
        let handler = asm.setup_handler(OpCode::OpSetupExcept);
        emit_list(asm, &[1.0]);
        asm.emit_number(5.0);
        asm.emit(OpCode::OpSubscrGet, &[]);
        asm.emit(OpCode::OpPopHandler, &[]);
        asm.emit(OpCode::OpReturn, &[]);
        asm.patch(handler);
        asm.emit(OpCode::OpPop, &[]);
        asm.emit_named(OpCode::OpGetGlobal, "IndexOutOfBoundException");
        asm.emit(OpCode::OpIs, &[]);
    });
    assert_eq!(result, Ok(Value::Boolean(true)));
}

#[test]
fn ensure_in_callee_runs_before_caller_handler() {
    let mut vm = new_vm();
    let mut f = Assembler::new("f");
    let ensure = f.setup_handler(OpCode::OpSetupEnsure);
    emit_raise(&mut f, "TypeException", "from f");
    f.emit(OpCode::OpPopHandler, &[]);
    f.emit(OpCode::OpNull, &[]);
    f.emit(OpCode::OpNull, &[]);
    f.patch(ensure);
    f.emit_const(ember::bytecode::chunk::Constant::Bool(true));
    f.emit_named(OpCode::OpDefineGlobal, "cleaned");
    f.emit(OpCode::OpEndHandler, &[]);
    f.emit(OpCode::OpPopN, &[2]);
    f.emit(OpCode::OpNull, &[]);
    f.emit(OpCode::OpReturn, &[]);

    let message = run(&mut vm, |asm| {
        asm.emit_closure(f.finish(), &[]);
        asm.emit_named(OpCode::OpDefineGlobal, "f");
        let handler = asm.setup_handler(OpCode::OpSetupExcept);
        asm.emit_named(OpCode::OpGetGlobal, "f");
        asm.emit(OpCode::OpCall, &[0]);
        asm.emit(OpCode::OpPopHandler, &[]);
        asm.emit(OpCode::OpReturn, &[]);
        asm.patch(handler);
        asm.emit(OpCode::OpPop, &[]);
        asm.emit_invoke(0, "err");
    })
    .unwrap();
    assert_eq!(vm.string_value(message).as_deref(), Some("from f"));

    vm.get_global(Some(MAIN_MODULE), "cleaned").unwrap();
    assert_eq!(vm.get_bool(-1), Some(true));
}

#[test]
fn caught_exception_renders_its_stacktrace() {
    let mut vm = new_vm();
    let rendered = run(&mut vm, |asm| {
        let handler = asm.setup_handler(OpCode::OpSetupExcept);
        emit_raise(asm, "TypeException", "boom");
        asm.emit(OpCode::OpPopHandler, &[]);
        asm.emit(OpCode::OpNull, &[]);
        asm.emit(OpCode::OpReturn, &[]);
        asm.patch(handler);
        asm.emit(OpCode::OpPop, &[]);
        asm.emit_invoke(0, "getStacktrace");
    })
    .unwrap();
    assert_eq!(
        vm.string_value(rendered).as_deref(),
        Some("Traceback (most recent call last):\n    [line 1] in __main__.main()\nTypeException: boom")
    );
}

#[test]
fn uncaught_exception_leaves_a_clean_stack() {
    let mut vm = new_vm();
    let exception = run(&mut vm, |asm| {
        asm.emit_number(1.0);
        asm.emit_number(2.0);
        emit_raise(asm, "Exception", "deep");
    })
    .unwrap_err();
    assert_eq!(vm.exception_message(exception), "deep");
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.frame_depth(), 0);

    // The VM stays usable.
    let result = run(&mut vm, |asm| {
        asm.emit_number(3.0);
    });
    assert_eq!(result, Ok(Value::Number(3.0)));
}

#[test]
fn raising_from_the_host() {
    let mut vm = new_vm();
    let _ = vm.raise("InvalidArgException", "bad input");
    let exception = vm.pop_value();
    assert_eq!(vm.type_name_of(exception), "InvalidArgException");
    assert_eq!(vm.format_exception(exception), "InvalidArgException: bad input");
}
