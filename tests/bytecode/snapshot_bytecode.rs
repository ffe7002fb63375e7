use ember::{
    bytecode::{
        assembler::Assembler,
        chunk::FunctionProto,
        op_code::{OpCode, disassemble, make},
    },
    config::VmConfig,
    runtime::{value::Value, vm::VM},
};
use insta::assert_snapshot;

/// x = 1 + 2; fn sq(n) { n * n }; if !sq(x) { return null }; "big"
fn program() -> FunctionProto {
    let mut sq = Assembler::new("sq").params(1, vec![], false);
    sq.emit(OpCode::OpGetLocal, &[1]);
    sq.emit(OpCode::OpGetLocal, &[1]);
    sq.emit(OpCode::OpMul, &[]);
    sq.emit(OpCode::OpReturn, &[]);

    let mut main = Assembler::new("main");
    main.emit_number(1.0);
    main.emit_number(2.0);
    main.emit(OpCode::OpAdd, &[]);
    main.emit_named(OpCode::OpDefineGlobal, "x");
    main.line(2);
    main.emit_closure(sq.finish(), &[]);
    main.emit_named(OpCode::OpDefineGlobal, "sq");
    main.line(3);
    main.emit_named(OpCode::OpGetGlobal, "sq");
    main.emit_named(OpCode::OpGetGlobal, "x");
    main.emit(OpCode::OpCall, &[1]);
    let big = main.emit_jump(OpCode::OpJumpT);
    main.emit(OpCode::OpNull, &[]);
    main.emit(OpCode::OpReturn, &[]);
    main.patch(big);
    main.line(4);
    main.emit_str("big");
    main.emit(OpCode::OpReturn, &[]);
    main.finish()
}

#[test]
fn function_disassembly() {
    assert_snapshot!(program().disassemble(), @r#"
    fn main/0:
    Constants:
      0: 1
      1: 2
      2: "x"
      3: <fn sq>
      4: "sq"
      5: "big"
    Instructions:
         1 | 0000 OpGetConst 0
         1 | 0003 OpGetConst 1
         1 | 0006 OpAdd
         1 | 0007 OpDefineGlobal 2
         2 | 0010 OpClosure 3
         2 | 0013 OpDefineGlobal 4
         3 | 0016 OpGetGlobal 4
         3 | 0019 OpGetGlobal 2
         3 | 0022 OpCall 1
         3 | 0024 OpJumpT 2 (-> 0029)
         3 | 0027 OpNull
         3 | 0028 OpReturn
         4 | 0029 OpGetConst 5
         4 | 0032 OpReturn

      fn sq/1:
      Constants:
      Instructions:
           1 | 0000 OpGetLocal 1
           1 | 0002 OpGetLocal 1
           1 | 0004 OpMul
           1 | 0005 OpReturn
    "#);
}

#[test]
fn disassembled_program_runs() {
    let mut vm = VM::new(VmConfig::default());
    let result = vm.evaluate("__main__", &program(), &[]).unwrap();
    assert_eq!(vm.string_value(result).as_deref(), Some("big"));
    assert!(result.is_truthy());
    assert!(!Value::Null.is_truthy());
}

#[test]
fn closure_captures_are_listed() {
    let inner = Assembler::new("inner").upvalues(2);
    let mut outer = Assembler::new("outer").upvalues(1);
    outer.emit(OpCode::OpNull, &[]);
    outer.emit_closure(inner.finish(), &[(true, 1), (false, 0)]);
    outer.emit(OpCode::OpReturn, &[]);

    let text = outer.finish().disassemble();
    assert!(text.contains("0001 OpClosure 0 [local 1] [upvalue 0]"), "{}", text);
    assert!(text.contains("0008 OpReturn"), "{}", text);
}

#[test]
fn raw_stream_disassembly() {
    let mut code = make(OpCode::OpSetupExcept, &[4]);
    code.extend(make(OpCode::OpInvoke, &[2, 9]));
    code.extend(make(OpCode::OpPopHandler, &[]));
    code.extend(make(OpCode::OpPop, &[]));
    code.extend(make(OpCode::OpNull, &[]));
    assert_snapshot!(disassemble(&code), @r"
    0000 OpSetupExcept -> 0007
    0003 OpInvoke 2 9
    0007 OpPopHandler
    0008 OpPop
    0009 OpNull
    ");
}
