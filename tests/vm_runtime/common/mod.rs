#![allow(dead_code)]

use ember::{
    bytecode::{assembler::Assembler, op_code::OpCode},
    config::VmConfig,
    runtime::{
        value::Value,
        vm::{MAIN_MODULE, VM},
    },
};

pub fn new_vm() -> VM {
    VM::new(VmConfig::default())
}

/// Runs `build` as the main function of `__main__`; the value left on top is
/// returned.
pub fn run(vm: &mut VM, build: impl FnOnce(&mut Assembler)) -> Result<Value, Value> {
    let mut asm = Assembler::new("main");
    build(&mut asm);
    asm.emit(OpCode::OpReturn, &[]);
    vm.evaluate(MAIN_MODULE, &asm.finish(), &[])
}

/// Defines global `name` as a closure over no upvalues taking `arity`
/// parameters. The value `body` leaves on top is returned.
pub fn define_function(asm: &mut Assembler, name: &str, arity: u8, body: impl FnOnce(&mut Assembler)) {
    let mut function = Assembler::new(name).params(arity, vec![], false);
    body(&mut function);
    function.emit(OpCode::OpReturn, &[]);
    asm.emit_closure(function.finish(), &[]);
    asm.emit_named(OpCode::OpDefineGlobal, name);
}

/// Emits a list literal of numbers.
pub fn emit_list(asm: &mut Assembler, items: &[f64]) {
    asm.emit(OpCode::OpNewList, &[]);
    for item in items {
        asm.emit_number(*item);
        asm.emit(OpCode::OpAppendList, &[]);
    }
}

/// Loops over the iterable on top of the stack. `body` runs with the current
/// item on top and must leave the stack as it found it.
pub fn emit_for(asm: &mut Assembler, body: impl FnOnce(&mut Assembler)) {
    asm.emit(OpCode::OpNull, &[]);
    asm.emit(OpCode::OpForPrep, &[]);
    let start = asm.offset();
    asm.emit(OpCode::OpForIter, &[]);
    let exit = asm.emit_jump(OpCode::OpForNext);
    body(asm);
    asm.emit(OpCode::OpPop, &[]);
    asm.emit_loop(OpCode::OpJump, start);
    asm.patch(exit);
    asm.emit(OpCode::OpPopN, &[4]);
}
