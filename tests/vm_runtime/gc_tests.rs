mod common;

use common::{emit_for, new_vm, run};
use ember::{
    bytecode::{assembler::Assembler, op_code::OpCode},
    config::VmConfig,
    runtime::{
        value::Value,
        vm::{MAIN_MODULE, VM},
    },
};

fn small_heap() -> VM {
    VM::new(VmConfig {
        first_gc: 4 * 1024,
        ..VmConfig::default()
    })
}

/// `while i < n { <body>; i = i + 1 }` with `i` in local `counter`.
fn emit_counted_loop(asm: &mut Assembler, counter: usize, n: f64, body: impl FnOnce(&mut Assembler)) {
    asm.emit_number(0.0);
    let start = asm.offset();
    asm.emit(OpCode::OpGetLocal, &[counter]);
    asm.emit_number(n);
    asm.emit(OpCode::OpLt, &[]);
    let exit = asm.emit_jump(OpCode::OpJumpF);
    body(asm);
    asm.emit(OpCode::OpGetLocal, &[counter]);
    asm.emit_number(1.0);
    asm.emit(OpCode::OpAdd, &[]);
    asm.emit(OpCode::OpSetLocal, &[counter]);
    asm.emit(OpCode::OpPop, &[]);
    asm.emit_loop(OpCode::OpJump, start);
    asm.patch(exit);
}

/// Live objects once everything unreachable has been swept.
fn settled_live_objects(vm: &mut VM) -> usize {
    vm.collect_garbage();
    vm.gc_stats().live_objects
}

#[test]
fn discarded_objects_are_reclaimed() {
    let mut vm = new_vm();
    run(&mut vm, |asm| {
        asm.emit(OpCode::OpNull, &[]);
    })
    .unwrap();
    let baseline = settled_live_objects(&mut vm);

    run(&mut vm, |asm| {
        emit_counted_loop(asm, 1, 1000.0, |body| {
            body.emit(OpCode::OpNewList, &[]);
            body.emit(OpCode::OpPop, &[]);
        });
        asm.emit(OpCode::OpNull, &[]);
    })
    .unwrap();
    assert!(vm.gc_stats().live_objects >= baseline + 1000);

    let after = settled_live_objects(&mut vm);
    assert_eq!(after, baseline);
}

#[test]
fn cycles_are_collected() {
    let mut vm = new_vm();
    run(&mut vm, |asm| {
        asm.emit(OpCode::OpNull, &[]);
    })
    .unwrap();
    let baseline = settled_live_objects(&mut vm);

    // node.next = node, then drop every reference to it.
    run(&mut vm, |asm| {
        asm.emit_named(OpCode::OpNewClass, "Node");
        asm.emit(OpCode::OpCall, &[0]);
        asm.emit(OpCode::OpGetLocal, &[1]);
        asm.emit(OpCode::OpGetLocal, &[1]);
        asm.emit_named(OpCode::OpSetField, "next");
        asm.emit(OpCode::OpPop, &[]);
        asm.emit(OpCode::OpPop, &[]);
        asm.emit(OpCode::OpNull, &[]);
    })
    .unwrap();

    assert_eq!(settled_live_objects(&mut vm), baseline);
}

#[test]
fn reachable_objects_survive_frequent_collections() {
    let mut vm = small_heap();
    // acc = ""; items = []; repeat 300 { acc = acc + "a"; items.add(acc) }
    let items = run(&mut vm, |asm| {
        asm.emit_str("");
        asm.emit(OpCode::OpNewList, &[]);
        emit_counted_loop(asm, 3, 300.0, |body| {
            body.emit(OpCode::OpGetLocal, &[1]);
            body.emit_str("a");
            body.emit(OpCode::OpAdd, &[]);
            body.emit(OpCode::OpSetLocal, &[1]);
            body.emit(OpCode::OpPop, &[]);
            body.emit(OpCode::OpGetLocal, &[2]);
            body.emit(OpCode::OpGetLocal, &[1]);
            body.emit_invoke(1, "add");
            body.emit(OpCode::OpPop, &[]);
        });
        asm.emit(OpCode::OpGetLocal, &[2]);
    })
    .unwrap();
    assert!(vm.gc_stats().collections > 0);

    vm.push_value(items);
    assert_eq!(vm.list_len(-1), Some(300));
    vm.list_get(-1, 299).unwrap();
    assert_eq!(vm.get_string(-1).map(|s| s.len()), Some(300));
}

#[test]
fn globals_and_closures_are_roots() {
    let mut vm = small_heap();
    run(&mut vm, |asm| {
        asm.emit(OpCode::OpNewList, &[]);
        asm.emit_named(OpCode::OpDefineGlobal, "kept");
        emit_counted_loop(asm, 1, 500.0, |body| {
            body.emit_named(OpCode::OpGetGlobal, "kept");
            body.emit_str("x");
            body.emit_invoke(1, "add");
            body.emit(OpCode::OpPop, &[]);
            body.emit(OpCode::OpNewTable, &[]);
            body.emit(OpCode::OpPop, &[]);
        });
        asm.emit(OpCode::OpNull, &[]);
    })
    .unwrap();
    vm.collect_garbage();

    let total = run(&mut vm, |asm| {
        asm.emit_number(0.0);
        asm.emit_named(OpCode::OpGetGlobal, "kept");
        emit_for(asm, |body| {
            body.emit(OpCode::OpGetLocal, &[1]);
            body.emit(OpCode::OpGetLocal, &[6]);
            body.emit_invoke(0, "len");
            body.emit(OpCode::OpAdd, &[]);
            body.emit(OpCode::OpSetLocal, &[1]);
            body.emit(OpCode::OpPop, &[]);
        });
        asm.emit(OpCode::OpGetLocal, &[1]);
    });
    assert_eq!(total, Ok(Value::Number(500.0)));
}

#[test]
fn disabled_gc_never_collects_on_its_own() {
    let mut vm = small_heap();
    let before = vm.gc_stats().collections;
    vm.with_gc_disabled(|vm| {
        for _ in 0..2000 {
            vm.push_list();
            vm.pop_value();
        }
    });
    assert_eq!(vm.gc_stats().collections, before);

    vm.collect_garbage();
    assert_eq!(vm.gc_stats().collections, before + 1);
}

#[test]
fn stats_serialize() {
    let mut vm = new_vm();
    vm.collect_garbage();
    let stats = serde_json::to_value(vm.gc_stats()).unwrap();
    assert_eq!(stats["collections"], 1);
    assert!(stats["live_objects"].as_u64().unwrap() > 0);
    assert!(stats["bytes_allocated"].as_u64().unwrap() > 0);
}

#[test]
fn module_globals_survive_collection() {
    let mut vm = small_heap();
    run(&mut vm, |asm| {
        asm.emit_str("hello");
        asm.emit_named(OpCode::OpDefineGlobal, "greeting");
        asm.emit(OpCode::OpNull, &[]);
    })
    .unwrap();
    vm.collect_garbage();
    vm.get_global(Some(MAIN_MODULE), "greeting").unwrap();
    assert_eq!(vm.get_string(-1).as_deref(), Some("hello"));
}
