use std::rc::Rc;

use crate::{
    bytecode::op_code::{OpCode, instruction_len},
    runtime::{
        Raised, builtins,
        frame::HandlerKind,
        gc::{GcHandle, HeapObject},
        hashtable::StrKey,
        object::{Chunk, Class, Closure, List, Table, Tuple},
        value::Value,
    },
};

use super::{Name, VM};

#[inline(always)]
fn read_u8(code: &[u8], offset: usize) -> usize {
    code[offset] as usize
}

#[inline(always)]
fn read_u16(code: &[u8], offset: usize) -> usize {
    ((code[offset] as usize) << 8) | code[offset + 1] as usize
}

#[inline(always)]
fn read_i16(code: &[u8], offset: usize) -> isize {
    read_u16(code, offset) as u16 as i16 as isize
}

impl VM {
    // `Err`: an exception escaped every frame above `depth`.
    pub(crate) fn run_eval(&mut self, depth: usize) -> Result<(), Raised> {
        loop {
            match self.execute(depth) {
                Ok(()) => return Ok(()),
                Err(raised) => {
                    if !self.unwind_stack(depth) {
                        return Err(raised);
                    }
                }
            }
        }
    }

    fn current_chunk(&self) -> Rc<Chunk> {
        match self.frames.last().and_then(|frame| frame.chunk.as_ref()) {
            Some(chunk) => chunk.clone(),
            None => panic!("dispatch entered without a bytecode frame"),
        }
    }

    fn execute(&mut self, depth: usize) -> Result<(), Raised> {
        let mut frame_count = self.frames.len();
        let mut chunk = self.current_chunk();

        loop {
            if self.frames.len() != frame_count {
                frame_count = self.frames.len();
                chunk = self.current_chunk();
            }
            let fi = frame_count - 1;
            let ip = self.frames[fi].ip;
            let code = &chunk.code;
            let op = OpCode::from(code[ip]);
            let next = ip + instruction_len(op);
            self.frames[fi].ip = next;

            if self.trace {
                self.trace_instruction(&chunk, ip, op);
            }

            match op {
                OpCode::OpAdd
                | OpCode::OpSub
                | OpCode::OpMul
                | OpCode::OpDiv
                | OpCode::OpMod
                | OpCode::OpPow => self.execute_binary_operation(op)?,
                OpCode::OpBand
                | OpCode::OpBor
                | OpCode::OpXor
                | OpCode::OpLshift
                | OpCode::OpRshift => self.execute_bitwise_operation(op)?,
                OpCode::OpNeg | OpCode::OpNot | OpCode::OpInvert => {
                    self.execute_unary_operation(op)?
                }
                OpCode::OpEq => self.execute_equality()?,
                OpCode::OpLt | OpCode::OpLe | OpCode::OpGt | OpCode::OpGe => {
                    self.execute_comparison(op)?
                }
                OpCode::OpIs => self.execute_is()?,

                OpCode::OpSubscrGet => self.subscript_get()?,
                OpCode::OpSubscrSet => self.subscript_set()?,
                OpCode::OpGetField => {
                    let name = self.name_operand(&chunk, ip + 1);
                    self.get_field_key(name)?;
                }
                OpCode::OpSetField => {
                    let name = self.name_operand(&chunk, ip + 1);
                    self.set_field_key(name)?;
                }

                OpCode::OpJump => {
                    self.frames[fi].ip = jump_target(next, read_i16(code, ip + 1));
                }
                OpCode::OpJumpT => {
                    if self.pop().is_truthy() {
                        self.frames[fi].ip = jump_target(next, read_i16(code, ip + 1));
                    }
                }
                OpCode::OpJumpF => {
                    if !self.pop().is_truthy() {
                        self.frames[fi].ip = jump_target(next, read_i16(code, ip + 1));
                    }
                }

                OpCode::OpForPrep => self.for_prep()?,
                OpCode::OpForIter => {
                    let iterable = self.peek(3);
                    let state = self.peek(2);
                    self.push(iterable);
                    self.push(state);
                    let iter = self.peek(3);
                    self.call_value(iter, 1)?;
                }
                OpCode::OpForNext => {
                    let state = self.pop();
                    self.set_peek(2, state);
                    if state.is_truthy() {
                        let iterable = self.peek(3);
                        self.push(iterable);
                        self.push(state);
                        let next_method = self.peek(2);
                        self.call_value(next_method, 1)?;
                    } else {
                        self.frames[fi].ip = jump_target(next, read_i16(code, ip + 1));
                    }
                }

                OpCode::OpNull => self.push(Value::Null),
                OpCode::OpGetConst => {
                    let value = chunk.constants[read_u16(code, ip + 1)];
                    self.push(value);
                }

                OpCode::OpCall => {
                    let argc = read_u8(code, ip + 1) as u8;
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                OpCode::OpCallUnpack => {
                    let argc = self.unpack_arguments()?;
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                OpCode::OpInvoke => {
                    let argc = read_u8(code, ip + 1) as u8;
                    let name = self.name_operand(&chunk, ip + 2);
                    self.invoke_value(name, argc)?;
                }
                OpCode::OpInvokeUnpack => {
                    let name = self.name_operand(&chunk, ip + 1);
                    let argc = self.unpack_arguments()?;
                    self.invoke_value(name, argc)?;
                }
                OpCode::OpSuper => {
                    let argc = read_u8(code, ip + 1) as u8;
                    let name = self.name_operand(&chunk, ip + 2);
                    let superclass = self.pop();
                    self.super_invoke(superclass, name, argc)?;
                }
                OpCode::OpSuperUnpack => {
                    let name = self.name_operand(&chunk, ip + 1);
                    let superclass = self.pop();
                    let argc = self.unpack_arguments()?;
                    self.super_invoke(superclass, name, argc)?;
                }
                OpCode::OpSuperBind => {
                    let name = self.name_operand(&chunk, ip + 1);
                    let superclass = self.pop().as_obj().unwrap_or(self.core.object);
                    if !self.bind_method(superclass, name) {
                        return Err(self.missing_method(superclass, name));
                    }
                }
                OpCode::OpReturn => {
                    if self.return_from_frame(depth) {
                        return Ok(());
                    }
                }

                OpCode::OpImport => {
                    let name = self.name_operand(&chunk, ip + 1);
                    self.import_module(name)?;
                }
                OpCode::OpImportName => {
                    let module = self.name_operand(&chunk, ip + 1);
                    let name = self.name_operand(&chunk, ip + 3);
                    self.import_name(module, name)?;
                }

                OpCode::OpNewList => {
                    let list = self.alloc(HeapObject::List(List::default()));
                    self.push(Value::Obj(list));
                }
                OpCode::OpAppendList => {
                    let value = self.pop();
                    let list = self.peek(0);
                    if let Some(l) = self.as_list_mut(list) {
                        l.items.push(value);
                    }
                    self.recharge(list);
                }
                OpCode::OpListToTuple => {
                    let items: Box<[Value]> = match self.as_list(self.peek(0)) {
                        Some(list) => list.items.as_slice().into(),
                        None => panic!("LIST_TO_TUPLE on a non-list"),
                    };
                    let tuple = self.alloc(HeapObject::Tuple(Tuple { items }));
                    self.set_peek(0, Value::Obj(tuple));
                }
                OpCode::OpNewTuple => {
                    let n = read_u8(code, ip + 1);
                    let start = self.stack.len() - n;
                    let items: Box<[Value]> = self.stack[start..].into();
                    let tuple = self.alloc(HeapObject::Tuple(Tuple { items }));
                    self.stack.truncate(start);
                    self.push(Value::Obj(tuple));
                }
                OpCode::OpNewTable => {
                    let table = self.alloc(HeapObject::Table(Table::default()));
                    self.push(Value::Obj(table));
                }
                OpCode::OpClosure => {
                    let function = chunk.constants[read_u16(code, ip + 1)];
                    let after = self.make_closure(code, next, function);
                    self.frames[fi].ip = after;
                }

                OpCode::OpNewClass => {
                    let name = self.name_operand(&chunk, ip + 1);
                    let class = self.alloc(HeapObject::Class(Class::new(name.handle, None)));
                    self.push(Value::Obj(class));
                }
                OpCode::OpSubclass => self.subclass()?,
                OpCode::OpDefMethod => {
                    let name = self.name_operand(&chunk, ip + 1);
                    let method = self.pop();
                    let class = self.peek(0);
                    if let Some(c) = self.as_class_mut(class) {
                        c.methods.put(name, method);
                    }
                    self.recharge(class);
                }
                OpCode::OpNative | OpCode::OpNativeMethod => {
                    let name = self.name_operand(&chunk, ip + 1);
                    let native = chunk.constants[read_u16(code, ip + 3)];
                    let class = if op == OpCode::OpNativeMethod {
                        self.as_class(self.peek(0)).map(|c| c.name)
                    } else {
                        None
                    };
                    self.bind_native(name, class, native)?;
                }
                OpCode::OpGetObject => self.push(Value::Obj(self.core.object)),

                OpCode::OpDefineGlobal => {
                    let name = self.name_operand(&chunk, ip + 1);
                    self.store_global(fi, name);
                    self.pop();
                }
                OpCode::OpSetGlobal => {
                    let name = self.name_operand(&chunk, ip + 1);
                    self.store_global(fi, name);
                }
                OpCode::OpGetGlobal => {
                    let name = self.name_operand(&chunk, ip + 1);
                    self.load_global(fi, name)?;
                }

                OpCode::OpSetupExcept | OpCode::OpSetupEnsure => {
                    let kind = if op == OpCode::OpSetupExcept {
                        HandlerKind::Except
                    } else {
                        HandlerKind::Ensure
                    };
                    self.setup_handler(kind, next + read_u16(code, ip + 1))?;
                }
                OpCode::OpEndHandler => {
                    if self.end_handler(depth)? {
                        return Ok(());
                    }
                }
                OpCode::OpPopHandler => {
                    self.frames[fi].handlers.pop();
                }
                OpCode::OpRaise => return Err(self.raise_value()),

                OpCode::OpGetLocal => {
                    let value = self.stack[self.frames[fi].base + read_u8(code, ip + 1)];
                    self.push(value);
                }
                OpCode::OpSetLocal => {
                    let slot = self.frames[fi].base + read_u8(code, ip + 1);
                    self.stack[slot] = self.peek(0);
                }
                OpCode::OpGetUpvalue => {
                    let upvalue = self.frame_upvalue(fi, read_u8(code, ip + 1));
                    let value = self.read_upvalue(upvalue);
                    self.push(value);
                }
                OpCode::OpSetUpvalue => {
                    let upvalue = self.frame_upvalue(fi, read_u8(code, ip + 1));
                    self.write_upvalue(upvalue, self.peek(0));
                }
                OpCode::OpPopN => {
                    let keep = self.stack.len() - read_u8(code, ip + 1);
                    self.close_upvalues(keep);
                    self.stack.truncate(keep);
                }
                OpCode::OpPop => {
                    self.pop();
                }
                OpCode::OpCloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                OpCode::OpDup => self.push(self.peek(0)),
                OpCode::OpUnpack => {
                    let n = read_u8(code, ip + 1);
                    self.unpack(n)?;
                }
                OpCode::OpEnd => unreachable!("OpEnd is never executed"),
            }
        }
    }

    #[inline]
    fn name_operand(&self, chunk: &Chunk, offset: usize) -> StrKey {
        self.key_of(chunk.constants[read_u16(&chunk.code, offset)])
    }

    fn frame_upvalue(&self, fi: usize, index: usize) -> GcHandle {
        match self.heap.get(self.frames[fi].callable) {
            HeapObject::Closure(closure) => closure.upvalues[index],
            _ => panic!("upvalue access outside a closure"),
        }
    }

    // Returns the offset after the capture operands.
    fn make_closure(&mut self, code: &[u8], operands: usize, function: Value) -> usize {
        let Value::Obj(function) = function else {
            panic!("CLOSURE operand is not a function");
        };
        let count = match self.heap.get(function) {
            HeapObject::Function(f) => f.upvalue_count as usize,
            _ => panic!("CLOSURE operand is not a function"),
        };

        let fi = self.frames.len() - 1;
        let base = self.frames[fi].base;
        // Captured upvalues stay on the stack until the closure owns them.
        let start = self.stack.len();
        for i in 0..count {
            let is_local = code[operands + 2 * i] != 0;
            let index = code[operands + 2 * i + 1] as usize;
            let upvalue = if is_local {
                self.capture_upvalue(base + index)
            } else {
                self.frame_upvalue(fi, index)
            };
            self.push(Value::Obj(upvalue));
        }

        let upvalues: Box<[GcHandle]> = self.stack[start..]
            .iter()
            .filter_map(|value| value.as_obj())
            .collect();
        let closure = self.alloc(HeapObject::Closure(Closure { function, upvalues }));
        self.stack.truncate(start);
        self.push(Value::Obj(closure));
        operands + 2 * count
    }

    fn for_prep(&mut self) -> Result<(), Raised> {
        let class = self.class_of_value(self.peek(1));
        let iter = self.lookup_method(class, self.name(Name::Iter));
        let next = self.lookup_method(class, self.name(Name::Next));
        let (Some(iter), Some(next)) = (iter, next) else {
            let message = format!(
                "Class {} does not implement __iter__ and __next__",
                self.class_name(class)
            );
            return Err(self.raise("MethodException", message));
        };
        self.push(iter);
        self.push(next);
        Ok(())
    }

    fn unpack(&mut self, n: usize) -> Result<(), Raised> {
        let value = self.peek(0);
        let Some(items) = self.sequence_items(value) else {
            let type_name = self.type_name_of(value);
            return Err(self.raise(
                "TypeException",
                format!("Can unpack only Tuple or List, got {}.", type_name),
            ));
        };
        if items.len() < n {
            return Err(self.raise(
                "TypeException",
                format!(
                    "Too few values to unpack: expected {}, got {}",
                    n,
                    items.len()
                ),
            ));
        }
        self.pop();
        self.stack.extend_from_slice(&items[..n]);
        Ok(())
    }

    fn subclass(&mut self) -> Result<(), Raised> {
        let superclass = match self.peek(1) {
            Value::Obj(handle) if matches!(self.heap.get(handle), HeapObject::Class(_)) => handle,
            _ => {
                return Err(self.raise(
                    "TypeException",
                    "Superclass in class declaration must be a Class.",
                ));
            }
        };
        if self.core.is_builtin(superclass) {
            let message = format!("Cannot subclass builtin class {}", self.class_name(superclass));
            return Err(self.raise("TypeException", message));
        }

        let methods = match self.heap.get(superclass) {
            HeapObject::Class(c) => c.methods.clone(),
            _ => unreachable!(),
        };
        let class = self.peek(0);
        if let Some(c) = self.as_class_mut(class) {
            c.superclass = Some(superclass);
            c.methods.merge(&methods);
        }
        self.recharge(class);
        Ok(())
    }

    fn bind_native(&mut self, name: StrKey, class: Option<GcHandle>, native: Value) -> Result<(), Raised> {
        let module = self.frames[self.frames.len() - 1].module;
        let module_name = self.module_name(module).into_owned();
        let class_name = class.map(|c| self.str_of(c).into_owned());
        let method_name = self.key_str(name).into_owned();

        let func = builtins::resolve_builtin(&module_name, class_name.as_deref(), &method_name)
            .or_else(|| {
                self.as_module(Value::Obj(module))
                    .and_then(|m| m.extension.as_ref())
                    .and_then(|ext| ext.lookup(class_name.as_deref(), &method_name))
            });

        let Some(func) = func else {
            let qualified = match &class_name {
                Some(class) => format!("{}.{}.{}", module_name, class, method_name),
                None => format!("{}.{}", module_name, method_name),
            };
            return Err(self.raise(
                "Exception",
                format!("Cannot resolve native {}().", qualified),
            ));
        };

        if let Value::Obj(handle) = native
            && let HeapObject::Native(n) = self.heap.get_mut(handle)
        {
            n.func = Some(func);
        }
        self.push(native);
        Ok(())
    }

    fn store_global(&mut self, fi: usize, name: StrKey) {
        let module = Value::Obj(self.frames[fi].module);
        let value = self.peek(0);
        if let Some(m) = self.as_module_mut(module) {
            m.globals.put(name, value);
        }
        self.recharge(module);
    }

    fn load_global(&mut self, fi: usize, name: StrKey) -> Result<(), Raised> {
        let module = self.frames[fi].module;
        let value = self
            .as_module(Value::Obj(module))
            .and_then(|m| m.globals.get(name))
            .or_else(|| {
                self.as_module(Value::Obj(self.core_module))
                    .and_then(|m| m.globals.get(name))
            });
        match value {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => {
                let message = format!(
                    "Name `{}` is not defined in module `{}`.",
                    self.key_str(name),
                    self.module_name(module)
                );
                Err(self.raise("NameException", message))
            }
        }
    }

    // Leaves [module, result]; result is null on repeat imports.
    fn import_module(&mut self, name: StrKey) -> Result<(), Raised> {
        if let Some(module) = self.find_module(name) {
            self.push(Value::Obj(module));
            self.push(Value::Null);
            return Ok(());
        }

        let module_name = self.key_str(name).into_owned();
        let Some(proto) = self.load_module_proto(&module_name) else {
            return Err(self.raise(
                "ImportException",
                format!("Cannot load module `{}`.", module_name),
            ));
        };

        let module = self.module_named(&module_name);
        self.push(Value::Obj(module));
        let main = self.new_closure_for(&proto, module);
        self.push(Value::Obj(main));
        self.call_value(Value::Obj(main), 0)
    }

    fn import_name(&mut self, module: StrKey, name: StrKey) -> Result<(), Raised> {
        let Some(handle) = self.find_module(module) else {
            let message = format!("Cannot load module `{}`.", self.key_str(module));
            return Err(self.raise("ImportException", message));
        };
        match self.as_module(Value::Obj(handle)).and_then(|m| m.globals.get(name)) {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => {
                let message = format!(
                    "Name `{}` not defined in module `{}`.",
                    self.key_str(name),
                    self.key_str(module)
                );
                Err(self.raise("NameException", message))
            }
        }
    }
}

#[inline(always)]
fn jump_target(next: usize, offset: isize) -> usize {
    (next as isize + offset) as usize
}
