//! Programmatic construction of [`FunctionProto`]s.
//!
//! The VM only consumes compiled functions; this builder produces them without a
//! front end, which is what embedders, tests and benchmarks use.

use crate::bytecode::{
    chunk::{Constant, FunctionProto},
    op_code::{OpCode, make},
};

/// Position of a forward jump operand awaiting a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Label(usize);

pub struct Assembler {
    proto: FunctionProto,
    line: u32,
}

impl Assembler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            proto: FunctionProto::new(name),
            line: 1,
        }
    }

    /// Declares `arity` parameters, the trailing `defaults.len()` of which are optional.
    pub fn params(mut self, arity: u8, defaults: Vec<Constant>, vararg: bool) -> Self {
        assert!(defaults.len() <= arity as usize, "more defaults than parameters");
        self.proto.arity = arity;
        self.proto.defaults = defaults;
        self.proto.vararg = vararg;
        self
    }

    pub fn upvalues(mut self, count: u8) -> Self {
        self.proto.upvalue_count = count;
        self
    }

    /// Sets the source line attributed to subsequently emitted code.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    pub fn offset(&self) -> usize {
        self.proto.code.len()
    }

    /// Emits one instruction and returns its offset.
    pub fn emit(&mut self, op: OpCode, operands: &[usize]) -> usize {
        let offset = self.proto.code.len();
        self.proto.lines.add(offset, self.line);
        self.proto.code.extend(make(op, operands));
        offset
    }

    /// Adds a constant to the pool, reusing an equal string or number entry.
    pub fn constant(&mut self, constant: Constant) -> usize {
        let reusable = matches!(constant, Constant::Str(_) | Constant::Number(_));
        if reusable && let Some(index) = self.proto.constants.iter().position(|c| *c == constant)
        {
            return index;
        }
        assert!(self.proto.constants.len() < u16::MAX as usize, "constant pool overflow");
        self.proto.constants.push(constant);
        self.proto.constants.len() - 1
    }

    pub fn name(&mut self, name: &str) -> usize {
        self.constant(Constant::Str(name.to_string()))
    }

    pub fn emit_const(&mut self, constant: Constant) -> usize {
        let index = self.constant(constant);
        self.emit(OpCode::OpGetConst, &[index])
    }

    pub fn emit_number(&mut self, n: f64) -> usize {
        self.emit_const(Constant::Number(n))
    }

    pub fn emit_str(&mut self, s: &str) -> usize {
        self.emit_const(Constant::Str(s.to_string()))
    }

    /// Emits an instruction whose single operand is a name constant
    /// (`OpGetGlobal`, `OpGetField`, `OpNewClass`, ...).
    pub fn emit_named(&mut self, op: OpCode, name: &str) -> usize {
        let index = self.name(name);
        self.emit(op, &[index])
    }

    pub fn emit_invoke(&mut self, argc: u8, name: &str) -> usize {
        let index = self.name(name);
        self.emit(OpCode::OpInvoke, &[argc as usize, index])
    }

    pub fn emit_super(&mut self, argc: u8, name: &str) -> usize {
        let index = self.name(name);
        self.emit(OpCode::OpSuper, &[argc as usize, index])
    }

    /// Emits `OpNative`/`OpNativeMethod` binding `name` to a native with the given
    /// signature.
    pub fn emit_native(
        &mut self,
        method: bool,
        name: &str,
        arity: u8,
        defaults: Vec<Constant>,
        vararg: bool,
    ) -> usize {
        let name_index = self.name(name);
        let native_index = self.constant(Constant::Native(crate::bytecode::chunk::NativeProto {
            name: name.to_string(),
            arity,
            defaults,
            vararg,
        }));
        let op = if method {
            OpCode::OpNativeMethod
        } else {
            OpCode::OpNative
        };
        self.emit(op, &[name_index, native_index])
    }

    /// Emits a forward jump (`OpJump`, `OpJumpT`, `OpJumpF`, `OpForNext`) to be
    /// resolved with [`Self::patch`].
    pub fn emit_jump(&mut self, op: OpCode) -> Label {
        let offset = self.emit(op, &[0]);
        Label(offset + 1)
    }

    /// Emits a backward jump to `target`.
    pub fn emit_loop(&mut self, op: OpCode, target: usize) -> usize {
        let after = self.offset() + 3;
        let delta = target as isize - after as isize;
        assert!(delta >= i16::MIN as isize, "jump too far");
        self.emit(op, &[(delta as i16 as u16) as usize])
    }

    /// Emits `OpSetupExcept`/`OpSetupEnsure` whose handler address is resolved
    /// with [`Self::patch`].
    pub fn setup_handler(&mut self, op: OpCode) -> Label {
        debug_assert!(matches!(op, OpCode::OpSetupExcept | OpCode::OpSetupEnsure));
        self.emit_jump(op)
    }

    /// Points a pending jump or handler at the current offset.
    pub fn patch(&mut self, label: Label) {
        let delta = self.offset() as isize - (label.0 + 2) as isize;
        assert!(
            (0..=i16::MAX as isize).contains(&delta),
            "jump target out of range"
        );
        self.proto.code[label.0] = (delta >> 8) as u8;
        self.proto.code[label.0 + 1] = delta as u8;
    }

    /// Emits `OpClosure` over `proto`. `captures` lists `(is_local, index)` pairs,
    /// one per upvalue of `proto`.
    pub fn emit_closure(&mut self, proto: FunctionProto, captures: &[(bool, u8)]) -> usize {
        assert_eq!(
            proto.upvalue_count as usize,
            captures.len(),
            "capture list must match the function's upvalue count"
        );
        let index = self.constant(Constant::Function(Box::new(proto)));
        let offset = self.emit(OpCode::OpClosure, &[index]);
        for &(is_local, slot) in captures {
            self.proto.code.push(is_local as u8);
            self.proto.code.push(slot);
        }
        offset
    }

    pub fn finish(self) -> FunctionProto {
        self.proto
    }
}
