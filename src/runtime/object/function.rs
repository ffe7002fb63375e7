use std::rc::Rc;

use crate::{
    bytecode::chunk::LineTable,
    runtime::{NativeFn, gc::GcHandle, value::Value},
};

/// Callable metadata shared by compiled functions and natives.
#[derive(Debug, Clone)]
pub struct Proto {
    /// Interned display name.
    pub name: GcHandle,
    /// Owning module.
    pub module: GcHandle,
    /// Declared parameter count, defaults included.
    pub arity: u8,
    /// Values for the trailing `defaults.len()` parameters.
    pub defaults: Box<[Value]>,
    pub vararg: bool,
}

impl Proto {
    /// Number of arguments that must always be supplied.
    pub fn required(&self) -> u8 {
        self.arity - self.defaults.len() as u8
    }

    pub(crate) fn trace(&self, out: &mut Vec<GcHandle>) {
        out.push(self.name);
        out.push(self.module);
        trace_values(&self.defaults, out);
    }
}

/// Executable code of a published function. Shared with active frames.
#[derive(Debug)]
pub struct Chunk {
    pub code: Box<[u8]>,
    pub constants: Box<[Value]>,
    pub lines: LineTable,
}

#[derive(Debug)]
pub struct Function {
    pub proto: Proto,
    pub chunk: Rc<Chunk>,
    pub upvalue_count: u8,
}

#[derive(Debug)]
pub struct Native {
    pub proto: Proto,
    /// `None` until the native is bound by name.
    pub func: Option<NativeFn>,
}

#[derive(Debug)]
pub struct Closure {
    pub function: GcHandle,
    pub upvalues: Box<[GcHandle]>,
}

/// A method read off a receiver: calling it passes `receiver` as slot 0.
#[derive(Debug, Clone, Copy)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: GcHandle,
}

pub(crate) fn trace_values(values: &[Value], out: &mut Vec<GcHandle>) {
    for value in values {
        if let Value::Obj(handle) = value {
            out.push(*handle);
        }
    }
}
