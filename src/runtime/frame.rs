use std::rc::Rc;

use crate::runtime::{gc::GcHandle, object::Chunk};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Except,
    Ensure,
}

/// A pending `try` block in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub kind: HandlerKind,
    /// Resume address inside the frame's code.
    pub address: usize,
    /// Stack height to restore before resuming.
    pub saved_sp: usize,
}

/// Why control entered a handler. Pushed above the exception value (or the
/// pending return value) when a handler resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnwindCause {
    Except = 0,
    Return = 1,
}

impl UnwindCause {
    pub fn from_number(n: f64) -> Self {
        if n == UnwindCause::Return as u8 as f64 {
            UnwindCause::Return
        } else {
            UnwindCause::Except
        }
    }
}

/// One activation record.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The closure or native being executed.
    pub callable: GcHandle,
    /// Code of a compiled function; `None` for natives.
    pub chunk: Option<Rc<Chunk>>,
    pub ip: usize,
    /// Stack index of slot 0 (the receiver).
    pub base: usize,
    pub handlers: Vec<Handler>,
    /// Module whose globals the frame resolves names against.
    pub module: GcHandle,
}

impl Frame {
    pub fn new(callable: GcHandle, chunk: Option<Rc<Chunk>>, base: usize, module: GcHandle) -> Self {
        Self {
            callable,
            chunk,
            ip: 0,
            base,
            handlers: Vec::new(),
            module,
        }
    }

    pub fn is_native(&self) -> bool {
        self.chunk.is_none()
    }

    /// Source line of the instruction that last executed, `0` for natives.
    pub fn current_line(&self) -> u32 {
        match &self.chunk {
            Some(chunk) => chunk.lines.line_at(self.ip.saturating_sub(1)),
            None => 0,
        }
    }
}
