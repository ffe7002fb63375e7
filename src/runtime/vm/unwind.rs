//! Exception propagation, `try` handlers and frame teardown on return.

use crate::runtime::{
    Raised,
    frame::{Handler, HandlerKind, UnwindCause},
    gc::{GcHandle, HeapObject},
    object::{FrameRecord, StackTrace},
    value::Value,
};

use super::{Name, VM};

impl VM {
    /// Raises the exception instance on top of the stack (`raise e`).
    pub(super) fn raise_value(&mut self) -> Raised {
        let exception = self.peek(0);
        if !self.is_instance(exception, self.core.exception) {
            let type_name = self.type_name_of(exception);
            self.pop();
            return self.raise(
                "TypeException",
                format!("Can only raise Exception instances, got {}.", type_name),
            );
        }

        match self.exception_trace(exception) {
            Some(trace) => {
                if let HeapObject::StackTrace(st) = self.heap.get_mut(trace) {
                    st.last_traced_depth = None;
                }
            }
            None => {
                let trace = self.alloc(HeapObject::StackTrace(StackTrace::default()));
                let key = self.name(Name::ExcTrace);
                if let Some(instance) = self.as_instance_mut(exception) {
                    instance.fields.put(key, Value::Obj(trace));
                }
            }
        }
        Raised
    }

    pub(super) fn exception_trace(&self, exception: Value) -> Option<GcHandle> {
        let instance = self.as_instance(exception)?;
        match instance.fields.get(self.name(Name::ExcTrace))? {
            Value::Obj(handle) if matches!(self.heap.get(handle), HeapObject::StackTrace(_)) => {
                Some(handle)
            }
            _ => None,
        }
    }

    fn frame_record(&self, index: usize) -> FrameRecord {
        let frame = &self.frames[index];
        let proto = self.proto_of(frame.callable);
        FrameRecord {
            module: self.module_name(frame.module).into_owned(),
            function: self.str_of(proto.name).into_owned(),
            line: frame.current_line(),
            repeat: 0,
        }
    }

    /// Walks frames above `depth` looking for a handler for the exception on
    /// top of the stack, recording each frame in its stack trace.
    ///
    /// Returns `true` when a handler was found and execution can resume in its
    /// frame. Otherwise every frame above `depth` is gone and the stack is cut
    /// back to the lowest popped frame's base, with the exception on top.
    pub(crate) fn unwind_stack(&mut self, depth: usize) -> bool {
        let exception = self.peek(0);
        let trace = self.exception_trace(exception);
        let mut lowest_base = None;

        while self.frames.len() > depth {
            let index = self.frames.len() - 1;
            if let Some(trace) = trace {
                let record = self.frame_record(index);
                if let HeapObject::StackTrace(st) = self.heap.get_mut(trace) {
                    st.record(index + 1, record);
                }
            }

            if let Some(handler) = self.frames[index].handlers.pop() {
                let exception = self.pop();
                self.restore_handler(handler, UnwindCause::Except, exception);
                return true;
            }

            let base = self.frames[index].base;
            self.close_upvalues(base);
            self.frames.pop();
            lowest_base = Some(base);
        }

        if let Some(base) = lowest_base {
            let exception = self.pop();
            self.stack.truncate(base);
            self.push(exception);
        }
        false
    }

    /// Resumes the current frame at `handler`, leaving `value` and the cause
    /// on top of the restored stack.
    fn restore_handler(&mut self, handler: Handler, cause: UnwindCause, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.ip = handler.address;
        }
        self.close_upvalues(handler.saved_sp);
        self.stack.truncate(handler.saved_sp);
        self.push(value);
        self.push(Value::Number(cause as u8 as f64));
    }

    pub(super) fn setup_handler(&mut self, kind: HandlerKind, address: usize) -> Result<(), Raised> {
        let saved_sp = self.stack.len();
        let max = self.config.max_handlers;
        let index = self.frames.len() - 1;
        if self.frames[index].handlers.len() >= max {
            return Err(self.raise(
                "Exception",
                format!("Exceeded maximum number of nested try blocks ({})", max),
            ));
        }
        self.frames[index].handlers.push(Handler {
            kind,
            address,
            saved_sp,
        });
        Ok(())
    }

    /// Pops handlers of the current frame until an `ensure` one is found,
    /// and resumes there with `value` pending.
    fn resume_ensure(&mut self, value: Value) -> bool {
        let Some(index) = self.frames.len().checked_sub(1) else {
            return false;
        };
        while let Some(handler) = self.frames[index].handlers.pop() {
            if handler.kind == HandlerKind::Ensure {
                self.restore_handler(handler, UnwindCause::Return, value);
                return true;
            }
        }
        false
    }

    /// Returns the value on top of the stack from the current frame.
    ///
    /// Pending `ensure` blocks run first; the return completes when they
    /// reach `END_HANDLER`. Returns `true` once the frame count drops to `depth`.
    pub(super) fn return_from_frame(&mut self, depth: usize) -> bool {
        let value = self.pop();
        if self.resume_ensure(value) {
            return false;
        }

        let Some(frame) = self.frames.pop() else {
            unreachable!("return outside a frame");
        };
        self.close_upvalues(frame.base);
        self.stack.truncate(frame.base);
        self.push(value);
        self.frames.len() == depth
    }

    /// `END_HANDLER`: finishes an `ensure` block by carrying on with whatever
    /// interrupted the `try` body. With `null` on top the body completed
    /// normally (or the exception was handled) and nothing happens.
    pub(super) fn end_handler(&mut self, depth: usize) -> Result<bool, Raised> {
        let Value::Number(cause) = self.peek(0) else {
            return Ok(false);
        };
        self.pop();
        match UnwindCause::from_number(cause) {
            UnwindCause::Except => Err(Raised),
            UnwindCause::Return => Ok(self.return_from_frame(depth)),
        }
    }
}
