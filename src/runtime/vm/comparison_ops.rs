use crate::{
    bytecode::op_code::OpCode,
    runtime::{Raised, gc::HeapObject, value::Value},
};

use super::{Name, VM};

impl VM {
    /// `EQ`. Primitives compare by value and strings by content; other objects
    /// defer to `__eq__` (identity when the class has none).
    pub(super) fn execute_equality(&mut self) -> Result<(), Raised> {
        let left = self.peek(1);
        let right = self.peek(0);

        let result = match left {
            Value::Null | Value::Boolean(_) | Value::Number(_) | Value::Handle(_) => left == right,
            Value::Obj(_) => match (self.as_string(left), self.as_string(right)) {
                (Some(l), Some(r)) => l.content_eq(r),
                _ => {
                    let class = self.class_of_value(left);
                    if let Some(method) = self.lookup_method(class, self.name(Name::Eq)) {
                        return self.call_value(method, 1);
                    }
                    left == right
                }
            },
        };
        self.pop();
        self.set_peek(0, Value::Boolean(result));
        Ok(())
    }

    /// `LT`, `LE`, `GT`, `GE`: numbers inline, everything else through the
    /// comparison overloads.
    pub(super) fn execute_comparison(&mut self, op: OpCode) -> Result<(), Raised> {
        let (Value::Number(l), Value::Number(r)) = (self.peek(1), self.peek(0)) else {
            return self.binary_overload(op);
        };
        let result = match op {
            OpCode::OpLt => l < r,
            OpCode::OpLe => l <= r,
            OpCode::OpGt => l > r,
            OpCode::OpGe => l >= r,
            _ => unreachable!("{} is not a comparison", op),
        };
        self.pop();
        self.set_peek(0, Value::Boolean(result));
        Ok(())
    }

    /// `IS`: `[value, class]` becomes whether `value` is an instance of
    /// `class` or one of its subclasses.
    pub(super) fn execute_is(&mut self) -> Result<(), Raised> {
        let value = self.peek(1);
        let class = match self.peek(0) {
            Value::Obj(handle) if matches!(self.heap.get(handle), HeapObject::Class(_)) => handle,
            _ => {
                return Err(self.raise("TypeException", "Right operand of `is` must be a Class"));
            }
        };
        let result = self.is_instance(value, class);
        self.pop();
        self.set_peek(0, Value::Boolean(result));
        Ok(())
    }
}
