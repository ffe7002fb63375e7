use crate::{
    bytecode::op_code::OpCode,
    runtime::{
        Raised,
        gc::HeapObject,
        object::StrObj,
        value::{Value, has_int_repr},
    },
};

use super::{Name, VM};

/// Operator symbol and the forward/reflected overload names for `op`.
fn overloads(op: OpCode) -> (&'static str, Name, Option<Name>) {
    match op {
        OpCode::OpAdd => ("+", Name::Add, Some(Name::Radd)),
        OpCode::OpSub => ("-", Name::Sub, Some(Name::Rsub)),
        OpCode::OpMul => ("*", Name::Mul, Some(Name::Rmul)),
        OpCode::OpDiv => ("/", Name::Div, Some(Name::Rdiv)),
        OpCode::OpMod => ("%", Name::Mod, Some(Name::Rmod)),
        OpCode::OpPow => ("^", Name::Pow, Some(Name::Rpow)),
        OpCode::OpBand => ("&", Name::Band, Some(Name::Rband)),
        OpCode::OpBor => ("|", Name::Bor, Some(Name::Rbor)),
        OpCode::OpXor => ("~", Name::Xor, Some(Name::Rxor)),
        OpCode::OpLshift => ("<<", Name::Lshift, Some(Name::Rlshift)),
        OpCode::OpRshift => (">>", Name::Rshift, Some(Name::Rrshift)),
        OpCode::OpLt => ("<", Name::Lt, None),
        OpCode::OpLe => ("<=", Name::Le, None),
        OpCode::OpGt => (">", Name::Gt, None),
        OpCode::OpGe => (">=", Name::Ge, None),
        OpCode::OpEq => ("==", Name::Eq, None),
        _ => unreachable!("{} is not a binary operator", op),
    }
}

impl VM {
    /// Arithmetic on the two topmost values. Numbers are handled inline,
    /// `+` also concatenates strings; anything else goes to the operator
    /// overloads.
    pub(super) fn execute_binary_operation(&mut self, op: OpCode) -> Result<(), Raised> {
        if let (Value::Number(l), Value::Number(r)) = (self.peek(1), self.peek(0)) {
            let result = match op {
                OpCode::OpAdd => l + r,
                OpCode::OpSub => l - r,
                OpCode::OpMul => l * r,
                OpCode::OpDiv => l / r,
                OpCode::OpMod => l % r,
                OpCode::OpPow => l.powf(r),
                _ => unreachable!("{} is not an arithmetic operator", op),
            };
            self.pop();
            self.set_peek(0, Value::Number(result));
            return Ok(());
        }

        if op == OpCode::OpAdd
            && let (Some(l), Some(r)) = (self.as_string(self.peek(1)), self.as_string(self.peek(0)))
        {
            let mut bytes = Vec::with_capacity(l.len() + r.len());
            bytes.extend_from_slice(l.as_bytes());
            bytes.extend_from_slice(r.as_bytes());
            let concat = self.alloc(HeapObject::String(StrObj::new(bytes, false)));
            self.pop();
            self.set_peek(0, Value::Obj(concat));
            return Ok(());
        }

        self.binary_overload(op)
    }

    /// Bitwise operators work on numbers with an integer representation.
    pub(super) fn execute_bitwise_operation(&mut self, op: OpCode) -> Result<(), Raised> {
        let (Value::Number(l), Value::Number(r)) = (self.peek(1), self.peek(0)) else {
            return self.binary_overload(op);
        };
        if !has_int_repr(l) || !has_int_repr(r) {
            return Err(self.raise("TypeException", "Number has no integer representation"));
        }

        let (l, r) = (l as i64, r as i64);
        let result = match op {
            OpCode::OpBand => l & r,
            OpCode::OpBor => l | r,
            OpCode::OpXor => l ^ r,
            OpCode::OpLshift => l.wrapping_shl(r as u32),
            OpCode::OpRshift => l.wrapping_shr(r as u32),
            _ => unreachable!("{} is not a bitwise operator", op),
        };
        self.pop();
        self.set_peek(0, Value::Number(result as f64));
        Ok(())
    }

    /// Calls the left operand's overload for `op`, falling back to the right
    /// operand's reflected overload with the operands swapped.
    pub(super) fn binary_overload(&mut self, op: OpCode) -> Result<(), Raised> {
        let (symbol, forward, reverse) = overloads(op);
        let left_class = self.class_of_value(self.peek(1));
        if let Some(method) = self.lookup_method(left_class, self.name(forward)) {
            return self.call_value(method, 1);
        }

        let right_class = self.class_of_value(self.peek(0));
        if let Some(reverse) = reverse
            && let Some(method) = self.lookup_method(right_class, self.name(reverse))
        {
            self.swap_top(0, 1);
            return self.call_value(method, 1);
        }

        let message = format!(
            "Operator {} not defined for types {}, {}",
            symbol,
            self.class_name(left_class),
            self.class_name(right_class)
        );
        Err(self.raise("TypeException", message))
    }

    /// `NEG` and `INVERT`, with `__neg__`/`__inv__` overloads. `NOT` never fails.
    pub(super) fn execute_unary_operation(&mut self, op: OpCode) -> Result<(), Raised> {
        let operand = self.peek(0);
        let (symbol, overload) = match op {
            OpCode::OpNot => {
                self.set_peek(0, Value::Boolean(!operand.is_truthy()));
                return Ok(());
            }
            OpCode::OpNeg => {
                if let Value::Number(n) = operand {
                    self.set_peek(0, Value::Number(-n));
                    return Ok(());
                }
                ("-", Name::Neg)
            }
            OpCode::OpInvert => {
                if let Value::Number(n) = operand {
                    if !has_int_repr(n) {
                        return Err(
                            self.raise("TypeException", "Number has no integer representation")
                        );
                    }
                    self.set_peek(0, Value::Number(!(n as i64) as f64));
                    return Ok(());
                }
                ("~", Name::Inv)
            }
            _ => unreachable!("{} is not a unary operator", op),
        };

        let class = self.class_of_value(operand);
        if let Some(method) = self.lookup_method(class, self.name(overload)) {
            return self.call_value(method, 0);
        }
        let message = format!(
            "Unary operator {} not defined for type {}",
            symbol,
            self.class_name(class)
        );
        Err(self.raise("TypeException", message))
    }
}
