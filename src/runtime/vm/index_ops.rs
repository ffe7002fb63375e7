use crate::runtime::{
    Raised,
    gc::HeapObject,
    object::{List, StrObj, Tuple},
    value::{Value, format_number, has_int_repr},
};

use super::{Name, VM};

#[derive(Clone, Copy)]
enum Sequence {
    List,
    Tuple,
    String,
}

impl Sequence {
    fn label(self) -> &'static str {
        match self {
            Sequence::List => "List",
            Sequence::Tuple => "Tuple",
            Sequence::String => "String",
        }
    }
}

impl VM {
    /// Bounds-checks `index` against `len`, raising `IndexOutOfBoundException`.
    pub(crate) fn check_index_num(&mut self, index: f64, len: usize) -> Result<usize, Raised> {
        if index >= 0.0 && index < len as f64 {
            return Ok(index as usize);
        }
        Err(self.raise(
            "IndexOutOfBoundException",
            format!("{}.", format_number(index)),
        ))
    }

    fn sequence_len(&self, operand: Value) -> Option<(Sequence, usize)> {
        Some(match self.object(operand)? {
            HeapObject::List(l) => (Sequence::List, l.items.len()),
            HeapObject::Tuple(t) => (Sequence::Tuple, t.items.len()),
            HeapObject::String(s) => (Sequence::String, s.len()),
            _ => return None,
        })
    }

    /// Validates a `(low, high)` slice against a sequence of `len` items.
    fn check_slice(&mut self, slice: Value, len: usize) -> Result<(usize, usize), Raised> {
        let bounds = match self.as_tuple(slice) {
            Some(tuple) if tuple.items.len() == 2 => (tuple.items[0], tuple.items[1]),
            _ => {
                return Err(self.raise("TypeException", "Slice index must have two elements."));
            }
        };
        let (Value::Number(a), Value::Number(b)) = bounds else {
            return Err(self.raise("TypeException", "Slice index must be two integers."));
        };
        if !has_int_repr(a) || !has_int_repr(b) {
            return Err(self.raise("TypeException", "Slice index must be two integers."));
        }

        let low = self.check_index_num(a, len + 1)?;
        let high = self.check_index_num(b, len + 1)?;
        if low > high {
            return Err(self.raise(
                "InvalidArgException",
                format!(
                    "Invalid slice indices ({}, {}), first must be <= than second",
                    format_number(a),
                    format_number(b)
                ),
            ));
        }
        Ok((low, high))
    }

    /// `SUBSCR_GET`: `[operand, arg]` becomes `operand[arg]`.
    pub(super) fn subscript_get(&mut self) -> Result<(), Raised> {
        let operand = self.peek(1);
        let arg = self.peek(0);

        let Some((kind, len)) = self.sequence_len(operand) else {
            return self.invoke_value(self.name(Name::Get), 1);
        };

        if let Value::Number(n) = arg
            && has_int_repr(n)
        {
            let index = self.check_index_num(n, len)?;
            let value = match kind {
                Sequence::List => self.as_list(operand).map(|l| l.items[index]),
                Sequence::Tuple => self.as_tuple(operand).map(|t| t.items[index]),
                Sequence::String => {
                    let byte = self.as_string(operand).map(|s| s.as_bytes()[index]);
                    byte.map(|b| Value::Obj(self.intern_bytes(&[b]).handle))
                }
            };
            self.pop();
            self.set_peek(0, value.unwrap_or_default());
            return Ok(());
        }

        if self.as_tuple(arg).is_some() {
            let (low, high) = self.check_slice(arg, len)?;
            let object = match kind {
                Sequence::List => HeapObject::List(List {
                    items: self.as_list(operand).map(|l| l.items[low..high].to_vec()).unwrap_or_default(),
                }),
                Sequence::Tuple => HeapObject::Tuple(Tuple {
                    items: self
                        .as_tuple(operand)
                        .map(|t| t.items[low..high].into())
                        .unwrap_or_default(),
                }),
                Sequence::String => {
                    let bytes: Vec<u8> = self
                        .as_string(operand)
                        .map(|s| s.as_bytes()[low..high].to_vec())
                        .unwrap_or_default();
                    HeapObject::String(StrObj::new(bytes, false))
                }
            };
            let slice = self.alloc(object);
            self.pop();
            self.set_peek(0, Value::Obj(slice));
            return Ok(());
        }

        Err(self.raise(
            "TypeException",
            format!(
                "Index of {} subscript must be an integer or a Tuple",
                kind.label()
            ),
        ))
    }

    /// `SUBSCR_SET`: `[value, arg, operand]` stores `operand[arg] = value`,
    /// leaving `value` on top.
    pub(super) fn subscript_set(&mut self) -> Result<(), Raised> {
        let operand = self.peek(0);

        if self.as_list(operand).is_some() {
            let arg = self.peek(1);
            let value = self.peek(2);
            let Value::Number(n) = arg else {
                return Err(self.list_index_error());
            };
            if !has_int_repr(n) {
                return Err(self.list_index_error());
            }
            let len = self.as_list(operand).map_or(0, |l| l.items.len());
            let index = self.check_index_num(n, len)?;
            if let Some(list) = self.as_list_mut(operand) {
                list.items[index] = value;
            }
            self.pop();
            self.pop();
            return Ok(());
        }

        self.swap_top(0, 2);
        self.invoke_value(self.name(Name::Set), 2)
    }

    #[cold]
    fn list_index_error(&mut self) -> Raised {
        self.raise(
            "TypeException",
            "Index of List subscript access must be an integer.",
        )
    }
}
