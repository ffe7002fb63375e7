use crate::{
    bytecode::op_code::{OpCode, operand_widths, read_u8, read_u16},
    runtime::{
        gc::HeapObject,
        object::Chunk,
        value::{Value, format_number},
    },
};

use super::VM;

/// Containers nested deeper than this print as `...`.
const MAX_REPR_DEPTH: usize = 4;

impl VM {
    /// Turns per-instruction tracing on or off.
    pub fn set_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub(super) fn trace_instruction(&self, chunk: &Chunk, ip: usize, op: OpCode) {
        println!("{}", format_instruction(chunk, ip, op));
        self.trace_stack();
    }

    fn trace_stack(&self) {
        let base = self.frames.last().map_or(0, |frame| frame.base);
        let items: Vec<String> = self.stack[base..]
            .iter()
            .map(|value| self.repr(*value))
            .collect();
        println!("  stack: [{}]", items.join(", "));
    }

    /// Debug rendering of a value: strings quoted, containers expanded.
    pub fn repr(&self, value: Value) -> String {
        let mut out = String::new();
        self.repr_into(value, 0, &mut out);
        out
    }

    fn repr_into(&self, value: Value, depth: usize, out: &mut String) {
        let Value::Obj(handle) = value else {
            match value {
                Value::Number(n) => out.push_str(&format_number(n)),
                other => out.push_str(&other.to_string()),
            }
            return;
        };

        match self.heap.get(handle) {
            HeapObject::String(s) => {
                out.push('"');
                out.push_str(&s.as_str());
                out.push('"');
            }
            HeapObject::List(l) => self.repr_items(&l.items, ('[', ']'), depth, out),
            HeapObject::Tuple(t) => self.repr_items(&t.items, ('(', ')'), depth, out),
            HeapObject::Function(_) | HeapObject::Closure(_) | HeapObject::Native(_) => {
                out.push_str(&format!("<fn {}>", self.qualified_name(handle)));
            }
            HeapObject::BoundMethod(b) => {
                out.push_str(&format!("<bound method {}>", self.qualified_name(b.method)));
            }
            HeapObject::Class(c) => out.push_str(&format!("<class {}>", self.str_of(c.name))),
            HeapObject::Module(m) => out.push_str(&format!("<module {}>", self.str_of(m.name))),
            HeapObject::Instance(_) => {
                out.push_str(&format!("<{} instance>", self.type_name_of(value)));
            }
            HeapObject::Table(t) => out.push_str(&format!("<Table len={}>", t.len())),
            HeapObject::StackTrace(st) => {
                out.push_str(&format!("<StackTrace depth={}>", st.depth()));
            }
            HeapObject::Upvalue(_) => out.push_str("<upvalue>"),
        }
    }

    fn repr_items(&self, items: &[Value], (open, close): (char, char), depth: usize, out: &mut String) {
        out.push(open);
        if depth >= MAX_REPR_DEPTH {
            out.push_str("...");
        } else {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                self.repr_into(*item, depth + 1, out);
            }
        }
        out.push(close);
    }
}

/// `IP=0004 OpGetLocal 1`
pub(super) fn format_instruction(chunk: &Chunk, ip: usize, op: OpCode) -> String {
    let mut operands = Vec::new();
    let mut offset = ip + 1;
    for width in operand_widths(op) {
        match width {
            1 => {
                operands.push(read_u8(&chunk.code, offset).to_string());
                offset += 1;
            }
            2 => {
                operands.push(read_u16(&chunk.code, offset).to_string());
                offset += 2;
            }
            _ => {}
        }
    }
    if operands.is_empty() {
        format!("IP={:04} {}", ip, op)
    } else {
        format!("IP={:04} {} {}", ip, op, operands.join(" "))
    }
}
