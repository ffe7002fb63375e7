use std::{fmt, mem::size_of};

use crate::runtime::{
    gc::GcHandle,
    object::{
        BoundMethod, Class, Closure, FrameRecord, Function, Instance, List, Module, Native,
        StackTrace, StrObj, Table, TableSlot, Tuple, Upvalue, function::trace_values,
    },
    value::Value,
};

/// Objects that live on the GC-managed heap.
#[derive(Debug)]
pub enum HeapObject {
    String(StrObj),
    Function(Function),
    Native(Native),
    Closure(Closure),
    Upvalue(Upvalue),
    Class(Class),
    Instance(Instance),
    Module(Module),
    List(List),
    Tuple(Tuple),
    Table(Table),
    BoundMethod(BoundMethod),
    StackTrace(StackTrace),
}

/// Classification of heap object variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    String = 0,
    Function = 1,
    Native = 2,
    Closure = 3,
    Upvalue = 4,
    Class = 5,
    Instance = 6,
    Module = 7,
    List = 8,
    Tuple = 9,
    Table = 10,
    BoundMethod = 11,
    StackTrace = 12,
}

impl ObjectKind {
    pub const COUNT: usize = 13;

    pub const ALL: [ObjectKind; Self::COUNT] = [
        ObjectKind::String,
        ObjectKind::Function,
        ObjectKind::Native,
        ObjectKind::Closure,
        ObjectKind::Upvalue,
        ObjectKind::Class,
        ObjectKind::Instance,
        ObjectKind::Module,
        ObjectKind::List,
        ObjectKind::Tuple,
        ObjectKind::Table,
        ObjectKind::BoundMethod,
        ObjectKind::StackTrace,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ObjectKind::String => "String",
            ObjectKind::Function => "Function",
            ObjectKind::Native => "Native",
            ObjectKind::Closure => "Closure",
            ObjectKind::Upvalue => "Upvalue",
            ObjectKind::Class => "Class",
            ObjectKind::Instance => "Instance",
            ObjectKind::Module => "Module",
            ObjectKind::List => "List",
            ObjectKind::Tuple => "Tuple",
            ObjectKind::Table => "Table",
            ObjectKind::BoundMethod => "BoundMethod",
            ObjectKind::StackTrace => "StackTrace",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl HeapObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            HeapObject::String(_) => ObjectKind::String,
            HeapObject::Function(_) => ObjectKind::Function,
            HeapObject::Native(_) => ObjectKind::Native,
            HeapObject::Closure(_) => ObjectKind::Closure,
            HeapObject::Upvalue(_) => ObjectKind::Upvalue,
            HeapObject::Class(_) => ObjectKind::Class,
            HeapObject::Instance(_) => ObjectKind::Instance,
            HeapObject::Module(_) => ObjectKind::Module,
            HeapObject::List(_) => ObjectKind::List,
            HeapObject::Tuple(_) => ObjectKind::Tuple,
            HeapObject::Table(_) => ObjectKind::Table,
            HeapObject::BoundMethod(_) => ObjectKind::BoundMethod,
            HeapObject::StackTrace(_) => ObjectKind::StackTrace,
        }
    }

    /// Estimates the shallow byte size of this object including owned backing storage.
    pub fn shallow_size_bytes(&self) -> usize {
        let base = size_of::<Self>();
        let value = size_of::<Value>();
        match self {
            HeapObject::String(s) => base + s.len(),
            HeapObject::Function(f) => {
                base + f.chunk.code.len()
                    + f.chunk.constants.len() * value
                    + f.proto.defaults.len() * value
            }
            HeapObject::Native(n) => base + n.proto.defaults.len() * value,
            HeapObject::Closure(c) => base + c.upvalues.len() * size_of::<GcHandle>(),
            HeapObject::Class(c) => base + c.methods.capacity() * 2 * value,
            HeapObject::Instance(i) => base + i.fields.capacity() * 2 * value,
            HeapObject::Module(m) => base + m.globals.capacity() * 2 * value,
            HeapObject::List(l) => base + l.items.capacity() * value,
            HeapObject::Tuple(t) => base + t.items.len() * value,
            HeapObject::Table(t) => base + t.capacity() * size_of::<TableSlot>(),
            HeapObject::StackTrace(s) => base + s.records.capacity() * size_of::<FrameRecord>(),
            HeapObject::Upvalue(_) | HeapObject::BoundMethod(_) => base,
        }
    }

    /// Pushes the handles this object keeps alive.
    pub(crate) fn trace(&self, out: &mut Vec<GcHandle>) {
        match self {
            HeapObject::String(_) | HeapObject::StackTrace(_) => {}
            HeapObject::Function(f) => {
                f.proto.trace(out);
                trace_values(&f.chunk.constants, out);
            }
            HeapObject::Native(n) => n.proto.trace(out),
            HeapObject::Closure(c) => {
                out.push(c.function);
                out.extend_from_slice(&c.upvalues);
            }
            HeapObject::Upvalue(Upvalue::Closed(value)) => {
                trace_values(std::slice::from_ref(value), out)
            }
            // Open upvalues point at stack slots, which are roots already.
            HeapObject::Upvalue(Upvalue::Open(_)) => {}
            HeapObject::Class(c) => {
                out.push(c.name);
                if let Some(superclass) = c.superclass {
                    out.push(superclass);
                }
                c.methods.trace(out);
            }
            HeapObject::Instance(i) => i.fields.trace(out),
            HeapObject::Module(m) => {
                out.push(m.name);
                m.globals.trace(out);
            }
            HeapObject::List(l) => trace_values(&l.items, out),
            HeapObject::Tuple(t) => trace_values(&t.items, out),
            HeapObject::Table(t) => t.trace(out),
            HeapObject::BoundMethod(b) => {
                trace_values(std::slice::from_ref(&b.receiver), out);
                out.push(b.method);
            }
        }
    }
}
