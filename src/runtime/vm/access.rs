//! Typed views of heap objects and class queries.

use std::borrow::Cow;

use crate::runtime::{
    gc::{GcHandle, HeapObject},
    hashtable::StrKey,
    object::{Class, Instance, List, Module, StrObj, Table, Tuple},
    value::Value,
};

use super::VM;

impl VM {
    pub(crate) fn object(&self, value: Value) -> Option<&HeapObject> {
        match value {
            Value::Obj(handle) => Some(self.heap.get(handle)),
            _ => None,
        }
    }

    pub(crate) fn as_string(&self, value: Value) -> Option<&StrObj> {
        match self.object(value)? {
            HeapObject::String(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn as_list(&self, value: Value) -> Option<&List> {
        match self.object(value)? {
            HeapObject::List(l) => Some(l),
            _ => None,
        }
    }

    pub(crate) fn as_list_mut(&mut self, value: Value) -> Option<&mut List> {
        match value {
            Value::Obj(handle) => match self.heap.get_mut(handle) {
                HeapObject::List(l) => Some(l),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn as_tuple(&self, value: Value) -> Option<&Tuple> {
        match self.object(value)? {
            HeapObject::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn as_table(&self, value: Value) -> Option<&Table> {
        match self.object(value)? {
            HeapObject::Table(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn as_table_mut(&mut self, value: Value) -> Option<&mut Table> {
        match value {
            Value::Obj(handle) => match self.heap.get_mut(handle) {
                HeapObject::Table(t) => Some(t),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn as_class(&self, value: Value) -> Option<&Class> {
        match self.object(value)? {
            HeapObject::Class(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn as_class_mut(&mut self, value: Value) -> Option<&mut Class> {
        match value {
            Value::Obj(handle) => match self.heap.get_mut(handle) {
                HeapObject::Class(c) => Some(c),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn as_instance(&self, value: Value) -> Option<&Instance> {
        match self.object(value)? {
            HeapObject::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub(crate) fn as_instance_mut(&mut self, value: Value) -> Option<&mut Instance> {
        match value {
            Value::Obj(handle) => match self.heap.get_mut(handle) {
                HeapObject::Instance(i) => Some(i),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn as_module(&self, value: Value) -> Option<&Module> {
        match self.object(value)? {
            HeapObject::Module(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn as_module_mut(&mut self, value: Value) -> Option<&mut Module> {
        match value {
            Value::Obj(handle) => match self.heap.get_mut(handle) {
                HeapObject::Module(m) => Some(m),
                _ => None,
            },
            _ => None,
        }
    }

    /// Text of a string object, lossily decoded. Empty for anything else.
    pub(crate) fn str_of(&self, handle: GcHandle) -> Cow<'_, str> {
        match self.heap.get(handle) {
            HeapObject::String(s) => s.as_str(),
            _ => Cow::Borrowed(""),
        }
    }

    pub(crate) fn key_str(&self, key: StrKey) -> Cow<'_, str> {
        self.str_of(key.handle)
    }

    /// Class used for method lookup on `value`.
    pub(crate) fn class_of_value(&self, value: Value) -> GcHandle {
        match value {
            Value::Null => self.core.null,
            Value::Boolean(_) => self.core.boolean,
            Value::Number(_) => self.core.number,
            // Host handles have no class of their own.
            Value::Handle(_) => self.core.object,
            Value::Obj(handle) => self.heap.class_of(handle).unwrap_or(self.core.object),
        }
    }

    pub(crate) fn class_name(&self, class: GcHandle) -> Cow<'_, str> {
        match self.heap.get(class) {
            HeapObject::Class(c) => self.str_of(c.name),
            _ => Cow::Borrowed("?"),
        }
    }

    /// Name of the class of `value`, as used in error messages.
    pub fn type_name_of(&self, value: Value) -> String {
        self.class_name(self.class_of_value(value)).into_owned()
    }

    /// Looks `name` up in `class`'s method table. Inherited methods are
    /// copied into subclasses when they are declared, so no chain walk is needed.
    pub(crate) fn lookup_method(&self, class: GcHandle, name: StrKey) -> Option<Value> {
        match self.heap.get(class) {
            HeapObject::Class(c) => c.methods.get(name),
            _ => None,
        }
    }

    pub(crate) fn is_subclass(&self, class: GcHandle, ancestor: GcHandle) -> bool {
        let mut current = Some(class);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = match self.heap.get(c) {
                HeapObject::Class(class) => class.superclass,
                _ => None,
            };
        }
        false
    }

    pub(crate) fn is_instance(&self, value: Value, class: GcHandle) -> bool {
        self.is_subclass(self.class_of_value(value), class)
    }

    /// Name of a module object.
    pub(crate) fn module_name(&self, module: GcHandle) -> Cow<'_, str> {
        match self.heap.get(module) {
            HeapObject::Module(m) => self.str_of(m.name),
            _ => Cow::Borrowed("?"),
        }
    }

    /// Looks a global up in the core module.
    pub(crate) fn core_global(&mut self, name: &str) -> Option<Value> {
        let key = self.intern(name);
        self.as_module(Value::Obj(self.core_module))?.globals.get(key)
    }
}
