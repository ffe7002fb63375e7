//! The `__core__` module: well-known classes, the exception hierarchy and the
//! natives bound to them.

use crate::runtime::{NativeFn, vm::CORE_MODULE};

mod core_module;
mod exception_ops;
mod helpers;
mod list_ops;
mod object_ops;
mod string_ops;
mod table_ops;

pub(crate) use core_module::bootstrap;

use exception_ops::{exception_err, exception_get_stacktrace, exception_new};
use list_ops::{
    list_add, list_iter, list_len, list_new, list_next, tuple_iter, tuple_len, tuple_next,
};
use object_ops::{object_eq, object_hash};
use string_ops::{string_iter, string_len, string_next};
use table_ops::{
    table_contains, table_delete, table_get, table_iter, table_len, table_new, table_next,
    table_set,
};

/// Default value of a trailing native parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeDefault {
    Null,
    Str(&'static str),
    Number(f64),
}

/// A native method of a core class.
#[derive(Debug)]
pub struct NativeEntry {
    pub class: Option<&'static str>,
    pub name: &'static str,
    /// Declared parameter count, defaults included.
    pub arity: u8,
    pub defaults: &'static [NativeDefault],
    pub vararg: bool,
    pub func: NativeFn,
}

const fn method(class: &'static str, name: &'static str, arity: u8, func: NativeFn) -> NativeEntry {
    NativeEntry {
        class: Some(class),
        name,
        arity,
        defaults: &[],
        vararg: false,
        func,
    }
}

/// Every core native, grouped by class. Classes are set up in this order,
/// so `Object` comes first: later classes inherit its methods.
pub static CORE_NATIVES: &[NativeEntry] = &[
    method("Object", "__eq__", 1, object_eq),
    method("Object", "__hash__", 0, object_hash),
    NativeEntry {
        class: Some("List"),
        name: "new",
        arity: 0,
        defaults: &[],
        vararg: true,
        func: list_new,
    },
    method("List", "add", 1, list_add),
    method("List", "len", 0, list_len),
    method("List", "__iter__", 1, list_iter),
    method("List", "__next__", 1, list_next),
    method("Tuple", "len", 0, tuple_len),
    method("Tuple", "__iter__", 1, tuple_iter),
    method("Tuple", "__next__", 1, tuple_next),
    method("String", "len", 0, string_len),
    method("String", "__iter__", 1, string_iter),
    method("String", "__next__", 1, string_next),
    method("Table", "new", 0, table_new),
    method("Table", "__get__", 1, table_get),
    method("Table", "__set__", 2, table_set),
    method("Table", "delete", 1, table_delete),
    method("Table", "contains", 1, table_contains),
    method("Table", "len", 0, table_len),
    method("Table", "__iter__", 1, table_iter),
    method("Table", "__next__", 1, table_next),
    NativeEntry {
        class: Some("Exception"),
        name: "new",
        arity: 2,
        defaults: &[NativeDefault::Str(""), NativeDefault::Null],
        vararg: false,
        func: exception_new,
    },
    method("Exception", "err", 0, exception_err),
    method("Exception", "getStacktrace", 0, exception_get_stacktrace),
];

/// Finds the body of a native declared in `module`. Only the core module has
/// built-in bodies; other modules resolve through their native extension.
pub fn resolve_builtin(module: &str, class: Option<&str>, name: &str) -> Option<NativeFn> {
    if module != CORE_MODULE {
        return None;
    }
    CORE_NATIVES
        .iter()
        .find(|entry| entry.class == class && entry.name == name)
        .map(|entry| entry.func)
}
