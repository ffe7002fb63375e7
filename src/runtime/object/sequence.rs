use crate::runtime::value::Value;

#[derive(Debug, Default)]
pub struct List {
    pub items: Vec<Value>,
}

/// Fixed-length immutable sequence.
#[derive(Debug, Default)]
pub struct Tuple {
    pub items: Box<[Value]>,
}
