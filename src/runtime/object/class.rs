use crate::runtime::{gc::GcHandle, hashtable::HashTable};

#[derive(Debug)]
pub struct Class {
    pub name: GcHandle,
    pub superclass: Option<GcHandle>,
    /// Own and inherited methods; subclassing copies the parent's table.
    pub methods: HashTable,
}

impl Class {
    pub fn new(name: GcHandle, superclass: Option<GcHandle>) -> Self {
        Self {
            name,
            superclass,
            methods: HashTable::new(),
        }
    }
}

/// Instance of a user class. The class lives in the object header.
#[derive(Debug, Default)]
pub struct Instance {
    pub fields: HashTable,
}
