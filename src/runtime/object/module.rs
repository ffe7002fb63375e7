use crate::runtime::{gc::GcHandle, hashtable::HashTable, native_ext::NativeExtension};

#[derive(Debug)]
pub struct Module {
    pub name: GcHandle,
    pub globals: HashTable,
    /// Dynamic library backing this module's natives; closed when the module is freed.
    pub extension: Option<NativeExtension>,
}

impl Module {
    pub fn new(name: GcHandle) -> Self {
        Self {
            name,
            globals: HashTable::new(),
            extension: None,
        }
    }
}
