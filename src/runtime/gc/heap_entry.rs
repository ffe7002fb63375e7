use crate::runtime::gc::{GcHandle, heap_object::HeapObject};

/// Common header of every heap object.
pub struct HeapEntry {
    pub(crate) object: HeapObject,
    /// Class used for method dispatch. `None` only for objects created before
    /// the core classes exist; bootstrap patches those.
    pub(crate) class: Option<GcHandle>,
    pub(crate) marked: bool,
    /// Bytes charged to the allocation counter for this object.
    pub(crate) size: usize,
}

/// A heap slot. The generation advances each time the slot is freed.
pub(crate) struct HeapSlot {
    pub(crate) generation: u16,
    pub(crate) entry: Option<HeapEntry>,
}
