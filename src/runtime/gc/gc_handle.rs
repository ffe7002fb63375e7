/// Handle into the GC heap.
///
/// A `GcHandle` is a lightweight, copyable reference to a heap-allocated object
/// managed by the garbage collector. It is the runtime representation used
/// inside `Value::Obj`.
///
/// The generation counter is bumped each time a slot is freed, so a handle that
/// outlived its object is detected on access instead of aliasing whatever
/// object reused the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcHandle {
    pub(crate) index: u32,
    pub(crate) generation: u16,
}

impl GcHandle {
    /// Returns the raw heap slot index backing this handle.
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u16 {
        self.generation
    }

    pub(crate) fn from_parts(index: u32, generation: u16) -> Self {
        Self { index, generation }
    }
}
