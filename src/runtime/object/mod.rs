//! Heap object kinds.

pub mod class;
pub mod function;
pub mod module;
pub mod sequence;
pub mod stack_trace;
pub mod string;
pub mod table;
pub mod upvalue;

pub use class::{Class, Instance};
pub use function::{BoundMethod, Chunk, Closure, Function, Native, Proto};
pub use module::Module;
pub use sequence::{List, Tuple};
pub use stack_trace::{FrameRecord, StackTrace};
pub use string::StrObj;
pub use table::{Table, TableSlot};
pub use upvalue::Upvalue;
