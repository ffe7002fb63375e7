//! Runtime core: values, the GC heap, heap object kinds and the VM.
//!
//! # Ownership
//! Every heap object is owned by the [`gc::GcHeap`] arena and referenced only
//! through copyable [`gc::GcHandle`]s. Nothing outside the sweep phase frees an
//! object, so cycles in the guest object graph are fine: reachability from the
//! VM's roots alone decides lifetime.
use crate::runtime::vm::VM;

pub mod builtins;
pub mod frame;
pub mod gc;
pub mod hashtable;
pub mod native_ext;
pub mod object;
pub mod packed;
pub mod value;
pub mod vm;

/// Marker for "an exception instance is on top of the value stack".
///
/// Every fallible VM operation returns `Result<_, Raised>`; `?` carries the
/// marker up to the dispatch loop, which starts unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Raised;

pub type NativeResult = Result<(), Raised>;

/// Native function ABI.
///
/// Arguments live in the VM's API window: slot `0` is the receiver, slots
/// `1..=argc` the arguments. A native must leave its result (or raise) before
/// returning.
pub type NativeFn = fn(&mut VM) -> NativeResult;
