use crate::runtime::value::Value;

/// A variable captured by a closure.
///
/// While the defining frame is live the upvalue is `Open` and refers to the
/// stack slot by index; when the frame ends the value migrates into the
/// upvalue itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}
