//! Embeddable runtime for a small dynamic language: a stack-based bytecode VM
//! with a tracing garbage collector, classes, closures, exceptions and
//! dynamically loaded native extensions.
//!
//! Hosts feed [`bytecode::chunk::FunctionProto`]s (built with
//! [`bytecode::assembler::Assembler`] or an external compiler) into a
//! [`runtime::vm::VM`].

pub mod bytecode;
pub mod config;
pub mod runtime;
