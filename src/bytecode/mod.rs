pub mod assembler;
pub mod chunk;
pub mod op_code;
