use std::fmt;

use crate::bytecode::op_code::disassemble_instruction;

/// A constant-pool entry as produced by the compiler, before the VM publishes it
/// into the heap.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Function(Box<FunctionProto>),
    Native(NativeProto),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Number(n) => write!(f, "{}", n),
            Constant::Str(s) => write!(f, "{:?}", s),
            Constant::Function(proto) => write!(f, "<fn {}>", proto.name),
            Constant::Native(proto) => write!(f, "<native {}>", proto.name),
        }
    }
}

/// Maps instruction offsets to source lines.
///
/// Entries are `(offset, line)` pairs sorted by offset; an instruction belongs to
/// the last entry whose offset is `<=` its own.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LineTable {
    runs: Vec<(u32, u32)>,
}

impl LineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that code starting at `offset` comes from `line`.
    pub fn add(&mut self, offset: usize, line: u32) {
        if let Some(&(_, last_line)) = self.runs.last()
            && last_line == line
        {
            return;
        }
        self.runs.push((offset as u32, line));
    }

    /// Returns the source line of the instruction at `offset`, or `0` when unknown.
    pub fn line_at(&self, offset: usize) -> u32 {
        let offset = offset as u32;
        match self.runs.binary_search_by_key(&offset, |entry| entry.0) {
            Ok(index) => self.runs[index].1,
            Err(index) => index
                .checked_sub(1)
                .and_then(|prev| self.runs.get(prev))
                .map(|entry| entry.1)
                .unwrap_or(0),
        }
    }
}

/// Callable metadata shared by compiled functions and natives.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NativeProto {
    pub name: String,
    /// Declared parameter count, defaults included.
    pub arity: u8,
    /// Values for the trailing `defaults.len()` parameters.
    pub defaults: Vec<Constant>,
    pub vararg: bool,
}

/// Compiler output for one function: instruction stream, constant pool, line
/// table and upvalue metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionProto {
    pub name: String,
    pub arity: u8,
    pub defaults: Vec<Constant>,
    pub vararg: bool,
    pub upvalue_count: u8,
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
    pub lines: LineTable,
}

impl FunctionProto {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn upvalue_count_of(&self, const_index: usize) -> usize {
        match self.constants.get(const_index) {
            Some(Constant::Function(proto)) => proto.upvalue_count as usize,
            _ => 0,
        }
    }

    /// Renders the constant pool and instruction stream, recursing into nested
    /// functions.
    pub fn disassemble(&self) -> String {
        let mut output = String::new();
        self.disassemble_into(&mut output, 0);
        output
    }

    fn disassemble_into(&self, output: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        output.push_str(&format!(
            "{}fn {}/{}{}:\n",
            indent,
            self.name,
            self.arity,
            if self.vararg { "+" } else { "" }
        ));
        output.push_str(&format!("{}Constants:\n", indent));
        for (i, constant) in self.constants.iter().enumerate() {
            output.push_str(&format!("{}  {}: {}\n", indent, i, constant));
        }

        output.push_str(&format!("{}Instructions:\n", indent));
        let mut offset = 0;
        while offset < self.code.len() {
            let (text, next) =
                disassemble_instruction(&self.code, offset, &|idx| self.upvalue_count_of(idx));
            output.push_str(&format!(
                "{}  {:>4} | {}\n",
                indent,
                self.lines.line_at(offset),
                text
            ));
            offset = next;
        }

        for constant in &self.constants {
            if let Constant::Function(proto) = constant {
                output.push('\n');
                proto.disassemble_into(output, depth + 1);
            }
        }
    }
}
