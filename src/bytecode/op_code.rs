use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    OpAdd = 0,
    OpSub = 1,
    OpMul = 2,
    OpDiv = 3,
    OpMod = 4,
    OpPow = 5,
    OpNeg = 6,
    OpNot = 7,
    OpInvert = 8,
    OpBand = 9,
    OpBor = 10,
    OpXor = 11,
    OpLshift = 12,
    OpRshift = 13,
    OpEq = 14,
    OpLt = 15,
    OpLe = 16,
    OpGt = 17,
    OpGe = 18,
    OpIs = 19,
    OpSubscrGet = 20,
    OpSubscrSet = 21,
    OpGetField = 22,
    OpSetField = 23,
    OpJump = 24,
    OpJumpT = 25,
    OpJumpF = 26,
    OpForPrep = 27,
    OpForIter = 28,
    OpForNext = 29,
    OpNull = 30,
    OpGetConst = 31,
    OpCall = 32,
    OpCallUnpack = 33,
    OpInvoke = 34,
    OpInvokeUnpack = 35,
    OpSuper = 36,
    OpSuperUnpack = 37,
    OpSuperBind = 38,
    OpReturn = 39,
    OpImport = 40,
    OpImportName = 41,
    OpNewList = 42,
    OpAppendList = 43,
    OpListToTuple = 44,
    OpNewTuple = 45,
    OpNewTable = 46,
    OpClosure = 47,
    OpNewClass = 48,
    OpSubclass = 49,
    OpDefMethod = 50,
    OpNative = 51,
    OpNativeMethod = 52,
    OpGetObject = 53,
    OpDefineGlobal = 54,
    OpSetGlobal = 55,
    OpGetGlobal = 56,
    OpSetupExcept = 57,
    OpSetupEnsure = 58,
    OpEndHandler = 59,
    OpPopHandler = 60,
    OpRaise = 61,
    OpGetLocal = 62,
    OpSetLocal = 63,
    OpGetUpvalue = 64,
    OpSetUpvalue = 65,
    OpPopN = 66,
    OpPop = 67,
    OpCloseUpvalue = 68,
    OpDup = 69,
    OpUnpack = 70,
    OpEnd = 71,
}

const OPCODE_COUNT: u8 = OpCode::OpEnd as u8 + 1;

impl From<u8> for OpCode {
    fn from(byte: u8) -> Self {
        if byte >= OPCODE_COUNT {
            panic!("Unknown opcode {}", byte);
        }
        // SAFETY: `OpCode` is `repr(u8)` with contiguous discriminants `0..OPCODE_COUNT`.
        unsafe { std::mem::transmute::<u8, OpCode>(byte) }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Byte widths of the fixed operands that follow `op`.
///
/// `OpClosure` is additionally followed by one `(is_local, index)` byte pair per
/// captured upvalue; that tail is variable and not described here.
pub fn operand_widths(op: OpCode) -> &'static [usize] {
    match op {
        OpCode::OpGetField
        | OpCode::OpSetField
        | OpCode::OpJump
        | OpCode::OpJumpT
        | OpCode::OpJumpF
        | OpCode::OpForNext
        | OpCode::OpGetConst
        | OpCode::OpSuperBind
        | OpCode::OpImport
        | OpCode::OpClosure
        | OpCode::OpNewClass
        | OpCode::OpDefMethod
        | OpCode::OpDefineGlobal
        | OpCode::OpSetGlobal
        | OpCode::OpGetGlobal
        | OpCode::OpSetupExcept
        | OpCode::OpSetupEnsure
        | OpCode::OpInvokeUnpack
        | OpCode::OpSuperUnpack => &[2],
        OpCode::OpCall
        | OpCode::OpGetLocal
        | OpCode::OpSetLocal
        | OpCode::OpGetUpvalue
        | OpCode::OpSetUpvalue
        | OpCode::OpPopN
        | OpCode::OpNewTuple
        | OpCode::OpUnpack => &[1],
        OpCode::OpInvoke | OpCode::OpSuper => &[1, 2],
        OpCode::OpImportName | OpCode::OpNative | OpCode::OpNativeMethod => &[2, 2],
        _ => &[],
    }
}

/// Total encoded length of the fixed part of `op`, opcode byte included.
#[inline]
pub fn instruction_len(op: OpCode) -> usize {
    1 + operand_widths(op).iter().sum::<usize>()
}

pub type Instructions = Vec<u8>;

pub fn make(op: OpCode, operands: &[usize]) -> Instructions {
    let widths = operand_widths(op);
    let mut instruction = vec![op as u8];

    for (i, operand) in operands.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(0);
        match width {
            1 => instruction.push(*operand as u8),
            2 => {
                instruction.push((*operand >> 8) as u8);
                instruction.push(*operand as u8);
            }
            _ => {}
        }
    }

    instruction
}

#[inline]
pub fn read_u16(instructions: &[u8], offset: usize) -> u16 {
    ((instructions[offset] as u16) << 8) | (instructions[offset + 1] as u16)
}

#[inline]
pub fn read_i16(instructions: &[u8], offset: usize) -> i16 {
    read_u16(instructions, offset) as i16
}

#[inline]
pub fn read_u8(instructions: &[u8], offset: usize) -> u8 {
    instructions[offset]
}

/// Renders one instruction starting at `offset`, returning the text and the
/// offset of the following instruction.
///
/// `upvalue_count` resolves the variable tail of `OpClosure`; it receives the
/// constant index the closure instruction refers to.
pub fn disassemble_instruction(
    instructions: &[u8],
    offset: usize,
    upvalue_count: &dyn Fn(usize) -> usize,
) -> (String, usize) {
    let op = OpCode::from(instructions[offset]);
    let mut operands = Vec::new();
    let mut cursor = offset + 1;

    for width in operand_widths(op) {
        match width {
            1 => {
                operands.push(read_u8(instructions, cursor) as usize);
                cursor += 1;
            }
            2 => {
                operands.push(read_u16(instructions, cursor) as usize);
                cursor += 2;
            }
            _ => {}
        }
    }

    let mut text = match op {
        OpCode::OpJump | OpCode::OpJumpT | OpCode::OpJumpF | OpCode::OpForNext => {
            let delta = read_i16(instructions, offset + 1) as isize;
            format!(
                "{:04} {} {} (-> {:04})",
                offset,
                op,
                delta,
                cursor as isize + delta
            )
        }
        OpCode::OpSetupExcept | OpCode::OpSetupEnsure => {
            format!("{:04} {} -> {:04}", offset, op, cursor + operands[0])
        }
        _ if operands.is_empty() => format!("{:04} {}", offset, op),
        _ => {
            let operand_str = operands
                .iter()
                .map(|o| o.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            format!("{:04} {} {}", offset, op, operand_str)
        }
    };

    if op == OpCode::OpClosure {
        for _ in 0..upvalue_count(operands[0]) {
            let is_local = read_u8(instructions, cursor) != 0;
            let index = read_u8(instructions, cursor + 1);
            text.push_str(&format!(
                " [{} {}]",
                if is_local { "local" } else { "upvalue" },
                index
            ));
            cursor += 2;
        }
    }

    (text, cursor)
}

/// Disassembles a whole instruction stream. Closures are assumed to capture
/// nothing; use [`crate::bytecode::chunk::FunctionProto::disassemble`] when the
/// constant pool is available.
pub fn disassemble(instructions: &[u8]) -> String {
    let mut result = String::new();
    let mut i = 0;

    while i < instructions.len() {
        let (line, next) = disassemble_instruction(instructions, i, &|_| 0);
        result.push_str(&line);
        result.push('\n');
        i = next;
    }

    result
}
