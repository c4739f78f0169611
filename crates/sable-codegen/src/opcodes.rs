//! The instruction set.
//!
//! Opcodes are one byte, followed by little-endian operands whose shape is
//! given by [`OpCode::operand_kind`]. Branch operands are 32-bit offsets
//! relative to the end of the branching instruction.

use crate::error::EmitError;

/// Bytecode opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // STACK (0x00-0x0F)
    /// Do nothing; anchors sequence points of empty statements
    Nop = 0x00,
    /// Duplicate top of stack
    Dup = 0x01,
    /// Pop top of stack
    Pop = 0x02,

    // ARGUMENTS AND LOCALS (0x10-0x1F)
    /// Load argument [index: u16]; `this` is argument 0 of instance methods
    Ldarg = 0x10,
    /// Store argument [index: u16]
    Starg = 0x11,
    /// Load the address of an argument [index: u16]
    Ldarga = 0x12,
    /// Load local [slot: u16]
    Ldloc = 0x13,
    /// Store local [slot: u16]
    Stloc = 0x14,
    /// Load the address of a local [slot: u16]
    Ldloca = 0x15,

    // CONSTANTS (0x20-0x2F)
    /// Push an int [value: i32]
    LdcI4 = 0x20,
    /// Push a long [value: i64]
    LdcI8 = 0x21,
    /// Push a float [value: f32]
    LdcR4 = 0x22,
    /// Push a double [value: f64]
    LdcR8 = 0x23,
    /// Push a string from the module string pool [index: u32]
    Ldstr = 0x24,
    /// Push null
    Ldnull = 0x25,
    /// Push true
    LdcTrue = 0x26,
    /// Push false
    LdcFalse = 0x27,

    // ARITHMETIC AND BITWISE (0x30-0x3F)
    Add = 0x30,
    Sub = 0x31,
    Mul = 0x32,
    Div = 0x33,
    Rem = 0x34,
    Neg = 0x35,
    And = 0x36,
    Or = 0x37,
    Xor = 0x38,
    Shl = 0x39,
    Shr = 0x3A,
    /// Bitwise complement
    Not = 0x3B,

    // COMPARISON (0x40-0x47)
    /// Push whether the top two values are equal
    Ceq = 0x40,
    Cgt = 0x41,
    Clt = 0x42,

    // CONVERSION (0x48-0x5F)
    ConvI1 = 0x48,
    ConvU1 = 0x49,
    ConvI2 = 0x4A,
    ConvU2 = 0x4B,
    ConvI4 = 0x4C,
    ConvU4 = 0x4D,
    ConvI8 = 0x4E,
    ConvU8 = 0x4F,
    ConvR4 = 0x50,
    ConvR8 = 0x51,
    ConvChar = 0x52,
    ConvBool = 0x53,
    ConvDec = 0x54,

    // CONTROL FLOW (0x60-0x6F)
    /// Unconditional branch [offset: i32]
    Br = 0x60,
    /// Branch when top is true, non-zero or non-null (pops) [offset: i32]
    Brtrue = 0x61,
    /// Branch when top is false, zero or null (pops) [offset: i32]
    Brfalse = 0x62,
    /// Jump table [count: u32, offsets: count x i32]; falls through when
    /// the index is out of range
    Switch = 0x63,
    /// Exit protected regions, running their finally blocks [offset: i32]
    Leave = 0x64,
    /// End of a finally block
    Endfinally = 0x65,
    /// Return; pops the value of non-void methods
    Ret = 0x66,
    Throw = 0x67,
    /// Rethrow the exception being handled
    Rethrow = 0x68,

    // CALLS AND DELEGATES (0x70-0x7F)
    /// Call a method non-virtually [method: u32]
    Call = 0x70,
    /// Call a method through the receiver's runtime class [method: u32]
    Callvirt = 0x71,
    /// Allocate and construct [constructor: u32]
    Newobj = 0x72,
    /// Push a method pointer [method: u32]
    Ldftn = 0x73,
    /// Build a delegate from a target and a method pointer [type: u32]
    Newdelegate = 0x74,
    /// Invoke a delegate [arg_count: u16]
    Invokedelegate = 0x75,

    // FIELDS (0x80-0x8F)
    Ldfld = 0x80,
    Stfld = 0x81,
    Ldsfld = 0x82,
    Stsfld = 0x83,
    Ldflda = 0x84,
    Ldsflda = 0x85,

    // TYPES (0x90-0x9F)
    /// Push the operand when it is an instance of the type, else null [type: u32]
    Isinst = 0x90,
    Castclass = 0x91,
    Box = 0x92,
    UnboxAny = 0x93,

    // INDIRECTION (0xA0-0xAF)
    /// Load through a managed reference
    Ldind = 0xA0,
    /// Store through a managed reference
    Stind = 0xA1,
}

/// Shape of the bytes following an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Argument or local index
    Variable,
    Method,
    Field,
    Type,
    String,
    /// Relative branch offset
    Branch,
    Switch,
    ArgCount,
}

impl OperandKind {
    /// Encoded size in bytes; switch tables report their fixed header only.
    pub fn size(self) -> usize {
        match self {
            OperandKind::None => 0,
            OperandKind::Variable | OperandKind::ArgCount => 2,
            OperandKind::Int32
            | OperandKind::Float32
            | OperandKind::Method
            | OperandKind::Field
            | OperandKind::Type
            | OperandKind::String
            | OperandKind::Branch
            | OperandKind::Switch => 4,
            OperandKind::Int64 | OperandKind::Float64 => 8,
        }
    }
}

impl OpCode {
    pub fn operand_kind(self) -> OperandKind {
        match self {
            OpCode::Ldarg
            | OpCode::Starg
            | OpCode::Ldarga
            | OpCode::Ldloc
            | OpCode::Stloc
            | OpCode::Ldloca => OperandKind::Variable,
            OpCode::LdcI4 => OperandKind::Int32,
            OpCode::LdcI8 => OperandKind::Int64,
            OpCode::LdcR4 => OperandKind::Float32,
            OpCode::LdcR8 => OperandKind::Float64,
            OpCode::Ldstr => OperandKind::String,
            OpCode::Br | OpCode::Brtrue | OpCode::Brfalse | OpCode::Leave => OperandKind::Branch,
            OpCode::Switch => OperandKind::Switch,
            OpCode::Call | OpCode::Callvirt | OpCode::Newobj | OpCode::Ldftn => OperandKind::Method,
            OpCode::Ldfld
            | OpCode::Stfld
            | OpCode::Ldsfld
            | OpCode::Stsfld
            | OpCode::Ldflda
            | OpCode::Ldsflda => OperandKind::Field,
            OpCode::Newdelegate
            | OpCode::Isinst
            | OpCode::Castclass
            | OpCode::Box
            | OpCode::UnboxAny => OperandKind::Type,
            OpCode::Invokedelegate => OperandKind::ArgCount,
            _ => OperandKind::None,
        }
    }

    /// Get the size of an instruction (including operands) in bytes.
    ///
    /// A `switch` is additionally followed by four bytes per target.
    pub fn instruction_size(self) -> usize {
        1 + self.operand_kind().size()
    }

    /// Net stack effect of instructions with a fixed one; calls, returns
    /// and delegate invocations depend on the signature and yield `None`.
    pub fn stack_effect(self) -> Option<i32> {
        Some(match self {
            OpCode::Nop
            | OpCode::Br
            | OpCode::Leave
            | OpCode::Endfinally
            | OpCode::Rethrow
            | OpCode::Neg
            | OpCode::Not
            | OpCode::ConvI1
            | OpCode::ConvU1
            | OpCode::ConvI2
            | OpCode::ConvU2
            | OpCode::ConvI4
            | OpCode::ConvU4
            | OpCode::ConvI8
            | OpCode::ConvU8
            | OpCode::ConvR4
            | OpCode::ConvR8
            | OpCode::ConvChar
            | OpCode::ConvBool
            | OpCode::ConvDec
            | OpCode::Ldfld
            | OpCode::Ldflda
            | OpCode::Isinst
            | OpCode::Castclass
            | OpCode::Box
            | OpCode::UnboxAny
            | OpCode::Ldind => 0,
            OpCode::Dup
            | OpCode::Ldarg
            | OpCode::Ldarga
            | OpCode::Ldloc
            | OpCode::Ldloca
            | OpCode::LdcI4
            | OpCode::LdcI8
            | OpCode::LdcR4
            | OpCode::LdcR8
            | OpCode::Ldstr
            | OpCode::Ldnull
            | OpCode::LdcTrue
            | OpCode::LdcFalse
            | OpCode::Ldsfld
            | OpCode::Ldsflda
            | OpCode::Ldftn => 1,
            OpCode::Pop
            | OpCode::Starg
            | OpCode::Stloc
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Rem
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor
            | OpCode::Shl
            | OpCode::Shr
            | OpCode::Ceq
            | OpCode::Cgt
            | OpCode::Clt
            | OpCode::Brtrue
            | OpCode::Brfalse
            | OpCode::Switch
            | OpCode::Throw
            | OpCode::Stsfld
            | OpCode::Newdelegate => -1,
            OpCode::Stfld | OpCode::Stind => -2,
            OpCode::Ret | OpCode::Call | OpCode::Callvirt | OpCode::Newobj | OpCode::Invokedelegate => {
                return None
            }
        })
    }

    /// Instructions after which control never falls through.
    pub fn is_unconditional_transfer(self) -> bool {
        matches!(
            self,
            OpCode::Br
                | OpCode::Leave
                | OpCode::Ret
                | OpCode::Throw
                | OpCode::Rethrow
                | OpCode::Endfinally
        )
    }

    pub fn is_branch(self) -> bool {
        matches!(self.operand_kind(), OperandKind::Branch | OperandKind::Switch)
    }

    /// Get the name of an opcode for disassembly.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Nop => "nop",
            OpCode::Dup => "dup",
            OpCode::Pop => "pop",
            OpCode::Ldarg => "ldarg",
            OpCode::Starg => "starg",
            OpCode::Ldarga => "ldarga",
            OpCode::Ldloc => "ldloc",
            OpCode::Stloc => "stloc",
            OpCode::Ldloca => "ldloca",
            OpCode::LdcI4 => "ldc.i4",
            OpCode::LdcI8 => "ldc.i8",
            OpCode::LdcR4 => "ldc.r4",
            OpCode::LdcR8 => "ldc.r8",
            OpCode::Ldstr => "ldstr",
            OpCode::Ldnull => "ldnull",
            OpCode::LdcTrue => "ldc.true",
            OpCode::LdcFalse => "ldc.false",
            OpCode::Add => "add",
            OpCode::Sub => "sub",
            OpCode::Mul => "mul",
            OpCode::Div => "div",
            OpCode::Rem => "rem",
            OpCode::Neg => "neg",
            OpCode::And => "and",
            OpCode::Or => "or",
            OpCode::Xor => "xor",
            OpCode::Shl => "shl",
            OpCode::Shr => "shr",
            OpCode::Not => "not",
            OpCode::Ceq => "ceq",
            OpCode::Cgt => "cgt",
            OpCode::Clt => "clt",
            OpCode::ConvI1 => "conv.i1",
            OpCode::ConvU1 => "conv.u1",
            OpCode::ConvI2 => "conv.i2",
            OpCode::ConvU2 => "conv.u2",
            OpCode::ConvI4 => "conv.i4",
            OpCode::ConvU4 => "conv.u4",
            OpCode::ConvI8 => "conv.i8",
            OpCode::ConvU8 => "conv.u8",
            OpCode::ConvR4 => "conv.r4",
            OpCode::ConvR8 => "conv.r8",
            OpCode::ConvChar => "conv.char",
            OpCode::ConvBool => "conv.bool",
            OpCode::ConvDec => "conv.dec",
            OpCode::Br => "br",
            OpCode::Brtrue => "brtrue",
            OpCode::Brfalse => "brfalse",
            OpCode::Switch => "switch",
            OpCode::Leave => "leave",
            OpCode::Endfinally => "endfinally",
            OpCode::Ret => "ret",
            OpCode::Throw => "throw",
            OpCode::Rethrow => "rethrow",
            OpCode::Call => "call",
            OpCode::Callvirt => "callvirt",
            OpCode::Newobj => "newobj",
            OpCode::Ldftn => "ldftn",
            OpCode::Newdelegate => "newdelegate",
            OpCode::Invokedelegate => "invokedelegate",
            OpCode::Ldfld => "ldfld",
            OpCode::Stfld => "stfld",
            OpCode::Ldsfld => "ldsfld",
            OpCode::Stsfld => "stsfld",
            OpCode::Ldflda => "ldflda",
            OpCode::Ldsflda => "ldsflda",
            OpCode::Isinst => "isinst",
            OpCode::Castclass => "castclass",
            OpCode::Box => "box",
            OpCode::UnboxAny => "unbox.any",
            OpCode::Ldind => "ldind",
            OpCode::Stind => "stind",
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(OpCode::Nop),
            0x01 => Ok(OpCode::Dup),
            0x02 => Ok(OpCode::Pop),
            0x10 => Ok(OpCode::Ldarg),
            0x11 => Ok(OpCode::Starg),
            0x12 => Ok(OpCode::Ldarga),
            0x13 => Ok(OpCode::Ldloc),
            0x14 => Ok(OpCode::Stloc),
            0x15 => Ok(OpCode::Ldloca),
            0x20 => Ok(OpCode::LdcI4),
            0x21 => Ok(OpCode::LdcI8),
            0x22 => Ok(OpCode::LdcR4),
            0x23 => Ok(OpCode::LdcR8),
            0x24 => Ok(OpCode::Ldstr),
            0x25 => Ok(OpCode::Ldnull),
            0x26 => Ok(OpCode::LdcTrue),
            0x27 => Ok(OpCode::LdcFalse),
            0x30 => Ok(OpCode::Add),
            0x31 => Ok(OpCode::Sub),
            0x32 => Ok(OpCode::Mul),
            0x33 => Ok(OpCode::Div),
            0x34 => Ok(OpCode::Rem),
            0x35 => Ok(OpCode::Neg),
            0x36 => Ok(OpCode::And),
            0x37 => Ok(OpCode::Or),
            0x38 => Ok(OpCode::Xor),
            0x39 => Ok(OpCode::Shl),
            0x3A => Ok(OpCode::Shr),
            0x3B => Ok(OpCode::Not),
            0x40 => Ok(OpCode::Ceq),
            0x41 => Ok(OpCode::Cgt),
            0x42 => Ok(OpCode::Clt),
            0x48 => Ok(OpCode::ConvI1),
            0x49 => Ok(OpCode::ConvU1),
            0x4A => Ok(OpCode::ConvI2),
            0x4B => Ok(OpCode::ConvU2),
            0x4C => Ok(OpCode::ConvI4),
            0x4D => Ok(OpCode::ConvU4),
            0x4E => Ok(OpCode::ConvI8),
            0x4F => Ok(OpCode::ConvU8),
            0x50 => Ok(OpCode::ConvR4),
            0x51 => Ok(OpCode::ConvR8),
            0x52 => Ok(OpCode::ConvChar),
            0x53 => Ok(OpCode::ConvBool),
            0x54 => Ok(OpCode::ConvDec),
            0x60 => Ok(OpCode::Br),
            0x61 => Ok(OpCode::Brtrue),
            0x62 => Ok(OpCode::Brfalse),
            0x63 => Ok(OpCode::Switch),
            0x64 => Ok(OpCode::Leave),
            0x65 => Ok(OpCode::Endfinally),
            0x66 => Ok(OpCode::Ret),
            0x67 => Ok(OpCode::Throw),
            0x68 => Ok(OpCode::Rethrow),
            0x70 => Ok(OpCode::Call),
            0x71 => Ok(OpCode::Callvirt),
            0x72 => Ok(OpCode::Newobj),
            0x73 => Ok(OpCode::Ldftn),
            0x74 => Ok(OpCode::Newdelegate),
            0x75 => Ok(OpCode::Invokedelegate),
            0x80 => Ok(OpCode::Ldfld),
            0x81 => Ok(OpCode::Stfld),
            0x82 => Ok(OpCode::Ldsfld),
            0x83 => Ok(OpCode::Stsfld),
            0x84 => Ok(OpCode::Ldflda),
            0x85 => Ok(OpCode::Ldsflda),
            0x90 => Ok(OpCode::Isinst),
            0x91 => Ok(OpCode::Castclass),
            0x92 => Ok(OpCode::Box),
            0x93 => Ok(OpCode::UnboxAny),
            0xA0 => Ok(OpCode::Ldind),
            0xA1 => Ok(OpCode::Stind),
            _ => Err(()),
        }
    }
}

// ---
// Operands
// ---

/// A jump target inside one method body under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// An instruction operand.
///
/// Bodies under construction carry [`Operand::Label`]s; decoded bodies
/// carry absolute byte offsets in [`Operand::Target`].
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Argument or local index, or a delegate's argument count
    Index(u16),
    /// Method, field, type or string-pool token
    Token(u32),
    Label(Label),
    Labels(Vec<Label>),
    Target(u32),
    Targets(Vec<u32>),
}

/// One instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: OpCode,
    pub operand: Operand,
}

impl Instruction {
    pub fn new(op: OpCode, operand: Operand) -> Self {
        Self { op, operand }
    }

    pub fn simple(op: OpCode) -> Self {
        Self::new(op, Operand::None)
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        let table = match &self.operand {
            Operand::Labels(labels) => labels.len(),
            Operand::Targets(targets) => targets.len(),
            _ => 0,
        };
        self.op.instruction_size() + 4 * table
    }

    /// Labels this instruction may transfer control to.
    pub fn labels(&self) -> Vec<Label> {
        match &self.operand {
            Operand::Label(label) => vec![*label],
            Operand::Labels(labels) => labels.clone(),
            _ => Vec::new(),
        }
    }

    /// Decode the instruction at `offset`, resolving branch offsets to
    /// absolute targets. Returns the instruction and the next offset.
    pub fn decode(code: &[u8], offset: usize) -> Result<(Instruction, usize), EmitError> {
        let byte = *code.get(offset).ok_or(EmitError::Truncated(offset))?;
        let op = OpCode::try_from(byte).map_err(|_| EmitError::InvalidOpcode { byte, offset })?;
        let mut reader = Reader { code, pos: offset + 1 };
        let operand = match op.operand_kind() {
            OperandKind::None => Operand::None,
            OperandKind::Int32 => Operand::Int32(reader.i32()?),
            OperandKind::Int64 => Operand::Int64(i64::from_le_bytes(reader.bytes::<8>()?)),
            OperandKind::Float32 => Operand::Float32(f32::from_le_bytes(reader.bytes::<4>()?)),
            OperandKind::Float64 => Operand::Float64(f64::from_le_bytes(reader.bytes::<8>()?)),
            OperandKind::Variable | OperandKind::ArgCount => {
                Operand::Index(u16::from_le_bytes(reader.bytes::<2>()?))
            }
            OperandKind::Method | OperandKind::Field | OperandKind::Type | OperandKind::String => {
                Operand::Token(reader.u32()?)
            }
            OperandKind::Branch => {
                let relative = reader.i32()?;
                Operand::Target(resolve(reader.pos, relative, offset)?)
            }
            OperandKind::Switch => {
                let count = reader.u32()? as usize;
                let end = reader.pos + 4 * count;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    let relative = reader.i32()?;
                    targets.push(resolve(end, relative, offset)?);
                }
                Operand::Targets(targets)
            }
        };
        Ok((Instruction { op, operand }, reader.pos))
    }
}

fn resolve(base: usize, relative: i32, offset: usize) -> Result<u32, EmitError> {
    let target = base as i64 + relative as i64;
    u32::try_from(target).map_err(|_| EmitError::BranchOutOfRange(offset))
}

struct Reader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn bytes<const N: usize>(&mut self) -> Result<[u8; N], EmitError> {
        let slice = self
            .code
            .get(self.pos..self.pos + N)
            .ok_or(EmitError::Truncated(self.pos))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn i32(&mut self) -> Result<i32, EmitError> {
        Ok(i32::from_le_bytes(self.bytes::<4>()?))
    }

    fn u32(&mut self) -> Result<u32, EmitError> {
        Ok(u32::from_le_bytes(self.bytes::<4>()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trip() {
        for byte in 0..=u8::MAX {
            if let Ok(op) = OpCode::try_from(byte) {
                assert_eq!(op as u8, byte, "{}", op.name());
            }
        }
        assert!(OpCode::try_from(0xFF).is_err());
    }

    #[test]
    fn test_instruction_sizes() {
        assert_eq!(OpCode::Ret.instruction_size(), 1);
        assert_eq!(OpCode::Ldloc.instruction_size(), 3);
        assert_eq!(OpCode::Br.instruction_size(), 5);
        assert_eq!(OpCode::LdcR8.instruction_size(), 9);
        let switch = Instruction::new(OpCode::Switch, Operand::Labels(vec![Label(0), Label(1)]));
        assert_eq!(switch.size(), 13);
    }

    #[test]
    fn test_decode_branch_is_absolute() {
        // br +2 over a two-byte gap
        let code = [0x60, 2, 0, 0, 0, 0x00, 0x00, 0x66];
        let (instr, next) = Instruction::decode(&code, 0).unwrap();
        assert_eq!(next, 5);
        assert_eq!(instr.operand, Operand::Target(7));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Instruction::decode(&[0xEE], 0),
            Err(EmitError::InvalidOpcode { byte: 0xEE, .. })
        ));
        assert!(matches!(Instruction::decode(&[0x20, 1], 0), Err(EmitError::Truncated(_))));
    }
}
