//! Code generation for Sable.
//!
//! Lowered method bodies are turned into a compact stack bytecode:
//! - [`opcodes`]: the instruction set and its encoding
//! - [`builder`]: instruction lists with labels, locals and regions
//! - [`optimizer`]: release-mode passes over the instruction list
//! - [`codegen`]: the bound tree walker
//! - [`disasm`]: listings for inspection and tests

pub mod body;
pub mod builder;
pub mod codegen;
pub mod disasm;
pub mod error;
pub mod opcodes;
pub mod optimizer;

pub use body::{
    ExceptionRegion, LocalSlot, MethodBody, RegionKind, SequencePoint, StateMachineMetadata,
    StringPool,
};
pub use builder::ILBuilder;
pub use codegen::{generate_method, EmitOptions};
pub use disasm::{disassemble, SymbolResolver, TokenResolver};
pub use error::EmitError;
pub use opcodes::{Instruction, OpCode, Operand};
pub use optimizer::{OptConfig, OptStats};
