//! Types, declared symbols, the conversion oracle and diagnostics shared by
//! every stage of the Sable compiler.

pub mod builtins;
mod context;
mod conversions;
mod diagnostics;
mod symbols;
mod table;
mod types;

pub use context::TypeContext;
pub use conversions::{
    binary_numeric_promotion, implicit_numeric, unary_numeric_promotion, ConversionKind,
};
pub use diagnostics::{Diagnostic, DiagnosticBag, ErrorCode, Severity};
pub use symbols::{
    format_float, ClassId, ClassKind, ClassSymbol, ConstantValue, FieldId, FieldSymbol,
    Intrinsic, MethodId, MethodKind, MethodSymbol, NumericHelperKind, ParameterSymbol,
    PrimaryParameter, PropertyId, PropertySymbol, RefKind, SynthesizedKind, stable_string_hash,
};
pub use table::{SymbolLookup, SymbolSnapshot, SymbolTable};
pub use types::{GenericKind, PrimitiveType, Symbol, Ty, TypeId};
