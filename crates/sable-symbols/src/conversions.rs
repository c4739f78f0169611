//! The conversion oracle.

use crate::table::{SymbolLookup, SymbolTable};
use crate::types::{GenericKind, PrimitiveType, Ty, TypeId};
use crate::ClassId;

/// How a value of one type becomes a value of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ConversionKind {
    Identity,
    ImplicitNumeric,
    /// `T -> T?` or `S? -> T?` with an implicit `S -> T`
    ImplicitNullable,
    NullLiteral,
    ImplicitReference,
    Boxing,
    ExplicitNumeric,
    Unboxing,
    ExplicitReference,
    /// `S? -> T` with an identity or numeric `S -> T`
    ExplicitNullable,
    /// Enum to or from its underlying numeric type
    ExplicitEnum,
    None,
}

impl ConversionKind {
    pub fn is_implicit(self) -> bool {
        matches!(
            self,
            ConversionKind::Identity
                | ConversionKind::ImplicitNumeric
                | ConversionKind::ImplicitNullable
                | ConversionKind::NullLiteral
                | ConversionKind::ImplicitReference
                | ConversionKind::Boxing
        )
    }

    pub fn exists(self) -> bool {
        self != ConversionKind::None
    }

    /// Conversions that never change the runtime representation.
    pub fn is_representation_preserving(self) -> bool {
        matches!(
            self,
            ConversionKind::Identity
                | ConversionKind::ImplicitReference
                | ConversionKind::NullLiteral
        )
    }
}

/// Whether C# permits an implicit numeric conversion from `from` to `to`.
pub fn implicit_numeric(from: PrimitiveType, to: PrimitiveType) -> bool {
    use PrimitiveType::*;
    match from {
        SByte => matches!(to, Short | Int | Long | Float | Double | Decimal),
        Byte => matches!(
            to,
            Short | UShort | Int | UInt | Long | ULong | Float | Double | Decimal
        ),
        Short => matches!(to, Int | Long | Float | Double | Decimal),
        UShort => matches!(to, Int | UInt | Long | ULong | Float | Double | Decimal),
        Int => matches!(to, Long | Float | Double | Decimal),
        UInt => matches!(to, Long | ULong | Float | Double | Decimal),
        Long | ULong => matches!(to, Float | Double | Decimal),
        Char => matches!(
            to,
            UShort | Int | UInt | Long | ULong | Float | Double | Decimal
        ),
        Float => to == Double,
        Double | Decimal | Bool => false,
    }
}

/// The operand type two numeric operands are promoted to for a binary
/// operator, or `None` when no promotion exists (e.g. `ulong` with `int`).
pub fn binary_numeric_promotion(left: PrimitiveType, right: PrimitiveType) -> Option<PrimitiveType> {
    use PrimitiveType::*;
    if !left.is_numeric() || !right.is_numeric() {
        return None;
    }
    let either = |p: PrimitiveType| left == p || right == p;
    if either(Decimal) {
        return if either(Float) || either(Double) { None } else { Some(Decimal) };
    }
    if either(Double) {
        return Some(Double);
    }
    if either(Float) {
        return Some(Float);
    }
    if either(ULong) {
        let other = if left == ULong { right } else { left };
        return if matches!(other, SByte | Short | Int | Long) { None } else { Some(ULong) };
    }
    if either(Long) {
        return Some(Long);
    }
    if either(UInt) {
        let other = if left == UInt { right } else { left };
        return if matches!(other, SByte | Short | Int) { Some(Long) } else { Some(UInt) };
    }
    Some(Int)
}

/// Unary `-`/`+`/`~` promotion.
pub fn unary_numeric_promotion(operand: PrimitiveType) -> Option<PrimitiveType> {
    use PrimitiveType::*;
    match operand {
        SByte | Byte | Short | UShort | Char | Int => Some(Int),
        UInt | Long | ULong | Float | Double | Decimal => Some(operand),
        Bool => None,
    }
}

impl SymbolTable {
    /// Classify the conversion from `from` to `to`.
    pub fn classify_conversion(&self, from: TypeId, to: TypeId) -> ConversionKind {
        if from == to || from.is_error() || to.is_error() {
            return ConversionKind::Identity;
        }
        let from_ty = self.ty(from);
        let to_ty = self.ty(to);

        if from_ty == Ty::Null {
            return if self.is_reference_type(to) || matches!(to_ty, Ty::Nullable(_)) {
                ConversionKind::NullLiteral
            } else {
                ConversionKind::None
            };
        }

        match (&from_ty, &to_ty) {
            (Ty::Primitive(f), Ty::Primitive(t)) => {
                if implicit_numeric(*f, *t) {
                    return ConversionKind::ImplicitNumeric;
                }
                if f.is_numeric() && t.is_numeric() {
                    return ConversionKind::ExplicitNumeric;
                }
                return ConversionKind::None;
            }
            (_, Ty::Nullable(target)) => {
                let source = match from_ty {
                    Ty::Nullable(inner) => inner,
                    _ => from,
                };
                if self.underlying_implicit(source, *target) {
                    return ConversionKind::ImplicitNullable;
                }
                if from_ty == Ty::Object {
                    return ConversionKind::Unboxing;
                }
                if self.classify_conversion(source, *target).exists() {
                    return ConversionKind::ExplicitNullable;
                }
                return ConversionKind::None;
            }
            (Ty::Nullable(source), _) => {
                if to_ty == Ty::Object {
                    return ConversionKind::Boxing;
                }
                let inner = self.classify_conversion(*source, to);
                return if matches!(
                    inner,
                    ConversionKind::Identity
                        | ConversionKind::ImplicitNumeric
                        | ConversionKind::ExplicitNumeric
                        | ConversionKind::ExplicitEnum
                ) {
                    ConversionKind::ExplicitNullable
                } else {
                    ConversionKind::None
                };
            }
            _ => {}
        }

        let from_enum = self.is_enum_type(from);
        let to_enum = self.is_enum_type(to);
        if (from_enum && (to_enum || to_ty.as_primitive().is_some_and(PrimitiveType::is_numeric)))
            || (to_enum && from_ty.as_primitive().is_some_and(PrimitiveType::is_numeric))
        {
            return ConversionKind::ExplicitEnum;
        }

        if to_ty == Ty::Object {
            return if self.is_value_type(from) {
                ConversionKind::Boxing
            } else {
                ConversionKind::ImplicitReference
            };
        }
        if from_ty == Ty::Object {
            return if self.is_value_type(to) {
                ConversionKind::Unboxing
            } else {
                ConversionKind::ExplicitReference
            };
        }

        if self.is_reference_type(from) && self.is_reference_type(to) {
            if self.is_implicit_reference(from, to) {
                return ConversionKind::ImplicitReference;
            }
            if self.is_implicit_reference(to, from) {
                return ConversionKind::ExplicitReference;
            }
        }
        ConversionKind::None
    }

    /// The "conversion exists" oracle used by the candidate resolver.
    pub fn has_implicit_conversion(&self, from: TypeId, to: TypeId) -> bool {
        self.classify_conversion(from, to).is_implicit()
    }

    fn underlying_implicit(&self, from: TypeId, to: TypeId) -> bool {
        matches!(
            self.classify_conversion(from, to),
            ConversionKind::Identity | ConversionKind::ImplicitNumeric
        )
    }

    /// Derived-to-base, class-to-interface, `Task<T>` to `Task`.
    fn is_implicit_reference(&self, from: TypeId, to: TypeId) -> bool {
        let to_ty = self.ty(to);
        match self.ty(from) {
            Ty::Generic { kind: GenericKind::Task, args } if !args.is_empty() => to == TypeId::TASK,
            Ty::Class(class) => {
                if let Ty::Class(target) = to_ty {
                    return self.derives_from(class, target);
                }
                let mut current = Some(class);
                while let Some(id) = current {
                    let symbol = self.class(id);
                    if symbol.interfaces.contains(&to) {
                        return true;
                    }
                    current = symbol.base;
                }
                false
            }
            _ => false,
        }
    }

    /// Exception types: `Exception` and everything derived from it.
    pub fn is_exception_type(&self, ty: TypeId) -> bool {
        match self.ty(ty) {
            Ty::Class(class) => self.derives_from(class, ClassId::EXCEPTION),
            _ => false,
        }
    }
}
