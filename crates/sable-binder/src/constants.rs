//! Compile-time constant folding.
//!
//! Integral arithmetic wraps to the width of the operand type; `decimal`
//! constants are carried as `f64`.

use sable_symbols::{ConstantValue, PrimitiveType};

use crate::bound::{BinaryOperator, UnaryOperator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldError {
    DivideByZero,
}

/// Integer view of an integral or `char` constant.
fn as_i128(value: &ConstantValue) -> Option<i128> {
    match *value {
        ConstantValue::Int(v) => Some(v as i128),
        ConstantValue::UInt(v) => Some(v as i128),
        ConstantValue::Char(c) => Some(c as u32 as i128),
        _ => None,
    }
}

fn bit_width(p: PrimitiveType) -> u32 {
    (p.size_in_bytes() * 8) as u32
}

/// Wrap `value` to the representation of the integral type `p`.
fn wrap_integral(value: i128, p: PrimitiveType) -> ConstantValue {
    let bits = bit_width(p);
    let mask: u128 = if bits == 128 { u128::MAX } else { (1u128 << bits) - 1 };
    let raw = (value as u128) & mask;
    if p == PrimitiveType::Char {
        return ConstantValue::Char(char::from_u32(raw as u32).unwrap_or('\u{fffd}'));
    }
    if p.is_unsigned() {
        ConstantValue::UInt(raw as u64)
    } else {
        let sign_bit = 1u128 << (bits - 1);
        let signed = if raw & sign_bit != 0 {
            raw as i128 - (1i128 << bits)
        } else {
            raw as i128
        };
        ConstantValue::Int(signed as i64)
    }
}

fn integral_range(p: PrimitiveType) -> (i128, i128) {
    use PrimitiveType::*;
    match p {
        SByte => (i8::MIN as i128, i8::MAX as i128),
        Byte => (0, u8::MAX as i128),
        Short => (i16::MIN as i128, i16::MAX as i128),
        UShort | Char => (0, u16::MAX as i128),
        Int => (i32::MIN as i128, i32::MAX as i128),
        UInt => (0, u32::MAX as i128),
        Long => (i64::MIN as i128, i64::MAX as i128),
        ULong => (0, u64::MAX as i128),
        _ => (0, -1),
    }
}

/// Whether an integral constant lies within the range of `target`.
pub fn fits_in(value: &ConstantValue, target: PrimitiveType) -> bool {
    match as_i128(value) {
        Some(v) if target.is_integral() => {
            let (min, max) = integral_range(target);
            v >= min && v <= max
        }
        _ => false,
    }
}

/// Implicit constant expression conversions: an `int` constant converts to
/// any smaller or unsigned integral type that can represent it, and a
/// non-negative `long` constant converts to `ulong`.
pub fn constant_fits(value: &ConstantValue, source: PrimitiveType, target: PrimitiveType) -> bool {
    use PrimitiveType::*;
    match source {
        Int => matches!(target, SByte | Byte | Short | UShort | UInt | ULong) && fits_in(value, target),
        Long => target == ULong && fits_in(value, target),
        _ => false,
    }
}

/// Convert a constant to the primitive type `target` with unchecked
/// semantics. `None` when the source is not numeric.
pub fn convert_constant(value: &ConstantValue, target: PrimitiveType) -> Option<ConstantValue> {
    if target == PrimitiveType::Bool {
        return value.as_bool().map(ConstantValue::Bool);
    }
    if let Some(v) = as_i128(value) {
        return Some(match target {
            PrimitiveType::Float => ConstantValue::Float(v as f32),
            PrimitiveType::Double => ConstantValue::Double(v as f64),
            PrimitiveType::Decimal => ConstantValue::Decimal(v as f64),
            _ => wrap_integral(v, target),
        });
    }
    let f = match *value {
        ConstantValue::Float(f) => f as f64,
        ConstantValue::Double(f) | ConstantValue::Decimal(f) => f,
        _ => return None,
    };
    Some(match target {
        PrimitiveType::Float => ConstantValue::Float(f as f32),
        PrimitiveType::Double => ConstantValue::Double(f),
        PrimitiveType::Decimal => ConstantValue::Decimal(f),
        _ => wrap_integral(f.trunc() as i128, target),
    })
}

pub fn fold_unary(op: UnaryOperator, value: &ConstantValue, operand: PrimitiveType) -> Option<ConstantValue> {
    match op {
        UnaryOperator::LogicalNot => value.as_bool().map(|b| ConstantValue::Bool(!b)),
        UnaryOperator::Negate => match *value {
            ConstantValue::Float(f) => Some(ConstantValue::Float(-f)),
            ConstantValue::Double(f) => Some(ConstantValue::Double(-f)),
            ConstantValue::Decimal(f) => Some(ConstantValue::Decimal(-f)),
            _ => as_i128(value).map(|v| wrap_integral(-v, operand)),
        },
        UnaryOperator::BitwiseNot => as_i128(value).map(|v| wrap_integral(!v, operand)),
    }
}

/// Fold `left op right` where both operands already have the promoted
/// operand type. Comparisons produce `bool`.
pub fn fold_binary(
    op: BinaryOperator,
    left: &ConstantValue,
    right: &ConstantValue,
    operand: PrimitiveType,
) -> Result<Option<ConstantValue>, FoldError> {
    use BinaryOperator::*;
    if operand == PrimitiveType::Bool {
        let (Some(l), Some(r)) = (left.as_bool(), right.as_bool()) else {
            return Ok(None);
        };
        let value = match op {
            Eq => l == r,
            Ne => l != r,
            And | LogicalAnd => l && r,
            Or | LogicalOr => l || r,
            Xor => l ^ r,
            _ => return Ok(None),
        };
        return Ok(Some(ConstantValue::Bool(value)));
    }

    if operand.is_integral() {
        let (Some(l), Some(r)) = (as_i128(left), as_i128(right)) else {
            return Ok(None);
        };
        let wrap = |v: i128| Ok(Some(wrap_integral(v, operand)));
        let compare = |b: bool| Ok(Some(ConstantValue::Bool(b)));
        return match op {
            Add => wrap(l + r),
            Sub => wrap(l - r),
            Mul => wrap(l.wrapping_mul(r)),
            Div | Rem if r == 0 => Err(FoldError::DivideByZero),
            Div => wrap(l / r),
            Rem => wrap(l % r),
            And => wrap(l & r),
            Or => wrap(l | r),
            Xor => wrap(l ^ r),
            Shl => wrap(l << (r as u32 & (bit_width(operand) - 1))),
            Shr => wrap(l >> (r as u32 & (bit_width(operand) - 1))),
            Eq => compare(l == r),
            Ne => compare(l != r),
            Lt => compare(l < r),
            Le => compare(l <= r),
            Gt => compare(l > r),
            Ge => compare(l >= r),
            LogicalAnd | LogicalOr | StringConcat => Ok(None),
        };
    }

    let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
        return Ok(None);
    };
    if operand == PrimitiveType::Decimal && matches!(op, Div | Rem) && r == 0.0 {
        return Err(FoldError::DivideByZero);
    }
    let number = |v: f64| {
        Ok(Some(match operand {
            PrimitiveType::Float => ConstantValue::Float(v as f32),
            PrimitiveType::Decimal => ConstantValue::Decimal(v),
            _ => ConstantValue::Double(v),
        }))
    };
    let compare = |b: bool| Ok(Some(ConstantValue::Bool(b)));
    match op {
        Add => number(l + r),
        Sub => number(l - r),
        Mul => number(l * r),
        Div => number(l / r),
        Rem => number(l % r),
        Eq => compare(l == r),
        Ne => compare(l != r),
        Lt => compare(l < r),
        Le => compare(l <= r),
        Gt => compare(l > r),
        Ge => compare(l >= r),
        _ => Ok(None),
    }
}

/// Constant-fold string concatenation; `null` concatenates as empty.
pub fn fold_concat(left: &ConstantValue, right: &ConstantValue) -> ConstantValue {
    let text = format!("{}{}", left.display_text(), right.display_text());
    ConstantValue::String(text.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use PrimitiveType::*;

    #[test]
    fn test_integral_folding_wraps() {
        let max = ConstantValue::Int(i32::MAX as i64);
        let one = ConstantValue::Int(1);
        assert_eq!(
            fold_binary(BinaryOperator::Add, &max, &one, Int),
            Ok(Some(ConstantValue::Int(i32::MIN as i64)))
        );
        assert_eq!(
            fold_binary(BinaryOperator::Sub, &ConstantValue::UInt(0), &ConstantValue::UInt(1), UInt),
            Ok(Some(ConstantValue::UInt(u32::MAX as u64)))
        );
    }

    #[test]
    fn test_const_expressions() {
        let two = ConstantValue::Int(2);
        let four = fold_binary(BinaryOperator::Add, &two, &two, Int).unwrap().unwrap();
        let back = fold_binary(BinaryOperator::Sub, &four, &two, Int).unwrap().unwrap();
        assert_eq!(back, two);
        let neg = fold_unary(UnaryOperator::Negate, &two, Int).unwrap();
        assert_eq!(fold_unary(UnaryOperator::Negate, &neg, Int), Some(two));
    }

    #[test]
    fn test_divide_by_zero() {
        let zero = ConstantValue::Int(0);
        assert_eq!(
            fold_binary(BinaryOperator::Div, &ConstantValue::Int(1), &zero, Int),
            Err(FoldError::DivideByZero)
        );
        let inf = fold_binary(
            BinaryOperator::Div,
            &ConstantValue::Double(1.0),
            &ConstantValue::Double(0.0),
            Double,
        );
        assert_eq!(inf, Ok(Some(ConstantValue::Double(f64::INFINITY))));
    }

    #[test]
    fn test_comparisons_and_bools() {
        assert_eq!(
            fold_binary(BinaryOperator::Lt, &ConstantValue::Int(1), &ConstantValue::Int(2), Int),
            Ok(Some(ConstantValue::Bool(true)))
        );
        assert_eq!(
            fold_binary(
                BinaryOperator::LogicalAnd,
                &ConstantValue::Bool(true),
                &ConstantValue::Bool(false),
                Bool
            ),
            Ok(Some(ConstantValue::Bool(false)))
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(convert_constant(&ConstantValue::Int(2), Double), Some(ConstantValue::Double(2.0)));
        assert_eq!(convert_constant(&ConstantValue::Double(2.9), Int), Some(ConstantValue::Int(2)));
        assert_eq!(convert_constant(&ConstantValue::Int(300), Byte), Some(ConstantValue::UInt(44)));
        assert_eq!(convert_constant(&ConstantValue::Int(-1), SByte), Some(ConstantValue::Int(-1)));
        assert!(constant_fits(&ConstantValue::Int(2), Int, UInt));
        assert!(!constant_fits(&ConstantValue::Int(-2), Int, UInt));
        assert!(!constant_fits(&ConstantValue::Int(2), Int, Double));
        assert!(fits_in(&ConstantValue::Int(255), Byte));
    }

    #[test]
    fn test_concat() {
        let s = fold_concat(&ConstantValue::String("const".into()), &ConstantValue::Int(2));
        assert_eq!(s, ConstantValue::String("const2".into()));
        let b = fold_concat(&ConstantValue::Bool(true), &ConstantValue::Null);
        assert_eq!(b, ConstantValue::String("True".into()));
    }
}
