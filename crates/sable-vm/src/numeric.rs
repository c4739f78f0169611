//! Arithmetic, comparison and conversion instructions.
//!
//! Operands of different widths are first brought to a common type with
//! the usual binary numeric promotion; integer arithmetic wraps.

use std::cmp::Ordering;

use sable_codegen::OpCode;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NumericError {
    #[error("attempted to divide by zero")]
    DivideByZero,
    #[error("'{op}' is not defined on {operand}")]
    Unsupported { op: &'static str, operand: String },
}

fn unsupported(op: OpCode, operand: &Value) -> NumericError {
    NumericError::Unsupported {
        op: op.name(),
        operand: format!("{:?}", operand),
    }
}

/// Promotion rank, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    Decimal,
}

fn rank(value: &Value) -> Option<Rank> {
    Some(match value {
        Value::Char(_)
        | Value::I8(_)
        | Value::U8(_)
        | Value::I16(_)
        | Value::U16(_)
        | Value::I32(_)
        | Value::Enum(..) => Rank::Int,
        Value::U32(_) => Rank::UInt,
        Value::I64(_) => Rank::Long,
        Value::U64(_) => Rank::ULong,
        Value::F32(_) => Rank::Float,
        Value::F64(_) => Rank::Double,
        Value::Decimal(_) => Rank::Decimal,
        _ => return None,
    })
}

/// A numeric value widened for conversion.
#[derive(Debug, Clone, Copy)]
enum Scalar {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl Scalar {
    fn of(value: &Value) -> Option<Scalar> {
        Some(match *value {
            Value::Bool(b) => Scalar::Signed(b as i64),
            Value::Char(c) => Scalar::Unsigned(c as u64),
            Value::I8(v) => Scalar::Signed(v as i64),
            Value::U8(v) => Scalar::Unsigned(v as u64),
            Value::I16(v) => Scalar::Signed(v as i64),
            Value::U16(v) => Scalar::Unsigned(v as u64),
            Value::I32(v) => Scalar::Signed(v as i64),
            Value::U32(v) => Scalar::Unsigned(v as u64),
            Value::I64(v) => Scalar::Signed(v),
            Value::U64(v) => Scalar::Unsigned(v),
            Value::F32(v) => Scalar::Float(v as f64),
            Value::F64(v) | Value::Decimal(v) => Scalar::Float(v),
            Value::Enum(_, v) => Scalar::Signed(v as i64),
            _ => return None,
        })
    }

    fn as_i64(self) -> i64 {
        match self {
            Scalar::Signed(v) => v,
            Scalar::Unsigned(v) => v as i64,
            Scalar::Float(v) => v as i64,
        }
    }

    fn as_u64(self) -> u64 {
        match self {
            Scalar::Signed(v) => v as u64,
            Scalar::Unsigned(v) => v,
            Scalar::Float(v) if v < 0.0 => v as i64 as u64,
            Scalar::Float(v) => v as u64,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Scalar::Signed(v) => v as f64,
            Scalar::Unsigned(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Scalar::Signed(v) => v == 0,
            Scalar::Unsigned(v) => v == 0,
            Scalar::Float(v) => v == 0.0,
        }
    }
}

fn widen(value: &Value, rank: Rank) -> Option<Value> {
    let scalar = Scalar::of(value)?;
    Some(match rank {
        Rank::Int => Value::I32(scalar.as_i64() as i32),
        Rank::UInt => Value::U32(scalar.as_u64() as u32),
        Rank::Long => Value::I64(scalar.as_i64()),
        Rank::ULong => Value::U64(scalar.as_u64()),
        Rank::Float => Value::F32(scalar.as_f64() as f32),
        Rank::Double => Value::F64(scalar.as_f64()),
        Rank::Decimal => Value::Decimal(scalar.as_f64()),
    })
}

/// Bring two numeric operands to their common type.
fn promote(a: &Value, b: &Value) -> Option<(Value, Value)> {
    let (ra, rb) = (rank(a)?, rank(b)?);
    let common = match (ra.max(rb), ra.min(rb)) {
        // int and uint meet in long
        (Rank::UInt, Rank::Int) => Rank::Long,
        (high, _) => high,
    };
    Some((widen(a, common)?, widen(b, common)?))
}

macro_rules! integral {
    ($name:ident, $t:ty) => {
        fn $name(op: OpCode, a: $t, b: $t) -> Option<Result<$t, NumericError>> {
            Some(Ok(match op {
                OpCode::Add => a.wrapping_add(b),
                OpCode::Sub => a.wrapping_sub(b),
                OpCode::Mul => a.wrapping_mul(b),
                OpCode::Div if b == 0 => return Some(Err(NumericError::DivideByZero)),
                OpCode::Div => a.wrapping_div(b),
                OpCode::Rem if b == 0 => return Some(Err(NumericError::DivideByZero)),
                OpCode::Rem => a.wrapping_rem(b),
                OpCode::And => a & b,
                OpCode::Or => a | b,
                OpCode::Xor => a ^ b,
                _ => return None,
            }))
        }
    };
}

integral!(int32, i32);
integral!(uint32, u32);
integral!(int64, i64);
integral!(uint64, u64);

macro_rules! floating {
    ($name:ident, $t:ty) => {
        fn $name(op: OpCode, a: $t, b: $t) -> Option<$t> {
            Some(match op {
                OpCode::Add => a + b,
                OpCode::Sub => a - b,
                OpCode::Mul => a * b,
                OpCode::Div => a / b,
                OpCode::Rem => a % b,
                _ => return None,
            })
        }
    };
}

floating!(float32, f32);
floating!(float64, f64);

/// `add sub mul div rem and or xor`.
pub fn binary(op: OpCode, a: &Value, b: &Value) -> Result<Value, NumericError> {
    if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
        return match op {
            OpCode::And => Ok(Value::Bool(*x & *y)),
            OpCode::Or => Ok(Value::Bool(*x | *y)),
            OpCode::Xor => Ok(Value::Bool(*x ^ *y)),
            _ => Err(unsupported(op, a)),
        };
    }
    let (a, b) = promote(a, b).ok_or_else(|| unsupported(op, a))?;
    let result = match (&a, &b) {
        (Value::I32(x), Value::I32(y)) => int32(op, *x, *y).map(|r| r.map(Value::I32)),
        (Value::U32(x), Value::U32(y)) => uint32(op, *x, *y).map(|r| r.map(Value::U32)),
        (Value::I64(x), Value::I64(y)) => int64(op, *x, *y).map(|r| r.map(Value::I64)),
        (Value::U64(x), Value::U64(y)) => uint64(op, *x, *y).map(|r| r.map(Value::U64)),
        (Value::F32(x), Value::F32(y)) => float32(op, *x, *y).map(|r| Ok(Value::F32(r))),
        (Value::F64(x), Value::F64(y)) => float64(op, *x, *y).map(|r| Ok(Value::F64(r))),
        (Value::Decimal(x), Value::Decimal(y)) => {
            if matches!(op, OpCode::Div | OpCode::Rem) && *y == 0.0 {
                Some(Err(NumericError::DivideByZero))
            } else {
                float64(op, *x, *y).map(|r| Ok(Value::Decimal(r)))
            }
        }
        _ => None,
    };
    result.unwrap_or_else(|| Err(unsupported(op, &a)))
}

/// `shl` and `shr`; the count is masked to the operand width.
pub fn shift(op: OpCode, value: &Value, count: &Value) -> Result<Value, NumericError> {
    let count = Scalar::of(count).ok_or_else(|| unsupported(op, count))?.as_i64() as u32;
    let left = op == OpCode::Shl;
    let rank = rank(value).ok_or_else(|| unsupported(op, value))?;
    let widened = widen(value, rank.max(Rank::Int)).ok_or_else(|| unsupported(op, value))?;
    Ok(match widened {
        Value::I32(v) if left => Value::I32(v.wrapping_shl(count)),
        Value::I32(v) => Value::I32(v.wrapping_shr(count)),
        Value::U32(v) if left => Value::U32(v.wrapping_shl(count)),
        Value::U32(v) => Value::U32(v.wrapping_shr(count)),
        Value::I64(v) if left => Value::I64(v.wrapping_shl(count)),
        Value::I64(v) => Value::I64(v.wrapping_shr(count)),
        Value::U64(v) if left => Value::U64(v.wrapping_shl(count)),
        Value::U64(v) => Value::U64(v.wrapping_shr(count)),
        other => return Err(unsupported(op, &other)),
    })
}

/// `neg` and `not`.
pub fn unary(op: OpCode, value: &Value) -> Result<Value, NumericError> {
    if let Value::Bool(b) = value {
        return match op {
            OpCode::Not => Ok(Value::Bool(!b)),
            _ => Err(unsupported(op, value)),
        };
    }
    let rank = rank(value).ok_or_else(|| unsupported(op, value))?;
    let widened = widen(value, rank.max(Rank::Int)).ok_or_else(|| unsupported(op, value))?;
    Ok(match (op, widened) {
        (OpCode::Neg, Value::I32(v)) => Value::I32(v.wrapping_neg()),
        (OpCode::Neg, Value::U32(v)) => Value::I64(-(v as i64)),
        (OpCode::Neg, Value::I64(v)) => Value::I64(v.wrapping_neg()),
        (OpCode::Neg, Value::F32(v)) => Value::F32(-v),
        (OpCode::Neg, Value::F64(v)) => Value::F64(-v),
        (OpCode::Neg, Value::Decimal(v)) => Value::Decimal(-v),
        (OpCode::Not, Value::I32(v)) => Value::I32(!v),
        (OpCode::Not, Value::U32(v)) => Value::U32(!v),
        (OpCode::Not, Value::I64(v)) => Value::I64(!v),
        (OpCode::Not, Value::U64(v)) => Value::U64(!v),
        (_, other) => return Err(unsupported(op, &other)),
    })
}

/// `ceq`: numeric equality after promotion, string contents, reference
/// identity otherwise.
pub fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => match promote(a, b) {
            Some((x, y)) => x == y,
            None => a == b,
        },
    }
}

/// Ordering for `cgt`/`clt`; `None` when unordered (NaN or non-numeric).
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    let (x, y) = promote(a, b)?;
    match (x, y) {
        (Value::I32(x), Value::I32(y)) => Some(x.cmp(&y)),
        (Value::U32(x), Value::U32(y)) => Some(x.cmp(&y)),
        (Value::I64(x), Value::I64(y)) => Some(x.cmp(&y)),
        (Value::U64(x), Value::U64(y)) => Some(x.cmp(&y)),
        (Value::F32(x), Value::F32(y)) => x.partial_cmp(&y),
        (Value::F64(x), Value::F64(y)) | (Value::Decimal(x), Value::Decimal(y)) => x.partial_cmp(&y),
        _ => None,
    }
}

/// The `conv.*` family. Narrowing truncates; float to integer saturates.
pub fn convert(op: OpCode, value: &Value) -> Result<Value, NumericError> {
    let scalar = Scalar::of(value).ok_or_else(|| unsupported(op, value))?;
    Ok(match op {
        OpCode::ConvI1 => Value::I8(scalar.as_i64() as i8),
        OpCode::ConvU1 => Value::U8(scalar.as_u64() as u8),
        OpCode::ConvI2 => Value::I16(scalar.as_i64() as i16),
        OpCode::ConvU2 => Value::U16(scalar.as_u64() as u16),
        OpCode::ConvI4 => Value::I32(scalar.as_i64() as i32),
        OpCode::ConvU4 => Value::U32(scalar.as_u64() as u32),
        OpCode::ConvI8 => Value::I64(scalar.as_i64()),
        OpCode::ConvU8 => Value::U64(scalar.as_u64()),
        OpCode::ConvR4 => Value::F32(scalar.as_f64() as f32),
        OpCode::ConvR8 => Value::F64(scalar.as_f64()),
        OpCode::ConvChar => Value::Char(scalar.as_u64() as u16),
        OpCode::ConvBool => Value::Bool(!scalar.is_zero()),
        OpCode::ConvDec => Value::Decimal(scalar.as_f64()),
        _ => return Err(unsupported(op, value)),
    })
}

/// Integer view of a value, used by `switch` and enum formatting.
pub fn as_i64(value: &Value) -> Option<i64> {
    match Scalar::of(value)? {
        Scalar::Float(_) => None,
        scalar => Some(scalar.as_i64()),
    }
}

/// Floating view of a numeric value, used by the math intrinsics.
pub fn as_f64(value: &Value) -> Option<f64> {
    Scalar::of(value).map(Scalar::as_f64)
}
