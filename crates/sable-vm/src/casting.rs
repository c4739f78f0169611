//! Runtime type tests behind `isinst`, `castclass`, `box` and `unbox.any`.

use sable_symbols::{ClassId, GenericKind, PrimitiveType, SymbolLookup, Ty, TypeId};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastError {
    /// Unboxing `null` to a value type
    Null,
    Mismatch,
}

/// Whether a non-null `value` is an instance of `ty`.
pub fn is_instance<S: SymbolLookup>(symbols: &S, value: &Value, ty: TypeId) -> bool {
    if value.is_null() {
        return false;
    }
    match symbols.ty(ty) {
        Ty::Object | Ty::TypeParam(_) => true,
        Ty::String => matches!(value, Value::Str(_)),
        Ty::Primitive(p) => value.primitive() == Some(p),
        Ty::Nullable(inner) => is_instance(symbols, value, inner),
        Ty::Class(class) => match value {
            Value::Object(object) => {
                symbols.derives_from(object.class, class) || implements(symbols, object.class, ty)
            }
            Value::Enum(enum_class, _) => *enum_class == class,
            Value::Str(_) => class == ClassId::STRING || class == ClassId::OBJECT,
            _ => false,
        },
        Ty::Generic { kind: GenericKind::Task, .. } => matches!(value, Value::Task(_)),
        Ty::Generic { kind: GenericKind::Func | GenericKind::Action, .. } => {
            matches!(value, Value::Delegate(_))
        }
        Ty::Generic { .. } => match value {
            Value::Object(object) => implements(symbols, object.class, ty),
            _ => false,
        },
        Ty::Void | Ty::Null | Ty::Error => false,
    }
}

/// Whether `class` or one of its bases lists an interface matching `target`.
fn implements<S: SymbolLookup>(symbols: &S, class: ClassId, target: TypeId) -> bool {
    let mut current = Some(class);
    while let Some(id) = current {
        let symbol = symbols.class(id);
        if symbol.interfaces.iter().any(|&i| interface_matches(symbols, i, target)) {
            return true;
        }
        current = symbol.base;
    }
    false
}

/// Built-in generic interfaces match on their kind alone; element types
/// are not tracked at run time.
fn interface_matches<S: SymbolLookup>(symbols: &S, interface: TypeId, target: TypeId) -> bool {
    if interface == target {
        return true;
    }
    match (symbols.ty(interface), symbols.ty(target)) {
        (Ty::Generic { kind: a, .. }, Ty::Generic { kind: b, .. }) => a == b,
        (Ty::Class(class), _) => symbols
            .class(class)
            .interfaces
            .iter()
            .any(|&i| interface_matches(symbols, i, target)),
        _ => false,
    }
}

/// `box`: enums carry their class once boxed; every other value is
/// already self-describing.
pub fn box_value<S: SymbolLookup>(symbols: &S, value: Value, ty: TypeId) -> Value {
    match symbols.ty(ty) {
        Ty::Class(class) if symbols.class(class).is_enum() => match value {
            Value::I32(v) => Value::Enum(class, v),
            other => other,
        },
        Ty::Nullable(inner) => box_value(symbols, value, inner),
        _ => value,
    }
}

/// `unbox.any`: the exact primitive kind is required; a boxed enum may be
/// unboxed to its underlying `int`. Reference targets behave like a cast.
pub fn unbox<S: SymbolLookup>(symbols: &S, value: Value, ty: TypeId) -> Result<Value, CastError> {
    match symbols.ty(ty) {
        Ty::Nullable(inner) => match value {
            Value::Null => Ok(Value::Null),
            value => unbox(symbols, value, inner),
        },
        Ty::Primitive(p) => match value {
            Value::Null => Err(CastError::Null),
            Value::Enum(_, v) if p == PrimitiveType::Int => Ok(Value::I32(v)),
            value if value.primitive() == Some(p) => Ok(value),
            _ => Err(CastError::Mismatch),
        },
        Ty::Class(class) if symbols.class(class).is_enum() => match value {
            Value::Enum(actual, v) if actual == class => Ok(Value::I32(v)),
            Value::I32(v) => Ok(Value::I32(v)),
            Value::Null => Err(CastError::Null),
            _ => Err(CastError::Mismatch),
        },
        _ if value.is_null() || is_instance(symbols, &value, ty) => Ok(value),
        _ => Err(CastError::Mismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_symbols::{ClassKind, ClassSymbol, SymbolTable};

    fn enum_table() -> (SymbolTable, ClassId, TypeId) {
        let table = SymbolTable::new();
        let color = table.add_class(ClassSymbol::new("Color", ClassKind::Enum));
        let ty = table.class(color).type_id;
        (table, color, ty)
    }

    #[test]
    fn test_primitive_instances() {
        let table = SymbolTable::new();
        assert!(is_instance(&table, &Value::I32(1), TypeId::INT));
        assert!(!is_instance(&table, &Value::I32(1), TypeId::LONG));
        assert!(is_instance(&table, &Value::I32(1), TypeId::OBJECT));
        assert!(is_instance(&table, &Value::string("s"), TypeId::STRING));
        assert!(!is_instance(&table, &Value::Null, TypeId::OBJECT));
        let nullable_int = table.types.nullable(TypeId::INT);
        assert!(is_instance(&table, &Value::I32(3), nullable_int));
    }

    #[test]
    fn test_enum_boxing() {
        let (table, color, ty) = enum_table();
        let boxed = box_value(&table, Value::I32(2), ty);
        assert!(matches!(boxed, Value::Enum(c, 2) if c == color));
        assert!(is_instance(&table, &boxed, ty));
        assert!(!is_instance(&table, &Value::I32(2), ty));
        assert_eq!(unbox(&table, boxed.clone(), ty), Ok(Value::I32(2)));
        assert_eq!(unbox(&table, boxed, TypeId::INT), Ok(Value::I32(2)));
    }

    #[test]
    fn test_unbox_is_strict() {
        let table = SymbolTable::new();
        assert_eq!(unbox(&table, Value::I64(1), TypeId::INT), Err(CastError::Mismatch));
        assert_eq!(unbox(&table, Value::Null, TypeId::INT), Err(CastError::Null));
        let nullable_int = table.types.nullable(TypeId::INT);
        assert_eq!(unbox(&table, Value::Null, nullable_int), Ok(Value::Null));
        assert_eq!(unbox(&table, Value::string("x"), TypeId::OBJECT), Ok(Value::string("x")));
        assert_eq!(unbox(&table, Value::string("x"), TypeId::INT), Err(CastError::Mismatch));
    }
}
