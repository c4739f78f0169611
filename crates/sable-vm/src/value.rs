use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use sable_symbols::{
    format_float, ClassId, FieldId, MethodId, PrimitiveType, SymbolLookup, Ty, TypeId,
};

use crate::executor::TaskRef;

/// Argument or local storage of one frame. Shared so `ref` and `out`
/// arguments can point into it.
pub type Slots = Rc<RefCell<Vec<Value>>>;

pub type ObjectRef = Rc<Object>;

/// A runtime value in the Sable VM.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    /// UTF-16 code unit
    Char(u16),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Decimal(f64),
    Str(Rc<str>),
    Object(ObjectRef),
    /// A boxed enum value
    Enum(ClassId, i32),
    Delegate(Rc<Delegate>),
    Task(TaskRef),
    /// Address of a variable, pushed by `ldarga`, `ldloca` and `ldflda`
    Ref(Reference),
    /// Pushed by `ldftn` and consumed by `newdelegate`
    MethodPtr(MethodId),
}

/// A class instance.
pub struct Object {
    pub class: ClassId,
    pub fields: RefCell<FxHashMap<FieldId, Value>>,
    /// Identity used by the default `GetHashCode`
    pub id: u32,
}

impl Object {
    pub fn get(&self, field: FieldId) -> Option<Value> {
        self.fields.borrow().get(&field).cloned()
    }

    pub fn set(&self, field: FieldId, value: Value) {
        self.fields.borrow_mut().insert(field, value);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object#{}(class {})", self.id, self.class.0)
    }
}

/// A bound method: the receiver is `None` for static targets.
#[derive(Debug)]
pub struct Delegate {
    pub target: Option<Value>,
    pub method: MethodId,
    pub ty: TypeId,
}

/// A managed pointer to a variable.
#[derive(Clone, Debug)]
pub enum Reference {
    Slot(Slots, usize),
    Field(ObjectRef, FieldId),
    Static(FieldId),
}

impl Value {
    pub fn string(text: &str) -> Self {
        Value::Str(Rc::from(text))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Condition test of `brtrue`/`brfalse`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Char(c) => *c != 0,
            Value::I8(v) => *v != 0,
            Value::U8(v) => *v != 0,
            Value::I16(v) => *v != 0,
            Value::U16(v) => *v != 0,
            Value::I32(v) => *v != 0,
            Value::U32(v) => *v != 0,
            Value::I64(v) => *v != 0,
            Value::U64(v) => *v != 0,
            Value::F32(v) => *v != 0.0,
            Value::F64(v) | Value::Decimal(v) => *v != 0.0,
            Value::Enum(_, v) => *v != 0,
            _ => true,
        }
    }

    /// The primitive kind of an unboxed value.
    pub fn primitive(&self) -> Option<PrimitiveType> {
        Some(match self {
            Value::Bool(_) => PrimitiveType::Bool,
            Value::Char(_) => PrimitiveType::Char,
            Value::I8(_) => PrimitiveType::SByte,
            Value::U8(_) => PrimitiveType::Byte,
            Value::I16(_) => PrimitiveType::Short,
            Value::U16(_) => PrimitiveType::UShort,
            Value::I32(_) => PrimitiveType::Int,
            Value::U32(_) => PrimitiveType::UInt,
            Value::I64(_) => PrimitiveType::Long,
            Value::U64(_) => PrimitiveType::ULong,
            Value::F32(_) => PrimitiveType::Float,
            Value::F64(_) => PrimitiveType::Double,
            Value::Decimal(_) => PrimitiveType::Decimal,
            _ => return None,
        })
    }

    /// The class used for virtual dispatch on this value.
    pub fn runtime_class(&self) -> Option<ClassId> {
        match self {
            Value::Null | Value::Ref(_) | Value::MethodPtr(_) => None,
            Value::Str(_) => Some(ClassId::STRING),
            Value::Object(object) => Some(object.class),
            Value::Enum(class, _) => Some(*class),
            Value::Task(_) => Some(ClassId::TASK),
            _ => Some(ClassId::OBJECT),
        }
    }

    /// Text of primitives and strings as `Console.WriteLine` prints them.
    /// References and enums need the symbol table and yield `None`.
    pub fn format_primitive(&self) -> Option<String> {
        Some(match self {
            Value::Null => String::new(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Char(c) => char::from_u32(*c as u32).unwrap_or('\u{FFFD}').to_string(),
            Value::I8(v) => v.to_string(),
            Value::U8(v) => v.to_string(),
            Value::I16(v) => v.to_string(),
            Value::U16(v) => v.to_string(),
            Value::I32(v) => v.to_string(),
            Value::U32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::U64(v) => v.to_string(),
            Value::F32(v) => format_float(*v as f64, 7),
            Value::F64(v) | Value::Decimal(v) => format_float(*v, 15),
            Value::Str(s) => s.to_string(),
            _ => return None,
        })
    }

    /// Name used in runtime error messages.
    pub fn type_name<S: SymbolLookup>(&self, symbols: &S) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Str(_) => "System.String".to_string(),
            Value::Object(object) => symbols.runtime_class_name(object.class),
            Value::Enum(class, _) => symbols.runtime_class_name(*class),
            Value::Delegate(delegate) => symbols.type_name(delegate.ty),
            Value::Task(_) => "System.Threading.Tasks.Task".to_string(),
            Value::Ref(_) => "&".to_string(),
            Value::MethodPtr(_) => "native int".to_string(),
            other => match other.primitive() {
                Some(p) => system_name(p).to_string(),
                None => "?".to_string(),
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Object(object) => write!(f, "{:?}", object),
            Value::Enum(class, v) => write!(f, "Enum({}, {})", class.0, v),
            Value::Delegate(d) => write!(f, "Delegate(method {})", d.method.0),
            Value::Task(task) => match task.try_borrow() {
                Ok(state) => write!(f, "Task#{}", state.id),
                Err(_) => write!(f, "Task"),
            },
            Value::Ref(r) => write!(f, "Ref({:?})", r),
            Value::MethodPtr(m) => write!(f, "MethodPtr({})", m.0),
            Value::Str(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other.format_primitive().unwrap_or_default()),
        }
    }
}

/// Structural equality of primitives and strings, identity otherwise.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Task(a), Value::Task(b)) => Rc::ptr_eq(a, b),
            (Value::Delegate(a), Value::Delegate(b)) => {
                Rc::ptr_eq(a, b) || (a.method == b.method && a.target == b.target)
            }
            (Value::Enum(c1, a), Value::Enum(c2, b)) => c1 == c2 && a == b,
            (Value::MethodPtr(a), Value::MethodPtr(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::U8(a), Value::U8(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            _ => false,
        }
    }
}

pub(crate) fn system_name(primitive: PrimitiveType) -> &'static str {
    match primitive {
        PrimitiveType::Bool => "System.Boolean",
        PrimitiveType::Char => "System.Char",
        PrimitiveType::SByte => "System.SByte",
        PrimitiveType::Byte => "System.Byte",
        PrimitiveType::Short => "System.Int16",
        PrimitiveType::UShort => "System.UInt16",
        PrimitiveType::Int => "System.Int32",
        PrimitiveType::UInt => "System.UInt32",
        PrimitiveType::Long => "System.Int64",
        PrimitiveType::ULong => "System.UInt64",
        PrimitiveType::Float => "System.Single",
        PrimitiveType::Double => "System.Double",
        PrimitiveType::Decimal => "System.Decimal",
    }
}

/// The zero value of a primitive type.
pub fn zero(primitive: PrimitiveType) -> Value {
    match primitive {
        PrimitiveType::Bool => Value::Bool(false),
        PrimitiveType::Char => Value::Char(0),
        PrimitiveType::SByte => Value::I8(0),
        PrimitiveType::Byte => Value::U8(0),
        PrimitiveType::Short => Value::I16(0),
        PrimitiveType::UShort => Value::U16(0),
        PrimitiveType::Int => Value::I32(0),
        PrimitiveType::UInt => Value::U32(0),
        PrimitiveType::Long => Value::I64(0),
        PrimitiveType::ULong => Value::U64(0),
        PrimitiveType::Float => Value::F32(0.0),
        PrimitiveType::Double => Value::F64(0.0),
        PrimitiveType::Decimal => Value::Decimal(0.0),
    }
}

/// Initial value of a field or local of type `ty`. Enums are stored as
/// their underlying `int`.
pub fn default_value<S: SymbolLookup>(symbols: &S, ty: TypeId) -> Value {
    match symbols.ty(ty) {
        Ty::Primitive(p) => zero(p),
        Ty::Class(class) if symbols.class(class).is_enum() => Value::I32(0),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::I32(0).is_truthy());
        assert!(Value::I64(-1).is_truthy());
        assert!(Value::string("").is_truthy());
        assert!(!Value::Bool(false).is_truthy());
    }

    #[test]
    fn test_format_primitive() {
        assert_eq!(Value::Bool(true).format_primitive().unwrap(), "True");
        assert_eq!(Value::Char('x' as u16).format_primitive().unwrap(), "x");
        assert_eq!(Value::F64(0.1 + 0.2).format_primitive().unwrap(), "0.3");
        assert_eq!(Value::F32(1.5).format_primitive().unwrap(), "1.5");
        assert_eq!(Value::U64(u64::MAX).format_primitive().unwrap(), "18446744073709551615");
        assert_eq!(Value::Null.format_primitive().unwrap(), "");
    }

    #[test]
    fn test_equality_is_structural_for_strings() {
        assert_eq!(Value::string("ab"), Value::string("ab"));
        assert_ne!(Value::I32(1), Value::I64(1));
        assert_ne!(Value::F64(f64::NAN), Value::F64(f64::NAN));
    }
}
