use std::sync::Arc;

use crate::ClassId;

/// A unique identifier for an interned type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const VOID: TypeId = TypeId(0);
    pub const OBJECT: TypeId = TypeId(1);
    pub const STRING: TypeId = TypeId(2);
    /// Type of the `null` literal
    pub const NULL: TypeId = TypeId(3);
    pub const ERROR: TypeId = TypeId(4);
    pub const BOOL: TypeId = TypeId(5);
    pub const CHAR: TypeId = TypeId(6);
    pub const SBYTE: TypeId = TypeId(7);
    pub const BYTE: TypeId = TypeId(8);
    pub const SHORT: TypeId = TypeId(9);
    pub const USHORT: TypeId = TypeId(10);
    pub const INT: TypeId = TypeId(11);
    pub const UINT: TypeId = TypeId(12);
    pub const LONG: TypeId = TypeId(13);
    pub const ULONG: TypeId = TypeId(14);
    pub const FLOAT: TypeId = TypeId(15);
    pub const DOUBLE: TypeId = TypeId(16);
    pub const DECIMAL: TypeId = TypeId(17);
    /// The non-generic `Task`
    pub const TASK: TypeId = TypeId(18);

    /// First ID available for types interned after start-up
    pub const FIRST_USER: u32 = 19;

    pub fn is_error(self) -> bool {
        self == TypeId::ERROR
    }
}

/// An interned string symbol.
pub type Symbol = Arc<str>;

/// Built-in value types with a keyword spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum PrimitiveType {
    Bool,
    Char,
    SByte,
    Byte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    Decimal,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 13] = [
        PrimitiveType::Bool,
        PrimitiveType::Char,
        PrimitiveType::SByte,
        PrimitiveType::Byte,
        PrimitiveType::Short,
        PrimitiveType::UShort,
        PrimitiveType::Int,
        PrimitiveType::UInt,
        PrimitiveType::Long,
        PrimitiveType::ULong,
        PrimitiveType::Float,
        PrimitiveType::Double,
        PrimitiveType::Decimal,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            PrimitiveType::Bool => "bool",
            PrimitiveType::Char => "char",
            PrimitiveType::SByte => "sbyte",
            PrimitiveType::Byte => "byte",
            PrimitiveType::Short => "short",
            PrimitiveType::UShort => "ushort",
            PrimitiveType::Int => "int",
            PrimitiveType::UInt => "uint",
            PrimitiveType::Long => "long",
            PrimitiveType::ULong => "ulong",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::Decimal => "decimal",
        }
    }

    /// The predefined type id of this primitive.
    pub fn type_id(self) -> TypeId {
        match self {
            PrimitiveType::Bool => TypeId::BOOL,
            PrimitiveType::Char => TypeId::CHAR,
            PrimitiveType::SByte => TypeId::SBYTE,
            PrimitiveType::Byte => TypeId::BYTE,
            PrimitiveType::Short => TypeId::SHORT,
            PrimitiveType::UShort => TypeId::USHORT,
            PrimitiveType::Int => TypeId::INT,
            PrimitiveType::UInt => TypeId::UINT,
            PrimitiveType::Long => TypeId::LONG,
            PrimitiveType::ULong => TypeId::ULONG,
            PrimitiveType::Float => TypeId::FLOAT,
            PrimitiveType::Double => TypeId::DOUBLE,
            PrimitiveType::Decimal => TypeId::DECIMAL,
        }
    }

    /// Numeric types, including `char`.
    pub fn is_numeric(self) -> bool {
        !matches!(self, PrimitiveType::Bool)
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            PrimitiveType::Char
                | PrimitiveType::SByte
                | PrimitiveType::Byte
                | PrimitiveType::Short
                | PrimitiveType::UShort
                | PrimitiveType::Int
                | PrimitiveType::UInt
                | PrimitiveType::Long
                | PrimitiveType::ULong
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            PrimitiveType::Char
                | PrimitiveType::Byte
                | PrimitiveType::UShort
                | PrimitiveType::UInt
                | PrimitiveType::ULong
        )
    }

    pub fn is_floating(self) -> bool {
        matches!(self, PrimitiveType::Float | PrimitiveType::Double)
    }

    /// Size in bytes, as reported by `sizeof`.
    pub fn size_in_bytes(self) -> i64 {
        match self {
            PrimitiveType::Bool | PrimitiveType::SByte | PrimitiveType::Byte => 1,
            PrimitiveType::Char | PrimitiveType::Short | PrimitiveType::UShort => 2,
            PrimitiveType::Int | PrimitiveType::UInt | PrimitiveType::Float => 4,
            PrimitiveType::Long | PrimitiveType::ULong | PrimitiveType::Double => 8,
            PrimitiveType::Decimal => 16,
        }
    }
}

/// Built-in generic type constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum GenericKind {
    IEnumerable,
    IEnumerator,
    Task,
    /// `Func<A.., R>`: the last argument is the return type
    Func,
    Action,
}

impl GenericKind {
    pub fn name(self) -> &'static str {
        match self {
            GenericKind::IEnumerable => "IEnumerable",
            GenericKind::IEnumerator => "IEnumerator",
            GenericKind::Task => "Task",
            GenericKind::Func => "Func",
            GenericKind::Action => "Action",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "IEnumerable" => GenericKind::IEnumerable,
            "IEnumerator" => GenericKind::IEnumerator,
            "Task" => GenericKind::Task,
            "Func" => GenericKind::Func,
            "Action" => GenericKind::Action,
            _ => return None,
        })
    }

    pub fn is_delegate(self) -> bool {
        matches!(self, GenericKind::Func | GenericKind::Action)
    }
}

/// The structural representation of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    Void,
    Object,
    String,
    Null,
    Error,
    Primitive(PrimitiveType),
    /// A class, record or enum (built-in or declared)
    Class(ClassId),
    /// `T?` over a value type
    Nullable(TypeId),
    /// An instantiation of a built-in generic type
    Generic { kind: GenericKind, args: Vec<TypeId> },
    /// The i-th type parameter of a built-in generic member
    TypeParam(u8),
}

impl Ty {
    pub fn is_primitive(&self) -> bool {
        matches!(self, Ty::Primitive(_))
    }

    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match self {
            Ty::Primitive(p) => Some(*p),
            _ => None,
        }
    }
}
