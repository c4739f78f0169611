use sable_lexer::Span;

use crate::types::{PrimitiveType, Symbol, TypeId};

macro_rules! index_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

index_id!(
    /// Index of a class, record, enum or synthesized type.
    ClassId
);
index_id!(
    /// Index of a method in the symbol table.
    MethodId
);
index_id!(FieldId);
index_id!(PropertyId);

impl ClassId {
    pub const OBJECT: ClassId = ClassId(0);
    pub const STRING: ClassId = ClassId(1);
    pub const CONSOLE: ClassId = ClassId(2);
    pub const MATH: ClassId = ClassId(3);
    pub const EXCEPTION: ClassId = ClassId(4);
    pub const EQUALITY_COMPARER: ClassId = ClassId(5);
    pub const TASK: ClassId = ClassId(6);
    pub const IENUMERABLE: ClassId = ClassId(7);
    pub const IENUMERATOR: ClassId = ClassId(8);
    /// Number of built-in classes declared into every table
    pub const BUILTIN_COUNT: u32 = 9;
}

/// A compile-time constant value.
///
/// Signed integrals are widened to `i64` and unsigned ones to `u64`; the
/// precise type travels with the expression that carries the constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Null,
    Bool(bool),
    Char(char),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Decimal(f64),
    String(Symbol),
}

impl ConstantValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ConstantValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConstantValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The value as a signed 64-bit integer, for integral constants.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ConstantValue::Int(v) => Some(v),
            ConstantValue::UInt(v) => Some(v as i64),
            ConstantValue::Char(c) => Some(c as i64),
            _ => None,
        }
    }

    /// The value as a double, for any numeric constant.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ConstantValue::Int(v) => Some(v as f64),
            ConstantValue::UInt(v) => Some(v as f64),
            ConstantValue::Char(c) => Some(c as u32 as f64),
            ConstantValue::Float(v) => Some(v as f64),
            ConstantValue::Double(v) | ConstantValue::Decimal(v) => Some(v),
            _ => None,
        }
    }

    /// Text used when a constant is concatenated into a string.
    pub fn display_text(&self) -> String {
        match self {
            ConstantValue::Null => String::new(),
            ConstantValue::Bool(true) => "True".to_string(),
            ConstantValue::Bool(false) => "False".to_string(),
            ConstantValue::Char(c) => c.to_string(),
            ConstantValue::Int(v) => v.to_string(),
            ConstantValue::UInt(v) => v.to_string(),
            ConstantValue::Float(v) => format_float(*v as f64, 7),
            ConstantValue::Double(v) | ConstantValue::Decimal(v) => format_float(*v, 15),
            ConstantValue::String(s) => s.to_string(),
        }
    }
}

/// Format a floating point number with `digits` significant digits,
/// trimming trailing zeros.
pub fn format_float(value: f64, digits: usize) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "∞" } else { "-∞" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let exponent = value.abs().log10().floor() as i32;
    if exponent < -5 || exponent >= digits as i32 {
        let formatted = format!("{:.*e}", digits.saturating_sub(1), value);
        let (mantissa, exp) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let mantissa = trim_fraction(mantissa);
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}E{}{:02}", mantissa, sign, exp.abs());
    }
    let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
    trim_fraction(&format!("{:.*}", decimals, value)).to_string()
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// Deterministic string hash used for record hash seeds and runtime
/// `GetHashCode` of strings. Stable across runs and platforms.
pub fn stable_string_hash(text: &str) -> i32 {
    let mut h1: i32 = 5381;
    let mut h2: i32 = 5381;
    for (i, unit) in text.encode_utf16().enumerate() {
        if i % 2 == 0 {
            h1 = h1.wrapping_shl(5).wrapping_add(h1) ^ unit as i32;
        } else {
            h2 = h2.wrapping_shl(5).wrapping_add(h2) ^ unit as i32;
        }
    }
    h1.wrapping_add(h2.wrapping_mul(1_566_083_941))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub enum RefKind {
    #[default]
    None,
    Out,
    Ref,
}

impl RefKind {
    pub fn is_by_ref(self) -> bool {
        !matches!(self, RefKind::None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSymbol {
    pub name: Symbol,
    pub ty: TypeId,
    pub ref_kind: RefKind,
}

impl ParameterSymbol {
    pub fn new(name: impl Into<Symbol>, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            ty,
            ref_kind: RefKind::None,
        }
    }

    pub fn out(name: impl Into<Symbol>, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            ty,
            ref_kind: RefKind::Out,
        }
    }
}

/// Operations the interpreter implements natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Intrinsic {
    ObjectCtor,
    ObjectToString,
    ObjectEquals,
    ObjectGetHashCode,
    StringLength,
    StringConcat,
    ConsoleWriteLine,
    ConsoleWrite,
    MathSqrt,
    MathAtan2,
    MathAbs,
    MathMax,
    MathMin,
    MathPow,
    ExceptionCtor,
    ExceptionMessage,
    ComparerEquals,
    ComparerGetHashCode,
    TaskFromResult,
    TaskYield,
    TaskCompleted,
    TaskResult,
    TaskIsCompleted,
    /// Creates a pending task used as an async method builder
    TaskCreate,
    TaskSetResult,
    TaskSetException,
    /// Registers a state machine to resume when the awaited task completes
    TaskOnCompleted,
    TaskGetResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum MethodKind {
    Ordinary,
    Constructor,
    StaticConstructor,
    /// A user-defined or synthesized `operator is`
    IsOperator,
    PropertyGet(PropertyId),
    PropertySet(PropertyId),
    /// A lambda body hoisted into a method
    Lambda,
}

/// Numeric kinds that get a boxed-equality helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum NumericHelperKind {
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    Float,
    Decimal,
}

impl NumericHelperKind {
    /// The helper kind used for a constant of the given primitive type.
    pub fn for_constant(primitive: PrimitiveType) -> Option<Self> {
        Some(match primitive {
            PrimitiveType::Int => NumericHelperKind::Int32,
            PrimitiveType::UInt => NumericHelperKind::UInt32,
            PrimitiveType::Long => NumericHelperKind::Int64,
            PrimitiveType::ULong => NumericHelperKind::UInt64,
            PrimitiveType::Double => NumericHelperKind::Double,
            PrimitiveType::Float => NumericHelperKind::Float,
            PrimitiveType::Decimal => NumericHelperKind::Decimal,
            _ => return None,
        })
    }

    pub fn helper_name(self) -> &'static str {
        match self {
            NumericHelperKind::Int32 => "<>Int32Helper",
            NumericHelperKind::UInt32 => "<>UInt32Helper",
            NumericHelperKind::Int64 => "<>Int64Helper",
            NumericHelperKind::UInt64 => "<>UInt64Helper",
            NumericHelperKind::Double => "<>DoubleHelper",
            NumericHelperKind::Float => "<>FloatHelper",
            NumericHelperKind::Decimal => "<>DecimalHelper",
        }
    }

    /// Type of the helper's value parameter.
    pub fn value_type(self) -> PrimitiveType {
        match self {
            NumericHelperKind::Int32 => PrimitiveType::Int,
            NumericHelperKind::UInt32 => PrimitiveType::UInt,
            NumericHelperKind::Int64 => PrimitiveType::Long,
            NumericHelperKind::UInt64 => PrimitiveType::ULong,
            NumericHelperKind::Double => PrimitiveType::Double,
            NumericHelperKind::Float => PrimitiveType::Float,
            NumericHelperKind::Decimal => PrimitiveType::Decimal,
        }
    }

    /// Boxed types the helper tests for, in ascending width.
    pub fn widening_types(self) -> &'static [PrimitiveType] {
        use PrimitiveType::*;
        match self {
            NumericHelperKind::Int32 => &[Byte, SByte, Short, UShort, Int, UInt, Long, ULong],
            NumericHelperKind::UInt32 => &[Byte, UShort, UInt, Long, ULong],
            NumericHelperKind::Int64 => &[Byte, SByte, Short, UShort, Int, UInt, Long],
            NumericHelperKind::UInt64 => &[Byte, UShort, UInt, ULong],
            NumericHelperKind::Double => &[Double, Float],
            NumericHelperKind::Float => &[Float, Double],
            NumericHelperKind::Decimal => &[Decimal],
        }
    }
}

/// Methods whose bodies the compiler generates rather than binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum SynthesizedKind {
    DefaultConstructor,
    PrimaryConstructor,
    StaticConstructor,
    AutoPropertyGet,
    AutoPropertySet,
    RecordEquals,
    RecordGetHashCode,
    RecordIsOperator,
    NumericHelper(NumericHelperKind),
    /// Lambda bodies, state machine members and kickoff stubs
    Rewritten,
}

#[derive(Debug, Clone)]
pub struct MethodSymbol {
    pub name: Symbol,
    pub containing: ClassId,
    pub kind: MethodKind,
    pub params: Vec<ParameterSymbol>,
    pub return_type: TypeId,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_abstract: bool,
    pub is_async: bool,
    /// Number of method type parameters, inferred from arguments at call sites
    pub generic_arity: u8,
    /// Set for built-in methods the interpreter implements natively
    pub intrinsic: Option<Intrinsic>,
    pub synthesized: Option<SynthesizedKind>,
    pub span: Span,
}

impl MethodSymbol {
    pub fn new(name: impl Into<Symbol>, containing: ClassId, kind: MethodKind, return_type: TypeId) -> Self {
        Self {
            name: name.into(),
            containing,
            kind,
            params: Vec::new(),
            return_type,
            is_static: false,
            is_virtual: false,
            is_override: false,
            is_abstract: false,
            is_async: false,
            generic_arity: 0,
            intrinsic: None,
            synthesized: None,
            span: Span::dummy(),
        }
    }

    pub fn with_params(mut self, params: Vec<ParameterSymbol>) -> Self {
        self.params = params;
        self
    }

    pub fn with_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn with_synthesized(mut self, kind: SynthesizedKind) -> Self {
        self.synthesized = Some(kind);
        self
    }

    pub fn is_constructor(&self) -> bool {
        matches!(self.kind, MethodKind::Constructor | MethodKind::StaticConstructor)
    }

    pub fn with_intrinsic(mut self, intrinsic: Intrinsic) -> Self {
        self.intrinsic = Some(intrinsic);
        self
    }

    /// Virtual, override and abstract methods dispatch on the receiver.
    pub fn is_dispatched(&self) -> bool {
        !self.is_static && (self.is_virtual || self.is_override || self.is_abstract)
    }

    pub fn returns_void(&self) -> bool {
        self.return_type == TypeId::VOID
    }

    /// Same name and parameter types.
    pub fn same_signature(&self, other: &MethodSymbol) -> bool {
        self.name == other.name
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| a.ty == b.ty && a.ref_kind == b.ref_kind)
    }

    /// Index of the parameter called `name`.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| &*p.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct FieldSymbol {
    pub name: Symbol,
    pub containing: ClassId,
    pub ty: TypeId,
    pub is_static: bool,
    pub is_const: bool,
    pub is_readonly: bool,
    pub constant: Option<ConstantValue>,
    pub span: Span,
}

impl FieldSymbol {
    pub fn new(name: impl Into<Symbol>, containing: ClassId, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            containing,
            ty,
            is_static: false,
            is_const: false,
            is_readonly: false,
            constant: None,
            span: Span::dummy(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertySymbol {
    pub name: Symbol,
    pub containing: ClassId,
    pub ty: TypeId,
    pub getter: Option<MethodId>,
    pub setter: Option<MethodId>,
    /// Backing field of an auto property
    pub backing_field: Option<FieldId>,
    pub is_static: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ClassKind {
    Class,
    Record,
    Enum,
    Interface,
    /// Iterator or async state machine
    StateMachine,
    /// Closure environment for captured variables
    DisplayClass,
}

/// A primary constructor parameter of a class or record.
#[derive(Debug, Clone)]
pub struct PrimaryParameter {
    pub name: Symbol,
    pub ty: TypeId,
    /// The property a record parameter declares
    pub property: Option<PropertyId>,
}

#[derive(Debug, Clone)]
pub struct ClassSymbol {
    pub name: Symbol,
    pub namespace: Option<Symbol>,
    pub containing: Option<ClassId>,
    pub kind: ClassKind,
    pub base: Option<ClassId>,
    pub interfaces: Vec<TypeId>,
    pub is_abstract: bool,
    pub is_static: bool,
    pub is_sealed: bool,
    pub is_builtin: bool,
    pub type_id: TypeId,
    pub methods: Vec<MethodId>,
    pub fields: Vec<FieldId>,
    pub properties: Vec<PropertyId>,
    pub nested: Vec<ClassId>,
    pub primary_params: Vec<PrimaryParameter>,
    pub span: Span,
}

impl ClassSymbol {
    pub fn new(name: impl Into<Symbol>, kind: ClassKind) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            containing: None,
            kind,
            base: Some(ClassId::OBJECT),
            interfaces: Vec::new(),
            is_abstract: false,
            is_static: false,
            is_sealed: false,
            is_builtin: false,
            // Patched by SymbolTable::add_class
            type_id: TypeId::ERROR,
            methods: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            nested: Vec::new(),
            primary_params: Vec::new(),
            span: Span::dummy(),
        }
    }

    pub fn is_enum(&self) -> bool {
        self.kind == ClassKind::Enum
    }

    pub fn is_record(&self) -> bool {
        self.kind == ClassKind::Record
    }

    pub fn is_interface(&self) -> bool {
        self.kind == ClassKind::Interface
    }
}
