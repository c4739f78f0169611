use sable_lexer::{IntLiteral, RealLiteral, Span};
use std::sync::Arc;

/// An interned string symbol.
pub type Symbol = Arc<str>;

// ---
// Compilation unit
// ---

/// A complete source file.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub usings: Vec<UsingDirective>,
    pub members: Vec<NamespaceMember>,
    pub span: Span,
}

/// `using System;` (accepted and otherwise ignored)
#[derive(Debug, Clone)]
pub struct UsingDirective {
    pub name: QualifiedName,
    pub span: Span,
}

/// A member of a namespace or of the compilation unit.
#[derive(Debug, Clone)]
pub enum NamespaceMember {
    Namespace(NamespaceDecl),
    Type(TypeDecl),
}

impl NamespaceMember {
    pub fn span(&self) -> Span {
        match self {
            NamespaceMember::Namespace(n) => n.span,
            NamespaceMember::Type(t) => t.span,
        }
    }
}

/// `namespace A.B { ... }`
#[derive(Debug, Clone)]
pub struct NamespaceDecl {
    pub name: QualifiedName,
    pub members: Vec<NamespaceMember>,
    pub span: Span,
}

/// An identifier with its source location.
#[derive(Debug, Clone)]
pub struct Identifier {
    pub name: Symbol,
    pub span: Span,
}

impl Identifier {
    pub fn new(name: impl Into<Symbol>, span: Span) -> Self {
        Self { name: name.into(), span }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

/// A dotted name: `System.Console`
#[derive(Debug, Clone)]
pub struct QualifiedName {
    pub parts: Vec<Identifier>,
    pub span: Span,
}

impl QualifiedName {
    pub fn to_dotted(&self) -> String {
        self.parts
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

// ---
// Modifiers
// ---

/// Declaration modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub is_public: bool,
    pub is_private: bool,
    pub is_protected: bool,
    pub is_internal: bool,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_readonly: bool,
    pub is_const: bool,
    pub is_async: bool,
}

// ---
// Type declarations
// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDeclKind {
    Class,
    Record,
    Enum,
}

/// A class, record or enum declaration.
#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub modifiers: Modifiers,
    pub kind: TypeDeclKind,
    pub name: Identifier,
    /// Primary constructor parameters: `record class Point(int x : X, int y : Y)`
    /// or `class Const(int x)`. Only record parameters declare properties.
    pub record_params: Vec<RecordParam>,
    pub base_types: Vec<TypeSyntax>,
    pub members: Vec<MemberDecl>,
    pub enum_members: Vec<EnumMemberDecl>,
    pub span: Span,
}

/// A record primary parameter. The optional `: Name` suffix names the
/// property the parameter initializes.
#[derive(Debug, Clone)]
pub struct RecordParam {
    pub ty: TypeSyntax,
    pub name: Identifier,
    pub property: Option<Identifier>,
    pub span: Span,
}

impl RecordParam {
    /// The name of the property this parameter declares.
    pub fn property_name(&self) -> &Identifier {
        self.property.as_ref().unwrap_or(&self.name)
    }
}

/// `Name [= value]` inside an enum.
#[derive(Debug, Clone)]
pub struct EnumMemberDecl {
    pub name: Identifier,
    pub value: Option<Expr>,
    pub span: Span,
}

/// A member of a class or record.
#[derive(Debug, Clone)]
pub enum MemberDecl {
    Field(FieldDecl),
    Property(PropertyDecl),
    Method(MethodDecl),
    Constructor(ConstructorDecl),
    Type(TypeDecl),
}

impl MemberDecl {
    pub fn span(&self) -> Span {
        match self {
            MemberDecl::Field(f) => f.span,
            MemberDecl::Property(p) => p.span,
            MemberDecl::Method(m) => m.span,
            MemberDecl::Constructor(c) => c.span,
            MemberDecl::Type(t) => t.span,
        }
    }
}

/// `static readonly int a = 1, b;`
#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub modifiers: Modifiers,
    pub ty: TypeSyntax,
    pub declarators: Vec<VariableDeclarator>,
    pub span: Span,
}

/// One `name [= init]` in a field or local declaration.
#[derive(Debug, Clone)]
pub struct VariableDeclarator {
    pub name: Identifier,
    pub init: Option<Expr>,
    pub span: Span,
}

/// An auto property or an expression-bodied get-only property.
#[derive(Debug, Clone)]
pub struct PropertyDecl {
    pub modifiers: Modifiers,
    pub ty: TypeSyntax,
    pub name: Identifier,
    pub has_getter: bool,
    pub has_setter: bool,
    pub init: Option<Expr>,
    pub expr_body: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodDeclKind {
    Ordinary,
    /// `operator is`
    IsOperator,
}

/// A method or `operator is` declaration.
#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub modifiers: Modifiers,
    pub kind: MethodDeclKind,
    pub return_type: TypeSyntax,
    pub name: Identifier,
    pub params: Vec<ParamDecl>,
    pub body: Option<MethodBodySyntax>,
    pub span: Span,
}

/// Body of a method, lambda or accessor.
#[derive(Debug, Clone)]
pub enum MethodBodySyntax {
    Block(Block),
    Expression(Expr),
}

impl MethodBodySyntax {
    pub fn span(&self) -> Span {
        match self {
            MethodBodySyntax::Block(b) => b.span,
            MethodBodySyntax::Expression(e) => e.span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamRefKind {
    #[default]
    None,
    Out,
    Ref,
}

/// A formal parameter.
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub ref_kind: ParamRefKind,
    pub ty: TypeSyntax,
    pub name: Identifier,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructorInitializerKind {
    Base,
    This,
}

/// `: base(args)` or `: this(args)`
#[derive(Debug, Clone)]
pub struct ConstructorInitializer {
    pub kind: ConstructorInitializerKind,
    pub args: Vec<Argument>,
    pub span: Span,
}

/// An instance or static constructor.
#[derive(Debug, Clone)]
pub struct ConstructorDecl {
    pub modifiers: Modifiers,
    pub name: Identifier,
    pub params: Vec<ParamDecl>,
    pub initializer: Option<ConstructorInitializer>,
    pub body: Block,
    pub span: Span,
}

// ---
// Types
// ---

/// Keyword types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredefinedType {
    Bool,
    Byte,
    SByte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Char,
    Float,
    Double,
    Decimal,
    String,
    Object,
    Void,
}

impl PredefinedType {
    pub fn keyword(self) -> &'static str {
        match self {
            PredefinedType::Bool => "bool",
            PredefinedType::Byte => "byte",
            PredefinedType::SByte => "sbyte",
            PredefinedType::Short => "short",
            PredefinedType::UShort => "ushort",
            PredefinedType::Int => "int",
            PredefinedType::UInt => "uint",
            PredefinedType::Long => "long",
            PredefinedType::ULong => "ulong",
            PredefinedType::Char => "char",
            PredefinedType::Float => "float",
            PredefinedType::Double => "double",
            PredefinedType::Decimal => "decimal",
            PredefinedType::String => "string",
            PredefinedType::Object => "object",
            PredefinedType::Void => "void",
        }
    }
}

/// A type expression.
#[derive(Debug, Clone)]
pub struct TypeSyntax {
    pub kind: TypeSyntaxKind,
    pub span: Span,
}

/// The kind of a type expression.
#[derive(Debug, Clone)]
pub enum TypeSyntaxKind {
    Predefined(PredefinedType),
    /// `A.B<C, D>`
    Named(Vec<TypeSegment>),
    /// `T?`
    Nullable(Box<TypeSyntax>),
    /// `var` in a local declaration, `foreach` or pattern
    Var,
}

impl TypeSyntax {
    pub fn is_var(&self) -> bool {
        matches!(self.kind, TypeSyntaxKind::Var)
    }
}

/// One segment of a named type.
#[derive(Debug, Clone)]
pub struct TypeSegment {
    pub ident: Identifier,
    pub args: Vec<TypeSyntax>,
}

// ---
// Statements
// ---

/// A block of statements.
#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// A statement.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

/// The kind of a statement.
#[derive(Debug, Clone)]
pub enum StmtKind {
    Block(Block),
    /// `;`
    Empty,
    /// `Type a = 1, b;` / `var a = 1;` / `const int a = 1;`
    LocalDecl {
        is_const: bool,
        ty: TypeSyntax,
        declarators: Vec<VariableDeclarator>,
    },
    Expr(Expr),
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        condition: Expr,
    },
    For {
        init: Vec<Stmt>,
        condition: Option<Expr>,
        iterators: Vec<Expr>,
        body: Box<Stmt>,
    },
    Foreach {
        ty: TypeSyntax,
        name: Identifier,
        collection: Expr,
        body: Box<Stmt>,
    },
    Switch {
        expr: Expr,
        sections: Vec<SwitchSection>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Option<Expr>),
    Try {
        block: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
    },
    YieldReturn(Expr),
    YieldBreak,
}

/// `case ...: case ...: stmts`
#[derive(Debug, Clone)]
pub struct SwitchSection {
    pub labels: Vec<SwitchLabel>,
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// A label of a switch section.
#[derive(Debug, Clone)]
pub struct SwitchLabel {
    pub kind: SwitchLabelKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum SwitchLabelKind {
    /// `case pattern [when guard]:`
    Case { pattern: Pattern, guard: Option<Expr> },
    /// `default:`
    Default,
}

/// `catch [(Type [name])] { ... }`
#[derive(Debug, Clone)]
pub struct CatchClause {
    pub ty: Option<TypeSyntax>,
    pub name: Option<Identifier>,
    pub block: Block,
    pub span: Span,
}

// ---
// Expressions
// ---

/// An expression.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

/// The kind of an expression.
#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    /// A simple name: `x`, `Console`
    Name(Identifier),
    /// A keyword type used as an expression receiver: `string.Concat`
    PredefinedType(PredefinedType),
    This,
    Base,
    /// `a.b`
    Member { receiver: Box<Expr>, name: Identifier },
    /// `a?.b`
    ConditionalMember { receiver: Box<Expr>, name: Identifier },
    /// `f(args)`
    Invocation { callee: Box<Expr>, args: Vec<Argument> },
    /// `new T(args)`
    ObjectCreation { ty: TypeSyntax, args: Vec<Argument> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Assign { target: Box<Expr>, value: Box<Expr> },
    CompoundAssign { op: BinaryOp, target: Box<Expr>, value: Box<Expr> },
    Conditional { condition: Box<Expr>, when_true: Box<Expr>, when_false: Box<Expr> },
    Cast { ty: TypeSyntax, expr: Box<Expr> },
    /// `e is pattern` (a bare type is parsed as a constant pattern and
    /// resolved by the binder)
    Is { expr: Box<Expr>, pattern: Box<Pattern> },
    /// `e as T`
    As { expr: Box<Expr>, ty: TypeSyntax },
    Lambda(Box<LambdaExpr>),
    Await(Box<Expr>),
    Sizeof(TypeSyntax),
    Nameof(Box<Expr>),
}

/// `(a, b) => body`
#[derive(Debug, Clone)]
pub struct LambdaExpr {
    pub is_async: bool,
    pub params: Vec<LambdaParam>,
    pub body: MethodBodySyntax,
    pub span: Span,
}

/// A lambda parameter, explicitly typed or not.
#[derive(Debug, Clone)]
pub struct LambdaParam {
    pub ty: Option<TypeSyntax>,
    pub name: Identifier,
    pub span: Span,
}

/// An invocation argument (positional or named, optionally `out`/`ref`).
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: Option<Identifier>,
    pub ref_kind: ParamRefKind,
    pub value: Expr,
    pub span: Span,
}

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(IntLiteral),
    Real(RealLiteral),
    String(String),
    Char(char),
    Bool(bool),
    Null,
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `+`
    Plus,
    /// `-`
    Neg,
    /// `!`
    Not,
    /// `~`
    BitNot,
    /// `++x`
    PreIncrement,
    /// `--x`
    PreDecrement,
    /// `x++`
    PostIncrement,
    /// `x--`
    PostDecrement,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::PreIncrement | UnaryOp::PostIncrement => "++",
            UnaryOp::PreDecrement | UnaryOp::PostDecrement => "--",
        }
    }

    pub fn is_increment_or_decrement(&self) -> bool {
        matches!(
            self,
            UnaryOp::PreIncrement
                | UnaryOp::PreDecrement
                | UnaryOp::PostIncrement
                | UnaryOp::PostDecrement
        )
    }
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical
    And,
    Or,
    /// `??`
    Coalesce,
    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }

    /// Returns true if this is a comparison operator.
    pub fn is_comparison(&self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
    }

    /// Returns true if this is a short-circuiting logical operator.
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

// ---
// Patterns
// ---

/// A pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Span,
}

/// The kind of a pattern.
#[derive(Debug, Clone)]
pub enum PatternKind {
    /// `*`
    Wildcard,
    /// A constant expression: `2`, `null`, `Days.Mon`
    Constant(Box<Expr>),
    /// `Type name` or `var name`
    Declaration { ty: TypeSyntax, name: Identifier },
    /// `Type(sub, name: sub)`
    Recursive { ty: TypeSyntax, subpatterns: Vec<SubPattern> },
    /// `Type { Prop is pat }`
    Property { ty: TypeSyntax, subpatterns: Vec<SubPattern> },
}

/// A (possibly named) sub-pattern of a recursive or property pattern.
#[derive(Debug, Clone)]
pub struct SubPattern {
    pub name: Option<Identifier>,
    pub pattern: Pattern,
    pub span: Span,
}
