//! The bound tree: the typed representation produced by binding and
//! consumed by lowering and code generation.

use sable_lexer::Span;
use sable_symbols::{
    ConstantValue, ConversionKind, FieldId, GenericKind, MethodId, PropertyId, RefKind, Symbol,
    TypeId,
};

/// Index of a local in its method's [`LocalTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

impl LocalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A jump target inside one method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalKind {
    User,
    Const,
    /// Declared by a declaration pattern
    Pattern,
    Catch,
    Foreach,
    LambdaParameter,
    /// Compiler generated; gets an unnamed slot
    Temp,
}

#[derive(Debug, Clone)]
pub struct LocalSymbol {
    pub name: Symbol,
    pub ty: TypeId,
    pub kind: LocalKind,
    pub constant: Option<ConstantValue>,
    pub span: Span,
}

impl LocalSymbol {
    pub fn is_temp(&self) -> bool {
        self.kind == LocalKind::Temp
    }
}

/// Locals and labels of one method body.
///
/// Lambda bodies and state machine methods carved out of a method keep a
/// copy of its table, so local ids stay valid across rewrites.
#[derive(Debug, Clone, Default)]
pub struct LocalTable {
    locals: Vec<LocalSymbol>,
    label_count: u32,
}

impl LocalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<Symbol>, ty: TypeId, kind: LocalKind, span: Span) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(LocalSymbol {
            name: name.into(),
            ty,
            kind,
            constant: None,
            span,
        });
        id
    }

    /// A fresh compiler-generated local.
    pub fn temp(&mut self, ty: TypeId) -> LocalId {
        let name = format!("<>t__{}", self.locals.len());
        self.declare(name, ty, LocalKind::Temp, Span::dummy())
    }

    pub fn get(&self, id: LocalId) -> &LocalSymbol {
        &self.locals[id.index()]
    }

    pub fn ty(&self, id: LocalId) -> TypeId {
        self.locals[id.index()].ty
    }

    pub fn set_type(&mut self, id: LocalId, ty: TypeId) {
        self.locals[id.index()].ty = ty;
    }

    pub fn set_constant(&mut self, id: LocalId, value: ConstantValue) {
        self.locals[id.index()].constant = Some(value);
    }

    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.label_count);
        self.label_count += 1;
        id
    }

    pub fn len(&self) -> usize {
        self.locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LocalId, &LocalSymbol)> {
        self.locals
            .iter()
            .enumerate()
            .map(|(i, l)| (LocalId(i as u32), l))
    }
}

// ---
// Expressions
// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Negate,
    LogicalNot,
    BitwiseNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    LogicalAnd,
    LogicalOr,
    StringConcat,
}

impl BinaryOperator {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Ne
                | BinaryOperator::Lt
                | BinaryOperator::Le
                | BinaryOperator::Gt
                | BinaryOperator::Ge
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOperator::Add | BinaryOperator::StringConcat => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Rem => "%",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::And => "&",
            BinaryOperator::Or => "|",
            BinaryOperator::Xor => "^",
            BinaryOperator::Shl => "<<",
            BinaryOperator::Shr => ">>",
            BinaryOperator::LogicalAnd => "&&",
            BinaryOperator::LogicalOr => "||",
        }
    }
}

/// A lambda bound against its delegate type.
#[derive(Debug, Clone)]
pub struct BoundLambda {
    pub params: Vec<LocalId>,
    pub body: BoundBlock,
    /// Return type of the delegate (`Task<T>` for async lambdas)
    pub return_type: TypeId,
    pub delegate_type: TypeId,
    pub is_async: bool,
}

#[derive(Debug, Clone)]
pub struct BoundExpr {
    pub kind: BoundExprKind,
    pub ty: TypeId,
    /// Folded compile-time value
    pub constant: Option<ConstantValue>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum BoundExprKind {
    Literal(ConstantValue),
    Local(LocalId),
    /// Index into the method's declared parameters (excluding `this`)
    Parameter(u16),
    This,
    /// `base` as the receiver of a non-virtual call
    BaseReference,
    /// The zero value of the expression's type
    DefaultValue,
    Field {
        receiver: Option<Box<BoundExpr>>,
        field: FieldId,
    },
    Property {
        receiver: Option<Box<BoundExpr>>,
        property: PropertyId,
    },
    Call {
        receiver: Option<Box<BoundExpr>>,
        method: MethodId,
        args: Vec<BoundExpr>,
        ref_kinds: Vec<RefKind>,
        is_virtual: bool,
    },
    ObjectCreation {
        constructor: MethodId,
        args: Vec<BoundExpr>,
        ref_kinds: Vec<RefKind>,
    },
    DelegateCreation {
        method: MethodId,
        receiver: Option<Box<BoundExpr>>,
    },
    DelegateInvoke {
        delegate: Box<BoundExpr>,
        args: Vec<BoundExpr>,
    },
    Lambda(Box<BoundLambda>),
    Unary {
        op: UnaryOperator,
        operand: Box<BoundExpr>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
    },
    IncrementDecrement {
        target: Box<BoundExpr>,
        is_increment: bool,
        is_prefix: bool,
    },
    /// `target op= value`; `value` is already converted to `operand_type`
    CompoundAssignment {
        op: BinaryOperator,
        target: Box<BoundExpr>,
        value: Box<BoundExpr>,
        operand_type: TypeId,
    },
    Assignment {
        target: Box<BoundExpr>,
        value: Box<BoundExpr>,
    },
    Conditional {
        condition: Box<BoundExpr>,
        when_true: Box<BoundExpr>,
        when_false: Box<BoundExpr>,
    },
    NullCoalescing {
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
    },
    Conversion {
        operand: Box<BoundExpr>,
        kind: ConversionKind,
    },
    /// `receiver?.access`; `access` reads the receiver through
    /// [`BoundExprKind::ConditionalReceiver`]
    ConditionalAccess {
        receiver: Box<BoundExpr>,
        access: Box<BoundExpr>,
    },
    ConditionalReceiver,
    IsType {
        operand: Box<BoundExpr>,
        target: TypeId,
    },
    AsType {
        operand: Box<BoundExpr>,
        target: TypeId,
    },
    IsPattern {
        operand: Box<BoundExpr>,
        pattern: Box<BoundPattern>,
    },
    Await(Box<BoundExpr>),
    Sequence {
        locals: Vec<LocalId>,
        side_effects: Vec<BoundExpr>,
        value: Box<BoundExpr>,
    },
    NullableHasValue(Box<BoundExpr>),
    NullableValueOrDefault(Box<BoundExpr>),
    /// An expression that failed to bind; children are kept for analysis
    Bad(Vec<BoundExpr>),
}

impl BoundExpr {
    pub fn new(kind: BoundExprKind, ty: TypeId, span: Span) -> Self {
        Self {
            kind,
            ty,
            constant: None,
            span,
        }
    }

    pub fn literal(value: ConstantValue, ty: TypeId, span: Span) -> Self {
        Self {
            constant: Some(value.clone()),
            kind: BoundExprKind::Literal(value),
            ty,
            span,
        }
    }

    pub fn bool_literal(value: bool, span: Span) -> Self {
        Self::literal(ConstantValue::Bool(value), TypeId::BOOL, span)
    }

    pub fn int_literal(value: i32, span: Span) -> Self {
        Self::literal(ConstantValue::Int(value as i64), TypeId::INT, span)
    }

    pub fn null_literal(ty: TypeId, span: Span) -> Self {
        Self::literal(ConstantValue::Null, ty, span)
    }

    pub fn local(id: LocalId, ty: TypeId, span: Span) -> Self {
        Self::new(BoundExprKind::Local(id), ty, span)
    }

    pub fn bad(ty: TypeId, span: Span, children: Vec<BoundExpr>) -> Self {
        Self::new(BoundExprKind::Bad(children), ty, span)
    }

    pub fn with_constant(mut self, constant: Option<ConstantValue>) -> Self {
        self.constant = constant;
        self
    }

    pub fn has_errors(&self) -> bool {
        self.ty.is_error() || matches!(self.kind, BoundExprKind::Bad(_))
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self.constant, Some(ConstantValue::Null))
    }

    /// Expressions that denote a storage location.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            BoundExprKind::Local(_)
                | BoundExprKind::Parameter(_)
                | BoundExprKind::Field { .. }
                | BoundExprKind::Property { .. }
        )
    }

    /// Reads of locals, parameters, `this` and constants: expressions that
    /// can be evaluated more than once without observable effects.
    pub fn is_trivial(&self) -> bool {
        self.constant.is_some()
            || matches!(
                self.kind,
                BoundExprKind::Local(_)
                    | BoundExprKind::Parameter(_)
                    | BoundExprKind::This
                    | BoundExprKind::BaseReference
                    | BoundExprKind::Literal(_)
                    | BoundExprKind::DefaultValue
            )
    }
}

// ---
// Patterns
// ---

#[derive(Debug, Clone)]
pub struct BoundPattern {
    pub kind: BoundPatternKind,
    pub span: Span,
    /// Set when binding reported an error; never cleared
    pub has_errors: bool,
}

#[derive(Debug, Clone)]
pub enum BoundPatternKind {
    Wildcard,
    Constant {
        value: BoundExpr,
    },
    Declaration {
        local: LocalId,
    },
    Recursive {
        ty: TypeId,
        /// The selected `operator is`; `None` when none survived
        method: Option<MethodId>,
        subpatterns: Vec<BoundPattern>,
        /// Output parameter (0-based, after the operand) of each subpattern
        param_indices: Vec<usize>,
    },
    Property {
        ty: TypeId,
        subpatterns: Vec<BoundPattern>,
        properties: Vec<PropertyId>,
    },
}

impl BoundPattern {
    pub fn wildcard(span: Span) -> Self {
        Self {
            kind: BoundPatternKind::Wildcard,
            span,
            has_errors: false,
        }
    }

    /// The wildcard substituted for a pattern that failed to bind.
    pub fn error(span: Span) -> Self {
        Self {
            kind: BoundPatternKind::Wildcard,
            span,
            has_errors: true,
        }
    }
}

// ---
// Statements
// ---

#[derive(Debug, Clone, Default)]
pub struct BoundBlock {
    pub locals: Vec<LocalId>,
    pub stmts: Vec<BoundStmt>,
    pub span: Span,
}

impl BoundBlock {
    pub fn new(stmts: Vec<BoundStmt>, span: Span) -> Self {
        Self {
            locals: Vec::new(),
            stmts,
            span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoundStmt {
    pub kind: BoundStmtKind,
    pub span: Span,
}

/// One `catch` clause.
#[derive(Debug, Clone)]
pub struct BoundCatch {
    pub exception_type: TypeId,
    pub local: Option<LocalId>,
    pub block: BoundBlock,
    pub span: Span,
}

/// A `case pattern when guard:` or `default:` label.
#[derive(Debug, Clone)]
pub struct BoundMatchLabel {
    /// `None` for `default`
    pub pattern: Option<BoundPattern>,
    pub guard: Option<BoundExpr>,
    pub span: Span,
}

impl BoundMatchLabel {
    pub fn is_default(&self) -> bool {
        self.pattern.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct BoundMatchSection {
    pub labels: Vec<BoundMatchLabel>,
    pub locals: Vec<LocalId>,
    pub stmts: Vec<BoundStmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum BoundStmtKind {
    Block(BoundBlock),
    Expression(BoundExpr),
    LocalDeclaration {
        local: LocalId,
        init: Option<BoundExpr>,
    },
    If {
        condition: BoundExpr,
        then_branch: Box<BoundStmt>,
        else_branch: Option<Box<BoundStmt>>,
    },
    While {
        condition: BoundExpr,
        body: Box<BoundStmt>,
        break_label: LabelId,
        continue_label: LabelId,
    },
    DoWhile {
        body: Box<BoundStmt>,
        condition: BoundExpr,
        break_label: LabelId,
        continue_label: LabelId,
    },
    For {
        locals: Vec<LocalId>,
        init: Vec<BoundStmt>,
        condition: Option<BoundExpr>,
        increments: Vec<BoundExpr>,
        body: Box<BoundStmt>,
        break_label: LabelId,
        continue_label: LabelId,
    },
    Foreach {
        local: LocalId,
        element_type: TypeId,
        collection: BoundExpr,
        body: Box<BoundStmt>,
        break_label: LabelId,
        continue_label: LabelId,
    },
    Match {
        operand: BoundExpr,
        sections: Vec<BoundMatchSection>,
        break_label: LabelId,
    },
    Break(LabelId),
    Continue(LabelId),
    Return(Option<BoundExpr>),
    /// `throw e;`, or a rethrow when `None`
    Throw(Option<BoundExpr>),
    Try {
        block: BoundBlock,
        catches: Vec<BoundCatch>,
        finally: Option<BoundBlock>,
        /// The catch-all handler wrapping an async state machine body
        is_async_catch: bool,
    },
    YieldReturn(BoundExpr),
    YieldBreak,
    Label(LabelId),
    Goto(LabelId),
    ConditionalGoto {
        condition: BoundExpr,
        jump_if_true: bool,
        label: LabelId,
    },
    /// Jump to `targets[i]` when `value == i`, else fall through.
    SwitchDispatch {
        value: BoundExpr,
        targets: Vec<LabelId>,
    },
    /// Marks the instruction where an async method suspends
    AwaitYieldPoint,
    /// Marks the instruction where an async method resumes
    AwaitResumePoint,
    NoOp,
}

impl BoundStmt {
    pub fn new(kind: BoundStmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn block(block: BoundBlock) -> Self {
        let span = block.span;
        Self::new(BoundStmtKind::Block(block), span)
    }

    pub fn expression(expr: BoundExpr) -> Self {
        let span = expr.span;
        Self::new(BoundStmtKind::Expression(expr), span)
    }

    /// Statements with no effect and no span worth stepping to.
    pub fn synthesized(kind: BoundStmtKind) -> Self {
        Self::new(kind, Span::dummy())
    }
}

/// A method body after binding.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub method: MethodId,
    pub locals: LocalTable,
    /// Locals below this index belong to prepended field initializers
    pub first_own_local: usize,
    pub body: BoundBlock,
    /// Contains `yield return` or `yield break`
    pub is_iterator: bool,
    pub has_errors: bool,
}

/// Element type of an `IEnumerable<T>`/`IEnumerator<T>` return type.
pub fn iterator_element_type(table: &sable_symbols::SymbolTable, ty: TypeId) -> Option<TypeId> {
    table
        .types
        .generic_args(ty, GenericKind::IEnumerable)
        .or_else(|| table.types.generic_args(ty, GenericKind::IEnumerator))
        .and_then(|args| args.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_table() {
        let mut locals = LocalTable::new();
        let x = locals.declare("x", TypeId::INT, LocalKind::User, Span::dummy());
        let t = locals.temp(TypeId::OBJECT);
        assert_eq!(locals.len(), 2);
        assert_eq!(locals.get(x).name.as_ref(), "x");
        assert!(locals.get(t).is_temp());
        locals.set_type(x, TypeId::LONG);
        assert_eq!(locals.ty(x), TypeId::LONG);
        assert_ne!(locals.new_label(), locals.new_label());
    }

    #[test]
    fn test_trivial_expressions() {
        let local = BoundExpr::local(LocalId(0), TypeId::INT, Span::dummy());
        assert!(local.is_trivial());
        assert!(local.is_lvalue());
        let call = BoundExpr::new(
            BoundExprKind::Call {
                receiver: None,
                method: MethodId(0),
                args: vec![],
                ref_kinds: vec![],
                is_virtual: false,
            },
            TypeId::INT,
            Span::dummy(),
        );
        assert!(!call.is_trivial());
        assert!(BoundExpr::null_literal(TypeId::NULL, Span::dummy()).is_null_literal());
    }
}
