//! Construction helpers for synthesized bound nodes.

use sable_binder::{
    BinaryOperator, BoundBlock, BoundExpr, BoundExprKind, BoundStmt, BoundStmtKind, LabelId,
    LocalId, UnaryOperator,
};
use sable_lexer::Span;
use sable_symbols::{
    ClassId, ConstantValue, ConversionKind, FieldId, MethodId, PrimitiveType, SymbolLookup,
    SymbolTable, Ty, TypeId,
};

/// Builds bound nodes that all carry the same span.
#[derive(Clone, Copy)]
pub struct SyntheticFactory<'a> {
    pub table: &'a SymbolTable,
    pub span: Span,
}

impl<'a> SyntheticFactory<'a> {
    pub fn new(table: &'a SymbolTable, span: Span) -> Self {
        Self { table, span }
    }

    pub fn at(&self, span: Span) -> Self {
        Self { table: self.table, span }
    }

    // ---
    // Leaves
    // ---

    pub fn bool(&self, value: bool) -> BoundExpr {
        BoundExpr::bool_literal(value, self.span)
    }

    pub fn int(&self, value: i32) -> BoundExpr {
        BoundExpr::int_literal(value, self.span)
    }

    pub fn null(&self, ty: TypeId) -> BoundExpr {
        BoundExpr::null_literal(ty, self.span)
    }

    pub fn literal(&self, value: ConstantValue, ty: TypeId) -> BoundExpr {
        BoundExpr::literal(value, ty, self.span)
    }

    /// The constant `1` of a numeric type.
    pub fn one(&self, primitive: PrimitiveType) -> BoundExpr {
        let value = match primitive {
            PrimitiveType::Float => ConstantValue::Float(1.0),
            PrimitiveType::Double => ConstantValue::Double(1.0),
            PrimitiveType::Decimal => ConstantValue::Decimal(1.0),
            PrimitiveType::ULong => ConstantValue::UInt(1),
            PrimitiveType::Char => ConstantValue::Char('\u{1}'),
            _ => ConstantValue::Int(1),
        };
        self.literal(value, primitive.type_id())
    }

    pub fn local(&self, id: LocalId, ty: TypeId) -> BoundExpr {
        BoundExpr::local(id, ty, self.span)
    }

    pub fn parameter(&self, index: u16, ty: TypeId) -> BoundExpr {
        BoundExpr::new(BoundExprKind::Parameter(index), ty, self.span)
    }

    pub fn this(&self, class: ClassId) -> BoundExpr {
        BoundExpr::new(BoundExprKind::This, self.table.class(class).type_id, self.span)
    }

    pub fn default_value(&self, ty: TypeId) -> BoundExpr {
        BoundExpr::new(BoundExprKind::DefaultValue, ty, self.span)
    }

    // ---
    // Members
    // ---

    pub fn field(&self, receiver: Option<BoundExpr>, field: FieldId) -> BoundExpr {
        let ty = self.table.field(field).ty;
        BoundExpr::new(
            BoundExprKind::Field {
                receiver: receiver.map(Box::new),
                field,
            },
            ty,
            self.span,
        )
    }

    /// Call `method`, typed by its declared return type.
    pub fn call(&self, receiver: Option<BoundExpr>, method: MethodId, args: Vec<BoundExpr>) -> BoundExpr {
        let ty = self.table.method(method).return_type;
        self.call_typed(receiver, method, args, ty)
    }

    /// Call `method` with an explicit result type, for members whose
    /// declared return type mentions a type parameter.
    pub fn call_typed(
        &self,
        receiver: Option<BoundExpr>,
        method: MethodId,
        args: Vec<BoundExpr>,
        ty: TypeId,
    ) -> BoundExpr {
        let symbol = self.table.method(method);
        let is_base = matches!(receiver.as_ref().map(|r| &r.kind), Some(BoundExprKind::BaseReference));
        let ref_kinds = symbol.params.iter().map(|p| p.ref_kind).collect();
        BoundExpr::new(
            BoundExprKind::Call {
                receiver: receiver.map(Box::new),
                method,
                args,
                ref_kinds,
                is_virtual: symbol.is_dispatched() && !is_base,
            },
            ty,
            self.span,
        )
    }

    pub fn new_object(&self, constructor: MethodId, args: Vec<BoundExpr>) -> BoundExpr {
        let symbol = self.table.method(constructor);
        let ty = self.table.class(symbol.containing).type_id;
        BoundExpr::new(
            BoundExprKind::ObjectCreation {
                constructor,
                ref_kinds: symbol.params.iter().map(|p| p.ref_kind).collect(),
                args,
            },
            ty,
            self.span,
        )
    }

    /// A method of the built-in library by name and parameter types.
    pub fn builtin_method(&self, class: ClassId, name: &str, params: &[TypeId]) -> MethodId {
        self.table
            .find_methods(class, name)
            .into_iter()
            .find(|&m| {
                let symbol = self.table.method(m);
                symbol.params.len() == params.len() && symbol.params.iter().zip(params).all(|(p, &t)| p.ty == t)
            })
            .unwrap_or_else(|| panic!("built-in member {}.{} is missing", self.table.class(class).name, name))
    }

    /// The getter of a built-in property.
    pub fn builtin_getter(&self, class: ClassId, name: &str) -> MethodId {
        self.table
            .find_property(class, name)
            .and_then(|p| self.table.property(p).getter)
            .unwrap_or_else(|| panic!("built-in property {}.{} is missing", self.table.class(class).name, name))
    }

    // ---
    // Operators
    // ---

    pub fn assign(&self, target: BoundExpr, value: BoundExpr) -> BoundExpr {
        let ty = target.ty;
        BoundExpr::new(
            BoundExprKind::Assignment {
                target: Box::new(target),
                value: Box::new(value),
            },
            ty,
            self.span,
        )
    }

    pub fn binary(&self, op: BinaryOperator, left: BoundExpr, right: BoundExpr, ty: TypeId) -> BoundExpr {
        BoundExpr::new(
            BoundExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
            self.span,
        )
    }

    pub fn eq(&self, left: BoundExpr, right: BoundExpr) -> BoundExpr {
        self.binary(BinaryOperator::Eq, left, right, TypeId::BOOL)
    }

    pub fn ne(&self, left: BoundExpr, right: BoundExpr) -> BoundExpr {
        self.binary(BinaryOperator::Ne, left, right, TypeId::BOOL)
    }

    pub fn lt(&self, left: BoundExpr, right: BoundExpr) -> BoundExpr {
        self.binary(BinaryOperator::Lt, left, right, TypeId::BOOL)
    }

    pub fn not(&self, operand: BoundExpr) -> BoundExpr {
        if let Some(value) = operand.constant.as_ref().and_then(ConstantValue::as_bool) {
            return self.bool(!value);
        }
        BoundExpr::new(
            BoundExprKind::Unary {
                op: UnaryOperator::LogicalNot,
                operand: Box::new(operand),
            },
            TypeId::BOOL,
            self.span,
        )
    }

    /// `left && right`, folding constant operands that have no effects.
    pub fn and(&self, left: BoundExpr, right: BoundExpr) -> BoundExpr {
        match left.constant.as_ref().and_then(ConstantValue::as_bool) {
            Some(true) => return right,
            Some(false) => return left,
            None => {}
        }
        if right.constant.as_ref().and_then(ConstantValue::as_bool) == Some(true) {
            return left;
        }
        self.binary(BinaryOperator::LogicalAnd, left, right, TypeId::BOOL)
    }

    pub fn or(&self, left: BoundExpr, right: BoundExpr) -> BoundExpr {
        match left.constant.as_ref().and_then(ConstantValue::as_bool) {
            Some(false) => return right,
            Some(true) => return left,
            None => {}
        }
        if right.constant.as_ref().and_then(ConstantValue::as_bool) == Some(false) {
            return left;
        }
        self.binary(BinaryOperator::LogicalOr, left, right, TypeId::BOOL)
    }

    /// `operand is target`. A trivial operand whose static type already is
    /// the non-nullable value type `target` always matches.
    pub fn is_type(&self, operand: BoundExpr, target: TypeId) -> BoundExpr {
        if operand.ty == target && self.table.is_value_type(target) && self.table.types.nullable_underlying(target).is_none() {
            if operand.is_trivial() {
                return self.bool(true);
            }
            return self.sequence(Vec::new(), vec![operand], self.bool(true));
        }
        BoundExpr::new(
            BoundExprKind::IsType {
                operand: Box::new(operand),
                target,
            },
            TypeId::BOOL,
            self.span,
        )
    }

    /// Convert `operand` to `to` using whatever conversion the oracle
    /// classifies, explicit ones included.
    pub fn convert(&self, operand: BoundExpr, to: TypeId) -> BoundExpr {
        if operand.ty == to {
            return operand;
        }
        let kind = if operand.is_null_literal() {
            ConversionKind::NullLiteral
        } else {
            self.table.classify_conversion(operand.ty, to)
        };
        if kind == ConversionKind::Identity {
            return BoundExpr { ty: to, ..operand };
        }
        BoundExpr::new(
            BoundExprKind::Conversion {
                operand: Box::new(operand),
                kind,
            },
            to,
            self.span,
        )
    }

    pub fn conditional(&self, condition: BoundExpr, when_true: BoundExpr, when_false: BoundExpr, ty: TypeId) -> BoundExpr {
        BoundExpr::new(
            BoundExprKind::Conditional {
                condition: Box::new(condition),
                when_true: Box::new(when_true),
                when_false: Box::new(when_false),
            },
            ty,
            self.span,
        )
    }

    pub fn sequence(&self, locals: Vec<LocalId>, side_effects: Vec<BoundExpr>, value: BoundExpr) -> BoundExpr {
        if locals.is_empty() && side_effects.is_empty() {
            return value;
        }
        let ty = value.ty;
        BoundExpr::new(
            BoundExprKind::Sequence {
                locals,
                side_effects,
                value: Box::new(value),
            },
            ty,
            self.span,
        )
    }

    pub fn has_value(&self, operand: BoundExpr) -> BoundExpr {
        BoundExpr::new(BoundExprKind::NullableHasValue(Box::new(operand)), TypeId::BOOL, self.span)
    }

    pub fn value_or_default(&self, operand: BoundExpr) -> BoundExpr {
        let ty = self.table.types.nullable_underlying(operand.ty).unwrap_or(operand.ty);
        BoundExpr::new(BoundExprKind::NullableValueOrDefault(Box::new(operand)), ty, self.span)
    }

    /// A test that `operand` is not null, for reference and nullable types.
    pub fn is_not_null(&self, operand: BoundExpr) -> BoundExpr {
        if self.table.types.nullable_underlying(operand.ty).is_some() {
            return self.has_value(operand);
        }
        let operand = self.convert(operand, TypeId::OBJECT);
        self.ne(operand, self.null(TypeId::OBJECT))
    }

    // ---
    // Statements
    // ---

    pub fn stmt(&self, expr: BoundExpr) -> BoundStmt {
        BoundStmt::new(BoundStmtKind::Expression(expr), self.span)
    }

    pub fn assign_stmt(&self, target: BoundExpr, value: BoundExpr) -> BoundStmt {
        self.stmt(self.assign(target, value))
    }

    pub fn block(&self, stmts: Vec<BoundStmt>) -> BoundStmt {
        BoundStmt::block(BoundBlock::new(stmts, self.span))
    }

    pub fn block_with_locals(&self, locals: Vec<LocalId>, stmts: Vec<BoundStmt>) -> BoundStmt {
        BoundStmt::block(BoundBlock {
            locals,
            stmts,
            span: self.span,
        })
    }

    pub fn if_then(&self, condition: BoundExpr, then_branch: BoundStmt, else_branch: Option<BoundStmt>) -> BoundStmt {
        BoundStmt::new(
            BoundStmtKind::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch: else_branch.map(Box::new),
            },
            self.span,
        )
    }

    pub fn ret(&self, value: Option<BoundExpr>) -> BoundStmt {
        BoundStmt::new(BoundStmtKind::Return(value), self.span)
    }

    pub fn throw(&self, value: BoundExpr) -> BoundStmt {
        BoundStmt::new(BoundStmtKind::Throw(Some(value)), self.span)
    }

    pub fn label(&self, label: LabelId) -> BoundStmt {
        BoundStmt::synthesized(BoundStmtKind::Label(label))
    }

    pub fn goto(&self, label: LabelId) -> BoundStmt {
        BoundStmt::new(BoundStmtKind::Goto(label), self.span)
    }

    pub fn conditional_goto(&self, condition: BoundExpr, jump_if_true: bool, label: LabelId) -> BoundStmt {
        BoundStmt::new(
            BoundStmtKind::ConditionalGoto {
                condition,
                jump_if_true,
                label,
            },
            self.span,
        )
    }

    pub fn no_op(&self) -> BoundStmt {
        BoundStmt::new(BoundStmtKind::NoOp, self.span)
    }

    /// Numeric type a value of `ty` is computed in: primitives as
    /// themselves, enums as their underlying `int`.
    pub fn arithmetic_type(&self, ty: TypeId) -> Option<PrimitiveType> {
        match self.table.ty(ty) {
            Ty::Primitive(p) => Some(p),
            Ty::Class(_) if self.table.is_enum_type(ty) => Some(PrimitiveType::Int),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_folding() {
        let table = SymbolTable::new();
        let f = SyntheticFactory::new(&table, Span::dummy());
        let x = f.local(LocalId(0), TypeId::BOOL);
        assert!(matches!(f.and(f.bool(true), x.clone()).kind, BoundExprKind::Local(_)));
        assert!(matches!(f.and(x.clone(), f.bool(true)).kind, BoundExprKind::Local(_)));
        assert_eq!(f.and(f.bool(false), x.clone()).constant, Some(ConstantValue::Bool(false)));
        assert!(matches!(f.or(f.bool(false), x.clone()).kind, BoundExprKind::Local(_)));
        assert!(matches!(
            f.and(x.clone(), x).kind,
            BoundExprKind::Binary { op: BinaryOperator::LogicalAnd, .. }
        ));
    }

    #[test]
    fn test_is_type_on_matching_value_type() {
        let table = SymbolTable::new();
        let f = SyntheticFactory::new(&table, Span::dummy());
        let local = f.local(LocalId(0), TypeId::INT);
        assert_eq!(f.is_type(local, TypeId::INT).constant, Some(ConstantValue::Bool(true)));

        let assignment = f.assign(f.local(LocalId(1), TypeId::INT), f.int(3));
        let test = f.is_type(assignment, TypeId::INT);
        assert!(matches!(test.kind, BoundExprKind::Sequence { ref side_effects, .. } if side_effects.len() == 1));

        let object = f.local(LocalId(2), TypeId::OBJECT);
        assert!(matches!(f.is_type(object, TypeId::INT).kind, BoundExprKind::IsType { .. }));
    }

    #[test]
    fn test_convert_classifies() {
        let table = SymbolTable::new();
        let f = SyntheticFactory::new(&table, Span::dummy());
        let boxed = f.convert(f.int(1), TypeId::OBJECT);
        assert!(matches!(boxed.kind, BoundExprKind::Conversion { kind: ConversionKind::Boxing, .. }));
        let widened = f.convert(f.int(1), TypeId::LONG);
        assert!(matches!(widened.kind, BoundExprKind::Conversion { kind: ConversionKind::ImplicitNumeric, .. }));
        let same = f.convert(f.int(1), TypeId::INT);
        assert!(matches!(same.kind, BoundExprKind::Literal(_)));
    }
}
