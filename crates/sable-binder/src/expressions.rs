//! Expression binding: operators, conversions, lambdas and the other
//! expression forms that are not plain member access.

use sable_lexer::{IntLiteral, IntSuffix, RealLiteral, RealSuffix, Span};
use sable_parser::{
    BinaryOp, Expr, ExprKind, LambdaExpr, Literal, MethodBodySyntax, Pattern, PatternKind, TypeSyntax,
    UnaryOp,
};
use sable_symbols::{
    binary_numeric_promotion, unary_numeric_promotion, ConstantValue, ConversionKind, ErrorCode,
    GenericKind, PrimitiveType, SymbolLookup, TypeId,
};

use crate::binder::{FunctionContext, MethodBinder};
use crate::bound::*;
use crate::candidates::TypeCandidates;
use crate::constants::{constant_fits, convert_constant, fold_binary, fold_concat, fold_unary, FoldError};
use crate::lookup::delegate_signature;
use crate::members::NameBinding;
use crate::patterns::PatternContext;

/// Operand and result types chosen for a binary operator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BinarySignature {
    pub left: TypeId,
    pub right: TypeId,
    pub result: TypeId,
}

fn binary_operator(op: BinaryOp) -> BinaryOperator {
    match op {
        BinaryOp::Add => BinaryOperator::Add,
        BinaryOp::Sub => BinaryOperator::Sub,
        BinaryOp::Mul => BinaryOperator::Mul,
        BinaryOp::Div => BinaryOperator::Div,
        BinaryOp::Rem => BinaryOperator::Rem,
        BinaryOp::Eq => BinaryOperator::Eq,
        BinaryOp::Ne => BinaryOperator::Ne,
        BinaryOp::Lt => BinaryOperator::Lt,
        BinaryOp::Le => BinaryOperator::Le,
        BinaryOp::Gt => BinaryOperator::Gt,
        BinaryOp::Ge => BinaryOperator::Ge,
        BinaryOp::And => BinaryOperator::LogicalAnd,
        BinaryOp::Or => BinaryOperator::LogicalOr,
        BinaryOp::BitAnd => BinaryOperator::And,
        BinaryOp::BitOr => BinaryOperator::Or,
        BinaryOp::BitXor => BinaryOperator::Xor,
        BinaryOp::Shl => BinaryOperator::Shl,
        BinaryOp::Shr => BinaryOperator::Shr,
        // `??` never reaches operator classification
        BinaryOp::Coalesce => BinaryOperator::LogicalOr,
    }
}

/// Source text of a name-like expression, for diagnostics.
pub(crate) fn expr_text(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Name(ident) => ident.name.to_string(),
        ExprKind::Member { receiver, name } => format!("{}.{}", expr_text(receiver), name.name),
        ExprKind::PredefinedType(p) => p.keyword().to_string(),
        ExprKind::This => "this".to_string(),
        _ => "expression".to_string(),
    }
}

fn literal_value(literal: &Literal) -> (ConstantValue, TypeId) {
    match literal {
        Literal::Int(IntLiteral { value, suffix }) => {
            let v = *value;
            match suffix {
                IntSuffix::None if v <= i32::MAX as u64 => (ConstantValue::Int(v as i64), TypeId::INT),
                IntSuffix::None | IntSuffix::Unsigned if v <= u32::MAX as u64 => (ConstantValue::UInt(v), TypeId::UINT),
                IntSuffix::None | IntSuffix::Long if v <= i64::MAX as u64 => (ConstantValue::Int(v as i64), TypeId::LONG),
                _ => (ConstantValue::UInt(v), TypeId::ULONG),
            }
        }
        Literal::Real(RealLiteral { value, suffix }) => match suffix {
            RealSuffix::None | RealSuffix::Double => (ConstantValue::Double(*value), TypeId::DOUBLE),
            RealSuffix::Float => (ConstantValue::Float(*value as f32), TypeId::FLOAT),
            RealSuffix::Decimal => (ConstantValue::Decimal(*value), TypeId::DECIMAL),
        },
        Literal::String(s) => (ConstantValue::String(s.as_str().into()), TypeId::STRING),
        Literal::Char(c) => (ConstantValue::Char(*c), TypeId::CHAR),
        Literal::Bool(b) => (ConstantValue::Bool(*b), TypeId::BOOL),
        Literal::Null => (ConstantValue::Null, TypeId::NULL),
    }
}

impl MethodBinder<'_, '_> {
    pub(crate) fn bind_expr(&mut self, expr: &Expr) -> BoundExpr {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Literal(literal) => {
                let (value, ty) = literal_value(literal);
                BoundExpr::literal(value, ty, span)
            }
            ExprKind::Name(_) | ExprKind::Member { .. } | ExprKind::PredefinedType(_) => {
                let binding = self.bind_name_or_type(expr);
                self.name_as_value(binding, expr)
            }
            ExprKind::This => {
                if !self.has_this() {
                    self.error(ErrorCode::ThisInStaticMeth, span, Vec::new());
                    return BoundExpr::bad(TypeId::ERROR, span, Vec::new());
                }
                self.this_expr(span)
            }
            ExprKind::Base => {
                if !self.has_this() {
                    self.error(ErrorCode::ThisInStaticMeth, span, Vec::new());
                    return BoundExpr::bad(TypeId::ERROR, span, Vec::new());
                }
                let ty = self
                    .table
                    .class(self.class)
                    .base
                    .map(|base| self.table.class(base).type_id)
                    .unwrap_or(TypeId::OBJECT);
                BoundExpr::new(BoundExprKind::BaseReference, ty, span)
            }
            ExprKind::ConditionalMember { receiver, name } => {
                self.bind_conditional_access(receiver, span, |binder, placeholder| {
                    match binder.bind_instance_member(placeholder, name, span) {
                        NameBinding::Value(value) => value,
                        _ => {
                            binder.error(ErrorCode::MethodNameExpected, span, Vec::new());
                            BoundExpr::bad(TypeId::ERROR, span, Vec::new())
                        }
                    }
                })
            }
            ExprKind::Invocation { callee, args } => self.bind_invocation(callee, args, span),
            ExprKind::ObjectCreation { ty, args } => {
                let ty = self.resolve_type(ty);
                self.bind_object_creation(ty, args, span)
            }
            ExprKind::Unary { op, operand } => self.bind_unary(*op, operand, span),
            ExprKind::Binary { op, left, right } => self.bind_binary(*op, left, right, span),
            ExprKind::Assign { target, value } => self.bind_assignment(target, value, span),
            ExprKind::CompoundAssign { op, target, value } => self.bind_compound_assignment(*op, target, value, span),
            ExprKind::Conditional { condition, when_true, when_false } => {
                self.bind_conditional(condition, when_true, when_false, span)
            }
            ExprKind::Cast { ty, expr: operand } => self.bind_cast(ty, operand, span),
            ExprKind::Is { expr: operand, pattern } => self.bind_is(operand, pattern, span),
            ExprKind::As { expr: operand, ty } => self.bind_as(operand, ty, span),
            ExprKind::Lambda(_) => {
                self.error(ErrorCode::AnonMethToNonDel, span, vec![self.type_name(TypeId::OBJECT)]);
                BoundExpr::bad(TypeId::ERROR, span, Vec::new())
            }
            ExprKind::Await(operand) => self.bind_await(operand, span),
            ExprKind::Sizeof(ty) => {
                let ty = self.resolve_type(ty);
                match self.table.types.primitive(ty) {
                    Some(p) => BoundExpr::literal(ConstantValue::Int(p.size_in_bytes()), TypeId::INT, span),
                    None => {
                        if !ty.is_error() {
                            self.error(ErrorCode::BadUnaryOp, span, vec!["sizeof".to_string(), self.type_name(ty)]);
                        }
                        BoundExpr::bad(TypeId::INT, span, Vec::new())
                    }
                }
            }
            ExprKind::Nameof(inner) => self.bind_nameof(inner, span),
        }
    }

    /// A name binding used where a value is required.
    fn name_as_value(&mut self, binding: NameBinding, expr: &Expr) -> BoundExpr {
        let span = expr.span;
        let kind = match binding {
            NameBinding::Value(value) => return value,
            NameBinding::Type(_) => "type",
            NameBinding::Namespace(_) => "namespace",
            NameBinding::MethodGroup(_) => "method",
        };
        self.error(
            ErrorCode::BadSKknown,
            span,
            vec![expr_text(expr), kind.to_string(), "variable".to_string()],
        );
        BoundExpr::bad(TypeId::ERROR, span, Vec::new())
    }

    /// Bind `expr` and convert it implicitly to `target`. Lambdas and
    /// method groups are bound against the target delegate type.
    pub(crate) fn bind_expr_to(&mut self, expr: &Expr, target: TypeId) -> BoundExpr {
        match &expr.kind {
            ExprKind::Lambda(lambda) => self.bind_lambda(lambda, target, expr.span),
            ExprKind::Name(_) | ExprKind::Member { .. } if delegate_signature(self.table, target).is_some() => {
                match self.bind_name_or_type(expr) {
                    NameBinding::MethodGroup(group) => self.convert_method_group(group, target, expr.span),
                    other => {
                        let value = self.name_as_value(other, expr);
                        self.convert(value, target, expr.span)
                    }
                }
            }
            _ => {
                let bound = self.bind_expr(expr);
                self.convert(bound, target, expr.span)
            }
        }
    }

    pub(crate) fn bind_condition(&mut self, expr: &Expr) -> BoundExpr {
        self.bind_expr_to(expr, TypeId::BOOL)
    }

    // ---
    // Conversions
    // ---

    /// Apply an implicit conversion, reporting when none exists.
    pub(crate) fn convert(&mut self, expr: BoundExpr, target: TypeId, span: Span) -> BoundExpr {
        if expr.ty == target || target.is_error() {
            return expr;
        }
        if expr.has_errors() {
            return BoundExpr::bad(target, expr.span, vec![expr]);
        }
        let table = self.table;
        let kind = table.classify_conversion(expr.ty, target);
        if kind.is_implicit() {
            return self.conversion_node(expr, target, kind);
        }
        if let (Some(value), Some(from), Some(to)) =
            (&expr.constant, table.types.primitive(expr.ty), table.types.primitive(target))
        {
            if constant_fits(value, from, to) {
                return self.conversion_node(expr, target, ConversionKind::ImplicitNumeric);
            }
        }
        if expr.is_null_literal() && table.is_value_type(target) {
            self.error(ErrorCode::ValueCantBeNull, span, vec![self.type_name(target)]);
        } else {
            self.error(
                ErrorCode::NoImplicitConv,
                span,
                vec![self.type_name(expr.ty), self.type_name(target)],
            );
        }
        BoundExpr::bad(target, span, vec![expr])
    }

    /// Apply a cast, reporting when no conversion exists.
    pub(crate) fn explicit_convert(&mut self, expr: BoundExpr, target: TypeId, span: Span) -> BoundExpr {
        if expr.ty == target || target.is_error() {
            return expr;
        }
        if expr.has_errors() {
            return BoundExpr::bad(target, span, vec![expr]);
        }
        let kind = self.table.classify_conversion(expr.ty, target);
        if !kind.exists() {
            self.error(
                ErrorCode::NoExplicitConv,
                span,
                vec![self.type_name(expr.ty), self.type_name(target)],
            );
            return BoundExpr::bad(target, span, vec![expr]);
        }
        let mut node = self.conversion_node(expr, target, kind);
        node.span = span;
        node
    }

    /// Wrap `expr` in a conversion node, folding constant operands.
    pub(crate) fn conversion_node(&self, expr: BoundExpr, target: TypeId, kind: ConversionKind) -> BoundExpr {
        let span = expr.span;
        let types = &self.table.types;
        match kind {
            ConversionKind::Identity => {
                let mut expr = expr;
                expr.ty = target;
                return expr;
            }
            ConversionKind::NullLiteral => return BoundExpr::null_literal(target, span),
            _ => {}
        }
        let constant = match (&expr.constant, kind) {
            (Some(value), ConversionKind::ImplicitNumeric | ConversionKind::ExplicitNumeric) => {
                types.primitive(target).and_then(|p| convert_constant(value, p))
            }
            (Some(value), ConversionKind::ExplicitEnum) => match types.primitive(target) {
                Some(p) => convert_constant(value, p),
                None => value.as_i64().map(ConstantValue::Int),
            },
            _ => None,
        };
        if let Some(value) = constant {
            return BoundExpr::literal(value, target, span);
        }
        BoundExpr::new(
            BoundExprKind::Conversion {
                operand: Box::new(expr),
                kind,
            },
            target,
            span,
        )
    }

    fn bind_cast(&mut self, ty: &TypeSyntax, operand: &Expr, span: Span) -> BoundExpr {
        let target = self.resolve_type(ty);
        if let ExprKind::Lambda(lambda) = &operand.kind {
            return self.bind_lambda(lambda, target, span);
        }
        let operand = self.bind_expr(operand);
        self.explicit_convert(operand, target, span)
    }

    // ---
    // Operators
    // ---

    fn bind_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> BoundExpr {
        if op.is_increment_or_decrement() {
            return self.bind_increment(op, operand, span);
        }
        let operand = self.bind_expr(operand);
        if operand.has_errors() {
            return BoundExpr::bad(TypeId::ERROR, span, vec![operand]);
        }
        let table = self.table;
        let bad_op = |binder: &mut Self, operand: BoundExpr| {
            binder.error(ErrorCode::BadUnaryOp, span, vec![op.as_str().to_string(), binder.type_name(operand.ty)]);
            BoundExpr::bad(TypeId::ERROR, span, vec![operand])
        };

        if op == UnaryOp::Not {
            if operand.ty != TypeId::BOOL {
                return bad_op(self, operand);
            }
            let constant = operand.constant.as_ref().and_then(|c| fold_unary(UnaryOperator::LogicalNot, c, PrimitiveType::Bool));
            return BoundExpr::new(
                BoundExprKind::Unary { op: UnaryOperator::LogicalNot, operand: Box::new(operand) },
                TypeId::BOOL,
                span,
            )
            .with_constant(constant);
        }

        let promoted = table.types.primitive(operand.ty).and_then(unary_numeric_promotion);
        let promoted = match (op, promoted) {
            (UnaryOp::BitNot, Some(p)) if p.is_integral() => p,
            (UnaryOp::Neg, Some(PrimitiveType::ULong)) => return bad_op(self, operand),
            (UnaryOp::Plus | UnaryOp::Neg, Some(p)) => p,
            _ => return bad_op(self, operand),
        };
        let operand = self.convert(operand, promoted.type_id(), span);
        let bound_op = match op {
            UnaryOp::Plus => return operand,
            UnaryOp::Neg => UnaryOperator::Negate,
            _ => UnaryOperator::BitwiseNot,
        };
        let constant = operand.constant.as_ref().and_then(|c| fold_unary(bound_op, c, promoted));
        BoundExpr::new(
            BoundExprKind::Unary { op: bound_op, operand: Box::new(operand) },
            promoted.type_id(),
            span,
        )
        .with_constant(constant)
    }

    fn bind_increment(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> BoundExpr {
        let target = self.bind_expr(operand);
        let target = self.check_assignable(target, operand.span);
        if target.has_errors() {
            return BoundExpr::bad(TypeId::ERROR, span, vec![target]);
        }
        let numeric = self
            .table
            .types
            .primitive(target.ty)
            .is_some_and(PrimitiveType::is_numeric);
        if !numeric {
            self.error(ErrorCode::BadUnaryOp, span, vec![op.as_str().to_string(), self.type_name(target.ty)]);
            return BoundExpr::bad(TypeId::ERROR, span, vec![target]);
        }
        let ty = target.ty;
        BoundExpr::new(
            BoundExprKind::IncrementDecrement {
                target: Box::new(target),
                is_increment: matches!(op, UnaryOp::PreIncrement | UnaryOp::PostIncrement),
                is_prefix: matches!(op, UnaryOp::PreIncrement | UnaryOp::PreDecrement),
            },
            ty,
            span,
        )
    }

    fn bind_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, span: Span) -> BoundExpr {
        match op {
            BinaryOp::And | BinaryOp::Or => return self.bind_logical(op, left, right, span),
            BinaryOp::Coalesce => return self.bind_coalesce(left, right, span),
            _ => {}
        }
        let left = self.bind_expr(left);
        let right = self.bind_expr(right);
        self.bind_binary_operator(binary_operator(op), op.as_str(), left, right, span)
    }

    fn bind_logical(&mut self, op: BinaryOp, left: &Expr, right: &Expr, span: Span) -> BoundExpr {
        let left = self.bind_condition(left);
        let right = self.bind_condition(right);
        let op = binary_operator(op);
        let constant = match (&left.constant, &right.constant) {
            (Some(l), Some(r)) => fold_binary(op, l, r, PrimitiveType::Bool).ok().flatten(),
            _ => None,
        };
        BoundExpr::new(
            BoundExprKind::Binary { op, left: Box::new(left), right: Box::new(right) },
            TypeId::BOOL,
            span,
        )
        .with_constant(constant)
    }

    fn bind_coalesce(&mut self, left: &Expr, right: &Expr, span: Span) -> BoundExpr {
        let table = self.table;
        let left = self.bind_expr(left);
        if left.has_errors() {
            let right = self.bind_expr(right);
            return BoundExpr::bad(TypeId::ERROR, span, vec![left, right]);
        }
        let result = if let Some(underlying) = table.types.nullable_underlying(left.ty) {
            let right = self.bind_expr(right);
            if table.has_implicit_conversion(right.ty, underlying) {
                Some((underlying, self.convert(right, underlying, span)))
            } else {
                let ty = left.ty;
                Some((ty, self.convert(right, ty, span)))
            }
        } else if table.is_reference_type(left.ty) {
            Some((left.ty, self.bind_expr_to(right, left.ty)))
        } else if left.ty == TypeId::NULL {
            let right = self.bind_expr(right);
            Some((right.ty, right))
        } else {
            None
        };
        let Some((ty, right)) = result else {
            let right = self.bind_expr(right);
            self.error(
                ErrorCode::BadBinaryOps,
                span,
                vec!["??".to_string(), self.type_name(left.ty), self.type_name(right.ty)],
            );
            return BoundExpr::bad(TypeId::ERROR, span, vec![left, right]);
        };
        BoundExpr::new(
            BoundExprKind::NullCoalescing { left: Box::new(left), right: Box::new(right) },
            ty,
            span,
        )
    }

    /// Pick operand types for `left op right`, `None` when the operator
    /// does not apply.
    pub(crate) fn classify_binary(&self, op: BinaryOperator, left: &BoundExpr, right: &BoundExpr) -> Option<BinarySignature> {
        use BinaryOperator::*;
        let table = self.table;
        let (l, r) = (left.ty, right.ty);
        let lp = table.types.primitive(l);
        let rp = table.types.primitive(r);
        let sig = |left, right, result| Some(BinarySignature { left, right, result });

        // Numeric promotion, falling back to a constant that fits the other side
        let promote = || -> Option<PrimitiveType> {
            let (lp, rp) = (lp?, rp?);
            binary_numeric_promotion(lp, rp).or_else(|| {
                if right.constant.as_ref().is_some_and(|c| constant_fits(c, rp, lp)) {
                    Some(lp)
                } else if left.constant.as_ref().is_some_and(|c| constant_fits(c, lp, rp)) {
                    Some(rp)
                } else {
                    None
                }
            })
        };
        let same_enum = l == r && table.is_enum_type(l);

        match op {
            Add | Sub | Mul | Div | Rem => {
                let p = promote()?;
                sig(p.type_id(), p.type_id(), p.type_id())
            }
            Lt | Le | Gt | Ge => {
                if same_enum {
                    return sig(l, r, TypeId::BOOL);
                }
                let p = promote()?;
                sig(p.type_id(), p.type_id(), TypeId::BOOL)
            }
            Eq | Ne => {
                if l == TypeId::BOOL && r == TypeId::BOOL {
                    return sig(l, r, TypeId::BOOL);
                }
                if same_enum {
                    return sig(l, r, TypeId::BOOL);
                }
                if let Some(p) = promote() {
                    return sig(p.type_id(), p.type_id(), TypeId::BOOL);
                }
                let stringish = |t: TypeId| t == TypeId::STRING || t == TypeId::NULL;
                if stringish(l) && stringish(r) {
                    return sig(TypeId::STRING, TypeId::STRING, TypeId::BOOL);
                }
                let referencish = |t: TypeId| table.is_reference_type(t) || t == TypeId::NULL;
                if referencish(l)
                    && referencish(r)
                    && (table.classify_conversion(l, r).exists() || table.classify_conversion(r, l).exists())
                {
                    return sig(TypeId::OBJECT, TypeId::OBJECT, TypeId::BOOL);
                }
                None
            }
            And | Or | Xor => {
                if l == TypeId::BOOL && r == TypeId::BOOL {
                    return sig(l, r, TypeId::BOOL);
                }
                if same_enum {
                    return sig(l, r, l);
                }
                let p = promote().filter(|p| p.is_integral())?;
                sig(p.type_id(), p.type_id(), p.type_id())
            }
            Shl | Shr => {
                let p = unary_numeric_promotion(lp?).filter(|p| p.is_integral())?;
                let shift = unary_numeric_promotion(rp?)?;
                if shift != PrimitiveType::Int {
                    return None;
                }
                sig(p.type_id(), TypeId::INT, p.type_id())
            }
            LogicalAnd | LogicalOr | StringConcat => None,
        }
    }

    pub(crate) fn bind_binary_operator(
        &mut self,
        op: BinaryOperator,
        text: &str,
        left: BoundExpr,
        right: BoundExpr,
        span: Span,
    ) -> BoundExpr {
        if left.has_errors() || right.has_errors() {
            return BoundExpr::bad(TypeId::ERROR, span, vec![left, right]);
        }
        if op == BinaryOperator::Add && (left.ty == TypeId::STRING || right.ty == TypeId::STRING) {
            return self.bind_string_concat(left, right, span);
        }
        if matches!(op, BinaryOperator::Eq | BinaryOperator::Ne) {
            if let Some(test) = self.bind_nullable_null_test(op, &left, &right, span) {
                return test;
            }
        }
        let Some(sig) = self.classify_binary(op, &left, &right) else {
            self.error(
                ErrorCode::BadBinaryOps,
                span,
                vec![text.to_string(), self.type_name(left.ty), self.type_name(right.ty)],
            );
            return BoundExpr::bad(TypeId::ERROR, span, vec![left, right]);
        };
        let left = self.convert(left, sig.left, span);
        let right = self.convert(right, sig.right, span);

        let mut constant = None;
        if let (Some(l), Some(r), Some(p)) = (&left.constant, &right.constant, self.table.types.primitive(sig.left)) {
            match fold_binary(op, l, r, p) {
                Ok(value) => constant = value,
                Err(FoldError::DivideByZero) => {
                    self.error(ErrorCode::DivideByZero, span, Vec::new());
                    return BoundExpr::bad(sig.result, span, vec![left, right]);
                }
            }
        }
        BoundExpr::new(
            BoundExprKind::Binary { op, left: Box::new(left), right: Box::new(right) },
            sig.result,
            span,
        )
        .with_constant(constant)
    }

    /// `nullable == null` tests `HasValue`.
    fn bind_nullable_null_test(&mut self, op: BinaryOperator, left: &BoundExpr, right: &BoundExpr, span: Span) -> Option<BoundExpr> {
        let types = &self.table.types;
        let operand = if types.nullable_underlying(left.ty).is_some() && right.is_null_literal() {
            left
        } else if types.nullable_underlying(right.ty).is_some() && left.is_null_literal() {
            right
        } else {
            return None;
        };
        let has_value = BoundExpr::new(
            BoundExprKind::NullableHasValue(Box::new(operand.clone())),
            TypeId::BOOL,
            span,
        );
        Some(if op == BinaryOperator::Ne {
            has_value
        } else {
            BoundExpr::new(
                BoundExprKind::Unary { op: UnaryOperator::LogicalNot, operand: Box::new(has_value) },
                TypeId::BOOL,
                span,
            )
        })
    }

    fn bind_string_concat(&mut self, left: BoundExpr, right: BoundExpr, span: Span) -> BoundExpr {
        let constant = match (&left.constant, &right.constant) {
            (Some(l), Some(r)) => Some(fold_concat(l, r)),
            _ => None,
        };
        let operand = |binder: &mut Self, expr: BoundExpr| {
            if expr.ty == TypeId::STRING {
                expr
            } else {
                binder.convert(expr, TypeId::OBJECT, span)
            }
        };
        let left = operand(self, left);
        let right = operand(self, right);
        BoundExpr::new(
            BoundExprKind::Binary {
                op: BinaryOperator::StringConcat,
                left: Box::new(left),
                right: Box::new(right),
            },
            TypeId::STRING,
            span,
        )
        .with_constant(constant)
    }

    // ---
    // Assignment
    // ---

    /// Check that `target` can be written, rewriting a get-only auto
    /// property assigned in a constructor to its backing field.
    pub(crate) fn check_assignable(&mut self, target: BoundExpr, span: Span) -> BoundExpr {
        let table = self.table;
        if target.has_errors() {
            return target;
        }
        match &target.kind {
            BoundExprKind::Local(local) => {
                let symbol = self.locals.get(*local);
                if symbol.kind == LocalKind::Foreach {
                    let name = symbol.name.to_string();
                    self.error(ErrorCode::AssignReadonly, span, vec![name]);
                    return BoundExpr::bad(target.ty, span, vec![target]);
                }
                target
            }
            BoundExprKind::Parameter(_) => target,
            BoundExprKind::Field { field, receiver } => {
                let symbol = table.field(*field);
                let in_constructor = self.is_constructor
                    && symbol.containing == self.class
                    && symbol.is_static == self.is_static
                    && receiver.as_ref().map_or(true, |r| matches!(r.kind, BoundExprKind::This));
                if symbol.is_readonly && !in_constructor {
                    self.error(ErrorCode::AssignReadonly, span, vec![symbol.name.to_string()]);
                    return BoundExpr::bad(target.ty, span, vec![target]);
                }
                target
            }
            BoundExprKind::Property { property, receiver } => {
                let symbol = table.property(*property);
                if symbol.setter.is_some() {
                    return target;
                }
                let in_constructor = self.is_constructor
                    && symbol.containing == self.class
                    && symbol.is_static == self.is_static
                    && receiver.as_ref().map_or(true, |r| matches!(r.kind, BoundExprKind::This));
                match symbol.backing_field {
                    Some(field) if in_constructor => {
                        let receiver = match target.kind {
                            BoundExprKind::Property { receiver, .. } => receiver,
                            _ => None,
                        };
                        BoundExpr::new(BoundExprKind::Field { receiver, field }, target.ty, target.span)
                    }
                    _ => {
                        self.error(ErrorCode::AssignReadonly, span, vec![symbol.name.to_string()]);
                        BoundExpr::bad(target.ty, span, vec![target])
                    }
                }
            }
            _ => {
                self.error(ErrorCode::AssgLvalueExpected, span, Vec::new());
                BoundExpr::bad(target.ty, span, vec![target])
            }
        }
    }

    fn bind_assignment(&mut self, target: &Expr, value: &Expr, span: Span) -> BoundExpr {
        let bound_target = self.bind_expr(target);
        let bound_target = self.check_assignable(bound_target, target.span);
        if bound_target.has_errors() {
            let value = self.bind_expr(value);
            return BoundExpr::bad(bound_target.ty, span, vec![bound_target, value]);
        }
        let value = self.bind_expr_to(value, bound_target.ty);
        let ty = bound_target.ty;
        BoundExpr::new(
            BoundExprKind::Assignment {
                target: Box::new(bound_target),
                value: Box::new(value),
            },
            ty,
            span,
        )
    }

    fn bind_compound_assignment(&mut self, op: BinaryOp, target: &Expr, value: &Expr, span: Span) -> BoundExpr {
        let bound_target = self.bind_expr(target);
        let bound_target = self.check_assignable(bound_target, target.span);
        let value = self.bind_expr(value);
        if bound_target.has_errors() || value.has_errors() {
            return BoundExpr::bad(TypeId::ERROR, span, vec![bound_target, value]);
        }
        let ty = bound_target.ty;
        let bound_op = binary_operator(op);

        if bound_op == BinaryOperator::Add && ty == TypeId::STRING {
            let value = if value.ty == TypeId::STRING { value } else { self.convert(value, TypeId::OBJECT, span) };
            return BoundExpr::new(
                BoundExprKind::CompoundAssignment {
                    op: BinaryOperator::StringConcat,
                    target: Box::new(bound_target),
                    value: Box::new(value),
                    operand_type: TypeId::STRING,
                },
                ty,
                span,
            );
        }

        let sig = self
            .classify_binary(bound_op, &bound_target, &value)
            .filter(|sig| self.table.classify_conversion(sig.result, ty).exists());
        let Some(sig) = sig else {
            self.error(
                ErrorCode::BadBinaryOps,
                span,
                vec![format!("{}=", op.as_str()), self.type_name(ty), self.type_name(value.ty)],
            );
            return BoundExpr::bad(TypeId::ERROR, span, vec![bound_target, value]);
        };
        let value = self.convert(value, sig.right, span);
        BoundExpr::new(
            BoundExprKind::CompoundAssignment {
                op: bound_op,
                target: Box::new(bound_target),
                value: Box::new(value),
                operand_type: sig.left,
            },
            ty,
            span,
        )
    }

    // ---
    // Other forms
    // ---

    fn bind_conditional(&mut self, condition: &Expr, when_true: &Expr, when_false: &Expr, span: Span) -> BoundExpr {
        let table = self.table;
        let condition = self.bind_condition(condition);
        let when_true = self.bind_expr(when_true);
        let when_false = self.bind_expr(when_false);
        if when_true.has_errors() || when_false.has_errors() {
            return BoundExpr::bad(TypeId::ERROR, span, vec![condition, when_true, when_false]);
        }
        let (t, f) = (when_true.ty, when_false.ty);
        let fits = |from: &BoundExpr, to: TypeId| {
            table.has_implicit_conversion(from.ty, to)
                || match (&from.constant, table.types.primitive(from.ty), table.types.primitive(to)) {
                    (Some(c), Some(a), Some(b)) => constant_fits(c, a, b),
                    _ => false,
                }
        };
        let ty = if t == f {
            t
        } else if fits(&when_false, t) {
            t
        } else if fits(&when_true, f) {
            f
        } else {
            self.error(ErrorCode::NoImplicitConv, span, vec![self.type_name(f), self.type_name(t)]);
            return BoundExpr::bad(TypeId::ERROR, span, vec![condition, when_true, when_false]);
        };
        let when_true = self.convert(when_true, ty, span);
        let when_false = self.convert(when_false, ty, span);
        let constant = match condition.constant.as_ref().and_then(ConstantValue::as_bool) {
            Some(true) => when_true.constant.clone(),
            Some(false) => when_false.constant.clone(),
            None => None,
        };
        BoundExpr::new(
            BoundExprKind::Conditional {
                condition: Box::new(condition),
                when_true: Box::new(when_true),
                when_false: Box::new(when_false),
            },
            ty,
            span,
        )
        .with_constant(constant)
    }

    fn bind_is(&mut self, operand: &Expr, pattern: &Pattern, span: Span) -> BoundExpr {
        let operand = self.bind_expr(operand);
        if let PatternKind::Constant(value) = &pattern.kind {
            if let Some(target) = self.try_bind_as_type(value) {
                if operand.has_errors() || target.is_error() {
                    return BoundExpr::bad(TypeId::BOOL, span, vec![operand]);
                }
                return BoundExpr::new(
                    BoundExprKind::IsType { operand: Box::new(operand), target },
                    TypeId::BOOL,
                    span,
                );
            }
        }
        let mut candidates = TypeCandidates::single(operand.ty);
        let pattern = self.bind_pattern(pattern, &mut candidates, PatternContext::Is);
        BoundExpr::new(
            BoundExprKind::IsPattern {
                operand: Box::new(operand),
                pattern: Box::new(pattern),
            },
            TypeId::BOOL,
            span,
        )
    }

    fn bind_as(&mut self, operand: &Expr, ty: &TypeSyntax, span: Span) -> BoundExpr {
        let table = self.table;
        let target = self.resolve_type(ty);
        let operand = self.bind_expr(operand);
        if target.is_error() || operand.has_errors() {
            return BoundExpr::bad(target, span, vec![operand]);
        }
        if table.is_value_type(target) && table.types.nullable_underlying(target).is_none() {
            self.error(ErrorCode::AsMustHaveReferenceType, span, vec![self.type_name(target)]);
            return BoundExpr::bad(target, span, vec![operand]);
        }
        if !table.classify_conversion(operand.ty, target).exists() {
            self.error(
                ErrorCode::NoExplicitConv,
                span,
                vec![self.type_name(operand.ty), self.type_name(target)],
            );
            return BoundExpr::bad(target, span, vec![operand]);
        }
        BoundExpr::new(BoundExprKind::AsType { operand: Box::new(operand), target }, target, span)
    }

    fn bind_await(&mut self, operand: &Expr, span: Span) -> BoundExpr {
        let operand = self.bind_expr(operand);
        let (is_async, in_finally) = (self.function().is_async, self.function().finally_depth > 0);
        if !is_async {
            self.error(ErrorCode::BadAwaitWithoutAsync, span, Vec::new());
        } else if in_finally {
            self.error(ErrorCode::BadAwaitInFinally, span, Vec::new());
        }
        if operand.has_errors() {
            return BoundExpr::bad(TypeId::ERROR, span, vec![operand]);
        }
        let result = if operand.ty == TypeId::TASK {
            Some(TypeId::VOID)
        } else {
            self.table
                .types
                .generic_args(operand.ty, GenericKind::Task)
                .and_then(|args| args.first().copied())
        };
        let Some(result) = result else {
            self.error(ErrorCode::BadAwaitArg, span, vec![self.type_name(operand.ty)]);
            return BoundExpr::bad(TypeId::ERROR, span, vec![operand]);
        };
        BoundExpr::new(BoundExprKind::Await(Box::new(operand)), result, span)
    }

    fn bind_nameof(&mut self, inner: &Expr, span: Span) -> BoundExpr {
        let name = match &inner.kind {
            ExprKind::Name(ident) => ident.name.to_string(),
            ExprKind::Member { name, .. } => name.name.to_string(),
            _ => {
                self.error(ErrorCode::ConstantExpected, inner.span, Vec::new());
                return BoundExpr::bad(TypeId::STRING, span, Vec::new());
            }
        };
        // The name must exist even though its value is not used
        let _ = self.bind_name_or_type(inner);
        BoundExpr::literal(ConstantValue::String(name.into()), TypeId::STRING, span)
    }

    /// `receiver?.access`: `access` is bound against a placeholder for the
    /// receiver's non-null value.
    pub(crate) fn bind_conditional_access(
        &mut self,
        receiver: &Expr,
        span: Span,
        access: impl FnOnce(&mut Self, BoundExpr) -> BoundExpr,
    ) -> BoundExpr {
        let table = self.table;
        let receiver = self.bind_expr(receiver);
        if receiver.has_errors() {
            return BoundExpr::bad(TypeId::ERROR, span, vec![receiver]);
        }
        let underlying = table.types.nullable_underlying(receiver.ty);
        if underlying.is_none() && !table.is_reference_type(receiver.ty) {
            self.error(ErrorCode::BadUnaryOp, span, vec!["?".to_string(), self.type_name(receiver.ty)]);
            return BoundExpr::bad(TypeId::ERROR, span, vec![receiver]);
        }
        let placeholder = BoundExpr::new(
            BoundExprKind::ConditionalReceiver,
            underlying.unwrap_or(receiver.ty),
            receiver.span,
        );
        let access = access(self, placeholder);
        if access.has_errors() {
            return BoundExpr::bad(TypeId::ERROR, span, vec![receiver, access]);
        }
        let ty = if access.ty != TypeId::VOID
            && table.is_value_type(access.ty)
            && table.types.nullable_underlying(access.ty).is_none()
        {
            table.types.nullable(access.ty)
        } else {
            access.ty
        };
        BoundExpr::new(
            BoundExprKind::ConditionalAccess {
                receiver: Box::new(receiver),
                access: Box::new(access),
            },
            ty,
            span,
        )
    }

    /// Bind a lambda against the delegate type `target`.
    pub(crate) fn bind_lambda(&mut self, lambda: &LambdaExpr, target: TypeId, span: Span) -> BoundExpr {
        if target.is_error() {
            return BoundExpr::bad(TypeId::ERROR, span, Vec::new());
        }
        let Some((param_types, return_type)) = delegate_signature(self.table, target) else {
            self.error(ErrorCode::AnonMethToNonDel, span, vec![self.type_name(target)]);
            return BoundExpr::bad(target, span, Vec::new());
        };
        if param_types.len() != lambda.params.len() {
            self.error(
                ErrorCode::LambdaArity,
                span,
                vec![self.type_name(target), lambda.params.len().to_string()],
            );
            return BoundExpr::bad(target, span, Vec::new());
        }

        self.push_scope();
        let mut params = Vec::with_capacity(param_types.len());
        for (param, &ty) in lambda.params.iter().zip(&param_types) {
            if let Some(syntax) = &param.ty {
                let declared = self.resolve_type(syntax);
                if declared != ty && !declared.is_error() {
                    self.error(
                        ErrorCode::BadArgType,
                        param.span,
                        vec![(params.len() + 1).to_string(), self.type_name(declared), self.type_name(ty)],
                    );
                }
            }
            params.push(self.declare_local(&param.name, ty, LocalKind::LambdaParameter));
        }

        let mut function = FunctionContext::new("lambda expression", return_type);
        function.is_async = lambda.is_async;
        function.is_lambda = true;
        self.functions.push(function);
        let body = match &lambda.body {
            MethodBodySyntax::Block(block) => self.bind_block(block),
            MethodBodySyntax::Expression(expr) => self.bind_expression_body(expr),
        };
        self.functions.pop();
        self.pop_scope();

        BoundExpr::new(
            BoundExprKind::Lambda(Box::new(BoundLambda {
                params,
                body,
                return_type,
                delegate_type: target,
                is_async: lambda.is_async,
            })),
            target,
            span,
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::binder::tests::{bind_all, codes};
    use crate::bound::*;
    use sable_symbols::{ConstantValue, ErrorCode, TypeId};

    fn first_local_init(methods: &[BoundMethod]) -> BoundExpr {
        for method in methods {
            for stmt in &method.body.stmts {
                if let BoundStmtKind::LocalDeclaration { init: Some(init), .. } = &stmt.kind {
                    return init.clone();
                }
            }
        }
        panic!("no local declaration");
    }

    #[test]
    fn test_constant_folding() {
        let (methods, diagnostics) = bind_all(
            "class P { const int Two = 2; static void Main() { int x = Two + Two - Two * 1; System.Console.WriteLine(x); } }",
        );
        assert!(diagnostics.is_empty(), "{:?}", codes(&diagnostics));
        let init = first_local_init(&methods);
        assert_eq!(init.constant, Some(ConstantValue::Int(2)));
    }

    #[test]
    fn test_string_concatenation() {
        let (methods, diagnostics) = bind_all("class P { static void Main() { string s = \"a\" + 1 + true; System.Console.WriteLine(s); } }");
        assert!(diagnostics.is_empty(), "{:?}", codes(&diagnostics));
        let init = first_local_init(&methods);
        assert_eq!(init.ty, TypeId::STRING);
        assert_eq!(init.constant, Some(ConstantValue::String("a1True".into())));
    }

    #[test]
    fn test_operator_errors() {
        let (_, diagnostics) = bind_all("class P { static void Main() { bool b = 1 + true; } }");
        assert!(diagnostics.contains(ErrorCode::BadBinaryOps));

        let (_, diagnostics) = bind_all("class P { static void Main() { int x = 1 / 0; } }");
        assert!(diagnostics.contains(ErrorCode::DivideByZero));

        let (_, diagnostics) = bind_all("class P { static void Main() { bool b = !1; } }");
        assert!(diagnostics.contains(ErrorCode::BadUnaryOp));
    }

    #[test]
    fn test_conversions() {
        let (_, diagnostics) = bind_all("class P { static void Main() { byte b = 10; long l = b; int i = (int)l; double d = i; } }");
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));

        let (_, diagnostics) = bind_all("class P { static void Main() { int i = 2.5; } }");
        assert!(diagnostics.contains(ErrorCode::NoImplicitConv));

        let (_, diagnostics) = bind_all("class P { static void Main() { int i = null; } }");
        assert!(diagnostics.contains(ErrorCode::ValueCantBeNull));

        let (_, diagnostics) = bind_all("class P { static void Main() { string s = (string)1; } }");
        assert!(diagnostics.contains(ErrorCode::NoExplicitConv));
    }

    #[test]
    fn test_assignment_targets() {
        let (_, diagnostics) = bind_all("class P { static void Main() { 1 = 2; } }");
        assert!(diagnostics.contains(ErrorCode::AssgLvalueExpected));

        let (_, diagnostics) = bind_all("class P { readonly int r; void M() { r = 1; } }");
        assert!(diagnostics.contains(ErrorCode::AssignReadonly));

        let (_, diagnostics) = bind_all("class P { readonly int r; int X { get; } public P() { r = 1; X = 2; } }");
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));
    }

    #[test]
    fn test_lambdas_and_delegates() {
        let (_, diagnostics) = bind_all(
            "class P { static int Twice(int x) { return 2 * x; } static void Main() { Func<int, int> f = x => x + 1; Func<int, int> g = Twice; Action a = () => { }; int y = f(g(1)); a(); } }",
        );
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));

        let (_, diagnostics) = bind_all("class P { static void Main() { Func<int> f = (x) => x; } }");
        assert!(diagnostics.contains(ErrorCode::LambdaArity));

        let (_, diagnostics) = bind_all("class P { static void Main() { int f = () => 1; } }");
        assert!(diagnostics.contains(ErrorCode::AnonMethToNonDel));
    }

    #[test]
    fn test_await_requires_async() {
        let (_, diagnostics) = bind_all("class P { static void M() { await Task.Yield(); } }");
        assert!(diagnostics.contains(ErrorCode::BadAwaitWithoutAsync));

        let (_, diagnostics) = bind_all("class P { static async Task<int> M() { await Task.Yield(); return await Task.FromResult(1); } }");
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));

        let (_, diagnostics) = bind_all("class P { static async Task M() { await 1; } }");
        assert!(diagnostics.contains(ErrorCode::BadAwaitArg));
    }

    #[test]
    fn test_is_as_and_null_tests() {
        let (_, diagnostics) = bind_all(
            "class P { static void Main() { object o = \"s\"; bool a = o is string; string s = o as string; int? n = null; bool b = n == null; int k = n ?? 3; int? m = (n == null) ? 1 : 2; } }",
        );
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));

        let (_, diagnostics) = bind_all("class P { static void Main() { object o = 1; int i = o as int; } }");
        assert!(diagnostics.contains(ErrorCode::AsMustHaveReferenceType));
    }

    #[test]
    fn test_sizeof_and_nameof() {
        let (methods, diagnostics) = bind_all("class P { static void Main() { int s = sizeof(long); } }");
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));
        assert_eq!(first_local_init(&methods).constant, Some(ConstantValue::Int(8)));

        let (methods, _) = bind_all("class P { static void Main() { int value = 1; string n = nameof(value); } }");
        let inits: Vec<_> = methods
            .iter()
            .flat_map(|m| m.body.stmts.iter())
            .filter_map(|s| match &s.kind {
                BoundStmtKind::LocalDeclaration { init: Some(init), .. } => init.constant.clone(),
                _ => None,
            })
            .collect();
        assert!(inits.contains(&ConstantValue::String("value".into())));
    }
}
