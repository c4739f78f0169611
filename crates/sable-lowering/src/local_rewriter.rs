//! The local rewriter: the first lowering pass.
//!
//! Replaces the high-level forms of a bound body with the reduced set the
//! later passes and the code generator work on:
//!
//! - loops (`while`, `do`, `for`, `foreach`) become labels and conditional
//!   gotos, `break`/`continue` become gotos
//! - `switch` and `is <pattern>` become boolean expressions and if-chains
//! - property accesses become getter and setter calls
//! - compound assignment, `++`/`--`, `??` and `?.` are expanded with
//!   temporaries
//! - string concatenation becomes `string.Concat`
//! - constants are folded into literals

use sable_binder::visit::{rewrite_expr_children, rewrite_stmt_children};
use sable_binder::{
    BinaryOperator, BoundExpr, BoundExprKind, BoundMethod, BoundPattern, BoundStmt, BoundStmtKind,
    BoundTreeRewriter, LabelId, LocalId, LocalTable,
};
use sable_lexer::Span;
use sable_symbols::{
    unary_numeric_promotion, ClassId, GenericKind, PropertyId, SymbolLookup, SymbolTable, TypeId,
};

use crate::factory::SyntheticFactory;
use crate::{LoweredMethod, SynthesizedMembers};

/// Lower the control flow and operators of a bound method body.
pub fn rewrite_locals(table: &SymbolTable, bound: BoundMethod, synthesized: &mut SynthesizedMembers) -> LoweredMethod {
    let class = table.method(bound.method).containing;
    let mut rewriter = LocalRewriter::new(table, class, bound.locals, synthesized, bound.body.span);
    let body = rewriter.rewrite_block(bound.body);
    LoweredMethod {
        method: bound.method,
        locals: rewriter.locals,
        body,
        state_machine: None,
    }
}

/// How the value of a modification is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultUse {
    Discarded,
    NewValue,
    OldValue,
}

pub(crate) struct LocalRewriter<'a, 's> {
    pub(crate) table: &'a SymbolTable,
    pub(crate) factory: SyntheticFactory<'a>,
    pub(crate) locals: LocalTable,
    /// Class of the method being rewritten; numeric helpers are added here
    pub(crate) class: ClassId,
    pub(crate) synthesized: &'s mut SynthesizedMembers,
    /// Replacements for `ConditionalReceiver`, innermost last
    receivers: Vec<BoundExpr>,
}

impl<'a, 's> LocalRewriter<'a, 's> {
    pub(crate) fn new(
        table: &'a SymbolTable,
        class: ClassId,
        locals: LocalTable,
        synthesized: &'s mut SynthesizedMembers,
        span: Span,
    ) -> Self {
        Self {
            table,
            factory: SyntheticFactory::new(table, span),
            locals,
            class,
            synthesized,
            receivers: Vec::new(),
        }
    }

    pub(crate) fn temp(&mut self, ty: TypeId) -> LocalId {
        self.locals.temp(ty)
    }

    /// Evaluate `expr` once: trivial expressions are returned as they
    /// are, anything else is stored in a fresh temporary.
    pub(crate) fn spill(&mut self, expr: BoundExpr, temps: &mut Vec<LocalId>, effects: &mut Vec<BoundExpr>) -> BoundExpr {
        if expr.is_trivial() {
            return expr;
        }
        let f = self.factory.at(expr.span);
        let temp = self.temp(expr.ty);
        temps.push(temp);
        let local = f.local(temp, expr.ty);
        effects.push(f.assign(local.clone(), expr));
        local
    }

    // ---
    // Expressions
    // ---

    /// Rewrite an expression whose value is discarded.
    fn rewrite_effect(&mut self, expr: BoundExpr) -> BoundExpr {
        let BoundExpr { kind, ty, constant, span } = expr;
        match kind {
            BoundExprKind::IncrementDecrement { target, is_increment, .. } => {
                self.lower_increment(*target, is_increment, ResultUse::Discarded, span)
            }
            BoundExprKind::CompoundAssignment { op, target, value, operand_type } => {
                self.lower_compound(op, *target, *value, operand_type, ResultUse::Discarded, span)
            }
            BoundExprKind::Assignment { target, value } if matches!(target.kind, BoundExprKind::Property { .. }) => {
                self.lower_property_assignment(*target, *value, ResultUse::Discarded, span)
            }
            kind => self.rewrite_expr(BoundExpr { kind, ty, constant, span }),
        }
    }

    fn lower_property_read(&mut self, receiver: Option<BoundExpr>, property: PropertyId, ty: TypeId, span: Span) -> BoundExpr {
        let receiver = receiver.map(|r| self.rewrite_expr(r));
        self.property_read(receiver, property, ty, span)
    }

    /// Read a property through its getter, or its backing field when it
    /// has none.
    fn property_read(&self, receiver: Option<BoundExpr>, property: PropertyId, ty: TypeId, span: Span) -> BoundExpr {
        let f = self.factory.at(span);
        let symbol = self.table.property(property);
        match (symbol.getter, symbol.backing_field) {
            (Some(getter), _) => f.call_typed(receiver, getter, Vec::new(), ty),
            (None, Some(field)) => f.field(receiver, field),
            (None, None) => unreachable!("property {} has no getter", symbol.name),
        }
    }

    fn property_write(&self, receiver: Option<BoundExpr>, property: PropertyId, value: BoundExpr, span: Span) -> BoundExpr {
        let f = self.factory.at(span);
        let symbol = self.table.property(property);
        match (symbol.setter, symbol.backing_field) {
            (Some(setter), _) => f.call(receiver, setter, vec![value]),
            // Get-only auto properties are assigned in constructors
            (None, Some(field)) => f.assign(f.field(receiver, field), value),
            (None, None) => unreachable!("property {} has no setter", symbol.name),
        }
    }

    /// Rewrite the receiver of an assignment target so that it can be
    /// read and written without evaluating it twice.
    fn spill_target(&mut self, target: BoundExpr, temps: &mut Vec<LocalId>, effects: &mut Vec<BoundExpr>) -> BoundExpr {
        let BoundExpr { kind, ty, constant, span } = target;
        let kind = match kind {
            BoundExprKind::Field { receiver: Some(receiver), field } => {
                let receiver = self.rewrite_expr(*receiver);
                BoundExprKind::Field {
                    receiver: Some(Box::new(self.spill(receiver, temps, effects))),
                    field,
                }
            }
            BoundExprKind::Property { receiver: Some(receiver), property } => {
                let receiver = self.rewrite_expr(*receiver);
                BoundExprKind::Property {
                    receiver: Some(Box::new(self.spill(receiver, temps, effects))),
                    property,
                }
            }
            other => other,
        };
        BoundExpr { kind, ty, constant, span }
    }

    fn read_target(&self, target: &BoundExpr) -> BoundExpr {
        match &target.kind {
            BoundExprKind::Property { receiver, property } => {
                self.property_read(receiver.as_deref().cloned(), *property, target.ty, target.span)
            }
            _ => target.clone(),
        }
    }

    fn write_target(&self, target: BoundExpr, value: BoundExpr) -> BoundExpr {
        match target.kind {
            BoundExprKind::Property { receiver, property } => {
                self.property_write(receiver.map(|r| *r), property, value, target.span)
            }
            _ => self.factory.at(target.span).assign(target, value),
        }
    }

    /// Read-modify-write of `target`; `compute` maps the current value to
    /// the new one.
    fn lower_modification(
        &mut self,
        target: BoundExpr,
        usage: ResultUse,
        span: Span,
        compute: impl FnOnce(&mut Self, BoundExpr) -> BoundExpr,
    ) -> BoundExpr {
        let f = self.factory.at(span);
        let mut temps = Vec::new();
        let mut effects = Vec::new();
        let target = self.spill_target(target, &mut temps, &mut effects);
        let is_property = matches!(target.kind, BoundExprKind::Property { .. });
        let value = match usage {
            ResultUse::Discarded => {
                let current = self.read_target(&target);
                let new_value = compute(self, current);
                self.write_target(target, new_value)
            }
            ResultUse::NewValue if !is_property => {
                let current = self.read_target(&target);
                let new_value = compute(self, current);
                f.assign(target, new_value)
            }
            ResultUse::NewValue => {
                let current = self.read_target(&target);
                let new_value = compute(self, current);
                let temp = self.temp(target.ty);
                temps.push(temp);
                let result = f.local(temp, target.ty);
                effects.push(f.assign(result.clone(), new_value));
                effects.push(self.write_target(target, result.clone()));
                result
            }
            ResultUse::OldValue => {
                let temp = self.temp(target.ty);
                temps.push(temp);
                let old = f.local(temp, target.ty);
                effects.push(f.assign(old.clone(), self.read_target(&target)));
                let new_value = compute(self, old.clone());
                effects.push(self.write_target(target, new_value));
                old
            }
        };
        f.sequence(temps, effects, value)
    }

    fn lower_increment(&mut self, target: BoundExpr, is_increment: bool, usage: ResultUse, span: Span) -> BoundExpr {
        let f = self.factory.at(span);
        let ty = target.ty;
        let primitive = f.arithmetic_type(ty).unwrap_or_else(|| unreachable!("++ on a non-numeric type"));
        let promoted = unary_numeric_promotion(primitive).unwrap_or(primitive);
        let op = if is_increment { BinaryOperator::Add } else { BinaryOperator::Sub };
        self.lower_modification(target, usage, span, move |_, current| {
            let operand = f.convert(current, promoted.type_id());
            let sum = f.binary(op, operand, f.one(promoted), promoted.type_id());
            f.convert(sum, ty)
        })
    }

    fn lower_compound(
        &mut self,
        op: BinaryOperator,
        target: BoundExpr,
        value: BoundExpr,
        operand_type: TypeId,
        usage: ResultUse,
        span: Span,
    ) -> BoundExpr {
        let f = self.factory.at(span);
        let ty = target.ty;
        self.lower_modification(target, usage, span, move |this, current| {
            let value = this.rewrite_expr(value);
            if op == BinaryOperator::StringConcat {
                return this.concat(current, value, span);
            }
            let current = f.convert(current, operand_type);
            let result = f.binary(op, current, value, operand_type);
            f.convert(result, ty)
        })
    }

    fn lower_property_assignment(&mut self, target: BoundExpr, value: BoundExpr, usage: ResultUse, span: Span) -> BoundExpr {
        self.lower_modification(target, usage, span, move |this, _| this.rewrite_expr(value))
    }

    /// `string.Concat` over two operands already typed `string` or `object`.
    fn concat(&mut self, left: BoundExpr, right: BoundExpr, span: Span) -> BoundExpr {
        let f = self.factory.at(span);
        if left.ty == TypeId::STRING && right.ty == TypeId::STRING {
            let concat = f.builtin_method(ClassId::STRING, "Concat", &[TypeId::STRING, TypeId::STRING]);
            return f.call(None, concat, vec![left, right]);
        }
        let concat = f.builtin_method(ClassId::STRING, "Concat", &[TypeId::OBJECT, TypeId::OBJECT]);
        let args = vec![f.convert(left, TypeId::OBJECT), f.convert(right, TypeId::OBJECT)];
        f.call(None, concat, args)
    }

    fn lower_coalesce(&mut self, left: BoundExpr, right: BoundExpr, ty: TypeId, span: Span) -> BoundExpr {
        let f = self.factory.at(span);
        let left = self.rewrite_expr(left);
        let right = self.rewrite_expr(right);
        if left.is_null_literal() {
            return f.convert(right, ty);
        }
        let mut temps = Vec::new();
        let mut effects = Vec::new();
        let left = self.spill(left, &mut temps, &mut effects);
        let value = if self.table.types.nullable_underlying(left.ty).is_some() {
            let present = if ty == left.ty { left.clone() } else { f.value_or_default(left.clone()) };
            f.conditional(f.has_value(left), present, right, ty)
        } else {
            f.conditional(f.is_not_null(left.clone()), f.convert(left, ty), f.convert(right, ty), ty)
        };
        f.sequence(temps, effects, value)
    }

    /// Evaluate the receiver of `receiver?.access` once and test it.
    /// Returns the temporaries, their initializers, the null test and the
    /// value `ConditionalReceiver` stands for.
    fn conditional_receiver(&mut self, receiver: BoundExpr) -> (Vec<LocalId>, Vec<BoundExpr>, BoundExpr, BoundExpr) {
        let f = self.factory.at(receiver.span);
        let receiver = self.rewrite_expr(receiver);
        let mut temps = Vec::new();
        let mut effects = Vec::new();
        let receiver = self.spill(receiver, &mut temps, &mut effects);
        let test = f.is_not_null(receiver.clone());
        let replacement = if self.table.types.nullable_underlying(receiver.ty).is_some() {
            f.value_or_default(receiver)
        } else {
            receiver
        };
        (temps, effects, test, replacement)
    }

    fn lower_conditional_access(&mut self, receiver: BoundExpr, access: BoundExpr, ty: TypeId, span: Span) -> BoundExpr {
        let f = self.factory.at(span);
        let (temps, effects, test, replacement) = self.conditional_receiver(receiver);
        self.receivers.push(replacement);
        let access = self.rewrite_expr(access);
        self.receivers.pop();
        let value = f.conditional(test, f.convert(access, ty), f.default_value(ty), ty);
        f.sequence(temps, effects, value)
    }

    /// `receiver?.access;` as a statement.
    fn lower_conditional_access_stmt(&mut self, receiver: BoundExpr, access: BoundExpr, span: Span) -> BoundStmt {
        let f = self.factory.at(span);
        let (temps, effects, test, replacement) = self.conditional_receiver(receiver);
        self.receivers.push(replacement);
        let access = self.rewrite_effect(access);
        self.receivers.pop();
        let mut stmts: Vec<BoundStmt> = effects.into_iter().map(|e| f.stmt(e)).collect();
        stmts.push(f.if_then(test, f.stmt(access), None));
        f.block_with_locals(temps, stmts)
    }

    fn lower_is_pattern(&mut self, operand: BoundExpr, pattern: BoundPattern, span: Span) -> BoundExpr {
        let f = self.factory.at(span);
        let operand = self.rewrite_expr(operand);
        let mut temps = Vec::new();
        let mut effects = Vec::new();
        let operand = self.spill(operand, &mut temps, &mut effects);
        let test = self.lower_pattern(operand, pattern);
        f.sequence(temps, effects, test)
    }

    // ---
    // Loops
    // ---

    fn lower_while(&mut self, condition: BoundExpr, body: BoundStmt, break_label: LabelId, continue_label: LabelId, span: Span) -> BoundStmt {
        let f = self.factory.at(span);
        let start = self.locals.new_label();
        let condition_span = condition.span;
        let condition = self.rewrite_expr(condition);
        let body = self.rewrite_stmt(body);
        f.block(vec![
            f.goto(continue_label),
            f.label(start),
            body,
            f.label(continue_label),
            f.at(condition_span).conditional_goto(condition, true, start),
            f.label(break_label),
        ])
    }

    fn lower_do_while(&mut self, body: BoundStmt, condition: BoundExpr, break_label: LabelId, continue_label: LabelId, span: Span) -> BoundStmt {
        let f = self.factory.at(span);
        let start = self.locals.new_label();
        let condition_span = condition.span;
        let body = self.rewrite_stmt(body);
        let condition = self.rewrite_expr(condition);
        f.block(vec![
            f.label(start),
            body,
            f.label(continue_label),
            f.at(condition_span).conditional_goto(condition, true, start),
            f.label(break_label),
        ])
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_for(
        &mut self,
        locals: Vec<LocalId>,
        init: Vec<BoundStmt>,
        condition: Option<BoundExpr>,
        increments: Vec<BoundExpr>,
        body: BoundStmt,
        break_label: LabelId,
        continue_label: LabelId,
        span: Span,
    ) -> BoundStmt {
        let f = self.factory.at(span);
        let start = self.locals.new_label();
        let check = self.locals.new_label();
        let mut stmts: Vec<BoundStmt> = init.into_iter().map(|s| self.rewrite_stmt(s)).collect();
        stmts.push(f.goto(check));
        stmts.push(f.label(start));
        stmts.push(self.rewrite_stmt(body));
        stmts.push(f.label(continue_label));
        for increment in increments {
            let increment_span = increment.span;
            let increment = self.rewrite_effect(increment);
            stmts.push(f.at(increment_span).stmt(increment));
        }
        stmts.push(f.label(check));
        match condition {
            Some(condition) => {
                let condition_span = condition.span;
                let condition = self.rewrite_expr(condition);
                stmts.push(f.at(condition_span).conditional_goto(condition, true, start));
            }
            None => stmts.push(f.goto(start)),
        }
        stmts.push(f.label(break_label));
        f.block_with_locals(locals, stmts)
    }

    /// `foreach (T x in c) body` over `GetEnumerator`, `MoveNext` and
    /// `Current`.
    #[allow(clippy::too_many_arguments)]
    fn lower_foreach(
        &mut self,
        local: LocalId,
        collection: BoundExpr,
        body: BoundStmt,
        break_label: LabelId,
        continue_label: LabelId,
        span: Span,
    ) -> BoundStmt {
        let table = self.table;
        let f = self.factory.at(span);
        let collection = self.rewrite_expr(collection);
        let collection_args = table
            .types
            .generic_args(collection.ty, GenericKind::IEnumerable)
            .unwrap_or_default();
        let collection_class = table
            .class_of_type(collection.ty)
            .unwrap_or_else(|| unreachable!("foreach over a type without members"));
        let get_enumerator = table
            .find_methods(collection_class, "GetEnumerator")
            .into_iter()
            .find(|&m| table.method(m).params.is_empty())
            .unwrap_or_else(|| unreachable!("foreach collection has no GetEnumerator"));
        let enumerator_ty = table
            .types
            .substitute(table.method(get_enumerator).return_type, &collection_args);
        let enumerator_args = table
            .types
            .generic_args(enumerator_ty, GenericKind::IEnumerator)
            .unwrap_or_default();
        let enumerator_class = table
            .class_of_type(enumerator_ty)
            .unwrap_or_else(|| unreachable!("enumerator type without members"));
        let move_next = table
            .find_methods(enumerator_class, "MoveNext")
            .into_iter()
            .find(|&m| table.method(m).params.is_empty())
            .unwrap_or_else(|| unreachable!("enumerator has no MoveNext"));
        let current = table
            .find_property(enumerator_class, "Current")
            .unwrap_or_else(|| unreachable!("enumerator has no Current"));
        let current_ty = table.types.substitute(table.property(current).ty, &enumerator_args);

        let enumerator = self.temp(enumerator_ty);
        let enumerator_ref = f.local(enumerator, enumerator_ty);
        let start = self.locals.new_label();
        let local_ty = self.locals.ty(local);
        let element = self.property_read(Some(enumerator_ref.clone()), current, current_ty, span);
        let body = self.rewrite_stmt(body);

        f.block_with_locals(
            vec![enumerator],
            vec![
                f.assign_stmt(
                    enumerator_ref.clone(),
                    f.call_typed(Some(collection), get_enumerator, Vec::new(), enumerator_ty),
                ),
                f.goto(continue_label),
                f.label(start),
                f.assign_stmt(f.local(local, local_ty), f.convert(element, local_ty)),
                body,
                f.label(continue_label),
                f.conditional_goto(f.call(Some(enumerator_ref), move_next, Vec::new()), true, start),
                f.label(break_label),
            ],
        )
    }
}

impl BoundTreeRewriter for LocalRewriter<'_, '_> {
    fn rewrite_expr(&mut self, expr: BoundExpr) -> BoundExpr {
        if let Some(constant) = expr.constant.clone() {
            if !matches!(expr.kind, BoundExprKind::Literal(_)) {
                return BoundExpr::literal(constant, expr.ty, expr.span);
            }
        }
        let BoundExpr { kind, ty, constant, span } = expr;
        match kind {
            BoundExprKind::Property { receiver, property } => {
                self.lower_property_read(receiver.map(|r| *r), property, ty, span)
            }
            BoundExprKind::Binary { op: BinaryOperator::StringConcat, left, right } => {
                let left = self.rewrite_expr(*left);
                let right = self.rewrite_expr(*right);
                self.concat(left, right, span)
            }
            BoundExprKind::IncrementDecrement { target, is_increment, is_prefix } => {
                let usage = if is_prefix { ResultUse::NewValue } else { ResultUse::OldValue };
                self.lower_increment(*target, is_increment, usage, span)
            }
            BoundExprKind::CompoundAssignment { op, target, value, operand_type } => {
                self.lower_compound(op, *target, *value, operand_type, ResultUse::NewValue, span)
            }
            BoundExprKind::Assignment { target, value } if matches!(target.kind, BoundExprKind::Property { .. }) => {
                self.lower_property_assignment(*target, *value, ResultUse::NewValue, span)
            }
            BoundExprKind::NullCoalescing { left, right } => self.lower_coalesce(*left, *right, ty, span),
            BoundExprKind::ConditionalAccess { receiver, access } => {
                self.lower_conditional_access(*receiver, *access, ty, span)
            }
            BoundExprKind::ConditionalReceiver => self
                .receivers
                .last()
                .cloned()
                .unwrap_or_else(|| unreachable!("conditional receiver outside of ?.")),
            BoundExprKind::IsPattern { operand, pattern } => self.lower_is_pattern(*operand, *pattern, span),
            kind => rewrite_expr_children(self, BoundExpr { kind, ty, constant, span }),
        }
    }

    fn rewrite_stmt(&mut self, stmt: BoundStmt) -> BoundStmt {
        let BoundStmt { kind, span } = stmt;
        let f = self.factory.at(span);
        match kind {
            BoundStmtKind::Expression(BoundExpr {
                kind: BoundExprKind::ConditionalAccess { receiver, access },
                ..
            }) => self.lower_conditional_access_stmt(*receiver, *access, span),
            BoundStmtKind::Expression(expr) => {
                let expr = self.rewrite_effect(expr);
                f.stmt(expr)
            }
            BoundStmtKind::LocalDeclaration { local, init } => {
                if self.locals.get(local).constant.is_some() {
                    return f.no_op();
                }
                match init {
                    Some(init) => {
                        let ty = self.locals.ty(local);
                        let init = self.rewrite_expr(init);
                        f.assign_stmt(f.local(local, ty), init)
                    }
                    None => f.no_op(),
                }
            }
            BoundStmtKind::While { condition, body, break_label, continue_label } => {
                self.lower_while(condition, *body, break_label, continue_label, span)
            }
            BoundStmtKind::DoWhile { body, condition, break_label, continue_label } => {
                self.lower_do_while(*body, condition, break_label, continue_label, span)
            }
            BoundStmtKind::For { locals, init, condition, increments, body, break_label, continue_label } => {
                self.lower_for(locals, init, condition, increments, *body, break_label, continue_label, span)
            }
            BoundStmtKind::Foreach { local, collection, body, break_label, continue_label, .. } => {
                self.lower_foreach(local, collection, *body, break_label, continue_label, span)
            }
            BoundStmtKind::Match { operand, sections, break_label } => {
                self.lower_match(operand, sections, break_label, span)
            }
            BoundStmtKind::Break(label) | BoundStmtKind::Continue(label) => f.goto(label),
            kind => rewrite_stmt_children(self, BoundStmt { kind, span }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bind_source, method_named};
    use sable_binder::{BoundBlock, BoundTreeWalker};
    use sable_symbols::{ConstantValue, MethodId};

    fn flatten(block: &BoundBlock) -> Vec<&BoundStmt> {
        let mut out = Vec::new();
        for stmt in &block.stmts {
            match &stmt.kind {
                BoundStmtKind::Block(inner) => out.extend(flatten(inner)),
                _ => out.push(stmt),
            }
        }
        out
    }

    /// Every node kind that must be gone after the local rewrite.
    struct HighLevelFinder {
        found: Vec<&'static str>,
    }

    impl BoundTreeWalker for HighLevelFinder {
        fn visit_expr(&mut self, expr: &BoundExpr) {
            let name = match &expr.kind {
                BoundExprKind::Property { .. } => Some("property"),
                BoundExprKind::IncrementDecrement { .. } => Some("increment"),
                BoundExprKind::CompoundAssignment { .. } => Some("compound"),
                BoundExprKind::NullCoalescing { .. } => Some("coalesce"),
                BoundExprKind::ConditionalAccess { .. } => Some("conditional access"),
                BoundExprKind::IsPattern { .. } => Some("pattern"),
                BoundExprKind::Binary { op: BinaryOperator::StringConcat, .. } => Some("concat"),
                _ => None,
            };
            self.found.extend(name);
            sable_binder::visit::visit_expr_children(self, expr);
        }

        fn visit_stmt(&mut self, stmt: &BoundStmt) {
            let name = match &stmt.kind {
                BoundStmtKind::While { .. } => Some("while"),
                BoundStmtKind::DoWhile { .. } => Some("do"),
                BoundStmtKind::For { .. } => Some("for"),
                BoundStmtKind::Foreach { .. } => Some("foreach"),
                BoundStmtKind::Match { .. } => Some("match"),
                BoundStmtKind::Break(_) => Some("break"),
                BoundStmtKind::Continue(_) => Some("continue"),
                BoundStmtKind::LocalDeclaration { .. } => Some("declaration"),
                _ => None,
            };
            self.found.extend(name);
            sable_binder::visit::visit_stmt_children(self, stmt);
        }
    }

    fn lower(source: &str, name: &str) -> (SymbolTable, LoweredMethod, SynthesizedMembers) {
        let (table, methods) = bind_source(source);
        let bound = method_named(&table, &methods, name);
        let mut synthesized = SynthesizedMembers::new();
        let lowered = rewrite_locals(&table, bound, &mut synthesized);
        (table, lowered, synthesized)
    }

    fn high_level_nodes(block: &BoundBlock) -> Vec<&'static str> {
        let mut finder = HighLevelFinder { found: Vec::new() };
        finder.visit_block(block);
        finder.found
    }

    fn calls(block: &BoundBlock) -> Vec<MethodId> {
        struct Calls(Vec<MethodId>);
        impl BoundTreeWalker for Calls {
            fn visit_expr(&mut self, expr: &BoundExpr) {
                if let BoundExprKind::Call { method, .. } = &expr.kind {
                    self.0.push(*method);
                }
                sable_binder::visit::visit_expr_children(self, expr);
            }
        }
        let mut calls = Calls(Vec::new());
        calls.visit_block(block);
        calls.0
    }

    #[test]
    fn test_loops_become_gotos() {
        let (_, lowered, _) = lower(
            "class P { static int M(int n) { int s = 0; while (n > 0) { if (n == 3) break; s += n; n--; } \
             do { s++; } while (s < 10); for (int i = 0; i < 3; i++) { if (i == 1) continue; s += i; } return s; } }",
            "M",
        );
        assert!(high_level_nodes(&lowered.body).is_empty(), "{:?}", high_level_nodes(&lowered.body));
        let stmts = flatten(&lowered.body);
        let labels = stmts.iter().filter(|s| matches!(s.kind, BoundStmtKind::Label(_))).count();
        // while: start, continue, break; do: start, continue, break; for: start, continue, check, break
        assert_eq!(labels, 10);
    }

    #[test]
    fn test_foreach_uses_enumerator_members() {
        let (table, lowered, _) = lower(
            "using System.Collections.Generic; class P { static int Sum(IEnumerable<int> xs) { int s = 0; foreach (var x in xs) s += x; return s; } }",
            "Sum",
        );
        assert!(high_level_nodes(&lowered.body).is_empty());
        let names: Vec<String> = calls(&lowered.body).iter().map(|&m| table.method(m).name.to_string()).collect();
        assert!(names.contains(&"GetEnumerator".to_string()));
        assert!(names.contains(&"MoveNext".to_string()));
        assert!(names.contains(&"get_Current".to_string()));
    }

    #[test]
    fn test_properties_become_accessor_calls() {
        let (table, lowered, _) = lower(
            "class C { public int P { get; set; } } class P { static int M(C c) { c.P = 1; c.P += 2; int old = c.P++; return c.P + old; } }",
            "M",
        );
        assert!(high_level_nodes(&lowered.body).is_empty());
        let names: Vec<String> = calls(&lowered.body).iter().map(|&m| table.method(m).name.to_string()).collect();
        assert_eq!(names.iter().filter(|n| *n == "set_P").count(), 3);
        assert!(names.iter().filter(|n| *n == "get_P").count() >= 3);
    }

    #[test]
    fn test_string_concat_picks_overload() {
        let (table, lowered, _) = lower(
            "class P { static string M(string a, int n) { string s = a + \"x\"; return s + n; } }",
            "M",
        );
        let concats: Vec<_> = calls(&lowered.body)
            .into_iter()
            .map(|m| table.method(m))
            .filter(|m| &*m.name == "Concat")
            .map(|m| m.params[0].ty)
            .collect();
        assert_eq!(concats, vec![TypeId::STRING, TypeId::OBJECT]);
    }

    #[test]
    fn test_coalesce_and_conditional_access() {
        let (_, lowered, _) = lower(
            "class C { public string Name; public C Next; public void Touch() { } } \
             class P { static string M(C c, int? n) { int v = n ?? 5; c?.Next?.Touch(); return c?.Name ?? \"none\"; } }",
            "M",
        );
        assert!(high_level_nodes(&lowered.body).is_empty(), "{:?}", high_level_nodes(&lowered.body));
    }

    #[test]
    fn test_constants_fold_into_literals() {
        let (_, lowered, _) = lower(
            "class P { const int K = 4; static int M() { const int local = K * 2; return local + K; } }",
            "M",
        );
        let stmts = flatten(&lowered.body);
        let ret = stmts
            .iter()
            .find_map(|s| match &s.kind {
                BoundStmtKind::Return(Some(value)) => Some(value),
                _ => None,
            })
            .unwrap();
        assert_eq!(ret.constant, Some(ConstantValue::Int(12)));
        assert!(matches!(ret.kind, BoundExprKind::Literal(_)));
    }
}
