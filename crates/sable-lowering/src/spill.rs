//! Brings every `await` of an async body to statement level.
//!
//! After spilling, an `await` only appears as `await x;` or `t = await x;`
//! with `t` a temporary and `x` free of awaits. Operands evaluated before
//! an await are stored in temporaries first, so evaluation order is kept
//! across the suspension. `&&`, `||` and `?:` whose later operands await
//! become if statements.

use sable_binder::visit::visit_expr_children;
use sable_binder::{
    BinaryOperator, BoundBlock, BoundExpr, BoundExprKind, BoundLambda, BoundStmt, BoundStmtKind,
    BoundTreeWalker, LocalId, LocalTable,
};
use sable_symbols::{RefKind, TypeId};

use crate::factory::SyntheticFactory;

/// Finds `await` outside nested lambdas.
#[derive(Default)]
struct AwaitFinder {
    found: bool,
}

impl BoundTreeWalker for AwaitFinder {
    fn visit_expr(&mut self, expr: &BoundExpr) {
        if self.found {
            return;
        }
        if matches!(expr.kind, BoundExprKind::Await(_)) {
            self.found = true;
            return;
        }
        visit_expr_children(self, expr);
    }

    fn visit_lambda(&mut self, _: &BoundLambda) {}
}

pub(crate) fn expr_contains_await(expr: &BoundExpr) -> bool {
    let mut finder = AwaitFinder::default();
    finder.visit_expr(expr);
    finder.found
}

pub(crate) fn stmt_contains_await(stmt: &BoundStmt) -> bool {
    let mut finder = AwaitFinder::default();
    finder.visit_stmt(stmt);
    finder.found
}

pub(crate) fn block_contains_await(block: &BoundBlock) -> bool {
    let mut finder = AwaitFinder::default();
    finder.visit_block(block);
    finder.found
}

pub(crate) struct Spiller<'a, 'l> {
    factory: SyntheticFactory<'a>,
    locals: &'l mut LocalTable,
    /// Temporaries to declare in the block being spilled
    temps: Vec<LocalId>,
}

impl<'a, 'l> Spiller<'a, 'l> {
    pub(crate) fn new(factory: SyntheticFactory<'a>, locals: &'l mut LocalTable) -> Self {
        Self {
            factory,
            locals,
            temps: Vec::new(),
        }
    }

    fn temp(&mut self, ty: TypeId) -> LocalId {
        let temp = self.locals.temp(ty);
        self.temps.push(temp);
        temp
    }

    pub(crate) fn spill_block(&mut self, block: BoundBlock) -> BoundBlock {
        let outer = std::mem::take(&mut self.temps);
        let mut stmts = Vec::with_capacity(block.stmts.len());
        for stmt in block.stmts {
            self.spill_stmt(stmt, &mut stmts);
        }
        let mut locals = block.locals;
        locals.append(&mut self.temps);
        self.temps = outer;
        BoundBlock {
            locals,
            stmts,
            span: block.span,
        }
    }

    fn spill_single(&mut self, stmt: BoundStmt) -> BoundStmt {
        let span = stmt.span;
        let mut out = Vec::new();
        self.spill_stmt(stmt, &mut out);
        if out.len() == 1 {
            out.pop().unwrap_or_else(|| unreachable!())
        } else {
            BoundStmt::block(BoundBlock::new(out, span))
        }
    }

    fn spill_stmt(&mut self, stmt: BoundStmt, out: &mut Vec<BoundStmt>) {
        let span = stmt.span;
        if !stmt_contains_await(&stmt) {
            out.push(stmt);
            return;
        }
        let f = self.factory.at(span);
        match stmt.kind {
            BoundStmtKind::Block(block) => out.push(BoundStmt::block(self.spill_block(block))),
            BoundStmtKind::Expression(expr) => self.spill_effect(expr, out),
            BoundStmtKind::Return(Some(value)) => {
                let value = self.spill_expr(value, out);
                out.push(f.ret(Some(value)));
            }
            BoundStmtKind::Throw(Some(value)) => {
                let value = self.spill_expr(value, out);
                out.push(f.throw(value));
            }
            BoundStmtKind::If { condition, then_branch, else_branch } => {
                let condition = self.spill_expr(condition, out);
                let then_branch = self.spill_single(*then_branch);
                let else_branch = else_branch.map(|s| self.spill_single(*s));
                out.push(f.if_then(condition, then_branch, else_branch));
            }
            BoundStmtKind::ConditionalGoto { condition, jump_if_true, label } => {
                let condition = self.spill_expr(condition, out);
                out.push(f.conditional_goto(condition, jump_if_true, label));
            }
            BoundStmtKind::Try { block, catches, finally, is_async_catch } => {
                let block = self.spill_block(block);
                let catches = catches
                    .into_iter()
                    .map(|c| sable_binder::BoundCatch {
                        block: self.spill_block(c.block),
                        ..c
                    })
                    .collect();
                let finally = finally.map(|b| self.spill_block(b));
                out.push(BoundStmt::new(
                    BoundStmtKind::Try { block, catches, finally, is_async_catch },
                    span,
                ));
            }
            kind => unreachable!("await in unlowered statement {:?}", kind),
        }
    }

    /// Spill an expression whose value is discarded.
    fn spill_effect(&mut self, expr: BoundExpr, out: &mut Vec<BoundStmt>) {
        let f = self.factory.at(expr.span);
        let BoundExpr { kind, ty, constant, span } = expr;
        match kind {
            BoundExprKind::Await(operand) => {
                let operand = self.spill_expr(*operand, out);
                out.push(f.stmt(BoundExpr::new(BoundExprKind::Await(Box::new(operand)), ty, span)));
            }
            BoundExprKind::Sequence { locals, side_effects, value } => {
                self.temps.extend(locals);
                for effect in side_effects {
                    self.spill_effect(effect, out);
                }
                self.spill_effect(*value, out);
            }
            kind => {
                let expr = self.spill_expr(BoundExpr { kind, ty, constant, span }, out);
                if !expr.is_trivial() {
                    out.push(f.stmt(expr));
                }
            }
        }
    }

    /// Spill `expr`, pushing the statements that must run first to `out`.
    fn spill_expr(&mut self, expr: BoundExpr, out: &mut Vec<BoundStmt>) -> BoundExpr {
        if !expr_contains_await(&expr) {
            return expr;
        }
        let f = self.factory.at(expr.span);
        let BoundExpr { kind, ty, constant, span } = expr;
        let rebuild = |kind| BoundExpr { kind, ty, constant: None, span };
        debug_assert!(constant.is_none());
        match kind {
            BoundExprKind::Await(operand) => {
                assert!(ty != TypeId::VOID, "void await in value position");
                let operand = self.spill_expr(*operand, out);
                let temp = self.temp(ty);
                let awaited = BoundExpr::new(BoundExprKind::Await(Box::new(operand)), ty, span);
                out.push(f.assign_stmt(f.local(temp, ty), awaited));
                f.local(temp, ty)
            }
            BoundExprKind::Sequence { locals, side_effects, value } => {
                self.temps.extend(locals);
                for effect in side_effects {
                    self.spill_effect(effect, out);
                }
                self.spill_expr(*value, out)
            }
            BoundExprKind::Binary { op: op @ (BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr), left, right } => {
                let left = self.spill_expr(*left, out);
                let result = self.temp(TypeId::BOOL);
                let result_ref = f.local(result, TypeId::BOOL);
                out.push(f.assign_stmt(result_ref.clone(), left));
                let mut inner = Vec::new();
                let right = self.spill_expr(*right, &mut inner);
                inner.push(f.assign_stmt(result_ref.clone(), right));
                let test = if op == BinaryOperator::LogicalAnd {
                    result_ref.clone()
                } else {
                    f.not(result_ref.clone())
                };
                out.push(f.if_then(test, f.block(inner), None));
                result_ref
            }
            BoundExprKind::Conditional { condition, when_true, when_false } => {
                let condition = self.spill_expr(*condition, out);
                let result = self.temp(ty);
                let result_ref = f.local(result, ty);
                let mut then_stmts = Vec::new();
                let when_true = self.spill_expr(*when_true, &mut then_stmts);
                then_stmts.push(f.assign_stmt(result_ref.clone(), when_true));
                let mut else_stmts = Vec::new();
                let when_false = self.spill_expr(*when_false, &mut else_stmts);
                else_stmts.push(f.assign_stmt(result_ref.clone(), when_false));
                out.push(f.if_then(condition, f.block(then_stmts), Some(f.block(else_stmts))));
                result_ref
            }
            BoundExprKind::Binary { op, left, right } => {
                let mut operands = self.spill_operands(vec![*left, *right], &[], out).into_iter();
                let (left, right) = (next(&mut operands), next(&mut operands));
                rebuild(BoundExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            BoundExprKind::Call { receiver, method, args, ref_kinds, is_virtual } => {
                let has_receiver = receiver.is_some();
                let mut operands: Vec<BoundExpr> = receiver.map(|r| *r).into_iter().collect();
                let mut kinds = vec![RefKind::None; operands.len()];
                operands.extend(args);
                kinds.extend(ref_kinds.iter().copied());
                let mut operands = self.spill_operands(operands, &kinds, out).into_iter();
                let receiver = has_receiver.then(|| Box::new(next(&mut operands)));
                rebuild(BoundExprKind::Call {
                    receiver,
                    method,
                    args: operands.collect(),
                    ref_kinds,
                    is_virtual,
                })
            }
            BoundExprKind::ObjectCreation { constructor, args, ref_kinds } => {
                let args = self.spill_operands(args, &ref_kinds, out);
                rebuild(BoundExprKind::ObjectCreation { constructor, args, ref_kinds })
            }
            BoundExprKind::DelegateInvoke { delegate, args } => {
                let mut operands = vec![*delegate];
                operands.extend(args);
                let mut operands = self.spill_operands(operands, &[], out).into_iter();
                let delegate = Box::new(next(&mut operands));
                rebuild(BoundExprKind::DelegateInvoke {
                    delegate,
                    args: operands.collect(),
                })
            }
            BoundExprKind::Assignment { target, value } => {
                let target = *target;
                match target.kind {
                    BoundExprKind::Field { receiver: Some(receiver), field } => {
                        let mut operands = self.spill_operands(vec![*receiver, *value], &[], out).into_iter();
                        let receiver = next(&mut operands);
                        let value = next(&mut operands);
                        let target = BoundExpr::new(
                            BoundExprKind::Field {
                                receiver: Some(Box::new(receiver)),
                                field,
                            },
                            target.ty,
                            target.span,
                        );
                        rebuild(BoundExprKind::Assignment {
                            target: Box::new(target),
                            value: Box::new(value),
                        })
                    }
                    _ => {
                        let value = self.spill_expr(*value, out);
                        rebuild(BoundExprKind::Assignment {
                            target: Box::new(target),
                            value: Box::new(value),
                        })
                    }
                }
            }
            BoundExprKind::Field { receiver: Some(receiver), field } => {
                let receiver = self.spill_expr(*receiver, out);
                rebuild(BoundExprKind::Field {
                    receiver: Some(Box::new(receiver)),
                    field,
                })
            }
            BoundExprKind::DelegateCreation { method, receiver: Some(receiver) } => {
                let receiver = self.spill_expr(*receiver, out);
                rebuild(BoundExprKind::DelegateCreation {
                    method,
                    receiver: Some(Box::new(receiver)),
                })
            }
            BoundExprKind::Unary { op, operand } => {
                let operand = Box::new(self.spill_expr(*operand, out));
                rebuild(BoundExprKind::Unary { op, operand })
            }
            BoundExprKind::Conversion { operand, kind } => {
                let operand = Box::new(self.spill_expr(*operand, out));
                rebuild(BoundExprKind::Conversion { operand, kind })
            }
            BoundExprKind::IsType { operand, target } => {
                let operand = Box::new(self.spill_expr(*operand, out));
                rebuild(BoundExprKind::IsType { operand, target })
            }
            BoundExprKind::AsType { operand, target } => {
                let operand = Box::new(self.spill_expr(*operand, out));
                rebuild(BoundExprKind::AsType { operand, target })
            }
            BoundExprKind::NullableHasValue(operand) => {
                rebuild(BoundExprKind::NullableHasValue(Box::new(self.spill_expr(*operand, out))))
            }
            BoundExprKind::NullableValueOrDefault(operand) => {
                rebuild(BoundExprKind::NullableValueOrDefault(Box::new(self.spill_expr(*operand, out))))
            }
            kind => unreachable!("await in unlowered expression {:?}", kind),
        }
    }

    /// Spill a left-to-right operand list: operands before the last one
    /// containing an await are evaluated into temporaries first.
    fn spill_operands(&mut self, operands: Vec<BoundExpr>, ref_kinds: &[RefKind], out: &mut Vec<BoundStmt>) -> Vec<BoundExpr> {
        let Some(last) = operands.iter().rposition(expr_contains_await) else {
            return operands;
        };
        let offset = operands.len() - ref_kinds.len().min(operands.len());
        let mut result = Vec::with_capacity(operands.len());
        for (index, operand) in operands.into_iter().enumerate() {
            let by_ref = index >= offset && ref_kinds.get(index - offset).is_some_and(|k| *k != RefKind::None);
            if index < last && !by_ref && !is_stable(&operand) {
                let f = self.factory.at(operand.span);
                let ty = operand.ty;
                let temp = self.temp(ty);
                out.push(f.assign_stmt(f.local(temp, ty), operand));
                result.push(f.local(temp, ty));
            } else if index <= last {
                result.push(self.spill_expr(operand, out));
            } else {
                result.push(operand);
            }
        }
        result
    }
}

/// Values an await cannot change.
fn is_stable(expr: &BoundExpr) -> bool {
    expr.constant.is_some()
        || matches!(
            expr.kind,
            BoundExprKind::This | BoundExprKind::BaseReference | BoundExprKind::DefaultValue | BoundExprKind::Literal(_)
        )
}

fn next(operands: &mut impl Iterator<Item = BoundExpr>) -> BoundExpr {
    operands.next().unwrap_or_else(|| unreachable!("operand count changed while spilling"))
}

#[cfg(test)]
mod tests {
    use sable_lexer::Span;
    use sable_symbols::{MethodId, SymbolTable};

    use super::*;

    /// Checks that every await is in one of the two statement forms.
    struct FormChecker {
        awaits: usize,
    }

    impl FormChecker {
        fn check(&mut self, block: &BoundBlock) {
            for stmt in &block.stmts {
                self.check_stmt(stmt);
            }
        }

        fn check_stmt(&mut self, stmt: &BoundStmt) {
            match &stmt.kind {
                BoundStmtKind::Expression(BoundExpr { kind: BoundExprKind::Await(operand), .. }) => {
                    assert!(!expr_contains_await(operand));
                    self.awaits += 1;
                }
                BoundStmtKind::Expression(BoundExpr {
                    kind: BoundExprKind::Assignment { target, value },
                    ..
                }) if matches!(value.kind, BoundExprKind::Await(_)) => {
                    assert!(matches!(target.kind, BoundExprKind::Local(_)));
                    let BoundExprKind::Await(operand) = &value.kind else { unreachable!() };
                    assert!(!expr_contains_await(operand));
                    self.awaits += 1;
                }
                BoundStmtKind::Block(block) => self.check(block),
                BoundStmtKind::If { condition, then_branch, else_branch } => {
                    assert!(!expr_contains_await(condition));
                    self.check_stmt(then_branch);
                    if let Some(e) = else_branch {
                        self.check_stmt(e);
                    }
                }
                _ => assert!(!stmt_contains_await(stmt), "misplaced await in {:?}", stmt.kind),
            }
        }
    }

    fn task_call(table: &SymbolTable, ty: TypeId) -> BoundExpr {
        let task = table.types.generic(sable_symbols::GenericKind::Task, vec![ty]);
        let call = BoundExpr::new(
            BoundExprKind::Call {
                receiver: None,
                method: MethodId(0),
                args: Vec::new(),
                ref_kinds: Vec::new(),
                is_virtual: false,
            },
            task,
            Span::dummy(),
        );
        BoundExpr::new(BoundExprKind::Await(Box::new(call)), ty, Span::dummy())
    }

    fn spill(table: &SymbolTable, locals: &mut LocalTable, stmts: Vec<BoundStmt>) -> BoundBlock {
        let f = SyntheticFactory::new(table, Span::dummy());
        Spiller::new(f, locals).spill_block(BoundBlock::new(stmts, Span::dummy()))
    }

    #[test]
    fn test_earlier_operands_are_saved() {
        let table = SymbolTable::new();
        let f = SyntheticFactory::new(&table, Span::dummy());
        let mut locals = LocalTable::new();
        let x = locals.temp(TypeId::INT);
        // return x + await t;
        let sum = f.binary(BinaryOperator::Add, f.local(x, TypeId::INT), task_call(&table, TypeId::INT), TypeId::INT);
        let block = spill(&table, &mut locals, vec![f.ret(Some(sum))]);
        let mut checker = FormChecker { awaits: 0 };
        checker.check(&block);
        assert_eq!(checker.awaits, 1);
        // x is saved, then the await result is stored
        assert_eq!(block.stmts.len(), 3);
        assert_eq!(block.locals.len(), 2);
    }

    #[test]
    fn test_short_circuit_becomes_if() {
        let table = SymbolTable::new();
        let f = SyntheticFactory::new(&table, Span::dummy());
        let mut locals = LocalTable::new();
        let flag = locals.temp(TypeId::BOOL);
        let test = f.and(f.local(flag, TypeId::BOOL), task_call(&table, TypeId::BOOL));
        let block = spill(&table, &mut locals, vec![f.if_then(test, f.ret(None), None)]);
        let mut checker = FormChecker { awaits: 0 };
        checker.check(&block);
        assert_eq!(checker.awaits, 1);
        assert!(block
            .stmts
            .iter()
            .any(|s| matches!(&s.kind, BoundStmtKind::If { then_branch, .. } if stmt_contains_await(then_branch))));
    }

    #[test]
    fn test_discarded_await_stays_a_statement() {
        let table = SymbolTable::new();
        let mut locals = LocalTable::new();
        let await_void = {
            let mut expr = task_call(&table, TypeId::INT);
            expr.ty = TypeId::VOID;
            expr
        };
        let block = spill(&table, &mut locals, vec![BoundStmt::expression(await_void)]);
        assert_eq!(block.stmts.len(), 1);
        assert!(block.locals.is_empty());
    }
}
