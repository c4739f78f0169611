//! Generic traversals over the bound tree.
//!
//! Lowering passes implement [`BoundTreeRewriter`] and override only the
//! nodes they transform; analyses implement [`BoundTreeWalker`].

use crate::bound::*;

/// A by-value tree transformation.
pub trait BoundTreeRewriter {
    fn rewrite_expr(&mut self, expr: BoundExpr) -> BoundExpr {
        rewrite_expr_children(self, expr)
    }

    fn rewrite_stmt(&mut self, stmt: BoundStmt) -> BoundStmt {
        rewrite_stmt_children(self, stmt)
    }

    fn rewrite_block(&mut self, block: BoundBlock) -> BoundBlock {
        rewrite_block_children(self, block)
    }

    fn rewrite_pattern(&mut self, pattern: BoundPattern) -> BoundPattern {
        rewrite_pattern_children(self, pattern)
    }

    fn rewrite_lambda(&mut self, lambda: BoundLambda) -> BoundLambda {
        BoundLambda {
            body: self.rewrite_block(lambda.body),
            ..lambda
        }
    }
}

fn boxed<R: BoundTreeRewriter + ?Sized>(r: &mut R, expr: Box<BoundExpr>) -> Box<BoundExpr> {
    Box::new(r.rewrite_expr(*expr))
}

fn boxed_opt<R: BoundTreeRewriter + ?Sized>(
    r: &mut R,
    expr: Option<Box<BoundExpr>>,
) -> Option<Box<BoundExpr>> {
    expr.map(|e| boxed(r, e))
}

fn exprs<R: BoundTreeRewriter + ?Sized>(r: &mut R, exprs: Vec<BoundExpr>) -> Vec<BoundExpr> {
    exprs.into_iter().map(|e| r.rewrite_expr(e)).collect()
}

fn stmts<R: BoundTreeRewriter + ?Sized>(r: &mut R, stmts: Vec<BoundStmt>) -> Vec<BoundStmt> {
    stmts.into_iter().map(|s| r.rewrite_stmt(s)).collect()
}

fn boxed_stmt<R: BoundTreeRewriter + ?Sized>(r: &mut R, stmt: Box<BoundStmt>) -> Box<BoundStmt> {
    Box::new(r.rewrite_stmt(*stmt))
}

pub fn rewrite_expr_children<R: BoundTreeRewriter + ?Sized>(r: &mut R, expr: BoundExpr) -> BoundExpr {
    use BoundExprKind::*;
    let BoundExpr {
        kind,
        ty,
        constant,
        span,
    } = expr;
    let kind = match kind {
        Literal(_) | Local(_) | Parameter(_) | This | BaseReference | DefaultValue
        | ConditionalReceiver => kind,
        Field { receiver, field } => Field {
            receiver: boxed_opt(r, receiver),
            field,
        },
        Property { receiver, property } => Property {
            receiver: boxed_opt(r, receiver),
            property,
        },
        Call {
            receiver,
            method,
            args,
            ref_kinds,
            is_virtual,
        } => Call {
            receiver: boxed_opt(r, receiver),
            method,
            args: exprs(r, args),
            ref_kinds,
            is_virtual,
        },
        ObjectCreation {
            constructor,
            args,
            ref_kinds,
        } => ObjectCreation {
            constructor,
            args: exprs(r, args),
            ref_kinds,
        },
        DelegateCreation { method, receiver } => DelegateCreation {
            method,
            receiver: boxed_opt(r, receiver),
        },
        DelegateInvoke { delegate, args } => DelegateInvoke {
            delegate: boxed(r, delegate),
            args: exprs(r, args),
        },
        Lambda(lambda) => Lambda(Box::new(r.rewrite_lambda(*lambda))),
        Unary { op, operand } => Unary {
            op,
            operand: boxed(r, operand),
        },
        Binary { op, left, right } => Binary {
            op,
            left: boxed(r, left),
            right: boxed(r, right),
        },
        IncrementDecrement {
            target,
            is_increment,
            is_prefix,
        } => IncrementDecrement {
            target: boxed(r, target),
            is_increment,
            is_prefix,
        },
        CompoundAssignment {
            op,
            target,
            value,
            operand_type,
        } => CompoundAssignment {
            op,
            target: boxed(r, target),
            value: boxed(r, value),
            operand_type,
        },
        Assignment { target, value } => Assignment {
            target: boxed(r, target),
            value: boxed(r, value),
        },
        Conditional {
            condition,
            when_true,
            when_false,
        } => Conditional {
            condition: boxed(r, condition),
            when_true: boxed(r, when_true),
            when_false: boxed(r, when_false),
        },
        NullCoalescing { left, right } => NullCoalescing {
            left: boxed(r, left),
            right: boxed(r, right),
        },
        Conversion { operand, kind } => Conversion {
            operand: boxed(r, operand),
            kind,
        },
        ConditionalAccess { receiver, access } => ConditionalAccess {
            receiver: boxed(r, receiver),
            access: boxed(r, access),
        },
        IsType { operand, target } => IsType {
            operand: boxed(r, operand),
            target,
        },
        AsType { operand, target } => AsType {
            operand: boxed(r, operand),
            target,
        },
        IsPattern { operand, pattern } => IsPattern {
            operand: boxed(r, operand),
            pattern: Box::new(r.rewrite_pattern(*pattern)),
        },
        Await(operand) => Await(boxed(r, operand)),
        Sequence {
            locals,
            side_effects,
            value,
        } => Sequence {
            locals,
            side_effects: exprs(r, side_effects),
            value: boxed(r, value),
        },
        NullableHasValue(operand) => NullableHasValue(boxed(r, operand)),
        NullableValueOrDefault(operand) => NullableValueOrDefault(boxed(r, operand)),
        Bad(children) => Bad(exprs(r, children)),
    };
    BoundExpr {
        kind,
        ty,
        constant,
        span,
    }
}

pub fn rewrite_pattern_children<R: BoundTreeRewriter + ?Sized>(
    r: &mut R,
    pattern: BoundPattern,
) -> BoundPattern {
    let BoundPattern {
        kind,
        span,
        has_errors,
    } = pattern;
    let kind = match kind {
        BoundPatternKind::Wildcard | BoundPatternKind::Declaration { .. } => kind,
        BoundPatternKind::Constant { value } => BoundPatternKind::Constant {
            value: r.rewrite_expr(value),
        },
        BoundPatternKind::Recursive {
            ty,
            method,
            subpatterns,
            param_indices,
        } => BoundPatternKind::Recursive {
            ty,
            method,
            subpatterns: subpatterns.into_iter().map(|p| r.rewrite_pattern(p)).collect(),
            param_indices,
        },
        BoundPatternKind::Property {
            ty,
            subpatterns,
            properties,
        } => BoundPatternKind::Property {
            ty,
            subpatterns: subpatterns.into_iter().map(|p| r.rewrite_pattern(p)).collect(),
            properties,
        },
    };
    BoundPattern {
        kind,
        span,
        has_errors,
    }
}

pub fn rewrite_block_children<R: BoundTreeRewriter + ?Sized>(r: &mut R, block: BoundBlock) -> BoundBlock {
    BoundBlock {
        locals: block.locals,
        stmts: stmts(r, block.stmts),
        span: block.span,
    }
}

pub fn rewrite_stmt_children<R: BoundTreeRewriter + ?Sized>(r: &mut R, stmt: BoundStmt) -> BoundStmt {
    use BoundStmtKind::*;
    let kind = match stmt.kind {
        Block(block) => Block(r.rewrite_block(block)),
        Expression(expr) => Expression(r.rewrite_expr(expr)),
        LocalDeclaration { local, init } => LocalDeclaration {
            local,
            init: init.map(|e| r.rewrite_expr(e)),
        },
        If {
            condition,
            then_branch,
            else_branch,
        } => If {
            condition: r.rewrite_expr(condition),
            then_branch: boxed_stmt(r, then_branch),
            else_branch: else_branch.map(|s| boxed_stmt(r, s)),
        },
        While {
            condition,
            body,
            break_label,
            continue_label,
        } => While {
            condition: r.rewrite_expr(condition),
            body: boxed_stmt(r, body),
            break_label,
            continue_label,
        },
        DoWhile {
            body,
            condition,
            break_label,
            continue_label,
        } => DoWhile {
            body: boxed_stmt(r, body),
            condition: r.rewrite_expr(condition),
            break_label,
            continue_label,
        },
        For {
            locals,
            init,
            condition,
            increments,
            body,
            break_label,
            continue_label,
        } => For {
            locals,
            init: stmts(r, init),
            condition: condition.map(|c| r.rewrite_expr(c)),
            increments: exprs(r, increments),
            body: boxed_stmt(r, body),
            break_label,
            continue_label,
        },
        Foreach {
            local,
            element_type,
            collection,
            body,
            break_label,
            continue_label,
        } => Foreach {
            local,
            element_type,
            collection: r.rewrite_expr(collection),
            body: boxed_stmt(r, body),
            break_label,
            continue_label,
        },
        Match {
            operand,
            sections,
            break_label,
        } => Match {
            operand: r.rewrite_expr(operand),
            sections: sections
                .into_iter()
                .map(|section| BoundMatchSection {
                    labels: section
                        .labels
                        .into_iter()
                        .map(|label| BoundMatchLabel {
                            pattern: label.pattern.map(|p| r.rewrite_pattern(p)),
                            guard: label.guard.map(|g| r.rewrite_expr(g)),
                            span: label.span,
                        })
                        .collect(),
                    locals: section.locals,
                    stmts: stmts(r, section.stmts),
                    span: section.span,
                })
                .collect(),
            break_label,
        },
        Return(value) => Return(value.map(|e| r.rewrite_expr(e))),
        Throw(value) => Throw(value.map(|e| r.rewrite_expr(e))),
        Try {
            block,
            catches,
            finally,
            is_async_catch,
        } => Try {
            block: r.rewrite_block(block),
            catches: catches
                .into_iter()
                .map(|c| BoundCatch {
                    block: r.rewrite_block(c.block),
                    ..c
                })
                .collect(),
            finally: finally.map(|f| r.rewrite_block(f)),
            is_async_catch,
        },
        YieldReturn(value) => YieldReturn(r.rewrite_expr(value)),
        ConditionalGoto {
            condition,
            jump_if_true,
            label,
        } => ConditionalGoto {
            condition: r.rewrite_expr(condition),
            jump_if_true,
            label,
        },
        SwitchDispatch { value, targets } => SwitchDispatch {
            value: r.rewrite_expr(value),
            targets,
        },
        kind @ (Break(_) | Continue(_) | YieldBreak | Label(_) | Goto(_) | AwaitYieldPoint
        | AwaitResumePoint | NoOp) => kind,
    };
    BoundStmt {
        kind,
        span: stmt.span,
    }
}

/// A read-only traversal.
pub trait BoundTreeWalker {
    fn visit_expr(&mut self, expr: &BoundExpr) {
        visit_expr_children(self, expr);
    }

    fn visit_stmt(&mut self, stmt: &BoundStmt) {
        visit_stmt_children(self, stmt);
    }

    fn visit_block(&mut self, block: &BoundBlock) {
        for stmt in &block.stmts {
            self.visit_stmt(stmt);
        }
    }

    fn visit_pattern(&mut self, pattern: &BoundPattern) {
        visit_pattern_children(self, pattern);
    }

    fn visit_lambda(&mut self, lambda: &BoundLambda) {
        self.visit_block(&lambda.body);
    }
}

pub fn visit_expr_children<W: BoundTreeWalker + ?Sized>(w: &mut W, expr: &BoundExpr) {
    use BoundExprKind::*;
    match &expr.kind {
        Literal(_) | Local(_) | Parameter(_) | This | BaseReference | DefaultValue
        | ConditionalReceiver => {}
        Field { receiver, .. } | Property { receiver, .. } | DelegateCreation { receiver, .. } => {
            if let Some(receiver) = receiver {
                w.visit_expr(receiver);
            }
        }
        Call { receiver, args, .. } => {
            if let Some(receiver) = receiver {
                w.visit_expr(receiver);
            }
            for arg in args {
                w.visit_expr(arg);
            }
        }
        ObjectCreation { args, .. } | Bad(args) => {
            for arg in args {
                w.visit_expr(arg);
            }
        }
        DelegateInvoke { delegate, args } => {
            w.visit_expr(delegate);
            for arg in args {
                w.visit_expr(arg);
            }
        }
        Lambda(lambda) => w.visit_lambda(lambda),
        Unary { operand, .. }
        | IncrementDecrement {
            target: operand, ..
        }
        | Conversion { operand, .. }
        | IsType { operand, .. }
        | AsType { operand, .. }
        | Await(operand)
        | NullableHasValue(operand)
        | NullableValueOrDefault(operand) => w.visit_expr(operand),
        Binary { left, right, .. }
        | NullCoalescing { left, right }
        | CompoundAssignment {
            target: left,
            value: right,
            ..
        }
        | Assignment {
            target: left,
            value: right,
        }
        | ConditionalAccess {
            receiver: left,
            access: right,
        } => {
            w.visit_expr(left);
            w.visit_expr(right);
        }
        Conditional {
            condition,
            when_true,
            when_false,
        } => {
            w.visit_expr(condition);
            w.visit_expr(when_true);
            w.visit_expr(when_false);
        }
        IsPattern { operand, pattern } => {
            w.visit_expr(operand);
            w.visit_pattern(pattern);
        }
        Sequence {
            side_effects,
            value,
            ..
        } => {
            for e in side_effects {
                w.visit_expr(e);
            }
            w.visit_expr(value);
        }
    }
}

pub fn visit_pattern_children<W: BoundTreeWalker + ?Sized>(w: &mut W, pattern: &BoundPattern) {
    match &pattern.kind {
        BoundPatternKind::Wildcard | BoundPatternKind::Declaration { .. } => {}
        BoundPatternKind::Constant { value } => w.visit_expr(value),
        BoundPatternKind::Recursive { subpatterns, .. }
        | BoundPatternKind::Property { subpatterns, .. } => {
            for sub in subpatterns {
                w.visit_pattern(sub);
            }
        }
    }
}

pub fn visit_stmt_children<W: BoundTreeWalker + ?Sized>(w: &mut W, stmt: &BoundStmt) {
    use BoundStmtKind::*;
    match &stmt.kind {
        Block(block) => w.visit_block(block),
        Expression(expr) | YieldReturn(expr) => w.visit_expr(expr),
        LocalDeclaration { init, .. } => {
            if let Some(init) = init {
                w.visit_expr(init);
            }
        }
        If {
            condition,
            then_branch,
            else_branch,
        } => {
            w.visit_expr(condition);
            w.visit_stmt(then_branch);
            if let Some(else_branch) = else_branch {
                w.visit_stmt(else_branch);
            }
        }
        While { condition, body, .. } | DoWhile { body, condition, .. } => {
            w.visit_expr(condition);
            w.visit_stmt(body);
        }
        For {
            init,
            condition,
            increments,
            body,
            ..
        } => {
            for s in init {
                w.visit_stmt(s);
            }
            if let Some(condition) = condition {
                w.visit_expr(condition);
            }
            for e in increments {
                w.visit_expr(e);
            }
            w.visit_stmt(body);
        }
        Foreach {
            collection, body, ..
        } => {
            w.visit_expr(collection);
            w.visit_stmt(body);
        }
        Match {
            operand, sections, ..
        } => {
            w.visit_expr(operand);
            for section in sections {
                for label in &section.labels {
                    if let Some(pattern) = &label.pattern {
                        w.visit_pattern(pattern);
                    }
                    if let Some(guard) = &label.guard {
                        w.visit_expr(guard);
                    }
                }
                for s in &section.stmts {
                    w.visit_stmt(s);
                }
            }
        }
        Return(value) | Throw(value) => {
            if let Some(value) = value {
                w.visit_expr(value);
            }
        }
        Try {
            block,
            catches,
            finally,
            ..
        } => {
            w.visit_block(block);
            for c in catches {
                w.visit_block(&c.block);
            }
            if let Some(finally) = finally {
                w.visit_block(finally);
            }
        }
        ConditionalGoto { condition, .. } => w.visit_expr(condition),
        SwitchDispatch { value, .. } => w.visit_expr(value),
        Break(_) | Continue(_) | YieldBreak | Label(_) | Goto(_) | AwaitYieldPoint
        | AwaitResumePoint | NoOp => {}
    }
}
