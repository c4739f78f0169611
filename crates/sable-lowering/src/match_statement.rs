//! Lowering of `switch` statements into if-chains.
//!
//! Each section becomes `if (label1 || label2 ...) { stmts }` where a label
//! is `pattern && guard`. A section with a `default` label becomes the final
//! `else`; if it also has case labels they stay at the section's place in the
//! chain, as `if (labels) goto entry`, with `entry` opening the `else`. The
//! statements of a section stop at its first top-level `break`; anything
//! after it is dropped. Nested breaks jump to the break label, which is
//! emitted after the chain.

use sable_binder::{BoundExpr, BoundMatchSection, BoundStmt, BoundStmtKind, BoundTreeRewriter, LabelId};
use sable_lexer::Span;

use crate::local_rewriter::LocalRewriter;

impl LocalRewriter<'_, '_> {
    pub(crate) fn lower_match(
        &mut self,
        operand: BoundExpr,
        sections: Vec<BoundMatchSection>,
        break_label: LabelId,
        span: Span,
    ) -> BoundStmt {
        let f = self.factory.at(span);
        let operand = self.rewrite_expr(operand);
        let mut locals = Vec::new();
        let mut stmts = Vec::new();
        let operand = if operand.is_trivial() {
            operand
        } else {
            let temp = self.temp(operand.ty);
            locals.push(temp);
            let local = f.local(temp, operand.ty);
            stmts.push(f.assign_stmt(local.clone(), operand));
            local
        };

        let mut default_block = None;
        let mut tests = Vec::new();
        for section in sections {
            locals.extend(section.locals.iter().copied());
            let section_f = f.at(section.span);
            let has_default = section.labels.iter().any(|l| l.is_default());

            let mut condition: Option<BoundExpr> = None;
            for label in section.labels {
                let Some(pattern) = label.pattern else { continue };
                let mut test = self.lower_pattern(operand.clone(), pattern);
                if let Some(guard) = label.guard {
                    let guard = self.rewrite_expr(guard);
                    test = f.at(label.span).and(test, guard);
                }
                condition = Some(match condition {
                    Some(previous) => f.or(previous, test),
                    None => test,
                });
            }

            let mut body: Vec<BoundStmt> = truncate_at_break(section.stmts)
                .into_iter()
                .map(|s| self.rewrite_stmt(s))
                .collect();
            if !has_default {
                tests.push((condition.unwrap_or_else(|| f.bool(false)), section_f.block(body), section.span));
                continue;
            }
            if let Some(condition) = condition {
                let entry = self.locals.new_label();
                tests.push((condition, section_f.goto(entry), section.span));
                body.insert(0, section_f.label(entry));
            }
            default_block = Some(section_f.block(body));
        }

        let mut chain = default_block;
        for (condition, block, section_span) in tests.into_iter().rev() {
            chain = Some(f.at(section_span).if_then(condition, block, chain));
        }
        stmts.extend(chain);
        stmts.push(f.label(break_label));
        f.block_with_locals(locals, stmts)
    }
}

/// The statements before the first top-level `break`.
fn truncate_at_break(mut stmts: Vec<BoundStmt>) -> Vec<BoundStmt> {
    if let Some(index) = stmts.iter().position(|s| matches!(s.kind, BoundStmtKind::Break(_))) {
        stmts.truncate(index);
    }
    stmts
}

#[cfg(test)]
mod tests {
    use sable_binder::{BinaryOperator, BoundBlock, BoundExprKind};
    use sable_symbols::{ConstantValue, TypeId};

    use super::*;
    use crate::local_rewriter::rewrite_locals;
    use crate::test_support::{bind_source, method_named};
    use crate::SynthesizedMembers;

    fn lower_switch(body: &str) -> BoundBlock {
        let source = format!("class P {{ static int M(int n, object o) {{ int r = 0; {} return r; }} }}", body);
        let (table, methods) = bind_source(&source);
        let bound = method_named(&table, &methods, "M");
        let mut synthesized = SynthesizedMembers::new();
        let lowered = rewrite_locals(&table, bound, &mut synthesized);
        // The switch is the second statement
        match lowered.body.stmts.into_iter().nth(1).map(|s| s.kind) {
            Some(BoundStmtKind::Block(block)) => block,
            other => panic!("expected the lowered switch, got {:?}", other),
        }
    }

    /// `(condition, then, else)` of an if statement.
    fn as_if(stmt: &BoundStmt) -> (&BoundExpr, &BoundStmt, Option<&BoundStmt>) {
        match &stmt.kind {
            BoundStmtKind::If { condition, then_branch, else_branch } => {
                (condition, then_branch, else_branch.as_deref())
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    fn block_len(stmt: &BoundStmt) -> usize {
        match &stmt.kind {
            BoundStmtKind::Block(block) => block.stmts.len(),
            other => panic!("expected block, got {:?}", other),
        }
    }

    fn compared_constant(condition: &BoundExpr) -> Option<i64> {
        match &condition.kind {
            BoundExprKind::Binary { op: BinaryOperator::Eq, right, .. } => right.constant.as_ref().and_then(ConstantValue::as_i64),
            _ => None,
        }
    }

    #[test]
    fn test_sections_nest_right_to_left() {
        let block = lower_switch("switch (n) { case 1: r = 10; break; case 2: r = 20; break; case 3: r = 30; break; }");
        let (first, _, rest) = as_if(&block.stmts[0]);
        assert_eq!(compared_constant(first), Some(1));
        let (second, _, rest) = as_if(rest.unwrap());
        assert_eq!(compared_constant(second), Some(2));
        let (third, _, rest) = as_if(rest.unwrap());
        assert_eq!(compared_constant(third), Some(3));
        assert!(rest.is_none());
        assert!(matches!(block.stmts.last().unwrap().kind, BoundStmtKind::Label(_)));
    }

    #[test]
    fn test_statements_after_break_are_dropped() {
        let block = lower_switch("switch (n) { case 1: break; case 2: return 2; default: r = 5; break; }");
        let (_, first, rest) = as_if(&block.stmts[0]);
        assert_eq!(block_len(first), 0);
        let (_, second, default) = as_if(rest.unwrap());
        assert!(matches!(
            &second.kind,
            BoundStmtKind::Block(b) if matches!(b.stmts[0].kind, BoundStmtKind::Return(_))
        ));
        assert_eq!(block_len(default.unwrap()), 1);
    }

    #[test]
    fn test_labels_in_one_section_are_ored() {
        let block = lower_switch("switch (n) { case 1: case 2: r = 1; break; default: r = 2; break; }");
        let (condition, _, default) = as_if(&block.stmts[0]);
        assert!(matches!(
            condition.kind,
            BoundExprKind::Binary { op: BinaryOperator::LogicalOr, .. }
        ));
        assert!(default.is_some());
    }

    #[test]
    fn test_case_labels_beside_default_keep_their_place() {
        let block = lower_switch(
            "switch (n) { case 1: r = 1; break; case 2: default: r = 2; break; case 3: r = 3; break; }",
        );
        let (first, _, rest) = as_if(&block.stmts[0]);
        assert_eq!(compared_constant(first), Some(1));
        let (second, jump, rest) = as_if(rest.unwrap());
        assert_eq!(compared_constant(second), Some(2));
        let BoundStmtKind::Goto(entry) = jump.kind else {
            panic!("expected a jump to the default block, got {:?}", jump.kind);
        };
        let (third, _, default) = as_if(rest.unwrap());
        assert_eq!(compared_constant(third), Some(3));
        let BoundStmtKind::Block(default) = &default.unwrap().kind else {
            panic!("expected the default block");
        };
        assert!(matches!(default.stmts[0].kind, BoundStmtKind::Label(l) if l == entry));
        assert_eq!(default.stmts.len(), 2);
    }

    #[test]
    fn test_guard_is_anded_and_operand_spilled() {
        let block = lower_switch("switch (o) { case int i when i > 3: r = i; break; case string s: r = 1; break; }");
        // `o` is a parameter, so no temp is needed; the pattern locals are scoped here
        assert_eq!(block.locals.len(), 2);
        let (condition, _, _) = as_if(&block.stmts[0]);
        let BoundExprKind::Binary { op: BinaryOperator::LogicalAnd, right, .. } = &condition.kind else {
            panic!("expected a guarded test");
        };
        assert_eq!(right.ty, TypeId::BOOL);
        assert!(matches!(right.kind, BoundExprKind::Binary { op: BinaryOperator::Gt, .. }));
    }
}
