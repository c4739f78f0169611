//! Statement binding.

use sable_lexer::Span;
use sable_parser::{Block, CatchClause, Expr, Stmt, StmtKind, SwitchLabelKind, SwitchSection, TypeSyntax, VariableDeclarator};
use sable_symbols::{ErrorCode, GenericKind, SymbolLookup, TypeId};

use crate::binder::{Breakable, MethodBinder};
use crate::bound::*;
use crate::candidates::TypeCandidates;
use crate::patterns::PatternContext;

/// Whether a statement list contains `yield`, not counting lambda bodies.
pub(crate) fn contains_yield(stmts: &[Stmt]) -> bool {
    stmts.iter().any(stmt_contains_yield)
}

fn stmt_contains_yield(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::YieldReturn(_) | StmtKind::YieldBreak => true,
        StmtKind::Block(block) => contains_yield(&block.stmts),
        StmtKind::If { then_branch, else_branch, .. } => {
            stmt_contains_yield(then_branch) || else_branch.as_deref().is_some_and(stmt_contains_yield)
        }
        StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } | StmtKind::Foreach { body, .. } => {
            stmt_contains_yield(body)
        }
        StmtKind::For { init, body, .. } => contains_yield(init) || stmt_contains_yield(body),
        StmtKind::Switch { sections, .. } => sections.iter().any(|s| contains_yield(&s.stmts)),
        StmtKind::Try { block, catches, finally } => {
            contains_yield(&block.stmts)
                || catches.iter().any(|c| contains_yield(&c.block.stmts))
                || finally.as_ref().is_some_and(|f| contains_yield(&f.stmts))
        }
        _ => false,
    }
}

/// Expressions allowed as statements.
fn is_statement_expression(expr: &BoundExpr) -> bool {
    match &expr.kind {
        BoundExprKind::Assignment { .. }
        | BoundExprKind::CompoundAssignment { .. }
        | BoundExprKind::IncrementDecrement { .. }
        | BoundExprKind::Call { .. }
        | BoundExprKind::ObjectCreation { .. }
        | BoundExprKind::DelegateInvoke { .. }
        | BoundExprKind::Await(_)
        | BoundExprKind::Bad(_) => true,
        BoundExprKind::ConditionalAccess { access, .. } => is_statement_expression(access),
        // `new S()` of a value type binds to its default value
        BoundExprKind::DefaultValue => true,
        _ => false,
    }
}

impl MethodBinder<'_, '_> {
    pub(crate) fn bind_block(&mut self, block: &Block) -> BoundBlock {
        self.push_scope();
        let stmts = block.stmts.iter().map(|s| self.bind_stmt(s)).collect();
        let locals = self.pop_scope();
        BoundBlock {
            locals,
            stmts,
            span: block.span,
        }
    }

    /// A statement in its own scope, as the body of `if` or a loop.
    fn bind_embedded(&mut self, stmt: &Stmt) -> BoundStmt {
        self.push_scope();
        let bound = self.bind_stmt(stmt);
        let locals = self.pop_scope();
        if locals.is_empty() {
            bound
        } else {
            let span = bound.span;
            BoundStmt::block(BoundBlock {
                locals,
                stmts: vec![bound],
                span,
            })
        }
    }

    pub(crate) fn bind_stmt(&mut self, stmt: &Stmt) -> BoundStmt {
        let span = stmt.span;
        let kind = match &stmt.kind {
            StmtKind::Block(block) => BoundStmtKind::Block(self.bind_block(block)),
            StmtKind::Empty => BoundStmtKind::NoOp,
            StmtKind::LocalDecl { is_const, ty, declarators } => {
                return self.bind_local_declaration(*is_const, ty, declarators, span);
            }
            StmtKind::Expr(expr) => {
                let bound = self.bind_expr(expr);
                if !is_statement_expression(&bound) {
                    self.error(ErrorCode::IllegalStatement, span, Vec::new());
                }
                BoundStmtKind::Expression(bound)
            }
            StmtKind::If { condition, then_branch, else_branch } => BoundStmtKind::If {
                condition: self.bind_condition(condition),
                then_branch: Box::new(self.bind_embedded(then_branch)),
                else_branch: else_branch.as_ref().map(|s| Box::new(self.bind_embedded(s))),
            },
            StmtKind::While { condition, body } => {
                let condition = self.bind_condition(condition);
                let (break_label, continue_label, body) = self.bind_loop_body(body);
                BoundStmtKind::While {
                    condition,
                    body: Box::new(body),
                    break_label,
                    continue_label,
                }
            }
            StmtKind::DoWhile { body, condition } => {
                let (break_label, continue_label, body) = self.bind_loop_body(body);
                BoundStmtKind::DoWhile {
                    body: Box::new(body),
                    condition: self.bind_condition(condition),
                    break_label,
                    continue_label,
                }
            }
            StmtKind::For { init, condition, iterators, body } => {
                self.push_scope();
                let init = init.iter().map(|s| self.bind_stmt(s)).collect();
                let condition = condition.as_ref().map(|c| self.bind_condition(c));
                let increments = iterators
                    .iter()
                    .map(|e| {
                        let bound = self.bind_expr(e);
                        if !is_statement_expression(&bound) {
                            self.error(ErrorCode::IllegalStatement, e.span, Vec::new());
                        }
                        bound
                    })
                    .collect();
                let (break_label, continue_label, body) = self.bind_loop_body(body);
                let locals = self.pop_scope();
                BoundStmtKind::For {
                    locals,
                    init,
                    condition,
                    increments,
                    body: Box::new(body),
                    break_label,
                    continue_label,
                }
            }
            StmtKind::Foreach { ty, name, collection, body } => {
                return self.bind_foreach(ty, name, collection, body, span);
            }
            StmtKind::Switch { expr, sections } => self.bind_switch(expr, sections),
            StmtKind::Break => match self.function().breakables.last().map(|b| b.break_label) {
                Some(label) => BoundStmtKind::Break(label),
                None => {
                    self.error(ErrorCode::NoBreakOrCont, span, Vec::new());
                    BoundStmtKind::NoOp
                }
            },
            StmtKind::Continue => {
                let target = self.function().breakables.iter().rev().find_map(|b| b.continue_label);
                match target {
                    Some(label) => BoundStmtKind::Continue(label),
                    None => {
                        self.error(ErrorCode::NoBreakOrCont, span, Vec::new());
                        BoundStmtKind::NoOp
                    }
                }
            }
            StmtKind::Return(value) => self.bind_return(value.as_ref(), span),
            StmtKind::Throw(value) => self.bind_throw(value.as_ref(), span),
            StmtKind::Try { block, catches, finally } => self.bind_try(block, catches, finally.as_ref()),
            StmtKind::YieldReturn(value) => {
                if self.check_yield(span) {
                    let function = self.function();
                    if function.try_depth > 0 || function.catch_depth > 0 || function.finally_depth > 0 {
                        self.error(ErrorCode::BadYieldInTry, span, Vec::new());
                    }
                }
                let element = iterator_element_type(self.table, self.function().return_type).unwrap_or(TypeId::ERROR);
                BoundStmtKind::YieldReturn(self.bind_expr_to(value, element))
            }
            StmtKind::YieldBreak => {
                self.check_yield(span);
                BoundStmtKind::YieldBreak
            }
        };
        BoundStmt::new(kind, span)
    }

    /// `yield` is only valid in an iterator. Reports and returns false
    /// otherwise.
    fn check_yield(&mut self, span: Span) -> bool {
        let function = self.function();
        if function.is_iterator {
            return true;
        }
        let args = vec![function.name.clone(), self.type_name(function.return_type)];
        self.error(ErrorCode::BadIteratorReturn, span, args);
        false
    }

    fn bind_loop_body(&mut self, body: &Stmt) -> (LabelId, LabelId, BoundStmt) {
        let break_label = self.new_label();
        let continue_label = self.new_label();
        self.function_mut().breakables.push(Breakable {
            break_label,
            continue_label: Some(continue_label),
        });
        let body = self.bind_embedded(body);
        self.function_mut().breakables.pop();
        (break_label, continue_label, body)
    }

    fn bind_local_declaration(
        &mut self,
        is_const: bool,
        ty: &TypeSyntax,
        declarators: &[VariableDeclarator],
        span: Span,
    ) -> BoundStmt {
        let declared = if ty.is_var() { None } else { Some(self.resolve_type(ty)) };
        let mut stmts = Vec::with_capacity(declarators.len());
        for declarator in declarators {
            let (local_type, init) = match (declared, &declarator.init) {
                (Some(ty), Some(init)) => (ty, Some(self.bind_expr_to(init, ty))),
                (Some(ty), None) => (ty, None),
                (None, Some(init)) => {
                    let bound = self.bind_expr(init);
                    let bad_value = match bound.ty {
                        TypeId::NULL => Some("<null>".to_string()),
                        TypeId::VOID => Some("void".to_string()),
                        _ => None,
                    };
                    match bad_value {
                        Some(value) => {
                            self.error(ErrorCode::ImplicitlyTypedVariableAssignedBadValue, declarator.span, vec![value]);
                            (TypeId::ERROR, Some(bound))
                        }
                        None => (bound.ty, Some(bound)),
                    }
                }
                (None, None) => {
                    self.error(ErrorCode::ImplicitlyTypedVariableWithNoInitializer, declarator.span, Vec::new());
                    (TypeId::ERROR, None)
                }
            };

            if is_const {
                let constant = init.as_ref().and_then(|i| i.constant.clone());
                let local = self.declare_local(&declarator.name, local_type, LocalKind::Const);
                match constant {
                    Some(value) => self.locals.set_constant(local, value),
                    None if init.as_ref().is_some_and(BoundExpr::has_errors) => {}
                    None => self.error(
                        ErrorCode::NotConstantExpression,
                        declarator.span,
                        vec![declarator.name.name.to_string()],
                    ),
                }
                stmts.push(BoundStmt::new(BoundStmtKind::NoOp, declarator.span));
                continue;
            }

            let local = self.declare_local(&declarator.name, local_type, LocalKind::User);
            stmts.push(BoundStmt::new(BoundStmtKind::LocalDeclaration { local, init }, declarator.span));
        }
        if stmts.len() == 1 {
            return stmts.remove(0);
        }
        // Several declarators share the enclosing scope
        BoundStmt::block(BoundBlock::new(stmts, span))
    }

    fn bind_return(&mut self, value: Option<&Expr>, span: Span) -> BoundStmtKind {
        if self.function().is_iterator {
            if let Some(value) = value {
                self.error(ErrorCode::ReturnInIterator, span, Vec::new());
                return BoundStmtKind::Expression(self.bind_expr(value));
            }
            return BoundStmtKind::YieldBreak;
        }
        let target = self.function().effective_return_type(self.table);
        match value {
            Some(value) if target == TypeId::VOID => {
                let name = self.function().name.clone();
                self.error(ErrorCode::RetNoObjectRequired, span, vec![name]);
                BoundStmtKind::Return(Some(self.bind_expr(value)))
            }
            Some(value) => BoundStmtKind::Return(Some(self.bind_expr_to(value, target))),
            None if target != TypeId::VOID && !target.is_error() => {
                self.error(ErrorCode::RetObjectRequired, span, vec![self.type_name(target)]);
                BoundStmtKind::Return(None)
            }
            None => BoundStmtKind::Return(None),
        }
    }

    fn bind_throw(&mut self, value: Option<&Expr>, span: Span) -> BoundStmtKind {
        match value {
            Some(value) => {
                let bound = self.bind_expr(value);
                if bound.has_errors() || self.table.is_exception_type(bound.ty) {
                    return BoundStmtKind::Throw(Some(bound));
                }
                let exception = self.table.exception_type();
                let converted = self.convert(bound, exception, value.span);
                BoundStmtKind::Throw(Some(converted))
            }
            None => {
                if self.function().catch_depth == 0 {
                    self.error(ErrorCode::BadEmptyThrow, span, Vec::new());
                }
                BoundStmtKind::Throw(None)
            }
        }
    }

    fn bind_try(&mut self, block: &Block, catches: &[CatchClause], finally: Option<&Block>) -> BoundStmtKind {
        self.function_mut().try_depth += 1;
        let block = self.bind_block(block);
        self.function_mut().try_depth -= 1;

        let catches = catches.iter().map(|c| self.bind_catch(c)).collect();

        let finally = finally.map(|f| {
            self.function_mut().finally_depth += 1;
            let bound = self.bind_block(f);
            self.function_mut().finally_depth -= 1;
            bound
        });
        BoundStmtKind::Try {
            block,
            catches,
            finally,
            is_async_catch: false,
        }
    }

    fn bind_catch(&mut self, clause: &CatchClause) -> BoundCatch {
        let table = self.table;
        self.push_scope();
        let exception_type = match &clause.ty {
            Some(syntax) => {
                let ty = self.resolve_type(syntax);
                if !ty.is_error() && !table.is_exception_type(ty) {
                    self.error(
                        ErrorCode::NoImplicitConv,
                        syntax.span,
                        vec![self.type_name(ty), self.type_name(table.exception_type())],
                    );
                }
                ty
            }
            None => table.exception_type(),
        };
        let local = clause
            .name
            .as_ref()
            .map(|name| self.declare_local(name, exception_type, LocalKind::Catch));

        self.function_mut().catch_depth += 1;
        let block = self.bind_block(&clause.block);
        self.function_mut().catch_depth -= 1;

        let mut block = block;
        block.locals.splice(0..0, self.pop_scope());
        BoundCatch {
            exception_type,
            local,
            block,
            span: clause.span,
        }
    }

    fn bind_foreach(
        &mut self,
        ty: &TypeSyntax,
        name: &sable_parser::Identifier,
        collection: &Expr,
        body: &Stmt,
        span: Span,
    ) -> BoundStmt {
        let table = self.table;
        let collection = self.bind_expr(collection);
        let element_type = if collection.has_errors() {
            TypeId::ERROR
        } else {
            match self.enumerable_element_type(collection.ty) {
                Some(element) => element,
                None => {
                    self.error(ErrorCode::ForeachNoGetEnumerator, collection.span, vec![self.type_name(collection.ty)]);
                    TypeId::ERROR
                }
            }
        };

        let local_type = if ty.is_var() {
            element_type
        } else {
            let declared = self.resolve_type(ty);
            if !declared.is_error() && !element_type.is_error() && !table.classify_conversion(element_type, declared).exists() {
                self.error(
                    ErrorCode::NoExplicitConv,
                    ty.span,
                    vec![self.type_name(element_type), self.type_name(declared)],
                );
            }
            declared
        };

        self.push_scope();
        let local = self.declare_local(name, local_type, LocalKind::Foreach);
        let (break_label, continue_label, body) = self.bind_loop_body(body);
        let locals = self.pop_scope();

        let stmt = BoundStmt::new(
            BoundStmtKind::Foreach {
                local,
                element_type,
                collection,
                body: Box::new(body),
                break_label,
                continue_label,
            },
            span,
        );
        BoundStmt::block(BoundBlock {
            locals,
            stmts: vec![stmt],
            span,
        })
    }

    /// Element type of a collection usable in `foreach`: `IEnumerable<T>`
    /// or a type with a parameterless `GetEnumerator` returning
    /// `IEnumerator<T>`.
    pub(crate) fn enumerable_element_type(&self, ty: TypeId) -> Option<TypeId> {
        let table = self.table;
        if let Some(args) = table.types.generic_args(ty, GenericKind::IEnumerable) {
            return args.first().copied();
        }
        let class = table.class_of_type(ty)?;
        table
            .find_methods(class, "GetEnumerator")
            .into_iter()
            .map(|m| table.method(m))
            .find(|m| m.params.is_empty() && !m.is_static)
            .and_then(|m| table.types.generic_args(m.return_type, GenericKind::IEnumerator))
            .and_then(|args| args.first().copied())
    }

    fn bind_switch(&mut self, expr: &Expr, sections: &[SwitchSection]) -> BoundStmtKind {
        let operand = self.bind_expr(expr);
        let operand_candidates = TypeCandidates::single(operand.ty);
        let break_label = self.new_label();
        self.function_mut().breakables.push(Breakable {
            break_label,
            continue_label: None,
        });

        let mut bound_sections = Vec::with_capacity(sections.len());
        for section in sections {
            self.push_scope();
            let labels = section
                .labels
                .iter()
                .map(|label| match &label.kind {
                    SwitchLabelKind::Case { pattern, guard } => {
                        let mut candidates = operand_candidates.clone();
                        let pattern = self.bind_pattern(pattern, &mut candidates, PatternContext::Switch);
                        let guard = guard.as_ref().map(|g| self.bind_condition(g));
                        BoundMatchLabel {
                            pattern: Some(pattern),
                            guard,
                            span: label.span,
                        }
                    }
                    SwitchLabelKind::Default => BoundMatchLabel {
                        pattern: None,
                        guard: None,
                        span: label.span,
                    },
                })
                .collect();
            let stmts = section.stmts.iter().map(|s| self.bind_stmt(s)).collect();
            let locals = self.pop_scope();
            bound_sections.push(BoundMatchSection {
                labels,
                locals,
                stmts,
                span: section.span,
            });
        }

        self.function_mut().breakables.pop();
        BoundStmtKind::Match {
            operand,
            sections: bound_sections,
            break_label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::contains_yield;
    use crate::binder::tests::{bind_all, codes, units};
    use crate::bound::*;
    use sable_parser::{MemberDecl, MethodBodySyntax, NamespaceMember};
    use sable_symbols::ErrorCode;

    fn errors(source: &str) -> Vec<ErrorCode> {
        let (_, diagnostics) = bind_all(source);
        diagnostics.iter().filter(|d| d.is_error()).map(|d| d.code).collect()
    }

    #[test]
    fn test_loops_and_jumps() {
        let (_, diagnostics) = bind_all(
            "class P { static void Main() { for (int i = 0; i < 3; i++) { if (i == 1) continue; while (true) { break; } } do { } while (false); } }",
        );
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));
        assert_eq!(errors("class P { static void Main() { break; } }"), vec![ErrorCode::NoBreakOrCont]);
        assert_eq!(
            errors("class P { static void Main(int x) { switch (x) { case 1: continue; } } }"),
            vec![ErrorCode::NoBreakOrCont]
        );
    }

    #[test]
    fn test_return_checks() {
        assert!(errors("class P { static int F() { return; } }").contains(&ErrorCode::RetObjectRequired));
        assert!(errors("class P { static void F() { return 1; } }").contains(&ErrorCode::RetNoObjectRequired));
        assert!(errors("class P { static int F() { return \"s\"; } }").contains(&ErrorCode::NoImplicitConv));
    }

    #[test]
    fn test_local_declarations() {
        assert!(errors("class P { static void F() { var x; } }").contains(&ErrorCode::ImplicitlyTypedVariableWithNoInitializer));
        assert!(errors("class P { static void F() { var x = null; } }").contains(&ErrorCode::ImplicitlyTypedVariableAssignedBadValue));
        assert!(errors("class P { static void F(int y) { const int x = y; } }").contains(&ErrorCode::NotConstantExpression));
        assert!(errors("class P { static void F() { int x = 1; int x = 2; } }").contains(&ErrorCode::LocalDuplicate));
        assert!(errors("class P { static void F() { int x = 1; x + 1; } }").contains(&ErrorCode::IllegalStatement));

        let (methods, diagnostics) = bind_all("class P { static int F() { const int k = 4; return k * 2; } }");
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));
        let f = methods.iter().find(|m| m.body.stmts.len() == 2).unwrap();
        let BoundStmtKind::Return(Some(value)) = &f.body.stmts[1].kind else {
            panic!("expected a return");
        };
        assert_eq!(value.constant, Some(sable_symbols::ConstantValue::Int(8)));
    }

    #[test]
    fn test_exceptions() {
        let (_, diagnostics) = bind_all(
            "class P { static void F() { try { throw new Exception(\"x\"); } catch (Exception e) { throw; } finally { } } }",
        );
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));
        assert!(errors("class P { static void F() { throw; } }").contains(&ErrorCode::BadEmptyThrow));
        assert!(errors("class P { static void F() { throw 1; } }").contains(&ErrorCode::NoImplicitConv));
        assert!(errors("class P { static void F() { try { } catch (string s) { } } }").contains(&ErrorCode::NoImplicitConv));
    }

    #[test]
    fn test_iterators() {
        let (methods, diagnostics) = bind_all(
            "class P { static IEnumerable<int> Numbers() { yield return 1; if (true) return; yield return 2; } \
             static void Main() { foreach (var n in Numbers()) { System.Console.WriteLine(n); } } }",
        );
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));
        assert!(methods.iter().any(|m| m.is_iterator));

        assert!(errors("class P { static IEnumerable<int> F() { yield return 1; return 2; } }").contains(&ErrorCode::ReturnInIterator));
        assert!(errors("class P { static IEnumerable<int> F() { try { yield return 1; } catch { } } }").contains(&ErrorCode::BadYieldInTry));
        assert!(errors("class P { static void F() { foreach (var x in 5) { } } }").contains(&ErrorCode::ForeachNoGetEnumerator));
    }

    #[test]
    fn test_switch_sections() {
        let (methods, diagnostics) = bind_all(
            "class P { static int F(object o) { switch (o) { case 1: case int a when a > 3: return 1; case string s: break; default: return 0; } return 2; } }",
        );
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));
        let f = methods.iter().find(|m| m.body.stmts.len() == 2).unwrap();
        let BoundStmtKind::Match { sections, .. } = &f.body.stmts[0].kind else {
            panic!("expected a match statement");
        };
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].labels.len(), 2);
        assert!(sections[2].labels[0].is_default());
        assert_eq!(sections[1].locals.len(), 1);
    }

    #[test]
    fn test_contains_yield_finds_nested_yield() {
        let parsed = units("class P { static IEnumerable<int> F() { try { if (true) { yield break; } } finally { } } }");
        let NamespaceMember::Type(decl) = &parsed[0].members[0] else {
            panic!("expected a type");
        };
        let MemberDecl::Method(method) = &decl.members[0] else {
            panic!("expected a method");
        };
        let Some(MethodBodySyntax::Block(body)) = &method.body else {
            panic!("expected a block body");
        };
        assert!(contains_yield(&body.stmts));
    }
}
