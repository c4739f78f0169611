//! Moves `catch` handlers containing `await` out of their protected region.
//!
//! A suspension cannot happen inside a handler, so
//!
//! ```text
//! try { B } catch (E e) { H } finally { F }
//! ```
//!
//! becomes
//!
//! ```text
//! try {
//!     pending = 0;
//!     try { B } catch (E t) { ex = t; pending = 1; }
//!     if (pending == 1) { e = (E)ex; H }
//! } finally { F }
//! ```
//!
//! with a rethrow inside `H` turned into `throw (Exception)ex`.

use sable_binder::visit::rewrite_stmt_children;
use sable_binder::{BoundBlock, BoundCatch, BoundStmt, BoundStmtKind, BoundTreeRewriter, LocalId};
use sable_lexer::Span;
use sable_symbols::{SymbolTable, TypeId};

use crate::factory::SyntheticFactory;
use crate::spill::block_contains_await;
use crate::LoweredMethod;

pub fn rewrite_await_in_handlers(table: &SymbolTable, method: LoweredMethod) -> LoweredMethod {
    let LoweredMethod { method, mut locals, body, state_machine } = method;
    let mut rewriter = HandlerRewriter {
        table,
        factory: SyntheticFactory::new(table, body.span),
        locals: &mut locals,
    };
    let body = rewriter.rewrite_block(body);
    LoweredMethod { method, locals, body, state_machine }
}

struct HandlerRewriter<'a, 'l> {
    table: &'a SymbolTable,
    factory: SyntheticFactory<'a>,
    locals: &'l mut sable_binder::LocalTable,
}

impl HandlerRewriter<'_, '_> {
    fn rewrite_try(&mut self, block: BoundBlock, catches: Vec<BoundCatch>, finally: Option<BoundBlock>, span: Span) -> BoundStmt {
        let f = self.factory.at(span);
        let exception = self.locals.temp(TypeId::OBJECT);
        let pending = self.locals.temp(TypeId::INT);
        let exception_ref = f.local(exception, TypeId::OBJECT);
        let pending_ref = f.local(pending, TypeId::INT);

        let mut inner_catches = Vec::new();
        let mut handlers = Vec::new();
        for (index, catch) in catches.into_iter().enumerate() {
            if !block_contains_await(&catch.block) {
                inner_catches.push(catch);
                continue;
            }
            let number = index as i32 + 1;
            let cf = f.at(catch.span);
            let caught = self.locals.temp(catch.exception_type);
            inner_catches.push(BoundCatch {
                exception_type: catch.exception_type,
                local: Some(caught),
                block: BoundBlock::new(
                    vec![
                        cf.assign_stmt(exception_ref.clone(), cf.convert(cf.local(caught, catch.exception_type), TypeId::OBJECT)),
                        cf.assign_stmt(pending_ref.clone(), cf.int(number)),
                    ],
                    catch.span,
                ),
                span: catch.span,
            });

            let mut handler = Vec::new();
            if let Some(local) = catch.local {
                let ty = self.locals.ty(local);
                handler.push(cf.assign_stmt(cf.local(local, ty), cf.convert(exception_ref.clone(), ty)));
            }
            let body = replace_rethrow(self.table, catch.block, exception, cf);
            handler.push(BoundStmt::block(body));
            handlers.push(cf.if_then(
                cf.eq(pending_ref.clone(), cf.int(number)),
                cf.block_with_locals(catch.local.into_iter().collect::<Vec<LocalId>>(), handler),
                None,
            ));
        }

        let mut stmts = vec![
            f.assign_stmt(pending_ref, f.int(0)),
            BoundStmt::new(
                BoundStmtKind::Try {
                    block,
                    catches: inner_catches,
                    finally: None,
                    is_async_catch: false,
                },
                span,
            ),
        ];
        stmts.extend(handlers);
        let rewritten = f.block_with_locals(vec![exception, pending], stmts);

        match finally {
            Some(finally) => BoundStmt::new(
                BoundStmtKind::Try {
                    block: BoundBlock::new(vec![rewritten], span),
                    catches: Vec::new(),
                    finally: Some(finally),
                    is_async_catch: false,
                },
                span,
            ),
            None => rewritten,
        }
    }
}

impl BoundTreeRewriter for HandlerRewriter<'_, '_> {
    fn rewrite_stmt(&mut self, stmt: BoundStmt) -> BoundStmt {
        let stmt = rewrite_stmt_children(self, stmt);
        match stmt.kind {
            BoundStmtKind::Try { block, catches, finally, is_async_catch: false }
                if catches.iter().any(|c| block_contains_await(&c.block)) =>
            {
                self.rewrite_try(block, catches, finally, stmt.span)
            }
            kind => BoundStmt::new(kind, stmt.span),
        }
    }
}

/// Replace rethrows that belong to the handler itself, leaving those of
/// nested handlers alone.
fn replace_rethrow(table: &SymbolTable, block: BoundBlock, exception: LocalId, f: SyntheticFactory<'_>) -> BoundBlock {
    struct Rethrows<'a> {
        exception: sable_binder::BoundExpr,
        exception_type: TypeId,
        f: SyntheticFactory<'a>,
    }

    impl BoundTreeRewriter for Rethrows<'_> {
        fn rewrite_stmt(&mut self, stmt: BoundStmt) -> BoundStmt {
            match stmt.kind {
                BoundStmtKind::Throw(None) => {
                    let value = self.f.convert(self.exception.clone(), self.exception_type);
                    self.f.at(stmt.span).throw(value)
                }
                // Rethrows in nested catches refer to their own exception
                BoundStmtKind::Try { block, catches, finally, is_async_catch } => BoundStmt::new(
                    BoundStmtKind::Try {
                        block: self.rewrite_block(block),
                        catches,
                        finally: finally.map(|b| self.rewrite_block(b)),
                        is_async_catch,
                    },
                    stmt.span,
                ),
                kind => rewrite_stmt_children(self, BoundStmt::new(kind, stmt.span)),
            }
        }

        fn rewrite_lambda(&mut self, lambda: sable_binder::BoundLambda) -> sable_binder::BoundLambda {
            lambda
        }
    }

    let mut rethrows = Rethrows {
        exception: f.local(exception, TypeId::OBJECT),
        exception_type: table.exception_type(),
        f,
    };
    rethrows.rewrite_block(block)
}

#[cfg(test)]
mod tests {
    use sable_binder::{BoundExprKind, BoundTreeWalker};

    use super::*;
    use crate::local_rewriter::rewrite_locals;
    use crate::test_support::{bind_source, method_named};
    use crate::SynthesizedMembers;

    fn rewrite(source: &str) -> LoweredMethod {
        let (table, methods) = bind_source(source);
        let bound = method_named(&table, &methods, "M");
        let mut synthesized = SynthesizedMembers::new();
        let lowered = rewrite_locals(&table, bound, &mut synthesized);
        rewrite_await_in_handlers(&table, lowered)
    }

    #[derive(Default)]
    struct Census {
        tries: usize,
        awaits_in_catch: usize,
        rethrows: usize,
        in_catch: usize,
    }

    impl BoundTreeWalker for Census {
        fn visit_expr(&mut self, expr: &sable_binder::BoundExpr) {
            if matches!(expr.kind, BoundExprKind::Await(_)) && self.in_catch > 0 {
                self.awaits_in_catch += 1;
            }
            sable_binder::visit::visit_expr_children(self, expr);
        }

        fn visit_stmt(&mut self, stmt: &BoundStmt) {
            match &stmt.kind {
                BoundStmtKind::Try { block, catches, finally, .. } => {
                    self.tries += 1;
                    self.visit_block(block);
                    self.in_catch += 1;
                    for catch in catches {
                        self.visit_block(&catch.block);
                    }
                    self.in_catch -= 1;
                    if let Some(finally) = finally {
                        self.visit_block(finally);
                    }
                }
                BoundStmtKind::Throw(None) => self.rethrows += 1,
                _ => sable_binder::visit::visit_stmt_children(self, stmt),
            }
        }
    }

    fn census(method: &LoweredMethod) -> Census {
        let mut census = Census::default();
        census.visit_block(&method.body);
        census
    }

    #[test]
    fn test_await_moves_out_of_catch() {
        let method = rewrite(
            "using System; using System.Threading.Tasks; class P { \
             static async Task<int> Work() { return 1; } \
             static async Task<int> M() { try { return await Work(); } catch (Exception e) { await Work(); throw; } } }",
        );
        let census = census(&method);
        assert_eq!(census.awaits_in_catch, 0);
        assert_eq!(census.rethrows, 0);
        assert_eq!(census.tries, 1);
    }

    #[test]
    fn test_finally_wraps_rewritten_statement() {
        let method = rewrite(
            "using System; using System.Threading.Tasks; class P { \
             static async Task<int> Work() { return 1; } \
             static async Task M() { try { await Work(); } catch (Exception) { await Work(); } finally { Console.WriteLine(1); } } }",
        );
        assert_eq!(census(&method).tries, 2);
        let BoundStmtKind::Try { catches, finally, .. } = &method.body.stmts[0].kind else {
            panic!("expected the outer try");
        };
        assert!(catches.is_empty());
        assert!(finally.is_some());
    }

    #[test]
    fn test_handlers_without_await_stay() {
        let method = rewrite(
            "using System; class P { static int M() { try { return 1; } catch (Exception) { return 2; } } }",
        );
        let BoundStmtKind::Try { catches, .. } = &method.body.stmts[0].kind else {
            panic!("try should be untouched");
        };
        assert_eq!(catches.len(), 1);
    }
}
