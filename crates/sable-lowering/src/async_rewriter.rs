//! The async rewrite: an `async` method becomes a state machine class
//! whose `MoveNext` runs the body up to the next incomplete await.
//!
//! ```text
//! void MoveNext() {
//!     try {
//!         switch (state) { 0: goto R0; 1: goto R1; ... }
//!         body
//!       exit:
//!     } catch (Exception e) {
//!         state = -2; builder.SetException(e); return;
//!     }
//!     state = -2;
//!     builder.SetResult(result);
//! }
//! ```
//!
//! Each `await x` becomes
//!
//! ```text
//! u = x;
//! if (!u.IsCompleted) {
//!     state = k; <yield point>; Task.OnCompleted(u, this); return;
//!   Rk: <resume point>; state = -1;
//! }
//! u.GetResult()
//! ```
//!
//! Control cannot enter a protected region from outside, so an await in a
//! `try` resumes through the label in front of the `try`, followed by a
//! second dispatch at the start of the protected block. A `finally` around
//! an await only runs when the machine is not suspending.

use sable_binder::visit::rewrite_stmt_children;
use sable_binder::{
    BinaryOperator, BoundBlock, BoundCatch, BoundExpr, BoundExprKind, BoundStmt, BoundStmtKind,
    BoundTreeRewriter, LabelId, LocalId, LocalKind, LocalTable,
};
use sable_symbols::{ClassId, FieldId, MethodKind, SymbolLookup, SymbolTable, TypeId};

use crate::factory::SyntheticFactory;
use crate::spill::{block_contains_await, Spiller};
use crate::state_machine::{StateMachine, STATE_FINISHED, STATE_RUNNING};
use crate::{LoweredMethod, StateMachineInfo, StateMachineKind, SynthesizedMembers};

/// Rewrite an `async` method into a state machine; other methods are
/// returned unchanged.
pub fn rewrite_async(table: &SymbolTable, method: LoweredMethod, synthesized: &mut SynthesizedMembers) -> LoweredMethod {
    let symbol = table.method(method.method);
    if !symbol.is_async {
        return method;
    }
    let LoweredMethod { method: kickoff, mut locals, body, .. } = method;
    let span = body.span;
    let f = SyntheticFactory::new(table, span);
    let return_type = symbol.return_type;
    // `void` methods still get a task to report completion to
    let builder_type = if return_type == TypeId::VOID { TypeId::TASK } else { return_type };
    let result_type = table
        .types
        .generic_args(return_type, sable_symbols::GenericKind::Task)
        .and_then(|args| args.first().copied());
    tracing::debug!(method = %symbol.name, "rewriting async method");

    let body = Spiller::new(f, &mut locals).spill_block(body);
    let mut machine = StateMachine::create(table, kickoff, Vec::new(), synthesized);
    let builder = machine.add_field(table, "<>t__builder", builder_type);
    let body = machine.hoist(table, &locals, body);

    // MoveNext
    let exit = locals.new_label();
    let result = result_type.map(|ty| locals.temp(ty));
    let mut awaits = AwaitRewriter {
        factory: f,
        machine: &machine,
        locals: &mut locals,
        frames: vec![Vec::new()],
        awaiters: 0,
        result,
        exit,
    };
    let mut body = awaits.rewrite_block(body);
    let mut resumes = awaits.frames.pop().unwrap_or_default();
    resumes.sort_by_key(|&(state, _)| state);
    if !resumes.is_empty() {
        let targets = resumes.into_iter().map(|(_, label)| label).collect();
        let dispatch = BoundStmt::new(
            BoundStmtKind::SwitchDispatch {
                value: machine.state_ref(&f),
                targets,
            },
            span,
        );
        body.stmts.insert(0, dispatch);
    }
    body.stmts.push(f.label(exit));

    let this_builder = f.field(Some(f.this(machine.class)), builder);
    let exception_type = table.exception_type();
    let exception = locals.declare("<>e", exception_type, LocalKind::Catch, span);
    let set_exception = f.builtin_method(ClassId::TASK, "<>SetException", &[exception_type]);
    let handler = BoundCatch {
        exception_type,
        local: Some(exception),
        block: BoundBlock::new(
            vec![
                f.assign_stmt(machine.state_ref(&f), f.int(STATE_FINISHED)),
                f.stmt(f.call(Some(this_builder.clone()), set_exception, vec![f.local(exception, exception_type)])),
                f.ret(None),
            ],
            span,
        ),
        span,
    };
    let set_result = f.builtin_method(ClassId::TASK, "<>SetResult", &[TypeId::OBJECT]);
    let value = match (result, result_type) {
        (Some(result), Some(ty)) => f.convert(f.local(result, ty), TypeId::OBJECT),
        _ => f.null(TypeId::OBJECT),
    };
    let move_next_body = BoundBlock {
        locals: result.into_iter().collect(),
        stmts: vec![
            BoundStmt::new(
                BoundStmtKind::Try {
                    block: body,
                    catches: vec![handler],
                    finally: None,
                    is_async_catch: true,
                },
                span,
            ),
            f.assign_stmt(machine.state_ref(&f), f.int(STATE_FINISHED)),
            f.stmt(f.call(Some(this_builder), set_result, vec![value])),
            f.ret(None),
        ],
        span,
    };
    let move_next = machine.add_method(table, "MoveNext", MethodKind::Ordinary, TypeId::VOID, Vec::new());
    synthesized.methods.push(LoweredMethod {
        method: move_next,
        locals,
        body: move_next_body,
        state_machine: None,
    });

    // Kickoff
    let mut kickoff_locals = LocalTable::new();
    let instance = kickoff_locals.temp(machine.class_type);
    let instance_ref = f.local(instance, machine.class_type);
    let create = f.builtin_method(ClassId::TASK, "<>Create", &[]);
    let instance_builder = f.field(Some(instance_ref.clone()), builder);
    let mut stmts = machine.kickoff_prologue(table, &f, instance_ref.clone());
    stmts.push(f.assign_stmt(instance_builder.clone(), f.call_typed(None, create, Vec::new(), builder_type)));
    stmts.push(f.assign_stmt(f.field(Some(instance_ref.clone()), machine.state), f.int(STATE_RUNNING)));
    stmts.push(f.stmt(f.call(Some(instance_ref), move_next, Vec::new())));
    stmts.push(f.ret((return_type != TypeId::VOID).then_some(instance_builder)));

    LoweredMethod {
        method: kickoff,
        locals: kickoff_locals,
        body: BoundBlock {
            locals: vec![instance],
            stmts,
            span,
        },
        state_machine: Some(StateMachineInfo {
            kind: StateMachineKind::Async,
            class: machine.class,
            move_next,
        }),
    }
}

struct AwaitRewriter<'a, 'm> {
    factory: SyntheticFactory<'a>,
    machine: &'m StateMachine,
    locals: &'m mut LocalTable,
    /// Resume entries per enclosing `try`; the first is the method body
    frames: Vec<Vec<(i32, LabelId)>>,
    awaiters: i32,
    result: Option<LocalId>,
    exit: LabelId,
}

impl AwaitRewriter<'_, '_> {
    fn awaiter_field(&mut self, ty: TypeId) -> (i32, FieldId) {
        let state = self.awaiters;
        self.awaiters += 1;
        let field = self.machine.add_field(self.factory.table, format!("<>u__{}", state), ty);
        (state, field)
    }

    fn expand_await(&mut self, target: Option<BoundExpr>, operand: BoundExpr, result_type: TypeId, span: sable_lexer::Span) -> BoundStmt {
        let f = self.factory.at(span);
        let table = self.factory.table;
        let (state, field) = self.awaiter_field(operand.ty);
        let resume = self.locals.new_label();
        self.frames
            .last_mut()
            .unwrap_or_else(|| unreachable!("no dispatch frame"))
            .push((state, resume));

        let this = f.this(self.machine.class);
        let awaiter = f.field(Some(this.clone()), field);
        let is_completed = f.call(Some(awaiter.clone()), f.builtin_getter(ClassId::TASK, "IsCompleted"), Vec::new());
        let on_completed = f.builtin_method(ClassId::TASK, "<>OnCompleted", &[TypeId::TASK, TypeId::OBJECT]);
        let get_result = table.find_methods(ClassId::TASK, "<>GetResult")[0];
        let value_type = if result_type == TypeId::VOID { TypeId::OBJECT } else { result_type };
        let result = f.call_typed(Some(awaiter.clone()), get_result, Vec::new(), value_type);

        let suspend = f.block(vec![
            f.assign_stmt(self.machine.state_ref(&f), f.int(state)),
            BoundStmt::new(BoundStmtKind::AwaitYieldPoint, span),
            f.stmt(f.call(
                None,
                on_completed,
                vec![f.convert(awaiter.clone(), TypeId::TASK), f.convert(this, TypeId::OBJECT)],
            )),
            f.ret(None),
            f.label(resume),
            BoundStmt::new(BoundStmtKind::AwaitResumePoint, span),
            f.assign_stmt(self.machine.state_ref(&f), f.int(STATE_RUNNING)),
        ]);
        f.block(vec![
            f.assign_stmt(awaiter, operand),
            f.if_then(f.not(is_completed), suspend, None),
            match target {
                Some(target) => f.assign_stmt(target, result),
                None => f.stmt(result),
            },
        ])
    }

    fn rewrite_try(&mut self, block: BoundBlock, catches: Vec<BoundCatch>, finally: Option<BoundBlock>, is_async_catch: bool, span: sable_lexer::Span) -> BoundStmt {
        let f = self.factory.at(span);
        let suspends = block_contains_await(&block);
        self.frames.push(Vec::new());
        let mut block = self.rewrite_block(block);
        let resumes = self.frames.pop().unwrap_or_default();
        let catches = catches
            .into_iter()
            .map(|c| BoundCatch {
                block: self.rewrite_block(c.block),
                ..c
            })
            .collect();
        let finally = finally.map(|b| {
            let b = self.rewrite_block(b);
            if !suspends {
                return b;
            }
            let running = f.binary(BinaryOperator::Lt, self.machine.state_ref(&f), f.int(0), TypeId::BOOL);
            BoundBlock::new(vec![f.if_then(running, BoundStmt::block(b), None)], span)
        });

        if resumes.is_empty() {
            return BoundStmt::new(BoundStmtKind::Try { block, catches, finally, is_async_catch }, span);
        }

        let entry = self.locals.new_label();
        let mut dispatch = Vec::with_capacity(resumes.len());
        for &(state, label) in &resumes {
            dispatch.push(f.conditional_goto(f.eq(self.machine.state_ref(&f), f.int(state)), true, label));
            self.frames
                .last_mut()
                .unwrap_or_else(|| unreachable!("no dispatch frame"))
                .push((state, entry));
        }
        block.stmts.splice(0..0, dispatch);
        f.block(vec![
            f.label(entry),
            BoundStmt::new(BoundStmtKind::Try { block, catches, finally, is_async_catch }, span),
        ])
    }
}

impl BoundTreeRewriter for AwaitRewriter<'_, '_> {
    fn rewrite_stmt(&mut self, stmt: BoundStmt) -> BoundStmt {
        let span = stmt.span;
        let f = self.factory.at(span);
        match stmt.kind {
            BoundStmtKind::Expression(BoundExpr { kind: BoundExprKind::Await(operand), ty, .. }) => {
                self.expand_await(None, *operand, ty, span)
            }
            BoundStmtKind::Expression(BoundExpr {
                kind: BoundExprKind::Assignment { target, value },
                ..
            }) if matches!(value.kind, BoundExprKind::Await(_)) => {
                let BoundExpr { kind: BoundExprKind::Await(operand), ty, .. } = *value else { unreachable!() };
                self.expand_await(Some(*target), *operand, ty, span)
            }
            BoundStmtKind::Return(value) => {
                let mut stmts = Vec::new();
                if let (Some(result), Some(value)) = (self.result, value) {
                    let ty = self.locals.ty(result);
                    stmts.push(f.assign_stmt(f.local(result, ty), f.convert(value, ty)));
                }
                stmts.push(f.goto(self.exit));
                f.block(stmts)
            }
            BoundStmtKind::Try { block, catches, finally, is_async_catch } => {
                self.rewrite_try(block, catches, finally, is_async_catch, span)
            }
            kind => rewrite_stmt_children(self, BoundStmt::new(kind, span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use sable_binder::visit::visit_stmt_children;
    use sable_binder::BoundTreeWalker;

    use super::*;
    use crate::local_rewriter::rewrite_locals;
    use crate::test_support::{bind_source, method_named};

    fn rewrite(source: &str, name: &str) -> (SymbolTable, LoweredMethod, SynthesizedMembers) {
        let (table, methods) = bind_source(source);
        let bound = method_named(&table, &methods, name);
        let mut synthesized = SynthesizedMembers::new();
        let lowered = rewrite_locals(&table, bound, &mut synthesized);
        let rewritten = rewrite_async(&table, lowered, &mut synthesized);
        (table, rewritten, synthesized)
    }

    fn move_next<'s>(kickoff: &LoweredMethod, synthesized: &'s SynthesizedMembers) -> &'s LoweredMethod {
        let info = kickoff.state_machine.expect("state machine");
        synthesized.methods.iter().find(|m| m.method == info.move_next).expect("MoveNext body")
    }

    #[derive(Default)]
    struct Points {
        yields: usize,
        resumes: usize,
        awaits: usize,
    }

    impl BoundTreeWalker for Points {
        fn visit_stmt(&mut self, stmt: &BoundStmt) {
            match stmt.kind {
                BoundStmtKind::AwaitYieldPoint => self.yields += 1,
                BoundStmtKind::AwaitResumePoint => self.resumes += 1,
                _ => {}
            }
            visit_stmt_children(self, stmt);
        }

        fn visit_expr(&mut self, expr: &BoundExpr) {
            if matches!(expr.kind, BoundExprKind::Await(_)) {
                self.awaits += 1;
            }
            sable_binder::visit::visit_expr_children(self, expr);
        }
    }

    const TWO_AWAITS: &str = "using System.Threading.Tasks; class P { \
        static async Task<int> Get(int x) { return x; } \
        static async Task<int> M(int a) { int b = await Get(a); return b + await Get(2); } }";

    #[test]
    fn test_machine_shape() {
        let (table, kickoff, _) = rewrite(TWO_AWAITS, "M");
        let info = kickoff.state_machine.unwrap();
        assert_eq!(info.kind, StateMachineKind::Async);
        let fields: Vec<String> = table
            .class(info.class)
            .fields
            .iter()
            .map(|&f| table.field(f).name.to_string())
            .collect();
        for expected in ["<>1__state", "a", "<>t__builder", "<>u__0", "<>u__1"] {
            assert!(fields.contains(&expected.to_string()), "missing {} in {:?}", expected, fields);
        }
        // kickoff ends with MoveNext(); return builder;
        let stmts = &kickoff.body.stmts;
        let BoundStmtKind::Expression(call) = &stmts[stmts.len() - 2].kind else { panic!() };
        assert!(matches!(&call.kind, BoundExprKind::Call { method, .. } if *method == info.move_next));
        assert!(matches!(stmts.last().unwrap().kind, BoundStmtKind::Return(Some(_))));
    }

    #[test]
    fn test_move_next_dispatch_and_points() {
        let (_, kickoff, synthesized) = rewrite(TWO_AWAITS, "M");
        let body = &move_next(&kickoff, &synthesized).body;
        let BoundStmtKind::Try { block, catches, is_async_catch: true, .. } = &body.stmts[0].kind else {
            panic!("MoveNext must be wrapped in the async handler");
        };
        assert_eq!(catches.len(), 1);
        let BoundStmtKind::SwitchDispatch { targets, .. } = &block.stmts[0].kind else {
            panic!("dispatch first");
        };
        assert_eq!(targets.len(), 2);

        let mut points = Points::default();
        points.visit_block(body);
        assert_eq!((points.yields, points.resumes, points.awaits), (2, 2, 0));
    }

    #[test]
    fn test_await_in_try_resumes_through_entry_label() {
        let (_, kickoff, synthesized) = rewrite(
            "using System; using System.Threading.Tasks; class P { \
             static async Task<int> Get() { return 1; } \
             static async Task M() { try { await Get(); } finally { Console.WriteLine(1); } } }",
            "M",
        );
        let body = &move_next(&kickoff, &synthesized).body;
        let BoundStmtKind::Try { block, .. } = &body.stmts[0].kind else { panic!() };
        let BoundStmtKind::SwitchDispatch { targets, .. } = &block.stmts[0].kind else { panic!() };
        assert_eq!(targets.len(), 1);

        // the user try sits behind its entry label and starts with its own dispatch
        let inner = block
            .stmts
            .iter()
            .find_map(|s| match &s.kind {
                BoundStmtKind::Block(b) => match (&b.stmts[0].kind, &b.stmts[1].kind) {
                    (BoundStmtKind::Label(entry), BoundStmtKind::Try { block, finally, .. }) => {
                        Some((*entry, block.clone(), finally.clone()))
                    }
                    _ => None,
                },
                _ => None,
            })
            .expect("entry label before the try");
        assert_eq!(targets[0], inner.0);
        assert!(matches!(inner.1.stmts[0].kind, BoundStmtKind::ConditionalGoto { jump_if_true: true, .. }));
        let finally = inner.2.expect("finally kept");
        assert!(matches!(finally.stmts[0].kind, BoundStmtKind::If { .. }));
    }

    #[test]
    fn test_returns_jump_to_exit() {
        let (_, kickoff, synthesized) = rewrite(TWO_AWAITS, "M");
        let body = &move_next(&kickoff, &synthesized).body;

        #[derive(Default)]
        struct Returns(usize, usize);
        impl BoundTreeWalker for Returns {
            fn visit_stmt(&mut self, stmt: &BoundStmt) {
                match stmt.kind {
                    BoundStmtKind::Return(_) => self.0 += 1,
                    BoundStmtKind::Goto(_) => self.1 += 1,
                    _ => {}
                }
                visit_stmt_children(self, stmt);
            }
        }
        let mut returns = Returns::default();
        returns.visit_block(body);
        // two suspensions, the handler and the final return; one user return
        assert_eq!(returns.0, 4);
        assert_eq!(returns.1, 1);
    }

    #[test]
    fn test_synchronous_methods_are_untouched() {
        let (_, method, synthesized) = rewrite("class P { static int M() { return 1; } }", "M");
        assert!(method.state_machine.is_none());
        assert!(synthesized.methods.is_empty());
    }
}
