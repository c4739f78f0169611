//! The iterator rewrite: a method containing `yield` becomes a state
//! machine class implementing `IEnumerable<T>` and `IEnumerator<T>`.
//!
//! `MoveNext` dispatches on `<>1__state` to the resume label of the last
//! `yield return`; state `0` starts the body. The kickoff method creates
//! the machine, copies `this` and the arguments and returns it.

use sable_binder::visit::{rewrite_stmt_children, visit_stmt_children};
use sable_binder::{
    iterator_element_type, BoundBlock, BoundExpr, BoundStmt, BoundStmtKind, BoundTreeRewriter,
    BoundTreeWalker, LabelId, LocalTable,
};
use sable_symbols::{GenericKind, MethodKind, PropertySymbol, SymbolLookup, SymbolTable, TypeId};

use crate::factory::SyntheticFactory;
use crate::state_machine::{StateMachine, STATE_RUNNING};
use crate::{LoweredMethod, StateMachineInfo, StateMachineKind, SynthesizedMembers};

#[derive(Default)]
struct YieldFinder(bool);

impl BoundTreeWalker for YieldFinder {
    fn visit_stmt(&mut self, stmt: &BoundStmt) {
        match stmt.kind {
            BoundStmtKind::YieldReturn(_) | BoundStmtKind::YieldBreak => self.0 = true,
            _ => visit_stmt_children(self, stmt),
        }
    }
}

/// Rewrite `method` into a state machine when its body yields; other
/// methods are returned unchanged.
pub fn rewrite_iterator(table: &SymbolTable, method: LoweredMethod, synthesized: &mut SynthesizedMembers) -> LoweredMethod {
    let mut finder = YieldFinder::default();
    finder.visit_block(&method.body);
    if !finder.0 {
        return method;
    }
    let LoweredMethod { method: kickoff, mut locals, body, .. } = method;
    let symbol = table.method(kickoff);
    let span = body.span;
    let f = SyntheticFactory::new(table, span);
    let element = iterator_element_type(table, symbol.return_type)
        .unwrap_or_else(|| unreachable!("iterator without an enumerable return type"));
    let enumerable = table.types.generic(GenericKind::IEnumerable, vec![element]);
    let enumerator = table.types.generic(GenericKind::IEnumerator, vec![element]);
    tracing::debug!(method = %symbol.name, "rewriting iterator");

    let mut machine = StateMachine::create(table, kickoff, vec![enumerable, enumerator], synthesized);
    let current = machine.add_field(table, "<>2__current", element);
    let body = machine.hoist(table, &locals, body);

    // MoveNext
    let start = locals.new_label();
    let mut yields = YieldRewriter {
        factory: f,
        machine: &machine,
        current,
        locals: &mut locals,
        resume_labels: vec![start],
    };
    let body = yields.rewrite_block(body);
    let targets = yields.resume_labels;
    let state = machine.state_ref(&f);
    let move_next_body = BoundBlock::new(
        vec![
            BoundStmt::new(BoundStmtKind::SwitchDispatch { value: state.clone(), targets }, span),
            f.ret(Some(f.bool(false))),
            f.label(start),
            f.assign_stmt(state, f.int(STATE_RUNNING)),
            BoundStmt::block(body),
            f.ret(Some(f.bool(false))),
        ],
        span,
    );
    let move_next = machine.add_method(table, "MoveNext", MethodKind::Ordinary, TypeId::BOOL, Vec::new());
    synthesized.methods.push(LoweredMethod {
        method: move_next,
        locals,
        body: move_next_body,
        state_machine: None,
    });

    // Current
    let property = table.add_property(PropertySymbol {
        name: "Current".into(),
        containing: machine.class,
        ty: element,
        getter: None,
        setter: None,
        backing_field: None,
        is_static: false,
        span,
    });
    let get_current = machine.add_method(table, "get_Current", MethodKind::PropertyGet(property), element, Vec::new());
    table.update_property(property, |p| p.getter = Some(get_current));
    synthesized.methods.push(LoweredMethod {
        method: get_current,
        locals: LocalTable::new(),
        body: BoundBlock::new(vec![f.ret(Some(f.field(Some(f.this(machine.class)), current)))], span),
        state_machine: None,
    });

    // GetEnumerator hands out the machine itself
    let get_enumerator = machine.add_method(table, "GetEnumerator", MethodKind::Ordinary, enumerator, Vec::new());
    synthesized.methods.push(LoweredMethod {
        method: get_enumerator,
        locals: LocalTable::new(),
        body: BoundBlock::new(vec![f.ret(Some(f.convert(f.this(machine.class), enumerator)))], span),
        state_machine: None,
    });

    // Kickoff
    let mut kickoff_locals = LocalTable::new();
    let instance = kickoff_locals.temp(machine.class_type);
    let instance_ref = f.local(instance, machine.class_type);
    let mut stmts = machine.kickoff_prologue(table, &f, instance_ref.clone());
    stmts.push(f.assign_stmt(f.field(Some(instance_ref.clone()), machine.state), f.int(0)));
    stmts.push(f.ret(Some(f.convert(instance_ref, symbol.return_type))));

    LoweredMethod {
        method: kickoff,
        locals: kickoff_locals,
        body: BoundBlock {
            locals: vec![instance],
            stmts,
            span,
        },
        state_machine: Some(StateMachineInfo {
            kind: StateMachineKind::Iterator,
            class: machine.class,
            move_next,
        }),
    }
}

/// `yield return e` becomes `current = e; state = k; return true; Lk:
/// state = -1`, `yield break` becomes `return false`.
struct YieldRewriter<'a, 'm> {
    factory: SyntheticFactory<'a>,
    machine: &'m StateMachine,
    current: sable_symbols::FieldId,
    locals: &'m mut LocalTable,
    /// Dispatch targets; index `k` resumes after the `k`th yield
    resume_labels: Vec<LabelId>,
}

impl BoundTreeRewriter for YieldRewriter<'_, '_> {
    fn rewrite_stmt(&mut self, stmt: BoundStmt) -> BoundStmt {
        let f = self.factory.at(stmt.span);
        match stmt.kind {
            BoundStmtKind::YieldReturn(value) => {
                let state_value = self.resume_labels.len() as i32;
                let resume = self.locals.new_label();
                self.resume_labels.push(resume);
                let this: BoundExpr = f.this(self.machine.class);
                let current = f.field(Some(this), self.current);
                let value = f.convert(value, current.ty);
                f.block(vec![
                    f.assign_stmt(current, value),
                    f.assign_stmt(self.machine.state_ref(&f), f.int(state_value)),
                    f.ret(Some(f.bool(true))),
                    f.label(resume),
                    f.assign_stmt(self.machine.state_ref(&f), f.int(STATE_RUNNING)),
                ])
            }
            BoundStmtKind::YieldBreak => f.ret(Some(f.bool(false))),
            kind => rewrite_stmt_children(self, BoundStmt::new(kind, stmt.span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use sable_binder::BoundExprKind;

    use super::*;
    use crate::local_rewriter::rewrite_locals;
    use crate::test_support::{bind_source, method_named};

    fn rewrite(source: &str, name: &str) -> (SymbolTable, LoweredMethod, SynthesizedMembers) {
        let (table, methods) = bind_source(source);
        let bound = method_named(&table, &methods, name);
        let mut synthesized = SynthesizedMembers::new();
        let lowered = rewrite_locals(&table, bound, &mut synthesized);
        let rewritten = rewrite_iterator(&table, lowered, &mut synthesized);
        (table, rewritten, synthesized)
    }

    const RANGE: &str = "using System.Collections.Generic; class P { \
        static IEnumerable<int> Range(int n) { for (int i = 0; i < n; i++) { yield return i; } yield return -1; } }";

    #[test]
    fn test_machine_shape() {
        let (table, kickoff, synthesized) = rewrite(RANGE, "Range");
        let info = kickoff.state_machine.expect("state machine");
        assert_eq!(info.kind, StateMachineKind::Iterator);
        let class = table.class(info.class);
        assert!(class.name.starts_with("<Range>d__"));
        assert_eq!(class.interfaces.len(), 2);
        let names: Vec<String> = class.methods.iter().map(|&m| table.method(m).name.to_string()).collect();
        for expected in [".ctor", "MoveNext", "get_Current", "GetEnumerator"] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
        assert!(table.find_property(info.class, "Current").is_some());
        // ctor, MoveNext, get_Current, GetEnumerator
        assert_eq!(synthesized.methods.len(), 4);
    }

    #[test]
    fn test_move_next_dispatches_to_each_yield() {
        let (_, kickoff, synthesized) = rewrite(RANGE, "Range");
        let info = kickoff.state_machine.unwrap();
        let move_next = synthesized.methods.iter().find(|m| m.method == info.move_next).unwrap();
        let BoundStmtKind::SwitchDispatch { targets, .. } = &move_next.body.stmts[0].kind else {
            panic!("MoveNext must start with the dispatch");
        };
        // start plus two yields
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn test_kickoff_copies_arguments_and_returns_machine() {
        let (table, kickoff, _) = rewrite(RANGE, "Range");
        let stmts = &kickoff.body.stmts;
        assert!(matches!(stmts[0].kind, BoundStmtKind::Expression(_)));
        let copied: Vec<String> = stmts
            .iter()
            .filter_map(|s| match &s.kind {
                BoundStmtKind::Expression(e) => match &e.kind {
                    BoundExprKind::Assignment { target, .. } => match &target.kind {
                        BoundExprKind::Field { field, .. } => Some(table.field(*field).name.to_string()),
                        _ => None,
                    },
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(copied, vec!["n".to_string(), "<>1__state".to_string()]);
        assert!(matches!(stmts.last().unwrap().kind, BoundStmtKind::Return(Some(_))));
    }

    #[test]
    fn test_methods_without_yield_are_untouched() {
        let (_, method, synthesized) = rewrite("class P { static int M() { return 1; } }", "M");
        assert!(method.state_machine.is_none());
        assert!(synthesized.classes.is_empty());
    }
}
