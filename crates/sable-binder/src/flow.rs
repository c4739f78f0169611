//! Flow analysis over a bound method: reachability, definite assignment
//! and unused locals.
//!
//! Assignment only ever grows along a path, so the state at a loop head is
//! the state on entry and a single forward pass is enough.

use rustc_hash::FxHashMap;
use sable_lexer::Span;
use sable_symbols::{DiagnosticBag, ErrorCode, GenericKind, RefKind, Symbol, SymbolLookup, SymbolTable, TypeId};

use crate::binder::method_display_name;
use crate::bound::*;

/// Definitely assigned variables: locals first, then parameters. `None`
/// when the point is unreachable.
type State = Option<Vec<bool>>;

fn join(a: State, b: State) -> State {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            for (x, y) in a.iter_mut().zip(b) {
                *x &= y;
            }
            Some(a)
        }
        (Some(a), None) | (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

/// Union of assignments: both paths ran, as with a `finally` block.
fn union(a: State, b: State) -> State {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            for (x, y) in a.iter_mut().zip(b) {
                *x |= y;
            }
            Some(a)
        }
        _ => None,
    }
}

/// Out parameters and return type of the function being analyzed.
struct FunctionFlow {
    out_params: Vec<(u16, Symbol)>,
    name: String,
    /// Reaching the end of the body is an error
    requires_return: bool,
}

struct FlowAnalyzer<'a> {
    table: &'a SymbolTable,
    locals: &'a LocalTable,
    param_offset: usize,
    state: State,
    jumps: FxHashMap<LabelId, State>,
    functions: Vec<FunctionFlow>,
    referenced: Vec<bool>,
    reported: Vec<bool>,
    diagnostics: DiagnosticBag,
}

/// Analyze `method`, returning warnings and flow errors.
pub fn analyze_flow(table: &SymbolTable, method: &BoundMethod) -> DiagnosticBag {
    let symbol = table.method(method.method);
    let locals = &method.locals;
    let param_offset = locals.len();

    let mut initial = vec![false; param_offset + symbol.params.len()];
    let mut out_params = Vec::new();
    for (i, param) in symbol.params.iter().enumerate() {
        if param.ref_kind == RefKind::Out {
            out_params.push((i as u16, param.name.clone()));
        } else {
            initial[param_offset + i] = true;
        }
    }

    let return_type = if symbol.is_async {
        table
            .types
            .generic_args(symbol.return_type, GenericKind::Task)
            .and_then(|args| args.first().copied())
            .unwrap_or(TypeId::VOID)
    } else {
        symbol.return_type
    };
    let requires_return = !method.is_iterator && return_type != TypeId::VOID && !return_type.is_error();

    let mut analyzer = FlowAnalyzer {
        table,
        locals,
        param_offset,
        state: Some(initial),
        jumps: FxHashMap::default(),
        functions: vec![FunctionFlow {
            out_params,
            name: method_display_name(table, method.method),
            requires_return,
        }],
        referenced: vec![false; locals.len()],
        reported: vec![false; locals.len()],
        diagnostics: DiagnosticBag::new(),
    };
    analyzer.block(&method.body);
    analyzer.end_of_function(method.body.span);

    for (id, local) in locals.iter().skip(method.first_own_local) {
        let reportable = matches!(local.kind, LocalKind::User | LocalKind::Catch);
        if reportable && !analyzer.referenced[id.index()] {
            analyzer
                .diagnostics
                .add(ErrorCode::UnreferencedVar, local.span, vec![local.name.to_string()]);
        }
    }
    analyzer.diagnostics
}

impl FlowAnalyzer<'_> {
    fn assign_local(&mut self, local: LocalId) {
        if let Some(state) = &mut self.state {
            state[local.index()] = true;
        }
    }

    fn assign_param(&mut self, index: u16) {
        let slot = self.param_offset + index as usize;
        if let Some(state) = &mut self.state {
            state[slot] = true;
        }
    }

    fn read_local(&mut self, local: LocalId, span: Span) {
        self.referenced[local.index()] = true;
        let assigned = self.state.as_ref().map_or(true, |s| s[local.index()]);
        if !assigned && !self.reported[local.index()] {
            self.reported[local.index()] = true;
            let name = self.locals.get(local).name.to_string();
            self.diagnostics.add(ErrorCode::UseDefViolation, span, vec![name]);
        }
    }

    fn jump(&mut self, label: LabelId) {
        let state = self.state.take();
        let merged = match self.jumps.remove(&label) {
            Some(existing) => join(existing, state),
            None => state,
        };
        self.jumps.insert(label, merged);
    }

    /// Merge the states of jumps to `label` into the current state.
    fn land(&mut self, label: LabelId) {
        if let Some(jumped) = self.jumps.remove(&label) {
            self.state = join(self.state.take(), jumped);
        }
    }

    fn check_out_params(&mut self, span: Span) {
        let Some(state) = &self.state else {
            return;
        };
        let function = self.functions.last();
        let unassigned: Vec<String> = function
            .map(|f| {
                f.out_params
                    .iter()
                    .filter(|(i, _)| !state[self.param_offset + *i as usize])
                    .map(|(_, name)| name.to_string())
                    .collect()
            })
            .unwrap_or_default();
        for name in unassigned {
            self.diagnostics.add(ErrorCode::UnassignedOut, span, vec![name]);
        }
    }

    fn end_of_function(&mut self, span: Span) {
        if self.state.is_none() {
            return;
        }
        self.check_out_params(span);
        if let Some(function) = self.functions.last() {
            if function.requires_return {
                let name = function.name.clone();
                self.diagnostics.add(ErrorCode::ReturnExpected, span, vec![name]);
            }
        }
    }

    // ---
    // Statements
    // ---

    fn block(&mut self, block: &BoundBlock) {
        self.stmts(&block.stmts);
    }

    fn stmts(&mut self, stmts: &[BoundStmt]) {
        let mut warned = false;
        for stmt in stmts {
            if self.state.is_none() && !warned && !matches!(stmt.kind, BoundStmtKind::NoOp) {
                warned = true;
                self.diagnostics.add(ErrorCode::UnreachableCode, stmt.span, Vec::new());
            }
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &BoundStmt) {
        match &stmt.kind {
            BoundStmtKind::Block(block) => self.block(block),
            BoundStmtKind::Expression(expr) => self.expr(expr),
            BoundStmtKind::LocalDeclaration { local, init } => {
                if let Some(init) = init {
                    self.expr(init);
                    self.assign_local(*local);
                }
            }
            BoundStmtKind::If { condition, then_branch, else_branch } => {
                let (when_true, when_false) = self.condition(condition);
                self.state = when_true;
                self.stmt(then_branch);
                let after_then = self.state.take();
                self.state = when_false;
                if let Some(else_branch) = else_branch {
                    self.stmt(else_branch);
                }
                self.state = join(after_then, self.state.take());
            }
            BoundStmtKind::While { condition, body, break_label, continue_label } => {
                let (when_true, when_false) = self.condition(condition);
                self.state = when_true;
                self.stmt(body);
                self.land(*continue_label);
                self.state = when_false;
                self.land(*break_label);
            }
            BoundStmtKind::DoWhile { body, condition, break_label, continue_label } => {
                self.stmt(body);
                self.land(*continue_label);
                let (_, when_false) = self.condition(condition);
                self.state = when_false;
                self.land(*break_label);
            }
            BoundStmtKind::For { init, condition, increments, body, break_label, continue_label, .. } => {
                for stmt in init {
                    self.stmt(stmt);
                }
                let (when_true, when_false) = match condition {
                    Some(condition) => self.condition(condition),
                    None => (self.state.clone(), None),
                };
                self.state = when_true;
                self.stmt(body);
                self.land(*continue_label);
                for increment in increments {
                    self.expr(increment);
                }
                self.state = when_false;
                self.land(*break_label);
            }
            BoundStmtKind::Foreach { local, collection, body, break_label, continue_label, .. } => {
                self.expr(collection);
                let before = self.state.clone();
                self.assign_local(*local);
                self.stmt(body);
                self.land(*continue_label);
                self.state = before;
                self.land(*break_label);
            }
            BoundStmtKind::Match { operand, sections, break_label } => {
                self.expr(operand);
                let entry = self.state.clone();
                let mut exit = if sections.iter().any(|s| s.labels.iter().any(BoundMatchLabel::is_default)) {
                    None
                } else {
                    entry.clone()
                };
                for section in sections {
                    let mut section_entry: State = None;
                    for label in &section.labels {
                        self.state = entry.clone();
                        if let Some(pattern) = &label.pattern {
                            self.pattern(pattern);
                        }
                        if let Some(guard) = &label.guard {
                            let (when_true, _) = self.condition(guard);
                            self.state = when_true;
                        }
                        section_entry = join(section_entry, self.state.take());
                    }
                    self.state = section_entry;
                    self.stmts(&section.stmts);
                    exit = join(exit, self.state.take());
                }
                self.state = exit;
                self.land(*break_label);
            }
            BoundStmtKind::Break(label) | BoundStmtKind::Continue(label) | BoundStmtKind::Goto(label) => {
                self.jump(*label)
            }
            BoundStmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
                self.check_out_params(stmt.span);
                self.state = None;
            }
            BoundStmtKind::Throw(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
                self.state = None;
            }
            BoundStmtKind::Try { block, catches, finally, .. } => {
                let entry = self.state.clone();
                self.block(block);
                let mut exit = self.state.take();
                for catch in catches {
                    self.state = entry.clone();
                    if let Some(local) = catch.local {
                        self.assign_local(local);
                    }
                    self.block(&catch.block);
                    exit = join(exit, self.state.take());
                }
                self.state = exit;
                if let Some(finally) = finally {
                    let after = self.state.take();
                    self.state = entry;
                    self.block(finally);
                    let finally_end = self.state.take();
                    self.state = union(after, finally_end);
                }
            }
            BoundStmtKind::YieldReturn(value) => self.expr(value),
            BoundStmtKind::YieldBreak => self.state = None,
            BoundStmtKind::Label(label) => self.land(*label),
            BoundStmtKind::ConditionalGoto { condition, label, .. } => {
                self.expr(condition);
                let state = self.state.clone();
                let merged = match self.jumps.remove(label) {
                    Some(existing) => join(existing, state),
                    None => state,
                };
                self.jumps.insert(*label, merged);
            }
            BoundStmtKind::SwitchDispatch { value, .. } => self.expr(value),
            BoundStmtKind::AwaitYieldPoint | BoundStmtKind::AwaitResumePoint | BoundStmtKind::NoOp => {}
        }
    }

    // ---
    // Expressions
    // ---

    /// States when `expr` is true and when it is false.
    fn condition(&mut self, expr: &BoundExpr) -> (State, State) {
        if let Some(value) = expr.constant.as_ref().and_then(|c| c.as_bool()) {
            self.expr(expr);
            let state = self.state.take();
            return if value { (state, None) } else { (None, state) };
        }
        match &expr.kind {
            BoundExprKind::Binary { op: BinaryOperator::LogicalAnd, left, right } => {
                let (left_true, left_false) = self.condition(left);
                self.state = left_true;
                let (right_true, right_false) = self.condition(right);
                (right_true, join(left_false, right_false))
            }
            BoundExprKind::Binary { op: BinaryOperator::LogicalOr, left, right } => {
                let (left_true, left_false) = self.condition(left);
                self.state = left_false;
                let (right_true, right_false) = self.condition(right);
                (join(left_true, right_true), right_false)
            }
            BoundExprKind::Unary { op: UnaryOperator::LogicalNot, operand } => {
                let (when_true, when_false) = self.condition(operand);
                (when_false, when_true)
            }
            BoundExprKind::IsPattern { operand, pattern } => {
                self.expr(operand);
                let when_false = self.state.clone();
                self.pattern(pattern);
                (self.state.take(), when_false)
            }
            _ => {
                self.expr(expr);
                let state = self.state.take();
                (state.clone(), state)
            }
        }
    }

    /// Pattern designations are assigned when the pattern matches.
    fn pattern(&mut self, pattern: &BoundPattern) {
        match &pattern.kind {
            BoundPatternKind::Wildcard => {}
            BoundPatternKind::Constant { value } => self.expr(value),
            BoundPatternKind::Declaration { local } => self.assign_local(*local),
            BoundPatternKind::Recursive { subpatterns, .. } | BoundPatternKind::Property { subpatterns, .. } => {
                for sub in subpatterns {
                    self.pattern(sub);
                }
            }
        }
    }

    /// Assign to `target` after evaluating its receiver.
    fn write(&mut self, target: &BoundExpr) {
        match &target.kind {
            BoundExprKind::Local(local) => self.assign_local(*local),
            BoundExprKind::Parameter(index) => self.assign_param(*index),
            BoundExprKind::Field { receiver, .. } | BoundExprKind::Property { receiver, .. } => {
                if let Some(receiver) = receiver {
                    self.expr(receiver);
                }
            }
            _ => self.expr(target),
        }
    }

    fn args(&mut self, args: &[BoundExpr], ref_kinds: &[RefKind]) {
        let mut outs = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            if ref_kinds.get(i) == Some(&RefKind::Out) {
                outs.push(arg);
            } else {
                self.expr(arg);
            }
        }
        for out in outs {
            self.write(out);
        }
    }

    fn expr(&mut self, expr: &BoundExpr) {
        use BoundExprKind::*;
        match &expr.kind {
            Literal(_) | This | BaseReference | DefaultValue | ConditionalReceiver => {}
            Local(local) => self.read_local(*local, expr.span),
            Parameter(_) => {}
            Field { receiver, .. } | Property { receiver, .. } | DelegateCreation { receiver, .. } => {
                if let Some(receiver) = receiver {
                    self.expr(receiver);
                }
            }
            Call { receiver, args, ref_kinds, .. } => {
                if let Some(receiver) = receiver {
                    self.expr(receiver);
                }
                self.args(args, ref_kinds);
            }
            ObjectCreation { args, ref_kinds, .. } => self.args(args, ref_kinds),
            DelegateInvoke { delegate, args } => {
                self.expr(delegate);
                for arg in args {
                    self.expr(arg);
                }
            }
            Lambda(lambda) => self.lambda(lambda),
            Unary { operand, .. } => self.expr(operand),
            Binary { op: BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr, .. } => {
                let (when_true, when_false) = self.condition(expr);
                self.state = join(when_true, when_false);
            }
            Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            IncrementDecrement { target, .. } => {
                self.expr(target);
                self.write(target);
            }
            CompoundAssignment { target, value, .. } => {
                self.expr(target);
                self.expr(value);
                self.write(target);
            }
            Assignment { target, value } => {
                if let Field { receiver: Some(receiver), .. } | Property { receiver: Some(receiver), .. } = &target.kind {
                    self.expr(receiver);
                }
                self.expr(value);
                if !matches!(target.kind, Field { .. } | Property { .. }) {
                    self.write(target);
                }
            }
            Conditional { condition, when_true, when_false } => {
                let (on_true, on_false) = self.condition(condition);
                self.state = on_true;
                self.expr(when_true);
                let after_true = self.state.take();
                self.state = on_false;
                self.expr(when_false);
                self.state = join(after_true, self.state.take());
            }
            NullCoalescing { left, right } => {
                self.expr(left);
                let after_left = self.state.clone();
                self.expr(right);
                self.state = join(after_left, self.state.take());
            }
            ConditionalAccess { receiver, access } => {
                self.expr(receiver);
                let after_receiver = self.state.clone();
                self.expr(access);
                self.state = join(after_receiver, self.state.take());
            }
            Conversion { operand, .. }
            | IsType { operand, .. }
            | AsType { operand, .. }
            | Await(operand)
            | NullableHasValue(operand)
            | NullableValueOrDefault(operand) => self.expr(operand),
            IsPattern { .. } => {
                let (when_true, when_false) = self.condition(expr);
                self.state = join(when_true, when_false);
            }
            Sequence { side_effects, value, .. } => {
                for effect in side_effects {
                    self.expr(effect);
                }
                self.expr(value);
            }
            Bad(children) => {
                for child in children {
                    self.expr(child);
                }
            }
        }
    }

    /// A lambda body is analyzed where the lambda is created; captured
    /// locals must be assigned by then.
    fn lambda(&mut self, lambda: &BoundLambda) {
        let saved_state = self.state.clone();
        let saved_jumps = std::mem::take(&mut self.jumps);
        for &param in &lambda.params {
            self.assign_local(param);
            self.referenced[param.index()] = true;
        }

        let return_type = if lambda.is_async {
            self.table
                .types
                .generic_args(lambda.return_type, GenericKind::Task)
                .and_then(|args| args.first().copied())
                .unwrap_or(TypeId::VOID)
        } else {
            lambda.return_type
        };
        self.functions.push(FunctionFlow {
            out_params: Vec::new(),
            name: "lambda expression".to_string(),
            requires_return: return_type != TypeId::VOID && !return_type.is_error(),
        });
        self.block(&lambda.body);
        self.end_of_function(lambda.body.span);
        self.functions.pop();

        self.jumps = saved_jumps;
        self.state = saved_state;
    }
}

#[cfg(test)]
mod tests {
    use crate::binder::tests::{bind_all, codes};
    use sable_symbols::{ErrorCode, Severity};

    fn diagnostics(source: &str) -> Vec<(ErrorCode, Severity)> {
        let (_, bag) = bind_all(source);
        bag.iter().map(|d| (d.code, d.severity)).collect()
    }

    fn has(source: &str, code: ErrorCode) -> bool {
        diagnostics(source).iter().any(|(c, _)| *c == code)
    }

    #[test]
    fn test_use_before_assignment() {
        assert!(has("class P { static int F() { int x; return x; } }", ErrorCode::UseDefViolation));
        assert!(!has(
            "class P { static int F(bool b) { int x; if (b) x = 1; else x = 2; return x; } }",
            ErrorCode::UseDefViolation
        ));
        assert!(has(
            "class P { static int F(bool b) { int x; if (b) x = 1; return x; } }",
            ErrorCode::UseDefViolation
        ));
    }

    #[test]
    fn test_pattern_locals_assigned_when_true() {
        let (_, bag) = bind_all("class P { static int F(object o) { if (o is int i && i > 0) return i; return 0; } }");
        assert!(bag.iter().all(|d| !d.is_error()), "{:?}", codes(&bag));
        assert!(has(
            "class P { static int F(object o) { if (o is int i || true) return i; return 0; } }",
            ErrorCode::UseDefViolation
        ));
    }

    #[test]
    fn test_missing_return() {
        assert!(has("class P { static int F(bool b) { if (b) return 1; } }", ErrorCode::ReturnExpected));
        assert!(!has("class P { static int F() { while (true) { } } }", ErrorCode::ReturnExpected));
        assert!(!has("class P { static int F() { throw new Exception(); } }", ErrorCode::ReturnExpected));
        assert!(has("class P { static void F() { Func<int> f = () => { }; } }", ErrorCode::ReturnExpected));
    }

    #[test]
    fn test_out_parameters() {
        assert!(has("class P { static void F(out int x) { } }", ErrorCode::UnassignedOut));
        let (_, bag) = bind_all(
            "class P { static void F(out int x) { x = 1; } static int G() { int y; F(out y); return y; } }",
        );
        assert!(bag.iter().all(|d| !d.is_error()), "{:?}", codes(&bag));
    }

    #[test]
    fn test_warnings() {
        let found = diagnostics("class P { static int F() { int unused; return 1; int after = 2; } }");
        assert!(found.contains(&(ErrorCode::UnreachableCode, Severity::Warning)));
        assert!(found.contains(&(ErrorCode::UnreferencedVar, Severity::Warning)));
        assert!(found.iter().all(|(_, s)| *s == Severity::Warning));
    }

    #[test]
    fn test_loops_definite_assignment() {
        assert!(!has(
            "class P { static int F() { int x; while (true) { x = 1; break; } return x; } }",
            ErrorCode::UseDefViolation
        ));
        assert!(has(
            "class P { static int F(bool b) { int x; while (b) { x = 1; } return x; } }",
            ErrorCode::UseDefViolation
        ));
        assert!(!has(
            "class P { static int F() { int x; try { x = 1; } finally { } return x; } }",
            ErrorCode::UseDefViolation
        ));
    }
}
