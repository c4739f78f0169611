//! Closure conversion.
//!
//! Every lambda becomes a method and the lambda expression a delegate
//! creation. A lambda that touches a captured variable becomes an
//! instance method of the method's display class `<>c__DisplayClassN`,
//! which holds every captured local and parameter (and `this` when a
//! closure needs it). One display class instance is created on entry to
//! the method and shared by all of its closures. A lambda that only uses
//! `this` becomes an instance method of the containing type; one that
//! uses neither becomes a static method there.

use rustc_hash::{FxHashMap, FxHashSet};
use sable_binder::visit::{rewrite_expr_children, rewrite_stmt_children, visit_expr_children, visit_stmt_children};
use sable_binder::{
    BoundBlock, BoundCatch, BoundExpr, BoundExprKind, BoundLambda, BoundStmt, BoundStmtKind,
    BoundTreeRewriter, BoundTreeWalker, LocalId, LocalTable,
};
use sable_symbols::{
    ClassId, ClassKind, ClassSymbol, FieldId, FieldSymbol, MethodId, MethodKind, MethodSymbol,
    ParameterSymbol, Symbol, SymbolLookup, SymbolTable, SynthesizedKind, TypeId,
};

use crate::factory::SyntheticFactory;
use crate::{LoweredMethod, SynthesizedMembers};

pub fn rewrite_lambdas(table: &SymbolTable, method: LoweredMethod, synthesized: &mut SynthesizedMembers) -> LoweredMethod {
    let mut analysis = CaptureAnalysis::default();
    analysis.visit_block(&method.body);
    if analysis.lambdas == 0 {
        return method;
    }
    let (captured, captured_params) = analysis.finish();

    let LoweredMethod { method: id, mut locals, body, state_machine } = method;
    let symbol = table.method(id);
    let span = body.span;
    tracing::debug!(
        method = %symbol.name,
        lambdas = analysis.lambdas,
        captured = captured.len() + captured_params.len(),
        "rewriting lambdas"
    );

    let mut rewriter = LambdaRewriter {
        table,
        factory: SyntheticFactory::new(table, span),
        method: id,
        containing: symbol.containing,
        method_name: symbol.name.clone(),
        is_static: symbol.is_static,
        locals: &mut locals,
        captured,
        captured_params,
        display: None,
        frames: vec![Frame::method()],
        lambda_methods: Vec::new(),
        synthesized,
    };
    let mut body = rewriter.rewrite_block(body);

    if let Some(display) = rewriter.display.take() {
        body.stmts.splice(0..0, rewriter.display_prologue(&display));
        body.locals.insert(0, display.local);
    }
    let lambda_methods = std::mem::take(&mut rewriter.lambda_methods);
    // Lambda bodies share the outer table, so local ids stay valid
    for (method, body) in lambda_methods {
        synthesized.methods.push(LoweredMethod {
            method,
            locals: locals.clone(),
            body,
            state_machine: None,
        });
    }

    LoweredMethod {
        method: id,
        locals,
        body,
        state_machine,
    }
}

/// Finds the locals referenced outside the function that declares them,
/// and the method parameters referenced inside some lambda.
#[derive(Default)]
struct CaptureAnalysis {
    lambdas: usize,
    /// Function currently visited; `0` is the method itself
    current: usize,
    owner: FxHashMap<LocalId, usize>,
    references: Vec<(LocalId, usize)>,
    captured_params: FxHashSet<u16>,
}

impl CaptureAnalysis {
    fn declare(&mut self, locals: &[LocalId]) {
        for &local in locals {
            self.owner.insert(local, self.current);
        }
    }

    fn finish(&self) -> (FxHashSet<LocalId>, FxHashSet<u16>) {
        let captured = self
            .references
            .iter()
            .filter(|(local, function)| self.owner.get(local).is_some_and(|owner| owner != function))
            .map(|&(local, _)| local)
            .collect();
        (captured, self.captured_params.clone())
    }
}

impl BoundTreeWalker for CaptureAnalysis {
    fn visit_expr(&mut self, expr: &BoundExpr) {
        match &expr.kind {
            BoundExprKind::Local(local) => {
                self.owner.entry(*local).or_insert(self.current);
                self.references.push((*local, self.current));
            }
            BoundExprKind::Parameter(index) if self.current != 0 => {
                self.captured_params.insert(*index);
            }
            BoundExprKind::Sequence { locals, .. } => {
                self.declare(locals);
                visit_expr_children(self, expr);
            }
            BoundExprKind::Lambda(lambda) => self.visit_lambda(lambda),
            _ => visit_expr_children(self, expr),
        }
    }

    fn visit_stmt(&mut self, stmt: &BoundStmt) {
        if let BoundStmtKind::Try { catches, .. } = &stmt.kind {
            let locals: Vec<LocalId> = catches.iter().filter_map(|c| c.local).collect();
            self.declare(&locals);
        }
        visit_stmt_children(self, stmt);
    }

    fn visit_block(&mut self, block: &BoundBlock) {
        self.declare(&block.locals);
        for stmt in &block.stmts {
            self.visit_stmt(stmt);
        }
    }

    fn visit_lambda(&mut self, lambda: &BoundLambda) {
        self.lambdas += 1;
        let outer = self.current;
        self.current = self.lambdas;
        self.declare(&lambda.params);
        self.visit_block(&lambda.body);
        self.current = outer;
    }
}

/// What one lambda, nested lambdas included, reaches outside itself.
struct LambdaUsage<'c> {
    captured: &'c FxHashSet<LocalId>,
    captured_params: &'c FxHashSet<u16>,
    uses_display: bool,
    uses_this: bool,
}

impl BoundTreeWalker for LambdaUsage<'_> {
    fn visit_expr(&mut self, expr: &BoundExpr) {
        match &expr.kind {
            BoundExprKind::Local(local) if self.captured.contains(local) => self.uses_display = true,
            BoundExprKind::Parameter(index) if self.captured_params.contains(index) => self.uses_display = true,
            BoundExprKind::This | BoundExprKind::BaseReference => self.uses_this = true,
            _ => {}
        }
        visit_expr_children(self, expr);
    }
}

struct DisplayClass {
    class: ClassId,
    class_type: TypeId,
    constructor: MethodId,
    /// The instance in the outer method
    local: LocalId,
    this_field: Option<FieldId>,
    local_fields: FxHashMap<LocalId, FieldId>,
    param_fields: Vec<(u16, FieldId)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Method,
    /// Instance method of the display class
    Display,
    /// Instance method of the containing type
    Instance,
    Static,
}

struct Frame {
    kind: FrameKind,
    /// Parameters of the lambda, by local
    params: FxHashMap<LocalId, u16>,
}

impl Frame {
    fn method() -> Self {
        Self {
            kind: FrameKind::Method,
            params: FxHashMap::default(),
        }
    }
}

struct LambdaRewriter<'a, 's> {
    table: &'a SymbolTable,
    factory: SyntheticFactory<'a>,
    method: MethodId,
    containing: ClassId,
    method_name: Symbol,
    is_static: bool,
    locals: &'s mut LocalTable,
    captured: FxHashSet<LocalId>,
    captured_params: FxHashSet<u16>,
    display: Option<DisplayClass>,
    frames: Vec<Frame>,
    lambda_methods: Vec<(MethodId, BoundBlock)>,
    synthesized: &'s mut SynthesizedMembers,
}

impl LambdaRewriter<'_, '_> {
    fn frame(&self) -> &Frame {
        self.frames.last().unwrap_or_else(|| unreachable!("frame stack is never empty"))
    }

    fn display(&mut self) -> &mut DisplayClass {
        if self.display.is_none() {
            let display = self.create_display_class();
            self.display = Some(display);
        }
        self.display.as_mut().unwrap_or_else(|| unreachable!())
    }

    fn create_display_class(&mut self) -> DisplayClass {
        let table = self.table;
        let f = self.factory;
        let name = table.unique_member_name(self.containing, "<>c__DisplayClass");
        let mut symbol = ClassSymbol::new(name, ClassKind::DisplayClass);
        symbol.containing = Some(self.containing);
        symbol.is_sealed = true;
        symbol.span = f.span;
        let class = table.add_class(symbol);
        self.synthesized.classes.push(class);
        tracing::debug!(class = %table.class_name(class), "created display class");

        let constructor = table.add_method(
            MethodSymbol::new(".ctor", class, MethodKind::Constructor, TypeId::VOID)
                .with_synthesized(SynthesizedKind::Rewritten),
        );
        let base = table.constructors(ClassId::OBJECT)[0];
        self.synthesized.methods.push(LoweredMethod {
            method: constructor,
            locals: LocalTable::new(),
            body: BoundBlock::new(
                vec![
                    f.stmt(f.call(
                        Some(BoundExpr::new(BoundExprKind::BaseReference, TypeId::OBJECT, f.span)),
                        base,
                        Vec::new(),
                    )),
                    f.ret(None),
                ],
                f.span,
            ),
            state_machine: None,
        });

        let class_type = table.class(class).type_id;
        DisplayClass {
            class,
            class_type,
            constructor,
            local: self.locals.temp(class_type),
            this_field: None,
            local_fields: FxHashMap::default(),
            param_fields: Vec::new(),
        }
    }

    fn add_display_field(&mut self, name: String, ty: TypeId) -> FieldId {
        let class = self.display().class;
        self.table.add_field(FieldSymbol::new(name, class, ty))
    }

    fn local_field(&mut self, local: LocalId) -> FieldId {
        if let Some(&field) = self.display().local_fields.get(&local) {
            return field;
        }
        let symbol = self.locals.get(local);
        let (name, ty) = (symbol.name.to_string(), symbol.ty);
        let field = self.add_display_field(name, ty);
        self.display().local_fields.insert(local, field);
        field
    }

    fn param_field(&mut self, index: u16) -> FieldId {
        if let Some(&(_, field)) = self.display().param_fields.iter().find(|(i, _)| *i == index) {
            return field;
        }
        let method = self.table.method(self.method);
        let param = &method.params[index as usize];
        let field = self.add_display_field(param.name.to_string(), param.ty);
        self.display().param_fields.push((index, field));
        field
    }

    /// The display class instance as seen from the current frame.
    fn display_ref(&mut self) -> BoundExpr {
        let kind = self.frame().kind;
        let display = self.display();
        let (local, class_type, class) = (display.local, display.class_type, display.class);
        match kind {
            FrameKind::Method => self.factory.local(local, class_type),
            FrameKind::Display => self.factory.this(class),
            FrameKind::Instance | FrameKind::Static => {
                unreachable!("closure without a display class reaches a captured variable")
            }
        }
    }

    /// `this` of the user method as seen from the current frame.
    fn this_ref(&mut self, ty: TypeId) -> BoundExpr {
        match self.frame().kind {
            FrameKind::Method | FrameKind::Instance => BoundExpr::new(BoundExprKind::This, ty, self.factory.span),
            FrameKind::Display => {
                let field = match self.display().this_field {
                    Some(field) => field,
                    None => {
                        let this_type = self.table.class(self.containing).type_id;
                        let field = self.add_display_field("<>4__this".to_string(), this_type);
                        self.display().this_field = Some(field);
                        field
                    }
                };
                let class = self.display().class;
                let f = self.factory;
                BoundExpr { ty, ..f.field(Some(f.this(class)), field) }
            }
            FrameKind::Static => unreachable!("`this` in a static closure"),
        }
    }

    /// `env = new DisplayClass(); env.<>4__this = this; env.p = p; ...`
    fn display_prologue(&self, display: &DisplayClass) -> Vec<BoundStmt> {
        let f = self.factory;
        let env = f.local(display.local, display.class_type);
        let mut stmts = vec![f.assign_stmt(env.clone(), f.new_object(display.constructor, Vec::new()))];
        if let Some(this_field) = display.this_field {
            stmts.push(f.assign_stmt(f.field(Some(env.clone()), this_field), f.this(self.containing)));
        }
        for &(index, field) in &display.param_fields {
            let ty = self.table.field(field).ty;
            stmts.push(f.assign_stmt(f.field(Some(env.clone()), field), f.parameter(index, ty)));
        }
        stmts
    }

    fn rewrite_lambda_expr(&mut self, lambda: BoundLambda, ty: TypeId, span: sable_lexer::Span) -> BoundExpr {
        let mut usage = LambdaUsage {
            captured: &self.captured,
            captured_params: &self.captured_params,
            uses_display: false,
            uses_this: false,
        };
        usage.visit_lambda(&lambda);
        let kind = if usage.uses_display || lambda.params.iter().any(|p| self.captured.contains(p)) {
            FrameKind::Display
        } else if usage.uses_this && !self.is_static {
            FrameKind::Instance
        } else {
            FrameKind::Static
        };

        let class = match kind {
            FrameKind::Display => self.display().class,
            _ => self.containing,
        };
        let params: Vec<ParameterSymbol> = lambda
            .params
            .iter()
            .map(|&p| {
                let local = self.locals.get(p);
                ParameterSymbol::new(local.name.clone(), local.ty)
            })
            .collect();
        let name = self.table.unique_member_name(class, &format!("<{}>b__", self.method_name));
        let mut symbol = MethodSymbol::new(name, class, MethodKind::Lambda, lambda.return_type)
            .with_params(params)
            .with_synthesized(SynthesizedKind::Rewritten);
        symbol.is_static = kind == FrameKind::Static;
        symbol.is_async = lambda.is_async;
        symbol.span = span;
        let method = self.table.add_method(symbol);

        // The receiver is evaluated in the enclosing frame
        let receiver = match kind {
            FrameKind::Display => Some(self.display_ref()),
            FrameKind::Instance => Some(self.this_ref(self.table.class(self.containing).type_id)),
            _ => None,
        };

        self.frames.push(Frame {
            kind,
            params: lambda.params.iter().enumerate().map(|(i, &p)| (p, i as u16)).collect(),
        });
        let mut body = self.rewrite_block(lambda.body);
        let mut prologue = Vec::new();
        for (index, &param) in lambda.params.iter().enumerate() {
            if self.captured.contains(&param) {
                let ty = self.locals.ty(param);
                let field = self.local_field(param);
                let env = self.display_ref();
                let f = self.factory.at(span);
                prologue.push(f.assign_stmt(f.field(Some(env), field), f.parameter(index as u16, ty)));
            }
        }
        self.frames.pop();
        body.stmts.splice(0..0, prologue);
        self.lambda_methods.push((method, body));

        BoundExpr::new(
            BoundExprKind::DelegateCreation {
                method,
                receiver: receiver.map(Box::new),
            },
            ty,
            span,
        )
    }

    fn uncaptured(&self, locals: Vec<LocalId>) -> Vec<LocalId> {
        locals.into_iter().filter(|l| !self.captured.contains(l)).collect()
    }
}

impl BoundTreeRewriter for LambdaRewriter<'_, '_> {
    fn rewrite_expr(&mut self, expr: BoundExpr) -> BoundExpr {
        let f = self.factory.at(expr.span);
        match expr.kind {
            BoundExprKind::Local(local) if self.captured.contains(&local) => {
                let field = self.local_field(local);
                let env = self.display_ref();
                BoundExpr { ty: expr.ty, ..f.field(Some(env), field) }
            }
            BoundExprKind::Local(local) => match self.frame().params.get(&local) {
                Some(&index) => f.parameter(index, expr.ty),
                None => BoundExpr { kind: BoundExprKind::Local(local), ..expr },
            },
            BoundExprKind::Parameter(index) if self.captured_params.contains(&index) => {
                let field = self.param_field(index);
                let env = self.display_ref();
                BoundExpr { ty: expr.ty, ..f.field(Some(env), field) }
            }
            BoundExprKind::This if self.frame().kind != FrameKind::Method => {
                let this = self.this_ref(expr.ty);
                BoundExpr { span: expr.span, ..this }
            }
            BoundExprKind::BaseReference if self.frame().kind == FrameKind::Display => {
                let this = self.this_ref(expr.ty);
                BoundExpr { span: expr.span, ..this }
            }
            BoundExprKind::Lambda(lambda) => self.rewrite_lambda_expr(*lambda, expr.ty, expr.span),
            BoundExprKind::Sequence { locals, side_effects, value } => {
                let locals = self.uncaptured(locals);
                let side_effects = side_effects.into_iter().map(|e| self.rewrite_expr(e)).collect();
                let value = Box::new(self.rewrite_expr(*value));
                BoundExpr {
                    kind: BoundExprKind::Sequence { locals, side_effects, value },
                    ..expr
                }
            }
            kind => rewrite_expr_children(self, BoundExpr { kind, ..expr }),
        }
    }

    fn rewrite_stmt(&mut self, stmt: BoundStmt) -> BoundStmt {
        let f = self.factory.at(stmt.span);
        match stmt.kind {
            BoundStmtKind::LocalDeclaration { local, init } if self.captured.contains(&local) => match init {
                Some(init) => {
                    let ty = self.locals.ty(local);
                    let target = self.rewrite_expr(f.local(local, ty));
                    let value = self.rewrite_expr(init);
                    f.assign_stmt(target, value)
                }
                None => f.no_op(),
            },
            BoundStmtKind::Try { block, catches, finally, is_async_catch } => {
                let block = self.rewrite_block(block);
                let catches = catches
                    .into_iter()
                    .map(|catch| self.rewrite_catch(catch))
                    .collect();
                let finally = finally.map(|b| self.rewrite_block(b));
                BoundStmt::new(BoundStmtKind::Try { block, catches, finally, is_async_catch }, stmt.span)
            }
            kind => rewrite_stmt_children(self, BoundStmt::new(kind, stmt.span)),
        }
    }

    fn rewrite_block(&mut self, block: BoundBlock) -> BoundBlock {
        BoundBlock {
            locals: self.uncaptured(block.locals),
            stmts: block.stmts.into_iter().map(|s| self.rewrite_stmt(s)).collect(),
            span: block.span,
        }
    }
}

impl LambdaRewriter<'_, '_> {
    /// A captured exception variable stays the catch local and is copied
    /// into its field on entry to the handler.
    fn rewrite_catch(&mut self, catch: BoundCatch) -> BoundCatch {
        let mut block = self.rewrite_block(catch.block);
        if let Some(local) = catch.local.filter(|l| self.captured.contains(l)) {
            let f = self.factory.at(catch.span);
            let ty = self.locals.ty(local);
            let field = self.local_field(local);
            let env = self.display_ref();
            block.stmts.insert(0, f.assign_stmt(f.field(Some(env), field), f.local(local, ty)));
        }
        BoundCatch { block, ..catch }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_rewriter::rewrite_locals;
    use crate::test_support::{bind_source, method_named};

    fn rewrite(source: &str) -> (SymbolTable, LoweredMethod, SynthesizedMembers) {
        let (table, methods) = bind_source(source);
        let bound = method_named(&table, &methods, "M");
        let mut synthesized = SynthesizedMembers::new();
        let lowered = rewrite_locals(&table, bound, &mut synthesized);
        let rewritten = rewrite_lambdas(&table, lowered, &mut synthesized);
        (table, rewritten, synthesized)
    }

    #[derive(Default)]
    struct Delegates(Vec<(MethodId, Option<BoundExprKind>)>, usize);

    impl BoundTreeWalker for Delegates {
        fn visit_expr(&mut self, expr: &BoundExpr) {
            match &expr.kind {
                BoundExprKind::DelegateCreation { method, receiver } => {
                    self.0.push((*method, receiver.as_ref().map(|r| r.kind.clone())));
                }
                BoundExprKind::Lambda(_) => self.1 += 1,
                _ => {}
            }
            visit_expr_children(self, expr);
        }
    }

    fn delegates(block: &BoundBlock) -> Delegates {
        let mut walker = Delegates::default();
        walker.visit_block(block);
        walker
    }

    fn lambda_body<'m>(synthesized: &'m SynthesizedMembers, method: MethodId) -> &'m LoweredMethod {
        synthesized.methods.iter().find(|m| m.method == method).expect("lambda body")
    }

    #[test]
    fn test_non_capturing_lambda_is_static() {
        let (table, method, synthesized) = rewrite(
            "using System; class P { static int M() { Func<int, int> f = x => x + 1; return f(2); } }",
        );
        let found = delegates(&method.body);
        assert_eq!(found.1, 0);
        let [(lambda, None)] = found.0.as_slice() else { panic!("expected one static delegate") };
        let symbol = table.method(*lambda);
        assert!(symbol.is_static);
        assert_eq!(symbol.kind, MethodKind::Lambda);
        assert!(symbol.name.starts_with("<M>b__"));
        assert!(synthesized.classes.is_empty());
        let body = lambda_body(&synthesized, *lambda);
        let BoundStmtKind::Return(Some(value)) = &body.body.stmts[0].kind else { panic!() };
        let BoundExprKind::Binary { left, .. } = &value.kind else { panic!() };
        assert!(matches!(left.kind, BoundExprKind::Parameter(0)));
    }

    #[test]
    fn test_this_only_lambda_is_instance_method() {
        let (table, method, synthesized) = rewrite(
            "using System; class P { int k; int M() { Func<int> f = () => k; return f(); } }",
        );
        let found = delegates(&method.body);
        let [(lambda, Some(BoundExprKind::This))] = found.0.as_slice() else { panic!("expected `this` receiver") };
        let symbol = table.method(*lambda);
        assert!(!symbol.is_static);
        assert_eq!(table.class_name(symbol.containing), "P");
        assert!(synthesized.classes.is_empty());
    }

    #[test]
    fn test_captured_local_moves_to_display_class() {
        let (table, method, synthesized) = rewrite(
            "using System; class P { static int M() { int total = 0; Action add = () => total = total + 1; add(); return total; } }",
        );
        assert_eq!(synthesized.classes.len(), 1);
        let display = synthesized.classes[0];
        assert!(table.class(display).name.starts_with("<>c__DisplayClass"));
        let fields: Vec<String> = table.class(display).fields.iter().map(|&f| table.field(f).name.to_string()).collect();
        assert_eq!(fields, vec!["total".to_string()]);

        // env = new <>c__DisplayClassN(); first
        let BoundStmtKind::Expression(first) = &method.body.stmts[0].kind else { panic!() };
        assert!(matches!(&first.kind, BoundExprKind::Assignment { value, .. }
            if matches!(value.kind, BoundExprKind::ObjectCreation { .. })));
        let BoundStmtKind::Return(Some(value)) = &method.body.stmts.last().unwrap().kind else { panic!() };
        assert!(matches!(value.kind, BoundExprKind::Field { .. }));

        let found = delegates(&method.body);
        let [(lambda, Some(BoundExprKind::Local(_)))] = found.0.as_slice() else { panic!("expected env receiver") };
        assert_eq!(table.method(*lambda).containing, display);
    }

    #[test]
    fn test_captured_parameter_is_copied_on_entry() {
        let (table, method, synthesized) = rewrite(
            "using System; class P { static int M(int n) { Func<int> f = () => n * 2; return f(); } }",
        );
        let display = synthesized.classes[0];
        let fields: Vec<String> = table.class(display).fields.iter().map(|&f| table.field(f).name.to_string()).collect();
        assert_eq!(fields, vec!["n".to_string()]);
        let BoundStmtKind::Expression(copy) = &method.body.stmts[1].kind else { panic!() };
        let BoundExprKind::Assignment { value, .. } = &copy.kind else { panic!() };
        assert!(matches!(value.kind, BoundExprKind::Parameter(0)));
    }

    #[test]
    fn test_nested_lambda_captures_outer_lambda_parameter() {
        let (table, _, synthesized) = rewrite(
            "using System; class P { static int M() { \
             Func<int, Func<int>> make = x => () => x; return make(3)(); } }",
        );
        let display = synthesized.classes[0];
        let lambdas: Vec<&LoweredMethod> = synthesized
            .methods
            .iter()
            .filter(|m| table.method(m.method).kind == MethodKind::Lambda)
            .collect();
        assert_eq!(lambdas.len(), 2);
        assert!(lambdas.iter().all(|m| table.method(m.method).containing == display));
        // the outer lambda stores its parameter before creating the inner one
        let outer = lambdas.iter().find(|m| table.method(m.method).params.len() == 1).unwrap();
        let BoundStmtKind::Expression(copy) = &outer.body.stmts[0].kind else { panic!() };
        let BoundExprKind::Assignment { value, .. } = &copy.kind else { panic!() };
        assert!(matches!(value.kind, BoundExprKind::Parameter(0)));
    }
}
