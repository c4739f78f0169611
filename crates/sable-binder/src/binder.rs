//! The method binder: scopes, function contexts and the entry points that
//! bind method bodies and field initializers.

use rustc_hash::FxHashMap;
use sable_lexer::Span;
use sable_parser::{ConstructorDecl, ConstructorInitializerKind, Identifier, MethodBodySyntax};
use sable_symbols::{
    ClassId, DiagnosticBag, ErrorCode, GenericKind, MethodId, MethodKind, ParameterSymbol,
    Severity, Symbol, SymbolLookup, SymbolTable, SynthesizedKind, TypeId,
};
use tracing::trace;

use crate::bound::*;
use crate::declare::{DeclaredProgram, InitValue, MethodSource};
use crate::lookup::TypeScope;
use crate::statements::contains_yield;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindingMode {
    Method,
    /// Field initializers; primary constructor parameters are in scope
    Initializer,
    /// `const` and enum member values
    Constant,
}

/// A `break` target and the `continue` target that goes with it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Breakable {
    pub break_label: LabelId,
    pub continue_label: Option<LabelId>,
}

/// The innermost method or lambda being bound.
#[derive(Debug, Clone)]
pub(crate) struct FunctionContext {
    pub return_type: TypeId,
    pub is_async: bool,
    pub is_iterator: bool,
    pub is_lambda: bool,
    /// Display name used in diagnostics
    pub name: String,
    pub breakables: Vec<Breakable>,
    /// Nesting of try, catch and finally blocks
    pub try_depth: u32,
    pub catch_depth: u32,
    pub finally_depth: u32,
}

impl FunctionContext {
    pub fn new(name: impl Into<String>, return_type: TypeId) -> Self {
        Self {
            return_type,
            is_async: false,
            is_iterator: false,
            is_lambda: false,
            name: name.into(),
            breakables: Vec::new(),
            try_depth: 0,
            catch_depth: 0,
            finally_depth: 0,
        }
    }

    /// The type a `return` expression converts to: the `T` of an async
    /// `Task<T>`, `void` for async `Task` and `void`.
    pub fn effective_return_type(&self, table: &SymbolTable) -> TypeId {
        if !self.is_async {
            return self.return_type;
        }
        table
            .types
            .generic_args(self.return_type, GenericKind::Task)
            .and_then(|args| args.first().copied())
            .unwrap_or(TypeId::VOID)
    }
}

#[derive(Debug, Default)]
struct Scope {
    names: FxHashMap<Symbol, LocalId>,
    locals: Vec<LocalId>,
}

/// Binds the expressions and statements of one member.
pub(crate) struct MethodBinder<'p, 'a> {
    pub(crate) program: &'p DeclaredProgram<'a>,
    pub(crate) table: &'a SymbolTable,
    pub(crate) class: ClassId,
    pub(crate) scope: TypeScope,
    pub(crate) method: Option<MethodId>,
    pub(crate) is_static: bool,
    pub(crate) is_constructor: bool,
    pub(crate) params: Vec<ParameterSymbol>,
    pub(crate) locals: LocalTable,
    scopes: Vec<Scope>,
    pub(crate) functions: Vec<FunctionContext>,
    diagnostics: DiagnosticBag,
    pub(crate) has_errors: bool,
    pub(crate) mode: BindingMode,
}

impl<'p, 'a> MethodBinder<'p, 'a> {
    fn new(program: &'p DeclaredProgram<'a>, class: ClassId, mode: BindingMode) -> Self {
        let table = program.table;
        Self {
            program,
            table,
            class,
            scope: TypeScope::for_class(table, class),
            method: None,
            is_static: true,
            is_constructor: false,
            params: Vec::new(),
            locals: LocalTable::new(),
            scopes: vec![Scope::default()],
            functions: vec![FunctionContext::new(table.class_name(class), TypeId::VOID)],
            diagnostics: DiagnosticBag::new(),
            has_errors: false,
            mode,
        }
    }

    pub(crate) fn for_constant(program: &'p DeclaredProgram<'a>, class: ClassId) -> Self {
        Self::new(program, class, BindingMode::Constant)
    }

    fn for_initializers(program: &'p DeclaredProgram<'a>, class: ClassId, is_static: bool) -> Self {
        let mut binder = Self::new(program, class, BindingMode::Initializer);
        binder.is_static = is_static;
        binder.is_constructor = true;
        if !is_static {
            binder.params = program
                .table
                .class(class)
                .primary_params
                .iter()
                .map(|p| ParameterSymbol::new(p.name.clone(), p.ty))
                .collect();
        }
        binder
    }

    fn for_method(program: &'p DeclaredProgram<'a>, method: MethodId) -> Self {
        let table = program.table;
        let symbol = table.method(method);
        let mut binder = Self::new(program, symbol.containing, BindingMode::Method);
        binder.method = Some(method);
        binder.is_static = symbol.is_static;
        binder.is_constructor = matches!(symbol.kind, MethodKind::Constructor | MethodKind::StaticConstructor);
        binder.params = symbol.params.clone();
        let mut function = FunctionContext::new(method_display_name(table, method), symbol.return_type);
        function.is_async = symbol.is_async;
        binder.functions = vec![function];
        binder
    }

    // ---
    // Diagnostics
    // ---

    pub(crate) fn error(&mut self, code: ErrorCode, span: Span, args: Vec<String>) {
        if code.severity() == Severity::Error {
            self.has_errors = true;
        }
        self.diagnostics.add(code, span, args);
    }

    pub(crate) fn into_diagnostics(self) -> DiagnosticBag {
        self.diagnostics
    }

    /// Run `f` with diagnostics discarded.
    pub(crate) fn silently<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = std::mem::take(&mut self.diagnostics);
        let saved_errors = self.has_errors;
        let result = f(self);
        self.diagnostics = saved;
        self.has_errors = saved_errors;
        result
    }

    /// Prune `candidates` against `source`, flagging the binder when the
    /// last candidate was rejected.
    pub(crate) fn prune(
        &mut self,
        span: Span,
        source: TypeId,
        constant: Option<&sable_symbols::ConstantValue>,
        candidates: &mut crate::candidates::TypeCandidates,
    ) {
        let before = self.diagnostics.len();
        crate::candidates::prune(self.table, span, source, constant, candidates, &mut self.diagnostics);
        if self.diagnostics.len() > before {
            self.has_errors = true;
        }
    }

    /// Resolve a type expression from this member's scope.
    pub(crate) fn resolve_type(&mut self, syntax: &sable_parser::TypeSyntax) -> TypeId {
        let before = self.diagnostics.error_count();
        let ty = crate::lookup::resolve_type(self.table, &self.scope, syntax, &mut self.diagnostics);
        if self.diagnostics.error_count() > before {
            self.has_errors = true;
        }
        ty
    }

    pub(crate) fn type_name(&self, ty: TypeId) -> String {
        self.table.type_name(ty)
    }

    // ---
    // Scopes and locals
    // ---

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Close the innermost scope, returning the locals it declared.
    pub(crate) fn pop_scope(&mut self) -> Vec<LocalId> {
        self.scopes.pop().map(|s| s.locals).unwrap_or_default()
    }

    pub(crate) fn declare_local(&mut self, name: &Identifier, ty: TypeId, kind: LocalKind) -> LocalId {
        let duplicate = self.lookup_local(name.as_str()).is_some()
            || self.params.iter().any(|p| p.name == name.name) && self.mode == BindingMode::Method;
        if duplicate {
            self.error(ErrorCode::LocalDuplicate, name.span, vec![name.name.to_string()]);
        }
        let id = self.locals.declare(name.name.clone(), ty, kind, name.span);
        if let Some(scope) = self.scopes.last_mut() {
            scope.names.insert(name.name.clone(), id);
            scope.locals.push(id);
        }
        id
    }

    pub(crate) fn lookup_local(&self, name: &str) -> Option<LocalId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.names.get(name).copied())
    }

    pub(crate) fn new_label(&mut self) -> LabelId {
        self.locals.new_label()
    }

    // ---
    // Function contexts
    // ---

    pub(crate) fn function(&self) -> &FunctionContext {
        self.functions.last().expect("function context")
    }

    pub(crate) fn function_mut(&mut self) -> &mut FunctionContext {
        self.functions.last_mut().expect("function context")
    }

    /// Whether `this` is available in the current context.
    pub(crate) fn has_this(&self) -> bool {
        !self.is_static && self.mode != BindingMode::Constant
    }

    pub(crate) fn this_expr(&self, span: Span) -> BoundExpr {
        let ty = self.table.class(self.class).type_id;
        BoundExpr::new(BoundExprKind::This, ty, span)
    }

    // ---
    // Bodies
    // ---

    fn bind_body(&mut self, body: &MethodBodySyntax) -> BoundBlock {
        match body {
            MethodBodySyntax::Block(block) => self.bind_block(block),
            MethodBodySyntax::Expression(expr) => self.bind_expression_body(expr),
        }
    }

    /// `=> expr` as a statement for void-like functions, otherwise as a
    /// return.
    pub(crate) fn bind_expression_body(&mut self, expr: &sable_parser::Expr) -> BoundBlock {
        let target = self.function().effective_return_type(self.table);
        let stmt = if target == TypeId::VOID {
            let bound = self.bind_expr(expr);
            BoundStmt::expression(bound)
        } else {
            let bound = self.bind_expr_to(expr, target);
            BoundStmt::new(BoundStmtKind::Return(Some(bound)), expr.span)
        };
        BoundBlock::new(vec![stmt], expr.span)
    }

    fn check_iterator(&mut self, span: Span) {
        let function = self.function();
        if function.is_async || iterator_element_type(self.table, function.return_type).is_none() {
            let args = vec![function.name.clone(), self.type_name(function.return_type)];
            self.error(ErrorCode::BadIteratorReturn, span, args);
        }
    }

    /// Call the base or sibling constructor a constructor chains to.
    fn bind_constructor_initializer(&mut self, decl: Option<&ConstructorDecl>, span: Span) -> Option<BoundStmt> {
        let symbol = self.table.class(self.class);
        let (target_class, is_this, args, span) = match decl.and_then(|d| d.initializer.as_ref()) {
            Some(init) => {
                let is_this = init.kind == ConstructorInitializerKind::This;
                let target = if is_this { Some(self.class) } else { symbol.base };
                (target?, is_this, init.args.as_slice(), init.span)
            }
            None => (symbol.base?, false, &[][..], span),
        };
        let receiver_type = self.table.class(target_class).type_id;
        let receiver = BoundExpr::new(
            if is_this { BoundExprKind::This } else { BoundExprKind::BaseReference },
            receiver_type,
            span,
        );
        let ctors = self.table.constructors(target_class);
        let name = self.table.class_name(target_class);
        let call = self.bind_constructor_call(&name, &ctors, args, Some(receiver), span);
        Some(BoundStmt::new(BoundStmtKind::Expression(call), span))
    }
}

/// `Program.Main(int)`-style name used in diagnostics.
pub fn method_display_name(table: &SymbolTable, method: MethodId) -> String {
    let symbol = table.method(method);
    let params: Vec<String> = symbol.params.iter().map(|p| table.type_name(p.ty)).collect();
    let name = match symbol.kind {
        MethodKind::Constructor | MethodKind::StaticConstructor => table.class(symbol.containing).name.to_string(),
        _ => symbol.name.to_string(),
    };
    format!("{}.{}({})", table.class_name(symbol.containing), name, params.join(", "))
}

/// Field initializers of one class, bound once and prepended to the
/// constructors that run them.
#[derive(Debug, Clone, Default)]
pub struct BoundInitializers {
    pub locals: LocalTable,
    pub statements: Vec<BoundStmt>,
    pub diagnostics: DiagnosticBag,
    pub has_errors: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TypeInitializers {
    pub static_inits: BoundInitializers,
    pub instance_inits: BoundInitializers,
}

/// Bind the static then the instance field initializers of `class`.
pub fn bind_type_initializers(program: &DeclaredProgram<'_>, class: ClassId) -> TypeInitializers {
    let Some(inits) = program.initializers(class) else {
        return TypeInitializers::default();
    };
    TypeInitializers {
        static_inits: bind_field_initializers(program, class, true, &inits.static_inits),
        instance_inits: bind_field_initializers(program, class, false, &inits.instance_inits),
    }
}

fn bind_field_initializers(
    program: &DeclaredProgram<'_>,
    class: ClassId,
    is_static: bool,
    inits: &[crate::declare::FieldInit<'_>],
) -> BoundInitializers {
    let table = program.table;
    let mut binder = MethodBinder::for_initializers(program, class, is_static);
    let mut statements = Vec::with_capacity(inits.len());
    for init in inits {
        let field = table.field(init.field);
        binder.push_scope();
        let value = match init.value {
            InitValue::Expr(expr) => binder.bind_expr_to(expr, field.ty),
            InitValue::PrimaryParameter(index) => {
                let ty = binder.params[index as usize].ty;
                BoundExpr::new(BoundExprKind::Parameter(index), ty, init.span)
            }
        };
        let receiver = (!is_static).then(|| Box::new(binder.this_expr(init.span)));
        let target = BoundExpr::new(
            BoundExprKind::Field { receiver, field: init.field },
            field.ty,
            init.span,
        );
        let assignment = BoundExpr::new(
            BoundExprKind::Assignment {
                target: Box::new(target),
                value: Box::new(value),
            },
            field.ty,
            init.span,
        );
        let locals = binder.pop_scope();
        let stmt = BoundStmt::new(BoundStmtKind::Expression(assignment), init.span);
        statements.push(if locals.is_empty() {
            stmt
        } else {
            BoundStmt::block(BoundBlock {
                locals,
                stmts: vec![stmt],
                span: init.span,
            })
        });
    }
    let has_errors = binder.has_errors;
    let locals = std::mem::take(&mut binder.locals);
    BoundInitializers {
        locals,
        statements,
        diagnostics: binder.into_diagnostics(),
        has_errors,
    }
}

/// The result of binding one method body.
#[derive(Debug)]
pub struct BindResult {
    pub method: BoundMethod,
    pub diagnostics: DiagnosticBag,
}

/// Bind the body of `method`. Returns `None` for methods without a bound
/// body: abstract and intrinsic methods, and members whose bodies are
/// synthesized during lowering.
pub fn bind_method(program: &DeclaredProgram<'_>, method: MethodId, inits: &TypeInitializers) -> Option<BindResult> {
    let table = program.table;
    let symbol = table.method(method);
    let source = program.source(method);
    let synthesized = symbol.synthesized;
    if source.is_none()
        && !matches!(
            synthesized,
            Some(SynthesizedKind::DefaultConstructor | SynthesizedKind::PrimaryConstructor | SynthesizedKind::StaticConstructor)
        )
    {
        return None;
    }
    trace!(method = %symbol.name, "bind method");

    let mut binder = MethodBinder::for_method(program, method);
    let class_span = table.class(symbol.containing).span;
    let constructor_inits = match symbol.kind {
        MethodKind::StaticConstructor => Some(&inits.static_inits),
        MethodKind::Constructor => Some(&inits.instance_inits),
        _ => None,
    };
    if let Some(inits) = constructor_inits {
        binder.locals = inits.locals.clone();
    }
    let first_own_local = binder.locals.len();

    let is_iterator = match source {
        Some(MethodSource::Method(decl)) => match &decl.body {
            Some(MethodBodySyntax::Block(block)) => contains_yield(&block.stmts),
            _ => false,
        },
        _ => false,
    };
    binder.function_mut().is_iterator = is_iterator;
    if is_iterator {
        binder.check_iterator(symbol.span);
    }

    let body = match source {
        Some(MethodSource::Method(decl)) => match &decl.body {
            Some(body) => binder.bind_body(body),
            None => return None,
        },
        Some(MethodSource::PropertyGetter(expr)) => binder.bind_expression_body(expr),
        Some(MethodSource::Constructor(decl)) => {
            let mut stmts = Vec::new();
            let chains_to_this = decl
                .initializer
                .as_ref()
                .is_some_and(|i| i.kind == ConstructorInitializerKind::This);
            if !symbol.is_static {
                stmts.extend(binder.bind_constructor_initializer(Some(decl), decl.name.span));
            }
            if let Some(inits) = constructor_inits.filter(|_| !chains_to_this) {
                stmts.extend(inits.statements.iter().cloned());
            }
            let body = binder.bind_block(&decl.body);
            stmts.push(BoundStmt::block(body));
            BoundBlock::new(stmts, decl.span)
        }
        None => {
            let mut stmts = Vec::new();
            if !symbol.is_static {
                stmts.extend(binder.bind_constructor_initializer(None, class_span));
            }
            if let Some(inits) = constructor_inits {
                stmts.extend(inits.statements.iter().cloned());
            }
            BoundBlock::new(stmts, class_span)
        }
    };

    let inherited_errors = constructor_inits.is_some_and(|i| i.has_errors);
    let has_errors = binder.has_errors || inherited_errors;
    let locals = std::mem::take(&mut binder.locals);
    Some(BindResult {
        method: BoundMethod {
            method,
            locals,
            first_own_local,
            body,
            is_iterator,
            has_errors,
        },
        diagnostics: binder.into_diagnostics(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::declare::declare_program;
    use sable_parser::{parse_compilation_unit, CompilationUnit};

    pub(crate) fn units(source: &str) -> Vec<CompilationUnit> {
        let (unit, errors) = parse_compilation_unit(source, 0);
        assert!(errors.is_empty(), "{:?}", errors);
        vec![unit]
    }

    /// Bind every method of the program and collect all diagnostics.
    pub(crate) fn bind_all(source: &str) -> (Vec<BoundMethod>, DiagnosticBag) {
        let table = SymbolTable::new();
        let units = units(source);
        let program = declare_program(&table, &units);
        let mut diagnostics = program.take_diagnostics();
        let mut methods = Vec::new();
        for declared in &program.types {
            let inits = bind_type_initializers(&program, declared.class);
            diagnostics.extend(inits.static_inits.diagnostics.clone());
            diagnostics.extend(inits.instance_inits.diagnostics.clone());
            for &m in &table.class(declared.class).methods {
                if let Some(result) = bind_method(&program, m, &inits) {
                    diagnostics.extend(result.diagnostics);
                    diagnostics.extend(crate::flow::analyze_flow(&table, &result.method));
                    methods.push(result.method);
                }
            }
        }
        (methods, diagnostics)
    }

    pub(crate) fn codes(diagnostics: &DiagnosticBag) -> Vec<ErrorCode> {
        diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_clean_program_binds_without_diagnostics() {
        let (methods, diagnostics) = bind_all(
            "class P { static int Twice(int x) { return x * 2; } static void Main() { int y = Twice(21); System.Console.WriteLine(y); } }",
        );
        assert!(diagnostics.is_empty(), "{:?}", codes(&diagnostics));
        assert_eq!(methods.len(), 3);
        assert!(methods.iter().all(|m| !m.has_errors));
    }

    #[test]
    fn test_constructor_runs_initializers_after_base_call() {
        let (methods, diagnostics) = bind_all(
            "class B { } class C : B { int a = 1; string s = \"x\"; public C() { a = 2; } public C(int v) : this() { a = v; } }",
        );
        assert!(diagnostics.is_empty(), "{:?}", codes(&diagnostics));
        let ctors: Vec<_> = methods.iter().filter(|m| m.body.stmts.len() > 1).collect();
        // C(): base call, two initializers, body. C(int): this call and body.
        let lengths: Vec<usize> = ctors.iter().map(|m| m.body.stmts.len()).collect();
        assert!(lengths.contains(&4));
        assert!(lengths.contains(&2));
    }

    #[test]
    fn test_record_initializers_copy_primary_parameters() {
        let (methods, diagnostics) = bind_all("record class Point(int x : X, int y : Y);");
        assert!(diagnostics.is_empty(), "{:?}", codes(&diagnostics));
        let ctor = &methods[0];
        assert_eq!(ctor.body.stmts.len(), 3);
        let BoundStmtKind::Expression(expr) = &ctor.body.stmts[1].kind else {
            panic!("expected an initializer");
        };
        let BoundExprKind::Assignment { value, .. } = &expr.kind else {
            panic!("expected an assignment");
        };
        assert!(matches!(value.kind, BoundExprKind::Parameter(0)));
    }

    #[test]
    fn test_iterator_return_type_is_checked() {
        let (_, diagnostics) = bind_all("class P { static int Numbers() { yield return 1; } }");
        assert!(diagnostics.contains(ErrorCode::BadIteratorReturn));
    }
}
