//! The method compiler.
//!
//! Every top-level type is one job on the worker pool. A job binds the
//! type's field initializers, then binds, checks, lowers and emits each
//! method in declaration order, then does the same for the nested types.
//! Lowering leaves synthesized bodies behind (lambdas, state machine
//! members, helpers); those are compiled in a second round of jobs once
//! every declared type is done.

use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashSet;
use sable_binder::{
    analyze_flow, bind_method, bind_type_initializers, declare_program, method_display_name,
    DeclaredProgram, TypeInitializers,
};
use sable_codegen::{generate_method, MethodBody, StringPool};
use sable_lexer::Span;
use sable_lowering::{
    rewrite_async, rewrite_await_in_handlers, rewrite_iterator, rewrite_lambdas, rewrite_locals,
    synthesize_body, LoweredMethod, SynthesizedMembers,
};
use sable_parser::parse_compilation_unit;
use sable_symbols::{ClassId, DiagnosticBag, ErrorCode, MethodId, SymbolLookup, SymbolTable, TypeId};
use tracing::{debug, debug_span, info, info_span, trace_span};

use crate::cancel::CancellationToken;
use crate::error::CompileError;
use crate::module::{Compilation, CompiledModule, SourceFile};
use crate::options::{CompilationOptions, OutputKind};
use crate::pool::WorkerPool;

/// Compile `sources` into a module.
pub fn compile(sources: &[SourceFile], options: &CompilationOptions) -> Result<Compilation, CompileError> {
    compile_with_cancellation(sources, options, &CancellationToken::new())
}

/// Compile `sources`, giving up with [`CompileError::Cancelled`] once
/// `cancel` is signalled.
pub fn compile_with_cancellation(
    sources: &[SourceFile],
    options: &CompilationOptions,
    cancel: &CancellationToken,
) -> Result<Compilation, CompileError> {
    let _span = info_span!("compile_module", files = sources.len()).entered();

    let mut diagnostics = DiagnosticBag::new();
    let mut units = Vec::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        let file_id = u16::try_from(index).map_err(|_| CompileError::TooManyFiles(sources.len()))?;
        let (unit, errors) = parse_compilation_unit(&source.text, file_id);
        for error in errors {
            diagnostics.add(ErrorCode::ParseError, error.span(), vec![error.to_string()]);
        }
        units.push(unit);
    }

    let table = SymbolTable::new();
    let program = declare_program(&table, &units);
    diagnostics.extend(program.take_diagnostics());

    let compiler = MethodCompiler::new(&program, options, cancel, diagnostics.has_errors());
    let pool = WorkerPool::new(options.effective_threads());
    let mut declared = compiler.compile_declared(&pool)?;
    let pending = std::mem::take(&mut declared.synthesized);
    let synthesized = compiler.compile_pending(&pool, pending)?;
    diagnostics.extend(declared.diagnostics);
    diagnostics.extend(synthesized.diagnostics);
    let mut bodies = declared.bodies;
    bodies.extend(synthesized.bodies);

    let entry_point = find_entry_point(&program);
    if entry_point.is_none() && options.output_kind == OutputKind::ConsoleApplication {
        diagnostics.add(ErrorCode::NoMainMethod, Span::dummy(), Vec::new());
    }
    diagnostics.sort();

    let failed = diagnostics.has_errors() || compiler.has_errors.load(Ordering::Relaxed);
    info!(
        errors = diagnostics.error_count(),
        methods = bodies.len(),
        strings = compiler.strings.len(),
        "compilation finished"
    );
    if failed || !options.emit {
        return Ok(Compilation { diagnostics, module: None });
    }

    let mut methods: Vec<Option<MethodBody>> = vec![None; table.method_count()];
    for (method, body) in bodies {
        methods[method.index()] = Some(body);
    }
    let module = CompiledModule {
        symbols: table.snapshot(),
        methods,
        strings: compiler.strings.into_strings(),
        entry_point,
    };
    Ok(Compilation {
        diagnostics,
        module: Some(module),
    })
}

/// A static parameterless `Main` returning `void` or `int`.
fn find_entry_point(program: &DeclaredProgram<'_>) -> Option<MethodId> {
    let table = program.table;
    program.types.iter().find_map(|declared| {
        table.class(declared.class).methods.iter().copied().find(|&m| {
            let method = table.method(m);
            &*method.name == "Main"
                && method.is_static
                && method.params.is_empty()
                && method.synthesized.is_none()
                && (method.return_type == TypeId::VOID || method.return_type == TypeId::INT)
        })
    })
}

/// What one job produced.
#[derive(Default)]
struct TypeOutput {
    bodies: Vec<(MethodId, MethodBody)>,
    diagnostics: DiagnosticBag,
    /// One group per type that left synthesized bodies behind
    synthesized: Vec<SynthesizedMembers>,
}

impl TypeOutput {
    fn merge(&mut self, other: TypeOutput) {
        self.bodies.extend(other.bodies);
        self.diagnostics.extend(other.diagnostics);
        self.synthesized.extend(other.synthesized);
    }
}

struct MethodCompiler<'p, 'a> {
    program: &'p DeclaredProgram<'a>,
    table: &'a SymbolTable,
    options: &'p CompilationOptions,
    cancel: &'p CancellationToken,
    strings: StringPool,
    /// Classes declared in source; synthesized classes are compiled
    /// through the members that created them
    declared: FxHashSet<ClassId>,
    /// Set once any member fails; never cleared
    has_errors: AtomicBool,
}

impl<'p, 'a> MethodCompiler<'p, 'a> {
    fn new(
        program: &'p DeclaredProgram<'a>,
        options: &'p CompilationOptions,
        cancel: &'p CancellationToken,
        has_errors: bool,
    ) -> Self {
        Self {
            program,
            table: program.table,
            options,
            cancel,
            strings: StringPool::new(),
            declared: program.types.iter().map(|t| t.class).collect(),
            has_errors: AtomicBool::new(has_errors),
        }
    }
}

impl MethodCompiler<'_, '_> {
    /// First round: one job per top-level declared type.
    fn compile_declared(&self, pool: &WorkerPool) -> Result<TypeOutput, CompileError> {
        let roots: Vec<ClassId> = self
            .program
            .types
            .iter()
            .map(|t| t.class)
            .filter(|&class| self.table.class(class).containing.is_none())
            .collect();
        debug!(types = roots.len(), threads = pool.threads(), "compiling declared types");
        let mut merged = TypeOutput::default();
        for output in pool.join_all(roots, |class| self.compile_type_tree(class))? {
            merged.merge(output?);
        }
        Ok(merged)
    }

    /// Second round: one job per group of synthesized members.
    fn compile_pending(&self, pool: &WorkerPool, pending: Vec<SynthesizedMembers>) -> Result<TypeOutput, CompileError> {
        self.check_cancelled()?;
        debug!(groups = pending.len(), "compiling synthesized members");
        let mut merged = TypeOutput::default();
        for output in pool.join_all(pending, |members| self.compile_synthesized(members))? {
            merged.merge(output?);
        }
        Ok(merged)
    }

    fn compile_type_tree(&self, class: ClassId) -> Result<TypeOutput, CompileError> {
        let mut output = TypeOutput::default();
        self.compile_type(class, &mut output)?;
        Ok(output)
    }

    fn compile_type(&self, class: ClassId, output: &mut TypeOutput) -> Result<(), CompileError> {
        self.check_cancelled()?;
        let symbol = self.table.class(class);
        let _span = debug_span!("type", name = %symbol.name).entered();

        let mut inits = bind_type_initializers(self.program, class);
        for phase in [&mut inits.static_inits, &mut inits.instance_inits] {
            if phase.has_errors {
                self.mark_errors();
            }
            output.diagnostics.extend(std::mem::take(&mut phase.diagnostics));
        }

        let mut synthesized = SynthesizedMembers::new();
        for &method in &symbol.methods {
            self.check_cancelled()?;
            self.compile_method(method, &inits, &mut synthesized, output)?;
        }
        if !synthesized.methods.is_empty() {
            output.synthesized.push(synthesized);
        }

        for &nested in &symbol.nested {
            if self.declared.contains(&nested) {
                self.compile_type(nested, output)?;
            }
        }
        Ok(())
    }

    fn compile_method(
        &self,
        method: MethodId,
        inits: &TypeInitializers,
        synthesized: &mut SynthesizedMembers,
        output: &mut TypeOutput,
    ) -> Result<(), CompileError> {
        let _span = trace_span!("method", id = method.0).entered();
        let lowered = match bind_method(self.program, method, inits) {
            Some(result) => {
                let flow = analyze_flow(self.table, &result.method);
                let failed = result.method.has_errors || result.diagnostics.has_errors() || flow.has_errors();
                output.diagnostics.extend(result.diagnostics);
                output.diagnostics.extend(flow);
                if failed {
                    self.mark_errors();
                }
                if !self.emitting() {
                    return Ok(());
                }
                let lowered = rewrite_locals(self.table, result.method, synthesized);
                self.lower(lowered, synthesized)
            }
            None => match synthesize_body(self.table, method) {
                Some(lowered) if self.emitting() => lowered,
                _ => return Ok(()),
            },
        };
        self.emit(&lowered, output)
    }

    /// Lower and emit the bodies a type left behind, including any they
    /// synthesize in turn.
    fn compile_synthesized(&self, mut members: SynthesizedMembers) -> Result<TypeOutput, CompileError> {
        let mut output = TypeOutput::default();
        loop {
            let methods = members.take_methods();
            if methods.is_empty() {
                break;
            }
            for method in methods {
                self.check_cancelled()?;
                if !self.emitting() {
                    return Ok(output);
                }
                let lowered = self.lower(method, &mut members);
                self.emit(&lowered, &mut output)?;
            }
        }
        Ok(output)
    }

    /// The passes after local rewriting, in their fixed order.
    fn lower(&self, method: LoweredMethod, synthesized: &mut SynthesizedMembers) -> LoweredMethod {
        let method = rewrite_await_in_handlers(self.table, method);
        let method = rewrite_lambdas(self.table, method, synthesized);
        let method = rewrite_iterator(self.table, method, synthesized);
        rewrite_async(self.table, method, synthesized)
    }

    fn emit(&self, lowered: &LoweredMethod, output: &mut TypeOutput) -> Result<(), CompileError> {
        if !self.emitting() {
            return Ok(());
        }
        let body = generate_method(self.table, &self.strings, lowered, self.options.emit_options()).map_err(|source| {
            CompileError::Emit {
                method: method_display_name(self.table, lowered.method),
                source,
            }
        })?;
        output.bodies.push((lowered.method, body));
        Ok(())
    }

    fn emitting(&self) -> bool {
        self.options.emit && !self.has_errors.load(Ordering::Relaxed)
    }

    fn mark_errors(&self) {
        self.has_errors.store(true, Ordering::Relaxed);
    }

    fn check_cancelled(&self) -> Result<(), CompileError> {
        if self.cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptimizationLevel;
    use sable_codegen::{Instruction, OpCode};

    fn compile_source(source: &str, options: &CompilationOptions) -> Compilation {
        compile(&[SourceFile::new("test.sb", source)], options).unwrap()
    }

    fn module(source: &str) -> CompiledModule {
        let compilation = compile_source(source, &CompilationOptions::default());
        let errors: Vec<_> = compilation.diagnostics.iter().filter(|d| d.is_error()).collect();
        assert!(errors.is_empty(), "{:?}", errors);
        compilation.module.expect("module")
    }

    fn only(module: &CompiledModule, name: &str) -> MethodId {
        let found = module.find_methods(name);
        assert_eq!(found.len(), 1, "{}", name);
        found[0]
    }

    fn ops(body: &MethodBody) -> Vec<OpCode> {
        let mut ops = Vec::new();
        let mut offset = 0;
        while offset < body.code.len() {
            let (instruction, next) = Instruction::decode(&body.code, offset).unwrap();
            ops.push(instruction.op);
            offset = next;
        }
        ops
    }

    const HELLO: &str = r#"
        using System;
        class Program {
            static void Main() {
                Console.WriteLine("Hello");
            }
        }
    "#;

    #[test]
    fn test_hello_world() {
        let module = module(HELLO);
        let main = only(&module, "Program.Main");
        assert_eq!(module.entry_point, Some(main));
        let body = module.body(main).unwrap();
        let code: Vec<OpCode> = ops(body).into_iter().filter(|&op| op != OpCode::Nop).collect();
        assert_eq!(code, vec![OpCode::Ldstr, OpCode::Call, OpCode::Ret]);
        assert_eq!(module.strings.len(), 1);
        assert_eq!(&*module.strings[0], "Hello");
        assert!(!body.sequence_points.is_empty());
    }

    #[test]
    fn test_missing_entry_point() {
        let source = "class Lib { static int Twice(int x) { return x * 2; } }";
        let compilation = compile_source(source, &CompilationOptions::default());
        assert!(compilation.diagnostics.contains(ErrorCode::NoMainMethod));
        assert!(!compilation.succeeded());

        let options = CompilationOptions::default().with_output_kind(OutputKind::Library);
        let compilation = compile_source(source, &options);
        assert!(compilation.succeeded());
        let module = compilation.module.unwrap();
        assert_eq!(module.entry_point, None);
        assert!(module.body(only(&module, "Lib.Twice")).is_some());
    }

    #[test]
    fn test_errors_suppress_the_module() {
        let source = r#"
            class Program {
                static void Main() { }
                static int Broken() { return missing; }
            }
        "#;
        let compilation = compile_source(source, &CompilationOptions::default());
        assert!(compilation.diagnostics.contains(ErrorCode::NameNotInContext));
        assert!(compilation.module.is_none());
    }

    #[test]
    fn test_parse_errors_are_diagnostics() {
        let compilation = compile_source("class Program { static void Main() { int x = ; } }", &CompilationOptions::default());
        assert!(compilation.diagnostics.contains(ErrorCode::ParseError));
        assert!(!compilation.succeeded());
    }

    #[test]
    fn test_abstract_methods_have_no_body() {
        let module = module(
            r#"
            abstract class Shape {
                public abstract double Area();
            }
            class Square : Shape {
                double side;
                public Square(double side) { this.side = side; }
                public override double Area() { return side * side; }
            }
            class Program { static void Main() { } }
        "#,
        );
        assert!(module.body(only(&module, "Shape.Area")).is_none());
        assert!(module.body(only(&module, "Square.Area")).is_some());
    }

    #[test]
    fn test_synthesized_bodies_are_compiled() {
        let module = module(
            r#"
            using System;
            using System.Collections.Generic;
            class Program {
                static IEnumerable<int> Count(int n) {
                    for (int i = 0; i < n; i++) yield return i;
                }
                static void Main() {
                    int offset = 10;
                    Func<int, int> add = x => x + offset;
                    foreach (var i in Count(3)) Console.WriteLine(add(i));
                }
            }
        "#,
        );
        let count = module.body(only(&module, "Program.Count")).unwrap();
        let machine = count.state_machine.as_ref().and_then(|m| m.state_machine).expect("state machine");
        let move_next = module
            .symbols
            .class(machine)
            .methods
            .iter()
            .copied()
            .find(|&m| &*module.symbols.method(m).name == "MoveNext")
            .unwrap();
        let move_next = module.body(move_next).unwrap();
        assert!(!move_next.state_machine.as_ref().unwrap().resume_offsets.is_empty());

        // The lambda lives on a display class; every method of it has code
        let lambdas: Vec<MethodId> = (0..module.symbols.methods.len() as u32)
            .map(MethodId)
            .filter(|&m| module.symbols.method(m).kind == sable_symbols::MethodKind::Lambda)
            .collect();
        assert_eq!(lambdas.len(), 1);
        assert!(module.body(lambdas[0]).is_some());
    }

    #[test]
    fn test_concurrent_matches_sequential() {
        let source = r#"
            using System;
            class A { public static int F(int x) { return x + 1; } }
            class B { public static string G(string s) { return s + "!"; } }
            class C { public static bool H(object o) { return o is int n && n > 3; } }
            class D { public static double K(double d) { return d * 2.5; } }
            class Program { static void Main() { Console.WriteLine(B.G("x")); } }
        "#;
        let listings = |options: CompilationOptions| {
            let module = compile_source(source, &options).module.unwrap();
            let mut listings: Vec<String> = module
                .compiled_methods()
                .map(|(m, _)| module.disassemble(m).unwrap().unwrap())
                .collect();
            listings.sort();
            listings
        };
        let sequential = listings(CompilationOptions::default().with_concurrent_build(false));
        let concurrent = listings(CompilationOptions::default().with_worker_threads(4));
        assert_eq!(sequential, concurrent);
    }

    #[test]
    fn test_release_build() {
        let options = CompilationOptions::default()
            .with_optimization(OptimizationLevel::Release)
            .with_debug_info(false);
        let module = compile_source(HELLO, &options).module.unwrap();
        let body = module.body(only(&module, "Program.Main")).unwrap();
        assert!(body.sequence_points.is_empty());
    }

    #[test]
    fn test_check_only_produces_no_module() {
        let compilation = compile_source(HELLO, &CompilationOptions::default().check_only());
        assert!(compilation.diagnostics.is_empty());
        assert!(compilation.module.is_none());
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = compile_with_cancellation(&[SourceFile::new("a.sb", HELLO)], &CompilationOptions::default(), &cancel);
        assert!(matches!(result, Err(CompileError::Cancelled)));
    }

    #[test]
    fn test_cancelled_between_rounds() {
        let source = r#"
            using System;
            class Program {
                static void Main() {
                    int offset = 1;
                    Func<int, int> add = x => x + offset;
                    Console.WriteLine(add(2));
                }
            }
        "#;
        let (unit, errors) = parse_compilation_unit(source, 0);
        assert!(errors.is_empty());
        let units = vec![unit];
        let table = SymbolTable::new();
        let program = declare_program(&table, &units);
        let options = CompilationOptions::default();
        let cancel = CancellationToken::new();
        let compiler = MethodCompiler::new(&program, &options, &cancel, false);
        let pool = WorkerPool::new(2);

        let declared = compiler.compile_declared(&pool).unwrap();
        assert!(!declared.bodies.is_empty());
        assert!(!declared.synthesized.is_empty());

        cancel.cancel();
        let result = compiler.compile_pending(&pool, declared.synthesized);
        assert!(matches!(result, Err(CompileError::Cancelled)));
    }

    #[test]
    fn test_file_ids_must_fit() {
        let sources: Vec<SourceFile> = (0..=u16::MAX as usize + 1)
            .map(|i| SourceFile::new(format!("f{}.sb", i), ""))
            .collect();
        let result = compile(&sources, &CompilationOptions::default().check_only());
        assert!(matches!(result, Err(CompileError::TooManyFiles(n)) if n == sources.len()));
    }

    #[test]
    fn test_summary() {
        let module = module(HELLO);
        let summary = module.summary();
        assert_eq!(summary.entry_point.as_deref(), Some("Program.Main"));
        assert!(summary.methods.iter().any(|m| m.name == "Program.Main" && m.code_size > 0));
    }
}
