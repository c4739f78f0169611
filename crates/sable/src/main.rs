use std::ops::Range;
use std::path::PathBuf;
use std::process::ExitCode;

use ariadne::{sources, Color, Label, Report, ReportKind};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sable::compiler::{CompilationOptions, OptimizationLevel, OutputKind, SourceFile};
use sable::symbols::{Diagnostic, Severity};
use sable::vm::{run_module, VmOptions};
use sable::{compile_sources, read_sources, DriverError};

/// Sable - a compiler for a small C#-like language
#[derive(Parser)]
#[command(name = "sable")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report diagnostics without generating code
    Check {
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Compile and print a summary of every generated method
    Build {
        #[command(flatten)]
        build: BuildArgs,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compile and print the IL of every generated method
    Disasm {
        #[command(flatten)]
        build: BuildArgs,

        /// Only methods whose `Class.Method` name contains this text
        #[arg(long)]
        method: Option<String>,
    },

    /// Compile and run the entry point
    Run {
        #[command(flatten)]
        build: BuildArgs,

        /// Calls nested deeper than this fail with a stack overflow
        #[arg(long, default_value_t = 1000)]
        max_depth: usize,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// Source files; the first file has id 0
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Generate optimized code
    #[arg(long)]
    release: bool,

    /// Omit sequence points
    #[arg(long)]
    no_debug_info: bool,

    /// Compile every type on the calling thread
    #[arg(long)]
    sequential: bool,

    /// Worker threads for a concurrent build (0 = available parallelism)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Compile as a library: no entry point is required
    #[arg(long)]
    library: bool,
}

impl BuildArgs {
    fn options(&self) -> CompilationOptions {
        let optimization = if self.release {
            OptimizationLevel::Release
        } else {
            OptimizationLevel::Debug
        };
        let output_kind = if self.library {
            OutputKind::Library
        } else {
            OutputKind::ConsoleApplication
        };
        CompilationOptions::new()
            .with_optimization(optimization)
            .with_debug_info(!self.no_debug_info)
            .with_concurrent_build(!self.sequential)
            .with_worker_threads(self.threads)
            .with_output_kind(output_kind)
    }
}

fn main() -> ExitCode {
    if let Ok(filter) = EnvFilter::try_from_env("SABLE_LOG") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
        tracing::debug!("tracing initialized");
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Check { build } => check_files(&build),
        Commands::Build { build, json } => build_files(&build, json),
        Commands::Disasm { build, method } => disasm_files(&build, method.as_deref()),
        Commands::Run { build, max_depth } => run_files(&build, max_depth),
    }
}

/// Read and compile, reporting every diagnostic. `None` when the module
/// could not be produced.
fn compile_files(build: &BuildArgs, options: &CompilationOptions) -> Option<(Vec<SourceFile>, sable::compiler::CompiledModule)> {
    let files = match read_sources(&build.files) {
        Ok(files) => files,
        Err(error) => {
            eprintln!("{}", error);
            return None;
        }
    };
    match compile_sources(&files, options) {
        Ok((module, warnings)) => {
            report_diagnostics(&files, &warnings);
            Some((files, module))
        }
        Err(DriverError::Diagnostics(diagnostics)) => {
            report_diagnostics(&files, &diagnostics);
            let errors = diagnostics.iter().filter(|d| d.is_error()).count();
            eprintln!("\x1b[1;31merror\x1b[0m: could not compile due to {} previous error(s)", errors);
            None
        }
        Err(error) => {
            eprintln!("\x1b[1;31merror\x1b[0m: {}", error);
            None
        }
    }
}

/// Report diagnostics without generating code
fn check_files(build: &BuildArgs) -> ExitCode {
    let options = build.options().check_only();
    let files = match read_sources(&build.files) {
        Ok(files) => files,
        Err(error) => {
            eprintln!("{}", error);
            return ExitCode::FAILURE;
        }
    };
    let compilation = match sable::compiler::compile(&files, &options) {
        Ok(compilation) => compilation,
        Err(error) => {
            eprintln!("\x1b[1;31merror\x1b[0m: {}", error);
            return ExitCode::FAILURE;
        }
    };
    let diagnostics = compilation.diagnostics.into_vec();
    report_diagnostics(&files, &diagnostics);
    if diagnostics.iter().any(|d| d.is_error()) {
        return ExitCode::FAILURE;
    }
    println!("No errors found in {} file(s)", files.len());
    ExitCode::SUCCESS
}

/// Compile and print a per-method summary
fn build_files(build: &BuildArgs, json: bool) -> ExitCode {
    let Some((_, module)) = compile_files(build, &build.options()) else {
        return ExitCode::FAILURE;
    };
    let summary = module.summary();
    if json {
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(error) => {
                eprintln!("error serializing summary: {}", error);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    if let Some(entry) = &summary.entry_point {
        println!("entry point: {}", entry);
    }
    println!("{} method(s), {} string(s)", summary.methods.len(), summary.strings);
    for method in &summary.methods {
        print!(
            "  {:<40} {:>6} bytes  stack {:<3} locals {:<3} regions {}",
            method.name, method.code_size, method.max_stack, method.locals, method.regions
        );
        match &method.state_machine {
            Some(machine) => println!("  [{}]", machine),
            None => println!(),
        }
    }
    ExitCode::SUCCESS
}

/// Compile and print the IL of every generated method
fn disasm_files(build: &BuildArgs, filter: Option<&str>) -> ExitCode {
    let Some((_, module)) = compile_files(build, &build.options()) else {
        return ExitCode::FAILURE;
    };
    for (method, _) in module.compiled_methods() {
        let name = module.method_name(method);
        if filter.is_some_and(|f| !name.contains(f)) {
            continue;
        }
        match module.disassemble(method) {
            Some(Ok(text)) => println!("{}", text),
            Some(Err(error)) => {
                eprintln!("error disassembling '{}': {}", name, error);
                return ExitCode::FAILURE;
            }
            None => {}
        }
    }
    ExitCode::SUCCESS
}

/// Compile and run the entry point; `int Main` sets the exit status
fn run_files(build: &BuildArgs, max_depth: usize) -> ExitCode {
    let Some((files, module)) = compile_files(build, &build.options()) else {
        return ExitCode::FAILURE;
    };
    let options = VmOptions {
        max_call_depth: max_depth,
        echo_output: true,
    };
    let execution = run_module(&module, options);
    match execution.result {
        Ok(code) => ExitCode::from(code as u8),
        Err(error) => {
            let name = files.first().map_or("<input>", |f| f.name.as_str());
            eprintln!("\x1b[1;31mRuntime error\x1b[0m in {}: {}", name, error);
            ExitCode::FAILURE
        }
    }
}

// ---
// Error reporting with ariadne
// ---

fn report_diagnostics(files: &[SourceFile], diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let Some(file) = files.get(diagnostic.span.file_id as usize) else {
            eprintln!("{}", diagnostic);
            continue;
        };
        let (kind, color) = match diagnostic.severity {
            Severity::Error => (ReportKind::Error, Color::Red),
            Severity::Warning => (ReportKind::Warning, Color::Yellow),
        };
        let name = file.name.clone();
        let start = (diagnostic.span.start as usize).min(file.text.len());
        let end = (diagnostic.span.end as usize).clamp(start, file.text.len());
        let printed = Report::<(String, Range<usize>)>::build(kind, name.clone(), start)
            .with_code(diagnostic.code)
            .with_message(diagnostic.message())
            .with_label(
                Label::new((name, start..end))
                    .with_message(diagnostic.message())
                    .with_color(color),
            )
            .finish()
            .eprint(sources(files.iter().map(|f| (f.name.clone(), f.text.clone()))));
        if printed.is_err() {
            eprintln!("{}", diagnostic);
        }
    }
}
