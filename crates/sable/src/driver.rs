use std::fs;
use std::path::{Path, PathBuf};

use sable_compiler::{compile, Compilation, CompilationOptions, CompileError, CompiledModule, SourceFile};
use sable_symbols::Diagnostic;
use sable_vm::{run_module, Execution, VmOptions};
use tracing::{debug, info};

/// Failures of a driver operation.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("error reading file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no source files given")]
    NoSources,
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("compilation failed with {} error(s)", .0.iter().filter(|d| d.is_error()).count())]
    Diagnostics(Vec<Diagnostic>),
}

/// Load every file in `paths`; a file's position becomes its file id.
pub fn read_sources<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<SourceFile>, DriverError> {
    if paths.is_empty() {
        return Err(DriverError::NoSources);
    }
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            let text = fs::read_to_string(path).map_err(|source| DriverError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            debug!(path = %path.display(), bytes = text.len(), "read source");
            Ok(SourceFile::new(path.to_string_lossy(), text))
        })
        .collect()
}

/// Compile `sources` and return the module, or every diagnostic when an
/// error was reported.
pub fn compile_sources(sources: &[SourceFile], options: &CompilationOptions) -> Result<(CompiledModule, Vec<Diagnostic>), DriverError> {
    let Compilation { diagnostics, module } = compile(sources, options)?;
    let diagnostics = diagnostics.into_vec();
    match module {
        Some(module) => {
            info!(methods = module.methods.len(), warnings = diagnostics.len(), "compiled module");
            Ok((module, diagnostics))
        }
        None => Err(DriverError::Diagnostics(diagnostics)),
    }
}

/// Compile a single in-memory program and run its entry point.
pub fn run_source(text: &str, options: &CompilationOptions, vm_options: VmOptions) -> Result<Execution, DriverError> {
    let sources = [SourceFile::new("main.sb", text)];
    let (module, _) = compile_sources(&sources, options)?;
    Ok(run_module(&module, vm_options))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_sources_requires_files() {
        let paths: [&str; 0] = [];
        assert!(matches!(read_sources(&paths), Err(DriverError::NoSources)));
        assert!(matches!(
            read_sources(&["/definitely/not/here.sb"]),
            Err(DriverError::Read { .. })
        ));
    }

    #[test]
    fn test_errors_are_returned_as_diagnostics() {
        let source = "class Program { static void Main() { int x = \"no\"; } }";
        match run_source(source, &CompilationOptions::default(), VmOptions::default()) {
            Err(DriverError::Diagnostics(diagnostics)) => {
                assert!(diagnostics.iter().any(|d| d.is_error()));
            }
            other => panic!("expected diagnostics, got {:?}", other.map(|e| e.output)),
        }
    }

    #[test]
    fn test_run_source() {
        let source = r#"
            using System;
            class Program { static int Main() { Console.WriteLine("hi"); return 3; } }
        "#;
        let execution = run_source(source, &CompilationOptions::default(), VmOptions::default()).unwrap();
        assert_eq!(execution.output, "hi\n");
        assert_eq!(execution.exit_code(), Some(3));
    }
}
