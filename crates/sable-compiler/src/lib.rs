//! The Sable method compiler: parses sources, declares symbols, then binds,
//! lowers and generates every method, optionally on a worker pool.

mod cancel;
mod compiler;
mod error;
mod module;
mod options;
mod pool;

pub use cancel::CancellationToken;
pub use compiler::{compile, compile_with_cancellation};
pub use error::CompileError;
pub use module::{Compilation, CompiledModule, MethodSummary, ModuleSummary, SourceFile};
pub use options::{CompilationOptions, OptimizationLevel, OutputKind};
pub use pool::WorkerPool;
