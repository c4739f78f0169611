use sable_codegen::EmitError;

/// Failures of the compiler itself. Problems in the program being
/// compiled are diagnostics, not errors.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("compilation was cancelled")]
    Cancelled,
    #[error("{0} source files exceed the limit of 65536")]
    TooManyFiles(usize),
    #[error("failed to generate '{method}': {source}")]
    Emit {
        method: String,
        #[source]
        source: EmitError,
    },
    #[error("failed to start worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}
