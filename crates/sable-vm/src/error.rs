use crate::value::Value;

/// VM execution errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("unhandled exception: {type_name}: {message}")]
    UnhandledException { type_name: String, message: String },
    #[error("stack overflow: call depth exceeded {0}")]
    StackOverflow(usize),
    #[error("module has no entry point")]
    NoEntryPoint,
    #[error("method '{0}' has no body")]
    MissingBody(String),
    #[error("invalid program in '{method}' at IL_{offset:04x}: {reason}")]
    InvalidProgram {
        method: String,
        offset: usize,
        reason: String,
    },
    #[error("awaited task can never complete: the run queue is empty")]
    Deadlock,
    #[error("failed to start the interpreter thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// How execution leaves an instruction other than by falling through.
#[derive(Debug)]
pub(crate) enum Unwind {
    /// A managed exception, catchable by `catch` regions
    Throw(Value),
    /// Malformed code; the frame adds the method and offset
    Invalid(String),
    Fatal(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(error: RuntimeError) -> Self {
        Unwind::Fatal(error)
    }
}

pub(crate) fn invalid(reason: impl Into<String>) -> Unwind {
    Unwind::Invalid(reason.into())
}
