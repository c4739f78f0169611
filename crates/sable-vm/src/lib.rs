//! Reference interpreter for compiled Sable modules.
//!
//! Executes the IL produced by `sable-codegen` directly: one Rust call per
//! managed call, exception regions handled per frame, and async
//! continuations driven by a single-threaded run queue.

mod casting;
mod error;
mod executor;
mod intrinsics;
mod numeric;
mod value;
mod vm;

pub use casting::{box_value, is_instance, unbox, CastError};
pub use error::RuntimeError;
pub use executor::{Executor, Job, TaskId, TaskRef, TaskState, TaskStatus};
pub use numeric::NumericError;
pub use value::{default_value, Delegate, Object, ObjectRef, Reference, Value};
pub use vm::{run_module, Execution, Vm, VmOptions};
