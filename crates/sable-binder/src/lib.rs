//! Binding for Sable: declares program symbols, binds method bodies into
//! the typed bound tree and runs flow analysis over the result.

pub mod bound;
pub mod candidates;
pub mod constants;
pub mod lookup;
pub mod visit;

mod binder;
mod declare;
mod expressions;
mod flow;
mod members;
mod patterns;
mod statements;

pub use binder::{
    bind_method, bind_type_initializers, method_display_name, BindResult, BoundInitializers, TypeInitializers,
};
pub use bound::*;
pub use candidates::{pattern_conversion_exists, prune, TypeCandidates};
pub use declare::{declare_program, evaluate_constants, DeclaredProgram, DeclaredType};
pub use flow::analyze_flow;
pub use patterns::IS_OPERATOR_NAME;
pub use visit::{BoundTreeRewriter, BoundTreeWalker};
