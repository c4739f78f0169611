//! Sable: a compiler for a small C#-like language and a reference
//! interpreter for the IL it produces.
//!
//! The pipeline crates are re-exported under short names; [`driver`] holds
//! the glue the command-line tool and the integration tests share.

pub use sable_binder as binder;
pub use sable_codegen as codegen;
pub use sable_compiler as compiler;
pub use sable_lexer as lexer;
pub use sable_lowering as lowering;
pub use sable_parser as parser;
pub use sable_symbols as symbols;
pub use sable_vm as vm;

pub mod driver;

pub use driver::{compile_sources, read_sources, run_source, DriverError};
