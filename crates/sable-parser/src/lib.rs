pub mod ast;
pub mod parser;
mod precedence;

pub use ast::*;
pub use parser::{parse_compilation_unit, ParseError, Parser};
pub use precedence::Precedence;
