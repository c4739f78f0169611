mod lexer;
mod span;
mod token;

pub use lexer::{
    parse_char, parse_int, parse_real, parse_string, IntLiteral, IntSuffix, Lexer, RealLiteral,
    RealSuffix, StringParseError,
};
pub use span::Span;
pub use token::{Token, TokenKind};
