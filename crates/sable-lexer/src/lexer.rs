use logos::Logos;
use crate::{Span, Token, TokenKind};

/// The Sable lexer.
///
/// Converts source code into a stream of tokens.
pub struct Lexer<'src> {
    inner: logos::Lexer<'src, TokenKind>,
    source: &'src str,
    file_id: u16,
    peeked: Option<Token>,
    /// Track if we've returned EOF
    at_eof: bool,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source code.
    pub fn new(source: &'src str, file_id: u16) -> Self {
        Self {
            inner: TokenKind::lexer(source),
            source,
            file_id,
            peeked: None,
            at_eof: false,
        }
    }

    /// Get the source code being lexed.
    pub fn source(&self) -> &'src str {
        self.source
    }

    /// Get the file ID for this lexer.
    pub fn file_id(&self) -> u16 {
        self.file_id
    }

    /// Get the next token from the source.
    pub fn next_token(&mut self) -> Token {
        if let Some(token) = self.peeked.take() {
            return token;
        }

        let eof = Token::new(
            TokenKind::Eof,
            Span::new(self.source.len(), self.source.len(), self.file_id),
        );
        if self.at_eof {
            return eof;
        }

        match self.inner.next() {
            Some(Ok(kind)) => {
                let span = self.inner.span();
                Token::new(kind, Span::new(span.start, span.end, self.file_id))
            }
            Some(Err(())) => {
                let span = self.inner.span();
                Token::new(TokenKind::Error, Span::new(span.start, span.end, self.file_id))
            }
            None => {
                self.at_eof = true;
                eof
            }
        }
    }

    /// Peek at the next token without consuming it.
    pub fn peek(&mut self) -> Token {
        match self.peeked {
            Some(token) => token,
            None => {
                let token = self.next_token();
                self.peeked = Some(token);
                token
            }
        }
    }

    /// Check if the next token is of the given kind.
    pub fn check(&mut self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    /// Get the slice of source code for a span.
    pub fn slice(&self, span: Span) -> &'src str {
        &self.source[span.start as usize..span.end as usize]
    }

    /// Collect all tokens into a vector, ending with a single `Eof`.
    pub fn collect_all(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }
}

impl<'src> Iterator for Lexer<'src> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        if self.at_eof && self.peeked.is_none() {
            return None;
        }
        Some(self.next_token())
    }
}

/// Suffix of an integer literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntSuffix {
    None,
    /// `u` / `U`
    Unsigned,
    /// `l` / `L`
    Long,
    /// `ul`, `lu` in any case
    UnsignedLong,
}

/// A parsed integer literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntLiteral {
    pub value: u64,
    pub suffix: IntSuffix,
}

/// Suffix of a real literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealSuffix {
    None,
    /// `f` / `F`
    Float,
    /// `d` / `D`
    Double,
    /// `m` / `M`
    Decimal,
}

/// A parsed real literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealLiteral {
    pub value: f64,
    pub suffix: RealSuffix,
}

/// Parse an integer literal, handling hex digits and type suffixes.
pub fn parse_int(s: &str) -> Result<IntLiteral, std::num::ParseIntError> {
    let lower = s.to_ascii_lowercase();
    let (digits, suffix) = if let Some(d) = lower
        .strip_suffix("ul")
        .or_else(|| lower.strip_suffix("lu"))
    {
        (d, IntSuffix::UnsignedLong)
    } else if let Some(d) = lower.strip_suffix('u') {
        (d, IntSuffix::Unsigned)
    } else if let Some(d) = lower.strip_suffix('l') {
        (d, IntSuffix::Long)
    } else {
        (lower.as_str(), IntSuffix::None)
    };
    let digits = digits.replace('_', "");
    let value = if let Some(hex) = digits.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)?
    } else {
        digits.parse()?
    };
    Ok(IntLiteral { value, suffix })
}

/// Parse a real literal and its suffix.
pub fn parse_real(s: &str) -> Result<RealLiteral, std::num::ParseFloatError> {
    let cleaned = s.replace('_', "");
    let (digits, suffix) = match cleaned.chars().last() {
        Some('f' | 'F') => (&cleaned[..cleaned.len() - 1], RealSuffix::Float),
        Some('d' | 'D') => (&cleaned[..cleaned.len() - 1], RealSuffix::Double),
        Some('m' | 'M') => (&cleaned[..cleaned.len() - 1], RealSuffix::Decimal),
        _ => (cleaned.as_str(), RealSuffix::None),
    };
    Ok(RealLiteral {
        value: digits.parse()?,
        suffix,
    })
}

/// Parse a string literal, handling escape sequences.
pub fn parse_string(s: &str) -> Result<String, StringParseError> {
    // Remove surrounding quotes
    let s = &s[1..s.len() - 1];
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('\\') => result.push('\\'),
            Some('0') => result.push('\0'),
            Some('"') => result.push('"'),
            Some('\'') => result.push('\''),
            Some('u') => {
                // \uXXXX
                let mut hex = String::new();
                for _ in 0..4 {
                    match chars.next() {
                        Some(h) if h.is_ascii_hexdigit() => hex.push(h),
                        _ => return Err(StringParseError::InvalidUnicodeEscape),
                    }
                }
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| StringParseError::InvalidUnicodeEscape)?;
                let c = char::from_u32(code).ok_or(StringParseError::InvalidUnicodeEscape)?;
                result.push(c);
            }
            Some(c) => return Err(StringParseError::InvalidEscape(c)),
            None => return Err(StringParseError::UnterminatedEscape),
        }
    }

    Ok(result)
}

/// Parse a character literal.
pub fn parse_char(s: &str) -> Result<char, StringParseError> {
    let inner = &s[1..s.len() - 1];
    let parsed = parse_string(&format!("\"{}\"", inner))?;
    let mut chars = parsed.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(StringParseError::InvalidCharLiteral),
    }
}

/// Errors that can occur when parsing string/char literals.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StringParseError {
    #[error("invalid escape sequence: \\{0}")]
    InvalidEscape(char),
    #[error("unterminated escape sequence")]
    UnterminatedEscape,
    #[error("invalid unicode escape sequence")]
    InvalidUnicodeEscape,
    #[error("invalid character literal")]
    InvalidCharLiteral,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<TokenKind> {
        Lexer::new(source, 0)
            .collect_all()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_empty() {
        assert_eq!(lex(""), vec![TokenKind::Eof]);
        assert_eq!(lex("   \t\n  "), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_numeric_literals() {
        assert_eq!(lex("42"), vec![TokenKind::IntLiteral, TokenKind::Eof]);
        assert_eq!(lex("0xFF"), vec![TokenKind::IntLiteral, TokenKind::Eof]);
        assert_eq!(lex("10L 3u 7UL"), vec![
            TokenKind::IntLiteral, TokenKind::IntLiteral, TokenKind::IntLiteral, TokenKind::Eof
        ]);
        assert_eq!(lex("2.5"), vec![TokenKind::RealLiteral, TokenKind::Eof]);
        assert_eq!(lex("2.5f 10m 1e3"), vec![
            TokenKind::RealLiteral, TokenKind::RealLiteral, TokenKind::RealLiteral, TokenKind::Eof
        ]);
    }

    #[test]
    fn test_strings_and_chars() {
        assert_eq!(lex(r#""hello""#), vec![TokenKind::StringLiteral, TokenKind::Eof]);
        assert_eq!(lex(r#""with \"escapes\"""#), vec![TokenKind::StringLiteral, TokenKind::Eof]);
        assert_eq!(lex("'a' '\\n'"), vec![TokenKind::CharLiteral, TokenKind::CharLiteral, TokenKind::Eof]);
    }

    #[test]
    fn test_keywords_and_contextual_keywords() {
        assert_eq!(lex("class static int"), vec![
            TokenKind::Class, TokenKind::Static, TokenKind::Int, TokenKind::Eof
        ]);
        assert_eq!(lex("operator is out"), vec![
            TokenKind::Operator, TokenKind::Is, TokenKind::Out, TokenKind::Eof
        ]);
        // contextual keywords stay identifiers
        assert_eq!(lex("var record when yield await"), vec![
            TokenKind::Identifier,
            TokenKind::Identifier,
            TokenKind::Identifier,
            TokenKind::Identifier,
            TokenKind::Identifier,
            TokenKind::Eof
        ]);
        assert_eq!(lex("integer"), vec![TokenKind::Identifier, TokenKind::Eof]);
    }

    #[test]
    fn test_operators() {
        assert_eq!(lex("+ - * / %"), vec![
            TokenKind::Plus, TokenKind::Minus, TokenKind::Star, TokenKind::Slash, TokenKind::Percent, TokenKind::Eof
        ]);
        assert_eq!(lex("== != < <= > >="), vec![
            TokenKind::EqEq, TokenKind::BangEq, TokenKind::Lt, TokenKind::LtEq, TokenKind::Gt, TokenKind::GtEq, TokenKind::Eof
        ]);
        assert_eq!(lex("?? ?. ? =>"), vec![
            TokenKind::QuestionQuestion, TokenKind::QuestionDot, TokenKind::Question, TokenKind::FatArrow, TokenKind::Eof
        ]);
        // `>>` is two tokens so `Task<IEnumerable<int>>` closes cleanly
        assert_eq!(lex(">>"), vec![TokenKind::Gt, TokenKind::Gt, TokenKind::Eof]);
        assert_eq!(lex("++ --"), vec![TokenKind::PlusPlus, TokenKind::MinusMinus, TokenKind::Eof]);
    }

    #[test]
    fn test_comments() {
        assert_eq!(lex("// comment\n42"), vec![TokenKind::IntLiteral, TokenKind::Eof]);
        assert_eq!(lex("/* block ** star */ 42"), vec![TokenKind::IntLiteral, TokenKind::Eof]);
    }

    #[test]
    fn test_decomposition_operator() {
        let tokens = lex("public static bool operator is(Point p, out int x)");
        assert_eq!(tokens, vec![
            TokenKind::Public,
            TokenKind::Static,
            TokenKind::Bool,
            TokenKind::Operator,
            TokenKind::Is,
            TokenKind::LParen,
            TokenKind::Identifier,
            TokenKind::Identifier,
            TokenKind::Comma,
            TokenKind::Out,
            TokenKind::Int,
            TokenKind::Identifier,
            TokenKind::RParen,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42"), Ok(IntLiteral { value: 42, suffix: IntSuffix::None }));
        assert_eq!(parse_int("0xFF"), Ok(IntLiteral { value: 255, suffix: IntSuffix::None }));
        assert_eq!(parse_int("10L").map(|l| l.suffix), Ok(IntSuffix::Long));
        assert_eq!(parse_int("3u").map(|l| l.suffix), Ok(IntSuffix::Unsigned));
        assert_eq!(parse_int("7UL").map(|l| l.suffix), Ok(IntSuffix::UnsignedLong));
        assert_eq!(parse_int("1_000").map(|l| l.value), Ok(1000));
    }

    #[test]
    fn test_parse_real() {
        assert_eq!(parse_real("2.5"), Ok(RealLiteral { value: 2.5, suffix: RealSuffix::None }));
        assert_eq!(parse_real("2.5f").map(|r| r.suffix), Ok(RealSuffix::Float));
        assert_eq!(parse_real("10m"), Ok(RealLiteral { value: 10.0, suffix: RealSuffix::Decimal }));
        assert_eq!(parse_real("1e3").map(|r| r.value), Ok(1000.0));
    }

    #[test]
    fn test_parse_string() {
        assert_eq!(parse_string(r#""hello""#), Ok("hello".to_string()));
        assert_eq!(parse_string(r#""with\nnewline""#), Ok("with\nnewline".to_string()));
        assert_eq!(parse_string(r#""quote\"here""#), Ok("quote\"here".to_string()));
        assert_eq!(parse_string(r#""A""#), Ok("A".to_string()));
        assert_eq!(parse_string(r#""\q""#), Err(StringParseError::InvalidEscape('q')));
    }

    #[test]
    fn test_parse_char() {
        assert_eq!(parse_char("'a'"), Ok('a'));
        assert_eq!(parse_char("'\\n'"), Ok('\n'));
    }
}
