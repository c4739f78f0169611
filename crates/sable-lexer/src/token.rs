use logos::Logos;
use crate::Span;

/// All token types in Sable source.
///
/// Contextual keywords (`var`, `record`, `when`, `yield`, `async`, `await`,
/// `nameof`, `get`, `set`) are lexed as identifiers and recognised by the
/// parser from their text.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum TokenKind {
    // LITERALS
    /// Integer literal with optional suffix: 42, 0xFF, 10L, 3u, 7UL
    #[regex(r"0[xX][0-9a-fA-F][0-9a-fA-F_]*([uU][lL]?|[lL][uU]?)?", priority = 3)]
    #[regex(r"[0-9][0-9_]*([uU][lL]?|[lL][uU]?)?", priority = 2)]
    IntLiteral,

    /// Real literal with optional suffix: 2.5, 1e10, 2.5f, 10m, 3d
    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9]+)?[fFdDmM]?")]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+[fFdDmM]?")]
    #[regex(r"[0-9][0-9_]*[fFdDmM]")]
    RealLiteral,

    /// String literal: "hello", "with \"escapes\""
    #[regex(r#""([^"\\\n]|\\.)*""#)]
    StringLiteral,

    /// Character literal: 'a', '\n'
    #[regex(r"'([^'\\\n]|\\.)'")]
    CharLiteral,

    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    // KEYWORDS
    #[token("abstract")]
    Abstract,
    #[token("as")]
    As,
    #[token("base")]
    Base,
    #[token("bool")]
    Bool,
    #[token("break")]
    Break,
    #[token("byte")]
    Byte,
    #[token("case")]
    Case,
    #[token("catch")]
    Catch,
    #[token("char")]
    Char,
    #[token("class")]
    Class,
    #[token("const")]
    Const,
    #[token("continue")]
    Continue,
    #[token("decimal")]
    Decimal,
    #[token("default")]
    Default,
    #[token("do")]
    Do,
    #[token("double")]
    Double,
    #[token("else")]
    Else,
    #[token("enum")]
    Enum,
    #[token("finally")]
    Finally,
    #[token("float")]
    Float,
    #[token("for")]
    For,
    #[token("foreach")]
    Foreach,
    #[token("if")]
    If,
    #[token("in")]
    In,
    #[token("int")]
    Int,
    #[token("internal")]
    Internal,
    #[token("is")]
    Is,
    #[token("long")]
    Long,
    #[token("namespace")]
    Namespace,
    #[token("new")]
    New,
    #[token("object")]
    Object,
    #[token("operator")]
    Operator,
    #[token("out")]
    Out,
    #[token("override")]
    Override,
    #[token("private")]
    Private,
    #[token("protected")]
    Protected,
    #[token("public")]
    Public,
    #[token("readonly")]
    Readonly,
    #[token("ref")]
    Ref,
    #[token("return")]
    Return,
    #[token("sbyte")]
    SByte,
    #[token("sealed")]
    Sealed,
    #[token("short")]
    Short,
    #[token("sizeof")]
    Sizeof,
    #[token("static")]
    Static,
    #[token("string")]
    String,
    #[token("switch")]
    Switch,
    #[token("this")]
    This,
    #[token("throw")]
    Throw,
    #[token("try")]
    Try,
    #[token("uint")]
    UInt,
    #[token("ulong")]
    ULong,
    #[token("ushort")]
    UShort,
    #[token("using")]
    Using,
    #[token("virtual")]
    Virtual,
    #[token("void")]
    Void,
    #[token("while")]
    While,

    // IDENTIFIER
    /// Identifier: foo, _bar, FooBar123
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier,

    // OPERATORS
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    /// `>` is never fused into `>>` by the lexer so that nested generic
    /// argument lists close cleanly; the parser recombines adjacent `>`s.
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("&")]
    And,
    #[token("|")]
    Or,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("<<")]
    Shl,
    #[token("??")]
    QuestionQuestion,
    #[token("=")]
    Eq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("&=")]
    AndEq,
    #[token("|=")]
    OrEq,
    #[token("^=")]
    CaretEq,
    #[token("<<=")]
    ShlEq,
    #[token(">>=")]
    ShrEq,

    // PUNCTUATION
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("?.")]
    QuestionDot,
    #[token("=>")]
    FatArrow,
    #[token("?")]
    Question,

    // COMMENTS
    /// Line comment: // ...
    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    /// Block comment: /* ... */
    #[regex(r"/\*([^*]|\*+[^*/])*\*+/", logos::skip)]
    BlockComment,

    /// End of file
    Eof,

    /// Lexer error
    Error,
}

impl TokenKind {
    /// Returns true if this token is a reserved keyword.
    pub fn is_keyword(&self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Abstract | As | Base | Bool | Break | Byte | Case | Catch | Char | Class | Const
                | Continue | Decimal | Default | Do | Double | Else | Enum | Finally | Float
                | For | Foreach | If | In | Int | Internal | Is | Long | Namespace | New
                | Object | Operator | Out | Override | Private | Protected | Public | Readonly
                | Ref | Return | SByte | Sealed | Short | Sizeof | Static | String | Switch
                | This | Throw | Try | UInt | ULong | UShort | Using | Virtual | Void | While
                | True | False | Null
        )
    }

    /// Returns true if this token is a literal.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            TokenKind::IntLiteral
                | TokenKind::RealLiteral
                | TokenKind::StringLiteral
                | TokenKind::CharLiteral
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
        )
    }

    /// Returns true if this token names a predefined type.
    pub fn is_predefined_type(&self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Bool | Byte | SByte | Short | UShort | Int | UInt | Long | ULong | Char | Float
                | Double | Decimal | String | Object | Void
        )
    }

    /// Returns true if this token is a member or type modifier.
    pub fn is_modifier(&self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Public | Private | Protected | Internal | Static | Abstract | Sealed | Virtual
                | Override | Readonly | Const
        )
    }

    /// Get a human-readable name for this token kind.
    pub fn name(&self) -> &'static str {
        use TokenKind::*;
        match self {
            IntLiteral => "integer",
            RealLiteral => "real",
            StringLiteral => "string",
            CharLiteral => "character",
            True => "true",
            False => "false",
            Null => "null",
            Abstract => "abstract",
            As => "as",
            Base => "base",
            Bool => "bool",
            Break => "break",
            Byte => "byte",
            Case => "case",
            Catch => "catch",
            Char => "char",
            Class => "class",
            Const => "const",
            Continue => "continue",
            Decimal => "decimal",
            Default => "default",
            Do => "do",
            Double => "double",
            Else => "else",
            Enum => "enum",
            Finally => "finally",
            Float => "float",
            For => "for",
            Foreach => "foreach",
            If => "if",
            In => "in",
            Int => "int",
            Internal => "internal",
            Is => "is",
            Long => "long",
            Namespace => "namespace",
            New => "new",
            Object => "object",
            Operator => "operator",
            Out => "out",
            Override => "override",
            Private => "private",
            Protected => "protected",
            Public => "public",
            Readonly => "readonly",
            Ref => "ref",
            Return => "return",
            SByte => "sbyte",
            Sealed => "sealed",
            Short => "short",
            Sizeof => "sizeof",
            Static => "static",
            String => "string",
            Switch => "switch",
            This => "this",
            Throw => "throw",
            Try => "try",
            UInt => "uint",
            ULong => "ulong",
            UShort => "ushort",
            Using => "using",
            Virtual => "virtual",
            Void => "void",
            While => "while",
            Identifier => "identifier",
            Plus => "+",
            Minus => "-",
            Star => "*",
            Slash => "/",
            Percent => "%",
            PlusPlus => "++",
            MinusMinus => "--",
            EqEq => "==",
            BangEq => "!=",
            Lt => "<",
            LtEq => "<=",
            Gt => ">",
            GtEq => ">=",
            AndAnd => "&&",
            OrOr => "||",
            Bang => "!",
            And => "&",
            Or => "|",
            Caret => "^",
            Tilde => "~",
            Shl => "<<",
            QuestionQuestion => "??",
            Eq => "=",
            PlusEq => "+=",
            MinusEq => "-=",
            StarEq => "*=",
            SlashEq => "/=",
            PercentEq => "%=",
            AndEq => "&=",
            OrEq => "|=",
            CaretEq => "^=",
            ShlEq => "<<=",
            ShrEq => ">>=",
            LParen => "(",
            RParen => ")",
            LBracket => "[",
            RBracket => "]",
            LBrace => "{",
            RBrace => "}",
            Comma => ",",
            Semicolon => ";",
            Colon => ":",
            Dot => ".",
            QuestionDot => "?.",
            FatArrow => "=>",
            Question => "?",
            LineComment => "line comment",
            BlockComment => "block comment",
            Eof => "end of file",
            Error => "error",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A token with its kind and source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn dummy(kind: TokenKind) -> Self {
        Self {
            kind,
            span: Span::dummy(),
        }
    }
}
