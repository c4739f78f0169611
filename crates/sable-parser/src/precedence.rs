use crate::ast::BinaryOp;
use sable_lexer::TokenKind;

/// Operator precedence levels (higher = binds tighter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Precedence {
    /// Lowest precedence (for statements, etc.)
    Lowest = 0,
    /// Assignment: `=`, `+=`, `-=`, etc.
    Assignment = 1,
    /// Conditional: `?:`
    Conditional = 2,
    /// Null coalescing: `??`
    Coalesce = 3,
    /// Logical or: `||`
    Or = 4,
    /// Logical and: `&&`
    And = 5,
    /// Bitwise or: `|`
    BitOr = 6,
    /// Bitwise xor: `^`
    BitXor = 7,
    /// Bitwise and: `&`
    BitAnd = 8,
    /// Equality: `==`, `!=`
    Equality = 9,
    /// Relational and type testing: `<`, `>`, `<=`, `>=`, `is`, `as`
    Relational = 10,
    /// Shift: `<<`, `>>`
    Shift = 11,
    /// Addition/subtraction: `+`, `-`
    Term = 12,
    /// Multiplication/division/remainder: `*`, `/`, `%`
    Factor = 13,
    /// Unary operators and casts
    Unary = 14,
    /// Call, member access, postfix increment
    Postfix = 15,
}

impl Precedence {
    /// Get the precedence of a binary operator.
    pub fn of_binary(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Coalesce => Precedence::Coalesce,
            BinaryOp::Or => Precedence::Or,
            BinaryOp::And => Precedence::And,
            BinaryOp::Eq | BinaryOp::Ne => Precedence::Equality,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => Precedence::Relational,
            BinaryOp::BitOr => Precedence::BitOr,
            BinaryOp::BitXor => Precedence::BitXor,
            BinaryOp::BitAnd => Precedence::BitAnd,
            BinaryOp::Shl | BinaryOp::Shr => Precedence::Shift,
            BinaryOp::Add | BinaryOp::Sub => Precedence::Term,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => Precedence::Factor,
        }
    }

    /// Get the precedence for a token that can be an infix operator.
    ///
    /// `>` followed by an adjacent `>` is a shift; the parser checks that
    /// before consulting this table.
    pub fn of_infix_token(kind: TokenKind) -> Option<Self> {
        Some(match kind {
            TokenKind::Eq
            | TokenKind::PlusEq
            | TokenKind::MinusEq
            | TokenKind::StarEq
            | TokenKind::SlashEq
            | TokenKind::PercentEq
            | TokenKind::AndEq
            | TokenKind::OrEq
            | TokenKind::CaretEq
            | TokenKind::ShlEq
            | TokenKind::ShrEq => Precedence::Assignment,

            TokenKind::Question => Precedence::Conditional,
            TokenKind::QuestionQuestion => Precedence::Coalesce,

            TokenKind::OrOr => Precedence::Or,
            TokenKind::AndAnd => Precedence::And,

            TokenKind::Or => Precedence::BitOr,
            TokenKind::Caret => Precedence::BitXor,
            TokenKind::And => Precedence::BitAnd,

            TokenKind::EqEq | TokenKind::BangEq => Precedence::Equality,
            TokenKind::Lt
            | TokenKind::LtEq
            | TokenKind::Gt
            | TokenKind::GtEq
            | TokenKind::Is
            | TokenKind::As => Precedence::Relational,

            TokenKind::Shl => Precedence::Shift,

            TokenKind::Plus | TokenKind::Minus => Precedence::Term,
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Factor,

            TokenKind::LParen
            | TokenKind::Dot
            | TokenKind::QuestionDot
            | TokenKind::PlusPlus
            | TokenKind::MinusMinus => Precedence::Postfix,

            _ => return None,
        })
    }

    /// Returns true for right-associative levels.
    pub fn is_right_associative(self) -> bool {
        matches!(
            self,
            Precedence::Assignment | Precedence::Conditional | Precedence::Coalesce
        )
    }

    /// The next tighter level.
    pub fn next(self) -> Self {
        match self {
            Precedence::Lowest => Precedence::Assignment,
            Precedence::Assignment => Precedence::Conditional,
            Precedence::Conditional => Precedence::Coalesce,
            Precedence::Coalesce => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::BitOr,
            Precedence::BitOr => Precedence::BitXor,
            Precedence::BitXor => Precedence::BitAnd,
            Precedence::BitAnd => Precedence::Equality,
            Precedence::Equality => Precedence::Relational,
            Precedence::Relational => Precedence::Shift,
            Precedence::Shift => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary | Precedence::Postfix => Precedence::Postfix,
        }
    }
}

/// Convert a token kind to a binary operator.
pub fn token_to_binary_op(kind: TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Rem,
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::BangEq => BinaryOp::Ne,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::LtEq => BinaryOp::Le,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::GtEq => BinaryOp::Ge,
        TokenKind::AndAnd => BinaryOp::And,
        TokenKind::OrOr => BinaryOp::Or,
        TokenKind::QuestionQuestion => BinaryOp::Coalesce,
        TokenKind::And => BinaryOp::BitAnd,
        TokenKind::Or => BinaryOp::BitOr,
        TokenKind::Caret => BinaryOp::BitXor,
        TokenKind::Shl => BinaryOp::Shl,
        _ => return None,
    })
}

/// Convert a compound assignment token to the corresponding binary operator.
pub fn compound_assign_to_op(kind: TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::PlusEq => BinaryOp::Add,
        TokenKind::MinusEq => BinaryOp::Sub,
        TokenKind::StarEq => BinaryOp::Mul,
        TokenKind::SlashEq => BinaryOp::Div,
        TokenKind::PercentEq => BinaryOp::Rem,
        TokenKind::AndEq => BinaryOp::BitAnd,
        TokenKind::OrEq => BinaryOp::BitOr,
        TokenKind::CaretEq => BinaryOp::BitXor,
        TokenKind::ShlEq => BinaryOp::Shl,
        TokenKind::ShrEq => BinaryOp::Shr,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Precedence::Factor > Precedence::Term);
        assert!(Precedence::Relational > Precedence::Equality);
        assert!(Precedence::And > Precedence::Or);
        assert!(Precedence::Or > Precedence::Coalesce);
        assert_eq!(Precedence::Term.next(), Precedence::Factor);
    }

    #[test]
    fn test_token_mapping() {
        assert_eq!(token_to_binary_op(TokenKind::QuestionQuestion), Some(BinaryOp::Coalesce));
        assert_eq!(compound_assign_to_op(TokenKind::ShrEq), Some(BinaryOp::Shr));
        assert_eq!(Precedence::of_infix_token(TokenKind::Is), Some(Precedence::Relational));
        assert!(Precedence::Assignment.is_right_associative());
    }
}
