use crate::ast::*;
use crate::precedence::{compound_assign_to_op, token_to_binary_op, Precedence};
use sable_lexer::{parse_char, parse_int, parse_real, parse_string, Lexer, Span, Token, TokenKind};
use std::sync::Arc;

/// Parse errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected token: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },
    #[error("unexpected end of file")]
    UnexpectedEof { span: Span },
    #[error("{message}")]
    Custom { message: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. } => *span,
            ParseError::UnexpectedEof { span } => *span,
            ParseError::Custom { span, .. } => *span,
        }
    }
}

/// Parse a whole file, returning the tree and every error encountered.
pub fn parse_compilation_unit(source: &str, file_id: u16) -> (CompilationUnit, Vec<ParseError>) {
    let mut parser = Parser::new(source, file_id);
    let unit = parser.parse_compilation_unit();
    (unit, parser.take_errors())
}

/// Saved parser position for speculative parsing.
#[derive(Clone, Copy)]
struct Snapshot {
    pos: usize,
    errors: usize,
}

/// The Sable parser.
///
/// The token stream is lexed up front so that declarations, casts, lambdas
/// and patterns can be recognised by speculative parsing with backtracking.
pub struct Parser<'src> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'src str,
    errors: Vec<ParseError>,
}

impl<'src> Parser<'src> {
    /// Create a new parser for the given source code.
    pub fn new(source: &'src str, file_id: u16) -> Self {
        let mut errors = Vec::new();
        let tokens: Vec<Token> = Lexer::new(source, file_id)
            .collect_all()
            .into_iter()
            .filter(|t| {
                if t.kind == TokenKind::Error {
                    errors.push(ParseError::Custom {
                        message: format!(
                            "unexpected character '{}'",
                            &source[t.span.start as usize..t.span.end as usize]
                        ),
                        span: t.span,
                    });
                    false
                } else {
                    true
                }
            })
            .collect();
        Self {
            tokens,
            pos: 0,
            source,
            errors,
        }
    }

    /// Get the accumulated parse errors.
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Take the accumulated parse errors.
    pub fn take_errors(&mut self) -> Vec<ParseError> {
        std::mem::take(&mut self.errors)
    }

    /// Check if parsing had errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    // ---
    // Token manipulation
    // ---

    fn current(&self) -> Token {
        self.nth(0)
    }

    fn nth(&self, n: usize) -> Token {
        let last = self.tokens.len() - 1;
        self.tokens[(self.pos + n).min(last)]
    }

    /// Advance to the next token, returning the current one.
    fn advance(&mut self) -> Token {
        let token = self.current();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    /// Check if the current token is of the given kind.
    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    /// Check if the current token is one of the given kinds.
    fn check_any(&self, kinds: &[TokenKind]) -> bool {
        kinds.contains(&self.current().kind)
    }

    /// Check if the token after the current one is of the given kind.
    fn peek_is(&self, kind: TokenKind) -> bool {
        self.nth(1).kind == kind
    }

    /// Check for a contextual keyword such as `var` or `when`.
    fn check_contextual(&self, text: &str) -> bool {
        self.is_contextual_at(0, text)
    }

    fn is_contextual_at(&self, n: usize, text: &str) -> bool {
        let token = self.nth(n);
        token.kind == TokenKind::Identifier && self.slice(token.span) == text
    }

    /// Consume the current token if it matches, returning true.
    fn consume(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Expect the current token to be of the given kind, advancing if so.
    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(kind.name()))
        }
    }

    fn unexpected(&mut self, expected: &str) -> ParseError {
        let current = self.current();
        let err = if current.kind == TokenKind::Eof {
            ParseError::UnexpectedEof { span: current.span }
        } else {
            ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: current.kind.name().to_string(),
                span: current.span,
            }
        };
        self.errors.push(err.clone());
        err
    }

    /// Get the source slice for a span.
    fn slice(&self, span: Span) -> &'src str {
        &self.source[span.start as usize..span.end as usize]
    }

    /// Report an error.
    fn error(&mut self, message: impl Into<String>, span: Span) -> ParseError {
        let err = ParseError::Custom {
            message: message.into(),
            span,
        };
        self.errors.push(err.clone());
        err
    }

    /// Create a symbol from a span.
    fn symbol(&self, span: Span) -> Symbol {
        Arc::from(self.slice(span))
    }

    fn previous_span(&self) -> Span {
        if self.pos == 0 {
            self.current().span
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            pos: self.pos,
            errors: self.errors.len(),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.pos = snapshot.pos;
        self.errors.truncate(snapshot.errors);
    }

    fn parse_identifier(&mut self) -> Result<Identifier, ParseError> {
        let token = self.expect(TokenKind::Identifier)?;
        Ok(Identifier::new(self.symbol(token.span), token.span))
    }

    // ---
    // Compilation unit
    // ---

    /// Parse a complete source file.
    pub fn parse_compilation_unit(&mut self) -> CompilationUnit {
        let start = self.current().span;
        let mut usings = Vec::new();
        while self.check(TokenKind::Using) {
            match self.parse_using() {
                Ok(using) => usings.push(using),
                Err(_) => self.recover_past(TokenKind::Semicolon),
            }
        }

        let mut members = Vec::new();
        while !self.check(TokenKind::Eof) {
            let before = self.pos;
            match self.parse_namespace_member() {
                Ok(member) => members.push(member),
                Err(_) => self.recover_to_declaration(before),
            }
        }

        CompilationUnit {
            usings,
            members,
            span: start.merge(self.current().span),
        }
    }

    fn parse_using(&mut self) -> Result<UsingDirective, ParseError> {
        let start = self.expect(TokenKind::Using)?.span;
        let name = self.parse_qualified_name()?;
        let end = self.expect(TokenKind::Semicolon)?.span;
        Ok(UsingDirective {
            name,
            span: start.merge(end),
        })
    }

    fn parse_qualified_name(&mut self) -> Result<QualifiedName, ParseError> {
        let first = self.parse_identifier()?;
        let start = first.span;
        let mut parts = vec![first];
        while self.consume(TokenKind::Dot) {
            parts.push(self.parse_identifier()?);
        }
        let span = start.merge(parts.last().map(|p| p.span).unwrap_or(start));
        Ok(QualifiedName { parts, span })
    }

    /// Skip tokens until something that looks like a declaration start.
    fn recover_to_declaration(&mut self, before: usize) {
        if self.pos == before {
            self.advance();
        }
        while !self.check(TokenKind::Eof) {
            if self.current().kind.is_modifier()
                || self.check_any(&[TokenKind::Class, TokenKind::Enum, TokenKind::Namespace])
                || self.check_contextual("record")
            {
                return;
            }
            if self.consume(TokenKind::RBrace) {
                return;
            }
            self.advance();
        }
    }

    fn recover_past(&mut self, kind: TokenKind) {
        while !self.check(TokenKind::Eof) && !self.check(kind) {
            self.advance();
        }
        self.consume(kind);
    }

    fn parse_namespace_member(&mut self) -> Result<NamespaceMember, ParseError> {
        if self.check(TokenKind::Namespace) {
            return self.parse_namespace().map(NamespaceMember::Namespace);
        }
        let modifiers = self.parse_modifiers();
        self.parse_type_decl(modifiers).map(NamespaceMember::Type)
    }

    fn parse_namespace(&mut self) -> Result<NamespaceDecl, ParseError> {
        let start = self.expect(TokenKind::Namespace)?.span;
        let name = self.parse_qualified_name()?;
        self.expect(TokenKind::LBrace)?;
        while self.check(TokenKind::Using) {
            if self.parse_using().is_err() {
                self.recover_past(TokenKind::Semicolon);
            }
        }
        let mut members = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let before = self.pos;
            match self.parse_namespace_member() {
                Ok(member) => members.push(member),
                Err(_) => self.recover_to_declaration(before),
            }
        }
        let end = self.expect(TokenKind::RBrace)?.span;
        Ok(NamespaceDecl {
            name,
            members,
            span: start.merge(end),
        })
    }

    /// Parse declaration modifiers, including the contextual `async`.
    fn parse_modifiers(&mut self) -> Modifiers {
        let mut modifiers = Modifiers::default();
        loop {
            match self.current().kind {
                TokenKind::Public => modifiers.is_public = true,
                TokenKind::Private => modifiers.is_private = true,
                TokenKind::Protected => modifiers.is_protected = true,
                TokenKind::Internal => modifiers.is_internal = true,
                TokenKind::Static => modifiers.is_static = true,
                TokenKind::Abstract => modifiers.is_abstract = true,
                TokenKind::Sealed => modifiers.is_sealed = true,
                TokenKind::Virtual => modifiers.is_virtual = true,
                TokenKind::Override => modifiers.is_override = true,
                TokenKind::Readonly => modifiers.is_readonly = true,
                TokenKind::Const => modifiers.is_const = true,
                TokenKind::Identifier
                    if self.check_contextual("async")
                        && (self.nth(1).kind == TokenKind::Identifier
                            || self.nth(1).kind.is_predefined_type()
                            || self.nth(1).kind.is_modifier()) =>
                {
                    modifiers.is_async = true
                }
                _ => return modifiers,
            }
            self.advance();
        }
    }

    // ---
    // Type declarations
    // ---

    fn parse_type_decl(&mut self, modifiers: Modifiers) -> Result<TypeDecl, ParseError> {
        let start = self.current().span;
        if self.consume(TokenKind::Class) {
            let name = self.parse_identifier()?;
            let record_params = if self.check(TokenKind::LParen) {
                self.parse_record_params()?
            } else {
                Vec::new()
            };
            let base_types = self.parse_base_list()?;
            let members = self.parse_member_list(&name)?;
            self.consume(TokenKind::Semicolon);
            return Ok(TypeDecl {
                modifiers,
                kind: TypeDeclKind::Class,
                name,
                record_params,
                base_types,
                members,
                enum_members: Vec::new(),
                span: start.merge(self.previous_span()),
            });
        }

        if self.check_contextual("record") {
            self.advance();
            self.consume(TokenKind::Class);
            let name = self.parse_identifier()?;
            let record_params = self.parse_record_params()?;
            let base_types = self.parse_base_list()?;
            let members = if self.consume(TokenKind::Semicolon) {
                Vec::new()
            } else {
                let members = self.parse_member_list(&name)?;
                self.consume(TokenKind::Semicolon);
                members
            };
            return Ok(TypeDecl {
                modifiers,
                kind: TypeDeclKind::Record,
                name,
                record_params,
                base_types,
                members,
                enum_members: Vec::new(),
                span: start.merge(self.previous_span()),
            });
        }

        if self.consume(TokenKind::Enum) {
            let name = self.parse_identifier()?;
            let enum_members = self.parse_enum_members()?;
            self.consume(TokenKind::Semicolon);
            return Ok(TypeDecl {
                modifiers,
                kind: TypeDeclKind::Enum,
                name,
                record_params: Vec::new(),
                base_types: Vec::new(),
                members: Vec::new(),
                enum_members,
                span: start.merge(self.previous_span()),
            });
        }

        Err(self.unexpected("type declaration"))
    }

    fn parse_base_list(&mut self) -> Result<Vec<TypeSyntax>, ParseError> {
        let mut bases = Vec::new();
        if self.consume(TokenKind::Colon) {
            bases.push(self.parse_type()?);
            while self.consume(TokenKind::Comma) {
                bases.push(self.parse_type()?);
            }
        }
        Ok(bases)
    }

    /// `(int x : X, double y)`
    fn parse_record_params(&mut self) -> Result<Vec<RecordParam>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
            let ty = self.parse_type()?;
            let name = self.parse_identifier()?;
            let property = if self.consume(TokenKind::Colon) {
                Some(self.parse_identifier()?)
            } else {
                None
            };
            let span = ty.span.merge(self.previous_span());
            params.push(RecordParam {
                ty,
                name,
                property,
                span,
            });
            if !self.consume(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_enum_members(&mut self) -> Result<Vec<EnumMemberDecl>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut members = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let name = self.parse_identifier()?;
            let value = if self.consume(TokenKind::Eq) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            let span = name.span.merge(self.previous_span());
            members.push(EnumMemberDecl { name, value, span });
            if !self.consume(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(members)
    }

    fn parse_member_list(&mut self, type_name: &Identifier) -> Result<Vec<MemberDecl>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut members = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let before = self.pos;
            match self.parse_member(type_name) {
                Ok(member) => members.push(member),
                Err(_) => self.recover_to_member(before),
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(members)
    }

    /// Skip to the end of a broken member, stopping at the closing brace of
    /// the enclosing type.
    fn recover_to_member(&mut self, before: usize) {
        if self.pos == before {
            self.advance();
        }
        let mut depth = 0usize;
        while !self.check(TokenKind::Eof) {
            match self.current().kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    if depth == 0 {
                        self.advance();
                        return;
                    }
                }
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }

    fn parse_member(&mut self, type_name: &Identifier) -> Result<MemberDecl, ParseError> {
        let start = self.current().span;
        let modifiers = self.parse_modifiers();

        if self.check_any(&[TokenKind::Class, TokenKind::Enum])
            || (self.check_contextual("record") && self.nth(1).kind != TokenKind::LParen)
        {
            return self.parse_type_decl(modifiers).map(MemberDecl::Type);
        }

        // Constructor: `Name(`
        if self.check_contextual(type_name.as_str()) && self.peek_is(TokenKind::LParen) {
            return self.parse_constructor(modifiers, start).map(MemberDecl::Constructor);
        }

        let ty = self.parse_type()?;

        if self.consume(TokenKind::Operator) {
            let op = self.expect(TokenKind::Is)?;
            let params = self.parse_params()?;
            let body = self.parse_method_body()?;
            return Ok(MemberDecl::Method(MethodDecl {
                modifiers,
                kind: MethodDeclKind::IsOperator,
                return_type: ty,
                name: Identifier::new("op_Is", op.span),
                params,
                body,
                span: start.merge(self.previous_span()),
            }));
        }

        let name = self.parse_identifier()?;

        if self.check(TokenKind::LParen) {
            let params = self.parse_params()?;
            let body = self.parse_method_body()?;
            return Ok(MemberDecl::Method(MethodDecl {
                modifiers,
                kind: MethodDeclKind::Ordinary,
                return_type: ty,
                name,
                params,
                body,
                span: start.merge(self.previous_span()),
            }));
        }

        if self.check(TokenKind::LBrace) {
            return self.parse_auto_property(modifiers, ty, name, start).map(MemberDecl::Property);
        }

        if self.consume(TokenKind::FatArrow) {
            let body = self.parse_expression()?;
            self.expect(TokenKind::Semicolon)?;
            return Ok(MemberDecl::Property(PropertyDecl {
                modifiers,
                ty,
                name,
                has_getter: true,
                has_setter: false,
                init: None,
                expr_body: Some(body),
                span: start.merge(self.previous_span()),
            }));
        }

        // Field declarators
        let declarators = self.parse_declarators_after_first(name)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(MemberDecl::Field(FieldDecl {
            modifiers,
            ty,
            declarators,
            span: start.merge(self.previous_span()),
        }))
    }

    fn parse_constructor(&mut self, modifiers: Modifiers, start: Span) -> Result<ConstructorDecl, ParseError> {
        let name = self.parse_identifier()?;
        let params = self.parse_params()?;
        let initializer = if self.consume(TokenKind::Colon) {
            let init_start = self.current().span;
            let kind = if self.consume(TokenKind::Base) {
                ConstructorInitializerKind::Base
            } else if self.consume(TokenKind::This) {
                ConstructorInitializerKind::This
            } else {
                return Err(self.unexpected("base or this"));
            };
            let args = self.parse_arguments()?;
            Some(ConstructorInitializer {
                kind,
                args,
                span: init_start.merge(self.previous_span()),
            })
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(ConstructorDecl {
            modifiers,
            name,
            params,
            initializer,
            body,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_auto_property(
        &mut self,
        modifiers: Modifiers,
        ty: TypeSyntax,
        name: Identifier,
        start: Span,
    ) -> Result<PropertyDecl, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut has_getter = false;
        let mut has_setter = false;
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            // accessor-level modifiers are accepted and ignored
            self.parse_modifiers();
            if self.check_contextual("get") {
                has_getter = true;
            } else if self.check_contextual("set") {
                has_setter = true;
            } else {
                return Err(self.unexpected("get or set"));
            }
            self.advance();
            self.expect(TokenKind::Semicolon)?;
        }
        self.expect(TokenKind::RBrace)?;
        let init = if self.consume(TokenKind::Eq) {
            let init = self.parse_expression()?;
            self.expect(TokenKind::Semicolon)?;
            Some(init)
        } else {
            None
        };
        Ok(PropertyDecl {
            modifiers,
            ty,
            name,
            has_getter,
            has_setter,
            init,
            expr_body: None,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_params(&mut self) -> Result<Vec<ParamDecl>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
            let start = self.current().span;
            let ref_kind = if self.consume(TokenKind::Out) {
                ParamRefKind::Out
            } else if self.consume(TokenKind::Ref) {
                ParamRefKind::Ref
            } else {
                ParamRefKind::None
            };
            let ty = self.parse_type()?;
            let name = self.parse_identifier()?;
            params.push(ParamDecl {
                ref_kind,
                ty,
                name,
                span: start.merge(self.previous_span()),
            });
            if !self.consume(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_method_body(&mut self) -> Result<Option<MethodBodySyntax>, ParseError> {
        if self.consume(TokenKind::Semicolon) {
            return Ok(None);
        }
        if self.consume(TokenKind::FatArrow) {
            let expr = self.parse_expression()?;
            self.expect(TokenKind::Semicolon)?;
            return Ok(Some(MethodBodySyntax::Expression(expr)));
        }
        Ok(Some(MethodBodySyntax::Block(self.parse_block()?)))
    }

    // ---
    // Types
    // ---

    /// Parse a type expression.
    pub fn parse_type(&mut self) -> Result<TypeSyntax, ParseError> {
        let start = self.current().span;
        let mut ty = match self.current().kind {
            kind if kind.is_predefined_type() => {
                self.advance();
                TypeSyntax {
                    kind: TypeSyntaxKind::Predefined(predefined_type(kind)),
                    span: start,
                }
            }
            TokenKind::Identifier => {
                let mut segments = vec![self.parse_type_segment()?];
                while self.check(TokenKind::Dot) && self.nth(1).kind == TokenKind::Identifier {
                    self.advance();
                    segments.push(self.parse_type_segment()?);
                }
                TypeSyntax {
                    kind: TypeSyntaxKind::Named(segments),
                    span: start.merge(self.previous_span()),
                }
            }
            _ => return Err(self.unexpected("type")),
        };

        if self.check(TokenKind::Question) {
            self.advance();
            ty = TypeSyntax {
                span: ty.span.merge(self.previous_span()),
                kind: TypeSyntaxKind::Nullable(Box::new(ty)),
            };
        }
        Ok(ty)
    }

    fn parse_type_segment(&mut self) -> Result<TypeSegment, ParseError> {
        let ident = self.parse_identifier()?;
        let mut args = Vec::new();
        if self.consume(TokenKind::Lt) {
            loop {
                args.push(self.parse_type()?);
                if !self.consume(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Gt)?;
        }
        Ok(TypeSegment { ident, args })
    }

    /// Speculatively parse a type; on failure the position is restored.
    fn try_parse_type(&mut self) -> Option<TypeSyntax> {
        let snapshot = self.snapshot();
        match self.parse_type() {
            Ok(ty) => Some(ty),
            Err(_) => {
                self.restore(snapshot);
                None
            }
        }
    }

    // ---
    // Statements
    // ---

    /// Parse a block.
    pub fn parse_block(&mut self) -> Result<Block, ParseError> {
        let start = self.current().span;
        self.expect(TokenKind::LBrace)?;

        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let before = self.pos;
            match self.parse_statement() {
                Ok(stmt) => stmts.push(stmt),
                Err(_) => self.recover_statement(before),
            }
        }

        let end = self.expect(TokenKind::RBrace)?;
        Ok(Block {
            stmts,
            span: start.merge(end.span),
        })
    }

    /// Error recovery: skip to semicolon or brace.
    fn recover_statement(&mut self, before: usize) {
        if self.pos == before && !self.check(TokenKind::RBrace) {
            self.advance();
        }
        while !self.check_any(&[TokenKind::Semicolon, TokenKind::RBrace, TokenKind::Eof]) {
            self.advance();
        }
        self.consume(TokenKind::Semicolon);
    }

    /// Parse a statement.
    pub fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let start = self.current().span;
        let kind = match self.current().kind {
            TokenKind::LBrace => StmtKind::Block(self.parse_block()?),
            TokenKind::Semicolon => {
                self.advance();
                StmtKind::Empty
            }
            TokenKind::If => self.parse_if()?,
            TokenKind::While => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let condition = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                let body = Box::new(self.parse_statement()?);
                StmtKind::While { condition, body }
            }
            TokenKind::Do => {
                self.advance();
                let body = Box::new(self.parse_statement()?);
                self.expect(TokenKind::While)?;
                self.expect(TokenKind::LParen)?;
                let condition = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::Semicolon)?;
                StmtKind::DoWhile { body, condition }
            }
            TokenKind::For => self.parse_for()?,
            TokenKind::Foreach => self.parse_foreach()?,
            TokenKind::Switch => self.parse_switch()?,
            TokenKind::Break => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                StmtKind::Continue
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(TokenKind::Semicolon)?;
                StmtKind::Return(value)
            }
            TokenKind::Throw => {
                self.advance();
                let value = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(TokenKind::Semicolon)?;
                StmtKind::Throw(value)
            }
            TokenKind::Try => self.parse_try()?,
            TokenKind::Const => {
                self.advance();
                let ty = self.parse_type()?;
                let first = self.parse_identifier()?;
                let declarators = self.parse_declarators_after_first(first)?;
                self.expect(TokenKind::Semicolon)?;
                StmtKind::LocalDecl {
                    is_const: true,
                    ty,
                    declarators,
                }
            }
            TokenKind::Identifier
                if self.check_contextual("yield")
                    && (self.peek_is(TokenKind::Return) || self.peek_is(TokenKind::Break)) =>
            {
                self.advance();
                if self.consume(TokenKind::Break) {
                    self.expect(TokenKind::Semicolon)?;
                    StmtKind::YieldBreak
                } else {
                    self.expect(TokenKind::Return)?;
                    let value = self.parse_expression()?;
                    self.expect(TokenKind::Semicolon)?;
                    StmtKind::YieldReturn(value)
                }
            }
            _ => {
                if let Some(decl) = self.try_parse_local_declaration()? {
                    self.expect(TokenKind::Semicolon)?;
                    decl
                } else {
                    let expr = self.parse_expression()?;
                    self.expect(TokenKind::Semicolon)?;
                    StmtKind::Expr(expr)
                }
            }
        };
        Ok(Stmt {
            kind,
            span: start.merge(self.previous_span()),
        })
    }

    /// Recognise `Type name [= init], ...` without consuming the trailing `;`.
    fn try_parse_local_declaration(&mut self) -> Result<Option<StmtKind>, ParseError> {
        let start = self.current();
        let declarator_follows = |p: &Self, n: usize| {
            p.nth(n).kind == TokenKind::Identifier
                && matches!(
                    p.nth(n + 1).kind,
                    TokenKind::Eq | TokenKind::Semicolon | TokenKind::Comma | TokenKind::In
                )
        };

        if self.check_contextual("var") && declarator_follows(self, 1) {
            self.advance();
            let ty = TypeSyntax {
                kind: TypeSyntaxKind::Var,
                span: start.span,
            };
            let first = self.parse_identifier()?;
            let declarators = self.parse_declarators_after_first(first)?;
            return Ok(Some(StmtKind::LocalDecl {
                is_const: false,
                ty,
                declarators,
            }));
        }

        if !(start.kind.is_predefined_type() || start.kind == TokenKind::Identifier) {
            return Ok(None);
        }
        if self.check_contextual("await") {
            return Ok(None);
        }

        let snapshot = self.snapshot();
        match self.try_parse_type() {
            Some(ty) if declarator_follows(self, 0) => {
                let first = self.parse_identifier()?;
                let declarators = self.parse_declarators_after_first(first)?;
                Ok(Some(StmtKind::LocalDecl {
                    is_const: false,
                    ty,
                    declarators,
                }))
            }
            _ => {
                self.restore(snapshot);
                Ok(None)
            }
        }
    }

    fn parse_declarators_after_first(&mut self, first: Identifier) -> Result<Vec<VariableDeclarator>, ParseError> {
        let mut declarators = Vec::new();
        let mut name = first;
        loop {
            let init = if self.consume(TokenKind::Eq) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            let span = name.span.merge(self.previous_span());
            declarators.push(VariableDeclarator { name, init, span });
            if !self.consume(TokenKind::Comma) {
                break;
            }
            name = self.parse_identifier()?;
        }
        Ok(declarators)
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.consume(TokenKind::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn parse_for(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::For)?;
        self.expect(TokenKind::LParen)?;

        let mut init = Vec::new();
        if !self.check(TokenKind::Semicolon) {
            let start = self.current().span;
            if let Some(decl) = self.try_parse_local_declaration()? {
                init.push(Stmt {
                    kind: decl,
                    span: start.merge(self.previous_span()),
                });
            } else {
                loop {
                    let expr = self.parse_expression()?;
                    let span = expr.span;
                    init.push(Stmt {
                        kind: StmtKind::Expr(expr),
                        span,
                    });
                    if !self.consume(TokenKind::Comma) {
                        break;
                    }
                }
            }
        }
        self.expect(TokenKind::Semicolon)?;

        let condition = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon)?;

        let mut iterators = Vec::new();
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
            iterators.push(self.parse_expression()?);
            if !self.consume(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::For {
            init,
            condition,
            iterators,
            body,
        })
    }

    fn parse_foreach(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::Foreach)?;
        self.expect(TokenKind::LParen)?;
        let ty = if self.check_contextual("var") {
            let span = self.advance().span;
            TypeSyntax {
                kind: TypeSyntaxKind::Var,
                span,
            }
        } else {
            self.parse_type()?
        };
        let name = self.parse_identifier()?;
        self.expect(TokenKind::In)?;
        let collection = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::Foreach {
            ty,
            name,
            collection,
            body,
        })
    }

    fn parse_switch(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::Switch)?;
        self.expect(TokenKind::LParen)?;
        let expr = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::LBrace)?;

        let mut sections = Vec::new();
        while self.check_any(&[TokenKind::Case, TokenKind::Default]) {
            let start = self.current().span;
            let mut labels = Vec::new();
            while self.check_any(&[TokenKind::Case, TokenKind::Default]) {
                labels.push(self.parse_switch_label()?);
            }
            let mut stmts = Vec::new();
            while !self.check_any(&[TokenKind::Case, TokenKind::Default, TokenKind::RBrace, TokenKind::Eof]) {
                let before = self.pos;
                match self.parse_statement() {
                    Ok(stmt) => stmts.push(stmt),
                    Err(_) => self.recover_statement(before),
                }
            }
            sections.push(SwitchSection {
                labels,
                stmts,
                span: start.merge(self.previous_span()),
            });
        }
        self.expect(TokenKind::RBrace)?;
        Ok(StmtKind::Switch { expr, sections })
    }

    fn parse_switch_label(&mut self) -> Result<SwitchLabel, ParseError> {
        let start = self.current().span;
        if self.consume(TokenKind::Default) {
            self.expect(TokenKind::Colon)?;
            return Ok(SwitchLabel {
                kind: SwitchLabelKind::Default,
                span: start.merge(self.previous_span()),
            });
        }
        self.expect(TokenKind::Case)?;
        let pattern = self.parse_pattern()?;
        let guard = if self.check_contextual("when") {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(TokenKind::Colon)?;
        Ok(SwitchLabel {
            kind: SwitchLabelKind::Case { pattern, guard },
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_try(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::Try)?;
        let block = self.parse_block()?;
        let mut catches = Vec::new();
        while self.check(TokenKind::Catch) {
            let start = self.advance().span;
            let (ty, name) = if self.consume(TokenKind::LParen) {
                let ty = self.parse_type()?;
                let name = if self.check(TokenKind::Identifier) {
                    Some(self.parse_identifier()?)
                } else {
                    None
                };
                self.expect(TokenKind::RParen)?;
                (Some(ty), name)
            } else {
                (None, None)
            };
            let block = self.parse_block()?;
            catches.push(CatchClause {
                ty,
                name,
                block,
                span: start.merge(self.previous_span()),
            });
        }
        let finally = if self.consume(TokenKind::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            let span = self.previous_span();
            return Err(self.error("expected catch or finally", span));
        }
        Ok(StmtKind::Try {
            block,
            catches,
            finally,
        })
    }

    // ---
    // Patterns
    // ---

    /// Parse a pattern.
    pub fn parse_pattern(&mut self) -> Result<Pattern, ParseError> {
        let start = self.current().span;

        if self.consume(TokenKind::Star) {
            return Ok(Pattern {
                kind: PatternKind::Wildcard,
                span: start,
            });
        }

        if self.check_contextual("var") && self.peek_is(TokenKind::Identifier) {
            self.advance();
            let name = self.parse_identifier()?;
            return Ok(Pattern {
                kind: PatternKind::Declaration {
                    ty: TypeSyntax {
                        kind: TypeSyntaxKind::Var,
                        span: start,
                    },
                    name,
                },
                span: start.merge(self.previous_span()),
            });
        }

        let current = self.current().kind;
        if current.is_predefined_type() || current == TokenKind::Identifier {
            let snapshot = self.snapshot();
            if let Some(ty) = self.try_parse_type() {
                if self.check(TokenKind::Identifier) && !self.check_contextual("when") {
                    let name = self.parse_identifier()?;
                    return Ok(Pattern {
                        kind: PatternKind::Declaration { ty, name },
                        span: start.merge(self.previous_span()),
                    });
                }
                if self.check(TokenKind::LParen) {
                    let subpatterns = self.parse_subpatterns(TokenKind::LParen, TokenKind::RParen)?;
                    return Ok(Pattern {
                        kind: PatternKind::Recursive { ty, subpatterns },
                        span: start.merge(self.previous_span()),
                    });
                }
                if self.check(TokenKind::LBrace) {
                    let subpatterns = self.parse_subpatterns(TokenKind::LBrace, TokenKind::RBrace)?;
                    return Ok(Pattern {
                        kind: PatternKind::Property { ty, subpatterns },
                        span: start.merge(self.previous_span()),
                    });
                }
            }
            self.restore(snapshot);
        }

        let expr = self.parse_expr_precedence(Precedence::Shift)?;
        Ok(Pattern {
            span: expr.span,
            kind: PatternKind::Constant(Box::new(expr)),
        })
    }

    /// `(a, name: b)` for recursive patterns, `{ P is a, Q is b }` for
    /// property patterns.
    fn parse_subpatterns(&mut self, open: TokenKind, close: TokenKind) -> Result<Vec<SubPattern>, ParseError> {
        self.expect(open)?;
        let is_property = open == TokenKind::LBrace;
        let mut subpatterns = Vec::new();
        while !self.check(close) && !self.check(TokenKind::Eof) {
            let start = self.current().span;
            let name = if is_property {
                let name = self.parse_identifier()?;
                self.expect(TokenKind::Is)?;
                Some(name)
            } else if self.check(TokenKind::Identifier) && self.peek_is(TokenKind::Colon) {
                let name = self.parse_identifier()?;
                self.expect(TokenKind::Colon)?;
                Some(name)
            } else {
                None
            };
            let pattern = self.parse_pattern()?;
            subpatterns.push(SubPattern {
                name,
                pattern,
                span: start.merge(self.previous_span()),
            });
            if !self.consume(TokenKind::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(subpatterns)
    }

    // ---
    // Expressions (Pratt parser)
    // ---

    /// Parse an expression.
    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_expr_precedence(Precedence::Assignment)
    }

    /// Parse an expression with minimum precedence.
    fn parse_expr_precedence(&mut self, min_prec: Precedence) -> Result<Expr, ParseError> {
        let mut left = self.parse_prefix_expr()?;

        loop {
            let prec = if self.at_shift_right() {
                Precedence::Shift
            } else {
                match Precedence::of_infix_token(self.current().kind) {
                    Some(prec) => prec,
                    None => break,
                }
            };
            if prec < min_prec {
                break;
            }
            left = self.parse_infix_expr(left, prec)?;
        }

        Ok(left)
    }

    /// `>` immediately followed by `>` forms a right shift.
    fn at_shift_right(&self) -> bool {
        let first = self.nth(0);
        let second = self.nth(1);
        first.kind == TokenKind::Gt && second.kind == TokenKind::Gt && first.span.end == second.span.start
    }

    fn parse_infix_expr(&mut self, left: Expr, prec: Precedence) -> Result<Expr, ParseError> {
        let start = left.span;
        let next_prec = if prec.is_right_associative() { prec } else { prec.next() };

        if self.at_shift_right() {
            self.advance();
            self.advance();
            let right = self.parse_expr_precedence(next_prec)?;
            let span = start.merge(right.span);
            return Ok(binary(BinaryOp::Shr, left, right, span));
        }

        let op_token = self.current().kind;
        if let Some(op) = compound_assign_to_op(op_token) {
            self.advance();
            let value = self.parse_expr_precedence(next_prec)?;
            let span = start.merge(value.span);
            return Ok(Expr {
                kind: ExprKind::CompoundAssign {
                    op,
                    target: Box::new(left),
                    value: Box::new(value),
                },
                span,
            });
        }

        match op_token {
            TokenKind::Eq => {
                self.advance();
                let value = self.parse_expr_precedence(next_prec)?;
                let span = start.merge(value.span);
                Ok(Expr {
                    kind: ExprKind::Assign {
                        target: Box::new(left),
                        value: Box::new(value),
                    },
                    span,
                })
            }
            TokenKind::Question => {
                self.advance();
                let when_true = self.parse_expression()?;
                self.expect(TokenKind::Colon)?;
                let when_false = self.parse_expr_precedence(Precedence::Conditional)?;
                let span = start.merge(when_false.span);
                Ok(Expr {
                    kind: ExprKind::Conditional {
                        condition: Box::new(left),
                        when_true: Box::new(when_true),
                        when_false: Box::new(when_false),
                    },
                    span,
                })
            }
            TokenKind::Is => {
                self.advance();
                let pattern = self.parse_pattern()?;
                let span = start.merge(pattern.span);
                Ok(Expr {
                    kind: ExprKind::Is {
                        expr: Box::new(left),
                        pattern: Box::new(pattern),
                    },
                    span,
                })
            }
            TokenKind::As => {
                self.advance();
                let ty = self.parse_type()?;
                let span = start.merge(ty.span);
                Ok(Expr {
                    kind: ExprKind::As {
                        expr: Box::new(left),
                        ty,
                    },
                    span,
                })
            }
            TokenKind::LParen => {
                let args = self.parse_arguments()?;
                let span = start.merge(self.previous_span());
                Ok(Expr {
                    kind: ExprKind::Invocation {
                        callee: Box::new(left),
                        args,
                    },
                    span,
                })
            }
            TokenKind::Dot | TokenKind::QuestionDot => {
                self.advance();
                let name = self.parse_identifier()?;
                let span = start.merge(name.span);
                let receiver = Box::new(left);
                let kind = if op_token == TokenKind::Dot {
                    ExprKind::Member { receiver, name }
                } else {
                    ExprKind::ConditionalMember { receiver, name }
                };
                Ok(Expr { kind, span })
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let end = self.advance().span;
                let op = if op_token == TokenKind::PlusPlus {
                    UnaryOp::PostIncrement
                } else {
                    UnaryOp::PostDecrement
                };
                Ok(Expr {
                    kind: ExprKind::Unary {
                        op,
                        operand: Box::new(left),
                    },
                    span: start.merge(end),
                })
            }
            _ => match token_to_binary_op(op_token) {
                Some(op) => {
                    self.advance();
                    let right = self.parse_expr_precedence(next_prec)?;
                    let span = start.merge(right.span);
                    Ok(binary(op, left, right, span))
                }
                None => Err(self.unexpected("operator")),
            },
        }
    }

    /// Parse `(args)` with optional names and `out`/`ref`.
    fn parse_arguments(&mut self) -> Result<Vec<Argument>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
            let start = self.current().span;
            let name = if self.check(TokenKind::Identifier) && self.peek_is(TokenKind::Colon) {
                let name = self.parse_identifier()?;
                self.advance();
                Some(name)
            } else {
                None
            };
            let ref_kind = if self.consume(TokenKind::Out) {
                ParamRefKind::Out
            } else if self.consume(TokenKind::Ref) {
                ParamRefKind::Ref
            } else {
                ParamRefKind::None
            };
            let value = self.parse_expression()?;
            args.push(Argument {
                name,
                ref_kind,
                span: start.merge(value.span),
                value,
            });
            if !self.consume(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    /// Parse a prefix expression.
    fn parse_prefix_expr(&mut self) -> Result<Expr, ParseError> {
        let start = self.current().span;
        let kind = self.current().kind;

        let unary = match kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::PlusPlus => Some(UnaryOp::PreIncrement),
            TokenKind::MinusMinus => Some(UnaryOp::PreDecrement),
            _ => None,
        };
        if let Some(op) = unary {
            self.advance();
            let operand = self.parse_expr_precedence(Precedence::Unary)?;
            let span = start.merge(operand.span);
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            });
        }

        match kind {
            TokenKind::IntLiteral => {
                let token = self.advance();
                let value = parse_int(self.slice(token.span))
                    .map_err(|_| self.error("invalid integer literal", token.span))?;
                Ok(literal(Literal::Int(value), token.span))
            }
            TokenKind::RealLiteral => {
                let token = self.advance();
                let value = parse_real(self.slice(token.span))
                    .map_err(|_| self.error("invalid real literal", token.span))?;
                Ok(literal(Literal::Real(value), token.span))
            }
            TokenKind::StringLiteral => {
                let token = self.advance();
                let value = parse_string(self.slice(token.span))
                    .map_err(|e| self.error(e.to_string(), token.span))?;
                Ok(literal(Literal::String(value), token.span))
            }
            TokenKind::CharLiteral => {
                let token = self.advance();
                let value = parse_char(self.slice(token.span))
                    .map_err(|e| self.error(e.to_string(), token.span))?;
                Ok(literal(Literal::Char(value), token.span))
            }
            TokenKind::True | TokenKind::False => {
                let token = self.advance();
                Ok(literal(Literal::Bool(kind == TokenKind::True), token.span))
            }
            TokenKind::Null => {
                let token = self.advance();
                Ok(literal(Literal::Null, token.span))
            }
            TokenKind::This => {
                self.advance();
                Ok(Expr { kind: ExprKind::This, span: start })
            }
            TokenKind::Base => {
                self.advance();
                Ok(Expr { kind: ExprKind::Base, span: start })
            }
            TokenKind::New => {
                self.advance();
                let ty = self.parse_type()?;
                let args = self.parse_arguments()?;
                Ok(Expr {
                    kind: ExprKind::ObjectCreation { ty, args },
                    span: start.merge(self.previous_span()),
                })
            }
            TokenKind::Sizeof => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let ty = self.parse_type()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr {
                    kind: ExprKind::Sizeof(ty),
                    span: start.merge(self.previous_span()),
                })
            }
            TokenKind::LParen => self.parse_paren_expr(),
            TokenKind::Identifier => self.parse_identifier_expr(),
            kind if kind.is_predefined_type() => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::PredefinedType(predefined_type(kind)),
                    span: start,
                })
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_identifier_expr(&mut self) -> Result<Expr, ParseError> {
        let start = self.current().span;

        // x => body
        if self.peek_is(TokenKind::FatArrow) {
            let name = self.parse_identifier()?;
            let param = LambdaParam {
                ty: None,
                span: name.span,
                name,
            };
            return self.parse_lambda_rest(false, vec![param], start);
        }

        if self.check_contextual("async") {
            if self.nth(1).kind == TokenKind::Identifier && self.nth(2).kind == TokenKind::FatArrow {
                self.advance();
                let name = self.parse_identifier()?;
                let param = LambdaParam {
                    ty: None,
                    span: name.span,
                    name,
                };
                return self.parse_lambda_rest(true, vec![param], start);
            }
            if self.peek_is(TokenKind::LParen) && self.lambda_follows_paren(1) {
                self.advance();
                let params = self.parse_lambda_params()?;
                return self.parse_lambda_rest(true, params, start);
            }
        }

        if self.check_contextual("await") && self.await_operand_follows() {
            self.advance();
            let operand = self.parse_expr_precedence(Precedence::Unary)?;
            let span = start.merge(operand.span);
            return Ok(Expr {
                kind: ExprKind::Await(Box::new(operand)),
                span,
            });
        }

        if self.check_contextual("nameof") && self.peek_is(TokenKind::LParen) {
            self.advance();
            self.expect(TokenKind::LParen)?;
            let operand = self.parse_expression()?;
            self.expect(TokenKind::RParen)?;
            return Ok(Expr {
                kind: ExprKind::Nameof(Box::new(operand)),
                span: start.merge(self.previous_span()),
            });
        }

        let name = self.parse_identifier()?;
        Ok(Expr {
            span: name.span,
            kind: ExprKind::Name(name),
        })
    }

    fn await_operand_follows(&self) -> bool {
        let next = self.nth(1).kind;
        next == TokenKind::Identifier
            || next == TokenKind::LParen
            || next == TokenKind::This
            || next == TokenKind::New
            || next == TokenKind::Base
            || next.is_literal()
            || next.is_predefined_type()
    }

    /// Whether the parenthesis at offset `n` closes into `=>`.
    fn lambda_follows_paren(&self, n: usize) -> bool {
        let mut depth = 0usize;
        let mut i = n;
        loop {
            match self.nth(i).kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return self.nth(i + 1).kind == TokenKind::FatArrow;
                    }
                }
                TokenKind::Eof | TokenKind::Semicolon | TokenKind::LBrace | TokenKind::RBrace => {
                    return false
                }
                _ => {}
            }
            i += 1;
        }
    }

    fn parse_lambda_params(&mut self) -> Result<Vec<LambdaParam>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
            let start = self.current().span;
            let ty = if self.check(TokenKind::Identifier)
                && matches!(self.nth(1).kind, TokenKind::Comma | TokenKind::RParen)
            {
                None
            } else {
                Some(self.parse_type()?)
            };
            let name = self.parse_identifier()?;
            params.push(LambdaParam {
                ty,
                name,
                span: start.merge(self.previous_span()),
            });
            if !self.consume(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_lambda_rest(&mut self, is_async: bool, params: Vec<LambdaParam>, start: Span) -> Result<Expr, ParseError> {
        self.expect(TokenKind::FatArrow)?;
        let body = if self.check(TokenKind::LBrace) {
            MethodBodySyntax::Block(self.parse_block()?)
        } else {
            MethodBodySyntax::Expression(self.parse_expression()?)
        };
        let span = start.merge(body.span());
        Ok(Expr {
            kind: ExprKind::Lambda(Box::new(LambdaExpr {
                is_async,
                params,
                body,
                span,
            })),
            span,
        })
    }

    /// `(` starts a lambda, a cast, or a parenthesized expression.
    fn parse_paren_expr(&mut self) -> Result<Expr, ParseError> {
        let start = self.current().span;

        if self.lambda_follows_paren(0) {
            let params = self.parse_lambda_params()?;
            return self.parse_lambda_rest(false, params, start);
        }

        let snapshot = self.snapshot();
        self.advance();
        if let Some(ty) = self.try_parse_type() {
            if self.check(TokenKind::RParen) && self.is_cast_followed_by(&ty, self.nth(1).kind) {
                self.advance();
                let operand = self.parse_expr_precedence(Precedence::Unary)?;
                let span = start.merge(operand.span);
                return Ok(Expr {
                    kind: ExprKind::Cast {
                        ty,
                        expr: Box::new(operand),
                    },
                    span,
                });
            }
        }
        self.restore(snapshot);

        self.expect(TokenKind::LParen)?;
        let mut inner = self.parse_expression()?;
        let end = self.expect(TokenKind::RParen)?;
        inner.span = start.merge(end.span);
        Ok(inner)
    }

    /// Disambiguate `(T)x` from `(a) - b`: keyword and nullable types are
    /// always casts, names only when an operand-starting token follows.
    fn is_cast_followed_by(&self, ty: &TypeSyntax, next: TokenKind) -> bool {
        if matches!(ty.kind, TypeSyntaxKind::Predefined(_) | TypeSyntaxKind::Nullable(_)) {
            return true;
        }
        matches!(
            next,
            TokenKind::Identifier
                | TokenKind::LParen
                | TokenKind::This
                | TokenKind::Base
                | TokenKind::New
                | TokenKind::Bang
                | TokenKind::Tilde
                | TokenKind::Sizeof
        ) || next.is_literal()
            || next.is_predefined_type()
    }
}

fn literal(lit: Literal, span: Span) -> Expr {
    Expr {
        kind: ExprKind::Literal(lit),
        span,
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, span: Span) -> Expr {
    Expr {
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    }
}

fn predefined_type(kind: TokenKind) -> PredefinedType {
    match kind {
        TokenKind::Bool => PredefinedType::Bool,
        TokenKind::Byte => PredefinedType::Byte,
        TokenKind::SByte => PredefinedType::SByte,
        TokenKind::Short => PredefinedType::Short,
        TokenKind::UShort => PredefinedType::UShort,
        TokenKind::Int => PredefinedType::Int,
        TokenKind::UInt => PredefinedType::UInt,
        TokenKind::Long => PredefinedType::Long,
        TokenKind::ULong => PredefinedType::ULong,
        TokenKind::Char => PredefinedType::Char,
        TokenKind::Float => PredefinedType::Float,
        TokenKind::Double => PredefinedType::Double,
        TokenKind::Decimal => PredefinedType::Decimal,
        TokenKind::String => PredefinedType::String,
        TokenKind::Object => PredefinedType::Object,
        TokenKind::Void => PredefinedType::Void,
        other => unreachable!("{} is not a predefined type", other),
    }
}
