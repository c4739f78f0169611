//! Pattern binding.
//!
//! Each pattern is bound against the set of types the tested value may
//! have at that position. Binding narrows the set; recursive patterns also
//! narrow the family of `operator is` overloads they may decompose with.

use sable_lexer::Span;
use sable_parser::{ExprKind, Pattern, PatternKind, SubPattern, TypeSyntax};
use sable_symbols::{ConstantValue, ErrorCode, MethodId, MethodKind, MethodSymbol, SymbolLookup, TypeId};
use std::sync::Arc;

use crate::binder::MethodBinder;
use crate::bound::*;
use crate::candidates::{pattern_conversion_exists, TypeCandidates};

/// Name `operator is` declarations are entered under.
pub const IS_OPERATOR_NAME: &str = "op_Is";

/// Where a pattern appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PatternContext {
    /// `expr is pattern`
    Is,
    /// `case pattern:`
    Switch,
}

/// An `operator is` overload still in the running.
struct Decomposition {
    id: MethodId,
    symbol: Arc<MethodSymbol>,
}

impl Decomposition {
    /// Parameter index (1-based, after the operand) a sub-pattern binds to.
    fn param_for(&self, position: usize, sub: &SubPattern) -> Option<usize> {
        match &sub.name {
            Some(name) => self.symbol.params[1..]
                .iter()
                .position(|p| p.name == name.name)
                .map(|i| i + 1),
            None => (position + 1 < self.symbol.params.len()).then_some(position + 1),
        }
    }

    fn output_type(&self, position: usize, sub: &SubPattern) -> Option<TypeId> {
        self.param_for(position, sub).map(|i| self.symbol.params[i].ty)
    }
}

fn is_var_declaration(pattern: &Pattern) -> bool {
    matches!(&pattern.kind, PatternKind::Declaration { ty, .. } if ty.is_var())
}

/// Sub-patterns are positional up to the first named one and named after.
fn named_after_positional(subpatterns: &[SubPattern]) -> Option<Span> {
    let mut seen_named = false;
    for sub in subpatterns {
        match sub.name {
            Some(_) => seen_named = true,
            None if seen_named => return Some(sub.span),
            None => {}
        }
    }
    None
}

impl MethodBinder<'_, '_> {
    pub(crate) fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        candidates: &mut TypeCandidates,
        context: PatternContext,
    ) -> BoundPattern {
        self.bind_pattern_at(pattern, candidates, context, true)
    }

    fn bind_pattern_at(
        &mut self,
        pattern: &Pattern,
        candidates: &mut TypeCandidates,
        context: PatternContext,
        top_level: bool,
    ) -> BoundPattern {
        let span = pattern.span;
        match &pattern.kind {
            PatternKind::Wildcard => BoundPattern::wildcard(span),
            PatternKind::Constant(expr) => self.bind_constant_pattern(expr, span, candidates, context, top_level),
            PatternKind::Declaration { ty, name } => {
                let (ty, failed) = if ty.is_var() {
                    // Resolved later by the enclosing recursive pattern
                    (candidates.only().unwrap_or(TypeId::ERROR), false)
                } else {
                    let declared = self.resolve_type(ty);
                    let failed = declared.is_error() || self.prune_emptied(span, declared, None, candidates);
                    (declared, failed)
                };
                let local = self.declare_local(name, ty, LocalKind::Pattern);
                BoundPattern {
                    kind: BoundPatternKind::Declaration { local },
                    span,
                    has_errors: failed,
                }
            }
            PatternKind::Recursive { ty, subpatterns } => {
                self.bind_recursive_pattern(ty, subpatterns, span, candidates, context)
            }
            PatternKind::Property { ty, subpatterns } => {
                self.bind_property_pattern(ty, subpatterns, span, context)
            }
        }
    }

    /// Prune and report whether that rejected every remaining candidate.
    fn prune_emptied(
        &mut self,
        span: Span,
        source: TypeId,
        constant: Option<&ConstantValue>,
        candidates: &mut TypeCandidates,
    ) -> bool {
        let was_empty = candidates.is_empty();
        self.prune(span, source, constant, candidates);
        !was_empty && candidates.is_empty()
    }

    fn bind_constant_pattern(
        &mut self,
        expr: &sable_parser::Expr,
        span: Span,
        candidates: &mut TypeCandidates,
        context: PatternContext,
        top_level: bool,
    ) -> BoundPattern {
        // `is T` is handled by the caller; anywhere else a type here is a
        // declaration pattern missing its designation
        if matches!(expr.kind, ExprKind::Name(_) | ExprKind::Member { .. } | ExprKind::PredefinedType(_))
            && self.try_bind_as_type(expr).is_some()
        {
            self.error(ErrorCode::DeclarationExpressionOutOfContext, span, Vec::new());
            return BoundPattern::error(span);
        }

        let value = self.bind_expr(expr);
        if value.has_errors() {
            return BoundPattern {
                kind: BoundPatternKind::Constant { value },
                span,
                has_errors: true,
            };
        }
        let Some(constant) = value.constant.clone() else {
            match (&value.kind, &expr.kind) {
                (BoundExprKind::Local(_) | BoundExprKind::Parameter(_), ExprKind::Name(name))
                    if top_level && context == PatternContext::Is =>
                {
                    self.error(
                        ErrorCode::BadSKknown,
                        span,
                        vec![name.name.to_string(), "variable".to_string(), "type".to_string()],
                    );
                }
                _ => self.error(ErrorCode::ConstantExpected, span, Vec::new()),
            }
            return BoundPattern {
                kind: BoundPatternKind::Constant { value },
                span,
                has_errors: true,
            };
        };

        let has_errors = !constant.is_null() && self.prune_emptied(span, value.ty, Some(&constant), candidates);
        BoundPattern {
            kind: BoundPatternKind::Constant { value },
            span,
            has_errors,
        }
    }

    /// Declare the designations of patterns that are not bound, so later
    /// uses of those names do not cascade into more errors.
    fn declare_error_locals(&mut self, subpatterns: &[SubPattern]) {
        for sub in subpatterns {
            match &sub.pattern.kind {
                PatternKind::Declaration { name, .. } => {
                    self.declare_local(name, TypeId::ERROR, LocalKind::Pattern);
                }
                PatternKind::Recursive { subpatterns, .. } | PatternKind::Property { subpatterns, .. } => {
                    self.declare_error_locals(subpatterns);
                }
                PatternKind::Wildcard | PatternKind::Constant(_) => {}
            }
        }
    }

    fn failed_pattern(&mut self, subpatterns: &[SubPattern], span: Span) -> BoundPattern {
        self.declare_error_locals(subpatterns);
        BoundPattern::error(span)
    }

    fn bind_recursive_pattern(
        &mut self,
        ty_syntax: &TypeSyntax,
        subpatterns: &[SubPattern],
        span: Span,
        candidates: &mut TypeCandidates,
        context: PatternContext,
    ) -> BoundPattern {
        let table = self.table;
        let ty = self.resolve_type(ty_syntax);
        if ty.is_error() {
            return self.failed_pattern(subpatterns, span);
        }

        let mut methods: Vec<Decomposition> = table
            .class_of_type(ty)
            .map(|class| table.find_methods(class, IS_OPERATOR_NAME))
            .unwrap_or_default()
            .into_iter()
            .map(|id| Decomposition { id, symbol: table.method(id) })
            .filter(|m| m.symbol.kind == MethodKind::IsOperator && !m.symbol.params.is_empty())
            .filter(|m| m.symbol.params.len() - 1 == subpatterns.len())
            .filter(|m| {
                subpatterns.iter().all(|sub| {
                    sub.name
                        .as_ref()
                        .map_or(true, |name| m.symbol.params[1..].iter().any(|p| p.name == name.name))
                })
            })
            .collect();
        if methods.is_empty() {
            self.error(
                ErrorCode::NoSuchMember,
                span,
                vec![self.type_name(ty), "is operator".to_string()],
            );
            return self.failed_pattern(subpatterns, span);
        }
        if let Some(bad) = named_after_positional(subpatterns) {
            self.error(ErrorCode::NamedArgumentSpecificationBeforeFixedArgument, bad, Vec::new());
            return self.failed_pattern(subpatterns, span);
        }

        let mut bound = Vec::with_capacity(subpatterns.len());
        let mut scratch = TypeCandidates::new();
        for (position, sub) in subpatterns.iter().enumerate() {
            scratch.clear();
            for method in &methods {
                if let Some(ty) = method.output_type(position, sub) {
                    scratch.insert(ty);
                }
            }
            bound.push(self.bind_pattern_at(&sub.pattern, &mut scratch, context, false));
            methods.retain(|m| m.output_type(position, sub).is_some_and(|t| scratch.contains(t)));
        }

        // Unify the surviving overloads with the operand
        for index in (0..methods.len()).rev() {
            let receiver = methods[index].symbol.params[0].ty;
            let viable = candidates
                .iter()
                .any(|c| pattern_conversion_exists(table, receiver, None, c));
            if viable {
                self.prune(span, receiver, None, candidates);
            } else {
                if methods.len() == 1 {
                    let last = candidates.last().map_or_else(|| "?".to_string(), |c| self.type_name(c));
                    self.error(ErrorCode::NoImplicitConv, span, vec![self.type_name(receiver), last]);
                }
                methods.remove(index);
            }
        }

        // Overloads are tried in declaration order; the first survivor wins
        let selected = methods.into_iter().next();
        let param_indices: Vec<usize> = subpatterns
            .iter()
            .enumerate()
            .map(|(position, sub)| {
                selected
                    .as_ref()
                    .and_then(|m| m.param_for(position, sub))
                    .map_or(position, |i| i - 1)
            })
            .collect();
        if let Some(method) = &selected {
            for ((sub, pattern), &index) in subpatterns.iter().zip(&bound).zip(&param_indices) {
                if let (true, BoundPatternKind::Declaration { local }) = (is_var_declaration(&sub.pattern), &pattern.kind) {
                    self.locals.set_type(*local, method.symbol.params[index + 1].ty);
                }
            }
        }

        let has_errors = selected.is_none() || bound.iter().any(|p| p.has_errors);
        BoundPattern {
            kind: BoundPatternKind::Recursive {
                ty,
                method: selected.map(|m| m.id),
                subpatterns: bound,
                param_indices,
            },
            span,
            has_errors,
        }
    }

    fn bind_property_pattern(
        &mut self,
        ty_syntax: &TypeSyntax,
        subpatterns: &[SubPattern],
        span: Span,
        context: PatternContext,
    ) -> BoundPattern {
        let table = self.table;
        let ty = self.resolve_type(ty_syntax);
        if ty.is_error() {
            return self.failed_pattern(subpatterns, span);
        }
        if let Some(bad) = named_after_positional(subpatterns) {
            self.error(ErrorCode::NamedArgumentSpecificationBeforeFixedArgument, bad, Vec::new());
            return self.failed_pattern(subpatterns, span);
        }

        let class = table.class_of_type(ty);
        let mut properties = Vec::with_capacity(subpatterns.len());
        let mut bound = Vec::with_capacity(subpatterns.len());
        for sub in subpatterns {
            let name = sub.name.as_ref().map_or("", |n| n.as_str());
            let property = class.and_then(|c| table.find_property(c, name));
            match property {
                Some(property) => {
                    let property_type = table.property(property).ty;
                    properties.push(property);
                    let mut candidates = TypeCandidates::single(property_type);
                    bound.push(self.bind_pattern_at(&sub.pattern, &mut candidates, context, false));
                }
                None => {
                    self.error(
                        ErrorCode::NoSuchMember,
                        sub.span,
                        vec![self.type_name(ty), if name.is_empty() { "_".to_string() } else { name.to_string() }],
                    );
                    self.declare_error_locals(std::slice::from_ref(sub));
                    bound.push(BoundPattern::error(sub.span));
                }
            }
        }

        let has_errors = properties.len() != bound.len() || bound.iter().any(|p| p.has_errors);
        BoundPattern {
            kind: BoundPatternKind::Property {
                ty,
                subpatterns: bound,
                properties,
            },
            span,
            has_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::binder::tests::{bind_all, codes};
    use crate::bound::*;
    use sable_symbols::{ErrorCode, TypeId};

    const POINT: &str = "class Point { public int X; public int Y; \
        public static bool operator is(Point p, out int x, out int y) { x = p.X; y = p.Y; return true; } }";

    /// The first `is` pattern in any bound method.
    fn find_pattern(methods: &[BoundMethod]) -> Option<(BoundPattern, LocalTable)> {
        fn in_expr(expr: &BoundExpr) -> Option<BoundPattern> {
            match &expr.kind {
                BoundExprKind::IsPattern { pattern, .. } => Some((**pattern).clone()),
                BoundExprKind::Conversion { operand, .. } => in_expr(operand),
                BoundExprKind::Binary { left, right, .. } => in_expr(left).or_else(|| in_expr(right)),
                _ => None,
            }
        }
        for method in methods {
            for stmt in &method.body.stmts {
                if let BoundStmtKind::LocalDeclaration { init: Some(init), .. } = &stmt.kind {
                    if let Some(pattern) = in_expr(init) {
                        return Some((pattern, method.locals.clone()));
                    }
                }
            }
        }
        None
    }

    fn program(body: &str) -> String {
        format!("{} class P {{ static void M(Point p, object o) {{ {} }} }}", POINT, body)
    }

    #[test]
    fn test_recursive_pattern_selects_operator() {
        let (methods, diagnostics) = bind_all(&program("bool b = p is Point(x: 0, y: var y) && y > 1;"));
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));
        let (pattern, locals) = find_pattern(&methods).unwrap();
        assert!(!pattern.has_errors);
        let BoundPatternKind::Recursive { method, subpatterns, param_indices, .. } = &pattern.kind else {
            panic!("expected a recursive pattern");
        };
        assert!(method.is_some());
        assert_eq!(param_indices, &vec![0, 1]);
        let BoundPatternKind::Declaration { local } = &subpatterns[1].kind else {
            panic!("expected a declaration");
        };
        assert_eq!(locals.ty(*local), TypeId::INT);
    }

    #[test]
    fn test_named_subpatterns_map_to_parameters() {
        let (methods, diagnostics) = bind_all(&program("bool b = p is Point(y: 1, x: *);"));
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));
        let (pattern, _) = find_pattern(&methods).unwrap();
        let BoundPatternKind::Recursive { param_indices, .. } = &pattern.kind else {
            panic!("expected a recursive pattern");
        };
        assert_eq!(param_indices, &vec![1, 0]);
    }

    #[test]
    fn test_arity_mismatch_has_no_operator() {
        let (methods, diagnostics) = bind_all(&program("bool b = p is Point(1, 2, 3);"));
        assert!(diagnostics.contains(ErrorCode::NoSuchMember));
        let (pattern, _) = find_pattern(&methods).unwrap();
        assert!(pattern.has_errors);
        assert!(matches!(pattern.kind, BoundPatternKind::Wildcard));
    }

    #[test]
    fn test_unnamed_after_named_is_rejected() {
        let (methods, diagnostics) = bind_all(&program("bool b = p is Point(x: 1, 2);"));
        assert!(diagnostics.contains(ErrorCode::NamedArgumentSpecificationBeforeFixedArgument));
        let (pattern, _) = find_pattern(&methods).unwrap();
        assert!(pattern.has_errors);
        assert!(matches!(pattern.kind, BoundPatternKind::Wildcard));
    }

    #[test]
    fn test_overload_narrowed_by_subpattern() {
        let source = "class Shape { \
            public static bool operator is(Shape s, out int size) { size = 1; return true; } \
            public static bool operator is(Shape s, out string name) { name = \"s\"; return true; } } \
            class P { static void M(Shape s) { bool b = s is Shape(\"box\"); } }";
        let (methods, diagnostics) = bind_all(source);
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));
        let (pattern, _) = find_pattern(&methods).unwrap();
        let BoundPatternKind::Recursive { method: Some(_), .. } = &pattern.kind else {
            panic!("expected a selected operator");
        };
        assert!(!pattern.has_errors);
    }

    #[test]
    fn test_constant_pattern_errors() {
        let (_, diagnostics) = bind_all(&program("int k = 3; bool b = o is Point(k, 1);"));
        assert!(diagnostics.contains(ErrorCode::ConstantExpected));

        let (_, diagnostics) = bind_all(&program("bool b = p is Point(\"a\", 1);"));
        assert!(diagnostics.contains(ErrorCode::NoImplicitConv));
    }

    #[test]
    fn test_property_pattern_reports_missing_member() {
        let source = "class Shape { public int Area { get; } } \
            class P { static void M(Shape s) { bool b = s is Shape { Area is 2, Volume is 3 }; } }";
        let (methods, diagnostics) = bind_all(source);
        assert!(diagnostics.contains(ErrorCode::NoSuchMember));
        let (pattern, _) = find_pattern(&methods).unwrap();
        assert!(pattern.has_errors);
        let BoundPatternKind::Property { subpatterns, properties, .. } = &pattern.kind else {
            panic!("expected a property pattern");
        };
        assert_eq!(subpatterns.len(), 2);
        assert_eq!(properties.len(), 1);
    }

    #[test]
    fn test_declaration_pattern_with_boxed_operand() {
        let (_, diagnostics) = bind_all(&program("bool b = o is int i && i > 0;"));
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));
    }
}
