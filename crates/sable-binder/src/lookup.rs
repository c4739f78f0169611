//! Type name resolution.

use sable_lexer::Span;
use sable_parser::{PredefinedType, TypeSegment, TypeSyntax, TypeSyntaxKind};
use sable_symbols::builtins::IMPLICIT_NAMESPACES;
use sable_symbols::{
    ClassId, DiagnosticBag, ErrorCode, GenericKind, PrimitiveType, Symbol, SymbolLookup,
    SymbolTable, TypeId,
};

/// Where a type name is being resolved from.
#[derive(Debug, Clone, Default)]
pub struct TypeScope {
    /// The innermost enclosing class
    pub class: Option<ClassId>,
    /// Dotted namespace of the outermost enclosing class
    pub namespace: Option<Symbol>,
}

impl TypeScope {
    pub fn for_class(table: &SymbolTable, class: ClassId) -> Self {
        let mut outer = class;
        while let Some(parent) = table.class(outer).containing {
            outer = parent;
        }
        Self {
            class: Some(class),
            namespace: table.class(outer).namespace.clone(),
        }
    }
}

pub fn predefined_type(p: PredefinedType) -> TypeId {
    match p {
        PredefinedType::Bool => TypeId::BOOL,
        PredefinedType::Byte => TypeId::BYTE,
        PredefinedType::SByte => TypeId::SBYTE,
        PredefinedType::Short => TypeId::SHORT,
        PredefinedType::UShort => TypeId::USHORT,
        PredefinedType::Int => TypeId::INT,
        PredefinedType::UInt => TypeId::UINT,
        PredefinedType::Long => TypeId::LONG,
        PredefinedType::ULong => TypeId::ULONG,
        PredefinedType::Char => TypeId::CHAR,
        PredefinedType::Float => TypeId::FLOAT,
        PredefinedType::Double => TypeId::DOUBLE,
        PredefinedType::Decimal => TypeId::DECIMAL,
        PredefinedType::String => TypeId::STRING,
        PredefinedType::Object => TypeId::OBJECT,
        PredefinedType::Void => TypeId::VOID,
    }
}

/// The primitive a predefined keyword names, if any.
pub fn predefined_primitive(p: PredefinedType) -> Option<PrimitiveType> {
    PrimitiveType::ALL
        .into_iter()
        .find(|prim| prim.type_id() == predefined_type(p))
}

/// Find a class by simple name as seen from `scope`: nested types of the
/// enclosing classes and their bases, then the enclosing namespaces from
/// innermost outwards, then the implicitly imported namespaces.
pub fn lookup_class(table: &SymbolTable, scope: &TypeScope, name: &str) -> Option<ClassId> {
    let mut current = scope.class;
    while let Some(class) = current {
        if let Some(found) = nested_in_hierarchy(table, class, name) {
            return Some(found);
        }
        current = table.class(class).containing;
    }

    let mut namespace = scope.namespace.as_deref().map(str::to_string);
    while let Some(ns) = namespace {
        if let Some(found) = table.find_top_level(&format!("{}.{}", ns, name)) {
            return Some(found);
        }
        namespace = ns.rfind('.').map(|i| ns[..i].to_string());
    }
    if let Some(found) = table.find_top_level(name) {
        return Some(found);
    }
    IMPLICIT_NAMESPACES
        .iter()
        .find_map(|ns| table.find_top_level(&format!("{}.{}", ns, name)))
}

/// A class nested in `class` or in one of its bases.
pub fn nested_in_hierarchy(table: &SymbolTable, class: ClassId, name: &str) -> Option<ClassId> {
    let mut current = Some(class);
    while let Some(id) = current {
        let symbol = table.class(id);
        if let Some(&nested) = symbol
            .nested
            .iter()
            .find(|&&n| &*table.class(n).name == name)
        {
            return Some(nested);
        }
        current = symbol.base;
    }
    None
}

/// Whether `prefix` names a namespace some declared class lives in.
pub fn is_namespace(table: &SymbolTable, prefix: &str) -> bool {
    let dotted = format!("{}.", prefix);
    (0..table.class_count() as u32).map(ClassId).any(|id| {
        table
            .class(id)
            .namespace
            .as_deref()
            .is_some_and(|ns| ns == prefix || ns.starts_with(&dotted))
    })
}

/// Resolve a type expression. Unknown names are reported and resolve to
/// the error type.
pub fn resolve_type(
    table: &SymbolTable,
    scope: &TypeScope,
    syntax: &TypeSyntax,
    diagnostics: &mut DiagnosticBag,
) -> TypeId {
    match &syntax.kind {
        TypeSyntaxKind::Predefined(p) => predefined_type(*p),
        TypeSyntaxKind::Nullable(inner) => {
            let inner = resolve_type(table, scope, inner, diagnostics);
            if inner.is_error() || !table.is_value_type(inner) {
                return inner;
            }
            if table.types.nullable_underlying(inner).is_some() {
                return inner;
            }
            table.types.nullable(inner)
        }
        TypeSyntaxKind::Named(segments) => resolve_named(table, scope, segments, syntax.span, diagnostics),
        // `var` is handled by the declaration that allows it
        TypeSyntaxKind::Var => TypeId::ERROR,
    }
}

fn resolve_named(
    table: &SymbolTable,
    scope: &TypeScope,
    segments: &[TypeSegment],
    span: Span,
    diagnostics: &mut DiagnosticBag,
) -> TypeId {
    let dotted = segments
        .iter()
        .map(|s| s.ident.as_str())
        .collect::<Vec<_>>()
        .join(".");
    let not_found = |diagnostics: &mut DiagnosticBag| {
        diagnostics.add(ErrorCode::TypeNotFound, span, vec![dotted.clone()]);
        TypeId::ERROR
    };

    if let [segment] = segments {
        if !segment.args.is_empty() || matches!(segment.ident.as_str(), "Task" | "Action") {
            if let Some(kind) = GenericKind::from_name(segment.ident.as_str()) {
                let args: Vec<TypeId> = segment
                    .args
                    .iter()
                    .map(|a| resolve_type(table, scope, a, diagnostics))
                    .collect();
                if args.iter().any(|a| a.is_error()) {
                    return TypeId::ERROR;
                }
                return generic_type(table, kind, args).unwrap_or_else(|| not_found(diagnostics));
            }
        }
    }
    if segments.iter().any(|s| !s.args.is_empty()) {
        return not_found(diagnostics);
    }

    let first = segments[0].ident.as_str();
    let mut class = lookup_class(table, scope, first);
    let mut rest = &segments[1..];
    if class.is_none() {
        // A namespace-qualified name: find the longest namespace prefix
        for split in (1..segments.len()).rev() {
            let ns: Vec<_> = segments[..split].iter().map(|s| s.ident.as_str()).collect();
            let qualified = format!("{}.{}", ns.join("."), segments[split].ident.as_str());
            if let Some(found) = table.find_top_level(&qualified) {
                class = Some(found);
                rest = &segments[split + 1..];
                break;
            }
        }
    }
    let Some(mut class) = class else {
        return not_found(diagnostics);
    };
    for segment in rest {
        match nested_in_hierarchy(table, class, segment.ident.as_str()) {
            Some(nested) => class = nested,
            None => return not_found(diagnostics),
        }
    }
    table.class(class).type_id
}

/// Instantiate a built-in generic type; `None` when the argument count is
/// not valid for `kind`.
pub fn generic_type(table: &SymbolTable, kind: GenericKind, args: Vec<TypeId>) -> Option<TypeId> {
    let valid = match kind {
        GenericKind::IEnumerable | GenericKind::IEnumerator => args.len() == 1,
        GenericKind::Task => args.len() <= 1,
        GenericKind::Func => !args.is_empty(),
        GenericKind::Action => true,
    };
    valid.then(|| table.types.generic(kind, args))
}

/// Parameter and return types of a `Func`/`Action` delegate type.
pub fn delegate_signature(table: &SymbolTable, ty: TypeId) -> Option<(Vec<TypeId>, TypeId)> {
    if let Some(mut args) = table.types.generic_args(ty, GenericKind::Func) {
        let ret = args.pop()?;
        return Some((args, ret));
    }
    table
        .types
        .generic_args(ty, GenericKind::Action)
        .map(|args| (args, TypeId::VOID))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_parser::Identifier;
    use sable_symbols::{ClassKind, ClassSymbol};

    fn named(parts: &[&str]) -> TypeSyntax {
        TypeSyntax {
            kind: TypeSyntaxKind::Named(
                parts
                    .iter()
                    .map(|p| TypeSegment {
                        ident: Identifier::new(*p, Span::dummy()),
                        args: Vec::new(),
                    })
                    .collect(),
            ),
            span: Span::dummy(),
        }
    }

    fn program(table: &SymbolTable) -> (ClassId, ClassId) {
        let mut outer = ClassSymbol::new("Program", ClassKind::Class);
        outer.namespace = Some("App.Core".into());
        let outer = table.add_class(outer);
        let mut days = ClassSymbol::new("Days", ClassKind::Enum);
        days.containing = Some(outer);
        (outer, table.add_class(days))
    }

    #[test]
    fn test_nested_and_namespace_lookup() {
        let table = SymbolTable::new();
        let (outer, days) = program(&table);
        let scope = TypeScope::for_class(&table, outer);
        assert_eq!(lookup_class(&table, &scope, "Days"), Some(days));
        assert_eq!(lookup_class(&table, &scope, "Program"), Some(outer));
        assert_eq!(lookup_class(&table, &scope, "Console"), Some(ClassId::CONSOLE));

        let mut diags = DiagnosticBag::new();
        let ty = resolve_type(&table, &TypeScope::default(), &named(&["App", "Core", "Program", "Days"]), &mut diags);
        assert_eq!(ty, table.class(days).type_id);
        assert!(diags.is_empty());
        assert!(is_namespace(&table, "App"));
        assert!(!is_namespace(&table, "Ap"));
    }

    #[test]
    fn test_unknown_type_is_reported() {
        let table = SymbolTable::new();
        let mut diags = DiagnosticBag::new();
        let ty = resolve_type(&table, &TypeScope::default(), &named(&["Missing"]), &mut diags);
        assert!(ty.is_error());
        assert!(diags.contains(ErrorCode::TypeNotFound));
    }

    #[test]
    fn test_generic_and_nullable_types() {
        let table = SymbolTable::new();
        let mut diags = DiagnosticBag::new();
        let func = TypeSyntax {
            kind: TypeSyntaxKind::Named(vec![TypeSegment {
                ident: Identifier::new("Func", Span::dummy()),
                args: vec![
                    TypeSyntax { kind: TypeSyntaxKind::Predefined(PredefinedType::Int), span: Span::dummy() },
                    TypeSyntax { kind: TypeSyntaxKind::Predefined(PredefinedType::String), span: Span::dummy() },
                ],
            }]),
            span: Span::dummy(),
        };
        let ty = resolve_type(&table, &TypeScope::default(), &func, &mut diags);
        assert_eq!(delegate_signature(&table, ty), Some((vec![TypeId::INT], TypeId::STRING)));

        let nullable = TypeSyntax {
            kind: TypeSyntaxKind::Nullable(Box::new(TypeSyntax {
                kind: TypeSyntaxKind::Predefined(PredefinedType::Int),
                span: Span::dummy(),
            })),
            span: Span::dummy(),
        };
        let ty = resolve_type(&table, &TypeScope::default(), &nullable, &mut diags);
        assert_eq!(table.types.nullable_underlying(ty), Some(TypeId::INT));
        assert_eq!(resolve_type(&table, &TypeScope::default(), &named(&["Task"]), &mut diags), TypeId::TASK);
        assert!(diags.is_empty());
    }
}
