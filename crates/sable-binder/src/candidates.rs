//! The operand type candidate set and the pruning rule applied to it while
//! binding patterns.

use sable_lexer::Span;
use sable_symbols::{ConstantValue, DiagnosticBag, ErrorCode, SymbolLookup, SymbolTable, TypeId};

use crate::constants::constant_fits;

/// The statically possible types of the value tested at one pattern
/// position. Insertion ordered; shrinks as patterns are bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeCandidates {
    types: Vec<TypeId>,
}

impl TypeCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(ty: TypeId) -> Self {
        Self { types: vec![ty] }
    }

    /// Add `ty` unless already present.
    pub fn insert(&mut self, ty: TypeId) {
        if !self.types.contains(&ty) {
            self.types.push(ty);
        }
    }

    pub fn contains(&self, ty: TypeId) -> bool {
        self.types.contains(&ty)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn clear(&mut self) {
        self.types.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.types.iter().copied()
    }

    /// The sole remaining candidate.
    pub fn only(&self) -> Option<TypeId> {
        match self.types.as_slice() {
            [ty] => Some(*ty),
            _ => None,
        }
    }

    pub fn last(&self) -> Option<TypeId> {
        self.types.last().copied()
    }
}

impl FromIterator<TypeId> for TypeCandidates {
    fn from_iter<I: IntoIterator<Item = TypeId>>(iter: I) -> Self {
        let mut candidates = TypeCandidates::new();
        for ty in iter {
            candidates.insert(ty);
        }
        candidates
    }
}

/// Whether a value of type `source` (a constant when `constant` is set)
/// converts implicitly to `destination` for pattern purposes.
pub fn pattern_conversion_exists(
    table: &SymbolTable,
    source: TypeId,
    constant: Option<&ConstantValue>,
    destination: TypeId,
) -> bool {
    if table.has_implicit_conversion(source, destination) {
        return true;
    }
    match (constant, table.types.primitive(source), table.types.primitive(destination)) {
        (Some(value), Some(from), Some(to)) => constant_fits(value, from, to),
        _ => false,
    }
}

/// Remove every candidate that the pattern type `source` cannot convert to.
///
/// A candidate is only diagnosed when it is the last one standing at the
/// moment it is rejected, so a set that still has viable members after
/// pruning produces no diagnostics.
pub fn prune(
    table: &SymbolTable,
    span: Span,
    source: TypeId,
    constant: Option<&ConstantValue>,
    candidates: &mut TypeCandidates,
    diagnostics: &mut DiagnosticBag,
) {
    let mut i = 0;
    while i < candidates.types.len() {
        let candidate = candidates.types[i];
        if pattern_conversion_exists(table, source, constant, candidate) {
            i += 1;
            continue;
        }
        if candidates.types.len() == 1 {
            diagnostics.add(
                ErrorCode::NoImplicitConv,
                span,
                vec![table.type_name(source), table.type_name(candidate)],
            );
        }
        candidates.types.remove(i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_symbols::{ClassKind, ClassSymbol};

    fn hierarchy(table: &SymbolTable) -> (TypeId, TypeId, TypeId) {
        let expr = table.add_class(ClassSymbol::new("Expr", ClassKind::Class));
        let mut add = ClassSymbol::new("Add", ClassKind::Record);
        add.base = Some(expr);
        let add = table.add_class(add);
        let test = table.add_class(ClassSymbol::new("Test", ClassKind::Class));
        (
            table.class(expr).type_id,
            table.class(add).type_id,
            table.class(test).type_id,
        )
    }

    #[test]
    fn test_prune_keeps_only_convertible_candidates() {
        let table = SymbolTable::new();
        let (expr, add, test) = hierarchy(&table);
        let mut candidates: TypeCandidates = [expr, test, TypeId::INT].into_iter().collect();
        let mut diags = DiagnosticBag::new();
        prune(&table, Span::dummy(), add, None, &mut candidates, &mut diags);
        assert_eq!(candidates.iter().collect::<Vec<_>>(), vec![expr]);
        for ty in candidates.iter() {
            assert!(table.has_implicit_conversion(add, ty));
        }
        assert!(diags.is_empty());
    }

    #[test]
    fn test_last_candidate_is_diagnosed_once() {
        let table = SymbolTable::new();
        let (_, _, test) = hierarchy(&table);
        let mut candidates = TypeCandidates::single(TypeId::INT);
        let mut diags = DiagnosticBag::new();
        prune(&table, Span::dummy(), test, None, &mut candidates, &mut diags);
        assert!(candidates.is_empty());
        assert_eq!(diags.len(), 1);
        let d = diags.iter().next().unwrap();
        assert_eq!(d.code, ErrorCode::NoImplicitConv);
        assert_eq!(d.args, vec!["Test".to_string(), "int".to_string()]);
    }

    #[test]
    fn test_diagnostic_names_the_last_rejected_candidate() {
        // `Test` cannot convert to either; the first rejection leaves one
        // candidate, which is then diagnosed.
        let table = SymbolTable::new();
        let (expr, _, test) = hierarchy(&table);
        let mut candidates: TypeCandidates = [expr, TypeId::DOUBLE].into_iter().collect();
        let mut diags = DiagnosticBag::new();
        prune(&table, Span::dummy(), test, None, &mut candidates, &mut diags);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.iter().next().unwrap().args[1], "double");
    }

    #[test]
    fn test_prune_is_idempotent() {
        let table = SymbolTable::new();
        let (expr, add, test) = hierarchy(&table);
        let mut once: TypeCandidates = [expr, add, test, TypeId::OBJECT].into_iter().collect();
        let mut diags = DiagnosticBag::new();
        prune(&table, Span::dummy(), add, None, &mut once, &mut diags);
        let mut twice = once.clone();
        prune(&table, Span::dummy(), add, None, &mut twice, &mut diags);
        assert_eq!(once, twice);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_constant_conversion_fits() {
        let table = SymbolTable::new();
        let mut candidates = TypeCandidates::single(TypeId::UINT);
        let mut diags = DiagnosticBag::new();
        prune(
            &table,
            Span::dummy(),
            TypeId::INT,
            Some(&ConstantValue::Int(2)),
            &mut candidates,
            &mut diags,
        );
        assert_eq!(candidates.only(), Some(TypeId::UINT));

        let mut candidates = TypeCandidates::single(TypeId::INT);
        prune(
            &table,
            Span::dummy(),
            TypeId::DOUBLE,
            Some(&ConstantValue::Double(2.5)),
            &mut candidates,
            &mut diags,
        );
        assert!(candidates.is_empty());
        assert!(diags.contains(ErrorCode::NoImplicitConv));
    }
}
