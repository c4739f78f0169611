//! Boxed numeric equality helpers.
//!
//! A constant pattern `2` tested against an `object` has to match a boxed
//! `short` or `long` holding the same value, so the comparison is routed
//! through a static helper that unboxes every type the constant's kind
//! widens from or to.

use sable_binder::{BoundBlock, LocalTable};
use sable_symbols::{
    binary_numeric_promotion, MethodId, MethodKind, MethodSymbol, NumericHelperKind,
    ParameterSymbol, SymbolLookup, SymbolTable, SynthesizedKind, TypeId,
};

use crate::factory::SyntheticFactory;
use crate::local_rewriter::LocalRewriter;
use crate::LoweredMethod;

impl LocalRewriter<'_, '_> {
    /// The helper for `kind` on the class being compiled, created on
    /// first use.
    pub(crate) fn numeric_helper(&mut self, kind: NumericHelperKind) -> MethodId {
        if let Some(helper) = self.synthesized.helper(kind) {
            return helper;
        }
        let value_type = kind.value_type().type_id();
        let symbol = MethodSymbol::new(kind.helper_name(), self.class, MethodKind::Ordinary, TypeId::BOOL)
            .with_params(vec![
                ParameterSymbol::new("o", TypeId::OBJECT),
                ParameterSymbol::new("v", value_type),
            ])
            .with_static()
            .with_synthesized(SynthesizedKind::NumericHelper(kind));
        let helper = self.table.add_method(symbol);
        tracing::trace!(helper = kind.helper_name(), class = %self.table.class_name(self.class), "synthesized numeric helper");
        self.synthesized.helpers.insert(kind, helper);
        self.synthesized.methods.push(numeric_helper_body(self.table, helper, kind));
        helper
    }
}

/// `if (o is W) return (C)(W)o == (C)v;` for every widening type `W`,
/// where `C` is the promoted comparison type, then `return false`.
pub(crate) fn numeric_helper_body(table: &SymbolTable, helper: MethodId, kind: NumericHelperKind) -> LoweredMethod {
    let f = SyntheticFactory::new(table, table.method(helper).span);
    let value_primitive = kind.value_type();
    let boxed = f.parameter(0, TypeId::OBJECT);
    let value = f.parameter(1, value_primitive.type_id());

    let mut stmts = Vec::new();
    for &widening in kind.widening_types() {
        let compare = binary_numeric_promotion(widening, value_primitive)
            .unwrap_or(widening)
            .type_id();
        let unboxed = f.convert(boxed.clone(), widening.type_id());
        let equal = f.eq(f.convert(unboxed, compare), f.convert(value.clone(), compare));
        stmts.push(f.if_then(f.is_type(boxed.clone(), widening.type_id()), f.ret(Some(equal)), None));
    }
    stmts.push(f.ret(Some(f.bool(false))));

    LoweredMethod {
        method: helper,
        locals: LocalTable::new(),
        body: BoundBlock::new(stmts, f.span),
        state_machine: None,
    }
}

#[cfg(test)]
mod tests {
    use sable_binder::{BoundExprKind, BoundStmtKind};
    use sable_symbols::{ClassId, ClassKind, ClassSymbol, PrimitiveType, Ty};

    use super::*;
    use crate::SynthesizedMembers;

    #[test]
    fn test_helper_is_created_once_per_kind() {
        let table = SymbolTable::new();
        let class = table.add_class(ClassSymbol::new("Program", ClassKind::Class));
        let mut synthesized = SynthesizedMembers::new();
        let mut rewriter = LocalRewriter::new(&table, class, LocalTable::new(), &mut synthesized, Default::default());
        let first = rewriter.numeric_helper(NumericHelperKind::Int64);
        let second = rewriter.numeric_helper(NumericHelperKind::Int64);
        let other = rewriter.numeric_helper(NumericHelperKind::Double);
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(synthesized.methods.len(), 2);

        let symbol = table.method(first);
        assert!(symbol.is_static);
        assert_eq!(&*symbol.name, "<>Int64Helper");
        assert_eq!(symbol.params[1].ty, TypeId::LONG);
        assert!(table.class(class).methods.contains(&first));
        assert_ne!(class, ClassId::OBJECT);
    }

    #[test]
    fn test_body_tests_each_widening_type_in_order() {
        let table = SymbolTable::new();
        let class = table.add_class(ClassSymbol::new("Program", ClassKind::Class));
        let mut synthesized = SynthesizedMembers::new();
        let helper = LocalRewriter::new(&table, class, LocalTable::new(), &mut synthesized, Default::default())
            .numeric_helper(NumericHelperKind::UInt32);
        let body = &synthesized.methods[0].body;
        assert_eq!(synthesized.methods[0].method, helper);

        let tested: Vec<TypeId> = body
            .stmts
            .iter()
            .filter_map(|s| match &s.kind {
                BoundStmtKind::If { condition, .. } => match &condition.kind {
                    BoundExprKind::IsType { target, .. } => Some(*target),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        let expected: Vec<TypeId> = NumericHelperKind::UInt32
            .widening_types()
            .iter()
            .map(|p| p.type_id())
            .collect();
        assert_eq!(tested, expected);
        assert!(matches!(
            body.stmts.last().map(|s| &s.kind),
            Some(BoundStmtKind::Return(Some(value))) if value.constant == Some(sable_symbols::ConstantValue::Bool(false))
        ));
        assert_eq!(table.ty(expected[0]), Ty::Primitive(PrimitiveType::Byte));
    }
}
