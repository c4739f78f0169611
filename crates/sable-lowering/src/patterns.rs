//! Lowering of patterns into boolean expressions.

use sable_binder::{BoundExpr, BoundPattern, BoundPatternKind, BoundTreeRewriter, LocalId};
use sable_symbols::{
    binary_numeric_promotion, NumericHelperKind, PropertyId, SymbolLookup, Ty, TypeId,
};

use crate::local_rewriter::LocalRewriter;

impl LocalRewriter<'_, '_> {
    /// The test `operand is pattern`. `operand` must be trivial: it is
    /// read once per subtest.
    pub(crate) fn lower_pattern(&mut self, operand: BoundExpr, pattern: BoundPattern) -> BoundExpr {
        let f = self.factory.at(pattern.span);
        if pattern.has_errors {
            return f.bool(false);
        }
        debug_assert!(operand.is_trivial());
        match pattern.kind {
            BoundPatternKind::Wildcard => f.bool(true),
            BoundPatternKind::Constant { value } => {
                let value = self.rewrite_expr(value);
                self.lower_constant_pattern(operand, value)
            }
            BoundPatternKind::Declaration { local } => self.lower_declaration_pattern(operand, local),
            BoundPatternKind::Recursive { method: None, .. } => f.bool(false),
            BoundPatternKind::Recursive {
                method: Some(method),
                subpatterns,
                param_indices,
                ..
            } => {
                let symbol = self.table.method(method);
                let receiver_ty = symbol.params[0].ty;
                let outputs: Vec<LocalId> = symbol.params[1..].iter().map(|p| self.temp(p.ty)).collect();

                let mut args = vec![f.convert(operand.clone(), receiver_ty)];
                args.extend(outputs.iter().map(|&t| f.local(t, self.locals.ty(t))));
                let receiver = (!symbol.is_static).then(|| f.convert(operand.clone(), receiver_ty));
                let mut test = f.and(f.is_type(operand, receiver_ty), f.call(receiver, method, args));

                for (sub, index) in subpatterns.into_iter().zip(param_indices) {
                    let output = outputs[index];
                    let element = f.local(output, self.locals.ty(output));
                    let sub_test = self.lower_pattern(element, sub);
                    test = f.and(test, sub_test);
                }
                f.sequence(outputs, Vec::new(), test)
            }
            BoundPatternKind::Property { ty, subpatterns, properties } => {
                self.lower_property_pattern(operand, ty, subpatterns, properties)
            }
        }
    }

    fn lower_constant_pattern(&mut self, operand: BoundExpr, value: BoundExpr) -> BoundExpr {
        let f = self.factory.at(value.span);
        let nullable = self.table.types.nullable_underlying(operand.ty);
        if value.is_null_literal() {
            if nullable.is_some() {
                return f.not(f.has_value(operand));
            }
            return f.eq(f.convert(operand, TypeId::OBJECT), f.null(TypeId::OBJECT));
        }
        if nullable.is_some() {
            let unwrapped = f.value_or_default(operand.clone());
            let compare = self.compare_values(unwrapped, value);
            return f.and(f.has_value(operand), compare);
        }
        if operand.ty == TypeId::OBJECT {
            let helper_kind = match self.table.ty(value.ty) {
                Ty::Primitive(primitive) => NumericHelperKind::for_constant(primitive),
                _ => None,
            };
            if let Some(kind) = helper_kind {
                let helper = self.numeric_helper(kind);
                let args = vec![
                    f.convert(operand, TypeId::OBJECT),
                    f.convert(value, kind.value_type().type_id()),
                ];
                return f.call(None, helper, args);
            }
        }
        self.compare_values(operand, value)
    }

    /// `operand == value`, converting both sides to a common type.
    fn compare_values(&self, operand: BoundExpr, value: BoundExpr) -> BoundExpr {
        let f = self.factory.at(value.span);
        let left = match self.table.ty(operand.ty) {
            Ty::Primitive(p) if p.is_numeric() => Some(p),
            _ => None,
        };
        let right = match self.table.ty(value.ty) {
            Ty::Primitive(p) if p.is_numeric() => Some(p),
            _ => None,
        };
        if let (Some(left), Some(right)) = (left, right) {
            let common = binary_numeric_promotion(left, right).unwrap_or(left).type_id();
            return f.eq(f.convert(operand, common), f.convert(value, common));
        }
        if operand.ty == value.ty
            || (operand.ty != TypeId::OBJECT && self.table.has_implicit_conversion(value.ty, operand.ty))
        {
            let ty = operand.ty;
            return f.eq(operand, f.convert(value, ty));
        }
        let value_ty = value.ty;
        f.and(f.is_type(operand.clone(), value_ty), f.eq(f.convert(operand, value_ty), value))
    }

    fn lower_declaration_pattern(&mut self, operand: BoundExpr, local: LocalId) -> BoundExpr {
        let f = self.factory.at(operand.span);
        let ty = self.locals.ty(local);
        let target = f.local(local, ty);
        if self.table.types.nullable_underlying(operand.ty).is_some() && self.table.types.nullable_underlying(ty).is_none() {
            let unwrapped = f.convert(f.value_or_default(operand.clone()), ty);
            return f.and(f.has_value(operand), f.is_type(f.assign(target, unwrapped), ty));
        }
        let assigned = f.assign(target, f.convert(operand.clone(), ty));
        f.and(f.is_type(operand, ty), f.is_type(assigned, ty))
    }

    fn lower_property_pattern(
        &mut self,
        operand: BoundExpr,
        ty: TypeId,
        subpatterns: Vec<BoundPattern>,
        properties: Vec<PropertyId>,
    ) -> BoundExpr {
        let f = self.factory.at(operand.span);
        let mut temps = Vec::new();
        let mut test = f.is_type(operand.clone(), ty);
        for (sub, property) in subpatterns.into_iter().zip(properties) {
            if matches!(sub.kind, BoundPatternKind::Wildcard) && !sub.has_errors {
                continue;
            }
            let symbol = self.table.property(property);
            let getter = symbol
                .getter
                .unwrap_or_else(|| unreachable!("property pattern over a write-only property"));
            let read = f.call_typed(Some(f.convert(operand.clone(), ty)), getter, Vec::new(), symbol.ty);
            let temp = self.temp(symbol.ty);
            temps.push(temp);
            let element = f.local(temp, symbol.ty);
            let sub_test = self.lower_pattern(element.clone(), sub);
            test = f.and(test, f.sequence(Vec::new(), vec![f.assign(element, read)], sub_test));
        }
        f.sequence(temps, Vec::new(), test)
    }
}

#[cfg(test)]
mod tests {
    use sable_binder::{BinaryOperator, BoundExprKind, BoundStmtKind, BoundTreeWalker};
    use sable_symbols::{ConstantValue, MethodId, SymbolTable};

    use crate::local_rewriter::rewrite_locals;
    use crate::test_support::{bind_source, method_named};
    use crate::{LoweredMethod, SynthesizedMembers};

    use super::*;

    fn lower(source: &str, name: &str) -> (SymbolTable, LoweredMethod, SynthesizedMembers) {
        let (table, methods) = bind_source(source);
        let bound = method_named(&table, &methods, name);
        let mut synthesized = SynthesizedMembers::new();
        let lowered = rewrite_locals(&table, bound, &mut synthesized);
        (table, lowered, synthesized)
    }

    /// The value of the first `return` in the body.
    fn returned(method: &LoweredMethod) -> BoundExpr {
        method
            .body
            .stmts
            .iter()
            .find_map(|s| match &s.kind {
                BoundStmtKind::Return(Some(value)) => Some(value.clone()),
                _ => None,
            })
            .expect("no return")
    }

    #[derive(Default)]
    struct Shapes {
        calls: Vec<MethodId>,
        is_types: Vec<TypeId>,
        equalities: usize,
    }

    impl BoundTreeWalker for Shapes {
        fn visit_expr(&mut self, expr: &BoundExpr) {
            match &expr.kind {
                BoundExprKind::Call { method, .. } => self.calls.push(*method),
                BoundExprKind::IsType { target, .. } => self.is_types.push(*target),
                BoundExprKind::Binary { op: BinaryOperator::Eq, .. } => self.equalities += 1,
                _ => {}
            }
            sable_binder::visit::visit_expr_children(self, expr);
        }
    }

    fn shapes(expr: &BoundExpr) -> Shapes {
        let mut shapes = Shapes::default();
        shapes.visit_expr(expr);
        shapes
    }

    #[test]
    fn test_null_constant_compares_as_object() {
        let (_, lowered, _) = lower("class P { static bool M(string s) { return s is null; } }", "M");
        let value = returned(&lowered);
        let BoundExprKind::Binary { op: BinaryOperator::Eq, left, right } = &value.kind else {
            panic!("expected an equality, got {:?}", value.kind);
        };
        assert_eq!(left.ty, TypeId::OBJECT);
        assert!(right.is_null_literal());
    }

    #[test]
    fn test_nullable_constant_checks_has_value() {
        let (_, lowered, _) = lower("class P { static bool M(int? n) { return n is 3; } }", "M");
        let value = returned(&lowered);
        let BoundExprKind::Binary { op: BinaryOperator::LogicalAnd, left, .. } = &value.kind else {
            panic!("expected a conjunction");
        };
        assert!(matches!(left.kind, BoundExprKind::NullableHasValue(_)));
    }

    #[test]
    fn test_boxed_numeric_constant_uses_helper() {
        let (table, lowered, synthesized) = lower("class P { static bool M(object o) { return o is 2; } }", "M");
        let helper = synthesized.helper(NumericHelperKind::Int32).expect("helper created");
        assert_eq!(&*table.method(helper).name, "<>Int32Helper");
        assert_eq!(shapes(&returned(&lowered)).calls, vec![helper]);
        // The helper body is queued once
        assert_eq!(synthesized.methods.len(), 1);
    }

    #[test]
    fn test_numeric_constant_on_other_reference_types_skips_helper() {
        use sable_binder::LocalTable;
        use sable_symbols::{ClassKind, ClassSymbol};

        let table = SymbolTable::new();
        let class = table.add_class(ClassSymbol::new("Program", ClassKind::Class));
        let mut synthesized = SynthesizedMembers::new();
        let mut rewriter = LocalRewriter::new(&table, class, LocalTable::new(), &mut synthesized, Default::default());
        let f = rewriter.factory;
        let test = rewriter.lower_constant_pattern(f.parameter(0, TypeId::STRING), f.int(2));
        drop(rewriter);

        let shapes = shapes(&test);
        assert!(shapes.calls.is_empty());
        assert_eq!(shapes.is_types, vec![TypeId::INT]);
        assert_eq!(shapes.equalities, 1);
        assert!(synthesized.helper(NumericHelperKind::Int32).is_none());
        assert!(synthesized.methods.is_empty());
    }

    #[test]
    fn test_declaration_on_matching_value_type_is_assignment() {
        let (_, lowered, _) = lower("class P { static int M(int n) { if (n is int k) return k; return 0; } }", "M");
        let BoundStmtKind::If { condition, .. } = &lowered.body.stmts[0].kind else {
            panic!("expected if");
        };
        // Both type tests fold away, leaving the assignment and `true`
        let BoundExprKind::Sequence { side_effects, value, .. } = &condition.kind else {
            panic!("expected a sequence, got {:?}", condition.kind);
        };
        assert!(matches!(side_effects[0].kind, BoundExprKind::Assignment { .. }));
        assert_eq!(value.constant, Some(ConstantValue::Bool(true)));
    }

    #[test]
    fn test_recursive_pattern_calls_is_operator() {
        let source = "class Point { public int X; public int Y; \
             public static bool operator is(Point p, out int x, out int y) { x = p.X; y = p.Y; return true; } } \
             class P { static int M(Point point) { if (point is Point(x: 0, y: var y)) return y; return -1; } }";
        let (table, lowered, _) = lower(source, "M");
        let BoundStmtKind::If { condition, .. } = &lowered.body.stmts[0].kind else {
            panic!("expected if");
        };
        let BoundExprKind::Sequence { locals, .. } = &condition.kind else {
            panic!("expected the out temps to be scoped");
        };
        assert_eq!(locals.len(), 2);
        let shapes = shapes(condition);
        assert_eq!(shapes.calls.len(), 1);
        assert_eq!(&*table.method(shapes.calls[0]).name, sable_binder::IS_OPERATOR_NAME);
        assert_eq!(shapes.equalities, 1);
    }

    #[test]
    fn test_property_pattern_reads_getters() {
        let source = "class C { public int A { get; set; } public string B { get; set; } } \
             class P { static bool M(object o) { return o is C { A is 1, B is * }; } }";
        let (table, lowered, _) = lower(source, "M");
        let value = returned(&lowered);
        let shapes = shapes(&value);
        let names: Vec<String> = shapes.calls.iter().map(|&m| table.method(m).name.to_string()).collect();
        assert_eq!(names, vec!["get_A"]);
        assert_eq!(shapes.is_types.len(), 1);
    }
}
