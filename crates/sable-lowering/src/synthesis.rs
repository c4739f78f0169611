//! Bodies of compiler-generated members: auto-property accessors and the
//! record members `Equals`, `GetHashCode` and `operator is`.

use sable_binder::{BoundBlock, BoundExpr, BoundExprKind, LocalTable};
use sable_symbols::{
    stable_string_hash, ClassId, FieldId, MethodId, MethodKind, SymbolLookup, SymbolTable,
    SynthesizedKind, TypeId,
};

use crate::factory::SyntheticFactory;
use crate::numeric_helpers::numeric_helper_body;
use crate::LoweredMethod;

/// Multiplier of the record hash combine.
const HASH_FACTOR: i32 = -1521134295;

/// Lowered body of a synthesized method. Constructors are bound like
/// ordinary methods and rewritten members already have a body, so both
/// yield `None`.
pub fn synthesize_body(table: &SymbolTable, method: MethodId) -> Option<LoweredMethod> {
    let symbol = table.method(method);
    let f = SyntheticFactory::new(table, symbol.span);
    let class = symbol.containing;
    let mut locals = LocalTable::new();

    let stmts = match symbol.synthesized? {
        SynthesizedKind::AutoPropertyGet => {
            let field = accessor_backing_field(table, symbol.kind);
            let receiver = (!symbol.is_static).then(|| f.this(class));
            vec![f.ret(Some(f.field(receiver, field)))]
        }
        SynthesizedKind::AutoPropertySet => {
            let field = accessor_backing_field(table, symbol.kind);
            let receiver = (!symbol.is_static).then(|| f.this(class));
            let value = f.parameter(0, symbol.params[0].ty);
            vec![f.assign_stmt(f.field(receiver, field), value), f.ret(None)]
        }
        SynthesizedKind::RecordEquals => {
            let class_type = table.class(class).type_id;
            let other = locals.temp(class_type);
            let other_ref = f.local(other, class_type);
            let cast = BoundExpr::new(
                BoundExprKind::AsType {
                    operand: Box::new(f.parameter(0, TypeId::OBJECT)),
                    target: class_type,
                },
                class_type,
                f.span,
            );
            let comparer = f.builtin_method(ClassId::EQUALITY_COMPARER, "Equals", &[TypeId::OBJECT, TypeId::OBJECT]);
            let mut test = f.is_not_null(other_ref.clone());
            for field in record_fields(table, class) {
                let mine = f.convert(f.field(Some(f.this(class)), field), TypeId::OBJECT);
                let theirs = f.convert(f.field(Some(other_ref.clone()), field), TypeId::OBJECT);
                test = f.and(test, f.call(None, comparer, vec![mine, theirs]));
            }
            vec![f.assign_stmt(other_ref, cast), f.ret(Some(test))]
        }
        SynthesizedKind::RecordGetHashCode => {
            let fields = record_fields(table, class);
            let seed = fields.iter().fold(0i32, |hash, &field| {
                hash.wrapping_mul(HASH_FACTOR)
                    .wrapping_add(stable_string_hash(&table.field(field).name))
            });
            let comparer = f.builtin_method(ClassId::EQUALITY_COMPARER, "GetHashCode", &[TypeId::OBJECT]);
            let mut hash = f.int(seed);
            for field in fields {
                let value = f.convert(f.field(Some(f.this(class)), field), TypeId::OBJECT);
                let scaled = f.binary(sable_binder::BinaryOperator::Mul, hash, f.int(HASH_FACTOR), TypeId::INT);
                hash = f.binary(
                    sable_binder::BinaryOperator::Add,
                    scaled,
                    f.call(None, comparer, vec![value]),
                    TypeId::INT,
                );
            }
            vec![f.ret(Some(hash))]
        }
        SynthesizedKind::RecordIsOperator => {
            let record = table.class(class);
            let operand = f.parameter(0, symbol.params[0].ty);
            let mut stmts = Vec::new();
            for (index, primary) in record.primary_params.iter().enumerate() {
                let Some(property) = primary.property else { continue };
                let getter = table
                    .property(property)
                    .getter
                    .unwrap_or_else(|| unreachable!("record property without getter"));
                let out = f.parameter(index as u16 + 1, symbol.params[index + 1].ty);
                stmts.push(f.assign_stmt(out, f.call(Some(operand.clone()), getter, Vec::new())));
            }
            stmts.push(f.ret(Some(f.bool(true))));
            stmts
        }
        SynthesizedKind::NumericHelper(kind) => return Some(numeric_helper_body(table, method, kind)),
        SynthesizedKind::DefaultConstructor
        | SynthesizedKind::PrimaryConstructor
        | SynthesizedKind::StaticConstructor
        | SynthesizedKind::Rewritten => return None,
    };

    Some(LoweredMethod {
        method,
        locals,
        body: BoundBlock::new(stmts, f.span),
        state_machine: None,
    })
}

fn accessor_backing_field(table: &SymbolTable, kind: MethodKind) -> FieldId {
    let property = match kind {
        MethodKind::PropertyGet(p) | MethodKind::PropertySet(p) => p,
        _ => unreachable!("auto accessor is not a property accessor"),
    };
    table
        .property(property)
        .backing_field
        .unwrap_or_else(|| unreachable!("auto property without a backing field"))
}

/// Instance fields a record compares and hashes, in declaration order.
fn record_fields(table: &SymbolTable, class: ClassId) -> Vec<FieldId> {
    table
        .class(class)
        .fields
        .iter()
        .copied()
        .filter(|&id| {
            let field = table.field(id);
            !field.is_static && !field.is_const
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use sable_binder::{declare_program, BinaryOperator, BoundStmtKind};
    use sable_parser::parse_compilation_unit;

    use super::*;

    fn declare(source: &str) -> SymbolTable {
        let table = SymbolTable::new();
        let (unit, errors) = parse_compilation_unit(source, 0);
        assert!(errors.is_empty(), "{:?}", errors);
        let units = vec![unit];
        let program = declare_program(&table, &units);
        assert!(program.take_diagnostics().iter().all(|d| !d.is_error()));
        drop(program);
        table
    }

    fn method(table: &SymbolTable, class: &str, name: &str) -> MethodId {
        let class = table.find_top_level(class).unwrap();
        table.find_methods(class, name)[0]
    }

    fn returned(method: &LoweredMethod) -> &BoundExpr {
        match &method.body.stmts.last().unwrap().kind {
            BoundStmtKind::Return(Some(value)) => value,
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_auto_property_accessors() {
        let table = declare("class C { public int P { get; set; } }");
        let getter = synthesize_body(&table, method(&table, "C", "get_P")).unwrap();
        assert!(matches!(returned(&getter).kind, BoundExprKind::Field { receiver: Some(_), .. }));
        let setter = synthesize_body(&table, method(&table, "C", "set_P")).unwrap();
        assert_eq!(setter.body.stmts.len(), 2);
    }

    #[test]
    fn test_record_equals_chains_fields() {
        let table = declare("record class Point(int X, int Y);");
        let equals = synthesize_body(&table, method(&table, "Point", "Equals")).unwrap();
        assert_eq!(equals.locals.len(), 1);
        // other != null && Equals(X) && Equals(Y)
        let mut conjuncts = 1;
        let mut node = returned(&equals);
        while let BoundExprKind::Binary { op: BinaryOperator::LogicalAnd, left, .. } = &node.kind {
            conjuncts += 1;
            node = left;
        }
        assert_eq!(conjuncts, 3);
    }

    #[test]
    fn test_record_hash_seed_depends_on_field_names() {
        let first = declare("record class A(int X);");
        let second = declare("record class A(int Y);");
        let seed = |table: &SymbolTable| {
            let hash = synthesize_body(table, method(table, "A", "GetHashCode")).unwrap();
            let mut node = returned(&hash).clone();
            while let BoundExprKind::Binary { left, .. } = node.kind {
                node = *left;
            }
            node.constant
        };
        assert_ne!(seed(&first), seed(&second));
        assert_eq!(
            seed(&first),
            Some(sable_symbols::ConstantValue::Int(stable_string_hash("<X>k__BackingField") as i64))
        );
    }

    #[test]
    fn test_record_is_operator_assigns_outputs() {
        let table = declare("record class Point(int X, int Y);");
        let op = synthesize_body(&table, method(&table, "Point", sable_binder::IS_OPERATOR_NAME)).unwrap();
        assert_eq!(op.body.stmts.len(), 3);
        let BoundStmtKind::Expression(assign) = &op.body.stmts[1].kind else {
            panic!("expected assignment");
        };
        let BoundExprKind::Assignment { target, .. } = &assign.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(target.kind, BoundExprKind::Parameter(2)));
    }

    #[test]
    fn test_constructors_have_no_synthesized_body() {
        let table = declare("record class Point(int X, int Y);");
        assert!(synthesize_body(&table, method(&table, "Point", ".ctor")).is_none());
    }
}
