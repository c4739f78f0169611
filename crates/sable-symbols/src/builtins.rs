//! The built-in library every compilation sees.

use crate::symbols::{
    ClassId, ClassKind, ClassSymbol, FieldSymbol, Intrinsic, MethodKind, MethodSymbol,
    ParameterSymbol, PropertySymbol,
};
use crate::table::SymbolTable;
use crate::types::{GenericKind, TypeId};

/// Namespaces whose types resolve without qualification.
pub const IMPLICIT_NAMESPACES: &[&str] = &[
    "System",
    "System.Collections.Generic",
    "System.Threading.Tasks",
];

/// Name of the hidden field holding an exception's message.
pub const EXCEPTION_MESSAGE_FIELD: &str = "<message>";

fn builtin_class(name: &str, namespace: &str, kind: ClassKind) -> ClassSymbol {
    let mut class = ClassSymbol::new(name, kind);
    class.namespace = Some(namespace.into());
    class.is_builtin = true;
    class
}

fn intrinsic(
    class: ClassId,
    name: &str,
    params: Vec<ParameterSymbol>,
    return_type: TypeId,
    op: Intrinsic,
) -> MethodSymbol {
    MethodSymbol::new(name, class, MethodKind::Ordinary, return_type)
        .with_params(params)
        .with_intrinsic(op)
}

fn param(name: &str, ty: TypeId) -> ParameterSymbol {
    ParameterSymbol::new(name, ty)
}

/// Add a get-only property whose getter is an intrinsic.
fn intrinsic_property(
    table: &SymbolTable,
    class: ClassId,
    name: &str,
    ty: TypeId,
    op: Intrinsic,
    is_static: bool,
) {
    let property = table.add_property(PropertySymbol {
        name: name.into(),
        containing: class,
        ty,
        getter: None,
        setter: None,
        backing_field: None,
        is_static,
        span: Default::default(),
    });
    let mut getter = MethodSymbol::new(
        format!("get_{}", name),
        class,
        MethodKind::PropertyGet(property),
        ty,
    )
    .with_intrinsic(op);
    getter.is_static = is_static;
    let getter = table.add_method(getter);
    table.update_property(property, |p| p.getter = Some(getter));
}

/// Declare the built-in classes in `ClassId` order.
pub(crate) fn declare_builtins(table: &SymbolTable) {
    let t0 = table.types.type_param(0);

    // object
    let mut object = builtin_class("Object", "System", ClassKind::Class);
    object.base = None;
    let object = table.add_class(object);
    debug_assert_eq!(object, ClassId::OBJECT);
    table.add_method(
        MethodSymbol::new(".ctor", object, MethodKind::Constructor, TypeId::VOID)
            .with_intrinsic(Intrinsic::ObjectCtor),
    );
    for (name, params, ret, op) in [
        ("ToString", vec![], TypeId::STRING, Intrinsic::ObjectToString),
        ("Equals", vec![param("obj", TypeId::OBJECT)], TypeId::BOOL, Intrinsic::ObjectEquals),
        ("GetHashCode", vec![], TypeId::INT, Intrinsic::ObjectGetHashCode),
    ] {
        let mut method = intrinsic(object, name, params, ret, op);
        method.is_virtual = true;
        table.add_method(method);
    }

    // string
    let mut string = builtin_class("String", "System", ClassKind::Class);
    string.is_sealed = true;
    let string = table.add_class(string);
    debug_assert_eq!(string, ClassId::STRING);
    intrinsic_property(table, string, "Length", TypeId::INT, Intrinsic::StringLength, false);
    for ty in [TypeId::STRING, TypeId::OBJECT] {
        table.add_method(
            intrinsic(
                string,
                "Concat",
                vec![param("a", ty), param("b", ty)],
                TypeId::STRING,
                Intrinsic::StringConcat,
            )
            .with_static(),
        );
    }

    // System.Console
    let mut console = builtin_class("Console", "System", ClassKind::Class);
    console.is_static = true;
    let console = table.add_class(console);
    debug_assert_eq!(console, ClassId::CONSOLE);
    table.add_method(
        intrinsic(console, "WriteLine", vec![], TypeId::VOID, Intrinsic::ConsoleWriteLine)
            .with_static(),
    );
    for ty in [TypeId::STRING, TypeId::OBJECT] {
        table.add_method(
            intrinsic(
                console,
                "WriteLine",
                vec![param("value", ty)],
                TypeId::VOID,
                Intrinsic::ConsoleWriteLine,
            )
            .with_static(),
        );
        table.add_method(
            intrinsic(
                console,
                "Write",
                vec![param("value", ty)],
                TypeId::VOID,
                Intrinsic::ConsoleWrite,
            )
            .with_static(),
        );
    }

    // System.Math
    let mut math = builtin_class("Math", "System", ClassKind::Class);
    math.is_static = true;
    let math = table.add_class(math);
    debug_assert_eq!(math, ClassId::MATH);
    let d = TypeId::DOUBLE;
    let math_methods = [
        ("Sqrt", vec![param("d", d)], d, Intrinsic::MathSqrt),
        ("Atan2", vec![param("y", d), param("x", d)], d, Intrinsic::MathAtan2),
        ("Pow", vec![param("x", d), param("y", d)], d, Intrinsic::MathPow),
        ("Abs", vec![param("value", TypeId::INT)], TypeId::INT, Intrinsic::MathAbs),
        ("Abs", vec![param("value", d)], d, Intrinsic::MathAbs),
        ("Max", vec![param("a", TypeId::INT), param("b", TypeId::INT)], TypeId::INT, Intrinsic::MathMax),
        ("Max", vec![param("a", d), param("b", d)], d, Intrinsic::MathMax),
        ("Min", vec![param("a", TypeId::INT), param("b", TypeId::INT)], TypeId::INT, Intrinsic::MathMin),
        ("Min", vec![param("a", d), param("b", d)], d, Intrinsic::MathMin),
    ];
    for (name, params, ret, op) in math_methods {
        table.add_method(intrinsic(math, name, params, ret, op).with_static());
    }

    // System.Exception
    let exception = table.add_class(builtin_class("Exception", "System", ClassKind::Class));
    debug_assert_eq!(exception, ClassId::EXCEPTION);
    table.add_field(FieldSymbol::new(EXCEPTION_MESSAGE_FIELD, exception, TypeId::STRING));
    for params in [vec![], vec![param("message", TypeId::STRING)]] {
        table.add_method(
            MethodSymbol::new(".ctor", exception, MethodKind::Constructor, TypeId::VOID)
                .with_params(params)
                .with_intrinsic(Intrinsic::ExceptionCtor),
        );
    }
    intrinsic_property(table, exception, "Message", TypeId::STRING, Intrinsic::ExceptionMessage, false);

    // EqualityComparer, used by record equality and hashing
    let mut comparer = builtin_class("EqualityComparer", "System.Collections.Generic", ClassKind::Class);
    comparer.is_static = true;
    let comparer = table.add_class(comparer);
    debug_assert_eq!(comparer, ClassId::EQUALITY_COMPARER);
    table.add_method(
        intrinsic(
            comparer,
            "Equals",
            vec![param("x", TypeId::OBJECT), param("y", TypeId::OBJECT)],
            TypeId::BOOL,
            Intrinsic::ComparerEquals,
        )
        .with_static(),
    );
    table.add_method(
        intrinsic(
            comparer,
            "GetHashCode",
            vec![param("obj", TypeId::OBJECT)],
            TypeId::INT,
            Intrinsic::ComparerGetHashCode,
        )
        .with_static(),
    );

    // Task and Task<T>
    let task = table.add_class(builtin_class("Task", "System.Threading.Tasks", ClassKind::Class));
    debug_assert_eq!(task, ClassId::TASK);
    let task_of_t0 = table.types.generic(GenericKind::Task, vec![t0]);
    let mut from_result = intrinsic(
        task,
        "FromResult",
        vec![param("result", t0)],
        task_of_t0,
        Intrinsic::TaskFromResult,
    )
    .with_static();
    from_result.generic_arity = 1;
    table.add_method(from_result);
    table.add_method(
        intrinsic(task, "Yield", vec![], TypeId::TASK, Intrinsic::TaskYield).with_static(),
    );
    intrinsic_property(table, task, "CompletedTask", TypeId::TASK, Intrinsic::TaskCompleted, true);
    intrinsic_property(table, task, "Result", t0, Intrinsic::TaskResult, false);
    intrinsic_property(table, task, "IsCompleted", TypeId::BOOL, Intrinsic::TaskIsCompleted, false);
    table.add_method(
        intrinsic(task, "<>Create", vec![], TypeId::TASK, Intrinsic::TaskCreate).with_static(),
    );
    table.add_method(intrinsic(
        task,
        "<>SetResult",
        vec![param("result", TypeId::OBJECT)],
        TypeId::VOID,
        Intrinsic::TaskSetResult,
    ));
    let exception_type = table.types.class(exception);
    table.add_method(intrinsic(
        task,
        "<>SetException",
        vec![param("exception", exception_type)],
        TypeId::VOID,
        Intrinsic::TaskSetException,
    ));
    table.add_method(
        intrinsic(
            task,
            "<>OnCompleted",
            vec![param("awaiter", TypeId::TASK), param("machine", TypeId::OBJECT)],
            TypeId::VOID,
            Intrinsic::TaskOnCompleted,
        )
        .with_static(),
    );
    table.add_method(intrinsic(task, "<>GetResult", vec![], t0, Intrinsic::TaskGetResult));

    // IEnumerable<T> and IEnumerator<T>
    let enumerator_of_t0 = table.types.generic(GenericKind::IEnumerator, vec![t0]);
    let mut enumerable = builtin_class("IEnumerable", "System.Collections.Generic", ClassKind::Interface);
    enumerable.is_abstract = true;
    enumerable.type_id = table.types.generic(GenericKind::IEnumerable, vec![t0]);
    let enumerable = table.add_class(enumerable);
    debug_assert_eq!(enumerable, ClassId::IENUMERABLE);
    let mut get_enumerator =
        MethodSymbol::new("GetEnumerator", enumerable, MethodKind::Ordinary, enumerator_of_t0);
    get_enumerator.is_abstract = true;
    table.add_method(get_enumerator);

    let mut enumerator = builtin_class("IEnumerator", "System.Collections.Generic", ClassKind::Interface);
    enumerator.is_abstract = true;
    enumerator.type_id = enumerator_of_t0;
    let enumerator = table.add_class(enumerator);
    debug_assert_eq!(enumerator, ClassId::IENUMERATOR);
    let mut move_next = MethodSymbol::new("MoveNext", enumerator, MethodKind::Ordinary, TypeId::BOOL);
    move_next.is_abstract = true;
    table.add_method(move_next);
    let current = table.add_property(PropertySymbol {
        name: "Current".into(),
        containing: enumerator,
        ty: t0,
        getter: None,
        setter: None,
        backing_field: None,
        is_static: false,
        span: Default::default(),
    });
    let mut get_current = MethodSymbol::new("get_Current", enumerator, MethodKind::PropertyGet(current), t0);
    get_current.is_abstract = true;
    let get_current = table.add_method(get_current);
    table.update_property(current, |p| p.getter = Some(get_current));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::SymbolLookup;

    #[test]
    fn test_builtin_members() {
        let table = SymbolTable::new();
        let length = table.find_property(ClassId::STRING, "Length").unwrap();
        assert_eq!(table.property(length).ty, TypeId::INT);

        let maxes = table.find_methods(ClassId::MATH, "Max");
        assert_eq!(maxes.len(), 2);
        assert!(maxes.iter().all(|&m| table.method(m).is_static));

        let from_result = table.find_methods(ClassId::TASK, "FromResult")[0];
        assert_eq!(table.method(from_result).generic_arity, 1);
    }

    #[test]
    fn test_exception_layout() {
        let table = SymbolTable::new();
        assert_eq!(table.instance_fields(ClassId::EXCEPTION).len(), 1);
        assert_eq!(table.constructors(ClassId::EXCEPTION).len(), 2);
        assert!(table.find_property(ClassId::EXCEPTION, "Message").is_some());
        assert_eq!(table.type_name(table.exception_type()), "Exception");
    }

    #[test]
    fn test_enumerator_interface() {
        let table = SymbolTable::new();
        let class = table.class(ClassId::IENUMERATOR);
        assert!(class.is_interface());
        let get_current = table.find_methods(ClassId::IENUMERATOR, "get_Current")[0];
        assert!(table.method(get_current).is_dispatched());
        assert_eq!(table.type_name(class.type_id), "IEnumerator<T0>");
    }
}
