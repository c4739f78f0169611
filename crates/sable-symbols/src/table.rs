use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::context::TypeContext;
use crate::symbols::{
    ClassId, ClassKind, ClassSymbol, FieldId, FieldSymbol, MethodId, MethodSymbol, PropertyId,
    PropertySymbol,
};
use crate::types::{GenericKind, Symbol, Ty, TypeId};

/// Read access to declared symbols.
///
/// Implemented by the live [`SymbolTable`] used while compiling and by the
/// frozen [`SymbolSnapshot`] a compiled module carries at run time.
pub trait SymbolLookup {
    fn class(&self, id: ClassId) -> Arc<ClassSymbol>;
    fn method(&self, id: MethodId) -> Arc<MethodSymbol>;
    fn field(&self, id: FieldId) -> Arc<FieldSymbol>;
    fn property(&self, id: PropertyId) -> Arc<PropertySymbol>;
    fn ty(&self, id: TypeId) -> Ty;

    /// The class whose members a value of type `id` exposes.
    fn class_of_type(&self, id: TypeId) -> Option<ClassId> {
        match self.ty(id) {
            Ty::Object => Some(ClassId::OBJECT),
            Ty::String => Some(ClassId::STRING),
            Ty::Class(class) => Some(class),
            Ty::Generic { kind, .. } => match kind {
                GenericKind::Task => Some(ClassId::TASK),
                GenericKind::IEnumerable => Some(ClassId::IENUMERABLE),
                GenericKind::IEnumerator => Some(ClassId::IENUMERATOR),
                GenericKind::Func | GenericKind::Action => None,
            },
            Ty::Primitive(_) | Ty::Nullable(_) => Some(ClassId::OBJECT),
            _ => None,
        }
    }

    fn is_enum_type(&self, id: TypeId) -> bool {
        match self.ty(id) {
            Ty::Class(class) => self.class(class).is_enum(),
            _ => false,
        }
    }

    fn is_value_type(&self, id: TypeId) -> bool {
        match self.ty(id) {
            Ty::Primitive(_) | Ty::Nullable(_) => true,
            Ty::Class(class) => self.class(class).is_enum(),
            _ => false,
        }
    }

    /// Types whose values may be `null`.
    fn is_reference_type(&self, id: TypeId) -> bool {
        match self.ty(id) {
            Ty::Object | Ty::String | Ty::Generic { .. } => true,
            Ty::Class(class) => !self.class(class).is_enum(),
            _ => false,
        }
    }

    /// `derived` is `base` or inherits from it.
    fn derives_from(&self, derived: ClassId, base: ClassId) -> bool {
        let mut current = Some(derived);
        while let Some(id) = current {
            if id == base {
                return true;
            }
            current = self.class(id).base;
        }
        false
    }

    /// Qualified source-level name, as shown in diagnostics.
    fn class_name(&self, id: ClassId) -> String {
        let class = self.class(id);
        let mut name = class.name.to_string();
        let mut outer = class.containing;
        while let Some(parent) = outer {
            let parent = self.class(parent);
            name = format!("{}.{}", parent.name, name);
            outer = parent.containing;
        }
        name
    }

    /// Name reported by the default `ToString`.
    fn runtime_class_name(&self, id: ClassId) -> String {
        let class = self.class(id);
        let mut name = class.name.to_string();
        let mut outer = class.containing;
        let mut namespace = class.namespace.clone();
        while let Some(parent) = outer {
            let parent = self.class(parent);
            name = format!("{}+{}", parent.name, name);
            namespace = parent.namespace.clone();
            outer = parent.containing;
        }
        match namespace {
            Some(ns) => format!("{}.{}", ns, name),
            None => name,
        }
    }

    /// Display a type the way diagnostics spell it.
    fn type_name(&self, id: TypeId) -> String {
        match self.ty(id) {
            Ty::Void => "void".to_string(),
            Ty::Object => "object".to_string(),
            Ty::String => "string".to_string(),
            Ty::Null => "<null>".to_string(),
            Ty::Error => "?".to_string(),
            Ty::Primitive(p) => p.keyword().to_string(),
            Ty::Class(class) => self.class_name(class),
            Ty::Nullable(inner) => format!("{}?", self.type_name(inner)),
            Ty::Generic { kind, args } if args.is_empty() => kind.name().to_string(),
            Ty::Generic { kind, args } => {
                let args: Vec<_> = args.iter().map(|&a| self.type_name(a)).collect();
                format!("{}<{}>", kind.name(), args.join(", "))
            }
            Ty::TypeParam(i) => format!("T{}", i),
        }
    }

    /// Find the implementation of `method` for an instance of `runtime`.
    fn resolve_virtual(&self, runtime: ClassId, method: MethodId) -> MethodId {
        let declared = self.method(method);
        if !declared.is_dispatched() {
            return method;
        }
        let by_name_only = self.class(declared.containing).is_interface();
        let mut current = Some(runtime);
        while let Some(id) = current {
            let class = self.class(id);
            for &candidate in &class.methods {
                let symbol = self.method(candidate);
                if symbol.is_abstract || symbol.is_static {
                    continue;
                }
                let matches = if by_name_only {
                    symbol.name == declared.name && symbol.params.len() == declared.params.len()
                } else {
                    symbol.same_signature(&declared)
                };
                if matches {
                    return candidate;
                }
            }
            current = class.base;
        }
        method
    }

    /// A field visible on `class` or its bases.
    fn find_field(&self, class: ClassId, name: &str) -> Option<FieldId> {
        let mut current = Some(class);
        while let Some(id) = current {
            let symbol = self.class(id);
            if let Some(&f) = symbol.fields.iter().find(|&&f| &*self.field(f).name == name) {
                return Some(f);
            }
            current = symbol.base;
        }
        None
    }

    /// A property visible on `class` or its bases.
    fn find_property(&self, class: ClassId, name: &str) -> Option<PropertyId> {
        let mut current = Some(class);
        while let Some(id) = current {
            let symbol = self.class(id);
            if let Some(&p) = symbol
                .properties
                .iter()
                .find(|&&p| &*self.property(p).name == name)
            {
                return Some(p);
            }
            current = symbol.base;
        }
        None
    }

    /// Methods called `name` on `class` and its bases, most derived first.
    /// Overridden base methods are hidden by their overrides.
    fn find_methods(&self, class: ClassId, name: &str) -> Vec<MethodId> {
        let mut found: Vec<MethodId> = Vec::new();
        let mut current = Some(class);
        while let Some(id) = current {
            let symbol = self.class(id);
            for &m in &symbol.methods {
                let method = self.method(m);
                if &*method.name != name || method.is_constructor() {
                    continue;
                }
                let hidden = found
                    .iter()
                    .any(|&f| self.method(f).same_signature(&method));
                if !hidden {
                    found.push(m);
                }
            }
            current = symbol.base;
        }
        found
    }

    /// Instance constructors declared directly on `class`.
    fn constructors(&self, class: ClassId) -> Vec<MethodId> {
        self.class(class)
            .methods
            .iter()
            .copied()
            .filter(|&m| matches!(self.method(m).kind, crate::MethodKind::Constructor))
            .collect()
    }

    fn static_constructor(&self, class: ClassId) -> Option<MethodId> {
        self.class(class)
            .methods
            .iter()
            .copied()
            .find(|&m| matches!(self.method(m).kind, crate::MethodKind::StaticConstructor))
    }

    /// Every instance field of `class`, base fields first.
    fn instance_fields(&self, class: ClassId) -> Vec<FieldId> {
        let mut chain = Vec::new();
        let mut current = Some(class);
        while let Some(id) = current {
            chain.push(id);
            current = self.class(id).base;
        }
        chain
            .into_iter()
            .rev()
            .flat_map(|id| {
                self.class(id)
                    .fields
                    .iter()
                    .copied()
                    .filter(|&f| {
                        let field = self.field(f);
                        !field.is_static && !field.is_const
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// All declared symbols of one compilation.
///
/// Symbols are reference counted so that workers can read them without
/// holding a lock; synthesized members (record support, helpers, state
/// machines) are added concurrently through `&self`.
pub struct SymbolTable {
    pub types: TypeContext,
    classes: RwLock<Vec<Arc<ClassSymbol>>>,
    methods: RwLock<Vec<Arc<MethodSymbol>>>,
    fields: RwLock<Vec<Arc<FieldSymbol>>>,
    properties: RwLock<Vec<Arc<PropertySymbol>>>,
    /// Top-level classes by namespace-qualified name
    top_level: RwLock<FxHashMap<String, ClassId>>,
}

impl SymbolTable {
    /// An empty table with the built-in library declared.
    pub fn new() -> Self {
        let table = Self::empty();
        crate::builtins::declare_builtins(&table);
        table
    }

    fn empty() -> Self {
        Self {
            types: TypeContext::new(),
            classes: RwLock::new(Vec::new()),
            methods: RwLock::new(Vec::new()),
            fields: RwLock::new(Vec::new()),
            properties: RwLock::new(Vec::new()),
            top_level: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn add_class(&self, mut class: ClassSymbol) -> ClassId {
        let mut classes = self.classes.write();
        let id = ClassId(classes.len() as u32);
        if class.type_id == TypeId::ERROR {
            class.type_id = match id {
                ClassId::OBJECT => TypeId::OBJECT,
                ClassId::STRING => TypeId::STRING,
                ClassId::TASK => TypeId::TASK,
                _ => self.types.class(id),
            };
        }
        let containing = class.containing;
        if containing.is_none() {
            let key = match &class.namespace {
                Some(ns) => format!("{}.{}", ns, class.name),
                None => class.name.to_string(),
            };
            self.top_level.write().entry(key).or_insert(id);
        }
        classes.push(Arc::new(class));
        if let Some(outer) = containing {
            Arc::make_mut(&mut classes[outer.index()]).nested.push(id);
        }
        id
    }

    pub fn add_method(&self, method: MethodSymbol) -> MethodId {
        let containing = method.containing;
        let id = {
            let mut methods = self.methods.write();
            let id = MethodId(methods.len() as u32);
            methods.push(Arc::new(method));
            id
        };
        self.update_class(containing, |c| c.methods.push(id));
        id
    }

    pub fn add_field(&self, field: FieldSymbol) -> FieldId {
        let containing = field.containing;
        let id = {
            let mut fields = self.fields.write();
            let id = FieldId(fields.len() as u32);
            fields.push(Arc::new(field));
            id
        };
        self.update_class(containing, |c| c.fields.push(id));
        id
    }

    pub fn add_property(&self, property: PropertySymbol) -> PropertyId {
        let containing = property.containing;
        let id = {
            let mut properties = self.properties.write();
            let id = PropertyId(properties.len() as u32);
            properties.push(Arc::new(property));
            id
        };
        self.update_class(containing, |c| c.properties.push(id));
        id
    }

    pub fn update_class(&self, id: ClassId, f: impl FnOnce(&mut ClassSymbol)) {
        let mut classes = self.classes.write();
        f(Arc::make_mut(&mut classes[id.index()]));
    }

    pub fn update_method(&self, id: MethodId, f: impl FnOnce(&mut MethodSymbol)) {
        let mut methods = self.methods.write();
        f(Arc::make_mut(&mut methods[id.index()]));
    }

    pub fn update_field(&self, id: FieldId, f: impl FnOnce(&mut FieldSymbol)) {
        let mut fields = self.fields.write();
        f(Arc::make_mut(&mut fields[id.index()]));
    }

    pub fn update_property(&self, id: PropertyId, f: impl FnOnce(&mut PropertySymbol)) {
        let mut properties = self.properties.write();
        f(Arc::make_mut(&mut properties[id.index()]));
    }

    pub fn class_count(&self) -> usize {
        self.classes.read().len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.read().len()
    }

    pub fn field_count(&self) -> usize {
        self.fields.read().len()
    }

    /// Look up a top-level class by its namespace-qualified name.
    pub fn find_top_level(&self, qualified: &str) -> Option<ClassId> {
        self.top_level.read().get(qualified).copied()
    }

    /// User-declared classes (everything after the built-in library).
    pub fn user_classes(&self) -> Vec<ClassId> {
        (ClassId::BUILTIN_COUNT..self.class_count() as u32)
            .map(ClassId)
            .collect()
    }

    pub fn exception_type(&self) -> TypeId {
        self.class(ClassId::EXCEPTION).type_id
    }

    /// Freeze the table for execution.
    pub fn snapshot(&self) -> SymbolSnapshot {
        SymbolSnapshot {
            types: self.types.snapshot(),
            classes: self.classes.read().clone(),
            methods: self.methods.read().clone(),
            fields: self.fields.read().clone(),
            properties: self.properties.read().clone(),
        }
    }

    /// A fresh name unique among the members of `class`.
    pub fn unique_member_name(&self, class: ClassId, prefix: &str) -> Symbol {
        let symbol = self.class(class);
        let taken = symbol.methods.len() + symbol.fields.len() + symbol.nested.len();
        format!("{}{}", prefix, taken).into()
    }

    pub fn is_state_machine(&self, class: ClassId) -> bool {
        self.class(class).kind == ClassKind::StateMachine
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolLookup for SymbolTable {
    fn class(&self, id: ClassId) -> Arc<ClassSymbol> {
        self.classes.read()[id.index()].clone()
    }

    fn method(&self, id: MethodId) -> Arc<MethodSymbol> {
        self.methods.read()[id.index()].clone()
    }

    fn field(&self, id: FieldId) -> Arc<FieldSymbol> {
        self.fields.read()[id.index()].clone()
    }

    fn property(&self, id: PropertyId) -> Arc<PropertySymbol> {
        self.properties.read()[id.index()].clone()
    }

    fn ty(&self, id: TypeId) -> Ty {
        self.types.get(id)
    }
}

/// An immutable copy of a symbol table.
#[derive(Debug, Clone)]
pub struct SymbolSnapshot {
    pub types: Vec<Ty>,
    pub classes: Vec<Arc<ClassSymbol>>,
    pub methods: Vec<Arc<MethodSymbol>>,
    pub fields: Vec<Arc<FieldSymbol>>,
    pub properties: Vec<Arc<PropertySymbol>>,
}

impl SymbolLookup for SymbolSnapshot {
    fn class(&self, id: ClassId) -> Arc<ClassSymbol> {
        self.classes[id.index()].clone()
    }

    fn method(&self, id: MethodId) -> Arc<MethodSymbol> {
        self.methods[id.index()].clone()
    }

    fn field(&self, id: FieldId) -> Arc<FieldSymbol> {
        self.fields[id.index()].clone()
    }

    fn property(&self, id: PropertyId) -> Arc<PropertySymbol> {
        self.properties[id.index()].clone()
    }

    fn ty(&self, id: TypeId) -> Ty {
        self.types[id.0 as usize].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{MethodKind, ParameterSymbol};

    fn user_class(table: &SymbolTable, name: &str, base: ClassId) -> ClassId {
        let mut class = ClassSymbol::new(name, ClassKind::Class);
        class.base = Some(base);
        table.add_class(class)
    }

    #[test]
    fn test_builtins_are_declared() {
        let table = SymbolTable::new();
        assert_eq!(table.class_count() as u32, ClassId::BUILTIN_COUNT);
        assert_eq!(table.class(ClassId::OBJECT).type_id, TypeId::OBJECT);
        assert_eq!(table.find_top_level("System.Console"), Some(ClassId::CONSOLE));
        assert!(!table.find_methods(ClassId::CONSOLE, "WriteLine").is_empty());
    }

    #[test]
    fn test_override_hides_base_method() {
        let table = SymbolTable::new();
        let derived = user_class(&table, "Point", ClassId::OBJECT);
        let mut to_string = MethodSymbol::new("ToString", derived, MethodKind::Ordinary, TypeId::STRING);
        to_string.is_override = true;
        let own = table.add_method(to_string);

        let found = table.find_methods(derived, "ToString");
        assert_eq!(found, vec![own]);

        let base = table.find_methods(ClassId::OBJECT, "ToString")[0];
        assert_eq!(table.resolve_virtual(derived, base), own);
        assert_eq!(table.resolve_virtual(ClassId::OBJECT, base), base);
    }

    #[test]
    fn test_instance_fields_base_first() {
        let table = SymbolTable::new();
        let base = user_class(&table, "Shape", ClassId::OBJECT);
        let derived = user_class(&table, "Circle", base);
        let a = table.add_field(FieldSymbol::new("a", base, TypeId::INT));
        let b = table.add_field(FieldSymbol::new("b", derived, TypeId::DOUBLE));
        let mut s = FieldSymbol::new("count", derived, TypeId::INT);
        s.is_static = true;
        table.add_field(s);
        assert_eq!(table.instance_fields(derived), vec![a, b]);
        assert!(table.derives_from(derived, base));
        assert!(!table.derives_from(base, derived));
    }

    #[test]
    fn test_nested_class_names() {
        let table = SymbolTable::new();
        let mut outer = ClassSymbol::new("Program", ClassKind::Class);
        outer.namespace = Some("App".into());
        let outer = table.add_class(outer);
        let mut inner = ClassSymbol::new("Days", ClassKind::Enum);
        inner.containing = Some(outer);
        let inner = table.add_class(inner);

        assert_eq!(table.class(outer).nested, vec![inner]);
        assert_eq!(table.class_name(inner), "Program.Days");
        assert_eq!(table.runtime_class_name(inner), "App.Program+Days");
        assert_eq!(table.type_name(table.class(inner).type_id), "Program.Days");
        assert!(table.is_enum_type(table.class(inner).type_id));
    }

    #[test]
    fn test_snapshot_matches_table() {
        let table = SymbolTable::new();
        let class = user_class(&table, "C", ClassId::OBJECT);
        let m = table.add_method(
            MethodSymbol::new("F", class, MethodKind::Ordinary, TypeId::VOID)
                .with_params(vec![ParameterSymbol::new("x", TypeId::INT)]),
        );
        let snapshot = table.snapshot();
        assert_eq!(snapshot.method(m).params.len(), 1);
        assert_eq!(snapshot.class_name(class), "C");
    }
}
