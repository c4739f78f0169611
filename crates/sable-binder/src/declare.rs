//! Declaration passes: turn the syntax trees of a compilation into class,
//! field, property and method symbols, and remember where every member's
//! body and initializer came from.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use sable_lexer::Span;
use sable_parser::{
    CompilationUnit, ConstructorDecl, ConstructorInitializerKind, EnumMemberDecl, Expr, FieldDecl,
    MemberDecl, MethodDecl, MethodDeclKind, NamespaceMember, ParamDecl,
    ParamRefKind, PropertyDecl, TypeDecl, TypeDeclKind,
};
use sable_symbols::{
    ClassId, ClassKind, ClassSymbol, ConstantValue, DiagnosticBag, ErrorCode, FieldId,
    FieldSymbol, GenericKind, MethodId, MethodKind, MethodSymbol, ParameterSymbol,
    PrimaryParameter, PropertySymbol, RefKind, Symbol, SymbolLookup, SymbolTable,
    SynthesizedKind, Ty, TypeId,
};
use tracing::debug;

use crate::binder::MethodBinder;
use crate::lookup::{resolve_type, TypeScope};

/// Syntax a bindable method body comes from.
#[derive(Debug, Clone, Copy)]
pub enum MethodSource<'a> {
    Method(&'a MethodDecl),
    Constructor(&'a ConstructorDecl),
    /// `T P => expr;`
    PropertyGetter(&'a Expr),
}

#[derive(Debug, Clone, Copy)]
pub enum InitValue<'a> {
    Expr(&'a Expr),
    /// A record parameter copied into its backing field
    PrimaryParameter(u16),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldInit<'a> {
    pub field: FieldId,
    pub value: InitValue<'a>,
    pub span: Span,
}

/// Field initializers of one class in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ClassInitializers<'a> {
    pub static_inits: Vec<FieldInit<'a>>,
    pub instance_inits: Vec<FieldInit<'a>>,
}

#[derive(Debug, Clone, Copy)]
enum ConstSource<'a> {
    Field(&'a Expr),
    EnumMember {
        value: Option<&'a Expr>,
        previous: Option<FieldId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstState {
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct DeclaredType<'a> {
    pub class: ClassId,
    pub syntax: &'a TypeDecl,
}

/// The declared program: symbols in the table plus the syntax behind them.
///
/// Shared by every binding worker; the only mutable state is the lazily
/// evaluated constant map and the declaration diagnostics.
pub struct DeclaredProgram<'a> {
    pub table: &'a SymbolTable,
    pub types: Vec<DeclaredType<'a>>,
    pub sources: FxHashMap<MethodId, MethodSource<'a>>,
    pub initializers: FxHashMap<ClassId, ClassInitializers<'a>>,
    constants: FxHashMap<FieldId, ConstSource<'a>>,
    constant_order: Vec<FieldId>,
    const_state: Mutex<FxHashMap<FieldId, ConstState>>,
    diagnostics: Mutex<DiagnosticBag>,
}

impl<'a> DeclaredProgram<'a> {
    pub fn source(&self, method: MethodId) -> Option<MethodSource<'a>> {
        self.sources.get(&method).copied()
    }

    pub fn initializers(&self, class: ClassId) -> Option<&ClassInitializers<'a>> {
        self.initializers.get(&class)
    }

    pub fn syntax(&self, class: ClassId) -> Option<&'a TypeDecl> {
        self.types.iter().find(|t| t.class == class).map(|t| t.syntax)
    }

    /// Diagnostics reported while declaring and evaluating constants.
    pub fn take_diagnostics(&self) -> DiagnosticBag {
        std::mem::take(&mut *self.diagnostics.lock())
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.lock().has_errors()
    }

    /// The value of a `const` field or enum member, evaluating it on first
    /// use. Cycles are reported once and evaluate to `None`.
    pub fn constant_value(&self, field: FieldId) -> Option<ConstantValue> {
        let symbol = self.table.field(field);
        if let Some(value) = &symbol.constant {
            return Some(value.clone());
        }
        let source = *self.constants.get(&field)?;
        {
            let mut state = self.const_state.lock();
            match state.get(&field) {
                Some(ConstState::Done) => return None,
                Some(ConstState::InProgress) => {
                    drop(state);
                    self.diagnostics.lock().add(
                        ErrorCode::CircConstValue,
                        symbol.span,
                        vec![format!("{}.{}", self.table.class_name(symbol.containing), symbol.name)],
                    );
                    return None;
                }
                None => {
                    state.insert(field, ConstState::InProgress);
                }
            }
        }

        let value = match source {
            ConstSource::Field(expr) => self.bind_constant(symbol.containing, expr, symbol.ty, &symbol.name),
            ConstSource::EnumMember { value: Some(expr), .. } => self
                .bind_constant(symbol.containing, expr, TypeId::INT, &symbol.name)
                .and_then(|v| v.as_i64())
                .map(ConstantValue::Int),
            ConstSource::EnumMember { value: None, previous } => match previous {
                Some(previous) => self
                    .constant_value(previous)
                    .and_then(|v| v.as_i64())
                    .map(|v| ConstantValue::Int(v + 1)),
                None => Some(ConstantValue::Int(0)),
            },
        };

        if let Some(value) = &value {
            self.table
                .update_field(field, |f| f.constant = Some(value.clone()));
        }
        self.const_state.lock().insert(field, ConstState::Done);
        value
    }

    fn bind_constant(&self, class: ClassId, expr: &Expr, ty: TypeId, name: &str) -> Option<ConstantValue> {
        let mut binder = MethodBinder::for_constant(self, class);
        let bound = binder.bind_expr_to(expr, ty);
        if bound.constant.is_none() && !bound.has_errors() {
            binder.error(ErrorCode::NotConstantExpression, expr.span, vec![name.to_string()]);
        }
        self.diagnostics.lock().extend(binder.into_diagnostics());
        bound.constant
    }
}

/// Declare every type and member of `units` into `table`, then evaluate
/// all constants.
pub fn declare_program<'a>(table: &'a SymbolTable, units: &'a [CompilationUnit]) -> DeclaredProgram<'a> {
    let mut declarer = Declarer {
        table,
        types: Vec::new(),
        sources: FxHashMap::default(),
        initializers: FxHashMap::default(),
        constants: FxHashMap::default(),
        constant_order: Vec::new(),
        diagnostics: DiagnosticBag::new(),
    };
    for unit in units {
        declarer.declare_namespace_members(&unit.members, None, None);
    }
    let types = declarer.types.clone();
    for declared in &types {
        declarer.resolve_bases(*declared);
    }
    for declared in &types {
        declarer.declare_members(*declared);
    }
    debug!(
        types = types.len(),
        methods = table.method_count(),
        "declared program"
    );

    let program = DeclaredProgram {
        table,
        types: declarer.types,
        sources: declarer.sources,
        initializers: declarer.initializers,
        constants: declarer.constants,
        constant_order: declarer.constant_order,
        const_state: Mutex::new(FxHashMap::default()),
        diagnostics: Mutex::new(declarer.diagnostics),
    };
    evaluate_constants(&program);
    program
}

/// Evaluate every constant in declaration order so that later binding
/// only reads stored values.
pub fn evaluate_constants(program: &DeclaredProgram<'_>) {
    for &field in &program.constant_order {
        program.constant_value(field);
    }
}

struct Declarer<'a> {
    table: &'a SymbolTable,
    types: Vec<DeclaredType<'a>>,
    sources: FxHashMap<MethodId, MethodSource<'a>>,
    initializers: FxHashMap<ClassId, ClassInitializers<'a>>,
    constants: FxHashMap<FieldId, ConstSource<'a>>,
    constant_order: Vec<FieldId>,
    diagnostics: DiagnosticBag,
}

impl<'a> Declarer<'a> {
    // ---
    // Pass 1: classes
    // ---

    fn declare_namespace_members(
        &mut self,
        members: &'a [NamespaceMember],
        namespace: Option<&str>,
        containing: Option<ClassId>,
    ) {
        for member in members {
            match member {
                NamespaceMember::Namespace(ns) => {
                    let name = match namespace {
                        Some(outer) => format!("{}.{}", outer, ns.name.to_dotted()),
                        None => ns.name.to_dotted(),
                    };
                    self.declare_namespace_members(&ns.members, Some(&name), containing);
                }
                NamespaceMember::Type(decl) => self.declare_type(decl, namespace, containing),
            }
        }
    }

    fn declare_type(&mut self, decl: &'a TypeDecl, namespace: Option<&str>, containing: Option<ClassId>) {
        let kind = match decl.kind {
            TypeDeclKind::Class => ClassKind::Class,
            TypeDeclKind::Record => ClassKind::Record,
            TypeDeclKind::Enum => ClassKind::Enum,
        };
        let name = decl.name.as_str();
        let duplicate = match containing {
            Some(outer) => self
                .table
                .class(outer)
                .nested
                .iter()
                .any(|&n| &*self.table.class(n).name == name),
            None => {
                let key = match namespace {
                    Some(ns) => format!("{}.{}", ns, name),
                    None => name.to_string(),
                };
                self.table.find_top_level(&key).is_some()
            }
        };
        if duplicate {
            let owner = match (containing, namespace) {
                (Some(outer), _) => self.table.class_name(outer),
                (None, Some(ns)) => ns.to_string(),
                (None, None) => "<global namespace>".to_string(),
            };
            self.diagnostics
                .add(ErrorCode::DuplicateMember, decl.name.span, vec![owner, name.to_string()]);
        }

        let mut class = ClassSymbol::new(name, kind);
        class.namespace = if containing.is_none() { namespace.map(Symbol::from) } else { None };
        class.containing = containing;
        class.is_abstract = decl.modifiers.is_abstract;
        class.is_static = decl.modifiers.is_static;
        class.is_sealed = decl.modifiers.is_sealed;
        class.span = decl.name.span;
        let id = self.table.add_class(class);
        self.types.push(DeclaredType { class: id, syntax: decl });

        for member in &decl.members {
            if let MemberDecl::Type(nested) = member {
                self.declare_type(nested, namespace, Some(id));
            }
        }
    }

    // ---
    // Pass 2: bases
    // ---

    fn resolve_bases(&mut self, declared: DeclaredType<'a>) {
        let scope = TypeScope::for_class(self.table, declared.class);
        for base in &declared.syntax.base_types {
            let ty = resolve_type(self.table, &scope, base, &mut self.diagnostics);
            match self.table.ty(ty) {
                Ty::Class(base_class) => {
                    let base_symbol = self.table.class(base_class);
                    if base_symbol.is_interface() {
                        self.table.update_class(declared.class, |c| c.interfaces.push(ty));
                    } else if self.table.derives_from(base_class, declared.class) {
                        self.diagnostics.add(
                            ErrorCode::CircularBase,
                            base.span,
                            vec![
                                self.table.class_name(base_class),
                                self.table.class_name(declared.class),
                            ],
                        );
                    } else {
                        self.table.update_class(declared.class, |c| c.base = Some(base_class));
                    }
                }
                Ty::Generic { kind: GenericKind::IEnumerable | GenericKind::IEnumerator, .. } => {
                    self.table.update_class(declared.class, |c| c.interfaces.push(ty));
                }
                Ty::Object | Ty::Error => {}
                _ => self.diagnostics.add(
                    ErrorCode::TypeNotFound,
                    base.span,
                    vec![self.table.type_name(ty)],
                ),
            }
        }
    }

    // ---
    // Pass 3: members
    // ---

    fn declare_members(&mut self, declared: DeclaredType<'a>) {
        let class = declared.class;
        let decl = declared.syntax;
        let scope = TypeScope::for_class(self.table, class);
        let class_type = self.table.class(class).type_id;
        let mut names = MemberNames::default();
        self.initializers.entry(class).or_default();

        if decl.kind == TypeDeclKind::Enum {
            let mut previous = None;
            for member in &decl.enum_members {
                previous = Some(self.declare_enum_member(class, class_type, member, previous, &mut names));
            }
            return;
        }

        self.declare_primary_parameters(class, decl, &scope, &mut names);

        let mut has_instance_ctor = false;
        let mut has_static_ctor = false;
        let mut has_is_operator = false;
        for member in &decl.members {
            match member {
                MemberDecl::Field(field) => self.declare_field(class, field, &scope, &mut names),
                MemberDecl::Property(property) => self.declare_property(class, property, &scope, &mut names),
                MemberDecl::Method(method) => {
                    has_is_operator |= method.kind == MethodDeclKind::IsOperator;
                    self.declare_method(class, method, &scope, &mut names);
                }
                MemberDecl::Constructor(ctor) => {
                    if ctor.modifiers.is_static {
                        has_static_ctor = true;
                    } else {
                        has_instance_ctor = true;
                    }
                    self.declare_constructor(class, decl, ctor, &scope, &mut names);
                }
                MemberDecl::Type(nested) => names.check(
                    &mut self.diagnostics,
                    self.table,
                    class,
                    nested.name.as_str(),
                    nested.name.span,
                ),
            }
        }

        let symbol = self.table.class(class);
        if !symbol.primary_params.is_empty() {
            let params = symbol
                .primary_params
                .iter()
                .map(|p| ParameterSymbol::new(p.name.clone(), p.ty))
                .collect();
            self.synthesize(class, ".ctor", MethodKind::Constructor, TypeId::VOID, params, SynthesizedKind::PrimaryConstructor, decl.name.span);
        } else if !has_instance_ctor && !decl.modifiers.is_static {
            self.synthesize(class, ".ctor", MethodKind::Constructor, TypeId::VOID, Vec::new(), SynthesizedKind::DefaultConstructor, decl.name.span);
        }
        let needs_static_ctor = self
            .initializers
            .get(&class)
            .is_some_and(|inits| !inits.static_inits.is_empty());
        if needs_static_ctor && !has_static_ctor {
            let id = self.synthesize(class, ".cctor", MethodKind::StaticConstructor, TypeId::VOID, Vec::new(), SynthesizedKind::StaticConstructor, decl.name.span);
            self.table.update_method(id, |m| m.is_static = true);
        }

        if decl.kind == TypeDeclKind::Record {
            self.declare_record_members(class, class_type, has_is_operator, decl.name.span);
        }
    }

    fn declare_enum_member(
        &mut self,
        class: ClassId,
        class_type: TypeId,
        member: &'a EnumMemberDecl,
        previous: Option<FieldId>,
        names: &mut MemberNames,
    ) -> FieldId {
        names.check(&mut self.diagnostics, self.table, class, member.name.as_str(), member.name.span);
        let mut field = FieldSymbol::new(member.name.name.clone(), class, class_type);
        field.is_static = true;
        field.is_const = true;
        field.span = member.name.span;
        let id = self.table.add_field(field);
        self.add_constant(
            id,
            ConstSource::EnumMember {
                value: member.value.as_ref(),
                previous,
            },
        );
        id
    }

    fn add_constant(&mut self, field: FieldId, source: ConstSource<'a>) {
        self.constants.insert(field, source);
        self.constant_order.push(field);
    }

    /// Record and class primary constructor parameters. Record parameters
    /// also declare a get-only property initialized from the parameter.
    fn declare_primary_parameters(&mut self, class: ClassId, decl: &'a TypeDecl, scope: &TypeScope, names: &mut MemberNames) {
        let is_record = decl.kind == TypeDeclKind::Record;
        let mut params = Vec::new();
        for (index, param) in decl.record_params.iter().enumerate() {
            let ty = resolve_type(self.table, scope, &param.ty, &mut self.diagnostics);
            let property = if is_record {
                let name = param.property_name();
                names.check(&mut self.diagnostics, self.table, class, name.as_str(), name.span);
                let (property, backing) = self.declare_auto_property(class, name.name.clone(), ty, false, false, name.span);
                self.push_init(class, false, FieldInit {
                    field: backing,
                    value: InitValue::PrimaryParameter(index as u16),
                    span: param.span,
                });
                Some(property)
            } else {
                None
            };
            params.push(PrimaryParameter {
                name: param.name.name.clone(),
                ty,
                property,
            });
        }
        if !params.is_empty() {
            self.table.update_class(class, |c| c.primary_params = params);
        }
    }

    fn push_init(&mut self, class: ClassId, is_static: bool, init: FieldInit<'a>) {
        let inits = self.initializers.entry(class).or_default();
        if is_static {
            inits.static_inits.push(init);
        } else {
            inits.instance_inits.push(init);
        }
    }

    fn declare_field(&mut self, class: ClassId, decl: &'a FieldDecl, scope: &TypeScope, names: &mut MemberNames) {
        let ty = resolve_type(self.table, scope, &decl.ty, &mut self.diagnostics);
        let is_const = decl.modifiers.is_const;
        let is_static = decl.modifiers.is_static || is_const;
        for declarator in &decl.declarators {
            names.check(&mut self.diagnostics, self.table, class, declarator.name.as_str(), declarator.name.span);
            let mut field = FieldSymbol::new(declarator.name.name.clone(), class, ty);
            field.is_static = is_static;
            field.is_const = is_const;
            field.is_readonly = decl.modifiers.is_readonly;
            field.span = declarator.name.span;
            let id = self.table.add_field(field);
            match (&declarator.init, is_const) {
                (Some(init), true) => self.add_constant(id, ConstSource::Field(init)),
                (None, true) => self
                    .diagnostics
                    .add(ErrorCode::ConstantExpected, declarator.span, Vec::new()),
                (Some(init), false) => self.push_init(class, is_static, FieldInit {
                    field: id,
                    value: InitValue::Expr(init),
                    span: declarator.span,
                }),
                (None, false) => {}
            }
        }
    }

    /// Declare an auto property with its backing field and accessors.
    fn declare_auto_property(
        &mut self,
        class: ClassId,
        name: Symbol,
        ty: TypeId,
        has_setter: bool,
        is_static: bool,
        span: Span,
    ) -> (sable_symbols::PropertyId, FieldId) {
        let mut backing = FieldSymbol::new(format!("<{}>k__BackingField", name), class, ty);
        backing.is_static = is_static;
        backing.is_readonly = !has_setter;
        backing.span = span;
        let backing = self.table.add_field(backing);
        let property = self.table.add_property(PropertySymbol {
            name: name.clone(),
            containing: class,
            ty,
            getter: None,
            setter: None,
            backing_field: Some(backing),
            is_static,
            span,
        });
        let getter = self.synthesize(class, &format!("get_{}", name), MethodKind::PropertyGet(property), ty, Vec::new(), SynthesizedKind::AutoPropertyGet, span);
        let setter = has_setter.then(|| {
            self.synthesize(
                class,
                &format!("set_{}", name),
                MethodKind::PropertySet(property),
                TypeId::VOID,
                vec![ParameterSymbol::new("value", ty)],
                SynthesizedKind::AutoPropertySet,
                span,
            )
        });
        for accessor in std::iter::once(getter).chain(setter) {
            self.table.update_method(accessor, |m| m.is_static = is_static);
        }
        self.table.update_property(property, |p| {
            p.getter = Some(getter);
            p.setter = setter;
        });
        (property, backing)
    }

    fn declare_property(&mut self, class: ClassId, decl: &'a PropertyDecl, scope: &TypeScope, names: &mut MemberNames) {
        names.check(&mut self.diagnostics, self.table, class, decl.name.as_str(), decl.name.span);
        let ty = resolve_type(self.table, scope, &decl.ty, &mut self.diagnostics);
        let is_static = decl.modifiers.is_static;

        if let Some(body) = &decl.expr_body {
            let property = self.table.add_property(PropertySymbol {
                name: decl.name.name.clone(),
                containing: class,
                ty,
                getter: None,
                setter: None,
                backing_field: None,
                is_static,
                span: decl.name.span,
            });
            let mut getter = MethodSymbol::new(format!("get_{}", decl.name.name), class, MethodKind::PropertyGet(property), ty);
            getter.is_static = is_static;
            getter.is_virtual = decl.modifiers.is_virtual;
            getter.is_override = decl.modifiers.is_override;
            getter.span = decl.name.span;
            let getter = self.table.add_method(getter);
            self.sources.insert(getter, MethodSource::PropertyGetter(body));
            self.table.update_property(property, |p| p.getter = Some(getter));
            return;
        }

        let (property, backing) = self.declare_auto_property(class, decl.name.name.clone(), ty, decl.has_setter, is_static, decl.name.span);
        if decl.modifiers.is_virtual || decl.modifiers.is_override {
            let accessors = {
                let p = self.table.property(property);
                [p.getter, p.setter]
            };
            for accessor in accessors.into_iter().flatten() {
                self.table.update_method(accessor, |m| {
                    m.is_virtual = decl.modifiers.is_virtual;
                    m.is_override = decl.modifiers.is_override;
                });
            }
        }
        if let Some(init) = &decl.init {
            self.push_init(class, is_static, FieldInit {
                field: backing,
                value: InitValue::Expr(init),
                span: init.span,
            });
        }
    }

    fn declare_params(&mut self, params: &'a [ParamDecl], scope: &TypeScope) -> Vec<ParameterSymbol> {
        params
            .iter()
            .map(|p| {
                let ty = resolve_type(self.table, scope, &p.ty, &mut self.diagnostics);
                ParameterSymbol {
                    name: p.name.name.clone(),
                    ty,
                    ref_kind: match p.ref_kind {
                        ParamRefKind::None => RefKind::None,
                        ParamRefKind::Out => RefKind::Out,
                        ParamRefKind::Ref => RefKind::Ref,
                    },
                }
            })
            .collect()
    }

    fn declare_method(&mut self, class: ClassId, decl: &'a MethodDecl, scope: &TypeScope, names: &mut MemberNames) {
        let return_type = resolve_type(self.table, scope, &decl.return_type, &mut self.diagnostics);
        let params = self.declare_params(&decl.params, scope);
        let modifiers = decl.modifiers;
        let kind = match decl.kind {
            MethodDeclKind::Ordinary => MethodKind::Ordinary,
            MethodDeclKind::IsOperator => MethodKind::IsOperator,
        };
        let mut method = MethodSymbol::new(decl.name.name.clone(), class, kind, return_type).with_params(params);
        method.is_static = modifiers.is_static || kind == MethodKind::IsOperator;
        method.is_virtual = modifiers.is_virtual;
        method.is_override = modifiers.is_override;
        method.is_abstract = modifiers.is_abstract;
        method.is_async = modifiers.is_async;
        method.span = decl.name.span;

        if method.is_async && !self.is_async_return_type(return_type) {
            self.diagnostics.add(ErrorCode::BadAsyncReturn, decl.return_type.span, Vec::new());
        }
        names.check_method(&mut self.diagnostics, self.table, class, &method);
        let id = self.table.add_method(method);
        if decl.body.is_some() {
            self.sources.insert(id, MethodSource::Method(decl));
        }
    }

    fn is_async_return_type(&self, ty: TypeId) -> bool {
        ty == TypeId::VOID
            || ty == TypeId::TASK
            || self.table.types.generic_args(ty, GenericKind::Task).is_some_and(|a| a.len() == 1)
            || ty.is_error()
    }

    fn declare_constructor(
        &mut self,
        class: ClassId,
        type_decl: &'a TypeDecl,
        decl: &'a ConstructorDecl,
        scope: &TypeScope,
        names: &mut MemberNames,
    ) {
        let params = self.declare_params(&decl.params, scope);
        let is_static = decl.modifiers.is_static;
        let (name, kind) = if is_static {
            (".cctor", MethodKind::StaticConstructor)
        } else {
            (".ctor", MethodKind::Constructor)
        };
        let mut method = MethodSymbol::new(name, class, kind, TypeId::VOID).with_params(params);
        method.is_static = is_static;
        method.span = decl.name.span;

        let chains_to_this = decl
            .initializer
            .as_ref()
            .is_some_and(|i| i.kind == ConstructorInitializerKind::This);
        if !is_static && !type_decl.record_params.is_empty() && !chains_to_this {
            self.diagnostics
                .add(ErrorCode::ThisInitializerRequired, decl.name.span, Vec::new());
        }
        names.check_method(&mut self.diagnostics, self.table, class, &method);
        let id = self.table.add_method(method);
        self.sources.insert(id, MethodSource::Constructor(decl));
    }

    #[allow(clippy::too_many_arguments)]
    fn synthesize(
        &mut self,
        class: ClassId,
        name: &str,
        kind: MethodKind,
        return_type: TypeId,
        params: Vec<ParameterSymbol>,
        synthesized: SynthesizedKind,
        span: Span,
    ) -> MethodId {
        let mut method = MethodSymbol::new(name, class, kind, return_type)
            .with_params(params)
            .with_synthesized(synthesized);
        method.span = span;
        self.table.add_method(method)
    }

    /// `Equals(object)`, `GetHashCode()` and, unless the record declares its
    /// own, `operator is` returning each record property.
    fn declare_record_members(&mut self, class: ClassId, class_type: TypeId, has_is_operator: bool, span: Span) {
        let equals = self.synthesize(
            class,
            "Equals",
            MethodKind::Ordinary,
            TypeId::BOOL,
            vec![ParameterSymbol::new("obj", TypeId::OBJECT)],
            SynthesizedKind::RecordEquals,
            span,
        );
        let hash = self.synthesize(class, "GetHashCode", MethodKind::Ordinary, TypeId::INT, Vec::new(), SynthesizedKind::RecordGetHashCode, span);
        for id in [equals, hash] {
            self.table.update_method(id, |m| m.is_override = true);
        }

        if has_is_operator {
            return;
        }
        let symbol = self.table.class(class);
        let mut params = vec![ParameterSymbol::new("o", class_type)];
        params.extend(
            symbol
                .primary_params
                .iter()
                .map(|p| ParameterSymbol::out(p.name.clone(), p.ty)),
        );
        let id = self.synthesize(class, "op_Is", MethodKind::IsOperator, TypeId::BOOL, params, SynthesizedKind::RecordIsOperator, span);
        self.table.update_method(id, |m| m.is_static = true);
    }
}

/// Member names seen so far in one class, for duplicate detection.
#[derive(Default)]
struct MemberNames {
    values: FxHashSet<Symbol>,
    methods: Vec<MethodSymbol>,
}

impl MemberNames {
    fn check(&mut self, diagnostics: &mut DiagnosticBag, table: &SymbolTable, class: ClassId, name: &str, span: Span) {
        let clash = !self.values.insert(Symbol::from(name))
            || self.methods.iter().any(|m| &*m.name == name);
        if clash {
            diagnostics.add(
                ErrorCode::DuplicateMember,
                span,
                vec![table.class_name(class), name.to_string()],
            );
        }
    }

    fn check_method(&mut self, diagnostics: &mut DiagnosticBag, table: &SymbolTable, class: ClassId, method: &MethodSymbol) {
        let clash = self.values.contains(&method.name)
            || self.methods.iter().any(|m| m.same_signature(method));
        if clash {
            diagnostics.add(
                ErrorCode::DuplicateMember,
                method.span,
                vec![table.class_name(class), method.name.to_string()],
            );
        }
        self.methods.push(method.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_parser::parse_compilation_unit;

    fn declare(source: &str) -> (SymbolTable, Vec<CompilationUnit>) {
        let (unit, errors) = parse_compilation_unit(source, 0);
        assert!(errors.is_empty(), "{:?}", errors);
        (SymbolTable::new(), vec![unit])
    }

    #[test]
    fn test_record_members_are_synthesized() {
        let (table, units) = declare("public abstract class Expr { } public record class Add(Expr left : Left, Expr right) : Expr;");
        let program = declare_program(&table, &units);
        assert!(!program.has_errors());
        let add = table.find_top_level("Add").unwrap();
        let symbol = table.class(add);
        assert_eq!(table.class_name(symbol.base.unwrap()), "Expr");
        assert_eq!(symbol.primary_params.len(), 2);
        assert!(table.find_property(add, "Left").is_some());
        assert!(table.find_property(add, "right").is_some());

        let is_op = table.find_methods(add, "op_Is");
        assert_eq!(is_op.len(), 1);
        let is_op = table.method(is_op[0]);
        assert_eq!(is_op.kind, MethodKind::IsOperator);
        assert_eq!(is_op.params.len(), 3);
        assert_eq!(&*is_op.params[1].name, "left");
        assert_eq!(is_op.params[2].ref_kind, RefKind::Out);

        let ctor = table.constructors(add)[0];
        assert_eq!(table.method(ctor).synthesized, Some(SynthesizedKind::PrimaryConstructor));
        assert_eq!(program.initializers(add).unwrap().instance_inits.len(), 2);
    }

    #[test]
    fn test_user_is_operator_suppresses_synthesized_one() {
        let (table, units) = declare(
            "record class Polar(double r, double t) { public static bool operator is(Polar p, out double x) { x = 1.0; return true; } }",
        );
        let _program = declare_program(&table, &units);
        let polar = table.find_top_level("Polar").unwrap();
        let ops = table.find_methods(polar, "op_Is");
        assert_eq!(ops.len(), 1);
        assert_eq!(table.method(ops[0]).synthesized, None);
    }

    #[test]
    fn test_enum_constants() {
        let (table, units) = declare("class P { enum Days { Sun, Mon = 5, Tue } const int Two = 1 + 1; }");
        let _program = declare_program(&table, &units);
        let p = table.find_top_level("P").unwrap();
        let days = table.class(p).nested[0];
        let tue = table.find_field(days, "Tue").unwrap();
        assert_eq!(table.field(tue).constant, Some(ConstantValue::Int(6)));
        let sun = table.find_field(days, "Sun").unwrap();
        assert_eq!(table.field(sun).constant, Some(ConstantValue::Int(0)));
        let two = table.find_field(p, "Two").unwrap();
        assert_eq!(table.field(two).constant, Some(ConstantValue::Int(2)));
    }

    #[test]
    fn test_circular_constants_are_reported() {
        let (table, units) = declare("class P { const int A = B; const int B = A; }");
        let program = declare_program(&table, &units);
        let diagnostics = program.take_diagnostics();
        assert!(diagnostics.contains(ErrorCode::CircConstValue));
    }

    #[test]
    fn test_default_and_static_constructors() {
        let (table, units) = declare("class P { static int x = 1; int y = 2; }");
        let program = declare_program(&table, &units);
        let p = table.find_top_level("P").unwrap();
        assert_eq!(table.constructors(p).len(), 1);
        let cctor = table.static_constructor(p).unwrap();
        assert!(table.method(cctor).is_static);
        let inits = program.initializers(p).unwrap();
        assert_eq!(inits.static_inits.len(), 1);
        assert_eq!(inits.instance_inits.len(), 1);
    }

    #[test]
    fn test_duplicate_members() {
        let (table, units) = declare("class P { int x; int x; void M() { } void M() { } void M(int a) { } }");
        let program = declare_program(&table, &units);
        let diagnostics = program.take_diagnostics();
        assert_eq!(diagnostics.iter().filter(|d| d.code == ErrorCode::DuplicateMember).count(), 2);
    }

    #[test]
    fn test_primary_class_constructor_requires_this() {
        let (table, units) = declare("class C(int x) { public int X { get; } = x; public C() { } }");
        let program = declare_program(&table, &units);
        assert!(program.take_diagnostics().contains(ErrorCode::ThisInitializerRequired));
    }
}
