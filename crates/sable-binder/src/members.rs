//! Name lookup, member access and overload resolution.

use sable_lexer::Span;
use sable_parser::{Argument, Expr, ExprKind, Identifier, LambdaExpr, ParamRefKind};
use sable_symbols::{
    ClassId, ConversionKind, ErrorCode, MethodId, MethodKind, MethodSymbol, RefKind,
    Symbol, SymbolLookup, Ty, TypeId,
};

use crate::binder::{method_display_name, BindingMode, MethodBinder};
use crate::bound::*;
use crate::constants::constant_fits;
use crate::lookup::{delegate_signature, is_namespace, lookup_class, nested_in_hierarchy, predefined_type};

/// Methods found by name, not yet narrowed to one overload.
#[derive(Debug, Clone)]
pub(crate) struct MethodGroup {
    pub name: Symbol,
    pub methods: Vec<MethodId>,
    /// The instance the group was accessed through; `this` for simple names
    pub receiver: Option<Box<BoundExpr>>,
    /// Written by the user, as opposed to an implicit `this`
    pub explicit_receiver: bool,
    /// Accessed through `base`: calls are not virtual
    pub is_base: bool,
    pub span: Span,
}

/// What a name or member access denotes.
#[derive(Debug, Clone)]
pub(crate) enum NameBinding {
    Value(BoundExpr),
    Type(TypeId),
    Namespace(String),
    MethodGroup(MethodGroup),
}

/// An argument before overload resolution picks its target type.
enum PendingArg<'e> {
    Bound(BoundExpr),
    Lambda(&'e LambdaExpr),
    Group(MethodGroup),
}

/// The chosen overload with its arguments in parameter order.
pub(crate) struct ResolvedCall {
    pub method: MethodId,
    pub args: Vec<BoundExpr>,
    pub ref_kinds: Vec<RefKind>,
    pub return_type: TypeId,
}

fn ref_kind_of(kind: ParamRefKind) -> RefKind {
    match kind {
        ParamRefKind::None => RefKind::None,
        ParamRefKind::Out => RefKind::Out,
        ParamRefKind::Ref => RefKind::Ref,
    }
}

impl MethodBinder<'_, '_> {
    // ---
    // Names
    // ---

    /// Bind an expression that may denote a type, namespace or method group.
    pub(crate) fn bind_name_or_type(&mut self, expr: &Expr) -> NameBinding {
        match &expr.kind {
            ExprKind::Name(ident) => self.bind_simple_name(ident),
            ExprKind::PredefinedType(p) => NameBinding::Type(predefined_type(*p)),
            ExprKind::Member { receiver, name } => {
                let left = self.bind_name_or_type(receiver);
                self.bind_member_access(left, name, expr.span)
            }
            _ => NameBinding::Value(self.bind_expr(expr)),
        }
    }

    /// Resolve `expr` as a type if it is spelled like one and names one.
    pub(crate) fn try_bind_as_type(&mut self, expr: &Expr) -> Option<TypeId> {
        let looks_like_type = matches!(
            expr.kind,
            ExprKind::Name(_) | ExprKind::PredefinedType(_) | ExprKind::Member { .. }
        );
        if !looks_like_type {
            return None;
        }
        match self.silently(|b| b.bind_name_or_type(expr)) {
            NameBinding::Type(ty) => Some(ty),
            _ => None,
        }
    }

    fn bind_simple_name(&mut self, ident: &Identifier) -> NameBinding {
        let table = self.table;
        let name = ident.as_str();
        let span = ident.span;

        if let Some(local) = self.lookup_local(name) {
            let symbol = self.locals.get(local);
            let expr = match &symbol.constant {
                Some(value) => BoundExpr::literal(value.clone(), symbol.ty, span),
                None => BoundExpr::local(local, symbol.ty, span),
            };
            return NameBinding::Value(expr);
        }
        if self.mode != BindingMode::Constant {
            if let Some(index) = self.params.iter().position(|p| &*p.name == name) {
                let ty = self.params[index].ty;
                return NameBinding::Value(BoundExpr::new(BoundExprKind::Parameter(index as u16), ty, span));
            }
        }

        let mut current = Some(self.class);
        while let Some(class) = current {
            if let Some(binding) = self.bind_member_of_class(class, ident) {
                return binding;
            }
            current = table.class(class).containing;
        }

        if let Some(class) = lookup_class(table, &self.scope, name) {
            return NameBinding::Type(table.class(class).type_id);
        }
        if is_namespace(table, name) {
            return NameBinding::Namespace(name.to_string());
        }
        self.error(ErrorCode::NameNotInContext, span, vec![name.to_string()]);
        NameBinding::Value(BoundExpr::bad(TypeId::ERROR, span, Vec::new()))
    }

    /// A member of `class` (or its bases) reached by simple name from code
    /// inside `class` or a class nested in it.
    fn bind_member_of_class(&mut self, class: ClassId, ident: &Identifier) -> Option<NameBinding> {
        let table = self.table;
        let name = ident.as_str();
        let span = ident.span;
        let reachable_this = self.has_this() && table.derives_from(self.class, class);

        if let Some(field) = table.find_field(class, name) {
            let symbol = table.field(field);
            if symbol.is_const {
                return Some(NameBinding::Value(self.constant_field(field, span)));
            }
            let receiver = if symbol.is_static {
                None
            } else if reachable_this {
                Some(Box::new(self.this_expr(span)))
            } else {
                return Some(self.object_required(format!("{}.{}", table.class_name(symbol.containing), name), span));
            };
            return Some(NameBinding::Value(BoundExpr::new(
                BoundExprKind::Field { receiver, field },
                symbol.ty,
                span,
            )));
        }
        if let Some(property) = table.find_property(class, name) {
            let symbol = table.property(property);
            let receiver = if symbol.is_static {
                None
            } else if reachable_this {
                Some(Box::new(self.this_expr(span)))
            } else {
                return Some(self.object_required(format!("{}.{}", table.class_name(symbol.containing), name), span));
            };
            return Some(NameBinding::Value(BoundExpr::new(
                BoundExprKind::Property { receiver, property },
                symbol.ty,
                span,
            )));
        }
        let methods: Vec<MethodId> = table
            .find_methods(class, name)
            .into_iter()
            .filter(|&m| !matches!(table.method(m).kind, MethodKind::IsOperator))
            .collect();
        if !methods.is_empty() {
            return Some(NameBinding::MethodGroup(MethodGroup {
                name: Symbol::from(name),
                methods,
                receiver: reachable_this.then(|| Box::new(self.this_expr(span))),
                explicit_receiver: false,
                is_base: false,
                span,
            }));
        }
        None
    }

    fn object_required(&mut self, member: String, span: Span) -> NameBinding {
        self.error(ErrorCode::ObjectRequired, span, vec![member]);
        NameBinding::Value(BoundExpr::bad(TypeId::ERROR, span, Vec::new()))
    }

    /// A `const` field or enum member as a literal of the field's type.
    fn constant_field(&mut self, field: sable_symbols::FieldId, span: Span) -> BoundExpr {
        let ty = self.table.field(field).ty;
        match self.program.constant_value(field) {
            Some(value) => BoundExpr::literal(value, ty, span),
            None => BoundExpr::bad(ty, span, Vec::new()),
        }
    }

    // ---
    // Member access
    // ---

    pub(crate) fn bind_member_access(&mut self, left: NameBinding, name: &Identifier, span: Span) -> NameBinding {
        let table = self.table;
        match left {
            NameBinding::Namespace(ns) => {
                let dotted = format!("{}.{}", ns, name.as_str());
                if let Some(class) = table.find_top_level(&dotted) {
                    return NameBinding::Type(table.class(class).type_id);
                }
                if is_namespace(table, &dotted) {
                    return NameBinding::Namespace(dotted);
                }
                self.error(ErrorCode::TypeNotFound, span, vec![dotted]);
                NameBinding::Value(BoundExpr::bad(TypeId::ERROR, span, Vec::new()))
            }
            NameBinding::Type(ty) => self.bind_static_member(ty, name, span),
            NameBinding::Value(receiver) => self.bind_instance_member(receiver, name, span),
            NameBinding::MethodGroup(group) => {
                self.error(ErrorCode::NoSuchMember, span, vec![group.name.to_string(), name.name.to_string()]);
                NameBinding::Value(BoundExpr::bad(TypeId::ERROR, span, Vec::new()))
            }
        }
    }

    fn bind_static_member(&mut self, ty: TypeId, name: &Identifier, span: Span) -> NameBinding {
        let table = self.table;
        if ty.is_error() {
            return NameBinding::Value(BoundExpr::bad(TypeId::ERROR, span, Vec::new()));
        }
        let Some(class) = table.class_of_type(ty) else {
            self.error(ErrorCode::NoSuchMember, span, vec![self.type_name(ty), name.name.to_string()]);
            return NameBinding::Value(BoundExpr::bad(TypeId::ERROR, span, Vec::new()));
        };
        if let Some(nested) = nested_in_hierarchy(table, class, name.as_str()) {
            return NameBinding::Type(table.class(nested).type_id);
        }
        if let Some(field) = table.find_field(class, name.as_str()) {
            let symbol = table.field(field);
            if symbol.is_const {
                return NameBinding::Value(self.constant_field(field, span));
            }
            if !symbol.is_static {
                return self.object_required(format!("{}.{}", table.class_name(symbol.containing), name.as_str()), span);
            }
            return NameBinding::Value(BoundExpr::new(
                BoundExprKind::Field { receiver: None, field },
                symbol.ty,
                span,
            ));
        }
        if let Some(property) = table.find_property(class, name.as_str()) {
            let symbol = table.property(property);
            if !symbol.is_static {
                return self.object_required(format!("{}.{}", table.class_name(symbol.containing), name.as_str()), span);
            }
            return NameBinding::Value(BoundExpr::new(
                BoundExprKind::Property { receiver: None, property },
                symbol.ty,
                span,
            ));
        }
        let methods = table.find_methods(class, name.as_str());
        if !methods.is_empty() {
            return NameBinding::MethodGroup(MethodGroup {
                name: name.name.clone(),
                methods,
                receiver: None,
                explicit_receiver: false,
                is_base: false,
                span,
            });
        }
        self.error(ErrorCode::NoSuchMember, span, vec![self.type_name(ty), name.name.to_string()]);
        NameBinding::Value(BoundExpr::bad(TypeId::ERROR, span, Vec::new()))
    }

    /// A member read through a value: `p.X`, `s.Length`, `n.HasValue`.
    pub(crate) fn bind_instance_member(&mut self, receiver: BoundExpr, name: &Identifier, span: Span) -> NameBinding {
        let table = self.table;
        if receiver.has_errors() {
            return NameBinding::Value(BoundExpr::bad(TypeId::ERROR, span, vec![receiver]));
        }
        if let Some(underlying) = table.types.nullable_underlying(receiver.ty) {
            match name.as_str() {
                "HasValue" => {
                    return NameBinding::Value(BoundExpr::new(
                        BoundExprKind::NullableHasValue(Box::new(receiver)),
                        TypeId::BOOL,
                        span,
                    ))
                }
                "Value" => {
                    return NameBinding::Value(BoundExpr::new(
                        BoundExprKind::NullableValueOrDefault(Box::new(receiver)),
                        underlying,
                        span,
                    ))
                }
                _ => {}
            }
        }
        let is_base = matches!(receiver.kind, BoundExprKind::BaseReference);
        let Some(class) = table.class_of_type(receiver.ty) else {
            self.error(ErrorCode::NoSuchMember, span, vec![self.type_name(receiver.ty), name.name.to_string()]);
            return NameBinding::Value(BoundExpr::bad(TypeId::ERROR, span, vec![receiver]));
        };

        if let Some(field) = table.find_field(class, name.as_str()) {
            let symbol = table.field(field);
            if symbol.is_static {
                self.error(ErrorCode::ObjectProhibited, span, vec![format!("{}.{}", table.class_name(symbol.containing), name.as_str())]);
                return NameBinding::Value(BoundExpr::bad(symbol.ty, span, vec![receiver]));
            }
            let ty = self.member_type(symbol.ty, receiver.ty);
            return NameBinding::Value(BoundExpr::new(
                BoundExprKind::Field { receiver: Some(Box::new(receiver)), field },
                ty,
                span,
            ));
        }
        if let Some(property) = table.find_property(class, name.as_str()) {
            let symbol = table.property(property);
            if symbol.is_static {
                self.error(ErrorCode::ObjectProhibited, span, vec![format!("{}.{}", table.class_name(symbol.containing), name.as_str())]);
                return NameBinding::Value(BoundExpr::bad(symbol.ty, span, vec![receiver]));
            }
            let ty = self.member_type(symbol.ty, receiver.ty);
            let receiver = self.box_receiver(receiver, symbol.containing);
            return NameBinding::Value(BoundExpr::new(
                BoundExprKind::Property { receiver: Some(Box::new(receiver)), property },
                ty,
                span,
            ));
        }
        let methods = table.find_methods(class, name.as_str());
        if !methods.is_empty() {
            return NameBinding::MethodGroup(MethodGroup {
                name: name.name.clone(),
                methods,
                receiver: Some(Box::new(receiver)),
                explicit_receiver: true,
                is_base,
                span,
            });
        }
        self.error(ErrorCode::NoSuchMember, span, vec![self.type_name(receiver.ty), name.name.to_string()]);
        NameBinding::Value(BoundExpr::bad(TypeId::ERROR, span, vec![receiver]))
    }

    /// Substitute the type arguments of a generic receiver (`Task<int>`)
    /// into a member type written in terms of `T0`.
    pub(crate) fn member_type(&self, ty: TypeId, receiver: TypeId) -> TypeId {
        let types = &self.table.types;
        if !types.contains_type_param(ty) {
            return ty;
        }
        match self.table.ty(receiver) {
            Ty::Generic { args, .. } if !args.is_empty() => types.substitute(ty, &args),
            _ => TypeId::OBJECT,
        }
    }

    /// Value-type receivers of `object` members are boxed.
    fn box_receiver(&self, receiver: BoundExpr, containing: ClassId) -> BoundExpr {
        if containing == ClassId::OBJECT && self.table.is_value_type(receiver.ty) {
            let span = receiver.span;
            return BoundExpr::new(
                BoundExprKind::Conversion {
                    operand: Box::new(receiver),
                    kind: ConversionKind::Boxing,
                },
                TypeId::OBJECT,
                span,
            );
        }
        receiver
    }

    // ---
    // Invocation
    // ---

    pub(crate) fn bind_invocation(&mut self, callee: &Expr, args: &[Argument], span: Span) -> BoundExpr {
        if let ExprKind::ConditionalMember { receiver, name } = &callee.kind {
            return self.bind_conditional_access(receiver, span, |binder, placeholder| {
                match binder.bind_instance_member(placeholder, name, callee.span) {
                    NameBinding::MethodGroup(group) => binder.bind_group_call(group, args, span),
                    other => binder.invoke_value(other, args, span),
                }
            });
        }
        match self.bind_name_or_type(callee) {
            NameBinding::MethodGroup(group) => self.bind_group_call(group, args, span),
            other => self.invoke_value(other, args, span),
        }
    }

    /// Invoke something that is not a method group: a delegate value.
    fn invoke_value(&mut self, callee: NameBinding, args: &[Argument], span: Span) -> BoundExpr {
        let value = match callee {
            NameBinding::Value(value) => value,
            _ => {
                self.error(ErrorCode::MethodNameExpected, span, Vec::new());
                return self.bad_call(args, span);
            }
        };
        if value.has_errors() {
            let mut bad = self.bad_call(args, span);
            if let BoundExprKind::Bad(children) = &mut bad.kind {
                children.insert(0, value);
            }
            return bad;
        }
        let Some((params, return_type)) = delegate_signature(self.table, value.ty) else {
            self.error(ErrorCode::MethodNameExpected, span, Vec::new());
            return self.bad_call(args, span);
        };
        if params.len() != args.len() {
            self.error(ErrorCode::NoOverload, span, vec!["Invoke".to_string(), args.len().to_string()]);
            return self.bad_call(args, span);
        }
        let bound: Vec<BoundExpr> = args
            .iter()
            .zip(&params)
            .map(|(arg, &param)| self.bind_expr_to(&arg.value, param))
            .collect();
        BoundExpr::new(
            BoundExprKind::DelegateInvoke {
                delegate: Box::new(value),
                args: bound,
            },
            return_type,
            span,
        )
    }

    /// Bind arguments for diagnostics only and produce a bad expression.
    fn bad_call(&mut self, args: &[Argument], span: Span) -> BoundExpr {
        let children = args.iter().map(|a| self.bind_expr(&a.value)).collect();
        BoundExpr::bad(TypeId::ERROR, span, children)
    }

    pub(crate) fn bind_group_call(&mut self, group: MethodGroup, args: &[Argument], span: Span) -> BoundExpr {
        let table = self.table;
        let receiver_ty = group.receiver.as_ref().map(|r| r.ty);
        let Some(resolved) = self.resolve_overload(&group.name, &group.methods, args, receiver_ty, span) else {
            return BoundExpr::bad(TypeId::ERROR, span, group.receiver.map(|r| vec![*r]).unwrap_or_default());
        };
        let symbol = table.method(resolved.method);
        let receiver = if symbol.is_static {
            if group.explicit_receiver {
                self.error(ErrorCode::ObjectProhibited, group.span, vec![method_display_name(table, resolved.method)]);
                return BoundExpr::bad(resolved.return_type, span, resolved.args);
            }
            None
        } else {
            match group.receiver {
                Some(receiver) => Some(Box::new(self.box_receiver(*receiver, symbol.containing))),
                None => {
                    self.error(ErrorCode::ObjectRequired, group.span, vec![method_display_name(table, resolved.method)]);
                    return BoundExpr::bad(resolved.return_type, span, resolved.args);
                }
            }
        };
        let is_virtual = symbol.is_dispatched() && !group.is_base;
        BoundExpr::new(
            BoundExprKind::Call {
                receiver,
                method: resolved.method,
                args: resolved.args,
                ref_kinds: resolved.ref_kinds,
                is_virtual,
            },
            resolved.return_type,
            span,
        )
    }

    /// `base(...)`/`this(...)` constructor initializer calls.
    pub(crate) fn bind_constructor_call(
        &mut self,
        name: &str,
        ctors: &[MethodId],
        args: &[Argument],
        receiver: Option<BoundExpr>,
        span: Span,
    ) -> BoundExpr {
        let Some(resolved) = self.resolve_overload(name, ctors, args, None, span) else {
            return BoundExpr::bad(TypeId::VOID, span, Vec::new());
        };
        BoundExpr::new(
            BoundExprKind::Call {
                receiver: receiver.map(Box::new),
                method: resolved.method,
                args: resolved.args,
                ref_kinds: resolved.ref_kinds,
                is_virtual: false,
            },
            TypeId::VOID,
            span,
        )
    }

    pub(crate) fn bind_object_creation(&mut self, ty: TypeId, args: &[Argument], span: Span) -> BoundExpr {
        let table = self.table;
        if ty.is_error() {
            return self.bad_call(args, span);
        }
        if table.is_value_type(ty) {
            if !args.is_empty() {
                self.error(ErrorCode::NoOverload, span, vec![self.type_name(ty), args.len().to_string()]);
                return self.bad_call(args, span);
            }
            return BoundExpr::new(BoundExprKind::DefaultValue, ty, span);
        }
        let class = match table.ty(ty) {
            Ty::Class(class) => class,
            Ty::Object => ClassId::OBJECT,
            _ => {
                self.error(ErrorCode::AbstractInstantiation, span, vec![self.type_name(ty)]);
                return self.bad_call(args, span);
            }
        };
        let symbol = table.class(class);
        if symbol.is_abstract || symbol.is_static || symbol.is_interface() {
            self.error(ErrorCode::AbstractInstantiation, span, vec![self.type_name(ty)]);
            return self.bad_call(args, span);
        }
        let ctors = table.constructors(class);
        let Some(resolved) = self.resolve_overload(&symbol.name, &ctors, args, None, span) else {
            return BoundExpr::bad(ty, span, Vec::new());
        };
        BoundExpr::new(
            BoundExprKind::ObjectCreation {
                constructor: resolved.method,
                args: resolved.args,
                ref_kinds: resolved.ref_kinds,
            },
            ty,
            span,
        )
    }

    // ---
    // Overload resolution
    // ---

    fn pend_args<'e>(&mut self, args: &'e [Argument]) -> Vec<PendingArg<'e>> {
        args.iter()
            .map(|arg| match &arg.value.kind {
                ExprKind::Lambda(lambda) => PendingArg::Lambda(lambda),
                ExprKind::Name(_) | ExprKind::Member { .. } => match self.bind_name_or_type(&arg.value) {
                    NameBinding::MethodGroup(group) => PendingArg::Group(group),
                    NameBinding::Value(value) => PendingArg::Bound(value),
                    NameBinding::Type(_) | NameBinding::Namespace(_) => {
                        let name = match &arg.value.kind {
                            ExprKind::Name(ident) => ident.name.to_string(),
                            _ => "name".to_string(),
                        };
                        self.error(ErrorCode::BadSKknown, arg.value.span, vec![name, "type".to_string(), "variable".to_string()]);
                        PendingArg::Bound(BoundExpr::bad(TypeId::ERROR, arg.value.span, Vec::new()))
                    }
                },
                _ => PendingArg::Bound(self.bind_expr(&arg.value)),
            })
            .collect()
    }

    /// Map argument positions to parameter indices for `method`.
    fn map_arguments(method: &MethodSymbol, args: &[Argument]) -> Result<Vec<usize>, Option<Symbol>> {
        let mut mapping = Vec::with_capacity(args.len());
        let mut used = vec![false; method.params.len()];
        for (position, arg) in args.iter().enumerate() {
            let index = match &arg.name {
                Some(name) => method.param_index(name.as_str()).ok_or_else(|| Some(name.name.clone()))?,
                None => position,
            };
            if index >= used.len() || used[index] {
                return Err(None);
            }
            used[index] = true;
            mapping.push(index);
        }
        if used.iter().all(|&u| u) {
            Ok(mapping)
        } else {
            Err(None)
        }
    }

    /// Score an applicable candidate by its identity matches; `None` when
    /// an argument does not fit.
    fn applicability(
        &self,
        method: &MethodSymbol,
        mapping: &[usize],
        args: &[Argument],
        pending: &[PendingArg<'_>],
        receiver_ty: Option<TypeId>,
    ) -> Option<(usize, Vec<TypeId>)> {
        let inferred = self.infer_type_arguments(method, mapping, pending);
        let mut score = 0;
        let mut param_types = Vec::with_capacity(mapping.len());
        for ((arg, pending), &index) in args.iter().zip(pending).zip(mapping) {
            let param = &method.params[index];
            let param_ty = self.parameter_type(param.ty, &inferred, receiver_ty);
            if ref_kind_of(arg.ref_kind) != param.ref_kind {
                return None;
            }
            let fits = match pending {
                PendingArg::Bound(expr) if param.ref_kind.is_by_ref() => expr.ty == param_ty || expr.has_errors(),
                PendingArg::Bound(expr) => {
                    if expr.ty == param_ty {
                        score += 1;
                    }
                    self.argument_converts(expr, param_ty)
                }
                PendingArg::Lambda(lambda) => {
                    delegate_signature(self.table, param_ty).is_some_and(|(params, _)| params.len() == lambda.params.len())
                }
                PendingArg::Group(group) => delegate_signature(self.table, param_ty).is_some_and(|(params, _)| {
                    group
                        .methods
                        .iter()
                        .any(|&m| self.table.method(m).params.len() == params.len())
                }),
            };
            if !fits {
                return None;
            }
            param_types.push(param_ty);
        }
        Some((score, param_types))
    }

    fn argument_converts(&self, expr: &BoundExpr, target: TypeId) -> bool {
        if expr.has_errors() || self.table.has_implicit_conversion(expr.ty, target) {
            return true;
        }
        match (&expr.constant, self.table.types.primitive(expr.ty), self.table.types.primitive(target)) {
            (Some(value), Some(from), Some(to)) => constant_fits(value, from, to),
            _ => false,
        }
    }

    /// Infer `T0` of a generic method from the first argument bound to a
    /// parameter of type `T0`.
    fn infer_type_arguments(&self, method: &MethodSymbol, mapping: &[usize], pending: &[PendingArg<'_>]) -> Vec<TypeId> {
        if method.generic_arity == 0 {
            return Vec::new();
        }
        let t0 = self.table.types.type_param(0);
        mapping
            .iter()
            .zip(pending)
            .find_map(|(&index, arg)| match arg {
                PendingArg::Bound(expr) if method.params[index].ty == t0 && expr.ty != TypeId::NULL => Some(vec![expr.ty]),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn parameter_type(&self, ty: TypeId, inferred: &[TypeId], receiver_ty: Option<TypeId>) -> TypeId {
        let types = &self.table.types;
        if !types.contains_type_param(ty) {
            return ty;
        }
        if !inferred.is_empty() {
            return types.substitute(ty, inferred);
        }
        match receiver_ty {
            Some(receiver) => self.member_type(ty, receiver),
            None => ty,
        }
    }

    pub(crate) fn resolve_overload(
        &mut self,
        name: &str,
        methods: &[MethodId],
        args: &[Argument],
        receiver_ty: Option<TypeId>,
        span: Span,
    ) -> Option<ResolvedCall> {
        let table = self.table;
        if let Some(first_named) = args.iter().position(|a| a.name.is_some()) {
            if let Some(positional) = args[first_named..].iter().find(|a| a.name.is_none()) {
                self.error(ErrorCode::NamedArgumentSpecificationBeforeFixedArgument, positional.span, Vec::new());
                self.bad_call(args, span);
                return None;
            }
        }
        let pending = self.pend_args(args);

        let mut best: Option<(MethodId, usize, Vec<usize>, Vec<TypeId>)> = None;
        for &method in methods {
            let symbol = table.method(method);
            let Ok(mapping) = Self::map_arguments(&symbol, args) else {
                continue;
            };
            if let Some((score, param_types)) = self.applicability(&symbol, &mapping, args, &pending, receiver_ty) {
                if best.as_ref().map_or(true, |(_, s, _, _)| score > *s) {
                    best = Some((method, score, mapping, param_types));
                }
            }
        }

        let Some((method, _, mapping, param_types)) = best else {
            self.report_no_applicable(name, methods, args, &pending, receiver_ty, span);
            return None;
        };

        let symbol = table.method(method);
        let inferred = self.infer_type_arguments(&symbol, &mapping, &pending);
        if symbol.generic_arity > 0 && inferred.is_empty() {
            self.error(ErrorCode::CantInferMethTypeArgs, span, vec![method_display_name(table, method)]);
            return None;
        }
        let return_type = self.parameter_type(symbol.return_type, &inferred, receiver_ty);

        let mut ordered: Vec<Option<BoundExpr>> = vec![None; symbol.params.len()];
        for ((arg, pending), (&index, &param_ty)) in args.iter().zip(pending).zip(mapping.iter().zip(&param_types)) {
            let bound = match pending {
                PendingArg::Bound(expr) if symbol.params[index].ref_kind.is_by_ref() => {
                    self.check_ref_argument(&expr, arg.span);
                    expr
                }
                PendingArg::Bound(expr) => self.convert(expr, param_ty, arg.span),
                PendingArg::Lambda(lambda) => self.bind_lambda(lambda, param_ty, arg.value.span),
                PendingArg::Group(group) => self.convert_method_group(group, param_ty, arg.value.span),
            };
            ordered[index] = Some(bound);
        }
        let args: Vec<BoundExpr> = ordered.into_iter().flatten().collect();
        let ref_kinds = symbol.params.iter().map(|p| p.ref_kind).collect();
        Some(ResolvedCall {
            method,
            args,
            ref_kinds,
            return_type,
        })
    }

    fn check_ref_argument(&mut self, expr: &BoundExpr, span: Span) {
        let assignable = matches!(
            expr.kind,
            BoundExprKind::Local(_) | BoundExprKind::Parameter(_) | BoundExprKind::Field { .. }
        );
        if !assignable && !expr.has_errors() {
            self.error(ErrorCode::AssgLvalueExpected, span, Vec::new());
        } else if let BoundExprKind::Local(local) = expr.kind {
            if self.locals.get(local).kind == LocalKind::Foreach {
                let name = self.locals.get(local).name.to_string();
                self.error(ErrorCode::AssignReadonly, span, vec![name]);
            }
        }
    }

    fn report_no_applicable(
        &mut self,
        name: &str,
        methods: &[MethodId],
        args: &[Argument],
        pending: &[PendingArg<'_>],
        receiver_ty: Option<TypeId>,
        span: Span,
    ) {
        let table = self.table;
        let same_arity: Vec<MethodId> = methods
            .iter()
            .copied()
            .filter(|&m| table.method(m).params.len() == args.len())
            .collect();
        let Some(&first) = same_arity.first() else {
            self.error(ErrorCode::NoOverload, span, vec![name.to_string(), args.len().to_string()]);
            return;
        };
        let symbol = table.method(first);
        let mapping = match Self::map_arguments(&symbol, args) {
            Ok(mapping) => mapping,
            Err(Some(missing)) => {
                self.error(ErrorCode::NamedArgumentNotFound, span, vec![name.to_string(), missing.to_string()]);
                return;
            }
            Err(None) => {
                self.error(ErrorCode::NoOverload, span, vec![name.to_string(), args.len().to_string()]);
                return;
            }
        };
        let inferred = self.infer_type_arguments(&symbol, &mapping, pending);
        for (position, ((arg, pending), &index)) in args.iter().zip(pending).zip(&mapping).enumerate() {
            let param = &symbol.params[index];
            let param_ty = self.parameter_type(param.ty, &inferred, receiver_ty);
            let arg_kind = ref_kind_of(arg.ref_kind);
            if arg_kind != param.ref_kind {
                let keyword = match param.ref_kind {
                    RefKind::Out => "out",
                    RefKind::Ref => "ref",
                    RefKind::None => "value",
                };
                self.error(ErrorCode::BadArgRef, arg.span, vec![(position + 1).to_string(), keyword.to_string()]);
                return;
            }
            let from = match pending {
                PendingArg::Bound(expr) if self.argument_converts(expr, param_ty) && !param.ref_kind.is_by_ref() => continue,
                PendingArg::Bound(expr) if param.ref_kind.is_by_ref() && expr.ty == param_ty => continue,
                PendingArg::Bound(expr) => self.type_name(expr.ty),
                PendingArg::Lambda(_) => "lambda expression".to_string(),
                PendingArg::Group(_) => "method group".to_string(),
            };
            self.error(
                ErrorCode::BadArgType,
                arg.span,
                vec![(position + 1).to_string(), from, self.type_name(param_ty)],
            );
            return;
        }
        self.error(ErrorCode::NoOverload, span, vec![name.to_string(), args.len().to_string()]);
    }

    /// A method group converted to a delegate type.
    pub(crate) fn convert_method_group(&mut self, group: MethodGroup, target: TypeId, span: Span) -> BoundExpr {
        let table = self.table;
        let found = delegate_signature(table, target).and_then(|(params, ret)| {
            group.methods.iter().copied().find(|&m| {
                let symbol = table.method(m);
                symbol.return_type == ret
                    && symbol.params.len() == params.len()
                    && symbol.params.iter().zip(&params).all(|(p, &t)| p.ty == t && !p.ref_kind.is_by_ref())
            })
        });
        let Some(method) = found else {
            self.error(
                ErrorCode::NoImplicitConv,
                span,
                vec!["method group".to_string(), self.type_name(target)],
            );
            return BoundExpr::bad(target, span, Vec::new());
        };
        let receiver = if table.method(method).is_static {
            None
        } else {
            match group.receiver {
                Some(receiver) => Some(receiver),
                None => {
                    self.error(ErrorCode::ObjectRequired, span, vec![method_display_name(table, method)]);
                    return BoundExpr::bad(target, span, Vec::new());
                }
            }
        };
        BoundExpr::new(BoundExprKind::DelegateCreation { method, receiver }, target, span)
    }
}

#[cfg(test)]
mod tests {
    use crate::binder::tests::{bind_all, codes};
    use sable_symbols::ErrorCode;

    #[test]
    fn test_overloads_prefer_exact_matches() {
        let (_, diagnostics) = bind_all(
            "class P { static void F(long x) { } static void F(int x) { } static void F(object o) { } static void Main() { F(1); F(1L); F(\"s\"); } }",
        );
        assert!(diagnostics.is_empty(), "{:?}", codes(&diagnostics));
    }

    #[test]
    fn test_named_arguments() {
        let (_, diagnostics) = bind_all(
            "class P { static int F(int a, string b) { return a; } static void Main() { F(b: \"x\", a: 1); F(1, b: \"y\"); } }",
        );
        assert!(diagnostics.is_empty(), "{:?}", codes(&diagnostics));

        let (_, diagnostics) = bind_all("class P { static void F(int a, int b) { } static void Main() { F(a: 1, 2); } }");
        assert!(diagnostics.contains(ErrorCode::NamedArgumentSpecificationBeforeFixedArgument));

        let (_, diagnostics) = bind_all("class P { static void F(int a) { } static void Main() { F(c: 1); } }");
        assert!(diagnostics.contains(ErrorCode::NamedArgumentNotFound));
    }

    #[test]
    fn test_argument_errors() {
        let (_, diagnostics) = bind_all("class P { static void F(int a) { } static void Main() { F(1, 2); } }");
        assert!(diagnostics.contains(ErrorCode::NoOverload));

        let (_, diagnostics) = bind_all("class P { static void F(int a) { } static void Main() { F(\"s\"); } }");
        let bad = diagnostics.iter().find(|d| d.code == ErrorCode::BadArgType).unwrap();
        assert_eq!(bad.args, vec!["1".to_string(), "string".to_string(), "int".to_string()]);

        let (_, diagnostics) = bind_all("class P { static void F(out int a) { a = 1; } static void Main() { int x = 0; F(x); } }");
        assert!(diagnostics.contains(ErrorCode::BadArgRef));
    }

    #[test]
    fn test_static_and_instance_access() {
        let (_, diagnostics) = bind_all("class P { int f; static void Main() { f = 1; } }");
        assert!(diagnostics.contains(ErrorCode::ObjectRequired));

        let (_, diagnostics) = bind_all("class P { static int s; void M() { P p = this; p.s = 1; } }");
        assert!(diagnostics.contains(ErrorCode::ObjectProhibited));

        let (_, diagnostics) = bind_all("class P { static void Main() { int x = Missing; } }");
        assert!(diagnostics.contains(ErrorCode::NameNotInContext));
    }

    #[test]
    fn test_members_of_builtins_and_generics() {
        let (_, diagnostics) = bind_all(
            "class P { static void Main() { string s = \"abc\"; int n = s.Length; int? m = n; bool b = m.HasValue; int k = m.Value; System.Console.WriteLine(n.ToString()); System.Threading.Tasks.Task<int> t = Task.FromResult(1); int r = t.Result; } }",
        );
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{:?}", codes(&diagnostics));
    }

    #[test]
    fn test_abstract_instantiation() {
        let (_, diagnostics) = bind_all("abstract class A { } class P { static void Main() { A a = new A(); } }");
        assert!(diagnostics.contains(ErrorCode::AbstractInstantiation));
    }
}
