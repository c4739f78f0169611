//! Shared parts of the iterator and async rewrites: the state machine
//! class, its constructor and the hoisting of locals, parameters and
//! `this` into fields.

use rustc_hash::{FxHashMap, FxHashSet};
use sable_binder::visit::{rewrite_expr_children, rewrite_stmt_children};
use sable_binder::{
    BoundBlock, BoundExpr, BoundExprKind, BoundStmt, BoundStmtKind, BoundTreeRewriter, BoundTreeWalker,
    LocalId, LocalKind, LocalTable,
};
use sable_symbols::{
    ClassId, ClassKind, ClassSymbol, FieldId, FieldSymbol, MethodId, MethodKind, MethodSymbol,
    ParameterSymbol, SymbolLookup, SymbolTable, SynthesizedKind, TypeId,
};

use crate::factory::SyntheticFactory;
use crate::{LoweredMethod, SynthesizedMembers};

/// `-1`: running or not started; `-2`: finished.
pub(crate) const STATE_RUNNING: i32 = -1;
pub(crate) const STATE_FINISHED: i32 = -2;

pub(crate) struct StateMachine {
    pub class: ClassId,
    pub class_type: TypeId,
    /// `<>1__state`
    pub state: FieldId,
    /// `<>4__this` for instance methods
    pub this_field: Option<FieldId>,
    pub param_fields: Vec<FieldId>,
    pub constructor: MethodId,
    /// The method whose body moves into the machine
    pub kickoff: MethodId,
    local_fields: FxHashMap<LocalId, FieldId>,
}

impl StateMachine {
    /// Declare `<Name>d__N` nested in the kickoff method's class, with the
    /// state field, fields for `this` and the parameters, and a
    /// constructor.
    pub(crate) fn create(
        table: &SymbolTable,
        kickoff: MethodId,
        interfaces: Vec<TypeId>,
        synthesized: &mut SynthesizedMembers,
    ) -> Self {
        let method = table.method(kickoff);
        let containing = method.containing;
        let name = table.unique_member_name(containing, &format!("<{}>d__", method.name));
        let mut symbol = ClassSymbol::new(name, ClassKind::StateMachine);
        symbol.containing = Some(containing);
        symbol.interfaces = interfaces;
        symbol.is_sealed = true;
        symbol.span = method.span;
        let class = table.add_class(symbol);
        let class_type = table.class(class).type_id;
        synthesized.classes.push(class);
        tracing::debug!(class = %table.class_name(class), "created state machine");

        let add_field = |name: String, ty: TypeId| {
            let mut field = FieldSymbol::new(name, class, ty);
            field.span = method.span;
            table.add_field(field)
        };
        let state = add_field("<>1__state".to_string(), TypeId::INT);
        let this_field = (!method.is_static).then(|| add_field("<>4__this".to_string(), table.class(containing).type_id));
        let param_fields = method.params.iter().map(|p| add_field(p.name.to_string(), p.ty)).collect();

        let constructor = table.add_method(
            MethodSymbol::new(".ctor", class, MethodKind::Constructor, TypeId::VOID)
                .with_synthesized(SynthesizedKind::Rewritten),
        );
        let f = SyntheticFactory::new(table, method.span);
        let base = table.constructors(ClassId::OBJECT)[0];
        synthesized.methods.push(LoweredMethod {
            method: constructor,
            locals: LocalTable::new(),
            body: BoundBlock::new(
                vec![
                    f.stmt(f.call(
                        Some(BoundExpr::new(BoundExprKind::BaseReference, TypeId::OBJECT, f.span)),
                        base,
                        Vec::new(),
                    )),
                    f.ret(None),
                ],
                f.span,
            ),
            state_machine: None,
        });

        Self {
            class,
            class_type,
            state,
            this_field,
            param_fields,
            constructor,
            kickoff,
            local_fields: FxHashMap::default(),
        }
    }

    pub(crate) fn add_field(&self, table: &SymbolTable, name: impl Into<sable_symbols::Symbol>, ty: TypeId) -> FieldId {
        table.add_field(FieldSymbol::new(name, self.class, ty))
    }

    /// An instance method of the machine, its body supplied later.
    pub(crate) fn add_method(
        &self,
        table: &SymbolTable,
        name: &str,
        kind: MethodKind,
        return_type: TypeId,
        params: Vec<ParameterSymbol>,
    ) -> MethodId {
        let mut symbol = MethodSymbol::new(name, self.class, kind, return_type)
            .with_params(params)
            .with_synthesized(SynthesizedKind::Rewritten);
        symbol.is_virtual = true;
        table.add_method(symbol)
    }

    /// `this.<>1__state` inside the machine.
    pub(crate) fn state_ref(&self, f: &SyntheticFactory<'_>) -> BoundExpr {
        f.field(Some(f.this(self.class)), self.state)
    }

    /// Replace the body's locals, parameters and `this` by machine fields.
    /// Exception variables of catch clauses stay locals.
    pub(crate) fn hoist(&mut self, table: &SymbolTable, locals: &LocalTable, body: BoundBlock) -> BoundBlock {
        let mut catch_locals = CatchLocals::default();
        catch_locals.visit_block(&body);
        let mut hoister = Hoister {
            table,
            factory: SyntheticFactory::new(table, body.span),
            machine: self,
            locals,
            keep: catch_locals.0,
        };
        hoister.rewrite_block(body)
    }

    /// `sm = new SM(); sm.<>4__this = this; sm.p = p; ...` in the kickoff
    /// method.
    pub(crate) fn kickoff_prologue(&self, table: &SymbolTable, f: &SyntheticFactory<'_>, machine: BoundExpr) -> Vec<BoundStmt> {
        let method = table.method(self.kickoff);
        let mut stmts = vec![f.assign_stmt(machine.clone(), f.new_object(self.constructor, Vec::new()))];
        if let Some(this_field) = self.this_field {
            stmts.push(f.assign_stmt(f.field(Some(machine.clone()), this_field), f.this(method.containing)));
        }
        for (index, (&field, param)) in self.param_fields.iter().zip(&method.params).enumerate() {
            stmts.push(f.assign_stmt(f.field(Some(machine.clone()), field), f.parameter(index as u16, param.ty)));
        }
        stmts
    }
}

#[derive(Default)]
struct CatchLocals(FxHashSet<LocalId>);

impl BoundTreeWalker for CatchLocals {
    fn visit_stmt(&mut self, stmt: &BoundStmt) {
        if let BoundStmtKind::Try { catches, .. } = &stmt.kind {
            self.0.extend(catches.iter().filter_map(|c| c.local));
        }
        sable_binder::visit::visit_stmt_children(self, stmt);
    }
}

struct Hoister<'a, 'm> {
    table: &'a SymbolTable,
    factory: SyntheticFactory<'a>,
    machine: &'m mut StateMachine,
    locals: &'m LocalTable,
    keep: FxHashSet<LocalId>,
}

impl Hoister<'_, '_> {
    fn local_field(&mut self, local: LocalId) -> FieldId {
        if let Some(&field) = self.machine.local_fields.get(&local) {
            return field;
        }
        let symbol = self.locals.get(local);
        let name = match symbol.kind {
            LocalKind::Temp => format!("<>s__{}", local.0),
            _ => format!("<{}>5__{}", symbol.name, local.0),
        };
        let field = self.machine.add_field(self.table, name, symbol.ty);
        self.machine.local_fields.insert(local, field);
        field
    }

    fn machine_this(&self) -> BoundExpr {
        self.factory.this(self.machine.class)
    }

    fn retain_kept(&self, locals: Vec<LocalId>) -> Vec<LocalId> {
        locals.into_iter().filter(|l| self.keep.contains(l)).collect()
    }
}

impl BoundTreeRewriter for Hoister<'_, '_> {
    fn rewrite_expr(&mut self, expr: BoundExpr) -> BoundExpr {
        let f = self.factory.at(expr.span);
        match expr.kind {
            BoundExprKind::Local(local) if !self.keep.contains(&local) => {
                let field = self.local_field(local);
                BoundExpr { ty: expr.ty, ..f.field(Some(self.machine_this()), field) }
            }
            BoundExprKind::Parameter(index) => {
                let field = self.machine.param_fields[index as usize];
                BoundExpr { ty: expr.ty, ..f.field(Some(self.machine_this()), field) }
            }
            BoundExprKind::This | BoundExprKind::BaseReference => {
                let field = self
                    .machine
                    .this_field
                    .unwrap_or_else(|| unreachable!("`this` in a static method body"));
                // `base` keeps its static type so calls through it stay non-virtual
                BoundExpr { ty: expr.ty, ..f.field(Some(self.machine_this()), field) }
            }
            BoundExprKind::Sequence { locals, side_effects, value } => {
                let locals = self.retain_kept(locals);
                let side_effects = side_effects.into_iter().map(|e| self.rewrite_expr(e)).collect();
                let value = Box::new(self.rewrite_expr(*value));
                BoundExpr {
                    kind: BoundExprKind::Sequence { locals, side_effects, value },
                    ..expr
                }
            }
            kind => rewrite_expr_children(self, BoundExpr { kind, ..expr }),
        }
    }

    fn rewrite_block(&mut self, block: BoundBlock) -> BoundBlock {
        let locals = self.retain_kept(block.locals);
        BoundBlock {
            locals,
            stmts: block.stmts.into_iter().map(|s| self.rewrite_stmt(s)).collect(),
            span: block.span,
        }
    }

    fn rewrite_stmt(&mut self, stmt: BoundStmt) -> BoundStmt {
        rewrite_stmt_children(self, stmt)
    }
}

#[cfg(test)]
mod tests {
    use sable_lexer::Span;

    use super::*;

    #[test]
    fn test_create_declares_fields_and_constructor() {
        let table = SymbolTable::new();
        let outer = table.add_class(ClassSymbol::new("Program", ClassKind::Class));
        let kickoff = table.add_method(
            MethodSymbol::new("Count", outer, MethodKind::Ordinary, TypeId::VOID)
                .with_params(vec![ParameterSymbol::new("n", TypeId::INT)]),
        );
        let mut synthesized = SynthesizedMembers::new();
        let machine = StateMachine::create(&table, kickoff, Vec::new(), &mut synthesized);
        let class = table.class(machine.class);
        assert!(class.name.starts_with("<Count>d__"));
        assert_eq!(class.containing, Some(outer));
        assert!(table.is_state_machine(machine.class));
        assert_eq!(&*table.field(machine.state).name, "<>1__state");
        assert!(machine.this_field.is_some());
        assert_eq!(&*table.field(machine.param_fields[0]).name, "n");
        assert_eq!(synthesized.classes, vec![machine.class]);
        assert_eq!(synthesized.methods[0].method, machine.constructor);
    }

    #[test]
    fn test_hoist_rewrites_locals_but_not_catch_variables() {
        let table = SymbolTable::new();
        let outer = table.add_class(ClassSymbol::new("Program", ClassKind::Class));
        let kickoff = table.add_method(
            MethodSymbol::new("Run", outer, MethodKind::Ordinary, TypeId::VOID)
                .with_params(vec![ParameterSymbol::new("n", TypeId::INT)]),
        );
        let mut synthesized = SynthesizedMembers::new();
        let mut machine = StateMachine::create(&table, kickoff, Vec::new(), &mut synthesized);

        let f = SyntheticFactory::new(&table, Span::dummy());
        let mut locals = LocalTable::new();
        let x = locals.declare("x", TypeId::INT, LocalKind::User, Span::dummy());
        let e = locals.declare("e", table.exception_type(), LocalKind::Catch, Span::dummy());
        let body = BoundBlock {
            locals: vec![x],
            stmts: vec![
                f.assign_stmt(f.local(x, TypeId::INT), f.parameter(0, TypeId::INT)),
                BoundStmt::new(
                    BoundStmtKind::Try {
                        block: BoundBlock::new(vec![f.ret(None)], Span::dummy()),
                        catches: vec![sable_binder::BoundCatch {
                            exception_type: table.exception_type(),
                            local: Some(e),
                            block: BoundBlock::new(
                                vec![f.stmt(f.convert(f.local(e, table.exception_type()), TypeId::OBJECT))],
                                Span::dummy(),
                            ),
                            span: Span::dummy(),
                        }],
                        finally: None,
                        is_async_catch: false,
                    },
                    Span::dummy(),
                ),
            ],
            span: Span::dummy(),
        };
        let hoisted = machine.hoist(&table, &locals, body);
        assert!(hoisted.locals.is_empty());
        let BoundStmtKind::Expression(assign) = &hoisted.stmts[0].kind else { panic!() };
        let BoundExprKind::Assignment { target, value } = &assign.kind else { panic!() };
        assert!(matches!(target.kind, BoundExprKind::Field { .. }));
        assert!(matches!(value.kind, BoundExprKind::Field { .. }));
        let field_names: Vec<String> = table.class(machine.class).fields.iter().map(|&f| table.field(f).name.to_string()).collect();
        assert!(field_names.contains(&"<x>5__0".to_string()));
        assert!(!field_names.iter().any(|n| n.contains("<e>")));
    }
}
