//! Lowering for Sable: rewrites bound method bodies into the reduced
//! statement forms the code generator understands.
//!
//! The passes run in a fixed order, driven by the method compiler:
//! [`rewrite_locals`], [`rewrite_await_in_handlers`], [`rewrite_lambdas`],
//! [`rewrite_iterator`] and [`rewrite_async`]. Each may add synthesized
//! members to the type being compiled through [`SynthesizedMembers`].

mod async_rewriter;
mod await_in_handler;
mod factory;
mod iterators;
mod lambdas;
mod local_rewriter;
mod match_statement;
mod numeric_helpers;
mod patterns;
mod spill;
mod state_machine;
mod synthesis;

use rustc_hash::FxHashMap;
use sable_binder::{BoundBlock, LocalTable};
use sable_symbols::{ClassId, MethodId, NumericHelperKind};

pub use async_rewriter::rewrite_async;
pub use await_in_handler::rewrite_await_in_handlers;
pub use factory::SyntheticFactory;
pub use iterators::rewrite_iterator;
pub use lambdas::rewrite_lambdas;
pub use local_rewriter::rewrite_locals;
pub use synthesis::synthesize_body;

/// A method body in lowered form, ready for code generation.
#[derive(Debug, Clone)]
pub struct LoweredMethod {
    pub method: MethodId,
    pub locals: LocalTable,
    pub body: BoundBlock,
    /// Set on a kickoff method whose body moved into a state machine
    pub state_machine: Option<StateMachineInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMachineKind {
    Iterator,
    Async,
}

#[derive(Debug, Clone, Copy)]
pub struct StateMachineInfo {
    pub kind: StateMachineKind,
    pub class: ClassId,
    pub move_next: MethodId,
}

/// Members synthesized while lowering the methods of one type.
#[derive(Debug, Default)]
pub struct SynthesizedMembers {
    helpers: FxHashMap<NumericHelperKind, MethodId>,
    /// Bodies of synthesized methods, still to be lowered further and emitted
    pub methods: Vec<LoweredMethod>,
    /// Display classes and state machines
    pub classes: Vec<ClassId>,
}

impl SynthesizedMembers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Numeric helpers created so far, by kind.
    pub fn helper(&self, kind: NumericHelperKind) -> Option<MethodId> {
        self.helpers.get(&kind).copied()
    }

    /// Move the collected method bodies out, keeping the helper cache.
    pub fn take_methods(&mut self) -> Vec<LoweredMethod> {
        std::mem::take(&mut self.methods)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use sable_binder::{
        analyze_flow, bind_method, bind_type_initializers, declare_program, BoundMethod,
    };
    use sable_parser::parse_compilation_unit;
    use sable_symbols::{SymbolLookup, SymbolTable};

    /// Declare and bind every method of `source`; panics on any error.
    pub(crate) fn bind_source(source: &str) -> (SymbolTable, Vec<BoundMethod>) {
        let table = SymbolTable::new();
        let (unit, errors) = parse_compilation_unit(source, 0);
        assert!(errors.is_empty(), "{:?}", errors);
        let units = vec![unit];
        let mut methods = Vec::new();
        {
            let program = declare_program(&table, &units);
            let mut diagnostics = program.take_diagnostics();
            for declared in &program.types {
                let inits = bind_type_initializers(&program, declared.class);
                for &m in &table.class(declared.class).methods {
                    if let Some(result) = bind_method(&program, m, &inits) {
                        diagnostics.extend(result.diagnostics);
                        diagnostics.extend(analyze_flow(&table, &result.method));
                        methods.push(result.method);
                    }
                }
            }
            let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).map(|d| d.code).collect();
            assert!(errors.is_empty(), "{:?}", errors);
        }
        (table, methods)
    }

    /// The bound body of the method called `name`.
    pub(crate) fn method_named(table: &SymbolTable, methods: &[BoundMethod], name: &str) -> BoundMethod {
        methods
            .iter()
            .find(|m| &*table.method(m.method).name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no method {}", name))
    }
}
