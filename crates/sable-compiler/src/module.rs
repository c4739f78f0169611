use sable_codegen::{disassemble, EmitError, MethodBody, SymbolResolver};
use sable_symbols::{DiagnosticBag, MethodId, Symbol, SymbolLookup, SymbolSnapshot};
use serde::Serialize;

/// One source file of a compilation. Its position in the input list is
/// the file id carried by spans.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// The executable result of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    /// Every type and member, synthesized ones included
    pub symbols: SymbolSnapshot,
    /// Bodies indexed by method id; `None` for abstract and intrinsic methods
    pub methods: Vec<Option<MethodBody>>,
    pub strings: Vec<Symbol>,
    pub entry_point: Option<MethodId>,
}

impl CompiledModule {
    pub fn body(&self, method: MethodId) -> Option<&MethodBody> {
        self.methods.get(method.index()).and_then(Option::as_ref)
    }

    /// `Class.Method` with nested classes dotted in.
    pub fn method_name(&self, method: MethodId) -> String {
        let symbol = self.symbols.method(method);
        format!("{}.{}", self.symbols.class_name(symbol.containing), symbol.name)
    }

    /// Methods named `Class.Method`, in declaration order.
    pub fn find_methods(&self, qualified: &str) -> Vec<MethodId> {
        (0..self.symbols.methods.len() as u32)
            .map(MethodId)
            .filter(|&m| self.method_name(m) == qualified)
            .collect()
    }

    /// Methods with generated code, in id order.
    pub fn compiled_methods(&self) -> impl Iterator<Item = (MethodId, &MethodBody)> {
        self.methods
            .iter()
            .enumerate()
            .filter_map(|(i, body)| body.as_ref().map(|body| (MethodId(i as u32), body)))
    }

    pub fn resolver(&self) -> SymbolResolver<'_, SymbolSnapshot> {
        SymbolResolver {
            symbols: &self.symbols,
            strings: &self.strings,
        }
    }

    pub fn disassemble(&self, method: MethodId) -> Option<Result<String, EmitError>> {
        let body = self.body(method)?;
        Some(disassemble(&self.method_name(method), body, &self.resolver()))
    }

    pub fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            entry_point: self.entry_point.map(|m| self.method_name(m)),
            strings: self.strings.len(),
            methods: self
                .compiled_methods()
                .map(|(method, body)| MethodSummary {
                    name: self.method_name(method),
                    code_size: body.code.len(),
                    max_stack: body.max_stack,
                    locals: body.locals.len(),
                    regions: body.regions.len(),
                    state_machine: body
                        .state_machine
                        .as_ref()
                        .and_then(|m| m.state_machine)
                        .map(|class| self.symbols.class_name(class)),
                })
                .collect(),
        }
    }
}

/// Size figures for `build` output.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub entry_point: Option<String>,
    pub strings: usize,
    pub methods: Vec<MethodSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodSummary {
    pub name: String,
    pub code_size: usize,
    pub max_stack: u16,
    pub locals: usize,
    pub regions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_machine: Option<String>,
}

/// Everything a compilation reports: its diagnostics, and the module when
/// no error was found.
#[derive(Debug)]
pub struct Compilation {
    pub diagnostics: DiagnosticBag,
    pub module: Option<CompiledModule>,
}

impl Compilation {
    pub fn succeeded(&self) -> bool {
        self.module.is_some()
    }
}
