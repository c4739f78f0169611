use std::fmt;

use sable_lexer::Span;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

macro_rules! error_codes {
    ($($name:ident = ($severity:ident, $code:literal, $template:literal),)*) => {
        /// Every diagnostic the compiler reports.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum ErrorCode {
            $($name,)*
        }

        impl ErrorCode {
            /// Numeric id, displayed as `CSxxxx`.
            pub fn number(self) -> u32 {
                match self {
                    $(ErrorCode::$name => $code,)*
                }
            }

            pub fn severity(self) -> Severity {
                match self {
                    $(ErrorCode::$name => Severity::$severity,)*
                }
            }

            /// Message template; `{0}`, `{1}`, ... are replaced by arguments.
            pub fn template(self) -> &'static str {
                match self {
                    $(ErrorCode::$name => $template,)*
                }
            }
        }
    };
}

error_codes! {
    BadBinaryOps = (Error, 19, "Operator '{0}' cannot be applied to operands of type '{1}' and '{2}'"),
    DivideByZero = (Error, 20, "Division by constant zero"),
    BadUnaryOp = (Error, 23, "Operator '{0}' cannot be applied to operand of type '{1}'"),
    ThisInStaticMeth = (Error, 26, "Keyword 'this' is not valid in a static property, static method, or static field initializer"),
    NoImplicitConv = (Error, 29, "Cannot implicitly convert type '{0}' to '{1}'"),
    NoExplicitConv = (Error, 30, "Cannot convert type '{0}' to '{1}'"),
    ConstOutOfRange = (Error, 31, "Constant value '{0}' cannot be converted to a '{1}'"),
    ValueCantBeNull = (Error, 37, "Cannot convert null to '{0}' because it is a non-nullable value type"),
    AsMustHaveReferenceType = (Error, 77, "The as operator must be used with a reference type or nullable type ('{0}' is a non-nullable value type)"),
    DuplicateMember = (Error, 102, "The type '{0}' already contains a definition for '{1}'"),
    NameNotInContext = (Error, 103, "The name '{0}' does not exist in the current context"),
    CircConstValue = (Error, 110, "The evaluation of the constant value for '{0}' involves a circular definition"),
    NoSuchMember = (Error, 117, "'{0}' does not contain a definition for '{1}'"),
    BadSKknown = (Error, 118, "'{0}' is a {1} but is used like a {2}"),
    ObjectRequired = (Error, 120, "An object reference is required for the non-static field, method, or property '{0}'"),
    ObjectProhibited = (Error, 176, "Member '{0}' cannot be accessed with an instance reference; qualify it with a type name instead"),
    RetObjectRequired = (Error, 126, "An object of a type convertible to '{0}' is required"),
    RetNoObjectRequired = (Error, 127, "Since '{0}' returns void, a return keyword must not be followed by an object expression"),
    LocalDuplicate = (Error, 128, "A local variable named '{0}' is already defined in this scope"),
    AssgLvalueExpected = (Error, 131, "The left-hand side of an assignment must be a variable, property or indexer"),
    NotConstantExpression = (Error, 133, "The expression being assigned to '{0}' must be constant"),
    NoBreakOrCont = (Error, 139, "No enclosing loop out of which to break or continue"),
    BadEmptyThrow = (Error, 156, "A throw statement with no arguments is not allowed outside of a catch clause"),
    AbstractInstantiation = (Error, 144, "Cannot create an instance of the abstract class '{0}'"),
    CircularBase = (Error, 146, "Circular base type dependency involving '{0}' and '{1}'"),
    MethodNameExpected = (Error, 149, "Method name expected"),
    ConstantExpected = (Error, 150, "A constant value is expected"),
    ReturnExpected = (Error, 161, "'{0}': not all code paths return a value"),
    UnreachableCode = (Warning, 162, "Unreachable code detected"),
    UseDefViolation = (Error, 165, "Use of unassigned local variable '{0}'"),
    UnreferencedVar = (Warning, 168, "The variable '{0}' is declared but never used"),
    UnassignedOut = (Error, 177, "The out parameter '{0}' must be assigned to before control leaves the current method"),
    AssignReadonly = (Error, 200, "Property or indexer '{0}' cannot be assigned to -- it is read only"),
    IllegalStatement = (Error, 201, "Only assignment, call, increment, decrement, await, and new object expressions can be used as a statement"),
    TypeNotFound = (Error, 246, "The type or namespace name '{0}' could not be found"),
    CantInferMethTypeArgs = (Error, 411, "The type arguments for method '{0}' cannot be inferred from the usage"),
    NoOverload = (Error, 1501, "No overload for method '{0}' takes {1} arguments"),
    BadArgType = (Error, 1503, "Argument {0}: cannot convert from '{1}' to '{2}'"),
    ParseError = (Error, 1525, "{0}"),
    LambdaArity = (Error, 1593, "Delegate '{0}' does not take {1} arguments"),
    BadArgRef = (Error, 1620, "Argument {0} must be passed with the '{1}' keyword"),
    ForeachNoGetEnumerator = (Error, 1579, "foreach statement cannot operate on variables of type '{0}' because '{0}' does not contain a public definition for 'GetEnumerator'"),
    ReturnInIterator = (Error, 1622, "Cannot return a value from an iterator. Use the yield return statement to return a value, or yield break to end the iteration"),
    BadIteratorReturn = (Error, 1624, "The body of '{0}' cannot be an iterator block because '{1}' is not an iterator interface type"),
    BadYieldInTry = (Error, 1626, "Cannot yield a value in the body of a try block"),
    AnonMethToNonDel = (Error, 1660, "Cannot convert lambda expression to type '{0}' because it is not a delegate type"),
    NamedArgumentSpecificationBeforeFixedArgument = (Error, 1738, "Named argument specifications must appear after all fixed arguments have been specified"),
    NamedArgumentNotFound = (Error, 1739, "The best overload for '{0}' does not have a parameter named '{1}'"),
    ImplicitlyTypedVariableAssignedBadValue = (Error, 815, "Cannot assign {0} to an implicitly-typed variable"),
    ImplicitlyTypedVariableWithNoInitializer = (Error, 818, "Implicitly-typed variables must be initialized"),
    BadAsyncReturn = (Error, 1983, "The return type of an async method must be void, Task or Task<T>"),
    BadAwaitInFinally = (Error, 1984, "Cannot await in the body of a finally clause"),
    BadAwaitArg = (Error, 4001, "Cannot await '{0}'"),
    BadAwaitWithoutAsync = (Error, 4033, "The 'await' operator can only be used within an async method"),
    NoMainMethod = (Error, 5001, "Program does not contain a static 'Main' method suitable for an entry point"),
    DeclarationExpressionOutOfContext = (Error, 8047, "A declaration expression is not permitted in this context"),
    ThisInitializerRequired = (Error, 8862, "A constructor declared in a type with parameter list must have 'this' constructor initializer"),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CS{:04}", self.number())
    }
}

/// One reported problem with its location and message arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub severity: Severity,
    #[serde(skip)]
    pub span: Span,
    pub args: Vec<String>,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, span: Span, args: Vec<String>) -> Self {
        Self {
            code,
            severity: code.severity(),
            span,
            args,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// The formatted message.
    pub fn message(&self) -> String {
        let mut message = self.code.template().to_string();
        for (i, arg) in self.args.iter().enumerate() {
            message = message.replace(&format!("{{{}}}", i), arg);
        }
        message
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{} {}: {}", kind, self.code, self.message())
    }
}

/// An ordered collection of diagnostics.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, code: ErrorCode, span: Span, args: Vec<String>) {
        self.diagnostics.push(Diagnostic::new(code, span, args));
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, other: DiagnosticBag) {
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Whether any diagnostic carries `code`.
    pub fn contains(&self, code: ErrorCode) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }

    /// Sort by source position, keeping insertion order for ties.
    pub fn sort(&mut self) {
        self.diagnostics.sort_by_key(|d| d.span);
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

impl IntoIterator for DiagnosticBag {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.into_iter()
    }
}
