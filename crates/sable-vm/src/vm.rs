use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::thread;

use rustc_hash::{FxHashMap, FxHashSet};
use sable_codegen::{ExceptionRegion, Instruction, MethodBody, OpCode, Operand, RegionKind};
use sable_compiler::CompiledModule;
use sable_symbols::builtins::EXCEPTION_MESSAGE_FIELD;
use sable_symbols::{
    ClassId, FieldId, MethodId, MethodKind, MethodSymbol, SymbolLookup, SymbolSnapshot, TypeId,
};
use tracing::{debug, info_span, trace};

use crate::casting::{self, CastError};
use crate::error::{invalid, RuntimeError, Unwind};
use crate::executor::{Executor, Job, TaskStatus};
use crate::numeric::{self, NumericError};
use crate::value::{default_value, Delegate, Object, ObjectRef, Reference, Slots, Value};

pub(crate) const NULL_REFERENCE: &str = "Object reference not set to an instance of an object.";
pub(crate) const DIVIDE_BY_ZERO: &str = "Attempted to divide by zero.";
pub(crate) const NO_VALUE: &str = "Nullable object must have a value.";

/// Stack reserved for the thread [`run_module`] interprets on. Every
/// managed call nests a few Rust frames.
const INTERPRETER_STACK: usize = 256 << 20;

#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Calls nested deeper than this fail with a stack overflow
    pub max_call_depth: usize,
    /// Copy console output to stdout as it is written
    pub echo_output: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_call_depth: 1000,
            echo_output: false,
        }
    }
}

/// Built-in members the runtime calls on its own.
pub(crate) struct WellKnown {
    pub(crate) to_string: Option<MethodId>,
    pub(crate) equals: Option<MethodId>,
    pub(crate) get_hash_code: Option<MethodId>,
    pub(crate) exception_message: Option<FieldId>,
}

impl WellKnown {
    fn find(symbols: &SymbolSnapshot) -> Self {
        let object_method = |name: &str| symbols.find_methods(ClassId::OBJECT, name).first().copied();
        Self {
            to_string: object_method("ToString"),
            equals: object_method("Equals"),
            get_hash_code: object_method("GetHashCode"),
            exception_message: symbols.find_field(ClassId::EXCEPTION, EXCEPTION_MESSAGE_FIELD),
        }
    }
}

/// The Sable virtual machine.
pub struct Vm<'m> {
    module: &'m CompiledModule,
    options: VmOptions,
    /// String pool as runtime strings
    strings: Vec<Rc<str>>,
    statics: FxHashMap<FieldId, Value>,
    /// Classes whose static constructor has started
    initialized: FxHashSet<ClassId>,
    pub(crate) executor: Executor,
    output: String,
    depth: usize,
    next_object_id: u32,
    pub(crate) known: WellKnown,
}

/// Console output and exit status of one run.
#[derive(Debug)]
pub struct Execution {
    pub output: String,
    pub result: Result<i32, RuntimeError>,
}

impl Execution {
    pub fn exit_code(&self) -> Option<i32> {
        self.result.as_ref().ok().copied()
    }
}

/// Run the entry point of `module` on a dedicated thread with a large stack.
pub fn run_module(module: &CompiledModule, options: VmOptions) -> Execution {
    thread::scope(|scope| {
        let spawned = thread::Builder::new()
            .name("sable-vm".to_string())
            .stack_size(INTERPRETER_STACK)
            .spawn_scoped(scope, move || {
                let mut vm = Vm::with_options(module, options);
                let result = vm.run_entry_point();
                Execution {
                    output: vm.take_output(),
                    result,
                }
            });
        match spawned {
            Ok(handle) => handle.join().unwrap_or_else(|payload| std::panic::resume_unwind(payload)),
            Err(error) => Execution {
                output: String::new(),
                result: Err(RuntimeError::Thread(error)),
            },
        }
    })
}

// ---
// Frames
// ---

/// Where control goes once the pending finally handlers have run.
enum Transfer {
    Leave(usize),
    Catch { handler: u32, exception: Value },
    /// No handler in this frame; the caller sees the exception
    Propagate(Value),
}

struct PendingTransfer {
    /// Finally handlers still to run, innermost last
    remaining: Vec<ExceptionRegion>,
    running: Option<ExceptionRegion>,
    then: Transfer,
}

enum Flow {
    Next,
    Return(Value),
    Propagate(Value),
}

struct Frame<'m> {
    body: &'m MethodBody,
    args: Slots,
    locals: Slots,
    stack: Vec<Value>,
    pc: usize,
    returns_value: bool,
    pending: Vec<PendingTransfer>,
    /// Exceptions being handled, keyed by catch handler start
    caught: Vec<(u32, Value)>,
}

impl<'m> Frame<'m> {
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, Unwind> {
        self.stack.pop().ok_or_else(|| invalid("stack underflow"))
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, Unwind> {
        let len = self.stack.len();
        if len < count {
            return Err(invalid("stack underflow"));
        }
        Ok(self.stack.split_off(len - count))
    }

    fn peek(&self) -> Result<&Value, Unwind> {
        self.stack.last().ok_or_else(|| invalid("stack underflow"))
    }

    /// Run `finallies` (innermost first), then complete `then`.
    fn transfer(&mut self, mut finallies: Vec<ExceptionRegion>, then: Transfer) -> Result<Flow, Unwind> {
        finallies.reverse();
        self.pending.push(PendingTransfer {
            remaining: finallies,
            running: None,
            then,
        });
        self.resume_transfer()
    }

    /// Continue the innermost pending transfer; reached by `endfinally`.
    fn resume_transfer(&mut self) -> Result<Flow, Unwind> {
        let mut pending = self
            .pending
            .pop()
            .ok_or_else(|| invalid("endfinally outside a finally handler"))?;
        self.stack.clear();
        if let Some(region) = pending.remaining.pop() {
            self.pc = region.handler_start as usize;
            pending.running = Some(region);
            self.pending.push(pending);
            return Ok(Flow::Next);
        }
        Ok(match pending.then {
            Transfer::Leave(target) => {
                self.pc = target;
                Flow::Next
            }
            Transfer::Catch { handler, exception } => {
                self.caught.retain(|(h, _)| *h != handler);
                self.caught.push((handler, exception.clone()));
                self.stack.push(exception);
                self.pc = handler as usize;
                Flow::Next
            }
            Transfer::Propagate(exception) => Flow::Propagate(exception),
        })
    }

    /// The exception of the innermost catch handler containing `offset`.
    fn caught_exception(&self, offset: u32) -> Option<Value> {
        self.caught
            .iter()
            .rev()
            .find(|(handler, _)| {
                self.body
                    .regions
                    .iter()
                    .any(|r| r.handler_start == *handler && r.handler_contains(offset))
            })
            .map(|(_, exception)| exception.clone())
    }
}

fn read_slot(slots: &Slots, index: usize) -> Result<Value, Unwind> {
    slots
        .borrow()
        .get(index)
        .cloned()
        .ok_or_else(|| invalid(format!("slot {} out of range", index)))
}

fn write_slot(slots: &Slots, index: usize, value: Value) -> Result<(), Unwind> {
    match slots.borrow_mut().get_mut(index) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(invalid(format!("slot {} out of range", index))),
    }
}

fn index_operand(operand: &Operand) -> Result<usize, Unwind> {
    match operand {
        Operand::Index(index) => Ok(*index as usize),
        other => Err(invalid(format!("expected an index operand, found {:?}", other))),
    }
}

fn token_operand(operand: &Operand) -> Result<u32, Unwind> {
    match operand {
        Operand::Token(token) => Ok(*token),
        other => Err(invalid(format!("expected a token operand, found {:?}", other))),
    }
}

fn target_operand(operand: &Operand) -> Result<usize, Unwind> {
    match operand {
        Operand::Target(target) => Ok(*target as usize),
        other => Err(invalid(format!("expected a branch target, found {:?}", other))),
    }
}

fn arg_count(method: &MethodSymbol) -> usize {
    method.params.len() + usize::from(!method.is_static)
}

impl<'m> Vm<'m> {
    pub fn new(module: &'m CompiledModule) -> Self {
        Self::with_options(module, VmOptions::default())
    }

    pub fn with_options(module: &'m CompiledModule, options: VmOptions) -> Self {
        Self {
            module,
            options,
            strings: module.strings.iter().map(|s| Rc::from(&**s)).collect(),
            statics: FxHashMap::default(),
            initialized: FxHashSet::default(),
            executor: Executor::new(),
            output: String::new(),
            depth: 0,
            next_object_id: 0,
            known: WellKnown::find(&module.symbols),
        }
    }

    pub(crate) fn symbols(&self) -> &'m SymbolSnapshot {
        &self.module.symbols
    }

    /// Console output written so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    pub(crate) fn write(&mut self, text: &str) {
        if self.options.echo_output {
            print!("{}", text);
        }
        self.output.push_str(text);
    }

    /// Call the entry point, then drain the run queue. Returns the value of
    /// an `int Main`, otherwise 0.
    pub fn run_entry_point(&mut self) -> Result<i32, RuntimeError> {
        let entry = self.module.entry_point.ok_or(RuntimeError::NoEntryPoint)?;
        let _span = info_span!("run", entry = %self.module.method_name(entry)).entered();
        let result = self.call(entry, Vec::new())?;
        self.run_pending()?;
        Ok(match result {
            Value::I32(code) => code,
            _ => 0,
        })
    }

    /// Call `method` with explicit arguments, `this` first for instance
    /// methods.
    pub fn call(&mut self, method: MethodId, args: Vec<Value>) -> Result<Value, RuntimeError> {
        self.invoke(method, args).map_err(|unwind| self.escape(unwind))
    }

    /// Run queued continuations until the queue is empty.
    pub fn run_pending(&mut self) -> Result<(), RuntimeError> {
        while let Some(job) = self.executor.next_job() {
            self.run_job(job).map_err(|unwind| self.escape(unwind))?;
        }
        Ok(())
    }

    fn escape(&self, unwind: Unwind) -> RuntimeError {
        match unwind {
            Unwind::Throw(exception) => RuntimeError::UnhandledException {
                type_name: exception.type_name(self.symbols()),
                message: self.exception_message(&exception),
            },
            Unwind::Invalid(reason) => RuntimeError::InvalidProgram {
                method: "<host>".to_string(),
                offset: 0,
                reason,
            },
            Unwind::Fatal(error) => error,
        }
    }

    // ---
    // Calls
    // ---

    pub(crate) fn invoke(&mut self, method: MethodId, args: Vec<Value>) -> Result<Value, Unwind> {
        let symbol = self.symbols().method(method);
        if let Some(intrinsic) = symbol.intrinsic {
            return self.intrinsic(intrinsic, args);
        }
        if symbol.is_static && symbol.kind != MethodKind::StaticConstructor {
            self.ensure_initialized(symbol.containing)?;
        }
        let body = self
            .module
            .body(method)
            .ok_or_else(|| RuntimeError::MissingBody(self.module.method_name(method)))?;
        if self.depth >= self.options.max_call_depth {
            return Err(RuntimeError::StackOverflow(self.options.max_call_depth).into());
        }
        trace!(method = method.0, depth = self.depth, "invoke");
        self.depth += 1;
        let result = self.run_body(method, &symbol, body, args);
        self.depth -= 1;
        result
    }

    /// Call the override of `method` selected by the receiver, `args[0]`.
    pub(crate) fn call_virtual(&mut self, method: MethodId, args: Vec<Value>) -> Result<Value, Unwind> {
        let receiver = args.first().ok_or_else(|| invalid("virtual call without a receiver"))?;
        if receiver.is_null() {
            return Err(self.exception(NULL_REFERENCE));
        }
        let target = self.dispatch(method, receiver);
        self.invoke(target, args)
    }

    fn dispatch(&self, method: MethodId, receiver: &Value) -> MethodId {
        match receiver.runtime_class() {
            Some(class) => self.symbols().resolve_virtual(class, method),
            None => method,
        }
    }

    fn construct(&mut self, ctor: MethodId, args: Vec<Value>) -> Result<Value, Unwind> {
        let class = self.symbols().method(ctor).containing;
        self.ensure_initialized(class)?;
        let object = Value::Object(self.allocate(class));
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(object.clone());
        full.extend(args);
        self.invoke(ctor, full)?;
        Ok(object)
    }

    /// Returns the result and whether the target produces a value.
    fn invoke_delegate(&mut self, delegate: Value, args: Vec<Value>) -> Result<(Value, bool), Unwind> {
        let delegate = match delegate {
            Value::Delegate(delegate) => delegate,
            Value::Null => return Err(self.exception(NULL_REFERENCE)),
            other => return Err(invalid(format!("invokedelegate on {:?}", other))),
        };
        let symbol = self.symbols().method(delegate.method);
        let mut full = Vec::with_capacity(args.len() + 1);
        let method = if symbol.is_static {
            delegate.method
        } else {
            let target = match &delegate.target {
                Some(target) => target.clone(),
                None => return Err(self.exception(NULL_REFERENCE)),
            };
            let method = self.dispatch(delegate.method, &target);
            full.push(target);
            method
        };
        full.extend(args);
        let result = self.invoke(method, full)?;
        Ok((result, !symbol.returns_void()))
    }

    // ---
    // Objects and statics
    // ---

    pub(crate) fn allocate(&mut self, class: ClassId) -> ObjectRef {
        let symbols = self.symbols();
        let fields = symbols
            .instance_fields(class)
            .into_iter()
            .map(|f| (f, default_value(symbols, symbols.field(f).ty)))
            .collect();
        self.next_object_id += 1;
        Rc::new(Object {
            class,
            fields: RefCell::new(fields),
            id: self.next_object_id,
        })
    }

    /// Run the static constructor of `class` on first use.
    fn ensure_initialized(&mut self, class: ClassId) -> Result<(), Unwind> {
        if !self.initialized.insert(class) {
            return Ok(());
        }
        if let Some(cctor) = self.symbols().static_constructor(class) {
            debug!(class = %self.symbols().class_name(class), "static constructor");
            self.invoke(cctor, Vec::new())?;
        }
        Ok(())
    }

    fn field_default(&self, field: FieldId) -> Value {
        default_value(self.symbols(), self.symbols().field(field).ty)
    }

    fn static_value(&self, field: FieldId) -> Value {
        match self.statics.get(&field) {
            Some(value) => value.clone(),
            None => self.field_default(field),
        }
    }

    fn load_field(&self, object: &Value, field: FieldId) -> Result<Value, Unwind> {
        match object {
            Value::Object(object) => Ok(object.get(field).unwrap_or_else(|| self.field_default(field))),
            Value::Null => Err(self.exception(NULL_REFERENCE)),
            other => Err(invalid(format!("ldfld on {:?}", other))),
        }
    }

    fn store_field(&self, object: &Value, field: FieldId, value: Value) -> Result<(), Unwind> {
        match object {
            Value::Object(object) => {
                object.set(field, value);
                Ok(())
            }
            Value::Null => Err(self.exception(NULL_REFERENCE)),
            other => Err(invalid(format!("stfld on {:?}", other))),
        }
    }

    fn load_ref(&self, reference: &Reference) -> Result<Value, Unwind> {
        match reference {
            Reference::Slot(slots, index) => read_slot(slots, *index),
            Reference::Field(object, field) => Ok(object.get(*field).unwrap_or_else(|| self.field_default(*field))),
            Reference::Static(field) => Ok(self.static_value(*field)),
        }
    }

    fn store_ref(&mut self, reference: &Reference, value: Value) -> Result<(), Unwind> {
        match reference {
            Reference::Slot(slots, index) => write_slot(slots, *index, value),
            Reference::Field(object, field) => {
                object.set(*field, value);
                Ok(())
            }
            Reference::Static(field) => {
                self.statics.insert(*field, value);
                Ok(())
            }
        }
    }

    // ---
    // Exceptions
    // ---

    /// A runtime-raised `System.Exception`.
    pub(crate) fn exception(&self, message: &str) -> Unwind {
        let symbols = self.symbols();
        let fields = symbols
            .instance_fields(ClassId::EXCEPTION)
            .into_iter()
            .map(|f| (f, default_value(symbols, symbols.field(f).ty)))
            .collect();
        let object = Object {
            class: ClassId::EXCEPTION,
            fields: RefCell::new(fields),
            id: 0,
        };
        if let Some(field) = self.known.exception_message {
            object.set(field, Value::string(message));
        }
        Unwind::Throw(Value::Object(Rc::new(object)))
    }

    fn invalid_cast(&self, value: &Value, ty: TypeId) -> Unwind {
        let message = format!(
            "Unable to cast object of type '{}' to type '{}'.",
            value.type_name(self.symbols()),
            self.symbols().type_name(ty)
        );
        self.exception(&message)
    }

    fn numeric_fault(&self, error: NumericError) -> Unwind {
        match error {
            NumericError::DivideByZero => self.exception(DIVIDE_BY_ZERO),
            other => invalid(other.to_string()),
        }
    }

    pub(crate) fn exception_message(&self, exception: &Value) -> String {
        if let (Value::Object(object), Some(field)) = (exception, self.known.exception_message) {
            if let Some(Value::Str(message)) = object.get(field) {
                return message.to_string();
            }
        }
        format!("Exception of type '{}' was thrown.", exception.type_name(self.symbols()))
    }

    /// Route a managed exception raised at `offset` to a catch handler of
    /// this frame, running the finally handlers it leaves on the way.
    fn dispatch_exception(&self, frame: &mut Frame<'m>, offset: usize, exception: Value) -> Result<Flow, Unwind> {
        let offset = offset as u32;
        let mut finallies = Vec::new();
        let mut handler = None;
        for region in frame.body.regions.iter().filter(|r| r.try_contains(offset)) {
            match region.kind {
                RegionKind::Finally => finallies.push(*region),
                RegionKind::Catch(ty) => {
                    if casting::is_instance(self.symbols(), &exception, ty) {
                        handler = Some(region.handler_start);
                        break;
                    }
                }
            }
        }
        // An exception escaping a running finally handler abandons the
        // transfer that handler was part of.
        while let Some(running) = frame.pending.last().and_then(|p| p.running) {
            let escapes = running.handler_contains(offset)
                && !handler.is_some_and(|h| running.handler_contains(h));
            if !escapes {
                break;
            }
            frame.pending.pop();
        }
        let then = match handler {
            Some(handler) => Transfer::Catch { handler, exception },
            None => Transfer::Propagate(exception),
        };
        frame.transfer(finallies, then)
    }

    // ---
    // Run queue
    // ---

    pub(crate) fn run_job(&mut self, job: Job) -> Result<(), Unwind> {
        match job {
            Job::Complete(task) => {
                self.executor.settle(&task, TaskStatus::Completed(Value::Null));
            }
            Job::Resume(machine) => {
                let class = machine
                    .runtime_class()
                    .ok_or_else(|| invalid("resumed a null state machine"))?;
                let move_next = self
                    .symbols()
                    .find_methods(class, "MoveNext")
                    .first()
                    .copied()
                    .ok_or_else(|| invalid("state machine without MoveNext"))?;
                self.invoke(move_next, vec![machine])?;
            }
        }
        Ok(())
    }

    // ---
    // Execution
    // ---

    fn run_body(
        &mut self,
        method: MethodId,
        symbol: &MethodSymbol,
        body: &'m MethodBody,
        args: Vec<Value>,
    ) -> Result<Value, Unwind> {
        let symbols = self.symbols();
        let locals = body.locals.iter().map(|slot| default_value(symbols, slot.ty)).collect();
        let mut frame = Frame {
            body,
            args: Rc::new(RefCell::new(args)),
            locals: Rc::new(RefCell::new(locals)),
            stack: Vec::with_capacity(body.max_stack as usize),
            pc: 0,
            returns_value: !symbol.returns_void(),
            pending: Vec::new(),
            caught: Vec::new(),
        };
        loop {
            let offset = frame.pc;
            let flow = match Instruction::decode(&body.code, offset) {
                Ok((instruction, next)) => {
                    frame.pc = next;
                    match self.step(&mut frame, offset, instruction) {
                        Err(Unwind::Throw(exception)) => self.dispatch_exception(&mut frame, offset, exception),
                        other => other,
                    }
                }
                Err(error) => Err(invalid(error.to_string())),
            };
            match flow {
                Ok(Flow::Next) => {}
                Ok(Flow::Return(value)) => return Ok(value),
                Ok(Flow::Propagate(exception)) => return Err(Unwind::Throw(exception)),
                Err(Unwind::Invalid(reason)) => {
                    return Err(RuntimeError::InvalidProgram {
                        method: self.module.method_name(method),
                        offset,
                        reason,
                    }
                    .into())
                }
                Err(unwind) => return Err(unwind),
            }
        }
    }

    fn step(&mut self, frame: &mut Frame<'m>, offset: usize, instruction: Instruction) -> Result<Flow, Unwind> {
        let Instruction { op, operand } = instruction;
        match op {
            OpCode::Nop => {}
            OpCode::Dup => {
                let top = frame.peek()?.clone();
                frame.push(top);
            }
            OpCode::Pop => {
                frame.pop()?;
            }

            // VARIABLES
            OpCode::Ldarg => {
                let value = read_slot(&frame.args, index_operand(&operand)?)?;
                frame.push(value);
            }
            OpCode::Starg => {
                let value = frame.pop()?;
                write_slot(&frame.args, index_operand(&operand)?, value)?;
            }
            OpCode::Ldarga => {
                let slots = frame.args.clone();
                frame.push(Value::Ref(Reference::Slot(slots, index_operand(&operand)?)));
            }
            OpCode::Ldloc => {
                let value = read_slot(&frame.locals, index_operand(&operand)?)?;
                frame.push(value);
            }
            OpCode::Stloc => {
                let value = frame.pop()?;
                write_slot(&frame.locals, index_operand(&operand)?, value)?;
            }
            OpCode::Ldloca => {
                let slots = frame.locals.clone();
                frame.push(Value::Ref(Reference::Slot(slots, index_operand(&operand)?)));
            }

            // CONSTANTS
            OpCode::LdcI4 | OpCode::LdcI8 | OpCode::LdcR4 | OpCode::LdcR8 => {
                let value = match operand {
                    Operand::Int32(v) => Value::I32(v),
                    Operand::Int64(v) => Value::I64(v),
                    Operand::Float32(v) => Value::F32(v),
                    Operand::Float64(v) => Value::F64(v),
                    other => return Err(invalid(format!("bad constant operand {:?}", other))),
                };
                frame.push(value);
            }
            OpCode::Ldstr => {
                let index = token_operand(&operand)? as usize;
                let text = self
                    .strings
                    .get(index)
                    .cloned()
                    .ok_or_else(|| invalid(format!("string {} out of range", index)))?;
                frame.push(Value::Str(text));
            }
            OpCode::Ldnull => frame.push(Value::Null),
            OpCode::LdcTrue => frame.push(Value::Bool(true)),
            OpCode::LdcFalse => frame.push(Value::Bool(false)),

            // ARITHMETIC
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Rem
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let result = numeric::binary(op, &left, &right).map_err(|e| self.numeric_fault(e))?;
                frame.push(result);
            }
            OpCode::Shl | OpCode::Shr => {
                let count = frame.pop()?;
                let value = frame.pop()?;
                let result = numeric::shift(op, &value, &count).map_err(|e| self.numeric_fault(e))?;
                frame.push(result);
            }
            OpCode::Neg | OpCode::Not => {
                let value = frame.pop()?;
                let result = numeric::unary(op, &value).map_err(|e| self.numeric_fault(e))?;
                frame.push(result);
            }

            // COMPARISON
            OpCode::Ceq | OpCode::Cgt | OpCode::Clt => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let result = match op {
                    OpCode::Ceq => numeric::equals(&left, &right),
                    OpCode::Cgt => numeric::compare(&left, &right) == Some(Ordering::Greater),
                    _ => numeric::compare(&left, &right) == Some(Ordering::Less),
                };
                frame.push(Value::Bool(result));
            }

            // CONVERSIONS
            OpCode::ConvI1
            | OpCode::ConvU1
            | OpCode::ConvI2
            | OpCode::ConvU2
            | OpCode::ConvI4
            | OpCode::ConvU4
            | OpCode::ConvI8
            | OpCode::ConvU8
            | OpCode::ConvR4
            | OpCode::ConvR8
            | OpCode::ConvChar
            | OpCode::ConvBool
            | OpCode::ConvDec => {
                let value = frame.pop()?;
                let result = numeric::convert(op, &value).map_err(|e| self.numeric_fault(e))?;
                frame.push(result);
            }

            // CONTROL FLOW
            OpCode::Br => frame.pc = target_operand(&operand)?,
            OpCode::Brtrue | OpCode::Brfalse => {
                let condition = frame.pop()?.is_truthy();
                if condition == (op == OpCode::Brtrue) {
                    frame.pc = target_operand(&operand)?;
                }
            }
            OpCode::Switch => {
                let value = frame.pop()?;
                let Operand::Targets(targets) = operand else {
                    return Err(invalid("switch without a jump table"));
                };
                let selected = numeric::as_i64(&value)
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| targets.get(i));
                if let Some(&target) = selected {
                    frame.pc = target as usize;
                }
            }
            OpCode::Leave => {
                let target = target_operand(&operand)?;
                let (from, to) = (offset as u32, target as u32);
                let finallies = frame
                    .body
                    .regions
                    .iter()
                    .filter(|r| r.kind == RegionKind::Finally && r.try_contains(from) && !r.try_contains(to))
                    .copied()
                    .collect();
                return frame.transfer(finallies, Transfer::Leave(target));
            }
            OpCode::Endfinally => return frame.resume_transfer(),
            OpCode::Ret => {
                let value = if frame.returns_value { frame.pop()? } else { Value::Null };
                return Ok(Flow::Return(value));
            }
            OpCode::Throw => {
                let exception = frame.pop()?;
                if exception.is_null() {
                    return Err(self.exception(NULL_REFERENCE));
                }
                return Err(Unwind::Throw(exception));
            }
            OpCode::Rethrow => {
                let exception = frame
                    .caught_exception(offset as u32)
                    .ok_or_else(|| invalid("rethrow outside a catch handler"))?;
                return Err(Unwind::Throw(exception));
            }

            // CALLS
            OpCode::Call | OpCode::Callvirt => {
                let method = MethodId(token_operand(&operand)?);
                let symbol = self.symbols().method(method);
                let args = frame.pop_n(arg_count(&symbol))?;
                let result = if op == OpCode::Callvirt && !symbol.is_static {
                    self.call_virtual(method, args)?
                } else {
                    self.invoke(method, args)?
                };
                if !symbol.returns_void() {
                    frame.push(result);
                }
            }
            OpCode::Newobj => {
                let ctor = MethodId(token_operand(&operand)?);
                let count = self.symbols().method(ctor).params.len();
                let args = frame.pop_n(count)?;
                let object = self.construct(ctor, args)?;
                frame.push(object);
            }
            OpCode::Ldftn => frame.push(Value::MethodPtr(MethodId(token_operand(&operand)?))),
            OpCode::Newdelegate => {
                let ty = TypeId(token_operand(&operand)?);
                let method = match frame.pop()? {
                    Value::MethodPtr(method) => method,
                    other => return Err(invalid(format!("newdelegate on {:?}", other))),
                };
                let target = frame.pop()?;
                frame.push(Value::Delegate(Rc::new(Delegate {
                    target: (!target.is_null()).then_some(target),
                    method,
                    ty,
                })));
            }
            OpCode::Invokedelegate => {
                let args = frame.pop_n(index_operand(&operand)?)?;
                let delegate = frame.pop()?;
                let (result, produces) = self.invoke_delegate(delegate, args)?;
                if produces {
                    frame.push(result);
                }
            }

            // FIELDS
            OpCode::Ldfld => {
                let field = FieldId(token_operand(&operand)?);
                let object = frame.pop()?;
                frame.push(self.load_field(&object, field)?);
            }
            OpCode::Stfld => {
                let field = FieldId(token_operand(&operand)?);
                let value = frame.pop()?;
                let object = frame.pop()?;
                self.store_field(&object, field, value)?;
            }
            OpCode::Ldflda => {
                let field = FieldId(token_operand(&operand)?);
                match frame.pop()? {
                    Value::Object(object) => frame.push(Value::Ref(Reference::Field(object, field))),
                    Value::Null => return Err(self.exception(NULL_REFERENCE)),
                    other => return Err(invalid(format!("ldflda on {:?}", other))),
                }
            }
            OpCode::Ldsfld | OpCode::Stsfld | OpCode::Ldsflda => {
                let field = FieldId(token_operand(&operand)?);
                self.ensure_initialized(self.symbols().field(field).containing)?;
                match op {
                    OpCode::Ldsfld => frame.push(self.static_value(field)),
                    OpCode::Stsfld => {
                        let value = frame.pop()?;
                        self.statics.insert(field, value);
                    }
                    _ => frame.push(Value::Ref(Reference::Static(field))),
                }
            }

            // TYPES
            OpCode::Isinst => {
                let ty = TypeId(token_operand(&operand)?);
                let value = frame.pop()?;
                let result = if casting::is_instance(self.symbols(), &value, ty) { value } else { Value::Null };
                frame.push(result);
            }
            OpCode::Castclass => {
                let ty = TypeId(token_operand(&operand)?);
                let value = frame.pop()?;
                if !value.is_null() && !casting::is_instance(self.symbols(), &value, ty) {
                    return Err(self.invalid_cast(&value, ty));
                }
                frame.push(value);
            }
            OpCode::Box => {
                let ty = TypeId(token_operand(&operand)?);
                let value = frame.pop()?;
                frame.push(casting::box_value(self.symbols(), value, ty));
            }
            OpCode::UnboxAny => {
                let ty = TypeId(token_operand(&operand)?);
                let value = frame.pop()?;
                match casting::unbox(self.symbols(), value.clone(), ty) {
                    Ok(unboxed) => frame.push(unboxed),
                    Err(CastError::Null) => return Err(self.exception(NO_VALUE)),
                    Err(CastError::Mismatch) => return Err(self.invalid_cast(&value, ty)),
                }
            }

            // INDIRECTION
            OpCode::Ldind => match frame.pop()? {
                Value::Ref(reference) => {
                    let value = self.load_ref(&reference)?;
                    frame.push(value);
                }
                other => return Err(invalid(format!("ldind on {:?}", other))),
            },
            OpCode::Stind => {
                let value = frame.pop()?;
                match frame.pop()? {
                    Value::Ref(reference) => self.store_ref(&reference, value)?,
                    other => return Err(invalid(format!("stind on {:?}", other))),
                }
            }
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_compiler::{compile, CompilationOptions, SourceFile};

    fn module_with(source: &str, options: &CompilationOptions) -> CompiledModule {
        let compilation = compile(&[SourceFile::new("test.sbl", source)], options).unwrap();
        let errors: Vec<_> = compilation.diagnostics.iter().filter(|d| d.is_error()).collect();
        assert!(errors.is_empty(), "{:?}", errors);
        compilation.module.expect("module")
    }

    fn run(source: &str) -> Execution {
        run_module(&module_with(source, &CompilationOptions::default()), VmOptions::default())
    }

    fn output(source: &str) -> String {
        let execution = run(source);
        if let Err(error) = &execution.result {
            panic!("{}\noutput so far:\n{}", error, execution.output);
        }
        execution.output
    }

    fn program(main: &str) -> String {
        format!("using System;\nclass Program {{\n static void Main() {{\n{}\n}}\n}}", main)
    }

    #[test]
    fn test_hello_world() {
        assert_eq!(output(&program(r#"Console.WriteLine("Hello");"#)), "Hello\n");
    }

    #[test]
    fn test_arithmetic_and_formatting() {
        let source = program(
            r#"
            int a = 7;
            long b = 3L;
            double d = 1.0 / 3;
            Console.WriteLine(a / 2);
            Console.WriteLine(a % 4 + b);
            Console.WriteLine(d);
            Console.WriteLine(1.5f * 2);
            Console.WriteLine(a > 5 && b <= 3);
            Console.WriteLine('x');
            Console.WriteLine(-a >> 1);
            Console.WriteLine(~0u);
            "#,
        );
        assert_eq!(
            output(&source),
            "3\n6\n0.333333333333333\n3\nTrue\nx\n-4\n4294967295\n"
        );
    }

    #[test]
    fn test_exit_code_of_int_main() {
        let source = "class Program { static int Main() { return 42; } }";
        assert_eq!(run(source).exit_code(), Some(42));
    }

    #[test]
    fn test_virtual_dispatch_and_to_string() {
        let source = r#"
            using System;
            namespace Shapes {
                abstract class Shape {
                    public abstract double Area();
                    public override string ToString() { return "Shape with area " + Area(); }
                }
                class Square : Shape {
                    double side;
                    public Square(double side) { this.side = side; }
                    public override double Area() { return side * side; }
                }
                class Plain { }
                class Program {
                    static void Main() {
                        Shape s = new Square(1.5);
                        Console.WriteLine(s);
                        Console.WriteLine(new Plain());
                        object o = 12;
                        Console.WriteLine(o.ToString());
                    }
                }
            }
        "#;
        assert_eq!(output(source), "Shape with area 2.25\nShapes.Plain\n12\n");
    }

    #[test]
    fn test_ref_and_out_arguments() {
        let source = program(
            r#"
            int x = 1;
            Bump(ref x);
            Bump(ref x);
            int y, z;
            Split(17, out y, out z);
            Console.WriteLine(x + " " + y + " " + z);
            }
            static void Bump(ref int v) { v = v * 10; }
            static void Split(int n, out int q, out int r) { q = n / 5; r = n % 5; "#,
        );
        assert_eq!(output(&source), "100 3 2\n");
    }

    #[test]
    fn test_exceptions_catch_and_finally() {
        let source = program(
            r#"
            try {
                try {
                    Console.WriteLine("body");
                    throw new Exception("boom");
                } finally {
                    Console.WriteLine("inner finally");
                }
            } catch (Exception e) {
                Console.WriteLine("caught " + e.Message);
            } finally {
                Console.WriteLine("outer finally");
            }
            Console.WriteLine(Divide(1, 0));
            }
            static string Divide(int a, int b) {
                try { return (a / b).ToString(); }
                catch (Exception e) { return e.Message; }
            "#,
        );
        assert_eq!(
            output(&source),
            "body\ninner finally\ncaught boom\nouter finally\nAttempted to divide by zero.\n"
        );
    }

    #[test]
    fn test_finally_runs_on_return_and_break() {
        let source = program(
            r#"
            Console.WriteLine(Early());
            for (int i = 0; i < 3; i++) {
                try {
                    if (i == 1) break;
                    Console.WriteLine("loop " + i);
                } finally {
                    Console.WriteLine("cleanup " + i);
                }
            }
            }
            static int Early() {
                try { return 1; }
                finally { Console.WriteLine("finally before return"); }
            "#,
        );
        assert_eq!(
            output(&source),
            "finally before return\n1\nloop 0\ncleanup 0\ncleanup 1\n"
        );
    }

    #[test]
    fn test_unhandled_exception() {
        let source = r#"
            using System;
            class NotFound : Exception {
                public NotFound() : base() { }
            }
            class Program {
                static void Main() {
                    Console.WriteLine("before");
                    throw new NotFound();
                }
            }
        "#;
        let execution = run(source);
        assert_eq!(execution.output, "before\n");
        match execution.result {
            Err(RuntimeError::UnhandledException { type_name, message }) => {
                assert_eq!(type_name, "NotFound");
                assert_eq!(message, "Exception of type 'NotFound' was thrown.");
            }
            other => panic!("expected an unhandled exception, got {:?}", other),
        }
    }

    #[test]
    fn test_null_reference() {
        let source = program(
            r#"
            string s = null;
            try { Console.WriteLine(s.Length); }
            catch (Exception e) { Console.WriteLine(e.Message); }
            "#,
        );
        assert_eq!(output(&source), format!("{}\n", NULL_REFERENCE));
    }

    #[test]
    fn test_stack_overflow() {
        let source = "class Program { static int F(int n) { return F(n + 1); } static void Main() { F(0); } }";
        let module = module_with(source, &CompilationOptions::default());
        let options = VmOptions {
            max_call_depth: 64,
            ..VmOptions::default()
        };
        let execution = run_module(&module, options);
        assert!(matches!(execution.result, Err(RuntimeError::StackOverflow(64))));
    }

    #[test]
    fn test_static_constructor_runs_once_on_first_use() {
        let source = r#"
            using System;
            class Counter {
                public static int Count = Start();
                static int Start() { Console.WriteLine("init"); return 10; }
                public static int Next() { Count++; return Count; }
            }
            class Program {
                static void Main() {
                    Console.WriteLine("main");
                    Console.WriteLine(Counter.Next());
                    Console.WriteLine(Counter.Next());
                }
            }
        "#;
        assert_eq!(output(source), "main\ninit\n11\n12\n");
    }

    #[test]
    fn test_release_build_runs_the_same() {
        let source = program(
            r#"
            int total = 0;
            for (int i = 0; i < 10; i++) {
                if (i % 2 == 0 && i > 2) total += i;
            }
            Console.WriteLine(total);
            "#,
        );
        let debug = run_module(&module_with(&source, &CompilationOptions::default()), VmOptions::default());
        let release = run_module(&module_with(&source, &CompilationOptions::release()), VmOptions::default());
        assert_eq!(debug.output, "18\n");
        assert_eq!(release.output, debug.output);
    }

    #[test]
    fn test_call_without_entry_point() {
        let source = "class Lib { public static int Twice(int x) { return x * 2; } }";
        let options = CompilationOptions::default().with_output_kind(sable_compiler::OutputKind::Library);
        let module = module_with(source, &options);
        let twice = module.find_methods("Lib.Twice")[0];
        let mut vm = Vm::new(&module);
        assert!(matches!(vm.run_entry_point(), Err(RuntimeError::NoEntryPoint)));
        let result = vm.call(twice, vec![Value::I32(21)]).unwrap();
        assert_eq!(result, Value::I32(42));
    }
}
