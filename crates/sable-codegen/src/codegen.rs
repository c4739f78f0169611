//! Code generation: lowered method bodies to bytecode.
//!
//! The generator walks the reduced bound tree left after lowering. Values
//! flow through the evaluation stack; locals get slots on first use. In
//! release mode the optimizer runs over the instruction list before it is
//! realized, and temporaries share slots once their scope ends.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use sable_binder::{
    BinaryOperator, BoundBlock, BoundCatch, BoundExpr, BoundExprKind, BoundStmt, BoundStmtKind,
    LabelId, LocalId, LocalKind, LocalTable, UnaryOperator,
};
use sable_lowering::LoweredMethod;
use sable_symbols::{
    ConstantValue, ConversionKind, FieldId, MethodId, MethodSymbol, PrimitiveType, RefKind,
    SymbolLookup, SymbolTable, Ty, TypeId,
};
use tracing::{debug, trace};

use crate::body::{MethodBody, RegionKind, StateMachineMetadata, StringPool};
use crate::builder::{ILBuilder, Marker};
use crate::error::EmitError;
use crate::opcodes::{Label, OpCode, Operand};
use crate::optimizer::{optimize, OptConfig};

/// How a method body is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOptions {
    /// Run the optimizer and reuse temporary slots
    pub optimize: bool,
    /// Record sequence points
    pub debug_info: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            optimize: false,
            debug_info: true,
        }
    }
}

impl EmitOptions {
    pub fn release() -> Self {
        Self {
            optimize: true,
            debug_info: false,
        }
    }
}

/// Generate the body of one lowered method.
pub fn generate_method(
    table: &SymbolTable,
    strings: &StringPool,
    lowered: &LoweredMethod,
    options: EmitOptions,
) -> Result<MethodBody, EmitError> {
    let symbol = table.method(lowered.method);
    trace!(method = %symbol.name, optimize = options.optimize, "generate method");
    let mut generator = CodeGenerator {
        table,
        strings,
        locals: &lowered.locals,
        symbol,
        options,
        il: ILBuilder::new(),
        slots: FxHashMap::default(),
        labels: FxHashMap::default(),
        protected: Vec::new(),
        indirect_return: None,
        yields: Vec::new(),
        resumes: Vec::new(),
        async_catch: None,
    };
    generator.emit_body(&lowered.body)?;

    let CodeGenerator {
        mut il,
        yields,
        resumes,
        async_catch,
        ..
    } = generator;
    if options.optimize {
        let stats = optimize(&mut il, &OptConfig::default());
        debug!(
            eliminated = stats.eliminated_instructions,
            threaded = stats.threaded_jumps,
            scheduled = stats.scheduled_temps,
            "optimized method"
        );
    }

    let realized = il.realize()?;
    let marker_offset = |marker: &Marker| realized.marker_offsets[marker.0 as usize];
    debug_assert_eq!(yields.len(), resumes.len());
    let mut yield_offsets = Vec::with_capacity(yields.len());
    let mut resume_offsets = Vec::with_capacity(resumes.len());
    for (yield_point, resume_point) in yields.iter().zip(&resumes) {
        // An unreachable await loses its yield; its resume goes with it.
        let Some(yield_offset) = marker_offset(yield_point) else {
            continue;
        };
        let resume_offset = marker_offset(resume_point).ok_or(EmitError::UnresolvedResumePoint(resume_point.0))?;
        yield_offsets.push(yield_offset);
        resume_offsets.push(resume_offset);
    }
    let metadata = StateMachineMetadata {
        state_machine: lowered.state_machine.map(|info| info.class),
        yield_offsets,
        resume_offsets,
        async_catch_handler: async_catch.map(|label| realized.label_offsets[label.0 as usize]),
    };

    Ok(MethodBody {
        code: realized.code,
        max_stack: realized.max_stack,
        locals: realized.locals,
        sequence_points: realized.sequence_points,
        regions: realized.regions,
        state_machine: (!metadata.is_empty()).then_some(metadata),
    })
}

/// The kind of region code is being emitted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protected {
    Try,
    Catch,
    Finally,
}

/// Shared exit for returns from inside protected regions.
#[derive(Debug, Clone, Copy)]
struct ReturnTarget {
    label: Label,
    /// Holds the return value of non-void methods
    slot: Option<u16>,
}

struct CodeGenerator<'a> {
    table: &'a SymbolTable,
    strings: &'a StringPool,
    locals: &'a LocalTable,
    symbol: Arc<MethodSymbol>,
    options: EmitOptions,
    il: ILBuilder,
    slots: FxHashMap<LocalId, u16>,
    labels: FxHashMap<LabelId, Label>,
    protected: Vec<Protected>,
    indirect_return: Option<ReturnTarget>,
    yields: Vec<Marker>,
    resumes: Vec<Marker>,
    async_catch: Option<Label>,
}

impl CodeGenerator<'_> {
    fn emit_body(&mut self, body: &BoundBlock) -> Result<(), EmitError> {
        self.emit_block(body)?;
        if self.symbol.returns_void() && self.il.falls_through() {
            self.il.emit_with_effect(OpCode::Ret, Operand::None, 0);
        }
        if let Some(target) = self.indirect_return {
            self.il.mark_label(target.label);
            self.il.set_stack(0);
            match target.slot {
                Some(slot) => {
                    self.il.emit(OpCode::Ldloc, Operand::Index(slot));
                    self.il.emit_with_effect(OpCode::Ret, Operand::None, -1);
                }
                None => self.il.emit_with_effect(OpCode::Ret, Operand::None, 0),
            }
        }
        Ok(())
    }

    // ---
    // Locals and labels
    // ---

    fn has_this(&self) -> bool {
        !self.symbol.is_static
    }

    fn slot(&mut self, local: LocalId) -> Result<u16, EmitError> {
        if let Some(&slot) = self.slots.get(&local) {
            return Ok(slot);
        }
        let symbol = self.locals.get(local);
        let slot = if symbol.is_temp() {
            self.il.allocate_local(None, symbol.ty, self.options.optimize)?
        } else {
            self.il.allocate_local(Some(symbol.name.to_string()), symbol.ty, false)?
        };
        self.slots.insert(local, slot);
        Ok(slot)
    }

    /// Release the slots of temporaries going out of scope.
    fn free_scope(&mut self, locals: &[LocalId]) {
        if !self.options.optimize {
            return;
        }
        for &local in locals {
            if self.locals.get(local).is_temp() {
                if let Some(slot) = self.slots.remove(&local) {
                    self.il.free_local(slot);
                }
            }
        }
    }

    fn temp(&mut self, ty: TypeId) -> Result<u16, EmitError> {
        self.il.allocate_local(None, ty, self.options.optimize)
    }

    fn label(&mut self, id: LabelId) -> Label {
        if let Some(&label) = self.labels.get(&id) {
            return label;
        }
        let label = self.il.define_label();
        self.labels.insert(id, label);
        label
    }

    /// Unconditional jump; leaving a try or catch block goes through `leave`.
    fn jump(&mut self, label: Label) {
        let op = match self.protected.last() {
            Some(Protected::Try | Protected::Catch) => OpCode::Leave,
            _ => OpCode::Br,
        };
        self.il.emit_branch(op, label);
    }

    fn in_leavable_region(&self) -> bool {
        matches!(self.protected.last(), Some(Protected::Try | Protected::Catch))
    }

    // ---
    // Statements
    // ---

    fn emit_block(&mut self, block: &BoundBlock) -> Result<(), EmitError> {
        for stmt in &block.stmts {
            self.emit_stmt(stmt)?;
        }
        self.free_scope(&block.locals);
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &BoundStmt) -> Result<(), EmitError> {
        let start = self.il.len();
        let point = self.options.debug_info
            && !stmt.span.is_empty()
            && !matches!(stmt.kind, BoundStmtKind::Block(_) | BoundStmtKind::Label(_));
        if point {
            self.il.mark_sequence_point(stmt.span);
        }

        match &stmt.kind {
            BoundStmtKind::Block(block) => self.emit_block(block)?,
            BoundStmtKind::Expression(expr) => self.emit_expr(expr, false)?,
            BoundStmtKind::LocalDeclaration { local, init } => {
                if let Some(init) = init {
                    if self.locals.get(*local).kind != LocalKind::Const {
                        self.emit_expr(init, true)?;
                        let slot = self.slot(*local)?;
                        self.il.emit(OpCode::Stloc, Operand::Index(slot));
                    }
                }
            }
            BoundStmtKind::If { condition, then_branch, else_branch } => {
                let else_label = self.il.define_label();
                self.emit_condition(condition, false, else_label)?;
                self.emit_stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let end = self.il.define_label();
                        if self.il.falls_through() {
                            self.il.emit_branch(OpCode::Br, end);
                        }
                        self.il.mark_label(else_label);
                        self.il.set_stack(0);
                        self.emit_stmt(else_branch)?;
                        self.il.mark_label(end);
                    }
                    None => self.il.mark_label(else_label),
                }
                self.il.set_stack(0);
            }
            BoundStmtKind::Return(value) => self.emit_return(value.as_ref())?,
            BoundStmtKind::Throw(Some(value)) => {
                self.emit_expr(value, true)?;
                self.il.emit_op(OpCode::Throw);
            }
            BoundStmtKind::Throw(None) => self.il.emit_op(OpCode::Rethrow),
            BoundStmtKind::Try { block, catches, finally, is_async_catch } => {
                self.emit_try(block, catches, finally.as_ref(), *is_async_catch)?
            }
            BoundStmtKind::Label(id) => {
                let label = self.label(*id);
                self.il.mark_label(label);
                self.il.set_stack(0);
            }
            BoundStmtKind::Goto(id) => {
                let label = self.label(*id);
                self.jump(label);
            }
            BoundStmtKind::ConditionalGoto { condition, jump_if_true, label } => {
                let target = self.label(*label);
                if self.in_leavable_region() {
                    let skip = self.il.define_label();
                    self.emit_condition(condition, !jump_if_true, skip)?;
                    self.il.emit_branch(OpCode::Leave, target);
                    self.il.mark_label(skip);
                    self.il.set_stack(0);
                } else {
                    self.emit_condition(condition, *jump_if_true, target)?;
                }
            }
            BoundStmtKind::SwitchDispatch { value, targets } => {
                self.emit_expr(value, true)?;
                let labels = targets.iter().map(|&t| self.label(t)).collect();
                self.il.emit_switch(labels);
            }
            BoundStmtKind::AwaitYieldPoint => {
                let marker = self.il.add_marker();
                self.yields.push(marker);
            }
            BoundStmtKind::AwaitResumePoint => {
                let marker = self.il.add_marker();
                self.resumes.push(marker);
            }
            BoundStmtKind::NoOp => {}
            BoundStmtKind::While { .. }
            | BoundStmtKind::DoWhile { .. }
            | BoundStmtKind::For { .. }
            | BoundStmtKind::Foreach { .. }
            | BoundStmtKind::Match { .. }
            | BoundStmtKind::Break(_)
            | BoundStmtKind::Continue(_)
            | BoundStmtKind::YieldReturn(_)
            | BoundStmtKind::YieldBreak => {
                unreachable!("statement should have been lowered: {:?}", stmt.kind)
            }
        }

        if point && self.il.len() == start {
            if self.options.optimize {
                self.il.truncate_sequence_points(start);
            } else {
                self.il.emit_op(OpCode::Nop);
            }
        }
        Ok(())
    }

    fn emit_return(&mut self, value: Option<&BoundExpr>) -> Result<(), EmitError> {
        if let Some(value) = value {
            self.emit_expr(value, true)?;
        }
        if self.protected.is_empty() {
            let effect = if value.is_some() { -1 } else { 0 };
            self.il.emit_with_effect(OpCode::Ret, Operand::None, effect);
            return Ok(());
        }

        let target = match self.indirect_return {
            Some(target) => target,
            None => {
                let slot = match self.symbol.returns_void() {
                    true => None,
                    false => Some(self.temp(self.symbol.return_type)?),
                };
                let target = ReturnTarget {
                    label: self.il.define_label(),
                    slot,
                };
                self.indirect_return = Some(target);
                target
            }
        };
        if let (Some(slot), Some(_)) = (target.slot, value) {
            self.il.emit(OpCode::Stloc, Operand::Index(slot));
        }
        self.il.emit_branch(OpCode::Leave, target.label);
        Ok(())
    }

    fn emit_try(
        &mut self,
        block: &BoundBlock,
        catches: &[BoundCatch],
        finally: Option<&BoundBlock>,
        is_async_catch: bool,
    ) -> Result<(), EmitError> {
        let done = self.il.define_label();
        let try_start = self.il.mark_new_label();
        self.protected.push(Protected::Try);
        self.emit_block(block)?;
        if self.il.falls_through() {
            self.il.emit_branch(OpCode::Leave, done);
        }
        self.protected.pop();
        let try_end = self.il.mark_new_label();

        for catch in catches {
            let handler_start = self.il.mark_new_label();
            if is_async_catch {
                self.async_catch = Some(handler_start);
            }
            self.il.set_stack(1);
            self.protected.push(Protected::Catch);
            match catch.local {
                Some(local) => {
                    let slot = self.slot(local)?;
                    self.il.emit(OpCode::Stloc, Operand::Index(slot));
                }
                None => self.il.emit_op(OpCode::Pop),
            }
            self.emit_block(&catch.block)?;
            if self.il.falls_through() {
                self.il.emit_branch(OpCode::Leave, done);
            }
            self.protected.pop();
            let handler_end = self.il.mark_new_label();
            self.il.add_region(
                RegionKind::Catch(catch.exception_type),
                try_start,
                try_end,
                handler_start,
                handler_end,
            );
        }

        if let Some(finally) = finally {
            let handler_start = self.il.mark_new_label();
            self.il.set_stack(0);
            self.protected.push(Protected::Finally);
            self.emit_block(finally)?;
            self.protected.pop();
            self.il.emit_op(OpCode::Endfinally);
            let handler_end = self.il.mark_new_label();
            self.il.add_region(RegionKind::Finally, try_start, handler_start, handler_start, handler_end);
        }

        self.il.mark_label(done);
        self.il.set_stack(0);
        Ok(())
    }

    // ---
    // Conditions
    // ---

    /// Branch to `label` when `condition` evaluates to `jump_if_true`.
    fn emit_condition(&mut self, condition: &BoundExpr, jump_if_true: bool, label: Label) -> Result<(), EmitError> {
        if let Some(ConstantValue::Bool(value)) = condition.constant {
            if !is_effectful(condition) {
                if value == jump_if_true {
                    self.il.emit_branch(OpCode::Br, label);
                }
                return Ok(());
            }
        }

        match &condition.kind {
            BoundExprKind::Unary { op: UnaryOperator::LogicalNot, operand } => {
                self.emit_condition(operand, !jump_if_true, label)
            }
            BoundExprKind::Binary { op: BinaryOperator::LogicalAnd, left, right } => {
                if jump_if_true {
                    let skip = self.il.define_label();
                    self.emit_condition(left, false, skip)?;
                    self.emit_condition(right, true, label)?;
                    self.mark_merge(skip);
                } else {
                    self.emit_condition(left, false, label)?;
                    self.emit_condition(right, false, label)?;
                }
                Ok(())
            }
            BoundExprKind::Binary { op: BinaryOperator::LogicalOr, left, right } => {
                if jump_if_true {
                    self.emit_condition(left, true, label)?;
                    self.emit_condition(right, true, label)?;
                } else {
                    let skip = self.il.define_label();
                    self.emit_condition(left, true, skip)?;
                    self.emit_condition(right, false, label)?;
                    self.mark_merge(skip);
                }
                Ok(())
            }
            BoundExprKind::Binary { op, left, right } if op.is_comparison() => {
                let (compare, negated) = comparison(*op);
                self.emit_expr(left, true)?;
                self.emit_expr(right, true)?;
                self.il.emit_op(compare);
                self.branch_on(jump_if_true != negated, label);
                Ok(())
            }
            BoundExprKind::Sequence { locals, side_effects, value } => {
                for effect in side_effects {
                    self.emit_expr(effect, false)?;
                }
                self.emit_condition(value, jump_if_true, label)?;
                self.free_scope(locals);
                Ok(())
            }
            BoundExprKind::IsType { operand, target } => {
                self.emit_expr(operand, true)?;
                self.il.emit(OpCode::Isinst, Operand::Token(target.0));
                self.branch_on(jump_if_true, label);
                Ok(())
            }
            BoundExprKind::NullableHasValue(operand) => {
                self.emit_expr(operand, true)?;
                self.il.emit_op(OpCode::Ldnull);
                self.il.emit_op(OpCode::Ceq);
                self.branch_on(!jump_if_true, label);
                Ok(())
            }
            _ => {
                self.emit_expr(condition, true)?;
                self.branch_on(jump_if_true, label);
                Ok(())
            }
        }
    }

    fn branch_on(&mut self, when_true: bool, label: Label) {
        let op = if when_true { OpCode::Brtrue } else { OpCode::Brfalse };
        self.il.emit_branch(op, label);
    }

    /// Mark a label reached only by conditional branches from here.
    fn mark_merge(&mut self, label: Label) {
        let depth = self.il.stack();
        self.il.mark_label(label);
        self.il.set_stack(depth);
    }

    // ---
    // Expressions
    // ---

    fn emit_expr(&mut self, expr: &BoundExpr, used: bool) -> Result<(), EmitError> {
        if let Some(constant) = &expr.constant {
            if !is_effectful(expr) && self.has_constant_form(constant, expr.ty) {
                if used {
                    self.emit_constant(constant, expr.ty);
                }
                return Ok(());
            }
        }

        match &expr.kind {
            BoundExprKind::Local(_)
            | BoundExprKind::Parameter(_)
            | BoundExprKind::This
            | BoundExprKind::BaseReference
            | BoundExprKind::Literal(_)
            | BoundExprKind::DefaultValue
                if !used => {}
            BoundExprKind::Call { receiver, method, args, ref_kinds, is_virtual } => {
                self.emit_call(receiver.as_deref(), *method, args, ref_kinds, *is_virtual, used)?
            }
            BoundExprKind::ObjectCreation { constructor, args, ref_kinds } => {
                self.emit_args(args, ref_kinds)?;
                self.il
                    .emit_with_effect(OpCode::Newobj, Operand::Token(constructor.0), 1 - args.len() as i32);
                self.pop_unless(used);
            }
            BoundExprKind::DelegateInvoke { delegate, args } => {
                self.emit_expr(delegate, true)?;
                for arg in args {
                    self.emit_expr(arg, true)?;
                }
                let pushes = (expr.ty != TypeId::VOID) as i32;
                self.il.emit_with_effect(
                    OpCode::Invokedelegate,
                    Operand::Index(args.len() as u16),
                    pushes - 1 - args.len() as i32,
                );
                if pushes == 1 {
                    self.pop_unless(used);
                }
            }
            BoundExprKind::Assignment { target, value } => self.emit_assignment(target, value, used)?,
            BoundExprKind::Sequence { locals, side_effects, value } => {
                for effect in side_effects {
                    self.emit_expr(effect, false)?;
                }
                self.emit_expr(value, used)?;
                self.free_scope(locals);
            }
            BoundExprKind::Conditional { condition, when_true, when_false } => {
                let depth = self.il.stack();
                let else_label = self.il.define_label();
                let end = self.il.define_label();
                self.emit_condition(condition, false, else_label)?;
                self.emit_expr(when_true, used)?;
                self.il.emit_branch(OpCode::Br, end);
                self.il.mark_label(else_label);
                self.il.set_stack(depth);
                self.emit_expr(when_false, used)?;
                self.il.mark_label(end);
                self.il.set_stack(depth + used as i32);
            }
            _ => {
                self.emit_value(expr)?;
                self.pop_unless(used);
            }
        }
        Ok(())
    }

    fn pop_unless(&mut self, used: bool) {
        if !used {
            self.il.emit_op(OpCode::Pop);
        }
    }

    /// Push the value of an expression with no special unused form.
    fn emit_value(&mut self, expr: &BoundExpr) -> Result<(), EmitError> {
        match &expr.kind {
            BoundExprKind::Literal(value) => self.emit_constant(value, expr.ty),
            BoundExprKind::Local(local) => {
                let locals = self.locals;
                let symbol = locals.get(*local);
                match (&symbol.kind, &symbol.constant) {
                    (LocalKind::Const, Some(value)) => self.emit_constant(value, expr.ty),
                    _ => {
                        let slot = self.slot(*local)?;
                        self.il.emit(OpCode::Ldloc, Operand::Index(slot));
                    }
                }
            }
            BoundExprKind::Parameter(index) => {
                let by_ref = self.param_ref_kind(*index).is_by_ref();
                self.il.emit(OpCode::Ldarg, Operand::Index(self.arg_index(*index)));
                if by_ref {
                    self.il.emit_op(OpCode::Ldind);
                }
            }
            BoundExprKind::This | BoundExprKind::BaseReference => {
                self.il.emit(OpCode::Ldarg, Operand::Index(0));
            }
            BoundExprKind::DefaultValue => self.emit_default(expr.ty),
            BoundExprKind::Field { receiver, field } => self.emit_field_load(receiver.as_deref(), *field)?,
            BoundExprKind::DelegateCreation { method, receiver } => {
                match receiver {
                    Some(receiver) => self.emit_expr(receiver, true)?,
                    None => self.il.emit_op(OpCode::Ldnull),
                }
                self.il.emit(OpCode::Ldftn, Operand::Token(method.0));
                self.il.emit(OpCode::Newdelegate, Operand::Token(expr.ty.0));
            }
            BoundExprKind::Unary { op, operand } => {
                self.emit_expr(operand, true)?;
                match op {
                    UnaryOperator::Negate => self.il.emit_op(OpCode::Neg),
                    UnaryOperator::BitwiseNot => self.il.emit_op(OpCode::Not),
                    UnaryOperator::LogicalNot => self.emit_logical_not(),
                }
            }
            BoundExprKind::Binary { op, left, right } => self.emit_binary(expr, *op, left, right)?,
            BoundExprKind::Conversion { operand, kind } => self.emit_conversion(operand, *kind, expr.ty)?,
            BoundExprKind::IsType { operand, target } => {
                self.emit_expr(operand, true)?;
                self.il.emit(OpCode::Isinst, Operand::Token(target.0));
                self.il.emit_op(OpCode::Ldnull);
                self.il.emit_op(OpCode::Ceq);
                self.emit_logical_not();
            }
            BoundExprKind::AsType { operand, target } => {
                self.emit_expr(operand, true)?;
                self.il.emit(OpCode::Isinst, Operand::Token(target.0));
            }
            BoundExprKind::NullableHasValue(operand) => {
                self.emit_expr(operand, true)?;
                self.il.emit_op(OpCode::Ldnull);
                self.il.emit_op(OpCode::Ceq);
                self.emit_logical_not();
            }
            BoundExprKind::NullableValueOrDefault(operand) => {
                self.emit_expr(operand, true)?;
                let has_value = self.il.define_label();
                self.il.emit_op(OpCode::Dup);
                self.il.emit_op(OpCode::Ldnull);
                self.il.emit_op(OpCode::Ceq);
                self.il.emit_branch(OpCode::Brfalse, has_value);
                self.il.emit_op(OpCode::Pop);
                self.emit_default(expr.ty);
                self.il.mark_label(has_value);
            }
            BoundExprKind::Call { .. }
            | BoundExprKind::ObjectCreation { .. }
            | BoundExprKind::DelegateInvoke { .. }
            | BoundExprKind::Assignment { .. }
            | BoundExprKind::Sequence { .. }
            | BoundExprKind::Conditional { .. } => self.emit_expr(expr, true)?,
            BoundExprKind::Bad(_) => unreachable!("erroneous expression reached code generation"),
            BoundExprKind::Property { .. }
            | BoundExprKind::Lambda(_)
            | BoundExprKind::IncrementDecrement { .. }
            | BoundExprKind::CompoundAssignment { .. }
            | BoundExprKind::NullCoalescing { .. }
            | BoundExprKind::ConditionalAccess { .. }
            | BoundExprKind::ConditionalReceiver
            | BoundExprKind::IsPattern { .. }
            | BoundExprKind::Await(_) => {
                unreachable!("expression should have been lowered: {:?}", expr.kind)
            }
        }
        Ok(())
    }

    fn emit_logical_not(&mut self) {
        self.il.emit_op(OpCode::LdcFalse);
        self.il.emit_op(OpCode::Ceq);
    }

    fn emit_binary(
        &mut self,
        expr: &BoundExpr,
        op: BinaryOperator,
        left: &BoundExpr,
        right: &BoundExpr,
    ) -> Result<(), EmitError> {
        match op {
            BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr => {
                if self.options.optimize && right.is_trivial() {
                    self.emit_expr(left, true)?;
                    self.emit_expr(right, true)?;
                    let bitwise = if op == BinaryOperator::LogicalAnd { OpCode::And } else { OpCode::Or };
                    self.il.emit_op(bitwise);
                    return Ok(());
                }
                let depth = self.il.stack();
                let when_false = self.il.define_label();
                let end = self.il.define_label();
                self.emit_condition(expr, false, when_false)?;
                self.il.emit_op(OpCode::LdcTrue);
                self.il.emit_branch(OpCode::Br, end);
                self.il.mark_label(when_false);
                self.il.set_stack(depth);
                self.il.emit_op(OpCode::LdcFalse);
                self.il.mark_label(end);
                self.il.set_stack(depth + 1);
            }
            op if op.is_comparison() => {
                let (compare, negated) = comparison(op);
                self.emit_expr(left, true)?;
                self.emit_expr(right, true)?;
                self.il.emit_op(compare);
                if negated {
                    self.emit_logical_not();
                }
            }
            BinaryOperator::StringConcat => {
                unreachable!("string concatenation should have been lowered")
            }
            op => {
                self.emit_expr(left, true)?;
                self.emit_expr(right, true)?;
                self.il.emit_op(arithmetic(op));
            }
        }
        Ok(())
    }

    // ---
    // Calls
    // ---

    fn emit_call(
        &mut self,
        receiver: Option<&BoundExpr>,
        method: MethodId,
        args: &[BoundExpr],
        ref_kinds: &[RefKind],
        is_virtual: bool,
        used: bool,
    ) -> Result<(), EmitError> {
        let symbol = self.table.method(method);
        let has_this = !symbol.is_static;
        match receiver {
            Some(receiver) if has_this => self.emit_expr(receiver, true)?,
            Some(receiver) => self.emit_expr(receiver, false)?,
            None if has_this => self.il.emit(OpCode::Ldarg, Operand::Index(0)),
            None => {}
        }
        self.emit_args(args, ref_kinds)?;

        let pops = args.len() as i32 + has_this as i32;
        let pushes = !symbol.returns_void() as i32;
        let op = if is_virtual { OpCode::Callvirt } else { OpCode::Call };
        self.il.emit_with_effect(op, Operand::Token(method.0), pushes - pops);
        if pushes == 1 {
            self.pop_unless(used);
        }
        Ok(())
    }

    fn emit_args(&mut self, args: &[BoundExpr], ref_kinds: &[RefKind]) -> Result<(), EmitError> {
        for (i, arg) in args.iter().enumerate() {
            let by_ref = ref_kinds.get(i).is_some_and(|k| k.is_by_ref());
            if by_ref {
                self.emit_address(arg)?;
            } else {
                self.emit_expr(arg, true)?;
            }
        }
        Ok(())
    }

    /// Push a managed reference to a storage location.
    fn emit_address(&mut self, expr: &BoundExpr) -> Result<(), EmitError> {
        match &expr.kind {
            BoundExprKind::Local(local) => {
                let slot = self.slot(*local)?;
                self.il.emit(OpCode::Ldloca, Operand::Index(slot));
            }
            BoundExprKind::Parameter(index) => {
                let op = if self.param_ref_kind(*index).is_by_ref() { OpCode::Ldarg } else { OpCode::Ldarga };
                self.il.emit(op, Operand::Index(self.arg_index(*index)));
            }
            BoundExprKind::Field { receiver, field } => {
                let symbol = self.table.field(*field);
                if symbol.is_static {
                    self.il.emit(OpCode::Ldsflda, Operand::Token(field.0));
                } else {
                    self.emit_receiver(receiver.as_deref())?;
                    self.il.emit(OpCode::Ldflda, Operand::Token(field.0));
                }
            }
            _ => {
                self.emit_expr(expr, true)?;
                let slot = self.temp(expr.ty)?;
                self.il.emit(OpCode::Stloc, Operand::Index(slot));
                self.il.emit(OpCode::Ldloca, Operand::Index(slot));
            }
        }
        Ok(())
    }

    fn emit_receiver(&mut self, receiver: Option<&BoundExpr>) -> Result<(), EmitError> {
        match receiver {
            Some(receiver) => self.emit_expr(receiver, true),
            None => {
                self.il.emit(OpCode::Ldarg, Operand::Index(0));
                Ok(())
            }
        }
    }

    fn arg_index(&self, param: u16) -> u16 {
        param + self.has_this() as u16
    }

    fn param_ref_kind(&self, param: u16) -> RefKind {
        self.symbol
            .params
            .get(param as usize)
            .map_or(RefKind::None, |p| p.ref_kind)
    }

    // ---
    // Fields and assignment
    // ---

    fn emit_field_load(&mut self, receiver: Option<&BoundExpr>, field: FieldId) -> Result<(), EmitError> {
        let symbol = self.table.field(field);
        if symbol.is_const {
            if let Some(value) = &symbol.constant {
                self.emit_constant(value, symbol.ty);
                return Ok(());
            }
        }
        if symbol.is_static {
            if let Some(receiver) = receiver {
                self.emit_expr(receiver, false)?;
            }
            self.il.emit(OpCode::Ldsfld, Operand::Token(field.0));
        } else {
            self.emit_receiver(receiver)?;
            self.il.emit(OpCode::Ldfld, Operand::Token(field.0));
        }
        Ok(())
    }

    fn emit_assignment(&mut self, target: &BoundExpr, value: &BoundExpr, used: bool) -> Result<(), EmitError> {
        match &target.kind {
            BoundExprKind::Local(local) => {
                self.emit_expr(value, true)?;
                if used {
                    self.il.emit_op(OpCode::Dup);
                }
                let slot = self.slot(*local)?;
                self.il.emit(OpCode::Stloc, Operand::Index(slot));
            }
            BoundExprKind::Parameter(index) if self.param_ref_kind(*index).is_by_ref() => {
                self.il.emit(OpCode::Ldarg, Operand::Index(self.arg_index(*index)));
                self.emit_expr(value, true)?;
                self.store_keeping_value(OpCode::Stind, Operand::None, value.ty, used)?;
            }
            BoundExprKind::Parameter(index) => {
                self.emit_expr(value, true)?;
                if used {
                    self.il.emit_op(OpCode::Dup);
                }
                self.il.emit(OpCode::Starg, Operand::Index(self.arg_index(*index)));
            }
            BoundExprKind::Field { receiver, field } => {
                let symbol = self.table.field(*field);
                if symbol.is_static {
                    self.emit_expr(value, true)?;
                    if used {
                        self.il.emit_op(OpCode::Dup);
                    }
                    self.il.emit(OpCode::Stsfld, Operand::Token(field.0));
                } else {
                    self.emit_receiver(receiver.as_deref())?;
                    self.emit_expr(value, true)?;
                    self.store_keeping_value(OpCode::Stfld, Operand::Token(field.0), value.ty, used)?;
                }
            }
            _ => unreachable!("assignment to a non-variable: {:?}", target.kind),
        }
        Ok(())
    }

    /// Store through an address already on the stack, leaving the stored
    /// value behind when `used`.
    fn store_keeping_value(&mut self, op: OpCode, operand: Operand, ty: TypeId, used: bool) -> Result<(), EmitError> {
        if !used {
            self.il.emit(op, operand);
            return Ok(());
        }
        let temp = self.temp(ty)?;
        self.il.emit_op(OpCode::Dup);
        self.il.emit(OpCode::Stloc, Operand::Index(temp));
        self.il.emit(op, operand);
        self.il.emit(OpCode::Ldloc, Operand::Index(temp));
        self.il.free_local(temp);
        Ok(())
    }

    // ---
    // Conversions
    // ---

    fn emit_conversion(&mut self, operand: &BoundExpr, kind: ConversionKind, target: TypeId) -> Result<(), EmitError> {
        self.emit_expr(operand, true)?;
        let table = self.table;
        let types = &table.types;
        match kind {
            ConversionKind::Identity | ConversionKind::ImplicitReference | ConversionKind::NullLiteral => {}
            ConversionKind::ImplicitNumeric | ConversionKind::ExplicitNumeric => self.emit_numeric_conv(target),
            ConversionKind::ExplicitEnum => {
                if table.is_enum_type(target) {
                    self.il.emit_op(OpCode::ConvI4);
                } else {
                    self.emit_numeric_conv(target);
                }
            }
            ConversionKind::Boxing => self.il.emit(OpCode::Box, Operand::Token(operand.ty.0)),
            ConversionKind::Unboxing => self.il.emit(OpCode::UnboxAny, Operand::Token(target.0)),
            ConversionKind::ExplicitReference => self.il.emit(OpCode::Castclass, Operand::Token(target.0)),
            ConversionKind::ImplicitNullable => {
                let target_underlying = types.nullable_underlying(target).unwrap_or(target);
                match types.nullable_underlying(operand.ty) {
                    Some(source) if source != target_underlying => {
                        // Lifted: null stays null
                        let is_null = self.il.define_label();
                        self.il.emit_op(OpCode::Dup);
                        self.il.emit_op(OpCode::Ldnull);
                        self.il.emit_op(OpCode::Ceq);
                        self.il.emit_branch(OpCode::Brtrue, is_null);
                        self.emit_numeric_conv(target_underlying);
                        self.il.mark_label(is_null);
                    }
                    Some(_) => {}
                    None if operand.ty != target_underlying && operand.ty != TypeId::NULL => {
                        self.emit_numeric_conv(target_underlying)
                    }
                    None => {}
                }
            }
            ConversionKind::ExplicitNullable => match types.nullable_underlying(operand.ty) {
                Some(source) => {
                    self.il.emit(OpCode::UnboxAny, Operand::Token(source.0));
                    let target_underlying = types.nullable_underlying(target).unwrap_or(target);
                    if target_underlying != source {
                        self.emit_numeric_conv(target_underlying);
                    }
                }
                None => {
                    let target_underlying = types.nullable_underlying(target).unwrap_or(target);
                    if target_underlying != operand.ty {
                        self.emit_numeric_conv(target_underlying);
                    }
                }
            },
            ConversionKind::None => unreachable!("conversion that does not exist"),
        }
        Ok(())
    }

    fn emit_numeric_conv(&mut self, target: TypeId) {
        if let Some(primitive) = self.table.types.primitive(target) {
            self.il.emit_op(conv_op(primitive));
        } else if self.table.is_enum_type(target) {
            self.il.emit_op(OpCode::ConvI4);
        }
    }

    // ---
    // Constants
    // ---

    /// Whether a constant of type `ty` has a direct load sequence. Boxed
    /// constants are built by their conversion instead.
    fn has_constant_form(&self, value: &ConstantValue, ty: TypeId) -> bool {
        match value {
            ConstantValue::Null | ConstantValue::String(_) => true,
            _ => {
                let ty = self.table.types.nullable_underlying(ty).unwrap_or(ty);
                self.table.types.primitive(ty).is_some() || self.table.is_enum_type(ty)
            }
        }
    }

    fn emit_constant(&mut self, value: &ConstantValue, ty: TypeId) {
        let ty = self.table.types.nullable_underlying(ty).unwrap_or(ty);
        match value {
            ConstantValue::Null => self.il.emit_op(OpCode::Ldnull),
            ConstantValue::Bool(true) => self.il.emit_op(OpCode::LdcTrue),
            ConstantValue::Bool(false) => self.il.emit_op(OpCode::LdcFalse),
            ConstantValue::String(text) => {
                let index = self.strings.intern(text);
                self.il.emit(OpCode::Ldstr, Operand::Token(index));
            }
            _ => {
                let primitive = match self.table.types.primitive(ty) {
                    Some(p) => p,
                    None if self.table.is_enum_type(ty) => PrimitiveType::Int,
                    None => natural_type(value),
                };
                self.emit_numeric_constant(value, primitive);
            }
        }
    }

    fn emit_numeric_constant(&mut self, value: &ConstantValue, primitive: PrimitiveType) {
        let bits = integral_bits(value);
        let real = value.as_f64().unwrap_or(0.0);
        match primitive {
            PrimitiveType::Int => self.il.emit(OpCode::LdcI4, Operand::Int32(bits as i32)),
            PrimitiveType::Long => self.il.emit(OpCode::LdcI8, Operand::Int64(bits)),
            PrimitiveType::ULong => {
                self.il.emit(OpCode::LdcI8, Operand::Int64(bits));
                self.il.emit_op(OpCode::ConvU8);
            }
            PrimitiveType::Float => self.il.emit(OpCode::LdcR4, Operand::Float32(real as f32)),
            PrimitiveType::Double => self.il.emit(OpCode::LdcR8, Operand::Float64(real)),
            PrimitiveType::Decimal => {
                self.il.emit(OpCode::LdcR8, Operand::Float64(real));
                self.il.emit_op(OpCode::ConvDec);
            }
            PrimitiveType::Bool => {
                let op = if bits != 0 { OpCode::LdcTrue } else { OpCode::LdcFalse };
                self.il.emit_op(op);
            }
            small => {
                self.il.emit(OpCode::LdcI4, Operand::Int32(bits as i32));
                self.il.emit_op(conv_op(small));
            }
        }
    }

    fn emit_default(&mut self, ty: TypeId) {
        match self.table.ty(ty) {
            Ty::Primitive(primitive) => {
                let zero = match primitive {
                    PrimitiveType::Bool => ConstantValue::Bool(false),
                    PrimitiveType::Char => ConstantValue::Char('\0'),
                    PrimitiveType::Float => ConstantValue::Float(0.0),
                    PrimitiveType::Double => ConstantValue::Double(0.0),
                    PrimitiveType::Decimal => ConstantValue::Decimal(0.0),
                    p if p.is_unsigned() => ConstantValue::UInt(0),
                    _ => ConstantValue::Int(0),
                };
                self.emit_constant(&zero, ty);
            }
            Ty::Class(_) if self.table.is_enum_type(ty) => self.il.emit(OpCode::LdcI4, Operand::Int32(0)),
            _ => self.il.emit_op(OpCode::Ldnull),
        }
    }
}

/// Expressions whose constant value still needs their evaluation.
fn is_effectful(expr: &BoundExpr) -> bool {
    matches!(
        expr.kind,
        BoundExprKind::Assignment { .. }
            | BoundExprKind::Call { .. }
            | BoundExprKind::Sequence { .. }
            | BoundExprKind::ObjectCreation { .. }
            | BoundExprKind::DelegateInvoke { .. }
    )
}

/// The compare instruction for an operator and whether its result is negated.
///
/// `<=` and `>=` are emitted as the negation of `>` and `<`, so comparisons
/// involving NaN yield true for them.
fn comparison(op: BinaryOperator) -> (OpCode, bool) {
    match op {
        BinaryOperator::Eq => (OpCode::Ceq, false),
        BinaryOperator::Ne => (OpCode::Ceq, true),
        BinaryOperator::Lt => (OpCode::Clt, false),
        BinaryOperator::Gt => (OpCode::Cgt, false),
        BinaryOperator::Le => (OpCode::Cgt, true),
        BinaryOperator::Ge => (OpCode::Clt, true),
        _ => unreachable!("not a comparison: {:?}", op),
    }
}

fn arithmetic(op: BinaryOperator) -> OpCode {
    match op {
        BinaryOperator::Add => OpCode::Add,
        BinaryOperator::Sub => OpCode::Sub,
        BinaryOperator::Mul => OpCode::Mul,
        BinaryOperator::Div => OpCode::Div,
        BinaryOperator::Rem => OpCode::Rem,
        BinaryOperator::And => OpCode::And,
        BinaryOperator::Or => OpCode::Or,
        BinaryOperator::Xor => OpCode::Xor,
        BinaryOperator::Shl => OpCode::Shl,
        BinaryOperator::Shr => OpCode::Shr,
        _ => unreachable!("not an arithmetic operator: {:?}", op),
    }
}

pub(crate) fn conv_op(primitive: PrimitiveType) -> OpCode {
    match primitive {
        PrimitiveType::Bool => OpCode::ConvBool,
        PrimitiveType::Char => OpCode::ConvChar,
        PrimitiveType::SByte => OpCode::ConvI1,
        PrimitiveType::Byte => OpCode::ConvU1,
        PrimitiveType::Short => OpCode::ConvI2,
        PrimitiveType::UShort => OpCode::ConvU2,
        PrimitiveType::Int => OpCode::ConvI4,
        PrimitiveType::UInt => OpCode::ConvU4,
        PrimitiveType::Long => OpCode::ConvI8,
        PrimitiveType::ULong => OpCode::ConvU8,
        PrimitiveType::Float => OpCode::ConvR4,
        PrimitiveType::Double => OpCode::ConvR8,
        PrimitiveType::Decimal => OpCode::ConvDec,
    }
}

fn natural_type(value: &ConstantValue) -> PrimitiveType {
    match *value {
        ConstantValue::Char(_) => PrimitiveType::Char,
        ConstantValue::Int(v) if i32::try_from(v).is_ok() => PrimitiveType::Int,
        ConstantValue::Int(_) => PrimitiveType::Long,
        ConstantValue::UInt(v) if u32::try_from(v).is_ok() => PrimitiveType::UInt,
        ConstantValue::UInt(_) => PrimitiveType::ULong,
        ConstantValue::Float(_) => PrimitiveType::Float,
        ConstantValue::Decimal(_) => PrimitiveType::Decimal,
        _ => PrimitiveType::Double,
    }
}

/// Two's complement bits of an integral constant; reals truncate.
fn integral_bits(value: &ConstantValue) -> i64 {
    value
        .as_i64()
        .unwrap_or_else(|| value.as_f64().unwrap_or(0.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::Instruction;
    use sable_binder::{analyze_flow, bind_method, bind_type_initializers, declare_program};
    use sable_lowering::{rewrite_async, rewrite_await_in_handlers, rewrite_iterator, rewrite_lambdas, rewrite_locals, SynthesizedMembers};
    use sable_parser::parse_compilation_unit;

    /// Bind and lower the method called `name`.
    fn lower(source: &str, name: &str) -> (SymbolTable, LoweredMethod) {
        let (table, lowered, _) = lower_with_members(source, name);
        (table, lowered)
    }

    /// Lower the async method `name` and return its `MoveNext`.
    fn lower_move_next(source: &str, name: &str) -> (SymbolTable, LoweredMethod) {
        let (table, _, mut synthesized) = lower_with_members(source, name);
        let move_next = synthesized
            .take_methods()
            .into_iter()
            .find(|m| &*table.method(m.method).name == "MoveNext")
            .expect("MoveNext body");
        let method = rewrite_await_in_handlers(&table, move_next);
        let method = rewrite_lambdas(&table, method, &mut synthesized);
        let method = rewrite_iterator(&table, method, &mut synthesized);
        let lowered = rewrite_async(&table, method, &mut synthesized);
        (table, lowered)
    }

    fn lower_with_members(source: &str, name: &str) -> (SymbolTable, LoweredMethod, SynthesizedMembers) {
        let table = SymbolTable::new();
        let (unit, errors) = parse_compilation_unit(source, 0);
        assert!(errors.is_empty(), "{:?}", errors);
        let units = vec![unit];
        let lowered = {
            let program = declare_program(&table, &units);
            let mut found = None;
            for declared in &program.types {
                let inits = bind_type_initializers(&program, declared.class);
                for &m in &table.class(declared.class).methods {
                    if &*table.method(m).name != name {
                        continue;
                    }
                    let result = bind_method(&program, m, &inits).expect("method has a body");
                    assert!(!result.diagnostics.has_errors(), "{:?}", result.diagnostics);
                    assert!(!analyze_flow(&table, &result.method).has_errors());
                    found = Some(result.method);
                }
            }
            let bound = found.unwrap_or_else(|| panic!("no method {}", name));
            let mut synthesized = SynthesizedMembers::new();
            let method = rewrite_locals(&table, bound, &mut synthesized);
            let method = rewrite_await_in_handlers(&table, method);
            let method = rewrite_lambdas(&table, method, &mut synthesized);
            let method = rewrite_iterator(&table, method, &mut synthesized);
            (rewrite_async(&table, method, &mut synthesized), synthesized)
        };
        (table, lowered.0, lowered.1)
    }

    fn generate(source: &str, name: &str, options: EmitOptions) -> (MethodBody, StringPool) {
        let (table, lowered) = lower(source, name);
        let strings = StringPool::new();
        let body = generate_method(&table, &strings, &lowered, options).unwrap();
        (body, strings)
    }

    fn instructions(body: &MethodBody) -> Vec<Instruction> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < body.code.len() {
            let (instr, next) = Instruction::decode(&body.code, offset).unwrap();
            out.push(instr);
            offset = next;
        }
        out
    }

    fn ops(body: &MethodBody) -> Vec<OpCode> {
        instructions(body).into_iter().map(|i| i.op).collect()
    }

    #[test]
    fn test_arithmetic_on_parameters() {
        let (body, _) = generate(
            "class P { static int Add(int a, int b) { return a + b; } }",
            "Add",
            EmitOptions::default(),
        );
        assert_eq!(ops(&body), vec![OpCode::Ldarg, OpCode::Ldarg, OpCode::Add, OpCode::Ret]);
        assert_eq!(body.max_stack, 2);
        assert_eq!(body.sequence_points.len(), 1);
    }

    #[test]
    fn test_instance_arguments_skip_this() {
        let (body, _) = generate(
            "class P { int F(int a) { return a; } }",
            "F",
            EmitOptions::default(),
        );
        assert_eq!(instructions(&body)[0], Instruction::new(OpCode::Ldarg, Operand::Index(1)));
    }

    #[test]
    fn test_void_method_gets_ret() {
        let (body, _) = generate("class P { static void F() { } }", "F", EmitOptions::default());
        assert_eq!(ops(&body).last(), Some(&OpCode::Ret));
    }

    #[test]
    fn test_constant_forms() {
        let (body, _) = generate("class P { static long F() { return 5L; } }", "F", EmitOptions::default());
        assert_eq!(instructions(&body)[0], Instruction::new(OpCode::LdcI8, Operand::Int64(5)));

        let (body, _) = generate("class P { static uint F() { return 4000000000; } }", "F", EmitOptions::default());
        assert_eq!(ops(&body)[..2], [OpCode::LdcI4, OpCode::ConvU4]);

        let (body, strings) = generate("class P { static string F() { return \"hi\"; } }", "F", EmitOptions::default());
        assert_eq!(instructions(&body)[0], Instruction::new(OpCode::Ldstr, Operand::Token(0)));
        assert_eq!(strings.get(0).as_deref(), Some("hi"));
    }

    #[test]
    fn test_short_circuit_condition_branches() {
        let (body, _) = generate(
            "class P { static int F(bool a, bool b) { if (a && b) return 1; return 0; } }",
            "F",
            EmitOptions::default(),
        );
        let ops = ops(&body);
        assert_eq!(ops.iter().filter(|&&op| op == OpCode::Brfalse).count(), 2);
        assert!(!ops.contains(&OpCode::And));
    }

    #[test]
    fn test_less_or_equal_is_negated_greater() {
        let (body, _) = generate(
            "class P { static bool F(int a, int b) { return a <= b; } }",
            "F",
            EmitOptions::default(),
        );
        assert_eq!(
            ops(&body),
            vec![OpCode::Ldarg, OpCode::Ldarg, OpCode::Cgt, OpCode::LdcFalse, OpCode::Ceq, OpCode::Ret]
        );
    }

    #[test]
    fn test_try_finally_regions() {
        let (body, _) = generate(
            "using System; class P { static void F() { try { Console.WriteLine(\"a\"); } finally { Console.WriteLine(\"b\"); } } }",
            "F",
            EmitOptions::default(),
        );
        let ops = ops(&body);
        assert!(ops.contains(&OpCode::Leave));
        assert!(ops.contains(&OpCode::Endfinally));
        assert_eq!(body.regions.len(), 1);
        let region = body.regions[0];
        assert_eq!(region.kind, RegionKind::Finally);
        assert_eq!(region.try_end, region.handler_start);
    }

    #[test]
    fn test_catch_region_precedes_finally() {
        let (body, _) = generate(
            "using System; class P { static void F() { try { Console.WriteLine(1); } catch (Exception e) { Console.WriteLine(e.Message); } finally { Console.WriteLine(2); } } }",
            "F",
            EmitOptions::default(),
        );
        assert_eq!(body.regions.len(), 2);
        assert!(matches!(body.regions[0].kind, RegionKind::Catch(_)));
        assert_eq!(body.regions[1].kind, RegionKind::Finally);
        assert!(body.regions[1].try_end >= body.regions[0].handler_end);
    }

    #[test]
    fn test_return_inside_try_uses_shared_epilogue() {
        let (body, _) = generate(
            "using System; class P { static int F(int x) { try { return x; } finally { Console.WriteLine(x); } } }",
            "F",
            EmitOptions::default(),
        );
        let ops = ops(&body);
        assert_eq!(ops[ops.len() - 2..], [OpCode::Ldloc, OpCode::Ret]);
        assert_eq!(ops.iter().filter(|&&op| op == OpCode::Ret).count(), 1);
        assert!(body.locals.iter().any(|l| l.name.is_none()));
    }

    #[test]
    fn test_release_drops_sequence_points() {
        let source = "class P { static int F(int x) { int y = x * 2; return y; } }";
        let (debug, _) = generate(source, "F", EmitOptions::default());
        let (release, _) = generate(source, "F", EmitOptions::release());
        assert!(!debug.sequence_points.is_empty());
        assert!(release.sequence_points.is_empty());
        assert_eq!(debug.locals[0].name.as_deref(), Some("y"));
    }

    #[test]
    fn test_boxing_uses_source_type() {
        let (body, _) = generate(
            "class P { static object F(int x) { return x; } }",
            "F",
            EmitOptions::default(),
        );
        let box_instr = instructions(&body)
            .into_iter()
            .find(|i| i.op == OpCode::Box)
            .expect("box instruction");
        assert_eq!(box_instr.operand, Operand::Token(TypeId::INT.0));
    }

    #[test]
    fn test_async_method_records_state_machine() {
        let source = "using System.Threading.Tasks; class P { static async Task<int> F() { await Task.Yield(); return 1; } }";
        let (table, kickoff) = lower(source, "F");
        let info = kickoff.state_machine.expect("state machine");
        let strings = StringPool::new();
        let body = generate_method(&table, &strings, &kickoff, EmitOptions::default()).unwrap();
        assert_eq!(body.state_machine.and_then(|m| m.state_machine), Some(info.class));
    }

    #[test]
    fn test_empty_statement_nop_only_in_debug() {
        let source = "class P { static void F() { ; } }";
        let (debug, _) = generate(source, "F", EmitOptions::default());
        let (release, _) = generate(source, "F", EmitOptions::release());
        assert_eq!(ops(&debug), vec![OpCode::Nop, OpCode::Ret]);
        assert_eq!(ops(&release), vec![OpCode::Ret]);
    }

    #[test]
    fn test_unreachable_await_drops_whole_resume_pair() {
        let source = "using System.Threading.Tasks; class P { static async Task F(Task t) { await t; return; await t; } }";
        let strings = StringPool::new();

        let (table, move_next) = lower_move_next(source, "F");
        let debug = generate_method(&table, &strings, &move_next, EmitOptions::default()).unwrap();
        let debug = debug.state_machine.expect("state machine metadata");
        assert_eq!(debug.yield_offsets.len(), 2);
        assert_eq!(debug.resume_offsets.len(), 2);

        let (table, move_next) = lower_move_next(source, "F");
        let release = generate_method(&table, &strings, &move_next, EmitOptions::release()).unwrap();
        let release = release.state_machine.expect("state machine metadata");
        assert_eq!(release.yield_offsets.len(), 1);
        assert_eq!(release.resume_offsets.len(), release.yield_offsets.len());
        assert!(release.yield_offsets[0] < release.resume_offsets[0]);
    }
}
