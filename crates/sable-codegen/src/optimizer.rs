//! Optimizations over the instruction list of a method under construction.
//!
//! Passes run before realization, so removing an instruction only has to
//! keep labels, regions and markers consistent (see [`ILBuilder::retain`]).

use rustc_hash::FxHashMap;

use crate::builder::ILBuilder;
use crate::opcodes::{Label, OpCode, Operand};

// ---
// Optimizer Configuration
// ---

/// Configuration for the optimizer.
#[derive(Debug, Clone)]
pub struct OptConfig {
    /// Remove instructions no path reaches
    pub dead_code_elimination: bool,
    /// Retarget branches whose target is an unconditional branch
    pub jump_threading: bool,
    /// Remove push/pop pairs and branches to the next instruction
    pub peephole: bool,
    /// Keep single-use temporaries on the evaluation stack
    pub stack_scheduling: bool,
    /// Maximum iterations for optimization passes
    pub max_iterations: usize,
}

impl Default for OptConfig {
    fn default() -> Self {
        Self {
            dead_code_elimination: true,
            jump_threading: true,
            peephole: true,
            stack_scheduling: true,
            max_iterations: 4,
        }
    }
}

impl OptConfig {
    /// Create a config with all optimizations disabled.
    pub fn none() -> Self {
        Self {
            dead_code_elimination: false,
            jump_threading: false,
            peephole: false,
            stack_scheduling: false,
            max_iterations: 0,
        }
    }
}

/// Statistics about optimizations performed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptStats {
    pub eliminated_instructions: usize,
    pub threaded_jumps: usize,
    pub removed_branches: usize,
    pub scheduled_temps: usize,
}

impl OptStats {
    fn changed(&self, before: &OptStats) -> bool {
        self != before
    }
}

/// Run the enabled passes until nothing changes.
pub fn optimize(builder: &mut ILBuilder, config: &OptConfig) -> OptStats {
    let mut stats = OptStats::default();
    for _ in 0..config.max_iterations {
        let before = stats.clone();
        if config.jump_threading {
            thread_jumps(builder, &mut stats);
        }
        if config.dead_code_elimination {
            eliminate_dead_code(builder, &mut stats);
        }
        if config.peephole {
            remove_branches_to_next(builder, &mut stats);
            remove_push_pop(builder, &mut stats);
        }
        if config.stack_scheduling {
            schedule_stack_temps(builder, &mut stats);
        }
        if !stats.changed(&before) {
            break;
        }
    }
    stats
}

/// The label's target after following unconditional `br` chains.
fn final_target(builder: &ILBuilder, label: Label) -> Label {
    let mut current = label;
    for _ in 0..8 {
        let Some(position) = builder.label_position(current) else {
            return current;
        };
        match builder.instructions.get(position) {
            Some(instr) if instr.op == OpCode::Br => match instr.operand {
                Operand::Label(next) if next != current => current = next,
                _ => return current,
            },
            _ => return current,
        }
    }
    current
}

/// Thread jumps that jump to other jumps.
fn thread_jumps(builder: &mut ILBuilder, stats: &mut OptStats) {
    for i in 0..builder.instructions.len() {
        let op = builder.instructions[i].op;
        if !matches!(op, OpCode::Br | OpCode::Brtrue | OpCode::Brfalse | OpCode::Switch) {
            continue;
        }
        let operand = builder.instructions[i].operand.clone();
        let threaded = match operand {
            Operand::Label(label) => {
                let target = final_target(builder, label);
                (target != label).then_some(Operand::Label(target))
            }
            Operand::Labels(labels) => {
                let targets: Vec<Label> = labels.iter().map(|&l| final_target(builder, l)).collect();
                (targets != labels).then_some(Operand::Labels(targets))
            }
            _ => None,
        };
        if let Some(operand) = threaded {
            builder.instructions[i].operand = operand;
            stats.threaded_jumps += 1;
        }
    }
}

/// Find all reachable instructions using control flow analysis.
fn find_reachable(builder: &ILBuilder) -> Vec<bool> {
    let count = builder.instructions.len();
    let mut reachable = vec![false; count];
    let mut worklist = vec![0usize];
    for region in &builder.regions {
        if let Some(handler) = builder.label_position(region.handler_start) {
            worklist.push(handler);
        }
    }

    while let Some(index) = worklist.pop() {
        if index >= count || reachable[index] {
            continue;
        }
        reachable[index] = true;
        let instr = &builder.instructions[index];
        for label in instr.labels() {
            if let Some(target) = builder.label_position(label) {
                worklist.push(target);
            }
        }
        if !instr.op.is_unconditional_transfer() {
            worklist.push(index + 1);
        }
    }
    reachable
}

/// Remove instructions no path reaches.
fn eliminate_dead_code(builder: &mut ILBuilder, stats: &mut OptStats) {
    let reachable = find_reachable(builder);
    let dead = reachable.iter().filter(|&&r| !r).count();
    if dead > 0 {
        builder.retain(&reachable);
        stats.eliminated_instructions += dead;
    }
}

/// `br L` immediately followed by `L:`.
fn remove_branches_to_next(builder: &mut ILBuilder, stats: &mut OptStats) {
    let mut keep = vec![true; builder.instructions.len()];
    let mut removed = 0;
    for (i, instr) in builder.instructions.iter().enumerate() {
        if instr.op != OpCode::Br {
            continue;
        }
        if let Operand::Label(label) = instr.operand {
            if builder.label_position(label) == Some(i + 1) {
                keep[i] = false;
                removed += 1;
            }
        }
    }
    if removed > 0 {
        builder.retain(&keep);
        stats.removed_branches += removed;
    }
}

/// Check if an opcode is a pure push (no side effects, just pushes a value).
fn is_pure_push(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Dup
            | OpCode::Ldarg
            | OpCode::Ldloc
            | OpCode::LdcI4
            | OpCode::LdcI8
            | OpCode::LdcR4
            | OpCode::LdcR8
            | OpCode::Ldstr
            | OpCode::Ldnull
            | OpCode::LdcTrue
            | OpCode::LdcFalse
    )
}

/// A pure push whose value is popped right away.
fn remove_push_pop(builder: &mut ILBuilder, stats: &mut OptStats) {
    let pinned = builder.pinned_positions();
    let mut keep = vec![true; builder.instructions.len()];
    let mut removed = 0;
    let mut i = 0;
    while i + 1 < builder.instructions.len() {
        if is_pure_push(builder.instructions[i].op)
            && builder.instructions[i + 1].op == OpCode::Pop
            && !pinned[i + 1]
        {
            keep[i] = false;
            keep[i + 1] = false;
            removed += 2;
            i += 2;
        } else {
            i += 1;
        }
    }
    if removed > 0 {
        builder.retain(&keep);
        stats.eliminated_instructions += removed;
    }
}

/// `stloc t; ldloc t` on an unnamed slot written and read exactly once:
/// the value stays on the evaluation stack and the slot goes unused.
fn schedule_stack_temps(builder: &mut ILBuilder, stats: &mut OptStats) {
    #[derive(Default)]
    struct Uses {
        stores: usize,
        loads: usize,
        addressed: bool,
    }
    let mut uses: FxHashMap<u16, Uses> = FxHashMap::default();
    for instr in &builder.instructions {
        if let Operand::Index(slot) = instr.operand {
            let entry = uses.entry(slot);
            match instr.op {
                OpCode::Stloc => entry.or_default().stores += 1,
                OpCode::Ldloc => entry.or_default().loads += 1,
                OpCode::Ldloca => entry.or_default().addressed = true,
                _ => {}
            }
        }
    }

    let pinned = builder.pinned_positions();
    let mut keep = vec![true; builder.instructions.len()];
    let mut scheduled = 0;
    for i in 0..builder.instructions.len().saturating_sub(1) {
        let (store, load) = (&builder.instructions[i], &builder.instructions[i + 1]);
        let (Operand::Index(slot), Operand::Index(read)) = (&store.operand, &load.operand) else {
            continue;
        };
        if store.op != OpCode::Stloc || load.op != OpCode::Ldloc || slot != read || pinned[i + 1] {
            continue;
        }
        let is_temp = builder.locals()[*slot as usize].name.is_none();
        let single = uses
            .get(slot)
            .is_some_and(|u| u.stores == 1 && u.loads == 1 && !u.addressed);
        if is_temp && single {
            keep[i] = false;
            keep[i + 1] = false;
            scheduled += 1;
        }
    }
    if scheduled > 0 {
        builder.retain(&keep);
        stats.scheduled_temps += scheduled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_symbols::TypeId;

    fn ret(b: &mut ILBuilder) {
        b.emit_with_effect(OpCode::Ret, Operand::None, 0);
    }

    #[test]
    fn test_dead_code_after_return() {
        let mut b = ILBuilder::new();
        ret(&mut b);
        b.emit_op(OpCode::LdcTrue);
        b.emit_op(OpCode::Pop);
        let stats = optimize(&mut b, &OptConfig::default());
        assert_eq!(b.len(), 1);
        assert_eq!(stats.eliminated_instructions, 2);
    }

    #[test]
    fn test_handlers_stay_reachable() {
        let mut b = ILBuilder::new();
        let start = b.mark_new_label();
        let done = b.define_label();
        b.emit_op(OpCode::Nop);
        b.emit_branch(OpCode::Leave, done);
        let end = b.mark_new_label();
        b.emit_op(OpCode::Endfinally);
        let handler_end = b.mark_new_label();
        b.add_region(crate::body::RegionKind::Finally, start, end, end, handler_end);
        b.mark_label(done);
        ret(&mut b);
        optimize(&mut b, &OptConfig::default());
        assert!(b.instructions().iter().any(|i| i.op == OpCode::Endfinally));
    }

    #[test]
    fn test_jump_threading() {
        let mut b = ILBuilder::new();
        let middle = b.define_label();
        let last = b.define_label();
        b.emit_op(OpCode::LdcTrue);
        b.emit_branch(OpCode::Brtrue, middle);
        b.emit_op(OpCode::Nop);
        b.mark_label(middle);
        b.emit_branch(OpCode::Br, last);
        b.emit_op(OpCode::Nop);
        b.mark_label(last);
        ret(&mut b);

        let mut stats = OptStats::default();
        thread_jumps(&mut b, &mut stats);
        assert_eq!(stats.threaded_jumps, 1);
        assert_eq!(b.instructions()[1].operand, Operand::Label(last));
    }

    #[test]
    fn test_branch_to_next_is_removed() {
        let mut b = ILBuilder::new();
        let next = b.define_label();
        b.emit_branch(OpCode::Br, next);
        b.mark_label(next);
        ret(&mut b);
        let mut stats = OptStats::default();
        remove_branches_to_next(&mut b, &mut stats);
        assert_eq!(stats.removed_branches, 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_single_use_temp_stays_on_stack() {
        let mut b = ILBuilder::new();
        let temp = b.allocate_local(None, TypeId::INT, true).unwrap();
        let named = b.allocate_local(Some("x".into()), TypeId::INT, false).unwrap();
        b.emit(OpCode::LdcI4, Operand::Int32(1));
        b.emit(OpCode::Stloc, Operand::Index(temp));
        b.emit(OpCode::Ldloc, Operand::Index(temp));
        b.emit(OpCode::Stloc, Operand::Index(named));
        b.emit(OpCode::Ldloc, Operand::Index(named));
        b.emit_op(OpCode::Pop);
        let mut stats = OptStats::default();
        schedule_stack_temps(&mut b, &mut stats);
        assert_eq!(stats.scheduled_temps, 1);
        let ops: Vec<OpCode> = b.instructions().iter().map(|i| i.op).collect();
        assert_eq!(ops, vec![OpCode::LdcI4, OpCode::Stloc, OpCode::Ldloc, OpCode::Pop]);
    }

    #[test]
    fn test_disabled_config_changes_nothing() {
        let mut b = ILBuilder::new();
        ret(&mut b);
        b.emit_op(OpCode::Nop);
        let stats = optimize(&mut b, &OptConfig::none());
        assert_eq!(stats, OptStats::default());
        assert_eq!(b.len(), 2);
    }
}
