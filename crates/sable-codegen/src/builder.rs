//! The IL builder: an instruction list with symbolic labels, stack depth
//! tracking, local slots and exception regions, realized into bytes once
//! the method is complete.

use rustc_hash::FxHashMap;
use sable_lexer::Span;
use sable_symbols::TypeId;

use crate::body::{ExceptionRegion, LocalSlot, RegionKind, SequencePoint};
use crate::error::EmitError;
use crate::opcodes::{Instruction, Label, OpCode, Operand};

/// Handle to an instruction position recorded for state machine metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker(pub u32);

#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingRegion {
    pub kind: RegionKind,
    pub try_start: Label,
    pub try_end: Label,
    pub handler_start: Label,
    pub handler_end: Label,
}

/// Builds the instruction stream of one method.
#[derive(Debug, Default)]
pub struct ILBuilder {
    pub(crate) instructions: Vec<Instruction>,
    /// Instruction index each label is marked at
    pub(crate) label_positions: Vec<Option<usize>>,
    pub(crate) regions: Vec<PendingRegion>,
    pub(crate) sequence_points: Vec<(usize, Span)>,
    /// Instruction index of each marker; `None` once the instruction is gone
    pub(crate) markers: Vec<Option<usize>>,
    locals: Vec<LocalSlot>,
    free_temps: FxHashMap<TypeId, Vec<u16>>,
    last_marked: Option<usize>,
    stack: i32,
    max_stack: i32,
}

/// A realized body before metadata is attached.
#[derive(Debug)]
pub struct RealizedCode {
    pub code: Vec<u8>,
    pub max_stack: u16,
    pub locals: Vec<LocalSlot>,
    pub sequence_points: Vec<SequencePoint>,
    pub regions: Vec<ExceptionRegion>,
    /// Byte offset of every label
    pub label_offsets: Vec<u32>,
    /// Byte offset of every marker whose instruction survived
    pub marker_offsets: Vec<Option<u32>>,
}

impl ILBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions emitted so far.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    // ---
    // Labels
    // ---

    pub fn define_label(&mut self) -> Label {
        self.label_positions.push(None);
        Label(self.label_positions.len() as u32 - 1)
    }

    /// Mark `label` at the next instruction.
    pub fn mark_label(&mut self, label: Label) {
        let slot = &mut self.label_positions[label.0 as usize];
        assert!(slot.is_none(), "label {} marked twice", label.0);
        *slot = Some(self.instructions.len());
        self.last_marked = Some(self.instructions.len());
    }

    /// A new label marked at the next instruction.
    pub fn mark_new_label(&mut self) -> Label {
        let label = self.define_label();
        self.mark_label(label);
        label
    }

    pub fn label_position(&self, label: Label) -> Option<usize> {
        self.label_positions[label.0 as usize]
    }

    /// Whether control can reach the next instruction: the last one does
    /// not transfer control away, or a label was just marked.
    pub fn falls_through(&self) -> bool {
        match self.instructions.last() {
            None => true,
            Some(last) => {
                !last.op.is_unconditional_transfer() || self.last_marked == Some(self.instructions.len())
            }
        }
    }

    // ---
    // Emission
    // ---

    /// Emit an instruction with a fixed stack effect.
    pub fn emit(&mut self, op: OpCode, operand: Operand) {
        let effect = op
            .stack_effect()
            .unwrap_or_else(|| panic!("{} needs an explicit stack effect", op.name()));
        self.emit_with_effect(op, operand, effect);
    }

    pub fn emit_op(&mut self, op: OpCode) {
        self.emit(op, Operand::None);
    }

    /// Emit an instruction whose stack effect depends on a signature.
    pub fn emit_with_effect(&mut self, op: OpCode, operand: Operand, effect: i32) {
        self.instructions.push(Instruction::new(op, operand));
        self.adjust_stack(effect);
        if op.is_unconditional_transfer() {
            self.stack = 0;
        }
    }

    pub fn emit_branch(&mut self, op: OpCode, label: Label) {
        debug_assert!(op.is_branch());
        self.emit(op, Operand::Label(label));
    }

    pub fn emit_switch(&mut self, labels: Vec<Label>) {
        self.emit(OpCode::Switch, Operand::Labels(labels));
    }

    pub fn adjust_stack(&mut self, delta: i32) {
        self.stack += delta;
        debug_assert!(self.stack >= 0, "evaluation stack underflow");
        self.max_stack = self.max_stack.max(self.stack);
    }

    pub fn stack(&self) -> i32 {
        self.stack
    }

    /// Reset the tracked depth where control merges or a handler starts.
    pub fn set_stack(&mut self, depth: i32) {
        self.stack = depth;
        self.max_stack = self.max_stack.max(depth);
    }

    pub fn max_stack(&self) -> i32 {
        self.max_stack
    }

    // ---
    // Locals
    // ---

    /// A slot for a local. Reusable slots come from temporaries freed
    /// earlier with the same type.
    pub fn allocate_local(&mut self, name: Option<String>, ty: TypeId, reusable: bool) -> Result<u16, EmitError> {
        if reusable {
            if let Some(slot) = self.free_temps.get_mut(&ty).and_then(Vec::pop) {
                return Ok(slot);
            }
        }
        let slot = u16::try_from(self.locals.len()).map_err(|_| EmitError::TooManyLocals)?;
        self.locals.push(LocalSlot { name, ty });
        Ok(slot)
    }

    /// Return a temporary's slot for reuse.
    pub fn free_local(&mut self, slot: u16) {
        let ty = self.locals[slot as usize].ty;
        self.free_temps.entry(ty).or_default().push(slot);
    }

    pub fn locals(&self) -> &[LocalSlot] {
        &self.locals
    }

    // ---
    // Metadata
    // ---

    pub fn add_region(&mut self, kind: RegionKind, try_start: Label, try_end: Label, handler_start: Label, handler_end: Label) {
        self.regions.push(PendingRegion {
            kind,
            try_start,
            try_end,
            handler_start,
            handler_end,
        });
    }

    /// Map `span` to the next instruction.
    pub fn mark_sequence_point(&mut self, span: Span) {
        self.sequence_points.push((self.instructions.len(), span));
    }

    /// Drop sequence points recorded at or after instruction `from`.
    pub fn truncate_sequence_points(&mut self, from: usize) {
        self.sequence_points.retain(|&(index, _)| index < from);
    }

    pub fn add_marker(&mut self) -> Marker {
        self.markers.push(Some(self.instructions.len()));
        Marker(self.markers.len() as u32 - 1)
    }

    /// Instruction positions that labels, regions or markers refer to.
    pub(crate) fn pinned_positions(&self) -> Vec<bool> {
        let mut pinned = vec![false; self.instructions.len() + 1];
        for position in self.label_positions.iter().flatten() {
            pinned[*position] = true;
        }
        for position in self.markers.iter().flatten() {
            pinned[*position] = true;
        }
        pinned
    }

    /// Remove the instructions whose `keep` flag is false. Labels and
    /// sequence points move to the next surviving instruction; markers on
    /// removed instructions are invalidated.
    pub(crate) fn retain(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.instructions.len());
        let mut new_index = Vec::with_capacity(keep.len() + 1);
        let mut next = 0;
        for &kept in keep {
            new_index.push(next);
            if kept {
                next += 1;
            }
        }
        new_index.push(next);

        let mut index = 0;
        self.instructions.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
        for position in self.label_positions.iter_mut().flatten() {
            *position = new_index[*position];
        }
        for (position, _) in &mut self.sequence_points {
            *position = new_index[*position];
        }
        for marker in &mut self.markers {
            *marker = match *marker {
                Some(position) if position < keep.len() && !keep[position] => None,
                Some(position) => Some(new_index[position]),
                None => None,
            };
        }
        self.last_marked = self.last_marked.map(|position| new_index[position]);
    }

    // ---
    // Realization
    // ---

    /// Resolve labels and encode the instruction stream.
    pub fn realize(self) -> Result<RealizedCode, EmitError> {
        let mut offsets = Vec::with_capacity(self.instructions.len() + 1);
        let mut offset = 0usize;
        for instruction in &self.instructions {
            offsets.push(offset);
            offset += instruction.size();
        }
        offsets.push(offset);
        if offset > u32::MAX as usize {
            return Err(EmitError::BodyTooLarge(u32::MAX as usize));
        }

        let mut label_offsets = Vec::with_capacity(self.label_positions.len());
        for (i, position) in self.label_positions.iter().enumerate() {
            let position = position.ok_or(EmitError::UnmarkedLabel(i as u32))?;
            label_offsets.push(offsets[position] as u32);
        }

        let mut code = Vec::with_capacity(offset);
        for (i, instruction) in self.instructions.iter().enumerate() {
            let end = (offsets[i] + instruction.size()) as i64;
            code.push(instruction.op as u8);
            match &instruction.operand {
                Operand::None => {}
                Operand::Int32(v) => code.extend_from_slice(&v.to_le_bytes()),
                Operand::Int64(v) => code.extend_from_slice(&v.to_le_bytes()),
                Operand::Float32(v) => code.extend_from_slice(&v.to_le_bytes()),
                Operand::Float64(v) => code.extend_from_slice(&v.to_le_bytes()),
                Operand::Index(v) => code.extend_from_slice(&v.to_le_bytes()),
                Operand::Token(v) => code.extend_from_slice(&v.to_le_bytes()),
                Operand::Label(label) => {
                    let relative = label_offsets[label.0 as usize] as i64 - end;
                    code.extend_from_slice(&(relative as i32).to_le_bytes());
                }
                Operand::Labels(labels) => {
                    code.extend_from_slice(&(labels.len() as u32).to_le_bytes());
                    for label in labels {
                        let relative = label_offsets[label.0 as usize] as i64 - end;
                        code.extend_from_slice(&(relative as i32).to_le_bytes());
                    }
                }
                Operand::Target(_) | Operand::Targets(_) => {
                    unreachable!("decoded operands are never emitted")
                }
            }
        }

        let mut sequence_points: Vec<SequencePoint> = Vec::with_capacity(self.sequence_points.len());
        for &(position, span) in &self.sequence_points {
            if position >= self.instructions.len() {
                continue;
            }
            let point = SequencePoint::new(offsets[position] as u32, span);
            // Several statements collapsed onto one instruction: the last one owns it
            match sequence_points.last_mut() {
                Some(last) if last.offset == point.offset => *last = point,
                _ => sequence_points.push(point),
            }
        }

        let regions = self
            .regions
            .iter()
            .map(|r| ExceptionRegion {
                kind: r.kind,
                try_start: label_offsets[r.try_start.0 as usize],
                try_end: label_offsets[r.try_end.0 as usize],
                handler_start: label_offsets[r.handler_start.0 as usize],
                handler_end: label_offsets[r.handler_end.0 as usize],
            })
            .filter(|r| r.try_start < r.try_end)
            .collect();

        let marker_offsets = self
            .markers
            .iter()
            .map(|m| m.map(|position| offsets[position] as u32))
            .collect();

        Ok(RealizedCode {
            code,
            max_stack: self.max_stack.clamp(0, u16::MAX as i32) as u16,
            locals: self.locals,
            sequence_points,
            regions,
            label_offsets,
            marker_offsets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_backward_branches() {
        let mut b = ILBuilder::new();
        let top = b.mark_new_label();
        let exit = b.define_label();
        b.emit_op(OpCode::LdcTrue);
        b.emit_branch(OpCode::Brfalse, exit);
        b.emit_branch(OpCode::Br, top);
        b.mark_label(exit);
        b.emit_with_effect(OpCode::Ret, Operand::None, 0);

        let realized = b.realize().unwrap();
        // ldc.true(1) brfalse(5) br(5) ret(1)
        assert_eq!(realized.code.len(), 12);
        let (brfalse, _) = Instruction::decode(&realized.code, 1).unwrap();
        assert_eq!(brfalse.operand, Operand::Target(11));
        let (br, _) = Instruction::decode(&realized.code, 6).unwrap();
        assert_eq!(br.operand, Operand::Target(0));
        assert_eq!(realized.max_stack, 1);
    }

    #[test]
    fn test_unmarked_label_is_an_error() {
        let mut b = ILBuilder::new();
        let nowhere = b.define_label();
        b.emit_branch(OpCode::Br, nowhere);
        assert_eq!(b.realize().unwrap_err(), EmitError::UnmarkedLabel(0));
    }

    #[test]
    fn test_temp_slots_are_reused_by_type() {
        let mut b = ILBuilder::new();
        let a = b.allocate_local(None, TypeId::INT, true).unwrap();
        b.free_local(a);
        let named = b.allocate_local(Some("x".into()), TypeId::INT, false).unwrap();
        let again = b.allocate_local(None, TypeId::INT, true).unwrap();
        let other = b.allocate_local(None, TypeId::STRING, true).unwrap();
        assert_ne!(named, a);
        assert_eq!(again, a);
        assert_ne!(other, a);
        assert_eq!(b.locals().len(), 3);
    }

    #[test]
    fn test_retain_moves_labels_and_invalidates_markers() {
        let mut b = ILBuilder::new();
        b.emit_op(OpCode::LdcTrue);
        b.emit_op(OpCode::Pop);
        let marker = b.add_marker();
        b.emit_op(OpCode::Nop);
        let label = b.mark_new_label();
        b.emit_op(OpCode::Nop);
        b.retain(&[true, true, false, false]);
        assert_eq!(b.len(), 2);
        assert_eq!(b.label_position(label), Some(2));
        assert_eq!(b.markers[marker.0 as usize], None);
    }

    #[test]
    fn test_empty_regions_are_dropped() {
        let mut b = ILBuilder::new();
        let start = b.mark_new_label();
        let end = b.mark_new_label();
        b.emit_op(OpCode::Endfinally);
        let handler_end = b.mark_new_label();
        b.add_region(RegionKind::Finally, start, end, end, handler_end);
        assert!(b.realize().unwrap().regions.is_empty());
    }
}
