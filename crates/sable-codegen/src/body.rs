//! Realized method bodies and the module string pool.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use sable_lexer::Span;
use sable_symbols::{ClassId, Symbol, TypeId};
use serde::Serialize;

/// A local variable slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalSlot {
    /// `None` for compiler temporaries
    pub name: Option<String>,
    pub ty: TypeId,
}

/// Maps a source span to the offset of its first instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequencePoint {
    pub offset: u32,
    pub start: u32,
    pub end: u32,
    pub file_id: u16,
}

impl SequencePoint {
    pub fn new(offset: u32, span: Span) -> Self {
        Self {
            offset,
            start: span.start,
            end: span.end,
            file_id: span.file_id,
        }
    }

    pub fn span(&self) -> Span {
        Span {
            start: self.start,
            end: self.end,
            file_id: self.file_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegionKind {
    /// Catches exceptions assignable to the type
    Catch(TypeId),
    Finally,
}

/// A protected range and its handler, as byte offsets. Ends are exclusive.
///
/// Regions are listed innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExceptionRegion {
    pub kind: RegionKind,
    pub try_start: u32,
    pub try_end: u32,
    pub handler_start: u32,
    pub handler_end: u32,
}

impl ExceptionRegion {
    pub fn try_contains(&self, offset: u32) -> bool {
        self.try_start <= offset && offset < self.try_end
    }

    pub fn handler_contains(&self, offset: u32) -> bool {
        self.handler_start <= offset && offset < self.handler_end
    }
}

/// Iterator and async bookkeeping of one body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateMachineMetadata {
    /// On a kickoff method: the class its body moved into
    pub state_machine: Option<ClassId>,
    /// Offsets where the body suspends, unreachable ones removed
    pub yield_offsets: Vec<u32>,
    /// Offsets where the body resumes after a suspension
    pub resume_offsets: Vec<u32>,
    /// Offset of the catch-all handler of an async body
    pub async_catch_handler: Option<u32>,
}

impl StateMachineMetadata {
    pub fn is_empty(&self) -> bool {
        self.state_machine.is_none()
            && self.yield_offsets.is_empty()
            && self.resume_offsets.is_empty()
            && self.async_catch_handler.is_none()
    }
}

/// The generated code of one method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodBody {
    pub code: Vec<u8>,
    pub max_stack: u16,
    pub locals: Vec<LocalSlot>,
    pub sequence_points: Vec<SequencePoint>,
    pub regions: Vec<ExceptionRegion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_machine: Option<StateMachineMetadata>,
}

/// String literals of a module, shared by every method being generated.
#[derive(Debug, Default)]
pub struct StringPool {
    inner: RwLock<PoolInner>,
}

#[derive(Debug, Default)]
struct PoolInner {
    strings: Vec<Symbol>,
    index: FxHashMap<Symbol, u32>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `text`, adding it on first use.
    pub fn intern(&self, text: &Symbol) -> u32 {
        if let Some(&index) = self.inner.read().index.get(text) {
            return index;
        }
        let mut inner = self.inner.write();
        if let Some(&index) = inner.index.get(text) {
            return index;
        }
        let index = inner.strings.len() as u32;
        inner.strings.push(text.clone());
        inner.index.insert(text.clone(), index);
        index
    }

    pub fn get(&self, index: u32) -> Option<Symbol> {
        self.inner.read().strings.get(index as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The pooled strings in index order.
    pub fn into_strings(self) -> Vec<Symbol> {
        self.inner.into_inner().strings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_pool_dedup() {
        let pool = StringPool::new();
        let a = pool.intern(&Symbol::from("hello"));
        let b = pool.intern(&Symbol::from("world"));
        assert_eq!(pool.intern(&Symbol::from("hello")), a);
        assert_ne!(a, b);
        assert_eq!(pool.get(b).as_deref(), Some("world"));
        assert_eq!(pool.into_strings().len(), 2);
    }

    #[test]
    fn test_region_ranges_are_half_open() {
        let region = ExceptionRegion {
            kind: RegionKind::Finally,
            try_start: 0,
            try_end: 10,
            handler_start: 10,
            handler_end: 12,
        };
        assert!(region.try_contains(9));
        assert!(!region.try_contains(10));
        assert!(region.handler_contains(10));
    }
}
