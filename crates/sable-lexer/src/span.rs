/// A byte range within one source file.
///
/// Spans order by file, then by position, which is the order diagnostics
/// are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Span {
    /// Position of the file in the compilation's source list
    pub file_id: u16,
    pub start: u32,
    /// Exclusive
    pub end: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, file_id: u16) -> Self {
        Self {
            file_id,
            start: start as u32,
            end: end as u32,
        }
    }

    /// The span of compiler-generated code. Empty, so it never gets a
    /// sequence point.
    pub fn dummy() -> Self {
        Self::default()
    }

    pub fn is_dummy(&self) -> bool {
        *self == Self::dummy()
    }

    /// The smallest span covering both. A dummy side contributes nothing.
    pub fn merge(self, other: Span) -> Span {
        if self.is_dummy() {
            return other;
        }
        if other.is_dummy() {
            return self;
        }
        debug_assert_eq!(self.file_id, other.file_id, "spans from different files");
        Span {
            file_id: self.file_id,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}
