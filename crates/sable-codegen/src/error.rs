/// Errors raised while realizing or decoding method bodies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmitError {
    #[error("label {0} was never marked")]
    UnmarkedLabel(u32),
    #[error("method body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("too many local variables")]
    TooManyLocals,
    #[error("invalid opcode 0x{byte:02x} at offset {offset}")]
    InvalidOpcode { byte: u8, offset: usize },
    #[error("instruction at offset {0} is truncated")]
    Truncated(usize),
    #[error("branch at offset {0} leaves the method body")]
    BranchOutOfRange(usize),
    #[error("resume point {0} was removed while its yield point survived")]
    UnresolvedResumePoint(u32),
}
