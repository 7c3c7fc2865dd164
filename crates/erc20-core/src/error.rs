use thiserror::Error;

/// Canonical error type returned by ledger operations.
///
/// Every variant aborts the whole operation; the ledger is left exactly as it
/// was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Caller is not the contract owner.
    #[error("only contract owner can call {operation}")]
    Unauthorized { operation: &'static str },

    /// The zero address was used where it is not allowed.
    #[error("{0}")]
    InvalidAddress(&'static str),

    /// Transfer amount exceeds the sender balance.
    #[error("transfer cannot exceed balance")]
    InsufficientBalance,

    /// An addition or subtraction left the unsigned 256-bit range.
    #[error("arithmetic overflow or underflow")]
    ArithmeticOverflow,

    /// A persisted snapshot does not satisfy the ledger invariants.
    #[error("corrupt ledger state: {0}")]
    CorruptState(String),
}
