use crate::vm::ExecutionState;

/// Faults the core can raise. Every fault aborts the current step and
/// surfaces to the host unchanged; the machine performs no recovery of its
/// own, reset is the only restart path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("illegal instruction {opcode:#06x}: {reason}")]
    IllegalInstruction { opcode: u16, reason: &'static str },

    #[error("memory access out of bounds at {address:#05x}: {reason}")]
    MemoryAccess { address: usize, reason: &'static str },

    #[error("register index {index} out of range")]
    RegisterAccess { index: usize },

    #[error("return with an empty call stack")]
    StackUnderflow,

    #[error("program of {size} bytes exceeds the {capacity} bytes above the load offset")]
    ProgramTooLarge { size: usize, capacity: usize },

    #[error("cannot step the machine in execution state {state:?}")]
    UnimplementedState { state: ExecutionState },
}
