//! CHIP-8 virtual machine core with pluggable presentation.
//!
//! ## Design
//!
//! * machine state (memory, registers, timers, call stack) lives apart from
//!   the executor, so tests and hosts can inspect and replace it freely
//! * opcode handlers propose a next program counter through a per-cycle
//!   delta; the dispatcher commits it, which keeps skip and key-wait
//!   semantics in one place and means a fault never half-applies a cycle
//! * rendering hides behind a small capability (clear / set_pixel /
//!   present); terminal canvas, plain console and fan-out sinks are
//!   interchangeable and the executor never learns which one it has
//! * fx0a doesn't block: it parks the executor in a wait state, the host
//!   keeps stepping, and the machine resumes itself once a key is down
//! * the host loop drives stepping, timer decrement and presentation at
//!   independent rates (500/60/60 Hz by default)

pub mod display;
pub mod error;
pub mod input;
pub mod instruction;
pub mod sound;
pub mod state;
pub mod vm;

pub use error::VmError;
pub use instruction::Instruction;
pub use state::MachineState;
pub use vm::{ExecutionState, Vm};
