//! The emulator/debugger module.

use thiserror::Error;

use crate::plat::PlatformError;

pub mod alu;
pub mod clock;
pub mod debugger;
pub mod emulator;
pub mod instructions;
pub mod ram;
pub mod registers;

pub use emulator::{EmuState, Emulator};

#[derive(Debug, Error)]
pub enum EmuError {
    #[error("program too large: {size} words (text segment holds less than {capacity})")]
    ProgramTooLarge { size: usize, capacity: usize },
    #[error("instruction pointer out of bounds: {0}")]
    InstructionPointerOutOfBounds(u16),
    #[error("invalid opcode: {0}")]
    InvalidOpcode(u16),
    #[error("invalid register: {0}")]
    InvalidRegister(u16),
    #[error("address out of bounds: {0}")]
    AddressOutOfBounds(u16),
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid clock rate: {0} Hz")]
    InvalidClockRate(f64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Platform(PlatformError),
}

impl From<PlatformError> for EmuError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::InvalidOpcode(op) => Self::InvalidOpcode(op),
            PlatformError::InvalidRegister(reg) => Self::InvalidRegister(reg),
            e => Self::Platform(e),
        }
    }
}

/// Type alias for Result<T, [EmuError]>.
pub type EmuResult<T> = Result<T, EmuError>;

/// How `Allocate` treats the heap and data pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Allocation {
    /// Returns `hp` but advances `dp` by `size + 1`, so `hp` never moves and every allocation
    /// hands out the same address.
    #[default]
    Literal,
    /// Returns `hp` and advances `hp` by `size + 1`.
    Heap,
}

/// Emulator settings.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EmuConfig {
    /// Halt when the instruction pointer runs past the program instead of stepping back and
    /// retrying, and dump the register file on halt.
    pub debug: bool,
    pub allocation: Allocation,
    /// Throttle execution to this many instructions per second.
    pub clock_rate_hz: Option<f64>,
}
