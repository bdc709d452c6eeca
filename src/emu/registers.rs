use std::{
    fmt,
    ops::{Index, IndexMut},
};

use crate::plat::{
    Register, ReservedState, UserState, SEGMENT_DATA_SIZE, SEGMENT_HEAP_START,
    SEGMENT_STACK_START, SEGMENT_TEXT_START,
};

use super::{EmuError, EmuResult};

/// The full set of registers, addressed by encoding index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    cells: [u16; Register::COUNT],
}

impl Registers {
    pub fn new() -> Self {
        let mut this = Self {
            cells: [0; Register::COUNT],
        };
        this[Register::Ip] = SEGMENT_TEXT_START;
        this[Register::Lr] = SEGMENT_TEXT_START;
        this[Register::Dp] = SEGMENT_DATA_SIZE;
        this[Register::Hp] = SEGMENT_HEAP_START;
        this[Register::Sp] = SEGMENT_STACK_START;
        this
    }

    /// Resolves an encoded register index to its cell.
    pub fn by_index(&mut self, index: u16) -> EmuResult<&mut u16> {
        self.cells
            .get_mut(index as usize)
            .ok_or(EmuError::InvalidRegister(index))
    }

    pub fn user_states(&self) -> UserState {
        UserState::from_bits_retain(self[Register::Usr])
    }

    pub fn insert_user_states(&mut self, states: UserState) {
        self[Register::Usr] |= states.bits();
    }

    /// Flags word of the instruction currently executing.
    pub fn instruction_states(&self) -> UserState {
        UserState::from_bits_retain(self[Register::Usar])
    }

    pub fn reserved_states(&self) -> ReservedState {
        ReservedState::from_bits_retain(self[Register::Rsr])
    }

    pub fn set_reserved_states(&mut self, states: ReservedState, value: bool) {
        let mut rsr = self.reserved_states();
        rsr.set(states, value);
        self[Register::Rsr] = rsr.bits();
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<Register> for Registers {
    type Output = u16;

    fn index(&self, reg: Register) -> &u16 {
        &self.cells[reg.index()]
    }
}

impl IndexMut<Register> for Registers {
    fn index_mut(&mut self, reg: Register) -> &mut u16 {
        &mut self.cells[reg.index()]
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for reg in Register::ALL {
            writeln!(f, "{:>4}={:04X}", reg.name(), self[reg])?;
        }
        Ok(())
    }
}
