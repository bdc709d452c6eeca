use crate::plat::{MEMORY_SIZE, SEGMENT_TEXT_SIZE, SEGMENT_TEXT_START};

use super::{EmuError, EmuResult};

/// Main memory: a flat array of 16-bit words.
///
/// Segments are conventions held in the pointer registers; nothing here enforces them.
pub struct Ram {
    pub memory: Box<[u16]>,
}

impl Ram {
    /// Creates a new [`Ram`] instance, allocating and initializing its memory to zeros.
    pub fn new() -> Self {
        Self {
            memory: vec![0u16; MEMORY_SIZE].into_boxed_slice(),
        }
    }

    /// Reads the word at `addr`.
    pub fn read(&self, addr: u16) -> EmuResult<u16> {
        self.memory
            .get(addr as usize)
            .copied()
            .ok_or(EmuError::AddressOutOfBounds(addr))
    }

    /// Writes `value` at `addr`.
    pub fn write(&mut self, addr: u16, value: u16) -> EmuResult<()> {
        let cell = self
            .memory
            .get_mut(addr as usize)
            .ok_or(EmuError::AddressOutOfBounds(addr))?;
        *cell = value;
        Ok(())
    }

    /// Copies `program` into the text segment.
    ///
    /// Fails without touching memory unless the program is strictly smaller than the segment.
    pub fn load_text(&mut self, program: &[u16]) -> EmuResult<()> {
        if program.len() >= SEGMENT_TEXT_SIZE {
            return Err(EmuError::ProgramTooLarge {
                size: program.len(),
                capacity: SEGMENT_TEXT_SIZE,
            });
        }
        let start = SEGMENT_TEXT_START as usize;
        self.memory[start..start + program.len()].copy_from_slice(program);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.memory.fill(0);
    }

    pub fn clear_text(&mut self) {
        let start = SEGMENT_TEXT_START as usize;
        self.memory[start..start + SEGMENT_TEXT_SIZE].fill(0);
    }
}

impl Default for Ram {
    fn default() -> Self {
        Self::new()
    }
}
