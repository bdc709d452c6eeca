//! One handler per opcode.
//!
//! Handlers pull their own operand words through [`Emulator::fetch`], so an instruction's size
//! is only known once its handler has run.

use std::io::Write;

use crate::plat::{Opcode, Register, UserState};

use super::{
    alu::{self, AluMode},
    EmuResult, Emulator,
};

/// `a = 0`: does nothing.
pub const SYSCALL_RESET: u16 = 0;
/// `a = 1`: stops the run loop. The exit status is left in `b`.
pub const SYSCALL_EXIT: u16 = 1;
/// `a = 2`: writes `d` characters starting at `mem[c]` to descriptor `b`.
///
/// Each word is written as a single byte: only its low 8 bits reach the output.
pub const SYSCALL_WRITE: u16 = 2;

/// The only descriptor `syscall write` supports.
pub const FD_STDOUT: u16 = 1;

impl<W: Write> Emulator<W> {
    pub(crate) fn dispatch(&mut self, op: Opcode) -> EmuResult<()> {
        match op {
            Opcode::Nop => Ok(()),
            Opcode::Mov => self.mov(),
            Opcode::Add => self.alu(AluMode::Add),
            Opcode::Sub => self.alu(AluMode::Sub),
            Opcode::Mul => self.alu(AluMode::Mul),
            Opcode::Div => self.alu(AluMode::Div),
            Opcode::Rem => self.alu(AluMode::Rem),
            Opcode::Or => self.alu(AluMode::Or),
            Opcode::Xor => self.alu(AluMode::Xor),
            Opcode::And => self.alu(AluMode::And),
            Opcode::Not => self.not(),
            Opcode::La => self.la(),
            Opcode::Las => self.las(),
            Opcode::Str => self.str(),
            Opcode::Syscall => self.syscall(),
            Opcode::Jmp => self.jmp(),
            Opcode::Jmpl => self.jmpl(),
            Opcode::Push => self.push_source(),
            Opcode::Pop => self.pop(),
            Opcode::Ret => {
                self.registers[Register::Ip] = self.registers[Register::Lr];
                Ok(())
            }
            Opcode::Inc => self.step_register(1),
            Opcode::Dec => self.step_register(u16::MAX),
            Opcode::Cmp => self.cmp(),
        }
    }

    /// Fetches a register index operand.
    pub(crate) fn fetch_destination(&mut self) -> EmuResult<Register> {
        let index = self.fetch()?;
        Ok(Register::try_from(index)?)
    }

    /// Fetches a source operand: the word itself if the immediate bit is set, otherwise the
    /// value of the register it names.
    pub(crate) fn fetch_source(&mut self) -> EmuResult<u16> {
        let word = self.fetch()?;
        if self
            .registers
            .instruction_states()
            .contains(UserState::IMMEDIATE)
        {
            Ok(word)
        } else {
            Ok(*self.registers.by_index(word)?)
        }
    }

    fn mov(&mut self) -> EmuResult<()> {
        let dest = self.fetch_destination()?;
        let src = self.fetch_source()?;
        self.registers[dest] = src;
        Ok(())
    }

    fn alu(&mut self, mode: AluMode) -> EmuResult<()> {
        let dest = self.fetch_destination()?;
        let src = self.fetch_source()?;
        self.registers[dest] = alu::compute(mode, self.registers[dest], src)?;
        Ok(())
    }

    fn not(&mut self) -> EmuResult<()> {
        let dest = self.fetch_destination()?;
        self.registers[dest] = !self.registers[dest];
        Ok(())
    }

    fn la(&mut self) -> EmuResult<()> {
        let dest = self.fetch_destination()?;
        let src = self.fetch_source()?;
        self.registers[dest] = self.ram.read(src)?;
        Ok(())
    }

    fn las(&mut self) -> EmuResult<()> {
        let dest = self.fetch_destination()?;
        self.registers[dest] = self.ram.read(self.registers[dest])?;
        Ok(())
    }

    fn str(&mut self) -> EmuResult<()> {
        let dest = self.fetch_destination()?;
        let src = self.fetch_source()?;
        self.ram.write(self.registers[dest], src)
    }

    fn syscall(&mut self) -> EmuResult<()> {
        match self.registers[Register::A] {
            SYSCALL_RESET => {}
            SYSCALL_EXIT => {
                log::debug!("exit({})", self.registers[Register::B]);
                self.halt();
            }
            SYSCALL_WRITE => {
                let fd = self.registers[Register::B];
                let addr = self.registers[Register::C];
                let len = self.registers[Register::D];
                if fd == FD_STDOUT {
                    for i in 0..len {
                        let byte = self.ram.read(addr.wrapping_add(i))? as u8;
                        self.output_mut().write_all(&[byte])?;
                    }
                    self.output_mut().flush()?;
                }
            }
            other => log::warn!("unknown syscall {other} ignored"),
        }
        Ok(())
    }

    fn jmp(&mut self) -> EmuResult<()> {
        let src = self.fetch_source()?;
        self.registers[Register::Ip] = src;
        Ok(())
    }

    fn jmpl(&mut self) -> EmuResult<()> {
        let src = self.fetch_source()?;
        self.registers[Register::Lr] = self.registers[Register::Ip];
        self.registers[Register::Ip] = src;
        Ok(())
    }

    fn push_source(&mut self) -> EmuResult<()> {
        let src = self.fetch_source()?;
        self.push(src)
    }

    fn pop(&mut self) -> EmuResult<()> {
        let dest = self.fetch_destination()?;
        self.registers[dest] = self.ram.read(self.registers[Register::Sp])?;
        self.registers[Register::Sp] = self.registers[Register::Sp].wrapping_add(1);
        Ok(())
    }

    /// `inc`/`dec`: adds `delta` with wraparound.
    fn step_register(&mut self, delta: u16) -> EmuResult<()> {
        let dest = self.fetch_destination()?;
        self.registers[dest] = self.registers[dest].wrapping_add(delta);
        Ok(())
    }

    fn cmp(&mut self) -> EmuResult<()> {
        let dest = self.fetch_destination()?;
        let src = self.fetch_source()?;
        let flag = alu::compare(self.registers[dest], src);
        self.registers.insert_user_states(flag);
        Ok(())
    }
}
