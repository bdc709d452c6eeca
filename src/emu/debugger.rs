use std::{cell::RefCell, io::Write};

use anyhow::{Context, Result};
use easy_repl::{command, repl::LoopStatus, CommandStatus, Repl};

use crate::plat::Register;

use super::emulator::Emulator;

/// Interactive single-stepping front end for an [`Emulator`] that has already been started.
pub struct Debugger<'b, W: Write> {
    pub emu: RefCell<&'b mut Emulator<W>>,
}

fn parse_address(addr: &str) -> Result<u16> {
    let parsed = match addr.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => addr
            .parse::<u16>()
            .or_else(|_| u16::from_str_radix(addr, 16)),
    };
    parsed.with_context(|| format!("invalid address `{addr}`"))
}

impl<'b, W: Write> Debugger<'b, W> {
    pub fn new(emu: &'b mut Emulator<W>) -> Self {
        Self {
            emu: RefCell::new(emu),
        }
    }

    fn print_current(&self) {
        let emu = self.emu.borrow();
        let ip = emu.registers[Register::Ip];
        match emu.disassemble(ip) {
            Ok(instr) => eprintln!("Current instruction:\n[ip={ip:04X}] --> {instr}"),
            Err(e) => eprintln!("Current instruction:\n[ip={ip:04X}] --> <{e}>"),
        }
    }

    pub fn repl(&self) -> Result<()> {
        let mut repl = Repl::builder()
            .description("cpu16 debug REPL")
            .add(
                "c",
                command! {
                    "Continue execution until the program exits",
                    () => || {
                        let status = self.emu.borrow_mut().run_while_running()?;
                        eprintln!("exited with status {status}");
                        Ok(CommandStatus::Quit)
                    }
                },
            )
            .add(
                "s",
                command! {
                    "Step one instruction",
                    () => || {
                        self.emu.borrow_mut().step()?;
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "pr",
                command! {
                    "Print the value of all registers",
                    () => || {
                        eprint!("{}", self.emu.borrow().registers);
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "peek",
                command! {
                    "Peek a word from memory (decimal, or hex with or without 0x)",
                    (addr:String) => |addr: String| {
                        let addr = parse_address(&addr)?;
                        let val = self.emu.borrow().ram.read(addr)?;
                        eprintln!("[{addr:04X}]={val:04X}");
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "dis",
                command! {
                    "Disassemble the instruction at ip",
                    () => || {
                        self.print_current();
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "halt",
                command! {
                    "Halt execution",
                    () => || {
                        self.emu.borrow_mut().halt();
                        Ok(CommandStatus::Quit)
                    }
                },
            )
            .build()?;
        eprintln!("cpu16 debug REPL");
        'repl: loop {
            eprintln!();
            self.print_current();

            let status = repl.next()?;
            if let LoopStatus::Break = status {
                break 'repl;
            }
            if !self.emu.borrow().is_running() {
                break 'repl;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("4095").unwrap(), 4095);
        assert_eq!(parse_address("0x800").unwrap(), 0x800);
        assert_eq!(parse_address("ff").unwrap(), 0xff);
        assert!(parse_address("zz").is_err());
    }
}
