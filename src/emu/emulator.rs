use std::io::{self, Stdout, Write};

use crate::plat::{
    Instruction, Opcode, PResult, PlatformError, Register, ReservedState, SEGMENT_TEXT_START,
};

use super::{
    clock::Clock, ram::Ram, registers::Registers, Allocation, EmuConfig, EmuError, EmuResult,
};

/// The emulator's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmuState {
    /// Reading the opcode word at `ip` into `opar`.
    Fetching,
    /// Reading the flags word at `ip` into `usar`.
    Decoding,
    /// Running the handler for `opar`.
    Executing,
    /// Not running. Set before [`Emulator::start`] and after the running flag clears.
    Halted,
}

/// The main emulation context.
///
/// Owns the register file and memory. Characters written by `syscall` go to `output`.
pub struct Emulator<W: Write = Stdout> {
    pub registers: Registers,
    pub ram: Ram,
    pub state: EmuState,
    pub config: EmuConfig,
    program_size: u16,
    output: W,
    clock: Option<Clock>,
}

impl Emulator<Stdout> {
    /// Creates an emulator writing to standard output.
    ///
    /// # Errors
    ///
    /// This function will return an error if the configured clock cannot be created.
    pub fn new(config: EmuConfig) -> EmuResult<Self> {
        Self::with_output(config, io::stdout())
    }
}

impl<W: Write> Emulator<W> {
    /// Creates an emulator writing to `output`.
    ///
    /// # Errors
    ///
    /// This function will return an error if the configured clock cannot be created.
    pub fn with_output(config: EmuConfig, output: W) -> EmuResult<Self> {
        let clock = config.clock_rate_hz.map(Clock::new).transpose()?;
        Ok(Self {
            registers: Registers::new(),
            ram: Ram::new(),
            state: EmuState::Halted,
            config,
            program_size: 0,
            output,
            clock,
        })
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub(crate) fn output_mut(&mut self) -> &mut W {
        &mut self.output
    }

    pub fn program_size(&self) -> u16 {
        self.program_size
    }

    /// Loads a program into the text segment.
    ///
    /// # Errors
    ///
    /// This function will return an error, leaving the emulator untouched, if the program does not
    /// fit in the text segment.
    pub fn load_program(&mut self, program: &[u16]) -> EmuResult<()> {
        self.ram.load_text(program).map_err(|e| {
            log::debug!("failed to load program of {} words", program.len());
            e
        })?;
        self.program_size = program.len() as u16;
        log::debug!("loaded program: {} words", self.program_size);
        Ok(())
    }

    pub fn clear_memory(&mut self) {
        self.ram.clear();
        self.program_size = 0;
        log::debug!("cleared memory");
    }

    pub fn clear_program(&mut self) {
        self.ram.clear_text();
        self.program_size = 0;
        log::debug!("cleared text segment");
    }

    /// Hands out `size + 1` words and returns their address.
    ///
    /// The returned address is always `hp`. Under [`Allocation::Literal`] it is `dp` that
    /// advances, so `hp` stays put and successive allocations overlap.
    pub fn allocate(&mut self, size: u16) -> u16 {
        let address = self.registers[Register::Hp];
        let reserved = size.wrapping_add(1);
        match self.config.allocation {
            Allocation::Literal => {
                self.registers[Register::Dp] = self.registers[Register::Dp].wrapping_add(reserved)
            }
            Allocation::Heap => self.registers[Register::Hp] = address.wrapping_add(reserved),
        }
        address
    }

    /// `sp <- sp - 1; mem[sp] <- value`
    pub fn push(&mut self, value: u16) -> EmuResult<()> {
        let sp = self.registers[Register::Sp].wrapping_sub(1);
        self.registers[Register::Sp] = sp;
        self.ram.write(sp, value)
    }

    /// Copies each argument into freshly allocated memory and pushes its address, then pushes
    /// the argument count.
    pub fn load_arguments<S: AsRef<str>>(&mut self, args: &[S]) -> EmuResult<()> {
        for arg in args {
            let bytes = arg.as_ref().as_bytes();
            let address = self.allocate(bytes.len() as u16);
            for (offset, byte) in bytes.iter().enumerate() {
                self.ram
                    .write(address.wrapping_add(offset as u16), u16::from(*byte))?;
            }
            self.push(address)?;
            log::debug!("argument {:?} at {address}", arg.as_ref());
        }
        self.push(args.len() as u16)
    }

    pub fn is_running(&self) -> bool {
        self.registers
            .reserved_states()
            .contains(ReservedState::RUNNING)
    }

    /// The value in `b`, reported as the exit status.
    pub fn exit_status(&self) -> u16 {
        self.registers[Register::B]
    }

    /// Injects the arguments and raises the running flag, without executing anything.
    pub fn start<S: AsRef<str>>(&mut self, args: &[S]) -> EmuResult<()> {
        self.load_arguments(args)?;
        self.registers
            .set_reserved_states(ReservedState::RUNNING, true);
        self.state = EmuState::Fetching;
        Ok(())
    }

    /// Runs the program with `args` until it exits, returning the exit status.
    ///
    /// # Errors
    ///
    /// This function will return an error if the arguments do not fit in memory, or on the first
    /// runtime fault.
    pub fn run<S: AsRef<str>>(&mut self, args: &[S]) -> EmuResult<u16> {
        self.start(args)?;
        self.run_while_running()
    }

    /// Steps until the running flag clears.
    ///
    /// Outside debug mode a program that runs off its end is stepped back and retried forever.
    pub fn run_while_running(&mut self) -> EmuResult<u16> {
        while self.is_running() {
            if let Err(e) = self.step() {
                log::debug!("fault: {e}");
                self.halt();
                return Err(e);
            }
        }
        self.halt();
        Ok(self.exit_status())
    }

    /// Clears the running flag.
    pub fn halt(&mut self) {
        self.registers
            .set_reserved_states(ReservedState::RUNNING, false);
        if self.state != EmuState::Halted {
            self.state = EmuState::Halted;
            log::debug!("halted with status {}", self.exit_status());
            if self.config.debug {
                log::debug!("registers:\n{}", self.registers);
            }
        }
    }

    /// Runs a single fetch/decode/execute cycle.
    pub fn step(&mut self) -> EmuResult<()> {
        if !self.is_running() {
            self.halt();
            return Ok(());
        }
        if let Some(clock) = self.clock.as_mut() {
            clock.tick();
        }

        self.state = EmuState::Fetching;
        let at = self.registers[Register::Ip];
        match self.fetch() {
            Ok(_) => {}
            Err(EmuError::InstructionPointerOutOfBounds(ip)) if self.config.debug => {
                log::debug!("instruction pointer {ip} out of bounds, program halted");
                self.halt();
                return Ok(());
            }
            Err(EmuError::InstructionPointerOutOfBounds(ip)) => {
                log::warn!("instruction pointer {ip} out of bounds, retrying");
                self.registers[Register::Ip] = ip.wrapping_sub(1);
                self.retry();
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.state = EmuState::Decoding;
        self.decode()?;

        if log::log_enabled!(log::Level::Trace) {
            match self.disassemble(at) {
                Ok(instr) => log::trace!("[{at:04X}] {instr}"),
                Err(e) => log::trace!("[{at:04X}] <{e}>"),
            }
        }

        self.state = EmuState::Executing;
        self.execute()
    }

    /// The rest of a cycle whose opcode fetch ran off the program: decode the last word again and
    /// execute whatever `opar` still holds. Faults in this cycle are dropped, so the run loop
    /// keeps spinning until something clears the running flag.
    fn retry(&mut self) {
        self.state = EmuState::Decoding;
        let cycle = self.decode().and_then(|()| {
            self.state = EmuState::Executing;
            self.execute()
        });
        if let Err(e) = cycle {
            log::trace!("retry cycle fault ignored: {e}");
        }
    }

    /// Reads the word at `ip` into `opar` and advances `ip`.
    pub(crate) fn fetch(&mut self) -> EmuResult<u16> {
        let ip = self.registers[Register::Ip];
        if ip >= self.program_size {
            return Err(EmuError::InstructionPointerOutOfBounds(ip));
        }
        let word = self.ram.read(SEGMENT_TEXT_START.wrapping_add(ip))?;
        self.registers[Register::Opar] = word;
        self.registers[Register::Ip] = ip.wrapping_add(1);
        Ok(word)
    }

    /// Reads the flags word at `ip` into `usar` and advances `ip`.
    fn decode(&mut self) -> EmuResult<()> {
        let ip = self.registers[Register::Ip];
        self.registers[Register::Usar] = self.ram.read(SEGMENT_TEXT_START.wrapping_add(ip))?;
        self.registers[Register::Ip] = ip.wrapping_add(1);
        Ok(())
    }

    /// Dispatches `opar` unless its condition bits miss every bit in `usr`.
    fn execute(&mut self) -> EmuResult<()> {
        let op = Opcode::try_from(self.registers[Register::Opar])?;
        let states = self.registers.instruction_states();
        if states.is_conditioned() && !states.matches(self.registers.user_states()) {
            let ip = self.registers[Register::Ip];
            self.registers[Register::Ip] = ip.wrapping_add(op.arity().operand_words());
            log::trace!("skipped {op}");
            return Ok(());
        }
        self.dispatch(op)
    }

    /// Decodes the instruction stored at text address `addr`.
    pub fn disassemble(&self, addr: u16) -> PResult<Instruction> {
        let start = SEGMENT_TEXT_START.wrapping_add(addr) as usize;
        let words = self
            .ram
            .memory
            .get(start..)
            .ok_or(PlatformError::UnexpectedEnd)?;
        Instruction::from_words(words).map(|(instr, _)| instr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plat::{Opcode, UserState};

    fn emu(program: &[u16]) -> Emulator<Vec<u8>> {
        let mut emu = Emulator::with_output(EmuConfig::default(), vec![]).unwrap();
        emu.load_program(program).unwrap();
        emu
    }

    #[test]
    fn test_load_arguments() {
        let mut emu = emu(&[]);
        emu.load_arguments(&["ab", "xyz"]).unwrap();
        // literal allocation: both strings start at hp
        assert_eq!(emu.registers[Register::Hp], 2048);
        assert_eq!(emu.registers[Register::Dp], 1024 + 3 + 4);
        assert_eq!(&emu.ram.memory[2048..2051], &[b'x' as u16, b'y' as u16, b'z' as u16]);
        assert_eq!(emu.registers[Register::Sp], 4093);
        assert_eq!(&emu.ram.memory[4093..4096], &[2, 2048, 2048]);
    }

    #[test]
    fn test_load_arguments_heap_allocation() {
        let config = EmuConfig {
            allocation: Allocation::Heap,
            ..EmuConfig::default()
        };
        let mut emu = Emulator::with_output(config, vec![]).unwrap();
        emu.load_arguments(&["ab", "xyz"]).unwrap();
        assert_eq!(emu.registers[Register::Hp], 2048 + 3 + 4);
        assert_eq!(emu.registers[Register::Dp], 1024);
        assert_eq!(&emu.ram.memory[2048..2050], &[b'a' as u16, b'b' as u16]);
        assert_eq!(&emu.ram.memory[2051..2054], &[b'x' as u16, b'y' as u16, b'z' as u16]);
        assert_eq!(&emu.ram.memory[4093..4096], &[2, 2051, 2048]);
    }

    #[test]
    fn test_fetch_decode() {
        let mut emu = emu(&[Opcode::Nop as u16, 0]);
        emu.start::<&str>(&[]).unwrap();
        emu.step().unwrap();
        assert_eq!(emu.registers[Register::Ip], 2);
        assert_eq!(emu.registers[Register::Opar], Opcode::Nop as u16);
        assert_eq!(emu.state, EmuState::Executing);
        assert!(matches!(
            emu.fetch(),
            Err(EmuError::InstructionPointerOutOfBounds(2))
        ));
    }

    #[test]
    fn test_debug_halts_at_end_of_program() {
        let config = EmuConfig {
            debug: true,
            ..EmuConfig::default()
        };
        let mut emu = Emulator::with_output(config, vec![]).unwrap();
        emu.load_program(&[Opcode::Mov as u16, 1, 1, 3]).unwrap();
        assert_eq!(emu.run::<&str>(&[]).unwrap(), 3);
        assert_eq!(emu.state, EmuState::Halted);
    }

    #[test]
    fn test_retry_out_of_bounds_fetch() {
        let mut emu = emu(&[Opcode::Inc as u16, 0, 0]);
        emu.start::<&str>(&[]).unwrap();
        emu.step().unwrap();
        assert_eq!(emu.registers[Register::Ip], 3);
        // off the end: step back, decode the last word again, run the stale opar (nop)
        emu.step().unwrap();
        assert_eq!(emu.registers[Register::Ip], 3);
        assert_eq!(emu.registers[Register::A], 1);
        assert!(emu.is_running());
    }

    #[test]
    fn test_retry_never_faults() {
        for program in ["mov a, 100", "mov a, 1", "push 7", "inc b\n jmp 0, z"] {
            let bin = crate::asm::assemble("test.s", program).unwrap();
            let mut emu = emu(&bin);
            emu.start::<&str>(&[]).unwrap();
            for cycle in 0..10_000 {
                if let Err(e) = emu.step() {
                    panic!("{program:?} faulted on cycle {cycle}: {e}");
                }
            }
            assert!(emu.is_running(), "{program:?} stopped");
            assert!(emu.registers[Register::Ip] >= emu.program_size());
            assert_eq!(emu.state, EmuState::Executing);
        }
    }

    #[test]
    fn test_retry_on_empty_program() {
        let mut emu = emu(&[]);
        emu.start::<&str>(&[]).unwrap();
        for _ in 0..100 {
            emu.step().unwrap();
        }
        assert!(emu.is_running());
    }

    #[test]
    fn test_invalid_opcode() {
        let mut emu = emu(&[23, 0]);
        assert!(matches!(emu.run::<&str>(&[]), Err(EmuError::InvalidOpcode(23))));
        assert_eq!(emu.state, EmuState::Halted);
    }

    #[test]
    fn test_skipped_instruction_skips_operands() {
        let program = [
            Opcode::Mov as u16,
            (UserState::IMMEDIATE | UserState::ZERO).bits(),
            0,
            42,
            Opcode::Inc as u16,
            0,
            1,
        ];
        let mut emu = emu(&program);
        emu.start::<&str>(&[]).unwrap();
        emu.step().unwrap();
        assert_eq!(emu.registers[Register::Ip], 4);
        assert_eq!(emu.registers[Register::A], 0);
        emu.step().unwrap();
        assert_eq!(emu.registers[Register::B], 1);
    }

    #[test]
    fn test_load_rejects_large_program() {
        let mut emu = emu(&[1, 2]);
        assert!(matches!(
            emu.load_program(&[0; 1024]),
            Err(EmuError::ProgramTooLarge { .. })
        ));
        assert_eq!(emu.program_size(), 2);
        emu.load_program(&[0; 1023]).unwrap();
        assert_eq!(emu.program_size(), 1023);
        emu.clear_program();
        assert_eq!(emu.program_size(), 0);
    }
}
