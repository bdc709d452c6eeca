//! Common platform code between the assembler and the emulator.
//!
//! Everything both sides of the binary format must agree on lives here: opcode and register
//! encodings, the user/reserved state bits, the memory layout and the instruction word layout.

use std::fmt;

use thiserror::Error;

/// An error for the core platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("invalid opcode: {0}")]
    InvalidOpcode(u16),
    #[error("invalid register: {0}")]
    InvalidRegister(u16),
    #[error("invalid operands for instruction `{}`", .0.mnemonic())]
    InvalidInstruction(Opcode),
    #[error("unexpected end of program while decoding")]
    UnexpectedEnd,
}

/// Type alias for Result<T, [PlatformError]>.
pub type PResult<T> = Result<T, PlatformError>;

/// Total number of addressable 16-bit words.
pub const MEMORY_SIZE: usize = 4096;
/// First word of the text (program) segment.
pub const SEGMENT_TEXT_START: u16 = 0;
/// First word of the data segment.
pub const SEGMENT_DATA_START: u16 = 1024;
/// First word of the heap segment.
pub const SEGMENT_HEAP_START: u16 = 2048;
/// Initial stack pointer. One past the last word; the stack grows downward.
pub const SEGMENT_STACK_START: u16 = MEMORY_SIZE as u16;
/// Capacity of the text segment in words.
pub const SEGMENT_TEXT_SIZE: usize = (SEGMENT_DATA_START - SEGMENT_TEXT_START) as usize;
/// Capacity of the data segment in words.
pub const SEGMENT_DATA_SIZE: u16 = SEGMENT_HEAP_START - SEGMENT_DATA_START;

bitflags::bitflags! {
    /// User states: addressing mode and condition bits.
    ///
    /// The same layout is used for the flags word of an encoded instruction (`usar`) and for
    /// the condition flags register (`usr`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UserState: u16 {
        /// The source operand word is a literal value rather than a register index.
        const IMMEDIATE = 1 << 0;
        /// Set by `cmp` when both operands were equal.
        const ZERO = 1 << 1;
        /// Set by `cmp` when the destination was greater than the source.
        const CARRY = 1 << 2;
        /// Set by `cmp` when the destination was less than the source.
        const OVERFLOW = 1 << 3;
    }
}

/// Every bit except [`UserState::IMMEDIATE`]; the part of a flags word that conditions execution.
pub const CONDITION_MASK: u16 = 0xfffe;

impl UserState {
    /// Looks up the condition bit named by a trailing `, <flag>` clause.
    ///
    /// `eq`/`z` and `ne`/`nz` share the zero bit.
    pub fn from_condition(name: &str) -> Option<Self> {
        match name {
            "eq" | "z" | "ne" | "nz" => Some(Self::ZERO),
            "gt" | "c" => Some(Self::CARRY),
            "lt" | "o" => Some(Self::OVERFLOW),
            _ => None,
        }
    }

    /// Whether any condition bit is set.
    pub fn is_conditioned(self) -> bool {
        self.bits() & CONDITION_MASK != 0
    }

    /// Whether an instruction carrying these states may run, given the current `usr` value.
    pub fn matches(self, usr: UserState) -> bool {
        (self.bits() & CONDITION_MASK) & (usr.bits() & CONDITION_MASK) != 0
    }
}

bitflags::bitflags! {
    /// Reserved run-state flags (`rsr`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ReservedState: u16 {
        /// The run loop keeps going while this is set.
        const RUNNING = 1 << 0;
    }
}

/// Data declarators. Declarations are anonymous; put a label in front of one to name it.
pub const DECLARATORS: [&str; 2] = ["db", "dw"];

/// Whether `name` is a data declarator.
pub fn is_declarator(name: &str) -> bool {
    DECLARATORS.contains(&name)
}

/// The fourteen registers.
///
/// `A` - `E` are general purpose. The rest are reserved by convention, but nothing stops a
/// program from naming them as operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Register {
    A = 0,
    B,
    C,
    D,
    E,
    /// Instruction pointer
    Ip,
    /// Link register
    Lr,
    /// Data pointer
    Dp,
    /// Heap pointer
    Hp,
    /// Stack pointer
    Sp,
    /// User states (condition flags)
    Usr,
    /// Reserved states (run flags)
    Rsr,
    /// Opcode/operand addressing scratch
    Opar,
    /// User states addressing scratch
    Usar,
}

impl Register {
    pub const COUNT: usize = 14;

    pub const ALL: [Register; Self::COUNT] = [
        Self::A,
        Self::B,
        Self::C,
        Self::D,
        Self::E,
        Self::Ip,
        Self::Lr,
        Self::Dp,
        Self::Hp,
        Self::Sp,
        Self::Usr,
        Self::Rsr,
        Self::Opar,
        Self::Usar,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::C => "c",
            Self::D => "d",
            Self::E => "e",
            Self::Ip => "ip",
            Self::Lr => "lr",
            Self::Dp => "dp",
            Self::Hp => "hp",
            Self::Sp => "sp",
            Self::Usr => "usr",
            Self::Rsr => "rsr",
            Self::Opar => "opar",
            Self::Usar => "usar",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|reg| reg.name() == name)
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u16> for Register {
    type Error = PlatformError;

    fn try_from(value: u16) -> Result<Self, PlatformError> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(PlatformError::InvalidRegister(value))
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operand shapes, chosen by mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    /// `<name>`
    None,
    /// `<name> <source>`
    Source,
    /// `<name> <destination>`
    Destination,
    /// `<name> <destination>, <source>`
    Both,
}

impl Arity {
    /// Number of operand words following the opcode and flags words.
    pub fn operand_words(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Source | Self::Destination => 1,
            Self::Both => 2,
        }
    }
}

/// The opcodes, in encoding order.
///
/// Notation below: `D` is the destination register, `S` the source (a register or an
/// immediate), `mem` the main memory. Arithmetic wraps at 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Does nothing
    Nop = 0,
    /// `D <- S`
    Mov,
    /// `D <- D + S`
    Add,
    /// `D <- D - S`
    Sub,
    /// `D <- D * S`
    Mul,
    /// `D <- D / S`
    Div,
    /// `D <- D % S`
    Rem,
    /// `D <- D | S`
    Or,
    /// `D <- D ^ S`
    Xor,
    /// `D <- D & S`
    And,
    /// `D <- ~D`. The single operand names a register.
    Not,
    /// `D <- mem[S]`
    La,
    /// `D <- mem[D]`
    Las,
    /// `mem[D] <- S`
    Str,
    /// Software trap, call number in `a`
    Syscall,
    /// `ip <- S`
    Jmp,
    /// `lr <- ip; ip <- S`
    Jmpl,
    /// `sp <- sp - 1; mem[sp] <- S`
    Push,
    /// `D <- mem[sp]; sp <- sp + 1`
    Pop,
    /// `ip <- lr`
    Ret,
    /// `D <- D + 1`
    Inc,
    /// `D <- D - 1`
    Dec,
    /// Compares `D` with `S` (signed), ORing zero/carry/overflow into `usr`
    Cmp,
}

impl Opcode {
    pub const COUNT: usize = 23;

    pub const ALL: [Opcode; Self::COUNT] = [
        Self::Nop,
        Self::Mov,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Rem,
        Self::Or,
        Self::Xor,
        Self::And,
        Self::Not,
        Self::La,
        Self::Las,
        Self::Str,
        Self::Syscall,
        Self::Jmp,
        Self::Jmpl,
        Self::Push,
        Self::Pop,
        Self::Ret,
        Self::Inc,
        Self::Dec,
        Self::Cmp,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Mov => "mov",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::And => "and",
            Self::Not => "not",
            Self::La => "la",
            Self::Las => "las",
            Self::Str => "str",
            Self::Syscall => "syscall",
            Self::Jmp => "jmp",
            Self::Jmpl => "jmpl",
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Ret => "ret",
            Self::Inc => "inc",
            Self::Dec => "dec",
            Self::Cmp => "cmp",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.mnemonic() == name)
    }

    pub fn arity(self) -> Arity {
        match self {
            Self::Nop | Self::Syscall | Self::Ret => Arity::None,
            Self::Not
            | Self::Jmp
            | Self::Jmpl
            | Self::Push
            | Self::Las
            | Self::Inc
            | Self::Dec => Arity::Source,
            Self::Pop => Arity::Destination,
            Self::Mov
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Rem
            | Self::Or
            | Self::Xor
            | Self::And
            | Self::La
            | Self::Str
            | Self::Cmp => Arity::Both,
        }
    }
}

impl TryFrom<u16> for Opcode {
    type Error = PlatformError;

    fn try_from(value: u16) -> Result<Self, PlatformError> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(PlatformError::InvalidOpcode(value))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// The source operand of an encoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Register(Register),
    Immediate(u16),
}

impl Operand {
    fn to_word(self) -> u16 {
        match self {
            Self::Register(reg) => reg as u16,
            Self::Immediate(value) => value,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(reg) => write!(f, "{reg}"),
            Self::Immediate(value) => write!(f, "{value}"),
        }
    }
}

/// One encoded instruction.
///
/// Layout, one 16-bit word each:
/// ```text
/// <opcode> <user states> [destination] [source]
/// ```
/// The destination word is always a register index. The source word is a literal when
/// [`UserState::IMMEDIATE`] is set in the states word, otherwise a register index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub op: Opcode,
    pub states: UserState,
    pub destination: Option<Register>,
    pub source: Option<Operand>,
}

impl Instruction {
    /// Checks if the operands match the opcode's arity, and the immediate bit matches the source.
    ///
    /// # Errors
    ///
    /// This function will return an error if the instruction's shape is invalid for its opcode.
    pub fn validate(self) -> PResult<()> {
        let shape_ok = match self.op.arity() {
            Arity::None => self.destination.is_none() && self.source.is_none(),
            Arity::Source => self.destination.is_none() && self.source.is_some(),
            Arity::Destination => self.destination.is_some() && self.source.is_none(),
            Arity::Both => self.destination.is_some() && self.source.is_some(),
        };
        let immediate_ok = match self.source {
            Some(Operand::Immediate(_)) => self.states.contains(UserState::IMMEDIATE),
            Some(Operand::Register(_)) => !self.states.contains(UserState::IMMEDIATE),
            None => true,
        };
        if shape_ok && immediate_ok {
            Ok(())
        } else {
            Err(PlatformError::InvalidInstruction(self.op))
        }
    }

    /// Encoded size in words.
    pub fn size(self) -> u16 {
        2 + u16::from(self.destination.is_some()) + u16::from(self.source.is_some())
    }

    /// Generates the machine words for this instruction.
    ///
    /// # Errors
    ///
    /// This function will return an error if the instruction's shape is invalid for its opcode.
    pub fn to_words(self) -> PResult<Vec<u16>> {
        self.validate()?;
        let mut words = vec![self.op as u16, self.states.bits()];
        if let Some(dest) = self.destination {
            words.push(dest as u16);
        }
        if let Some(src) = self.source {
            words.push(src.to_word());
        }
        Ok(words)
    }

    /// Decodes the instruction starting at `words[0]`, returning it with its size in words.
    ///
    /// # Errors
    ///
    /// This function will return an error if the words do not form a valid instruction.
    pub fn from_words(words: &[u16]) -> PResult<(Self, usize)> {
        let word = |i: usize| words.get(i).copied().ok_or(PlatformError::UnexpectedEnd);
        let op = Opcode::try_from(word(0)?)?;
        let states = UserState::from_bits_retain(word(1)?);
        let source_from = |w: u16| -> PResult<Operand> {
            if states.contains(UserState::IMMEDIATE) {
                Ok(Operand::Immediate(w))
            } else {
                Ok(Operand::Register(Register::try_from(w)?))
            }
        };
        let (destination, source) = match op.arity() {
            Arity::None => (None, None),
            Arity::Source => (None, Some(source_from(word(2)?)?)),
            Arity::Destination => (Some(Register::try_from(word(2)?)?), None),
            Arity::Both => (
                Some(Register::try_from(word(2)?)?),
                Some(source_from(word(3)?)?),
            ),
        };
        let this = Self {
            op,
            states,
            destination,
            source,
        };
        Ok((this, this.size() as usize))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        match (self.destination, self.source) {
            (Some(dest), Some(src)) => write!(f, " {dest}, {src}")?,
            (Some(dest), None) => write!(f, " {dest}")?,
            (None, Some(src)) => write!(f, " {src}")?,
            (None, None) => {}
        }
        if self.states.contains(UserState::ZERO) {
            write!(f, ", z")?;
        }
        if self.states.contains(UserState::CARRY) {
            write!(f, ", c")?;
        }
        if self.states.contains(UserState::OVERFLOW) {
            write!(f, ", o")?;
        }
        Ok(())
    }
}

/// Serializes a program image as headerless little-endian words.
pub fn words_to_le_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Reads a program image of little-endian words. A trailing odd byte is ignored.
pub fn le_bytes_to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_encode() {
        let instr = Instruction {
            op: Opcode::Mov,
            states: UserState::IMMEDIATE,
            destination: Some(Register::C),
            source: Some(Operand::Immediate(12345)),
        };
        assert_eq!(instr.to_words().unwrap(), vec![1, 1, 2, 12345]);
    }

    #[test]
    fn test_instruction_decode() {
        let words = [0x0011, 0x0000, 0x0003, 0xffff];
        let (instr, size) = Instruction::from_words(&words).unwrap();
        assert_eq!(size, 3);
        assert_eq!(
            instr,
            Instruction {
                op: Opcode::Push,
                states: UserState::empty(),
                destination: None,
                source: Some(Operand::Register(Register::D)),
            }
        );
        assert_eq!(instr.to_string(), "push d");
    }

    #[test]
    fn test_instruction_validate() {
        let instr = Instruction {
            op: Opcode::Ret,
            states: UserState::empty(),
            destination: Some(Register::A),
            source: None,
        };
        assert_eq!(
            instr.to_words(),
            Err(PlatformError::InvalidInstruction(Opcode::Ret))
        );
        let instr = Instruction {
            op: Opcode::Jmp,
            states: UserState::empty(),
            destination: None,
            source: Some(Operand::Immediate(4)),
        };
        assert!(instr.validate().is_err());
    }

    #[test]
    fn test_tables() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(*op));
        }
        for (i, reg) in Register::ALL.iter().enumerate() {
            assert_eq!(reg.index(), i);
            assert_eq!(Register::from_name(reg.name()), Some(*reg));
        }
        assert_eq!(Opcode::try_from(22), Ok(Opcode::Cmp));
        assert_eq!(Opcode::try_from(23), Err(PlatformError::InvalidOpcode(23)));
        assert_eq!(
            Register::try_from(14),
            Err(PlatformError::InvalidRegister(14))
        );
    }

    #[test]
    fn test_condition_names() {
        assert_eq!(UserState::from_condition("eq"), Some(UserState::ZERO));
        assert_eq!(UserState::from_condition("ne"), Some(UserState::ZERO));
        assert_eq!(UserState::from_condition("nz"), Some(UserState::ZERO));
        assert_eq!(UserState::from_condition("gt"), Some(UserState::CARRY));
        assert_eq!(UserState::from_condition("o"), Some(UserState::OVERFLOW));
        assert_eq!(UserState::from_condition("le"), None);
    }

    #[test]
    fn test_condition_match() {
        let cond = UserState::ZERO | UserState::IMMEDIATE;
        assert!(cond.is_conditioned());
        assert!(!UserState::IMMEDIATE.is_conditioned());
        assert!(cond.matches(UserState::ZERO | UserState::CARRY));
        assert!(!cond.matches(UserState::CARRY | UserState::IMMEDIATE));
    }

    #[test]
    fn test_le_image() {
        let bytes = words_to_le_bytes(&[0x0102, 0xa0b0]);
        assert_eq!(bytes, vec![0x02, 0x01, 0xb0, 0xa0]);
        assert_eq!(le_bytes_to_words(&[0x02, 0x01, 0xb0, 0xa0, 0x7f]), vec![0x0102, 0xa0b0]);
    }
}
