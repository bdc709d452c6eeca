use crate::plat::UserState;

use super::{EmuError, EmuResult};

/// The two-operand arithmetic and logic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluMode {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Or,
    Xor,
    And,
}

/// Computes `left <mode> right` with 16-bit wraparound.
pub fn compute(mode: AluMode, left: u16, right: u16) -> EmuResult<u16> {
    let result = match mode {
        AluMode::Add => left.wrapping_add(right),
        AluMode::Sub => left.wrapping_sub(right),
        AluMode::Mul => left.wrapping_mul(right),
        AluMode::Div => left.checked_div(right).ok_or(EmuError::DivisionByZero)?,
        AluMode::Rem => left.checked_rem(right).ok_or(EmuError::DivisionByZero)?,
        AluMode::Or => left | right,
        AluMode::Xor => left ^ right,
        AluMode::And => left & right,
    };
    Ok(result)
}

/// The flag `cmp` ORs into `usr`: the sign of `left - right` as a signed 16-bit value.
pub fn compare(left: u16, right: u16) -> UserState {
    let result = left.wrapping_sub(right) as i16;
    match result {
        0 => UserState::ZERO,
        r if r > 0 => UserState::CARRY,
        _ => UserState::OVERFLOW,
    }
}
