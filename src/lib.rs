#![doc = include_str!("../README.md")]

pub mod asm;
pub mod emu;
pub mod plat;
