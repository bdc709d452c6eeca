//! Property-based tests for the assembler and the execution engine.
//!
//! - Instruction size depends only on which operands are present
//! - Forward label references resolve to the summed size of what precedes them
//! - Conditional execution follows the flag predicate
//! - `cmp` flags accumulate

use std::fmt::Write;

use proptest::prelude::*;

use cpu16::{
    asm::{assemble, Assembler},
    emu::{alu, EmuConfig, Emulator},
    plat::{Arity, Opcode, Register, UserState, CONDITION_MASK},
};

const CONDITIONS: [&str; 8] = ["eq", "z", "ne", "nz", "gt", "c", "lt", "o"];

fn register_name() -> impl Strategy<Value = &'static str> {
    prop::sample::select(Register::ALL.to_vec()).prop_map(Register::name)
}

fn source_text() -> impl Strategy<Value = String> {
    prop_oneof![
        register_name().prop_map(str::to_owned),
        any::<u16>().prop_map(|value| value.to_string()),
    ]
}

fn emulator(program: &[u16]) -> Emulator<Vec<u8>> {
    let config = EmuConfig {
        debug: true,
        ..EmuConfig::default()
    };
    let mut emu = Emulator::with_output(config, Vec::new()).unwrap();
    emu.load_program(program).unwrap();
    emu
}

proptest! {
    #[test]
    fn instruction_size_follows_arity(
        op in prop::sample::select(Opcode::ALL.to_vec()),
        dest in register_name(),
        src in source_text(),
        cond in prop::option::of(prop::sample::select(CONDITIONS.to_vec())),
    ) {
        let mut text = op.mnemonic().to_owned();
        let (has_dest, has_src) = match op.arity() {
            Arity::None => (false, false),
            Arity::Source => {
                write!(text, " {src}").unwrap();
                (false, true)
            }
            Arity::Destination => {
                write!(text, " {dest}").unwrap();
                (true, false)
            }
            Arity::Both => {
                write!(text, " {dest}, {src}").unwrap();
                (true, true)
            }
        };
        if let Some(cond) = cond {
            write!(text, ", {cond}").unwrap();
        }

        let bin = assemble("prop.s", &text).unwrap();
        prop_assert_eq!(bin.len(), 2 + usize::from(has_dest) + usize::from(has_src));
        prop_assert_eq!(bin[0], op as u16);
    }

    #[test]
    fn forward_label_resolves_to_preceding_size(
        fillers in prop::collection::vec((0u8..3, any::<u16>()), 0..40),
    ) {
        let mut text = String::from("jmp target\n");
        let mut offset = 3u16;
        for (kind, value) in &fillers {
            match kind {
                0 => {
                    text.push_str("nop\n");
                    offset += 2;
                }
                1 => {
                    writeln!(text, "mov a, {value}").unwrap();
                    offset += 4;
                }
                _ => {
                    writeln!(text, "dw {value}").unwrap();
                    offset += 1;
                }
            }
        }
        text.push_str("target:\nnop\n");

        let mut asm = Assembler::default();
        let bin = asm.assemble("prop.s", &text).unwrap();
        prop_assert_eq!(asm.label("target"), Some(offset));
        prop_assert_eq!(bin[1], UserState::IMMEDIATE.bits());
        prop_assert_eq!(bin[2], offset);
        prop_assert_eq!(bin.len(), usize::from(offset) + 2);
    }

    #[test]
    fn conditional_execution_follows_flags(states in any::<u16>(), usr in any::<u16>()) {
        let states = states | UserState::IMMEDIATE.bits();
        let mut emu = emulator(&[Opcode::Mov as u16, states, Register::A as u16, 1]);
        emu.start::<&str>(&[]).unwrap();
        emu.registers[Register::Usr] = usr;
        emu.step().unwrap();

        let unconditioned = states & CONDITION_MASK == 0;
        let fires = unconditioned || (states & CONDITION_MASK) & (usr & CONDITION_MASK) != 0;
        prop_assert_eq!(emu.registers[Register::A] == 1, fires);
        prop_assert_eq!(emu.registers[Register::Ip], 4);
    }

    #[test]
    fn cmp_flags_accumulate(pairs in prop::collection::vec((any::<u16>(), any::<u16>()), 1..20)) {
        let mut text = String::new();
        let mut expected = UserState::empty();
        for (left, right) in &pairs {
            writeln!(text, "mov a, {left}\ncmp a, {right}\nadd b, a\nnot c").unwrap();
            expected |= alu::compare(*left, *right);
        }

        let bin = assemble("prop.s", &text).unwrap();
        let mut emu = emulator(&bin);
        emu.run::<&str>(&[]).unwrap();
        prop_assert_eq!(emu.registers.user_states(), expected);
    }
}
