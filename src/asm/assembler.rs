use rustc_hash::FxHashMap;

use crate::plat::{Instruction, Operand, Register, UserState};

use super::{
    parser::{parse_program, Ast, Data, InstructionNode, Operand as SourceOperand},
    AsmError, AsmResult,
};

/// An assembly context capable of translating a source file into machine words.
///
/// Generation is two-pass: the first pass records the word offset of every label, the second
/// emits words, so labels may be referenced before they are defined.
#[derive(Debug, Default)]
pub struct Assembler<'a> {
    labels: FxHashMap<&'a str, u16>,
}

impl<'a> Assembler<'a> {
    /// Generates machine words from assembly source code.
    ///
    /// # Errors
    ///
    /// This function will return an error if the provided assembly source is not valid syntax, or
    /// if an operand names neither a register nor a known label.
    pub fn assemble(&mut self, stream: &'a str, program_text: &'a str) -> AsmResult<Vec<u16>> {
        let tree = parse_program(stream, program_text)?;
        self.generate(&tree)
    }

    /// Word offset of a label collected by the last generation, if any.
    pub fn label(&self, name: &str) -> Option<u16> {
        self.labels.get(name).copied()
    }

    /// First pass: record the offset of every label. The first definition of a name wins.
    pub fn collect_labels(&mut self, tree: &[Ast<'a>]) {
        self.labels.clear();
        let mut offset = 0u16;
        for node in tree {
            match node {
                Ast::Label { name, span } => {
                    if self.labels.contains_key(name) {
                        log::warn!("{span}: duplicate label `{name}` ignored");
                    } else {
                        log::trace!("label `{name}` at {offset}");
                        self.labels.insert(*name, offset);
                    }
                }
                _ => offset = offset.wrapping_add(node.size_in_words()),
            }
        }
        log::debug!("collected {} labels, {} words", self.labels.len(), offset);
    }

    /// Runs both passes over a parsed listing.
    ///
    /// # Errors
    ///
    /// This function will return an error if an operand cannot be encoded.
    pub fn generate(&mut self, tree: &[Ast<'a>]) -> AsmResult<Vec<u16>> {
        self.collect_labels(tree);

        let mut out = vec![];
        for node in tree {
            match node {
                Ast::Instruction(instr) => {
                    out.extend(self.lower_instruction(instr)?.to_words()?);
                }
                Ast::Label { .. } => {}
                Ast::Declaration {
                    data: Data::Integer(value),
                    ..
                } => out.push(parse_integer(value)?),
                Ast::Declaration {
                    data: Data::String(value),
                    ..
                } => out.extend(value.text.bytes().map(u16::from)),
            }
        }
        Ok(out)
    }

    fn lower_instruction(&self, instr: &InstructionNode<'a>) -> AsmResult<Instruction> {
        let mut states = instr.states;
        let destination = instr
            .destination
            .map(|dest| {
                Register::from_name(dest.text).ok_or(AsmError::UnknownRegister {
                    loc: dest.span.loc(),
                    span: dest.text.to_owned(),
                })
            })
            .transpose()?;
        let source = match instr.source {
            None => None,
            Some(src) if states.contains(UserState::IMMEDIATE) => {
                Some(Operand::Immediate(parse_integer(&src)?))
            }
            Some(src) => {
                if let Some(reg) = Register::from_name(src.text) {
                    Some(Operand::Register(reg))
                } else if let Some(addr) = self.label(src.text) {
                    // label addresses are literals
                    states |= UserState::IMMEDIATE;
                    Some(Operand::Immediate(addr))
                } else {
                    return Err(AsmError::UnresolvedSymbol {
                        loc: src.span.loc(),
                        span: src.text.to_owned(),
                    });
                }
            }
        };
        Ok(Instruction {
            op: instr.op,
            states,
            destination,
            source,
        })
    }
}

fn parse_integer(value: &SourceOperand<'_>) -> AsmResult<u16> {
    value
        .text
        .parse::<u16>()
        .map_err(|_| AsmError::InvalidInteger {
            loc: value.span.loc(),
            span: value.text.to_owned(),
        })
}
