use crate::plat::{is_declarator, Arity, Opcode, UserState};

use super::{lexer::Lexer, AsmError, AsmResult, Span, Token, TokenKind};

/// A named operand as written in the source: a register, a label, or an integer literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand<'a> {
    pub text: &'a str,
    pub span: Span<'a>,
}

impl<'a> From<Token<'a>> for Operand<'a> {
    fn from(tok: Token<'a>) -> Self {
        Self {
            text: tok.text,
            span: tok.span,
        }
    }
}

/// Raw data following a declarator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Data<'a> {
    /// An integer literal, emitted as one word.
    Integer(Operand<'a>),
    /// A string literal, emitted as one word per byte.
    String(Operand<'a>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstructionNode<'a> {
    pub op: Opcode,
    pub destination: Option<Operand<'a>>,
    pub source: Option<Operand<'a>>,
    /// Immediate bit for integer sources, plus at most one condition bit.
    pub states: UserState,
    pub span: Span<'a>,
}

/// One syntax node of an assembly listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ast<'a> {
    Instruction(InstructionNode<'a>),
    Label { name: &'a str, span: Span<'a> },
    Declaration { declarator: &'a str, data: Data<'a> },
}

impl<'a> Ast<'a> {
    /// Number of words this node emits.
    pub fn size_in_words(&self) -> u16 {
        match self {
            Ast::Instruction(instr) => {
                2 + u16::from(instr.destination.is_some()) + u16::from(instr.source.is_some())
            }
            Ast::Label { .. } => 0,
            Ast::Declaration {
                data: Data::Integer(_),
                ..
            } => 1,
            Ast::Declaration {
                data: Data::String(s),
                ..
            } => s.text.len() as u16,
        }
    }
}

/// Recursive-descent parser with one token of lookahead.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token<'a>,
}

impl<'a> Parser<'a> {
    /// Creates a parser, priming the lookahead with the first token.
    ///
    /// # Errors
    ///
    /// This function will return an error if the first token fails to lex.
    pub fn new(mut lexer: Lexer<'a>) -> AsmResult<Self> {
        let current = lexer.next_token()?;
        Ok(Self { lexer, current })
    }

    /// Parses the whole input, stopping at the first error.
    ///
    /// # Errors
    ///
    /// This function will return an error on the first token that does not fit the grammar.
    pub fn parse(&mut self) -> AsmResult<Vec<Ast<'a>>> {
        let mut tree = vec![];
        while self.current.kind != TokenKind::EndOfFile {
            tree.push(self.parse_next()?);
        }
        log::trace!("parsed {} nodes", tree.len());
        Ok(tree)
    }

    fn parse_next(&mut self) -> AsmResult<Ast<'a>> {
        if self.current.kind != TokenKind::Identifier {
            return Err(self.unexpected());
        }
        if let Some(op) = Opcode::from_mnemonic(self.current.text) {
            self.parse_instruction(op)
        } else if is_declarator(self.current.text) {
            self.parse_declaration()
        } else {
            self.parse_label()
        }
    }

    fn parse_instruction(&mut self, op: Opcode) -> AsmResult<Ast<'a>> {
        let name = self.eat(&[TokenKind::Identifier])?;
        let mut states = UserState::empty();
        let mut destination = None;
        let mut source = None;

        match op.arity() {
            Arity::None => {}
            Arity::Source => {
                source = Some(self.parse_source(&mut states)?);
            }
            Arity::Destination => {
                destination = Some(self.eat(&[TokenKind::Identifier])?.into());
            }
            Arity::Both => {
                destination = Some(self.eat(&[TokenKind::Identifier])?.into());
                self.eat(&[TokenKind::Comma])?;
                source = Some(self.parse_source(&mut states)?);
            }
        }

        if self.current.kind == TokenKind::Comma {
            self.eat(&[TokenKind::Comma])?;
            let flag = self.eat(&[TokenKind::Identifier])?;
            let cond = UserState::from_condition(flag.text).ok_or(AsmError::UnknownCondition {
                loc: flag.span.loc(),
                span: flag.text.to_owned(),
            })?;
            states |= cond;
        }

        Ok(Ast::Instruction(InstructionNode {
            op,
            destination,
            source,
            states,
            span: name.span,
        }))
    }

    fn parse_source(&mut self, states: &mut UserState) -> AsmResult<Operand<'a>> {
        let tok = self.eat(&[TokenKind::Identifier, TokenKind::Integer])?;
        if tok.kind == TokenKind::Integer {
            *states |= UserState::IMMEDIATE;
        }
        Ok(tok.into())
    }

    fn parse_declaration(&mut self) -> AsmResult<Ast<'a>> {
        let declarator = self.eat(&[TokenKind::Identifier])?;
        let value = self.eat(&[TokenKind::String, TokenKind::Integer])?;
        let data = if value.kind == TokenKind::Integer {
            Data::Integer(value.into())
        } else {
            Data::String(value.into())
        };
        Ok(Ast::Declaration {
            declarator: declarator.text,
            data,
        })
    }

    fn parse_label(&mut self) -> AsmResult<Ast<'a>> {
        let name = self.eat(&[TokenKind::Identifier])?;
        self.eat(&[TokenKind::Colon])?;
        Ok(Ast::Label {
            name: name.text,
            span: name.span,
        })
    }

    /// Consumes the current token if it is one of `kinds`.
    fn eat(&mut self, kinds: &[TokenKind]) -> AsmResult<Token<'a>> {
        if kinds.contains(&self.current.kind) {
            let next = self.lexer.next_token()?;
            Ok(std::mem::replace(&mut self.current, next))
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> AsmError {
        AsmError::Syntax {
            loc: self.current.span.loc(),
            span: self.current.text.to_owned(),
        }
    }
}

/// Lexes and parses a whole listing.
///
/// # Errors
///
/// This function will return an error on the first lexical or syntax error.
pub fn parse_program<'a>(stream: &'a str, program_text: &'a str) -> AsmResult<Vec<Ast<'a>>> {
    Parser::new(Lexer::new(stream, program_text))?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(program: &str) -> AsmResult<Vec<Ast<'_>>> {
        parse_program("test.s", program)
    }

    fn instr<'a>(ast: &Ast<'a>) -> InstructionNode<'a> {
        match ast {
            Ast::Instruction(instr) => *instr,
            other => panic!("expected an instruction, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_arity_classes() {
        let tree = parse("nop\nnot a\npop b\nadd c, d\npush 7").unwrap();
        assert_eq!(tree.len(), 5);

        let nop = instr(&tree[0]);
        assert_eq!(nop.op, Opcode::Nop);
        assert!(nop.destination.is_none() && nop.source.is_none());

        let not = instr(&tree[1]);
        assert_eq!(not.source.map(|s| s.text), Some("a"));
        assert!(not.destination.is_none());

        let pop = instr(&tree[2]);
        assert_eq!(pop.destination.map(|d| d.text), Some("b"));
        assert!(pop.source.is_none());

        let add = instr(&tree[3]);
        assert_eq!(add.destination.map(|d| d.text), Some("c"));
        assert_eq!(add.source.map(|s| s.text), Some("d"));
        assert_eq!(add.states, UserState::empty());

        let push = instr(&tree[4]);
        assert_eq!(push.states, UserState::IMMEDIATE);
    }

    #[test]
    fn test_parse_condition_clause() {
        let tree = parse("jmp loop, ne\nmov a, 3, gt\ninc a, o").unwrap();
        assert_eq!(instr(&tree[0]).states, UserState::ZERO);
        assert_eq!(
            instr(&tree[1]).states,
            UserState::IMMEDIATE | UserState::CARRY
        );
        assert_eq!(instr(&tree[2]).states, UserState::OVERFLOW);
    }

    #[test]
    fn test_parse_labels_and_data() {
        let tree = parse("msg:\n    db \"hey\"\n    dw 42\n").unwrap();
        assert!(matches!(tree[0], Ast::Label { name: "msg", .. }));
        assert!(matches!(
            tree[1],
            Ast::Declaration {
                declarator: "db",
                data: Data::String(Operand { text: "hey", .. })
            }
        ));
        assert!(matches!(
            tree[2],
            Ast::Declaration {
                data: Data::Integer(Operand { text: "42", .. }),
                ..
            }
        ));
        assert_eq!(tree[1].size_in_words(), 3);
        assert_eq!(tree[2].size_in_words(), 1);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse("mov a 5"),
            Err(AsmError::Syntax {
                loc: (1, 7),
                span: "5".to_owned()
            })
        );
        assert_eq!(
            parse("start\nnop"),
            Err(AsmError::Syntax {
                loc: (2, 1),
                span: "nop".to_owned()
            })
        );
        assert!(matches!(parse("42"), Err(AsmError::Syntax { .. })));
        assert!(matches!(
            parse("ret, le"),
            Err(AsmError::UnknownCondition { .. })
        ));
        assert!(matches!(
            parse("pop 3"),
            Err(AsmError::Syntax { .. })
        ));
    }
}
