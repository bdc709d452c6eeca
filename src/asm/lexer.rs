use nom::{
    branch::alt,
    bytes::complete::{tag, take, take_until, take_while},
    character::complete::{char, digit1, satisfy},
    combinator::{map, recognize},
    sequence::pair,
    IResult,
};

use super::{AsmError, AsmResult, Input, Span, Token, TokenKind, EOF_TEXT};

fn is_whitespace(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\n'
}

fn is_identifier_tail(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn lex_whitespace(inp: Input) -> IResult<Input, Input> {
    take_while(is_whitespace)(inp)
}

pub fn lex_identifier(inp: Input) -> IResult<Input, Input> {
    recognize(pair(
        satisfy(|c| c == '_' || c.is_ascii_alphabetic()),
        take_while(is_identifier_tail),
    ))(inp)
}

/// Everything except strings, which need their own error.
pub fn lex_simple(inp: Input) -> IResult<Input, (TokenKind, Input)> {
    alt((
        map(lex_identifier, |s| (TokenKind::Identifier, s)),
        map(digit1, |s| (TokenKind::Integer, s)),
        map(tag(","), |s| (TokenKind::Comma, s)),
        map(tag(":"), |s| (TokenKind::Colon, s)),
        map(take(1usize), |s| (TokenKind::Unhandled, s)),
    ))(inp)
}

/// Scans the body of a string whose opening quote has already been consumed.
pub fn lex_string_body(inp: Input) -> IResult<Input, Input> {
    let (rest, body) = take_until("\"")(inp)?;
    let (rest, _) = char('"')(rest)?;
    Ok((rest, body))
}

/// Pulls tokens one at a time out of a source buffer.
///
/// Once the input is exhausted every call returns an [`TokenKind::EndOfFile`] token.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    input: Input<'a>,
}

impl<'a> Lexer<'a> {
    pub fn new(stream: &'a str, program_text: &'a str) -> Self {
        Self {
            input: Input::new_extra(program_text, stream),
        }
    }

    /// Lexes and returns the next token.
    ///
    /// # Errors
    ///
    /// This function will return an error if a string literal is not closed before the end of the
    /// input.
    pub fn next_token(&mut self) -> AsmResult<Token<'a>> {
        if let Ok((rest, _)) = lex_whitespace(self.input) {
            self.input = rest;
        }
        let start = self.input;
        if start.fragment().is_empty() {
            return Ok(Token::new(TokenKind::EndOfFile, EOF_TEXT, Span::at(start, 0)));
        }

        if let Ok((body_start, _)) = char::<_, nom::error::Error<Input>>('"')(start) {
            let (rest, body) = lex_string_body(body_start).map_err(|_| {
                AsmError::UnterminatedString {
                    loc: Span::at(start, 0).loc(),
                }
            })?;
            self.input = rest;
            let text = *body.fragment();
            return Ok(Token::new(
                TokenKind::String,
                text,
                Span::at(start, text.len()),
            ));
        }

        let (rest, (kind, text)) = lex_simple(start).map_err(|_| AsmError::Syntax {
            loc: Span::at(start, 0).loc(),
            span: start.fragment().chars().take(1).collect(),
        })?;
        self.input = rest;
        let text = *text.fragment();
        Ok(Token::new(kind, text, Span::at(start, text.len())))
    }
}
