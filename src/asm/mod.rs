//! The assembler module.
//!
//! Source text goes through [`lexer::Lexer`], [`parser::Parser`] and finally
//! [`assembler::Assembler`], which turns the syntax tree into machine words.

use std::fmt;

use nom_locate::LocatedSpan;
use thiserror::Error;

use crate::plat::PlatformError;

pub mod assembler;
pub mod lexer;
pub mod parser;

pub use assembler::Assembler;

/// Lexer input: the remaining source text, tagged with the stream (file) name.
pub type Input<'a> = LocatedSpan<&'a str, &'a str>;

/// An error for the assembler module.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AsmError {
    #[error("unterminated string starting at ({}:{})", .loc.0, .loc.1)]
    UnterminatedString { loc: (u32, usize) },
    #[error("syntax error at ({}:{}): unexpected token: {}", .loc.0, .loc.1, .span)]
    Syntax { loc: (u32, usize), span: String },
    #[error("unknown condition at ({}:{}): {}", .loc.0, .loc.1, .span)]
    UnknownCondition { loc: (u32, usize), span: String },
    #[error("unknown register at ({}:{}): {}", .loc.0, .loc.1, .span)]
    UnknownRegister { loc: (u32, usize), span: String },
    #[error("invalid integer at ({}:{}): {} (must be <= {})", .loc.0, .loc.1, .span, u16::MAX)]
    InvalidInteger { loc: (u32, usize), span: String },
    #[error("unresolved symbol at ({}:{}): {}", .loc.0, .loc.1, .span)]
    UnresolvedSymbol { loc: (u32, usize), span: String },
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Type alias for Result<T, [AsmError]>.
pub type AsmResult<T> = Result<T, AsmError>;

/// Where a lexical unit came from. Rows and columns start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span<'a> {
    pub stream: &'a str,
    pub index: usize,
    pub row: u32,
    pub column: usize,
    pub length: usize,
}

impl<'a> Span<'a> {
    /// The position at the start of `inp`, covering `length` bytes.
    pub fn at(inp: Input<'a>, length: usize) -> Self {
        Self {
            stream: inp.extra,
            index: inp.location_offset(),
            row: inp.location_line(),
            column: inp.get_utf8_column(),
            length,
        }
    }

    pub fn loc(&self) -> (u32, usize) {
        (self.row, self.column)
    }
}

impl fmt::Display for Span<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.stream, self.row, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    Integer,
    String,
    Comma,
    Colon,
    Unhandled,
    EndOfFile,
}

/// An assembly language token. Output for the lexer, input for the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token<'a> {
    pub kind: TokenKind,
    /// The token's text. Strings exclude their quotes.
    pub text: &'a str,
    pub span: Span<'a>,
}

/// Text carried by the end-of-file token.
pub const EOF_TEXT: &str = "<EndOfFile>";

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind, text: &'a str, span: Span<'a>) -> Self {
        Self { kind, text, span }
    }
}

/// Assembles `program_text` into machine words. `stream` names the source in diagnostics.
///
/// # Errors
///
/// This function will return an error if the source has a lexical or syntax error, or references
/// an unknown register or label.
pub fn assemble(stream: &str, program_text: &str) -> AsmResult<Vec<u16>> {
    Assembler::default().assemble(stream, program_text)
}
