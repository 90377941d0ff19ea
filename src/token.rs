//! Tokens (§3, §4.1).
//!
//! A token never changes after the tokenizer submits it — `Lexer::tokenize`
//! hands back an append-only `Vec<Token>` that the parser walks with
//! `peek(0)`/`peek(1)`.

use crate::hash::fnv1a;
use crate::source::SourceId;

/// The single-character operators the tokenizer recognizes (§4.1).
pub const OPERATORS: &[char] =
    &['=', '(', ')', '[', ']', '{', '}', '+', '-', '$', '.', ',', ';', '?'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Integer,
    Float,
    StringLit,
    /// One of [`OPERATORS`].
    Operator(char),
    /// A `//? ...` doc-comment; span covers the comment body only.
    DocComment,
    Eof,
}

/// A single lexed token: its kind, the byte range it spans in the owning
/// [`crate::source::Source`], a cached FNV-1a hash of the lexeme, and the
/// line/column it started at (1-based, for diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub source: SourceId,
    pub start: u32,
    pub end: u32,
    pub hash: u32,
    pub line: u32,
    pub col: u32,
}

impl Token {
    pub fn new(
        kind: TokenKind,
        source: SourceId,
        start: u32,
        end: u32,
        line: u32,
        col: u32,
        text: &str,
    ) -> Token {
        let hash = fnv1a(text[start as usize..end as usize].as_bytes());
        Token { kind, source, start, end, hash, line, col }
    }

    pub fn lexeme<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start as usize..self.end as usize]
    }

    pub fn len(&self) -> u32 { self.end - self.start }

    pub fn is_empty(&self) -> bool { self.start == self.end }

    pub fn is_operator(&self, c: char) -> bool { matches!(self.kind, TokenKind::Operator(op) if op == c) }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_is_cached_from_lexeme() {
        let source = "hello";
        let t = Token::new(TokenKind::Identifier, SourceId(0), 0, 5, 1, 1, source);
        assert_eq!(t.hash, fnv1a(b"hello"));
    }

    #[test]
    fn lexeme_round_trips_span() {
        let source = "local int x";
        let t = Token::new(TokenKind::Identifier, SourceId(0), 6, 9, 1, 7, source);
        assert_eq!(t.lexeme(source), "int");
    }
}
