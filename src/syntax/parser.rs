//! Path syntax recursive descent parser.
//!
//! ```text
//! path     := head ( '.' name | '[' indexer ']' )*
//! head     := name | '[' indexer ']'
//! name     := Identifier | Integer
//! indexer  := member ( ',' member )*
//! member   := Integer ( ( '..' | '...' ) Integer )? | StringLiteral | Identifier
//! ```

use crate::model::{Key, PathSet, Selector};
use crate::{Error, Result};
use super::lexer::{Token, TokenKind};

/// Parser state — wraps a token slice with cursor.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &'t Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn advance(&mut self) -> &'t Token {
        let tok = self.peek();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'t Token> {
        let tok = self.peek();
        if tok.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(format!("Expected {:?}, got {:?} '{}'", kind, tok.kind, tok.text)))
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, msg: String) -> Error {
        Error::InvalidPathSet {
            position: Some(self.peek().span.start),
            message: msg,
        }
    }

    // ========================================================================
    // Grammar
    // ========================================================================

    fn parse_path(&mut self) -> Result<Vec<Selector>> {
        let mut selectors = Vec::new();

        if self.at(TokenKind::LBracket) {
            selectors.push(self.parse_indexer()?);
        } else {
            selectors.push(self.parse_name()?);
        }

        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    selectors.push(self.parse_name()?);
                }
                TokenKind::LBracket => selectors.push(self.parse_indexer()?),
                TokenKind::Eof => break,
                _ => {
                    let tok = self.peek();
                    return Err(self.error(format!("Unexpected {:?} '{}'", tok.kind, tok.text)));
                }
            }
        }

        Ok(selectors)
    }

    fn parse_name(&mut self) -> Result<Selector> {
        let tok = self.peek();
        match tok.kind {
            TokenKind::Identifier => {
                self.advance();
                Ok(Selector::Key(Key::Str(tok.text.clone())))
            }
            TokenKind::Integer => {
                self.advance();
                Ok(Selector::Key(Key::Int(integer(tok)?)))
            }
            _ => Err(self.error(format!("Expected a key, got {:?} '{}'", tok.kind, tok.text))),
        }
    }

    fn parse_indexer(&mut self) -> Result<Selector> {
        self.expect(TokenKind::LBracket)?;
        let mut members = vec![self.parse_member()?];
        while self.eat(TokenKind::Comma) {
            members.push(self.parse_member()?);
        }
        self.expect(TokenKind::RBracket)?;

        if members.len() == 1 {
            Ok(members.swap_remove(0))
        } else {
            Ok(Selector::Set(members))
        }
    }

    fn parse_member(&mut self) -> Result<Selector> {
        let tok = self.peek();
        match tok.kind {
            TokenKind::Integer => {
                self.advance();
                let from = integer(tok)?;
                if self.eat(TokenKind::DotDot) {
                    let to = integer(self.expect(TokenKind::Integer)?)?;
                    Ok(Selector::Range { from, to })
                } else if self.eat(TokenKind::DotDotDot) {
                    let end = integer(self.expect(TokenKind::Integer)?)?;
                    Ok(Selector::Range { from, to: end.saturating_sub(1) })
                } else {
                    Ok(Selector::Key(Key::Int(from)))
                }
            }
            TokenKind::StringLiteral | TokenKind::Identifier => {
                self.advance();
                Ok(Selector::Key(Key::Str(tok.text.clone())))
            }
            TokenKind::RBracket => Err(self.error("Empty indexer".into())),
            _ => Err(self.error(format!("Expected a key or range, got {:?} '{}'", tok.kind, tok.text))),
        }
    }
}

fn integer(tok: &Token) -> Result<i64> {
    tok.text.parse::<i64>().map_err(|_| Error::InvalidPathSet {
        position: Some(tok.span.start),
        message: format!("Integer out of range: {}", tok.text),
    })
}

/// Parse a token stream into a validated path set.
///
/// The stream normally ends with `Eof`, as produced by `tokenize`; an empty
/// slice is rejected as an empty path.
pub fn parse_path_set(tokens: &[Token]) -> Result<PathSet> {
    if tokens.is_empty() {
        return Err(Error::InvalidPathSet { position: Some(0), message: "Empty path".into() });
    }
    let mut parser = Parser::new(tokens);
    if parser.at(TokenKind::Eof) {
        return Err(parser.error("Empty path".into()));
    }
    let selectors = parser.parse_path()?;
    PathSet::new(selectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::lexer::tokenize;
    use crate::model::Path;
    use crate::path;

    fn expand(input: &str) -> Vec<Path> {
        parse_path_set(&tokenize(input).unwrap()).unwrap().expand().collect()
    }

    #[test]
    fn test_dotted_path() {
        assert_eq!(expand("lolomo.summary"), vec![path!["lolomo", "summary"]]);
        assert_eq!(expand("videos.1234.summary"), vec![path!["videos", 1234, "summary"]]);
    }

    #[test]
    fn test_brackets_and_ranges() {
        assert_eq!(
            expand("lolomo[0..2].summary"),
            vec![
                path!["lolomo", 0, "summary"],
                path!["lolomo", 1, "summary"],
                path!["lolomo", 2, "summary"],
            ]
        );
        assert_eq!(expand("a[0...2]"), vec![path!["a", 0], path!["a", 1]]);
    }

    #[test]
    fn test_key_sets_and_quoted_keys() {
        assert_eq!(
            expand("videos[1234, 766]['summary', \"art\"]"),
            vec![
                path!["videos", 1234, "summary"],
                path!["videos", 1234, "art"],
                path!["videos", 766, "summary"],
                path!["videos", 766, "art"],
            ]
        );
        assert_eq!(expand("['two words'].x"), vec![path!["two words", "x"]]);
    }

    #[test]
    fn test_empty_token_stream_is_rejected() {
        assert!(matches!(
            parse_path_set(&[]),
            Err(Error::InvalidPathSet { position: Some(0), .. })
        ));
    }

    #[test]
    fn test_syntax_errors_carry_positions() {
        for (input, at) in [("", 0), ("a.", 2), ("a[]", 2), ("a[0..]", 5), ("a b", 2), ("a[1,", 4)] {
            let err = parse_path_set(&tokenize(input).unwrap()).unwrap_err();
            match err {
                Error::InvalidPathSet { position, .. } => assert_eq!(position, Some(at), "{input}"),
                other => panic!("{input}: unexpected {other:?}"),
            }
        }
    }
}
