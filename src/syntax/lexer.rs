//! Path syntax lexer — tokenizes `genreList[0][0..1]['summary']`.

use crate::{Error, Result};

/// A token from the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
}

/// Source span (byte offsets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Integer,
    StringLiteral,

    LBracket, RBracket, Comma,
    Dot,
    DotDot,     // ..  inclusive range
    DotDotDot,  // ... exclusive range

    Eof,
}

/// Tokenize path syntax.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => { chars.next(); }

            // String literals
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\\')) => {
                            if let Some((_, escaped)) = chars.next() {
                                match escaped {
                                    'n' => s.push('\n'),
                                    't' => s.push('\t'),
                                    '\\' => s.push('\\'),
                                    c if c == quote => s.push(c),
                                    c => { s.push('\\'); s.push(c); }
                                }
                            }
                        }
                        Some((end, c)) if c == quote => {
                            tokens.push(Token {
                                kind: TokenKind::StringLiteral,
                                span: Span { start: pos, end: end + 1 },
                                text: s,
                            });
                            break;
                        }
                        Some((_, c)) => s.push(c),
                        None => return Err(Error::InvalidPathSet {
                            position: Some(pos),
                            message: "Unterminated string literal".into(),
                        }),
                    }
                }
            }

            // Integers, optionally negative
            c if c.is_ascii_digit() || (c == '-' && matches!(chars.clone().nth(1), Some((_, d)) if d.is_ascii_digit())) => {
                let mut num = String::new();
                if c == '-' {
                    num.push('-');
                    chars.next();
                }
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Integer,
                    span: Span { start: pos, end: pos + num.len() },
                    text: num,
                });
            }

            // Identifiers
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '$' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Identifier,
                    span: Span { start: pos, end: pos + ident.len() },
                    text: ident,
                });
            }

            '[' => { chars.next(); tokens.push(punct(TokenKind::LBracket, pos, "[")); }
            ']' => { chars.next(); tokens.push(punct(TokenKind::RBracket, pos, "]")); }
            ',' => { chars.next(); tokens.push(punct(TokenKind::Comma, pos, ",")); }
            '.' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '.'))) {
                    chars.next();
                    if matches!(chars.peek(), Some(&(_, '.'))) {
                        chars.next();
                        tokens.push(punct(TokenKind::DotDotDot, pos, "..."));
                    } else {
                        tokens.push(punct(TokenKind::DotDot, pos, ".."));
                    }
                } else {
                    tokens.push(punct(TokenKind::Dot, pos, "."));
                }
            }

            other => {
                return Err(Error::InvalidPathSet {
                    position: Some(pos),
                    message: format!("Unexpected character '{other}'"),
                });
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span { start: input.len(), end: input.len() },
        text: String::new(),
    });
    Ok(tokens)
}

fn punct(kind: TokenKind, pos: usize, text: &str) -> Token {
    Token {
        kind,
        span: Span { start: pos, end: pos + text.len() },
        text: text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_ranges() {
        use TokenKind::*;
        assert_eq!(
            kinds("lolomo[0..2]"),
            vec![Identifier, LBracket, Integer, DotDot, Integer, RBracket, Eof]
        );
        assert_eq!(
            kinds("a[0...2]"),
            vec![Identifier, LBracket, Integer, DotDotDot, Integer, RBracket, Eof]
        );
    }

    #[test]
    fn test_tokenize_strings_and_negative_numbers() {
        let toks = tokenize("a['two words', -3]").unwrap();
        assert_eq!(toks[2].kind, TokenKind::StringLiteral);
        assert_eq!(toks[2].text, "two words");
        assert_eq!(toks[4].kind, TokenKind::Integer);
        assert_eq!(toks[4].text, "-3");
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("a['oops").unwrap_err();
        assert!(matches!(err, Error::InvalidPathSet { position: Some(2), .. }));
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a{b}").unwrap_err();
        assert!(matches!(err, Error::InvalidPathSet { position: Some(1), .. }));
    }
}
