//! # Path Syntax
//!
//! String form of path sets. Pure functions — no I/O, no state.

pub mod lexer;
pub mod parser;

use crate::model::PathSet;
use crate::Result;

/// Parse path syntax into a validated path set.
pub fn parse(text: &str) -> Result<PathSet> {
    let tokens = lexer::tokenize(text)?;
    parser::parse_path_set(&tokens)
}
