//! # JSON Graph Model
//!
//! Plain data that crosses every boundary: query ↔ store ↔ data source ↔ caller.
//!
//! Design rule: no I/O, no locks, no async in this module.

pub mod key;
pub mod path;
pub mod path_set;
pub mod node;
pub mod envelope;

pub use key::Key;
pub use path::{Path, PathValue};
pub use path_set::{collapse, expand_all, Expansion, IntoPathSet, PathSet, Selector};
pub use node::{normalize_expires, Boxed, Branch, Node, Terminal, Timestamp};
pub use envelope::Envelope;
