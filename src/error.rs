//! Error kinds for the simulator's external boundary.
//!
//! The core (octree, deque, scheduler) has no recoverable errors: arithmetic
//! degeneracies are absorbed by softening, and deque operations report an
//! empty sentinel rather than failing. Everything fallible lives at the
//! edges: CLI parsing, file I/O, and input-file parsing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("argument error: {0}")]
    Argument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),
}
