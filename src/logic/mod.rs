//! Logic modules: pure decisions with no I/O.
//!
//! # Modules
//!
//! - `text`: idempotent line edits for config files
//! - `selection`: which steps run, and which failures are fatal

pub mod selection;
pub mod text;
