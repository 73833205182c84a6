//! Typed argument structs for the external programs `SystemHost` runs.
//!
//! Each struct maps Rust fields to the exact flags of one command line.

pub mod packages;
pub mod system;
