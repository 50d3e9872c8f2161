//! Pure data types for dsh: job numbers, status labels, listing rows.
//!
//! This crate is a leaf dependency with no syscalls and no I/O, so the REPL
//! and any embedding front end can describe jobs without linking the kernel.

pub mod job;

pub use job::*;
