//! Deterministic, pure logic shared by the hooks.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod dirs;
pub mod output;
pub mod payload;
pub mod types;
