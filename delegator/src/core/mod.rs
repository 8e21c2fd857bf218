//! Deterministic, pure logic shared by the control loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod decision;
pub mod machine;
pub mod selector;
pub mod similarity;
pub mod state;
pub mod types;
