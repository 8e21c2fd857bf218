//! LLM-routed delegation loop for data engineering requests.
//!
//! A router model picks one executor (object storage, tabular transform,
//! warehouse) per step for a natural-language request; failed steps go to a
//! recovery resolver that proposes a corrected action using similar prior
//! outputs as context. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (decision parsing, target
//!   selection, phase transitions, similarity ranking, run state). No I/O.
//! - **[`io`]**: Side-effecting operations (config, child processes, model and
//!   executor backends, prompts, run logs). Isolated behind traits for tests.
//!
//! Orchestration modules ([`agents`], [`step`], [`looping`], [`start`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod start;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
