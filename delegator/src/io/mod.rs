//! I/O adapters: config, child processes, model and executor backends, prompts, run logs.

pub mod config;
pub mod executor;
pub mod init;
pub mod model;
pub mod process;
pub mod prompt;
pub mod run_log;
