//! Usage: Process-level wiring (CLI parsing, logging, session orchestration).

pub mod cli;
pub mod logging;
pub mod session;
