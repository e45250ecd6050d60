//! Usage: Cross-cutting helpers (errors, secret handling, clock).

pub mod error;
pub mod security;
pub(crate) mod time;
