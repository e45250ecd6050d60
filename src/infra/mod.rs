//! Usage: Infrastructure adapters (filesystem locations, credential persistence, encryption).

pub mod app_paths;
pub mod credential_store;
pub mod encryption;
