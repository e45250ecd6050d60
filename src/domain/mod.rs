//! Usage: Domain modules (configuration, token cache, credential record, SASL encoding).

pub mod config;
pub mod credentials;
pub mod token_cache;
pub mod xoauth2;
