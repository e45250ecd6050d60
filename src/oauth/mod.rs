//! Usage: Identity-provider side of the flow: loopback redirect capture, PKCE, token endpoint.

pub mod browser;
pub mod callback_server;
pub mod client;
pub(crate) mod id_token;
pub mod pkce;
pub(crate) mod token_exchange;
