//! Usage: SASL XOAUTH2 initial client response used by IMAP/SMTP/POP servers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const CONTROL_A: u8 = 0x01;

/// `base64("user=" username ^A "auth=Bearer " token ^A ^A)`.
pub fn encode_xoauth2(username: &str, access_token: &str) -> String {
    let mut raw = Vec::with_capacity(username.len() + access_token.len() + 20);
    raw.extend_from_slice(b"user=");
    raw.extend_from_slice(username.as_bytes());
    raw.push(CONTROL_A);
    raw.extend_from_slice(b"auth=Bearer ");
    raw.extend_from_slice(access_token.as_bytes());
    raw.push(CONTROL_A);
    raw.push(CONTROL_A);
    STANDARD.encode(raw)
}
