//! Usage: Security-sensitive helpers (token masking, constant-time equality, random state).

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

const TOKEN_MASK_PREFIX_LEN: usize = 6;
const TOKEN_MASK_SUFFIX_LEN: usize = 4;
const STATE_TOKEN_BYTES: usize = 32;

pub(crate) fn mask_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let len = trimmed.chars().count();
    if len <= TOKEN_MASK_PREFIX_LEN + TOKEN_MASK_SUFFIX_LEN {
        return "*".repeat(len.min(8));
    }

    let prefix: String = trimmed.chars().take(TOKEN_MASK_PREFIX_LEN).collect();
    let suffix: String = trimmed
        .chars()
        .skip(len - TOKEN_MASK_SUFFIX_LEN)
        .collect();
    format!("{prefix}...{suffix}")
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Correlation token for one interactive authorization attempt.
pub(crate) fn new_state_token() -> String {
    let mut bytes = [0u8; STATE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
