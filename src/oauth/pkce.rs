//! Usage: PKCE (RFC 7636) verifier/challenge pair for one authorization attempt.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub(crate) const CHALLENGE_METHOD: &str = "S256";

#[derive(Clone)]
pub struct PkcePair {
    pub(crate) verifier: String,
    pub(crate) challenge: String,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkcePair {
    pub fn generate() -> Self {
        let mut random = [0u8; 48];
        OsRng.fill_bytes(&mut random);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(random))
    }

    pub(crate) fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_verifier_length_is_within_rfc_bounds() {
        let pair = PkcePair::generate();
        assert!(pair.verifier.len() >= 43);
        assert!(pair.verifier.len() <= 128);
        assert_eq!(pair.challenge, PkcePair::from_verifier(pair.verifier.clone()).challenge);
    }

    #[test]
    fn challenge_matches_rfc_appendix_b() {
        let pair = PkcePair::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string());
        assert_eq!(pair.challenge, "E9Melhoa2OwvFrEMTJguCpdKrgPtwRmcyJ4SLDGKWFM");
    }
}
