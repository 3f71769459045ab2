//! PKCE (Proof Key for Code Exchange) generation and verification.
//!
//! Implements the S256 code challenge method per RFC 7636.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// A verifier/challenge pair for one authorization request.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// The secret kept server-side until the code exchange.
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`, sent in the authorization URL.
    pub challenge: String,
}

/// Generate a fresh PKCE pair.
///
/// The verifier is 43 characters of base64url over 256 random bits,
/// within the RFC 7636 length bounds (43-128 characters).
#[must_use]
pub fn generate_pair() -> PkcePair {
    let mut entropy = [0u8; 32];
    entropy[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    entropy[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());

    let verifier = URL_SAFE_NO_PAD.encode(entropy);
    let challenge = challenge_for(&verifier);
    PkcePair { verifier, challenge }
}

/// Compute the S256 challenge for a verifier.
#[must_use]
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Verify a PKCE S256 code challenge.
#[must_use]
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    challenge_for(code_verifier) == code_challenge
}
