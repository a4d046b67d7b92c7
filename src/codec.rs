//! Reversible obfuscation of session token values.
//!
//! Each byte of the input is XORed with the secret repeated cyclically, and
//! the result is stored as standard base64 text. Encoding is deterministic so
//! the store can look records up by their encoded value.
//!
//! This is obfuscation only: anyone holding the secret can forge values, and
//! there is no authentication tag.

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl TokenCodec {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.is_empty() {
            anyhow::bail!("token secret must not be empty");
        }
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
        })
    }

    /// Plain (client-visible) value to its stored form.
    pub fn encode(&self, plain: &str) -> String {
        STANDARD.encode(xor_cycle(plain.as_bytes(), &self.secret))
    }

    /// Stored form back to the plain value.
    pub fn decode(&self, stored: &str) -> anyhow::Result<String> {
        let bytes = STANDARD
            .decode(stored)
            .context("stored token value is not valid base64")?;
        String::from_utf8(xor_cycle(&bytes, &self.secret))
            .context("decoded token value is not valid UTF-8")
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Length-preserving XOR of `input` against `key` repeated cyclically.
/// `key` must be non-empty.
pub fn xor_cycle(input: &[u8], key: &[u8]) -> Vec<u8> {
    input
        .iter()
        .zip(key.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect()
}
