//! Rotating identifier served over GATT
//!
//! Token derivation is not part of this crate. A deployment plugs its own
//! scheme (HMAC chain, pre-provisioned OTP tokens, ...) in through
//! [`TokenProvider`]. [`RandomTokenProvider`] is the stand-in used until then:
//! it fills every token with fresh random bytes.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::fmt;

/// Default token length in bytes
pub const DEFAULT_TOKEN_LEN: usize = 160;

/// A locally broadcast (or remotely read) identifier
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(Vec<u8>);

impl Token {
    /// Wrap raw bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw token bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Token length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the token holds no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short hex prefix for log lines
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..self.0.len().min(4)])
    }

    /// Consume into raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({} bytes, {}..)", self.0.len(), self.fingerprint())
    }
}

/// Source of the local rotating identifier
pub trait TokenProvider: Send + Sync {
    /// Length of every token this provider hands out
    fn token_len(&self) -> usize;

    /// Produce the next identifier to serve
    fn next_token(&mut self) -> Token;

    /// Check a token presented by a peer
    fn validate(&self, presented: &[u8]) -> bool;
}

/// Placeholder provider: every token is `len` random bytes
pub struct RandomTokenProvider {
    rng: StdRng,
    len: usize,
}

impl RandomTokenProvider {
    /// Create a provider seeded from the OS entropy source
    pub fn new(len: usize) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            len,
        }
    }

    /// Create a provider with a fixed seed (reproducible runs)
    pub fn with_seed(len: usize, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            len,
        }
    }
}

impl Default for RandomTokenProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_LEN)
    }
}

impl TokenProvider for RandomTokenProvider {
    fn token_len(&self) -> usize {
        self.len
    }

    fn next_token(&mut self) -> Token {
        let mut bytes = vec![0u8; self.len];
        self.rng.fill_bytes(&mut bytes);
        Token(bytes)
    }

    // Random tokens carry no structure, so length is all there is to check.
    fn validate(&self, presented: &[u8]) -> bool {
        presented.len() == self.len
    }
}
