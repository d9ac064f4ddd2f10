//! Cryptographic primitives for MTProto.
//!
//! Provides:
//! - AES-256-IGE encryption/decryption
//! - SHA-1 / SHA-256 hash macros
//! - Pollard-rho PQ factorization
//! - RSA padding (MTProto RSA-PAD scheme)
//! - Big-integer mod-pow, DH key pairs and auth key computation
//! - PBKDF2-HMAC-SHA512 and the SRP 2FA proof
//! - Emoji fingerprints for encrypted calls
//! - gzip inflation for `gzip_packed` payloads
//!
//! Everything here is synchronous and CPU-bound; `mtwire-client` runs these
//! on its crypto worker thread.

#![deny(unsafe_code)]

pub mod aes;
mod dh;
mod factorize;
mod fingerprint;
mod gzip;
pub mod rsa;
mod sha;
pub mod srp;

pub use dh::{DhKeyPair, compute_dh_key, generate_dh, generate_dh_with, mod_pow};
pub use factorize::factorize;
pub use fingerprint::{EMOJI_COUNT, emojis_fingerprint};
pub use gzip::gzip_uncompress;
pub use srp::{SrpParams, calculate_2fa, pbkdf2_sha512};

#[doc(hidden)]
pub mod __private {
    pub use ::sha1;
    pub use ::sha2;
    pub use ::sha2::Digest;
}

/// Errors from the primitives in this crate.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CryptoError {
    /// An input had the wrong size.
    #[error("{what}: expected {expected}, got {got} bytes")]
    InvalidLength { what: &'static str, expected: &'static str, got: usize },
    /// A numeric parameter is outside its domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// `pq` has no non-trivial factorization we could find.
    #[error("could not factorize {0}")]
    Factorize(u64),
    /// The gzip stream is corrupt or too large.
    #[error("gzip: {0}")]
    Decompress(String),
    /// The OS random source failed.
    #[error("random source: {0}")]
    Random(String),
}

/// Left-pad big-endian `data` with zeros to `width` bytes.
///
/// Values wider than `width` are returned unchanged.
pub(crate) fn pad_be(data: &[u8], width: usize) -> Vec<u8> {
    if data.len() >= width {
        return data.to_vec();
    }
    let mut out = vec![0u8; width - data.len()];
    out.extend_from_slice(data);
    out
}

/// SHA-1 of `data`.
pub fn sha1(data: &[u8]) -> [u8; 20] {
    sha1!(data)
}

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    sha256!(data)
}
