//! Emoji fingerprint shown on both ends of an encrypted call.

use crate::{CryptoError, sha256};

/// Size of the call emoji table the indices point into.
pub const EMOJI_COUNT: u64 = 333;

/// Four indices into the call emoji table, derived from the shared key and
/// the caller's `g_a`. Both parties must see the same four.
///
/// Each index comes from one 8-byte slice of `SHA-256(key ‖ g_a)`, read
/// big-endian with the top bit cleared.
pub fn emojis_fingerprint(key: &[u8], g_a: &[u8]) -> Result<[u16; 4], CryptoError> {
    if key.is_empty() || g_a.is_empty() {
        return Err(CryptoError::InvalidParameter("fingerprint needs a key and g_a".into()));
    }
    let hash = sha256!(key, g_a);
    let mut out = [0u16; 4];
    for (slot, part) in out.iter_mut().zip(hash.chunks_exact(8)) {
        let mut word = [0u8; 8];
        word.copy_from_slice(part);
        let value = u64::from_be_bytes(word) & 0x7fff_ffff_ffff_ffff;
        *slot = (value % EMOJI_COUNT) as u16;
    }
    Ok(out)
}
