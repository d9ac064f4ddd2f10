//! Big-integer exponentiation for the DH steps (`mod-pow`, auth key).

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::{CryptoError, sha256};

/// Fresh exponents drawn by [`generate_dh`] before giving up.
const GENERATE_ATTEMPTS: usize = 16;

/// One side of a Diffie-Hellman exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct DhKeyPair {
    /// Secret exponent, big-endian.
    pub a:        [u8; 256],
    /// `g ^ a mod p`, left-padded to 256 bytes.
    pub g_a:      [u8; 256],
    /// SHA-256 of `g_a`, sent ahead of `g_a` in call setup.
    pub g_a_hash: [u8; 32],
}

/// `base ^ exponent mod modulus`, all big-endian, result without leading zeros.
pub fn mod_pow(base: &[u8], exponent: &[u8], modulus: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let m = BigUint::from_bytes_be(modulus);
    if m.is_zero() {
        return Err(CryptoError::InvalidParameter("modulus must be non-zero".into()));
    }
    let r = BigUint::from_bytes_be(base).modpow(&BigUint::from_bytes_be(exponent), &m);
    Ok(r.to_bytes_be())
}

/// Auth key material `g_b ^ a mod p`, left-padded to 256 bytes.
pub fn compute_dh_key(g_b: &[u8], a: &[u8], p: &[u8]) -> Result<[u8; 256], CryptoError> {
    let raw = mod_pow(g_b, a, p)?;
    if raw.len() > 256 {
        return Err(CryptoError::InvalidLength {
            what:     "DH key",
            expected: "at most 256 bytes",
            got:      raw.len(),
        });
    }
    let mut key = [0u8; 256];
    key[256 - raw.len()..].copy_from_slice(&raw);
    Ok(key)
}

fn check_group(g: u32, p: &[u8]) -> Result<BigUint, CryptoError> {
    if p.len() > 256 {
        return Err(CryptoError::InvalidLength { what: "DH prime", expected: "at most 256 bytes", got: p.len() });
    }
    let big_p = BigUint::from_bytes_be(p);
    if big_p <= BigUint::from(3u32) || g < 2 {
        return Err(CryptoError::InvalidParameter("DH needs p > 3 and g >= 2".into()));
    }
    Ok(big_p)
}

/// `None` when `g_a` lands outside `(1, p - 1)`.
fn derive(g: u32, big_p: &BigUint, a: [u8; 256]) -> Option<DhKeyPair> {
    let big_g_a = BigUint::from(g).modpow(&BigUint::from_bytes_be(&a), big_p);
    if big_g_a <= BigUint::one() || big_g_a >= big_p - 1u32 {
        return None;
    }
    let mut g_a = [0u8; 256];
    let raw = big_g_a.to_bytes_be();
    g_a[256 - raw.len()..].copy_from_slice(&raw);
    Some(DhKeyPair { a, g_a, g_a_hash: sha256!(&g_a) })
}

/// Draw a random exponent and compute `g_a` for the group `(g, p)`.
pub fn generate_dh(g: u32, p: &[u8]) -> Result<DhKeyPair, CryptoError> {
    let big_p = check_group(g, p)?;
    for _ in 0..GENERATE_ATTEMPTS {
        let mut a = [0u8; 256];
        getrandom::getrandom(&mut a).map_err(|e| CryptoError::Random(e.to_string()))?;
        if let Some(pair) = derive(g, &big_p, a) {
            return Ok(pair);
        }
    }
    Err(CryptoError::InvalidParameter(format!("no usable g_a after {GENERATE_ATTEMPTS} exponents")))
}

/// [`generate_dh`] with a caller-chosen exponent.
///
/// Fails when `g_a` lands outside `(1, p - 1)`.
pub fn generate_dh_with(g: u32, p: &[u8], a: [u8; 256]) -> Result<DhKeyPair, CryptoError> {
    let big_p = check_group(g, p)?;
    derive(g, &big_p, a).ok_or_else(|| CryptoError::InvalidParameter("g_a out of range".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_mod_pow() {
        assert_eq!(mod_pow(&[3], &[4], &[5]).unwrap(), vec![1]);
        assert_eq!(mod_pow(&[2], &[10], &[0x03, 0xe8]).unwrap(), vec![0x18]);
    }

    #[test]
    fn zero_modulus_rejected() {
        assert!(mod_pow(&[2], &[2], &[0, 0]).is_err());
    }

    #[test]
    fn dh_key_is_left_padded() {
        let key = compute_dh_key(&[2], &[8], &[0x01, 0x01]).unwrap();
        assert_eq!(key[..254], [0u8; 254]);
        assert_eq!(key[254..], [0x01, 0x00]);
    }

    #[test]
    fn generated_pair_agrees_with_mod_pow() {
        let p = [0xff, 0xff, 0xff, 0xfb]; // 4294967291, prime
        let mut a = [0u8; 256];
        a[255] = 20;
        let pair = generate_dh_with(2, &p, a).unwrap();
        assert_eq!(pair.g_a[253..], [0x10, 0x00, 0x00]);
        assert_eq!(pair.g_a_hash, sha256!(&pair.g_a));
        assert_eq!(mod_pow(&[2], &a, &p).unwrap(), vec![0x10, 0x00, 0x00]);
    }

    #[test]
    fn degenerate_g_a_rejected() {
        let p = [0xff, 0xff, 0xff, 0xfb];
        assert!(generate_dh_with(2, &p, [0; 256]).is_err(), "g^0 = 1");
        assert!(generate_dh_with(1, &p, [7; 256]).is_err());
        assert!(generate_dh_with(2, &[3], [7; 256]).is_err());
    }

    #[test]
    fn random_exponents_differ() {
        let p = [0xff, 0xff, 0xff, 0xfb];
        let first = generate_dh(3, &p).unwrap();
        let second = generate_dh(3, &p).unwrap();
        assert_ne!(first.a, second.a);
    }
}
