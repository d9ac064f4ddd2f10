//! RSA with the MTProto RSA-PAD scheme, used to wrap `p_q_inner_data`.

use num_bigint::BigUint;
use crate::{CryptoError, aes, sha256};

/// Longest plaintext RSA-PAD accepts.
pub const MAX_DATA_LEN: usize = 144;

/// RSA-PAD builds 256-byte candidates, so the modulus must be at least this wide.
const MIN_MODULUS_BITS: u64 = 2048;

/// An RSA public key (n, e).
#[derive(Clone, Debug, PartialEq)]
pub struct Key {
    n: BigUint,
    e: BigUint,
}

impl Key {
    /// Parse decimal `n` and `e` strings.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        Some(Self {
            n: BigUint::parse_bytes(n.as_bytes(), 10)?,
            e: BigUint::parse_bytes(e.as_bytes(), 10)?,
        })
    }

    /// Build from big-endian modulus and exponent bytes.
    pub fn from_be_bytes(n: &[u8], e: &[u8]) -> Self {
        Self { n: BigUint::from_bytes_be(n), e: BigUint::from_bytes_be(e) }
    }
}

fn increment(data: &mut [u8]) {
    for byte in data.iter_mut().rev() {
        let (n, overflow) = byte.overflowing_add(1);
        *byte = n;
        if !overflow { break; }
    }
}

/// RSA-encrypt `data` with fresh random padding from the OS.
pub fn encrypt(data: &[u8], key: &Key) -> Result<Vec<u8>, CryptoError> {
    let mut random_bytes = [0u8; 224];
    getrandom::getrandom(&mut random_bytes).map_err(|e| CryptoError::Random(e.to_string()))?;
    encrypt_hashed(data, key, &random_bytes)
}

/// RSA-encrypt `data` using the MTProto RSA-PAD scheme.
///
/// `random_bytes` must be 224 bytes of secure random data: 192 pad the
/// payload, the last 32 seed the temporary AES key.
pub fn encrypt_hashed(data: &[u8], key: &Key, random_bytes: &[u8; 224]) -> Result<Vec<u8>, CryptoError> {
    if data.len() > MAX_DATA_LEN {
        return Err(CryptoError::InvalidLength {
            what:     "RSA-PAD data",
            expected: "at most 144 bytes",
            got:      data.len(),
        });
    }
    if key.n.bits() < MIN_MODULUS_BITS {
        return Err(CryptoError::InvalidParameter(format!(
            "RSA modulus has {} bits, RSA-PAD needs {MIN_MODULUS_BITS}",
            key.n.bits()
        )));
    }

    let mut data_with_padding = Vec::with_capacity(192);
    data_with_padding.extend_from_slice(data);
    data_with_padding.extend_from_slice(&random_bytes[..192 - data.len()]);

    let data_pad_reversed: Vec<u8> = data_with_padding.iter().copied().rev().collect();

    let mut temp_key = [0u8; 32];
    temp_key.copy_from_slice(&random_bytes[192..]);

    let key_aes_encrypted = loop {
        // data_with_hash = data_pad_reversed + SHA256(temp_key + data_with_padding)
        let mut data_with_hash = Vec::with_capacity(224);
        data_with_hash.extend_from_slice(&data_pad_reversed);
        data_with_hash.extend_from_slice(&sha256!(&temp_key, &data_with_padding));

        aes::ige_encrypt(&mut data_with_hash, &temp_key, &[0u8; 32])?;

        let hash = sha256!(&data_with_hash);
        let mut xored = temp_key;
        for (a, b) in xored.iter_mut().zip(hash.iter()) { *a ^= b; }

        let mut candidate = Vec::with_capacity(256);
        candidate.extend_from_slice(&xored);
        candidate.extend_from_slice(&data_with_hash);

        if BigUint::from_bytes_be(&candidate) < key.n {
            break candidate;
        }
        increment(&mut temp_key);
    };

    let payload = BigUint::from_bytes_be(&key_aes_encrypted);
    let encrypted = payload.modpow(&key.e, &key.n);
    Ok(crate::pad_be(&encrypted.to_bytes_be(), 256))
}
