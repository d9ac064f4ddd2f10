//! AES-256 in IGE mode, the block mode MTProto uses for message payloads.
//!
//! The 32-byte IV is split in two halves: the first chains the previous
//! ciphertext block, the second the previous plaintext block.

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};

use crate::CryptoError;

const BLOCK: usize = 16;

fn check_len(data: &[u8]) -> Result<(), CryptoError> {
    if data.len() % BLOCK != 0 {
        return Err(CryptoError::InvalidLength {
            what:     "AES-IGE input",
            expected: "a multiple of 16 bytes",
            got:      data.len(),
        });
    }
    Ok(())
}

fn xor_into(dst: &mut [u8; BLOCK], src: &[u8]) {
    for (a, b) in dst.iter_mut().zip(src) { *a ^= b; }
}

/// Encrypt `data` in place. `data.len()` must be a multiple of 16.
pub fn ige_encrypt(data: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) -> Result<(), CryptoError> {
    check_len(data)?;
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut iv1 = [0u8; BLOCK];
    let mut iv2 = [0u8; BLOCK];
    iv1.copy_from_slice(&iv[..BLOCK]);
    iv2.copy_from_slice(&iv[BLOCK..]);

    for chunk in data.chunks_exact_mut(BLOCK) {
        let mut plain = [0u8; BLOCK];
        plain.copy_from_slice(chunk);

        let mut x = plain;
        xor_into(&mut x, &iv1);
        let mut block = GenericArray::from(x);
        cipher.encrypt_block(&mut block);
        let mut out: [u8; BLOCK] = block.into();
        xor_into(&mut out, &iv2);

        chunk.copy_from_slice(&out);
        iv1 = out;
        iv2 = plain;
    }
    Ok(())
}

/// Decrypt `data` in place. `data.len()` must be a multiple of 16.
pub fn ige_decrypt(data: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) -> Result<(), CryptoError> {
    check_len(data)?;
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut iv1 = [0u8; BLOCK];
    let mut iv2 = [0u8; BLOCK];
    iv1.copy_from_slice(&iv[..BLOCK]);
    iv2.copy_from_slice(&iv[BLOCK..]);

    for chunk in data.chunks_exact_mut(BLOCK) {
        let mut cipher_block = [0u8; BLOCK];
        cipher_block.copy_from_slice(chunk);

        let mut x = cipher_block;
        xor_into(&mut x, &iv2);
        let mut block = GenericArray::from(x);
        cipher.decrypt_block(&mut block);
        let mut out: [u8; BLOCK] = block.into();
        xor_into(&mut out, &iv1);

        chunk.copy_from_slice(&out);
        iv1 = cipher_block;
        iv2 = out;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unaligned_input() {
        let mut data = vec![0u8; 17];
        assert!(ige_encrypt(&mut data, &[1; 32], &[2; 32]).is_err());
        assert!(ige_decrypt(&mut data, &[1; 32], &[2; 32]).is_err());
    }

    #[test]
    fn identical_blocks_encrypt_differently() {
        let mut data = vec![0x42u8; 32];
        ige_encrypt(&mut data, &[7; 32], &[9; 32]).unwrap();
        assert_ne!(data[..16], data[16..], "IGE must chain blocks");
    }
}
