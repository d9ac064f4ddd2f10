//! SRP math for 2FA (`inputCheckPasswordSRP`) and the PBKDF2 step it uses.

use hmac::Hmac;
use num_bigint::{BigInt, Sign};
use num_traits::Zero;
use num_traits::ops::euclid::Euclid;
use sha2::Sha512;

use crate::{CryptoError, sha256};

/// Iterations Telegram uses for `PH2`.
pub const SRP_PBKDF2_ROUNDS: u32 = 100_000;

/// PBKDF2-HMAC-SHA512 producing 64 bytes.
pub fn pbkdf2_sha512(password: &[u8], salt: &[u8], rounds: u32) -> Result<[u8; 64], CryptoError> {
    if rounds == 0 {
        return Err(CryptoError::InvalidParameter("PBKDF2 needs at least one round".into()));
    }
    let mut dk = [0u8; 64];
    pbkdf2::pbkdf2::<Hmac<Sha512>>(password, salt, rounds, &mut dk)
        .map_err(|e| CryptoError::InvalidParameter(e.to_string()))?;
    Ok(dk)
}

fn sh(data: &[u8], salt: &[u8]) -> [u8; 32] {
    sha256!(salt, data, salt)
}

fn ph1(password: &[u8], salt1: &[u8], salt2: &[u8]) -> [u8; 32] {
    sh(&sh(password, salt1), salt2)
}

fn ph2(password: &[u8], salt1: &[u8], salt2: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hash1 = ph1(password, salt1, salt2);
    let dk = pbkdf2_sha512(&hash1, salt1, SRP_PBKDF2_ROUNDS)?;
    Ok(sh(&dk, salt2))
}

fn pad256(what: &'static str, data: &[u8]) -> Result<[u8; 256], CryptoError> {
    if data.len() > 256 {
        return Err(CryptoError::InvalidLength { what, expected: "at most 256 bytes", got: data.len() });
    }
    let mut out = [0u8; 256];
    out[256 - data.len()..].copy_from_slice(data);
    Ok(out)
}

fn xor32(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 { out[i] = a[i] ^ b[i]; }
    out
}

/// Inputs of the SRP proof, as delivered by `account.getPassword`.
#[derive(Clone, Debug)]
pub struct SrpParams {
    pub salt1:    Vec<u8>,
    pub salt2:    Vec<u8>,
    /// Big-endian prime modulus.
    pub p:        Vec<u8>,
    pub g:        i32,
    /// Server public value.
    pub g_b:      Vec<u8>,
    /// Client secret exponent (256 random bytes).
    pub a:        Vec<u8>,
}

/// Compute SRP `(M1, g_a)` for `password`.
pub fn calculate_2fa(params: &SrpParams, password: &[u8]) -> Result<([u8; 32], [u8; 256]), CryptoError> {
    if params.p.is_empty() || params.g <= 0 {
        return Err(CryptoError::InvalidParameter("SRP needs a non-empty p and positive g".into()));
    }
    let SrpParams { salt1, salt2, p, g, g_b, a } = params;

    let big_p  = BigInt::from_bytes_be(Sign::Plus, p);
    if big_p.is_zero() {
        return Err(CryptoError::InvalidParameter("SRP modulus must be non-zero".into()));
    }
    let g_b    = pad256("SRP g_b", g_b)?;
    let a      = pad256("SRP a", a)?;
    let g_hash = pad256("SRP g", &(*g as u32).to_be_bytes())?;

    let big_g_b = BigInt::from_bytes_be(Sign::Plus, &g_b);
    let big_g   = BigInt::from(*g as u32);
    let big_a   = BigInt::from_bytes_be(Sign::Plus, &a);

    let k     = sha256!(p, &g_hash);
    let big_k = BigInt::from_bytes_be(Sign::Plus, &k);

    let g_a = big_g.modpow(&big_a, &big_p);
    let g_a = pad256("SRP g_a", &g_a.to_bytes_be().1)?;

    let u     = sha256!(&g_a, &g_b);
    let big_u = BigInt::from_bytes_be(Sign::Plus, &u);

    let x     = ph2(password, salt1, salt2)?;
    let big_x = BigInt::from_bytes_be(Sign::Plus, &x);

    let big_v  = big_g.modpow(&big_x, &big_p);
    let big_kv = (big_k * big_v) % &big_p;

    let big_t  = (big_g_b - big_kv).rem_euclid(&big_p);

    let exp    = big_a + big_u * big_x;
    let big_sa = big_t.modpow(&exp, &big_p);

    let k_a = sha256!(&pad256("SRP S_a", &big_sa.to_bytes_be().1)?);

    let h_p  = sha256!(p);
    let h_g  = sha256!(&g_hash);
    let p_xg = xor32(&h_p, &h_g);
    let m1   = sha256!(&p_xg, &sha256!(salt1), &sha256!(salt2), &g_a, &g_b, &k_a);

    Ok((m1, g_a))
}
