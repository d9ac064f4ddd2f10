//! The closed catalogue of crypto operations the dispatcher runs.
//!
//! Every [`Operation`] carries its own arguments and has a synchronous
//! implementation in [`Operation::run`], which the worker thread calls and
//! which also serves as the in-process fallback.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use mtwire_crypto::{self as crypto, CryptoError, DhKeyPair, SrpParams, rsa};

use crate::errors::{DispatchError, OperationError};

/// Largest buffer [`Operation::GzipUncompress`] inflates to.
pub const MAX_INFLATED_LEN: usize = 64 * 1024 * 1024;

// ─── OperationKind ────────────────────────────────────────────────────────────

/// Tag of an [`Operation`] without its arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperationKind {
    Sha1,
    Sha256,
    Pbkdf2,
    AesIgeEncrypt,
    AesIgeDecrypt,
    RsaEncrypt,
    Factorize,
    ModPow,
    GzipUncompress,
    ComputeSrp,
    GenerateDh,
    ComputeDhKey,
    EmojisFingerprint,
}

impl OperationKind {
    /// Every operation, in declaration order.
    pub const ALL: [OperationKind; 13] = [
        Self::Sha1,
        Self::Sha256,
        Self::Pbkdf2,
        Self::AesIgeEncrypt,
        Self::AesIgeDecrypt,
        Self::RsaEncrypt,
        Self::Factorize,
        Self::ModPow,
        Self::GzipUncompress,
        Self::ComputeSrp,
        Self::GenerateDh,
        Self::ComputeDhKey,
        Self::EmojisFingerprint,
    ];

    /// Stable wire name of the operation.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1           => "sha1",
            Self::Sha256         => "sha256",
            Self::Pbkdf2         => "pbkdf2",
            Self::AesIgeEncrypt  => "aes-encrypt",
            Self::AesIgeDecrypt  => "aes-decrypt",
            Self::RsaEncrypt     => "rsa-encrypt",
            Self::Factorize      => "factorize",
            Self::ModPow         => "mod-pow",
            Self::GzipUncompress => "gzip-uncompress",
            Self::ComputeSrp     => "compute-srp",
            Self::GenerateDh     => "generate-dh",
            Self::ComputeDhKey   => "compute-dh-key",
            Self::EmojisFingerprint => "get-emojis-fingerprint",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Operation ────────────────────────────────────────────────────────────────

/// One unit of offloaded crypto work.
#[derive(Clone, Debug)]
pub enum Operation {
    Sha1(Vec<u8>),
    Sha256(Vec<u8>),
    /// PBKDF2-HMAC-SHA512, 64-byte output.
    Pbkdf2 { password: Vec<u8>, salt: Vec<u8>, iterations: u32 },
    AesIgeEncrypt { data: Vec<u8>, key: [u8; 32], iv: [u8; 32] },
    AesIgeDecrypt { data: Vec<u8>, key: [u8; 32], iv: [u8; 32] },
    /// RSA-PAD with fresh OS randomness.
    RsaEncrypt { data: Vec<u8>, key: rsa::Key },
    Factorize(u64),
    ModPow { base: Vec<u8>, exponent: Vec<u8>, modulus: Vec<u8> },
    GzipUncompress(Vec<u8>),
    ComputeSrp { params: SrpParams, password: Vec<u8> },
    /// Fresh DH key pair for the group `(g, p)`.
    GenerateDh { g: u32, p: Vec<u8> },
    /// `g_b ^ a mod p`, padded to 256 bytes.
    ComputeDhKey { g_b: Vec<u8>, a: Vec<u8>, p: Vec<u8> },
    /// Call emoji indices for a shared key and `g_a`.
    EmojisFingerprint { key: Vec<u8>, g_a: Vec<u8> },
}

impl Operation {
    /// The operation's tag.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Sha1(_)              => OperationKind::Sha1,
            Self::Sha256(_)            => OperationKind::Sha256,
            Self::Pbkdf2 { .. }        => OperationKind::Pbkdf2,
            Self::AesIgeEncrypt { .. } => OperationKind::AesIgeEncrypt,
            Self::AesIgeDecrypt { .. } => OperationKind::AesIgeDecrypt,
            Self::RsaEncrypt { .. }    => OperationKind::RsaEncrypt,
            Self::Factorize(_)         => OperationKind::Factorize,
            Self::ModPow { .. }        => OperationKind::ModPow,
            Self::GzipUncompress(_)    => OperationKind::GzipUncompress,
            Self::ComputeSrp { .. }    => OperationKind::ComputeSrp,
            Self::GenerateDh { .. }    => OperationKind::GenerateDh,
            Self::ComputeDhKey { .. }  => OperationKind::ComputeDhKey,
            Self::EmojisFingerprint { .. } => OperationKind::EmojisFingerprint,
        }
    }

    /// Run the operation on the current thread.
    pub fn run(self) -> Result<Output, OperationError> {
        let op = self.kind();
        self.execute().map_err(|source| OperationError { op, source })
    }

    /// [`run`](Self::run), with a panic in the primitive turned into
    /// [`DispatchError::Panicked`] for this task alone.
    pub fn run_isolated(self) -> Result<Output, DispatchError> {
        let op = self.kind();
        isolate(op, move || self.run())
    }

    fn execute(self) -> Result<Output, CryptoError> {
        Ok(match self {
            Self::Sha1(data)   => Output::Bytes(crypto::sha1(&data).to_vec()),
            Self::Sha256(data) => Output::Bytes(crypto::sha256(&data).to_vec()),
            Self::Pbkdf2 { password, salt, iterations } => {
                Output::Bytes(crypto::pbkdf2_sha512(&password, &salt, iterations)?.to_vec())
            }
            Self::AesIgeEncrypt { mut data, key, iv } => {
                crypto::aes::ige_encrypt(&mut data, &key, &iv)?;
                Output::Bytes(data)
            }
            Self::AesIgeDecrypt { mut data, key, iv } => {
                crypto::aes::ige_decrypt(&mut data, &key, &iv)?;
                Output::Bytes(data)
            }
            Self::RsaEncrypt { data, key } => Output::Bytes(rsa::encrypt(&data, &key)?),
            Self::Factorize(pq) => {
                let (p, q) = crypto::factorize(pq)?;
                Output::Factors { p, q }
            }
            Self::ModPow { base, exponent, modulus } => {
                Output::Bytes(crypto::mod_pow(&base, &exponent, &modulus)?)
            }
            Self::GzipUncompress(data) => {
                Output::Bytes(crypto::gzip_uncompress(&data, MAX_INFLATED_LEN)?)
            }
            Self::ComputeSrp { params, password } => {
                let (m1, g_a) = crypto::calculate_2fa(&params, &password)?;
                Output::Srp { m1, g_a: g_a.to_vec() }
            }
            Self::GenerateDh { g, p } => Output::Dh(crypto::generate_dh(g, &p)?),
            Self::ComputeDhKey { g_b, a, p } => {
                Output::Bytes(crypto::compute_dh_key(&g_b, &a, &p)?.to_vec())
            }
            Self::EmojisFingerprint { key, g_a } => {
                Output::Emojis(crypto::emojis_fingerprint(&key, &g_a)?)
            }
        })
    }
}

fn isolate<F>(op: OperationKind, f: F) -> Result<Output, DispatchError>
where
    F: FnOnce() -> Result<Output, OperationError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => outcome.map_err(DispatchError::from),
        Err(_) => {
            tracing::error!("[worker] {op} panicked, rejecting the task");
            Err(DispatchError::Panicked(op))
        }
    }
}

// ─── Output ───────────────────────────────────────────────────────────────────

/// Result of a successful [`Operation`].
#[derive(Clone, Debug, PartialEq)]
pub enum Output {
    Bytes(Vec<u8>),
    Factors { p: u64, q: u64 },
    Srp { m1: [u8; 32], g_a: Vec<u8> },
    Dh(DhKeyPair),
    /// Indices into the call emoji table.
    Emojis([u16; 4]),
}

impl Output {
    pub(crate) fn into_bytes(self, op: OperationKind) -> Result<Vec<u8>, DispatchError> {
        match self {
            Self::Bytes(b) => Ok(b),
            _              => Err(DispatchError::UnexpectedOutput(op)),
        }
    }

    pub(crate) fn into_array<const N: usize>(self, op: OperationKind) -> Result<[u8; N], DispatchError> {
        self.into_bytes(op)?
            .try_into()
            .map_err(|_| DispatchError::UnexpectedOutput(op))
    }

    pub(crate) fn into_factors(self, op: OperationKind) -> Result<(u64, u64), DispatchError> {
        match self {
            Self::Factors { p, q } => Ok((p, q)),
            _                      => Err(DispatchError::UnexpectedOutput(op)),
        }
    }

    pub(crate) fn into_srp(self, op: OperationKind) -> Result<([u8; 32], Vec<u8>), DispatchError> {
        match self {
            Self::Srp { m1, g_a } => Ok((m1, g_a)),
            _                     => Err(DispatchError::UnexpectedOutput(op)),
        }
    }

    pub(crate) fn into_dh(self, op: OperationKind) -> Result<DhKeyPair, DispatchError> {
        match self {
            Self::Dh(pair) => Ok(pair),
            _              => Err(DispatchError::UnexpectedOutput(op)),
        }
    }

    pub(crate) fn into_emojis(self, op: OperationKind) -> Result<[u16; 4], DispatchError> {
        match self {
            Self::Emojis(indices) => Ok(indices),
            _                     => Err(DispatchError::UnexpectedOutput(op)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = OperationKind::ALL.iter().map(|k| k.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), OperationKind::ALL.len());
    }

    #[test]
    fn run_reports_the_failing_operation() {
        let err = Operation::Factorize(3).run().unwrap_err();
        assert_eq!(err.op, OperationKind::Factorize);
    }

    #[test]
    fn unaligned_aes_input_is_an_error_not_a_panic() {
        let op = Operation::AesIgeEncrypt { data: vec![0; 5], key: [0; 32], iv: [0; 32] };
        assert!(op.run().is_err());
    }

    #[test]
    fn panic_rejects_only_the_task() {
        let outcome = isolate(OperationKind::ModPow, || panic!("primitive bug"));
        assert_eq!(outcome, Err(DispatchError::Panicked(OperationKind::ModPow)));

        // The calling thread carries on.
        assert!(Operation::Sha1(vec![1]).run_isolated().is_ok());
    }

    #[test]
    fn zero_srp_modulus_is_an_error_not_a_panic() {
        let params = SrpParams {
            salt1: vec![1; 8],
            salt2: vec![2; 8],
            p:     vec![0],
            g:     3,
            g_b:   vec![5; 256],
            a:     vec![6; 256],
        };
        let op = Operation::ComputeSrp { params, password: b"pw".to_vec() };
        assert!(matches!(op.run_isolated(), Err(DispatchError::Operation(_))));
    }

    #[test]
    fn generate_dh_output_shape() {
        let op = Operation::GenerateDh { g: 3, p: vec![0xff, 0xff, 0xff, 0xfb] };
        let pair = op.run().unwrap().into_dh(OperationKind::GenerateDh).unwrap();
        assert_eq!(pair.g_a_hash, mtwire_crypto::sha256(&pair.g_a));
    }
}
