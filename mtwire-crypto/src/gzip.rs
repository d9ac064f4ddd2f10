//! `gzip_packed` payload inflation.

use std::io::Read;

use flate2::read::GzDecoder;

use crate::CryptoError;

/// Inflate a gzip stream, refusing to grow past `limit` bytes.
pub fn gzip_uncompress(data: &[u8], limit: usize) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| CryptoError::Decompress(e.to_string()))?;
    if out.len() > limit {
        return Err(CryptoError::Decompress(format!("inflated size exceeds {limit} bytes")));
    }
    Ok(out)
}
