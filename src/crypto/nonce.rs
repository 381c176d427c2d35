//! Deterministic per-page nonce derivation: HMAC-SHA-256(key, page_number || counter),
//! truncated to the cipher's nonce length.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const AES_GCM_NONCE_LEN: usize = 12;

pub fn derive_nonce(key: &[u8], page_number: u32, counter: u32) -> Result<[u8; AES_GCM_NONCE_LEN]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::InvalidArgument(format!("bad HMAC key length: {e}")))?;
    mac.update(&page_number.to_be_bytes());
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    let mut nonce = [0u8; AES_GCM_NONCE_LEN];
    nonce.copy_from_slice(&digest[..AES_GCM_NONCE_LEN]);
    Ok(nonce)
}
