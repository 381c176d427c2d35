//! AES-256-GCM page encryption with the page number as associated data, and
//! the constant-time key-verification MAC checked at open.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::crypto::kdf::DerivedKey;
use crate::crypto::nonce::{derive_nonce, AES_GCM_NONCE_LEN};
use crate::error::{Error, Result};

pub const TAG_LEN: usize = 16;
const KEY_VERIFY_PLAINTEXT: &[u8] = b"SHARC_KEY_VERIFY";

type HmacSha256 = Hmac<Sha256>;

pub fn key_verification_tag(key: &DerivedKey) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(&key.0)
        .map_err(|e| Error::InvalidArgument(format!("bad HMAC key length: {e}")))?;
    mac.update(KEY_VERIFY_PLAINTEXT);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Verify `stored` against the key in constant time. Mismatch is "wrong
/// password", never "corrupt database".
pub fn verify_key(key: &DerivedKey, stored: &[u8; 32]) -> Result<()> {
    let computed = key_verification_tag(key)?;
    if computed.ct_eq(stored).into() {
        Ok(())
    } else {
        Err(Error::WrongPassword)
    }
}

/// Encrypt one cleartext page into `[nonce | ciphertext | tag]`. `dst` must
/// be exactly `page.len() + AES_GCM_NONCE_LEN + TAG_LEN` bytes.
pub fn encrypt_page(
    key: &DerivedKey,
    page_number: u32,
    counter: u32,
    page: &[u8],
    dst: &mut [u8],
) -> Result<()> {
    let nonce_bytes = derive_nonce(&key.0, page_number, counter)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let aad = page_number.to_be_bytes();
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: page,
                aad: &aad,
            },
        )
        .map_err(|_| Error::integrity_failure(page_number, "AEAD encryption failed"))?;

    if dst.len() != AES_GCM_NONCE_LEN + ciphertext.len() {
        return Err(Error::InvalidArgument("destination buffer wrong size".into()));
    }
    dst[..AES_GCM_NONCE_LEN].copy_from_slice(&nonce_bytes);
    dst[AES_GCM_NONCE_LEN..].copy_from_slice(&ciphertext);
    Ok(())
}

/// Decrypt `[nonce | ciphertext | tag]` into `dst`, which must be exactly
/// `src.len() - AES_GCM_NONCE_LEN - TAG_LEN` bytes (the raw page size).
/// Tag mismatch, wrong key, or wrong page number all surface as
/// "integrity failure" uniformly; the caller never learns which.
pub fn decrypt_page(key: &DerivedKey, page_number: u32, src: &[u8], dst: &mut [u8]) -> Result<()> {
    if src.len() < AES_GCM_NONCE_LEN + TAG_LEN {
        return Err(Error::integrity_failure(page_number, "encrypted page truncated"));
    }
    let (nonce_bytes, rest) = src.split_at(AES_GCM_NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let aad = page_number.to_be_bytes();
    let cleartext = cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload { msg: rest, aad: &aad },
        )
        .map_err(|_| Error::integrity_failure(page_number, "AEAD tag mismatch"))?;
    if cleartext.len() != dst.len() {
        return Err(Error::integrity_failure(page_number, "decrypted length mismatch"));
    }
    dst.copy_from_slice(&cleartext);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::{derive_key, KdfParams};

    fn test_key() -> DerivedKey {
        let salt = [5u8; 32];
        let params = KdfParams {
            time_cost: 1,
            memory_cost_kib: 8,
            parallelism: 1,
            ..Default::default()
        };
        derive_key("password", &salt, &params).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = test_key();
        let page = vec![0x42u8; 4096];
        let mut ciphertext = vec![0u8; 4096 + AES_GCM_NONCE_LEN + TAG_LEN];
        encrypt_page(&key, 3, 0, &page, &mut ciphertext).unwrap();
        let mut recovered = vec![0u8; 4096];
        decrypt_page(&key, 3, &ciphertext, &mut recovered).unwrap();
        assert_eq!(recovered, page);
    }

    #[test]
    fn wrong_page_number_fails_integrity_check() {
        let key = test_key();
        let page = vec![0x42u8; 64];
        let mut ciphertext = vec![0u8; 64 + AES_GCM_NONCE_LEN + TAG_LEN];
        encrypt_page(&key, 3, 0, &page, &mut ciphertext).unwrap();
        let mut recovered = vec![0u8; 64];
        let err = decrypt_page(&key, 4, &ciphertext, &mut recovered).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IntegrityFailure);
    }

    #[test]
    fn tampered_ciphertext_fails_integrity_check() {
        let key = test_key();
        let page = vec![0x42u8; 64];
        let mut ciphertext = vec![0u8; 64 + AES_GCM_NONCE_LEN + TAG_LEN];
        encrypt_page(&key, 3, 0, &page, &mut ciphertext).unwrap();
        ciphertext[AES_GCM_NONCE_LEN] ^= 0xff;
        let mut recovered = vec![0u8; 64];
        assert!(decrypt_page(&key, 3, &ciphertext, &mut recovered).is_err());
    }

    #[test]
    fn key_verification_rejects_wrong_password() {
        let key = test_key();
        let tag = key_verification_tag(&key).unwrap();
        let salt = [5u8; 32];
        let other = derive_key(
            "wrong",
            &salt,
            &KdfParams {
                time_cost: 1,
                memory_cost_kib: 8,
                parallelism: 1,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(verify_key(&other, &tag).is_err());
        assert!(verify_key(&key, &tag).is_ok());
    }
}
