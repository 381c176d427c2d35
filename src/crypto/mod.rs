//! The encryption envelope: key derivation, key verification, nonce
//! derivation, and AES-256-GCM page AEAD.

pub mod aead;
pub mod kdf;
pub mod nonce;

pub use aead::{decrypt_page, encrypt_page, key_verification_tag, verify_key, TAG_LEN};
pub use kdf::{derive_key, DerivedKey, KdfParams};
pub use nonce::{derive_nonce, AES_GCM_NONCE_LEN};
