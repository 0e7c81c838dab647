//! Envelope encryption for tool credentials (§4.12).
//!
//! A credential is never encrypted directly under the process-wide key
//! encryption key (KEK). Instead a fresh 256-bit data-encryption key (DEK)
//! is generated per-seal, the plaintext is sealed under the DEK, and the
//! DEK itself is sealed under the KEK. Both layers use AES-256-GCM. This
//! bounds the amount of ciphertext ever produced under a single KEK-derived
//! nonce space and lets the DEK be discarded the instant the credential is
//! decrypted.

mod kek;

pub use kek::Kek;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;
const DEK_LEN: usize = 32;

/// A sealed secret blob, safe to persist or transmit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedEnvelope {
    /// Nonce used to seal the data-encryption key under the KEK.
    pub nonce_outer: Vec<u8>,
    /// Nonce used to seal the plaintext under the data-encryption key.
    pub nonce_inner: Vec<u8>,
    /// The data-encryption key, sealed under the KEK (ciphertext + AEAD tag).
    pub ciphertext_key: Vec<u8>,
    /// The plaintext, sealed under the data-encryption key (ciphertext + AEAD tag).
    pub ciphertext_data: Vec<u8>,
}

/// Seal `plaintext` under a freshly generated data key, itself sealed under `kek`.
pub fn seal(plaintext: &[u8], kek: &Kek) -> Result<SealedEnvelope> {
    let mut rng = rand::rng();

    let mut dek_bytes = [0u8; DEK_LEN];
    rng.fill_bytes(&mut dek_bytes);
    let dek = Key::<Aes256Gcm>::from_slice(&dek_bytes);
    let dek_cipher = Aes256Gcm::new(dek);

    let mut nonce_inner = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce_inner);
    let ciphertext_data = dek_cipher
        .encrypt(Nonce::from_slice(&nonce_inner), plaintext)
        .map_err(|_| Error::Crypto("seal: inner encryption failed".into()))?;

    let outer_cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_bytes()));
    let mut nonce_outer = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce_outer);
    let ciphertext_key = outer_cipher
        .encrypt(Nonce::from_slice(&nonce_outer), dek_bytes.as_slice())
        .map_err(|_| Error::Crypto("seal: outer encryption failed".into()))?;

    Ok(SealedEnvelope {
        nonce_outer: nonce_outer.to_vec(),
        nonce_inner: nonce_inner.to_vec(),
        ciphertext_key,
        ciphertext_data,
    })
}

/// Reverse [`seal`]. Returns [`Error::Crypto`] (mapped to the `integrity_error`
/// taxonomy kind) on any AEAD tag mismatch, at either layer.
pub fn unseal(sealed: &SealedEnvelope, kek: &Kek) -> Result<Vec<u8>> {
    let outer_cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_bytes()));
    let nonce_outer = Nonce::from_slice(&sealed.nonce_outer);
    let mut dek_bytes = outer_cipher
        .decrypt(nonce_outer, sealed.ciphertext_key.as_slice())
        .map_err(|_| Error::Crypto("integrity_error: outer tag mismatch".into()))?;

    if dek_bytes.len() != DEK_LEN {
        return Err(Error::Crypto("integrity_error: bad data key length".into()));
    }
    let dek = Key::<Aes256Gcm>::from_slice(&dek_bytes);
    let dek_cipher = Aes256Gcm::new(dek);
    let nonce_inner = Nonce::from_slice(&sealed.nonce_inner);
    let plaintext = dek_cipher
        .decrypt(nonce_inner, sealed.ciphertext_data.as_slice())
        .map_err(|_| Error::Crypto("integrity_error: inner tag mismatch".into()))?;

    dek_bytes.iter_mut().for_each(|b| *b = 0);

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_unseal_roundtrip() {
        let kek = Kek::generate();
        let plaintext = b"sk-live-secret-credential";
        let sealed = seal(plaintext, &kek).unwrap();
        let opened = unseal(&sealed, &kek).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_integrity() {
        let kek = Kek::generate();
        let mut sealed = seal(b"top-secret", &kek).unwrap();
        sealed.ciphertext_data[0] ^= 0xFF;
        assert!(unseal(&sealed, &kek).is_err());
    }

    #[test]
    fn wrong_kek_fails_integrity() {
        let kek_a = Kek::generate();
        let kek_b = Kek::generate();
        let sealed = seal(b"top-secret", &kek_a).unwrap();
        assert!(unseal(&sealed, &kek_b).is_err());
    }

    #[test]
    fn two_seals_of_same_plaintext_differ() {
        let kek = Kek::generate();
        let a = seal(b"same", &kek).unwrap();
        let b = seal(b"same", &kek).unwrap();
        assert_ne!(a.ciphertext_data, b.ciphertext_data);
    }
}
