//! Process-wide key encryption key.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{Error, Result};

const KEK_LEN: usize = 32;

/// A 32-byte key-encryption key, loaded once at process start from the
/// `KEK_BASE64` configuration value and held only in memory. Never logged,
/// never echoed in any response.
#[derive(Clone)]
pub struct Kek([u8; KEK_LEN]);

impl Kek {
    /// Parse from the exactly-44-character base64 form (`KEK_BASE64`, §4.12).
    pub fn from_base64(encoded: &str) -> Result<Self> {
        if encoded.len() != 44 || !encoded.ends_with('=') {
            return Err(Error::Crypto(
                "KEK_BASE64 must be 44 base64 characters with trailing padding".into(),
            ));
        }
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Crypto(format!("KEK_BASE64 is not valid base64: {e}")))?;
        if bytes.len() != KEK_LEN {
            return Err(Error::Crypto(format!(
                "KEK must decode to {KEK_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut kek = [0u8; KEK_LEN];
        kek.copy_from_slice(&bytes);
        Ok(Self(kek))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEK_LEN] {
        &self.0
    }

    /// Generate a random KEK. Used by tests and by `gatewayctl init`.
    #[must_use]
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEK_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Kek(REDACTED)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_base64() {
        let kek = Kek::generate();
        let encoded = kek.to_base64();
        assert_eq!(encoded.len(), 44);
        let parsed = Kek::from_base64(&encoded).unwrap();
        assert_eq!(kek.as_bytes(), parsed.as_bytes());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Kek::from_base64("dG9vc2hvcnQ=").is_err());
    }

    #[test]
    fn debug_never_prints_bytes() {
        let kek = Kek::generate();
        assert_eq!(format!("{kek:?}"), "Kek(REDACTED)");
    }
}
