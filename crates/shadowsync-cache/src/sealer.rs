//! Integrity-tagged record sealing
//!
//! [`KeyedSealer`] implements the `RecordSealer` port by appending a SHA-256
//! tag over `(key, dbid, plaintext)` to each record. This provides tamper
//! evidence for the on-disk cache and binds each record to its dbid, but it
//! is not encryption; a deployment that needs confidentiality substitutes an
//! AEAD construction behind the same port.

use sha2::{Digest, Sha256};

use shadowsync_core::ports::RecordSealer;

/// Length of the appended tag in bytes
const TAG_LEN: usize = 32;

/// Seals records with a keyed SHA-256 integrity tag
pub struct KeyedSealer {
    key: [u8; 32],
}

impl KeyedSealer {
    /// Creates a sealer over the given symmetric key
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn tag(&self, dbid: u32, plaintext: &[u8]) -> [u8; TAG_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(dbid.to_le_bytes());
        hasher.update(plaintext);
        hasher.finalize().into()
    }
}

impl RecordSealer for KeyedSealer {
    fn seal(&self, dbid: u32, plaintext: &[u8]) -> Vec<u8> {
        let mut sealed = Vec::with_capacity(plaintext.len() + TAG_LEN);
        sealed.extend_from_slice(plaintext);
        sealed.extend_from_slice(&self.tag(dbid, plaintext));
        sealed
    }

    fn unseal(&self, dbid: u32, sealed: &[u8]) -> Option<Vec<u8>> {
        if sealed.len() < TAG_LEN {
            return None;
        }
        let (plaintext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        if self.tag(dbid, plaintext) != *tag {
            return None;
        }
        Some(plaintext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal_roundtrip() {
        let sealer = KeyedSealer::new([9u8; 32]);
        let sealed = sealer.seal(1, b"record");
        assert_eq!(sealer.unseal(1, &sealed).as_deref(), Some(&b"record"[..]));
    }

    #[test]
    fn test_unseal_rejects_wrong_dbid() {
        let sealer = KeyedSealer::new([9u8; 32]);
        let sealed = sealer.seal(1, b"record");
        assert!(sealer.unseal(2, &sealed).is_none());
    }

    #[test]
    fn test_unseal_rejects_wrong_key() {
        let a = KeyedSealer::new([1u8; 32]);
        let b = KeyedSealer::new([2u8; 32]);
        let sealed = a.seal(1, b"record");
        assert!(b.unseal(1, &sealed).is_none());
    }

    #[test]
    fn test_unseal_rejects_tampered_payload() {
        let sealer = KeyedSealer::new([9u8; 32]);
        let mut sealed = sealer.seal(1, b"record");
        sealed[0] ^= 0xff;
        assert!(sealer.unseal(1, &sealed).is_none());
    }

    #[test]
    fn test_unseal_rejects_short_input() {
        let sealer = KeyedSealer::new([9u8; 32]);
        assert!(sealer.unseal(1, b"short").is_none());
    }
}
