//! Persisted record format of a shadow node
//!
//! One record is written per shadow node. The plaintext is JSON-encoded and
//! passed through the engine's [`RecordSealer`](crate::ports::RecordSealer)
//! before it reaches the store; the store only ever sees sealed bytes keyed
//! by `dbid`. A record references its parent by `parent_dbid` (0 for
//! children of the sync root), which is why the cache flush must make a
//! parent's dbid durable before any child record that mentions it.

use serde::{Deserialize, Serialize};

use super::node::{NodeKind, RemoteHandle};

/// Plaintext of one persisted shadow node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// File or folder
    pub kind: NodeKind,
    /// Last path component in the platform's local encoding
    #[serde(with = "serde_bytes_vec")]
    pub local_name: Vec<u8>,
    /// File size in bytes; -1 marks an invalid fingerprint
    pub size: i64,
    /// Modification time in seconds since the epoch
    pub mtime: i64,
    /// Filesystem-issued identity, when the platform provided one
    pub fsid: Option<u64>,
    /// Sparse content digest; files only
    pub digest: Option<[u8; 32]>,
    /// Cache id of the parent record; 0 for children of the root
    pub parent_dbid: u32,
    /// Handle of the remote counterpart, when bound
    pub remote: Option<RemoteHandle>,
}

impl NodeRecord {
    /// Encodes the record to its plaintext byte form
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a record from its plaintext byte form
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact serde representation for the local-encoding name bytes.
///
/// JSON has no native byte string; encoding the name as a number array
/// triples the record size, so it is stored as latin-1 mapped text instead
/// (every byte maps to one char, losslessly).
mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        let text: String = bytes.iter().map(|&b| b as char).collect();
        ser.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(de)?;
        Ok(text.chars().map(|c| c as u8).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NodeRecord {
        NodeRecord {
            kind: NodeKind::File,
            local_name: b"report.pdf".to_vec(),
            size: 1024,
            mtime: 1_700_000_000,
            fsid: Some(0xdead_beef),
            digest: Some([7u8; 32]),
            parent_dbid: 12,
            remote: Some(RemoteHandle(42)),
        }
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let rec = sample();
        let decoded = NodeRecord::decode(&rec.encode().unwrap()).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn test_non_utf8_name_survives() {
        let mut rec = sample();
        rec.local_name = vec![0xff, 0xfe, b'a', 0x80];
        let decoded = NodeRecord::decode(&rec.encode().unwrap()).unwrap();
        assert_eq!(decoded.local_name, rec.local_name);
    }

    #[test]
    fn test_folder_record_without_digest() {
        let rec = NodeRecord {
            kind: NodeKind::Folder,
            local_name: b"photos".to_vec(),
            size: 0,
            mtime: 0,
            fsid: None,
            digest: None,
            parent_dbid: 0,
            remote: None,
        };
        let decoded = NodeRecord::decode(&rec.encode().unwrap()).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(NodeRecord::decode(b"not json").is_err());
    }
}
