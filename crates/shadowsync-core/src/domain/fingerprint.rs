//! Content fingerprints for local change detection
//!
//! A [`FileFingerprint`] identifies the content of a file by its size, its
//! modification time and a sparse digest over up to four sampled regions.
//! The sparse digest keeps fingerprinting cheap on large files while still
//! catching content rewrites that preserve size and mtime; it is the
//! fallback identity used when the filesystem id is unreliable.

use sha2::{Digest, Sha256};

/// Number of regions sampled for the sparse digest
const SAMPLE_REGIONS: u64 = 4;

/// Bytes read per sampled region
const SAMPLE_BYTES: usize = 16 * 1024;

/// Size sentinel meaning "fingerprint invalid, force re-evaluation"
pub const SIZE_INVALID: i64 = -1;

/// Content fingerprint of a local file
///
/// Folders never carry a fingerprint. For files, `size >= 0` implies the
/// digest is valid for that `(size, mtime)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    /// File size in bytes; [`SIZE_INVALID`] forces regeneration
    pub size: i64,
    /// Modification time in seconds since the epoch
    pub mtime: i64,
    /// Sparse content digest
    pub digest: [u8; 32],
}

impl FileFingerprint {
    /// An invalid fingerprint that compares unequal to every generated one
    #[must_use]
    pub const fn invalid() -> Self {
        Self {
            size: SIZE_INVALID,
            mtime: 0,
            digest: [0u8; 32],
        }
    }

    /// Returns whether this fingerprint holds a valid digest
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.size >= 0
    }

    /// Generates a fingerprint for a file of `size` bytes modified at
    /// `mtime`, reading sampled regions through `read_at`.
    ///
    /// `read_at(offset, buf)` must fill `buf` from the given byte offset and
    /// return the number of bytes read (short reads near EOF are fine).
    /// Returns `None` when a region cannot be read; callers treat that as a
    /// transient condition and leave the previous fingerprint in place.
    pub fn generate<R>(size: i64, mtime: i64, mut read_at: R) -> Option<Self>
    where
        R: FnMut(u64, &mut [u8]) -> std::io::Result<usize>,
    {
        if size < 0 {
            return None;
        }

        let mut hasher = Sha256::new();
        hasher.update((size as u64).to_le_bytes());

        let len = size as u64;
        if len > 0 {
            let mut buf = vec![0u8; SAMPLE_BYTES];
            for region in 0..SAMPLE_REGIONS {
                // Regions at 0, 1/4, 2/4 and 3/4 of the file, clamped so the
                // final region ends at EOF.
                let mut offset = len / SAMPLE_REGIONS * region;
                if region == SAMPLE_REGIONS - 1 {
                    offset = len.saturating_sub(SAMPLE_BYTES as u64).max(offset);
                }
                let want = ((len - offset) as usize).min(SAMPLE_BYTES);
                let got = read_at(offset, &mut buf[..want]).ok()?;
                if got == 0 && want > 0 {
                    return None;
                }
                hasher.update(&buf[..got]);
                if offset + got as u64 >= len {
                    break;
                }
            }
        }

        Some(Self {
            size,
            mtime,
            digest: hasher.finalize().into(),
        })
    }
}

impl Default for FileFingerprint {
    fn default() -> Self {
        Self::invalid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_from(data: &[u8]) -> impl FnMut(u64, &mut [u8]) -> std::io::Result<usize> + '_ {
        move |offset, buf| {
            let start = (offset as usize).min(data.len());
            let n = buf.len().min(data.len() - start);
            buf[..n].copy_from_slice(&data[start..start + n]);
            Ok(n)
        }
    }

    #[test]
    fn test_generate_deterministic() {
        let data = b"some file content".to_vec();
        let a = FileFingerprint::generate(data.len() as i64, 100, read_from(&data)).unwrap();
        let b = FileFingerprint::generate(data.len() as i64, 100, read_from(&data)).unwrap();
        assert_eq!(a, b);
        assert!(a.is_valid());
    }

    #[test]
    fn test_generate_detects_content_change() {
        let a_data = b"aaaaaaaaaa".to_vec();
        let b_data = b"bbbbbbbbbb".to_vec();
        let a = FileFingerprint::generate(10, 100, read_from(&a_data)).unwrap();
        let b = FileFingerprint::generate(10, 100, read_from(&b_data)).unwrap();
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_generate_empty_file() {
        let data = Vec::new();
        let fp = FileFingerprint::generate(0, 42, read_from(&data)).unwrap();
        assert!(fp.is_valid());
        assert_eq!(fp.size, 0);
    }

    #[test]
    fn test_generate_rejects_negative_size() {
        let data = Vec::new();
        assert!(FileFingerprint::generate(-1, 0, read_from(&data)).is_none());
    }

    #[test]
    fn test_generate_large_file_samples_regions() {
        // 1 MiB of data with a difference only in the middle region.
        let mut a_data = vec![0u8; 1 << 20];
        let mut b_data = vec![0u8; 1 << 20];
        a_data[512 * 1024] = 1;
        b_data[512 * 1024] = 2;
        let a = FileFingerprint::generate(a_data.len() as i64, 7, read_from(&a_data)).unwrap();
        let b = FileFingerprint::generate(b_data.len() as i64, 7, read_from(&b_data)).unwrap();
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_invalid_is_not_valid() {
        assert!(!FileFingerprint::invalid().is_valid());
    }
}
