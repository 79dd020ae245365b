//! Content fingerprints used to decide whether a file must be pushed

use crate::protocol::DIGEST_LEN;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

// Read chunk size while hashing
const HASH_CHUNK: usize = 1024;

/// 128-bit content digest (MD5). A change-detection heuristic, not an integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; DIGEST_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Digest a byte source to completion in bounded chunks.
pub fn fingerprint<R: Read>(mut reader: R) -> io::Result<Digest> {
    let mut ctx = md5::Context::new();
    let mut buf = [0u8; HASH_CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        ctx.consume(&buf[..n]);
    }
    Ok(Digest(ctx.compute().0))
}

/// Digest a file. `Ok(None)` when the file does not exist.
pub fn fingerprint_file(path: &Path) -> io::Result<Option<Digest>> {
    let f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    fingerprint(f).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            fingerprint(Cursor::new(b"")).unwrap().to_string(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            fingerprint(Cursor::new(b"hello")).unwrap().to_string(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn test_fingerprint_is_deterministic_across_chunking() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let a = fingerprint(Cursor::new(&data)).unwrap();
        let b = fingerprint(Cursor::new(&data)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.0, md5::compute(&data).0);
    }

    #[test]
    fn test_fingerprint_file_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(fingerprint_file(&tmp.path().join("absent")).unwrap(), None);
    }

    #[test]
    fn test_fingerprint_file_matches_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("f.txt");
        std::fs::write(&p, b"hello").unwrap();
        let d = fingerprint_file(&p).unwrap().unwrap();
        assert_eq!(d, fingerprint(Cursor::new(b"hello")).unwrap());
    }

    #[test]
    fn test_digest_from_slice_length() {
        assert!(Digest::from_slice(&[0u8; 16]).is_some());
        assert!(Digest::from_slice(&[0u8; 15]).is_none());
        assert!(Digest::from_slice(&[]).is_none());
    }
}
