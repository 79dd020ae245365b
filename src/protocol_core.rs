//! Header layout, path payloads and root containment shared by the client and the daemon

use crate::error::{Result, SyncError};
use crate::protocol::{HEADER_LEN, PAYLOAD_CAPACITY};
use std::path::{Component, Path, PathBuf};

/// Build frame header (4 bytes)
/// Format: SIZE (2, big-endian) | TYPE (1) | RC (1, signed)
pub fn build_frame_header(msg_type: u8, rc: i8, payload_len: u16) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..2].copy_from_slice(&payload_len.to_be_bytes());
    header[2] = msg_type;
    header[3] = rc as u8;
    header
}

/// Parse frame header
/// Returns: (msg_type, rc, payload_length)
pub fn parse_frame_header(header: &[u8; HEADER_LEN]) -> Result<(u8, i8, usize)> {
    let payload_len = u16::from_be_bytes([header[0], header[1]]) as usize;
    validate_frame_size(payload_len)?;
    Ok((header[2], header[3] as i8, payload_len))
}

pub fn validate_frame_size(size: usize) -> Result<()> {
    if size > PAYLOAD_CAPACITY {
        return Err(SyncError::protocol(format!(
            "frame payload too large: {} bytes (max: {})",
            size, PAYLOAD_CAPACITY
        )));
    }
    Ok(())
}

/// Encode a relative path as `'/' + path + NUL`.
pub fn encode_path_payload(rel: &str) -> Result<Vec<u8>> {
    let rel = rel.trim_start_matches('/');
    if rel.contains('\0') {
        return Err(SyncError::protocol("path contains NUL byte"));
    }
    let mut buf = Vec::with_capacity(rel.len() + 2);
    buf.push(b'/');
    buf.extend_from_slice(rel.as_bytes());
    buf.push(0);
    validate_frame_size(buf.len())?;
    Ok(buf)
}

/// Decode a path payload back to the relative path (leading separator removed).
pub fn decode_path_payload(payload: &[u8]) -> Result<String> {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    let body = &payload[..end];
    if body.contains(&0) {
        return Err(SyncError::protocol("path contains NUL byte"));
    }
    let s = std::str::from_utf8(body)
        .map_err(|_| SyncError::protocol("path is not valid UTF-8"))?;
    let rel = s
        .strip_prefix('/')
        .ok_or_else(|| SyncError::protocol(format!("path {:?} lacks leading separator", s)))?;
    Ok(rel.to_string())
}

/// Normalize a path to be safely under a root directory.
/// Rejects parent components, absolute/prefix components and NUL bytes,
/// canonicalizes what already exists, and checks the result stays under `root`.
/// `root` is expected to be canonical.
pub fn normalize_under_root(root: &Path, p: &Path) -> Result<PathBuf> {
    use Component::{CurDir, Normal, ParentDir, Prefix, RootDir};

    if p.to_string_lossy().contains('\0') {
        return Err(SyncError::protocol("path contains NUL byte"));
    }

    let mut safe = PathBuf::new();
    for component in p.components() {
        match component {
            CurDir => {}
            Normal(s) => {
                // ADS defense
                #[cfg(windows)]
                if s.to_string_lossy().contains(':') {
                    return Err(SyncError::protocol("path component contains colon"));
                }
                safe.push(s);
            }
            ParentDir | RootDir | Prefix(_) => {
                return Err(SyncError::protocol(format!(
                    "path contains disallowed component: {:?}",
                    component
                )));
            }
        }
    }

    let joined = root.join(&safe);

    // Existing paths resolve symlinks; new entries resolve their parent
    let final_path = if joined.exists() {
        joined.canonicalize()?
    } else {
        match (joined.parent(), joined.file_name()) {
            (Some(parent), Some(name)) if parent.exists() => parent.canonicalize()?.join(name),
            _ => joined,
        }
    };

    if !final_path.starts_with(root) {
        return Err(SyncError::protocol(format!(
            "path {:?} escapes root {:?}",
            p, root
        )));
    }

    Ok(final_path)
}
