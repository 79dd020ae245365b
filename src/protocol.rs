//! Shared protocol constants for the dirpush framed transport

// Wire header: size u16 (big-endian) | type u8 | rc i8
pub const HEADER_LEN: usize = 4;

// Fixed payload capacity of a single frame
pub const PAYLOAD_CAPACITY: usize = 1024;

// Digest payload length (MD5)
pub const DIGEST_LEN: usize = 16;

// Well-known TCP port for the data connection
pub const DEFAULT_PORT: u16 = 65029;

// Well-known UDP port for the discovery beacon (same numeric constant)
pub const DISCOVERY_PORT: u16 = 0xFE05;

// Reply status codes
pub mod rc {
    pub const OK: i8 = 0;
    pub const FAILED: i8 = -1;
}

/// Request message types. Numeric values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Md5Sum = 0,
    Update = 1,
    Mkdir = 2,
}

impl MessageType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Md5Sum),
            1 => Some(Self::Update),
            2 => Some(Self::Mkdir),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Lowercase verb used in logs
    pub fn verb(self) -> &'static str {
        match self {
            Self::Md5Sum => "md5sum",
            Self::Update => "update",
            Self::Mkdir => "mkdir",
        }
    }
}

// Discovery and accept-loop pacing
pub mod timeouts {
    // Interval between beacon datagrams (ms)
    pub const BEACON_INTERVAL_MS: u64 = 1000;

    // Sleep between non-blocking accept polls while idle (ms)
    pub const ACCEPT_POLL_MS: u64 = 50;

    // A daemon connection silent for this long is dropped (ms)
    pub const IDLE_READ_MS: u64 = 300_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_wire_values() {
        assert_eq!(MessageType::Md5Sum.as_u8(), 0);
        assert_eq!(MessageType::Update.as_u8(), 1);
        assert_eq!(MessageType::Mkdir.as_u8(), 2);
        for b in 0..=2u8 {
            assert_eq!(MessageType::from_u8(b).map(MessageType::as_u8), Some(b));
        }
        assert_eq!(MessageType::from_u8(3), None);
        assert_eq!(MessageType::from_u8(99), None);
    }

    #[test]
    fn test_discovery_port_matches_tcp_port() {
        assert_eq!(DISCOVERY_PORT, DEFAULT_PORT);
    }
}
