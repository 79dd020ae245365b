//! Frame codec: the header + payload unit carried over the TCP stream

use crate::checksum::Digest;
use crate::error::{Result, SyncError};
use crate::protocol::{rc, MessageType, HEADER_LEN};
use crate::protocol_core::{
    build_frame_header, decode_path_payload, encode_path_payload, parse_frame_header,
    validate_frame_size,
};
use std::io::{ErrorKind, Read, Write};

/// Interpreted payload. Which variant applies is decided by the message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Path(String),
    Digest(Digest),
    Chunk(Vec<u8>),
}

impl Payload {
    fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Payload::Path(p) => encode_path_payload(&p),
            Payload::Digest(d) => Ok(d.as_bytes().to_vec()),
            Payload::Chunk(b) => {
                validate_frame_size(b.len())?;
                Ok(b)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub rc: i8,
    payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: u8, rc: i8, payload: Option<Payload>) -> Result<Self> {
        let payload = match payload {
            Some(p) => p.into_bytes()?,
            None => Vec::new(),
        };
        Ok(Self {
            msg_type,
            rc,
            payload,
        })
    }

    /// Client request naming a path
    pub fn request(t: MessageType, path: &str) -> Result<Self> {
        Self::new(t.as_u8(), rc::OK, Some(Payload::Path(path.to_string())))
    }

    /// Reply to a request; echoes the request's type byte
    pub fn reply(msg_type: u8, status: i8, payload: Option<Payload>) -> Result<Self> {
        Self::new(msg_type, status, payload)
    }

    /// Content frame of a streamed transfer
    pub fn chunk(bytes: &[u8]) -> Result<Self> {
        Self::new(MessageType::Update.as_u8(), rc::OK, Some(Payload::Chunk(bytes.to_vec())))
    }

    /// Zero-length frame ending a streamed transfer
    pub fn terminator() -> Self {
        Self {
            msg_type: MessageType::Update.as_u8(),
            rc: rc::OK,
            payload: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn is_terminator(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.msg_type)
    }

    pub fn path(&self) -> Result<String> {
        decode_path_payload(&self.payload)
    }

    /// Digest carried by an MD5SUM reply; `None` when the payload is empty.
    pub fn digest(&self) -> Result<Option<Digest>> {
        if self.payload.is_empty() {
            return Ok(None);
        }
        Digest::from_slice(&self.payload).map(Some).ok_or_else(|| {
            SyncError::protocol(format!(
                "digest payload has {} bytes, expected 16",
                self.payload.len()
            ))
        })
    }
}

/// Write one frame, header and payload in a single buffer.
pub fn write_frame<W: Write>(stream: &mut W, frame: &Frame) -> Result<()> {
    validate_frame_size(frame.payload.len())?;
    let header = build_frame_header(frame.msg_type, frame.rc, frame.payload.len() as u16);
    let mut buf = Vec::with_capacity(HEADER_LEN + frame.payload.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(&frame.payload);
    stream.write_all(&buf).map_err(SyncError::from_socket)?;
    stream.flush().map_err(SyncError::from_socket)?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed cleanly on a frame boundary.
pub fn read_frame<R: Read>(stream: &mut R) -> Result<Option<Frame>> {
    let mut hdr = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match stream.read(&mut hdr[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(SyncError::ConnectionClosed),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if filled == 0 && e.kind() == ErrorKind::ConnectionReset => return Ok(None),
            Err(e) => return Err(SyncError::from_socket(e)),
        }
    }
    let (msg_type, rc, len) = parse_frame_header(&hdr)?;
    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .map_err(SyncError::from_socket)?;
    Ok(Some(Frame {
        msg_type,
        rc,
        payload,
    }))
}

/// Read one frame where the exchange requires one to follow.
pub fn expect_frame<R: Read>(stream: &mut R) -> Result<Frame> {
    read_frame(stream)?.ok_or(SyncError::ConnectionClosed)
}
