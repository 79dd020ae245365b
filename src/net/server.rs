//! Per-connection request dispatcher run by the daemon.

use crate::checksum::fingerprint_file;
use crate::error::{Result, SyncError};
use crate::frame::{read_frame, write_frame, Frame, Payload};
use crate::logger::Logger;
use crate::protocol::{rc, MessageType};
use crate::protocol_core::normalize_under_root;
use crate::transfer::{receive_stream, TransferMode};
use std::io::{self, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a connection handler needs; shared across sequential connections.
#[derive(Clone)]
pub struct ServerContext {
    /// Canonical root every request path is resolved under
    pub root: PathBuf,
    pub mode: TransferMode,
    pub logger: Arc<dyn Logger>,
    /// Drop a connection that sends nothing for this long
    pub idle_timeout: Option<Duration>,
}

impl ServerContext {
    pub fn new(root: &Path, mode: TransferMode, logger: Arc<dyn Logger>) -> Result<Self> {
        let root = root.canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("root is not a directory: {}", root.display()),
            )
            .into());
        }
        Ok(Self {
            root,
            mode,
            logger,
            idle_timeout: None,
        })
    }

    pub fn with_idle_timeout(mut self, idle: Option<Duration>) -> Self {
        self.idle_timeout = idle;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub mkdirs: u64,
    pub checksums: u64,
    pub updates: u64,
}

/// Serve one client until it closes the connection.
///
/// Returns an error (and sends nothing further) on a socket failure, an
/// unknown message type, or any UPDATE failure; the caller drops the
/// connection in every one of those cases.
pub fn handle_conn<S: Read + Write>(
    stream: &mut S,
    ctx: &ServerContext,
) -> Result<SessionSummary> {
    let mut summary = SessionSummary::default();
    loop {
        let request = match read_frame(stream)? {
            Some(f) => f,
            None => return Ok(summary),
        };
        match request.message_type() {
            Some(MessageType::Md5Sum) => {
                let reply = checksum_reply(&request, ctx)?;
                write_frame(stream, &reply)?;
                summary.checksums += 1;
            }
            Some(MessageType::Mkdir) => {
                let status = match mkdir_request(&request, ctx) {
                    Ok(()) => rc::OK,
                    Err(_) => rc::FAILED,
                };
                write_frame(stream, &Frame::reply(request.msg_type, status, None)?)?;
                summary.mkdirs += 1;
            }
            Some(MessageType::Update) => {
                update_request(stream, &request, ctx)?;
                summary.updates += 1;
            }
            None => {
                let msg = format!("invalid message type ({})", request.msg_type);
                ctx.logger.error("dispatch", "", &msg);
                return Err(SyncError::ProtocolViolation(msg));
            }
        }
    }
}

fn resolve(request: &Frame, ctx: &ServerContext) -> Result<(String, PathBuf)> {
    let rel = request.path()?;
    let target = normalize_under_root(&ctx.root, Path::new(&rel))?;
    Ok((rel, target))
}

// Missing file: success with no digest. Unreadable: rc = -1.
fn checksum_reply(request: &Frame, ctx: &ServerContext) -> Result<Frame> {
    let outcome = resolve(request, ctx)
        .and_then(|(rel, target)| Ok((fingerprint_file(&target)?, rel)));
    match outcome {
        Ok((digest, rel)) => {
            ctx.logger.checksum(&rel, digest.as_ref());
            Frame::reply(request.msg_type, rc::OK, digest.map(Payload::Digest))
        }
        Err(e) => {
            let rel = request.path().unwrap_or_default();
            ctx.logger.error("md5sum", &rel, &e.to_string());
            Frame::reply(request.msg_type, rc::FAILED, None)
        }
    }
}

fn mkdir_request(request: &Frame, ctx: &ServerContext) -> Result<()> {
    let (rel, target) = resolve(request, ctx)?;
    match create_dir(&target) {
        Ok(()) => {
            ctx.logger.mkdir(&rel, true);
            Ok(())
        }
        Err(e) => {
            ctx.logger.mkdir(&rel, false);
            ctx.logger.error("mkdir", &rel, &e.to_string());
            Err(e.into())
        }
    }
}

// Single level, mode 0755. An existing directory counts as created.
fn create_dir(target: &Path) -> io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    match builder.create(target) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && target.is_dir() => Ok(()),
        other => other,
    }
}

/// Receive into a temporary sibling and rename over the target only once the
/// terminator arrives, so a cut transfer never replaces the old content.
fn update_request<S: Read + Write>(
    stream: &mut S,
    request: &Frame,
    ctx: &ServerContext,
) -> Result<()> {
    let (rel, target) = resolve(request, ctx)?;
    if target == ctx.root {
        return Err(SyncError::protocol("update names the root directory"));
    }
    let parent = target
        .parent()
        .ok_or_else(|| SyncError::protocol(format!("update target has no parent: /{}", rel)))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".dirpush-")
        .suffix(".part")
        .tempfile_in(parent)?;

    let received = {
        let mut sink = BufWriter::new(tmp.as_file_mut());
        receive_stream(stream, &mut sink, ctx.mode)
    };
    let stats = match received {
        Ok(stats) => stats,
        Err(e) => {
            ctx.logger.error("update", &rel, &e.to_string());
            return Err(e);
        }
    };
    if !stats.stream_complete {
        ctx.logger
            .warn("update", &rel, "terminator arrived before end of compressed stream");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    tmp.persist(&target).map_err(|e| SyncError::Io(e.error))?;
    ctx.logger.update(&rel, &stats);
    Ok(())
}

/// Serve an accepted connection in blocking mode and close it afterwards.
pub fn serve_connection(mut stream: TcpStream, ctx: &ServerContext) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    ctx.logger.session_start(&peer, &ctx.root);

    let started = Instant::now();
    let outcome = prepare_stream(&stream, ctx).and_then(|()| handle_conn(&mut stream, ctx));
    match outcome {
        Ok(s) => {
            ctx.logger
                .done(s.mkdirs, s.checksums, s.updates, started.elapsed().as_secs_f64());
            ctx.logger.session_end(&peer, None);
        }
        Err(e) => ctx.logger.session_end(&peer, Some(&e.to_string())),
    }
    let _ = stream.shutdown(Shutdown::Both);
}

fn prepare_stream(stream: &TcpStream, ctx: &ServerContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(ctx.idle_timeout)?;
    super::tune_socket(stream);
    Ok(())
}
