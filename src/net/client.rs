//! Push client: create remote directories, compare digests, stream changed files.

use crate::checksum::fingerprint_file;
use crate::config::ClientConfig;
use crate::discovery::discover_server;
use crate::error::{Result, SyncError};
use crate::frame::{expect_frame, read_frame, write_frame, Frame};
use crate::fs_enum::{TreeListing, WalkdirListing};
use crate::logger::Logger;
use crate::protocol::{rc, MessageType};
use crate::transfer::{send_stream, TransferMode};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub dirs: u64,
    pub files: u64,
    pub updated: u64,
    /// Payload bytes sent in UPDATE transfers
    pub bytes_sent: u64,
}

/// Join a `/`-separated relative path onto a local root
pub fn local_path(root: &Path, rel: &str) -> PathBuf {
    rel.split('/')
        .filter(|c| !c.is_empty())
        .fold(root.to_path_buf(), |p, c| p.join(c))
}

/// One request/reply exchange; `rc = -1` becomes `Rejected`.
fn exchange<S: Read + Write>(stream: &mut S, t: MessageType, rel: &str) -> Result<Frame> {
    write_frame(stream, &Frame::request(t, rel)?)?;
    let reply = expect_frame(stream)?;
    if reply.rc == rc::FAILED {
        return Err(SyncError::Rejected {
            op: t.verb(),
            path: format!("/{}", rel),
        });
    }
    Ok(reply)
}

/// Drive a whole session over an established stream.
///
/// Any failure aborts the session; re-running from the top is the recovery
/// path since MKDIR and UPDATE are idempotent.
pub fn push_tree<S: Read + Write, L: TreeListing>(
    stream: &mut S,
    listing: &L,
    root: &Path,
    mode: TransferMode,
    logger: &dyn Logger,
) -> Result<SyncStats> {
    let started = Instant::now();
    let mut stats = SyncStats::default();

    for dir in listing.directories()? {
        if let Err(e) = exchange(stream, MessageType::Mkdir, &dir) {
            logger.mkdir(&dir, false);
            return Err(e);
        }
        logger.mkdir(&dir, true);
        stats.dirs += 1;
    }

    for file in listing.files()? {
        stats.files += 1;
        if let Some(sent) = sync_file(stream, root, &file, mode, logger)? {
            stats.updated += 1;
            stats.bytes_sent += sent;
        }
    }

    logger.done(
        stats.dirs,
        stats.files,
        stats.updated,
        started.elapsed().as_secs_f64(),
    );
    Ok(stats)
}

// Returns the wire bytes sent when the file had to be pushed
fn sync_file<S: Read + Write>(
    stream: &mut S,
    root: &Path,
    rel: &str,
    mode: TransferMode,
    logger: &dyn Logger,
) -> Result<Option<u64>> {
    let path = local_path(root, rel);

    // Local hashing overlaps the server's work on the request
    write_frame(stream, &Frame::request(MessageType::Md5Sum, rel)?)?;
    let local = fingerprint_file(&path)?.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} vanished during sync", path.display()),
        )
    })?;
    let reply = expect_frame(stream)?;
    if reply.rc == rc::FAILED {
        logger.error("md5sum", rel, "server could not evaluate file");
        return Err(SyncError::Rejected {
            op: MessageType::Md5Sum.verb(),
            path: format!("/{}", rel),
        });
    }
    let remote = reply.digest()?;
    logger.checksum(rel, remote.as_ref());

    if remote == Some(local) {
        return Ok(None);
    }

    let mut source = BufReader::new(File::open(&path)?);
    write_frame(stream, &Frame::request(MessageType::Update, rel)?)?;
    let transfer = send_stream(&mut source, stream, mode)?;
    logger.update(rel, &transfer);
    Ok(Some(transfer.bytes_written))
}

/// Connect to `host:port`, trying each resolved IPv4 address in turn.
pub fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", host));
    for addr in (host, port).to_socket_addrs()?.filter(|a| a.is_ipv4()) {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                super::tune_socket(&stream);
                return Ok(stream);
            }
            Err(e) => last_err = e,
        }
    }
    Err(last_err.into())
}

/// Resolve the server (discovering it when no host is configured), connect
/// and push the configured root.
pub fn client_push(cfg: &ClientConfig, logger: &dyn Logger) -> Result<SyncStats> {
    let host = match &cfg.host {
        Some(h) => h.clone(),
        None => {
            let ip = discover_server(cfg.discovery_port, cfg.discover_timeout)?;
            ip.to_string()
        }
    };
    let mut stream = connect(&host, cfg.port)?;
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| host.clone());
    logger.session_start(&peer, &cfg.root);

    let listing = WalkdirListing::new(&cfg.root, cfg.filter.clone());
    let stats = push_tree(&mut stream, &listing, &cfg.root, cfg.mode, logger)?;
    stream.flush().map_err(SyncError::from_socket)?;
    stream
        .shutdown(Shutdown::Write)
        .map_err(SyncError::from_socket)?;
    await_close(&mut stream)?;
    Ok(stats)
}

/// Wait for the server to close its side after our half-close.
///
/// The daemon only closes once the last UPDATE has been renamed into place,
/// so returning from here means every pushed file is visible on the server.
pub fn await_close<S: Read>(stream: &mut S) -> Result<()> {
    match read_frame(stream)? {
        None => Ok(()),
        Some(f) => Err(SyncError::protocol(format!(
            "unexpected frame (type {}, {} bytes) after end of session",
            f.msg_type,
            f.size()
        ))),
    }
}
