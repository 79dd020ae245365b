use crate::checksum::Digest;
use crate::transfer::TransferStats;
use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Sync session events. Every method defaults to a no-op.
pub trait Logger: Send + Sync {
    fn session_start(&self, _peer: &str, _root: &Path) {}
    fn mkdir(&self, _path: &str, _ok: bool) {}
    fn checksum(&self, _path: &str, _digest: Option<&Digest>) {}
    fn update(&self, _path: &str, _stats: &TransferStats) {}
    fn warn(&self, _context: &str, _path: &str, _msg: &str) {}
    fn error(&self, _context: &str, _path: &str, _msg: &str) {}
    fn session_end(&self, _peer: &str, _error: Option<&str>) {}
    fn done(&self, _dirs: u64, _files: u64, _updated: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Human-readable progress on stdout, errors on stderr
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn session_start(&self, peer: &str, root: &Path) {
        println!("session {} root={}", peer, root.display());
    }
    fn mkdir(&self, path: &str, ok: bool) {
        if ok {
            println!("mkdir /{}", path);
        } else {
            eprintln!("mkdir /{} failed", path);
        }
    }
    fn checksum(&self, path: &str, digest: Option<&Digest>) {
        match digest {
            Some(d) => println!("md5sum /{} {}", path, d),
            None => println!("md5sum /{} (absent)", path),
        }
    }
    fn update(&self, path: &str, stats: &TransferStats) {
        match stats.ratio() {
            Some(r) => println!("update /{} ({} bytes, ratio {:.2})", path, stats.bytes_read, r),
            None => println!("update /{} (empty)", path),
        }
    }
    fn warn(&self, context: &str, path: &str, msg: &str) {
        eprintln!("warning: {} /{}: {}", context, path, msg);
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        eprintln!("{} /{}: {}", context, path, msg);
    }
    fn session_end(&self, peer: &str, error: Option<&str>) {
        match error {
            None => println!("session {} closed", peer),
            Some(e) => eprintln!("session {} dropped: {}", peer, e),
        }
    }
    fn done(&self, dirs: u64, files: u64, updated: u64, seconds: f64) {
        println!(
            "done: {} dirs, {} files checked, {} updated in {:.2}s",
            dirs, files, updated, seconds
        );
    }
}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn session_start(&self, peer: &str, root: &Path) {
        self.line(&format!("START peer={} root={}", peer, root.display()));
    }
    fn mkdir(&self, path: &str, ok: bool) {
        self.line(&format!("MKDIR path=/{} ok={}", path, ok));
    }
    fn checksum(&self, path: &str, digest: Option<&Digest>) {
        let d = digest.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
        self.line(&format!("MD5SUM path=/{} digest={}", path, d));
    }
    fn update(&self, path: &str, stats: &TransferStats) {
        self.line(&format!(
            "UPDATE path=/{} read={} written={} frames={}",
            path, stats.bytes_read, stats.bytes_written, stats.frames
        ));
    }
    fn warn(&self, context: &str, path: &str, msg: &str) {
        self.line(&format!("WARN ctx={} path=/{} msg={}", context, path, msg));
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} path=/{} msg={}", context, path, msg));
    }
    fn session_end(&self, peer: &str, error: Option<&str>) {
        match error {
            None => self.line(&format!("END peer={}", peer)),
            Some(e) => self.line(&format!("DROP peer={} msg={}", peer, e)),
        }
    }
    fn done(&self, dirs: u64, files: u64, updated: u64, seconds: f64) {
        self.line(&format!(
            "DONE dirs={dirs} files={files} updated={updated} seconds={seconds:.3}"
        ));
    }
}
