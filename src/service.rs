//! Daemon lifecycle: listener, optional discovery beacon, and an explicit
//! handle the process supervisor owns to start and stop them.

use crate::config::DaemonConfig;
use crate::discovery::{local_ipv4, Beacon, BeaconHandle};
use crate::error::Result;
use crate::logger::Logger;
use crate::net::server::{serve_connection, ServerContext};
use crate::protocol::timeouts;
use parking_lot::Mutex;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Workers {
    acceptor: JoinHandle<()>,
    beacon: Option<BeaconHandle>,
}

pub struct ServiceHandle {
    state: Mutex<ServiceState>,
    stop: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    workers: Option<Workers>,
}

impl Default for ServiceHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHandle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServiceState::Stopped),
            stop: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            workers: None,
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// Address the listener is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind, start the beacon if configured, and begin accepting.
    pub fn start(&mut self, cfg: &DaemonConfig, logger: Arc<dyn Logger>) -> Result<()> {
        {
            let mut st = self.state.lock();
            if *st != ServiceState::Stopped {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("service is {:?}", *st),
                )
                .into());
            }
            *st = ServiceState::Starting;
        }

        match self.spawn_workers(cfg, logger) {
            Ok(()) => {
                *self.state.lock() = ServiceState::Running;
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = ServiceState::Stopped;
                Err(e)
            }
        }
    }

    fn spawn_workers(&mut self, cfg: &DaemonConfig, logger: Arc<dyn Logger>) -> Result<()> {
        let ctx =
            ServerContext::new(&cfg.root, cfg.mode, logger)?.with_idle_timeout(cfg.idle_timeout());
        let listener = TcpListener::bind(&cfg.bind)?;
        // Idle accepts poll; accepted connections switch back to blocking
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.stop.store(false, Ordering::SeqCst);

        let beacon = if cfg.beacon {
            let advertised = cfg
                .advertise
                .unwrap_or_else(|| local_ipv4(cfg.beacon_port));
            let handle = Beacon::broadcast(cfg.beacon_port, advertised, cfg.beacon_interval())
                .spawn(Arc::clone(&self.stop))?;
            eprintln!(
                "beacon announcing {} on udp port {}",
                advertised, cfg.beacon_port
            );
            Some(handle)
        } else {
            None
        };

        let stop = Arc::clone(&self.stop);
        let spawned = thread::Builder::new()
            .name("dirpush-accept".into())
            .spawn(move || accept_loop(listener, ctx, stop));
        let acceptor = match spawned {
            Ok(j) => j,
            Err(e) => {
                self.stop.store(true, Ordering::SeqCst);
                if let Some(b) = beacon {
                    b.join();
                }
                return Err(e.into());
            }
        };

        eprintln!("dirpushd listening on {} root={}", local_addr, cfg.root.display());
        self.local_addr = Some(local_addr);
        self.workers = Some(Workers { acceptor, beacon });
        Ok(())
    }

    /// Stop accepting and wait for the workers.
    ///
    /// A connection being served runs to completion first. A client that
    /// stays connected but sends nothing holds `stop` until the configured
    /// idle timeout drops it; with the timeout disabled that wait is unbounded.
    pub fn stop(&mut self) {
        {
            let mut st = self.state.lock();
            if *st != ServiceState::Running {
                return;
            }
            *st = ServiceState::Stopping;
        }
        self.stop.store(true, Ordering::SeqCst);
        if let Some(w) = self.workers.take() {
            let _ = w.acceptor.join();
            if let Some(b) = w.beacon {
                b.join();
            }
        }
        self.local_addr = None;
        *self.state.lock() = ServiceState::Stopped;
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// One connection at a time, each served to completion before the next accept
fn accept_loop(listener: TcpListener, ctx: ServerContext, stop: Arc<AtomicBool>) {
    let idle = Duration::from_millis(timeouts::ACCEPT_POLL_MS);
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => serve_connection(stream, &ctx),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(idle),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                eprintln!("accept error: {}", e);
                thread::sleep(idle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;

    fn loopback_config(root: &std::path::Path) -> DaemonConfig {
        DaemonConfig {
            bind: "127.0.0.1:0".into(),
            root: root.to_path_buf(),
            beacon: false,
            ..DaemonConfig::default()
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let tmp = tempfile::tempdir().unwrap();
        let mut svc = ServiceHandle::new();
        assert_eq!(svc.state(), ServiceState::Stopped);

        svc.start(&loopback_config(tmp.path()), Arc::new(NoopLogger)).unwrap();
        assert_eq!(svc.state(), ServiceState::Running);
        assert!(svc.local_addr().is_some());

        // A second start while running is refused
        assert!(svc.start(&loopback_config(tmp.path()), Arc::new(NoopLogger)).is_err());
        assert_eq!(svc.state(), ServiceState::Running);

        svc.stop();
        assert_eq!(svc.state(), ServiceState::Stopped);
        assert!(svc.local_addr().is_none());

        // Restartable after a stop
        svc.start(&loopback_config(tmp.path()), Arc::new(NoopLogger)).unwrap();
        assert_eq!(svc.state(), ServiceState::Running);
        svc.stop();
    }

    #[test]
    fn test_start_failure_returns_to_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = loopback_config(&tmp.path().join("missing"));
        let mut svc = ServiceHandle::new();
        assert!(svc.start(&cfg, Arc::new(NoopLogger)).is_err());
        assert_eq!(svc.state(), ServiceState::Stopped);
    }

    #[test]
    fn test_stop_is_not_held_by_silent_client() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = DaemonConfig {
            idle_timeout_ms: 200,
            ..loopback_config(tmp.path())
        };
        let mut svc = ServiceHandle::new();
        svc.start(&cfg, Arc::new(NoopLogger)).unwrap();

        let _silent = std::net::TcpStream::connect(svc.local_addr().unwrap()).unwrap();
        // Let the acceptor pick it up
        thread::sleep(Duration::from_millis(150));

        let started = std::time::Instant::now();
        svc.stop();
        assert_eq!(svc.state(), ServiceState::Stopped);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let mut svc = ServiceHandle::new();
        svc.stop();
        assert_eq!(svc.state(), ServiceState::Stopped);
    }
}
