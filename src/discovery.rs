//! UDP broadcast discovery.
//!
//! The daemon periodically broadcasts a 4-byte datagram holding its IPv4
//! address. A client without a configured host binds the discovery port, takes
//! the first well-formed beacon it sees, and uses the sender's address as the
//! server. Stray datagrams too short to be a beacon are ignored.
//! Nothing is authenticated: whoever broadcasts on the port is trusted.

use crate::error::Result;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const BEACON_LEN: usize = 4;

pub fn encode_beacon(ip: Ipv4Addr) -> [u8; BEACON_LEN] {
    ip.octets()
}

pub fn decode_beacon(datagram: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; BEACON_LEN] = datagram.get(..BEACON_LEN)?.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

/// Pick the address peers should see: the interface the kernel would route a
/// broadcast through. Falls back to unspecified when no route exists.
pub fn local_ipv4(port: u16) -> Ipv4Addr {
    let probe = || -> io::Result<Ipv4Addr> {
        let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        sock.set_broadcast(true)?;
        sock.connect((Ipv4Addr::BROADCAST, port))?;
        match sock.local_addr()?.ip() {
            IpAddr::V4(ip) => Ok(ip),
            IpAddr::V6(_) => Ok(Ipv4Addr::UNSPECIFIED),
        }
    };
    probe().unwrap_or(Ipv4Addr::UNSPECIFIED)
}

/// Periodic announcer run by the daemon.
pub struct Beacon {
    target: SocketAddr,
    advertised: Ipv4Addr,
    interval: Duration,
}

impl Beacon {
    pub fn new(target: SocketAddr, advertised: Ipv4Addr, interval: Duration) -> Self {
        Self {
            target,
            advertised,
            interval,
        }
    }

    /// Broadcast on the local broadcast address
    pub fn broadcast(port: u16, advertised: Ipv4Addr, interval: Duration) -> Self {
        let target = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port));
        Self::new(target, advertised, interval)
    }

    pub fn send_once(&self, sock: &UdpSocket) -> io::Result<()> {
        sock.send_to(&encode_beacon(self.advertised), self.target)?;
        Ok(())
    }

    /// Announce until `stop` is set. Send failures are reported once each
    /// and do not end the loop.
    pub fn spawn(self, stop: Arc<AtomicBool>) -> io::Result<BeaconHandle> {
        let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        sock.set_broadcast(true)?;
        let join = thread::Builder::new()
            .name("dirpush-beacon".into())
            .spawn(move || {
                let tick = Duration::from_millis(50);
                let mut last_error: Option<String> = None;
                while !stop.load(Ordering::SeqCst) {
                    if let Err(e) = self.send_once(&sock) {
                        let msg = e.to_string();
                        if last_error.as_deref() != Some(msg.as_str()) {
                            eprintln!("beacon send to {} failed: {}", self.target, msg);
                            last_error = Some(msg);
                        }
                    }
                    let started = Instant::now();
                    while started.elapsed() < self.interval && !stop.load(Ordering::SeqCst) {
                        thread::sleep(tick.min(self.interval));
                    }
                }
            })?;
        Ok(BeaconHandle { join })
    }
}

pub struct BeaconHandle {
    join: JoinHandle<()>,
}

impl BeaconHandle {
    pub fn join(self) {
        let _ = self.join.join();
    }
}

#[cfg(unix)]
fn bind_discovery_socket(addr: SocketAddrV4) -> io::Result<UdpSocket> {
    use std::os::fd::FromRawFd;

    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // Owns the fd from here on so every error path closes it
        let sock = UdpSocket::from_raw_fd(fd);

        let on: libc::c_int = 1;
        for opt in [libc::SO_REUSEADDR, libc::SO_BROADCAST] {
            let r = libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &on as *const _ as *const libc::c_void,
                std::mem::size_of_val(&on) as libc::socklen_t,
            );
            if r != 0 {
                return Err(io::Error::last_os_error());
            }
        }

        let mut sin: libc::sockaddr_in = std::mem::zeroed();
        sin.sin_family = libc::AF_INET as libc::sa_family_t;
        sin.sin_port = addr.port().to_be();
        sin.sin_addr = libc::in_addr {
            s_addr: u32::from(*addr.ip()).to_be(),
        };
        let r = libc::bind(
            fd,
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        );
        if r != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sock)
    }
}

#[cfg(not(unix))]
fn bind_discovery_socket(addr: SocketAddrV4) -> io::Result<UdpSocket> {
    let sock = UdpSocket::bind(addr)?;
    sock.set_broadcast(true)?;
    Ok(sock)
}

/// Block until a beacon arrives on `port` and return the sender's address.
/// `timeout` of `None` waits indefinitely.
pub fn discover_server(port: u16, timeout: Option<Duration>) -> Result<Ipv4Addr> {
    let sock = bind_discovery_socket(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut buf = [0u8; 1024];
    loop {
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no discovery beacon").into());
            }
            sock.set_read_timeout(Some(remaining))?;
        }
        match sock.recv_from(&mut buf) {
            Ok((n, SocketAddr::V4(from))) => match decode_beacon(&buf[..n]) {
                Some(advertised) => {
                    if advertised != *from.ip() && !advertised.is_unspecified() {
                        eprintln!(
                            "beacon from {} advertises {}; using the sender address",
                            from.ip(),
                            advertised
                        );
                    }
                    return Ok(*from.ip());
                }
                None => continue,
            },
            Ok((_, SocketAddr::V6(_))) => continue,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no discovery beacon").into());
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
