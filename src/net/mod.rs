//! Blocking TCP sessions: the push client and the daemon's per-connection dispatcher

pub mod client;
pub mod server;

use std::io;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};

static TUNE_WARNED: AtomicBool = AtomicBool::new(false);

// Small frames, so disable Nagle; keepalive so a vanished peer eventually
// surfaces as an error instead of a hang. Failures are reported once per process.
pub(crate) fn tune_socket(stream: &TcpStream) {
    let result = stream.set_nodelay(true).and_then(|()| set_keepalive(stream));
    if let Err(e) = result {
        if !TUNE_WARNED.swap(true, Ordering::Relaxed) {
            eprintln!("socket tuning failed (continuing untuned): {}", e);
        }
    }
}

#[cfg(unix)]
fn set_keepalive(stream: &TcpStream) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let on: libc::c_int = 1;
    let r = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of_val(&on) as libc::socklen_t,
        )
    };
    if r != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_keepalive(_stream: &TcpStream) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tune_socket_sets_nodelay_and_keepalive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        tune_socket(&stream);
        assert!(stream.nodelay().unwrap());

        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            let mut val: libc::c_int = 0;
            let mut len = std::mem::size_of_val(&val) as libc::socklen_t;
            let r = unsafe {
                libc::getsockopt(
                    stream.as_raw_fd(),
                    libc::SOL_SOCKET,
                    libc::SO_KEEPALIVE,
                    &mut val as *mut _ as *mut libc::c_void,
                    &mut len,
                )
            };
            assert_eq!(r, 0);
            assert_ne!(val, 0);
        }
    }
}
