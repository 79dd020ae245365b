use anyhow::Result;
use dirpush::checksum::{fingerprint, fingerprint_file};
use dirpush::config::{ClientConfig, DaemonConfig};
use dirpush::frame::{read_frame, write_frame, Frame};
use dirpush::logger::NoopLogger;
use dirpush::net::client::client_push;
use dirpush::protocol::{rc, MessageType};
use dirpush::service::ServiceHandle;
use dirpush::transfer::TransferMode;
use std::io::{Cursor, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn write_file(path: &Path, size: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = std::fs::File::create(path)?;
    let mut val: u8 = 0;
    let buf: Vec<u8> = (0..size)
        .map(|_| {
            val = val.wrapping_mul(31).wrapping_add(7);
            val
        })
        .collect();
    f.write_all(&buf)?;
    Ok(())
}

fn start_server(root: &Path, mode: TransferMode) -> Result<ServiceHandle> {
    let cfg = DaemonConfig {
        bind: "127.0.0.1:0".into(),
        root: root.to_path_buf(),
        mode,
        beacon: false,
        ..DaemonConfig::default()
    };
    let mut svc = ServiceHandle::new();
    svc.start(&cfg, Arc::new(NoopLogger))?;
    Ok(svc)
}

fn client_config(root: &Path, svc: &ServiceHandle, mode: TransferMode) -> ClientConfig {
    let addr = svc.local_addr().expect("service running");
    let mut cfg = ClientConfig::new(root);
    cfg.host = Some(addr.ip().to_string());
    cfg.port = addr.port();
    cfg.mode = mode;
    cfg
}

fn remote_md5(stream: &mut TcpStream, rel: &str) -> Result<Frame> {
    write_frame(stream, &Frame::request(MessageType::Md5Sum, rel)?)?;
    Ok(read_frame(stream)?.expect("reply"))
}

#[test]
fn hello_scenario_both_modes() -> Result<()> {
    for mode in [TransferMode::Deflate, TransferMode::Raw] {
        let srv = tempfile::tempdir()?;
        let cli = tempfile::tempdir()?;
        std::fs::create_dir(cli.path().join("a"))?;
        std::fs::write(cli.path().join("a/f.txt"), b"hello")?;

        let svc = start_server(srv.path(), mode)?;
        let cfg = client_config(cli.path(), &svc, mode);

        // Server side starts empty: MD5SUM reports no digest
        {
            let addr = svc.local_addr().unwrap();
            let mut s = TcpStream::connect(addr)?;
            let reply = remote_md5(&mut s, "a/f.txt")?;
            assert_eq!(reply.rc, rc::OK);
            assert_eq!(reply.size(), 0);
        }

        let stats = client_push(&cfg, &NoopLogger)?;
        assert_eq!(stats.dirs, 1);
        assert_eq!(stats.files, 1);
        assert_eq!(stats.updated, 1);

        let expected = fingerprint(Cursor::new(b"hello"))?;
        assert_eq!(std::fs::read(srv.path().join("a/f.txt"))?, b"hello");
        assert_eq!(fingerprint_file(&cli.path().join("a/f.txt"))?, Some(expected));

        let addr = svc.local_addr().unwrap();
        let mut s = TcpStream::connect(addr)?;
        let reply = remote_md5(&mut s, "a/f.txt")?;
        assert_eq!(reply.rc, rc::OK);
        assert_eq!(reply.digest()?, Some(expected));
    }
    Ok(())
}

#[test]
fn second_run_pushes_only_changes() -> Result<()> {
    let srv = tempfile::tempdir()?;
    let cli = tempfile::tempdir()?;
    write_file(&cli.path().join("top.bin"), 10_000)?;
    write_file(&cli.path().join("d1/small.txt"), 100)?;
    write_file(&cli.path().join("d1/d2/big.dat"), 200_000)?;
    write_file(&cli.path().join("d1/d2/empty"), 0)?;
    std::fs::create_dir_all(cli.path().join("empty_dir/nested"))?;

    let svc = start_server(srv.path(), TransferMode::Deflate)?;
    let cfg = client_config(cli.path(), &svc, TransferMode::Deflate);

    let first = client_push(&cfg, &NoopLogger)?;
    assert_eq!(first.files, 4);
    assert_eq!(first.updated, 4);
    assert!(srv.path().join("empty_dir/nested").is_dir());
    for rel in ["top.bin", "d1/small.txt", "d1/d2/big.dat", "d1/d2/empty"] {
        assert_eq!(
            std::fs::read(srv.path().join(rel))?,
            std::fs::read(cli.path().join(rel))?,
            "{}",
            rel
        );
    }

    let unchanged = client_push(&cfg, &NoopLogger)?;
    assert_eq!(unchanged.updated, 0);

    std::fs::write(cli.path().join("d1/small.txt"), b"edited")?;
    let edited = client_push(&cfg, &NoopLogger)?;
    assert_eq!(edited.updated, 1);
    assert_eq!(std::fs::read(srv.path().join("d1/small.txt"))?, b"edited");
    Ok(())
}

// Poorly compressible bytes so the deflated stream spans many frames
fn noise(len: usize) -> Vec<u8> {
    let mut x: u32 = 0x9E37_79B9;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x as u8
        })
        .collect()
}

#[test]
fn push_returns_only_after_server_has_the_file() -> Result<()> {
    let srv = tempfile::tempdir()?;
    let cli = tempfile::tempdir()?;
    let svc = start_server(srv.path(), TransferMode::Deflate)?;
    let cfg = client_config(cli.path(), &svc, TransferMode::Deflate);

    for round in 0..10u32 {
        let mut data = noise(400 * 1024);
        data[..4].copy_from_slice(&round.to_be_bytes());
        std::fs::write(cli.path().join("big.bin"), &data)?;

        let stats = client_push(&cfg, &NoopLogger)?;
        assert_eq!(stats.updated, 1, "round {}", round);
        // No waiting: the copy must already be in place
        assert_eq!(std::fs::read(srv.path().join("big.bin"))?, data, "round {}", round);
    }
    Ok(())
}

#[test]
fn unknown_type_closes_connection_without_reply() -> Result<()> {
    let srv = tempfile::tempdir()?;
    let svc = start_server(srv.path(), TransferMode::Raw)?;
    let mut s = TcpStream::connect(svc.local_addr().unwrap())?;
    s.set_read_timeout(Some(Duration::from_secs(5)))?;

    // type = 99, empty payload
    s.write_all(&[0, 0, 99, 0])?;
    assert!(read_frame(&mut s)?.is_none());

    // The daemon keeps serving new connections
    let mut s2 = TcpStream::connect(svc.local_addr().unwrap())?;
    let reply = remote_md5(&mut s2, "nothing")?;
    assert_eq!(reply.rc, rc::OK);
    Ok(())
}

#[test]
fn mkdir_is_idempotent_over_tcp() -> Result<()> {
    let srv = tempfile::tempdir()?;
    let svc = start_server(srv.path(), TransferMode::Raw)?;
    let mut s = TcpStream::connect(svc.local_addr().unwrap())?;
    for _ in 0..3 {
        write_frame(&mut s, &Frame::request(MessageType::Mkdir, "a")?)?;
        let reply = read_frame(&mut s)?.expect("reply");
        assert_eq!(reply.rc, rc::OK);
    }
    assert!(srv.path().join("a").is_dir());
    Ok(())
}
