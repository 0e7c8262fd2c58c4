use {crate::acceptor::Acceptor, std::os::unix::net::UnixStream};

fn temp_socket_path(tag: &str) -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}/crypto-rpc-acceptor-test-{tag}-{}-{n}.sock",
        std::env::temp_dir().display(),
        std::process::id()
    )
}

#[test]
fn accept_returns_none_with_no_pending_connection() {
    let path = temp_socket_path("idle");
    let acceptor = Acceptor::new(&path).unwrap();
    assert!(acceptor.accept().unwrap().is_none());
    let _ = std::fs::remove_file(&path);
}

#[test]
fn accepts_a_connecting_client() {
    let path = temp_socket_path("connect");
    let acceptor = Acceptor::new(&path).unwrap();
    let _client = UnixStream::connect(&path).unwrap();
    // Non-blocking accept on a brand new socket may need the connection to settle; a
    // single retry loop is enough on a local socket.
    let accepted = loop {
        if let Some(fd) = acceptor.accept().unwrap() {
            break fd;
        }
    };
    drop(accepted);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn rebinding_over_a_stale_socket_file_succeeds() {
    let path = temp_socket_path("stale");
    {
        let _first = Acceptor::new(&path).unwrap();
    }
    assert!(std::path::Path::new(&path).exists());
    let _second = Acceptor::new(&path).unwrap();
    let _ = std::fs::remove_file(&path);
}
