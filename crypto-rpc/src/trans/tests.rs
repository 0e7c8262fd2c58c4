use {crate::error::TransError, crate::trans::*, std::os::fd::AsRawFd};

fn socketpair() -> (std::os::unix::net::UnixStream, std::os::unix::net::UnixStream) {
    std::os::unix::net::UnixStream::pair().unwrap()
}

#[test]
fn round_trip_message() {
    let (a, b) = socketpair();
    send_message(a.as_raw_fd(), b"hello world").unwrap();
    let msg = recv_message(b.as_raw_fd()).unwrap().unwrap();
    assert_eq!(msg, b"hello world");
}

#[test]
fn empty_message_round_trips() {
    let (a, b) = socketpair();
    send_message(a.as_raw_fd(), b"").unwrap();
    let msg = recv_message(b.as_raw_fd()).unwrap().unwrap();
    assert!(msg.is_empty());
}

#[test]
fn oversized_message_is_rejected_before_send() {
    let (a, _b) = socketpair();
    let huge = vec![0u8; (MAX_MESSAGE_SIZE + 1) as usize];
    let err = send_message(a.as_raw_fd(), &huge).unwrap_err();
    assert!(matches!(err, TransError::MessageTooLarge(_)));
}

#[test]
fn closed_peer_yields_none_on_clean_eof() {
    let (a, b) = socketpair();
    drop(a);
    assert!(recv_message(b.as_raw_fd()).unwrap().is_none());
}

#[test]
fn closed_peer_after_partial_header_is_an_error() {
    let (a, b) = socketpair();
    uapi::write(a.as_raw_fd(), &[1u8, 2]).unwrap();
    drop(a);
    let err = recv_message(b.as_raw_fd()).unwrap_err();
    assert!(matches!(err, TransError::Closed));
}

#[test]
fn closed_peer_after_header_but_before_body_is_an_error() {
    let (a, b) = socketpair();
    uapi::write(a.as_raw_fd(), &4u32.to_le_bytes()).unwrap();
    uapi::write(a.as_raw_fd(), &[9u8]).unwrap();
    drop(a);
    let err = recv_message(b.as_raw_fd()).unwrap_err();
    assert!(matches!(err, TransError::Closed));
}

#[test]
fn peer_credentials_are_retrievable() {
    let (a, _b) = socketpair();
    let creds = peer_credentials(a.as_raw_fd()).unwrap();
    // SAFETY: getuid takes no arguments and cannot fail.
    let our_uid = unsafe { uapi::c::getuid() };
    assert_eq!(creds.uid, our_uid);
}
