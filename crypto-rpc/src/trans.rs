//! Length-prefixed envelope framing over a local stream socket.
//!
//! No out-of-band file descriptors are carried: every
//! [`Envelope`](crate::envelope::Envelope) is a self-contained,
//! length-prefixed byte blob (§4.1). A message is `len:u32 LE ∥ len bytes`; `len` is
//! validated against [`MAX_MESSAGE_SIZE`] before any read is attempted so a corrupt or
//! hostile peer cannot make us allocate an unbounded buffer.

use {
    crate::error::TransError,
    std::{
        io,
        os::fd::RawFd,
    },
    uapi::{Errno, c},
};

#[cfg(test)]
mod tests;

/// Header size: one `u32` length prefix.
const HEADER_SIZE: usize = 4;

/// Upper bound on a single envelope's encoded size. Chosen generously above anything
/// the key-storage payloads in this crate are expected to carry; exists purely so a
/// malformed declared length fails fast with [`TransError::MessageTooLarge`] instead of
/// driving an allocation.
pub const MAX_MESSAGE_SIZE: u32 = 1 << 20;

/// The effective user id and process id the kernel attaches to an accepted connection
/// (§4.5 "Peer credentials"). Retrieved once at accept time via `SO_PEERCRED`; the
/// local transport this crate targets does not support per-message credentials, so "per
/// message" in the spec is satisfied by caching the value for the lifetime of the
/// connection it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub pid: u32,
}

/// Reads the peer credentials of a connected `AF_UNIX` socket via `SO_PEERCRED`.
pub fn peer_credentials(fd: RawFd) -> Result<PeerCredentials, io::Error> {
    let cred: c::ucred = uapi::getsockopt(fd, c::SOL_SOCKET, c::SO_PEERCRED)
        .map_err(|Errno(e)| io::Error::from_raw_os_error(e))?;
    Ok(PeerCredentials {
        uid: cred.uid,
        pid: cred.pid,
    })
}

/// Blocking write of one length-prefixed message. Used by both the client proxy base
/// (synchronous call/wait, §4.4) and the server endpoint (response/event emission,
/// §4.5).
pub fn send_message(fd: RawFd, body: &[u8]) -> Result<(), TransError> {
    if body.len() as u64 > MAX_MESSAGE_SIZE as u64 {
        return Err(TransError::MessageTooLarge(body.len() as u32));
    }
    let mut framed = Vec::with_capacity(HEADER_SIZE + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(body);
    write_all(fd, &framed)
}

fn write_all(fd: RawFd, mut buf: &[u8]) -> Result<(), TransError> {
    while !buf.is_empty() {
        match uapi::write(fd, buf) {
            Ok(n) if n > 0 => buf = &buf[n..],
            Ok(_) => return Err(TransError::Closed),
            Err(Errno(c::EINTR)) => {}
            Err(e) => return Err(TransError::WriteToSocket(io::Error::from_raw_os_error(e.0))),
        }
    }
    Ok(())
}

/// Blocking read of one length-prefixed message. Returns `Ok(None)` on a clean
/// end-of-file with no partial message pending.
pub fn recv_message(fd: RawFd) -> Result<Option<Vec<u8>>, TransError> {
    let mut header = [0u8; HEADER_SIZE];
    if !read_exact(fd, &mut header)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(header);
    if len > MAX_MESSAGE_SIZE {
        return Err(TransError::MessageTooLarge(len));
    }
    let mut body = vec![0u8; len as usize];
    if !read_exact(fd, &mut body)? {
        return Err(TransError::Closed);
    }
    Ok(Some(body))
}

/// Reads until `buf` is completely filled. Returns `Ok(false)` only for a clean
/// end-of-file before any byte of `buf` was read (no message was pending at all); a
/// peer that closes after filling part of `buf` is a truncated message, not a clean
/// disconnect, and is reported as [`TransError::Closed`] rather than silently treated
/// as a short read of an all-zero buffer.
fn read_exact(fd: RawFd, mut buf: &mut [u8]) -> Result<bool, TransError> {
    let mut read_any = false;
    while !buf.is_empty() {
        match uapi::read(fd, buf) {
            Ok(0) if read_any => return Err(TransError::Closed),
            Ok(0) => return Ok(false),
            Ok(n) => {
                read_any = true;
                buf = &mut buf[n..];
            }
            Err(Errno(c::EINTR)) => {}
            Err(e) => return Err(TransError::ReadFromSocket(io::Error::from_raw_os_error(e.0))),
        }
    }
    Ok(true)
}

