//! Listening socket acceptor (§4.6): binds the single `AF_UNIX` stream address named in
//! the daemon configuration and hands back accepted connections.
//!
//! The daemon is configured with one fixed `Server.socketPath` (§6); there is no
//! address-selection loop to run, only a stale-socket-file cleanup before binding.

use {
    crate::error::AcceptorError,
    std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
    uapi::{Errno, c, sockaddr_none_mut},
};

#[cfg(test)]
mod tests;

pub struct Acceptor {
    socket: OwnedFd,
}

impl Acceptor {
    /// Binds and starts listening on `socket_path`. The socket is created non-blocking so
    /// it can be driven from the reactor's epoll loop (§4.6).
    pub fn new(socket_path: &str) -> Result<Self, AcceptorError> {
        let socket = uapi::socket(
            c::AF_UNIX,
            c::SOCK_STREAM | c::SOCK_CLOEXEC | c::SOCK_NONBLOCK,
            0,
        )
        .map_err(|e| AcceptorError::CreateSocket(e.into()))?;
        let socket: OwnedFd = socket.into();
        bind(&socket, socket_path)?;
        uapi::listen(socket.as_raw_fd(), 1024).map_err(|e| AcceptorError::Listen(e.into()))?;
        Ok(Self { socket })
    }

    pub fn socket(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }

    /// Accepts one pending connection, or `None` if none is currently pending. The
    /// returned fd is a plain blocking socket; the single reactor thread only ever reads
    /// a bounded, already-announced-readable envelope off of it, which §5 accepts as a
    /// short, non-parallelizing block.
    pub fn accept(&self) -> Result<Option<OwnedFd>, AcceptorError> {
        loop {
            let res = uapi::accept4(
                self.socket.as_raw_fd(),
                sockaddr_none_mut(),
                c::SOCK_CLOEXEC,
            );
            match res {
                Ok((s, _)) => return Ok(Some(s.into())),
                Err(Errno(c::EAGAIN)) => return Ok(None),
                Err(Errno(c::EINTR)) => {}
                Err(e) => return Err(AcceptorError::Accept(e.into())),
            }
        }
    }
}

impl AsFd for Acceptor {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket()
    }
}

fn bind(socket: &OwnedFd, path: &str) -> Result<(), AcceptorError> {
    let mut addr: c::sockaddr_un = uapi::pod_zeroed();
    addr.sun_family = c::AF_UNIX as _;
    if path.len() + 1 > addr.sun_path.len() {
        return Err(AcceptorError::Bind(std::io::Error::other(format!(
            "socket path {path:?} is too long for a unix socket address"
        ))));
    }
    match uapi::lstat(path) {
        Ok(_) => {
            let _ = uapi::unlink(path);
        }
        Err(Errno(c::ENOENT)) => {}
        Err(_) => {}
    }
    let sun_path = uapi::as_bytes_mut(&mut addr.sun_path[..]);
    sun_path[..path.len()].copy_from_slice(path.as_bytes());
    sun_path[path.len()] = 0;
    uapi::bind(socket.as_raw_fd(), &addr).map_err(|e| AcceptorError::Bind(e.into()))
}
