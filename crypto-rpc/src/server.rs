//! The server runtime (§4.6): accept loop, single-reactor-thread dispatch over every
//! client endpoint, disconnect reclamation, and `SIGTERM`/`SIGINT` shutdown.
//!
//! Grounded on `wl-proxy/src/state.rs`'s single-`State`-services-many-endpoints model —
//! explicitly chosen here over a thread-per-client design because the spec requires one
//! thread to service all endpoints cooperatively (§5): an endpoint's `process_message` is
//! never re-entered while another one is in flight on the same thread.

use {
    crate::{
        acceptor::Acceptor,
        endpoint::{ClientEndpoint, SharedProviders},
        poll::{ERROR, PollEvent, Poller, READABLE},
        skeleton::encode_shutdown_notice,
        utils::{cold_path::cold_path, stack::Stack},
    },
    error_reporter::Report,
    std::{
        cell::{Cell, RefCell},
        collections::HashMap,
        os::fd::AsFd,
        rc::Rc,
        sync::atomic::{AtomicBool, Ordering},
    },
    thiserror::Error,
    uapi::c,
};

#[cfg(test)]
mod tests;

/// The poll token reserved for the listening socket; every accepted endpoint gets a
/// token starting at 1 (§4.6 "a vector of client endpoints").
const ACCEPTOR_TOKEN: u64 = 0;

/// How long a single `epoll_wait` call may block (§5: blocking the reactor thread is
/// acceptable for local, bounded-size messages, but the loop still needs to notice a
/// delivered shutdown signal promptly even with no connection traffic at all).
const POLL_TIMEOUT_MS: c::c_int = 1000;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind the listening socket")]
    Acceptor(#[from] crate::error::AcceptorError),
    #[error("could not set up the reactor's epoll instance: {0}")]
    Poll(String),
}

/// `SIGTERM`/`SIGINT` set this before the next reactor tick (§4.6 "Shuts down on
/// SIGTERM/SIGINT"). There is exactly one server runtime per process, so a single static
/// is simpler and exactly as correct as threading a handle through to the signal
/// handler — the handler itself can only touch async-signal-safe state.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signum: c::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs `SIGTERM`/`SIGINT` handlers that flip [`SHUTDOWN_REQUESTED`]. Idempotent;
/// safe to call more than once (a second call just re-installs the same handler).
fn install_shutdown_handlers() {
    unsafe {
        c::signal(c::SIGTERM, request_shutdown as usize);
        c::signal(c::SIGINT, request_shutdown as usize);
    }
}

/// Whether a shutdown signal has been observed. Exposed so a caller embedding the
/// runtime in something other than [`ServerRuntime::run`] can drive its own loop.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// The accept loop plus every client endpoint it is currently servicing (§4.6). Owns the
/// acceptor, the shared daemon-wide providers, and the reactor's epoll instance.
pub struct ServerRuntime {
    poller: Poller,
    acceptor: Acceptor,
    providers: Rc<SharedProviders>,
    endpoints: RefCell<HashMap<u64, Rc<ClientEndpoint>>>,
    next_token: Cell<u64>,
    /// Endpoints observed as `Closing` during the current batch of events, reclaimed
    /// only once every event in that batch has been handled (§4.6 step 2-3: "move
    /// endpoint pointer into a reclamation list" / "drain the reclamation list") — this
    /// is what keeps a later event in the same `epoll_wait` batch, for an endpoint we
    /// already decided to tear down, from touching a freed object.
    reclaim: Stack<u64>,
    max_connections: u32,
}

impl ServerRuntime {
    pub fn new(
        socket_path: &str,
        max_connections: u32,
        providers: Rc<SharedProviders>,
    ) -> Result<Self, ServerError> {
        install_shutdown_handlers();
        let acceptor = Acceptor::new(socket_path)?;
        let poller = Poller::new().map_err(|e| ServerError::Poll(Report::new(e).to_string()))?;
        poller
            .register(ACCEPTOR_TOKEN, acceptor.socket())
            .map_err(|e| ServerError::Poll(Report::new(e).to_string()))?;
        poller
            .update_interests(ACCEPTOR_TOKEN, acceptor.socket(), READABLE)
            .map_err(|e| ServerError::Poll(Report::new(e).to_string()))?;
        Ok(Self {
            poller,
            acceptor,
            providers,
            endpoints: RefCell::new(HashMap::new()),
            next_token: Cell::new(1),
            reclaim: Stack::default(),
            max_connections,
        })
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.borrow().len()
    }

    /// Runs the reactor until a shutdown signal is observed (§4.6, §4.10 "process entry
    /// point"). Returns once every endpoint has been notified and dropped.
    pub fn run(&self) {
        let mut events = [PollEvent::default(); crate::poll::MAX_EVENTS];
        while !shutdown_requested() {
            self.tick(&mut events);
        }
        self.shutdown();
    }

    /// Services exactly one batch of reactor events. Split out from [`Self::run`] so
    /// tests can drive the loop deterministically instead of racing a signal.
    fn tick(&self, events: &mut [PollEvent; crate::poll::MAX_EVENTS]) {
        let n = match self.poller.read_events(POLL_TIMEOUT_MS, events) {
            Ok(n) => n,
            Err(e) => {
                log::error!("reactor epoll_wait failed: {}", Report::new(e));
                return;
            }
        };
        for event in &events[..n] {
            if event.u64 == ACCEPTOR_TOKEN {
                self.accept_pending();
            } else {
                self.service(event.u64, event.events);
            }
        }
        self.drain_reclamation();
    }

    fn accept_pending(&self) {
        loop {
            let fd = match self.acceptor.accept() {
                Ok(Some(fd)) => fd,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("accept() failed: {}", Report::new(e));
                    break;
                }
            };
            if self.endpoints.borrow().len() >= self.max_connections as usize {
                cold_path();
                log::warn!("rejecting connection: Server.maxConnectionNum reached");
                continue;
            }
            let endpoint = match ClientEndpoint::new(fd, self.providers.clone()) {
                Ok(e) => Rc::new(e),
                Err(e) => {
                    log::warn!("could not initialize client endpoint: {}", Report::new(e));
                    continue;
                }
            };
            let token = self.next_token.get();
            self.next_token.set(token + 1);
            if let Err(e) = self.poller.register(token, endpoint.as_fd()) {
                log::warn!("could not register endpoint with epoll: {}", Report::new(e));
                continue;
            }
            if let Err(e) = self
                .poller
                .update_interests(token, endpoint.as_fd(), READABLE)
            {
                log::warn!("could not arm endpoint {token} for reading: {}", Report::new(e));
                self.poller.unregister(endpoint.as_fd());
                continue;
            }
            self.endpoints.borrow_mut().insert(token, endpoint);
        }
        if let Err(e) = self
            .poller
            .update_interests(ACCEPTOR_TOKEN, self.acceptor.socket(), READABLE)
        {
            log::error!("could not re-arm acceptor interest: {}", Report::new(e));
        }
    }

    fn service(&self, token: u64, interests: u32) {
        let Some(endpoint) = self.endpoints.borrow().get(&token).cloned() else {
            return;
        };
        if interests & ERROR != 0 {
            self.reclaim.push(token);
            return;
        }
        if let Err(e) = endpoint.service_one_message() {
            log::warn!("endpoint {token} faulted: {}", Report::new(e));
            self.reclaim.push(token);
            return;
        }
        if endpoint.is_closing() {
            self.reclaim.push(token);
            return;
        }
        if let Err(e) = self
            .poller
            .update_interests(token, endpoint.as_fd(), READABLE)
        {
            log::warn!("could not re-arm endpoint {token}: {}", Report::new(e));
            self.reclaim.push(token);
        }
    }

    fn drain_reclamation(&self) {
        for token in self.reclaim.take() {
            let Some(endpoint) = self.endpoints.borrow_mut().remove(&token) else {
                continue;
            };
            self.poller.unregister(endpoint.as_fd());
            endpoint.disconnect_cleanup();
        }
    }

    /// Stops the acceptor, best-effort-notifies every still-connected endpoint that the
    /// server is going away, and drops them (§4.6, §5 "Disconnect semantics" — dropping
    /// runs the same transaction-rollback / owned-object-release path a normal
    /// disconnect would).
    fn shutdown(&self) {
        self.poller.unregister(self.acceptor.socket());
        let notice = encode_shutdown_notice();
        let endpoints = self.endpoints.borrow_mut().drain().collect::<Vec<_>>();
        for (_, endpoint) in endpoints {
            let _ = crate::trans::send_message(
                std::os::fd::AsRawFd::as_raw_fd(&endpoint.as_fd()),
                &notice,
            );
            self.poller.unregister(endpoint.as_fd());
            endpoint.disconnect_cleanup();
        }
    }
}
