//! The per-connection state machine (§4.5): accepted by the server runtime, carried
//! through a handshake, then driven read-by-read until the peer disconnects.
//!
//! `EndpointState::Listening` exists only to mirror the spec's four-state machine; a
//! [`ClientEndpoint`] is never constructed before a connection is already accepted, so it
//! moves straight to `Handshaking` and the `Listening` variant is never actually observed.

use {
    crate::{
        envelope::{
            BasicTask, Envelope, HANDSHAKE_CRYPTO_PROVIDER, HANDSHAKE_KEY_STORAGE_PROVIDER,
            HANDSHAKE_X509_PROVIDER, ProxyId,
        },
        error::{CryptoRpcError, EndpointError, RpcError, StateError},
        keystore::{KeyStorageProvider, skeleton::KeyStorageSkeleton},
        object::ObjectRegistry,
        providers::{CryptoProviderFactory, X509Provider},
        skeleton::{DispatchContext, SkeletonRegistry, encode_response},
        trans::{self, PeerCredentials},
        wire::Reader,
    },
    std::{
        any::Any,
        cell::Cell,
        os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
        rc::Rc,
    },
};

#[cfg(test)]
mod tests;

/// §4.5's four states. A connection begins `Handshaking` and ends `Closing`; normal
/// traffic is processed entirely in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Listening,
    Handshaking,
    Ready,
    Closing,
}

/// The daemon-wide collaborators every endpoint dispatches against (§4.6). The key
/// storage provider is the one genuinely shared, lock-protected resource (§4.7); the
/// crypto-provider factory and the X.509 provider are read-only for the life of the
/// server.
pub struct SharedProviders {
    pub key_storage: Rc<KeyStorageProvider>,
    pub crypto_providers: Rc<dyn CryptoProviderFactory>,
    pub x509_provider: Option<Rc<dyn X509Provider>>,
    /// The sole user id permitted to call `registerCaCertificate` (§4.3, §6
    /// `X.509.access.caConnectorId`). `None` if the daemon configuration left it unset,
    /// in which case the operation is unreachable for every caller.
    pub x509_ca_connector_id: Option<u32>,
    /// The sole user id permitted to call `registerTrustAnchor` (§4.3, §6
    /// `X.509.access.trustmasterId`).
    pub x509_trustmaster_id: Option<u32>,
}

/// One accepted connection: its transport, its object/skeleton registries, and its
/// cached peer credentials (§4.5 "Peer credentials").
pub struct ClientEndpoint {
    socket: OwnedFd,
    peer: PeerCredentials,
    state: Cell<EndpointState>,
    objects: ObjectRegistry,
    skeletons: SkeletonRegistry,
    providers: Rc<SharedProviders>,
}

impl ClientEndpoint {
    pub fn new(socket: OwnedFd, providers: Rc<SharedProviders>) -> Result<Self, EndpointError> {
        let peer = trans::peer_credentials(socket.as_raw_fd())
            .map_err(|e| EndpointError::Trans(crate::error::TransError::ReadFromSocket(e)))?;
        Ok(Self {
            socket,
            peer,
            state: Cell::new(EndpointState::Handshaking),
            objects: ObjectRegistry::default(),
            skeletons: SkeletonRegistry::default(),
            providers,
        })
    }

    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }

    fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn peer(&self) -> PeerCredentials {
        self.peer
    }

    pub fn state(&self) -> EndpointState {
        self.state.get()
    }

    pub fn is_closing(&self) -> bool {
        self.state.get() == EndpointState::Closing
    }

    /// Reads and dispatches exactly one envelope. Called by the server runtime when
    /// `as_fd()` is readable (§4.6). Transitions to `Closing` and returns without error on
    /// a clean peer disconnect; a malformed envelope never tears down the connection, it
    /// is answered with an error response like any other bad call.
    pub fn service_one_message(&self) -> Result<(), EndpointError> {
        let Some(body) = trans::recv_message(self.fd())? else {
            self.state.set(EndpointState::Closing);
            return Ok(());
        };
        let env = match Envelope::decode(&body) {
            Ok(env) => env,
            Err(_) => {
                self.respond(encode_response(Err(RpcError::InvalidArgument.into())));
                return Ok(());
            }
        };
        match env.basic_task {
            BasicTask::Handshake => self.handle_handshake(env),
            BasicTask::MethodCall => self.handle_method_call(env),
            BasicTask::Destroy => self.handle_destroy(env),
            BasicTask::Response => {
                self.respond(encode_response(Err(RpcError::UnknownTask.into())));
            }
        }
        Ok(())
    }

    fn respond(&self, body: Vec<u8>) {
        let _ = trans::send_message(self.fd(), &body);
    }

    fn handle_handshake(&self, env: Envelope) {
        if self.state.get() != EndpointState::Handshaking {
            self.respond(encode_response(Err(StateError::InvalidUsageOrder.into())));
            return;
        }
        let Some(&bind_id) = env.new_proxy_ids.first() else {
            self.respond(encode_response(Err(RpcError::InvalidArgument.into())));
            return;
        };
        match self.bind_provider(env.detail_task, &env.body, bind_id) {
            Ok(()) => {
                self.state.set(EndpointState::Ready);
                self.respond(encode_response(Ok(crate::skeleton::MethodOutcome::SkeletonCreated)));
            }
            Err(e) => self.respond(encode_response(Err(e))),
        }
    }

    fn bind_provider(&self, detail_task: u32, body: &[u8], bind_id: ProxyId) -> Result<(), CryptoRpcError> {
        let mut r = Reader::new(body);
        match detail_task {
            HANDSHAKE_CRYPTO_PROVIDER => {
                let provider_uuid = read_u128(&mut r)?;
                let provider = self
                    .providers
                    .crypto_providers
                    .resolve(provider_uuid)
                    .ok_or(RpcError::UnknownObjectIdentifier)?;
                let any: Rc<dyn Any> = provider.clone();
                self.objects.register_borrowed(bind_id, &any);
                self.skeletons.register(bind_id, crate::providers::CryptoProviderSkeleton::new(provider));
                Ok(())
            }
            HANDSHAKE_KEY_STORAGE_PROVIDER => {
                let provider = self.providers.key_storage.clone();
                let any: Rc<dyn Any> = provider.clone();
                self.objects.register_borrowed(bind_id, &any);
                self.skeletons.register(bind_id, KeyStorageSkeleton::new(provider));
                Ok(())
            }
            HANDSHAKE_X509_PROVIDER => {
                let provider = self
                    .providers
                    .x509_provider
                    .clone()
                    .ok_or(RpcError::UnknownObjectIdentifier)?;
                let any: Rc<dyn Any> = provider.clone();
                self.objects.register_borrowed(bind_id, &any);
                self.skeletons.register(
                    bind_id,
                    crate::providers::X509ProviderSkeleton::new(
                        provider,
                        self.providers.x509_ca_connector_id,
                        self.providers.x509_trustmaster_id,
                    ),
                );
                Ok(())
            }
            _ => Err(RpcError::UnknownTask.into()),
        }
    }

    fn handle_method_call(&self, env: Envelope) {
        if self.state.get() != EndpointState::Ready {
            self.respond(encode_response(Err(StateError::InvalidUsageOrder.into())));
            return;
        }
        let Some(skeleton) = self.skeletons.lookup(env.target) else {
            self.respond(encode_response(Err(RpcError::UnknownObjectIdentifier.into())));
            return;
        };
        let ctx = DispatchContext {
            caller_uid: self.peer.uid,
            caller_pid: self.peer.pid,
            objects: &self.objects,
            skeletons: &self.skeletons,
            new_proxy_ids: &env.new_proxy_ids,
        };
        let mut r = Reader::new(&env.body);
        let result = skeleton.process_message(env.detail_task, &mut r, &ctx);
        self.respond(encode_response(result));
    }

    /// A destroy message is fire-and-forget (§4.4): the client never waits for an
    /// acknowledgement, so none is sent.
    fn handle_destroy(&self, env: Envelope) {
        self.objects.unregister(env.target);
        self.skeletons.unregister(env.target);
    }

    /// Releases everything this endpoint held and rolls back any transaction its caller
    /// left open (§5 "Disconnect semantics"). Called by the server runtime once it has
    /// observed `Closing`, before the endpoint itself is dropped.
    pub fn disconnect_cleanup(&self) {
        for txn in self.providers.key_storage.transactions_owned_by(self.peer.uid) {
            let _ = self.providers.key_storage.rollback_transaction(txn);
        }
        drop(self.objects.clear_owned());
    }
}

fn read_u128(r: &mut Reader) -> Result<u128, CryptoRpcError> {
    let hi = r.read_u64().map_err(|_| RpcError::InvalidArgument)?;
    let lo = r.read_u64().map_err(|_| RpcError::InvalidArgument)?;
    Ok(((hi as u128) << 64) | lo as u128)
}
