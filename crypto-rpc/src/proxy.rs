//! Client-side proxy base (§4.4): the machinery every generated proxy type builds on —
//! new-id allocation, synchronous call/wait, and best-effort destroy-on-drop.

use {
    crate::{
        envelope::{
            BasicTask, Envelope, HANDSHAKE_CRYPTO_PROVIDER, HANDSHAKE_KEY_STORAGE_PROVIDER,
            HANDSHAKE_X509_PROVIDER, ProxyId,
        },
        error::{CryptoRpcError, RpcError},
        skeleton::{DecodedResponse, decode_response},
        trans,
        utils::free_list::FreeList,
        wire::Writer,
    },
    std::{
        os::fd::{AsRawFd, OwnedFd, RawFd},
        rc::Rc,
    },
};

/// Allocates [`ProxyId`]s for one client session out of a 32-bit bitmap space, the same
/// allocator shape the template crate uses for its own object ids. Ids handed out here are
/// never released back to the list: `ProxyId` is documented (§3) as "never reused within
/// one session", so `FreeList::release` is simply not called — `acquire` alone degenerates
/// to a monotonically increasing counter, which is exactly the semantics wanted.
#[derive(Default)]
pub struct ProxyIdAllocator {
    ids: FreeList<ProxyId, 3>,
}

impl ProxyIdAllocator {
    pub fn alloc(&self) -> ProxyId {
        self.ids.acquire()
    }
}

/// One client-side connection to the daemon: the raw transport plus the id allocator every
/// proxy constructed against it shares.
pub struct Connection {
    socket: OwnedFd,
    ids: ProxyIdAllocator,
}

impl Connection {
    pub fn new(socket: OwnedFd) -> Rc<Self> {
        Rc::new(Self {
            socket,
            ids: ProxyIdAllocator::default(),
        })
    }

    pub fn alloc_id(&self) -> ProxyId {
        self.ids.alloc()
    }

    fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Issues the handshake call that binds a client-chosen [`ProxyId`] to a named
    /// crypto provider (§4.5), identified by its 128-bit UUID.
    pub fn handshake_crypto_provider(
        &self,
        provider_uuid: u128,
        bind_id: ProxyId,
    ) -> Result<DecodedResponse, CryptoRpcError> {
        let mut body = Writer::new();
        body.write_u64((provider_uuid >> 64) as u64);
        body.write_u64(provider_uuid as u64);
        self.handshake_raw(HANDSHAKE_CRYPTO_PROVIDER, body.into_bytes(), bind_id)
    }

    /// Binds `bind_id` to the daemon's key storage provider (§4.5, §4.7).
    pub fn handshake_key_storage(&self, bind_id: ProxyId) -> Result<DecodedResponse, CryptoRpcError> {
        self.handshake_raw(HANDSHAKE_KEY_STORAGE_PROVIDER, Vec::new(), bind_id)
    }

    /// Binds `bind_id` to the daemon's X.509 provider, if one is configured (§4.5, §4.10).
    pub fn handshake_x509(&self, bind_id: ProxyId) -> Result<DecodedResponse, CryptoRpcError> {
        self.handshake_raw(HANDSHAKE_X509_PROVIDER, Vec::new(), bind_id)
    }

    fn handshake_raw(
        &self,
        detail_task: u32,
        body: Vec<u8>,
        bind_id: ProxyId,
    ) -> Result<DecodedResponse, CryptoRpcError> {
        let env = Envelope {
            basic_task: BasicTask::Handshake,
            detail_task,
            target: ProxyId::HANDSHAKE,
            new_proxy_ids: vec![bind_id],
            body,
        };
        self.call_raw(env)
    }

    /// Synchronous call/wait (§4.4): serialize a method call, send it, block for the
    /// matching response, and decode it. Request/response pairs on one connection are
    /// strictly ordered (§5), so there is no need to match responses by a session id —
    /// the next message read off the wire is always the answer to the call just sent.
    pub fn call(
        &self,
        target: ProxyId,
        detail_task: u32,
        new_proxy_ids: Vec<ProxyId>,
        args: Vec<u8>,
    ) -> Result<DecodedResponse, CryptoRpcError> {
        let env = Envelope {
            basic_task: BasicTask::MethodCall,
            detail_task,
            target,
            new_proxy_ids,
            body: args,
        };
        self.call_raw(env)
    }

    fn call_raw(&self, env: Envelope) -> Result<DecodedResponse, CryptoRpcError> {
        trans::send_message(self.fd(), &env.encode()).map_err(|_| RpcError::RuntimeFault)?;
        let body = trans::recv_message(self.fd())
            .map_err(|_| RpcError::RuntimeFault)?
            .ok_or(RpcError::RuntimeFault)?;
        decode_response(&body)
    }

    /// Best-effort destroy notification (§4.4): releases a proxy id server-side. Must
    /// never block or fail the caller on a broken connection — by the time a proxy drops,
    /// there is nothing left to do about a transport error except ignore it.
    pub fn destroy(&self, id: ProxyId) {
        let env = Envelope {
            basic_task: BasicTask::Destroy,
            detail_task: 0,
            target: id,
            new_proxy_ids: Vec::new(),
            body: Vec::new(),
        };
        let _ = trans::send_message(self.fd(), &env.encode());
    }
}

/// Embedded in every generated client-side proxy type: its [`ProxyId`], the shared
/// connection, and best-effort destroy-on-drop (§4.4).
pub struct ProxyBase {
    id: ProxyId,
    connection: Rc<Connection>,
}

impl ProxyBase {
    pub fn new(connection: Rc<Connection>, id: ProxyId) -> Self {
        Self { id, connection }
    }

    pub fn id(&self) -> ProxyId {
        self.id
    }

    pub fn alloc_id(&self) -> ProxyId {
        self.connection.alloc_id()
    }

    pub fn call(
        &self,
        detail_task: u32,
        new_proxy_ids: Vec<ProxyId>,
        args: Vec<u8>,
    ) -> Result<DecodedResponse, CryptoRpcError> {
        self.connection.call(self.id, detail_task, new_proxy_ids, args)
    }
}

impl Drop for ProxyBase {
    fn drop(&mut self) {
        self.connection.destroy(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_hands_out_increasing_ids_without_reuse() {
        let alloc = ProxyIdAllocator::default();
        let a = alloc.alloc();
        let b = alloc.alloc();
        let c = alloc.alloc();
        assert_eq!(a, ProxyId(0));
        assert_eq!(b, ProxyId(1));
        assert_eq!(c, ProxyId(2));
    }
}
