//! The task/envelope model that every RPC message on the wire is shaped as.

use crate::{
    error::ShapeError,
    wire::{Reader, Writer},
};

/// Opaque handle to a remote object, allocated by the client for every object it expects
/// to send or receive. Stable for the lifetime of the handle; never reused within one
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProxyId(pub u64);

impl ProxyId {
    /// The distinguished identifier target of a handshake message, which has no
    /// pre-existing object to address.
    pub const HANDSHAKE: ProxyId = ProxyId(0);
}

/// Lets the client-side id allocator (`proxy.rs`) draw values out of a 32-bit
/// [`crate::utils::free_list::FreeList`] and widen them into the 64-bit identifier space
/// this type actually occupies on the wire.
impl From<u32> for ProxyId {
    fn from(v: u32) -> Self {
        ProxyId(v as u64)
    }
}

/// `Handshake` envelope detail-task opcodes: which top-level provider the client is
/// binding its pre-allocated [`ProxyId`] to (§4.5, §6 "Daemon configuration"). Shared
/// between the client-side [`crate::proxy::Connection`] and the server-side
/// [`crate::endpoint::ClientEndpoint`] since both sides must agree on the same numbering
/// independent of either one's internals.
pub const HANDSHAKE_CRYPTO_PROVIDER: u32 = 0;
pub const HANDSHAKE_KEY_STORAGE_PROVIDER: u32 = 1;
pub const HANDSHAKE_X509_PROVIDER: u32 = 2;

/// The coarse classification of a message, parsed before anything interface-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BasicTask {
    /// Registers a client-chosen [`ProxyId`] against a named top-level provider
    /// (crypto provider, key storage provider, X.509 provider).
    Handshake = 0,
    /// A normal method call against an existing object; the detail task further
    /// identifies which operation of the object's interface is being invoked.
    MethodCall = 1,
    /// Releases a [`ProxyId`] and the server-side skeleton/implementation behind it.
    Destroy = 2,
    /// The server's response to a prior `Handshake`, `MethodCall`, or `Destroy`.
    Response = 3,
}

impl BasicTask {
    fn from_u8(v: u8) -> Result<Self, ShapeError> {
        Ok(match v {
            0 => BasicTask::Handshake,
            1 => BasicTask::MethodCall,
            2 => BasicTask::Destroy,
            3 => BasicTask::Response,
            _ => return Err(ShapeError::UnsupportedFormat),
        })
    }
}

/// Every request and response on the wire shares this shape: a coarse task, an optional
/// detail task opcode (meaningful only for `MethodCall`), the object the message targets,
/// the list of proxy ids the client pre-allocated for any out-objects the call may
/// create, and the raw, not-yet-interpreted argument bytes.
pub struct Envelope {
    pub basic_task: BasicTask,
    pub detail_task: u32,
    pub target: ProxyId,
    pub new_proxy_ids: Vec<ProxyId>,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u8(self.basic_task as u8);
        w.write_u32(self.detail_task);
        w.write_u64(self.target.0);
        crate::wire::write_seq(&mut w, &self.new_proxy_ids, |w, id| w.write_u64(id.0));
        w.write_bytes(&self.body);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ShapeError> {
        let mut r = Reader::new(buf);
        let basic_task = BasicTask::from_u8(r.read_u8()?)?;
        let detail_task = r.read_u32()?;
        let target = ProxyId(r.read_u64()?);
        let new_proxy_ids = r.read_seq(|r| Ok(ProxyId(r.read_u64()?)))?;
        let body = r.read_bytes()?;
        Ok(Self {
            basic_task,
            detail_task,
            target,
            new_proxy_ids,
            body,
        })
    }
}
