//! Server-side method dispatch (§4.3).
//!
//! A [`Skeleton`] is the adapter between one [`ProxyId`] and the real implementation
//! object behind it: it holds a reference to the implementation and answers
//! [`Skeleton::process_message`] for every detail-task opcode its interface defines.
//! Per §9's redesign flag this is a runtime table keyed on the opcode rather than a
//! compile-time template-argument unrolling — concretely, a `match` over `u32` inside
//! each concrete skeleton, which is the runtime equivalent of a method table built at
//! registration time: adding an operation means adding a match arm, not instantiating a
//! new template.

use {
    crate::{
        envelope::ProxyId,
        error::{AccessViolation, CryptoRpcError, RpcError},
        object::ObjectRegistry,
        wire::{Reader, Writer},
    },
    std::rc::Rc,
};

/// Per-call context threaded through dispatch: the caller's effective user id (from
/// peer credentials, §4.5) and the object registry the call's object lives in. Built
/// fresh for every [`Skeleton::process_message`] invocation — "record `caller_uid` as
/// the current effective user id for this call" (§4.3 step 2) is satisfied by
/// construction rather than by mutating shared state.
pub struct DispatchContext<'a> {
    pub caller_uid: u32,
    pub caller_pid: u32,
    pub objects: &'a ObjectRegistry,
    /// Where a skeleton built for a freshly created out-object (§4.3 step 5) must be
    /// registered so later calls against its pre-allocated id can be dispatched.
    pub skeletons: &'a SkeletonRegistry,
    /// Proxy ids the client pre-allocated for any out-objects this call may create,
    /// in order (§3 "Envelope").
    pub new_proxy_ids: &'a [ProxyId],
}

/// The result of successfully invoking one method (§4.3 step 5).
pub enum MethodOutcome {
    /// A primitive/by-value return (or none, for `void`): already wire-encoded.
    Value(Vec<u8>),
    /// The implementation returned an `Identifiable`; it has already been registered
    /// under `new_proxy_ids[0]` by the handler and a skeleton built for it. The
    /// response carries only the "skeleton-created" tag — the id is the one the client
    /// already holds.
    SkeletonCreated,
}

/// One of the two shapes a response envelope's body can take.
enum ResponseBody {
    Ok(MethodOutcome),
    Err(CryptoRpcError),
}

const RESP_OK: u8 = 0;
const RESP_ERR: u8 = 1;
const RESP_SHUTDOWN: u8 = 2;
const OUTCOME_VALUE: u8 = 0;
const OUTCOME_SKELETON_CREATED: u8 = 1;

/// Encodes the unsolicited "server is going away" notice sent to every endpoint during
/// a clean shutdown (§4.6 "best-effort notify each endpoint"). Carries no target id:
/// the client reads it off the wire the same way it reads a response, but the
/// connection closing right behind it is what actually drives client-side teardown.
pub fn encode_shutdown_notice() -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u8(RESP_SHUTDOWN);
    w.into_bytes()
}

/// Encodes a response body (§4.3 "Error responses are structurally identical to value
/// responses but carry an error kind in place of the value").
pub fn encode_response(result: Result<MethodOutcome, CryptoRpcError>) -> Vec<u8> {
    let body = match result {
        Ok(o) => ResponseBody::Ok(o),
        Err(e) => ResponseBody::Err(e),
    };
    let mut w = Writer::new();
    match body {
        ResponseBody::Ok(MethodOutcome::Value(bytes)) => {
            w.write_u8(RESP_OK);
            w.write_u8(OUTCOME_VALUE);
            w.write_bytes(&bytes);
        }
        ResponseBody::Ok(MethodOutcome::SkeletonCreated) => {
            w.write_u8(RESP_OK);
            w.write_u8(OUTCOME_SKELETON_CREATED);
        }
        ResponseBody::Err(e) => {
            w.write_u8(RESP_ERR);
            w.write_u32(e.wire_code());
        }
    }
    w.into_bytes()
}

/// The client-side counterpart of [`encode_response`]: either the raw value bytes
/// (possibly empty, for a skeleton-created or void response — the caller decides how
/// to interpret that based on what it expected back) or a lifted error.
pub enum DecodedResponse {
    Value(Vec<u8>),
    SkeletonCreated,
    /// The server is shutting down; no further calls will be answered (§4.6).
    ServerClosing,
}

pub fn decode_response(body: &[u8]) -> Result<DecodedResponse, CryptoRpcError> {
    let mut r = Reader::new(body);
    let tag = r
        .read_u8()
        .map_err(|_| CryptoRpcError::Rpc(RpcError::InvalidArgument))?;
    match tag {
        RESP_OK => {
            let outcome = r
                .read_u8()
                .map_err(|_| CryptoRpcError::Rpc(RpcError::InvalidArgument))?;
            match outcome {
                OUTCOME_VALUE => {
                    let bytes = r
                        .read_bytes()
                        .map_err(|_| CryptoRpcError::Rpc(RpcError::InvalidArgument))?;
                    Ok(DecodedResponse::Value(bytes))
                }
                OUTCOME_SKELETON_CREATED => Ok(DecodedResponse::SkeletonCreated),
                _ => Err(CryptoRpcError::Rpc(RpcError::InvalidArgument)),
            }
        }
        RESP_ERR => {
            let code = r
                .read_u32()
                .map_err(|_| CryptoRpcError::Rpc(RpcError::InvalidArgument))?;
            Err(CryptoRpcError::from_wire_code(code))
        }
        RESP_SHUTDOWN => Ok(DecodedResponse::ServerClosing),
        _ => Err(CryptoRpcError::Rpc(RpcError::InvalidArgument)),
    }
}

/// Implemented by every server-side skeleton adapter.
pub trait Skeleton {
    /// Dispatches one method call (§4.3 `ProcessMessage` steps 2-6: the envelope
    /// prefix itself — basic/detail task, target id, new-proxy-id list — has already
    /// been parsed by the endpoint, §4.5).
    fn process_message(
        &self,
        detail_task: u32,
        args: &mut Reader,
        ctx: &DispatchContext<'_>,
    ) -> Result<MethodOutcome, CryptoRpcError>;
}

/// Per-endpoint map from [`ProxyId`] to the skeleton dispatching calls against it. Kept
/// separate from [`ObjectRegistry`] (§4.2) because a `ProxyId` maps to at most one
/// skeleton *and* at most one implementation (§3 invariant 1) but those are two
/// different values — the skeleton is the dispatch adapter, the registry entry is the
/// implementation object the skeleton was built around.
#[derive(Default)]
pub struct SkeletonRegistry {
    entries: std::cell::RefCell<std::collections::HashMap<u64, Rc<dyn Skeleton>>>,
}

impl SkeletonRegistry {
    pub fn register(&self, id: ProxyId, skeleton: Rc<dyn Skeleton>) {
        self.entries.borrow_mut().insert(id.0, skeleton);
    }

    pub fn lookup(&self, id: ProxyId) -> Option<Rc<dyn Skeleton>> {
        self.entries.borrow().get(&id.0).cloned()
    }

    pub fn unregister(&self, id: ProxyId) {
        self.entries.borrow_mut().remove(&id.0);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// Checks a restricted method's caller against a single allowed user id (§4.3
/// "Restricted methods", used for privileged X.509 provisioning operations). On
/// mismatch the implementation must never be invoked — callers should check this
/// before doing any other work.
pub fn require_caller(ctx: &DispatchContext<'_>, allowed_uid: u32) -> Result<(), CryptoRpcError> {
    if ctx.caller_uid == allowed_uid {
        Ok(())
    } else {
        Err(AccessViolation.into())
    }
}
