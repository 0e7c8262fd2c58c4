//! The error taxonomy shared by the wire codec, object registry, skeleton dispatch,
//! and key storage provider.
//!
//! Every fallible operation in this crate returns one of the narrow enums below rather
//! than a string or `anyhow`-style opaque error: a caller across the RPC boundary needs
//! the discriminant, not a message, to decide how to react.

use thiserror::Error;

/// Failures that originate in argument shape, capacity, or identifier resolution.
#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("the buffer does not have enough remaining capacity for this value")]
    InsufficientCapacity,
    #[error("the declared size {0} is not a valid size for this value")]
    InvalidInputSize(u32),
    #[error("argument value is out of the range accepted by this operation")]
    InvalidArgument,
    #[error("the encoded value does not have a recognized tag or shape")]
    UnsupportedFormat,
    #[error("no object is registered under identifier {0}")]
    UnknownIdentifier(u64),
    #[error("the object does not implement the capability required by this call")]
    IncompatibleObject,
    #[error("the arguments do not match the shape expected by this operation")]
    IncompatibleArguments,
    #[error("the input and output buffers of a combined call overlap")]
    InOutBuffersIntersect,
    #[error("a value exceeds the boundary permitted by this operation")]
    AboveBoundary,
    #[error("the operation produced or received an unexpected value")]
    UnexpectedValue,
    #[error("the container this operation targets is empty")]
    EmptyContainer,
    #[error("required argument state is incomplete")]
    IncompleteArgState,
}

/// Failures related to capacity and ownership of server-side resources.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("allocation of a new resource failed")]
    BadAlloc,
    #[error("the resource is already exclusively held")]
    BusyResource,
    #[error("the requested reserved resource does not exist")]
    UnreservedResource,
    #[error("there is not enough of this resource available")]
    InsufficientResource,
    #[error("the resource is in a faulted state and cannot be used")]
    ResourceFault,
    #[error("the content violates the restrictions configured for this slot")]
    ContentRestrictions,
    #[error("an object with this content identity already occupies another slot")]
    ContentDuplication,
}

/// Failures related to object or provider lifecycle state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("the object has not been initialized")]
    UninitializedContext,
    #[error("operations were invoked in an order this object does not support")]
    InvalidUsageOrder,
    #[error("an internal invariant was violated")]
    LogicFault,
    #[error("the object reference does not refer to a live object")]
    BadObjectReference,
    #[error("the object was used in a way its current state forbids")]
    UsageViolation,
}

/// The single access-control failure kind.
#[derive(Debug, Error)]
#[error("the caller is not permitted to perform this operation")]
pub struct AccessViolation;

/// Failures in the RPC envelope/dispatch layer itself, as opposed to failures of the
/// method being dispatched.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("RPC argument is invalid")]
    InvalidArgument,
    #[error("RPC argument has an invalid declared size")]
    InvalidInputSize,
    #[error("RPC message exceeds the capacity of the receive buffer")]
    InsufficientCapacity,
    #[error("RPC envelope names a task this skeleton does not implement")]
    UnknownTask,
    #[error("RPC envelope targets an object identifier unknown to this endpoint")]
    UnknownObjectIdentifier,
    #[error("an internal fault occurred while processing this RPC call")]
    RuntimeFault,
}

/// Runtime faults that do not fit any of the categories above: capability narrowing
/// failures and unsupported operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("the object does not support the capability set requested of it")]
    RuntimeFault,
    #[error("this operation is not supported by this build")]
    Unsupported,
}

/// The unified error returned by any crypto-rpc operation that a caller across the wire
/// can observe. Each variant corresponds to exactly one of the categories from the
/// narrower enums above; grouping them here lets the codec encode a single discriminant
/// on the wire while keeping call sites able to match on the fine-grained kind via
/// `From`.
#[derive(Debug, Error)]
pub enum CryptoRpcError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Access(#[from] AccessViolation),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl CryptoRpcError {
    /// The wire discriminant for this error. Stable within one build; never promised
    /// stable across releases (matching the crate's lack of a cross-release wire
    /// compatibility guarantee).
    pub fn wire_code(&self) -> u32 {
        match self {
            CryptoRpcError::Shape(e) => {
                0x0000_0000
                    + match e {
                        ShapeError::InsufficientCapacity => 0,
                        ShapeError::InvalidInputSize(_) => 1,
                        ShapeError::InvalidArgument => 2,
                        ShapeError::UnsupportedFormat => 3,
                        ShapeError::UnknownIdentifier(_) => 4,
                        ShapeError::IncompatibleObject => 5,
                        ShapeError::IncompatibleArguments => 6,
                        ShapeError::InOutBuffersIntersect => 7,
                        ShapeError::AboveBoundary => 8,
                        ShapeError::UnexpectedValue => 9,
                        ShapeError::EmptyContainer => 10,
                        ShapeError::IncompleteArgState => 11,
                    }
            }
            CryptoRpcError::Resource(e) => {
                0x0000_1000
                    + match e {
                        ResourceError::BadAlloc => 0,
                        ResourceError::BusyResource => 1,
                        ResourceError::UnreservedResource => 2,
                        ResourceError::InsufficientResource => 3,
                        ResourceError::ResourceFault => 4,
                        ResourceError::ContentRestrictions => 5,
                        ResourceError::ContentDuplication => 6,
                    }
            }
            CryptoRpcError::State(e) => {
                0x0000_2000
                    + match e {
                        StateError::UninitializedContext => 0,
                        StateError::InvalidUsageOrder => 1,
                        StateError::LogicFault => 2,
                        StateError::BadObjectReference => 3,
                        StateError::UsageViolation => 4,
                    }
            }
            CryptoRpcError::Access(_) => 0x0000_3000,
            CryptoRpcError::Rpc(e) => {
                0x0000_4000
                    + match e {
                        RpcError::InvalidArgument => 0,
                        RpcError::InvalidInputSize => 1,
                        RpcError::InsufficientCapacity => 2,
                        RpcError::UnknownTask => 3,
                        RpcError::UnknownObjectIdentifier => 4,
                        RpcError::RuntimeFault => 5,
                    }
            }
            CryptoRpcError::Runtime(e) => {
                0x0000_5000
                    + match e {
                        RuntimeError::RuntimeFault => 0,
                        RuntimeError::Unsupported => 1,
                    }
            }
        }
    }

    /// Reconstructs an error from a wire discriminant. Unknown codes map to
    /// [`RuntimeError::RuntimeFault`] rather than panicking: a peer running a newer
    /// build may send a code this build does not know about.
    pub fn from_wire_code(code: u32) -> Self {
        let category = code & 0xffff_f000;
        let ordinal = code & 0x0fff;
        match (category, ordinal) {
            (0x0000_0000, 0) => ShapeError::InsufficientCapacity.into(),
            (0x0000_0000, 1) => ShapeError::InvalidInputSize(0).into(),
            (0x0000_0000, 2) => ShapeError::InvalidArgument.into(),
            (0x0000_0000, 3) => ShapeError::UnsupportedFormat.into(),
            (0x0000_0000, 4) => ShapeError::UnknownIdentifier(0).into(),
            (0x0000_0000, 5) => ShapeError::IncompatibleObject.into(),
            (0x0000_0000, 6) => ShapeError::IncompatibleArguments.into(),
            (0x0000_0000, 7) => ShapeError::InOutBuffersIntersect.into(),
            (0x0000_0000, 8) => ShapeError::AboveBoundary.into(),
            (0x0000_0000, 9) => ShapeError::UnexpectedValue.into(),
            (0x0000_0000, 10) => ShapeError::EmptyContainer.into(),
            (0x0000_0000, 11) => ShapeError::IncompleteArgState.into(),
            (0x0000_1000, 0) => ResourceError::BadAlloc.into(),
            (0x0000_1000, 1) => ResourceError::BusyResource.into(),
            (0x0000_1000, 2) => ResourceError::UnreservedResource.into(),
            (0x0000_1000, 3) => ResourceError::InsufficientResource.into(),
            (0x0000_1000, 4) => ResourceError::ResourceFault.into(),
            (0x0000_1000, 5) => ResourceError::ContentRestrictions.into(),
            (0x0000_1000, 6) => ResourceError::ContentDuplication.into(),
            (0x0000_2000, 0) => StateError::UninitializedContext.into(),
            (0x0000_2000, 1) => StateError::InvalidUsageOrder.into(),
            (0x0000_2000, 2) => StateError::LogicFault.into(),
            (0x0000_2000, 3) => StateError::BadObjectReference.into(),
            (0x0000_2000, 4) => StateError::UsageViolation.into(),
            (0x0000_3000, _) => AccessViolation.into(),
            (0x0000_4000, 0) => RpcError::InvalidArgument.into(),
            (0x0000_4000, 1) => RpcError::InvalidInputSize.into(),
            (0x0000_4000, 2) => RpcError::InsufficientCapacity.into(),
            (0x0000_4000, 3) => RpcError::UnknownTask.into(),
            (0x0000_4000, 4) => RpcError::UnknownObjectIdentifier.into(),
            (0x0000_4000, 5) => RpcError::RuntimeFault.into(),
            (0x0000_5000, 1) => RuntimeError::Unsupported.into(),
            _ => RuntimeError::RuntimeFault.into(),
        }
    }
}

/// Errors raised while reading or writing the transport framing.
#[derive(Debug, Error)]
pub enum TransError {
    #[error("failed to read from socket")]
    ReadFromSocket(#[source] std::io::Error),
    #[error("failed to write to socket")]
    WriteToSocket(#[source] std::io::Error),
    #[error("the connection is closed")]
    Closed,
    #[error("message has a declared length {0} < the envelope header size")]
    MessageTooSmall(u32),
    #[error("message has a declared length {0} that exceeds the maximum message size")]
    MessageTooLarge(u32),
}

/// Errors raised while accepting connections.
#[derive(Debug, Error)]
pub enum AcceptorError {
    #[error("could not create a socket")]
    CreateSocket(#[source] std::io::Error),
    #[error("could not bind to the configured address")]
    Bind(#[source] std::io::Error),
    #[error("could not listen on the socket")]
    Listen(#[source] std::io::Error),
    #[error("could not accept a connection")]
    Accept(#[source] std::io::Error),
    #[error("could not determine the peer credentials of an accepted connection")]
    PeerCredentials(#[source] std::io::Error),
}

/// Errors raised while servicing one client endpoint.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("transport error")]
    Trans(#[from] TransError),
    #[error("a message arrived before the handshake completed")]
    HandshakeRequired,
    #[error("the handshake was attempted a second time")]
    AlreadyHandshaken,
}

/// Errors raised while loading the daemon's external configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse configuration file {path} as JSON")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("configuration is invalid: {0}")]
    Validation(String),
}
