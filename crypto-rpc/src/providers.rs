//! Pluggable collaborators the core runtime invokes but never implements (§1: the actual
//! cryptographic primitives and the X.509 verification engine are deliberately out of
//! scope). The daemon binary wires a concrete implementation of each trait in at startup;
//! hot-plugging a replacement afterwards is explicitly not supported (§1 Non-goals) so
//! these are plain `Rc<dyn Trait>` handles fixed for the life of the server, not a
//! swappable holder.

use {
    crate::{
        envelope::ProxyId,
        error::{AccessViolation, CryptoRpcError, RpcError},
        keystore::TrustedContainer,
        proxy::{Connection, ProxyBase},
        skeleton::{DecodedResponse, DispatchContext, MethodOutcome, Skeleton, require_caller},
        wire::{Reader, Writer},
    },
    std::{any::Any, rc::Rc},
};

/// One named cryptographic provider a client binds to via handshake (§4.5). The core only
/// needs enough of a provider to identify it and answer a version query for the
/// handshake/`getProviderVersion` scenario (§8); everything else a provider actually does
/// — signing, key derivation, whatever primitive it wraps — is opaque here. `Any` is a
/// supertrait so a resolved provider can be registered directly in an endpoint's
/// [`crate::object::ObjectRegistry`] as a borrowed `Identifiable`.
pub trait CryptoProvider: Any {
    /// The provider's own identity, independent of which slot or key it is currently
    /// operating on.
    fn uuid(&self) -> u128;
    /// Monotonically increasing across releases of the same provider; exposed verbatim
    /// to clients via `getProviderVersion`. Packed major/minor/patch/revision in the
    /// upper 32 bits, build timestamp in the lower 32 (§8 "Handshake + primitive call":
    /// `0x00010002_C0DEC0DE` = major 1, minor 0, patch 2, revision 0, build-ts
    /// `0xC0DEC0DE`).
    fn version(&self) -> u64;
}

/// Resolves a provider UUID named in a handshake to a live [`CryptoProvider`]. Supplied by
/// the daemon at startup; the core runtime never constructs a provider itself, only
/// dispatches to whatever this returns.
pub trait CryptoProviderFactory {
    fn resolve(&self, provider_uuid: u128) -> Option<Rc<dyn CryptoProvider>>;
}

/// The X.509 collaborator named in the daemon configuration
/// (`X.509.access.caConnectorId`/`trustmasterId`, §4.10, §6). Beyond its own identity it
/// exposes the two provisioning operations a CA connector and a trustmaster are allowed
/// to invoke; [`X509ProviderSkeleton`] is what actually restricts who may call them.
pub trait X509Provider: Any {
    fn uuid(&self) -> u128;

    /// Issues a CA certificate over `key_payload` (the current content of the slot named
    /// by the call's object-reference argument) and records `der`. Returns an opaque
    /// handle the provider uses to refer to the registered certificate afterwards.
    /// Restricted to `X.509.access.caConnectorId` (§4.3, §6).
    fn register_ca_certificate(&self, key_payload: &[u8], der: &[u8]) -> Result<u64, CryptoRpcError>;

    /// Registers `der` as a trust anchor. Restricted to `X.509.access.trustmasterId`
    /// (§4.3, §6).
    fn register_trust_anchor(&self, der: &[u8]) -> Result<u64, CryptoRpcError>;
}

const GET_PROVIDER_VERSION: u32 = 0;

/// The skeleton bound to a handshake `ProxyId` naming a crypto provider (§8 "Handshake +
/// primitive call"). The only operation this core ships a dispatch table entry for is the
/// version query; everything else the provider does is opaque (§1).
pub struct CryptoProviderSkeleton {
    provider: Rc<dyn CryptoProvider>,
}

impl CryptoProviderSkeleton {
    pub fn new(provider: Rc<dyn CryptoProvider>) -> Rc<Self> {
        Rc::new(Self { provider })
    }
}

impl Skeleton for CryptoProviderSkeleton {
    fn process_message(
        &self,
        detail_task: u32,
        _args: &mut Reader,
        _ctx: &DispatchContext<'_>,
    ) -> Result<MethodOutcome, CryptoRpcError> {
        match detail_task {
            GET_PROVIDER_VERSION => {
                let mut w = Writer::new();
                w.write_u64(self.provider.version());
                Ok(MethodOutcome::Value(w.into_bytes()))
            }
            _ => Err(RpcError::UnknownTask.into()),
        }
    }
}

/// Client-side handle to a crypto provider bound during handshake (§4.4, §4.5).
pub struct CryptoProviderProxy {
    base: ProxyBase,
}

impl CryptoProviderProxy {
    /// Handshakes `provider_uuid` against `connection`, binding it to a freshly allocated
    /// id, and returns the bound proxy (§8 "Handshake + primitive call").
    pub fn handshake(connection: Rc<Connection>, provider_uuid: u128) -> Result<Self, CryptoRpcError> {
        let id = connection.alloc_id();
        match connection.handshake_crypto_provider(provider_uuid, id)? {
            DecodedResponse::SkeletonCreated => Ok(Self {
                base: ProxyBase::new(connection, id),
            }),
            DecodedResponse::Value(_) => Err(RpcError::InvalidArgument.into()),
            DecodedResponse::ServerClosing => Err(RpcError::RuntimeFault.into()),
        }
    }

    pub fn id(&self) -> ProxyId {
        self.base.id()
    }

    /// Calls `getProviderVersion` (§8: major/minor/patch/revision/build-timestamp packed
    /// into the same 32+32-bit shape the scenario's literal response uses).
    pub fn get_provider_version(&self) -> Result<u64, CryptoRpcError> {
        match self.base.call(GET_PROVIDER_VERSION, Vec::new(), Vec::new())? {
            DecodedResponse::Value(bytes) => {
                let mut r = Reader::new(&bytes);
                r.read_u64().map_err(|_| RpcError::InvalidArgument.into())
            }
            DecodedResponse::SkeletonCreated => Err(RpcError::InvalidArgument.into()),
            DecodedResponse::ServerClosing => Err(RpcError::RuntimeFault.into()),
        }
    }
}

const REGISTER_CA_CERTIFICATE: u32 = 0;
const REGISTER_TRUST_ANCHOR: u32 = 1;

/// The skeleton bound to a handshake `ProxyId` naming the X.509 provider (§4.5, §4.10).
/// Unlike [`CryptoProviderSkeleton`], every operation it dispatches is restricted (§4.3
/// "Restricted methods"): `ca_connector_id`/`trustmaster_id` come straight from the
/// daemon configuration, and a call whose caller uid doesn't match the one the relevant
/// operation is restricted to is rejected before the provider is ever invoked. A side
/// left unconfigured (`None`) answers every call gated on it with
/// [`AccessViolation`] rather than silently allowing anyone through.
pub struct X509ProviderSkeleton {
    provider: Rc<dyn X509Provider>,
    ca_connector_id: Option<u32>,
    trustmaster_id: Option<u32>,
}

impl X509ProviderSkeleton {
    pub fn new(provider: Rc<dyn X509Provider>, ca_connector_id: Option<u32>, trustmaster_id: Option<u32>) -> Rc<Self> {
        Rc::new(Self {
            provider,
            ca_connector_id,
            trustmaster_id,
        })
    }
}

impl Skeleton for X509ProviderSkeleton {
    fn process_message(
        &self,
        detail_task: u32,
        args: &mut Reader,
        ctx: &DispatchContext<'_>,
    ) -> Result<MethodOutcome, CryptoRpcError> {
        match detail_task {
            REGISTER_CA_CERTIFICATE => {
                let allowed_uid = self.ca_connector_id.ok_or(AccessViolation)?;
                require_caller(ctx, allowed_uid)?;
                let key_container_id = ProxyId(args.read_object_id().map_err(|_| RpcError::InvalidArgument)?);
                let container = ctx.objects.narrow::<TrustedContainer>(key_container_id)?;
                let der = args.read_bytes().map_err(|_| RpcError::InvalidArgument)?;
                let handle = self.provider.register_ca_certificate(&container.payload(), &der)?;
                let mut w = Writer::new();
                w.write_u64(handle);
                Ok(MethodOutcome::Value(w.into_bytes()))
            }
            REGISTER_TRUST_ANCHOR => {
                let allowed_uid = self.trustmaster_id.ok_or(AccessViolation)?;
                require_caller(ctx, allowed_uid)?;
                let der = args.read_bytes().map_err(|_| RpcError::InvalidArgument)?;
                let handle = self.provider.register_trust_anchor(&der)?;
                let mut w = Writer::new();
                w.write_u64(handle);
                Ok(MethodOutcome::Value(w.into_bytes()))
            }
            _ => Err(RpcError::UnknownTask.into()),
        }
    }
}

/// Client-side handle to the X.509 provider bound during handshake (§4.4, §4.5). Calling
/// either method as a uid other than the one the daemon configured for that role fails
/// with an access violation returned from the server, not a local check.
pub struct X509ProviderProxy {
    base: ProxyBase,
}

impl X509ProviderProxy {
    pub fn handshake(connection: Rc<Connection>) -> Result<Self, CryptoRpcError> {
        let id = connection.alloc_id();
        match connection.handshake_x509(id)? {
            DecodedResponse::SkeletonCreated => Ok(Self {
                base: ProxyBase::new(connection, id),
            }),
            DecodedResponse::Value(_) => Err(RpcError::InvalidArgument.into()),
            DecodedResponse::ServerClosing => Err(RpcError::RuntimeFault.into()),
        }
    }

    pub fn id(&self) -> ProxyId {
        self.base.id()
    }

    /// Issues a CA certificate for the key held by `key_container` (an already-opened
    /// owner container on the slot being certified) and records `der`.
    pub fn register_ca_certificate(&self, key_container: ProxyId, der: &[u8]) -> Result<u64, CryptoRpcError> {
        let mut args = Writer::new();
        args.write_object_id(key_container.0);
        args.write_bytes(der);
        match self.base.call(REGISTER_CA_CERTIFICATE, Vec::new(), args.into_bytes())? {
            DecodedResponse::Value(bytes) => {
                let mut r = Reader::new(&bytes);
                r.read_u64().map_err(|_| RpcError::InvalidArgument.into())
            }
            DecodedResponse::SkeletonCreated => Err(RpcError::InvalidArgument.into()),
            DecodedResponse::ServerClosing => Err(RpcError::RuntimeFault.into()),
        }
    }

    /// Registers `der` as a trust anchor.
    pub fn register_trust_anchor(&self, der: &[u8]) -> Result<u64, CryptoRpcError> {
        let mut args = Writer::new();
        args.write_bytes(der);
        match self.base.call(REGISTER_TRUST_ANCHOR, Vec::new(), args.into_bytes())? {
            DecodedResponse::Value(bytes) => {
                let mut r = Reader::new(&bytes);
                r.read_u64().map_err(|_| RpcError::InvalidArgument.into())
            }
            DecodedResponse::SkeletonCreated => Err(RpcError::InvalidArgument.into()),
            DecodedResponse::ServerClosing => Err(RpcError::RuntimeFault.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider(u128, u64);

    impl CryptoProvider for StubProvider {
        fn uuid(&self) -> u128 {
            self.0
        }

        fn version(&self) -> u64 {
            self.1
        }
    }

    struct StubFactory(Vec<Rc<dyn CryptoProvider>>);

    impl CryptoProviderFactory for StubFactory {
        fn resolve(&self, provider_uuid: u128) -> Option<Rc<dyn CryptoProvider>> {
            self.0.iter().find(|p| p.uuid() == provider_uuid).cloned()
        }
    }

    #[test]
    fn factory_resolves_registered_provider_by_uuid() {
        let provider: Rc<dyn CryptoProvider> = Rc::new(StubProvider(7, 3));
        let factory = StubFactory(vec![provider]);
        let resolved = factory.resolve(7).unwrap();
        assert_eq!(resolved.version(), 3);
        assert!(factory.resolve(8).is_none());
    }
}
