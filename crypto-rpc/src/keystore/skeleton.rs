//! Skeleton adapters dispatching RPC calls against the key-storage provider and the
//! trusted containers it hands out (§4.3, §4.7). Registered as the top-level skeleton
//! during handshake (§4.5) and, for a container, built on the fly whenever
//! `open_as_user`/`open_as_owner` returns one (§4.3 step 5, "owned smart-pointer to an
//! `Identifiable`").

use {
    super::{
        ContentProps, Couid, KeyStorageProvider, ObjectType, TransactionId, TrustedContainer,
        Uuid, UsageFlags,
    },
    crate::{
        error::{CryptoRpcError, RpcError},
        object::ObjectRegistry,
        skeleton::{DispatchContext, MethodOutcome, Skeleton},
        wire::{Reader, Writer},
    },
    std::rc::Rc,
};

const FIND_SLOT_BY_UUID: u32 = 0;
const FIND_OBJECT: u32 = 1;
const OPEN_AS_USER: u32 = 2;
const OPEN_AS_OWNER: u32 = 3;
const IS_EMPTY: u32 = 4;
const BEGIN_TRANSACTION: u32 = 5;
const COMMIT_TRANSACTION: u32 = 6;
const ROLLBACK_TRANSACTION: u32 = 7;

fn write_u128(w: &mut Writer, v: u128) {
    w.write_u64((v >> 64) as u64);
    w.write_u64(v as u64);
}

fn read_u128(r: &mut Reader) -> Result<u128, CryptoRpcError> {
    let hi = r.read_u64().map_err(|_| RpcError::InvalidArgument)?;
    let lo = r.read_u64().map_err(|_| RpcError::InvalidArgument)?;
    Ok(((hi as u128) << 64) | lo as u128)
}

fn write_object_type(w: &mut Writer, t: ObjectType) {
    w.write_u8(match t {
        ObjectType::SymmetricKey => 0,
        ObjectType::AsymmetricKeyPair => 1,
        ObjectType::AsymmetricPublicKey => 2,
        ObjectType::Certificate => 3,
        ObjectType::SessionObject => 4,
    });
}

fn read_object_type(r: &mut Reader) -> Result<ObjectType, CryptoRpcError> {
    Ok(match r.read_u8().map_err(|_| RpcError::InvalidArgument)? {
        0 => ObjectType::SymmetricKey,
        1 => ObjectType::AsymmetricKeyPair,
        2 => ObjectType::AsymmetricPublicKey,
        3 => ObjectType::Certificate,
        4 => ObjectType::SessionObject,
        _ => return Err(RpcError::InvalidArgument.into()),
    })
}

fn write_content_props(w: &mut Writer, c: &ContentProps) {
    write_u128(w, c.couid.id);
    w.write_u64(c.couid.stamp);
    write_object_type(w, c.object_type);
    w.write_u32(c.alg_id);
    w.write_u32(c.bit_length);
    w.write_u32(c.allowed_usage.0);
}

fn read_content_props(r: &mut Reader) -> Result<ContentProps, CryptoRpcError> {
    let couid_id = read_u128(r)?;
    let stamp = r.read_u64().map_err(|_| RpcError::InvalidArgument)?;
    let object_type = read_object_type(r)?;
    let alg_id = r.read_u32().map_err(|_| RpcError::InvalidArgument)?;
    let bit_length = r.read_u32().map_err(|_| RpcError::InvalidArgument)?;
    let allowed_usage = r.read_u32().map_err(|_| RpcError::InvalidArgument)?;
    Ok(ContentProps {
        couid: Couid { id: couid_id, stamp },
        object_type,
        alg_id,
        bit_length,
        allowed_usage: UsageFlags(allowed_usage),
    })
}

fn write_option_content_props(w: &mut Writer, c: Option<&ContentProps>) {
    match c {
        Some(c) => {
            w.write_u8(1);
            write_content_props(w, c);
        }
        None => w.write_u8(0),
    }
}

/// The top-level skeleton bound to a client's handshake `ProxyId` for the key-storage
/// provider interface.
pub struct KeyStorageSkeleton {
    provider: Rc<KeyStorageProvider>,
}

impl KeyStorageSkeleton {
    pub fn new(provider: Rc<KeyStorageProvider>) -> Rc<Self> {
        Rc::new(Self { provider })
    }
}

impl Skeleton for KeyStorageSkeleton {
    fn process_message(
        &self,
        detail_task: u32,
        args: &mut Reader,
        ctx: &DispatchContext<'_>,
    ) -> Result<MethodOutcome, CryptoRpcError> {
        match detail_task {
            FIND_SLOT_BY_UUID => {
                let uuid = Uuid::from_u128(read_u128(args)?);
                let mut w = Writer::new();
                match self.provider.slot_number_for_uuid(uuid) {
                    Some(n) => {
                        w.write_u8(1);
                        w.write_u32(n);
                    }
                    None => w.write_u8(0),
                }
                Ok(MethodOutcome::Value(w.into_bytes()))
            }
            FIND_OBJECT => {
                let couid_id = read_u128(args)?;
                let object_type = read_object_type(args)?;
                let provider_uuid = match args.read_u8().map_err(|_| RpcError::InvalidArgument)? {
                    1 => Some(Uuid::from_u128(read_u128(args)?)),
                    _ => None,
                };
                let after = match args.read_u8().map_err(|_| RpcError::InvalidArgument)? {
                    1 => Some(args.read_u32().map_err(|_| RpcError::InvalidArgument)?),
                    _ => None,
                };
                let found = self.provider.find_object(couid_id, object_type, provider_uuid, after);
                let mut w = Writer::new();
                match found {
                    Some(n) => {
                        w.write_u8(1);
                        w.write_u32(n);
                    }
                    None => w.write_u8(0),
                }
                Ok(MethodOutcome::Value(w.into_bytes()))
            }
            OPEN_AS_USER | OPEN_AS_OWNER => {
                let slot_number = args.read_u32().map_err(|_| RpcError::InvalidArgument)?;
                let container = if detail_task == OPEN_AS_USER {
                    self.provider.open_as_user(slot_number, ctx.caller_uid)?
                } else {
                    self.provider.open_as_owner(slot_number, ctx.caller_uid)?
                };
                let bind_id = *ctx.new_proxy_ids.first().ok_or(RpcError::InvalidArgument)?;
                let rc = Rc::new(container);
                let any: Rc<dyn std::any::Any> = rc.clone();
                ctx.objects.register_owned(bind_id, any);
                let skeleton = TrustedContainerSkeleton::new(rc);
                ctx.skeletons.register(bind_id, skeleton);
                Ok(MethodOutcome::SkeletonCreated)
            }
            IS_EMPTY => {
                let slot_number = args.read_u32().map_err(|_| RpcError::InvalidArgument)?;
                let mut w = Writer::new();
                w.write_u8(self.provider.is_empty(slot_number) as u8);
                Ok(MethodOutcome::Value(w.into_bytes()))
            }
            BEGIN_TRANSACTION => {
                let scope = args.read_seq(|r| r.read_u32()).map_err(|_| RpcError::InvalidArgument)?;
                let id = self.provider.begin_transaction(scope, ctx.caller_uid)?;
                let mut w = Writer::new();
                w.write_u64(id);
                Ok(MethodOutcome::Value(w.into_bytes()))
            }
            COMMIT_TRANSACTION => {
                let id: TransactionId = args.read_u64().map_err(|_| RpcError::InvalidArgument)?;
                self.provider.commit_transaction(id)?;
                Ok(MethodOutcome::Value(Vec::new()))
            }
            ROLLBACK_TRANSACTION => {
                let id: TransactionId = args.read_u64().map_err(|_| RpcError::InvalidArgument)?;
                self.provider.rollback_transaction(id)?;
                Ok(MethodOutcome::Value(Vec::new()))
            }
            _ => Err(RpcError::UnknownTask.into()),
        }
    }
}

const PROTOTYPE_PROPS: u32 = 0;
const CONTENT_PROPS: u32 = 1;
const PAYLOAD: u32 = 2;
const SAVE_COPY: u32 = 3;
const CLEAR: u32 = 4;
const SLOT_NUMBER: u32 = 5;
const IS_OWNER: u32 = 6;

/// The skeleton bound to a [`TrustedContainer`] handed back from `open_as_user`/
/// `open_as_owner` (§4.3 step 5, §4.7).
pub struct TrustedContainerSkeleton {
    container: Rc<TrustedContainer>,
}

impl TrustedContainerSkeleton {
    pub fn new(container: Rc<TrustedContainer>) -> Rc<Self> {
        Rc::new(Self { container })
    }
}

impl Skeleton for TrustedContainerSkeleton {
    fn process_message(
        &self,
        detail_task: u32,
        args: &mut Reader,
        _ctx: &DispatchContext<'_>,
    ) -> Result<MethodOutcome, CryptoRpcError> {
        match detail_task {
            PROTOTYPE_PROPS => {
                let proto = self.container.prototype_props();
                let mut w = Writer::new();
                write_object_type(&mut w, proto.allowed_object_type);
                crate::wire::write_seq(&mut w, &proto.allowed_algorithms, |w, v| w.write_u32(*v));
                w.write_u32(proto.capacity);
                w.write_u8(proto.exportable as u8);
                w.write_u32(proto.owner_user_id);
                crate::wire::write_seq(&mut w, &proto.allowed_user_ids, |w, v| w.write_u32(*v));
                Ok(MethodOutcome::Value(w.into_bytes()))
            }
            CONTENT_PROPS => {
                let mut w = Writer::new();
                write_option_content_props(&mut w, self.container.content_props().as_ref());
                Ok(MethodOutcome::Value(w.into_bytes()))
            }
            PAYLOAD => {
                let mut w = Writer::new();
                w.write_bytes(&self.container.payload());
                Ok(MethodOutcome::Value(w.into_bytes()))
            }
            SAVE_COPY => {
                let content = read_content_props(args)?;
                let payload = args.read_bytes().map_err(|_| RpcError::InvalidArgument)?;
                self.container.save_copy(content, payload)?;
                Ok(MethodOutcome::Value(Vec::new()))
            }
            CLEAR => {
                self.container.clear()?;
                Ok(MethodOutcome::Value(Vec::new()))
            }
            SLOT_NUMBER => {
                let mut w = Writer::new();
                w.write_u32(self.container.slot_number());
                Ok(MethodOutcome::Value(w.into_bytes()))
            }
            IS_OWNER => {
                let mut w = Writer::new();
                w.write_u8(self.container.is_owner() as u8);
                Ok(MethodOutcome::Value(w.into_bytes()))
            }
            _ => Err(RpcError::UnknownTask.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            envelope::ProxyId,
            keystore::{
                access_control::AccessControlConfig, journal::InMemoryKeyJournal,
                security_event::NoopSecurityEventReporter, PrototypeProps, Slot,
                VersionControlPolicy,
            },
            object::ObjectRegistry,
            skeleton::SkeletonRegistry,
        },
    };

    fn prototype() -> PrototypeProps {
        PrototypeProps {
            allowed_object_type: ObjectType::SymmetricKey,
            allowed_algorithms: Vec::new(),
            capacity: 64,
            exportable: true,
            version_control: VersionControlPolicy::None,
            owner_user_id: 100,
            allowed_user_ids: vec![100],
        }
    }

    fn provider() -> Rc<KeyStorageProvider> {
        let slots = vec![Slot::new(0, Uuid::from_u128(1), Uuid::from_u128(1), prototype())];
        KeyStorageProvider::new(
            slots,
            AccessControlConfig::default(),
            Box::new(NoopSecurityEventReporter),
            Box::new(InMemoryKeyJournal),
        )
    }

    #[test]
    fn open_as_owner_then_save_copy_round_trips_through_dispatch() {
        let provider = provider();
        let skeleton = KeyStorageSkeleton::new(provider);
        let objects = ObjectRegistry::default();
        let skeletons = SkeletonRegistry::default();
        let bind_id = ProxyId(10);
        let ctx = DispatchContext {
            caller_uid: 100,
            caller_pid: 1,
            objects: &objects,
            skeletons: &skeletons,
            new_proxy_ids: &[bind_id],
        };

        let mut args = Writer::new();
        args.write_u32(0);
        let mut r = Reader::new(&args.into_bytes());
        let outcome = skeleton.process_message(OPEN_AS_OWNER, &mut r, &ctx).unwrap();
        assert!(matches!(outcome, MethodOutcome::SkeletonCreated));
        assert!(objects.contains(bind_id));

        let container_skeleton = skeletons.lookup(bind_id).unwrap();
        let mut args = Writer::new();
        write_content_props(
            &mut args,
            &ContentProps {
                couid: Couid { id: 7, stamp: 0 },
                object_type: ObjectType::SymmetricKey,
                alg_id: 1,
                bit_length: 128,
                allowed_usage: UsageFlags::ENCRYPT,
            },
        );
        args.write_bytes(b"secret");
        let mut r = Reader::new(&args.into_bytes());
        container_skeleton.process_message(SAVE_COPY, &mut r, &ctx).unwrap();
    }
}
