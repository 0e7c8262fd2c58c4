//! The value types that make up one slot of the key-storage provider's persistent table.

use serde::Deserialize;
use std::{cell::RefCell, fmt, sync::atomic::AtomicBool};

/// A minimal in-house bitflags implementation so the crate does not need to decide
/// between `bitflags`'s and the teacher's existing hand-rolled `BitOr`/`BitAnd`
/// operator-overload style for small flag sets (`protocol_helpers.rs` rolled its own for
/// the same reason). Declares a newtype over an integer with `Deserialize` support so the
/// variants can also be written as `"none" | "read" | "write" | "readWrite"` in JSON
/// (§6, "Access-control description").
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $repr);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub const fn contains(self, other: $name) -> bool {
                (self.0 & other.0) == other.0
            }

            pub const fn union(self, other: $name) -> $name {
                $name(self.0 | other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                self.union(rhs)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }
    };
}

/// Stable identity of a logical slot, independent of its position in the slot table.
///
/// Deserialized from a plain hyphenated hex string in the key-database description
/// (`"11111111-2222-3333-4444-555555555555"`); the daemon never constructs one from raw
/// bytes originating outside configuration or the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uuid(pub u128);

impl Uuid {
    pub const fn from_u128(v: u128) -> Self {
        Self(v)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 {
            return None;
        }
        u128::from_str_radix(&hex, 16).ok().map(Self)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

impl<'de> Deserialize<'de> for Uuid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Uuid::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("not a valid uuid: {s}")))
    }
}

/// 128-bit content identity plus a monotonically increasing version stamp (§4.7,
/// "COUID version-stamping"). Two saves of the "same" crypto object are distinguished by
/// `id`; successive saves of that same `id` are ordered by `stamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Couid {
    pub id: u128,
    pub stamp: u64,
}

/// The kind of crypto object a slot's content holds. The concrete cryptographic meaning
/// of each variant is owned by a crypto-provider plugin (§1, "deliberately out of
/// scope"); the key-storage provider only needs the discriminant to enforce
/// `prototype.allowed_object_type` and to key the COUID index by `(couid, object_type)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectType {
    SymmetricKey,
    AsymmetricKeyPair,
    AsymmetricPublicKey,
    Certificate,
    /// A temporary, non-persistable object (§3 invariant 4): has no COUID and can never
    /// be the target of `save_copy`.
    SessionObject,
}

bitflags_like! {
    /// Bit flags over the usages a content object may be put to. Distinct from the
    /// access-control `Operation` bits (§4.8), which govern who may read/write a *slot*,
    /// not what the crypto object inside it may be used for.
    pub struct UsageFlags: u32 {
        const ENCRYPT = 1 << 0;
        const DECRYPT = 1 << 1;
        const SIGN = 1 << 2;
        const VERIFY = 1 << 3;
        const EXPORT = 1 << 4;
    }
}

bitflags_like! {
    /// Access-control bit flags over `{read, write}`, combined as a bitwise union
    /// (§4.8).
    pub struct Operation: u8 {
        const NONE = 0;
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// Version-control policy governing whether overwriting a slot's content must reference
/// the previous occupant (§6, `versionControl.type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VersionControlPolicy {
    None,
    RequirePrevious,
}

/// Immutable shape of a slot, fixed at key-database load time (§3).
#[derive(Debug, Clone)]
pub struct PrototypeProps {
    pub allowed_object_type: ObjectType,
    pub allowed_algorithms: Vec<u32>,
    pub capacity: u32,
    pub exportable: bool,
    pub version_control: VersionControlPolicy,
    pub owner_user_id: u32,
    pub allowed_user_ids: Vec<u32>,
}

/// Mutable shape of a slot's current occupant (§3). `None` when the slot is empty.
#[derive(Debug, Clone)]
pub struct ContentProps {
    pub couid: Couid,
    pub object_type: ObjectType,
    pub alg_id: u32,
    pub bit_length: u32,
    pub allowed_usage: UsageFlags,
}

/// One addressable cell of the key-storage provider's persistent table (§3, §4.7).
pub struct Slot {
    pub slot_number: u32,
    pub uuid: Uuid,
    pub provider_uuid: Uuid,
    pub prototype: PrototypeProps,
    pub(super) content: RefCell<Option<ContentProps>>,
    pub(super) payload: RefCell<Vec<u8>>,
    /// A transaction's in-flight write, invisible to non-owner readers until commit
    /// (§3 invariant 5, §4.7 `is_empty`).
    pub(super) shadow: RefCell<Option<(Option<ContentProps>, Vec<u8>)>>,
    pub(super) owner_tc_exists: AtomicBool,
    pub(super) owner_user_id: RefCell<Option<u32>>,
}

impl Slot {
    pub fn new(slot_number: u32, uuid: Uuid, provider_uuid: Uuid, prototype: PrototypeProps) -> Self {
        Self {
            slot_number,
            uuid,
            provider_uuid,
            prototype,
            content: RefCell::new(None),
            payload: RefCell::new(Vec::new()),
            shadow: RefCell::new(None),
            owner_tc_exists: AtomicBool::new(false),
            owner_user_id: RefCell::new(None),
        }
    }

    /// The slot's *user-visible* emptiness (§4.7): a pending, uncommitted transaction
    /// write into the shadow does not make the slot appear occupied.
    pub fn is_empty(&self) -> bool {
        self.content.borrow().is_none()
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("slot_number", &self.slot_number)
            .field("uuid", &self.uuid)
            .field("provider_uuid", &self.provider_uuid)
            .field("content", &self.content.borrow())
            .finish_non_exhaustive()
    }
}
