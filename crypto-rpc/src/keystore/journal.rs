//! The key-database description (§6) and the pluggable persistence seam behind it.
//!
//! The distilled spec treats the slot table's backing store as "an opaque journal over
//! the filesystem" and explicitly keeps real file I/O out of the core (§1). We model
//! that seam as a trait — `KeyJournal` — with an in-memory implementation the core ships
//! (sufficient for tests and for deployments that provision the key database
//! out-of-band); a production deployment supplies its own file-per-slot implementation.

use {
    crate::keystore::slot::{
        ContentProps, Couid, ObjectType, PrototypeProps, Slot, Uuid, UsageFlags,
        VersionControlPolicy,
    },
    serde::Deserialize,
};

/// One slot definition from the key-database description (§6): the recognized keys are
/// `number`, `uuid`, `provider.uuid`, plus per-slot meta and optional initial content.
#[derive(Debug, Clone, Deserialize)]
pub struct SlotDescription {
    pub number: u32,
    pub uuid: Uuid,
    #[serde(rename = "provider.uuid")]
    pub provider_uuid: Uuid,
    #[serde(rename = "type")]
    pub allowed_object_type: ObjectType,
    pub capacity: u32,
    #[serde(default)]
    #[serde(rename = "contentRestriction.isExportable")]
    pub is_exportable: bool,
    #[serde(default, rename = "contentRestriction.algId")]
    pub allowed_algorithms: Vec<u32>,
    #[serde(rename = "versionControl.type")]
    pub version_control: VersionControlPolicy,
    #[serde(rename = "owner.uuid")]
    pub owner_user_id: u32,
    #[serde(default, rename = "user.uuid")]
    pub allowed_user_ids: Vec<u32>,
    #[serde(default)]
    pub content: Option<SlotContentDescription>,
}

/// Initial content for a slot that should not start out empty (used by deployments that
/// provision keys ahead of time rather than through the RPC surface).
#[derive(Debug, Clone, Deserialize)]
pub struct SlotContentDescription {
    pub couid: u128,
    pub stamp: u64,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub alg_id: u32,
    pub bit_length: u32,
    #[serde(default)]
    pub allowed_usage: u32,
    #[serde(with = "hex_payload")]
    pub payload: Vec<u8>,
}

mod hex_payload {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let mut out = Vec::with_capacity(s.len() / 2);
        let bytes = s.as_bytes();
        let mut i = 0;
        while i + 2 <= bytes.len() {
            let byte = u8::from_str_radix(&s[i..i + 2], 16).map_err(serde::de::Error::custom)?;
            out.push(byte);
            i += 2;
        }
        Ok(out)
    }
}

/// The external shape of the key-database description (§6): a list of slot
/// definitions.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(transparent)]
pub struct KeyDatabaseDescription(pub Vec<SlotDescription>);

impl SlotDescription {
    pub fn into_slot(self) -> Slot {
        let prototype = PrototypeProps {
            allowed_object_type: self.allowed_object_type,
            allowed_algorithms: self.allowed_algorithms,
            capacity: self.capacity,
            exportable: self.is_exportable,
            version_control: self.version_control,
            owner_user_id: self.owner_user_id,
            allowed_user_ids: self.allowed_user_ids,
        };
        let slot = Slot::new(self.number, self.uuid, self.provider_uuid, prototype);
        if let Some(content) = self.content {
            *slot.content.borrow_mut() = Some(ContentProps {
                couid: Couid {
                    id: content.couid,
                    stamp: content.stamp,
                },
                object_type: content.object_type,
                alg_id: content.alg_id,
                bit_length: content.bit_length,
                allowed_usage: UsageFlags(content.allowed_usage),
            });
            *slot.payload.borrow_mut() = content.payload;
        }
        slot
    }
}

/// A single slot's durable state, as handed to and retrieved from a [`KeyJournal`].
#[derive(Debug, Clone)]
pub struct SlotRecord {
    pub slot_number: u32,
    pub content: Option<ContentProps>,
    pub payload: Vec<u8>,
}

/// The persistence seam behind the slot table (§4.7 "Persistence").
///
/// `load_all` is called once at [`super::KeyStorageProvider`] construction to recover
/// any previously-committed content; `persist_one` is called after every `save_copy` /
/// `clear` / transaction commit so a crash cannot silently roll back a completed write.
pub trait KeyJournal {
    fn load_all(&self) -> Vec<SlotRecord>;
    fn persist_one(&self, record: &SlotRecord);
}

/// The core's own `KeyJournal`: holds nothing durable, so `load_all` always returns
/// empty and `persist_one` is a no-op. Slot content for this implementation lives only
/// in the in-memory table built from the key-database description at startup, matching
/// the "deployments that treat the key database as read-only/provisioned out-of-band"
/// case named in §4.7.
#[derive(Debug, Default)]
pub struct InMemoryKeyJournal;

impl KeyJournal for InMemoryKeyJournal {
    fn load_all(&self) -> Vec<SlotRecord> {
        Vec::new()
    }

    fn persist_one(&self, _record: &SlotRecord) {}
}
