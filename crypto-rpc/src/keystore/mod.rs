//! The key-storage provider (§4.7): a fixed table of slots, indexed four ways, mutated
//! only through [`TrustedContainer`] handles and [`KeyStorageProvider::begin_transaction`]
//! / `commit_transaction` / `rollback_transaction`.
//!
//! The slot table itself is fixed at construction (§3 invariant: slots are never created
//! or destroyed after the key database loads) so [`KeyStorageProvider::slots`] and the
//! uuid/provider indices built from it never change. Only a slot's *content* mutates, so
//! the coarse lock (§5 "a single lock guards all mutating operations; reads may proceed
//! concurrently with each other") only needs to cover the content index and the
//! transaction table, not the slot vector itself.

pub mod access_control;
pub mod journal;
pub mod security_event;
pub mod skeleton;
mod slot;
mod transaction;
mod trusted_container;

pub use slot::{
    Couid, ContentProps, ObjectType, Operation, PrototypeProps, Slot, UsageFlags, Uuid,
    VersionControlPolicy,
};
pub use transaction::TransactionId;
pub use trusted_container::TrustedContainer;

use {
    access_control::AccessControlConfig,
    journal::{KeyJournal, SlotRecord},
    security_event::{ContextData, SecurityEventReporter},
    transaction::TransactionTable,
    crate::error::{AccessViolation, CryptoRpcError, ResourceError},
    parking_lot::RwLock,
    std::{
        cell::RefCell,
        collections::HashMap,
        rc::Rc,
        time::Instant,
    },
};

/// One entry of the content (COUID) index: which slot currently holds the object
/// identified by `(couid_id, object_type)` for `provider_uuid`. Rebuilt incrementally as
/// slots gain or lose content; never touches the slot table itself.
#[derive(Debug, Clone, Copy)]
struct CouidEntry {
    couid_id: u128,
    object_type: ObjectType,
    provider_uuid: Uuid,
    slot_number: u32,
}

/// The part of the provider's state that mutates after construction, behind the one
/// coarse lock (§5).
#[derive(Default)]
struct MutableState {
    by_couid: Vec<CouidEntry>,
    transactions: TransactionTable,
}

/// The full key-storage provider: the fixed slot table plus everything needed to open,
/// read, and mutate it (§4.7).
pub struct KeyStorageProvider {
    slots: Vec<Rc<Slot>>,
    /// `slot_number -> index into slots`. Built once; the slot table never changes shape.
    by_slot_number: HashMap<u32, usize>,
    /// `uuid -> slot_number`, lowest slot number first on duplicate (§9 Open Questions
    /// decision in `DESIGN.md`: duplicate UUIDs are tolerated, first match wins).
    by_uuid: Vec<(Uuid, u32)>,
    /// `provider_uuid -> [slot_number]`.
    by_provider: HashMap<u128, Vec<u32>>,
    state: RwLock<MutableState>,
    access_control: AccessControlConfig,
    reporter: Box<dyn SecurityEventReporter>,
    journal: Box<dyn KeyJournal>,
    /// Per-provider veto callback invoked before a slot bearing that provider's uuid is
    /// cleared (§4.7 "a crypto provider may register interest in a slot's clearing and
    /// veto it"). Keyed by the provider uuid's raw value.
    clear_callbacks: RefCell<HashMap<u128, Box<dyn Fn(u32) -> bool>>>,
    /// Monotonic origin for COUID version stamping (§4.7 "COUID version-stamping"): the
    /// stamp is `elapsed().as_nanos()` from this instant, bumped by one whenever that
    /// reading does not exceed the slot's previous stamp.
    clock_epoch: Instant,
}

impl KeyStorageProvider {
    pub fn new(
        slots: Vec<Slot>,
        access_control: AccessControlConfig,
        reporter: Box<dyn SecurityEventReporter>,
        journal: Box<dyn KeyJournal>,
    ) -> Rc<Self> {
        let slots: Vec<Rc<Slot>> = slots.into_iter().map(Rc::new).collect();

        let mut by_slot_number = HashMap::with_capacity(slots.len());
        let mut by_uuid: Vec<(Uuid, u32)> = Vec::with_capacity(slots.len());
        let mut by_provider: HashMap<u128, Vec<u32>> = HashMap::new();
        let mut by_couid = Vec::new();
        for (idx, slot) in slots.iter().enumerate() {
            by_slot_number.insert(slot.slot_number, idx);
            by_uuid.push((slot.uuid, slot.slot_number));
            by_provider
                .entry(slot.provider_uuid.0)
                .or_default()
                .push(slot.slot_number);
            if let Some(content) = slot.content.borrow().as_ref() {
                by_couid.push(CouidEntry {
                    couid_id: content.couid.id,
                    object_type: content.object_type,
                    provider_uuid: slot.provider_uuid,
                    slot_number: slot.slot_number,
                });
            }
        }
        by_uuid.sort_by_key(|(uuid, slot_number)| (*uuid, *slot_number));

        for slot in &slots {
            let record = journal
                .load_all()
                .into_iter()
                .find(|r| r.slot_number == slot.slot_number);
            if let Some(record) = record {
                *slot.content.borrow_mut() = record.content;
                *slot.payload.borrow_mut() = record.payload;
            }
        }

        Rc::new(Self {
            slots,
            by_slot_number,
            by_uuid,
            by_provider,
            state: RwLock::new(MutableState {
                by_couid,
                transactions: TransactionTable::default(),
            }),
            access_control,
            reporter,
            journal,
            clear_callbacks: RefCell::new(HashMap::new()),
            clock_epoch: Instant::now(),
        })
    }

    fn slot(&self, slot_number: u32) -> Result<&Rc<Slot>, CryptoRpcError> {
        self.by_slot_number
            .get(&slot_number)
            .map(|&idx| &self.slots[idx])
            .ok_or(ResourceError::UnreservedResource.into())
    }

    /// Registers a veto callback invoked before any slot owned by `provider_uuid` is
    /// cleared; used by crypto providers that need to react to a key disappearing (§4.7).
    pub fn register_clear_callback(&self, provider_uuid: Uuid, callback: impl Fn(u32) -> bool + 'static) {
        self.clear_callbacks
            .borrow_mut()
            .insert(provider_uuid.0, Box::new(callback));
    }

    /// Resolves a slot's stable uuid to its current slot number, lowest slot number first
    /// on a duplicate uuid.
    pub fn slot_number_for_uuid(&self, uuid: Uuid) -> Option<u32> {
        self.by_uuid
            .binary_search_by_key(&uuid, |(u, _)| *u)
            .ok()
            .map(|idx| {
                let mut idx = idx;
                while idx > 0 && self.by_uuid[idx - 1].0 == uuid {
                    idx -= 1;
                }
                self.by_uuid[idx].1
            })
    }

    /// Every slot number registered under `provider_uuid`.
    pub fn slot_numbers_for_provider(&self, provider_uuid: Uuid) -> Vec<u32> {
        self.by_provider.get(&provider_uuid.0).cloned().unwrap_or_default()
    }

    /// Finds the slot currently holding `(couid_id, object_type)`, optionally restricted
    /// to one provider, continuing the search past `after` when it is given (used by a
    /// crypto provider walking the index for every object it owns).
    pub fn find_object(
        &self,
        couid_id: u128,
        object_type: ObjectType,
        provider_uuid: Option<Uuid>,
        after: Option<u32>,
    ) -> Option<u32> {
        let state = self.state.read();
        state
            .by_couid
            .iter()
            .filter(|e| e.couid_id == couid_id && e.object_type == object_type)
            .filter(|e| provider_uuid.is_none_or(|p| p == e.provider_uuid))
            .filter(|e| after.is_none_or(|a| e.slot_number > a))
            .map(|e| e.slot_number)
            .next()
    }

    pub fn prototype_props(&self, slot_number: u32) -> PrototypeProps {
        self.slot(slot_number)
            .map(|s| s.prototype.clone())
            .expect("prototype_props called with an invalid slot number")
    }

    pub fn content_props(&self, slot_number: u32) -> Option<ContentProps> {
        self.slot(slot_number)
            .ok()
            .and_then(|s| s.content.borrow().clone())
    }

    pub fn payload(&self, slot_number: u32) -> Vec<u8> {
        self.slot(slot_number)
            .map(|s| s.payload.borrow().clone())
            .unwrap_or_default()
    }

    pub fn is_empty(&self, slot_number: u32) -> bool {
        self.slot(slot_number).map(|s| s.is_empty()).unwrap_or(true)
    }

    /// Opens a slot for reading, failing with [`AccessViolation`] (and reporting it) if
    /// `user_id` lacks `read` on `slot_number` (§4.7, §4.8).
    pub fn open_as_user(self: &Rc<Self>, slot_number: u32, user_id: u32) -> Result<TrustedContainer, CryptoRpcError> {
        let slot = self.slot(slot_number)?;
        if !self.access_control.allows(user_id, slot_number, Operation::READ) {
            self.reporter.report_key_access_denied(ContextData {
                user_id,
                slot_uuid: slot.uuid,
            });
            return Err(AccessViolation.into());
        }
        Ok(TrustedContainer::new(self.clone(), slot_number, user_id, false))
    }

    /// Opens a slot for exclusive write, failing with [`AccessViolation`] if `user_id`
    /// lacks `write`, or [`ResourceError::BusyResource`] if another owner container is
    /// already open against this slot (§3 invariant: at most one owner container per slot
    /// at any instant).
    pub fn open_as_owner(self: &Rc<Self>, slot_number: u32, user_id: u32) -> Result<TrustedContainer, CryptoRpcError> {
        let slot = self.slot(slot_number)?;
        if !self.access_control.allows(user_id, slot_number, Operation::WRITE) {
            self.reporter.report_key_access_denied(ContextData {
                user_id,
                slot_uuid: slot.uuid,
            });
            return Err(AccessViolation.into());
        }
        if slot
            .owner_tc_exists
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::AcqRel,
                std::sync::atomic::Ordering::Acquire,
            )
            .is_err()
        {
            return Err(ResourceError::BusyResource.into());
        }
        *slot.owner_user_id.borrow_mut() = Some(user_id);
        Ok(TrustedContainer::new(self.clone(), slot_number, user_id, true))
    }

    /// Releases the exclusive owner flag a container held. Called from
    /// [`TrustedContainer`]'s `Drop`; never fails, since by the time it runs the caller no
    /// longer holds any handle that could observe a failure.
    pub(super) fn release_owner(&self, slot_number: u32) {
        if let Ok(slot) = self.slot(slot_number) {
            slot.owner_tc_exists.store(false, std::sync::atomic::Ordering::Release);
        }
    }

    fn next_stamp(&self, prior: Option<u64>) -> u64 {
        let now = self.clock_epoch.elapsed().as_nanos() as u64;
        match prior {
            Some(p) if now <= p => p + 1,
            _ => now,
        }
    }

    /// Overwrites a slot's content (§4.7 `save_copy`), called only through an owner
    /// [`TrustedContainer`]. Rejects a session object (§3 invariant 4), a content shape
    /// the prototype forbids, and a couid already occupying a *different* slot under the
    /// same provider (§9 Open Questions: resaving the same couid into the same slot is a
    /// version bump, not a duplication — see `DESIGN.md`).
    pub(super) fn update_key_slot(
        &self,
        slot_number: u32,
        _user_id: u32,
        mut content: ContentProps,
        payload: Vec<u8>,
    ) -> Result<(), CryptoRpcError> {
        if content.object_type == ObjectType::SessionObject {
            return Err(ResourceError::ContentRestrictions.into());
        }
        let slot = self.slot(slot_number)?;
        if content.object_type != slot.prototype.allowed_object_type {
            return Err(ResourceError::ContentRestrictions.into());
        }
        if !slot.prototype.allowed_algorithms.is_empty()
            && !slot.prototype.allowed_algorithms.contains(&content.alg_id)
        {
            return Err(ResourceError::ContentRestrictions.into());
        }
        if payload.len() as u32 > slot.prototype.capacity {
            return Err(ResourceError::ContentRestrictions.into());
        }

        let mut state = self.state.write();
        let duplicate = state.by_couid.iter().any(|e| {
            e.couid_id == content.couid.id
                && e.provider_uuid == slot.provider_uuid
                && e.slot_number != slot_number
        });
        if duplicate {
            return Err(ResourceError::ContentDuplication.into());
        }

        let prior_stamp = slot
            .content
            .borrow()
            .as_ref()
            .filter(|c| c.couid.id == content.couid.id)
            .map(|c| c.couid.stamp);
        content.couid.stamp = self.next_stamp(prior_stamp);

        if state.transactions.find_scope(slot_number).is_some() {
            *slot.shadow.borrow_mut() = Some((Some(content), payload));
            return Ok(());
        }

        state.by_couid.retain(|e| e.slot_number != slot_number);
        state.by_couid.push(CouidEntry {
            couid_id: content.couid.id,
            object_type: content.object_type,
            provider_uuid: slot.provider_uuid,
            slot_number,
        });
        drop(state);

        *slot.content.borrow_mut() = Some(content.clone());
        *slot.payload.borrow_mut() = payload.clone();
        self.journal.persist_one(&SlotRecord {
            slot_number,
            content: Some(content),
            payload,
        });
        Ok(())
    }

    /// Secure-erases a slot's content (§4.7 `clear`), called only through an owner
    /// [`TrustedContainer`]. A no-op on an already-empty slot. Runs the owning provider's
    /// veto callback first, if one was registered (§4.7).
    pub(super) fn clear(&self, slot_number: u32, _user_id: u32) -> Result<(), CryptoRpcError> {
        let slot = self.slot(slot_number)?;
        if slot.is_empty() {
            return Ok(());
        }
        let vetoed = match self.clear_callbacks.borrow().get(&slot.provider_uuid.0) {
            Some(veto) => !veto(slot_number),
            None => false,
        };
        if vetoed {
            return Err(ResourceError::ResourceFault.into());
        }

        let mut state = self.state.write();
        state.by_couid.retain(|e| e.slot_number != slot_number);
        drop(state);

        *slot.content.borrow_mut() = None;
        for byte in slot.payload.borrow_mut().iter_mut() {
            *byte = 0;
        }
        slot.payload.borrow_mut().clear();
        *slot.shadow.borrow_mut() = None;
        self.journal.persist_one(&SlotRecord {
            slot_number,
            content: None,
            payload: Vec::new(),
        });
        Ok(())
    }

    /// Reserves a set of slot numbers for atomic update (§4.7 `begin_transaction`).
    /// `owner_user_id` must already hold an owner container on every slot in `scope`; the
    /// scope must not overlap any other open transaction.
    pub fn begin_transaction(&self, scope: Vec<u32>, owner_user_id: u32) -> Result<TransactionId, CryptoRpcError> {
        let mut seen = std::collections::HashSet::new();
        for &slot_number in &scope {
            if !seen.insert(slot_number) {
                return Err(crate::error::RpcError::InvalidArgument.into());
            }
            let slot = self.slot(slot_number)?;
            let owned_by_caller = slot.owner_tc_exists.load(std::sync::atomic::Ordering::Acquire)
                && *slot.owner_user_id.borrow() == Some(owner_user_id);
            if !owned_by_caller {
                return Err(AccessViolation.into());
            }
        }
        let mut state = self.state.write();
        if state.transactions.overlaps(&scope) {
            return Err(ResourceError::BusyResource.into());
        }
        Ok(state.transactions.begin(scope, owner_user_id))
    }

    /// Atomically applies every shadow write accumulated in a transaction's scope and
    /// persists each changed slot (§4.7 `commit_transaction`). Slots in scope that never
    /// received a write during the transaction are left untouched.
    pub fn commit_transaction(&self, id: TransactionId) -> Result<(), CryptoRpcError> {
        let mut state = self.state.write();
        let txn = state
            .transactions
            .remove(id)
            .ok_or(crate::error::RpcError::InvalidArgument)?;
        drop(state);

        for &slot_number in &txn.scope {
            let slot = self.slot(slot_number)?;
            let Some((content, payload)) = slot.shadow.borrow_mut().take() else {
                continue;
            };
            {
                let mut state = self.state.write();
                state.by_couid.retain(|e| e.slot_number != slot_number);
                if let Some(content) = &content {
                    state.by_couid.push(CouidEntry {
                        couid_id: content.couid.id,
                        object_type: content.object_type,
                        provider_uuid: slot.provider_uuid,
                        slot_number,
                    });
                }
            }
            *slot.content.borrow_mut() = content.clone();
            *slot.payload.borrow_mut() = payload.clone();
            self.journal.persist_one(&SlotRecord {
                slot_number,
                content,
                payload,
            });
        }
        Ok(())
    }

    /// Discards every shadow write accumulated in a transaction's scope without applying
    /// it (§4.7 `rollback_transaction`).
    pub fn rollback_transaction(&self, id: TransactionId) -> Result<(), CryptoRpcError> {
        let mut state = self.state.write();
        let txn = state
            .transactions
            .remove(id)
            .ok_or(crate::error::RpcError::InvalidArgument)?;
        drop(state);
        for &slot_number in &txn.scope {
            if let Ok(slot) = self.slot(slot_number) {
                *slot.shadow.borrow_mut() = None;
            }
        }
        Ok(())
    }

    /// Every transaction id a disconnecting client left open, for best-effort rollback
    /// (§5 "Disconnect semantics").
    pub fn transactions_owned_by(&self, owner_user_id: u32) -> Vec<TransactionId> {
        self.state.read().transactions.ids_owned_by(owner_user_id)
    }
}
