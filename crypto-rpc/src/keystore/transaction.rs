//! Transaction bookkeeping: a named set of slot numbers reserved for atomic update
//! (§3, §4.7).

use std::collections::HashMap;

pub type TransactionId = u64;

#[derive(Debug, Clone)]
pub(super) struct OpenTransaction {
    pub(super) scope: Vec<u32>,
    pub(super) owner_user_id: u32,
}

/// Tracks every transaction currently open against a [`super::KeyStorageProvider`].
/// Kept separate from the slot table itself so `begin_transaction` can check for scope
/// overlap without walking every slot.
#[derive(Default)]
pub(super) struct TransactionTable {
    next_id: TransactionId,
    open: HashMap<TransactionId, OpenTransaction>,
}

impl TransactionTable {
    pub(super) fn overlaps(&self, scope: &[u32]) -> bool {
        self.open
            .values()
            .any(|t| t.scope.iter().any(|s| scope.contains(s)))
    }

    pub(super) fn begin(&mut self, scope: Vec<u32>, owner_user_id: u32) -> TransactionId {
        self.next_id += 1;
        let id = self.next_id;
        self.open.insert(id, OpenTransaction { scope, owner_user_id });
        id
    }

    /// The id of the open transaction (if any) whose scope includes `slot_number`, used
    /// by `update_key_slot` to decide whether a write lands directly or in a slot's
    /// shadow.
    pub(super) fn find_scope(&self, slot_number: u32) -> Option<TransactionId> {
        self.open
            .iter()
            .find(|(_, t)| t.scope.contains(&slot_number))
            .map(|(id, _)| *id)
    }

    pub(super) fn remove(&mut self, id: TransactionId) -> Option<OpenTransaction> {
        self.open.remove(&id)
    }

    /// Every transaction currently open, scoped to slots owned by `owner_user_id`.
    /// Used by the endpoint on disconnect to roll back anything it left pending
    /// (§5 "Disconnect semantics").
    pub(super) fn ids_owned_by(&self, owner_user_id: u32) -> Vec<TransactionId> {
        self.open
            .iter()
            .filter(|(_, t)| t.owner_user_id == owner_user_id)
            .map(|(id, _)| *id)
            .collect()
    }
}
