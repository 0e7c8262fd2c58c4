//! A scoped handle to a slot's content, granting either read or exclusive write access
//! (§3, §4.7).

use {
    crate::{
        error::{CryptoRpcError, ResourceError},
        keystore::{
            KeyStorageProvider,
            slot::{ContentProps, PrototypeProps},
        },
    },
    std::rc::Rc,
};

/// Returned by [`KeyStorageProvider::open_as_user`] and
/// [`KeyStorageProvider::open_as_owner`]. A read-only container may be opened
/// concurrently by any number of users with `read` permission; an owner container is
/// exclusive (§3 invariant: at most one owner trusted container per slot at any
/// instant).
pub struct TrustedContainer {
    provider: Rc<KeyStorageProvider>,
    slot_number: u32,
    user_id: u32,
    owner: bool,
}

impl TrustedContainer {
    pub(super) fn new(
        provider: Rc<KeyStorageProvider>,
        slot_number: u32,
        user_id: u32,
        owner: bool,
    ) -> Self {
        Self {
            provider,
            slot_number,
            user_id,
            owner,
        }
    }

    pub fn slot_number(&self) -> u32 {
        self.slot_number
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// The slot's immutable shape, exposed to any container regardless of ownership.
    pub fn prototype_props(&self) -> PrototypeProps {
        self.provider.prototype_props(self.slot_number)
    }

    /// The slot's current content properties, or `None` if the slot is (user-visibly)
    /// empty.
    pub fn content_props(&self) -> Option<ContentProps> {
        self.provider.content_props(self.slot_number)
    }

    /// The slot's current payload bytes. Empty if the slot has no content.
    pub fn payload(&self) -> Vec<u8> {
        self.provider.payload(self.slot_number)
    }

    /// Overwrites the slot's content (§4.7 `save_copy`). Only an owner container may
    /// write.
    pub fn save_copy(&self, content: ContentProps, payload: Vec<u8>) -> Result<(), CryptoRpcError> {
        if !self.owner {
            return Err(ResourceError::ResourceFault.into());
        }
        self.provider
            .update_key_slot(self.slot_number, self.user_id, content, payload)
    }

    /// Secure-erases the slot's payload (§4.7 `clear`). Only an owner container may
    /// clear.
    pub fn clear(&self) -> Result<(), CryptoRpcError> {
        if !self.owner {
            return Err(ResourceError::ResourceFault.into());
        }
        self.provider.clear(self.slot_number, self.user_id)
    }
}

impl Drop for TrustedContainer {
    fn drop(&mut self) {
        if self.owner {
            self.provider.release_owner(self.slot_number);
        }
    }
}
