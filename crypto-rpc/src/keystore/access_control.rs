//! The user→slot access-control matrix (§4.8).

use {
    crate::keystore::slot::Operation,
    serde::Deserialize,
    std::collections::HashMap,
};

/// One `(slotNumber, operation)` restriction in a user's entry of the access-control
/// description (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct RestrictionDescription {
    #[serde(rename = "slotNumber")]
    pub slot_number: u32,
    pub operation: OperationDescription,
}

/// The external, human-writable spelling of [`Operation`] (§6: `none`, `read`, `write`,
/// `readWrite`).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationDescription {
    None,
    Read,
    Write,
    ReadWrite,
}

impl From<OperationDescription> for Operation {
    fn from(v: OperationDescription) -> Self {
        match v {
            OperationDescription::None => Operation::NONE,
            OperationDescription::Read => Operation::READ,
            OperationDescription::Write => Operation::WRITE,
            OperationDescription::ReadWrite => Operation::READ | Operation::WRITE,
        }
    }
}

/// One user's entry in the access-control description (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct UserAccessDescription {
    #[serde(rename = "userID")]
    pub user_id: u32,
    pub restrictions: Vec<RestrictionDescription>,
}

/// The external shape of the access-control description: `list of { userID,
/// restrictions: [{ slotNumber, operation }] }` (§6).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(transparent)]
pub struct AccessControlDescription(pub Vec<UserAccessDescription>);

/// Immutable in-memory access-control matrix, built once at daemon start (§3, §4.8).
///
/// An empty matrix (no entries at all) disables enforcement entirely — every operation
/// is permitted (§4.7 "Access control", §9 Open Questions decision recorded in
/// `DESIGN.md`). A slot absent from a *present* user's list means `Operation::NONE`, not
/// "fall through to unrestricted".
#[derive(Debug, Default)]
pub struct AccessControlConfig {
    by_user: HashMap<u32, HashMap<u32, Operation>>,
}

impl AccessControlConfig {
    pub fn from_description(desc: &AccessControlDescription) -> Self {
        let mut by_user = HashMap::new();
        for user in &desc.0 {
            let mut slots = HashMap::new();
            for r in &user.restrictions {
                slots.insert(r.slot_number, Operation::from(r.operation));
            }
            by_user.insert(user.user_id, slots);
        }
        Self { by_user }
    }

    pub fn is_enforced(&self) -> bool {
        !self.by_user.is_empty()
    }

    /// Returns the operations `user_id` is permitted for `slot_number`. When
    /// enforcement is disabled (empty configuration) every operation is permitted
    /// regardless of `user_id`.
    pub fn permitted(&self, user_id: u32, slot_number: u32) -> Operation {
        if !self.is_enforced() {
            return Operation::READ | Operation::WRITE;
        }
        self.by_user
            .get(&user_id)
            .and_then(|slots| slots.get(&slot_number))
            .copied()
            .unwrap_or(Operation::NONE)
    }

    pub fn allows(&self, user_id: u32, slot_number: u32, required: Operation) -> bool {
        self.permitted(user_id, slot_number).contains(required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> AccessControlDescription {
        AccessControlDescription(vec![UserAccessDescription {
            user_id: 42,
            restrictions: vec![RestrictionDescription {
                slot_number: 7,
                operation: OperationDescription::Read,
            }],
        }])
    }

    #[test]
    fn read_only_user_cannot_write() {
        let cfg = AccessControlConfig::from_description(&desc());
        assert!(cfg.allows(42, 7, Operation::READ));
        assert!(!cfg.allows(42, 7, Operation::WRITE));
    }

    #[test]
    fn slot_absent_from_users_list_is_denied() {
        let cfg = AccessControlConfig::from_description(&desc());
        assert!(!cfg.allows(42, 8, Operation::READ));
    }

    #[test]
    fn empty_configuration_disables_enforcement() {
        let cfg = AccessControlConfig::from_description(&AccessControlDescription::default());
        assert!(cfg.allows(1, 999, Operation::READ | Operation::WRITE));
    }
}
