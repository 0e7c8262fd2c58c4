//! The per-endpoint object registry: the map from [`ProxyId`] to the server-side object
//! that handle addresses, plus runtime capability narrowing.

use {
    crate::{envelope::ProxyId, error::RuntimeError},
    std::{any::Any, cell::RefCell, collections::HashMap, rc::Rc},
};

/// Marker for anything addressable through an object registry. Implementors expose
/// themselves as `Rc<dyn Any>` so that [`ObjectRegistry::narrow`] can attempt a runtime
/// capability check without the registry itself knowing every concrete type.
pub trait Identifiable: Any {
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: Any> Identifiable for T {
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// How an entry in the registry came to exist.
enum Entry {
    /// The registry holds the only strong reference; dropped when the client
    /// unregisters the id (normally via a destroy message).
    Owned(Rc<dyn Any>),
    /// The registry holds a non-owning reference; the object's lifetime is governed by
    /// something else (typically a provider registered for the life of the endpoint).
    Borrowed(std::rc::Weak<dyn Any>),
}

/// Maps [`ProxyId`]s to server-side objects for one client endpoint.
///
/// Two distinct ownership modes live side by side here on purpose (§4.2): an out-object
/// created by a method call is *owned* by the registry until the client destroys it, while
/// a handshake-registered provider is merely *borrowed* — the registry never controls its
/// lifetime and will not drop it at endpoint teardown beyond releasing the reference.
#[derive(Default)]
pub struct ObjectRegistry {
    entries: RefCell<HashMap<u64, Entry>>,
}

impl ObjectRegistry {
    pub fn register_owned(&self, id: ProxyId, obj: Rc<dyn Any>) {
        self.entries.borrow_mut().insert(id.0, Entry::Owned(obj));
    }

    pub fn register_borrowed(&self, id: ProxyId, obj: &Rc<dyn Any>) {
        self.entries
            .borrow_mut()
            .insert(id.0, Entry::Borrowed(Rc::downgrade(obj)));
    }

    /// Removes the entry for `id`, if any, and returns the strong reference an owned
    /// entry held. Used when a destroy message is processed.
    pub fn unregister(&self, id: ProxyId) -> Option<Rc<dyn Any>> {
        match self.entries.borrow_mut().remove(&id.0)? {
            Entry::Owned(obj) => Some(obj),
            Entry::Borrowed(_) => None,
        }
    }

    pub fn contains(&self, id: ProxyId) -> bool {
        self.entries.borrow().contains_key(&id.0)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn lookup_any(&self, id: ProxyId) -> Result<Rc<dyn Any>, RuntimeError> {
        match self.entries.borrow().get(&id.0) {
            Some(Entry::Owned(obj)) => Ok(obj.clone()),
            Some(Entry::Borrowed(weak)) => {
                weak.upgrade().ok_or(RuntimeError::RuntimeFault)
            }
            None => Err(RuntimeError::RuntimeFault),
        }
    }

    /// Looks up `id` and attempts to narrow it to the capability `T`. This replaces a
    /// C++-style `dynamic_cast`: the registry stores objects type-erased, and a caller
    /// names the concrete capability it requires. Failure to narrow — either because the
    /// id is unknown or because the live object is a different concrete type — is
    /// reported uniformly as [`RuntimeError::RuntimeFault`].
    pub fn narrow<T: Any>(&self, id: ProxyId) -> Result<Rc<T>, RuntimeError> {
        let any = self.lookup_any(id)?;
        any.downcast::<T>().map_err(|_| RuntimeError::RuntimeFault)
    }

    /// Drains every owned entry, dropping the registry's strong references. Called when
    /// an endpoint disconnects so that destructors run before the endpoint itself is torn
    /// down.
    pub fn clear_owned(&self) -> Vec<Rc<dyn Any>> {
        let mut entries = self.entries.borrow_mut();
        let mut drained = Vec::new();
        entries.retain(|_, entry| match entry {
            Entry::Owned(obj) => {
                drained.push(obj.clone());
                false
            }
            Entry::Borrowed(_) => true,
        });
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thing(u32);

    #[test]
    fn owned_round_trip() {
        let reg = ObjectRegistry::default();
        let id = ProxyId(1);
        reg.register_owned(id, Rc::new(Thing(7)) as Rc<dyn Any>);
        let thing = reg.narrow::<Thing>(id).unwrap();
        assert_eq!(thing.0, 7);
        assert!(reg.unregister(id).is_some());
        assert!(!reg.contains(id));
    }

    #[test]
    fn unknown_id_is_runtime_fault() {
        let reg = ObjectRegistry::default();
        let err = reg.narrow::<Thing>(ProxyId(99)).unwrap_err();
        assert!(matches!(err, RuntimeError::RuntimeFault));
    }

    #[test]
    fn wrong_capability_is_runtime_fault() {
        struct Other;
        let reg = ObjectRegistry::default();
        let id = ProxyId(1);
        reg.register_owned(id, Rc::new(Thing(1)) as Rc<dyn Any>);
        let err = reg.narrow::<Other>(id).unwrap_err();
        assert!(matches!(err, RuntimeError::RuntimeFault));
    }

    #[test]
    fn borrowed_entry_does_not_outlive_owner() {
        let reg = ObjectRegistry::default();
        let id = ProxyId(2);
        {
            let owner = Rc::new(Thing(5));
            let any: Rc<dyn Any> = owner.clone();
            reg.register_borrowed(id, &any);
            assert_eq!(reg.narrow::<Thing>(id).unwrap().0, 5);
        }
        assert!(reg.narrow::<Thing>(id).is_err());
    }

    #[test]
    fn clear_owned_drains_only_owned_entries() {
        let reg = ObjectRegistry::default();
        let owner = Rc::new(Thing(1));
        let any: Rc<dyn Any> = owner.clone();
        reg.register_borrowed(ProxyId(1), &any);
        reg.register_owned(ProxyId(2), Rc::new(Thing(2)) as Rc<dyn Any>);
        let drained = reg.clear_owned();
        assert_eq!(drained.len(), 1);
        assert!(reg.contains(ProxyId(1)));
        assert!(!reg.contains(ProxyId(2)));
    }
}
