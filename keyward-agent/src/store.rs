//! The identity table.
//!
//! Expiry is enforced at read time: every lookup and iteration takes the
//! caller's clock and skips identities whose death has passed, so a
//! just-expired key can never be used even if the background reaper has
//! not run yet. The reaper only reclaims memory.

use std::time::SystemTime;

use ssh_key::public::KeyData;
use tracing::debug;

use crate::identity::Identity;

#[derive(Default)]
pub struct IdentityStore {
    identities: Vec<Identity>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Insert an identity. A re-add of a key already present replaces the
    /// stored metadata in place, it never duplicates the entry. Returns
    /// true when an existing entry was replaced.
    pub fn add(&mut self, identity: Identity) -> bool {
        let key_data = identity.public().key_data().clone();
        if let Some(slot) = self
            .identities
            .iter_mut()
            .find(|id| *id.public().key_data() == key_data)
        {
            *slot = identity;
            true
        } else {
            self.identities.push(identity);
            false
        }
    }

    /// Remove the identity with the given public key. Returns false when
    /// no such key is loaded.
    pub fn remove(&mut self, key_data: &KeyData) -> bool {
        let before = self.identities.len();
        self.identities.retain(|id| id.public().key_data() != key_data);
        self.identities.len() != before
    }

    pub fn remove_all(&mut self) {
        self.identities.clear();
    }

    /// Remove every identity loaded from the given provider. Returns the
    /// removed identities so the caller can release their helper modules.
    pub fn remove_provider(&mut self, provider: &str) -> Vec<Identity> {
        let mut removed = Vec::new();
        self.identities.retain(|id| {
            if id.provider.as_deref() == Some(provider) {
                removed.push(id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn lookup(&self, key_data: &KeyData, now: SystemTime) -> Option<&Identity> {
        self.identities
            .iter()
            .find(|id| !id.expired(now) && id.public().key_data() == key_data)
    }

    pub fn lookup_mut(&mut self, key_data: &KeyData, now: SystemTime) -> Option<&mut Identity> {
        self.identities
            .iter_mut()
            .find(|id| !id.expired(now) && id.public().key_data() == key_data)
    }

    /// All identities that are live at `now`.
    pub fn iter_live(&self, now: SystemTime) -> impl Iterator<Item = &Identity> {
        self.identities.iter().filter(move |id| !id.expired(now))
    }

    /// Drop expired identities and report the earliest remaining death,
    /// so the reaper can sleep until the next one is due.
    pub fn reap(&mut self, now: SystemTime) -> Option<SystemTime> {
        let before = self.identities.len();
        self.identities.retain(|id| !id.expired(now));
        let reaped = before - self.identities.len();
        if reaped > 0 {
            debug!(reaped, remaining = self.identities.len(), "expired identities removed");
        }
        self.identities.iter().filter_map(|id| id.death).min()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::rngs::OsRng;
    use ssh_key::{Algorithm, PrivateKey};

    use super::*;
    use crate::identity::IdentityKey;

    fn identity(comment: &str) -> Identity {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        Identity {
            key: IdentityKey::Local(Box::new(key)),
            comment: comment.into(),
            provider: None,
            death: None,
            confirm: false,
            signatures_left: None,
            destination_constraints: Vec::new(),
        }
    }

    #[test]
    fn add_then_lookup() {
        let mut store = IdentityStore::new();
        let id = identity("alpha");
        let key_data = id.public().key_data().clone();
        assert!(!store.add(id));
        let now = SystemTime::now();
        assert_eq!(store.lookup(&key_data, now).unwrap().comment, "alpha");
    }

    #[test]
    fn re_add_replaces_metadata_in_place() {
        let mut store = IdentityStore::new();
        let mut id = identity("first");
        let key_data = id.public().key_data().clone();
        store.add(id.clone());

        id.comment = "second".into();
        id.confirm = true;
        assert!(store.add(id));

        assert_eq!(store.len(), 1);
        let now = SystemTime::now();
        let stored = store.lookup(&key_data, now).unwrap();
        assert_eq!(stored.comment, "second");
        assert!(stored.confirm);
    }

    #[test]
    fn remove_reports_missing_key() {
        let mut store = IdentityStore::new();
        let id = identity("gone");
        let key_data = id.public().key_data().clone();
        assert!(!store.remove(&key_data));
        store.add(id);
        assert!(store.remove(&key_data));
        assert!(store.is_empty());
    }

    #[test]
    fn expired_identity_invisible_before_reap() {
        let mut store = IdentityStore::new();
        let now = SystemTime::now();
        let mut id = identity("short-lived");
        let key_data = id.public().key_data().clone();
        id.death = Some(now + Duration::from_secs(10));
        store.add(id);

        assert!(store.lookup(&key_data, now).is_some());
        assert!(
            store
                .lookup(&key_data, now + Duration::from_secs(10))
                .is_none()
        );
        // Still occupying a slot until the reaper runs.
        assert_eq!(store.len(), 1);

        let next = store.reap(now + Duration::from_secs(11));
        assert!(next.is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn reap_reports_earliest_remaining_death() {
        let mut store = IdentityStore::new();
        let now = SystemTime::now();
        let mut a = identity("a");
        a.death = Some(now + Duration::from_secs(5));
        let mut b = identity("b");
        b.death = Some(now + Duration::from_secs(60));
        let mut c = identity("c");
        c.death = Some(now + Duration::from_secs(30));
        store.add(a);
        store.add(b);
        store.add(c);

        let next = store.reap(now + Duration::from_secs(6));
        assert_eq!(store.len(), 2);
        assert_eq!(next, Some(now + Duration::from_secs(30)));
    }

    #[test]
    fn remove_provider_only_touches_matching_entries() {
        let mut store = IdentityStore::new();
        let mut with = identity("token");
        with.provider = Some("/usr/lib/module.so".into());
        let without = identity("plain");
        store.add(with);
        store.add(without);

        let removed = store.remove_provider("/usr/lib/module.so");
        assert_eq!(removed.len(), 1);
        assert_eq!(store.len(), 1);
        let now = SystemTime::now();
        assert_eq!(store.iter_live(now).next().unwrap().comment, "plain");
    }
}
