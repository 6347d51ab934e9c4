use crate::model::{EntityKind, Versioned};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Business validation failures. These are safe to report to the caller verbatim and are
/// never retried automatically.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum ModelError {
    #[error("Duplicate {kind} id [{id}]")]
    DuplicateId { kind: EntityKind, id: String },

    #[error("{kind} [{id}] not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} [{id}] has been updated by someone else: expected version {expected} but was {actual}")]
    OptimisticLock {
        kind: EntityKind,
        id: String,
        expected: u64,
        actual: u64,
    },
}

/// VersionedStore is an in-memory map of id to versioned object with optimistic locking.
///
/// Objects are stored and returned by value. Mutating something returned by `find()` never
/// changes stored state.
pub struct VersionedStore<T: Versioned> {
    objects: BTreeMap<String, T>,
}

impl<T: Versioned> VersionedStore<T> {
    pub fn new() -> Self {
        VersionedStore {
            objects: BTreeMap::new(),
        }
    }

    pub fn from_objects(objects: impl IntoIterator<Item = T>) -> Self {
        VersionedStore {
            objects: objects.into_iter().map(|o| (o.id().to_string(), o)).collect(),
        }
    }

    pub fn find(&self, id: &str) -> Option<T> {
        self.objects.get(id).cloned()
    }

    /// Objects ordered by id. `limit` of `None` means unbounded.
    pub fn list(&self, offset: usize, limit: Option<usize>) -> Vec<T> {
        let iter = self.objects.values().skip(offset).cloned();
        match limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Insert a new object at version 0.
    pub fn create(&mut self, mut o: T) -> Result<T, ModelError> {
        if self.objects.contains_key(o.id()) {
            return Err(ModelError::DuplicateId {
                kind: T::KIND,
                id: o.id().to_string(),
            });
        }

        o.set_version(0);
        self.objects.insert(o.id().to_string(), o.clone());
        Ok(o)
    }

    /// Replace an object. `o.version()` must match the stored version; the stored copy gets
    /// the next version.
    pub fn update(&mut self, mut o: T) -> Result<T, ModelError> {
        let existing = match self.objects.get_mut(o.id()) {
            Some(existing) => existing,
            None => {
                return Err(ModelError::NotFound {
                    kind: T::KIND,
                    id: o.id().to_string(),
                })
            }
        };

        if existing.version() != o.version() {
            return Err(ModelError::OptimisticLock {
                kind: T::KIND,
                id: o.id().to_string(),
                expected: o.version(),
                actual: existing.version(),
            });
        }

        o.set_version(existing.version() + 1);
        *existing = o.clone();
        Ok(o)
    }

    pub fn delete(&mut self, id: &str) -> Result<T, ModelError> {
        self.objects.remove(id).ok_or_else(|| ModelError::NotFound {
            kind: T::KIND,
            id: id.to_string(),
        })
    }
}

impl<T: Versioned> Default for VersionedStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Queue, User};

    fn user(id: &str, version: u64) -> User {
        User {
            id: id.into(),
            version,
            ..User::default()
        }
    }

    #[test]
    fn create_update_conflict() {
        let mut store = VersionedStore::new();

        let created = store.create(user("alice", 0)).unwrap();
        assert_eq!(created.version, 0);

        let updated = store
            .update(User {
                admin: true,
                ..user("alice", 0)
            })
            .unwrap();
        assert_eq!(updated.version, 1);
        assert!(updated.admin);

        // Same update again is stale.
        let err = store
            .update(User {
                admin: true,
                ..user("alice", 0)
            })
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::OptimisticLock {
                kind: EntityKind::User,
                id: "alice".into(),
                expected: 0,
                actual: 1,
            }
        );
        assert_eq!(store.find("alice").unwrap().version, 1);
    }

    #[test]
    fn create_always_starts_at_version_zero() {
        let mut store = VersionedStore::new();
        let created = store.create(user("bob", 17)).unwrap();
        assert_eq!(created.version, 0);
        assert_eq!(store.find("bob").unwrap().version, 0);
    }

    #[test]
    fn stale_update_never_mutates() {
        let mut store = VersionedStore::new();
        store.create(user("carol", 0)).unwrap();
        for _ in 0..3 {
            let current = store.find("carol").unwrap();
            store.update(current).unwrap();
        }
        let before = store.find("carol").unwrap();
        assert_eq!(before.version, 3);

        for stale_version in [0u64, 1, 2, 4, 99].iter() {
            let attempt = User {
                admin: true,
                ..user("carol", *stale_version)
            };
            assert!(matches!(
                store.update(attempt),
                Err(ModelError::OptimisticLock { .. })
            ));
            assert_eq!(store.find("carol").unwrap(), before);
        }
    }

    #[test]
    fn duplicate_and_missing() {
        let mut store = VersionedStore::new();
        store.create(user("dave", 0)).unwrap();

        assert!(matches!(
            store.create(user("dave", 0)),
            Err(ModelError::DuplicateId { .. })
        ));
        assert!(matches!(
            store.update(user("erin", 0)),
            Err(ModelError::NotFound { .. })
        ));
        assert!(matches!(store.delete("erin"), Err(ModelError::NotFound { .. })));

        store.delete("dave").unwrap();
        assert!(store.find("dave").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn find_returns_independent_copy() {
        let mut store = VersionedStore::new();
        store
            .create(Queue {
                id: "db/q".into(),
                database: "db".into(),
                max_size: 10,
                ..Queue::default()
            })
            .unwrap();

        let mut copy = store.find("db/q").unwrap();
        copy.max_size = 99;
        copy.version = 12;

        let stored = store.find("db/q").unwrap();
        assert_eq!(stored.max_size, 10);
        assert_eq!(stored.version, 0);
    }

    #[test]
    fn list_is_ordered_by_id_with_paging() {
        let mut store = VersionedStore::new();
        for id in ["d", "a", "c", "b", "e"].iter() {
            store.create(user(id, 0)).unwrap();
        }

        let ids = |v: Vec<User>| v.into_iter().map(|u| u.id).collect::<Vec<_>>();
        assert_eq!(ids(store.list(0, None)), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(ids(store.list(1, Some(2))), vec!["b", "c"]);
        assert_eq!(ids(store.list(4, Some(10))), vec!["e"]);
        assert!(store.list(5, None).is_empty());
    }
}
