use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    domain::UserId,
    ports::KeyValueStore,
    store::{get_json, set_json, SCANNED_USER_IDS_KEY},
    Result,
};

/// Explicit per-UI scan session state.
///
/// Holds the one-in-flight flag and the device's persisted set of user ids that
/// were already connected by scanning. The set only grows.
pub struct ScanSession {
    store: Arc<dyn KeyValueStore>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the orchestration ends.
pub struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl ScanSession {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Claim the session. `None` if another orchestration is pending.
    pub fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightGuard {
                flag: &self.in_flight,
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Persisted scanned ids, in insertion order. Unreadable data counts as empty.
    pub fn scanned_user_ids(&self) -> Vec<i64> {
        match get_json::<Vec<i64>>(self.store.as_ref(), SCANNED_USER_IDS_KEY) {
            Ok(ids) => ids.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "scanned user ids unreadable; treating as empty");
                Vec::new()
            }
        }
    }

    pub fn has_scanned(&self, user: UserId) -> bool {
        self.scanned_user_ids().contains(&user.0)
    }

    /// Append `user`. Returns `false` if it was already present.
    pub fn record_scanned(&self, user: UserId) -> Result<bool> {
        let mut ids = self.scanned_user_ids();
        if ids.contains(&user.0) {
            return Ok(false);
        }
        ids.push(user.0);
        set_json(self.store.as_ref(), SCANNED_USER_IDS_KEY, &ids)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn in_flight_guard_is_exclusive_and_released_on_drop() {
        let session = ScanSession::new(Arc::new(MemoryStore::default()));
        let guard = session.try_begin().expect("first claim");
        assert!(session.is_in_flight());
        assert!(session.try_begin().is_none());
        drop(guard);
        assert!(!session.is_in_flight());
        assert!(session.try_begin().is_some());
    }

    #[test]
    fn scanned_ids_grow_without_duplicates() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        let session = ScanSession::new(store.clone());
        assert!(session.record_scanned(UserId(7)).unwrap());
        assert!(session.record_scanned(UserId(3)).unwrap());
        assert!(!session.record_scanned(UserId(7)).unwrap());
        assert_eq!(session.scanned_user_ids(), vec![7, 3]);

        // A fresh session over the same store sees the persisted ids.
        let reopened = ScanSession::new(store);
        assert!(reopened.has_scanned(UserId(3)));
        assert!(!reopened.has_scanned(UserId(4)));
    }

    #[test]
    fn garbage_in_store_reads_as_empty() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        store.set(SCANNED_USER_IDS_KEY, "not json").unwrap();
        let session = ScanSession::new(store);
        assert!(session.scanned_user_ids().is_empty());
        assert!(session.record_scanned(UserId(1)).unwrap());
        assert_eq!(session.scanned_user_ids(), vec![1]);
    }
}
