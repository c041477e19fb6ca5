//! Single-process lock backend.

use super::{LockError, LockLease, LockResult, LockService};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Cap applied when `now + duration` overflows `Instant`.
const MAX_LEASE: Duration = Duration::from_secs(24 * 60 * 60);

struct Holder {
    token: Uuid,
    expires_at: Instant,
}

/// Lock table kept in process memory.
///
/// Suitable for tests and for deployments with a single writer process.
#[derive(Default)]
pub struct InMemoryLockService {
    holders: Mutex<HashMap<String, Holder>>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `key` is held by an unexpired lease.
    pub fn is_held(&self, key: &str) -> bool {
        let now = Instant::now();
        self.holders()
            .get(key)
            .is_some_and(|holder| holder.expires_at > now)
    }

    fn holders(&self) -> MutexGuard<'_, HashMap<String, Holder>> {
        // A panic while holding the map cannot leave a half-written entry.
        self.holders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LockService for InMemoryLockService {
    fn try_acquire(&self, key: &str, duration: Duration) -> LockResult<LockLease> {
        let now = Instant::now();
        let mut holders = self.holders();
        holders.retain(|_, holder| holder.expires_at > now);
        if holders
            .get(key)
            .is_some_and(|holder| holder.expires_at > now)
        {
            return Err(LockError::Unavailable {
                key: key.to_string(),
            });
        }

        let lease = LockLease::new(key);
        let expires_at = now
            .checked_add(duration)
            .unwrap_or_else(|| now + MAX_LEASE);
        holders.insert(
            key.to_string(),
            Holder {
                token: lease.token(),
                expires_at,
            },
        );
        Ok(lease)
    }

    fn release(&self, lease: &LockLease) -> LockResult<()> {
        let mut holders = self.holders();
        if holders
            .get(lease.key())
            .is_some_and(|holder| holder.token == lease.token())
        {
            holders.remove(lease.key());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryLockService;
    use crate::lock::{LockError, LockService};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn expired_lease_can_be_taken_over() {
        let service = InMemoryLockService::new();
        let stale = service.try_acquire("k", Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(20));

        assert!(!service.is_held("k"));
        let fresh = service.try_acquire("k", Duration::from_secs(30)).unwrap();

        // The stale holder must not release the new lease.
        service.release(&stale).unwrap();
        assert!(service.is_held("k"));
        service.release(&fresh).unwrap();
        assert!(!service.is_held("k"));
    }

    #[test]
    fn acquire_evicts_expired_entries_for_other_keys() {
        let service = InMemoryLockService::new();
        service.try_acquire("a", Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(20));

        let _b = service.try_acquire("b", Duration::from_secs(30)).unwrap();
        assert_eq!(service.holders().len(), 1);
        assert!(service.is_held("b"));
    }

    #[test]
    fn distinct_keys_do_not_contend() {
        let service = InMemoryLockService::new();
        let _a = service.try_acquire("a", Duration::from_secs(30)).unwrap();
        let _b = service.try_acquire("b", Duration::from_secs(30)).unwrap();
        assert!(matches!(
            service.try_acquire("a", Duration::from_secs(30)),
            Err(LockError::Unavailable { .. })
        ));
    }
}
