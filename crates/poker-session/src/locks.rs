use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters, including waiters that were cancelled mid-wait
    /// and have not been dropped yet.
    users: usize,
}

type Slots<K> = Arc<Mutex<HashMap<K, Slot>>>;

/// One async mutex per key, created on demand and removed once no task
/// holds or waits for it. Different keys never contend.
///
/// Guards are `'static`, so a guard can be moved into blocking work that
/// outlives the future that took it.
pub(crate) struct KeyedLocks<K> {
    slots: Slots<K>,
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) async fn lock(&self, key: K) -> KeyGuard<K> {
        // Registered before waiting: dropping this future while it waits
        // still releases the slot.
        let lease = Lease::acquire(&self.slots, key);
        let guard = lease.mutex.clone().lock_owned().await;
        KeyGuard {
            _guard: guard,
            _lease: lease,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct Lease<K>
where
    K: Eq + Hash,
{
    slots: Slots<K>,
    key: K,
    mutex: Arc<AsyncMutex<()>>,
}

impl<K> Lease<K>
where
    K: Eq + Hash + Clone,
{
    fn acquire(slots: &Slots<K>, key: K) -> Self {
        let mut map = slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = map.entry(key.clone()).or_insert_with(|| Slot {
            mutex: Arc::default(),
            users: 0,
        });
        slot.users += 1;
        let mutex = slot.mutex.clone();
        drop(map);

        Self {
            slots: slots.clone(),
            key,
            mutex,
        }
    }
}

impl<K> Drop for Lease<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let mut map = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = map.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                map.remove(&self.key);
            }
        }
    }
}

/// Held lock on one key. Fields drop in order: the mutex is released before
/// the slot is given back.
pub(crate) struct KeyGuard<K>
where
    K: Eq + Hash,
{
    _guard: OwnedMutexGuard<()>,
    _lease: Lease<K>,
}

impl<K> KeyGuard<K>
where
    K: Eq + Hash,
{
    #[cfg(test)]
    fn is_held(&self) -> bool {
        self._lease.mutex.try_lock().is_err()
    }
}
