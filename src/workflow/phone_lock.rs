use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters, including waiters that are still suspended.
    users: usize,
}

/// One async mutex per phone number, created on demand and dropped once
/// nobody holds or waits for it.
#[derive(Default)]
pub struct PhoneLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

/// Registration in a slot. Dropping it, whether after the lock was taken or
/// while still waiting for it, gives the slot up.
struct Lease<'a> {
    owner: &'a PhoneLocks,
    key: String,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let mut slots = self.owner.slots.lock();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

pub struct PhoneGuard<'a> {
    // Fields drop in order: unlock first, then release the slot.
    _guard: OwnedMutexGuard<()>,
    _lease: Lease<'a>,
}

impl PhoneLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, phone: &str) -> PhoneGuard<'_> {
        let (lease, mutex) = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(phone.to_string()).or_insert_with(|| Slot {
                mutex: Arc::default(),
                users: 0,
            });
            slot.users += 1;
            let lease = Lease {
                owner: self,
                key: phone.to_string(),
            };
            (lease, Arc::clone(&slot.mutex))
        };
        let guard = mutex.lock_owned().await;
        PhoneGuard {
            _guard: guard,
            _lease: lease,
        }
    }

    /// Number of phone numbers currently held or awaited.
    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_phone_waits_for_release() {
        let locks = Arc::new(PhoneLocks::new());
        let entered = Arc::new(AtomicBool::new(false));

        let first = locks.lock("79990000000").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            let entered = Arc::clone(&entered);
            tokio::spawn(async move {
                let _guard = locks.lock("79990000000").await;
                entered.store(true, Ordering::SeqCst);
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!entered.load(Ordering::SeqCst));

        drop(first);
        waiter.await.unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn different_phones_do_not_block() {
        let locks = PhoneLocks::new();
        let _a = locks.lock("79990000001").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("79990000002")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_slots_are_removed() {
        let locks = PhoneLocks::new();
        {
            let _guard = locks.lock("79990000003").await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_releases_its_slot() {
        let locks = Arc::new(PhoneLocks::new());
        let first = locks.lock("79990000004").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("79990000004").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        waiter.abort();
        let _ = waiter.await;
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn waiter_cancelled_while_lock_is_held() {
        let locks = Arc::new(PhoneLocks::new());
        let first = locks.lock("79990000005").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("79990000005").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        let _ = waiter.await;
        assert_eq!(locks.active(), 1);

        drop(first);
        assert_eq!(locks.active(), 0);
    }
}
