//! Per life-cycle instance write locks
//!
//! Two gates of the same life-cycle instance are serialized here before they
//! reach SQLite; gates of different instances never contend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use tracing::debug;

use crate::error::{GovernanceError, Result};

/// Guard held for the duration of one workflow on one life-cycle instance
///
/// On drop the instance's entry leaves the registry unless another caller
/// is still waiting on it.
pub struct InstanceGuard<'a> {
    registry: &'a InstanceLocks,
    life_cycle_instance_id: i64,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl Drop for InstanceGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own Arc left means nobody holds or waits on the mutex
        self.registry
            .locks
            .remove_if(&self.life_cycle_instance_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Registry of per-instance mutexes
pub struct InstanceLocks {
    locks: DashMap<i64, Arc<Mutex<()>>>,
    timeout: Duration,
    locks_acquired: AtomicUsize,
    lock_contentions: AtomicUsize,
}

impl InstanceLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
            locks_acquired: AtomicUsize::new(0),
            lock_contentions: AtomicUsize::new(0),
        }
    }

    /// Wait for the lock of `life_cycle_instance_id`
    ///
    /// Gives up after the configured timeout with `InvalidState`.
    pub fn acquire(&self, life_cycle_instance_id: i64) -> Result<InstanceGuard<'_>> {
        // Clone the Arc out so the shard lock is released before blocking
        let mutex = self
            .locks
            .entry(life_cycle_instance_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        if let Some(guard) = mutex.try_lock_arc() {
            self.locks_acquired.fetch_add(1, Ordering::Relaxed);
            return Ok(self.guard(life_cycle_instance_id, guard));
        }

        self.lock_contentions.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        match mutex.try_lock_arc_for(self.timeout) {
            Some(guard) => {
                self.locks_acquired.fetch_add(1, Ordering::Relaxed);
                debug!(
                    life_cycle_instance_id,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Acquired contended instance lock"
                );
                Ok(self.guard(life_cycle_instance_id, guard))
            }
            None => Err(GovernanceError::invalid_state(format!(
                "life-cycle instance {} is busy with another gate (waited {:?})",
                life_cycle_instance_id, self.timeout
            ))),
        }
    }

    fn guard(&self, life_cycle_instance_id: i64, guard: ArcMutexGuard<RawMutex, ()>) -> InstanceGuard<'_> {
        InstanceGuard {
            registry: self,
            life_cycle_instance_id,
            guard: Some(guard),
        }
    }

    /// Instances that currently have a lock entry
    pub fn tracked_instances(&self) -> usize {
        self.locks.len()
    }

    pub fn locks_acquired(&self) -> usize {
        self.locks_acquired.load(Ordering::Relaxed)
    }

    pub fn lock_contentions(&self) -> usize {
        self.lock_contentions.load(Ordering::Relaxed)
    }
}

impl Default for InstanceLocks {
    fn default() -> Self {
        Self::new(crate::constants::governance::LOCK_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_same_instance_times_out_while_held() {
        let locks = InstanceLocks::new(Duration::from_millis(20));

        let _held = locks.acquire(1).unwrap();
        let err = locks.acquire(1).err().expect("second acquire should time out");

        assert!(matches!(err, GovernanceError::InvalidState(_)));
        assert_eq!(locks.lock_contentions(), 1);
    }

    #[test]
    fn test_different_instances_do_not_contend() {
        let locks = InstanceLocks::new(Duration::from_millis(20));

        let _a = locks.acquire(1).unwrap();
        let _b = locks.acquire(2).unwrap();

        assert_eq!(locks.locks_acquired(), 2);
        assert_eq!(locks.lock_contentions(), 0);
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let locks = Arc::new(InstanceLocks::new(Duration::from_secs(5)));
        let held = locks.acquire(7).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire(7).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(50));
        drop(held);

        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(locks.locks_acquired(), 2);
        assert_eq!(locks.tracked_instances(), 0);
    }

    #[test]
    fn test_released_locks_leave_the_registry() {
        let locks = InstanceLocks::new(Duration::from_millis(20));

        let a = locks.acquire(1).unwrap();
        let b = locks.acquire(2).unwrap();
        assert_eq!(locks.tracked_instances(), 2);

        drop(a);
        assert_eq!(locks.tracked_instances(), 1);
        drop(b);
        assert_eq!(locks.tracked_instances(), 0);

        // a fresh entry works after pruning
        let again = locks.acquire(1).unwrap();
        assert_eq!(locks.tracked_instances(), 1);
        drop(again);
        assert_eq!(locks.locks_acquired(), 3);
    }
}
