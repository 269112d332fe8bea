//! Admission queue and concurrency limiter.
//!
//! A [`ConcurrencyLimiter`] hands out at most `capacity` [`SlotPermit`]s at
//! a time. Callers that find no free slot wait in a FIFO queue: when a slot
//! frees, the oldest waiter gets it, and nobody who asked later can overtake
//! it. Both properties come from tokio's [`Semaphore`], which hands released
//! permits straight to the head of its waiter list.
//!
//! A slot is released by dropping its permit, so it is released exactly once
//! on every exit path of the code holding it, including `?` and panics.
//!
//! The limiter is a cheap `Clone` handle. Share one between orchestrators to
//! put them under a common cap, or build one per test for isolation.

use crate::error::ConvertError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    queued: AtomicUsize,
}

/// Proof of a held slot. Dropping it releases the slot.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
    limiter: ConcurrencyLimiter,
}

impl fmt::Debug for SlotPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPermit").finish_non_exhaustive()
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        // The semaphore permit is returned after this body runs.
        debug!(
            "Releasing job slot ({}/{} held before release)",
            self.limiter.held(),
            self.limiter.capacity()
        );
    }
}

/// Decrements the waiting count however the wait ends.
struct QueuedGuard<'a>(&'a AtomicUsize);

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("capacity", &self.capacity())
            .field("held", &self.held())
            .field("queued", &self.queued())
            .finish()
    }
}

impl ConcurrencyLimiter {
    /// A limiter with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                queued: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a slot in FIFO order.
    pub async fn acquire(&self) -> Result<SlotPermit, ConvertError> {
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        let _queued = QueuedGuard(&self.inner.queued);
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ConvertError::Internal("concurrency limiter closed".to_string()))?;
        Ok(SlotPermit {
            _permit: permit,
            limiter: self.clone(),
        })
    }

    /// Like [`acquire`](Self::acquire), but gives up when `token` fires.
    ///
    /// Abandoning the wait removes the caller from the queue without
    /// disturbing anyone else's position.
    pub async fn acquire_cancellable(
        &self,
        token: &CancellationToken,
    ) -> Result<SlotPermit, ConvertError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                Err(ConvertError::Cancelled("waiting for a job slot".to_string()))
            }
            permit = self.acquire() => permit,
        }
    }

    /// Take a slot only if one is free right now and nobody is waiting.
    pub fn try_acquire(&self) -> Option<SlotPermit> {
        Arc::clone(&self.inner.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| SlotPermit {
                _permit: permit,
                limiter: self.clone(),
            })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Slots currently held.
    pub fn held(&self) -> usize {
        self.inner.capacity - self.available()
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Callers currently waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    async fn wait_until_queued(limiter: &ConcurrencyLimiter, n: usize) {
        while limiter.queued() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let limiter = ConcurrencyLimiter::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = limiter.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _slot = limiter.acquire().await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(limiter.held() <= limiter.capacity());
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.held(), 0);
        assert_eq!(limiter.queued(), 0);
    }

    #[tokio::test]
    async fn admits_waiters_in_request_order() {
        let limiter = ConcurrencyLimiter::new(1);
        let blocker = limiter.acquire().await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..6 {
            let l = limiter.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _slot = l.acquire().await.unwrap();
                order.lock().unwrap().push(i);
                tokio::task::yield_now().await;
            }));
            wait_until_queued(&limiter, i + 1).await;
        }

        drop(blocker);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(limiter.held(), 0);
    }

    #[tokio::test]
    async fn release_wakes_exactly_the_oldest_waiter() {
        let limiter = ConcurrencyLimiter::new(1);
        let first = limiter.acquire().await.unwrap();

        let l1 = limiter.clone();
        let older = tokio::spawn(async move { l1.acquire().await.unwrap() });
        wait_until_queued(&limiter, 1).await;
        let l2 = limiter.clone();
        let younger = tokio::spawn(async move { l2.acquire().await.unwrap() });
        wait_until_queued(&limiter, 2).await;

        drop(first);
        let older_slot = older.await.unwrap();
        assert_eq!(limiter.held(), 1);
        assert_eq!(limiter.queued(), 1);
        assert!(!younger.is_finished());

        drop(older_slot);
        let younger_slot = younger.await.unwrap();
        assert_eq!(limiter.held(), 1);
        drop(younger_slot);
        assert_eq!(limiter.held(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_queue_without_a_slot() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await.unwrap();
        let token = CancellationToken::new();

        let l = limiter.clone();
        let t = token.clone();
        let waiter = tokio::spawn(async move { l.acquire_cancellable(&t).await });
        wait_until_queued(&limiter, 1).await;

        token.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ConvertError::Cancelled(_))));
        assert_eq!(limiter.queued(), 0);
        assert_eq!(limiter.held(), 1);

        drop(held);
        assert_eq!(limiter.held(), 0);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn try_acquire_respects_capacity() {
        let limiter = ConcurrencyLimiter::new(1);
        let slot = limiter.try_acquire();
        assert!(slot.is_some());
        assert!(limiter.try_acquire().is_none());
        drop(slot);
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }
}
