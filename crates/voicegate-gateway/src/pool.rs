//! Bounded worker pool for recognition units.
//!
//! Admission is capped at `size + queue_depth`. Submitting never blocks: once
//! the cap is reached the unit is rejected. Admitted units wait for one of
//! `size` execution slots and then run to completion on the tokio runtime.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Semaphore, TryAcquireError};
use tracing::debug;

use voicegate_core::config::PoolConfig;
use voicegate_core::error::{Result, VoiceGateError};

pub struct WorkerPool {
    size: usize,
    capacity: usize,
    admission: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    admitted: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

/// Decrements a counter on drop, including when the unit panics.
struct CountGuard(Arc<AtomicUsize>);

impl CountGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for CountGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(size: usize, queue_depth: usize) -> Self {
        let size = size.max(1);
        let capacity = size + queue_depth;
        Self {
            size,
            capacity,
            admission: Arc::new(Semaphore::new(capacity)),
            slots: Arc::new(Semaphore::new(size)),
            admitted: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.size, config.queue_depth)
    }

    /// Admit a unit without waiting for it.
    ///
    /// Returns `PoolSaturated` when `size + queue_depth` units are already
    /// admitted and `PoolClosed` after [`close`](Self::close).
    pub fn submit<F>(&self, unit: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let admitted = self
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => VoiceGateError::PoolSaturated {
                    capacity: self.capacity,
                },
                TryAcquireError::Closed => VoiceGateError::PoolClosed,
            })?;

        let in_flight = CountGuard::enter(&self.admitted);
        let slots = self.slots.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            let _in_flight = in_flight;
            let _admitted = admitted;
            let Ok(_slot) = slots.acquire_owned().await else {
                debug!("pool slots closed before unit started");
                return;
            };
            let _running = CountGuard::enter(&running);
            unit.await;
        });
        Ok(())
    }

    /// Stop admitting new units. Admitted units still run.
    pub fn close(&self) {
        self.admission.close();
    }

    pub fn is_closed(&self) -> bool {
        self.admission.is_closed()
    }

    /// Units admitted and not yet finished, running or waiting.
    pub fn in_flight(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_submit_runs_unit() {
        let pool = WorkerPool::new(2, 0);
        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(42);
        })
        .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
        wait_until(|| pool.in_flight() == 0).await;
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_size() {
        let pool = WorkerPool::new(3, 20);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let active = active.clone();
            let peak = peak.clone();
            let done = done.clone();
            pool.submit(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        wait_until(|| done.load(Ordering::SeqCst) == 20).await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_saturated_pool_rejects() {
        let pool = WorkerPool::new(1, 1);
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);

        for _ in 0..2 {
            let mut rx = release_rx.clone();
            pool.submit(async move {
                let _ = rx.wait_for(|released| *released).await;
            })
            .unwrap();
        }

        let err = pool.submit(async {}).unwrap_err();
        assert!(matches!(err, VoiceGateError::PoolSaturated { capacity: 2 }));
        assert_eq!(pool.in_flight(), 2);

        release_tx.send(true).unwrap();
        wait_until(|| pool.in_flight() == 0).await;
        pool.submit(async {}).unwrap();
    }

    #[tokio::test]
    async fn test_closed_pool_rejects() {
        let pool = WorkerPool::new(1, 0);
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.submit(async {}), Err(VoiceGateError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_panicking_unit_releases_capacity() {
        let pool = WorkerPool::new(1, 0);
        pool.submit(async { panic!("unit failure") }).unwrap();
        wait_until(|| pool.in_flight() == 0 && pool.running() == 0).await;

        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(());
        })
        .unwrap();
        rx.await.unwrap();
    }
}
