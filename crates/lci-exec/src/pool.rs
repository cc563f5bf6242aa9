//! Bounded local execution pool.
//!
//! `size` jobs run at once; up to `queue_capacity` more wait for a permit.
//! Anything beyond that is rejected on submission.
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::ExecError;

/// Pool size left when none is configured: half of the cores beyond two,
/// at least one.
pub fn derived_pool_size() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    size_for_cpus(cpus)
}

#[inline]
fn size_for_cpus(cpus: usize) -> usize {
    (cpus.saturating_sub(2) / 2).max(1)
}

#[derive(Clone)]
pub struct ExecutionPool {
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    tasks: TaskTracker,
    size: usize,
    queue_capacity: usize,
}

impl ExecutionPool {
    pub fn new(size: usize, queue_capacity: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            tasks: TaskTracker::new(),
            size,
            queue_capacity,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Submitted and not yet finished, running or waiting.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Currently executing.
    #[inline]
    pub fn running(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Jobs that could start right now without waiting.
    #[inline]
    pub fn free_slots(&self) -> usize {
        self.size.saturating_sub(self.in_flight())
    }

    /// Run `job` on the pool, or reject it at once when pool and queue are full.
    pub fn submit<F>(&self, job: F) -> Result<(), ExecError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let limit = self.size + self.queue_capacity;
        let reserved = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1));
        if let Err(in_flight) = reserved {
            debug!(in_flight, limit, "pool full; submission rejected");
            return Err(ExecError::PoolFull { in_flight });
        }
        if self.tasks.is_closed() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(ExecError::PoolFull { in_flight: self.in_flight() });
        }

        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        self.tasks.spawn(async move {
            let _slot = InFlight(in_flight);
            match permits.acquire_owned().await {
                Ok(_permit) => {
                    trace!("pool slot acquired");
                    job.await;
                }
                Err(_) => warn!("pool closed before job could start"),
            }
        });
        Ok(())
    }

    /// Stop accepting work and wait up to `grace` for submitted jobs.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tasks.close();
        self.permits.close();
        let drained = tokio::time::timeout(grace, self.tasks.wait()).await.is_ok();
        if !drained {
            warn!(in_flight = self.in_flight(), "pool did not drain in time");
        }
        drained
    }
}

/// Releases the in-flight reservation when the task ends, even on panic.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::{mpsc, watch};

    use super::*;

    #[test]
    fn size_leaves_headroom() {
        assert_eq!(size_for_cpus(1), 1);
        assert_eq!(size_for_cpus(4), 1);
        assert_eq!(size_for_cpus(8), 3);
        assert_eq!(size_for_cpus(16), 7);
        assert!(derived_pool_size() >= 1);
    }

    #[tokio::test]
    async fn fourth_submission_is_rejected_while_third_waits() {
        let pool = ExecutionPool::new(2, 1);
        let (started_tx, mut started) = mpsc::unbounded_channel();
        let (release_tx, release) = watch::channel(false);

        let mut results = Vec::new();
        for n in 0..4 {
            let started_tx = started_tx.clone();
            let mut release = release.clone();
            results.push(pool.submit(async move {
                let _ = started_tx.send(n);
                let _ = release.wait_for(|go| *go).await;
            }));
        }

        assert!(results[..3].iter().all(Result::is_ok));
        assert!(matches!(results[3], Err(ExecError::PoolFull { in_flight: 3 })));

        let mut first = vec![started.recv().await.unwrap(), started.recv().await.unwrap()];
        first.sort();
        assert_eq!(first, vec![0, 1]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started.try_recv().is_err(), "third job must wait for a slot");
        assert_eq!(pool.running(), 2);
        assert_eq!(pool.in_flight(), 3);
        assert_eq!(pool.free_slots(), 0);

        release_tx.send(true).unwrap();
        assert_eq!(started.recv().await.unwrap(), 2);
        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn closed_pool_rejects_submissions() {
        let pool = ExecutionPool::new(1, 0);
        assert!(pool.shutdown(Duration::from_millis(10)).await);
        assert!(pool.submit(async {}).is_err());
        assert_eq!(pool.in_flight(), 0);
    }
}
