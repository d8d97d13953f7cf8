use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core_modules::control::{CancelToken, ProgressFn};
use crate::core_modules::region::{Region, TileCoord};
use crate::error::DiffError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// One long-lived bounded worker pool, shared by tile-based diff computation
/// and chunked bounding-box extraction, created once per pipeline and reused
/// across comparison calls.
///
/// Jobs flow through a dispatcher task that fans them out round-robin to the
/// workers. `run_batch` keeps at most `pool_size` jobs in flight, polls the
/// cancellation token between dispatches and after each completion, and
/// tags every result with the index of the item that produced it, so the
/// caller can scatter results positionally no matter in which order they
/// completed.
pub struct TileScheduler {
    job_tx: mpsc::UnboundedSender<Job>,
    pool_size: usize,
    workers: Vec<JoinHandle<()>>,
}

impl TileScheduler {
    /// Must be called from inside a tokio runtime. Pool size defaults to the
    /// available hardware concurrency, minimum 1.
    pub fn new(worker_threads: Option<usize>) -> Self {
        let pool_size = worker_threads.unwrap_or_else(num_cpus::get).max(1);
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();

        let (worker_txs, worker_rxs): (Vec<_>, Vec<_>) = (0..pool_size)
            .map(|_| mpsc::unbounded_channel::<Job>())
            .unzip();

        // Dispatcher: ends when the scheduler (and with it `job_tx`) drops,
        // which in turn closes every worker channel.
        tokio::spawn(async move {
            let mut next = 0;
            while let Some(job) = job_rx.recv().await {
                if worker_txs[next].send(job).is_err() {
                    break;
                }
                next = (next + 1) % worker_txs.len();
            }
        });

        let workers = worker_rxs
            .into_iter()
            .map(|mut worker_rx| {
                tokio::spawn(async move {
                    while let Some(job) = worker_rx.recv().await {
                        job();
                    }
                })
            })
            .collect();

        debug!("tile scheduler started with {pool_size} workers");
        Self {
            job_tx,
            pool_size,
            workers,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Stops accepting jobs and waits for every worker to finish its queue.
    pub async fn shutdown(self) {
        drop(self.job_tx);
        futures::future::join_all(self.workers).await;
    }

    /// Runs `job` over every item with at most `pool_size` in flight.
    ///
    /// Results are returned in completion order, tagged with the item index.
    /// Cancellation stops new dispatches; in-flight jobs run to completion
    /// and the whole batch is reported as `Cancelled` with no results. A
    /// failing or panicking job aborts the batch the same way: in-flight
    /// jobs drain, queued jobs are abandoned, and the first error is
    /// returned with no partial results.
    pub async fn run_batch<I, T, F>(
        &self,
        items: Vec<I>,
        job: F,
        label: &str,
        cancel: &CancelToken,
        progress: Option<ProgressFn>,
    ) -> Result<Vec<(usize, T)>, DiffError>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Result<T, DiffError> + Send + Sync + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let job = Arc::new(job);
        let (result_tx, mut result_rx) =
            mpsc::unbounded_channel::<(usize, Result<T, DiffError>)>();

        let mut queue = items.into_iter().enumerate();
        let mut in_flight = 0usize;
        let mut completed = 0usize;
        let mut results = Vec::with_capacity(total);
        let mut failure: Option<DiffError> = None;
        let mut cancelled = cancel.is_cancelled();

        while in_flight < self.pool_size && !cancelled {
            match queue.next() {
                Some((index, item)) => {
                    self.submit(index, item, &job, &result_tx)?;
                    in_flight += 1;
                }
                None => break,
            }
            cancelled = cancel.is_cancelled();
        }

        while in_flight > 0 {
            let Some((index, outcome)) = result_rx.recv().await else {
                return Err(DiffError::PoolShutDown);
            };
            in_flight -= 1;
            completed += 1;
            match outcome {
                Ok(value) => results.push((index, value)),
                Err(error) => {
                    if failure.is_none() {
                        failure = Some(error);
                    }
                }
            }
            if let Some(progress) = &progress {
                progress(completed, total, label);
            }
            cancelled = cancelled || cancel.is_cancelled();
            if failure.is_none() && !cancelled {
                if let Some((index, item)) = queue.next() {
                    self.submit(index, item, &job, &result_tx)?;
                    in_flight += 1;
                }
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }
        if cancelled {
            return Err(DiffError::Cancelled);
        }
        Ok(results)
    }

    /// Partitions `region` into tiles of at most `tile_size` square and runs
    /// `worker` over each, results tagged with the originating tile
    /// coordinates.
    pub async fn run_tiles<T, F>(
        &self,
        region: Region,
        tile_size: u32,
        worker: F,
        label: &str,
        cancel: &CancelToken,
        progress: Option<ProgressFn>,
    ) -> Result<Vec<(TileCoord, T)>, DiffError>
    where
        T: Send + 'static,
        F: Fn(Region) -> Result<T, DiffError> + Send + Sync + 'static,
    {
        let tiles = region.split_into_tiles(tile_size);
        let coords: Vec<TileCoord> = tiles.iter().map(|(coord, _)| *coord).collect();
        let regions: Vec<Region> = tiles.into_iter().map(|(_, tile)| tile).collect();
        let results = self
            .run_batch(regions, worker, label, cancel, progress)
            .await?;
        Ok(results
            .into_iter()
            .map(|(index, value)| (coords[index], value))
            .collect())
    }

    fn submit<I, T, F>(
        &self,
        index: usize,
        item: I,
        job: &Arc<F>,
        result_tx: &mpsc::UnboundedSender<(usize, Result<T, DiffError>)>,
    ) -> Result<(), DiffError>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Result<T, DiffError> + Send + Sync + 'static,
    {
        let job = Arc::clone(job);
        let result_tx = result_tx.clone();
        let task: Job = Box::new(move || {
            // A panicking worker must not strand the batch; surface it as a
            // job failure so the coordinator can drain and abort.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (*job)(item)))
                .unwrap_or_else(|payload| Err(DiffError::Worker(panic_message(payload))));
            let _ = result_tx.send((index, outcome));
        });
        self.job_tx.send(task).map_err(|_| DiffError::PoolShutDown)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn batch_results_are_index_tagged() {
        let scheduler = TileScheduler::new(Some(3));
        assert_eq!(scheduler.pool_size(), 3);
        let items: Vec<u32> = (0..20).collect();
        let results = scheduler
            .run_batch(
                items,
                |n: u32| Ok(n * n),
                "squares",
                &CancelToken::new(),
                None,
            )
            .await
            .expect("batch succeeds");
        assert_eq!(results.len(), 20);
        for (index, value) in results {
            assert_eq!(value, (index as u32) * (index as u32));
        }
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn tiles_are_tagged_with_coordinates() {
        let scheduler = TileScheduler::new(Some(2));
        let region = Region::new(0, 0, 100, 50);
        let results = scheduler
            .run_tiles(
                region,
                30,
                |tile: Region| Ok(tile.area()),
                "tiles",
                &CancelToken::new(),
                None,
            )
            .await
            .expect("run succeeds");
        assert_eq!(results.len(), 4 * 2);
        let total: u64 = results.iter().map(|(_, area)| area).sum();
        assert_eq!(total, region.area());
        assert!(results.iter().any(|(c, _)| *c == TileCoord { col: 3, row: 1 }));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn failing_job_aborts_the_batch() {
        let scheduler = TileScheduler::new(Some(2));
        let outcome = scheduler
            .run_batch(
                (0..10).collect::<Vec<u32>>(),
                |n: u32| {
                    if n == 4 {
                        Err(DiffError::Worker("bad tile".into()))
                    } else {
                        Ok(n)
                    }
                },
                "fallible",
                &CancelToken::new(),
                None,
            )
            .await;
        assert!(matches!(outcome, Err(DiffError::Worker(_))));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_job_is_reported_not_hung() {
        let scheduler = TileScheduler::new(Some(2));
        let outcome = scheduler
            .run_batch(
                vec![1u32, 2, 3],
                |n: u32| {
                    if n == 2 {
                        panic!("tile exploded");
                    }
                    Ok(n)
                },
                "panicky",
                &CancelToken::new(),
                None,
            )
            .await;
        match outcome {
            Err(DiffError::Worker(message)) => assert!(message.contains("tile exploded")),
            other => panic!("expected worker error, got {other:?}"),
        }
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn pre_cancelled_batch_runs_nothing() {
        let scheduler = TileScheduler::new(Some(2));
        let token = CancelToken::new();
        token.cancel();
        let ran = Arc::new(AtomicUsize::new(0));
        let observer = Arc::clone(&ran);
        let outcome = scheduler
            .run_batch(
                (0..100).collect::<Vec<u32>>(),
                move |n: u32| {
                    observer.fetch_add(1, Ordering::SeqCst);
                    Ok(n)
                },
                "cancelled",
                &token,
                None,
            )
            .await;
        assert!(matches!(outcome, Err(DiffError::Cancelled)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn mid_run_cancellation_stops_new_dispatches() {
        let scheduler = TileScheduler::new(Some(1));
        let token = CancelToken::new();
        let trigger = token.clone();
        let ran = Arc::new(AtomicUsize::new(0));
        let observer = Arc::clone(&ran);
        let outcome = scheduler
            .run_batch(
                (0..50).collect::<Vec<u32>>(),
                move |n: u32| {
                    observer.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        trigger.cancel();
                    }
                    Ok(n)
                },
                "cancelled midway",
                &token,
                None,
            )
            .await;
        assert!(matches!(outcome, Err(DiffError::Cancelled)));
        // The first job (and at most the already-primed window) ran; the
        // other several dozen were never dispatched.
        assert!(ran.load(Ordering::SeqCst) <= 2);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn progress_reports_every_completion() {
        let scheduler = TileScheduler::new(Some(4));
        let seen = Arc::new(AtomicUsize::new(0));
        let observer = Arc::clone(&seen);
        let progress: ProgressFn = Arc::new(move |current, total, label| {
            assert!(current >= 1 && current <= total);
            assert_eq!(label, "counted");
            observer.fetch_add(1, Ordering::SeqCst);
        });
        scheduler
            .run_batch(
                (0..12).collect::<Vec<u32>>(),
                |n: u32| Ok(n),
                "counted",
                &CancelToken::new(),
                Some(progress),
            )
            .await
            .expect("batch succeeds");
        assert_eq!(seen.load(Ordering::SeqCst), 12);
        scheduler.shutdown().await;
    }
}
