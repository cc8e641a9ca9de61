//! # glyphfield-pool
//!
//! Parallel SDF generation pool for bulk glyph production (batch atlas
//! builds, warm-up sweeps). Not used by the on-demand deferred drain in
//! `glyphfield-atlas`, which stays single-threaded so atlas writes need
//! no locking.
//!
//! ## Architecture
//!
//! ```text
//! WorkerPool (dispatcher, caller's thread)
//!   ├── idle stack: workers awaiting a job
//!   ├── overflow FIFO: jobs awaiting a worker
//!   └── workers[i]: thread + request channel
//!          │  owns its own SdfOracle + font copy
//!          └──► replies channel (shared) ──► dispatcher
//! ```
//!
//! Per worker, requests are strictly FIFO. Across workers, completion
//! order is unspecified; [`WorkerPool::generate_batch`] still returns
//! results in input order because every job carries its slot index.

mod worker;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;

use glyphfield_atlas::{SdfBitmap, SdfOracle};
use worker::{WorkerReply, WorkerRequest};

/// Builds one oracle per worker thread. The factory crosses threads;
/// the oracles it builds never do.
pub type OracleFactory = Arc<dyn Fn() -> Box<dyn SdfOracle> + Send + Sync>;

/// Which oracle entry point a pool request drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdfKind {
    /// 3-channel multi-channel SDF.
    Msdf,
    /// 4-channel multi-channel SDF with true distance in alpha.
    Mtsdf,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker {index} failed to initialize: {reason}")]
    Init { index: usize, reason: String },

    #[error("all workers failed; last error: {reason}")]
    AllWorkersFailed { reason: String },

    #[error("worker pool is disposed")]
    Disposed,

    #[error("invalid pool configuration: {0}")]
    Config(String),
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker thread count. Zero runs generation inline on the caller's
    /// thread with a single lazily-built oracle.
    pub num_workers: usize,
    /// Refuse the inline fallback; `num_workers` must then be positive.
    pub workers_only: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            workers_only: false,
        }
    }
}

#[derive(Clone, Copy)]
struct Job {
    seq: usize,
    code_point: u32,
    font_size: u32,
    pixel_range: f32,
    kind: SdfKind,
}

struct WorkerHandle {
    requests: Sender<WorkerRequest>,
    join: Option<JoinHandle<()>>,
    alive: bool,
}

/// A set of worker threads, each holding an independent SDF oracle.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    /// Indices of workers awaiting a job.
    idle: Vec<usize>,
    replies: Receiver<(usize, WorkerReply)>,
    factory: OracleFactory,
    font: Arc<Vec<u8>>,
    /// Inline oracle for the zero-worker fallback.
    local: Option<Box<dyn SdfOracle>>,
    disposed: bool,
}

impl WorkerPool {
    /// Spawn the pool and block until every worker has built its oracle
    /// and loaded the font. A worker failing to initialize fails the
    /// whole pool.
    pub fn spawn(
        config: PoolConfig,
        factory: OracleFactory,
        font: Arc<Vec<u8>>,
    ) -> Result<Self, PoolError> {
        if config.workers_only && config.num_workers == 0 {
            return Err(PoolError::Config(
                "workers_only requires num_workers > 0".into(),
            ));
        }

        let (reply_tx, reply_rx) = unbounded();
        let mut workers = Vec::with_capacity(config.num_workers);
        for index in 0..config.num_workers {
            let (request_tx, request_rx) = unbounded();
            let factory = Arc::clone(&factory);
            let font = Arc::clone(&font);
            let reply_tx = reply_tx.clone();
            let join = std::thread::Builder::new()
                .name(format!("glyphfield-worker-{index}"))
                .spawn(move || worker::run(index, factory, font, request_rx, reply_tx))
                .map_err(|e| PoolError::Init {
                    index,
                    reason: e.to_string(),
                })?;
            workers.push(WorkerHandle {
                requests: request_tx,
                join: Some(join),
                alive: true,
            });
        }
        drop(reply_tx);

        // Ready gate: every worker must come up before any dispatch.
        let mut ready = 0;
        while ready < workers.len() {
            match reply_rx.recv() {
                Ok((_, WorkerReply::Ready)) => ready += 1,
                Ok((index, WorkerReply::InitFailed { reason })) => {
                    log::error!("worker {index} failed to initialize: {reason}");
                    return Err(PoolError::Init { index, reason });
                }
                Ok(_) => {}
                Err(_) => {
                    return Err(PoolError::Init {
                        index: ready,
                        reason: "worker exited before reporting ready".into(),
                    })
                }
            }
        }

        // Stack order: worker 0 is dispatched to first.
        let idle = (0..workers.len()).rev().collect();
        Ok(Self {
            workers,
            idle,
            replies: reply_rx,
            factory,
            font,
            local: None,
            disposed: false,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Generate one glyph. Convenience wrapper over
    /// [`generate_batch`](Self::generate_batch).
    pub fn generate_glyph(
        &mut self,
        code_point: u32,
        font_size: u32,
        pixel_range: f32,
        kind: SdfKind,
    ) -> Result<Option<SdfBitmap>, PoolError> {
        let mut results = self.generate_batch(&[code_point], font_size, pixel_range, kind)?;
        Ok(results.pop().flatten())
    }

    /// Generate every code point, returning results in input order.
    ///
    /// Jobs go to idle workers immediately and queue in the overflow
    /// FIFO otherwise; each completion either picks up the next queued
    /// job or returns the worker to the idle stack. A worker failure
    /// re-dispatches its in-flight job to a surviving worker; the call
    /// fails only when no workers remain.
    pub fn generate_batch(
        &mut self,
        code_points: &[u32],
        font_size: u32,
        pixel_range: f32,
        kind: SdfKind,
    ) -> Result<Vec<Option<SdfBitmap>>, PoolError> {
        if self.disposed {
            return Err(PoolError::Disposed);
        }
        if code_points.is_empty() {
            return Ok(Vec::new());
        }
        if self.workers.is_empty() {
            return Ok(self.generate_inline(code_points, font_size, pixel_range, kind));
        }

        let total = code_points.len();
        let mut results: Vec<Option<SdfBitmap>> = Vec::with_capacity(total);
        results.resize_with(total, || None);
        let mut overflow: VecDeque<Job> = code_points
            .iter()
            .enumerate()
            .map(|(seq, &code_point)| Job {
                seq,
                code_point,
                font_size,
                pixel_range,
                kind,
            })
            .collect();
        let mut in_flight: HashMap<usize, Job> = HashMap::new();
        let mut completed = 0;
        let mut last_error = String::from("no live workers");

        loop {
            // Hand queued jobs to idle workers.
            while !overflow.is_empty() {
                let Some(index) = self.idle.pop() else { break };
                if let Some(job) = overflow.pop_front() {
                    self.dispatch(index, job, &mut overflow, &mut in_flight);
                } else {
                    self.idle.push(index);
                }
            }

            if completed == total {
                break;
            }
            if in_flight.is_empty() && self.live_workers() == 0 {
                return Err(PoolError::AllWorkersFailed { reason: last_error });
            }

            match self.replies.recv() {
                Ok((index, WorkerReply::Result { seq, bitmap })) => {
                    in_flight.remove(&index);
                    if let Some(slot) = results.get_mut(seq) {
                        *slot = bitmap;
                    }
                    completed += 1;
                    self.idle.push(index);
                }
                Ok((index, WorkerReply::Failed { seq, reason })) => {
                    log::error!("worker {index} failed mid-task (job {seq}): {reason}");
                    last_error = reason;
                    self.workers[index].alive = false;
                    if let Some(job) = in_flight.remove(&index) {
                        // Retry on a surviving worker.
                        overflow.push_front(job);
                    }
                }
                Ok(_) => {} // stale init/dispose replies
                Err(_) => {
                    return Err(PoolError::AllWorkersFailed { reason: last_error });
                }
            }
        }
        Ok(results)
    }

    /// Shut down every worker and join its thread. Idempotent; the pool
    /// rejects work afterwards.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for worker in &self.workers {
            let _ = worker.requests.send(WorkerRequest::Dispose);
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.join.take() {
                if handle.join().is_err() {
                    log::error!("worker thread panicked during dispose");
                }
            }
        }
        self.workers.clear();
        self.idle.clear();
        self.local = None;
    }

    // ---------------------------------------------------------------
    // Internal helpers
    // ---------------------------------------------------------------

    fn dispatch(
        &mut self,
        index: usize,
        job: Job,
        overflow: &mut VecDeque<Job>,
        in_flight: &mut HashMap<usize, Job>,
    ) {
        let request = WorkerRequest::Generate {
            seq: job.seq,
            code_point: job.code_point,
            font_size: job.font_size,
            pixel_range: job.pixel_range,
            kind: job.kind,
        };
        if self.workers[index].requests.send(request).is_ok() {
            in_flight.insert(index, job);
        } else {
            log::error!(
                "worker {index} unreachable; re-queueing U+{:04X}",
                job.code_point
            );
            self.workers[index].alive = false;
            overflow.push_front(job);
        }
    }

    fn live_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.alive).count()
    }

    fn generate_inline(
        &mut self,
        code_points: &[u32],
        font_size: u32,
        pixel_range: f32,
        kind: SdfKind,
    ) -> Vec<Option<SdfBitmap>> {
        if self.local.is_none() {
            let mut oracle = (self.factory)();
            oracle.load_font(&self.font);
            self.local = Some(oracle);
        }
        let mut out = Vec::with_capacity(code_points.len());
        if let Some(oracle) = self.local.as_mut() {
            for &code_point in code_points {
                out.push(match kind {
                    SdfKind::Msdf => oracle.generate_msdf(code_point, font_size, pixel_range),
                    SdfKind::Mtsdf => oracle.generate_mtsdf(code_point, font_size, pixel_range),
                });
            }
        }
        out
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_workers() {
        let config = PoolConfig::default();
        assert!(config.num_workers > 0);
        assert!(!config.workers_only);
    }

    #[test]
    fn test_workers_only_requires_workers() {
        let config = PoolConfig {
            num_workers: 0,
            workers_only: true,
        };
        let factory: OracleFactory =
            Arc::new(|| -> Box<dyn SdfOracle> { unreachable!("factory must not run") });
        let result = WorkerPool::spawn(config, factory, Arc::new(Vec::new()));
        assert!(matches!(result.err(), Some(PoolError::Config(_))));
    }
}
