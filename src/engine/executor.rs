//! Execution strategies for raster jobs.
//!
//! Both run the same [`RasterBuilder`]; the worker does it in one go on the
//! async compute pool, the chunked strategy a bounded number of rows per tick
//! on the calling thread.

use bevy::log::{debug, info};
use bevy::tasks::{AsyncComputeTaskPool, Task};
use futures_lite::future;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::coverage::{GridSpec, Raster, RasterBuilder, compute_raster};
use crate::engine::{HeatmapError, RequestToken};
use crate::scene::SceneSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    Worker,
    Chunked,
}

/// Everything a stateless executor needs to produce one raster.
#[derive(Debug, Clone)]
pub struct HeatmapJob {
    pub token: RequestToken,
    pub scene: Arc<SceneSnapshot>,
    pub spec: GridSpec,
}

pub type JobOutcome = (RequestToken, Result<Raster, HeatmapError>);

pub trait HeatmapExecutor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// Starts `job`, dropping whatever was in flight.
    fn submit(&mut self, job: HeatmapJob);

    /// Advances the current job for at most roughly `budget`.
    fn poll(&mut self, budget: Duration) -> Option<JobOutcome>;

    fn cancel(&mut self);

    fn is_busy(&self) -> bool;
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs jobs on bevy's async compute pool.
pub struct WorkerExecutor {
    pool: &'static AsyncComputeTaskPool,
    running: Option<(RequestToken, Task<Result<Raster, HeatmapError>>)>,
}

impl WorkerExecutor {
    pub fn probe() -> Result<Self, HeatmapError> {
        AsyncComputeTaskPool::try_get()
            .map(|pool| Self { pool, running: None })
            .ok_or(HeatmapError::WorkerUnavailable)
    }
}

impl HeatmapExecutor for WorkerExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Worker
    }

    fn submit(&mut self, job: HeatmapJob) {
        let HeatmapJob { token, scene, spec } = job;
        let task = self.pool.spawn(async move {
            catch_unwind(AssertUnwindSafe(|| compute_raster(scene, token.tier, spec)))
                .map_err(|payload| HeatmapError::WorkerPanicked(panic_message(payload)))
        });
        // Dropping the previous task cancels it.
        self.running = Some((token, task));
    }

    fn poll(&mut self, _budget: Duration) -> Option<JobOutcome> {
        let (token, task) = self.running.as_mut()?;
        let result = future::block_on(future::poll_once(task))?;
        let token = *token;
        self.running = None;
        Some((token, result))
    }

    fn cancel(&mut self) {
        self.running = None;
    }

    fn is_busy(&self) -> bool {
        self.running.is_some()
    }
}

/// Same-thread fallback: rows in fixed batches, yielding between ticks.
pub struct ChunkedExecutor {
    rows_per_chunk: usize,
    running: Option<(RequestToken, RasterBuilder)>,
}

impl ChunkedExecutor {
    pub fn new(rows_per_chunk: usize) -> Self {
        Self {
            rows_per_chunk: rows_per_chunk.max(1),
            running: None,
        }
    }

    /// Rows finished of the current job.
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.running
            .as_ref()
            .map(|(_, builder)| (builder.rows_done(), builder.spec().rows))
    }
}

impl HeatmapExecutor for ChunkedExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Chunked
    }

    fn submit(&mut self, job: HeatmapJob) {
        let builder = RasterBuilder::new(job.scene, job.token.tier, job.spec);
        self.running = Some((job.token, builder));
    }

    fn poll(&mut self, budget: Duration) -> Option<JobOutcome> {
        let (_, builder) = self.running.as_mut()?;
        let started = Instant::now();
        // At least one chunk per tick, more while under budget.
        while !builder.fill_rows(self.rows_per_chunk) {
            if started.elapsed() >= budget {
                return None;
            }
        }
        let (token, builder) = self.running.take()?;
        Some((token, Ok(builder.finish())))
    }

    fn cancel(&mut self) {
        self.running = None;
    }

    fn is_busy(&self) -> bool {
        self.running.is_some()
    }
}

/// Picks the preferred strategy once: the worker pool if it exists.
pub fn probe(prefer_worker: bool, rows_per_chunk: usize) -> Box<dyn HeatmapExecutor> {
    if prefer_worker {
        match WorkerExecutor::probe() {
            Ok(worker) => {
                info!("Heatmap engine using async compute worker");
                return Box::new(worker);
            }
            Err(err) => debug!("Heatmap worker probe failed: {}", err),
        }
    }
    info!("Heatmap engine using chunked computation ({} rows per chunk)", rows_per_chunk);
    Box::new(ChunkedExecutor::new(rows_per_chunk))
}
