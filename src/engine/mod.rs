//! Grid evaluator: schedules low then high resolution rasters for the current
//! scene snapshot, discards superseded results and owns the raster cache.

pub mod executor;
pub mod plugin;

use bevy::log::{debug, warn};
use bevy::prelude::Resource;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{HeatmapCache, HeatmapKey, HeatmapMetrics};
use crate::coverage::{GridSpec, Raster, ResolutionTier};
use crate::scene::SceneSnapshot;
use executor::{ChunkedExecutor, ExecutorKind, HeatmapExecutor, HeatmapJob, probe};

pub use plugin::{HeatmapImage, HeatmapPlugin};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HeatmapError {
    #[error("invalid scene extent {0} x {1}")]
    InvalidExtent(f64, f64),
    #[error("invalid cell size {0}")]
    InvalidCellSize(f64),
    #[error("no scene snapshot to evaluate")]
    NoScene,
    #[error("heatmap worker panicked: {0}")]
    WorkerPanicked(String),
    #[error("no parallel worker available")]
    WorkerUnavailable,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_cell_m: f64,
    pub low_multiplier: f64,
    pub high_multiplier: f64,
    pub rows_per_chunk: usize,
    pub tick_budget: Duration,
    /// Delay between a low-res delivery and the high-res request
    pub refine_grace: Duration,
    pub cache_capacity: usize,
    pub prefer_worker: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_cell_m: 0.2,
            low_multiplier: 1.0,
            high_multiplier: 1.5,
            rows_per_chunk: 50,
            tick_budget: Duration::from_millis(8),
            refine_grace: Duration::from_millis(50),
            cache_capacity: 8,
            prefer_worker: true,
        }
    }
}

impl EngineConfig {
    pub fn multiplier(&self, tier: ResolutionTier) -> f64 {
        match tier {
            ResolutionTier::Low => self.low_multiplier,
            ResolutionTier::High => self.high_multiplier,
        }
    }

    pub fn grid_for(&self, scene: &SceneSnapshot, tier: ResolutionTier) -> Result<GridSpec, HeatmapError> {
        GridSpec::new(scene.width_m, scene.height_m, self.base_cell_m, self.multiplier(tier))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatmapState {
    Idle,
    Scheduled(ResolutionTier),
    LowResComplete,
    HighResComplete,
    Cancelled,
}

/// Identifies one grid request; results carrying any other token are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken {
    pub generation: u64,
    pub tier: ResolutionTier,
    pub seq: u64,
}

struct InFlight {
    job: HeatmapJob,
    started: Instant,
    on_fallback: bool,
}

#[derive(Resource)]
pub struct HeatmapEngine {
    config: EngineConfig,
    primary: Box<dyn HeatmapExecutor>,
    fallback: ChunkedExecutor,
    worker_failed: bool,
    interaction_locked: bool,
    state: HeatmapState,
    scene: Option<Arc<SceneSnapshot>>,
    in_flight: Option<InFlight>,
    refine_at: Option<Instant>,
    cache: HeatmapCache,
    metrics: HeatmapMetrics,
    seq: u64,
    delivered: Option<RequestToken>,
}

impl HeatmapEngine {
    pub fn new(config: EngineConfig) -> Self {
        let primary = probe(config.prefer_worker, config.rows_per_chunk);
        Self::with_executor(config, primary)
    }

    pub fn with_executor(config: EngineConfig, primary: Box<dyn HeatmapExecutor>) -> Self {
        Self {
            fallback: ChunkedExecutor::new(config.rows_per_chunk),
            cache: HeatmapCache::new(config.cache_capacity),
            config,
            primary,
            worker_failed: false,
            interaction_locked: false,
            state: HeatmapState::Idle,
            scene: None,
            in_flight: None,
            refine_at: None,
            metrics: HeatmapMetrics::default(),
            seq: 0,
            delivered: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> HeatmapState {
        self.state
    }

    pub fn metrics(&self) -> &HeatmapMetrics {
        &self.metrics
    }

    pub fn scene_generation(&self) -> Option<u64> {
        self.scene.as_ref().map(|s| s.generation)
    }

    /// Token of the most recently delivered raster.
    pub fn delivered(&self) -> Option<RequestToken> {
        self.delivered
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Newest completed raster, preferring the high tier.
    pub fn latest(&self) -> Option<Arc<Raster>> {
        self.cache.latest()
    }

    pub fn active_executor(&self) -> ExecutorKind {
        self.executor_kind(self.uses_fallback())
    }

    fn executor_kind(&self, fallback: bool) -> ExecutorKind {
        if fallback { self.fallback.kind() } else { self.primary.kind() }
    }

    fn uses_fallback(&self) -> bool {
        self.worker_failed || (self.interaction_locked && self.primary.kind() == ExecutorKind::Worker)
    }

    /// While locked (e.g. an AP drag), requests go to the chunked strategy.
    pub fn set_interaction_lock(&mut self, locked: bool) {
        self.interaction_locked = locked;
    }

    /// The scene changed: drop outstanding work and start over at low resolution.
    pub fn invalidate(&mut self, scene: Arc<SceneSnapshot>, now: Instant) -> Result<RequestToken, HeatmapError> {
        self.cancel();
        self.scene = Some(scene);
        self.request_grid(ResolutionTier::Low, now)
    }

    /// Cancels the pending request and any scheduled refinement.
    pub fn cancel(&mut self) {
        self.primary.cancel();
        self.fallback.cancel();
        self.refine_at = None;
        if self.in_flight.take().is_some() || self.state == HeatmapState::LowResComplete {
            self.state = HeatmapState::Cancelled;
        }
    }

    pub fn request_grid(&mut self, tier: ResolutionTier, now: Instant) -> Result<RequestToken, HeatmapError> {
        let scene = self.scene.clone().ok_or(HeatmapError::NoScene)?;
        let spec = self.config.grid_for(&scene, tier)?;

        self.primary.cancel();
        self.fallback.cancel();
        self.in_flight = None;
        self.refine_at = None;

        self.seq += 1;
        let token = RequestToken {
            generation: scene.generation,
            tier,
            seq: self.seq,
        };

        let key = HeatmapKey {
            generation: scene.generation,
            tier,
        };
        if let Some(raster) = self.cache.get(&key) {
            self.metrics.cache_hits += 1;
            debug!("Heatmap cache hit for generation {} {:?}", token.generation, tier);
            self.deliver(token, raster, now);
            return Ok(token);
        }

        let job = HeatmapJob { token, scene, spec };
        let on_fallback = self.uses_fallback();
        self.submit(job, on_fallback, now);
        self.state = HeatmapState::Scheduled(tier);
        Ok(token)
    }

    fn submit(&mut self, job: HeatmapJob, on_fallback: bool, now: Instant) {
        debug!(
            "Scheduling {:?} heatmap ({}x{}) for generation {} on {:?}",
            job.token.tier,
            job.spec.cols,
            job.spec.rows,
            job.token.generation,
            self.executor_kind(on_fallback)
        );
        if on_fallback {
            self.fallback.submit(job.clone());
        } else {
            self.primary.submit(job.clone());
        }
        self.in_flight = Some(InFlight {
            job,
            started: now,
            on_fallback,
        });
    }

    /// One scheduling tick. Returns a raster when one was delivered.
    pub fn tick(&mut self, now: Instant) -> Option<Arc<Raster>> {
        if self.in_flight.is_none() && self.refine_at.is_some_and(|at| now >= at) {
            self.refine_at = None;
            if let Err(err) = self.request_grid(ResolutionTier::High, now) {
                warn!("Heatmap refinement not scheduled: {}", err);
            }
            // A cache hit delivers synchronously.
            if self.in_flight.is_none() {
                return self.latest().filter(|r| r.tier == ResolutionTier::High);
            }
        }

        let on_fallback = self.in_flight.as_ref()?.on_fallback;
        let budget = self.config.tick_budget;
        let (token, result) = if on_fallback {
            self.fallback.poll(budget)?
        } else {
            self.primary.poll(budget)?
        };

        let current = self.in_flight.as_ref().map(|f| f.job.token);
        if current != Some(token) {
            self.metrics.stale_discarded += 1;
            debug!("Discarding stale heatmap result {:?} (current {:?})", token, current);
            return None;
        }

        match result {
            Ok(raster) => {
                let elapsed = self
                    .in_flight
                    .take()
                    .map(|f| now.saturating_duration_since(f.started))
                    .unwrap_or_default();
                self.metrics.rasters_computed += 1;
                self.metrics.last_compute_time_ms = elapsed.as_millis() as u64;
                let raster = Arc::new(raster);
                if !self.cache.insert(raster.clone()) {
                    self.metrics.stale_discarded += 1;
                    debug!("Heatmap for superseded generation {} not cached", raster.generation);
                    return None;
                }
                debug!(
                    "Heatmap {:?} for generation {} ready in {:?}",
                    token.tier, token.generation, elapsed
                );
                self.deliver(token, raster.clone(), now);
                Some(raster)
            }
            Err(err) => {
                self.metrics.worker_failures += 1;
                warn!("Heatmap worker failed ({}); falling back to chunked computation", err);
                self.worker_failed = true;
                let job = self.in_flight.take().map(|f| f.job)?;
                self.submit(job, true, now);
                None
            }
        }
    }

    fn deliver(&mut self, token: RequestToken, raster: Arc<Raster>, now: Instant) {
        self.delivered = Some(token);
        match raster.tier {
            ResolutionTier::Low => {
                self.state = HeatmapState::LowResComplete;
                self.refine_at = Some(now + self.config.refine_grace);
            }
            ResolutionTier::High => {
                self.state = HeatmapState::HighResComplete;
                self.refine_at = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::AccessPoint;
    use crate::scene::SceneState;

    fn config() -> EngineConfig {
        EngineConfig {
            base_cell_m: 1.0,
            rows_per_chunk: 4,
            tick_budget: Duration::ZERO,
            prefer_worker: false,
            ..Default::default()
        }
    }

    fn scene() -> SceneState {
        let mut scene = SceneState::new(24.0, 16.0).unwrap();
        scene.add_ap(AccessPoint::new("A", 4.0, 8.0, 20.0, 1)).unwrap();
        scene.add_ap(AccessPoint::new("B", 20.0, 8.0, 18.0, 1)).unwrap();
        scene
    }

    fn run_until_delivery(engine: &mut HeatmapEngine, now: Instant) -> Arc<Raster> {
        for _ in 0..1000 {
            if let Some(raster) = engine.tick(now) {
                return raster;
            }
        }
        panic!("no raster delivered");
    }

    /// Fails every job, as a crashed worker would.
    struct FailingWorker {
        token: Option<RequestToken>,
    }

    impl HeatmapExecutor for FailingWorker {
        fn kind(&self) -> ExecutorKind {
            ExecutorKind::Worker
        }
        fn submit(&mut self, job: HeatmapJob) {
            self.token = Some(job.token);
        }
        fn poll(&mut self, _budget: Duration) -> Option<executor::JobOutcome> {
            let token = self.token.take()?;
            Some((token, Err(HeatmapError::WorkerPanicked("boom".into()))))
        }
        fn cancel(&mut self) {
            self.token = None;
        }
        fn is_busy(&self) -> bool {
            self.token.is_some()
        }
    }

    /// Answers every poll with a result for an outdated token.
    struct LaggingWorker {
        stale: RequestToken,
        job: Option<HeatmapJob>,
    }

    impl HeatmapExecutor for LaggingWorker {
        fn kind(&self) -> ExecutorKind {
            ExecutorKind::Worker
        }
        fn submit(&mut self, job: HeatmapJob) {
            self.job = Some(job);
        }
        fn poll(&mut self, _budget: Duration) -> Option<executor::JobOutcome> {
            let job = self.job.as_ref()?;
            let raster = crate::coverage::compute_raster(job.scene.clone(), self.stale.tier, job.spec);
            Some((self.stale, Ok(raster)))
        }
        fn cancel(&mut self) {
            self.job = None;
        }
        fn is_busy(&self) -> bool {
            self.job.is_some()
        }
    }

    #[test]
    fn low_then_high_after_grace() {
        let mut engine = HeatmapEngine::new(config());
        assert_eq!(engine.active_executor(), ExecutorKind::Chunked);
        let scene = scene();
        let t0 = Instant::now();
        let token = engine.invalidate(scene.snapshot(), t0).unwrap();
        assert_eq!(token.tier, ResolutionTier::Low);
        assert_eq!(engine.state(), HeatmapState::Scheduled(ResolutionTier::Low));

        let low = run_until_delivery(&mut engine, t0);
        assert_eq!(low.tier, ResolutionTier::Low);
        assert_eq!((low.spec.cols, low.spec.rows), (24, 16));
        assert_eq!(engine.state(), HeatmapState::LowResComplete);

        // Grace period not over yet
        assert!(engine.tick(t0 + Duration::from_millis(10)).is_none());
        assert!(!engine.is_busy());

        let t1 = t0 + Duration::from_millis(60);
        let high = run_until_delivery(&mut engine, t1);
        assert_eq!(high.tier, ResolutionTier::High);
        assert_eq!((high.spec.cols, high.spec.rows), (36, 24));
        assert_eq!(engine.state(), HeatmapState::HighResComplete);
        assert_eq!(engine.metrics().rasters_computed, 2);
        assert_eq!(engine.latest().map(|r| r.tier), Some(ResolutionTier::High));
    }

    #[test]
    fn new_generation_cancels_pending_work() {
        let mut engine = HeatmapEngine::new(config());
        let mut scene = scene();
        let now = Instant::now();
        let first = engine.invalidate(scene.snapshot(), now).unwrap();
        engine.tick(now);
        assert!(engine.is_busy());

        scene.move_ap("A", crate::geo::Point2::new(6.0, 8.0)).unwrap();
        let second = engine.invalidate(scene.snapshot(), now).unwrap();
        assert!(second.generation > first.generation);

        let raster = run_until_delivery(&mut engine, now);
        assert_eq!(raster.generation, second.generation);
        assert_eq!(engine.delivered(), Some(second));
    }

    #[test]
    fn cancel_marks_state_and_drops_refinement() {
        let mut engine = HeatmapEngine::new(config());
        let now = Instant::now();
        engine.invalidate(scene().snapshot(), now).unwrap();
        engine.cancel();
        assert_eq!(engine.state(), HeatmapState::Cancelled);
        assert!(engine.tick(now + Duration::from_secs(1)).is_none());
        assert!(engine.latest().is_none());
    }

    #[test]
    fn repeated_request_hits_cache() {
        let mut engine = HeatmapEngine::new(config());
        let now = Instant::now();
        let snapshot = scene().snapshot();
        engine.invalidate(snapshot.clone(), now).unwrap();
        run_until_delivery(&mut engine, now);

        engine.invalidate(snapshot, now).unwrap();
        assert_eq!(engine.metrics().cache_hits, 1);
        assert_eq!(engine.state(), HeatmapState::LowResComplete);
        assert!(!engine.is_busy());
    }

    #[test]
    fn worker_failure_falls_back_to_chunked() {
        let mut engine = HeatmapEngine::with_executor(config(), Box::new(FailingWorker { token: None }));
        assert_eq!(engine.active_executor(), ExecutorKind::Worker);
        let now = Instant::now();
        let token = engine.invalidate(scene().snapshot(), now).unwrap();

        let raster = run_until_delivery(&mut engine, now);
        assert_eq!(raster.generation, token.generation);
        assert_eq!(engine.metrics().worker_failures, 1);
        assert_eq!(engine.active_executor(), ExecutorKind::Chunked);
    }

    #[test]
    fn stale_results_are_discarded() {
        let stale = RequestToken {
            generation: 0,
            tier: ResolutionTier::Low,
            seq: 0,
        };
        let mut engine = HeatmapEngine::with_executor(config(), Box::new(LaggingWorker { stale, job: None }));
        let now = Instant::now();
        engine.invalidate(scene().snapshot(), now).unwrap();
        for _ in 0..3 {
            assert!(engine.tick(now).is_none());
        }
        assert_eq!(engine.metrics().stale_discarded, 3);
        assert!(engine.latest().is_none());
        assert!(engine.is_busy());
    }

    #[test]
    fn interaction_lock_routes_to_chunked() {
        let mut engine = HeatmapEngine::with_executor(config(), Box::new(FailingWorker { token: None }));
        engine.set_interaction_lock(true);
        assert_eq!(engine.active_executor(), ExecutorKind::Chunked);
        let now = Instant::now();
        engine.invalidate(scene().snapshot(), now).unwrap();
        run_until_delivery(&mut engine, now);
        assert_eq!(engine.metrics().worker_failures, 0);
    }

    #[test]
    fn request_without_scene_fails() {
        let mut engine = HeatmapEngine::new(config());
        assert_eq!(engine.request_grid(ResolutionTier::Low, Instant::now()), Err(HeatmapError::NoScene));
    }
}
