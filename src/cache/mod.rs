use bevy::prelude::*;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::coverage::{Raster, ResolutionTier};

#[derive(Hash, PartialEq, Eq, Clone, Copy, Debug)]
pub struct HeatmapKey {
    pub generation: u64,
    pub tier: ResolutionTier,
}

impl HeatmapKey {
    pub fn of(raster: &Raster) -> Self {
        Self {
            generation: raster.generation,
            tier: raster.tier,
        }
    }
}

#[derive(Resource, Default, Debug, Clone, PartialEq)]
pub struct HeatmapMetrics {
    pub rasters_computed: u32,
    pub cache_hits: u32,
    pub stale_discarded: u32,
    pub worker_failures: u32,
    pub last_compute_time_ms: u64,
}

/// Completed rasters by (generation, tier).
pub struct HeatmapCache {
    cache: LruCache<HeatmapKey, Arc<Raster>>,
    newest_generation: Option<u64>,
}

impl Default for HeatmapCache {
    fn default() -> Self {
        Self::new(8)
    }
}

impl HeatmapCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            newest_generation: None,
        }
    }

    pub fn get(&mut self, key: &HeatmapKey) -> Option<Arc<Raster>> {
        self.cache.get(key).cloned()
    }

    /// Refuses rasters older than the newest generation already stored.
    pub fn insert(&mut self, raster: Arc<Raster>) -> bool {
        if self.newest_generation.is_some_and(|g| raster.generation < g) {
            return false;
        }
        self.newest_generation = Some(raster.generation);
        self.cache.put(HeatmapKey::of(&raster), raster);
        true
    }

    /// Best raster of the newest generation: high tier if present.
    pub fn latest(&self) -> Option<Arc<Raster>> {
        let generation = self.newest_generation?;
        [ResolutionTier::High, ResolutionTier::Low]
            .into_iter()
            .find_map(|tier| self.cache.peek(&HeatmapKey { generation, tier }).cloned())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.newest_generation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{GridSpec, HeatmapView};

    fn raster(generation: u64, tier: ResolutionTier) -> Arc<Raster> {
        let spec = GridSpec::new(20.0, 14.0, 1.0, 1.0).unwrap();
        Arc::new(Raster {
            generation,
            tier,
            view: HeatmapView::Rssi,
            spec,
            values: vec![0.0; spec.len()],
            pixels: vec![0; spec.len() * 4],
        })
    }

    #[test]
    fn older_generation_never_overwrites() {
        let mut cache = HeatmapCache::new(4);
        assert!(cache.insert(raster(3, ResolutionTier::Low)));
        assert!(!cache.insert(raster(2, ResolutionTier::High)));
        assert_eq!(cache.latest().map(|r| r.generation), Some(3));
        assert!(cache.get(&HeatmapKey { generation: 2, tier: ResolutionTier::High }).is_none());
    }

    #[test]
    fn latest_prefers_high_tier() {
        let mut cache = HeatmapCache::new(4);
        cache.insert(raster(1, ResolutionTier::Low));
        assert_eq!(cache.latest().map(|r| r.tier), Some(ResolutionTier::Low));
        cache.insert(raster(1, ResolutionTier::High));
        assert_eq!(cache.latest().map(|r| r.tier), Some(ResolutionTier::High));
        cache.insert(raster(2, ResolutionTier::Low));
        assert_eq!(cache.latest().map(|r| (r.generation, r.tier)), Some((2, ResolutionTier::Low)));
    }

    #[test]
    fn capacity_evicts_least_recent() {
        let mut cache = HeatmapCache::new(2);
        for g in 1..=3 {
            cache.insert(raster(g, ResolutionTier::Low));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&HeatmapKey { generation: 1, tier: ResolutionTier::Low }).is_none());
    }
}
