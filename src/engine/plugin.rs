use bevy::prelude::*;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::HeatmapMetrics;
use crate::coverage::Raster;
use crate::engine::{EngineConfig, HeatmapEngine};
use crate::render::create_heatmap_image;
use crate::scene::SceneState;

/// The texture currently shown for the heatmap.
#[derive(Resource, Default)]
pub struct HeatmapImage {
    pub handle: Option<Handle<Image>>,
    pub raster: Option<Arc<Raster>>,
}

#[derive(Default)]
pub struct HeatmapPlugin {
    pub config: EngineConfig,
}

impl Plugin for HeatmapPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(HeatmapEngine::new(self.config.clone()))
            .init_resource::<HeatmapImage>()
            .init_resource::<HeatmapMetrics>()
            .add_systems(Update, (invalidate_on_scene_change, tick_heatmap_engine).chain());
    }
}

fn invalidate_on_scene_change(scene: Option<Res<SceneState>>, mut engine: ResMut<HeatmapEngine>) {
    let Some(scene) = scene else {
        return;
    };
    if engine.scene_generation() == Some(scene.generation()) {
        return;
    }
    if let Err(err) = engine.invalidate(scene.snapshot(), Instant::now()) {
        warn!("Heatmap request rejected: {}", err);
    }
}

fn tick_heatmap_engine(
    mut engine: ResMut<HeatmapEngine>,
    mut images: ResMut<Assets<Image>>,
    mut heatmap: ResMut<HeatmapImage>,
    mut metrics: ResMut<HeatmapMetrics>,
) {
    if let Some(raster) = engine.tick(Instant::now()) {
        // Strong handles: the previous texture is freed once the sprite lets go of it.
        heatmap.handle = Some(images.add(create_heatmap_image(&raster)));
        heatmap.raster = Some(raster);
    }
    if *metrics != *engine.metrics() {
        *metrics = engine.metrics().clone();
    }
}
