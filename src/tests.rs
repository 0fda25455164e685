use std::time::Instant;

use crate::coverage::{GridSpec, ResolutionTier};
use crate::engine::{EngineConfig, HeatmapEngine, HeatmapState};
use crate::geo::Point2;
use crate::io::{AccessPoint, GroundPlaneConfig, Wall};
use crate::metrics::{NO_INTERFERENCE_DBM, RadioMetrics, throughput};
use crate::physics::params::PropagationParams;
use crate::physics::path_loss::{Obstructions, free_space_loss, path_loss, wall_loss};
use crate::physics::pattern::{PatternSample, interpolate_gain};
use crate::scene::SceneState;

fn open_scene() -> SceneState {
    let mut scene = SceneState::new(60.0, 20.0).unwrap();
    scene.add_ap(AccessPoint::new("AP1", 2.0, 10.0, 20.0, 1)).unwrap();
    scene
}

#[test]
fn test_rssi_non_increasing_with_distance() {
    let snap = open_scene().snapshot();
    let radio = RadioMetrics::new(&snap);
    let mut last = f64::INFINITY;
    for step in 0..50 {
        let p = Point2::new(2.0 + step as f64, 10.0);
        let level = radio.rssi_from(0, p);
        assert!(level <= last, "rssi rose at {:?}: {} > {}", p, level, last);
        last = level;
    }
}

#[test]
fn test_free_space_reference() {
    let expected = 20.0 * 2400f64.log10() - 27.55;
    assert!((free_space_loss(2400.0, 1.0) - expected).abs() < 1e-12);
    assert!((free_space_loss(2400.0, 1.0) - 40.04).abs() < 0.01);
}

#[test]
fn test_min_distance_clamp() {
    let ground = GroundPlaneConfig::default();
    let obs = Obstructions { walls: &[], floor_planes: &[], ground: &ground };
    let params = PropagationParams::default();
    let tx = Point2::new(0.0, 0.0);
    assert_eq!(
        path_loss(tx, Point2::new(0.1, 0.0), &obs, &params),
        path_loss(tx, Point2::new(0.5, 0.0), &obs, &params)
    );
    assert_eq!(
        path_loss(tx, Point2::new(0.0, 0.0), &obs, &params),
        path_loss(tx, Point2::new(0.0, 0.3), &obs, &params)
    );
}

#[test]
fn test_cci_without_interferers() {
    let mut scene = open_scene();
    scene.add_ap(AccessPoint::new("AP2", 50.0, 10.0, 20.0, 11)).unwrap();
    let snap = scene.snapshot();
    assert_eq!(RadioMetrics::new(&snap).cci(Point2::new(20.0, 10.0), 0), NO_INTERFERENCE_DBM);
}

#[test]
fn test_throughput_table() {
    assert_eq!(throughput(-10.0), 0.0);
    assert_eq!(throughput(25.0), 72.2);
    assert_eq!(throughput(100.0), 72.2);
    assert_eq!(throughput(12.0), 26.0);
}

#[test]
fn test_pattern_wrap_is_continuous() {
    let samples = [
        PatternSample { angle_deg: 10.0, gain_db: -1.0 },
        PatternSample { angle_deg: 180.0, gain_db: -20.0 },
        PatternSample { angle_deg: 350.0, gain_db: -3.0 },
    ];
    assert_eq!(interpolate_gain(&samples, 180.0), -20.0);
    let before = interpolate_gain(&samples, 359.999);
    let after = interpolate_gain(&samples, 0.001);
    assert!((before - after).abs() < 1e-3);
    assert!((interpolate_gain(&samples, 0.0) - -2.0).abs() < 1e-9);
}

#[test]
fn test_grid_spans_scene() {
    for (w, h) in [(30.0, 20.0), (7.3, 2.9), (123.4, 56.7)] {
        for multiplier in [1.0, 1.5] {
            let spec = GridSpec::new(w, h, 0.2, multiplier).unwrap();
            assert!((spec.dx * spec.cols as f64 - w).abs() < 1e-9);
            assert!((spec.dy * spec.rows as f64 - h).abs() < 1e-9);
        }
    }
}

#[test]
fn test_two_walls_add_independent_of_order() {
    let a = Wall::segment("a", Point2::new(3.0, -1.0), Point2::new(3.0, 1.0), 3.0);
    let b = Wall::segment("b", Point2::new(6.0, -1.0), Point2::new(6.0, 1.0), 3.0);
    let tx = Point2::new(0.0, 0.0);
    let rx = Point2::new(10.0, 0.0);
    assert_eq!(wall_loss(tx, rx, &[a.clone(), b.clone()]), 6.0);
    assert_eq!(wall_loss(tx, rx, &[b, a]), 6.0);
    assert_eq!(wall_loss(rx, tx, &[]), 0.0);
}

#[test]
fn test_scene_edit_prevents_raster_reuse() {
    let config = EngineConfig {
        base_cell_m: 1.0,
        prefer_worker: false,
        ..Default::default()
    };
    let mut engine = HeatmapEngine::new(config);
    let mut scene = open_scene();
    let now = Instant::now();

    let first = engine.invalidate(scene.snapshot(), now).unwrap();
    while engine.tick(now).is_none() {}
    assert_eq!(engine.state(), HeatmapState::LowResComplete);

    scene.move_ap("AP1", Point2::new(30.0, 10.0)).unwrap();
    let second = engine.invalidate(scene.snapshot(), now).unwrap();
    assert_ne!(first.generation, second.generation);
    assert_eq!(engine.metrics().cache_hits, 0);
    assert_eq!(engine.state(), HeatmapState::Scheduled(ResolutionTier::Low));

    let raster = loop {
        if let Some(raster) = engine.tick(now) {
            break raster;
        }
    };
    assert_eq!(raster.generation, second.generation);
}
