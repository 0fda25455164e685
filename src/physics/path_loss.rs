use crate::geo::{Point2, line_intersects_quad, line_intersects_thick_wall, segments_intersect};
use crate::io::{FloorPlane, GroundPlaneConfig, Wall};
use crate::physics::params::{MIN_DISTANCE_M, PathLossModel, PropagationParams};

/// Distance beyond which ground loss reaches its base attenuation.
const GROUND_SATURATION_M: f64 = 10.0;

fn log10_floored(x: f64) -> f64 {
    x.max(1e-10).log10()
}

/// Free-space path loss in dB with `d` in meters.
pub fn free_space_loss(freq_mhz: f64, d: f64) -> f64 {
    20.0 * log10_floored(freq_mhz) + 20.0 * log10_floored(d.max(MIN_DISTANCE_M)) - 27.55
}

/// `d` is the already clamped path distance.
pub fn ground_loss(d: f64, ground: &GroundPlaneConfig) -> f64 {
    if !ground.enabled {
        return 0.0;
    }
    let factor = (d / GROUND_SATURATION_M).min(1.0);
    ground.attenuation_db * (0.7 + 0.3 * factor)
}

pub fn floor_loss(tx: Point2, rx: Point2, floor_planes: &[FloorPlane]) -> f64 {
    floor_planes
        .iter()
        .filter(|fp| line_intersects_quad(tx, rx, &fp.corners))
        .map(|fp| fp.attenuation_db)
        .sum()
}

/// The wall lies across the line of sight. Openings never do.
pub fn wall_blocks(tx: Point2, rx: Point2, wall: &Wall) -> bool {
    if wall.element.is_pass_through() {
        return false;
    }
    let thickness = wall.thickness_m.filter(|t| *t > 0.0);
    wall.segments().into_iter().any(|(a, b)| match thickness {
        Some(t) => line_intersects_thick_wall(tx, rx, a, b, t),
        None => segments_intersect(tx, rx, a, b),
    })
}

/// Each wall counts once, however many of its segments the path crosses.
pub fn wall_loss(tx: Point2, rx: Point2, walls: &[Wall]) -> f64 {
    walls
        .iter()
        .filter(|w| wall_blocks(tx, rx, w))
        .map(Wall::effective_loss_db)
        .sum()
}

/// Obstructions seen by a single transmitter/receiver pair.
pub struct Obstructions<'a> {
    pub walls: &'a [Wall],
    pub floor_planes: &'a [FloorPlane],
    pub ground: &'a GroundPlaneConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LossBreakdown {
    pub distance_m: f64,
    pub base_db: f64,
    pub walls_db: f64,
    pub ground_db: f64,
    pub floors_db: f64,
    pub vertical_db: f64,
}

impl LossBreakdown {
    pub fn total(&self) -> f64 {
        self.base_db + self.walls_db + self.ground_db + self.floors_db + self.vertical_db
    }
}

pub fn path_loss_breakdown(
    tx: Point2,
    rx: Point2,
    obstructions: &Obstructions<'_>,
    params: &PropagationParams,
) -> LossBreakdown {
    let d = tx.distance(rx).max(MIN_DISTANCE_M);
    let ground_db = ground_loss(d, obstructions.ground);
    let floors_db = floor_loss(tx, rx, obstructions.floor_planes);

    match params.model {
        PathLossModel::TwoPointFiveD => LossBreakdown {
            distance_m: d,
            base_db: free_space_loss(params.frequency_mhz, 1.0) + params.path_loss_exponent * log10_floored(d),
            walls_db: wall_loss(tx, rx, obstructions.walls),
            ground_db,
            floors_db,
            vertical_db: params.vertical_factor_db,
        },
        PathLossModel::FreeSpace => LossBreakdown {
            distance_m: d,
            base_db: free_space_loss(params.frequency_mhz, d),
            ground_db,
            floors_db,
            ..Default::default()
        },
    }
}

pub fn path_loss(tx: Point2, rx: Point2, obstructions: &Obstructions<'_>, params: &PropagationParams) -> f64 {
    path_loss_breakdown(tx, rx, obstructions, params).total()
}

pub fn rssi(tx_dbm: f64, gain_db: f64, loss_db: f64, reference_offset_db: f64) -> f64 {
    tx_dbm + gain_db - loss_db - reference_offset_db
}
