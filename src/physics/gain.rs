use std::f64::consts::PI;

use crate::geo::Point2;
use crate::io::AccessPoint;
use crate::physics::params::{PropagationParams, TARGET_HEIGHT_M, UnpatternedGain};
use crate::physics::pattern::AntennaPattern;

const LOBE_BEAMWIDTH_RAD: f64 = 60.0 * PI / 180.0;
const LOBE_EDGE_ATTENUATION_DB: f64 = 12.0;
const LOBE_FRONT_TO_BACK_DB: f64 = 25.0;

/// Horizontal offset of `rx` from the AP boresight, radians (not normalized).
///
/// Azimuth 0 points up the plan (-y). The bearing is measured in plan
/// coordinates, hence the 90 degree axis correction.
fn horizontal_offset_rad(ap: &AccessPoint, rx: Point2) -> f64 {
    let bearing = (rx.y - ap.y).atan2(rx.x - ap.x);
    let boresight = (-ap.azimuth_deg - 90.0).to_radians();
    bearing - boresight
}

/// Elevation of the receiver relative to boresight, clamped to [-90, 90].
fn elevation_deg(ap: &AccessPoint, horizontal_dist: f64) -> f64 {
    let from_horizon = (ap.z - TARGET_HEIGHT_M).atan2(horizontal_dist);
    (from_horizon - ap.tilt_deg.to_radians()).to_degrees().clamp(-90.0, 90.0)
}

pub fn angle_dependent_gain(
    ap: &AccessPoint,
    rx: Point2,
    pattern: Option<&AntennaPattern>,
    params: &PropagationParams,
) -> f64 {
    if ap.x == rx.x && ap.y == rx.y {
        return ap.gain_dbi;
    }

    let offset = horizontal_offset_rad(ap, rx);

    match pattern {
        Some(pattern) if !pattern.horizontal.is_empty() => {
            let h_angle = offset.to_degrees().rem_euclid(360.0);
            let horizontal_dist = ap.position().distance(rx);
            let elevation = if horizontal_dist > 0.1 && !pattern.vertical.is_empty() {
                elevation_deg(ap, horizontal_dist)
            } else {
                0.0
            };

            let db_down = pattern.gain_from_pattern(h_angle, elevation, params.gain_combination);
            pattern.peak_gain_dbi.unwrap_or(ap.gain_dbi) + db_down * params.shape_factor
        }
        _ => match params.unpatterned_gain {
            UnpatternedGain::Isotropic => ap.gain_dbi,
            UnpatternedGain::ParabolicLobe => ap.gain_dbi + parabolic_lobe_db(offset + PI),
        },
    }
}

/// Main-lobe approximation for APs without a pattern file.
fn parabolic_lobe_db(offset_rad: f64) -> f64 {
    let mut diff = offset_rad.rem_euclid(2.0 * PI);
    if diff > PI {
        diff -= 2.0 * PI;
    }
    let attenuation = LOBE_EDGE_ATTENUATION_DB * (diff / LOBE_BEAMWIDTH_RAD).powi(2);
    -attenuation.min(LOBE_FRONT_TO_BACK_DB)
}
