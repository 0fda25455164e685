use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Distances in every loss formula are floored here.
pub const MIN_DISTANCE_M: f64 = 0.5;

/// Height of the receiver used for elevation angles.
pub const TARGET_HEIGHT_M: f64 = 1.5;

/// How horizontal and vertical pattern offsets are merged.
///
/// Both formulas agree until one plane drops below -100 dB, where the linear
/// variant clamps at 1e-10.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainCombination {
    #[default]
    ArithmeticMeanDb,
    GeometricMeanLinear,
}

/// Gain model for access points without an antenna pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnpatternedGain {
    /// Nominal gain in every direction.
    #[default]
    Isotropic,
    /// 60 degree main lobe, 12 dB at the beam edge, capped at 25 dB front/back.
    ParabolicLobe,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathLossModel {
    /// Reference FSPL at 1 m, distance exponent, walls, floors, ground, vertical factor.
    #[default]
    TwoPointFiveD,
    /// Free-space loss at the real distance plus ground and floor planes only.
    FreeSpace,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Resource)]
#[serde(default)]
pub struct PropagationParams {
    pub frequency_mhz: f64,
    /// Already includes the factor of 10: loss grows by `n * log10(d)`.
    pub path_loss_exponent: f64,
    pub vertical_factor_db: f64,
    pub shape_factor: f64,
    pub reference_offset_db: f64,
    pub noise_floor_dbm: f64,
    pub gain_combination: GainCombination,
    pub unpatterned_gain: UnpatternedGain,
    pub model: PathLossModel,
}

impl Default for PropagationParams {
    fn default() -> Self {
        Self {
            frequency_mhz: 2400.0,
            path_loss_exponent: 10.0,
            vertical_factor_db: 2.0,
            shape_factor: 3.0,
            reference_offset_db: 0.0,
            noise_floor_dbm: -92.0,
            gain_combination: GainCombination::default(),
            unpatterned_gain: UnpatternedGain::default(),
            model: PathLossModel::default(),
        }
    }
}
