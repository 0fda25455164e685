use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::physics::params::GainCombination;

/// dBd -> dBi
const DIPOLE_GAIN_DB: f64 = 2.15;

/// Elevations closer to boresight than this skip the vertical table.
const MIN_ELEVATION_DEG: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternSample {
    pub angle_deg: f64,
    /// Signed offset from peak gain, dB (<= 0 for well-formed files)
    pub gain_db: f64,
}

/// One plane of a pattern: integer-degree lookup plus the sorted samples used
/// for interpolation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternTable {
    /// Raw file values keyed by rounded angle
    pub by_degree: BTreeMap<i32, f64>,
    pub samples: Vec<PatternSample>,
}

impl PatternTable {
    fn push(&mut self, angle_deg: f64, value: f64) {
        self.by_degree.insert(round_half_up(angle_deg), value);
        let gain_db = if value > 0.0 { -value } else { value };
        self.samples.push(PatternSample { angle_deg, gain_db });
    }

    fn finish(&mut self) {
        self.samples.sort_by(|a, b| a.angle_deg.total_cmp(&b.angle_deg));
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Linear interpolation with wrap-around past 360 degrees.
    pub fn interpolate(&self, angle_deg: f64) -> f64 {
        interpolate_gain(&self.samples, angle_deg)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AntennaPattern {
    pub name: String,
    pub frequency_mhz: f64,
    pub h_width_deg: f64,
    /// Peak gain in dBi. `None` when the file has no `GAIN` line.
    pub peak_gain_dbi: Option<f64>,
    pub horizontal: PatternTable,
    pub vertical: PatternTable,
}

#[derive(Clone, Copy)]
enum Section {
    Horizontal,
    Vertical,
}

impl AntennaPattern {
    /// Tolerant line-oriented parser: unknown directives and malformed data lines are skipped.
    pub fn parse(text: &str) -> Self {
        let mut pattern = AntennaPattern {
            h_width_deg: 360.0,
            ..Default::default()
        };
        let mut section: Option<Section> = None;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(rest) = line.strip_prefix("NAME ") {
                pattern.name = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("FREQUENCY ") {
                if let Some(freq) = leading_float(rest) {
                    pattern.frequency_mhz = freq;
                }
            } else if let Some(rest) = line.strip_prefix("H_WIDTH ") {
                if let Some(width) = leading_float(rest) {
                    pattern.h_width_deg = width;
                }
            } else if let Some(rest) = line.strip_prefix("GAIN ") {
                let rest = rest.trim();
                if let Some(gain) = leading_float(rest) {
                    pattern.peak_gain_dbi = Some(if is_dipole_unit(rest) { gain + DIPOLE_GAIN_DB } else { gain });
                }
            } else if line.starts_with("HORIZONTAL") {
                section = Some(Section::Horizontal);
                pattern.horizontal = PatternTable::default();
            } else if line.starts_with("VERTICAL") {
                section = Some(Section::Vertical);
                pattern.vertical = PatternTable::default();
            } else if let Some(section) = section {
                let mut fields = line.split_whitespace();
                let (Some(a), Some(v)) = (fields.next(), fields.next()) else {
                    continue;
                };
                let (Some(angle), Some(value)) = (leading_float(a), leading_float(v)) else {
                    continue;
                };
                match section {
                    Section::Horizontal => pattern.horizontal.push(angle, value),
                    Section::Vertical => pattern.vertical.push(angle, value),
                }
            }
        }

        pattern.horizontal.finish();
        pattern.vertical.finish();
        pattern
    }

    /// Most negative horizontal offset, 0 for an empty table.
    pub fn min_offset_db(&self) -> f64 {
        self.horizontal
            .samples
            .iter()
            .map(|s| s.gain_db)
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    /// Angle of the strongest horizontal sample.
    pub fn peak_angle_deg(&self) -> f64 {
        self.horizontal
            .samples
            .iter()
            .reduce(|best, s| if s.gain_db > best.gain_db { s } else { best })
            .map(|s| s.angle_deg)
            .unwrap_or(0.0)
    }

    /// Directional offset (dB, relative to peak) for a horizontal angle and an
    /// elevation relative to boresight. Positive elevation means the receiver is
    /// below boresight.
    pub fn gain_from_pattern(&self, h_angle_deg: f64, elevation_deg: f64, combination: GainCombination) -> f64 {
        if self.horizontal.is_empty() {
            return 0.0;
        }

        let h_gain = self.horizontal.interpolate(h_angle_deg.rem_euclid(360.0));
        if self.vertical.is_empty() || elevation_deg.abs() <= MIN_ELEVATION_DEG {
            return h_gain;
        }

        // Vertical tables: 0 = boresight, 90 = up, 270 = down
        let v_gain = self.vertical.interpolate((-elevation_deg).rem_euclid(360.0));
        match combination {
            GainCombination::ArithmeticMeanDb => (h_gain + v_gain) / 2.0,
            GainCombination::GeometricMeanLinear => {
                let h_lin = 10f64.powf(h_gain / 10.0).max(1e-10);
                let v_lin = 10f64.powf(v_gain / 10.0).max(1e-10);
                10.0 * (h_lin * v_lin).sqrt().log10()
            }
        }
    }
}

pub fn interpolate_gain(samples: &[PatternSample], angle_deg: f64) -> f64 {
    match samples {
        [] => return 0.0,
        [only] => return only.gain_db,
        _ => {}
    }

    let angle = angle_deg.rem_euclid(360.0);
    let first = samples[0];
    let last = samples[samples.len() - 1];

    let (p1, p2, angle) = match samples.iter().position(|s| s.angle_deg > angle) {
        Some(0) => (last, wrapped(first), angle + 360.0),
        None => (last, wrapped(first), angle),
        Some(i) => (samples[i - 1], samples[i], angle),
    };

    let span = p2.angle_deg - p1.angle_deg;
    if span.abs() < 1e-9 {
        return p1.gain_db;
    }
    let t = (angle - p1.angle_deg) / span;
    p1.gain_db + t * (p2.gain_db - p1.gain_db)
}

fn wrapped(s: PatternSample) -> PatternSample {
    PatternSample {
        angle_deg: s.angle_deg + 360.0,
        gain_db: s.gain_db,
    }
}

fn round_half_up(v: f64) -> i32 {
    (v + 0.5).floor() as i32
}

/// `dB` or `dBd` anywhere after the number, but not `dBi`.
fn is_dipole_unit(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    lower
        .match_indices("db")
        .any(|(i, _)| lower[i + 2..].chars().next() != Some('i'))
}

/// Parses the longest numeric prefix, so `12.5dBd` reads as 12.5.
fn leading_float(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let bytes = s.as_bytes();
    while end < bytes.len() {
        let c = bytes[end];
        match c {
            b'0'..=b'9' => seen_digit = true,
            b'+' | b'-' if end == 0 || matches!(bytes[end - 1], b'e' | b'E') => {}
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        end += 1;
    }
    // Back off a dangling exponent or sign
    let mut candidate = &s[..end];
    while !candidate.is_empty() {
        if let Ok(v) = candidate.parse::<f64>() {
            return Some(v);
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    None
}
