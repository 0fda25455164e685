//! CSV exports of rasters and point-wise metric lattices.

use anyhow::{Context, bail};
use bevy::log::info;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::coverage::Raster;
use crate::geo::Point2;
use crate::metrics::RadioMetrics;
use crate::scene::{SceneError, SceneSnapshot};

#[derive(Serialize)]
struct GridRecord {
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
    value: f64,
}

#[derive(Serialize)]
struct DetailedRecord<'a> {
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
    best_ap_id: &'a str,
    rssi_dbm: f64,
    snr_db: f64,
    cci_dbm: f64,
    sinr_db: f64,
    throughput_mbps: f64,
}

#[derive(Serialize)]
struct RsrpRecord {
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
    #[serde(rename = "RSRP")]
    rsrp: f64,
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (v * scale).round() / scale
}

/// Lattice coordinates 0, s, 2s, ... up to and including `extent`.
fn lattice(extent: f64, spacing: f64) -> impl Iterator<Item = f64> {
    let steps = (extent / spacing + 1e-9).floor() as usize;
    (0..=steps).map(move |i| round_to(i as f64 * spacing, 3))
}

fn check_spacing(spacing: f64) -> anyhow::Result<()> {
    if !(spacing > 0.0 && spacing.is_finite()) {
        bail!("Export spacing must be positive, got {}", spacing);
    }
    Ok(())
}

/// Raw raster values at cell centers. Returns the number of rows written.
pub fn write_grid_csv<W: Write>(raster: &Raster, writer: W) -> anyhow::Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    let spec = raster.spec;
    for row in 0..spec.rows {
        for col in 0..spec.cols {
            let center = spec.cell_center(col, row);
            let value = raster.value_at(col, row).unwrap_or(f64::NAN);
            wtr.serialize(GridRecord {
                x: round_to(center.x, 3),
                y: round_to(center.y, 3),
                value: round_to(value, 2),
            })?;
        }
    }
    wtr.flush()?;
    Ok(spec.len())
}

/// Every metric on a lattice, skipping points with no server.
pub fn write_detailed_coverage<W: Write>(scene: &SceneSnapshot, spacing: f64, writer: W) -> anyhow::Result<usize> {
    check_spacing(spacing)?;
    let radio = RadioMetrics::new(scene);
    let mut wtr = csv::Writer::from_writer(writer);
    let mut count = 0;
    for y in lattice(scene.height_m, spacing) {
        for x in lattice(scene.width_m, spacing) {
            let m = radio.point_metrics(Point2::new(x, y));
            let Some(ap) = m.server.ap.and_then(|i| scene.aps.get(i)) else {
                continue;
            };
            wtr.serialize(DetailedRecord {
                x,
                y,
                best_ap_id: &ap.ap.id,
                rssi_dbm: round_to(m.server.rssi_dbm, 2),
                snr_db: round_to(m.snr_db, 2),
                cci_dbm: round_to(m.cci_dbm, 2),
                sinr_db: round_to(m.sinr_db, 2),
                throughput_mbps: round_to(m.throughput_mbps, 3),
            })?;
            count += 1;
        }
    }
    wtr.flush()?;
    Ok(count)
}

/// RSRP of one AP on a lattice, regardless of its enabled flag.
pub fn write_ap_rsrp<W: Write>(scene: &SceneSnapshot, ap_id: &str, spacing: f64, writer: W) -> anyhow::Result<usize> {
    check_spacing(spacing)?;
    let index = scene
        .aps
        .iter()
        .position(|r| r.ap.id == ap_id)
        .ok_or_else(|| SceneError::UnknownAccessPoint(ap_id.to_string()))?;
    let radio = RadioMetrics::new(scene);
    let mut wtr = csv::Writer::from_writer(writer);
    let mut count = 0;
    for x in lattice(scene.width_m, spacing) {
        for y in lattice(scene.height_m, spacing) {
            wtr.serialize(RsrpRecord {
                x,
                y,
                rsrp: round_to(radio.rssi_from(index, Point2::new(x, y)), 6),
            })?;
            count += 1;
        }
    }
    wtr.flush()?;
    Ok(count)
}

fn create(path: &Path) -> anyhow::Result<std::io::BufWriter<std::fs::File>> {
    let file = std::fs::File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    Ok(std::io::BufWriter::new(file))
}

pub fn export_grid_csv(raster: &Raster, path: &Path) -> anyhow::Result<usize> {
    let count = write_grid_csv(raster, create(path)?).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Exported {:?} grid ({} cells) to {:?}", raster.view, count, path);
    Ok(count)
}

pub fn export_detailed_coverage(scene: &SceneSnapshot, spacing: f64, path: &Path) -> anyhow::Result<usize> {
    let count = write_detailed_coverage(scene, spacing, create(path)?)
        .with_context(|| format!("Failed to write {:?}", path))?;
    info!("Exported detailed coverage ({} points) to {:?}", count, path);
    Ok(count)
}

pub fn export_ap_rsrp(scene: &SceneSnapshot, ap_id: &str, spacing: f64, path: &Path) -> anyhow::Result<usize> {
    let count = write_ap_rsrp(scene, ap_id, spacing, create(path)?)
        .with_context(|| format!("Failed to write {:?}", path))?;
    info!("Exported RSRP of {} ({} points) to {:?}", ap_id, count, path);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{GridSpec, ResolutionTier, compute_raster};
    use crate::io::AccessPoint;
    use crate::scene::SceneState;

    fn scene() -> SceneState {
        let mut scene = SceneState::new(4.0, 2.0).unwrap();
        scene.add_ap(AccessPoint::new("AP1", 1.0, 1.0, 20.0, 1)).unwrap();
        scene
    }

    #[test]
    fn grid_csv_has_one_row_per_cell() {
        let snap = scene().snapshot();
        let spec = GridSpec::new(4.0, 2.0, 1.0, 1.0).unwrap();
        let raster = compute_raster(snap, ResolutionTier::Low, spec);
        let mut out = Vec::new();
        let count = write_grid_csv(&raster, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(count, 20 * 14);
        assert_eq!(text.lines().next(), Some("X,Y,value"));
        assert_eq!(text.lines().count(), count + 1);
        assert!(text.lines().nth(1).unwrap().starts_with("0.1,0.071,"));
    }

    #[test]
    fn detailed_export_skips_points_without_server() {
        let mut scene = scene();
        let mut out = Vec::new();
        let count = write_detailed_coverage(&scene.snapshot(), 1.0, &mut out).unwrap();
        assert_eq!(count, 5 * 3);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text.lines().next(),
            Some("X,Y,best_ap_id,rssi_dbm,snr_db,cci_dbm,sinr_db,throughput_mbps")
        );
        assert!(text.lines().nth(1).unwrap().starts_with("0.0,0.0,AP1,"));

        scene.set_ap_enabled("AP1", false).unwrap();
        let mut out = Vec::new();
        assert_eq!(write_detailed_coverage(&scene.snapshot(), 1.0, &mut out).unwrap(), 0);
    }

    #[test]
    fn rsrp_export_rejects_unknown_ap_and_bad_spacing() {
        let snap = scene().snapshot();
        assert!(write_ap_rsrp(&snap, "nope", 1.0, Vec::<u8>::new()).is_err());
        assert!(write_ap_rsrp(&snap, "AP1", 0.0, Vec::<u8>::new()).is_err());
        assert_eq!(write_ap_rsrp(&snap, "AP1", 0.5, Vec::<u8>::new()).unwrap(), 9 * 5);
    }

    #[test]
    fn lattice_includes_far_edge() {
        let points: Vec<f64> = lattice(1.0, 0.1).collect();
        assert_eq!(points.len(), 11);
        assert_eq!(points[10], 1.0);
        assert_eq!(points[3], 0.3);
    }
}
