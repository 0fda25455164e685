use crate::engine::HeatmapError;
use crate::geo::Point2;
use crate::metrics::{RadioMetrics, snr};
use crate::render::CellPalette;
use crate::scene::SceneSnapshot;

/// Value stored in best-server cells with no server.
pub const NO_SERVER_CELL: f64 = -1.0;

const MIN_COLS: usize = 20;
const MIN_ROWS: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum HeatmapView {
    #[default]
    Rssi,
    Snr,
    Sinr,
    InterfererCount,
    Throughput,
    BestServer,
    ServingChannel,
}

impl HeatmapView {
    pub const ALL: [HeatmapView; 7] = [
        HeatmapView::Rssi,
        HeatmapView::Snr,
        HeatmapView::Sinr,
        HeatmapView::InterfererCount,
        HeatmapView::Throughput,
        HeatmapView::BestServer,
        HeatmapView::ServingChannel,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            HeatmapView::Rssi => "RSSI (dBm)",
            HeatmapView::Snr => "SNR (dB)",
            HeatmapView::Sinr => "SINR (dB)",
            HeatmapView::InterfererCount => "Interfering APs",
            HeatmapView::Throughput => "Throughput (Mbps)",
            HeatmapView::BestServer => "Best server",
            HeatmapView::ServingChannel => "Serving channel",
        }
    }

    /// Continuous views use the display range; the rest are categorical.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            HeatmapView::Rssi | HeatmapView::Snr | HeatmapView::Sinr | HeatmapView::Throughput
        )
    }
}

/// Values mapped onto the color ramp of a numeric view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayRange {
    pub min: f64,
    pub max: f64,
}

impl DisplayRange {
    pub fn default_for(view: HeatmapView) -> Self {
        let (min, max) = match view {
            HeatmapView::Rssi | HeatmapView::BestServer | HeatmapView::ServingChannel => (-100.0, -30.0),
            HeatmapView::Snr => (0.0, 40.0),
            HeatmapView::Sinr => (-10.0, 40.0),
            HeatmapView::InterfererCount => (0.0, 8.0),
            HeatmapView::Throughput => (0.0, 80.0),
        };
        Self { min, max }
    }

    /// Position of `v` in the range, clamped to [0, 1].
    pub fn normalize(&self, v: f64) -> f64 {
        let span = self.max - self.min;
        if span.abs() < f64::EPSILON {
            return if v >= self.max { 1.0 } else { 0.0 };
        }
        ((v - self.min) / span).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResolutionTier {
    /// Fast preview
    Low,
    /// Refined output requested after the preview lands
    High,
}

/// Cell layout of a raster in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub cols: usize,
    pub rows: usize,
    pub dx: f64,
    pub dy: f64,
}

impl GridSpec {
    pub fn new(width_m: f64, height_m: f64, base_cell_m: f64, multiplier: f64) -> Result<Self, HeatmapError> {
        if !(width_m > 0.0 && height_m > 0.0 && width_m.is_finite() && height_m.is_finite()) {
            return Err(HeatmapError::InvalidExtent(width_m, height_m));
        }
        if !(base_cell_m > 0.0 && multiplier > 0.0) {
            return Err(HeatmapError::InvalidCellSize(base_cell_m));
        }
        let base_cols = ((width_m / base_cell_m).floor() as usize).max(MIN_COLS);
        let base_rows = ((height_m / base_cell_m).floor() as usize).max(MIN_ROWS);
        let cols = ((base_cols as f64 * multiplier).floor() as usize).max(MIN_COLS);
        let rows = ((base_rows as f64 * multiplier).floor() as usize).max(MIN_ROWS);
        Ok(Self {
            cols,
            rows,
            dx: width_m / cols as f64,
            dy: height_m / rows as f64,
        })
    }

    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cell_center(&self, col: usize, row: usize) -> Point2 {
        Point2::new((col as f64 + 0.5) * self.dx, (row as f64 + 0.5) * self.dy)
    }
}

/// Raw value for one cell of the given view.
///
/// Views that only need the serving AP skip the co-channel passes.
pub fn sample_cell(radio: &RadioMetrics<'_>, scene: &SceneSnapshot, view: HeatmapView, p: Point2) -> f64 {
    let noise = scene.params.noise_floor_dbm;
    match view {
        HeatmapView::Rssi => radio.serving(p).rssi_dbm,
        HeatmapView::Snr => snr(radio.serving(p).rssi_dbm, noise),
        HeatmapView::BestServer => radio.serving(p).ap.map(|i| i as f64).unwrap_or(NO_SERVER_CELL),
        HeatmapView::ServingChannel => radio
            .serving(p)
            .ap
            .and_then(|i| scene.aps.get(i))
            .map(|r| r.ap.channel as f64)
            .unwrap_or(0.0),
        HeatmapView::InterfererCount => radio
            .serving(p)
            .ap
            .map(|i| radio.interfering_count(p, i) as f64)
            .unwrap_or(0.0),
        HeatmapView::Sinr => radio.point_metrics(p).sinr_db,
        HeatmapView::Throughput => radio.point_metrics(p).throughput_mbps,
    }
}

/// A completed grid of values plus the RGBA pixels mapped from them.
#[derive(Debug, Clone)]
pub struct Raster {
    pub generation: u64,
    pub tier: ResolutionTier,
    pub view: HeatmapView,
    pub spec: GridSpec,
    /// Row-major, `spec.cols * spec.rows`
    pub values: Vec<f64>,
    /// Row-major RGBA8
    pub pixels: Vec<u8>,
}

impl Raster {
    pub fn value_at(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.spec.cols || row >= self.spec.rows {
            return None;
        }
        self.values.get(row * self.spec.cols + col).copied()
    }
}

/// Incremental raster computation, a bounded number of rows at a time.
pub struct RasterBuilder {
    scene: std::sync::Arc<SceneSnapshot>,
    tier: ResolutionTier,
    spec: GridSpec,
    values: Vec<f64>,
    pixels: Vec<u8>,
    next_row: usize,
}

impl RasterBuilder {
    pub fn new(scene: std::sync::Arc<SceneSnapshot>, tier: ResolutionTier, spec: GridSpec) -> Self {
        Self {
            scene,
            tier,
            spec,
            values: Vec::with_capacity(spec.len()),
            pixels: Vec::with_capacity(spec.len() * 4),
            next_row: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.next_row >= self.spec.rows
    }

    pub fn rows_done(&self) -> usize {
        self.next_row
    }

    pub fn spec(&self) -> GridSpec {
        self.spec
    }

    /// Fills up to `max_rows` rows. Returns true once the grid is complete.
    pub fn fill_rows(&mut self, max_rows: usize) -> bool {
        let end = (self.next_row + max_rows.max(1)).min(self.spec.rows);
        let scene = &*self.scene;
        let radio = RadioMetrics::new(scene);
        let palette = CellPalette::new(scene);
        for row in self.next_row..end {
            for col in 0..self.spec.cols {
                let value = sample_cell(&radio, scene, scene.view, self.spec.cell_center(col, row));
                self.values.push(value);
                self.pixels.extend_from_slice(&palette.color(scene.view, value));
            }
        }
        self.next_row = end;
        self.is_done()
    }

    pub fn finish(self) -> Raster {
        Raster {
            generation: self.scene.generation,
            tier: self.tier,
            view: self.scene.view,
            spec: self.spec,
            values: self.values,
            pixels: self.pixels,
        }
    }
}

/// Computes a whole raster in one go.
pub fn compute_raster(scene: std::sync::Arc<SceneSnapshot>, tier: ResolutionTier, spec: GridSpec) -> Raster {
    let mut builder = RasterBuilder::new(scene, tier, spec);
    builder.fill_rows(spec.rows);
    builder.finish()
}
