use anyhow::Context;
use bevy::log::info;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::geo::Point2;
use crate::physics::params::PropagationParams;
use crate::physics::pattern::AntennaPattern;
use crate::render::ColorConfig;

/// Default mounting height when a scene file leaves `z` out.
pub const DEFAULT_AP_HEIGHT_M: f64 = 2.5;

/// How an access point names its antenna pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternRef {
    /// Use the registry default, or scalar gain when there is none.
    #[default]
    Default,
    Named(String),
    /// Scalar gain only, even if a default pattern exists.
    Scalar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_height")]
    pub z: f64,
    /// Transmit power, dBm
    pub tx_dbm: f64,
    /// Nominal antenna gain, dBi
    #[serde(default)]
    pub gain_dbi: f64,
    pub channel: u32,
    #[serde(default)]
    pub azimuth_deg: f64,
    #[serde(default)]
    pub tilt_deg: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub pattern: PatternRef,
}

fn default_height() -> f64 {
    DEFAULT_AP_HEIGHT_M
}

fn default_enabled() -> bool {
    true
}

impl AccessPoint {
    pub fn new(id: impl Into<String>, x: f64, y: f64, tx_dbm: f64, channel: u32) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            z: DEFAULT_AP_HEIGHT_M,
            tx_dbm,
            gain_dbi: 0.0,
            channel: channel.max(1),
            azimuth_deg: 0.0,
            tilt_deg: 0.0,
            enabled: true,
            pattern: PatternRef::Default,
        }
    }

    pub fn position(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Material {
    Drywall,
    Brick,
    Concrete,
    Metal,
    Glass,
    Wood,
    Custom,
}

impl Material {
    /// Attenuation applied when a wall carries no explicit loss.
    pub fn loss_db(&self) -> f64 {
        match self {
            Material::Drywall => 3.0,
            Material::Brick => 8.0,
            Material::Concrete => 14.22,
            Material::Metal => 20.0,
            Material::Glass => 4.44,
            Material::Wood => 10.3,
            Material::Custom => 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    #[default]
    Wall,
    Door,
    DoubleDoor,
    Window,
}

impl ElementKind {
    /// Openings never attenuate or block the line of sight.
    pub fn is_pass_through(&self) -> bool {
        !matches!(self, ElementKind::Wall)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WallGeometry {
    Segment { a: Point2, b: Point2 },
    Polyline(Vec<Point2>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub id: String,
    pub geometry: WallGeometry,
    #[serde(default)]
    pub loss_db: Option<f64>,
    #[serde(default)]
    pub material: Option<Material>,
    #[serde(default)]
    pub element: ElementKind,
    /// Meters. Thick walls use the expanded-rectangle intersection test.
    #[serde(default)]
    pub thickness_m: Option<f64>,
}

impl Wall {
    pub fn segment(id: impl Into<String>, a: Point2, b: Point2, loss_db: f64) -> Self {
        Self {
            id: id.into(),
            geometry: WallGeometry::Segment { a, b },
            loss_db: Some(loss_db),
            material: None,
            element: ElementKind::Wall,
            thickness_m: None,
        }
    }

    /// Explicit loss wins, then the material table, then zero.
    pub fn effective_loss_db(&self) -> f64 {
        match self.loss_db {
            Some(loss) if loss != 0.0 => loss,
            _ => self.material.map(|m| m.loss_db()).unwrap_or(0.0),
        }
    }

    pub fn segments(&self) -> Vec<(Point2, Point2)> {
        match &self.geometry {
            WallGeometry::Segment { a, b } => vec![(*a, *b)],
            WallGeometry::Polyline(points) => points.iter().copied().tuple_windows().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorPlane {
    pub id: String,
    pub corners: [Point2; 4],
    pub attenuation_db: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundPlaneConfig {
    pub enabled: bool,
    pub attenuation_db: f64,
}

impl Default for GroundPlaneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attenuation_db: 3.0,
        }
    }
}

/// On-disk scene description. Pattern files are resolved relative to the scene file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneFile {
    pub width_m: f64,
    pub height_m: f64,
    #[serde(default)]
    pub params: PropagationParams,
    #[serde(default)]
    pub ground_plane: GroundPlaneConfig,
    #[serde(default)]
    pub access_points: Vec<AccessPoint>,
    #[serde(default)]
    pub walls: Vec<Wall>,
    #[serde(default)]
    pub floor_planes: Vec<FloorPlane>,
    #[serde(default)]
    pub pattern_files: Vec<PathBuf>,
    #[serde(default)]
    pub default_pattern: Option<String>,
    #[serde(default)]
    pub colors: ColorConfig,
}

pub fn load_scene_from_json(path: &Path) -> anyhow::Result<(SceneFile, Vec<AntennaPattern>)> {
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader = std::io::BufReader::new(file);
    let scene: SceneFile =
        serde_json::from_reader(reader).with_context(|| format!("Failed to parse {:?}", path))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let patterns = scene
        .pattern_files
        .iter()
        .map(|rel| load_pattern_file(&base.join(rel)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    info!(
        "Loaded scene {:?}: {} APs, {} walls, {} floor planes, {} patterns",
        path,
        scene.access_points.len(),
        scene.walls.len(),
        scene.floor_planes.len(),
        patterns.len()
    );
    Ok((scene, patterns))
}

pub fn load_pattern_file(path: &Path) -> anyhow::Result<AntennaPattern> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read pattern {:?}", path))?;
    let mut pattern = AntennaPattern::parse(&text);
    if pattern.name.is_empty() {
        pattern.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    Ok(pattern)
}

/// Content hash of the AP, wall and floor-plane geometry that feeds the propagation model.
/// Shown in the control panel to tell scene revisions apart.
pub fn compute_scene_hash(aps: &[AccessPoint], walls: &[Wall], floor_planes: &[FloorPlane]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for ap in aps {
        ap.id.hash(&mut hasher);
        ap.x.to_bits().hash(&mut hasher);
        ap.y.to_bits().hash(&mut hasher);
        ap.z.to_bits().hash(&mut hasher);
        for v in [ap.tx_dbm, ap.gain_dbi, ap.azimuth_deg, ap.tilt_deg] {
            v.to_bits().hash(&mut hasher);
        }
        ap.channel.hash(&mut hasher);
        ap.enabled.hash(&mut hasher);
        ap.pattern.hash(&mut hasher);
    }
    for wall in walls {
        wall.id.hash(&mut hasher);
        wall.effective_loss_db().to_bits().hash(&mut hasher);
        wall.thickness_m.map(f64::to_bits).hash(&mut hasher);
        wall.element.is_pass_through().hash(&mut hasher);
        for (a, b) in wall.segments() {
            for v in [a.x, a.y, b.x, b.y] {
                v.to_bits().hash(&mut hasher);
            }
        }
    }
    for fp in floor_planes {
        fp.id.hash(&mut hasher);
        fp.attenuation_db.to_bits().hash(&mut hasher);
        for c in &fp.corners {
            c.x.to_bits().hash(&mut hasher);
            c.y.to_bits().hash(&mut hasher);
        }
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_table_backs_walls_without_loss() {
        let mut wall = Wall::segment("w", Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), 0.0);
        assert_eq!(wall.effective_loss_db(), 0.0);
        wall.material = Some(Material::Concrete);
        assert_eq!(wall.effective_loss_db(), 14.22);
        wall.loss_db = Some(5.0);
        assert_eq!(wall.effective_loss_db(), 5.0);
    }

    #[test]
    fn polyline_splits_into_segments() {
        let wall = Wall {
            id: "poly".into(),
            geometry: WallGeometry::Polyline(vec![
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(1.0, 1.0),
            ]),
            loss_db: None,
            material: Some(Material::Brick),
            element: ElementKind::Wall,
            thickness_m: None,
        };
        assert_eq!(wall.segments().len(), 2);
    }

    #[test]
    fn scene_hash_tracks_geometry() {
        let aps = vec![AccessPoint::new("AP1", 1.0, 2.0, 20.0, 1)];
        let walls = vec![Wall::segment("w", Point2::new(0.0, 0.0), Point2::new(5.0, 0.0), 3.0)];
        let h0 = compute_scene_hash(&aps, &walls, &[]);
        assert_eq!(h0, compute_scene_hash(&aps.clone(), &walls.clone(), &[]));

        let mut moved = aps.clone();
        moved[0].x = 1.5;
        assert_ne!(h0, compute_scene_hash(&moved, &walls, &[]));
        assert_ne!(h0, compute_scene_hash(&aps, &[], &[]));

        let mut tilted = aps.clone();
        tilted[0].tilt_deg = 10.0;
        assert_ne!(h0, compute_scene_hash(&tilted, &walls, &[]));
        let mut scalar = aps.clone();
        scalar[0].pattern = PatternRef::Scalar;
        assert_ne!(h0, compute_scene_hash(&scalar, &walls, &[]));

        let mut plane = FloorPlane {
            id: "fp".into(),
            corners: [
                Point2::new(0.0, 0.0),
                Point2::new(2.0, 0.0),
                Point2::new(2.0, 2.0),
                Point2::new(0.0, 2.0),
            ],
            attenuation_db: 6.0,
        };
        let h1 = compute_scene_hash(&aps, &walls, std::slice::from_ref(&plane));
        plane.corners[2] = Point2::new(3.0, 3.0);
        assert_ne!(h1, compute_scene_hash(&aps, &walls, std::slice::from_ref(&plane)));
    }

    #[test]
    fn scene_file_defaults_fill_missing_fields() {
        let json = r#"{
            "width_m": 30.0,
            "height_m": 20.0,
            "access_points": [{ "id": "AP1", "x": 5.0, "y": 5.0, "tx_dbm": 20.0, "channel": 6 }]
        }"#;
        let scene: SceneFile = serde_json::from_str(json).unwrap();
        let ap = &scene.access_points[0];
        assert_eq!(ap.z, DEFAULT_AP_HEIGHT_M);
        assert!(ap.enabled);
        assert_eq!(ap.pattern, PatternRef::Default);
        assert!(scene.ground_plane.enabled);
        assert_eq!(scene.params.frequency_mhz, 2400.0);
    }
}
