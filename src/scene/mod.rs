//! Scene aggregate root.
//!
//! Every mutation bumps the generation counter; rasters are tagged with the
//! generation of the snapshot they were computed from.

use bevy::prelude::Resource;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::coverage::{DisplayRange, HeatmapView};
use crate::geo::Point2;
use crate::io::{AccessPoint, FloorPlane, GroundPlaneConfig, PatternRef, SceneFile, Wall};
use crate::physics::params::PropagationParams;
use crate::physics::pattern::AntennaPattern;
use crate::render::ColorConfig;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SceneError {
    #[error("unknown access point: {0}")]
    UnknownAccessPoint(String),
    #[error("duplicate access point id: {0}")]
    DuplicateAccessPoint(String),
    #[error("unknown wall: {0}")]
    UnknownWall(String),
    #[error("unknown floor plane: {0}")]
    UnknownFloorPlane(String),
    #[error("unknown antenna pattern: {0}")]
    UnknownPattern(String),
    #[error("invalid scene extent {0} x {1}")]
    InvalidExtent(f64, f64),
}

pub type SceneResult<T> = Result<T, SceneError>;

/// Named patterns shared between access points.
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    patterns: BTreeMap<String, Arc<AntennaPattern>>,
    default: Option<String>,
}

impl PatternRegistry {
    pub fn insert(&mut self, pattern: AntennaPattern) -> Arc<AntennaPattern> {
        let pattern = Arc::new(pattern);
        self.patterns.insert(pattern.name.clone(), pattern.clone());
        pattern
    }

    pub fn get(&self, name: &str) -> Option<&Arc<AntennaPattern>> {
        self.patterns.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.patterns.keys().map(String::as_str)
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn resolve(&self, reference: &PatternRef) -> Option<Arc<AntennaPattern>> {
        match reference {
            PatternRef::Named(name) => self.patterns.get(name).cloned(),
            PatternRef::Default => self.default.as_ref().and_then(|n| self.patterns.get(n)).cloned(),
            PatternRef::Scalar => None,
        }
    }
}

/// An access point with its pattern reference resolved.
#[derive(Debug, Clone)]
pub struct ResolvedAp {
    pub ap: AccessPoint,
    pub pattern: Option<Arc<AntennaPattern>>,
}

/// Immutable view of the scene handed to the metrics engine and to workers.
#[derive(Debug, Clone)]
pub struct SceneSnapshot {
    pub generation: u64,
    pub width_m: f64,
    pub height_m: f64,
    pub params: PropagationParams,
    pub ground: GroundPlaneConfig,
    pub aps: Vec<ResolvedAp>,
    pub walls: Vec<Wall>,
    pub floor_planes: Vec<FloorPlane>,
    pub view: HeatmapView,
    pub display: DisplayRange,
    pub colors: ColorConfig,
    /// Index into `aps` of the AP forced as serving AP
    pub focus: Option<usize>,
}

#[derive(Debug, Clone, Resource)]
pub struct SceneState {
    width_m: f64,
    height_m: f64,
    params: PropagationParams,
    ground: GroundPlaneConfig,
    aps: Vec<AccessPoint>,
    walls: Vec<Wall>,
    floor_planes: Vec<FloorPlane>,
    patterns: PatternRegistry,
    view: HeatmapView,
    display_ranges: BTreeMap<HeatmapView, DisplayRange>,
    colors: ColorConfig,
    focus: Option<String>,
    generation: u64,
}

impl SceneState {
    pub fn new(width_m: f64, height_m: f64) -> SceneResult<Self> {
        if !(width_m.is_finite() && height_m.is_finite() && width_m > 0.0 && height_m > 0.0) {
            return Err(SceneError::InvalidExtent(width_m, height_m));
        }
        Ok(Self {
            width_m,
            height_m,
            params: PropagationParams::default(),
            ground: GroundPlaneConfig::default(),
            aps: Vec::new(),
            walls: Vec::new(),
            floor_planes: Vec::new(),
            patterns: PatternRegistry::default(),
            view: HeatmapView::Rssi,
            display_ranges: HeatmapView::ALL
                .iter()
                .map(|v| (*v, DisplayRange::default_for(*v)))
                .collect(),
            colors: ColorConfig::default(),
            focus: None,
            generation: 0,
        })
    }

    pub fn from_file(file: SceneFile, patterns: Vec<AntennaPattern>) -> SceneResult<Self> {
        let mut scene = Self::new(file.width_m, file.height_m)?;
        scene.params = file.params;
        scene.ground = file.ground_plane;
        scene.colors = file.colors;
        for pattern in patterns {
            scene.patterns.insert(pattern);
        }
        if let Some(name) = file.default_pattern {
            scene.set_default_pattern(Some(&name))?;
        }
        for ap in file.access_points {
            scene.add_ap(ap)?;
        }
        scene.walls = file.walls;
        scene.floor_planes = file.floor_planes;
        Ok(scene)
    }

    fn touch(&mut self) {
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn extent(&self) -> (f64, f64) {
        (self.width_m, self.height_m)
    }

    pub fn aps(&self) -> &[AccessPoint] {
        &self.aps
    }

    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }

    pub fn floor_planes(&self) -> &[FloorPlane] {
        &self.floor_planes
    }

    pub fn params(&self) -> &PropagationParams {
        &self.params
    }

    pub fn ground(&self) -> &GroundPlaneConfig {
        &self.ground
    }

    pub fn patterns(&self) -> &PatternRegistry {
        &self.patterns
    }

    pub fn view(&self) -> HeatmapView {
        self.view
    }

    pub fn display_range(&self) -> DisplayRange {
        self.display_ranges
            .get(&self.view)
            .copied()
            .unwrap_or_else(|| DisplayRange::default_for(self.view))
    }

    pub fn colors(&self) -> &ColorConfig {
        &self.colors
    }

    pub fn focus(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    fn ap_index(&self, id: &str) -> SceneResult<usize> {
        self.aps
            .iter()
            .position(|ap| ap.id == id)
            .ok_or_else(|| SceneError::UnknownAccessPoint(id.to_string()))
    }

    /// Channels below 1 are raised to 1.
    pub fn add_ap(&mut self, mut ap: AccessPoint) -> SceneResult<()> {
        if self.aps.iter().any(|a| a.id == ap.id) {
            return Err(SceneError::DuplicateAccessPoint(ap.id));
        }
        if let PatternRef::Named(name) = &ap.pattern {
            if self.patterns.get(name).is_none() {
                return Err(SceneError::UnknownPattern(name.clone()));
            }
        }
        ap.channel = ap.channel.max(1);
        self.aps.push(ap);
        self.touch();
        Ok(())
    }

    pub fn remove_ap(&mut self, id: &str) -> SceneResult<AccessPoint> {
        let idx = self.ap_index(id)?;
        if self.focus.as_deref() == Some(id) {
            self.focus = None;
        }
        self.touch();
        Ok(self.aps.remove(idx))
    }

    pub fn move_ap(&mut self, id: &str, to: Point2) -> SceneResult<()> {
        self.update_ap(id, |ap| {
            ap.x = to.x;
            ap.y = to.y;
        })
    }

    /// Any property edit: power, gain, channel, orientation, enabled flag.
    pub fn update_ap(&mut self, id: &str, edit: impl FnOnce(&mut AccessPoint)) -> SceneResult<()> {
        let idx = self.ap_index(id)?;
        let ap = &mut self.aps[idx];
        edit(ap);
        ap.channel = ap.channel.max(1);
        self.touch();
        Ok(())
    }

    pub fn set_ap_enabled(&mut self, id: &str, enabled: bool) -> SceneResult<()> {
        self.update_ap(id, |ap| ap.enabled = enabled)
    }

    pub fn assign_pattern(&mut self, id: &str, reference: PatternRef) -> SceneResult<()> {
        if let PatternRef::Named(name) = &reference {
            if self.patterns.get(name).is_none() {
                return Err(SceneError::UnknownPattern(name.clone()));
            }
        }
        self.update_ap(id, |ap| ap.pattern = reference)
    }

    pub fn add_pattern(&mut self, pattern: AntennaPattern) -> Arc<AntennaPattern> {
        let pattern = self.patterns.insert(pattern);
        self.touch();
        pattern
    }

    /// Detaches every AP that referenced the pattern; they fall back to scalar gain.
    pub fn remove_pattern(&mut self, name: &str) -> SceneResult<()> {
        if self.patterns.patterns.remove(name).is_none() {
            return Err(SceneError::UnknownPattern(name.to_string()));
        }
        for ap in &mut self.aps {
            if matches!(&ap.pattern, PatternRef::Named(n) if n == name) {
                ap.pattern = PatternRef::Scalar;
            }
        }
        if self.patterns.default.as_deref() == Some(name) {
            self.patterns.default = self.patterns.patterns.keys().next().cloned();
        }
        self.touch();
        Ok(())
    }

    pub fn set_default_pattern(&mut self, name: Option<&str>) -> SceneResult<()> {
        if let Some(name) = name {
            if self.patterns.get(name).is_none() {
                return Err(SceneError::UnknownPattern(name.to_string()));
            }
        }
        self.patterns.default = name.map(str::to_string);
        self.touch();
        Ok(())
    }

    pub fn add_wall(&mut self, wall: Wall) {
        self.walls.push(wall);
        self.touch();
    }

    pub fn remove_wall(&mut self, id: &str) -> SceneResult<Wall> {
        let idx = self
            .walls
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| SceneError::UnknownWall(id.to_string()))?;
        self.touch();
        Ok(self.walls.remove(idx))
    }

    pub fn add_floor_plane(&mut self, floor_plane: FloorPlane) {
        self.floor_planes.push(floor_plane);
        self.touch();
    }

    pub fn remove_floor_plane(&mut self, id: &str) -> SceneResult<FloorPlane> {
        let idx = self
            .floor_planes
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| SceneError::UnknownFloorPlane(id.to_string()))?;
        self.touch();
        Ok(self.floor_planes.remove(idx))
    }

    pub fn set_ground_plane(&mut self, ground: GroundPlaneConfig) {
        self.ground = ground;
        self.touch();
    }

    pub fn set_params(&mut self, params: PropagationParams) {
        self.params = params;
        self.touch();
    }

    pub fn set_view(&mut self, view: HeatmapView) {
        if self.view != view {
            self.view = view;
            self.touch();
        }
    }

    /// Display range of the active view.
    pub fn set_display_range(&mut self, range: DisplayRange) {
        self.display_ranges.insert(self.view, range);
        self.touch();
    }

    pub fn set_colors(&mut self, colors: ColorConfig) {
        self.colors = colors;
        self.touch();
    }

    pub fn set_focus(&mut self, id: Option<&str>) -> SceneResult<()> {
        if let Some(id) = id {
            self.ap_index(id)?;
        }
        self.focus = id.map(str::to_string);
        self.touch();
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<SceneSnapshot> {
        let aps: Vec<ResolvedAp> = self
            .aps
            .iter()
            .map(|ap| ResolvedAp {
                ap: ap.clone(),
                pattern: self.patterns.resolve(&ap.pattern),
            })
            .collect();
        let focus = self
            .focus
            .as_deref()
            .and_then(|id| aps.iter().position(|r| r.ap.id == id));

        Arc::new(SceneSnapshot {
            generation: self.generation,
            width_m: self.width_m,
            height_m: self.height_m,
            params: self.params,
            ground: self.ground,
            aps,
            walls: self.walls.clone(),
            floor_planes: self.floor_planes.clone(),
            view: self.view,
            display: self.display_range(),
            colors: self.colors.clone(),
            focus,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> SceneState {
        let mut scene = SceneState::new(30.0, 20.0).unwrap();
        scene.add_ap(AccessPoint::new("AP1", 5.0, 5.0, 20.0, 1)).unwrap();
        scene
    }

    #[test]
    fn rejects_degenerate_extent() {
        assert_eq!(SceneState::new(0.0, 10.0).unwrap_err(), SceneError::InvalidExtent(0.0, 10.0));
    }

    #[test]
    fn every_mutation_bumps_generation() {
        let mut scene = scene();
        let g0 = scene.generation();
        scene.move_ap("AP1", Point2::new(6.0, 6.0)).unwrap();
        let g1 = scene.generation();
        assert!(g1 > g0);
        scene.set_view(HeatmapView::Sinr);
        assert!(scene.generation() > g1);
        let g2 = scene.generation();
        scene.set_display_range(DisplayRange { min: -5.0, max: 30.0 });
        assert!(scene.generation() > g2);
    }

    #[test]
    fn channel_zero_is_raised_on_load() {
        let json = r#"{
            "width_m": 10.0,
            "height_m": 8.0,
            "access_points": [{ "id": "A", "x": 1.0, "y": 1.0, "tx_dbm": 20.0, "channel": 0 }]
        }"#;
        let file: SceneFile = serde_json::from_str(json).unwrap();
        let scene = SceneState::from_file(file, Vec::new()).unwrap();
        assert_eq!(scene.aps()[0].channel, 1);
        assert_eq!(scene.colors(), &ColorConfig::default());

        let mut direct = SceneState::new(10.0, 8.0).unwrap();
        let mut ap = AccessPoint::new("B", 2.0, 2.0, 20.0, 6);
        ap.channel = 0;
        direct.add_ap(ap).unwrap();
        assert_eq!(direct.aps()[0].channel, 1);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut scene = scene();
        let err = scene.add_ap(AccessPoint::new("AP1", 1.0, 1.0, 20.0, 1)).unwrap_err();
        assert_eq!(err, SceneError::DuplicateAccessPoint("AP1".into()));
    }

    #[test]
    fn removing_pattern_detaches_aps() {
        let mut scene = scene();
        let mut pattern = AntennaPattern::parse("HORIZONTAL\n0 0\n180 10\n");
        pattern.name = "omni".into();
        scene.add_pattern(pattern);
        scene.assign_pattern("AP1", PatternRef::Named("omni".into())).unwrap();
        assert!(scene.snapshot().aps[0].pattern.is_some());

        scene.remove_pattern("omni").unwrap();
        assert_eq!(scene.aps()[0].pattern, PatternRef::Scalar);
        assert!(scene.snapshot().aps[0].pattern.is_none());
    }

    #[test]
    fn default_pattern_applies_to_unassigned_aps() {
        let mut scene = scene();
        let mut pattern = AntennaPattern::parse("HORIZONTAL\n0 0\n");
        pattern.name = "panel".into();
        scene.add_pattern(pattern);
        assert!(scene.snapshot().aps[0].pattern.is_none());
        scene.set_default_pattern(Some("panel")).unwrap();
        assert!(scene.snapshot().aps[0].pattern.is_some());
    }

    #[test]
    fn display_range_is_tracked_per_view() {
        let mut scene = scene();
        scene.set_display_range(DisplayRange { min: -90.0, max: -40.0 });
        scene.set_view(HeatmapView::Throughput);
        assert_eq!(scene.display_range(), DisplayRange::default_for(HeatmapView::Throughput));
        scene.set_view(HeatmapView::Rssi);
        assert_eq!(scene.display_range(), DisplayRange { min: -90.0, max: -40.0 });
    }

    #[test]
    fn focus_is_cleared_with_its_ap() {
        let mut scene = scene();
        scene.set_focus(Some("AP1")).unwrap();
        assert_eq!(scene.snapshot().focus, Some(0));
        scene.remove_ap("AP1").unwrap();
        assert_eq!(scene.focus(), None);
    }
}
