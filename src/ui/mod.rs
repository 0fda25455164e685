use bevy::prelude::*;
use bevy::window::PrimaryWindow;
use bevy_egui::{EguiContexts, egui};
use std::path::PathBuf;

use crate::cache::HeatmapMetrics;
use crate::coverage::{DisplayRange, HeatmapView};
use crate::engine::{HeatmapEngine, HeatmapImage};
use crate::export::{export_detailed_coverage, export_grid_csv};
use crate::geo::Point2;
use crate::io::compute_scene_hash;
use crate::physics::params::{GainCombination, PathLossModel, UnpatternedGain};
use crate::scene::SceneState;

/// APs can be grabbed within this radius.
const PICK_RADIUS_M: f64 = 0.6;

/// Maps scene meters to world units. The scene is centered on the origin with
/// scene y pointing down the screen.
#[derive(Resource, Debug, Clone, Copy)]
pub struct ViewerLayout {
    pub pixels_per_meter: f32,
    pub width_m: f32,
    pub height_m: f32,
}

impl ViewerLayout {
    pub fn from_scene(scene: &SceneState, pixels_per_meter: f32) -> Self {
        let (w, h) = scene.extent();
        Self {
            pixels_per_meter,
            width_m: w as f32,
            height_m: h as f32,
        }
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width_m, self.height_m) * self.pixels_per_meter
    }

    pub fn to_world(&self, p: Point2) -> Vec2 {
        Vec2::new(
            (p.x as f32 - self.width_m / 2.0) * self.pixels_per_meter,
            (self.height_m / 2.0 - p.y as f32) * self.pixels_per_meter,
        )
    }

    pub fn to_scene(&self, v: Vec2) -> Point2 {
        Point2::new(
            (v.x / self.pixels_per_meter + self.width_m / 2.0) as f64,
            (self.height_m / 2.0 - v.y / self.pixels_per_meter) as f64,
        )
    }
}

#[derive(Resource, Default)]
pub struct DragState {
    pub dragging: Option<String>,
}

#[derive(Resource)]
pub struct ExportSettings {
    pub directory: PathBuf,
    pub spacing_m: f64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            spacing_m: 1.0,
        }
    }
}

pub fn ap_drag_system(
    mouse_button: Res<ButtonInput<MouseButton>>,
    windows: Query<&Window, With<PrimaryWindow>>,
    cameras: Query<(&Camera, &GlobalTransform)>,
    mut contexts: EguiContexts,
    layout: Res<ViewerLayout>,
    mut scene: ResMut<SceneState>,
    mut drag: ResMut<DragState>,
    mut engine: ResMut<HeatmapEngine>,
) {
    if mouse_button.just_released(MouseButton::Left) && drag.dragging.take().is_some() {
        engine.set_interaction_lock(false);
        return;
    }

    let Some(ctx) = contexts.try_ctx_mut() else {
        return;
    };
    if ctx.wants_pointer_input() && drag.dragging.is_none() {
        return;
    }

    let Ok(window) = windows.get_single() else {
        return;
    };
    let Ok((camera, cam_transform)) = cameras.get_single() else {
        return;
    };
    let Some(cursor) = window
        .cursor_position()
        .and_then(|c| camera.viewport_to_world_2d(cam_transform, c).ok())
    else {
        return;
    };
    let p = layout.to_scene(cursor);

    if mouse_button.just_pressed(MouseButton::Left) {
        let picked = scene
            .aps()
            .iter()
            .map(|ap| (ap.id.clone(), ap.position().distance(p)))
            .filter(|(_, d)| *d <= PICK_RADIUS_M)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id);
        if picked.is_some() {
            engine.set_interaction_lock(true);
            drag.dragging = picked;
        }
        return;
    }

    let Some(id) = drag.dragging.clone() else {
        return;
    };
    let (w, h) = scene.extent();
    let target = Point2::new(p.x.clamp(0.0, w), p.y.clamp(0.0, h));
    let moved = scene
        .aps()
        .iter()
        .find(|ap| ap.id == id)
        .is_some_and(|ap| ap.position().distance(target) > 1e-3);
    if moved {
        if let Err(err) = scene.move_ap(&id, target) {
            warn!("Dropping drag: {}", err);
            drag.dragging = None;
            engine.set_interaction_lock(false);
        }
    }
}

pub fn ui_panel_system(
    mut contexts: EguiContexts,
    mut scene: ResMut<SceneState>,
    engine: Res<HeatmapEngine>,
    metrics: Res<HeatmapMetrics>,
    heatmap: Res<HeatmapImage>,
    mut export: ResMut<ExportSettings>,
) {
    let ctx = match contexts.try_ctx_mut() {
        Some(ctx) => ctx,
        None => return,
    };

    egui::Window::new("Wi-Fi Heatmap").show(ctx, |ui| {
        ui.heading("View");
        let mut view = scene.view();
        egui::ComboBox::from_label("Metric")
            .selected_text(view.label())
            .show_ui(ui, |ui| {
                for v in HeatmapView::ALL {
                    ui.selectable_value(&mut view, v, v.label());
                }
            });
        scene.set_view(view);

        if view.is_numeric() {
            let mut range = scene.display_range();
            ui.add(egui::Slider::new(&mut range.min, -120.0..=100.0).text("Min"));
            ui.add(egui::Slider::new(&mut range.max, -120.0..=100.0).text("Max"));
            if ui.button("Reset range").clicked() {
                range = DisplayRange::default_for(view);
            }
            if range != scene.display_range() && range.max > range.min {
                scene.set_display_range(range);
            }

            let mut colors = scene.colors().clone();
            ui.checkbox(&mut colors.contours, "Contour zones");
            if colors != *scene.colors() {
                scene.set_colors(colors);
            }
        }

        ui.separator();
        ui.heading("Propagation");
        let mut params = *scene.params();
        ui.add(egui::Slider::new(&mut params.frequency_mhz, 2400.0..=6000.0).text("Frequency (MHz)"));
        ui.add(egui::Slider::new(&mut params.path_loss_exponent, 10.0..=50.0).text("N"));
        ui.add(egui::Slider::new(&mut params.vertical_factor_db, 0.0..=10.0).text("Vertical factor (dB)"));
        ui.add(egui::Slider::new(&mut params.shape_factor, 0.5..=6.0).text("Shape factor"));
        ui.add(egui::Slider::new(&mut params.noise_floor_dbm, -110.0..=-70.0).text("Noise floor (dBm)"));
        ui.horizontal(|ui| {
            ui.selectable_value(&mut params.model, PathLossModel::TwoPointFiveD, "2.5D");
            ui.selectable_value(&mut params.model, PathLossModel::FreeSpace, "Free space");
        });
        ui.horizontal(|ui| {
            ui.selectable_value(&mut params.gain_combination, GainCombination::ArithmeticMeanDb, "Mean dB");
            ui.selectable_value(&mut params.gain_combination, GainCombination::GeometricMeanLinear, "Geo mean");
        });
        ui.horizontal(|ui| {
            ui.selectable_value(&mut params.unpatterned_gain, UnpatternedGain::Isotropic, "Isotropic");
            ui.selectable_value(&mut params.unpatterned_gain, UnpatternedGain::ParabolicLobe, "Lobe");
        });
        if params != *scene.params() {
            scene.set_params(params);
        }

        ui.separator();
        ui.heading("Access points");
        let aps: Vec<(String, u32, bool)> = scene
            .aps()
            .iter()
            .map(|ap| (ap.id.clone(), ap.channel, ap.enabled))
            .collect();
        let mut focus = scene.focus().map(str::to_string);
        for (id, channel, enabled) in aps {
            ui.horizontal(|ui| {
                let mut on = enabled;
                ui.checkbox(&mut on, format!("{} (ch {})", id, channel));
                if on != enabled {
                    if let Err(err) = scene.set_ap_enabled(&id, on) {
                        warn!("{}", err);
                    }
                }
                ui.radio_value(&mut focus, Some(id.clone()), "focus");
            });
        }
        ui.radio_value(&mut focus, None, "All APs");
        if focus.as_deref() != scene.focus() {
            if let Err(err) = scene.set_focus(focus.as_deref()) {
                warn!("{}", err);
            }
        }

        ui.separator();
        ui.heading("Engine");
        ui.label(format!("State: {:?} ({:?})", engine.state(), engine.active_executor()));
        ui.label(format!(
            "Scene hash: {:016x}",
            compute_scene_hash(scene.aps(), scene.walls(), scene.floor_planes())
        ));
        ui.label(format!("Rasters computed: {}", metrics.rasters_computed));
        ui.label(format!("Cache hits: {}", metrics.cache_hits));
        ui.label(format!("Stale results: {}", metrics.stale_discarded));
        ui.label(format!("Worker failures: {}", metrics.worker_failures));
        ui.label(format!("Last compute: {} ms", metrics.last_compute_time_ms));
        if let Some(raster) = &heatmap.raster {
            ui.label(format!("Grid: {}x{} ({:?})", raster.spec.cols, raster.spec.rows, raster.tier));
        }

        ui.separator();
        ui.heading("Export");
        ui.add(egui::Slider::new(&mut export.spacing_m, 0.25..=5.0).text("Spacing (m)"));
        ui.horizontal(|ui| {
            if ui.button("Grid CSV").clicked() {
                if let Some(raster) = &heatmap.raster {
                    let path = export.directory.join("heatmap_grid.csv");
                    if let Err(err) = export_grid_csv(raster, &path) {
                        error!("{:#}", err);
                    }
                }
            }
            if ui.button("Detailed CSV").clicked() {
                let path = export.directory.join("coverage_details.csv");
                if let Err(err) = export_detailed_coverage(&scene.snapshot(), export.spacing_m, &path) {
                    error!("{:#}", err);
                }
            }
        });
    });
}
