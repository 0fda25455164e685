use bevy::prelude::*;
use bevy_egui::EguiPlugin;
use std::path::PathBuf;

use wifi_heatmap::engine::{HeatmapImage, HeatmapPlugin};
use wifi_heatmap::geo::Point2;
use wifi_heatmap::io::{
    AccessPoint, ElementKind, FloorPlane, Material, PatternRef, Wall, WallGeometry, load_scene_from_json,
};
use wifi_heatmap::physics::pattern::AntennaPattern;
use wifi_heatmap::scene::{SceneError, SceneState};
use wifi_heatmap::ui::{DragState, ExportSettings, ViewerLayout, ap_drag_system, ui_panel_system};

const PIXELS_PER_METER: f32 = 30.0;

const SECTOR_PATTERN: &str = "NAME Demo sector\n\
    FREQUENCY 2437\n\
    H_WIDTH 90\n\
    GAIN 6 dBi\n\
    HORIZONTAL 360\n\
    0 0\n45 3\n90 10\n135 18\n180 25\n225 18\n270 10\n315 3\n\
    VERTICAL 360\n\
    0 0\n30 6\n90 20\n270 20\n330 6\n";

#[derive(Component)]
struct HeatmapSprite;

fn main() -> anyhow::Result<()> {
    let scene = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            let (file, patterns) = load_scene_from_json(&path)?;
            SceneState::from_file(file, patterns)?
        }
        None => demo_scene()?,
    };
    let layout = ViewerLayout::from_scene(&scene, PIXELS_PER_METER);

    App::new()
        .add_plugins(DefaultPlugins)
        .add_plugins(EguiPlugin)
        .add_plugins(HeatmapPlugin::default())
        .insert_resource(ClearColor(Color::srgb(0.12, 0.12, 0.14)))
        .insert_resource(scene)
        .insert_resource(layout)
        .init_resource::<DragState>()
        .init_resource::<ExportSettings>()
        .add_systems(Startup, setup)
        .add_systems(Update, (ui_panel_system, ap_drag_system, update_heatmap_sprite, draw_scene_gizmos))
        .run();

    Ok(())
}

fn demo_scene() -> Result<SceneState, SceneError> {
    let mut scene = SceneState::new(30.0, 20.0)?;

    let mut sector = AntennaPattern::parse(SECTOR_PATTERN);
    sector.name = "sector".to_string();
    scene.add_pattern(sector);

    scene.add_ap(AccessPoint::new("AP-1", 5.0, 5.0, 20.0, 1))?;
    scene.add_ap(AccessPoint::new("AP-2", 24.0, 6.0, 18.0, 6))?;
    let mut corner = AccessPoint::new("AP-3", 15.0, 17.0, 20.0, 1);
    corner.azimuth_deg = 0.0;
    corner.tilt_deg = 5.0;
    corner.gain_dbi = 6.0;
    corner.pattern = PatternRef::Named("sector".to_string());
    scene.add_ap(corner)?;

    scene.add_wall(Wall::segment("w-1", Point2::new(12.0, 0.0), Point2::new(12.0, 9.0), 8.0));
    scene.add_wall(Wall {
        id: "w-2".to_string(),
        geometry: WallGeometry::Polyline(vec![
            Point2::new(0.0, 12.0),
            Point2::new(10.0, 12.0),
            Point2::new(10.0, 14.0),
        ]),
        loss_db: None,
        material: Some(Material::Concrete),
        element: ElementKind::Wall,
        thickness_m: Some(0.3),
    });
    scene.add_wall(Wall {
        element: ElementKind::Door,
        ..Wall::segment("d-1", Point2::new(12.0, 9.0), Point2::new(12.0, 11.0), 0.0)
    });
    scene.add_wall(Wall {
        material: Some(Material::Glass),
        ..Wall::segment("w-3", Point2::new(18.0, 12.0), Point2::new(30.0, 12.0), 0.0)
    });
    scene.add_floor_plane(FloorPlane {
        id: "mezzanine".to_string(),
        corners: [
            Point2::new(20.0, 14.0),
            Point2::new(28.0, 14.0),
            Point2::new(28.0, 19.0),
            Point2::new(20.0, 19.0),
        ],
        attenuation_db: 6.0,
    });
    Ok(scene)
}

fn setup(mut commands: Commands) {
    commands.spawn(Camera2d);
}

fn update_heatmap_sprite(
    mut commands: Commands,
    heatmap: Res<HeatmapImage>,
    layout: Res<ViewerLayout>,
    mut sprites: Query<&mut Sprite, With<HeatmapSprite>>,
) {
    if !heatmap.is_changed() {
        return;
    }
    let Some(handle) = heatmap.handle.clone() else {
        return;
    };
    match sprites.get_single_mut() {
        Ok(mut sprite) => sprite.image = handle,
        Err(_) => {
            commands.spawn((
                Sprite {
                    image: handle,
                    custom_size: Some(layout.size()),
                    ..default()
                },
                Transform::from_xyz(0.0, 0.0, -1.0),
                HeatmapSprite,
            ));
        }
    }
}

fn draw_scene_gizmos(mut gizmos: Gizmos, scene: Res<SceneState>, layout: Res<ViewerLayout>, drag: Res<DragState>) {
    let (w, h) = scene.extent();
    gizmos.rect_2d(Isometry2d::IDENTITY, layout.size(), Color::srgb(0.5, 0.5, 0.5));

    for wall in scene.walls() {
        let color = match wall.element {
            ElementKind::Wall => Color::srgb(0.9, 0.9, 0.9),
            ElementKind::Door | ElementKind::DoubleDoor => Color::srgb(0.7, 0.45, 0.2),
            ElementKind::Window => Color::srgb(0.4, 0.65, 0.98),
        };
        for (a, b) in wall.segments() {
            gizmos.line_2d(layout.to_world(a), layout.to_world(b), color);
        }
    }

    for fp in scene.floor_planes() {
        let outline: Vec<Vec2> = fp
            .corners
            .iter()
            .chain(fp.corners.first())
            .map(|p| layout.to_world(*p))
            .collect();
        gizmos.linestrip_2d(outline, Color::srgba(0.8, 0.3, 0.9, 0.8));
    }

    for ap in scene.aps() {
        let pos = layout.to_world(ap.position());
        let color = if !ap.enabled {
            Color::srgb(0.4, 0.4, 0.4)
        } else if drag.dragging.as_deref() == Some(ap.id.as_str()) || scene.focus() == Some(ap.id.as_str()) {
            Color::srgb(1.0, 0.85, 0.0)
        } else {
            Color::WHITE
        };
        gizmos.circle_2d(Isometry2d::from_translation(pos), 0.35 * layout.pixels_per_meter, color);

        let boresight = (-ap.azimuth_deg - 90.0).to_radians();
        let tip = Point2::new(ap.x + boresight.cos(), ap.y + boresight.sin());
        let tip = Point2::new(tip.x.clamp(0.0, w), tip.y.clamp(0.0, h));
        gizmos.line_2d(pos, layout.to_world(tip), color);
    }
}
