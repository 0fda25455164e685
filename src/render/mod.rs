use bevy::prelude::*;
use bevy::render::render_asset::RenderAssetUsages;
use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat};
use serde::{Deserialize, Serialize};

use crate::coverage::{DisplayRange, HeatmapView, Raster};
use crate::scene::SceneSnapshot;

pub type Rgba = [u8; 4];

pub const TRANSPARENT: Rgba = [0, 0, 0, 0];
/// Best-server cells with no server.
pub const NO_SERVER_COLOR: Rgba = [200, 200, 200, 230];

const GRADIENT_ALPHA: u8 = 220;
const CATEGORY_ALPHA: u8 = 230;
const GOLDEN_ANGLE_DEG: f64 = 137.508;
/// Normalized values at or below this are not drawn.
const VISIBILITY_CUTOFF: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    #[serde(with = "hex_rgb")]
    pub weak: [u8; 3],
    #[serde(with = "hex_rgb")]
    pub mid: [u8; 3],
    #[serde(with = "hex_rgb")]
    pub strong: [u8; 3],
    /// Three flat zones instead of a gradient
    pub contours: bool,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            weak: [255, 0, 0],
            mid: [255, 255, 0],
            strong: [0, 255, 0],
            contours: false,
        }
    }
}

/// `#rrggbb` or `rrggbb`.
pub fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// `#rrggbb` strings in config files.
mod hex_rgb {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(rgb: &[u8; 3], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2]))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 3], D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_hex_color(&s).ok_or_else(|| D::Error::custom(format!("invalid color {:?}", s)))
    }
}

fn lerp_u8(a: u8, b: u8, t: f64) -> u8 {
    (a as f64 + (b as f64 - a as f64) * t).round().clamp(0.0, 255.0) as u8
}

fn lerp_rgb(a: [u8; 3], b: [u8; 3], t: f64) -> [u8; 3] {
    [lerp_u8(a[0], b[0], t), lerp_u8(a[1], b[1], t), lerp_u8(a[2], b[2], t)]
}

/// `h` in degrees, `s` and `l` in [0, 1].
pub fn hsl_to_rgb(h: f64, s: f64, l: f64) -> [u8; 3] {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = l - c / 2.0;
    let (r, g, b) = match h {
        h if (0.0..60.0).contains(&h) => (c, x, 0.0),
        h if (60.0..120.0).contains(&h) => (x, c, 0.0),
        h if (120.0..180.0).contains(&h) => (0.0, c, x),
        h if (180.0..240.0).contains(&h) => (0.0, x, c),
        h if (240.0..300.0).contains(&h) => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let to_u8 = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    [to_u8(r), to_u8(g), to_u8(b)]
}

/// 32-bit FNV-1a.
pub fn hash_str(s: &str) -> u32 {
    s.bytes()
        .fold(2_166_136_261u32, |h, b| (h ^ b as u32).wrapping_mul(16_777_619))
}

fn seeded_random(seed: u32) -> f64 {
    let x = (seed as f64).sin() * 10_000.0;
    x - x.floor()
}

fn with_alpha(rgb: [u8; 3], alpha: u8) -> Rgba {
    [rgb[0], rgb[1], rgb[2], alpha]
}

fn golden_angle_color(n: usize) -> Rgba {
    let hue = (n as f64 * GOLDEN_ANGLE_DEG) % 360.0;
    with_alpha(hsl_to_rgb(hue, 0.75, 0.55), CATEGORY_ALPHA)
}

/// Distinct color per AP position in the list.
pub fn color_for_ap(index: usize) -> Rgba {
    golden_angle_color(index)
}

pub fn color_for_count(count: f64) -> Rgba {
    let n = if count.is_finite() { count.round().max(0.0) as usize } else { 0 };
    golden_angle_color(n)
}

/// Stable pseudo-random color per channel number.
pub fn color_for_channel(channel: u32) -> Rgba {
    let hue = seeded_random(hash_str(&format!("ch_color_{channel}"))) * 360.0;
    let saturation = 0.7 + seeded_random(hash_str(&format!("ch_sat_{channel}"))) * 0.2;
    let lightness = 0.5 + seeded_random(hash_str(&format!("ch_light_{channel}"))) * 0.1;
    with_alpha(hsl_to_rgb(hue, saturation, lightness), CATEGORY_ALPHA)
}

pub fn color_numeric(value: f64, range: DisplayRange, colors: &ColorConfig) -> Rgba {
    let t = range.normalize(value);
    if t <= VISIBILITY_CUTOFF {
        return TRANSPARENT;
    }
    if colors.contours {
        let rgb = if t < 0.33 {
            [255, 0, 0]
        } else if t < 0.67 {
            [255, 255, 0]
        } else {
            [0, 255, 0]
        };
        return with_alpha(rgb, GRADIENT_ALPHA);
    }
    let rgb = if t <= 0.5 {
        lerp_rgb(colors.weak, colors.mid, t / 0.5)
    } else {
        lerp_rgb(colors.mid, colors.strong, (t - 0.5) / 0.5)
    };
    with_alpha(rgb, GRADIENT_ALPHA)
}

/// Maps raw cell values to pixels for one snapshot.
pub struct CellPalette<'a> {
    range: DisplayRange,
    colors: &'a ColorConfig,
}

impl<'a> CellPalette<'a> {
    pub fn new(scene: &'a SceneSnapshot) -> Self {
        Self {
            range: scene.display,
            colors: &scene.colors,
        }
    }

    pub fn color(&self, view: HeatmapView, value: f64) -> Rgba {
        match view {
            HeatmapView::BestServer if value < 0.0 => NO_SERVER_COLOR,
            HeatmapView::BestServer => color_for_ap(value as usize),
            HeatmapView::ServingChannel => color_for_channel(value.max(0.0) as u32),
            HeatmapView::InterfererCount => color_for_count(value),
            _ => color_numeric(value, self.range, self.colors),
        }
    }
}

/// Texture with one texel per cell, row 0 at the top of the scene.
pub fn create_heatmap_image(raster: &Raster) -> Image {
    Image::new(
        Extent3d {
            width: raster.spec.cols as u32,
            height: raster.spec.rows as u32,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        raster.pixels.clone(),
        TextureFormat::Rgba8UnormSrgb,
        RenderAssetUsages::RENDER_WORLD | RenderAssetUsages::MAIN_WORLD,
    )
}
