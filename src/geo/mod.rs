use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};

/// Plan-view coordinate in meters. `y` grows downwards, like the floor plan canvas.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point2) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// Axis-aligned bounds of a floor-plane quad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Point2,
    pub max: Point2,
}

impl Bounds {
    pub fn of_quad(quad: &[Point2; 4]) -> Self {
        let (min_x, max_x) = span(quad.iter().map(|p| p.x));
        let (min_y, max_y) = span(quad.iter().map(|p| p.y));
        Self {
            min: Point2::new(min_x, min_y),
            max: Point2::new(max_x, max_y),
        }
    }

    pub fn contains(&self, p: Point2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

fn span(values: impl Iterator<Item = f64>) -> (f64, f64) {
    match values.minmax_by(|a, b| a.total_cmp(b)) {
        MinMaxResult::NoElements => (0.0, 0.0),
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Collinear,
    Clockwise,
    CounterClockwise,
}

fn orientation(p: Point2, q: Point2, r: Point2) -> Orientation {
    let val = (q.y - p.y) * (r.x - q.x) - (q.x - p.x) * (r.y - q.y);
    if val == 0.0 {
        Orientation::Collinear
    } else if val > 0.0 {
        Orientation::Clockwise
    } else {
        Orientation::CounterClockwise
    }
}

/// `q` lies within the bounding box of `p`..`r` (only meaningful for collinear points).
fn on_segment(p: Point2, q: Point2, r: Point2) -> bool {
    q.x <= p.x.max(r.x) && q.x >= p.x.min(r.x) && q.y <= p.y.max(r.y) && q.y >= p.y.min(r.y)
}

/// Segment `a1-a2` touches segment `b1-b2`, including collinear overlap and shared endpoints.
pub fn segments_intersect(a1: Point2, a2: Point2, b1: Point2, b2: Point2) -> bool {
    let o1 = orientation(a1, a2, b1);
    let o2 = orientation(a1, a2, b2);
    let o3 = orientation(b1, b2, a1);
    let o4 = orientation(b1, b2, a2);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    (o1 == Orientation::Collinear && on_segment(a1, b1, a2))
        || (o2 == Orientation::Collinear && on_segment(a1, b2, a2))
        || (o3 == Orientation::Collinear && on_segment(b1, a1, b2))
        || (o4 == Orientation::Collinear && on_segment(b1, a2, b2))
}

/// Floor-plane quads are treated as rectangles: the test runs on the corners' bounding box.
pub fn point_in_quad(p: Point2, quad: &[Point2; 4]) -> bool {
    Bounds::of_quad(quad).contains(p)
}

/// The line of sight enters or crosses the quad.
pub fn line_intersects_quad(start: Point2, end: Point2, quad: &[Point2; 4]) -> bool {
    if point_in_quad(start, quad) || point_in_quad(end, quad) {
        return true;
    }

    quad.iter()
        .circular_tuple_windows()
        .any(|(e1, e2)| segments_intersect(start, end, *e1, *e2))
}

/// Distance from `p` to the wall segment starting at `origin` with unit direction `dir`.
fn distance_to_segment(p: Point2, origin: Point2, dir: Point2, len: f64) -> f64 {
    let proj = ((p.x - origin.x) * dir.x + (p.y - origin.y) * dir.y).clamp(0.0, len);
    p.distance(Point2::new(origin.x + dir.x * proj, origin.y + dir.y * proj))
}

pub fn line_intersects_thick_wall(
    line_start: Point2,
    line_end: Point2,
    wall_start: Point2,
    wall_end: Point2,
    thickness: f64,
) -> bool {
    if segments_intersect(line_start, line_end, wall_start, wall_end) {
        return true;
    }

    let wall_len = wall_start.distance(wall_end);
    if wall_len < 1e-3 {
        return false;
    }

    let dir = Point2::new(
        (wall_end.x - wall_start.x) / wall_len,
        (wall_end.y - wall_start.y) / wall_len,
    );
    let half = thickness / 2.0;
    let offset = Point2::new(-dir.y * half, dir.x * half);

    let corners = [
        Point2::new(wall_start.x + offset.x, wall_start.y + offset.y),
        Point2::new(wall_end.x + offset.x, wall_end.y + offset.y),
        Point2::new(wall_end.x - offset.x, wall_end.y - offset.y),
        Point2::new(wall_start.x - offset.x, wall_start.y - offset.y),
    ];

    // Long edges of the expanded rectangle
    if segments_intersect(line_start, line_end, corners[0], corners[1])
        || segments_intersect(line_start, line_end, corners[2], corners[3])
    {
        return true;
    }

    // Short, near-parallel lines that end inside the wall body
    let near = distance_to_segment(line_start, wall_start, dir, wall_len)
        .min(distance_to_segment(line_end, wall_start, dir, wall_len));
    near < half
}
