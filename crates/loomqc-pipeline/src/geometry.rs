//! Polygon and projection math for the material outline.
//!
//! Projection uses `geo`'s closest-point search for the clamped case and
//! plain vector math for projection onto the infinite line.

use geo::{Closest, ClosestPoint, Line};
use serde::Serialize;

use crate::types::Point;

/// Orthogonal projection of `p` onto the segment from `a` to `b`.
///
/// With `clamp` the result is the closest point on the segment itself;
/// without it the projection lands on the infinite line through `a` and
/// `b` and may lie outside the segment.
///
/// A zero-length segment has no direction, so the projection is `a`.
#[must_use]
pub fn orthogonal_projection(a: Point, b: Point, p: Point, clamp: bool) -> Point {
    let length_sq = a.distance_squared(b);
    if length_sq <= 0.0 {
        return a;
    }

    if clamp {
        let line = Line::new(a, b);
        return match line.closest_point(&geo::Point::from(geo::Coord::from(p))) {
            Closest::Intersection(q) | Closest::SinglePoint(q) => Point::new(q.x(), q.y()),
            Closest::Indeterminate => a,
        };
    }

    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let t = (p.x - a.x).mul_add(dx, (p.y - a.y) * dy) / length_sq;
    Point::new(t.mul_add(dx, a.x), t.mul_add(dy, a.y))
}

/// Projection of a point onto one polygon edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Projection {
    /// Index of the edge the point was projected onto.
    pub edge: usize,
    /// The projected point on the edge.
    pub point: Point,
    /// Distance from the source point to `point`, in pixels.
    pub distance: f64,
}

/// Project `point` onto every edge of the closed polygon `vertices`.
///
/// Edge `i` runs from `vertices[i]` to `vertices[(i + 1) % n]`.
/// Projections are clamped to the edges.
#[must_use]
pub fn project_onto_edges(point: Point, vertices: &[Point]) -> Vec<Projection> {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let projected = orthogonal_projection(vertices[i], vertices[(i + 1) % n], point, true);
            Projection {
                edge: i,
                point: projected,
                distance: point.distance(projected),
            }
        })
        .collect()
}

/// Grain direction an outline edge runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeAxis {
    /// Top and bottom edges.
    Weft,
    /// Left and right edges.
    Warp,
}

impl EdgeAxis {
    /// Lower-case name used in check names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Weft => "weft",
            Self::Warp => "warp",
        }
    }
}

/// Position of an edge on the outline, in iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePosition {
    Top,
    Right,
    Bottom,
    Left,
}

impl EdgePosition {
    /// All positions in iteration order.
    pub const ALL: [Self; 4] = [Self::Top, Self::Right, Self::Bottom, Self::Left];

    /// Grain axis of this edge. Alternates around the perimeter.
    #[must_use]
    pub const fn axis(self) -> EdgeAxis {
        match self {
            Self::Top | Self::Bottom => EdgeAxis::Weft,
            Self::Right | Self::Left => EdgeAxis::Warp,
        }
    }

    /// Edge label, e.g. `top_weft_edge`.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Top => "top_weft_edge",
            Self::Right => "right_warp_edge",
            Self::Bottom => "bottom_weft_edge",
            Self::Left => "left_warp_edge",
        }
    }
}

/// One side of a [`Square`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Edge {
    pub start: Point,
    pub end: Point,
    pub position: EdgePosition,
}

impl Edge {
    /// Corner-to-corner length in pixels.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.start.distance(self.end)
    }

    /// Grain axis of this edge.
    #[must_use]
    pub const fn axis(&self) -> EdgeAxis {
        self.position.axis()
    }
}

/// The four outline corners of a material sheet.
///
/// Corners are stored as top-left, top-right, bottom-right, bottom-left,
/// so walking them in order traces top, right, bottom and left edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Square {
    corners: [Point; 4],
}

impl Square {
    /// Build a square from corners in top-left, top-right, bottom-right,
    /// bottom-left order.
    #[must_use]
    pub const fn new(corners: [Point; 4]) -> Self {
        Self { corners }
    }

    /// Corners in cyclic order.
    #[must_use]
    pub const fn corners(&self) -> [Point; 4] {
        self.corners
    }

    /// Edges in top, right, bottom, left order.
    #[must_use]
    pub fn edges(&self) -> [Edge; 4] {
        EdgePosition::ALL.map(|position| {
            let i = position as usize;
            Edge {
                start: self.corners[i],
                end: self.corners[(i + 1) % 4],
                position,
            }
        })
    }

    /// Clamped projections of `point` onto the four edges, in edge order.
    #[must_use]
    pub fn projections(&self, point: Point) -> Vec<Projection> {
        project_onto_edges(point, &self.corners)
    }

    /// The closest clamped projection of `point` onto the two edges of
    /// `axis`. Ties go to the earlier edge.
    #[must_use]
    pub fn nearest_projection(&self, point: Point, axis: EdgeAxis) -> Projection {
        let edges = self.edges();
        self.projections(point)
            .into_iter()
            .filter(|proj| edges[proj.edge].axis() == axis)
            .reduce(|best, proj| if proj.distance < best.distance { proj } else { best })
            .unwrap_or(Projection {
                edge: 0,
                point: self.corners[0],
                distance: point.distance(self.corners[0]),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn approx(a: Point, b: Point) -> bool {
        a.distance(b) < EPS
    }

    fn unit_square() -> Square {
        Square::new([
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 20.0),
            Point::new(0.0, 20.0),
        ])
    }

    // --- orthogonal_projection tests ---

    #[test]
    fn projection_onto_horizontal_segment() {
        let q = orthogonal_projection(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(4.0, 7.0),
            true,
        );
        assert!(approx(q, Point::new(4.0, 0.0)));
    }

    #[test]
    fn degenerate_segment_returns_start() {
        let a = Point::new(3.0, 3.0);
        for clamp in [true, false] {
            let q = orthogonal_projection(a, a, Point::new(10.0, -4.0), clamp);
            assert!(q.x.is_finite() && q.y.is_finite());
            assert!(approx(q, a));
        }
    }

    #[test]
    fn clamped_projection_stays_on_segment() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 10.0);
        for p in [
            Point::new(-20.0, -3.0),
            Point::new(30.0, 12.0),
            Point::new(5.0, -5.0),
            Point::new(100.0, 100.0),
        ] {
            let q = orthogonal_projection(a, b, p, true);
            let along = a.distance(q) + q.distance(b);
            assert!((along - a.distance(b)).abs() < 1e-6, "{q:?} off segment");
        }
    }

    #[test]
    fn unclamped_projection_may_leave_segment() {
        let q = orthogonal_projection(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(25.0, 3.0),
            false,
        );
        assert!(approx(q, Point::new(25.0, 0.0)));

        let clamped = orthogonal_projection(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(25.0, 3.0),
            true,
        );
        assert!(approx(clamped, Point::new(10.0, 0.0)));
    }

    // --- project_onto_edges tests ---

    #[test]
    fn projections_cover_every_edge() {
        let sq = unit_square();
        let projections = project_onto_edges(Point::new(2.0, 5.0), &sq.corners());
        assert_eq!(projections.len(), 4);
        assert!((projections[0].distance - 5.0).abs() < EPS);
        assert!((projections[1].distance - 8.0).abs() < EPS);
        assert!((projections[2].distance - 15.0).abs() < EPS);
        assert!((projections[3].distance - 2.0).abs() < EPS);
    }

    // --- Square tests ---

    #[test]
    fn edges_in_top_right_bottom_left_order() {
        let edges = unit_square().edges();
        let labels: Vec<_> = edges.iter().map(|e| e.position.label()).collect();
        assert_eq!(
            labels,
            ["top_weft_edge", "right_warp_edge", "bottom_weft_edge", "left_warp_edge"]
        );
        assert!((edges[0].length() - 10.0).abs() < EPS);
        assert!((edges[1].length() - 20.0).abs() < EPS);
    }

    #[test]
    fn rotating_corners_rotates_edge_labels() {
        let original = unit_square();
        let mut rotated_corners = original.corners();
        rotated_corners.rotate_left(1);
        let rotated = Square::new(rotated_corners);

        let before = original.edges();
        let after = rotated.edges();
        for i in 0..4 {
            // The segment that was edge i + 1 is now edge i, and it takes
            // the label of position i.
            let moved = before[(i + 1) % 4];
            assert!(approx(after[i].start, moved.start));
            assert!(approx(after[i].end, moved.end));
            assert_eq!(after[i].position, before[i].position);
            assert_ne!(after[i].axis(), moved.axis());
        }
    }

    #[test]
    fn nearest_projection_per_axis() {
        let sq = unit_square();
        let p = Point::new(2.0, 5.0);

        let warp = sq.nearest_projection(p, EdgeAxis::Warp);
        assert_eq!(warp.edge, 3);
        assert!(approx(warp.point, Point::new(0.0, 5.0)));

        let weft = sq.nearest_projection(p, EdgeAxis::Weft);
        assert_eq!(weft.edge, 0);
        assert!(approx(weft.point, Point::new(2.0, 0.0)));
    }
}
