//! Geometry Backend
//!
//! Thin layer over `geo`: the shapes agents occupy, their envelopes, exact
//! distances, affine translation and DE-9IM relations. Everything above this
//! module talks in `Shape`/`Envelope` and never touches `geo` directly.

pub mod envelope;
pub mod relation;

pub use envelope::Envelope;
pub use relation::{PreparedShape, SpatialRelation};

use geo::{
    BoundingRect, Centroid, Coord, EuclideanDistance, Geometry, LineString, Point, Polygon,
    Translate,
};
use serde::{Deserialize, Serialize};

/// A location in world space. `z` is 0 for planar models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Location { x, y, z: 0.0 }
    }

    pub fn new_3d(x: f64, y: f64, z: f64) -> Self {
        Location { x, y, z }
    }

    pub fn plus(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Location {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// Planar distance, z ignored.
    pub fn distance_to(&self, other: &Location) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    pub fn to_shape(&self) -> Shape {
        Shape::point_3d(self.x, self.y, self.z)
    }
}

/// The planar part of a shape. Only these three kinds are ever built, so every
/// distance pair below is covered explicitly.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeKind {
    Point(Point<f64>),
    Line(LineString<f64>),
    Polygon(Polygon<f64>),
}

/// Geometry of an agent or of a query probe.
#[derive(Clone, Debug, PartialEq)]
pub struct Shape {
    kind: ShapeKind,
    z: f64,
    depth: Option<f64>,
}

impl Shape {
    pub fn point(x: f64, y: f64) -> Self {
        Self::point_3d(x, y, 0.0)
    }

    pub fn point_3d(x: f64, y: f64, z: f64) -> Self {
        Shape {
            kind: ShapeKind::Point(Point::new(x, y)),
            z,
            depth: None,
        }
    }

    /// Axis-aligned rectangle from two corners.
    pub fn rect(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::from_envelope(&Envelope::new(x1, y1, x2, y2))
    }

    /// Square of side `side` centred on (cx, cy).
    pub fn square(cx: f64, cy: f64, side: f64) -> Self {
        let h = side / 2.0;
        Self::rect(cx - h, cy - h, cx + h, cy + h)
    }

    /// Box of `size` on every axis anchored at the origin; a 3-D environment.
    pub fn cube(size: f64) -> Self {
        Self::rect(0.0, 0.0, size, size).with_depth(size)
    }

    /// Polygon from its exterior ring; the ring is closed automatically.
    pub fn polygon(exterior: Vec<(f64, f64)>) -> Self {
        Shape {
            kind: ShapeKind::Polygon(Polygon::new(LineString::from(exterior), vec![])),
            z: 0.0,
            depth: None,
        }
    }

    pub fn line(points: Vec<(f64, f64)>) -> Self {
        Shape {
            kind: ShapeKind::Line(LineString::from(points)),
            z: 0.0,
            depth: None,
        }
    }

    pub fn from_envelope(env: &Envelope) -> Self {
        Shape {
            kind: ShapeKind::Polygon(env.to_rect().to_polygon()),
            z: env.min_z,
            depth: None,
        }
    }

    pub fn with_depth(mut self, depth: f64) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_z(mut self, z: f64) -> Self {
        self.z = z;
        self
    }

    pub fn kind(&self) -> &ShapeKind {
        &self.kind
    }

    pub fn depth(&self) -> Option<f64> {
        self.depth
    }

    /// Topological dimension: 0 point, 1 line, 2 area.
    pub fn dimension(&self) -> u8 {
        match self.kind {
            ShapeKind::Point(_) => 0,
            ShapeKind::Line(_) => 1,
            ShapeKind::Polygon(_) => 2,
        }
    }

    /// Centroid, carrying the shape's z.
    pub fn location(&self) -> Location {
        let centre = match &self.kind {
            ShapeKind::Point(p) => Some(*p),
            ShapeKind::Line(l) => l.centroid(),
            ShapeKind::Polygon(p) => p.centroid(),
        };
        match centre {
            Some(p) => Location::new_3d(p.x(), p.y(), self.z),
            None => {
                let (x, y) = self.envelope().center();
                Location::new_3d(x, y, self.z)
            }
        }
    }

    pub fn envelope(&self) -> Envelope {
        let rect = match &self.kind {
            ShapeKind::Point(p) => Some(p.bounding_rect()),
            ShapeKind::Line(l) => l.bounding_rect(),
            ShapeKind::Polygon(p) => p.bounding_rect(),
        };
        let env = match rect {
            Some(r) => Envelope::from(r),
            None => Envelope::from_point(f64::NAN, f64::NAN),
        };
        env.with_z(self.z, self.z + self.depth.unwrap_or(0.0))
    }

    /// Affine translation in the plane. No rotation, no scale.
    pub fn translated(&self, dx: f64, dy: f64) -> Shape {
        let kind = match &self.kind {
            ShapeKind::Point(p) => ShapeKind::Point(p.translate(dx, dy)),
            ShapeKind::Line(l) => ShapeKind::Line(l.translate(dx, dy)),
            ShapeKind::Polygon(p) => ShapeKind::Polygon(p.translate(dx, dy)),
        };
        Shape {
            kind,
            z: self.z,
            depth: self.depth,
        }
    }

    /// Exact planar distance, 0 when the shapes intersect.
    pub fn distance(&self, other: &Shape) -> f64 {
        use ShapeKind::*;
        match (&self.kind, &other.kind) {
            (Point(a), Point(b)) => a.euclidean_distance(b),
            (Point(a), Line(b)) => a.euclidean_distance(b),
            (Point(a), Polygon(b)) => a.euclidean_distance(b),
            (Line(a), Point(b)) => a.euclidean_distance(b),
            (Line(a), Line(b)) => a.euclidean_distance(b),
            (Line(a), Polygon(b)) => a.euclidean_distance(b),
            (Polygon(a), Point(b)) => a.euclidean_distance(b),
            (Polygon(a), Line(b)) => a.euclidean_distance(b),
            (Polygon(a), Polygon(b)) => a.euclidean_distance(b),
        }
    }

    /// Whether `loc` lies inside or on the boundary of this shape.
    pub fn covers_location(&self, loc: &Location) -> bool {
        let probe = Shape::point(loc.x, loc.y);
        self.relates_to(&probe, SpatialRelation::Inside)
    }

    /// `self <relation> other`, evaluated through the DE-9IM matrix.
    pub fn relates_to(&self, other: &Shape, relation: SpatialRelation) -> bool {
        PreparedShape::new(self).accepts(other, relation)
    }

    pub fn to_geometry(&self) -> Geometry<f64> {
        match &self.kind {
            ShapeKind::Point(p) => Geometry::Point(*p),
            ShapeKind::Line(l) => Geometry::LineString(l.clone()),
            ShapeKind::Polygon(p) => Geometry::Polygon(p.clone()),
        }
    }

    /// Coordinates of the outline; a polygon's ring comes back closed.
    pub fn coords(&self) -> Vec<(f64, f64)> {
        let to_pair = |c: &Coord<f64>| (c.x, c.y);
        match &self.kind {
            ShapeKind::Point(p) => vec![(p.x(), p.y())],
            ShapeKind::Line(l) => l.coords().map(to_pair).collect(),
            ShapeKind::Polygon(p) => p.exterior().coords().map(to_pair).collect(),
        }
    }
}

impl From<Location> for Shape {
    fn from(loc: Location) -> Self {
        loc.to_shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_to_square_distance() {
        let sq = Shape::rect(0.0, 0.0, 2.0, 2.0);
        let p = Shape::point(5.0, 1.0);
        assert!((sq.distance(&p) - 3.0).abs() < 1e-9);
        assert!((p.distance(&sq) - 3.0).abs() < 1e-9);
        assert_eq!(sq.distance(&Shape::point(1.0, 1.0)), 0.0);
    }

    #[test]
    fn overlapping_squares_are_at_distance_zero() {
        let a = Shape::square(0.0, 0.0, 2.0);
        let b = Shape::square(1.0, 1.0, 2.0);
        assert_eq!(a.distance(&b), 0.0);
    }

    #[test]
    fn translation_moves_envelope() {
        let s = Shape::rect(0.0, 0.0, 1.0, 1.0).translated(10.0, -5.0);
        let env = s.envelope();
        assert_eq!(env.min_x, 10.0);
        assert_eq!(env.min_y, -5.0);
        assert_eq!(env.max_x, 11.0);
    }

    #[test]
    fn location_is_centroid_with_z() {
        let s = Shape::rect(0.0, 0.0, 4.0, 2.0).with_z(3.0);
        let loc = s.location();
        assert!((loc.x - 2.0).abs() < 1e-9);
        assert!((loc.y - 1.0).abs() < 1e-9);
        assert_eq!(loc.z, 3.0);
    }

    #[test]
    fn polygon_outline_is_closed() {
        let ring = Shape::polygon(vec![(0.0, 0.0), (3.0, 0.0), (0.0, 3.0)]).coords();
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.first(), ring.last());
        assert_eq!(Shape::point(1.0, 2.0).coords(), vec![(1.0, 2.0)]);
    }

    #[test]
    fn cube_carries_depth() {
        let c = Shape::cube(100.0);
        assert_eq!(c.depth(), Some(100.0));
        assert_eq!(c.envelope().depth(), 100.0);
    }

    #[test]
    fn covers_location_includes_boundary() {
        let env = Shape::rect(0.0, 0.0, 10.0, 10.0);
        assert!(env.covers_location(&Location::new(10.0, 5.0)));
        assert!(env.covers_location(&Location::new(3.0, 3.0)));
        assert!(!env.covers_location(&Location::new(10.5, 5.0)));
    }
}
