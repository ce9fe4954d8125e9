//! Spatial relations
//!
//! Named relations between a query shape and an agent shape, each mapped onto
//! a DE-9IM pattern of `geo`'s relate matrix.

use super::{Envelope, Shape};
use geo::relate::IntersectionMatrix;
use geo::{Geometry, Relate};
use serde::{Deserialize, Serialize};

/// Relation tested by `agents_in_relation`, read as "source <relation> agent".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpatialRelation {
    /// intersects
    Overlap,
    /// covered-by: the agent covers the source
    Cover,
    /// covers: the agent lies inside the source
    Inside,
    /// touches
    Touch,
    /// crosses
    Cross,
    /// overlaps
    PartiallyOverlap,
}

impl SpatialRelation {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "overlap" | "overlapping" => Some(Self::Overlap),
            "cover" | "covering" => Some(Self::Cover),
            "inside" => Some(Self::Inside),
            "touch" | "touching" => Some(Self::Touch),
            "cross" | "crossing" => Some(Self::Cross),
            "partially_overlap" | "partially_overlapping" => Some(Self::PartiallyOverlap),
            _ => None,
        }
    }
}

const COVERS: [&str; 4] = ["T*****FF*", "*T****FF*", "***T**FF*", "****T*FF*"];
const COVERED_BY: [&str; 4] = ["T*F**F***", "*TF**F***", "**FT*F***", "**F*TF***"];
const TOUCHES: [&str; 3] = ["FT*******", "F**T*****", "F***T****"];

fn matches_any(matrix: &IntersectionMatrix, patterns: &[&str]) -> bool {
    patterns
        .iter()
        .any(|p| matrix.matches(p).unwrap_or(false))
}

fn matches_one(matrix: &IntersectionMatrix, pattern: &str) -> bool {
    matrix.matches(pattern).unwrap_or(false)
}

/// Evaluate `relation` on a computed matrix. `da`/`db` are the dimensions of
/// the two operands, needed by crosses/overlaps.
fn evaluate(matrix: &IntersectionMatrix, relation: SpatialRelation, da: u8, db: u8) -> bool {
    match relation {
        SpatialRelation::Overlap => !matches_one(matrix, "FF*FF****"),
        SpatialRelation::Inside => matches_any(matrix, &COVERS),
        SpatialRelation::Cover => matches_any(matrix, &COVERED_BY),
        SpatialRelation::Touch => {
            if da == 0 && db == 0 {
                return false;
            }
            matches_any(matrix, &TOUCHES)
        }
        SpatialRelation::Cross => match (da, db) {
            (1, 1) => matches_one(matrix, "0********"),
            (a, b) if a < b => matches_one(matrix, "T*T******"),
            (a, b) if a > b => matches_one(matrix, "T*****T**"),
            _ => false,
        },
        SpatialRelation::PartiallyOverlap => match (da, db) {
            (0, 0) | (2, 2) => matches_one(matrix, "T*T***T**"),
            (1, 1) => matches_one(matrix, "1*T***T**"),
            _ => false,
        },
    }
}

struct PreparedPart {
    geometry: Geometry<f64>,
    envelope: Envelope,
    dimension: u8,
}

/// A query shape pre-processed for repeated relation tests against many agents.
///
/// Keeps the converted `geo` geometry and its envelope so each test starts with
/// a box rejection. A prepared shape may hold several parts (the periodic
/// images of a source); a relation holds when it holds for any part.
pub struct PreparedShape {
    parts: Vec<PreparedPart>,
}

impl PreparedShape {
    pub fn new(shape: &Shape) -> Self {
        Self::from_parts(std::slice::from_ref(shape))
    }

    pub fn from_parts(shapes: &[Shape]) -> Self {
        PreparedShape {
            parts: shapes
                .iter()
                .map(|s| PreparedPart {
                    geometry: s.to_geometry(),
                    envelope: s.envelope(),
                    dimension: s.dimension(),
                })
                .collect(),
        }
    }

    pub fn accepts(&self, other: &Shape, relation: SpatialRelation) -> bool {
        let other_env = other.envelope();
        let mut other_geom: Option<Geometry<f64>> = None;
        for part in &self.parts {
            // Every supported relation needs the two shapes to meet.
            if !part.envelope.intersects(&other_env) {
                continue;
            }
            let geom = other_geom.get_or_insert_with(|| other.to_geometry());
            let matrix = part.geometry.relate(&*geom);
            if evaluate(&matrix, relation, part.dimension, other.dimension()) {
                return true;
            }
        }
        false
    }
}
