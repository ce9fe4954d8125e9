//! Toroidal wrap engine
//!
//! A periodic environment is modelled by surrounding it with its 8 translated
//! copies. Distances and relations are then evaluated between the 9 images of
//! each operand, so nothing downstream needs to know about wrapping.

use crate::geometry::{Location, Shape};

/// The 8 periodic translation vectors of an environment, in compass order:
/// N, NW, W, SW, S, SE, E, NE.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToroidalOffsets {
    vectors: [(f64, f64); 8],
}

impl ToroidalOffsets {
    /// Zero width or height just yields duplicate images.
    pub fn new(width: f64, height: f64) -> Self {
        let (w, h) = (width, height);
        ToroidalOffsets {
            vectors: [
                (0.0, h),
                (w, h),
                (w, 0.0),
                (w, -h),
                (0.0, -h),
                (-w, -h),
                (-w, 0.0),
                (-w, h),
            ],
        }
    }

    pub fn vectors(&self) -> &[(f64, f64); 8] {
        &self.vectors
    }

    /// The shape itself followed by its 8 translated copies.
    pub fn replicate(&self, shape: &Shape) -> [Shape; 9] {
        std::array::from_fn(|i| match i {
            0 => shape.clone(),
            _ => {
                let (dx, dy) = self.vectors[i - 1];
                shape.translated(dx, dy)
            }
        })
    }

    pub fn replicate_location(&self, loc: &Location) -> [Location; 9] {
        std::array::from_fn(|i| match i {
            0 => *loc,
            _ => {
                let (dx, dy) = self.vectors[i - 1];
                loc.plus(dx, dy, 0.0)
            }
        })
    }

    /// Smallest distance between any image of `a` and any image of `b`.
    pub fn wrapped_distance(&self, a: &Shape, b: &Shape) -> f64 {
        images_distance(&self.replicate(a), &self.replicate(b))
    }

    /// The image of `to` closest to `from`.
    pub fn nearest_image(&self, from: &Location, to: &Location) -> Location {
        let mut best = *to;
        let mut best_d = from.distance_to(to);
        for image in self.replicate_location(to).iter().skip(1) {
            let d = from.distance_to(image);
            if d < best_d {
                best = *image;
                best_d = d;
            }
        }
        best
    }
}

/// Minimum distance between two replicated image sets.
pub fn images_distance(a: &[Shape], b: &[Shape]) -> f64 {
    let mut min = f64::INFINITY;
    for sa in a {
        for sb in b {
            let d = sa.distance(sb);
            if d < min {
                min = d;
                if min == 0.0 {
                    return 0.0;
                }
            }
        }
    }
    min
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_follow_compass_order() {
        let offsets = ToroidalOffsets::new(100.0, 50.0);
        assert_eq!(offsets.vectors()[0], (0.0, 50.0));
        assert_eq!(offsets.vectors()[2], (100.0, 0.0));
        assert_eq!(offsets.vectors()[5], (-100.0, -50.0));
        assert_eq!(offsets.vectors()[7], (-100.0, 50.0));
    }

    #[test]
    fn replicate_keeps_identity_first() {
        let offsets = ToroidalOffsets::new(10.0, 10.0);
        let images = offsets.replicate(&Shape::point(1.0, 2.0));
        assert_eq!(images[0], Shape::point(1.0, 2.0));
        assert_eq!(images[1], Shape::point(1.0, 12.0));
        assert_eq!(images[7], Shape::point(-9.0, 2.0));
    }

    #[test]
    fn corners_are_close_across_the_seam() {
        let offsets = ToroidalOffsets::new(100.0, 100.0);
        let a = Shape::point(1.0, 1.0);
        let b = Shape::point(99.0, 99.0);
        assert!((offsets.wrapped_distance(&a, &b) - 8f64.sqrt()).abs() < 1e-9);
        assert!((a.distance(&b) - 98.0 * 2f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn zero_width_duplicates_images() {
        let offsets = ToroidalOffsets::new(0.0, 10.0);
        let images = offsets.replicate(&Shape::point(0.0, 5.0));
        assert_eq!(images[3], images[0]);
        assert_eq!(images[7], images[0]);
        assert_eq!(
            offsets.wrapped_distance(&Shape::point(0.0, 1.0), &Shape::point(0.0, 9.0)),
            2.0
        );
    }

    #[test]
    fn nearest_image_crosses_the_seam() {
        let offsets = ToroidalOffsets::new(100.0, 100.0);
        let image = offsets.nearest_image(&Location::new(95.0, 50.0), &Location::new(5.0, 50.0));
        assert_eq!(image, Location::new(105.0, 50.0));
    }
}
