//! Circular feature measurement via the Euclidean distance transform.
//!
//! Inside a binarized search box the feature is the set of nonzero
//! pixels. The pixel farthest from any zero pixel is the centre of the
//! largest inscribed circle, and its distance is the radius.

use image::{GrayImage, Luma};
use imageproc::distance_transform::euclidean_squared_distance_transform;
use serde::Serialize;

use crate::types::{BoundingBox, Dimensions, Point};

/// Centre and radius of a circular feature, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CircleFit {
    pub center: Point,
    pub radius: f64,
}

impl CircleFit {
    /// The point on the circle directly left of the centre.
    #[must_use]
    pub fn left_rim(&self) -> Point {
        Point::new(self.center.x - self.radius, self.center.y)
    }
}

/// Fit the largest inscribed circle of the nonzero region of `binary`
/// inside `search`.
///
/// A search box that is empty, entirely feature or entirely background
/// yields a zero radius at the box centre.
#[must_use]
pub fn fit_circle(binary: &GrayImage, search: BoundingBox) -> CircleFit {
    let search = search.clip_to(Dimensions::of(binary));
    let (ox, oy) = search.top_left();
    let center_of_box = Point::new(
        f64::from(ox) + f64::from(search.width()) / 2.0,
        f64::from(oy) + f64::from(search.height()) / 2.0,
    );
    let degenerate = CircleFit {
        center: center_of_box,
        radius: 0.0,
    };
    if search.is_empty() {
        return degenerate;
    }

    // The transform measures distance to the nearest nonzero pixel, so
    // flip the crop to make the background the foreground.
    let inverted = GrayImage::from_fn(search.width(), search.height(), |x, y| {
        let v = binary.get_pixel(ox + x, oy + y).0[0];
        Luma([if v > 0 { 0 } else { 255 }])
    });
    let distances = euclidean_squared_distance_transform(&inverted);

    // With no background pixel at all the transform reports a sentinel
    // far beyond anything reachable inside the box.
    let limit = f64::from(search.width()).powi(2) + f64::from(search.height()).powi(2);
    let mut best: Option<((u32, u32), f64)> = None;
    for (x, y, d) in distances.enumerate_pixels() {
        let d = d.0[0];
        if d <= limit && best.is_none_or(|(_, b)| d > b) {
            best = Some(((x, y), d));
        }
    }

    match best {
        Some(((x, y), d)) if d > 0.0 => CircleFit {
            center: Point::new(f64::from(ox + x), f64::from(oy + y)),
            radius: d.sqrt(),
        },
        _ => degenerate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Binary image with a filled disc of the given radius.
    fn disc(width: u32, height: u32, cx: f64, cy: f64, r: f64) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let p = Point::new(f64::from(x), f64::from(y));
            Luma([if p.distance(Point::new(cx, cy)) <= r { 255 } else { 0 }])
        })
    }

    #[test]
    fn recovers_disc_centre_and_radius() {
        let img = disc(200, 150, 90.0, 70.0, 25.0);
        let fit = fit_circle(&img, BoundingBox::new((40, 20), (150, 130)));
        assert!(fit.center.distance(Point::new(90.0, 70.0)) < 1.5, "{fit:?}");
        assert!((fit.radius - 25.0).abs() < 2.0, "{fit:?}");
    }

    #[test]
    fn left_rim_is_radius_left_of_centre() {
        let fit = CircleFit {
            center: Point::new(10.0, 5.0),
            radius: 4.0,
        };
        assert_eq!(fit.left_rim(), Point::new(6.0, 5.0));
    }

    #[test]
    fn empty_box_is_degenerate() {
        let img = disc(50, 50, 25.0, 25.0, 10.0);
        let fit = fit_circle(&img, BoundingBox::new((10, 10), (10, 30)));
        assert!(fit.radius.abs() < f64::EPSILON);
        assert_eq!(fit.center, Point::new(10.0, 20.0));
    }

    #[test]
    fn featureless_box_is_degenerate() {
        let blank = GrayImage::new(40, 40);
        let fit = fit_circle(&blank, BoundingBox::new((0, 0), (40, 40)));
        assert!(fit.radius.abs() < f64::EPSILON);
        assert_eq!(fit.center, Point::new(20.0, 20.0));
    }

    #[test]
    fn fully_covered_box_is_degenerate() {
        let full = GrayImage::from_pixel(30, 30, Luma([255]));
        let fit = fit_circle(&full, BoundingBox::new((0, 0), (30, 30)));
        assert!(fit.radius.abs() < f64::EPSILON);
    }
}
