//! Overlay drawing for the operator's measurement view.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::types::{DistanceMeasurement, EvalBox};

/// Half-width of measurement lines, in pixels.
const LINE_HALF_WIDTH: i32 = 5;

/// Thickness of defect box outlines, in pixels.
const BOX_THICKNESS: i32 = 10;

const DEFECT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Line colour of the measurement at `index`.
///
/// Cycles through the eight corners of the RGB cube, black included.
#[must_use]
pub fn measurement_color(index: usize) -> Rgb<u8> {
    let c = index % 8;
    let channel = |bit: usize| if c & bit == 0 { 0 } else { 250 };
    Rgb([channel(1), channel(2), channel(4)])
}

/// Draw every measurement as a thick line and every defect as a green
/// rectangle on a copy of `image`.
#[must_use]
pub fn annotate(image: &RgbImage, measurements: &[DistanceMeasurement], defects: &[EvalBox]) -> RgbImage {
    let mut out = image.clone();

    for (index, m) in measurements.iter().enumerate() {
        let color = measurement_color(index);
        let (p1, p2) = (m.p1(), m.p2());
        #[allow(clippy::cast_possible_truncation)]
        let (a, b) = ((p1.x as f32, p1.y as f32), (p2.x as f32, p2.y as f32));
        for offset in -LINE_HALF_WIDTH..=LINE_HALF_WIDTH {
            #[allow(clippy::cast_precision_loss)]
            let o = offset as f32;
            draw_line_segment_mut(&mut out, (a.0 + o, a.1), (b.0 + o, b.1), color);
            draw_line_segment_mut(&mut out, (a.0, a.1 + o), (b.0, b.1 + o), color);
        }
    }

    for defect in defects {
        let (x, y) = defect.bounds.top_left();
        let (w, h) = (defect.bounds.width(), defect.bounds.height());
        for inset in 0..BOX_THICKNESS {
            let Some(rect) = inset_rect(x, y, w, h, inset) else {
                break;
            };
            draw_hollow_rect_mut(&mut out, rect, DEFECT_COLOR);
        }
    }

    out
}

fn inset_rect(x: u32, y: u32, w: u32, h: u32, inset: i32) -> Option<Rect> {
    let inset_u = u32::try_from(inset).ok()?;
    let width = w.checked_sub(2 * inset_u).filter(|&v| v > 0)?;
    let height = h.checked_sub(2 * inset_u).filter(|&v| v > 0)?;
    let left = i32::try_from(x).ok()? + inset;
    let top = i32::try_from(y).ok()? + inset;
    Some(Rect::at(left, top).of_size(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Band, BoundingBox, Point};

    #[test]
    fn colors_cycle_through_eight() {
        assert_eq!(measurement_color(0), Rgb([0, 0, 0]));
        assert_eq!(measurement_color(1), Rgb([250, 0, 0]));
        assert_eq!(measurement_color(6), Rgb([0, 250, 250]));
        assert_eq!(measurement_color(7), Rgb([250, 250, 250]));
        assert_eq!(measurement_color(9), measurement_color(1));
    }

    #[test]
    fn draws_lines_and_boxes() {
        let image = RgbImage::from_pixel(100, 100, Rgb([128, 128, 128]));
        let m = [
            DistanceMeasurement::new("a", Point::new(10.0, 10.0), Point::new(10.0, 10.0), 0.0, Band::new(0.0, 1.0)),
            DistanceMeasurement::new("b", Point::new(10.0, 50.0), Point::new(90.0, 50.0), 80.0, Band::new(0.0, 1.0)),
        ];
        let defects = [EvalBox::new(BoundingBox::new((60, 60), (95, 95)), 0.9, "material_error")];

        let out = annotate(&image, &m, &defects);
        assert_eq!(out.get_pixel(50, 50).0, [250, 0, 0]);
        assert_eq!(out.get_pixel(50, 53).0, [250, 0, 0]);
        assert_eq!(out.get_pixel(60, 80).0, [0, 255, 0]);
        assert_eq!(out.get_pixel(69, 80).0, [0, 255, 0]);
        assert_eq!(out.get_pixel(75, 80).0, [128, 128, 128]);
        // The source is untouched.
        assert_eq!(image.get_pixel(50, 50).0, [128, 128, 128]);
    }

    #[test]
    fn tiny_boxes_do_not_underflow() {
        let image = RgbImage::new(20, 20);
        let defects = [EvalBox::new(BoundingBox::new((5, 5), (8, 8)), 0.9, "material_error")];
        let out = annotate(&image, &[], &defects);
        assert_eq!(out.get_pixel(5, 5).0, [0, 255, 0]);
    }
}
