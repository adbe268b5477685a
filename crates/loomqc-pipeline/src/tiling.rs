//! Overlapping square tiles for patch-wise defect classification.

use crate::types::BoundingBox;

/// Label given to tiles the classifier flags.
pub const MATERIAL_ERROR: &str = "material_error";

/// Cover a `width`×`height` image with `size`×`size` tiles.
///
/// Tiles step by `size / 2` across a grid anchored at the top-left
/// corner, then a column flush with the right border, a row flush with
/// the bottom border and one tile in the bottom-right corner, so every
/// pixel of an image at least `size` wide and tall is covered. Tiles that
/// would reach past the image are skipped, so an image smaller than one
/// tile yields none.
#[must_use]
pub fn tile_layout(width: u32, height: u32, size: u32) -> Vec<BoundingBox> {
    let stride = size / 2;
    if size == 0 || stride == 0 || width < size || height < size {
        return Vec::new();
    }

    let fits = |x: u32, y: u32| x + size <= width && y + size <= height;
    let rows = height / stride;
    let cols = width / stride;
    let (right, bottom) = (width - size, height - size);

    let grid = (0..rows).flat_map(|i| (0..cols).map(move |j| (j * stride, i * stride)));
    let right_column = (0..rows).map(|i| (right, i * stride));
    let bottom_row = (0..cols).map(|j| (j * stride, bottom));
    let corner = std::iter::once((right, bottom));

    grid.chain(right_column)
        .chain(bottom_row)
        .chain(corner)
        .filter(|&(x, y)| fits(x, y))
        .map(|(x, y)| BoundingBox::from_origin_size(x, y, size, size))
        .collect()
}

/// Default tile size for a scan resolution, if one is known.
#[must_use]
pub const fn default_tile_size(dpi: u32) -> Option<u32> {
    match dpi {
        600 => Some(1024),
        300 => Some(512),
        _ => None,
    }
}
