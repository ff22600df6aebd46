//! Study-area cropping and masking.
//!
//! A pixel belongs to a geometry when its center lies strictly inside it.

use crate::types::{GeoTransform, LandCoverError, LandCoverResult, Raster, RasterElement};
use geo::{BoundingRect, Contains, Geometry, Point, Rect};
use ndarray::s;

/// Whether `geometry` is an areal type this module can mask with
pub fn is_areal(geometry: &Geometry<f64>) -> bool {
    matches!(
        geometry,
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_)
    )
}

/// Point-in-area test for the supported areal geometries
pub(crate) fn area_contains(geometry: &Geometry<f64>, x: f64, y: f64) -> bool {
    let point = Point::new(x, y);
    match geometry {
        Geometry::Polygon(p) => p.contains(&point),
        Geometry::MultiPolygon(mp) => mp.contains(&point),
        Geometry::Rect(r) => r.to_polygon().contains(&point),
        _ => false,
    }
}

/// Pixel window `(row, col, rows, cols)` covering `rect`, clamped to the grid
pub(crate) fn pixel_window(
    transform: &GeoTransform,
    rows: usize,
    cols: usize,
    rect: &Rect<f64>,
) -> Option<(usize, usize, usize, usize)> {
    let (min, max) = (rect.min(), rect.max());
    let corners = [(min.x, min.y), (min.x, max.y), (max.x, min.y), (max.x, max.y)];

    let mut row_lo = f64::INFINITY;
    let mut row_hi = f64::NEG_INFINITY;
    let mut col_lo = f64::INFINITY;
    let mut col_hi = f64::NEG_INFINITY;
    for (x, y) in corners {
        let (r, c) = transform.geo_to_pixel(x, y)?;
        row_lo = row_lo.min(r);
        row_hi = row_hi.max(r);
        col_lo = col_lo.min(c);
        col_hi = col_hi.max(c);
    }

    let r0 = row_lo.floor().max(0.0) as usize;
    let c0 = col_lo.floor().max(0.0) as usize;
    let r1 = (row_hi.ceil().max(0.0) as usize).min(rows);
    let c1 = (col_hi.ceil().max(0.0) as usize).min(cols);
    (r0 < r1 && c0 < c1).then(|| (r0, c0, r1 - r0, c1 - c0))
}

/// Restrict a raster to a boundary geometry.
///
/// The result covers the boundary's extent (snapped outward to whole pixels)
/// and every pixel whose center falls outside the boundary is set to no-data
/// in all bands.
pub fn crop_to_geometry<T: RasterElement>(
    raster: &Raster<T>,
    boundary: &Geometry<f64>,
) -> LandCoverResult<Raster<T>> {
    if !is_areal(boundary) {
        return Err(LandCoverError::Unsupported(
            "study area must be a Polygon, MultiPolygon or Rect".to_string(),
        ));
    }
    let rect = boundary
        .bounding_rect()
        .ok_or_else(|| LandCoverError::InvalidRaster("study area geometry is empty".to_string()))?;

    let (row, col, rows, cols) = pixel_window(raster.geo_transform(), raster.rows(), raster.cols(), &rect)
        .ok_or_else(|| {
            LandCoverError::InvalidRaster(format!(
                "study area {:?} does not overlap raster bounds {:?}",
                rect,
                raster.bounds()
            ))
        })?;
    log::info!(
        "Cropping {}x{} raster to {}x{} window at ({}, {})",
        raster.rows(),
        raster.cols(),
        rows,
        cols,
        row,
        col
    );

    let window = raster.window(row, col, rows, cols)?;
    let transform = *window.geo_transform();
    let band_names = window.band_names().to_vec();
    let fill = raster.nodata_fill();
    let nodata = raster.nodata().or(Some(fill));

    let mut data = window.into_data();
    let mut masked = 0usize;
    for r in 0..rows {
        for c in 0..cols {
            let (x, y) = transform.pixel_center(r, c);
            if !area_contains(boundary, x, y) {
                data.slice_mut(s![.., r, c]).fill(fill);
                masked += 1;
            }
        }
    }
    log::debug!("Masked {} of {} pixels outside the study area", masked, rows * cols);

    Ok(Raster::new(data, band_names)?
        .with_geo_transform(transform)
        .with_nodata(nodata))
}
