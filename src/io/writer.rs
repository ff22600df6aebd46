//! GeoTIFF output of classified maps and reflectance stacks

use crate::core::classify::ClassifiedRaster;
use crate::types::{LandCoverError, LandCoverResult, ReflectanceRaster};
use std::path::Path;

#[cfg(feature = "gdal")]
mod gtiff {
    use super::*;
    use crate::types::{GeoTransform, CLASS_NODATA};
    use gdal::raster::{Buffer, GdalType};
    use gdal::{Dataset, DriverManager, Metadata};

    pub(super) fn create<T: GdalType + Copy>(
        path: &Path,
        width: usize,
        height: usize,
        bands: usize,
        transform: &GeoTransform,
        projection: Option<&str>,
    ) -> LandCoverResult<Dataset> {
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<T, _>(
            path,
            width as isize,
            height as isize,
            bands as isize,
        )?;
        dataset.set_geo_transform(&transform.to_gdal())?;
        if let Some(wkt) = projection {
            dataset.set_projection(wkt)?;
        }
        Ok(dataset)
    }

    pub(super) fn write_classified(
        map: &ClassifiedRaster,
        path: &Path,
        projection: Option<&str>,
    ) -> LandCoverResult<()> {
        let (height, width) = map.codes().dim();
        let mut dataset = create::<u16>(path, width, height, 1, map.geo_transform(), projection)?;
        for (code, label) in map.classes().iter() {
            dataset.set_metadata_item(&format!("CLASS_{}", code), label, "")?;
        }

        let mut band = dataset.rasterband(1)?;
        let data: Vec<u16> = map.codes().iter().copied().collect();
        band.write((0, 0), (width, height), &Buffer::new((width, height), data))?;
        band.set_no_data_value(Some(CLASS_NODATA as f64))?;
        band.set_description("land_cover")?;
        Ok(())
    }

    pub(super) fn write_reflectance(
        raster: &ReflectanceRaster,
        path: &Path,
        projection: Option<&str>,
    ) -> LandCoverResult<()> {
        let (bands, height, width) = raster.dim();
        let dataset = create::<f32>(path, width, height, bands, raster.geo_transform(), projection)?;
        for (i, name) in raster.band_names().iter().enumerate() {
            let mut band = dataset.rasterband(i as isize + 1)?;
            let data: Vec<f32> = raster
                .band(i)
                .ok_or_else(|| LandCoverError::Processing(format!("band {} missing", i)))?
                .iter()
                .copied()
                .collect();
            band.write((0, 0), (width, height), &Buffer::new((width, height), data))?;
            band.set_no_data_value(Some(f64::NAN))?;
            band.set_description(name)?;
        }
        Ok(())
    }
}

/// Write a classified map as a single-band UInt16 GeoTIFF (no-data 65535).
pub fn write_classified<P: AsRef<Path>>(
    map: &ClassifiedRaster,
    path: P,
    projection: Option<&str>,
) -> LandCoverResult<()> {
    log::info!(
        "Writing {}x{} classified map to {}",
        map.rows(),
        map.cols(),
        path.as_ref().display()
    );
    #[cfg(feature = "gdal")]
    {
        gtiff::write_classified(map, path.as_ref(), projection)
    }
    #[cfg(not(feature = "gdal"))]
    {
        let _ = (map, projection);
        Err(LandCoverError::Unsupported(
            "writing GeoTIFF requires the `gdal` feature".to_string(),
        ))
    }
}

/// Treat a write refused for lack of the `gdal` feature as skipped (`Ok(false)`).
///
/// Every other failure is returned unchanged.
pub fn skip_unsupported(result: LandCoverResult<()>) -> LandCoverResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(LandCoverError::Unsupported(reason)) => {
            log::warn!("Skipping GeoTIFF output: {}", reason);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Write corrected reflectance as a Float32 GeoTIFF, one band per layer (no-data NaN).
pub fn write_reflectance<P: AsRef<Path>>(
    raster: &ReflectanceRaster,
    path: P,
    projection: Option<&str>,
) -> LandCoverResult<()> {
    log::info!(
        "Writing {}-band reflectance to {}",
        raster.band_count(),
        path.as_ref().display()
    );
    #[cfg(feature = "gdal")]
    {
        gtiff::write_reflectance(raster, path.as_ref(), projection)
    }
    #[cfg(not(feature = "gdal"))]
    {
        let _ = (raster, projection);
        Err(LandCoverError::Unsupported(
            "writing GeoTIFF requires the `gdal` feature".to_string(),
        ))
    }
}
