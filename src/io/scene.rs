use crate::types::{GeoTransform, LandCoverError, LandCoverResult, RawRaster, Raster};
use ndarray::{Array2, Array3, Axis};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Landsat Collection 2 surface-reflectance band file, e.g. `..._SR_B4.TIF`
const SR_BAND_PATTERN: &str = r"(?i)_SR_B(\d+)\.TIF$";

/// Fill value of Landsat Collection 2 surface-reflectance bands
pub const LANDSAT_FILL: u16 = 0;

/// A band to load: the name it carries through the pipeline and its sensor band number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandSpec {
    pub name: String,
    pub number: u8,
}

impl BandSpec {
    pub fn new(name: impl Into<String>, number: u8) -> Self {
        Self {
            name: name.into(),
            number,
        }
    }

    /// Landsat 8/9 OLI reflective bands used for land-cover mapping
    pub fn landsat_oli() -> Vec<BandSpec> {
        vec![
            BandSpec::new("blue", 2),
            BandSpec::new("green", 3),
            BandSpec::new("red", 4),
            BandSpec::new("nir", 5),
            BandSpec::new("swir1", 6),
            BandSpec::new("swir2", 7),
        ]
    }
}

/// A discovered band file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandFile {
    pub number: u8,
    pub path: PathBuf,
}

/// Raw scene bands stacked in `BandSpec` order
#[derive(Debug, Clone)]
pub struct Scene {
    pub raster: RawRaster,
    /// Projection WKT of the first band, if the file carries one
    pub projection: Option<String>,
}

/// List the surface-reflectance band files in `dir`, sorted by band number.
pub fn discover_bands<P: AsRef<Path>>(dir: P) -> LandCoverResult<Vec<BandFile>> {
    let pattern = Regex::new(SR_BAND_PATTERN)
        .map_err(|e| LandCoverError::Processing(format!("band pattern: {}", e)))?;

    let mut bands = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let number = pattern
            .captures(name)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u8>().ok());
        if let Some(number) = number {
            bands.push(BandFile { number, path });
        }
    }
    bands.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.path.cmp(&b.path)));

    log::info!(
        "Found {} surface-reflectance bands in {}",
        bands.len(),
        dir.as_ref().display()
    );
    Ok(bands)
}

/// Pair each requested band with its file, in request order.
pub fn select_bands(files: &[BandFile], specs: &[BandSpec]) -> LandCoverResult<Vec<PathBuf>> {
    specs
        .iter()
        .map(|spec| {
            files
                .iter()
                .find(|f| f.number == spec.number)
                .map(|f| f.path.clone())
                .ok_or_else(|| {
                    LandCoverError::InvalidRaster(format!(
                        "band B{} ({}) not found among {} band files",
                        spec.number,
                        spec.name,
                        files.len()
                    ))
                })
        })
        .collect()
}

/// Stack equally sized 2D bands into one (band, row, col) raster.
pub fn stack_bands(
    bands: Vec<(String, Array2<u16>)>,
    geo_transform: GeoTransform,
    nodata: Option<u16>,
) -> LandCoverResult<RawRaster> {
    let Some((_, first)) = bands.first() else {
        return Err(LandCoverError::InvalidRaster("no bands to stack".to_string()));
    };
    let shape = first.dim();
    if let Some((name, band)) = bands.iter().find(|(_, b)| b.dim() != shape) {
        return Err(LandCoverError::InvalidRaster(format!(
            "band {} is {:?}, expected {:?}",
            name,
            band.dim(),
            shape
        )));
    }

    let (names, arrays): (Vec<String>, Vec<Array2<u16>>) = bands.into_iter().unzip();
    let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
    let data: Array3<u16> = ndarray::stack(Axis(0), &views)
        .map_err(|e| LandCoverError::Processing(format!("Failed to stack bands: {}", e)))?;

    Ok(Raster::new(data, names)?
        .with_geo_transform(geo_transform)
        .with_nodata(nodata))
}

/// Read one GeoTIFF band with its geotransform, no-data value and projection
#[cfg(feature = "gdal")]
pub fn read_band<P: AsRef<Path>>(
    path: P,
) -> LandCoverResult<(Array2<u16>, GeoTransform, Option<u16>, Option<String>)> {
    use gdal::Dataset;

    log::debug!("Reading band {}", path.as_ref().display());
    let dataset = Dataset::open(path.as_ref())?;
    let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband
        .no_data_value()
        .and_then(|v| num_traits::cast::<f64, u16>(v));
    let buffer = rasterband.read_as::<u16>((0, 0), (width, height), (width, height), None)?;
    let data = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| LandCoverError::Processing(format!("Failed to reshape band data: {}", e)))?;

    let projection = Some(dataset.projection()).filter(|p| !p.is_empty());
    Ok((data, geo_transform, nodata, projection))
}

/// Load the requested bands of the scene in `dir`.
///
/// Bands must share one grid; the geotransform and projection of the first
/// band are used. Without a no-data value in the files the Landsat fill
/// value is assumed.
#[cfg(feature = "gdal")]
pub fn load_scene<P: AsRef<Path>>(dir: P, specs: &[BandSpec]) -> LandCoverResult<Scene> {
    let files = discover_bands(dir.as_ref())?;
    let paths = select_bands(&files, specs)?;

    let mut bands = Vec::with_capacity(specs.len());
    let mut grid: Option<(GeoTransform, Option<u16>, Option<String>)> = None;
    for (spec, path) in specs.iter().zip(&paths) {
        let (data, transform, nodata, projection) = read_band(path)?;
        match &grid {
            None => grid = Some((transform, nodata, projection)),
            Some((first, _, _)) if *first != transform => {
                return Err(LandCoverError::InvalidRaster(format!(
                    "band {} geotransform {:?} differs from {:?}",
                    spec.name, transform, first
                )));
            }
            Some(_) => {}
        }
        bands.push((spec.name.clone(), data));
    }

    let (transform, nodata, projection) = grid
        .ok_or_else(|| LandCoverError::InvalidRaster("no bands requested".to_string()))?;
    let raster = stack_bands(bands, transform, Some(nodata.unwrap_or(LANDSAT_FILL)))?;
    log::info!(
        "Loaded scene: {} bands of {}x{} pixels",
        raster.band_count(),
        raster.rows(),
        raster.cols()
    );
    Ok(Scene { raster, projection })
}

#[cfg(not(feature = "gdal"))]
pub fn load_scene<P: AsRef<Path>>(dir: P, specs: &[BandSpec]) -> LandCoverResult<Scene> {
    let files = discover_bands(dir.as_ref())?;
    select_bands(&files, specs)?;
    Err(LandCoverError::Unsupported(
        "reading GeoTIFF bands requires the `gdal` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_discover_bands_sorted_by_number() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "LC08_L2SP_042034_20210601_20210608_02_T1_SR_B5.TIF",
            "LC08_L2SP_042034_20210601_20210608_02_T1_SR_B10.TIF",
            "LC08_L2SP_042034_20210601_20210608_02_T1_sr_b4.tif",
            "LC08_L2SP_042034_20210601_20210608_02_T1_ST_B10.TIF",
            "LC08_L2SP_042034_20210601_20210608_02_T1_MTL.xml",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }

        let bands = discover_bands(dir.path()).unwrap();
        let numbers: Vec<u8> = bands.iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![4, 5, 10]);

        let selected = select_bands(&bands, &[BandSpec::new("nir", 5), BandSpec::new("red", 4)]).unwrap();
        assert!(selected[0].to_string_lossy().ends_with("SR_B5.TIF"));

        assert!(matches!(
            select_bands(&bands, &BandSpec::landsat_oli()),
            Err(LandCoverError::InvalidRaster(_))
        ));
    }

    #[test]
    fn test_stack_bands() {
        let red = Array2::from_elem((3, 4), 8000u16);
        let nir = Array2::from_elem((3, 4), 20000u16);
        let raster = stack_bands(
            vec![("red".to_string(), red), ("nir".to_string(), nir)],
            GeoTransform::north_up(300_000.0, 4_200_000.0, 30.0, -30.0),
            Some(LANDSAT_FILL),
        )
        .unwrap();
        assert_eq!(raster.dim(), (2, 3, 4));
        assert_eq!(raster.band_by_name("nir").unwrap()[[2, 3]], 20000);
        assert_eq!(raster.nodata(), Some(0));

        let odd = stack_bands(
            vec![
                ("red".to_string(), Array2::zeros((3, 4))),
                ("nir".to_string(), Array2::zeros((4, 3))),
            ],
            GeoTransform::default(),
            None,
        );
        assert!(matches!(odd, Err(LandCoverError::InvalidRaster(_))));
        assert!(stack_bands(Vec::new(), GeoTransform::default(), None).is_err());
    }

    #[cfg(not(feature = "gdal"))]
    #[test]
    fn test_load_scene_without_gdal() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("X_SR_B4.TIF")).unwrap();
        assert!(matches!(
            load_scene(dir.path(), &[BandSpec::new("red", 4)]),
            Err(LandCoverError::Unsupported(_))
        ));
    }
}
