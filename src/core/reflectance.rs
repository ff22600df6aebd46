use crate::types::{
    LandCoverError, LandCoverResult, Raster, RasterElement, Reflectance, ReflectanceRaster,
};
use ndarray::{Array2, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Lowest valid Landsat Collection 2 Level-2 surface reflectance DN
pub const LANDSAT_C2_VALID_MIN: f64 = 7273.0;
/// Highest valid Landsat Collection 2 Level-2 surface reflectance DN
pub const LANDSAT_C2_VALID_MAX: f64 = 43636.0;
/// Collection 2 surface reflectance multiplicative factor
pub const LANDSAT_C2_SCALE: f64 = 0.0000275;
/// Collection 2 surface reflectance additive offset
pub const LANDSAT_C2_OFFSET: f64 = -0.2;

/// Linear DN to percent-reflectance mapping with its validity interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectanceParams {
    /// Lowest raw value accepted (inclusive)
    pub valid_min: f64,
    /// Highest raw value accepted (inclusive)
    pub valid_max: f64,
    /// Multiplicative scale factor
    pub scale: f64,
    /// Additive offset, applied after scaling
    pub offset: f64,
}

impl Default for ReflectanceParams {
    fn default() -> Self {
        Self {
            valid_min: LANDSAT_C2_VALID_MIN,
            valid_max: LANDSAT_C2_VALID_MAX,
            scale: LANDSAT_C2_SCALE,
            offset: LANDSAT_C2_OFFSET,
        }
    }
}

impl ReflectanceParams {
    pub fn validate(&self) -> LandCoverResult<()> {
        if !self.valid_min.is_finite() || !self.valid_max.is_finite() {
            return Err(LandCoverError::InvalidRange(format!(
                "valid range [{}, {}] must be finite",
                self.valid_min, self.valid_max
            )));
        }
        if self.valid_min >= self.valid_max {
            return Err(LandCoverError::InvalidRange(format!(
                "valid_min {} must be below valid_max {}",
                self.valid_min, self.valid_max
            )));
        }
        if self.scale == 0.0 || !self.scale.is_finite() {
            return Err(LandCoverError::InvalidRange(format!(
                "scale factor {} gives a degenerate reflectance mapping",
                self.scale
            )));
        }
        if !self.offset.is_finite() {
            return Err(LandCoverError::InvalidRange(format!(
                "offset {} is not finite",
                self.offset
            )));
        }
        Ok(())
    }

    /// Closed interval every corrected value falls into
    pub fn output_bounds(&self) -> (f64, f64) {
        let a = self.reflectance(self.valid_min);
        let b = self.reflectance(self.valid_max);
        (a.min(b), a.max(b))
    }

    #[inline]
    fn reflectance(&self, raw: f64) -> f64 {
        (raw * self.scale + self.offset) * 100.0
    }

    /// Corrected value of one raw sample, NaN when invalid
    #[inline]
    pub fn correct_value<T: RasterElement>(&self, raw: T, nodata: Option<T>) -> Reflectance {
        if raw.is_nodata(nodata) {
            return Reflectance::NAN;
        }
        match raw.to_f64() {
            Some(v) if v >= self.valid_min && v <= self.valid_max => self.reflectance(v) as Reflectance,
            _ => Reflectance::NAN,
        }
    }
}

/// Converts raw digital numbers to percent reflectance, band by band
#[derive(Debug, Clone)]
pub struct ReflectanceCorrector {
    /// Either a single entry applied to every band or one entry per band
    params: Vec<ReflectanceParams>,
}

impl ReflectanceCorrector {
    /// Create a corrector that applies the same mapping to every band
    pub fn new(params: ReflectanceParams) -> LandCoverResult<Self> {
        params.validate()?;
        Ok(Self { params: vec![params] })
    }

    /// Create a corrector with one mapping per band, in raster band order
    pub fn per_band(params: Vec<ReflectanceParams>) -> LandCoverResult<Self> {
        if params.is_empty() {
            return Err(LandCoverError::InvalidRange(
                "at least one band calibration is required".to_string(),
            ));
        }
        for (i, p) in params.iter().enumerate() {
            p.validate()
                .map_err(|e| LandCoverError::InvalidRange(format!("band {}: {}", i, e)))?;
        }
        Ok(Self { params })
    }

    fn params_for(&self, band: usize) -> &ReflectanceParams {
        if self.params.len() == 1 {
            &self.params[0]
        } else {
            &self.params[band]
        }
    }

    /// Apply the correction, producing a new raster with NaN as no-data
    pub fn correct<T: RasterElement>(&self, raw: &Raster<T>) -> LandCoverResult<ReflectanceRaster> {
        let (bands, rows, cols) = raw.dim();
        log::info!("Applying reflectance correction to {} bands of {}x{}", bands, rows, cols);

        if self.params.len() != 1 && self.params.len() != bands {
            return Err(LandCoverError::InvalidRange(format!(
                "{} band calibrations given for a {}-band raster",
                self.params.len(),
                bands
            )));
        }

        let nodata = raw.nodata();
        let mut corrected: Vec<Array2<Reflectance>> = Vec::with_capacity(bands);
        for band in 0..bands {
            let params = self.params_for(band);
            log::debug!("Band {} ({}): {:?}", band, raw.band_names()[band], params);
            let view = raw
                .band(band)
                .ok_or_else(|| LandCoverError::Processing(format!("missing band {}", band)))?;
            corrected.push(Self::correct_band(view, nodata, params));
        }

        let views: Vec<ArrayView2<'_, Reflectance>> = corrected.iter().map(|b| b.view()).collect();
        let data = ndarray::stack(Axis(0), &views)
            .map_err(|e| LandCoverError::Processing(format!("Shape error: {}", e)))?;

        let output = raw.with_data(data, None)?;
        let (min, max) = output
            .data()
            .iter()
            .filter(|v| !v.is_nan())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        log::info!(
            "Reflectance correction completed. Output range: {:.4} to {:.4}, {} no-data pixels",
            min,
            max,
            output.nodata_pixel_count()
        );

        Ok(output)
    }

    #[cfg(feature = "parallel")]
    fn correct_band<T: RasterElement>(
        band: ArrayView2<'_, T>,
        nodata: Option<T>,
        params: &ReflectanceParams,
    ) -> Array2<Reflectance> {
        Zip::from(band).par_map_collect(|&v| params.correct_value(v, nodata))
    }

    #[cfg(not(feature = "parallel"))]
    fn correct_band<T: RasterElement>(
        band: ArrayView2<'_, T>,
        nodata: Option<T>,
        params: &ReflectanceParams,
    ) -> Array2<Reflectance> {
        Zip::from(band).map_collect(|&v| params.correct_value(v, nodata))
    }
}
