use ndarray::{s, Array3, ArrayView1, ArrayView2};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Debug;

/// Calibrated reflectance value in percent
pub type Reflectance = f32;

/// Integer code of a land-cover class (index into a [`ClassLabelMapping`])
pub type ClassCode = u16;

/// Code written to classified pixels that carry no class
pub const CLASS_NODATA: ClassCode = ClassCode::MAX;

/// Reflectance raster as produced by the corrector (NaN is no-data)
pub type ReflectanceRaster = Raster<Reflectance>;

/// Raw digital-number raster as delivered by the loader
pub type RawRaster = Raster<u16>;

/// Values that can be stored in a raster band.
pub trait RasterElement:
    Copy + Debug + PartialOrd + PartialEq + NumCast + Send + Sync + 'static
{
    /// Fill value used when a pixel has to be marked as no-data
    fn default_nodata() -> Self;

    /// Whether this value is no-data given the raster's marker
    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }
}

macro_rules! impl_raster_element_int {
    ($t:ty) => {
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                <$t>::MIN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                matches!(nodata, Some(nd) if *self == nd)
            }
        }
    };
}

macro_rules! impl_raster_element_float {
    ($t:ty) => {
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                <$t>::NAN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                if self.is_nan() {
                    return true;
                }
                matches!(nodata, Some(nd) if *self == nd)
            }
        }
    };
}

impl_raster_element_int!(u8);
impl_raster_element_int!(u16);
impl_raster_element_int!(i16);
impl_raster_element_int!(u32);
impl_raster_element_int!(i32);
impl_raster_element_float!(f32);
impl_raster_element_float!(f64);

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl Default for GeoTransform {
    /// North-up unit grid anchored at the origin
    fn default() -> Self {
        Self::north_up(0.0, 0.0, 1.0, -1.0)
    }
}

impl GeoTransform {
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinates of the center of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Fractional (row, col) of a map coordinate, `None` for a degenerate transform
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (dx * self.pixel_height - dy * self.rotation_x) / det;
        let row = (dy * self.pixel_width - dx * self.rotation_y) / det;
        Some((row, col))
    }

    /// Ground area covered by a single pixel, in squared map units
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y).abs()
    }

    /// Transform of the sub-grid whose top-left pixel is (row, col)
    pub fn offset(&self, row: usize, col: usize) -> Self {
        let (r, c) = (row as f64, col as f64);
        Self {
            top_left_x: self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            top_left_y: self.top_left_y + c * self.rotation_y + r * self.pixel_height,
            ..*self
        }
    }
}

/// Map-space bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// A multi-band raster: `data[[band, row, col]]`.
///
/// Band order is significant and travels with the raster as `band_names`;
/// the trained tree refers to features by the same names.
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    data: Array3<T>,
    band_names: Vec<String>,
    geo_transform: GeoTransform,
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a raster from a (band, row, col) array and one name per band
    pub fn new(data: Array3<T>, band_names: Vec<String>) -> LandCoverResult<Self> {
        let (bands, rows, cols) = data.dim();
        if bands == 0 || rows == 0 || cols == 0 {
            return Err(LandCoverError::InvalidRaster(format!(
                "raster must have at least one band and one pixel, got {}x{}x{}",
                bands, rows, cols
            )));
        }
        if band_names.len() != bands {
            return Err(LandCoverError::InvalidRaster(format!(
                "{} band names given for {} bands",
                band_names.len(),
                bands
            )));
        }
        let unique: BTreeSet<&str> = band_names.iter().map(String::as_str).collect();
        if unique.len() != band_names.len() {
            return Err(LandCoverError::InvalidRaster(format!(
                "duplicate band names in {:?}",
                band_names
            )));
        }

        Ok(Self {
            data,
            band_names,
            geo_transform: GeoTransform::default(),
            nodata: None,
        })
    }

    pub fn with_geo_transform(mut self, geo_transform: GeoTransform) -> Self {
        self.geo_transform = geo_transform;
        self
    }

    pub fn with_nodata(mut self, nodata: Option<T>) -> Self {
        self.nodata = nodata;
        self
    }

    /// (bands, rows, cols)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn band_count(&self) -> usize {
        self.data.dim().0
    }

    pub fn rows(&self) -> usize {
        self.data.dim().1
    }

    pub fn cols(&self) -> usize {
        self.data.dim().2
    }

    pub fn band_names(&self) -> &[String] {
        &self.band_names
    }

    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    pub fn into_data(self) -> Array3<T> {
        self.data
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn geo_transform(&self) -> &GeoTransform {
        &self.geo_transform
    }

    pub fn band(&self, index: usize) -> Option<ArrayView2<'_, T>> {
        (index < self.band_count()).then(|| self.data.slice(s![index, .., ..]))
    }

    pub fn band_by_name(&self, name: &str) -> Option<ArrayView2<'_, T>> {
        let index = self.band_names.iter().position(|b| b == name)?;
        self.band(index)
    }

    /// Band vector of a single pixel
    pub fn pixel(&self, row: usize, col: usize) -> Option<ArrayView1<'_, T>> {
        (row < self.rows() && col < self.cols()).then(|| self.data.slice(s![.., row, col]))
    }

    #[inline]
    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }

    /// Whether any band of the pixel is no-data
    pub fn pixel_has_nodata(&self, row: usize, col: usize) -> bool {
        match self.pixel(row, col) {
            Some(px) => px.iter().any(|&v| self.is_nodata(v)),
            None => true,
        }
    }

    /// Value used to mark masked pixels
    pub fn nodata_fill(&self) -> T {
        self.nodata.unwrap_or_else(T::default_nodata)
    }

    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.geo_transform.pixel_center(row, col)
    }

    /// Pixel containing a map coordinate, `None` when outside the grid
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (row, col) = self.geo_transform.geo_to_pixel(x, y)?;
        if row < 0.0 || col < 0.0 {
            return None;
        }
        let (row, col) = (row.floor() as usize, col.floor() as usize);
        (row < self.rows() && col < self.cols()).then_some((row, col))
    }

    pub fn bounds(&self) -> BoundingBox {
        let gt = &self.geo_transform;
        let corners = [
            (0.0, 0.0),
            (self.cols() as f64, 0.0),
            (0.0, self.rows() as f64),
            (self.cols() as f64, self.rows() as f64),
        ];
        let mut bbox = BoundingBox {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (c, r) in corners {
            let x = gt.top_left_x + c * gt.pixel_width + r * gt.rotation_x;
            let y = gt.top_left_y + c * gt.rotation_y + r * gt.pixel_height;
            bbox.min_x = bbox.min_x.min(x);
            bbox.max_x = bbox.max_x.max(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }

    /// Number of pixels with at least one no-data band
    pub fn nodata_pixel_count(&self) -> usize {
        let mut count = 0;
        for row in 0..self.rows() {
            for col in 0..self.cols() {
                if self.pixel_has_nodata(row, col) {
                    count += 1;
                }
            }
        }
        count
    }

    /// Same metadata, new pixel data (must keep the band count)
    pub fn with_data<U: RasterElement>(
        &self,
        data: Array3<U>,
        nodata: Option<U>,
    ) -> LandCoverResult<Raster<U>> {
        Ok(Raster::new(data, self.band_names.clone())?
            .with_geo_transform(self.geo_transform)
            .with_nodata(nodata))
    }

    /// Copy of the pixel window starting at (row, col)
    pub fn window(&self, row: usize, col: usize, rows: usize, cols: usize) -> LandCoverResult<Self> {
        if rows == 0 || cols == 0 || row + rows > self.rows() || col + cols > self.cols() {
            return Err(LandCoverError::InvalidRaster(format!(
                "window {}x{} at ({}, {}) exceeds raster {}x{}",
                rows,
                cols,
                row,
                col,
                self.rows(),
                self.cols()
            )));
        }
        let data = self
            .data
            .slice(s![.., row..row + rows, col..col + cols])
            .to_owned();
        Ok(Raster {
            data,
            band_names: self.band_names.clone(),
            geo_transform: self.geo_transform.offset(row, col),
            nodata: self.nodata,
        })
    }
}

/// Ordered enumeration of class names; position is the class code.
///
/// Serialized as the plain label list. Deserializing rejects lists that are
/// not strictly sorted, since `code` relies on binary search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ClassLabelMapping {
    labels: Vec<String>,
}

impl ClassLabelMapping {
    /// Build from observed labels: duplicates collapse and codes follow sorted label order
    pub fn from_labels<I, S>(labels: I) -> LandCoverResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique: BTreeSet<String> = labels.into_iter().map(|l| l.as_ref().to_string()).collect();
        if unique.len() >= CLASS_NODATA as usize {
            return Err(LandCoverError::InvalidTrainingData(format!(
                "{} classes exceed the supported maximum of {}",
                unique.len(),
                CLASS_NODATA as usize - 1
            )));
        }
        Ok(Self {
            labels: unique.into_iter().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn code(&self, label: &str) -> Option<ClassCode> {
        self.labels
            .binary_search_by(|l| l.as_str().cmp(label))
            .ok()
            .map(|i| i as ClassCode)
    }

    pub fn label(&self, code: ClassCode) -> Option<&str> {
        self.labels.get(code as usize).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// (code, label) pairs in code order
    pub fn iter(&self) -> impl Iterator<Item = (ClassCode, &str)> {
        self.labels
            .iter()
            .enumerate()
            .map(|(i, l)| (i as ClassCode, l.as_str()))
    }
}

impl TryFrom<Vec<String>> for ClassLabelMapping {
    type Error = LandCoverError;

    fn try_from(labels: Vec<String>) -> LandCoverResult<Self> {
        let mapping = Self::from_labels(&labels)?;
        if mapping.labels != labels {
            return Err(LandCoverError::InvalidFormat(format!(
                "class labels must be sorted and unique: {:?}",
                labels
            )));
        }
        Ok(mapping)
    }
}

impl From<ClassLabelMapping> for Vec<String> {
    fn from(mapping: ClassLabelMapping) -> Self {
        mapping.labels
    }
}

/// Error types for land-cover processing
#[derive(Debug, thiserror::Error)]
pub enum LandCoverError {
    #[error("Invalid reflectance range: {0}")]
    InvalidRange(String),

    #[error("Empty training set: {0}")]
    EmptyTrainingSet(String),

    #[error("Insufficient training data: {0}")]
    InsufficientData(String),

    #[error("Invalid training data: {0}")]
    InvalidTrainingData(String),

    #[error("Feature mismatch: tree expects bands {expected:?}, raster has {found:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Invalid raster: {0}")]
    InvalidRaster(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl From<geojson::Error> for LandCoverError {
    fn from(e: geojson::Error) -> Self {
        LandCoverError::GeoJson(e.to_string())
    }
}

/// Result type for land-cover operations
pub type LandCoverResult<T> = Result<T, LandCoverError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("b{}", i)).collect()
    }

    #[test]
    fn test_raster_rejects_band_name_mismatch() {
        let data = Array3::<u16>::zeros((3, 2, 2));
        assert!(matches!(
            Raster::new(data, names(2)),
            Err(LandCoverError::InvalidRaster(_))
        ));
    }

    #[test]
    fn test_raster_rejects_duplicate_band_names() {
        let data = Array3::<u16>::zeros((2, 2, 2));
        let result = Raster::new(data, vec!["red".to_string(), "red".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_pixel_center_and_locate() {
        let data = Array3::<f32>::zeros((1, 4, 5));
        let raster = Raster::new(data, names(1))
            .unwrap()
            .with_geo_transform(GeoTransform::north_up(100.0, 200.0, 30.0, -30.0));

        assert_eq!(raster.pixel_center(0, 0), (115.0, 185.0));
        assert_eq!(raster.pixel_center(3, 4), (235.0, 95.0));
        assert_eq!(raster.locate(115.0, 185.0), Some((0, 0)));
        assert_eq!(raster.locate(249.0, 81.0), Some((3, 4)));
        assert_eq!(raster.locate(99.0, 185.0), None);
        assert_eq!(raster.locate(115.0, 201.0), None);
    }

    #[test]
    fn test_bounds_and_window() {
        let mut data = Array3::<u16>::zeros((2, 4, 4));
        data[[1, 2, 3]] = 7;
        let raster = Raster::new(data, names(2))
            .unwrap()
            .with_geo_transform(GeoTransform::north_up(0.0, 40.0, 10.0, -10.0));

        let bbox = raster.bounds();
        assert_eq!((bbox.min_x, bbox.max_x, bbox.min_y, bbox.max_y), (0.0, 40.0, 0.0, 40.0));

        let window = raster.window(2, 2, 2, 2).unwrap();
        assert_eq!(window.dim(), (2, 2, 2));
        assert_eq!(window.data()[[1, 0, 1]], 7);
        assert_eq!(window.geo_transform().top_left_x, 20.0);
        assert_eq!(window.geo_transform().top_left_y, 20.0);
        assert!(raster.window(3, 3, 2, 2).is_err());
    }

    #[test]
    fn test_nodata_detection() {
        let mut data = Array3::<f32>::ones((2, 1, 3));
        data[[1, 0, 1]] = f32::NAN;
        let raster = Raster::new(data, names(2)).unwrap();
        assert!(!raster.pixel_has_nodata(0, 0));
        assert!(raster.pixel_has_nodata(0, 1));
        assert_eq!(raster.nodata_pixel_count(), 1);

        let raw = Raster::new(Array3::<u16>::zeros((1, 1, 2)), names(1))
            .unwrap()
            .with_nodata(Some(0));
        assert_eq!(raw.nodata_pixel_count(), 2);
    }

    #[test]
    fn test_class_label_mapping_sorted_codes() {
        let mapping =
            ClassLabelMapping::from_labels(["water", "urban", "water", "green vegetation"]).unwrap();
        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.code("green vegetation"), Some(0));
        assert_eq!(mapping.code("urban"), Some(1));
        assert_eq!(mapping.code("water"), Some(2));
        assert_eq!(mapping.code("forest"), None);
        assert_eq!(mapping.label(2), Some("water"));
        assert_eq!(mapping.label(3), None);
    }

    #[test]
    fn test_class_label_mapping_deserialize_keeps_order_invariant() {
        let mapping: ClassLabelMapping = serde_json::from_str(r#"["soil", "urban", "water"]"#).unwrap();
        assert_eq!(mapping.code("water"), Some(2));
        assert_eq!(serde_json::to_string(&mapping).unwrap(), r#"["soil","urban","water"]"#);

        assert!(serde_json::from_str::<ClassLabelMapping>(r#"["water", "soil"]"#).is_err());
        assert!(serde_json::from_str::<ClassLabelMapping>(r#"["soil", "soil"]"#).is_err());
        assert!(matches!(
            ClassLabelMapping::try_from(vec!["b".to_string(), "a".to_string()]),
            Err(LandCoverError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_geo_to_pixel_degenerate() {
        let gt = GeoTransform::north_up(0.0, 0.0, 0.0, -1.0);
        assert!(gt.geo_to_pixel(1.0, 1.0).is_none());
    }
}
