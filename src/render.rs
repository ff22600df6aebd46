//! Class colors, RGBA rendering and PNG quicklooks of classified maps.

use crate::core::classify::ClassifiedRaster;
use crate::types::{ClassCode, ClassLabelMapping, LandCoverError, LandCoverResult};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Keyword colors, checked in order against the lower-cased class name
const KEYWORD_COLORS: &[(&[&str], Rgb)] = &[
    (&["water", "river", "lake", "sea"], Rgb::new(0x1f, 0x78, 0xb4)),
    (&["soil", "dry", "bare", "sand"], Rgb::new(0xd2, 0xb4, 0x8c)),
    (&["forest", "tree", "wood"], Rgb::new(0x1b, 0x5e, 0x20)),
    (&["vegetation", "grass", "crop", "veg"], Rgb::new(0x4c, 0xaf, 0x50)),
    (&["urban", "built", "city", "road"], Rgb::new(0x9e, 0x5a, 0x5a)),
    (&["snow", "ice", "cloud"], Rgb::new(0xf0, 0xf0, 0xf0)),
];

/// Qualitative colors for classes without a keyword match
const FALLBACK_COLORS: &[Rgb] = &[
    Rgb::new(0xe4, 0x1a, 0x1c),
    Rgb::new(0x37, 0x7e, 0xb8),
    Rgb::new(0x98, 0x4e, 0xa3),
    Rgb::new(0xff, 0x7f, 0x00),
    Rgb::new(0xff, 0xff, 0x33),
    Rgb::new(0xa6, 0x56, 0x28),
    Rgb::new(0xf7, 0x81, 0xbf),
    Rgb::new(0x99, 0x99, 0x99),
];

/// One legend row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub code: ClassCode,
    pub label: String,
    pub color: Rgb,
}

/// Color for every class code of a mapping
#[derive(Debug, Clone, PartialEq)]
pub struct ClassPalette {
    entries: Vec<LegendEntry>,
    /// RGBA for no-data pixels
    pub nodata_color: [u8; 4],
}

impl ClassPalette {
    /// Assign colors by class name keyword, otherwise the next unused fallback color.
    ///
    /// A keyword color already given to an earlier class is not reused, so
    /// every class gets its own color while the fallback cycle lasts.
    pub fn for_classes(classes: &ClassLabelMapping) -> Self {
        let mut used: Vec<Rgb> = Vec::with_capacity(classes.len());
        let mut next_fallback = 0;
        let entries = classes
            .iter()
            .map(|(code, label)| {
                let lower = label.to_lowercase();
                let keyword = KEYWORD_COLORS
                    .iter()
                    .find(|(keys, _)| keys.iter().any(|k| lower.contains(k)))
                    .map(|(_, c)| *c)
                    .filter(|c| !used.contains(c));
                let color = keyword.unwrap_or_else(|| {
                    let unused = (0..FALLBACK_COLORS.len())
                        .map(|i| FALLBACK_COLORS[(next_fallback + i) % FALLBACK_COLORS.len()])
                        .position(|c| !used.contains(&c));
                    let step = unused.unwrap_or(0);
                    let c = FALLBACK_COLORS[(next_fallback + step) % FALLBACK_COLORS.len()];
                    next_fallback += step + 1;
                    c
                });
                used.push(color);
                LegendEntry {
                    code,
                    label: label.to_string(),
                    color,
                }
            })
            .collect();
        Self {
            entries,
            nodata_color: [0, 0, 0, 0],
        }
    }

    pub fn color(&self, code: ClassCode) -> Option<Rgb> {
        self.entries.get(code as usize).map(|e| e.color)
    }

    /// Replace the color of one class
    pub fn set_color(&mut self, code: ClassCode, color: Rgb) -> LandCoverResult<()> {
        let entry = self.entries.get_mut(code as usize).ok_or_else(|| {
            LandCoverError::InvalidFormat(format!("no class with code {}", code))
        })?;
        entry.color = color;
        Ok(())
    }

    /// (code, name, color) in class-code order
    pub fn legend(&self) -> &[LegendEntry] {
        &self.entries
    }
}

/// Row-major RGBA bytes of a classified map; no-data uses `palette.nodata_color`.
pub fn render_rgba(map: &ClassifiedRaster, palette: &ClassPalette) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(map.rows() * map.cols() * 4);
    for &code in map.codes().iter() {
        match palette.color(code) {
            Some(Rgb { r, g, b }) => rgba.extend_from_slice(&[r, g, b, 255]),
            None => rgba.extend_from_slice(&palette.nodata_color),
        }
    }
    rgba
}

/// Write a PNG quicklook of a classified map.
pub fn save_png<P: AsRef<Path>>(
    map: &ClassifiedRaster,
    palette: &ClassPalette,
    path: P,
) -> LandCoverResult<()> {
    log::info!("Saving quicklook {}", path.as_ref().display());
    let rgba = render_rgba(map, palette);
    image::save_buffer(
        path.as_ref(),
        &rgba,
        map.cols() as u32,
        map.rows() as u32,
        image::ColorType::Rgba8,
    )
    .map_err(|e| LandCoverError::Processing(format!("Failed to write PNG: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, CLASS_NODATA};
    use ndarray::Array2;

    fn classes() -> ClassLabelMapping {
        ClassLabelMapping::from_labels(["Dry soil", "alpha", "beta", "urban", "water"]).unwrap()
    }

    #[test]
    fn test_palette_keywords_and_fallback() {
        let palette = ClassPalette::for_classes(&classes());
        let legend = palette.legend();
        assert_eq!(legend.len(), 5);
        assert_eq!(legend[0].label, "Dry soil");
        assert_eq!(legend[0].color.to_hex(), "#d2b48c");
        assert_eq!(legend[1].color, FALLBACK_COLORS[0]);
        assert_eq!(legend[2].color, FALLBACK_COLORS[1]);
        assert_eq!(palette.color(4).unwrap().to_hex(), "#1f78b4");
        assert_eq!(palette.color(CLASS_NODATA), None);
    }

    #[test]
    fn test_classes_sharing_a_keyword_get_distinct_colors() {
        let classes = ClassLabelMapping::from_labels([
            "green vegetation",
            "dry grass/soil",
            "urban",
            "water",
        ])
        .unwrap();
        let palette = ClassPalette::for_classes(&classes);
        let colors: Vec<Rgb> = palette.legend().iter().map(|e| e.color).collect();
        for (i, a) in colors.iter().enumerate() {
            for b in &colors[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(palette.color(classes.code("dry grass/soil").unwrap()).unwrap().to_hex(), "#d2b48c");
        assert_eq!(palette.color(classes.code("green vegetation").unwrap()).unwrap().to_hex(), "#4caf50");

        // two vegetation classes: the second falls back to a qualitative color
        let classes = ClassLabelMapping::from_labels(["crops", "grassland"]).unwrap();
        let palette = ClassPalette::for_classes(&classes);
        assert_eq!(palette.color(0).unwrap().to_hex(), "#4caf50");
        assert_eq!(palette.color(1), Some(FALLBACK_COLORS[0]));
    }

    #[test]
    fn test_render_rgba() {
        let classes = ClassLabelMapping::from_labels(["vegetation", "water"]).unwrap();
        let codes = Array2::from_shape_vec((1, 3), vec![1, CLASS_NODATA, 0]).unwrap();
        let map = ClassifiedRaster::new(codes, classes.clone(), GeoTransform::default()).unwrap();
        let mut palette = ClassPalette::for_classes(&classes);
        palette.set_color(0, Rgb::new(1, 2, 3)).unwrap();
        assert!(palette.set_color(9, Rgb::new(0, 0, 0)).is_err());

        let rgba = render_rgba(&map, &palette);
        assert_eq!(rgba.len(), 12);
        assert_eq!(&rgba[0..4], &[0x1f, 0x78, 0xb4, 255]);
        assert_eq!(&rgba[4..8], &[0, 0, 0, 0]);
        assert_eq!(&rgba[8..12], &[1, 2, 3, 255]);
    }

    #[test]
    fn test_save_png() {
        let classes = ClassLabelMapping::from_labels(["urban", "water"]).unwrap();
        let codes = Array2::from_shape_fn((4, 5), |(r, c)| ((r + c) % 2) as ClassCode);
        let map = ClassifiedRaster::new(codes, classes.clone(), GeoTransform::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.png");
        save_png(&map, &ClassPalette::for_classes(&classes), &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
