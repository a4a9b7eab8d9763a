//! Named line features in sky coordinates (constellation stick figures).
//!
//! The dataset is d3-celestial's `constellations.lines.json`: a GeoJSON
//! `FeatureCollection` whose geometries are `MultiLineString`s with longitude in
//! [-180, 180] standing for RA. Longitudes are wrapped into RA [0, 360).

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::wcs::{SkyCoord, normalize_ra};

/// One named feature made of polylines; vertex order is preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayFeature {
    pub name: String,
    pub lines: Vec<Vec<SkyCoord>>,
}

impl OverlayFeature {
    pub fn new(name: impl Into<String>, lines: Vec<Vec<SkyCoord>>) -> Self {
        Self {
            name: name.into(),
            lines,
        }
    }

    /// `(min, max)` declination over all vertices, or `None` for an empty feature.
    pub fn dec_range(&self) -> Option<(f64, f64)> {
        self.lines
            .iter()
            .flatten()
            .map(|c| c.dec)
            .filter(|d| d.is_finite())
            .fold(None, |range, dec| match range {
                None => Some((dec, dec)),
                Some((lo, hi)) => Some((f64::min(lo, dec), f64::max(hi, dec))),
            })
    }

    pub fn vertex_count(&self) -> usize {
        self.lines.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayGeometry {
    pub features: Vec<OverlayFeature>,
}

impl OverlayGeometry {
    pub fn new(features: Vec<OverlayFeature>) -> Self {
        Self { features }
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Parses a GeoJSON `FeatureCollection` of `LineString`/`MultiLineString`
    /// features. Other geometry types are skipped.
    pub fn from_geojson(source_name: &str, text: &str) -> Result<Self> {
        let collection: FeatureCollection =
            serde_json::from_str(text).map_err(|e| Error::OverlayFetch {
                source_name: source_name.to_string(),
                reason: format!("invalid GeoJSON: {e}"),
            })?;

        let mut features = Vec::with_capacity(collection.features.len());
        for (index, feature) in collection.features.into_iter().enumerate() {
            let name = feature
                .id
                .and_then(json_label)
                .or_else(|| feature.properties.and_then(|p| p.name))
                .unwrap_or_else(|| format!("feature #{index}"));

            let lines = match feature.geometry {
                Some(Geometry::MultiLineString { coordinates }) => coordinates,
                Some(Geometry::LineString { coordinates }) => vec![coordinates],
                Some(Geometry::Other) | None => {
                    tracing::debug!("Skipping feature '{}' without line geometry", name);
                    continue;
                }
            };

            let lines = lines
                .into_iter()
                .map(|line| line.into_iter().map(lon_lat_to_sky).collect())
                .collect();
            features.push(OverlayFeature::new(name, lines));
        }

        if features.is_empty() {
            return Err(Error::OverlayFetch {
                source_name: source_name.to_string(),
                reason: "no line features in dataset".to_string(),
            });
        }
        Ok(Self { features })
    }
}

fn lon_lat_to_sky(position: Vec<f64>) -> SkyCoord {
    match position.as_slice() {
        [lon, lat, ..] => SkyCoord::new(normalize_ra(*lon), *lat),
        _ => SkyCoord::new(f64::NAN, f64::NAN),
    }
}

fn json_label(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    properties: Option<Properties>,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Properties {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    MultiLineString { coordinates: Vec<Vec<Vec<f64>>> },
    LineString { coordinates: Vec<Vec<f64>> },
    #[serde(other)]
    Other,
}
