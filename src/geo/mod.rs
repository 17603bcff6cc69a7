//! Pixel to WGS84 conversion of merged detections.

pub mod crs;
pub mod raster;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::aggregate::MergedAnomalies;
use crate::detection::Point;

pub use crs::{CoordinateTransform, ProjTransform, to_wgs84};
pub use raster::Raster;

#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("tiff error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("raster has no geotransform")]
    MissingGeoTransform,

    #[error("unsupported spatial reference: {0}")]
    UnsupportedCrs(SpatialReference),

    #[error("invalid projection: {0}")]
    Projection(String),

    #[error("cannot transform ({x}, {y}): {reason}")]
    Transform { x: f64, y: f64, reason: String },
}

/// Geodetic position serialized as `[lat, lon, alt]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl From<[f64; 3]> for GeoPoint {
    fn from([lat, lon, alt]: [f64; 3]) -> Self {
        Self { lat, lon, alt }
    }
}

impl From<GeoPoint> for [f64; 3] {
    fn from(p: GeoPoint) -> Self {
        [p.lat, p.lon, p.alt]
    }
}

/// Affine pixel to map coefficients in GDAL order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_size_x: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub column_rotation: f64,
    pub pixel_size_y: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            origin_x: gt[0],
            pixel_size_x: gt[1],
            row_rotation: gt[2],
            origin_y: gt[3],
            column_rotation: gt[4],
            pixel_size_y: gt[5],
        }
    }

    /// Moves a PixelIsPoint origin from the first pixel's center to its corner.
    pub fn pixel_is_point_to_area(self) -> Self {
        Self {
            origin_x: self.origin_x - 0.5 * (self.pixel_size_x + self.row_rotation),
            origin_y: self.origin_y - 0.5 * (self.column_rotation + self.pixel_size_y),
            ..self
        }
    }

    /// Map coordinates of a pixel index. Uses the pixel corner, not its center, and
    /// ignores the rotation terms.
    pub fn pixel_to_map(&self, p: Point) -> (f64, f64) {
        (
            p.x * self.pixel_size_x + self.origin_x,
            p.y * self.pixel_size_y + self.origin_y,
        )
    }
}

/// Coordinate reference system of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialReference {
    Epsg(u32),
    UserDefined,
    Unknown,
}

impl std::fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpatialReference::Epsg(code) => write!(f, "EPSG:{code}"),
            SpatialReference::UserDefined => f.write_str("user-defined CRS"),
            SpatialReference::Unknown => f.write_str("unknown CRS"),
        }
    }
}

/// Attaches WGS84 coordinates to merged detections of one raster.
pub struct GeoReferencer {
    geo_transform: GeoTransform,
    transform: Box<dyn CoordinateTransform>,
}

impl GeoReferencer {
    /// Builds the transform from the raster's CRS to WGS84.
    pub fn new(raster: &Raster) -> Result<Self, GeoError> {
        let transform = to_wgs84(raster.spatial_ref)?;
        info!(
            "geo-referencing from {} with origin=({:.3}, {:.3}) pixel_size=({:.6}, {:.6})",
            raster.spatial_ref,
            raster.geo_transform.origin_x,
            raster.geo_transform.origin_y,
            raster.geo_transform.pixel_size_x,
            raster.geo_transform.pixel_size_y
        );
        Ok(Self::with_transform(raster.geo_transform, transform))
    }

    pub fn with_transform(
        geo_transform: GeoTransform,
        transform: Box<dyn CoordinateTransform>,
    ) -> Self {
        Self {
            geo_transform,
            transform,
        }
    }

    /// Converts every center; any failing point fails the whole set.
    pub fn attach(&self, anomalies: MergedAnomalies) -> Result<MergedAnomalies, GeoError> {
        let latlong = anomalies
            .centers()
            .iter()
            .map(|&center| {
                let (x, y) = self.geo_transform.pixel_to_map(center);
                let geo = self.transform.transform(x, y)?;
                debug!(
                    "({:.1}, {:.1}) -> ({:.7}, {:.7})",
                    center.x, center.y, geo.lat, geo.lon
                );
                Ok(geo)
            })
            .collect::<Result<Vec<_>, GeoError>>()?;
        Ok(anomalies.with_latlong(latlong))
    }
}

/// Builds the transform for `raster` and attaches coordinates to `anomalies`.
///
/// Without detections nothing is projected, so the raster's CRS is not consulted.
pub fn attach_coordinates(
    raster: &Raster,
    anomalies: MergedAnomalies,
) -> Result<MergedAnomalies, GeoError> {
    if anomalies.is_empty() {
        return Ok(anomalies);
    }
    GeoReferencer::new(raster)?.attach(anomalies)
}
