//! Map coordinates to WGS84 through proj4rs, with EPSG definitions resolved from
//! the bundled `crs-definitions` table.

use log::debug;
use proj4rs::proj::Proj;

use super::{GeoError, GeoPoint, SpatialReference};

const WGS84_LONGLAT: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Converts map coordinates into geodetic latitude/longitude.
pub trait CoordinateTransform {
    fn transform(&self, x: f64, y: f64) -> Result<GeoPoint, GeoError>;
}

/// Builds the transform from `source` to WGS84.
pub fn to_wgs84(source: SpatialReference) -> Result<Box<dyn CoordinateTransform>, GeoError> {
    let SpatialReference::Epsg(code) = source else {
        return Err(GeoError::UnsupportedCrs(source));
    };
    Ok(Box::new(ProjTransform::from_epsg(code)?))
}

/// A source projection paired with WGS84 geographic output.
pub struct ProjTransform {
    source: Proj,
    target: Proj,
}

impl ProjTransform {
    pub fn from_epsg(code: u32) -> Result<Self, GeoError> {
        let unsupported = || GeoError::UnsupportedCrs(SpatialReference::Epsg(code));
        let code16 = u16::try_from(code).map_err(|_| unsupported())?;
        let source = Proj::from_epsg_code(code16).map_err(|e| {
            debug!("no definition for EPSG:{code}: {e:?}");
            unsupported()
        })?;
        Self::new(source)
    }

    fn new(source: Proj) -> Result<Self, GeoError> {
        let target = Proj::from_proj_string(WGS84_LONGLAT)
            .map_err(|e| GeoError::Projection(format!("{WGS84_LONGLAT}: {e:?}")))?;
        Ok(Self { source, target })
    }
}

impl CoordinateTransform for ProjTransform {
    fn transform(&self, x: f64, y: f64) -> Result<GeoPoint, GeoError> {
        ensure_finite(x, y)?;
        // proj4rs works in radians for geographic systems
        let mut point = if self.source.is_latlong() {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        proj4rs::transform::transform(&self.source, &self.target, &mut point).map_err(|e| {
            GeoError::Transform {
                x,
                y,
                reason: format!("{e:?}"),
            }
        })?;

        let (lon, lat, alt) = (point.0.to_degrees(), point.1.to_degrees(), point.2);
        if !(lat.is_finite() && lon.is_finite()) {
            return Err(GeoError::Transform {
                x,
                y,
                reason: "projection produced a non-finite position".to_string(),
            });
        }
        Ok(GeoPoint { lat, lon, alt })
    }
}

fn ensure_finite(x: f64, y: f64) -> Result<(), GeoError> {
    if x.is_finite() && y.is_finite() {
        Ok(())
    } else {
        Err(GeoError::Transform {
            x,
            y,
            reason: "non-finite map coordinate".to_string(),
        })
    }
}
