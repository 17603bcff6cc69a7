//! GeoTIFF header reading: size, band count, geotransform and CRS.

use log::{debug, warn};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::Decoder;
use tiff::tags::Tag;

use super::{GeoError, GeoTransform, SpatialReference};

const GT_MODEL_TYPE_KEY: u32 = 1024;
const GT_RASTER_TYPE_KEY: u32 = 1025;
const GEOGRAPHIC_TYPE_KEY: u32 = 2048;
const PROJECTED_CS_TYPE_KEY: u32 = 3072;
const MODEL_TYPE_GEOGRAPHIC: u32 = 2;
const USER_DEFINED: u32 = 32767;
const RASTER_PIXEL_IS_POINT: u32 = 2;

/// Georeferenced raster metadata. Pixel data is read separately by the tiler.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub channel_count: u32,
    pub geo_transform: GeoTransform,
    pub spatial_ref: SpatialReference,
}

impl Raster {
    pub fn open(path: &Path) -> Result<Raster, GeoError> {
        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?;
        let (width, height) = decoder.dimensions()?;

        let channel_count = match decoder.find_tag(Tag::SamplesPerPixel)? {
            Some(v) => v.into_u32()?,
            None => 1,
        };

        let geo_keys = match decoder.find_tag(Tag::GeoKeyDirectoryTag)? {
            Some(v) => Some(v.into_u32_vec()?),
            None => None,
        };
        let spatial_ref = match &geo_keys {
            Some(keys) => spatial_ref_from_geokeys(keys),
            None => {
                warn!("{} has no GeoKeyDirectory", path.display());
                SpatialReference::Unknown
            }
        };

        let mut geo_transform = read_geo_transform(&mut decoder)?;
        if geo_keys.as_deref().is_some_and(is_pixel_is_point) {
            geo_transform = geo_transform.pixel_is_point_to_area();
        }

        debug!(
            "{}: {width}x{height}, {channel_count} band(s), {spatial_ref}",
            path.display()
        );
        Ok(Raster {
            width,
            height,
            channel_count,
            geo_transform,
            spatial_ref,
        })
    }
}

fn read_geo_transform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<GeoTransform, GeoError> {
    if let Some(v) = decoder.find_tag(Tag::ModelTransformationTag)? {
        let m = v.into_f64_vec()?;
        if m.len() >= 8 {
            return Ok(GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]]));
        }
    }

    let scale = match decoder.find_tag(Tag::ModelPixelScaleTag)? {
        Some(v) => v.into_f64_vec()?,
        None => return Err(GeoError::MissingGeoTransform),
    };
    let tiepoint = match decoder.find_tag(Tag::ModelTiepointTag)? {
        Some(v) => v.into_f64_vec()?,
        None => return Err(GeoError::MissingGeoTransform),
    };
    geo_transform_from_tiepoint(&scale, &tiepoint).ok_or(GeoError::MissingGeoTransform)
}

/// Geotransform from the first tiepoint `(i, j, k, x, y, z)` and the pixel scale.
pub fn geo_transform_from_tiepoint(scale: &[f64], tiepoint: &[f64]) -> Option<GeoTransform> {
    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    let (sx, sy) = (scale[0], scale[1]);
    let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
    Some(GeoTransform::from_gdal([
        x - i * sx,
        sx,
        0.0,
        y + j * sy,
        0.0,
        -sy,
    ]))
}

/// Value of a short-valued key in a GeoKeyDirectory: four header shorts, then
/// `(key, location, count, value)` entries.
fn geokey(keys: &[u32], id: u32) -> Option<u32> {
    keys.get(4..)
        .unwrap_or_default()
        .chunks_exact(4)
        .find(|e| e[0] == id && e[1] == 0)
        .map(|e| e[3])
}

/// CRS from a GeoKeyDirectory.
pub fn spatial_ref_from_geokeys(keys: &[u32]) -> SpatialReference {
    let geographic = geokey(keys, GT_MODEL_TYPE_KEY) == Some(MODEL_TYPE_GEOGRAPHIC);
    let code = if geographic {
        geokey(keys, GEOGRAPHIC_TYPE_KEY)
    } else {
        geokey(keys, PROJECTED_CS_TYPE_KEY).or_else(|| geokey(keys, GEOGRAPHIC_TYPE_KEY))
    };
    match code {
        Some(USER_DEFINED) => SpatialReference::UserDefined,
        Some(code) => SpatialReference::Epsg(code),
        None => SpatialReference::Unknown,
    }
}

/// Whether the tiepoint refers to pixel centers (`GTRasterTypeGeoKey = PixelIsPoint`).
pub fn is_pixel_is_point(keys: &[u32]) -> bool {
    geokey(keys, GT_RASTER_TYPE_KEY) == Some(RASTER_PIXEL_IS_POINT)
}
