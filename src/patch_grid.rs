//! Splits a raster into a padded, gap-free grid of equally sized patches.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("patch size must be non-zero, got {width}x{height}")]
    ZeroPatchSize { width: u32, height: u32 },

    #[error("padded size of a {width}x{height} raster overflows")]
    Overflow { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSize {
    pub width: u32,
    pub height: u32,
}

/// One patch of an orthophoto: its file name and top-left corner in padded mosaic pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchDescriptor {
    #[serde(rename = "patch_name")]
    pub name: String,
    #[serde(rename = "x")]
    pub offset_x: u32,
    #[serde(rename = "y")]
    pub offset_y: u32,
}

/// Patch layout of one raster.
///
/// The raster is padded on the bottom and right so both dimensions become exact
/// multiples of the patch size; the patches then tile the padded canvas row by row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchGrid {
    patch: PatchSize,
    padded_width: u32,
    padded_height: u32,
}

fn padded_dim(raster: u32, patch: u32) -> Option<u32> {
    raster.div_ceil(patch).checked_mul(patch)
}

impl PatchGrid {
    pub fn new(raster_width: u32, raster_height: u32, patch: PatchSize) -> Result<Self, GridError> {
        if patch.width == 0 || patch.height == 0 {
            return Err(GridError::ZeroPatchSize {
                width: patch.width,
                height: patch.height,
            });
        }
        let overflow = GridError::Overflow {
            width: raster_width,
            height: raster_height,
        };
        let padded_width = padded_dim(raster_width, patch.width).ok_or(overflow.clone())?;
        let padded_height = padded_dim(raster_height, patch.height).ok_or(overflow)?;
        Ok(Self {
            patch,
            padded_width,
            padded_height,
        })
    }

    pub fn padded_size(&self) -> (u32, u32) {
        (self.padded_width, self.padded_height)
    }

    pub fn columns(&self) -> u32 {
        self.padded_width / self.patch.width
    }

    pub fn rows(&self) -> u32 {
        self.padded_height / self.patch.height
    }

    pub fn len(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-left offsets in row-major order.
    pub fn offsets(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let (pw, ph) = (self.patch.width, self.patch.height);
        (0..self.rows()).flat_map(move |r| (0..self.columns()).map(move |c| (c * pw, r * ph)))
    }

    /// Descriptors named `<orthophoto>-patch<N>.<ext>` with `N` counting from 1.
    pub fn descriptors(&self, orthophoto_name: &str, extension: &str) -> Vec<PatchDescriptor> {
        self.offsets()
            .enumerate()
            .map(|(i, (x, y))| PatchDescriptor {
                name: patch_name(orthophoto_name, i + 1, extension),
                offset_x: x,
                offset_y: y,
            })
            .collect()
    }
}

pub fn patch_name(orthophoto_name: &str, index: usize, extension: &str) -> String {
    format!("{orthophoto_name}-patch{index}.{extension}")
}

/// Offsets of every patch covering a `raster_width` x `raster_height` raster.
pub fn compute_grid(
    raster_width: u32,
    raster_height: u32,
    patch_width: u32,
    patch_height: u32,
) -> Result<Vec<(u32, u32)>, GridError> {
    let grid = PatchGrid::new(
        raster_width,
        raster_height,
        PatchSize {
            width: patch_width,
            height: patch_height,
        },
    )?;
    Ok(grid.offsets().collect())
}
