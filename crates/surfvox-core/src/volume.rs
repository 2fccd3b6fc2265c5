//! The 3D voxel volume: memory layout and the world-to-index transform.

#![allow(clippy::cast_precision_loss)]

use glam::{UVec3, Vec3};

use crate::error::{Result, SurfvoxError};

/// Row alignment required for buffer-to-texture copies.
pub const COPY_ROW_ALIGNMENT: u32 = 256;

/// Layout of the one-byte-per-voxel volume buffer.
///
/// Voxel `(x, y, z)` lives at byte `x + y * row_pitch + z * slice_pitch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Bytes per row, `width` aligned up to [`COPY_ROW_ALIGNMENT`].
    pub row_pitch: u32,
    /// Bytes per slice, `row_pitch * height`.
    pub slice_pitch: u32,
}

impl VolumeDescriptor {
    /// Creates a descriptor for a `[width, height, depth]` volume.
    pub fn new(dimensions: [u32; 3]) -> Result<Self> {
        let [width, height, depth] = dimensions;
        if width == 0 || height == 0 || depth == 0 {
            return Err(SurfvoxError::InvalidConfig(format!(
                "volume must be non-empty, got {width}x{height}x{depth}"
            )));
        }
        let row_pitch = width
            .div_ceil(COPY_ROW_ALIGNMENT)
            .checked_mul(COPY_ROW_ALIGNMENT)
            .ok_or_else(|| SurfvoxError::InvalidConfig("volume row too large".to_string()))?;
        let slice_pitch = row_pitch
            .checked_mul(height)
            .ok_or_else(|| SurfvoxError::InvalidConfig("volume slice too large".to_string()))?;
        slice_pitch
            .checked_mul(depth)
            .ok_or_else(|| SurfvoxError::InvalidConfig("volume too large".to_string()))?;
        Ok(Self {
            width,
            height,
            depth,
            row_pitch,
            slice_pitch,
        })
    }

    pub fn dimensions(&self) -> UVec3 {
        UVec3::new(self.width, self.height, self.depth)
    }

    /// Total size of the volume buffer in bytes.
    pub fn byte_len(&self) -> u64 {
        u64::from(self.slice_pitch) * u64::from(self.depth)
    }

    /// Byte offset of voxel `(x, y, z)`, or `None` outside the volume.
    pub fn offset(&self, x: u32, y: u32, z: u32) -> Option<usize> {
        (x < self.width && y < self.height && z < self.depth).then(|| {
            x as usize + y as usize * self.row_pitch as usize + z as usize * self.slice_pitch as usize
        })
    }
}

/// Maps world space into voxel index space: `index = (world + offset) * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeTransform {
    pub scale: Vec3,
    pub offset: Vec3,
}

impl VolumeTransform {
    /// Fits `dimensions` voxels to the box `[min_corner, max_corner]`.
    pub fn from_bounds(dimensions: UVec3, min_corner: Vec3, max_corner: Vec3) -> Result<Self> {
        let extent = max_corner - min_corner;
        for (axis, value) in ['x', 'y', 'z'].into_iter().zip(extent.to_array()) {
            if !(value.is_finite() && value > 0.0) {
                return Err(SurfvoxError::DegenerateBounds { axis });
            }
        }
        Ok(Self {
            scale: dimensions.as_vec3() / extent,
            offset: -min_corner,
        })
    }

    /// Continuous voxel coordinate of a world-space point.
    pub fn voxel_index(&self, world: Vec3) -> Vec3 {
        (world + self.offset) * self.scale
    }
}

/// Axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Bounds of a point set, `None` if empty.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = *points.first()?;
        Some(points.iter().fold(Self { min: first, max: first }, |b, &p| Self {
            min: b.min.min(p),
            max: b.max.max(p),
        }))
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Union of `boxes`, grown by `epsilon` on every side.
pub fn enclosing_bounds(boxes: &[Aabb], epsilon: f32) -> Option<Aabb> {
    let (first, rest) = boxes.split_first()?;
    let merged = rest.iter().fold(*first, |acc, b| acc.union(b));
    Some(Aabb {
        min: merged.min - Vec3::splat(epsilon),
        max: merged.max + Vec3::splat(epsilon),
    })
}
