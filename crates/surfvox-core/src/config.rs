//! Startup configuration for surfvox.
//!
//! All values are fixed once a session is created; nothing here is
//! renegotiated per frame.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::binning::BinLayout;
use crate::error::{Result, SurfvoxError};
use crate::particles::ParticleRecord;
use crate::volume::VolumeDescriptor;

/// Global configuration for a surfvox session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfvoxConfig {
    /// Number of screen-space bin columns.
    pub bin_columns: u32,

    /// Number of screen-space bin rows.
    pub bin_rows: u32,

    /// Maximum particles stored per bin (the terminator takes one more slot).
    pub max_particles_per_bin: u32,

    /// Voxel volume width.
    pub volume_width: u32,

    /// Voxel volume height.
    pub volume_height: u32,

    /// Voxel volume depth.
    pub volume_depth: u32,

    /// Maximum number of meshes that can be registered for voxelization.
    pub max_meshes: usize,

    /// Radius given to every particle handed to the binning engine.
    pub particle_radius: f32,

    /// Padding added around the mesh bounds before voxelization.
    pub bounds_epsilon: f32,

    /// Where the voxelization kernel writes.
    pub write_mode: WriteMode,

    /// How the write target is reset before each dispatch.
    pub clear_strategy: ClearStrategy,
}

impl Default for SurfvoxConfig {
    fn default() -> Self {
        Self {
            bin_columns: 32,
            bin_rows: 16,
            max_particles_per_bin: 31,
            volume_width: 512,
            volume_height: 256,
            volume_depth: 64,
            max_meshes: 16,
            particle_radius: 0.4,
            bounds_epsilon: 0.01,
            write_mode: WriteMode::Direct,
            clear_strategy: ClearStrategy::CopyTemplate,
        }
    }
}

impl SurfvoxConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::info!("loading surfvox config from {}", path.as_ref().display());
        Self::from_json_str(&text)
    }

    /// Serializes the configuration as pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks that every dimension is usable.
    pub fn validate(&self) -> Result<()> {
        if self.bin_columns == 0 || self.bin_rows == 0 {
            return Err(SurfvoxError::InvalidConfig(format!(
                "bin grid must be non-empty, got {}x{}",
                self.bin_columns, self.bin_rows
            )));
        }
        if self.volume_width == 0 || self.volume_height == 0 || self.volume_depth == 0 {
            return Err(SurfvoxError::InvalidConfig(format!(
                "volume must be non-empty, got {}x{}x{}",
                self.volume_width, self.volume_height, self.volume_depth
            )));
        }
        VolumeDescriptor::new(self.volume_dimensions())?;
        let layout = self.bin_layout();
        let texels = layout
            .texture_size()
            .and_then(|(width, height)| width.checked_mul(height));
        if texels
            .and_then(|n| usize::try_from(n).ok())
            .and_then(|n| n.checked_mul(ParticleRecord::FLOATS))
            .is_none()
        {
            return Err(SurfvoxError::InvalidConfig(format!(
                "bin texture of {} columns with {} particles per bin is too large",
                self.bin_columns, self.max_particles_per_bin
            )));
        }
        if self.max_meshes == 0 {
            return Err(SurfvoxError::InvalidConfig(
                "max_meshes must be at least 1".to_string(),
            ));
        }
        if !self.particle_radius.is_finite() || self.particle_radius < 0.0 {
            return Err(SurfvoxError::InvalidConfig(format!(
                "particle radius must be finite and non-negative, got {}",
                self.particle_radius
            )));
        }
        Ok(())
    }

    /// Returns the bin grid layout described by this configuration.
    pub fn bin_layout(&self) -> BinLayout {
        BinLayout::new(self.bin_columns, self.bin_rows, self.max_particles_per_bin)
    }

    /// Returns the volume dimensions as `[width, height, depth]`.
    pub fn volume_dimensions(&self) -> [u32; 3] {
        [self.volume_width, self.volume_height, self.volume_depth]
    }
}

/// Target of the voxelization kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WriteMode {
    /// Write straight into the shared volume buffer; the destination texture
    /// is cleared a second time after release.
    #[default]
    Direct,
    /// Write into the compute scratch buffer, then copy it into the texture.
    Staged,
}

/// How the write target is reset before voxelization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ClearStrategy {
    /// Device-side copy of the pre-zeroed clear template.
    #[default]
    CopyTemplate,
    /// Run the `fast_clear` kernel over the target.
    Kernel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_demo_constants() {
        let config = SurfvoxConfig::default();
        assert_eq!(config.bin_layout().cell_stride(), 32);
        assert_eq!(config.volume_dimensions(), [512, 256, 64]);
        assert_eq!(config.max_meshes, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            SurfvoxConfig::from_json_str(r#"{ "bin_columns": 8, "write_mode": "Staged" }"#)
                .unwrap();
        assert_eq!(config.bin_columns, 8);
        assert_eq!(config.bin_rows, 16);
        assert_eq!(config.write_mode, WriteMode::Staged);
    }

    #[test]
    fn test_json_round_trip() {
        let config = SurfvoxConfig {
            clear_strategy: ClearStrategy::Kernel,
            ..SurfvoxConfig::default()
        };
        let json = config.to_json_string().unwrap();
        assert_eq!(SurfvoxConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_empty_grid() {
        let err = SurfvoxConfig::from_json_str(r#"{ "bin_rows": 0 }"#).unwrap_err();
        assert!(matches!(err, SurfvoxError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_zero_mesh_capacity() {
        let config = SurfvoxConfig {
            max_meshes: 0,
            ..SurfvoxConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bin_texture_overflow() {
        let err = SurfvoxConfig::from_json_str(&format!(
            r#"{{ "max_particles_per_bin": {} }}"#,
            u32::MAX
        ))
        .unwrap_err();
        assert!(matches!(err, SurfvoxError::InvalidConfig(_)));

        let config = SurfvoxConfig {
            bin_columns: 1 << 16,
            bin_rows: 1 << 16,
            max_particles_per_bin: 0,
            ..SurfvoxConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_volume_overflow() {
        let config = SurfvoxConfig {
            volume_width: u32::MAX,
            ..SurfvoxConfig::default()
        };
        assert!(matches!(config.validate(), Err(SurfvoxError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_json_is_json_error() {
        let err = SurfvoxConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, SurfvoxError::JsonError(_)));
    }
}
