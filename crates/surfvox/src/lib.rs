//! surfvox: volumetric visualization of voxelized tube meshes and binned
//! particles on wgpu.
//!
//! A [`Session`] drives both subsystems once per frame:
//!
//! ```no_run
//! use surfvox::*;
//!
//! fn main() -> Result<()> {
//!     init_logging();
//!     let mut session = Session::new_headless(SurfvoxConfig::default())?;
//!     session.register_mesh(
//!         &[Vec3::ZERO, Vec3::X, Vec3::Y],
//!         &[0, 1, 2],
//!     )?;
//!     let bounds = session.mesh_bounds().expect("one mesh registered");
//!     let particles = [Particle::new(Vec3::new(0.2, 0.2, 0.0), 0.4)];
//!     let report = session.frame(&particles, Mat4::IDENTITY, bounds)?;
//!     println!("{} insertions", report.bins.insertions);
//!     Ok(())
//! }
//! ```

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

mod session;

pub use session::{FrameReport, Session, Smoothed, SMOOTHING_ALPHA};

// Re-export core types
pub use surfvox_core::{
    bin, enclosing_bounds, fill_particles, serialize, Aabb, BinBuffer, BinGrid, BinLayout,
    BinStats, ClearStrategy, MeshHandle, Particle, ParticleRecord, ParticleSystem, Result,
    SurfvoxConfig, SurfvoxError, TravelPath, VolumeDescriptor, VolumeTransform, WriteMode,
};
pub use surfvox_render::{GpuContext, RenderError};

// Re-export glam types for convenience
pub use glam::{Mat4, Vec3};

/// Installs the `env_logger` logger; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
