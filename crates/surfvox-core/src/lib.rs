//! Core logic for surfvox.
//!
//! This crate holds everything that does not need a GPU:
//! - [`binning`]: per-frame screen-space binning of particles
//! - [`serialize`]: the terminator-padded bin texture layout
//! - [`interop`] and [`dispatch`]: the shared-object registry and the
//!   voxelization sequence, driven through the [`ComputeBackend`] trait
//! - [`host`]: a CPU backend that runs the voxelization kernel on the host
//! - Configuration and error types

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Accessors return plain values which don't need must_use
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod binning;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod interop;
pub mod particles;
pub mod serialize;
pub mod volume;

pub use binning::{bin, BinGrid, BinLayout, BinStats, Footprint, GridCoord};
pub use config::{ClearStrategy, SurfvoxConfig, WriteMode};
pub use dispatch::{snap, ComputeBackend, ComputeInteropContext, MeshArgs, VolumeArgs, WriteTarget};
pub use error::{Result, SurfvoxError};
pub use host::{HostBackend, HostBuffer, HostOp};
pub use interop::{
    Access, ComputeLease, InteropRegistry, MeshEntry, MeshHandle, Owner, SharedObjectId,
};
pub use particles::{fill_particles, Particle, ParticleRecord, ParticleSystem, TravelPath};
pub use serialize::{serialize, serialize_into, BinBuffer};
pub use volume::{enclosing_bounds, Aabb, VolumeDescriptor, VolumeTransform};

// Re-export glam types for convenience
pub use glam::{Mat4, UVec3, Vec3};
