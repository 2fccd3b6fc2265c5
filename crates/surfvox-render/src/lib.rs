//! wgpu backend for surfvox.
//!
//! This crate provides:
//! - [`GpuContext`], the device and queue shared by graphics and compute
//! - [`VolumeSurface`], the graphics-owned 3D texture and shared buffer
//! - [`BinTexture`], the `Rgba32Float` bin texture
//! - [`WgpuBackend`], which runs the voxelization program (WGSL)

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
// GPU sizes are u32 by API and lengths are usize
#![allow(clippy::cast_possible_truncation)]

pub mod backend;
pub mod bin_texture;
pub mod buffer;
pub mod error;
pub mod gpu;
pub mod kernels;
pub mod volume_surface;

use surfvox_core::ComputeInteropContext;

pub use backend::WgpuBackend;
pub use bin_texture::{check_bin_limits, BinTexture};
pub use buffer::{create_mesh_buffer, read_buffer};
pub use error::{RenderError, RenderResult};
pub use gpu::GpuContext;
pub use kernels::{VoxelKernels, WORK_GROUP_SIZE};
pub use volume_surface::{check_volume_limits, VolumeSurface};

/// Compute interop context on the wgpu backend.
pub type GpuInteropContext = ComputeInteropContext<WgpuBackend>;
