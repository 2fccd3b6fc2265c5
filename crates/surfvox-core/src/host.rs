//! CPU implementation of [`ComputeBackend`].
//!
//! Shared objects are byte buffers in host memory. The voxelization kernel
//! runs on the calling thread with the same arithmetic as the GPU kernel,
//! and every backend call is appended to an operation log.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use glam::Vec3;

use crate::dispatch::{ComputeBackend, VolumeArgs, WriteTarget};
use crate::error::{Result, SurfvoxError};
use crate::interop::MeshHandle;
use crate::volume::VolumeDescriptor;

/// Upper bound on samples per triangle edge.
pub const MAX_EDGE_STEPS: u32 = 256;

/// Value written into an occupied voxel.
pub const OCCUPIED: u8 = 0xFF;

const ORIGIN: [f32; 3] = [0.0; 3];

/// Handle to a host buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostBuffer(usize);

/// Which buffer a target-taking call addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Shared,
    Scratch,
}

impl<O> From<WriteTarget<'_, O>> for TargetKind {
    fn from(target: WriteTarget<'_, O>) -> Self {
        match target {
            WriteTarget::Shared(_) => Self::Shared,
            WriteTarget::Scratch => Self::Scratch,
        }
    }
}

/// One recorded backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOp {
    Acquire { objects: usize },
    Release { objects: usize },
    CopyClearTemplate { target: TargetKind },
    ClearWithKernel { target: TargetKind },
    SetVolumeArgs { target: TargetKind },
    SetMeshArgs { mesh: MeshHandle },
    EnqueueVoxelize { mesh: MeshHandle, global_size: u64 },
    CopyScratchToTexture,
    ClearTexture,
}

#[derive(Debug, Clone, Copy)]
struct MeshBinding {
    vertices: HostBuffer,
    indices: HostBuffer,
    triangle_count: u32,
}

#[derive(Debug, Clone, Copy)]
struct VolumeBinding {
    target: Option<HostBuffer>,
    args: VolumeArgs,
}

/// Host-memory compute backend.
#[derive(Debug, Default)]
pub struct HostBackend {
    work_group_size: u32,
    buffers: Vec<Vec<u8>>,
    /// Destination texture, in the volume's pitched layout.
    texture: Vec<u8>,
    scratch: Vec<u8>,
    clear_template: Vec<u8>,
    volume_binding: Option<VolumeBinding>,
    mesh_bindings: Vec<Option<MeshBinding>>,
    acquired: bool,
    fail_enqueue: bool,
    log: Vec<HostOp>,
}

impl HostBackend {
    pub fn new(work_group_size: u32) -> Self {
        Self {
            work_group_size: work_group_size.max(1),
            ..Self::default()
        }
    }

    /// Allocates a buffer holding `bytes`.
    pub fn create_buffer(&mut self, bytes: Vec<u8>) -> HostBuffer {
        self.buffers.push(bytes);
        HostBuffer(self.buffers.len() - 1)
    }

    /// Contents of `buffer`. Panics on a handle from another backend.
    pub fn buffer(&self, buffer: HostBuffer) -> &[u8] {
        &self.buffers[buffer.0]
    }

    pub fn buffer_mut(&mut self, buffer: HostBuffer) -> &mut [u8] {
        &mut self.buffers[buffer.0]
    }

    pub fn texture(&self) -> &[u8] {
        &self.texture
    }

    pub fn texture_mut(&mut self) -> &mut [u8] {
        &mut self.texture
    }

    /// Fixed arguments bound by the last `set_volume_args`.
    pub fn volume_args(&self) -> Option<VolumeArgs> {
        self.volume_binding.map(|b| b.args)
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn ops(&self) -> &[HostOp] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Makes every subsequent `enqueue_voxelize` fail.
    pub fn fail_enqueue(&mut self, fail: bool) {
        self.fail_enqueue = fail;
    }

    fn exists(&self, object: HostBuffer) -> Result<()> {
        if object.0 < self.buffers.len() {
            Ok(())
        } else {
            Err(SurfvoxError::Interop(format!("unknown host buffer {}", object.0)))
        }
    }

    fn ensure_acquired(&self, operation: &str) -> Result<()> {
        if self.acquired {
            Ok(())
        } else {
            Err(SurfvoxError::Dispatch(format!(
                "{operation} requires the shared objects to be acquired"
            )))
        }
    }

    fn target_mut(&mut self, target: WriteTarget<'_, HostBuffer>) -> Result<&mut Vec<u8>> {
        match target {
            WriteTarget::Shared(buffer) => {
                self.exists(*buffer)?;
                Ok(&mut self.buffers[buffer.0])
            }
            WriteTarget::Scratch => Ok(&mut self.scratch),
        }
    }
}

impl ComputeBackend for HostBackend {
    type Object = HostBuffer;

    fn work_group_size(&self) -> u32 {
        self.work_group_size
    }

    fn prepare_volume(&mut self, volume: &VolumeDescriptor, object: &HostBuffer) -> Result<()> {
        self.exists(*object)?;
        let bytes = volume.byte_len() as usize;
        let actual = self.buffers[object.0].len();
        if actual != bytes {
            return Err(SurfvoxError::Interop(format!(
                "volume buffer holds {actual} bytes, expected {bytes}"
            )));
        }
        self.texture = vec![0; bytes];
        self.scratch = vec![0; bytes];
        self.clear_template = vec![0; bytes];
        Ok(())
    }

    fn prepare_mesh(
        &mut self,
        _mesh: MeshHandle,
        vertices: &HostBuffer,
        indices: &HostBuffer,
        triangle_count: u32,
    ) -> Result<()> {
        self.exists(*vertices)?;
        self.exists(*indices)?;
        if self.buffers[vertices.0].len() % 12 != 0 {
            return Err(SurfvoxError::Interop(
                "vertex buffer is not a whole number of float3 positions".to_string(),
            ));
        }
        let needed = triangle_count as usize * 12;
        if self.buffers[indices.0].len() < needed {
            return Err(SurfvoxError::Interop(format!(
                "index buffer too small for {triangle_count} triangles"
            )));
        }
        Ok(())
    }

    fn acquire(&mut self, objects: &[&HostBuffer]) -> Result<()> {
        if self.acquired {
            return Err(SurfvoxError::AlreadyAcquired);
        }
        self.acquired = true;
        self.log.push(HostOp::Acquire {
            objects: objects.len(),
        });
        Ok(())
    }

    fn release(&mut self, objects: &[&HostBuffer]) -> Result<()> {
        if !self.acquired {
            return Err(SurfvoxError::NotAcquired);
        }
        self.acquired = false;
        self.log.push(HostOp::Release {
            objects: objects.len(),
        });
        Ok(())
    }

    fn copy_clear_template(&mut self, target: WriteTarget<'_, HostBuffer>) -> Result<()> {
        self.ensure_acquired("clear template copy")?;
        let template = std::mem::take(&mut self.clear_template);
        let copied = self.target_mut(target).and_then(|dst| {
            if dst.len() == template.len() {
                dst.copy_from_slice(&template);
                Ok(())
            } else {
                Err(SurfvoxError::Dispatch("clear template size mismatch".to_string()))
            }
        });
        self.clear_template = template;
        copied?;
        self.log.push(HostOp::CopyClearTemplate {
            target: target.into(),
        });
        Ok(())
    }

    fn clear_with_kernel(&mut self, target: WriteTarget<'_, HostBuffer>) -> Result<()> {
        self.ensure_acquired("fast_clear")?;
        self.target_mut(target)?.fill(0);
        self.log.push(HostOp::ClearWithKernel {
            target: target.into(),
        });
        Ok(())
    }

    fn set_volume_args(&mut self, target: WriteTarget<'_, HostBuffer>, args: &VolumeArgs) -> Result<()> {
        self.ensure_acquired("volume argument binding")?;
        let buffer = match target {
            WriteTarget::Shared(buffer) => {
                self.exists(*buffer)?;
                Some(*buffer)
            }
            WriteTarget::Scratch => None,
        };
        self.volume_binding = Some(VolumeBinding {
            target: buffer,
            args: *args,
        });
        self.log.push(HostOp::SetVolumeArgs {
            target: target.into(),
        });
        Ok(())
    }

    fn set_mesh_args(
        &mut self,
        mesh: MeshHandle,
        vertices: &HostBuffer,
        indices: &HostBuffer,
        triangle_count: u32,
    ) -> Result<()> {
        self.ensure_acquired("mesh argument binding")?;
        if self.mesh_bindings.len() <= mesh.0 {
            self.mesh_bindings.resize(mesh.0 + 1, None);
        }
        self.mesh_bindings[mesh.0] = Some(MeshBinding {
            vertices: *vertices,
            indices: *indices,
            triangle_count,
        });
        self.log.push(HostOp::SetMeshArgs { mesh });
        Ok(())
    }

    fn enqueue_voxelize(&mut self, mesh: MeshHandle, global_size: u64) -> Result<()> {
        self.ensure_acquired("voxelize")?;
        if self.fail_enqueue {
            return Err(SurfvoxError::Dispatch("enqueue rejected".to_string()));
        }
        let Some(volume) = self.volume_binding else {
            return Err(SurfvoxError::KernelArgs("arguments 0-11 are not bound".to_string()));
        };
        let Some(binding) = self.mesh_bindings.get(mesh.0).copied().flatten() else {
            return Err(SurfvoxError::KernelArgs(format!(
                "mesh arguments for mesh {} are not bound",
                mesh.0
            )));
        };
        if global_size % u64::from(self.work_group_size) != 0 {
            return Err(SurfvoxError::Dispatch(format!(
                "global size {global_size} is not a multiple of {}",
                self.work_group_size
            )));
        }

        let positions: Vec<f32> = self.buffers[binding.vertices.0]
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        let indices: Vec<u32> = self.buffers[binding.indices.0]
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        let out = match volume.target {
            Some(buffer) => &mut self.buffers[buffer.0],
            None => &mut self.scratch,
        };

        let lanes = global_size.min(u64::from(binding.triangle_count));
        for triangle in 0..lanes as usize {
            let corners = [0, 1, 2].map(|k| {
                let vertex = indices.get(triangle * 3 + k).copied().unwrap_or(0) as usize;
                let p = positions
                    .get(vertex * 3..vertex * 3 + 3)
                    .unwrap_or(&ORIGIN[..]);
                Vec3::new(p[0], p[1], p[2])
            });
            voxelize_triangle(corners, &volume.args, out);
        }

        self.log.push(HostOp::EnqueueVoxelize { mesh, global_size });
        Ok(())
    }

    fn copy_scratch_to_texture(&mut self, _volume: &HostBuffer) -> Result<()> {
        self.ensure_acquired("scratch copy")?;
        self.texture.copy_from_slice(&self.scratch);
        self.log.push(HostOp::CopyScratchToTexture);
        Ok(())
    }

    fn clear_texture(&mut self, _volume: &HostBuffer) -> Result<()> {
        self.texture.fill(0);
        self.log.push(HostOp::ClearTexture);
        Ok(())
    }
}

/// Marks every voxel touched by a triangle given in world space.
///
/// The triangle is sampled on a barycentric lattice of `n` steps per edge,
/// `n = clamp(ceil(longest edge in voxels), 1, MAX_EDGE_STEPS)`, or 1 if the
/// edge length is NaN.
pub fn voxelize_triangle(corners: [Vec3; 3], args: &VolumeArgs, out: &mut [u8]) {
    let scale = Vec3::from_array(args.scale);
    let offset = Vec3::from_array(args.offset);
    let [v0, v1, v2] = corners.map(|p| (p + offset) * scale);
    let (e1, e2) = (v1 - v0, v2 - v0);

    let longest = e1.length().max(e2.length()).max((v2 - v1).length());
    let max_steps = MAX_EDGE_STEPS as f32;
    let steps = if longest <= max_steps {
        (longest.ceil() as u32).max(1)
    } else if longest > max_steps {
        MAX_EDGE_STEPS
    } else {
        // NaN
        1
    };
    let inv = 1.0 / steps as f32;

    for i in 0..=steps {
        for j in 0..=steps - i {
            let p = v0 + e1 * (i as f32 * inv) + e2 * (j as f32 * inv);
            mark(p, args, out);
        }
    }
}

fn mark(p: Vec3, args: &VolumeArgs, out: &mut [u8]) {
    // Also rejects NaN.
    if !(p.x >= 0.0 && p.y >= 0.0 && p.z >= 0.0) {
        return;
    }
    let (x, y, z) = (p.x as u32, p.y as u32, p.z as u32);
    if x >= args.width || y >= args.height || z >= args.depth {
        return;
    }
    let index = x as usize + y as usize * args.row_pitch as usize + z as usize * args.slice_pitch as usize;
    if let Some(voxel) = out.get_mut(index) {
        *voxel = OCCUPIED;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeTransform;
    use glam::UVec3;

    fn args(dims: u32, extent: f32) -> (VolumeDescriptor, VolumeArgs) {
        let desc = VolumeDescriptor::new([dims; 3]).unwrap();
        let transform =
            VolumeTransform::from_bounds(UVec3::splat(dims), Vec3::ZERO, Vec3::splat(extent))
                .unwrap();
        (desc, VolumeArgs::new(&desc, &transform))
    }

    #[test]
    fn test_degenerate_triangle_marks_one_voxel() {
        let (desc, args) = args(4, 4.0);
        let mut out = vec![0; desc.byte_len() as usize];
        let p = Vec3::new(1.5, 2.5, 3.5);
        voxelize_triangle([p; 3], &args, &mut out);
        assert_eq!(out.iter().filter(|&&b| b == OCCUPIED).count(), 1);
        assert_eq!(out[desc.offset(1, 2, 3).unwrap()], OCCUPIED);
    }

    #[test]
    fn test_out_of_volume_samples_are_skipped() {
        let (desc, args) = args(4, 4.0);
        let mut out = vec![0; desc.byte_len() as usize];
        voxelize_triangle(
            [Vec3::splat(-3.0), Vec3::new(-1.0, -3.0, -3.0), Vec3::splat(9.0)],
            &args,
            &mut out,
        );
        // only the segment inside the volume is marked, nothing panics
        assert!(out.iter().any(|&b| b == OCCUPIED));
        for z in 0..4 {
            for y in 0..4 {
                for x in 4..desc.row_pitch as usize {
                    assert_eq!(out[x + y * desc.row_pitch as usize + z * desc.slice_pitch as usize], 0);
                }
            }
        }
    }

    #[test]
    fn test_non_finite_triangle_is_ignored() {
        let (desc, args) = args(4, 4.0);
        let mut out = vec![0; desc.byte_len() as usize];
        voxelize_triangle([Vec3::NAN, Vec3::ZERO, Vec3::ONE], &args, &mut out);
        voxelize_triangle([Vec3::INFINITY, Vec3::ZERO, Vec3::ONE], &args, &mut out);
        assert!(out.iter().all(|&b| b <= OCCUPIED));
    }

    #[test]
    fn test_calls_outside_acquire_are_rejected() {
        let mut backend = HostBackend::new(64);
        let shared = backend.create_buffer(vec![0; 16]);
        assert!(matches!(
            backend.clear_with_kernel(WriteTarget::Shared(&shared)),
            Err(SurfvoxError::Dispatch(_))
        ));
        assert!(matches!(backend.release(&[&shared]), Err(SurfvoxError::NotAcquired)));
        backend.acquire(&[&shared]).unwrap();
        assert!(matches!(backend.acquire(&[&shared]), Err(SurfvoxError::AlreadyAcquired)));
    }

    #[test]
    fn test_unbound_mesh_is_kernel_args_error() {
        let (desc, args) = args(4, 4.0);
        let mut backend = HostBackend::new(4);
        let shared = backend.create_buffer(vec![0; desc.byte_len() as usize]);
        backend.prepare_volume(&desc, &shared).unwrap();
        backend.acquire(&[&shared]).unwrap();
        assert!(matches!(
            backend.enqueue_voxelize(MeshHandle(0), 4),
            Err(SurfvoxError::KernelArgs(_))
        ));
        backend.set_volume_args(WriteTarget::Shared(&shared), &args).unwrap();
        assert!(matches!(
            backend.enqueue_voxelize(MeshHandle(0), 4),
            Err(SurfvoxError::KernelArgs(_))
        ));
    }

    #[test]
    fn test_prepare_mesh_checks_index_size() {
        let mut backend = HostBackend::new(4);
        let vertices = backend.create_buffer(vec![0; 36]);
        let indices = backend.create_buffer(vec![0; 12]);
        assert!(backend.prepare_mesh(MeshHandle(0), &vertices, &indices, 1).is_ok());
        assert!(matches!(
            backend.prepare_mesh(MeshHandle(0), &vertices, &indices, 2),
            Err(SurfvoxError::Interop(_))
        ));
        let odd = backend.create_buffer(vec![0; 10]);
        assert!(backend.prepare_mesh(MeshHandle(0), &odd, &indices, 1).is_err());
    }
}
