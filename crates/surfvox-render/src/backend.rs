//! wgpu implementation of [`ComputeBackend`].
//!
//! Acquire opens a command encoder and release submits it: compute owns the
//! shared buffers while its commands are being recorded, and queue order
//! makes the results visible to every later graphics submission.

use bytemuck::Zeroable;
use pollster::FutureExt;
use surfvox_core::{
    ComputeBackend, MeshArgs, MeshHandle, Result, SurfvoxError, VolumeArgs, VolumeDescriptor,
    WriteTarget,
};

use crate::buffer::{create_uniform_buffer, create_zeroed_buffer, update_buffer};
use crate::gpu::GpuContext;
use crate::kernels::{dispatch_grid, VoxelKernels, WORK_GROUP_SIZE};
use crate::volume_surface::{copy_buffer_to_volume, VolumeSurface};

#[derive(Debug)]
struct MeshBinding {
    args: wgpu::Buffer,
    /// `None` for meshes with no triangles.
    bind_group: Option<wgpu::BindGroup>,
}

/// Compute-side buffers sized at volume registration.
#[derive(Debug)]
struct VolumeResources {
    descriptor: VolumeDescriptor,
    scratch: wgpu::Buffer,
    clear_template: wgpu::Buffer,
    /// Cached `[shared, scratch]` bind groups for `voxelize`.
    voxelize_groups: [wgpu::BindGroup; 2],
    /// Cached `[shared, scratch]` bind groups for `fast_clear`.
    clear_groups: [wgpu::BindGroup; 2],
}

fn slot<O>(target: WriteTarget<'_, O>) -> usize {
    match target {
        WriteTarget::Shared(_) => 0,
        WriteTarget::Scratch => 1,
    }
}

/// Voxelization backend running on a wgpu device.
#[derive(Debug)]
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    kernels: VoxelKernels,
    /// Destination texture and its zero source, both graphics-owned.
    texture: wgpu::Texture,
    clear_transfer: wgpu::Buffer,
    volume_args: wgpu::Buffer,
    /// Bind group selected by the last `set_volume_args`.
    bound_target: Option<usize>,
    volume: Option<VolumeResources>,
    meshes: Vec<MeshBinding>,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuBackend {
    /// Creates a backend that writes into `surface`.
    pub fn new(gpu: &GpuContext, surface: &VolumeSurface) -> crate::RenderResult<Self> {
        let device = gpu.device().clone();
        let kernels = VoxelKernels::new(&device)?;
        let volume_args = create_uniform_buffer(
            &device,
            &VolumeArgs::zeroed(),
            Some("surfvox volume args"),
        );
        Ok(Self {
            queue: gpu.queue().clone(),
            kernels,
            texture: surface.texture.clone(),
            clear_transfer: surface.clear_transfer.clone(),
            volume_args,
            bound_target: None,
            volume: None,
            meshes: Vec::new(),
            encoder: None,
            device,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Compute scratch buffer, once a volume is registered.
    pub fn scratch(&self) -> Option<&wgpu::Buffer> {
        self.volume.as_ref().map(|v| &v.scratch)
    }

    fn resources(&self) -> Result<&VolumeResources> {
        self.volume.as_ref().ok_or(SurfvoxError::VolumeNotRegistered)
    }

    fn encoder(&mut self) -> Result<&mut wgpu::CommandEncoder> {
        self.encoder.as_mut().ok_or(SurfvoxError::NotAcquired)
    }

    /// Creates a bind group under a validation error scope.
    fn bind_group(
        &self,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        buffers: &[&wgpu::Buffer],
    ) -> Result<wgpu::BindGroup> {
        let entries: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &entries,
        });
        match self.device.pop_error_scope().block_on() {
            None => Ok(group),
            Some(err) => {
                log::error!("{label}: {err}");
                Err(SurfvoxError::KernelArgs(err.to_string()))
            }
        }
    }

    fn target_buffer<'a>(
        resources: &'a VolumeResources,
        target: WriteTarget<'a, wgpu::Buffer>,
    ) -> &'a wgpu::Buffer {
        match target {
            WriteTarget::Shared(buffer) => buffer,
            WriteTarget::Scratch => &resources.scratch,
        }
    }
}

fn check_storage(buffer: &wgpu::Buffer, what: &str) -> Result<()> {
    if buffer.usage().contains(wgpu::BufferUsages::STORAGE) {
        Ok(())
    } else {
        Err(SurfvoxError::Interop(format!(
            "{what} buffer lacks STORAGE usage and cannot be shared with compute"
        )))
    }
}

impl ComputeBackend for WgpuBackend {
    type Object = wgpu::Buffer;

    fn work_group_size(&self) -> u32 {
        WORK_GROUP_SIZE
    }

    fn prepare_volume(&mut self, volume: &VolumeDescriptor, object: &wgpu::Buffer) -> Result<()> {
        check_storage(object, "volume")?;
        if object.size() != volume.byte_len() {
            return Err(SurfvoxError::Interop(format!(
                "volume buffer holds {} bytes, expected {}",
                object.size(),
                volume.byte_len()
            )));
        }
        let texture_size = self.texture.size();
        if (texture_size.width, texture_size.height, texture_size.depth_or_array_layers)
            != (volume.width, volume.height, volume.depth)
        {
            return Err(SurfvoxError::Interop(format!(
                "destination texture is {}x{}x{}, volume is {}x{}x{}",
                texture_size.width,
                texture_size.height,
                texture_size.depth_or_array_layers,
                volume.width,
                volume.height,
                volume.depth
            )));
        }

        let scratch = create_zeroed_buffer(
            &self.device,
            volume.byte_len(),
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            Some("surfvox compute scratch"),
        );
        let clear_template = create_zeroed_buffer(
            &self.device,
            volume.byte_len(),
            wgpu::BufferUsages::COPY_SRC,
            Some("surfvox clear template"),
        );

        let voxelize_groups = [
            self.bind_group(
                "voxelize volume (shared)",
                &self.kernels.volume_layout,
                &[object, &self.volume_args],
            )?,
            self.bind_group(
                "voxelize volume (scratch)",
                &self.kernels.volume_layout,
                &[&scratch, &self.volume_args],
            )?,
        ];
        let clear_groups = [
            self.bind_group("fast_clear (shared)", &self.kernels.clear_layout, &[object])?,
            self.bind_group("fast_clear (scratch)", &self.kernels.clear_layout, &[&scratch])?,
        ];

        self.volume = Some(VolumeResources {
            descriptor: *volume,
            scratch,
            clear_template,
            voxelize_groups,
            clear_groups,
        });
        Ok(())
    }

    fn prepare_mesh(
        &mut self,
        mesh: MeshHandle,
        vertices: &wgpu::Buffer,
        indices: &wgpu::Buffer,
        triangle_count: u32,
    ) -> Result<()> {
        check_storage(vertices, "vertex")?;
        check_storage(indices, "index")?;
        if vertices.size() % 12 != 0 {
            return Err(SurfvoxError::Interop(
                "vertex buffer is not a whole number of float3 positions".to_string(),
            ));
        }
        let needed = u64::from(triangle_count) * 12;
        if indices.size() < needed {
            return Err(SurfvoxError::Interop(format!(
                "index buffer holds {} bytes, {triangle_count} triangles need {needed}",
                indices.size()
            )));
        }
        if mesh.0 != self.meshes.len() {
            return Err(SurfvoxError::Interop(format!(
                "mesh {} registered out of order",
                mesh.0
            )));
        }

        let args = create_uniform_buffer(
            &self.device,
            &MeshArgs::new(triangle_count),
            Some("surfvox mesh args"),
        );
        let bind_group = if triangle_count == 0 {
            None
        } else {
            Some(self.bind_group(
                "voxelize mesh",
                &self.kernels.mesh_layout,
                &[vertices, indices, &args],
            )?)
        };
        self.meshes.push(MeshBinding { args, bind_group });
        Ok(())
    }

    fn acquire(&mut self, _objects: &[&wgpu::Buffer]) -> Result<()> {
        if self.encoder.is_some() {
            return Err(SurfvoxError::AlreadyAcquired);
        }
        self.encoder = Some(self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("surfvox voxelize encoder"),
        }));
        Ok(())
    }

    fn release(&mut self, objects: &[&wgpu::Buffer]) -> Result<()> {
        let encoder = self.encoder.take().ok_or(SurfvoxError::NotAcquired)?;
        self.bound_target = None;
        self.queue.submit(std::iter::once(encoder.finish()));
        log::trace!("released {} shared objects to graphics", objects.len());
        Ok(())
    }

    fn copy_clear_template(&mut self, target: WriteTarget<'_, wgpu::Buffer>) -> Result<()> {
        let resources = self.volume.as_ref().ok_or(SurfvoxError::VolumeNotRegistered)?;
        let destination = Self::target_buffer(resources, target);
        let encoder = self.encoder.as_mut().ok_or(SurfvoxError::NotAcquired)?;
        encoder.copy_buffer_to_buffer(
            &resources.clear_template,
            0,
            destination,
            0,
            resources.descriptor.byte_len(),
        );
        Ok(())
    }

    fn clear_with_kernel(&mut self, target: WriteTarget<'_, wgpu::Buffer>) -> Result<()> {
        let max = self.device.limits().max_compute_workgroups_per_dimension;
        let resources = self.volume.as_ref().ok_or(SurfvoxError::VolumeNotRegistered)?;
        let group = &resources.clear_groups[slot(target)];
        let words = resources.descriptor.byte_len() / 4;
        let groups = u32::try_from(words.div_ceil(u64::from(WORK_GROUP_SIZE)))
            .map_err(|_| SurfvoxError::Dispatch("volume too large for fast_clear".to_string()))?;
        let (x, y) = dispatch_grid(groups, max);
        if y > max {
            return Err(SurfvoxError::Dispatch(format!(
                "fast_clear needs {groups} work groups, device allows {max}x{max}"
            )));
        }

        let encoder = self.encoder.as_mut().ok_or(SurfvoxError::NotAcquired)?;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("surfvox fast_clear pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.kernels.fast_clear);
        pass.set_bind_group(0, group, &[]);
        pass.dispatch_workgroups(x, y, 1);
        Ok(())
    }

    fn set_volume_args(&mut self, target: WriteTarget<'_, wgpu::Buffer>, args: &VolumeArgs) -> Result<()> {
        self.encoder()?;
        self.resources()?;
        update_buffer(&self.queue, &self.volume_args, args);
        self.bound_target = Some(slot(target));
        Ok(())
    }

    fn set_mesh_args(
        &mut self,
        mesh: MeshHandle,
        _vertices: &wgpu::Buffer,
        _indices: &wgpu::Buffer,
        triangle_count: u32,
    ) -> Result<()> {
        self.encoder()?;
        let binding = self.meshes.get(mesh.0).ok_or_else(|| {
            SurfvoxError::KernelArgs(format!("unable to bind arguments for mesh {}", mesh.0))
        })?;
        if triangle_count > 0 && binding.bind_group.is_none() {
            return Err(SurfvoxError::KernelArgs(format!(
                "mesh {} was registered without triangles",
                mesh.0
            )));
        }
        update_buffer(&self.queue, &binding.args, &MeshArgs::new(triangle_count));
        Ok(())
    }

    fn enqueue_voxelize(&mut self, mesh: MeshHandle, global_size: u64) -> Result<()> {
        let Some(slot) = self.bound_target else {
            return Err(SurfvoxError::KernelArgs(
                "voxelize enqueued before the volume arguments were set".to_string(),
            ));
        };
        let resources = self.volume.as_ref().ok_or(SurfvoxError::VolumeNotRegistered)?;
        let volume_group = &resources.voxelize_groups[slot];
        let binding = self
            .meshes
            .get(mesh.0)
            .ok_or_else(|| SurfvoxError::KernelArgs(format!("mesh {} is not bound", mesh.0)))?;
        let Some(mesh_group) = binding.bind_group.as_ref() else {
            // Nothing to rasterize.
            return Ok(());
        };

        let groups = global_size / u64::from(WORK_GROUP_SIZE);
        let max = self.device.limits().max_compute_workgroups_per_dimension;
        let groups = u32::try_from(groups)
            .ok()
            .filter(|&g| g <= max)
            .ok_or_else(|| {
                SurfvoxError::Dispatch(format!(
                    "voxelize needs {groups} work groups, device allows {max}"
                ))
            })?;
        if groups == 0 {
            return Ok(());
        }

        let encoder = self.encoder.as_mut().ok_or(SurfvoxError::NotAcquired)?;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("surfvox voxelize pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.kernels.voxelize);
        pass.set_bind_group(0, volume_group, &[]);
        pass.set_bind_group(1, mesh_group, &[]);
        pass.dispatch_workgroups(groups, 1, 1);
        Ok(())
    }

    fn copy_scratch_to_texture(&mut self, _volume: &wgpu::Buffer) -> Result<()> {
        let resources = self.volume.as_ref().ok_or(SurfvoxError::VolumeNotRegistered)?;
        let encoder = self.encoder.as_mut().ok_or(SurfvoxError::NotAcquired)?;
        copy_buffer_to_volume(encoder, &resources.scratch, &self.texture, &resources.descriptor);
        Ok(())
    }

    fn clear_texture(&mut self, _volume: &wgpu::Buffer) -> Result<()> {
        let descriptor = self.resources()?.descriptor;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("surfvox texture clear encoder"),
        });
        copy_buffer_to_volume(&mut encoder, &self.clear_transfer, &self.texture, &descriptor);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}
