//! Voxelization dispatch: the per-frame acquire, clear, bind, dispatch and
//! release sequence, independent of the device that executes it.

use glam::Vec3;

use crate::config::{ClearStrategy, SurfvoxConfig, WriteMode};
use crate::error::{Result, SurfvoxError};
use crate::interop::{InteropRegistry, MeshHandle, SharedObjectId};
use crate::volume::{VolumeDescriptor, VolumeTransform};

/// Fixed voxelization kernel arguments, laid out as the kernel's uniform block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VolumeArgs {
    pub scale: [f32; 3],
    pub row_pitch: u32,
    pub offset: [f32; 3],
    pub slice_pitch: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub _padding: u32,
}

impl VolumeArgs {
    pub fn new(volume: &VolumeDescriptor, transform: &VolumeTransform) -> Self {
        Self {
            scale: transform.scale.to_array(),
            row_pitch: volume.row_pitch,
            offset: transform.offset.to_array(),
            slice_pitch: volume.slice_pitch,
            width: volume.width,
            height: volume.height,
            depth: volume.depth,
            _padding: 0,
        }
    }
}

/// Per-mesh kernel arguments.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshArgs {
    pub triangle_count: u32,
    pub _padding: [u32; 3],
}

impl MeshArgs {
    pub fn new(triangle_count: u32) -> Self {
        Self {
            triangle_count,
            _padding: [0; 3],
        }
    }
}

/// Where the voxelization kernel writes this frame.
#[derive(Debug)]
pub enum WriteTarget<'a, O> {
    /// The shared volume object itself.
    Shared(&'a O),
    /// The backend's compute scratch buffer.
    Scratch,
}

impl<O> Clone for WriteTarget<'_, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O> Copy for WriteTarget<'_, O> {}

/// Rounds `n` up to a multiple of `group`: `n` itself if it already is one.
pub fn snap(n: u32, group: u32) -> u64 {
    let (n, group) = (u64::from(n), u64::from(group));
    if group == 0 || n % group == 0 {
        n
    } else {
        n - n % group + group
    }
}

/// A device that can execute the voxelization sequence.
///
/// The context calls these in a fixed order each frame; implementations may
/// record commands and defer execution until [`ComputeBackend::release`].
pub trait ComputeBackend {
    /// Handle to a shared memory object.
    type Object;

    /// Lanes per work group of the voxelization kernel.
    fn work_group_size(&self) -> u32;

    /// Validates the shared volume object and sizes the companion buffers.
    fn prepare_volume(&mut self, volume: &VolumeDescriptor, object: &Self::Object) -> Result<()>;

    /// Validates a mesh's shared objects before registration.
    fn prepare_mesh(
        &mut self,
        mesh: MeshHandle,
        vertices: &Self::Object,
        indices: &Self::Object,
        triangle_count: u32,
    ) -> Result<()>;

    /// Hands `objects` to compute.
    fn acquire(&mut self, objects: &[&Self::Object]) -> Result<()>;

    /// Hands `objects` back to graphics.
    fn release(&mut self, objects: &[&Self::Object]) -> Result<()>;

    /// Device-side copy of the zeroed clear template into `target`.
    fn copy_clear_template(&mut self, target: WriteTarget<'_, Self::Object>) -> Result<()>;

    /// Zeroes `target` with the `fast_clear` kernel.
    fn clear_with_kernel(&mut self, target: WriteTarget<'_, Self::Object>) -> Result<()>;

    /// Binds the fixed arguments: target, scale, offset, pitches and dimensions.
    fn set_volume_args(&mut self, target: WriteTarget<'_, Self::Object>, args: &VolumeArgs) -> Result<()>;

    /// Binds one mesh's vertex buffer, index buffer and triangle count.
    fn set_mesh_args(
        &mut self,
        mesh: MeshHandle,
        vertices: &Self::Object,
        indices: &Self::Object,
        triangle_count: u32,
    ) -> Result<()>;

    /// Enqueues a 1-D voxelization dispatch of `global_size` lanes.
    fn enqueue_voxelize(&mut self, mesh: MeshHandle, global_size: u64) -> Result<()>;

    /// Copies the scratch buffer into the destination texture.
    fn copy_scratch_to_texture(&mut self, volume: &Self::Object) -> Result<()>;

    /// Overwrites the destination texture with zeros from the clear transfer buffer.
    fn clear_texture(&mut self, volume: &Self::Object) -> Result<()>;
}

/// Owns the compute device, the shared-object registry and the volume layout.
pub struct ComputeInteropContext<B: ComputeBackend> {
    backend: B,
    registry: InteropRegistry<B::Object>,
    volume: VolumeDescriptor,
    write_mode: WriteMode,
    clear_strategy: ClearStrategy,
}

impl<B: ComputeBackend> ComputeInteropContext<B> {
    /// Creates a context sized from `config`.
    pub fn new(backend: B, config: &SurfvoxConfig) -> Result<Self> {
        config.validate()?;
        let volume = VolumeDescriptor::new(config.volume_dimensions())?;
        log::info!(
            "compute interop context: volume {}x{}x{} ({} bytes), {:?} writes, up to {} meshes",
            volume.width,
            volume.height,
            volume.depth,
            volume.byte_len(),
            config.write_mode,
            config.max_meshes
        );
        Ok(Self {
            backend,
            registry: InteropRegistry::new(config.max_meshes),
            volume,
            write_mode: config.write_mode,
            clear_strategy: config.clear_strategy,
        })
    }

    /// Wraps the graphics-owned volume as a write-only shared object.
    pub fn register_volume(&mut self, object: B::Object) -> Result<SharedObjectId> {
        if self.registry.volume().is_some() {
            return Err(SurfvoxError::VolumeAlreadyRegistered);
        }
        if let Err(e) = self.backend.prepare_volume(&self.volume, &object) {
            log::error!("unable to share the volume with compute: {e}");
            return Err(e);
        }
        self.registry.register_volume(object)
    }

    /// Wraps a mesh's vertex and index buffers as read-only shared objects.
    pub fn register_mesh(
        &mut self,
        vertices: B::Object,
        indices: B::Object,
        triangle_count: u32,
    ) -> Result<MeshHandle> {
        let max = self.registry.max_meshes();
        if self.registry.meshes().len() >= max {
            log::error!("mesh registry full ({max} meshes)");
            return Err(SurfvoxError::MeshCapacityExceeded { max });
        }
        let next = MeshHandle(self.registry.meshes().len());
        if let Err(e) = self
            .backend
            .prepare_mesh(next, &vertices, &indices, triangle_count)
        {
            log::error!("unable to share mesh {} with compute: {e}", next.0);
            return Err(e);
        }
        let handle = self.registry.register_mesh(vertices, indices, triangle_count)?;
        log::info!("registered mesh {} ({triangle_count} triangles)", handle.0);
        Ok(handle)
    }

    /// Voxelizes every registered mesh into the volume spanning
    /// `[min_corner, max_corner]`.
    ///
    /// All shared objects are returned to graphics before this returns, even
    /// when a step after acquisition fails.
    pub fn voxelize(&mut self, min_corner: Vec3, max_corner: Vec3) -> Result<()> {
        let transform =
            VolumeTransform::from_bounds(self.volume.dimensions(), min_corner, max_corner)?;
        if self.registry.volume().is_none() {
            return Err(SurfvoxError::VolumeNotRegistered);
        }

        let lease = self.registry.acquire_all()?;
        let Self {
            backend,
            registry,
            volume,
            write_mode,
            clear_strategy,
        } = self;

        let objects: Vec<&B::Object> = registry.objects().collect();
        let outcome = backend.acquire(&objects).and_then(|()| {
            let recorded = record(backend, registry, volume, &transform, *write_mode, *clear_strategy);
            let released = backend.release(&objects);
            recorded.and(released)
        });
        drop(objects);

        let returned = registry.release(lease);
        if let Err(e) = &outcome {
            log::error!("voxelization dispatch failed: {e}");
        }
        outcome.and(returned)?;

        if *write_mode == WriteMode::Direct {
            let shared = registry.volume().ok_or(SurfvoxError::VolumeNotRegistered)?;
            backend.clear_texture(shared)?;
        }
        Ok(())
    }

    /// Returns the number of registered meshes.
    pub fn mesh_count(&self) -> usize {
        self.registry.meshes().len()
    }

    pub fn volume(&self) -> &VolumeDescriptor {
        &self.volume
    }

    pub fn registry(&self) -> &InteropRegistry<B::Object> {
        &self.registry
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

/// Records the work done while compute holds the shared objects.
fn record<B: ComputeBackend>(
    backend: &mut B,
    registry: &InteropRegistry<B::Object>,
    volume: &VolumeDescriptor,
    transform: &VolumeTransform,
    write_mode: WriteMode,
    clear_strategy: ClearStrategy,
) -> Result<()> {
    let shared = registry.volume().ok_or(SurfvoxError::VolumeNotRegistered)?;
    let target = match write_mode {
        WriteMode::Direct => WriteTarget::Shared(shared),
        WriteMode::Staged => WriteTarget::Scratch,
    };

    match clear_strategy {
        ClearStrategy::CopyTemplate => backend.copy_clear_template(target)?,
        ClearStrategy::Kernel => backend.clear_with_kernel(target)?,
    }
    backend.set_volume_args(target, &VolumeArgs::new(volume, transform))?;

    let group = backend.work_group_size();
    for (index, mesh) in registry.meshes().iter().enumerate() {
        let handle = MeshHandle(index);
        let (Some(vertices), Some(indices)) = (registry.get(mesh.vertices), registry.get(mesh.indices))
        else {
            return Err(SurfvoxError::Interop(format!("mesh {index} has no shared objects")));
        };
        backend.set_mesh_args(handle, vertices, indices, mesh.triangle_count)?;
        backend.enqueue_voxelize(handle, snap(mesh.triangle_count, group))?;
    }

    if write_mode == WriteMode::Staged {
        backend.copy_scratch_to_texture(shared)?;
    }
    Ok(())
}
