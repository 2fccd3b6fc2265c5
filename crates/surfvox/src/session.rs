//! One frame: a binning pass, then a voxelization dispatch.

use std::time::Instant;

use glam::{Mat4, Vec3};
use surfvox_core::{
    enclosing_bounds, Aabb, BinBuffer, BinGrid, BinStats, ComputeInteropContext, MeshHandle,
    Particle, Result, SurfvoxConfig, SurfvoxError, VolumeDescriptor, WriteMode,
};
use surfvox_render::{
    create_mesh_buffer, BinTexture, GpuContext, GpuInteropContext, VolumeSurface, WgpuBackend,
};

/// Smoothing factor of the frame counters.
pub const SMOOTHING_ALPHA: f64 = 0.05;

/// Exponential moving average; the first sample seeds it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothed {
    value: Option<f64>,
    alpha: f64,
}

impl Default for Smoothed {
    fn default() -> Self {
        Self::new(SMOOTHING_ALPHA)
    }
}

impl Smoothed {
    pub fn new(alpha: f64) -> Self {
        Self { value: None, alpha }
    }

    /// Folds in a sample and returns the smoothed value.
    pub fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            None => sample,
            Some(previous) => sample * self.alpha + previous * (1.0 - self.alpha),
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// What happened during one [`Session::frame`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    /// Binning counters for this frame.
    pub bins: BinStats,
    /// Wall time of this frame's voxelization, GPU completion included.
    pub voxelize_ms: f64,
    /// `voxelize_ms` smoothed over frames.
    pub smoothed_voxelize_ms: f64,
}

/// Owns both subsystems and drives them one frame at a time.
pub struct Session {
    config: SurfvoxConfig,
    gpu: GpuContext,
    surface: VolumeSurface,
    interop: GpuInteropContext,
    grid: BinGrid,
    bins: BinBuffer,
    bin_texture: BinTexture,
    mesh_bounds: Vec<Aabb>,
    voxelize_time: Smoothed,
}

impl Session {
    /// Creates a session on an existing device.
    pub fn new(gpu: GpuContext, config: SurfvoxConfig) -> Result<Self> {
        config.validate()?;
        let descriptor = VolumeDescriptor::new(config.volume_dimensions())?;
        let surface = VolumeSurface::new(gpu.device(), descriptor)?;
        let backend = WgpuBackend::new(&gpu, &surface)?;
        let mut interop = ComputeInteropContext::new(backend, &config)?;
        interop.register_volume(surface.shared.clone())?;

        let layout = config.bin_layout();
        let bin_texture = BinTexture::new(gpu.device(), layout)?;
        log::info!(
            "surfvox session: {}x{} bins of {} particles",
            layout.columns,
            layout.rows,
            layout.capacity
        );

        Ok(Self {
            grid: BinGrid::new(layout),
            bins: BinBuffer::new(layout),
            bin_texture,
            config,
            gpu,
            surface,
            interop,
            mesh_bounds: Vec::new(),
            voxelize_time: Smoothed::default(),
        })
    }

    /// Creates a session on a new headless device.
    pub fn new_headless(config: SurfvoxConfig) -> Result<Self> {
        let gpu = GpuContext::new_headless_blocking()?;
        Self::new(gpu, config)
    }

    /// Uploads a static triangle mesh and registers it for voxelization.
    pub fn register_mesh(&mut self, positions: &[Vec3], indices: &[u32]) -> Result<MeshHandle> {
        if indices.len() % 3 != 0 {
            return Err(SurfvoxError::SizeMismatch {
                expected: indices.len() - indices.len() % 3,
                actual: indices.len(),
            });
        }
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= positions.len()) {
            return Err(SurfvoxError::Interop(format!(
                "index {bad} out of range for {} vertices",
                positions.len()
            )));
        }
        let triangle_count = u32::try_from(indices.len() / 3)
            .map_err(|_| SurfvoxError::Interop("too many triangles".to_string()))?;

        let flat: Vec<f32> = positions.iter().flat_map(|p| p.to_array()).collect();
        let device = self.gpu.device();
        let vertices = create_mesh_buffer(device, &flat, Some("surfvox mesh positions"));
        let triangles = create_mesh_buffer(device, indices, Some("surfvox mesh triangles"));
        let handle = self.interop.register_mesh(vertices, triangles, triangle_count)?;

        if let Some(bounds) = Aabb::from_points(positions) {
            self.mesh_bounds.push(bounds);
        }
        Ok(handle)
    }

    /// Union of every registered mesh's bounds, padded by the configured epsilon.
    pub fn mesh_bounds(&self) -> Option<Aabb> {
        enclosing_bounds(&self.mesh_bounds, self.config.bounds_epsilon)
    }

    /// Runs one frame: bins `particles` under `view_projection`, uploads the
    /// bin texture, then voxelizes every mesh into `bounds`.
    pub fn frame(
        &mut self,
        particles: &[Particle],
        view_projection: Mat4,
        bounds: Aabb,
    ) -> Result<FrameReport> {
        self.grid.rebuild(particles, view_projection);
        self.bins.update(&self.grid)?;
        self.bin_texture
            .upload(self.gpu.device(), self.gpu.queue(), &self.bins)?;

        let start = Instant::now();
        self.interop.voxelize(bounds.min, bounds.max)?;
        let _ = self.gpu.device().poll(wgpu::PollType::wait_indefinitely());
        let voxelize_ms = start.elapsed().as_secs_f64() * 1000.0;
        let smoothed_voxelize_ms = self.voxelize_time.update(voxelize_ms);

        let stats = self.grid.stats();
        log::debug!(
            "frame: {} particles, {} insertions, {} dropped, voxelize {voxelize_ms:.3} ms",
            stats.particles,
            stats.insertions,
            stats.dropped
        );
        Ok(FrameReport {
            bins: stats,
            voxelize_ms,
            smoothed_voxelize_ms,
        })
    }

    /// Reads the voxels the raycaster would see, in the volume's pitched layout.
    ///
    /// Direct writes land in the shared buffer; staged writes land in the texture.
    pub fn read_volume(&self) -> Result<Vec<u8>> {
        let (device, queue) = (self.gpu.device(), self.gpu.queue());
        let bytes = match self.config.write_mode {
            WriteMode::Direct => self.surface.read_shared(device, queue)?,
            WriteMode::Staged => self.surface.read_texture(device, queue)?,
        };
        Ok(bytes)
    }

    /// Reads the destination texture, whatever the write mode.
    pub fn read_volume_texture(&self) -> Result<Vec<u8>> {
        Ok(self
            .surface
            .read_texture(self.gpu.device(), self.gpu.queue())?)
    }

    /// Reads the bin texture back as serialized floats.
    pub fn read_bins(&self) -> Result<Vec<f32>> {
        Ok(self.bin_texture.read(self.gpu.device(), self.gpu.queue())?)
    }

    pub fn config(&self) -> &SurfvoxConfig {
        &self.config
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn volume(&self) -> &VolumeSurface {
        &self.surface
    }

    pub fn bin_texture(&self) -> &BinTexture {
        &self.bin_texture
    }

    pub fn bins(&self) -> &BinBuffer {
        &self.bins
    }

    pub fn grid(&self) -> &BinGrid {
        &self.grid
    }

    pub fn interop(&self) -> &GpuInteropContext {
        &self.interop
    }

    pub fn mesh_count(&self) -> usize {
        self.interop.mesh_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoothed_seeds_with_first_sample() {
        let mut s = Smoothed::default();
        assert_eq!(s.value(), None);
        assert!((s.update(10.0) - 10.0).abs() < 1e-12);
        assert!((s.update(20.0) - 10.5).abs() < 1e-12);
    }

    #[test]
    fn test_smoothed_converges() {
        let mut s = Smoothed::new(0.5);
        s.update(0.0);
        for _ in 0..60 {
            s.update(1.0);
        }
        assert!((s.value().unwrap() - 1.0).abs() < 1e-9);
    }
}
