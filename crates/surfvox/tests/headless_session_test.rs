//! Headless session integration tests.
//!
//! These tests need a GPU adapter (real or software fallback). Without one
//! each test prints a notice and returns early.

use surfvox::*;
use surfvox_core::host::voxelize_triangle;
use surfvox_core::VolumeArgs;

/// Lands on voxel centers (0.5, 0.5), (2.5, 0.5), (0.5, 2.5) at scale 2.
const TRIANGLE: [Vec3; 3] = [
    Vec3::splat(0.25),
    Vec3::new(1.25, 0.25, 0.25),
    Vec3::new(0.25, 1.25, 0.25),
];
const TRIANGLE_VOXELS: [(u32, u32); 6] = [(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (2, 0)];

fn small_config(write_mode: WriteMode, clear_strategy: ClearStrategy) -> SurfvoxConfig {
    SurfvoxConfig {
        bin_columns: 4,
        bin_rows: 4,
        max_particles_per_bin: 2,
        volume_width: 4,
        volume_height: 4,
        volume_depth: 4,
        max_meshes: 2,
        write_mode,
        clear_strategy,
        ..SurfvoxConfig::default()
    }
}

/// Returns `None` when no adapter is available.
fn device() -> Option<GpuContext> {
    match GpuContext::new_headless_blocking() {
        Ok(gpu) => Some(gpu),
        Err(e) => {
            eprintln!("Skipping headless test: no GPU adapter available ({e})");
            None
        }
    }
}

/// Returns `None` when no adapter is available.
fn session(config: SurfvoxConfig) -> Option<Session> {
    let gpu = device()?;
    Some(Session::new(gpu, config).expect("session creation"))
}

fn unit_bounds() -> Aabb {
    Aabb {
        min: Vec3::ZERO,
        max: Vec3::splat(2.0),
    }
}

fn occupied(volume: &[u8]) -> usize {
    volume.iter().filter(|&&b| b != 0).count()
}

#[test]
fn headless_zero_meshes_gives_empty_volume() {
    let Some(mut session) = session(small_config(WriteMode::Direct, ClearStrategy::CopyTemplate))
    else {
        return;
    };
    session.frame(&[], Mat4::IDENTITY, unit_bounds()).unwrap();

    let volume = session.read_volume().unwrap();
    let descriptor = *session.volume().descriptor();
    assert_eq!(volume.len() as u64, descriptor.byte_len());
    assert_eq!(occupied(&volume), 0);
}

#[test]
fn headless_triangle_matches_host_kernel() {
    let Some(mut session) = session(small_config(WriteMode::Direct, ClearStrategy::CopyTemplate))
    else {
        return;
    };
    session.register_mesh(&TRIANGLE, &[0, 1, 2]).unwrap();
    session.frame(&[], Mat4::IDENTITY, unit_bounds()).unwrap();

    let volume = session.read_volume().unwrap();
    let descriptor = *session.volume().descriptor();
    for &(x, y) in &TRIANGLE_VOXELS {
        assert_eq!(volume[descriptor.offset(x, y, 0).unwrap()], 0xFF, "voxel ({x}, {y}, 0)");
    }
    assert_eq!(occupied(&volume), TRIANGLE_VOXELS.len());

    let transform =
        VolumeTransform::from_bounds(descriptor.dimensions(), Vec3::ZERO, Vec3::splat(2.0))
            .unwrap();
    let mut host = vec![0u8; volume.len()];
    voxelize_triangle(TRIANGLE, &VolumeArgs::new(&descriptor, &transform), &mut host);
    assert_eq!(host, volume);
}

#[test]
fn headless_direct_mode_clears_texture_after_release() {
    let Some(mut session) = session(small_config(WriteMode::Direct, ClearStrategy::CopyTemplate))
    else {
        return;
    };
    session.register_mesh(&TRIANGLE, &[0, 1, 2]).unwrap();
    session.frame(&[], Mat4::IDENTITY, unit_bounds()).unwrap();

    assert_eq!(occupied(&session.read_volume_texture().unwrap()), 0);
}

#[test]
fn headless_staged_mode_writes_texture() {
    let Some(mut session) = session(small_config(WriteMode::Staged, ClearStrategy::CopyTemplate))
    else {
        return;
    };
    session.register_mesh(&TRIANGLE, &[0, 1, 2]).unwrap();
    session.frame(&[], Mat4::IDENTITY, unit_bounds()).unwrap();

    let texture = session.read_volume().unwrap();
    let descriptor = *session.volume().descriptor();
    assert_eq!(texture[descriptor.offset(2, 0, 0).unwrap()], 0xFF);
    assert_eq!(occupied(&texture), TRIANGLE_VOXELS.len());
}

#[test]
fn headless_kernel_clear_removes_previous_frame() {
    let Some(mut session) = session(small_config(WriteMode::Staged, ClearStrategy::Kernel)) else {
        return;
    };
    session.register_mesh(&TRIANGLE, &[0, 1, 2]).unwrap();
    session.frame(&[], Mat4::IDENTITY, unit_bounds()).unwrap();
    assert_eq!(occupied(&session.read_volume().unwrap()), TRIANGLE_VOXELS.len());

    // the triangle lies entirely below these bounds
    let far = Aabb {
        min: Vec3::splat(10.0),
        max: Vec3::splat(12.0),
    };
    session.frame(&[], Mat4::IDENTITY, far).unwrap();
    assert_eq!(occupied(&session.read_volume().unwrap()), 0);
}

#[test]
fn headless_bin_texture_matches_serialized_bins() {
    let Some(mut session) = session(small_config(WriteMode::Direct, ClearStrategy::CopyTemplate))
    else {
        return;
    };
    let particles = [
        Particle::new(Vec3::new(-0.6, -0.6, 0.0), 0.1),
        Particle::new(Vec3::new(0.6, 0.6, 0.0), 0.1),
        Particle::new(Vec3::new(0.0, 0.0, 0.0), 0.3),
    ];
    let report = session.frame(&particles, Mat4::IDENTITY, unit_bounds()).unwrap();
    assert_eq!(report.bins.particles, particles.len());
    assert!(report.bins.insertions > 0);
    assert!(report.voxelize_ms >= 0.0);

    let texels = session.read_bins().unwrap();
    assert_eq!(texels.as_slice(), session.bins().as_slice());
}

#[test]
fn headless_mesh_registration_errors() {
    let Some(mut session) = session(small_config(WriteMode::Direct, ClearStrategy::CopyTemplate))
    else {
        return;
    };

    let err = session.register_mesh(&TRIANGLE, &[0, 1]).unwrap_err();
    assert!(matches!(err, SurfvoxError::SizeMismatch { expected: 0, actual: 2 }));
    let err = session.register_mesh(&TRIANGLE, &[0, 1, 3]).unwrap_err();
    assert!(matches!(err, SurfvoxError::Interop(_)));

    session.register_mesh(&TRIANGLE, &[0, 1, 2]).unwrap();
    session.register_mesh(&TRIANGLE, &[2, 1, 0]).unwrap();
    let err = session.register_mesh(&TRIANGLE, &[0, 1, 2]).unwrap_err();
    assert!(matches!(err, SurfvoxError::MeshCapacityExceeded { max: 2 }));
    assert_eq!(session.mesh_count(), 2);
}

#[test]
fn headless_mesh_bounds_pad_union() {
    let Some(mut session) = session(small_config(WriteMode::Direct, ClearStrategy::CopyTemplate))
    else {
        return;
    };
    assert!(session.mesh_bounds().is_none());
    session.register_mesh(&TRIANGLE, &[0, 1, 2]).unwrap();

    let bounds = session.mesh_bounds().unwrap();
    let eps = session.config().bounds_epsilon;
    assert!((bounds.min.x - (0.25 - eps)).abs() < 1e-6);
    assert!((bounds.max.y - (1.25 + eps)).abs() < 1e-6);
}

#[test]
fn headless_oversized_bin_texture_is_an_error() {
    let Some(gpu) = device() else {
        return;
    };
    let config = SurfvoxConfig {
        bin_columns: 32,
        max_particles_per_bin: 100_000,
        ..small_config(WriteMode::Direct, ClearStrategy::CopyTemplate)
    };
    assert!(config.validate().is_ok());

    let err = Session::new(gpu, config).err().expect("bin texture exceeds the device");
    assert!(
        matches!(&err, SurfvoxError::Backend(message) if message.contains("texture creation failed")),
        "unexpected error: {err}"
    );
}

#[test]
fn headless_oversized_volume_is_an_error() {
    let Some(gpu) = device() else {
        return;
    };
    let config = SurfvoxConfig {
        volume_width: 1 << 20,
        ..small_config(WriteMode::Direct, ClearStrategy::CopyTemplate)
    };
    assert!(config.validate().is_ok());

    let err = Session::new(gpu, config).err().expect("volume exceeds the device");
    assert!(matches!(err, SurfvoxError::Backend(_)), "unexpected error: {err}");
}

#[test]
fn headless_session_on_shared_device() {
    let Some(owner) = device() else {
        return;
    };
    let shared = GpuContext::from_device(owner.device().clone(), owner.queue().clone());
    assert!(shared.adapter_info().is_none());

    let mut session =
        Session::new(shared, small_config(WriteMode::Direct, ClearStrategy::CopyTemplate))
            .expect("session on a shared device");
    session.register_mesh(&TRIANGLE, &[0, 1, 2]).unwrap();
    session.frame(&[], Mat4::IDENTITY, unit_bounds()).unwrap();
    assert_eq!(occupied(&session.read_volume().unwrap()), TRIANGLE_VOXELS.len());
}
