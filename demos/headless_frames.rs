#![allow(clippy::cast_precision_loss)]
//! Headless demo: voxelizes a torus-shaped tube every frame while tracer
//! particles circulate through it and get binned in screen space.
//!
//! Pass a JSON config path as the first argument to override the defaults.
//! Run with `RUST_LOG=info` (or `debug` for per-frame counters).

use std::f32::consts::TAU;

use surfvox::{
    fill_particles, init_logging, Mat4, Particle, ParticleSystem, Result, Session, SurfvoxConfig,
    TravelPath, Vec3,
};

const RING_RADIUS: f32 = 2.0;
const TUBE_RADIUS: f32 = 0.3;
const PATH_NODES: usize = 96;
const TUBE_SIDES: usize = 12;
const FRAMES: usize = 120;

fn centerline() -> TravelPath {
    let nodes = (0..PATH_NODES)
        .map(|i| {
            let t = TAU * i as f32 / PATH_NODES as f32;
            Vec3::new(t.cos() * RING_RADIUS, t.sin() * RING_RADIUS, 0.0)
        })
        .collect();
    TravelPath::new(nodes, true)
}

/// Sweeps a circle of `TUBE_SIDES` vertices along a looped path.
fn tube(path: &TravelPath) -> (Vec<Vec3>, Vec<u32>) {
    let rings = path.len();
    let mut positions = Vec::with_capacity(rings * TUBE_SIDES);
    for (i, &center) in path.nodes.iter().enumerate() {
        let next = path.nodes[(i + 1) % rings];
        let tangent = (next - center).normalize_or_zero();
        let normal = tangent.cross(Vec3::Z).normalize_or_zero();
        let binormal = tangent.cross(normal);
        for s in 0..TUBE_SIDES {
            let a = TAU * s as f32 / TUBE_SIDES as f32;
            positions.push(center + (normal * a.cos() + binormal * a.sin()) * TUBE_RADIUS);
        }
    }

    let mut indices = Vec::with_capacity(rings * TUBE_SIDES * 6);
    let vertex = |ring: usize, side: usize| ((ring % rings) * TUBE_SIDES + side % TUBE_SIDES) as u32;
    for ring in 0..rings {
        for side in 0..TUBE_SIDES {
            let (a, b) = (vertex(ring, side), vertex(ring, side + 1));
            let (c, d) = (vertex(ring + 1, side), vertex(ring + 1, side + 1));
            indices.extend_from_slice(&[a, b, c, b, d, c]);
        }
    }
    (positions, indices)
}

fn main() -> Result<()> {
    init_logging();

    let config = match std::env::args().nth(1) {
        Some(path) => SurfvoxConfig::load(path)?,
        None => SurfvoxConfig::default(),
    };
    let radius = config.particle_radius;
    let mut session = Session::new_headless(config)?;

    let path = centerline();
    let (positions, indices) = tube(&path);
    session.register_mesh(&positions, &indices)?;
    let Some(bounds) = session.mesh_bounds() else {
        return Ok(());
    };

    let mut systems = [
        ParticleSystem::spawn(400, 10.0, 10.0, 1),
        ParticleSystem::spawn(200, 10.0, 6.0, 2),
    ];
    let camera = Mat4::perspective_rh(45f32.to_radians(), 2.0, 0.1, 100.0)
        * Mat4::look_at_rh(Vec3::new(0.0, -6.0, 4.0), Vec3::ZERO, Vec3::Z);

    let mut particles: Vec<Particle> = Vec::new();
    for frame in 0..FRAMES {
        for system in &mut systems {
            system.advect(&path, 1.0 / 60.0);
        }
        let [first, second] = &systems;
        fill_particles(&[first, second], radius, &mut particles);

        let report = session.frame(&particles, camera, bounds)?;
        if frame % 30 == 0 {
            log::info!(
                "frame {frame}: {} insertions, {} dropped, voxelize {:.3} ms (smoothed {:.3} ms)",
                report.bins.insertions,
                report.bins.dropped,
                report.voxelize_ms,
                report.smoothed_voxelize_ms
            );
        }
    }

    let occupied = session.read_volume()?.iter().filter(|&&b| b != 0).count();
    log::info!("final volume: {occupied} occupied voxels");
    println!("{occupied} occupied voxels after {FRAMES} frames");
    Ok(())
}
