//! Particle store: per-frame particle sets and the tube-following advection
//! that produces them.

use glam::Vec3;
use rand::{Rng, SeedableRng};

/// A particle as seen by the binning engine: a sphere in simulation space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Particle {
    pub position: Vec3,
    pub radius: f32,
}

impl Particle {
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self { position, radius }
    }
}

/// GPU layout of one particle: `(x, y, z, radius)`, one `Rgba32Float` texel.
///
/// An all-zero record is the bin terminator and never a stored particle.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ParticleRecord {
    pub position: [f32; 3],
    pub radius: f32,
}

impl ParticleRecord {
    /// The end-of-list sentinel.
    pub const TERMINATOR: Self = Self {
        position: [0.0; 3],
        radius: 0.0,
    };

    /// Number of floats per record.
    pub const FLOATS: usize = 4;

    /// Returns true if every component is zero.
    pub fn is_terminator(&self) -> bool {
        self.position == [0.0; 3] && self.radius == 0.0
    }

    pub fn to_array(self) -> [f32; 4] {
        [
            self.position[0],
            self.position[1],
            self.position[2],
            self.radius,
        ]
    }

    pub fn from_slice(values: &[f32]) -> Self {
        Self {
            position: [values[0], values[1], values[2]],
            radius: values[3],
        }
    }
}

impl From<Particle> for ParticleRecord {
    fn from(p: Particle) -> Self {
        Self {
            position: p.position.to_array(),
            radius: p.radius,
        }
    }
}

/// The centerline a particle system travels along, supplied by the tube
/// provider.
#[derive(Debug, Clone, Default)]
pub struct TravelPath {
    pub nodes: Vec<Vec3>,
    /// Whether the path closes on itself.
    pub looped: bool,
}

impl TravelPath {
    pub fn new(nodes: Vec<Vec3>, looped: bool) -> Self {
        Self { nodes, looped }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes kept clear of each end of an open path.
    const OPEN_END_MARGIN: usize = 5;

    /// Samples the path at a phase in `[0, period)`.
    ///
    /// Open paths keep both node indices within
    /// `[OPEN_END_MARGIN, len - OPEN_END_MARGIN]`, and a pair that wrapped
    /// around collapses onto the later node.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn sample(&self, phase: f32, period: f32, clamp_ends: bool) -> Vec3 {
        let len = self.nodes.len();
        let linear = phase.rem_euclid(period);
        let node = linear * len as f32 / period;
        let mut a = (node.floor() as usize).min(len - 1);
        let mut b = (node.ceil() as usize) % len;
        let weight = node.fract();

        if clamp_ends && !self.looped {
            let margin = Self::OPEN_END_MARGIN.min((len - 1) / 2);
            let upper = (len - margin).min(len - 1);
            a = a.clamp(margin, upper);
            b = b.clamp(margin, upper);
        }

        let mut start = self.nodes[a];
        let end = self.nodes[b];
        if clamp_ends && !self.looped && b < a {
            start = end;
        }
        start.lerp(end, weight)
    }
}

/// A particle that follows a [`TravelPath`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TracerParticle {
    pub position: Vec3,
    /// Phase offset along the path.
    pub time_of_birth: f32,
    pub velocity: Vec3,
}

/// A set of tracer particles sharing one path and one clock.
#[derive(Debug, Clone)]
pub struct ParticleSystem {
    particles: Vec<TracerParticle>,
    time: f32,
    /// Seconds for one full traversal of the path.
    period: f32,
}

impl ParticleSystem {
    /// Creates `count` particles with birth offsets drawn from `[0, spread)`.
    #[allow(clippy::cast_precision_loss)]
    pub fn spawn(count: usize, spread: f32, period: f32, seed: u64) -> Self {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let particles = (0..count)
            .map(|_| TracerParticle {
                position: Vec3::X,
                time_of_birth: spread * rng.gen_range(0..1000) as f32 / 1000.0,
                velocity: Vec3::Y,
            })
            .collect();
        Self {
            particles,
            time: 0.0,
            period,
        }
    }

    pub fn particles(&self) -> &[TracerParticle] {
        &self.particles
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Advances the clock by `dt` and moves every particle along `path`.
    pub fn advect(&mut self, path: &TravelPath, dt: f32) {
        self.time += dt;
        if path.is_empty() || self.period <= 0.0 {
            return;
        }

        for p in &mut self.particles {
            let phase = p.time_of_birth + self.time;
            let position = path.sample(phase, self.period, true);
            let previous = path.sample(phase - dt, self.period, false);
            p.position = position;
            p.velocity = (position - previous).normalize_or_zero();
        }
    }
}

/// Flattens several systems into one particle list with a uniform radius.
pub fn fill_particles(systems: &[&ParticleSystem], radius: f32, out: &mut Vec<Particle>) {
    out.clear();
    out.reserve(systems.iter().map(|s| s.len()).sum());
    for system in systems {
        out.extend(
            system
                .particles()
                .iter()
                .map(|p| Particle::new(p.position, radius)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_path(len: usize, looped: bool) -> TravelPath {
        #[allow(clippy::cast_precision_loss)]
        let nodes = (0..len).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect();
        TravelPath::new(nodes, looped)
    }

    #[test]
    fn test_terminator_record() {
        assert!(ParticleRecord::TERMINATOR.is_terminator());
        let rec = ParticleRecord::from(Particle::new(Vec3::new(1.0, 0.0, 0.0), 0.0));
        assert!(!rec.is_terminator());
        assert_eq!(rec.to_array(), [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_spawn_is_seeded() {
        let a = ParticleSystem::spawn(10, 3.0, 3.0, 7);
        let b = ParticleSystem::spawn(10, 3.0, 3.0, 7);
        assert_eq!(a.particles(), b.particles());
        for p in a.particles() {
            assert!((0.0..3.0).contains(&p.time_of_birth));
        }
    }

    #[test]
    fn test_advect_looped_path_moves_forward() {
        let path = straight_path(20, true);
        let mut system = ParticleSystem::spawn(1, 0.0, 2.0, 0);
        system.advect(&path, 0.5);
        // half a second of a two second period is a quarter of the path
        let p = system.particles()[0];
        assert!((p.position.x - 5.0).abs() < 1e-4);
        assert!((p.velocity - Vec3::X).length() < 1e-4);
    }

    #[test]
    fn test_advect_open_path_stays_clear_of_ends() {
        let path = straight_path(20, false);
        let mut system = ParticleSystem::spawn(50, 2.0, 2.0, 3);
        for _ in 0..40 {
            system.advect(&path, 0.05);
            for p in system.particles() {
                assert!(p.position.x >= 5.0 - 1e-4 && p.position.x <= 15.0 + 1e-4);
            }
        }
    }

    #[test]
    fn test_open_path_clamps_to_upper_margin_node() {
        let path = straight_path(20, false);
        // node 15.5: both neighbours clamp onto node 15
        let x = path.sample(1.55, 2.0, true).x;
        assert!((x - 15.0).abs() < 1e-5, "x = {x}");
        // node 14.5 lies inside the margins and interpolates
        let x = path.sample(1.45, 2.0, true).x;
        assert!((x - 14.5).abs() < 1e-4, "x = {x}");
        // node 2.5: both clamp onto node 5
        let x = path.sample(0.25, 2.0, true).x;
        assert!((x - 5.0).abs() < 1e-5, "x = {x}");
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_short_open_paths_stay_in_bounds() {
        for len in 1..=4 {
            let path = straight_path(len, false);
            for step in 0..20 {
                let p = path.sample(step as f32 * 0.1, 2.0, true);
                assert!(p.x >= 0.0 && p.x <= (len - 1) as f32, "len {len}: x = {}", p.x);
            }
        }
    }

    #[test]
    fn test_advect_empty_path_only_ticks_clock() {
        let mut system = ParticleSystem::spawn(3, 1.0, 1.0, 0);
        system.advect(&TravelPath::default(), 0.25);
        assert!((system.time() - 0.25).abs() < f32::EPSILON);
        assert_eq!(system.particles()[0].position, Vec3::X);
    }

    #[test]
    fn test_fill_particles_concatenates_in_order() {
        let a = ParticleSystem::spawn(2, 1.0, 1.0, 1);
        let b = ParticleSystem::spawn(3, 1.0, 1.0, 2);
        let mut out = vec![Particle::default(); 9];
        fill_particles(&[&a, &b], 0.4, &mut out);
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|p| (p.radius - 0.4).abs() < f32::EPSILON));
    }
}
