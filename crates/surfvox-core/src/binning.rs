//! Screen-space spatial binning of particles.
//!
//! Each frame the particle set is projected into a `columns × rows` grid and
//! every particle is deposited into each cell its projected footprint
//! overlaps. Bins have a fixed capacity; insertions into a full bin are
//! dropped. The grid is dense (one fixed-capacity slot array per cell) and is
//! reset, not reallocated, between frames.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss
)]

use glam::{Mat4, Vec3, Vec4};

use crate::particles::{Particle, ParticleRecord};

/// Shape of the bin grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinLayout {
    pub columns: u32,
    pub rows: u32,
    /// Maximum particles per bin.
    pub capacity: u32,
}

impl BinLayout {
    pub fn new(columns: u32, rows: u32, capacity: u32) -> Self {
        Self {
            columns,
            rows,
            capacity,
        }
    }

    /// Number of cells in the grid.
    pub fn cell_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    /// Records per serialized cell, including the terminator slot.
    pub fn cell_stride(&self) -> usize {
        self.capacity as usize + 1
    }

    /// Length of the serialized buffer in floats.
    pub fn float_len(&self) -> usize {
        self.cell_count() * self.cell_stride() * ParticleRecord::FLOATS
    }

    /// Row-major cell index.
    pub fn cell_index(&self, row: u32, column: u32) -> usize {
        debug_assert!(row < self.rows && column < self.columns);
        row as usize * self.columns as usize + column as usize
    }

    /// Size of the bin texture in texels: `(columns * (capacity + 1), rows)`.
    ///
    /// `None` if the width does not fit in a `u32`.
    pub fn texture_size(&self) -> Option<(u32, u32)> {
        let width = self.capacity.checked_add(1)?.checked_mul(self.columns)?;
        Some((width, self.rows))
    }
}

/// Integer (column, row) grid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCoord {
    pub column: u32,
    pub row: u32,
}

/// Unclamped screen-space footprint of one particle, in grid cells.
///
/// This is the 2D bounding box of the 8 transformed corner points, so it
/// may over- or under-cover the true projected sphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub min_column: i64,
    pub max_column: i64,
    pub min_row: i64,
    pub max_row: i64,
}

impl Footprint {
    /// Computes the footprint, or `None` if any corner projects to a
    /// non-finite position.
    pub fn of(particle: &Particle, view_projection: &Mat4, layout: &BinLayout) -> Option<Self> {
        let center = particle.position;
        let r = particle.radius;
        let (i, j, k) = (Vec3::new(r, 0.0, 0.0), Vec3::new(0.0, r, 0.0), Vec3::new(0.0, 0.0, r));
        let corners = [
            center + i + j + k,
            center + i + j - k,
            center - i + j - k,
            center - i + j + k,
            center + i - j + k,
            center + i - j - k,
            center - i - j - k,
            center - i - j + k,
        ];

        let mut footprint = Self {
            min_column: i64::MAX,
            max_column: i64::MIN,
            min_row: i64::MAX,
            max_row: i64::MIN,
        };

        for corner in corners {
            let clip: Vec4 = *view_projection * corner.extend(1.0);
            let column = to_cell(clip.x / clip.w, layout.columns)?;
            let row = to_cell(clip.y / clip.w, layout.rows)?;
            footprint.min_column = footprint.min_column.min(column);
            footprint.max_column = footprint.max_column.max(column);
            footprint.min_row = footprint.min_row.min(row);
            footprint.max_row = footprint.max_row.max(row);
        }

        Some(footprint)
    }

    /// Intersects the footprint with the grid. `None` if nothing overlaps.
    pub fn clamped(&self, layout: &BinLayout) -> Option<([u32; 2], [u32; 2])> {
        let last_column = i64::from(layout.columns) - 1;
        let last_row = i64::from(layout.rows) - 1;
        let min_column = self.min_column.max(0);
        let max_column = self.max_column.min(last_column);
        let min_row = self.min_row.max(0);
        let max_row = self.max_row.min(last_row);
        if min_column > max_column || min_row > max_row {
            return None;
        }
        Some((
            [min_column as u32, max_column as u32],
            [min_row as u32, max_row as u32],
        ))
    }
}

/// Maps an NDC coordinate in `[-1, 1]` to a cell: `floor(0.5 * (1 + ndc) * size)`.
fn to_cell(ndc: f32, size: u32) -> Option<i64> {
    let cell = (0.5 * (1.0 + ndc) * size as f32).floor();
    // `as` saturates for huge finite values, so only NaN/inf need rejecting.
    cell.is_finite().then_some(cell as i64)
}

/// Per-frame counters from a binning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinStats {
    /// Particles seen this frame.
    pub particles: usize,
    /// Successful (particle, cell) insertions.
    pub insertions: usize,
    /// Insertions dropped because the bin was full.
    pub dropped: usize,
    /// Particles whose footprint missed the grid entirely.
    pub off_grid: usize,
    /// Particles excluded because they projected to non-finite coordinates.
    pub non_finite: usize,
}

/// Dense grid of fixed-capacity bins, rebuilt every frame.
#[derive(Debug, Clone)]
pub struct BinGrid {
    layout: BinLayout,
    /// `cell_count * capacity` slots; cell `c` owns `[c * capacity, (c + 1) * capacity)`.
    slots: Vec<ParticleRecord>,
    counts: Vec<u32>,
    /// Last particle (index + 1) that touched each cell this frame.
    visitors: Vec<usize>,
    stats: BinStats,
}

impl BinGrid {
    /// Creates an empty grid.
    pub fn new(layout: BinLayout) -> Self {
        let cells = layout.cell_count();
        Self {
            layout,
            slots: vec![ParticleRecord::TERMINATOR; cells * layout.capacity as usize],
            counts: vec![0; cells],
            visitors: vec![0; cells],
            stats: BinStats::default(),
        }
    }

    pub fn layout(&self) -> BinLayout {
        self.layout
    }

    pub fn stats(&self) -> BinStats {
        self.stats
    }

    /// Empties every bin.
    pub fn clear(&mut self) {
        self.counts.fill(0);
        self.visitors.fill(0);
        self.stats = BinStats::default();
    }

    /// Rebuilds the grid from scratch for this frame's particles.
    pub fn rebuild(&mut self, particles: &[Particle], view_projection: Mat4) {
        self.clear();
        self.stats.particles = particles.len();

        for (index, particle) in particles.iter().enumerate() {
            let Some(footprint) = Footprint::of(particle, &view_projection, &self.layout) else {
                self.stats.non_finite += 1;
                continue;
            };
            let Some(([min_column, max_column], [min_row, max_row])) =
                footprint.clamped(&self.layout)
            else {
                self.stats.off_grid += 1;
                continue;
            };

            let record = ParticleRecord::from(*particle);
            for column in min_column..=max_column {
                for row in min_row..=max_row {
                    self.insert(self.layout.cell_index(row, column), index + 1, record);
                }
            }
        }

        log::trace!("binned particles: {:?}", self.stats);
    }

    /// Inserts `record` into `cell` unless this particle is already there or
    /// the bin is full.
    fn insert(&mut self, cell: usize, visitor: usize, record: ParticleRecord) {
        if self.visitors[cell] == visitor {
            return;
        }
        self.visitors[cell] = visitor;

        let count = self.counts[cell];
        if count >= self.layout.capacity {
            self.stats.dropped += 1;
            return;
        }
        self.slots[cell * self.layout.capacity as usize + count as usize] = record;
        self.counts[cell] = count + 1;
        self.stats.insertions += 1;
    }

    /// Particles in the bin at (`row`, `column`), in insertion order.
    pub fn bin(&self, row: u32, column: u32) -> &[ParticleRecord] {
        let cell = self.layout.cell_index(row, column);
        let start = cell * self.layout.capacity as usize;
        &self.slots[start..start + self.counts[cell] as usize]
    }

    /// Number of particles in the bin at (`row`, `column`).
    pub fn bin_len(&self, row: u32, column: u32) -> usize {
        self.counts[self.layout.cell_index(row, column)] as usize
    }

    /// Iterates non-empty bins in row-major order.
    pub fn occupied(&self) -> impl Iterator<Item = (GridCoord, &[ParticleRecord])> + '_ {
        let columns = self.layout.columns;
        (0..self.layout.cell_count())
            .filter(|&cell| self.counts[cell] > 0)
            .map(move |cell| {
                let coord = GridCoord {
                    column: (cell % columns as usize) as u32,
                    row: (cell / columns as usize) as u32,
                };
                (coord, self.bin(coord.row, coord.column))
            })
    }
}

/// Bins `particles` into a fresh `columns × rows` grid of `capacity`-bounded bins.
pub fn bin(
    particles: &[Particle],
    columns: u32,
    rows: u32,
    capacity: u32,
    view_projection: Mat4,
) -> BinGrid {
    let mut grid = BinGrid::new(BinLayout::new(columns, rows, capacity));
    grid.rebuild(particles, view_projection);
    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(x: f32, y: f32, r: f32) -> Particle {
        Particle::new(Vec3::new(x, y, 0.0), r)
    }

    #[test]
    fn test_zero_radius_occupies_one_cell() {
        let grid = bin(&[p(0.1, 0.1, 0.0)], 4, 4, 2, Mat4::IDENTITY);
        let occupied: Vec<_> = grid.occupied().collect();
        assert_eq!(occupied.len(), 1);
        assert_eq!(occupied[0].0, GridCoord { column: 2, row: 2 });
    }

    #[test]
    fn test_overflow_keeps_first_encountered() {
        let particles: Vec<_> = (1..=5)
            .map(|i| p(0.1 + 0.01 * i as f32, 0.1, 0.0))
            .collect();
        let grid = bin(&particles, 4, 4, 3, Mat4::IDENTITY);

        let cell = grid.bin(2, 2);
        assert_eq!(cell.len(), 3);
        for (record, particle) in cell.iter().zip(&particles) {
            assert_eq!(*record, ParticleRecord::from(*particle));
        }
        assert_eq!(grid.stats().dropped, 2);
        assert_eq!(grid.occupied().count(), 1);
    }

    #[test]
    fn test_large_footprint_spans_cells_once() {
        // radius 0.6 around the origin covers NDC [-0.6, 0.6] -> cells 0..=3 of 4.
        let grid = bin(&[p(0.0, 0.0, 0.6)], 4, 4, 2, Mat4::IDENTITY);
        for row in 0..4 {
            for column in 0..4 {
                assert_eq!(grid.bin_len(row, column), 1, "cell ({row}, {column})");
            }
        }
        assert_eq!(grid.stats().insertions, 16);
    }

    #[test]
    fn test_partial_footprint_is_clamped() {
        // Straddles the right edge: columns 3 and 4 in a 4-wide grid.
        let grid = bin(&[p(0.95, 0.1, 0.1)], 4, 4, 2, Mat4::IDENTITY);
        assert_eq!(grid.bin_len(2, 3), 1);
        assert_eq!(grid.stats().insertions, 1);
    }

    #[test]
    fn test_off_grid_particle_contributes_nothing() {
        let grid = bin(&[p(3.0, 0.0, 0.5), p(0.0, -2.5, 0.1)], 4, 4, 2, Mat4::IDENTITY);
        assert_eq!(grid.occupied().count(), 0);
        assert_eq!(grid.stats().off_grid, 2);
    }

    #[test]
    fn test_ndc_one_is_outside() {
        let grid = bin(&[p(1.0, 1.0, 0.0)], 4, 4, 2, Mat4::IDENTITY);
        assert_eq!(grid.occupied().count(), 0);
    }

    #[test]
    fn test_non_finite_particles_are_excluded() {
        let grid = bin(
            &[p(0.0, 0.0, f32::NAN), p(0.0, 0.0, f32::INFINITY)],
            4,
            4,
            2,
            Mat4::IDENTITY,
        );
        assert_eq!(grid.occupied().count(), 0);
        assert_eq!(grid.stats().non_finite, 2);

        // w == 0 for every corner
        let grid = bin(&[p(0.1, 0.1, 0.1)], 4, 4, 2, Mat4::ZERO);
        assert_eq!(grid.stats().non_finite, 1);
    }

    #[test]
    fn test_perspective_center_particle_lands_in_center() {
        let proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let grid = bin(&[p(0.0, 0.0, 0.01)], 8, 8, 4, proj * view);
        let coords: Vec<_> = grid.occupied().map(|(c, _)| c).collect();
        assert!(!coords.is_empty());
        for c in coords {
            assert!((3..=4).contains(&c.column) && (3..=4).contains(&c.row));
        }
    }

    #[test]
    fn test_rebuild_discards_previous_frame() {
        let mut grid = BinGrid::new(BinLayout::new(4, 4, 2));
        grid.rebuild(&[p(-0.9, -0.9, 0.0)], Mat4::IDENTITY);
        assert_eq!(grid.bin_len(0, 0), 1);
        grid.rebuild(&[p(0.9, 0.9, 0.0)], Mat4::IDENTITY);
        assert_eq!(grid.bin_len(0, 0), 0);
        assert_eq!(grid.bin_len(3, 3), 1);
    }

    #[test]
    fn test_zero_capacity_drops_everything() {
        let grid = bin(&[p(0.0, 0.0, 0.0)], 4, 4, 0, Mat4::IDENTITY);
        assert_eq!(grid.occupied().count(), 0);
        assert_eq!(grid.stats().dropped, 1);
    }

    fn particle_strategy() -> impl Strategy<Value = Particle> {
        (-1.5f32..1.5, -1.5f32..1.5, -0.5f32..0.5, 0.0f32..0.4)
            .prop_map(|(x, y, z, r)| Particle::new(Vec3::new(x, y, z), r))
    }

    proptest! {
        #[test]
        fn prop_bins_never_exceed_capacity(
            particles in prop::collection::vec(particle_strategy(), 0..64),
            capacity in 0u32..6,
        ) {
            let grid = bin(&particles, 6, 5, capacity, Mat4::IDENTITY);
            for row in 0..5 {
                for column in 0..6 {
                    prop_assert!(grid.bin_len(row, column) <= capacity as usize);
                }
            }
        }

        #[test]
        fn prop_binning_is_deterministic(
            particles in prop::collection::vec(particle_strategy(), 0..64),
        ) {
            let a = bin(&particles, 6, 5, 3, Mat4::IDENTITY);
            let b = bin(&particles, 6, 5, 3, Mat4::IDENTITY);
            let a_cells: Vec<_> = a.occupied().collect();
            let b_cells: Vec<_> = b.occupied().collect();
            prop_assert_eq!(a_cells, b_cells);
            prop_assert_eq!(a.stats(), b.stats());
        }

        #[test]
        fn prop_particle_never_repeats_in_a_cell(
            particles in prop::collection::vec(particle_strategy(), 1..32),
        ) {
            // Distinct radii make every record distinguishable.
            let particles: Vec<_> = particles
                .iter()
                .enumerate()
                .map(|(i, q)| Particle::new(q.position, q.radius + i as f32 * 1e-3))
                .collect();
            let grid = bin(&particles, 6, 5, 64, Mat4::IDENTITY);
            for (_, records) in grid.occupied() {
                for (i, a) in records.iter().enumerate() {
                    for b in &records[i + 1..] {
                        prop_assert_ne!(a, b);
                    }
                }
            }
        }

        #[test]
        fn prop_far_offscreen_particles_insert_nothing(
            x in 1.5f32..10.0,
            y in -10.0f32..10.0,
            r in 0.0f32..0.4,
        ) {
            let grid = bin(&[Particle::new(Vec3::new(x, y, 0.0), r)], 6, 5, 3, Mat4::IDENTITY);
            prop_assert_eq!(grid.stats().insertions, 0);
            prop_assert_eq!(grid.stats().off_grid, 1);
        }
    }
}
