//! Flattening of a [`BinGrid`] into the fixed-stride bin texture layout.
//!
//! Layout, row-major over (row, column): each cell occupies
//! `capacity + 1` records of 4 floats. A cell's particles come first in
//! insertion order, followed by one all-zero terminator record; the rest of
//! the cell is zero. Readers stop at the first zero record.

use crate::binning::{BinGrid, BinLayout};
use crate::error::{Result, SurfvoxError};
use crate::particles::ParticleRecord;

/// Writes `grid` into `out`, which must hold exactly `layout.float_len()` floats.
pub fn serialize_into(grid: &BinGrid, out: &mut [f32]) -> Result<()> {
    let layout = grid.layout();
    if out.len() != layout.float_len() {
        return Err(SurfvoxError::SizeMismatch {
            expected: layout.float_len(),
            actual: out.len(),
        });
    }
    write_cells(grid, out);
    Ok(())
}

/// Serializes `grid` into a freshly allocated buffer of
/// `rows * columns * (capacity + 1) * 4` floats.
pub fn serialize(grid: &BinGrid) -> Vec<f32> {
    let mut out = vec![0.0; grid.layout().float_len()];
    write_cells(grid, &mut out);
    out
}

/// `out` is exactly `grid.layout().float_len()` floats long.
fn write_cells(grid: &BinGrid, out: &mut [f32]) {
    let layout = grid.layout();
    let cell_floats = layout.cell_stride() * ParticleRecord::FLOATS;
    for row in 0..layout.rows {
        for column in 0..layout.columns {
            let base = layout.cell_index(row, column) * cell_floats;
            let cell = &mut out[base..base + cell_floats];
            let records = grid.bin(row, column);
            debug_assert!(records.len() < layout.cell_stride());

            for (slot, record) in cell
                .chunks_exact_mut(ParticleRecord::FLOATS)
                .zip(records)
            {
                slot.copy_from_slice(&record.to_array());
            }
            // Terminator plus zero padding.
            cell[records.len() * ParticleRecord::FLOATS..].fill(0.0);
        }
    }
}

/// Owned serialized bin data, ready for upload as an `Rgba32Float` texture.
#[derive(Debug, Clone)]
pub struct BinBuffer {
    layout: BinLayout,
    data: Vec<f32>,
}

impl BinBuffer {
    /// Creates an all-terminator buffer for `layout`.
    pub fn new(layout: BinLayout) -> Self {
        Self {
            layout,
            data: vec![0.0; layout.float_len()],
        }
    }

    pub fn layout(&self) -> BinLayout {
        self.layout
    }

    /// Re-serializes from this frame's grid.
    pub fn update(&mut self, grid: &BinGrid) -> Result<()> {
        if grid.layout() != self.layout {
            return Err(SurfvoxError::SizeMismatch {
                expected: self.layout.float_len(),
                actual: grid.layout().float_len(),
            });
        }
        write_cells(grid, &mut self.data);
        Ok(())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Texture dimensions in texels, `None` if the width overflows a `u32`.
    pub fn texture_size(&self) -> Option<(u32, u32)> {
        self.layout.texture_size()
    }

    /// Reads one cell the way the raycaster does: records up to the first
    /// all-zero one.
    pub fn cell(&self, row: u32, column: u32) -> impl Iterator<Item = ParticleRecord> + '_ {
        let cell_floats = self.layout.cell_stride() * ParticleRecord::FLOATS;
        let base = self.layout.cell_index(row, column) * cell_floats;
        self.data[base..base + cell_floats]
            .chunks_exact(ParticleRecord::FLOATS)
            .map(ParticleRecord::from_slice)
            .take_while(|record| !record.is_terminator())
    }

    /// The raw record at `slot` within a cell, terminator slots included.
    pub fn slot(&self, row: u32, column: u32, slot: usize) -> ParticleRecord {
        debug_assert!(slot < self.layout.cell_stride());
        let base = (self.layout.cell_index(row, column) * self.layout.cell_stride() + slot)
            * ParticleRecord::FLOATS;
        ParticleRecord::from_slice(&self.data[base..base + ParticleRecord::FLOATS])
    }
}
