// -----------------------------------------------------------------------------
// Tile grid (cost cache partition)
// -----------------------------------------------------------------------------

use rayon::prelude::*;

use super::cost::{region_cost_from_canvas, CostInputs, CostParams};
use super::IntRect;

/// Per-tile cost cache. The authoritative frame cost is the sum over tiles,
/// recomputed exactly for every tile an accepted change touches.
#[derive(Clone, Debug)]
pub(crate) struct TileGrid {
    pub(crate) tile_size: usize,
    pub(crate) tiles_x: usize,
    pub(crate) tiles_y: usize,
    pub(crate) cost_per_tile: Vec<f64>,
}

impl TileGrid {
    pub(crate) fn new(canvas_w: usize, canvas_h: usize, tile_size: usize) -> Self {
        let tiles_x = canvas_w.div_ceil(tile_size);
        let tiles_y = canvas_h.div_ceil(tile_size);
        Self {
            tile_size,
            tiles_x,
            tiles_y,
            cost_per_tile: vec![0.0; tiles_x * tiles_y],
        }
    }

    #[inline]
    pub(crate) fn tile_index(&self, tx: usize, ty: usize) -> usize {
        debug_assert!(
            tx < self.tiles_x && ty < self.tiles_y,
            "tile_index oob: tx={}, ty={}, tiles_x={}, tiles_y={}",
            tx, ty, self.tiles_x, self.tiles_y
        );
        ty * self.tiles_x + tx
    }

    /// Sum over tiles in a fixed order, so equal caches give bit-equal totals.
    pub(crate) fn total(&self) -> f64 {
        self.cost_per_tile.iter().sum()
    }

    fn tile_rect(&self, tx: usize, ty: usize, canvas_w: usize, canvas_h: usize) -> IntRect {
        let x = tx * self.tile_size;
        let y = ty * self.tile_size;
        IntRect {
            x,
            y,
            w: (x + self.tile_size).min(canvas_w) - x,
            h: (y + self.tile_size).min(canvas_h) - y,
        }
    }

    pub(crate) fn tiles_overlapping_rect(&self, rect: &IntRect) -> Vec<(usize, usize)> {
        if rect.is_empty() || self.tiles_x == 0 || self.tiles_y == 0 {
            return Vec::new();
        }
        let tx0 = rect.x / self.tile_size;
        let ty0 = rect.y / self.tile_size;
        let tx1 = ((rect.x + rect.w - 1) / self.tile_size).min(self.tiles_x - 1);
        let ty1 = ((rect.y + rect.h - 1) / self.tile_size).min(self.tiles_y - 1);
        let mut out = Vec::with_capacity((tx1 + 1 - tx0) * (ty1 + 1 - ty0));
        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                out.push((tx, ty));
            }
        }
        out
    }

    pub(crate) fn all_tiles(&self) -> Vec<(usize, usize)> {
        (0..self.tiles_y)
            .flat_map(|ty| (0..self.tiles_x).map(move |tx| (tx, ty)))
            .collect()
    }

    /// After accepting a candidate, recompute the cost of each listed tile from
    /// the canvas. Tiles are scored in parallel and committed afterwards.
    pub(crate) fn recompute_tiles_from_canvas(
        &mut self,
        tiles: &[(usize, usize)],
        canvas_synth: &[f32],
        canvas_counts: &[u16],
        inputs: &CostInputs<'_>,
        params: &CostParams,
    ) {
        let canvas_w = inputs.real.dims.width;
        let canvas_h = inputs.real.dims.height;
        let this = &*self;
        let updates: Vec<(usize, f64)> = tiles
            .par_iter()
            .filter_map(|&(tx, ty)| {
                if tx >= this.tiles_x || ty >= this.tiles_y {
                    debug_assert!(false, "recompute_tiles_from_canvas: oob tile ({tx}, {ty})");
                    return None;
                }
                let rect = this.tile_rect(tx, ty, canvas_w, canvas_h);
                let cost = region_cost_from_canvas(canvas_synth, canvas_counts, inputs, &rect, params);
                Some((this.tile_index(tx, ty), cost))
            })
            .collect();

        for (tile_idx, cost) in updates {
            self.cost_per_tile[tile_idx] = cost;
        }
    }
}

#[inline]
pub(crate) fn choose_tile_size(w: usize, h: usize) -> usize {
    let px = w.saturating_mul(h);
    if px >= 2560 * 1440 { 96 }
    else if px >= 1920 * 1080 { 64 }
    else { 32 }
}
