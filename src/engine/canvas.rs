// -----------------------------------------------------------------------------
// Per-frame working canvas: synthetic render + tile cost cache
// -----------------------------------------------------------------------------

use std::sync::Arc;

use crate::config::DerivedConfig;
use crate::error::CostError;
use super::cost::{distance_weight_map, region_cost_from_buffer, region_cost_from_canvas, CostInputs, CostMode, CostParams};
use super::raster::{blit_region, compose_region, render_synthetic};
use super::{choose_tile_size, pad_and_clamp_rect, union_rect};
use super::{CellChange, CellModel, FrameDimensions, Frame, IntRect, Plane, TileGrid};

/// Read-only inputs of one frame, shared by every job of a window.
#[derive(Clone, Debug)]
pub struct FrameImage {
    pub real: Plane,
    /// Present in distance cost mode.
    pub distance: Option<Plane>,
}

impl FrameImage {
    pub fn prepare(real: Plane, cfg: &DerivedConfig) -> Self {
        let distance = match cfg.cost.mode {
            CostMode::Distance => Some(distance_weight_map(&real, cfg.distance_cost_divisor, cfg.pixels_per_micron)),
            CostMode::Binary => None,
        };
        Self { real, distance }
    }

    pub fn dims(&self) -> FrameDimensions {
        self.real.dims
    }

    pub(crate) fn inputs(&self) -> CostInputs<'_> {
        CostInputs { real: &self.real, distance: self.distance.as_ref() }
    }
}

/// Scored candidate change, not yet applied.
pub(crate) struct Evaluation {
    pub(crate) change: CellChange,
    region: IntRect,
    synth: Vec<f32>,
    counts: Vec<u16>,
    pub(crate) delta: f64,
}

/// A job's exclusively owned working state for one live frame.
pub(crate) struct FrameCanvas {
    frame: Frame,
    image: Arc<FrameImage>,
    synth: Vec<f32>,
    counts: Vec<u16>,
    tiles: TileGrid,
    params: CostParams,
}

impl FrameCanvas {
    pub(crate) fn new(frame: Frame, image: Arc<FrameImage>, params: CostParams) -> Result<Self, CostError> {
        let dims = image.dims();
        image.inputs().check(dims.pixel_count())?;
        let (synth, map) = render_synthetic(frame.cells(), dims, &frame.sim);
        let mut tiles = TileGrid::new(dims.width, dims.height, choose_tile_size(dims.width, dims.height));
        let all = tiles.all_tiles();
        tiles.recompute_tiles_from_canvas(&all, &synth.data, &map.counts, &image.inputs(), &params);
        if !tiles.total().is_finite() {
            return Err(CostError::NonFinite { frame: frame.number });
        }
        Ok(Self { frame, image, synth: synth.data, counts: map.counts, tiles, params })
    }

    pub(crate) fn frame(&self) -> &Frame {
        &self.frame
    }

    pub(crate) fn into_frame(self) -> Frame {
        self.frame
    }

    pub(crate) fn dims(&self) -> FrameDimensions {
        self.image.dims()
    }

    pub(crate) fn total(&self) -> f64 {
        self.tiles.total()
    }

    /// Score `change` by re-rendering only the pixels it can affect: the union
    /// of the old and new footprints, padded by one pixel. Every cell reaching
    /// into that region is redrawn, so overlapping neighbours stay exact.
    pub(crate) fn evaluate(&self, change: CellChange) -> Result<Evaluation, CostError> {
        let dims = self.dims();
        let touched = change.touched();
        let nodes = self.frame.nodes();

        let mut changed = IntRect::empty();
        for &i in &touched {
            changed = union_rect(&changed, &nodes[i].cell.pixel_rect(dims));
        }
        for cell in change.new_cells() {
            changed = union_rect(&changed, &cell.pixel_rect(dims));
        }
        let region = pad_and_clamp_rect(changed, 1, dims);
        if region.is_empty() {
            return Ok(Evaluation { change, region, synth: Vec::new(), counts: Vec::new(), delta: 0.0 });
        }

        let mut synth = vec![0.0f32; region.area()];
        let mut counts = vec![0u16; region.area()];
        let delta = {
            let mut cells: Vec<&CellModel> = nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| !touched.contains(i))
                .map(|(_, n)| &n.cell)
                .chain(change.new_cells())
                .filter(|c| !c.dormant && c.pixel_rect(dims).intersects(&region))
                .collect();
            cells.sort_by(|a, b| a.name.cmp(&b.name));
            compose_region(&mut synth, &mut counts, &region, dims, cells, &self.frame.sim);

            let inputs = self.image.inputs();
            let candidate = region_cost_from_buffer(&synth, &counts, &inputs, &region, &self.params);
            let current = region_cost_from_canvas(&self.synth, &self.counts, &inputs, &region, &self.params);
            candidate - current
        };
        if !delta.is_finite() {
            return Err(CostError::NonFinite { frame: self.frame.number });
        }
        Ok(Evaluation { change, region, synth, counts, delta })
    }

    /// Commit an evaluated change: blit the region, rescore the tiles it
    /// touches and update the node set.
    pub(crate) fn apply(&mut self, eval: Evaluation) {
        if !eval.region.is_empty() {
            let canvas_w = self.dims().width;
            blit_region(&mut self.synth, &mut self.counts, canvas_w, &eval.region, &eval.synth, &eval.counts);
            let touched = self.tiles.tiles_overlapping_rect(&eval.region);
            let inputs = CostInputs { real: &self.image.real, distance: self.image.distance.as_ref() };
            self.tiles.recompute_tiles_from_canvas(&touched, &self.synth, &self.counts, &inputs, &self.params);
        }
        self.frame.apply(eval.change);
    }
}
