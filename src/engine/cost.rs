// -----------------------------------------------------------------------------
// Cost evaluation: synthetic vs real
// -----------------------------------------------------------------------------

use image::{GrayImage, Luma};
use imageproc::distance_transform::euclidean_squared_distance_transform;
use serde::{Deserialize, Serialize};

use crate::error::CostError;
use super::{CellMap, IntRect, Plane};

/// Which pixel-difference weighting the objective uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostMode {
    /// Plain absolute difference, with covered pixels weighted by `cell.importance`.
    Binary,
    /// Absolute difference weighted by a per-frame distance map.
    Distance,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostParams {
    pub mode: CostMode,
    /// Added once per pixel covered by two or more cells.
    pub overlap_cost: f64,
    pub cell_importance: f64,
}

/// Read-only per-frame inputs shared by every job in a window.
#[derive(Clone, Copy)]
pub(crate) struct CostInputs<'a> {
    pub(crate) real: &'a Plane,
    pub(crate) distance: Option<&'a Plane>,
}

impl<'a> CostInputs<'a> {
    pub(crate) fn check(&self, expected: usize) -> Result<(), CostError> {
        for actual in [Some(self.real.data.len()), self.distance.map(|d| d.data.len())].into_iter().flatten() {
            if actual != expected {
                return Err(CostError::ShapeMismatch { expected, actual });
            }
        }
        Ok(())
    }
}

#[inline]
fn pixel_cost(real: f32, synth: f32, count: u16, distance: Option<f32>, params: &CostParams) -> f64 {
    let diff = (real - synth).abs() as f64;
    let weight = match distance {
        Some(d) => d as f64,
        None if count > 0 => params.cell_importance,
        None => 1.0,
    };
    let overlap = if count > 1 { params.overlap_cost } else { 0.0 };
    diff * weight + overlap
}

/// Cost of a *region buffer* (stride `region.w`) against the real image.
pub(crate) fn region_cost_from_buffer(
    region_synth: &[f32],
    region_counts: &[u16],
    inputs: &CostInputs<'_>,
    region: &IntRect,
    params: &CostParams,
) -> f64 {
    let canvas_w = inputs.real.dims.width;
    let mut cost = 0.0;
    for ry in 0..region.h {
        let base_canvas = (region.y + ry) * canvas_w + region.x;
        let base_region = ry * region.w;
        for rx in 0..region.w {
            let c = base_canvas + rx;
            let r = base_region + rx;
            cost += pixel_cost(
                inputs.real.data[c],
                region_synth[r],
                region_counts[r],
                inputs.distance.map(|d| d.data[c]),
                params,
            );
        }
    }
    cost
}

/// Cost of `region` read directly from full-canvas buffers.
pub(crate) fn region_cost_from_canvas(
    canvas_synth: &[f32],
    canvas_counts: &[u16],
    inputs: &CostInputs<'_>,
    region: &IntRect,
    params: &CostParams,
) -> f64 {
    let canvas_w = inputs.real.dims.width;
    let mut cost = 0.0;
    for y in region.y..region.y + region.h {
        let base = y * canvas_w;
        for x in region.x..region.x + region.w {
            let i = base + x;
            cost += pixel_cost(
                inputs.real.data[i],
                canvas_synth[i],
                canvas_counts[i],
                inputs.distance.map(|d| d.data[i]),
                params,
            );
        }
    }
    cost
}

/// Full-frame cost, evaluated in one pass without any caching.
pub fn frame_cost(
    real: &Plane,
    synth: &Plane,
    cell_map: &CellMap,
    distance: Option<&Plane>,
    params: &CostParams,
) -> Result<f64, CostError> {
    let inputs = CostInputs { real, distance };
    let n = real.dims.pixel_count();
    inputs.check(n)?;
    for actual in [synth.data.len(), cell_map.counts.len()] {
        if actual != n {
            return Err(CostError::ShapeMismatch { expected: n, actual });
        }
    }
    Ok(region_cost_from_canvas(&synth.data, &cell_map.counts, &inputs, &real.dims.full_rect(), params))
}

// ---------- Distance map ----------

/// Euclidean distance from every background pixel (`real < 0.5`) to the
/// nearest foreground pixel; foreground pixels are 0.
pub fn euclidean_distance_to_foreground(real: &Plane) -> Plane {
    let (w, h) = (real.dims.width, real.dims.height);
    // An image without foreground has no finite distance; cap at the diagonal.
    let cap = ((w * w + h * h) as f64).sqrt();
    if real.data.iter().all(|&v| v < 0.5) {
        return Plane::filled(real.dims, cap as f32);
    }
    let mask = GrayImage::from_fn(w as u32, h as u32, |x, y| {
        Luma([if real.get(x as usize, y as usize) < 0.5 { 0 } else { 255 }])
    });
    let data = euclidean_squared_distance_transform(&mask)
        .into_raw()
        .into_iter()
        .map(|d| d.sqrt().min(cap) as f32)
        .collect();
    Plane { dims: real.dims, data }
}

/// Distance-weighting map: `edt / (divisor * pixels_per_micron) + 1`.
pub fn distance_weight_map(real: &Plane, distance_cost_divisor: f64, pixels_per_micron: f64) -> Plane {
    let mut map = euclidean_distance_to_foreground(real);
    let scale = (distance_cost_divisor * pixels_per_micron) as f32;
    for d in &mut map.data {
        *d = *d / scale + 1.0;
    }
    map
}
