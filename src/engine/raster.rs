// -----------------------------------------------------------------------------
// Rasterization & compositing
// -----------------------------------------------------------------------------
use crate::config::SimulationConfig;
use super::{CellModel, FrameDimensions, IntRect, Plane};

/// Per-pixel cell coverage of a rendered frame, row-major.
///
/// `counts` is what the cost needs (coverage and overlap). `owners` holds the
/// topmost active cell of each pixel as an index into the cells in name
/// order, which is the frame's node order.
#[derive(Clone, Debug, PartialEq)]
pub struct CellMap {
    pub dims: FrameDimensions,
    pub counts: Vec<u16>,
    pub owners: Vec<Option<u32>>,
}

impl CellMap {
    /// Coverage counts only, without ownership.
    pub fn from_counts(dims: FrameDimensions, counts: Vec<u16>) -> Self {
        let owners = vec![None; counts.len()];
        Self { dims, counts, owners }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u16 {
        self.counts[y * self.dims.width + x]
    }

    #[inline]
    pub fn owner(&self, x: usize, y: usize) -> Option<usize> {
        self.owners[y * self.dims.width + x].map(|i| i as usize)
    }

    pub fn overlap_area(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 1).count()
    }
}

#[inline]
fn blend_over(dst: f32, color: f32, opacity: f32) -> f32 {
    dst * (1.0 - opacity) + color * opacity
}

/// Fill a region buffer with the background and clear its coverage counts.
pub(crate) fn clear_region(out_synth: &mut [f32], out_counts: &mut [u16], region: &IntRect, background: f32) {
    let n = region.area();
    out_synth[..n].fill(background);
    out_counts[..n].fill(0);
}

/// Composite one cell into a *region buffer*, clipped to `region`.
pub(crate) fn composite_cell_clipped_region(
    out_synth: &mut [f32],
    out_counts: &mut [u16],
    region: &IntRect,
    dims: FrameDimensions,
    cell: &CellModel,
    cell_color: f32,
) {
    if cell.dormant || region.is_empty() {
        return;
    }
    let fp = cell.footprint(dims);
    if !fp.rect.intersects(region) {
        return;
    }
    let opacity = cell.opacity as f32;
    let x0 = fp.rect.x.max(region.x);
    let y0 = fp.rect.y.max(region.y);
    let x1 = (fp.rect.x + fp.rect.w).min(region.x + region.w);
    let y1 = (fp.rect.y + fp.rect.h).min(region.y + region.h);
    for y in y0..y1 {
        let mask_row = (y - fp.rect.y) * fp.rect.w;
        let out_row = (y - region.y) * region.w;
        for x in x0..x1 {
            if !fp.mask[mask_row + (x - fp.rect.x)] {
                continue;
            }
            let i = out_row + (x - region.x);
            out_synth[i] = blend_over(out_synth[i], cell_color, opacity);
            out_counts[i] = out_counts[i].saturating_add(1);
        }
    }
}

/// Draw `cells` into a region buffer in the order given. Callers pass cells
/// sorted by name so overlapping opacity composes reproducibly.
pub(crate) fn compose_region<'a, I>(
    out_synth: &mut [f32],
    out_counts: &mut [u16],
    region: &IntRect,
    dims: FrameDimensions,
    cells: I,
    sim: &SimulationConfig,
) where
    I: IntoIterator<Item = &'a CellModel>,
{
    clear_region(out_synth, out_counts, region, sim.background_color);
    for cell in cells {
        composite_cell_clipped_region(out_synth, out_counts, region, dims, cell, sim.cell_color);
    }
}

/// Copy a region buffer back into full-canvas buffers.
pub(crate) fn blit_region(
    canvas_synth: &mut [f32],
    canvas_counts: &mut [u16],
    canvas_w: usize,
    region: &IntRect,
    region_synth: &[f32],
    region_counts: &[u16],
) {
    for ry in 0..region.h {
        let dst = (region.y + ry) * canvas_w + region.x;
        let src = ry * region.w;
        canvas_synth[dst..dst + region.w].copy_from_slice(&region_synth[src..src + region.w]);
        canvas_counts[dst..dst + region.w].copy_from_slice(&region_counts[src..src + region.w]);
    }
}

/// Render the synthetic image of a whole frame. Cells are drawn in ascending
/// name order whatever order they are passed in.
pub fn render_synthetic<'a, I>(cells: I, dims: FrameDimensions, sim: &SimulationConfig) -> (Plane, CellMap)
where
    I: IntoIterator<Item = &'a CellModel>,
{
    let mut ordered: Vec<&CellModel> = cells.into_iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));
    let full = dims.full_rect();
    let mut synth = vec![0.0f32; full.area()];
    let mut counts = vec![0u16; full.area()];
    compose_region(&mut synth, &mut counts, &full, dims, ordered.iter().copied(), sim);

    let mut owners = vec![None; full.area()];
    for (i, cell) in ordered.iter().enumerate().filter(|(_, c)| !c.dormant) {
        let fp = cell.footprint(dims);
        for y in 0..fp.rect.h {
            for x in 0..fp.rect.w {
                if fp.mask[y * fp.rect.w + x] {
                    owners[(fp.rect.y + y) * dims.width + fp.rect.x + x] = Some(i as u32);
                }
            }
        }
    }
    (Plane { dims, data: synth }, CellMap { dims, counts, owners })
}
