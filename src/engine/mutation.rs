// -----------------------------------------------------------------------------
// Perturbation operators
// -----------------------------------------------------------------------------

use rand::prelude::*;
use rand_distr::Normal;

use crate::config::{DerivedConfig, GeometryBounds, Modification};
use crate::error::{ConfigError, GeometryError};
use super::canvas::FrameCanvas;
use super::{CellChange, CellDelta, CellModel, Frame};

// ---------- Move Enum -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveKind {
    Pose,
    Split,
    Merge,
}

impl MoveKind {
    pub const COUNT: usize = 3;
    pub const ALL: [MoveKind; Self::COUNT] = [MoveKind::Pose, MoveKind::Split, MoveKind::Merge];

    pub fn index(self) -> usize {
        match self {
            MoveKind::Pose => 0,
            MoveKind::Split => 1,
            MoveKind::Merge => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MoveKind::Pose => "pose",
            MoveKind::Split => "split",
            MoveKind::Merge => "merge",
        }
    }
}

// ---------- Proposal Type -------------
/// A candidate change to one frame of the window, not yet scored.
#[derive(Clone, Debug)]
pub(crate) struct Proposal {
    /// Index into the job's live frames.
    pub(crate) frame: usize,
    pub(crate) change: CellChange,
    /// The move actually generated; a structural request can fall back to a pose move.
    pub(crate) kind: MoveKind,
}

fn normal(m: Modification, what: &str) -> Result<Normal<f64>, ConfigError> {
    Normal::new(m.mu, m.sigma).map_err(|e| ConfigError::Invalid(format!("{} perturbation: {}", what, e)))
}

fn check_bounds(cell: &CellModel, b: &GeometryBounds) -> Result<(), GeometryError> {
    if cell.width < b.min_width || cell.width > b.max_width {
        return Err(GeometryError::invalid(&cell.name, format!("width {:.3} outside bounds", cell.width)));
    }
    if cell.length < b.min_length || cell.length > b.max_length {
        return Err(GeometryError::invalid(&cell.name, format!("length {:.3} outside bounds", cell.length)));
    }
    Ok(())
}

/// Draws randomized changes for the annealing loop. Proposals never touch
/// the working frames; the caller scores and applies them.
pub(crate) struct PerturbationEngine {
    x: Normal<f64>,
    y: Normal<f64>,
    width: Normal<f64>,
    length: Normal<f64>,
    rotation: Normal<f64>,
    split_alpha: Normal<f64>,
    bounds: GeometryBounds,
    min_split_length: f64,
}

impl PerturbationEngine {
    pub(crate) fn new(cfg: &DerivedConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            x: normal(cfg.x, "x")?,
            y: normal(cfg.y, "y")?,
            width: normal(cfg.width, "width")?,
            length: normal(cfg.length, "length")?,
            rotation: normal(cfg.rotation, "rotation")?,
            split_alpha: normal(cfg.split_alpha, "split alpha")?,
            bounds: cfg.bounds,
            min_split_length: cfg.min_split_length,
        })
    }

    /// Propose a `requested` move over the live frames. Structural moves are
    /// only generated in the newest frame and only when `structural` is set;
    /// otherwise a pose move on a uniformly chosen active cell is substituted.
    ///
    /// Returns `Ok(None)` when the window has no active cell.
    pub(crate) fn propose<R: Rng>(
        &self,
        rng: &mut R,
        canvases: &[FrameCanvas],
        structural: bool,
        requested: MoveKind,
    ) -> Result<Option<Proposal>, GeometryError> {
        let Some(newest) = canvases.len().checked_sub(1) else {
            return Ok(None);
        };
        match requested {
            MoveKind::Split if structural => {
                let frame = canvases[newest].frame();
                if let Some(index) = pick_active(rng, frame) {
                    let cell = &frame.nodes()[index].cell;
                    if cell.length > self.min_split_length && cell.split_alpha.is_none() {
                        let alpha = self.split_alpha.sample(rng);
                        let children = cell.split(alpha)?;
                        if frame.find(&children.0.name).is_some() || frame.find(&children.1.name).is_some() {
                            return Err(GeometryError::invalid(&cell.name, "child name already taken in this frame"));
                        }
                        check_bounds(&children.0, &self.bounds)?;
                        check_bounds(&children.1, &self.bounds)?;
                        let change = CellChange::Split { index, children };
                        return Ok(Some(Proposal { frame: newest, change, kind: MoveKind::Split }));
                    }
                    return self.pose(rng, canvases, newest, index).map(Some);
                }
            }
            MoveKind::Merge if structural => {
                let frame = canvases[newest].frame();
                let pairs = sibling_pairs(frame);
                if !pairs.is_empty() {
                    let (first, second) = pairs[rng.gen_range(0..pairs.len())];
                    let a = &frame.nodes()[first].cell;
                    let b = &frame.nodes()[second].cell;
                    let stem = &a.name[..a.name.len() - 1];
                    if frame.find(stem).is_some() {
                        return Err(GeometryError::invalid(&a.name, "merged name already taken in this frame"));
                    }
                    let merged = a.combine(b, stem)?;
                    check_bounds(&merged, &self.bounds)?;
                    let change = CellChange::Merge { first, second, merged };
                    return Ok(Some(Proposal { frame: newest, change, kind: MoveKind::Merge }));
                }
            }
            _ => {}
        }

        let total: usize = canvases.iter().map(|c| c.frame().active_count()).sum();
        if total == 0 {
            return Ok(None);
        }
        let mut k = rng.gen_range(0..total);
        for (f, canvas) in canvases.iter().enumerate() {
            let active = canvas.frame().active_count();
            if k >= active {
                k -= active;
                continue;
            }
            let index = nth_active(canvas.frame(), k);
            return self.pose(rng, canvases, f, index).map(Some);
        }
        Ok(None)
    }

    fn pose<R: Rng>(&self, rng: &mut R, canvases: &[FrameCanvas], frame: usize, index: usize) -> Result<Proposal, GeometryError> {
        let canvas = &canvases[frame];
        let delta = CellDelta {
            x: self.x.sample(rng),
            y: self.y.sample(rng),
            width: self.width.sample(rng),
            length: self.length.sample(rng),
            rotation: self.rotation.sample(rng),
        };
        let mut cell = canvas.frame().nodes()[index].cell.with_delta(&delta)?;
        check_bounds(&cell, &self.bounds)?;
        if cell.is_off_canvas(canvas.dims()) {
            cell.dormant = true;
        }
        Ok(Proposal { frame, change: CellChange::Replace { index, cell }, kind: MoveKind::Pose })
    }
}

fn nth_active(frame: &Frame, k: usize) -> usize {
    frame
        .nodes()
        .iter()
        .enumerate()
        .filter(|(_, n)| !n.cell.dormant)
        .nth(k)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn pick_active<R: Rng>(rng: &mut R, frame: &Frame) -> Option<usize> {
    let active = frame.active_count();
    (active > 0).then(|| nth_active(frame, rng.gen_range(0..active)))
}

/// `(p0, p1)` node pairs that divided in this frame from the same parent.
fn sibling_pairs(frame: &Frame) -> Vec<(usize, usize)> {
    let nodes = frame.nodes();
    let mut out = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        let cell = &node.cell;
        if cell.dormant || cell.split_alpha.is_none() {
            continue;
        }
        let Some(stem) = cell.name.strip_suffix('0') else { continue };
        let Some(j) = frame.find(&format!("{}1", stem)) else { continue };
        let sibling = &nodes[j];
        if !sibling.cell.dormant && sibling.cell.split_alpha.is_some() && sibling.parent == node.parent {
            out.push((i, j));
        }
    }
    out
}
