// -----------------------------------------------------------------------------
// Lineage: arena of frames with index-based parent links
// -----------------------------------------------------------------------------

use std::ops::Range;

use crate::config::SimulationConfig;
use crate::error::LineageError;
use super::CellModel;

/// One cell instance in a frame. `parent` indexes the previous frame's nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct CellNode {
    pub cell: CellModel,
    pub parent: Option<usize>,
}

/// Edit to a frame's node set produced by one accepted perturbation.
#[derive(Clone, Debug)]
pub(crate) enum CellChange {
    Replace { index: usize, cell: CellModel },
    Split { index: usize, children: (CellModel, CellModel) },
    Merge { first: usize, second: usize, merged: CellModel },
}

impl CellChange {
    /// Node indices whose current cells the change removes or rewrites.
    pub(crate) fn touched(&self) -> Vec<usize> {
        match self {
            CellChange::Replace { index, .. } | CellChange::Split { index, .. } => vec![*index],
            CellChange::Merge { first, second, .. } => vec![*first, *second],
        }
    }

    pub(crate) fn new_cells(&self) -> Vec<&CellModel> {
        match self {
            CellChange::Replace { cell, .. } => vec![cell],
            CellChange::Split { children, .. } => vec![&children.0, &children.1],
            CellChange::Merge { merged, .. } => vec![merged],
        }
    }
}

/// The node set of one time point. Nodes are kept sorted by cell name so
/// iteration order is also the compositing order.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Absolute frame number.
    pub number: usize,
    pub file_name: String,
    pub sim: SimulationConfig,
    nodes: Vec<CellNode>,
    committed: bool,
}

impl Frame {
    pub(crate) fn new(
        number: usize,
        file_name: impl Into<String>,
        sim: SimulationConfig,
        mut nodes: Vec<CellNode>,
    ) -> Result<Self, LineageError> {
        nodes.sort_by(|a, b| a.cell.name.cmp(&b.cell.name));
        if let Some(pair) = nodes.windows(2).find(|p| p[0].cell.name == p[1].cell.name) {
            return Err(LineageError::DuplicateCell { frame: number, cell: pair[0].cell.name.clone() });
        }
        Ok(Self { number, file_name: file_name.into(), sim, nodes, committed: false })
    }

    pub fn nodes(&self) -> &[CellNode] {
        &self.nodes
    }

    pub fn cells(&self) -> impl Iterator<Item = &CellModel> {
        self.nodes.iter().map(|n| &n.cell)
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn active_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.cell.dormant).count()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.nodes.binary_search_by(|n| n.cell.name.as_str().cmp(name)).ok()
    }

    /// Deep copy as the next frame: every node points at its source index,
    /// and the per-division marker is cleared.
    pub(crate) fn successor(&self) -> Frame {
        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let mut cell = n.cell.clone();
                cell.split_alpha = None;
                CellNode { cell, parent: Some(i) }
            })
            .collect();
        Frame {
            number: self.number + 1,
            file_name: String::new(),
            sim: self.sim.clone(),
            nodes,
            committed: false,
        }
    }

    /// Recompute parent indices against `prev` by name: the same name for a
    /// persisting cell, or the name without its last digit for a division child.
    pub(crate) fn relink_to(&mut self, prev: &Frame) -> Result<(), LineageError> {
        for node in &mut self.nodes {
            let name = node.cell.name.as_str();
            let parent = prev.find(name).or_else(|| {
                name.strip_suffix('0')
                    .or_else(|| name.strip_suffix('1'))
                    .and_then(|stem| prev.find(stem))
            });
            match parent {
                Some(p) => node.parent = Some(p),
                None => {
                    return Err(LineageError::MissingParent { frame: self.number, cell: node.cell.name.clone() })
                }
            }
        }
        Ok(())
    }

    pub(crate) fn apply(&mut self, change: CellChange) {
        match change {
            CellChange::Replace { index, cell } => {
                // pose changes keep the name, so ordering is preserved
                self.nodes[index].cell = cell;
            }
            CellChange::Split { index, children } => {
                let parent = self.nodes.remove(index).parent;
                self.nodes.push(CellNode { cell: children.0, parent });
                self.nodes.push(CellNode { cell: children.1, parent });
                self.nodes.sort_by(|a, b| a.cell.name.cmp(&b.cell.name));
            }
            CellChange::Merge { first, second, merged } => {
                let parent = self.nodes[first].parent;
                let (hi, lo) = if first > second { (first, second) } else { (second, first) };
                self.nodes.remove(hi);
                self.nodes.remove(lo);
                self.nodes.push(CellNode { cell: merged, parent });
                self.nodes.sort_by(|a, b| a.cell.name.cmp(&b.cell.name));
            }
        }
        debug_assert!(
            self.nodes.windows(2).all(|p| p[0].cell.name != p[1].cell.name),
            "duplicate cell name in frame {}",
            self.number
        );
    }

    fn check_parents(&self, prev: Option<&Frame>) -> Result<(), LineageError> {
        for node in &self.nodes {
            let ok = match (prev, node.parent) {
                (None, None) => true,
                (Some(p), Some(i)) => i < p.nodes.len(),
                _ => false,
            };
            if !ok {
                return Err(LineageError::MissingParent { frame: self.number, cell: node.cell.name.clone() });
            }
        }
        Ok(())
    }
}

/// Frames stored contiguously from the first processed frame. Positions used by
/// the API are relative to that frame; committed frames always form a prefix.
#[derive(Clone, Debug, Default)]
pub struct Lineage {
    frames: Vec<Frame>,
}

impl Lineage {
    /// Start a lineage with the initial cells as frame `number`.
    pub fn seed(
        number: usize,
        file_name: impl Into<String>,
        sim: SimulationConfig,
        cells: Vec<CellModel>,
    ) -> Result<Self, LineageError> {
        let nodes = cells.into_iter().map(|cell| CellNode { cell, parent: None }).collect();
        let frame = Frame::new(number, file_name, sim, nodes)?;
        Ok(Self { frames: vec![frame] })
    }

    /// Rebuild an already committed prefix, e.g. from a previous run's log.
    /// Parents are relinked by name between consecutive frames.
    pub fn restore(first_number: usize, sim: SimulationConfig, frames: Vec<(String, Vec<CellModel>)>) -> Result<Self, LineageError> {
        let mut out: Vec<Frame> = Vec::with_capacity(frames.len());
        for (offset, (file_name, cells)) in frames.into_iter().enumerate() {
            let nodes = cells.into_iter().map(|cell| CellNode { cell, parent: None }).collect();
            let mut frame = Frame::new(first_number + offset, file_name, sim.clone(), nodes)?;
            if let Some(prev) = out.last() {
                frame.relink_to(prev)?;
            }
            frame.committed = true;
            out.push(frame);
        }
        Ok(Self { frames: out })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn first_number(&self) -> Option<usize> {
        self.frames.first().map(|f| f.number)
    }

    pub fn frame(&self, pos: usize) -> Result<&Frame, LineageError> {
        self.frames.get(pos).ok_or(LineageError::UnknownFrame(pos))
    }

    pub fn nodes(&self, pos: usize) -> Result<&[CellNode], LineageError> {
        self.frame(pos).map(Frame::nodes)
    }

    pub fn is_committed(&self, pos: usize) -> bool {
        self.frames.get(pos).is_some_and(|f| f.committed)
    }

    /// Number of committed frames (they form a prefix).
    pub fn committed_len(&self) -> usize {
        self.frames.iter().take_while(|f| f.committed).count()
    }

    pub fn last_committed(&self) -> Option<&Frame> {
        self.committed_len().checked_sub(1).map(|p| &self.frames[p])
    }

    /// Copy the last frame into a new frame and return its position.
    pub fn forward_copy(&mut self, from: usize) -> Result<usize, LineageError> {
        let last = self.frames.len().checked_sub(1).ok_or(LineageError::UnknownFrame(from))?;
        if from != last {
            return Err(LineageError::FrameOrder { last, requested: from });
        }
        let next = self.frames[from].successor();
        self.frames.push(next);
        Ok(from + 1)
    }

    pub fn set_file_name(&mut self, pos: usize, file_name: impl Into<String>) -> Result<(), LineageError> {
        let frame = self.live_frame_mut(pos)?;
        frame.file_name = file_name.into();
        Ok(())
    }

    /// Freeze a frame. Frames must be committed in order.
    pub fn commit(&mut self, pos: usize) -> Result<(), LineageError> {
        let expected = self.committed_len();
        let frame = self.frames.get_mut(pos).ok_or(LineageError::UnknownFrame(pos))?;
        if frame.committed {
            return Err(LineageError::AlreadyCommitted(pos));
        }
        if pos != expected {
            return Err(LineageError::FrameOrder { last: expected, requested: pos });
        }
        frame.committed = true;
        Ok(())
    }

    /// Clone the frames in `range` for a job to work on.
    pub(crate) fn snapshot(&self, range: Range<usize>) -> Result<Vec<Frame>, LineageError> {
        if range.end > self.frames.len() {
            return Err(LineageError::UnknownFrame(range.end - 1));
        }
        Ok(self.frames[range].to_vec())
    }

    /// Install an optimised copy of an uncommitted frame.
    pub(crate) fn replace_live(&mut self, pos: usize, frame: Frame) -> Result<(), LineageError> {
        let current = self.live_frame_mut(pos)?;
        if frame.number != current.number {
            return Err(LineageError::FrameOrder { last: current.number, requested: frame.number });
        }
        let prev = pos.checked_sub(1).map(|p| &self.frames[p]);
        frame.check_parents(prev)?;
        self.frames[pos] = Frame { committed: false, ..frame };
        Ok(())
    }

    fn live_frame_mut(&mut self, pos: usize) -> Result<&mut Frame, LineageError> {
        let frame = self.frames.get_mut(pos).ok_or(LineageError::UnknownFrame(pos))?;
        if frame.committed {
            return Err(LineageError::AlreadyCommitted(pos));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(name: &str, x: f64) -> CellModel {
        CellModel::new(name, x, 20.0, 6.0, 18.0, 0.0).unwrap()
    }

    fn two_cell_lineage() -> Lineage {
        Lineage::seed(0, "f0.png", SimulationConfig::default(), vec![cell("b", 30.0), cell("a", 10.0)]).unwrap()
    }

    #[test]
    fn seed_sorts_by_name_and_rejects_duplicates() {
        let lin = two_cell_lineage();
        let names: Vec<_> = lin.frame(0).unwrap().cells().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);

        let err = Lineage::seed(3, "", SimulationConfig::default(), vec![cell("a", 1.0), cell("a", 2.0)]).unwrap_err();
        assert_eq!(err, LineageError::DuplicateCell { frame: 3, cell: "a".into() });
    }

    #[test]
    fn forward_copy_links_parents_and_leaves_source_alone() {
        let mut lin = two_cell_lineage();
        let before = lin.frame(0).unwrap().clone();
        let pos = lin.forward_copy(0).unwrap();
        assert_eq!(pos, 1);
        lin.commit(0).unwrap();

        let src = lin.frame(0).unwrap();
        assert_eq!(src.nodes(), before.nodes());
        let copy = lin.frame(1).unwrap();
        assert_eq!(copy.number, 1);
        assert_eq!(copy.nodes()[1].parent, Some(1));
        assert_eq!(copy.nodes()[1].cell, src.nodes()[1].cell);
        assert!(!copy.is_committed());
    }

    #[test]
    fn forward_copy_only_from_last_frame() {
        let mut lin = two_cell_lineage();
        lin.forward_copy(0).unwrap();
        assert_eq!(lin.forward_copy(0), Err(LineageError::FrameOrder { last: 1, requested: 0 }));
    }

    #[test]
    fn commit_is_once_and_in_order() {
        let mut lin = two_cell_lineage();
        lin.forward_copy(0).unwrap();
        assert_eq!(lin.commit(1), Err(LineageError::FrameOrder { last: 0, requested: 1 }));
        lin.commit(0).unwrap();
        assert_eq!(lin.commit(0), Err(LineageError::AlreadyCommitted(0)));
        assert_eq!(lin.commit(5), Err(LineageError::UnknownFrame(5)));
        assert_eq!(lin.last_committed().map(|f| f.number), Some(0));
    }

    #[test]
    fn committed_frames_cannot_be_replaced() {
        let mut lin = two_cell_lineage();
        let copy = lin.frame(0).unwrap().clone();
        lin.commit(0).unwrap();
        assert_eq!(lin.replace_live(0, copy), Err(LineageError::AlreadyCommitted(0)));
        assert!(lin.set_file_name(0, "x").is_err());
    }

    #[test]
    fn replace_live_checks_parent_indices() {
        let mut lin = two_cell_lineage();
        lin.forward_copy(0).unwrap();
        let mut bad = lin.frame(1).unwrap().clone();
        bad.nodes[0].parent = Some(7);
        assert!(matches!(lin.replace_live(1, bad), Err(LineageError::MissingParent { frame: 1, .. })));
    }

    #[test]
    fn split_and_merge_keep_parent_and_order() {
        let mut lin = Lineage::seed(0, "", SimulationConfig::default(), vec![cell("1", 20.0), cell("2", 60.0)]).unwrap();
        lin.forward_copy(0).unwrap();
        let mut frame = lin.frame(1).unwrap().clone();
        let children = frame.nodes()[0].cell.split(0.5).unwrap();
        frame.apply(CellChange::Split { index: 0, children });
        let names: Vec<_> = frame.cells().map(|c| c.name.clone()).collect();
        assert_eq!(names, ["10", "11", "2"]);
        assert_eq!(frame.nodes()[0].parent, Some(0));
        assert_eq!(frame.nodes()[1].parent, Some(0));

        let merged = frame.nodes()[0].cell.combine(&frame.nodes()[1].cell, "1").unwrap();
        frame.apply(CellChange::Merge { first: 0, second: 1, merged });
        assert_eq!(frame.nodes().len(), 2);
        assert_eq!(frame.nodes()[0].cell.name, "1");
        assert_eq!(frame.nodes()[0].parent, Some(0));
        lin.replace_live(1, frame).unwrap();
    }

    #[test]
    fn restore_relinks_division_children_by_name() {
        let sim = SimulationConfig::default();
        let (c0, c1) = cell("1", 20.0).split(0.5).unwrap();
        let lin = Lineage::restore(
            4,
            sim,
            vec![("a.png".into(), vec![cell("1", 20.0), cell("2", 50.0)]), ("b.png".into(), vec![c0, c1, cell("2", 51.0)])],
        )
        .unwrap();
        assert_eq!(lin.committed_len(), 2);
        let second = lin.frame(1).unwrap();
        assert_eq!(second.number, 5);
        let parents: Vec<_> = second.nodes().iter().map(|n| n.parent).collect();
        assert_eq!(parents, [Some(0), Some(0), Some(1)]);
    }

    #[test]
    fn restore_rejects_orphans() {
        let err = Lineage::restore(
            0,
            SimulationConfig::default(),
            vec![("a".into(), vec![cell("1", 20.0)]), ("b".into(), vec![cell("9", 20.0)])],
        )
        .unwrap_err();
        assert_eq!(err, LineageError::MissingParent { frame: 1, cell: "9".into() });
    }
}
