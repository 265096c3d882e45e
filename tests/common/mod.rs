#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cellanneal::config::{Config, RunOptions, SimulationConfig};
use cellanneal::engine::{
    render_synthetic, CellModel, CommittedFrame, DebugRecord, FrameDimensions, FrameSink, FrameSource, Plane,
};
use cellanneal::error::RunError;
use cellanneal::io::LineageLog;

pub const DIMS: FrameDimensions = FrameDimensions { width: 96, height: 96 };

pub fn config(iteration_per_cell: usize, window: usize, padding: usize) -> Config {
    Config::from_json(&config_text(iteration_per_cell, window, padding)).expect("test config parses")
}

/// Long cells may divide, and often try to; merges are off.
pub fn dividing_config(iteration_per_cell: usize, window: usize) -> Config {
    let text = config_text(iteration_per_cell, window, 0).replace(
        r#""bacilli.minSplitLength": 200.0,"#,
        r#""bacilli.minSplitLength": 30.0, "prob.split": 0.3, "prob.merge": 0.0,"#,
    );
    Config::from_json(&text).expect("test config parses")
}

fn config_text(iteration_per_cell: usize, window: usize, padding: usize) -> String {
    format!(
        r#"{{
            "global.cellType": "bacilli",
            "global.pixelsPerMicron": 10.0,
            "global.framesPerSecond": 1.0,
            "bacilli.minWidth": 4.0,
            "bacilli.maxWidth": 20.0,
            "bacilli.minLength": 8.0,
            "bacilli.maxLength": 80.0,
            "bacilli.minSplitLength": 200.0,
            "iteration_per_cell": {iteration_per_cell},
            "global_optimizer.window_size": {window},
            "overlap.cost": 0.5,
            "simulation": {{ "background.color": 0.0, "cell.color": 1.0, "padding": {padding} }},
            "perturbation": {{
                "modification.x.sigma": 20.0,
                "modification.y.sigma": 20.0,
                "modification.width.sigma": 2.0,
                "modification.length.sigma": 5.0,
                "modification.rotation.sigma": 1.0
            }}
        }}"#
    )
}

pub fn manual_temps(options: RunOptions) -> RunOptions {
    let mut options = options;
    options.temperature.auto_temp = false;
    options.temperature.start_temp = Some(2.0);
    options.temperature.end_temp = Some(0.01);
    options
}

/// The same truth cell drifting right by `step` pixels per frame.
pub fn drifting_frames(count: usize, step: f64) -> Vec<Plane> {
    let sim = SimulationConfig::default();
    (0..count)
        .map(|i| {
            let cell = CellModel::new("1", 40.0 + step * i as f64, 48.0, 10.0, 30.0, 0.2).unwrap();
            render_synthetic([&cell], DIMS, &sim).0
        })
        .collect()
}

pub struct MemorySource {
    pub first: usize,
    pub frames: Vec<Plane>,
}

impl FrameSource for MemorySource {
    fn len(&self) -> usize {
        self.frames.len()
    }

    fn first_number(&self) -> usize {
        self.first
    }

    fn file_name(&self, pos: usize) -> String {
        format!("frame{:03}.png", self.first + pos)
    }

    fn load(&self, pos: usize) -> Result<Plane, RunError> {
        Ok(self.frames[pos].clone())
    }
}

#[derive(Clone, Debug)]
pub struct Emitted {
    pub number: usize,
    pub file_name: String,
    pub cells: Vec<CellModel>,
    pub parents: Vec<Option<usize>>,
    pub cost: f64,
}

/// Records committed frames and writes the lineage log into memory.
pub struct MemorySink {
    pub emitted: Vec<Emitted>,
    pub debug: Vec<DebugRecord>,
    log: Option<LineageLog<Vec<u8>>>,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
    fail_at: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            emitted: Vec::new(),
            debug: Vec::new(),
            log: Some(LineageLog::new(Vec::new()).unwrap()),
            cancel_after: None,
            fail_at: None,
        }
    }

    /// Fail with an i/o error when the `frames`-th frame is committed.
    pub fn failing_at(frames: usize) -> Self {
        Self { fail_at: Some(frames), ..Self::new() }
    }

    /// Raise `flag` once `frames` frames have been committed.
    pub fn cancelling_after(frames: usize, flag: Arc<AtomicBool>) -> Self {
        Self { cancel_after: Some((frames, flag)), ..Self::new() }
    }

    pub fn log_text(&mut self) -> String {
        let bytes = self.log.take().map(|l| l.into_inner().unwrap()).unwrap_or_default();
        String::from_utf8(bytes).unwrap()
    }
}

impl FrameSink for MemorySink {
    fn frame_committed(&mut self, c: &CommittedFrame<'_>) -> Result<(), RunError> {
        if self.fail_at == Some(self.emitted.len() + 1) {
            return Err(std::io::Error::other("disk full").into());
        }
        if let Some(log) = self.log.as_mut() {
            log.append(c.frame, c.padding)?;
        }
        self.emitted.push(Emitted {
            number: c.frame.number,
            file_name: c.frame.file_name.clone(),
            cells: c.frame.cells().cloned().collect(),
            parents: c.frame.nodes().iter().map(|n| n.parent).collect(),
            cost: c.cost,
        });
        if let Some((n, flag)) = &self.cancel_after {
            if self.emitted.len() >= *n {
                flag.store(true, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn debug_records(&mut self, records: &[DebugRecord]) -> Result<(), RunError> {
        self.debug.extend_from_slice(records);
        Ok(())
    }
}
