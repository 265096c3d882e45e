mod common;

use cellanneal::config::RunOptions;
use cellanneal::engine::{render_synthetic, CellModel, CostMode, InitialState, SelectionStrategy, WindowDriver};
use cellanneal::error::RunError;
use cellanneal::io::read_committed;

use common::{config, dividing_config, drifting_frames, manual_temps, MemorySink, MemorySource, DIMS};

fn seed_cell() -> CellModel {
    CellModel::new("1", 50.0, 50.0, 10.0, 30.0, 0.0).unwrap()
}

fn driver(iteration_per_cell: usize, window: usize, padding: usize, options: RunOptions) -> WindowDriver {
    let cfg = config(iteration_per_cell, window, padding);
    WindowDriver::new(cfg.derive(options.cost_mode), cfg.simulation.clone(), options).unwrap()
}

fn annealing_options() -> RunOptions {
    manual_temps(RunOptions { workers: 2, jobs: 3, keep: 2, seed: 17, parallel: true, ..Default::default() })
}

#[test]
fn zero_iterations_commit_the_seed_unchanged() {
    let truth = seed_cell();
    let sim = Default::default();
    let real = render_synthetic([&truth], DIMS, &sim).0;
    let source = MemorySource { first: 0, frames: vec![real.clone(), real.clone(), real] };

    let d = driver(0, 3, 0, RunOptions::default());
    let mut sink = MemorySink::new();
    let summary = d.run(&source, &mut sink, InitialState::Cells(vec![truth.clone()])).unwrap();

    assert_eq!(summary.committed, vec![0, 1, 2]);
    for w in &summary.windows {
        assert_eq!(w.iterations, 0);
        assert_eq!(w.committed_cost, w.baseline);
    }
    for e in &sink.emitted {
        assert_eq!(e.cells, vec![truth.clone()]);
        assert_eq!(e.cost, sink.emitted[0].cost);
    }
}

#[test]
fn window_of_three_over_five_frames_commits_every_frame_once() {
    let source = MemorySource { first: 10, frames: drifting_frames(5, 2.0) };
    let d = driver(5, 3, 0, annealing_options());
    let mut sink = MemorySink::new();
    let start = CellModel::new("1", 40.0, 48.0, 10.0, 30.0, 0.2).unwrap();
    let summary = d.run(&source, &mut sink, InitialState::Cells(vec![start])).unwrap();

    assert_eq!(summary.committed, vec![10, 11, 12, 13, 14]);
    let names: Vec<&str> = sink.emitted.iter().map(|e| e.file_name.as_str()).collect();
    assert_eq!(names, ["frame010.png", "frame011.png", "frame012.png", "frame013.png", "frame014.png"]);
    assert!(sink.emitted.windows(2).all(|p| p[1].number == p[0].number + 1));
    // windows -2..=4, all of which see at least one live frame
    assert_eq!(summary.windows.len(), 7);
    assert_eq!(summary.stats.committed_frames, 5);
    assert_eq!(summary.stats.last_committed_frame, Some(14));
}

#[test]
fn committed_cost_never_exceeds_the_baseline() {
    for strategy in [SelectionStrategy::BestWins, SelectionStrategy::WorstWins, SelectionStrategy::ExtremeWins] {
        let source = MemorySource { first: 0, frames: drifting_frames(5, 3.0) };
        let options = RunOptions { strategy, ..annealing_options() };
        let d = driver(30, 3, 0, options);
        let mut sink = MemorySink::new();
        let start = CellModel::new("1", 44.0, 45.0, 9.0, 26.0, 0.0).unwrap();
        let summary = d.run(&source, &mut sink, InitialState::Cells(vec![start])).unwrap();

        for w in &summary.windows {
            assert!(w.committed_cost <= w.baseline, "{strategy}: {} > {}", w.committed_cost, w.baseline);
        }
        // every cell is far below the minimum split length
        assert!(sink.emitted.iter().all(|e| e.cells.len() == 1));
    }
}

#[test]
fn annealing_moves_the_cell_towards_the_image() {
    let source = MemorySource { first: 0, frames: drifting_frames(3, 0.0) };
    let d = driver(400, 2, 0, annealing_options());
    let mut sink = MemorySink::new();
    let start = CellModel::new("1", 46.0, 52.0, 10.0, 30.0, 0.2).unwrap();
    let summary = d.run(&source, &mut sink, InitialState::Cells(vec![start])).unwrap();

    let first = &summary.windows[0];
    assert!(first.committed_cost < first.baseline);
    assert!(summary.stats.totals.accepts > 0);
}

#[test]
fn fixed_seed_reproduces_the_lineage_log() {
    let run = |parallel: bool| {
        let source = MemorySource { first: 0, frames: drifting_frames(4, 2.5) };
        let options = RunOptions { parallel, ..annealing_options() };
        let d = driver(20, 3, 0, options);
        let mut sink = MemorySink::new();
        let start = CellModel::new("1", 42.0, 47.0, 10.0, 28.0, 0.1).unwrap();
        d.run(&source, &mut sink, InitialState::Cells(vec![start])).unwrap();
        sink.log_text()
    };
    let a = run(true);
    let b = run(true);
    assert_eq!(a, b);
    // the worker pool does not change any job's trajectory
    assert_eq!(a, run(false));
    assert_eq!(a.lines().count(), 1 + 4);
}

#[test]
fn auto_temperature_runs_are_reproducible() {
    let run = || {
        let source = MemorySource { first: 0, frames: drifting_frames(3, 2.0) };
        let options = RunOptions { jobs: 2, seed: 5, ..Default::default() };
        let d = driver(20, 2, 0, options);
        let mut sink = MemorySink::new();
        let start = CellModel::new("1", 42.0, 47.0, 10.0, 28.0, 0.1).unwrap();
        let summary = d.run(&source, &mut sink, InitialState::Cells(vec![start])).unwrap();
        (sink.log_text(), summary.stats.start_temp, summary.stats.end_temp)
    };
    let (log, start, end) = run();
    let (start, end) = (start.unwrap(), end.unwrap());
    assert!(start > end && end > 0.0);
    assert_eq!(run(), (log, Some(start), Some(end)));
}

#[test]
fn padding_is_removed_from_the_log() {
    let truth = seed_cell();
    let sim = Default::default();
    let real = render_synthetic([&truth], DIMS, &sim).0;
    let source = MemorySource { first: 0, frames: vec![real] };

    let d = driver(0, 2, 4, RunOptions::default());
    let mut sink = MemorySink::new();
    d.run(&source, &mut sink, InitialState::Cells(vec![truth])).unwrap();

    // cells live in padded canvas space while the run is going
    assert_eq!(sink.emitted[0].cells[0].x, 54.0);
    let log = sink.log_text();
    assert_eq!(log.lines().nth(1), Some("frame000.png,1,50.0,50.0,10.0,30.0,0.0,,1.0"));
}

#[test]
fn resumed_run_reemits_committed_frames_and_continues() {
    let source = MemorySource { first: 0, frames: drifting_frames(5, 2.0) };
    let start = CellModel::new("1", 41.0, 49.0, 10.0, 30.0, 0.2).unwrap();

    let mut first = MemorySink::new();
    driver(10, 3, 0, annealing_options())
        .run(&source, &mut first, InitialState::Cells(vec![start]))
        .unwrap();
    let first_log = first.log_text();

    let names: Vec<String> = (0..2).map(|p| format!("frame{:03}.png", p)).collect();
    let committed = read_committed(first_log.as_bytes(), &names).unwrap();
    let mut resumed = MemorySink::new();
    let summary = driver(10, 3, 0, annealing_options())
        .run(&source, &mut resumed, InitialState::Committed(committed))
        .unwrap();

    assert_eq!(summary.committed, vec![0, 1, 2, 3, 4]);
    for (a, b) in first.emitted.iter().zip(&resumed.emitted).take(2) {
        assert_eq!(a.cells, b.cells);
    }
    // no window optimises an already committed frame
    assert!(summary.windows.iter().all(|w| w.frames.iter().all(|&f| f >= 2)));
    let resumed_log = resumed.log_text();
    let head = |log: &str| log.lines().take(3).map(str::to_owned).collect::<Vec<_>>();
    assert_eq!(head(&first_log), head(&resumed_log));
}

#[test]
fn resume_with_more_frames_than_input_is_rejected() {
    let source = MemorySource { first: 0, frames: drifting_frames(1, 0.0) };
    let cells = vec![seed_cell()];
    let committed = vec![("frame000.png".to_string(), cells.clone()), ("frame001.png".to_string(), cells)];
    let err = driver(0, 2, 0, RunOptions::default())
        .run(&source, &mut MemorySink::new(), InitialState::Committed(committed))
        .unwrap_err();
    assert!(matches!(err, RunError::Resume(_)));
}

#[test]
fn cancellation_keeps_the_last_committed_state() {
    let source = MemorySource { first: 3, frames: drifting_frames(5, 2.0) };
    let d = driver(10, 3, 0, annealing_options());
    let mut sink = MemorySink::cancelling_after(1, d.cancel_handle());
    let err = d
        .run(&source, &mut sink, InitialState::Cells(vec![CellModel::new("1", 40.0, 48.0, 10.0, 30.0, 0.2).unwrap()]))
        .unwrap_err();

    assert!(matches!(err, RunError::Cancelled { .. }));
    assert_eq!(err.last_committed(), Some(3));
    assert_eq!(sink.emitted.len(), 1);
}

#[test]
fn output_failure_reports_the_last_committed_frame() {
    let source = MemorySource { first: 5, frames: drifting_frames(4, 2.0) };
    let d = driver(5, 2, 0, annealing_options());
    let mut sink = MemorySink::failing_at(3);
    let err = d.run(&source, &mut sink, InitialState::Cells(vec![seed_cell()])).unwrap_err();

    assert!(matches!(&err, RunError::Aborted { source, .. } if matches!(**source, RunError::Io(_))));
    assert_eq!(err.last_committed(), Some(6));
    assert_eq!(sink.emitted.len(), 2);
}

#[test]
fn failure_before_any_commit_has_no_resume_point() {
    let source = MemorySource { first: 0, frames: drifting_frames(2, 2.0) };
    let d = driver(5, 2, 0, annealing_options());
    let mut sink = MemorySink::failing_at(1);
    let err = d.run(&source, &mut sink, InitialState::Cells(vec![seed_cell()])).unwrap_err();
    assert!(matches!(err, RunError::Io(_)));
    assert_eq!(err.last_committed(), None);
}

#[test]
fn cancelled_before_start_commits_nothing() {
    let source = MemorySource { first: 0, frames: drifting_frames(2, 0.0) };
    let d = driver(10, 2, 0, annealing_options());
    d.cancel_handle().store(true, std::sync::atomic::Ordering::Relaxed);
    let mut sink = MemorySink::new();
    let err = d.run(&source, &mut sink, InitialState::Cells(vec![seed_cell()])).unwrap_err();
    assert_eq!(err.last_committed(), None);
    assert!(sink.emitted.is_empty());
}

#[test]
fn debug_records_follow_window_order() {
    let source = MemorySource { first: 0, frames: drifting_frames(3, 1.0) };
    let options = RunOptions { debug_stride: Some(10), ..annealing_options() };
    let d = driver(20, 2, 0, options);
    let mut sink = MemorySink::new();
    d.run(&source, &mut sink, InitialState::Cells(vec![seed_cell()])).unwrap();

    assert!(!sink.debug.is_empty());
    assert!(sink.debug.windows(2).all(|p| p[0].window_start <= p[1].window_start));
    assert!(sink.debug.iter().all(|r| r.current_iteration <= r.total_iterations));
}

#[test]
fn distance_objective_runs_end_to_end() {
    let source = MemorySource { first: 0, frames: drifting_frames(3, 1.5) };
    let options = RunOptions { cost_mode: CostMode::Distance, ..annealing_options() };
    let d = driver(10, 2, 2, options);
    let mut sink = MemorySink::new();
    let summary = d.run(&source, &mut sink, InitialState::Cells(vec![seed_cell()])).unwrap();
    assert_eq!(summary.committed.len(), 3);
    assert!(summary.windows.iter().all(|w| w.committed_cost <= w.baseline));
}

#[test]
fn accepted_division_is_committed_and_linked() {
    let sim = Default::default();
    let whole = CellModel::new("1", 49.0, 48.0, 10.0, 46.0, 0.0).unwrap();
    let halves = [
        CellModel::new("10", 36.0, 48.0, 10.0, 20.0, 0.0).unwrap(),
        CellModel::new("11", 62.0, 48.0, 10.0, 20.0, 0.0).unwrap(),
    ];
    let divided = render_synthetic(halves.iter(), DIMS, &sim).0;
    let source = MemorySource {
        first: 0,
        frames: vec![render_synthetic([&whole], DIMS, &sim).0, divided.clone(), divided],
    };

    let cfg = dividing_config(100, 2);
    let options = annealing_options();
    let d = WindowDriver::new(cfg.derive(options.cost_mode), cfg.simulation.clone(), options).unwrap();
    let mut sink = MemorySink::new();
    let summary = d.run(&source, &mut sink, InitialState::Cells(vec![whole])).unwrap();
    assert!(summary.stats.totals.splits > 0);

    let names = |i: usize| sink.emitted[i].cells.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
    assert_eq!(names(0), ["1"]);
    assert_eq!(names(1), ["10", "11"]);
    assert_eq!(names(2), ["10", "11"]);
    // both children point at the dividing cell, then at themselves
    assert_eq!(sink.emitted[1].parents, [Some(0), Some(0)]);
    assert_eq!(sink.emitted[2].parents, [Some(0), Some(1)]);
    assert!(sink.emitted[1].cells.iter().all(|c| c.split_alpha.is_some()));
    assert!(sink.emitted[2].cells.iter().all(|c| c.split_alpha.is_none()));
    assert!(summary.windows.iter().all(|w| w.committed_cost <= w.baseline));
}
