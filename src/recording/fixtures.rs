// Synthetic recordings for tests
// Five cells at 10 Hz: "plus" drives cells 0-1, "minus" cells 3-4, running cell 2

use super::{MemoryRunStore, Recording, TraceMatrix, Trial};
use crate::metadata::{RunInfo, RunKey, RunType};

pub(crate) const FRAME_RATE: f64 = 10.0;
pub(crate) const N_CELLS: usize = 5;
pub(crate) const MOUSE: &str = "TM1";
pub(crate) const DATE: u32 = 190101;

pub(crate) const PLUS_CELLS: [usize; 2] = [0, 1];
pub(crate) const MINUS_CELLS: [usize; 2] = [3, 4];
pub(crate) const RUNNING_CELLS: [usize; 1] = [2];

/// Low deterministic background in `[0, level]`
pub(crate) fn background(n_cells: usize, n_frames: usize, level: f64) -> TraceMatrix {
    let mut trace = TraceMatrix::zeros(n_cells, n_frames);
    for cell in 0..n_cells {
        for frame in 0..n_frames {
            let step = ((cell * 7 + frame * 13) % 5) as f64 / 4.0;
            trace.set(cell, frame, level * step);
        }
    }
    trace
}

pub(crate) fn paint(trace: &mut TraceMatrix, cells: &[usize], start: usize, len: usize, value: f64) {
    let end = (start + len).min(trace.n_frames());
    for &cell in cells {
        for frame in start..end {
            trace.set(cell, frame, value);
        }
    }
}

/// 1000 frames, ten 15-frame trials alternating plus/minus at 100k + 20
pub(crate) fn training_run(run: u32) -> Recording {
    let n_frames = 1000;
    let mut trace = background(N_CELLS, n_frames, 0.02);
    let mut trials = Vec::new();
    for k in 0..10 {
        let onset = 100 * k + 20;
        let (class, cells) = if k % 2 == 0 {
            ("plus", &PLUS_CELLS[..])
        } else {
            ("minus", &MINUS_CELLS[..])
        };
        paint(&mut trace, cells, onset, 15, 0.9);
        trials.push(Trial::new(class, onset, onset + 15));
    }

    Recording::new(RunKey::new(MOUSE, DATE, run), FRAME_RATE, trace)
        .with_trials(trials)
        .with_speed(vec![0.0; n_frames])
}

/// 300 frames of continuous running with cell 2 active
pub(crate) fn running_run(run: u32) -> Recording {
    let n_frames = 300;
    let mut trace = background(N_CELLS, n_frames, 0.02);
    paint(&mut trace, &RUNNING_CELLS, 0, n_frames, 0.8);

    Recording::new(RunKey::new(MOUSE, DATE, run), FRAME_RATE, trace)
        .with_speed(vec![12.0; n_frames])
}

/// 400 quiet frames with 5-frame plus-pattern reactivations at `events`
pub(crate) fn spontaneous_run(run: u32, events: &[usize]) -> Recording {
    let n_frames = 400;
    let mut trace = background(N_CELLS, n_frames, 0.02);
    for &start in events {
        paint(&mut trace, &PLUS_CELLS, start, 5, 0.9);
    }

    Recording::new(RunKey::new(MOUSE, DATE, run), FRAME_RATE, trace)
}

pub(crate) struct FixtureStore {
    pub store: MemoryRunStore,
    pub training: RunInfo,
    pub running: RunInfo,
    pub spontaneous: RunInfo,
}

/// One hungry day: training run 1, running run 2, spontaneous run 3
pub(crate) fn hungry_day() -> FixtureStore {
    let mut store = MemoryRunStore::new();
    let training = store
        .insert(RunType::Training, &["hungry"], training_run(1))
        .unwrap();
    let running = store
        .insert(RunType::Running, &["hungry"], running_run(2))
        .unwrap();
    let spontaneous = store
        .insert(
            RunType::Spontaneous,
            &["hungry"],
            spontaneous_run(3, &[100, 250]),
        )
        .unwrap();

    FixtureStore {
        store,
        training,
        running,
        spontaneous,
    }
}
