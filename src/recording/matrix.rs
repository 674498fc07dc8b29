// Trace matrix
// Dense cells x frames activity matrix, row-major by cell, NaN marks dropout

use serde::{Deserialize, Serialize};

use super::source::{RecordingError, RecordingResult};
use crate::stats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMatrix {
    n_cells: usize,
    n_frames: usize,
    data: Vec<f64>,
}

impl TraceMatrix {
    pub fn new(n_cells: usize, n_frames: usize, data: Vec<f64>) -> RecordingResult<Self> {
        if data.len() != n_cells * n_frames {
            return Err(RecordingError::ShapeMismatch {
                expected: n_cells * n_frames,
                found: data.len(),
            });
        }
        Ok(TraceMatrix {
            n_cells,
            n_frames,
            data,
        })
    }

    pub fn zeros(n_cells: usize, n_frames: usize) -> Self {
        TraceMatrix {
            n_cells,
            n_frames,
            data: vec![0.0; n_cells * n_frames],
        }
    }

    /// Build from one vector per cell; all rows must have the same length
    pub fn from_rows(rows: Vec<Vec<f64>>) -> RecordingResult<Self> {
        let n_cells = rows.len();
        let n_frames = rows.first().map(|r| r.len()).unwrap_or(0);

        let mut data = Vec::with_capacity(n_cells * n_frames);
        for row in rows {
            if row.len() != n_frames {
                return Err(RecordingError::ShapeMismatch {
                    expected: n_frames,
                    found: row.len(),
                });
            }
            data.extend(row);
        }

        Ok(TraceMatrix {
            n_cells,
            n_frames,
            data,
        })
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn get(&self, cell: usize, frame: usize) -> f64 {
        self.data[cell * self.n_frames + frame]
    }

    pub fn set(&mut self, cell: usize, frame: usize, value: f64) {
        self.data[cell * self.n_frames + frame] = value;
    }

    pub fn row(&self, cell: usize) -> &[f64] {
        &self.data[cell * self.n_frames..(cell + 1) * self.n_frames]
    }

    pub fn row_mut(&mut self, cell: usize) -> &mut [f64] {
        &mut self.data[cell * self.n_frames..(cell + 1) * self.n_frames]
    }

    /// Values of every cell at one frame
    pub fn column(&self, frame: usize) -> Vec<f64> {
        (0..self.n_cells).map(|c| self.get(c, frame)).collect()
    }

    /// Frames `[start, start + len)`, or `None` when that runs past the end
    pub fn frame_slice(&self, start: usize, len: usize) -> Option<TraceMatrix> {
        let end = start.checked_add(len)?;
        if end > self.n_frames {
            return None;
        }

        let mut data = Vec::with_capacity(self.n_cells * len);
        for cell in 0..self.n_cells {
            data.extend_from_slice(&self.row(cell)[start..end]);
        }
        Some(TraceMatrix {
            n_cells: self.n_cells,
            n_frames: len,
            data,
        })
    }

    /// Keep only the frames where `mask` is true
    pub fn select_frames(&self, mask: &[bool]) -> TraceMatrix {
        let keep: Vec<usize> = (0..self.n_frames)
            .filter(|&f| mask.get(f).copied().unwrap_or(false))
            .collect();

        let mut data = Vec::with_capacity(self.n_cells * keep.len());
        for cell in 0..self.n_cells {
            let row = self.row(cell);
            data.extend(keep.iter().map(|&f| row[f]));
        }
        TraceMatrix {
            n_cells: self.n_cells,
            n_frames: keep.len(),
            data,
        }
    }

    /// Keep only the cells where `keep` is true
    pub fn select_cells(&self, keep: &[bool]) -> TraceMatrix {
        let mut data = Vec::new();
        let mut n_cells = 0;
        for cell in 0..self.n_cells {
            if keep.get(cell).copied().unwrap_or(false) {
                data.extend_from_slice(self.row(cell));
                n_cells += 1;
            }
        }
        TraceMatrix {
            n_cells,
            n_frames: self.n_frames,
            data,
        }
    }

    /// Mean across cells at every frame, ignoring non-finite values
    pub fn population_mean(&self) -> Vec<f64> {
        (0..self.n_frames)
            .map(|f| stats::nanmean(&self.column(f)))
            .collect()
    }

    /// Mean of every cell over frames `[from_frame, end)`, ignoring non-finite values
    pub fn cell_means(&self, from_frame: usize) -> Vec<f64> {
        let from = from_frame.min(self.n_frames);
        (0..self.n_cells)
            .map(|c| stats::nanmean(&self.row(c)[from..]))
            .collect()
    }

    /// True for every cell holding at least one non-finite value
    pub fn non_finite_cells(&self) -> Vec<bool> {
        (0..self.n_cells)
            .map(|c| self.row(c).iter().any(|v| !v.is_finite()))
            .collect()
    }

    /// Multiply by `multiplier` and clip into `[lo, hi]`; NaN stays NaN
    pub fn scale_clip(&self, multiplier: f64, lo: f64, hi: f64) -> TraceMatrix {
        TraceMatrix {
            n_cells: self.n_cells,
            n_frames: self.n_frames,
            data: self
                .data
                .iter()
                .map(|v| (v * multiplier).clamp(lo, hi))
                .collect(),
        }
    }
}
