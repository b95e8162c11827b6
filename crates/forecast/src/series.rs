//! Row-major `[steps × width]` buffer: one row per timestep.

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, ForecastError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    steps: usize,
    width: usize,
    data: Vec<f64>,
}

impl Series {
    pub fn zeros(steps: usize, width: usize) -> Self {
        Self {
            steps,
            width,
            data: vec![0.0; steps * width],
        }
    }

    pub fn from_flat(steps: usize, width: usize, data: Vec<f64>) -> EngineResult<Self> {
        if data.len() != steps * width {
            return Err(ForecastError::shape("series buffer", steps * width, data.len()));
        }
        Ok(Self { steps, width, data })
    }

    /// Build from equally wide rows.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> EngineResult<Self> {
        let width = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * width);
        for row in rows {
            let row = row.as_ref();
            if row.len() != width {
                return Err(ForecastError::shape("series row", width, row.len()));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            steps: rows.len(),
            width,
            data,
        })
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row(&self, t: usize) -> &[f64] {
        &self.data[t * self.width..(t + 1) * self.width]
    }

    pub fn row_mut(&mut self, t: usize) -> &mut [f64] {
        &mut self.data[t * self.width..(t + 1) * self.width]
    }

    /// Row of the final timestep, `None` for an empty series.
    pub fn last_row(&self) -> Option<&[f64]> {
        self.steps.checked_sub(1).map(|t| self.row(t))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn ensure_shape(&self, context: &'static str, steps: usize, width: usize) -> EngineResult<()> {
        if self.width != width {
            return Err(ForecastError::shape(context, width, self.width));
        }
        if self.steps != steps {
            return Err(ForecastError::shape(context, steps, self.steps));
        }
        Ok(())
    }

    /// Element-wise `self += other`.
    pub fn add_assign(&mut self, other: &Series) -> EngineResult<()> {
        other.ensure_shape("series add", self.steps, self.width)?;
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
        Ok(())
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Series {
        Series {
            steps: self.steps,
            width: self.width,
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }
}
