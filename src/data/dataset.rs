//! Normalized, windowed view over one or more concatenated series.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::series::{Series, SeriesSchema};
use crate::device::Device;
use crate::error::{ForecastError, Result};
use crate::math::Matrix;

/// Standard deviations below this are treated as a constant channel.
const MIN_STD: f64 = 1e-12;

/// Population mean and standard deviation of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub mean: f32,
    pub std: f32,
}

impl ChannelStats {
    /// Statistics over `values`; a degenerate spread is replaced by `1.0`.
    pub fn from_values<I: IntoIterator<Item = f32>>(values: I) -> Self {
        let values: Vec<f64> = values.into_iter().map(f64::from).collect();
        if values.is_empty() {
            return Self { mean: 0.0, std: 1.0 };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let std = var.sqrt();
        let std = if !std.is_finite() || std < MIN_STD { 1.0 } else { std };
        Self {
            mean: mean as f32,
            std: std as f32,
        }
    }

    pub fn normalize(&self, x: f32) -> f32 {
        (x - self.mean) / self.std
    }

    pub fn denormalize(&self, z: f32) -> f32 {
        z * self.std + self.mean
    }
}

/// Encoder input rows: normalized covariates and targets side by side.
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderInput {
    /// `[rows, covariate_dim]`
    pub covariates: Matrix,
    /// `[rows]`
    pub targets: Vec<f32>,
}

impl EncoderInput {
    pub fn rows(&self) -> usize {
        self.targets.len()
    }

    /// `[rows, covariate_dim + 1]` with the target as the last column.
    pub fn features(&self) -> Matrix {
        let targets = Matrix::from_vec(self.targets.len(), 1, self.targets.clone());
        Matrix::concat_cols(&self.covariates, &targets)
    }
}

/// Borrowed view of `window_length` consecutive rows.
#[derive(Clone, Copy, Debug)]
pub struct Window<'a> {
    pub index: usize,
    pub times: &'a [f32],
    pub dates: &'a [NaiveDate],
    /// Row-major `[len, covariate_dim]`.
    pub covariates: &'a [f32],
    pub targets: &'a [f32],
    covariate_dim: usize,
}

impl<'a> Window<'a> {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn covariate_dim(&self) -> usize {
        self.covariate_dim
    }

    pub fn covariate_matrix(&self) -> Matrix {
        Matrix::from_vec(self.len(), self.covariate_dim, self.covariates.to_vec())
    }

    /// Every row of the window as encoder input.
    pub fn encoder_input(&self) -> EncoderInput {
        self.context(self.len())
    }

    /// The first `n` rows (clamped to the window) as encoder input.
    pub fn context(&self, n: usize) -> EncoderInput {
        let n = n.min(self.len());
        EncoderInput {
            covariates: Matrix::from_vec(
                n,
                self.covariate_dim,
                self.covariates[..n * self.covariate_dim].to_vec(),
            ),
            targets: self.targets[..n].to_vec(),
        }
    }

    /// The rows at `idx`, in the given order.
    pub fn select(&self, idx: &[usize]) -> EncoderInput {
        EncoderInput {
            covariates: self.covariate_matrix().select_rows(idx),
            targets: idx.iter().map(|&i| self.targets[i]).collect(),
        }
    }
}

/// Concatenated series with per-instance normalization statistics.
///
/// Rows are addressed by their global position, which doubles as the time
/// coordinate of the model.
#[derive(Clone, Debug)]
pub struct Dataset {
    regions: Vec<String>,
    covariate_names: Vec<String>,
    window_length: usize,
    device: Device,
    dates: Vec<NaiveDate>,
    times: Vec<f32>,
    covariates: Vec<f32>,
    targets: Vec<f32>,
    raw_targets: Vec<f32>,
    target_stats: ChannelStats,
    covariate_stats: Vec<ChannelStats>,
}

impl Dataset {
    /// Windows are consumed one at a time.
    pub const BATCH_SIZE: usize = 1;

    pub fn new(series: Vec<Series>, window_length: usize, device: Device) -> Result<Self> {
        if window_length == 0 {
            return Err(ForecastError::data("window_length must be positive"));
        }
        let first = series
            .first()
            .ok_or_else(|| ForecastError::data("no series supplied"))?;
        let covariate_names = first.covariate_names().to_vec();
        let dim = covariate_names.len();
        for s in &series {
            if s.is_empty() {
                return Err(ForecastError::data(format!("series {} is empty", s.region())));
            }
            if s.len() < window_length {
                return Err(ForecastError::data(format!(
                    "series {} has {} rows, shorter than one window of {window_length}",
                    s.region(),
                    s.len()
                )));
            }
            if s.covariate_dim() != dim {
                return Err(ForecastError::data(format!(
                    "series {} has {} covariates, expected {dim}",
                    s.region(),
                    s.covariate_dim()
                )));
            }
        }

        let total: usize = series.iter().map(Series::len).sum();
        let mut dates = Vec::with_capacity(total);
        let mut raw_cov = Vec::with_capacity(total * dim);
        let mut raw_targets = Vec::with_capacity(total);
        for s in &series {
            for r in s.records() {
                if !r.target.is_finite() || r.covariates.iter().any(|v| !v.is_finite()) {
                    return Err(ForecastError::data(format!(
                        "series {} has a non-finite value on {}",
                        s.region(),
                        r.date
                    )));
                }
                dates.push(r.date);
                raw_cov.extend_from_slice(&r.covariates);
                raw_targets.push(r.target);
            }
        }
        if total / window_length == 0 {
            return Err(ForecastError::data("no complete window"));
        }

        let target_stats = ChannelStats::from_values(raw_targets.iter().copied());
        let covariate_stats: Vec<ChannelStats> = (0..dim)
            .map(|c| ChannelStats::from_values(raw_cov.iter().skip(c).step_by(dim).copied()))
            .collect();
        let covariates = raw_cov
            .iter()
            .enumerate()
            .map(|(i, &v)| covariate_stats[i % dim].normalize(v))
            .collect();
        let targets = raw_targets.iter().map(|&v| target_stats.normalize(v)).collect();

        Ok(Self {
            regions: series.iter().map(|s| s.region().to_string()).collect(),
            covariate_names,
            window_length,
            device,
            dates,
            times: (0..total).map(|i| i as f32).collect(),
            covariates,
            targets,
            raw_targets,
            target_stats,
            covariate_stats,
        })
    }

    /// Load one CSV per `(region, path)` and concatenate them in order.
    pub fn from_csv(
        files: &[(String, PathBuf)],
        schema: &SeriesSchema,
        window_length: usize,
        device: Device,
    ) -> Result<Self> {
        let series = files
            .iter()
            .map(|(region, path)| Series::from_csv(path, region.clone(), schema))
            .collect::<Result<Vec<_>>>()?;
        let ds = Self::new(series, window_length, device)?;
        log::info!(
            "dataset {:?}: {} rows, {} windows of {}",
            ds.regions,
            ds.len(),
            ds.num_windows(),
            window_length
        );
        Ok(ds)
    }

    /// Same data tagged with another compute context.
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn covariate_names(&self) -> &[String] {
        &self.covariate_names
    }

    pub fn covariate_dim(&self) -> usize {
        self.covariate_names.len()
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn num_windows(&self) -> usize {
        self.len() / self.window_length
    }

    pub fn times(&self) -> &[f32] {
        &self.times
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Normalized targets.
    pub fn targets(&self) -> &[f32] {
        &self.targets
    }

    pub fn raw_targets(&self) -> &[f32] {
        &self.raw_targets
    }

    pub fn target_stats(&self) -> ChannelStats {
        self.target_stats
    }

    pub fn covariate_stats(&self) -> &[ChannelStats] {
        &self.covariate_stats
    }

    pub fn infect_means(&self) -> f32 {
        self.target_stats.mean
    }

    pub fn infect_stds(&self) -> f32 {
        self.target_stats.std
    }

    /// Calendar dates covered by window `i`.
    pub fn window_dates(&self, i: usize) -> Option<&[NaiveDate]> {
        let w = self.window_length;
        (i < self.num_windows()).then(|| &self.dates[i * w..(i + 1) * w])
    }

    pub fn window(&self, i: usize) -> Option<Window<'_>> {
        if i >= self.num_windows() {
            return None;
        }
        let (a, b) = (i * self.window_length, (i + 1) * self.window_length);
        let dim = self.covariate_dim();
        Some(Window {
            index: i,
            times: &self.times[a..b],
            dates: &self.dates[a..b],
            covariates: &self.covariates[a * dim..b * dim],
            targets: &self.targets[a..b],
            covariate_dim: dim,
        })
    }

    /// Consecutive non-overlapping windows in series order. Each call starts
    /// from the first window again.
    pub fn windows(&self) -> Windows<'_> {
        Windows { data: self, next: 0 }
    }

    /// Normalized covariate row active at time `position`.
    ///
    /// Intermediate times use the row at `floor(position)`; a small tolerance
    /// absorbs rounding of integrator times that should land on a sample.
    pub fn covariate_at(&self, position: f32) -> &[f32] {
        let last = self.len().saturating_sub(1);
        let idx = if position.is_finite() {
            ((position + 1e-4).floor().max(0.0) as usize).min(last)
        } else {
            0
        };
        let dim = self.covariate_dim();
        &self.covariates[idx * dim..(idx + 1) * dim]
    }
}

/// Restartable iterator returned by [`Dataset::windows`].
#[derive(Clone)]
pub struct Windows<'a> {
    data: &'a Dataset,
    next: usize,
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let w = self.data.window(self.next)?;
        self.next += 1;
        Some(w)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.data.num_windows().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Windows<'_> {}
