//! Extrapolation evaluation of a trained model on held-out windows.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use rand::seq::index;
use serde::Serialize;

use crate::checkpoint;
use crate::config::{EvalConfig, RunConfig};
use crate::data::{split_paths, ChannelStats, Dataset, Split, Window};
use crate::error::{ForecastError, Result};
use crate::models::LatentOde;
use crate::optim::{GaussianNll, Loss, MeanSquaredError};
use crate::rng::NoiseSource;
use crate::util::logging::format_test_losses;

/// Denormalized forecast of one evaluation window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowForecast {
    pub index: usize,
    pub dates: Vec<NaiveDate>,
    pub predicted: Vec<f32>,
    pub observed: Vec<f32>,
    /// Window rows given to the encoder.
    pub retained: Vec<usize>,
    /// Number of leading rows that were eligible as encoder input.
    pub context: usize,
    pub mse: f32,
    pub nll: f32,
}

#[derive(Serialize)]
struct ForecastRow<'a> {
    window: usize,
    date: String,
    predicted: f32,
    observed: f32,
    in_context: bool,
    region: &'a str,
}

/// Averages over windows plus the per-window forecasts.
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub mse: f32,
    pub nll: f32,
    /// MSE over the rows eligible as encoder input.
    pub context_mse: f32,
    /// MSE beyond the context; `None` when every row was context.
    pub horizon_mse: Option<f32>,
    pub num_windows: usize,
    pub drop_rate: f32,
    pub forecasts: Vec<WindowForecast>,
}

impl EvalReport {
    /// Human readable summary, the content of the test loss file.
    pub fn summary(&self) -> String {
        let mut out = format_test_losses(self.mse, self.nll);
        out.push_str(&format!("\nContext MSE loss: {:.4}", self.context_mse));
        if let Some(h) = self.horizon_mse {
            out.push_str(&format!("\nHorizon MSE loss: {:.4}", h));
        }
        out.push_str(&format!("\nWindows: {}\nDrop rate: {}\n", self.num_windows, self.drop_rate));
        out
    }

    pub fn write_summary(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.summary())?;
        log::info!("Wrote test losses to {}", path.display());
        Ok(())
    }

    /// One CSV row per forecast timestamp.
    pub fn write_forecasts(&self, path: impl AsRef<Path>, region: &str) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut wtr = csv::Writer::from_path(path)?;
        for f in &self.forecasts {
            for (i, date) in f.dates.iter().enumerate() {
                wtr.serialize(ForecastRow {
                    window: f.index,
                    date: date.format("%Y-%m-%d").to_string(),
                    predicted: f.predicted[i],
                    observed: f.observed[i],
                    in_context: i < f.context,
                    region,
                })?;
            }
        }
        wtr.flush()?;
        log::info!("Wrote forecasts to {}", path.display());
        Ok(())
    }
}

fn mean(values: impl Iterator<Item = f32>) -> Option<f32> {
    let (sum, n) = values.fold((0.0f64, 0usize), |(s, n), v| (s + f64::from(v), n + 1));
    (n > 0).then(|| (sum / n as f64) as f32)
}

pub struct Evaluator {
    config: EvalConfig,
    nll: GaussianNll,
    mse: MeanSquaredError,
    /// Target statistics of the training data, used for predictions.
    train_stats: ChannelStats,
    noise: NoiseSource,
}

impl Evaluator {
    pub fn new(config: EvalConfig, train_stats: ChannelStats, noise: NoiseSource) -> Result<Self> {
        config.validate()?;
        let nll = GaussianNll::new(config.std)?;
        Ok(Self {
            config,
            nll,
            mse: MeanSquaredError::new(),
            train_stats,
            noise,
        })
    }

    /// Sorted random subset of `0..context` of size
    /// `floor(context * (1 - drop_rate))`, at least one row.
    pub fn retained_indices(&mut self, context: usize) -> Result<Vec<usize>> {
        if context == 0 {
            return Err(ForecastError::data("evaluation window has no context rows"));
        }
        let keep = ((context as f64) * (1.0 - f64::from(self.config.drop_rate))).floor() as usize;
        let keep = keep.clamp(1, context);
        let mut idx = index::sample(self.noise.rng(), context, keep).into_vec();
        idx.sort_unstable();
        Ok(idx)
    }

    /// Forecast the whole window from a thinned prefix.
    pub fn evaluate_window(
        &mut self,
        model: &mut LatentOde,
        data: &Dataset,
        window: &Window<'_>,
    ) -> Result<WindowForecast> {
        let context = self.config.context_steps.unwrap_or(window.len()).min(window.len());
        let retained = self.retained_indices(context)?;
        let input = window.select(&retained);
        let predictions = model.predict(data, &input, window.times, &mut self.noise)?;

        let eval_stats = data.target_stats();
        let predicted: Vec<f32> = (0..predictions.rows)
            .map(|r| self.train_stats.denormalize(predictions.get(r, 0)))
            .collect();
        let observed: Vec<f32> = window
            .targets
            .iter()
            .map(|&v| eval_stats.denormalize(v))
            .collect();
        Ok(WindowForecast {
            index: window.index,
            dates: window.dates.to_vec(),
            mse: self.mse.loss(&predicted, &observed),
            nll: self.nll.loss(&predicted, &observed),
            predicted,
            observed,
            retained,
            context,
        })
    }

    /// Evaluate every window of `data` in evaluation mode.
    pub fn evaluate(&mut self, model: &mut LatentOde, data: &Dataset) -> Result<EvalReport> {
        model.eval();
        let forecasts = data
            .windows()
            .map(|w| self.evaluate_window(model, data, &w))
            .collect::<Result<Vec<_>>>()?;

        let mse = mean(forecasts.iter().map(|f| f.mse))
            .ok_or_else(|| ForecastError::data("evaluation dataset has no windows"))?;
        let nll = mean(forecasts.iter().map(|f| f.nll)).unwrap_or(f32::NAN);
        let context_mse = mean(forecasts.iter().map(|f| {
            self.mse.loss(&f.predicted[..f.context], &f.observed[..f.context])
        }))
        .unwrap_or(f32::NAN);
        let horizon_mse = mean(forecasts.iter().filter(|f| f.context < f.predicted.len()).map(|f| {
            self.mse.loss(&f.predicted[f.context..], &f.observed[f.context..])
        }));
        Ok(EvalReport {
            mse,
            nll,
            context_mse,
            horizon_mse,
            num_windows: forecasts.len(),
            drop_rate: self.config.drop_rate,
            forecasts,
        })
    }
}

/// Evaluate the job's checkpoint on the test split and write the report and
/// forecasts under the results directory.
pub fn run_evaluation(cfg: &RunConfig) -> Result<EvalReport> {
    cfg.validate()?;
    let paths = cfg.paths();
    let train = Dataset::from_csv(
        &split_paths(&cfg.data_dir, &cfg.coords, Split::Train),
        &cfg.schema,
        cfg.hyperparams.window_length,
        cfg.device,
    )?;
    let test = Dataset::from_csv(
        &split_paths(&cfg.data_dir, &cfg.coords, Split::Test),
        &cfg.schema,
        cfg.eval.window_length,
        cfg.device,
    )?;
    let mut model = checkpoint::load(paths.checkpoint(), cfg.device)?;

    let noise = NoiseSource::from_option(cfg.eval.seed);
    let mut evaluator = Evaluator::new(cfg.eval.clone(), train.target_stats(), noise)?;
    let report = evaluator.evaluate(&mut model, &test)?;
    for line in format_test_losses(report.mse, report.nll).lines() {
        log::info!("{line}");
    }
    report.write_summary(paths.test_report())?;
    report.write_forecasts(paths.forecasts(), &test.regions().join("+"))?;
    Ok(report)
}
