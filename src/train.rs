//! Training loop: one window at a time, validation after every epoch and a
//! checkpoint whenever the validation loss improves.

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{BestLoss, CheckpointSink, FileCheckpoint};
use crate::config::{NonFinitePolicy, RunConfig, TrainConfig};
use crate::data::{split_paths, Dataset, Split, Window};
use crate::error::{ForecastError, NumericalError, Result};
use crate::logging::{Callback, CallbackSignal, EarlyStopping, EpochRecord, Logger, MetricRecord};
use crate::math::{self, Matrix};
use crate::models::LatentOde;
use crate::optim::{self, GaussianNll, Loss, Optimizer};
use crate::rng::NoiseSource;
use crate::util::logging::{
    format_checkpoint_saved, format_epoch_loss, format_skipped_window, format_window_loss,
    log_total_ops,
};

/// Per-epoch averages of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainHistory {
    pub fn train_losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.train_loss).collect()
    }

    pub fn valid_losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.valid_loss).collect()
    }

    /// Epochs at which a checkpoint was written.
    pub fn saved_epochs(&self) -> Vec<usize> {
        self.epochs.iter().filter(|e| e.checkpointed).map(|e| e.epoch).collect()
    }

    pub fn best_valid_loss(&self) -> Option<f32> {
        self.epochs
            .iter()
            .map(|e| e.valid_loss)
            .filter(|l| l.is_finite())
            .fold(None, |acc, l| Some(acc.map_or(l, |a: f32| a.min(l))))
    }
}

/// Running mean over windows with a finite loss.
#[derive(Default)]
struct EpochLoss {
    sum: f64,
    count: usize,
    skipped: usize,
    last_error: Option<ForecastError>,
}

impl EpochLoss {
    fn mean(self, epoch: usize, split: &str) -> Result<(f32, usize)> {
        if self.count == 0 {
            return Err(self.last_error.unwrap_or_else(|| {
                ForecastError::data(format!("epoch {epoch}: no {split} window produced a loss"))
            }));
        }
        Ok(((self.sum / self.count as f64) as f32, self.skipped))
    }
}

/// Gradient of `loss` with respect to a `[T, output_dims]` prediction matrix
/// whose first column is scored against `targets`.
fn prediction_grad(
    loss: &dyn Loss,
    predictions: &Matrix,
    series: &[f32],
    targets: &[f32],
) -> Matrix {
    let g = loss.grad(series, targets);
    let mut grad = Matrix::zeros(predictions.rows, predictions.cols);
    for (r, v) in g.into_iter().enumerate() {
        grad.set(r, 0, v);
    }
    grad
}

pub struct Trainer {
    config: TrainConfig,
    optimizer: Box<dyn Optimizer>,
    loss: GaussianNll,
    noise: NoiseSource,
    callbacks: Vec<Box<dyn Callback>>,
    logger: Option<Logger>,
    best: BestLoss,
    step: usize,
}

impl Trainer {
    /// Optimizer and loss follow the model's hyperparameters; randomness
    /// comes from `noise`.
    pub fn new(model: &LatentOde, config: TrainConfig, noise: NoiseSource) -> Result<Self> {
        let hp = model.hyperparams();
        let optimizer = optim::build(config.optimizer, hp.lr, config.weight_decay);
        let loss = GaussianNll::new(hp.std)?;
        let mut callbacks: Vec<Box<dyn Callback>> = Vec::new();
        if let Some(patience) = config.early_stopping_patience {
            callbacks.push(Box::new(EarlyStopping::new(patience)));
        }
        Ok(Self {
            config,
            optimizer,
            loss,
            noise,
            callbacks,
            logger: None,
            best: BestLoss::new(),
            step: 0,
        })
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn add_callback(&mut self, cb: Box<dyn Callback>) {
        self.callbacks.push(cb);
    }

    fn note(&mut self, msg: &str) {
        match self.logger.as_mut() {
            Some(l) => l.note(msg),
            None => log::info!("{msg}"),
        }
    }

    fn record(&mut self, rec: &MetricRecord) {
        if let Some(l) = self.logger.as_mut() {
            l.log(rec);
        }
    }

    /// One optimisation step on a single window. Returns the window loss.
    pub fn train_window(
        &mut self,
        model: &mut LatentOde,
        data: &Dataset,
        window: &Window<'_>,
    ) -> Result<f32> {
        model.zero_grad();
        let input = window.encoder_input();
        let fwd = model.forward(data, &input, window.times, &mut self.noise)?;
        let series = fwd.series();
        let loss = self.loss.loss(&series, window.targets);
        if !loss.is_finite() {
            return Err(NumericalError::NonFiniteLoss {
                window: window.index,
                value: loss,
            }
            .into());
        }
        let grad = prediction_grad(&self.loss, &fwd.predictions, &series, window.targets);
        model.backward(data, &fwd, &grad)?;
        let mut params = model.parameters();
        self.optimizer.step(&mut params);
        Ok(loss)
    }

    /// Loss of one validation window: the encoder sees the leading context
    /// rows, the prediction covers the whole window.
    pub fn valid_window(
        &mut self,
        model: &mut LatentOde,
        data: &Dataset,
        window: &Window<'_>,
    ) -> Result<f32> {
        let input = window.context(self.config.valid_context_steps);
        let predictions = model.predict(data, &input, window.times, &mut self.noise)?;
        let series: Vec<f32> = (0..predictions.rows).map(|r| predictions.get(r, 0)).collect();
        let loss = self.loss.loss(&series, window.targets);
        if !loss.is_finite() {
            return Err(NumericalError::NonFiniteLoss {
                window: window.index,
                value: loss,
            }
            .into());
        }
        Ok(loss)
    }

    fn absorb(
        &mut self,
        acc: &mut EpochLoss,
        epoch: usize,
        window: usize,
        res: Result<f32>,
    ) -> Result<()> {
        match res {
            Ok(l) => {
                acc.sum += f64::from(l);
                acc.count += 1;
                Ok(())
            }
            Err(e) if e.is_numerical() && self.config.non_finite == NonFinitePolicy::Skip => {
                let msg = format_skipped_window(epoch, window, &e.to_string());
                match self.logger.as_mut() {
                    Some(l) => l.warn(&msg),
                    None => log::warn!("{msg}"),
                }
                acc.skipped += 1;
                acc.last_error = Some(e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn progress(&self, len: usize) -> ProgressBar {
        if !self.config.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}") {
            pb.set_style(style);
        }
        pb
    }

    /// Train over every window of `data` once. Returns the mean finite loss,
    /// the number of skipped windows and whether a callback asked to stop.
    pub fn train_epoch(
        &mut self,
        model: &mut LatentOde,
        data: &Dataset,
        epoch: usize,
    ) -> Result<(f32, usize, bool)> {
        model.train();
        let pb = self.progress(data.num_windows());
        let mut acc = EpochLoss::default();
        let mut stop = false;
        let num_windows = data.num_windows();
        for window in data.windows() {
            let res = self.train_window(model, data, &window);
            if let Ok(l) = res {
                pb.set_message(format_window_loss(epoch, window.index, num_windows, l));
                let rec = MetricRecord {
                    epoch,
                    step: self.step,
                    loss: l,
                    lr: self.optimizer.lr(),
                    kind: "train",
                };
                self.record(&rec);
                for cb in self.callbacks.iter_mut() {
                    if cb.on_window_end(&rec) == CallbackSignal::Stop {
                        stop = true;
                    }
                }
            }
            self.absorb(&mut acc, epoch, window.index, res)?;
            self.step += 1;
            pb.inc(1);
        }
        pb.finish_and_clear();
        let (mean, skipped) = acc.mean(epoch, "training")?;
        Ok((mean, skipped, stop))
    }

    /// Mean loss over the validation windows, computed in evaluation mode.
    pub fn validate(
        &mut self,
        model: &mut LatentOde,
        data: &Dataset,
        epoch: usize,
    ) -> Result<(f32, usize)> {
        let was_training = model.is_training();
        model.eval();
        let mut acc = EpochLoss::default();
        let mut outcome = Ok(());
        for window in data.windows() {
            let res = self.valid_window(model, data, &window);
            outcome = self.absorb(&mut acc, epoch, window.index, res);
            if outcome.is_err() {
                break;
            }
        }
        if was_training {
            model.train();
        }
        outcome?;
        let (mean, skipped) = acc.mean(epoch, "validation")?;
        self.record(&MetricRecord {
            epoch,
            step: self.step,
            loss: mean,
            lr: self.optimizer.lr(),
            kind: "valid",
        });
        Ok((mean, skipped))
    }

    /// Train for the model's configured number of epochs, validating after
    /// each and handing improving models to `sink`.
    pub fn fit(
        &mut self,
        model: &mut LatentOde,
        train: &Dataset,
        valid: &Dataset,
        sink: &mut dyn CheckpointSink,
    ) -> Result<TrainHistory> {
        let epochs = model.hyperparams().num_epochs;
        let mut history = TrainHistory::default();
        for cb in self.callbacks.iter_mut() {
            cb.on_train_begin();
        }
        for epoch in 0..epochs {
            for cb in self.callbacks.iter_mut() {
                cb.on_epoch_begin(epoch);
            }
            let (train_loss, train_skipped, mut stop) = self.train_epoch(model, train, epoch)?;
            self.note(&format_epoch_loss(epoch, "training", train_loss));
            let (valid_loss, valid_skipped) = self.validate(model, valid, epoch)?;
            self.note(&format_epoch_loss(epoch, "validation", valid_loss));

            let checkpointed = self.best.observe(valid_loss);
            if checkpointed {
                self.note(&format_checkpoint_saved(epoch, valid_loss));
                sink.save(epoch, model)?;
            }
            let record = EpochRecord {
                epoch,
                train_loss,
                valid_loss,
                skipped_windows: train_skipped + valid_skipped,
                checkpointed,
            };
            for cb in self.callbacks.iter_mut() {
                if cb.on_epoch_end(&record) == CallbackSignal::Stop {
                    stop = true;
                }
            }
            history.epochs.push(record);
            if stop {
                log::info!("stopping after epoch {epoch}");
                break;
            }
        }
        for cb in self.callbacks.iter_mut() {
            cb.on_train_end();
        }
        log_total_ops(math::matrix_ops_count());
        Ok(history)
    }
}

/// Load the train and validation splits named by `cfg`, build a fresh model
/// and train it, checkpointing under the job's results directory.
pub fn run_training(cfg: &RunConfig) -> Result<(LatentOde, TrainHistory)> {
    cfg.validate()?;
    let paths = cfg.paths();
    paths.create_dirs()?;
    let hp = &cfg.hyperparams;
    let train = Dataset::from_csv(
        &split_paths(&cfg.data_dir, &cfg.coords, Split::Train),
        &cfg.schema,
        hp.window_length,
        cfg.device,
    )?;
    let valid = Dataset::from_csv(
        &split_paths(&cfg.data_dir, &cfg.coords, Split::Valid),
        &cfg.schema,
        cfg.train.valid_window_length,
        cfg.device,
    )?;

    let mut noise = NoiseSource::from_option(cfg.train.seed);
    let mut model = LatentOde::new(hp.clone(), cfg.device, &mut noise)?;
    log::info!("job {}: {} parameters", paths.job_id, model.num_params());
    let logger = Logger::new(paths.metrics_dir(), Some(&paths.train_log()))?;
    let mut trainer = Trainer::new(&model, cfg.train.clone(), noise)?.with_logger(logger);
    let mut sink = FileCheckpoint::new(paths.checkpoint());
    let history = trainer.fit(&mut model, &train, &valid, &mut sink)?;
    Ok((model, history))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, valid_loss: f32, checkpointed: bool) -> EpochRecord {
        EpochRecord {
            epoch,
            train_loss: 1.0,
            valid_loss,
            skipped_windows: 0,
            checkpointed,
        }
    }

    #[test]
    fn history_reports_saved_epochs_and_best_loss() {
        let history = TrainHistory {
            epochs: vec![record(0, 0.5, true), record(1, f32::NAN, false), record(2, 0.4, true)],
        };
        assert_eq!(history.saved_epochs(), vec![0, 2]);
        assert_eq!(history.best_valid_loss(), Some(0.4));
    }

    #[test]
    fn epoch_without_finite_loss_returns_last_error() {
        let acc = EpochLoss {
            skipped: 2,
            last_error: Some(NumericalError::NonFiniteLoss { window: 1, value: f32::NAN }.into()),
            ..Default::default()
        };
        let err = acc.mean(0, "training").unwrap_err();
        assert!(err.is_numerical());
    }

    #[test]
    fn prediction_grad_fills_first_column() {
        let loss = GaussianNll::new(1.0).unwrap();
        let preds = Matrix::from_vec(2, 2, vec![1.0, 9.0, 2.0, 9.0]);
        let g = prediction_grad(&loss, &preds, &[1.0, 2.0], &[0.0, 0.0]);
        assert_eq!(g.data, vec![0.5, 0.0, 1.0, 0.0]);
    }
}
