use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use csv::Writer;
use serde::{Deserialize, Serialize};

/// Append-only metric sink writing every record as JSON lines and CSV, with
/// an optional plain text log of human readable messages.
pub struct Logger {
    json: File,
    csv: Writer<File>,
    text: Option<File>,
}

/// Per-window training metric.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRecord {
    pub epoch: usize,
    pub step: usize,
    pub loss: f32,
    pub lr: f32,
    pub kind: &'static str,
}

/// Per-epoch summary kept in the training history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f32,
    pub valid_loss: f32,
    /// Windows excluded from the averages because of a non-finite loss.
    pub skipped_windows: usize,
    pub checkpointed: bool,
}

fn append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Logger {
    /// Open `metrics.jsonl` and `metrics.csv` under `dir` (created if
    /// missing) and, when given, the text log at `text_log`.
    pub fn new(dir: impl Into<PathBuf>, text_log: Option<&Path>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let json = append(&dir.join("metrics.jsonl"))?;
        let csv_file = append(&dir.join("metrics.csv"))?;
        let csv = csv::WriterBuilder::new().has_headers(false).from_writer(csv_file);
        let text = match text_log {
            Some(p) => {
                if let Some(parent) = p.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Some(append(p)?)
            }
            None => None,
        };
        Ok(Logger { json, csv, text })
    }

    pub fn log<T: Serialize>(&mut self, metrics: &T) {
        if let Ok(line) = serde_json::to_string(metrics) {
            let _ = writeln!(self.json, "{}", line);
        }
        let _ = self.csv.serialize(metrics);
        let _ = self.csv.flush();
    }

    /// Emit `msg` at info level and append it to the text log.
    pub fn note(&mut self, msg: &str) {
        log::info!("{msg}");
        if let Some(f) = self.text.as_mut() {
            let _ = writeln!(f, "{msg}");
        }
    }

    /// Emit `msg` at warn level and append it to the text log.
    pub fn warn(&mut self, msg: &str) {
        log::warn!("{msg}");
        if let Some(f) = self.text.as_mut() {
            let _ = writeln!(f, "{msg}");
        }
    }
}

/// Signals returned by callbacks to control training flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackSignal {
    /// Continue training as normal.
    Continue,
    /// Stop training early.
    Stop,
}

/// Trait for hooking into various stages of the training loop.
pub trait Callback {
    /// Called once before training starts.
    fn on_train_begin(&mut self) {}

    /// Called at the beginning of each epoch.
    fn on_epoch_begin(&mut self, _epoch: usize) {}

    /// Called after each training window. Returning `Stop` will end training
    /// once the epoch is complete.
    fn on_window_end(&mut self, _metrics: &MetricRecord) -> CallbackSignal {
        CallbackSignal::Continue
    }

    /// Called after validation. Returning `Stop` will end training.
    fn on_epoch_end(&mut self, _record: &EpochRecord) -> CallbackSignal {
        CallbackSignal::Continue
    }

    /// Called once after training ends.
    fn on_train_end(&mut self) {}
}

/// Stop training when the validation loss fails to improve.
pub struct EarlyStopping {
    patience: usize,
    best: Option<f32>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            wait: 0,
        }
    }
}

impl Callback for EarlyStopping {
    fn on_epoch_end(&mut self, record: &EpochRecord) -> CallbackSignal {
        let current = record.valid_loss;
        if self.best.map_or(true, |b| current < b) {
            self.best = Some(current);
            self.wait = 0;
        } else {
            self.wait += 1;
            if self.wait >= self.patience {
                return CallbackSignal::Stop;
            }
        }
        CallbackSignal::Continue
    }
}
