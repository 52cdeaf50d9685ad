use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::data::SeriesSchema;
use crate::device::Device;
use crate::error::{ForecastError, Result};
use crate::ode::{OdeOptions, Sensitivity, Solver};

/// Model and run hyperparameters. Immutable once a model is built from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    /// Region identifier, the first component of the job id.
    pub region: String,
    pub solver: Solver,
    pub lr: f32,
    pub dropout_rate: f32,
    /// Covariate channels plus the target channel.
    pub input_dims: usize,
    pub output_dims: usize,
    pub encoder_fc_dims: Vec<usize>,
    pub hidden_dims: usize,
    pub odefunc_fc_dims: Vec<usize>,
    pub decoder_fc_dims: Vec<usize>,
    /// Scale of the Normal observation model.
    pub std: f32,
    pub window_length: usize,
    pub num_epochs: usize,
    pub rtol: f32,
    pub atol: f32,
    pub sensitivity: Sensitivity,
    pub step_size: Option<f32>,
    pub max_num_steps: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            region: "cr".to_string(),
            solver: Solver::Euler,
            lr: 3e-4,
            dropout_rate: 0.5,
            input_dims: 4,
            output_dims: 1,
            encoder_fc_dims: vec![8, 16, 8],
            hidden_dims: 4,
            odefunc_fc_dims: vec![64, 64],
            decoder_fc_dims: vec![8, 16, 8],
            std: 0.1,
            window_length: 128,
            num_epochs: 1,
            rtol: 1e-4,
            atol: 1e-6,
            sensitivity: Sensitivity::Backprop,
            step_size: None,
            max_num_steps: 10_000,
        }
    }
}

fn dims(widths: &[usize]) -> String {
    widths.iter().map(usize::to_string).collect::<Vec<_>>().join("-")
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(ForecastError::config("hyperparameters", message));
        if self.region.is_empty() || self.region.contains(['/', '\\']) {
            return fail(format!("invalid region '{}'", self.region));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return fail(format!("lr must be positive, got {}", self.lr));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return fail(format!("dropout_rate must be in [0, 1), got {}", self.dropout_rate));
        }
        if self.input_dims < 1 || self.output_dims == 0 || self.hidden_dims == 0 {
            return fail("input_dims, output_dims and hidden_dims must be positive".to_string());
        }
        for (name, widths) in [
            ("encoder_fc_dims", &self.encoder_fc_dims),
            ("odefunc_fc_dims", &self.odefunc_fc_dims),
            ("decoder_fc_dims", &self.decoder_fc_dims),
        ] {
            if widths.contains(&0) {
                return fail(format!("{name} contains a zero width: {widths:?}"));
            }
        }
        if !(self.std.is_finite() && self.std > 0.0) {
            return fail(format!("std must be positive, got {}", self.std));
        }
        if self.window_length == 0 || self.num_epochs == 0 {
            return fail("window_length and num_epochs must be positive".to_string());
        }
        if !(self.rtol > 0.0 && self.atol > 0.0) {
            return fail(format!(
                "tolerances must be positive (rtol={}, atol={})",
                self.rtol, self.atol
            ));
        }
        if let Some(h) = self.step_size {
            if !(h.is_finite() && h > 0.0) {
                return fail(format!("step_size must be positive, got {h}"));
            }
        }
        if self.max_num_steps == 0 {
            return fail("max_num_steps must be positive".to_string());
        }
        Ok(())
    }

    /// Number of covariate channels the model expects.
    pub fn covariate_dims(&self) -> usize {
        self.input_dims.saturating_sub(1)
    }

    pub fn ode_options(&self) -> OdeOptions {
        OdeOptions {
            solver: self.solver,
            sensitivity: self.sensitivity,
            rtol: self.rtol,
            atol: self.atol,
            step_size: self.step_size,
            max_num_steps: self.max_num_steps,
        }
    }

    /// Deterministic key for checkpoint, log and report file names.
    ///
    /// Floats use the shortest representation that parses back to the same
    /// value. Fields left at their defaults beyond the classic set add no
    /// suffix.
    pub fn job_id(&self) -> String {
        let mut id = format!(
            "{}_{}_lr{}_enc{}_hidden{}_ode{}_dec{}_window{}_epochs{}_rtol{}_atol{}",
            self.region,
            self.solver,
            self.lr,
            dims(&self.encoder_fc_dims),
            self.hidden_dims,
            dims(&self.odefunc_fc_dims),
            dims(&self.decoder_fc_dims),
            self.window_length,
            self.num_epochs,
            self.rtol,
            self.atol,
        );
        let d = Self::default();
        if self.dropout_rate != d.dropout_rate {
            id.push_str(&format!("_drop{}", self.dropout_rate));
        }
        if self.std != d.std {
            id.push_str(&format!("_std{}", self.std));
        }
        if self.input_dims != d.input_dims || self.output_dims != d.output_dims {
            id.push_str(&format!("_io{}-{}", self.input_dims, self.output_dims));
        }
        if self.sensitivity != d.sensitivity {
            id.push_str(&format!("_{}", self.sensitivity));
        }
        if let Some(h) = self.step_size {
            id.push_str(&format!("_step{h}"));
        }
        if self.max_num_steps != d.max_num_steps {
            id.push_str(&format!("_maxsteps{}", self.max_num_steps));
        }
        id
    }
}

/// What to do with a window whose loss is not finite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonFinitePolicy {
    /// Exclude the window from the averages and log its index.
    #[default]
    Skip,
    /// Abort the run with a numerical error.
    Abort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Window length of the validation dataset.
    pub valid_window_length: usize,
    /// Leading rows of each validation window given to the encoder.
    pub valid_context_steps: usize,
    pub optimizer: OptimizerKind,
    pub weight_decay: f32,
    pub non_finite: NonFinitePolicy,
    /// Seed for the encoder noise and dropout masks; `None` draws from
    /// entropy (or the `SEED` environment variable in the binaries).
    pub seed: Option<u64>,
    /// Stop after this many epochs without validation improvement.
    pub early_stopping_patience: Option<usize>,
    pub progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            valid_window_length: 250,
            valid_context_steps: 100,
            optimizer: OptimizerKind::Adam,
            weight_decay: 0.0,
            non_finite: NonFinitePolicy::Skip,
            seed: None,
            early_stopping_patience: None,
            progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Window length of the evaluation dataset.
    pub window_length: usize,
    /// Leading rows eligible as encoder input; `None` means the whole window.
    pub context_steps: Option<usize>,
    /// Fraction of eligible rows dropped at random, in `[0, 1)`.
    pub drop_rate: f32,
    /// Scale of the Normal used for the reported likelihood.
    pub std: f32,
    pub seed: Option<u64>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            window_length: 100,
            context_steps: None,
            drop_rate: 0.0,
            std: 0.1,
            seed: None,
        }
    }
}

impl EvalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_length == 0 {
            return Err(ForecastError::config("evaluation", "window_length must be positive"));
        }
        if !(0.0..1.0).contains(&self.drop_rate) {
            return Err(ForecastError::config(
                "evaluation",
                format!("drop_rate must be in [0, 1), got {}", self.drop_rate),
            ));
        }
        if !(self.std.is_finite() && self.std > 0.0) {
            return Err(ForecastError::config(
                "evaluation",
                format!("std must be positive, got {}", self.std),
            ));
        }
        if self.context_steps == Some(0) {
            return Err(ForecastError::config("evaluation", "context_steps must be positive"));
        }
        Ok(())
    }
}

/// Full run description read from a TOML or JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
    /// Coordinate keys whose files make up each split.
    pub coords: Vec<String>,
    pub schema: SeriesSchema,
    pub device: Device,
    pub hyperparams: Hyperparameters,
    pub train: TrainConfig,
    pub eval: EvalConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            results_dir: PathBuf::from("results"),
            coords: vec!["-83.812_10.39".to_string()],
            schema: SeriesSchema::default(),
            device: Device::Cpu,
            hyperparams: Hyperparameters::default(),
            train: TrainConfig::default(),
            eval: EvalConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from the given path. Supports TOML or JSON based on
    /// the file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let parse_err = |message: String| ForecastError::ConfigParse {
            path: path.display().to_string(),
            message,
        };
        let cfg: Self = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?
        } else {
            toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.hyperparams.validate()?;
        self.eval.validate()?;
        if self.coords.is_empty() {
            return Err(ForecastError::config("run", "at least one coordinate key is required"));
        }
        if self.train.valid_context_steps == 0 || self.train.valid_window_length == 0 {
            return Err(ForecastError::config(
                "training",
                "validation window and context must be positive",
            ));
        }
        Ok(())
    }

    pub fn paths(&self) -> RunPaths {
        RunPaths::new(&self.results_dir, self.hyperparams.job_id())
    }
}

/// Artifact locations of one job under a results directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub root: PathBuf,
    pub job_id: String,
}

impl RunPaths {
    pub fn new(root: impl Into<PathBuf>, job_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            job_id: job_id.into(),
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn checkpoint(&self) -> PathBuf {
        self.models_dir().join(format!("{}.bin", self.job_id))
    }

    /// Append-only human readable training log.
    pub fn train_log(&self) -> PathBuf {
        self.logs_dir().join(format!("{}.txt", self.job_id))
    }

    /// Directory receiving the JSONL/CSV metric records.
    pub fn metrics_dir(&self) -> PathBuf {
        self.logs_dir().join(&self.job_id)
    }

    pub fn test_report(&self) -> PathBuf {
        self.root.join(format!("{}_test_loss.txt", self.job_id))
    }

    pub fn forecasts(&self) -> PathBuf {
        self.root.join("forecasts").join(format!("{}.csv", self.job_id))
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in [self.models_dir(), self.logs_dir(), self.metrics_dir()] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
