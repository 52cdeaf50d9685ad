//! Whole-model checkpoints.
//!
//! A checkpoint is a single `bincode` blob holding the hyperparameters, the
//! device tag and every weight of a [`LatentOde`]. Optimizer moments are not
//! part of it.

use std::fs;
use std::path::{Path, PathBuf};

use crate::device::Device;
use crate::error::{ForecastError, Result};
use crate::models::LatentOde;
use crate::rng::NoiseSource;

/// Write `model` to `path`, creating parent directories as needed.
pub fn save(model: &LatentOde, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = bincode::serialize(model)?;
    fs::write(path, bytes)?;
    log::info!("Saved checkpoint to {}", path.display());
    Ok(())
}

/// Read a model saved with [`save`] and relocate it to `device`.
///
/// The loaded model starts in evaluation mode.
pub fn load(path: impl AsRef<Path>, device: Device) -> Result<LatentOde> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ForecastError::data(format!("checkpoint {} does not exist", path.display()))
        } else {
            e.into()
        }
    })?;
    let mut model: LatentOde = bincode::deserialize(&bytes)?;
    model.hyperparams().validate()?;
    check_shapes(&mut model, path)?;
    log::info!("Loaded checkpoint from {}", path.display());
    Ok(model.to_device(device))
}

/// Layer shapes must be the ones the stored hyperparameters build.
fn check_shapes(model: &mut LatentOde, path: &Path) -> Result<()> {
    let mut reference = LatentOde::new(
        model.hyperparams().clone(),
        model.device(),
        &mut NoiseSource::seeded(0),
    )?;
    let shapes = |m: &mut LatentOde| -> Vec<(usize, usize)> {
        m.parameters()
            .iter()
            .map(|l| (l.in_dim(), l.out_dim()))
            .collect()
    };
    let (expected, found) = (shapes(&mut reference), shapes(model));
    if expected != found {
        return Err(ForecastError::data(format!(
            "checkpoint {} has layer shapes {found:?}, its hyperparameters build {expected:?}",
            path.display()
        )));
    }
    Ok(())
}

/// Destination of the models selected during training.
pub trait CheckpointSink {
    fn save(&mut self, epoch: usize, model: &LatentOde) -> Result<()>;
}

/// Overwrites one file per job with the latest selected model.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointSink for FileCheckpoint {
    fn save(&mut self, _epoch: usize, model: &LatentOde) -> Result<()> {
        save(model, &self.path)
    }
}

/// Keeps saved epochs in memory. Useful for tests and notebooks.
#[derive(Default)]
pub struct MemoryCheckpoint {
    pub saved: Vec<(usize, LatentOde)>,
}

impl CheckpointSink for MemoryCheckpoint {
    fn save(&mut self, epoch: usize, model: &LatentOde) -> Result<()> {
        self.saved.push((epoch, model.clone()));
        Ok(())
    }
}

/// Tracks the best validation loss seen so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestLoss {
    best: Option<f32>,
}

impl BestLoss {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `loss`; true when it strictly improves on every earlier value.
    /// The first finite loss always counts as an improvement.
    pub fn observe(&mut self, loss: f32) -> bool {
        if !loss.is_finite() {
            return false;
        }
        let improved = self.best.map_or(true, |b| loss < b);
        if improved {
            self.best = Some(loss);
        }
        improved
    }

    pub fn best(&self) -> Option<f32> {
        self.best
    }
}
