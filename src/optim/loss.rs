use statrs::distribution::{Continuous, Normal};

use crate::error::{ForecastError, Result};

/// Scalar loss over a prediction sequence with its gradient.
pub trait Loss {
    fn loss(&self, pred: &[f32], target: &[f32]) -> f32;

    /// Gradient of [`Loss::loss`] with respect to `pred`.
    fn grad(&self, pred: &[f32], target: &[f32]) -> Vec<f32>;
}

/// Mean squared error loss.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredError;

impl MeanSquaredError {
    pub fn new() -> Self {
        Self
    }
}

impl Loss for MeanSquaredError {
    fn loss(&self, pred: &[f32], target: &[f32]) -> f32 {
        let len = pred.len().min(target.len());
        if len == 0 {
            return 0.0;
        }
        let mut sum = 0.0f64;
        for i in 0..len {
            let d = f64::from(pred[i] - target[i]);
            sum += d * d;
        }
        (sum / len as f64) as f32
    }

    fn grad(&self, pred: &[f32], target: &[f32]) -> Vec<f32> {
        let len = pred.len().min(target.len()).max(1) as f32;
        pred.iter().zip(target).map(|(p, t)| 2.0 * (p - t) / len).collect()
    }
}

/// Negative mean log-density of the targets under `Normal(pred, std)`.
#[derive(Debug, Clone)]
pub struct GaussianNll {
    std: f32,
    residual: Normal,
}

impl GaussianNll {
    pub fn new(std: f32) -> Result<Self> {
        let residual = Normal::new(0.0, f64::from(std)).map_err(|e| {
            ForecastError::config("loss", format!("invalid observation std {std}: {e}"))
        })?;
        Ok(Self { std, residual })
    }

    pub fn std(&self) -> f32 {
        self.std
    }
}

impl Loss for GaussianNll {
    fn loss(&self, pred: &[f32], target: &[f32]) -> f32 {
        let len = pred.len().min(target.len());
        if len == 0 {
            return 0.0;
        }
        let sum: f64 = pred
            .iter()
            .zip(target)
            .map(|(&mu, &y)| self.residual.ln_pdf(f64::from(y) - f64::from(mu)))
            .sum();
        (-sum / len as f64) as f32
    }

    fn grad(&self, pred: &[f32], target: &[f32]) -> Vec<f32> {
        let len = pred.len().min(target.len()).max(1) as f32;
        let var = self.std * self.std;
        pred.iter().zip(target).map(|(mu, y)| (mu - y) / (var * len)).collect()
    }
}
