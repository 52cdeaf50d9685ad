//! Error types shared across the crate.
//!
//! Configuration, data and placement errors are fatal preconditions raised at
//! construction or at the start of a forward call. Numerical errors come out of
//! the integrator and are surfaced as a distinct variant so the trainer can
//! decide between skipping a window and aborting the epoch.

use thiserror::Error;

use crate::device::Device;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Failures raised while integrating the latent dynamics.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumericalError {
    /// A state or derivative component became NaN or infinite.
    #[error("non-finite value in {stage} at t={t}")]
    NonFinite { stage: &'static str, t: f32 },

    /// The adaptive controller shrank the step below what `f32` can resolve.
    #[error("step size underflow at t={t} (h={h:e})")]
    StepSizeUnderflow { t: f32, h: f32 },

    /// The adaptive controller exceeded its step budget.
    #[error("exceeded {max_steps} integration steps before reaching t={target}")]
    TooManySteps { max_steps: usize, target: f32 },

    /// Requested output times are not strictly monotonic.
    #[error("output times must be strictly monotonic (index {index})")]
    NonMonotonicTimes { index: usize },

    /// The loss of a window was NaN or infinite.
    #[error("non-finite loss {value} in window {window}")]
    NonFiniteLoss { window: usize, value: f32 },
}

/// Unified error type for the forecasting pipeline.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Malformed hyperparameters or mismatched component dimensions.
    #[error("configuration error in {component}: {message}")]
    Config {
        component: &'static str,
        message: String,
    },

    /// Missing or unusable input series.
    #[error("data error: {message}")]
    Data { message: String },

    /// Integration or loss evaluation failed.
    #[error("numerical error: {0}")]
    Numerical(#[from] NumericalError),

    /// Data and parameters live on different compute contexts.
    #[error("placement error: {what} is on {found}, expected {expected}")]
    Placement {
        what: &'static str,
        expected: Device,
        found: Device,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Checkpoint (de)serialisation failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] bincode::Error),

    /// A configuration file could not be parsed.
    #[error("cannot parse config {path}: {message}")]
    ConfigParse { path: String, message: String },
}

impl ForecastError {
    pub fn config(component: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            component,
            message: message.into(),
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// True for failures the trainer may skip on a per-window basis.
    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::Numerical(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_component() {
        let err = ForecastError::config("encoder", "input_dims must be at least 2");
        assert_eq!(
            err.to_string(),
            "configuration error in encoder: input_dims must be at least 2"
        );

        let err = ForecastError::Placement {
            what: "dataset",
            expected: Device::Cpu,
            found: Device::Context(1),
        };
        assert_eq!(err.to_string(), "placement error: dataset is on ctx:1, expected cpu");

        let err: ForecastError = NumericalError::NonFiniteLoss {
            window: 3,
            value: f32::NAN,
        }
        .into();
        assert!(err.is_numerical());
        assert!(err.to_string().contains("window 3"));
    }
}
