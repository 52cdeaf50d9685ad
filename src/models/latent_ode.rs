use serde::{Deserialize, Serialize};

use super::{Decoder, Encoder, VectorField};
use crate::config::Hyperparameters;
use crate::data::{Dataset, EncoderInput};
use crate::device::{ensure_same, Device};
use crate::error::{ForecastError, NumericalError, Result};
use crate::layers::LinearT;
use crate::math::Matrix;
use crate::ode::{odeint, Solution};
use crate::rng::NoiseSource;

/// Result of [`LatentOde::forward`].
#[derive(Clone, Debug)]
pub struct Forward {
    /// `[num_times, output_dims]`
    pub predictions: Matrix,
    /// Latent trajectory at the zero-based request times.
    pub solution: Solution,
    /// First requested timestamp, subtracted before integration.
    pub start_time: f32,
    /// Relative times at which the vector field was evaluated.
    pub queried_times: Vec<f32>,
}

impl Forward {
    /// Predictions of the first output channel, one per requested time.
    pub fn series(&self) -> Vec<f32> {
        (0..self.predictions.rows).map(|r| self.predictions.get(r, 0)).collect()
    }
}

/// Encoder, vector field and decoder composed into a latent ODE forecaster.
///
/// The model is serialisable as a whole; hyperparameters and the device tag
/// travel with the weights.
#[derive(Clone, Serialize, Deserialize)]
pub struct LatentOde {
    hyperparams: Hyperparameters,
    device: Device,
    encoder: Encoder,
    field: VectorField,
    decoder: Decoder,
    #[serde(skip)]
    training: bool,
}

impl LatentOde {
    /// Build a model with freshly initialised weights drawn from `noise`.
    pub fn new(
        hyperparams: Hyperparameters,
        device: Device,
        noise: &mut NoiseSource,
    ) -> Result<Self> {
        hyperparams.validate()?;
        let hp = &hyperparams;
        let rng = noise.rng();
        let encoder = Encoder::new(
            hp.input_dims,
            &hp.encoder_fc_dims,
            hp.hidden_dims,
            hp.dropout_rate,
            rng,
        );
        let field = VectorField::new(hp.hidden_dims, hp.covariate_dims(), &hp.odefunc_fc_dims, rng);
        let decoder = Decoder::new(hp.hidden_dims, &hp.decoder_fc_dims, hp.output_dims, rng);
        if encoder.hidden_dim() != field.hidden_dim() || decoder.output_dim() != hp.output_dims {
            return Err(ForecastError::config("model", "component dimensions do not line up"));
        }
        Ok(Self {
            hyperparams,
            device,
            encoder,
            field,
            decoder,
            training: true,
        })
    }

    pub fn hyperparams(&self) -> &Hyperparameters {
        &self.hyperparams
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Relocate the whole model (every submodule) to `device`.
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    fn check_inputs(&self, data: &Dataset, input: &EncoderInput, times: &[f32]) -> Result<()> {
        ensure_same("dataset", self.device, data.device())?;
        let cov = self.hyperparams.covariate_dims();
        if data.covariate_dim() != cov {
            return Err(ForecastError::config(
                "model",
                format!(
                    "dataset has {} covariates but input_dims={} expects {cov}",
                    data.covariate_dim(),
                    self.hyperparams.input_dims
                ),
            ));
        }
        if input.covariates.cols != cov || input.covariates.rows != input.rows() {
            return Err(ForecastError::config(
                "encoder",
                format!(
                    "input is {}x{} with {} targets, expected {cov} covariate columns",
                    input.covariates.rows,
                    input.covariates.cols,
                    input.rows()
                ),
            ));
        }
        if input.rows() == 0 {
            return Err(ForecastError::data("encoder input has no rows"));
        }
        if times.is_empty() {
            return Err(ForecastError::data("no prediction times requested"));
        }
        if let Some(i) = (1..times.len()).find(|&i| times[i] <= times[i - 1]) {
            return Err(ForecastError::data(format!(
                "prediction times must be strictly increasing (index {i})"
            )));
        }
        Ok(())
    }

    /// Encode `input`, integrate the latent state through `times` and decode
    /// one prediction per time.
    ///
    /// The encoder reads the rows in reverse so its final state describes the
    /// first timestamp with the whole input in view. Its initial state is a
    /// fresh standard normal draw from `noise`. `input` may hold fewer rows
    /// than `times` (extrapolation). Covariates for the dynamics are read
    /// from `data` at the absolute times.
    pub fn forward(
        &mut self,
        data: &Dataset,
        input: &EncoderInput,
        times: &[f32],
        noise: &mut NoiseSource,
    ) -> Result<Forward> {
        self.check_inputs(data, input, times)?;
        let rows = input.features().flip_rows();
        let h0 = noise.standard_normal(self.hyperparams.hidden_dims);
        let h = if self.training {
            self.encoder.forward_train(&rows, &h0, noise.rng())
        } else {
            self.encoder.forward(&rows, &h0)
        };

        let start_time = times[0];
        let relative: Vec<f32> = times.iter().map(|t| t - start_time).collect();
        let mut bound = self.field.bind(data, start_time);
        let solution = odeint(&mut bound, &h, &relative, &self.hyperparams.ode_options())?;
        let queried_times = bound.into_queries();

        let latent = solution.to_matrix();
        let predictions = if self.training {
            self.decoder.forward_train(&latent, noise.rng())
        } else {
            self.decoder.forward(&latent)
        };
        let bad_row =
            (0..predictions.rows).find(|&r| predictions.row(r).iter().any(|v| !v.is_finite()));
        if let Some(r) = bad_row {
            return Err(NumericalError::NonFinite {
                stage: "prediction",
                t: relative[r],
            }
            .into());
        }
        Ok(Forward {
            predictions,
            solution,
            start_time,
            queried_times,
        })
    }

    /// Accumulate parameter gradients for `grad_predictions`, the gradient of
    /// a loss with respect to `fwd.predictions`.
    ///
    /// `fwd` must be the most recent training-mode forward pass and `data`
    /// the dataset it was computed with.
    pub fn backward(
        &mut self,
        data: &Dataset,
        fwd: &Forward,
        grad_predictions: &Matrix,
    ) -> Result<()> {
        if !self.training {
            return Err(ForecastError::config(
                "model",
                "backward requires a forward pass in training mode",
            ));
        }
        let grad_latent = self.decoder.backward(grad_predictions);
        let grad_ys: Vec<Vec<f32>> = (0..grad_latent.rows)
            .map(|r| grad_latent.row(r).to_vec())
            .collect();
        let grads = {
            let mut bound = self.field.bind(data, fwd.start_time);
            fwd.solution.backward(&mut bound, &grad_ys)?
        };
        self.field.accumulate_flat(&grads.params);
        self.encoder.backward(&grads.y0);
        Ok(())
    }

    /// Forward pass in evaluation mode returning only the predictions.
    pub fn predict(
        &mut self,
        data: &Dataset,
        input: &EncoderInput,
        times: &[f32],
        noise: &mut NoiseSource,
    ) -> Result<Matrix> {
        let was_training = self.training;
        self.training = false;
        let out = self.forward(data, input, times, noise);
        self.training = was_training;
        Ok(out?.predictions)
    }

    pub fn zero_grad(&mut self) {
        self.encoder.zero_grad();
        self.field.zero_grad();
        self.decoder.zero_grad();
    }

    pub fn parameters(&mut self) -> Vec<&mut LinearT> {
        let mut params = self.encoder.parameters();
        params.extend(self.field.parameters());
        params.extend(self.decoder.parameters());
        params
    }

    pub fn num_params(&mut self) -> usize {
        self.parameters().iter().map(|p| p.num_params()).sum()
    }
}
