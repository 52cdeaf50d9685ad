use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::layers::{Activation, FeedForward, LinearT, GRU};
use crate::math::Matrix;

/// Recurrent encoder summarizing a window into one latent vector.
///
/// Each row is projected by a ReLU stack (dropout between layers while
/// training) and the projected sequence is consumed by a GRU starting from a
/// caller supplied hidden state. The final hidden state is the summary.
#[derive(Clone, Serialize, Deserialize)]
pub struct Encoder {
    projection: FeedForward,
    gru: GRU,
}

impl Encoder {
    pub fn new<R: Rng + ?Sized>(
        input_dim: usize,
        fc_dims: &[usize],
        hidden_dim: usize,
        dropout: f32,
        rng: &mut R,
    ) -> Self {
        let projection = FeedForward::new(
            input_dim,
            fc_dims,
            Activation::Relu,
            Activation::Relu,
            dropout,
            rng,
        );
        let gru = GRU::new(projection.out_dim(), hidden_dim, rng);
        Self { projection, gru }
    }

    pub fn input_dim(&self) -> usize {
        self.projection.in_dim()
    }

    pub fn hidden_dim(&self) -> usize {
        self.gru.hidden_dim()
    }

    pub fn forward(&self, rows: &Matrix, h0: &[f32]) -> Vec<f32> {
        let projected = self.projection.forward(rows);
        self.gru.forward(&projected, h0)
    }

    pub fn forward_train<R: Rng + ?Sized>(
        &mut self,
        rows: &Matrix,
        h0: &[f32],
        rng: &mut R,
    ) -> Vec<f32> {
        let projected = self.projection.forward_train(rows, rng);
        self.gru.forward_train(&projected, h0)
    }

    /// Accumulate parameter gradients for a gradient on the final state.
    pub fn backward(&mut self, grad_h: &[f32]) {
        let grad_projected = self.gru.backward(grad_h);
        self.projection.backward(&grad_projected);
    }

    pub fn zero_grad(&mut self) {
        self.projection.zero_grad();
        self.gru.zero_grad();
    }

    pub fn parameters(&mut self) -> Vec<&mut LinearT> {
        let mut params = self.projection.parameters();
        params.extend(self.gru.parameters());
        params
    }
}
