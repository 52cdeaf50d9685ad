use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::layers::{Activation, FeedForward, LinearT};
use crate::math::Matrix;

/// Row-wise readout from latent states to observations. Rows never mix.
#[derive(Clone, Serialize, Deserialize)]
pub struct Decoder {
    net: FeedForward,
}

impl Decoder {
    pub fn new<R: Rng + ?Sized>(
        hidden_dim: usize,
        fc_dims: &[usize],
        output_dim: usize,
        rng: &mut R,
    ) -> Self {
        let mut widths = fc_dims.to_vec();
        widths.push(output_dim);
        Self {
            net: FeedForward::new(
                hidden_dim,
                &widths,
                Activation::Relu,
                Activation::Identity,
                0.0,
                rng,
            ),
        }
    }

    pub fn output_dim(&self) -> usize {
        self.net.out_dim()
    }

    /// `[num_times, hidden_dim]` to `[num_times, output_dim]`.
    pub fn forward(&self, latent: &Matrix) -> Matrix {
        self.net.forward(latent)
    }

    pub fn forward_train<R: Rng + ?Sized>(&mut self, latent: &Matrix, rng: &mut R) -> Matrix {
        self.net.forward_train(latent, rng)
    }

    /// Returns the gradient with respect to the latent rows.
    pub fn backward(&mut self, grad_out: &Matrix) -> Matrix {
        self.net.backward(grad_out)
    }

    pub fn zero_grad(&mut self) {
        self.net.zero_grad();
    }

    pub fn parameters(&mut self) -> Vec<&mut LinearT> {
        self.net.parameters()
    }
}
