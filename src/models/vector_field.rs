use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::layers::{Activation, FeedForward, LinearT};
use crate::math::Matrix;
use crate::ode::Dynamics;

/// Non-autonomous latent dynamics `f(t, h) = MLP([h, covariates(t)])`.
///
/// The field owns only its network. The dataset providing covariates and the
/// offset of the window are supplied per integration through
/// [`VectorField::bind`].
#[derive(Clone, Serialize, Deserialize)]
pub struct VectorField {
    net: FeedForward,
    hidden_dim: usize,
    covariate_dim: usize,
}

impl VectorField {
    pub fn new<R: Rng + ?Sized>(
        hidden_dim: usize,
        covariate_dim: usize,
        fc_dims: &[usize],
        rng: &mut R,
    ) -> Self {
        let mut widths = fc_dims.to_vec();
        widths.push(hidden_dim);
        Self {
            net: FeedForward::new(
                hidden_dim + covariate_dim,
                &widths,
                Activation::Tanh,
                Activation::Identity,
                0.0,
                rng,
            ),
            hidden_dim,
            covariate_dim,
        }
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn covariate_dim(&self) -> usize {
        self.covariate_dim
    }

    pub fn num_params(&self) -> usize {
        self.net.num_params()
    }

    /// Attach `data` for one integration of a window whose first timestamp is
    /// `start_time`. Relative time `t` reads the covariates at
    /// `t + start_time`.
    pub fn bind<'a>(&'a self, data: &'a Dataset, start_time: f32) -> BoundField<'a> {
        BoundField {
            field: self,
            data,
            start_time,
            queries: Vec::new(),
        }
    }

    /// Add a flat parameter gradient produced through [`BoundField`].
    pub fn accumulate_flat(&mut self, flat: &[f32]) {
        self.net.accumulate_flat(flat);
    }

    pub fn zero_grad(&mut self) {
        self.net.zero_grad();
    }

    pub fn parameters(&mut self) -> Vec<&mut LinearT> {
        self.net.parameters()
    }
}

/// A [`VectorField`] tied to a dataset and window offset.
pub struct BoundField<'a> {
    field: &'a VectorField,
    data: &'a Dataset,
    start_time: f32,
    queries: Vec<f32>,
}

impl BoundField<'_> {
    fn input(&self, t: f32, h: &[f32]) -> Matrix {
        let mut row = Vec::with_capacity(h.len() + self.field.covariate_dim);
        row.extend_from_slice(h);
        row.extend_from_slice(self.data.covariate_at(t + self.start_time));
        Matrix::row_vector(&row)
    }

    /// Relative times at which the field was evaluated, in call order.
    pub fn queries(&self) -> &[f32] {
        &self.queries
    }

    pub fn into_queries(self) -> Vec<f32> {
        self.queries
    }
}

impl Dynamics for BoundField<'_> {
    fn state_dim(&self) -> usize {
        self.field.hidden_dim
    }

    fn num_params(&self) -> usize {
        self.field.num_params()
    }

    fn eval(&mut self, t: f32, y: &[f32]) -> Vec<f32> {
        self.queries.push(t);
        self.field.net.forward(&self.input(t, y)).data
    }

    fn vjp(&mut self, t: f32, y: &[f32], cotangent: &[f32], param_grad: &mut [f32]) -> Vec<f32> {
        let (_, tape) = self.field.net.forward_tape(&self.input(t, y));
        let grad_in = self
            .field
            .net
            .backward_tape(&tape, &Matrix::row_vector(cotangent), param_grad);
        grad_in.data[..self.field.hidden_dim].to_vec()
    }
}
