//! Parameter updates and training objectives.

pub mod loss;

pub use loss::{GaussianNll, Loss, MeanSquaredError};

use crate::config::OptimizerKind;
use crate::layers::LinearT;

/// Common interface for optimizers operating on linear layers.
pub trait Optimizer {
    /// Update the provided parameters in-place from their accumulated
    /// gradients.
    fn step(&mut self, params: &mut [&mut LinearT]);

    fn lr(&self) -> f32;
}

/// Adam. The moment estimates live on each [`LinearT`].
#[derive(Debug, Clone, Copy)]
pub struct Adam {
    pub lr: f32,
    pub betas: (f32, f32),
    pub eps: f32,
    pub weight_decay: f32,
}

impl Adam {
    pub fn new(lr: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            betas: (0.9, 0.999),
            eps: 1e-8,
            weight_decay,
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut LinearT]) {
        let (b1, b2) = self.betas;
        for p in params.iter_mut() {
            p.adam_step(self.lr, b1, b2, self.eps, self.weight_decay);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }
}

/// Plain gradient descent with L2 weight decay.
#[derive(Debug, Clone, Copy)]
pub struct Sgd {
    pub lr: f32,
    pub weight_decay: f32,
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [&mut LinearT]) {
        for p in params.iter_mut() {
            p.sgd_step(self.lr, self.weight_decay);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }
}

/// Build the optimizer selected in the training configuration.
pub fn build(kind: OptimizerKind, lr: f32, weight_decay: f32) -> Box<dyn Optimizer> {
    match kind {
        OptimizerKind::Adam => Box::new(Adam::new(lr, weight_decay)),
        OptimizerKind::Sgd => Box::new(Sgd { lr, weight_decay }),
    }
}
