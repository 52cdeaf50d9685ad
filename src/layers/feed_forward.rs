use rand::Rng;
use serde::{Deserialize, Serialize};

use super::dropout::Dropout;
use super::linear::LinearT;
use super::Activation;
use crate::math::Matrix;

/// Stack of affine layers with an activation after each layer and dropout
/// between layers while training.
///
/// Two backward styles are supported. `forward_train`/`backward` cache the
/// activations of the most recent call, which suits components evaluated
/// once per step (decoder, encoder projection). `forward_tape`/`backward_tape`
/// return the activations to the caller so the same network can be evaluated
/// many times before any gradient is requested (vector fields under an
/// integrator).
#[derive(Clone, Serialize, Deserialize)]
pub struct FeedForward {
    in_dim: usize,
    layers: Vec<LinearT>,
    activations: Vec<Activation>,
    dropout: f32,
    #[serde(skip)]
    drops: Vec<Dropout>,
    #[serde(skip)]
    outputs: Vec<Matrix>,
}

/// Activations recorded by [`FeedForward::forward_tape`].
#[derive(Clone, Debug)]
pub struct FeedForwardTape {
    inputs: Vec<Matrix>,
    activated: Vec<Matrix>,
}

impl FeedForward {
    /// `widths` lists the output width of every layer; the last entry is the
    /// network output. `act` follows hidden layers, `out_act` the last one.
    pub fn new<R: Rng + ?Sized>(
        in_dim: usize,
        widths: &[usize],
        act: Activation,
        out_act: Activation,
        dropout: f32,
        rng: &mut R,
    ) -> Self {
        let mut layers = Vec::with_capacity(widths.len());
        let mut activations = Vec::with_capacity(widths.len());
        let mut prev = in_dim;
        for (i, &w) in widths.iter().enumerate() {
            layers.push(LinearT::new(prev, w, rng));
            activations.push(if i + 1 == widths.len() { out_act } else { act });
            prev = w;
        }
        Self {
            in_dim,
            layers,
            activations,
            dropout,
            drops: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.layers.last().map_or(self.in_dim, |l| l.out_dim())
    }

    pub fn num_params(&self) -> usize {
        self.layers.iter().map(LinearT::num_params).sum()
    }

    /// Inference forward pass (no dropout, nothing cached).
    pub fn forward(&self, x: &Matrix) -> Matrix {
        let mut h = x.clone();
        for (layer, act) in self.layers.iter().zip(&self.activations) {
            h = layer.forward(&h);
            act.apply(&mut h);
        }
        h
    }

    /// Training forward pass caching activations and dropout masks.
    pub fn forward_train<R: Rng + ?Sized>(&mut self, x: &Matrix, rng: &mut R) -> Matrix {
        let n = self.layers.len();
        if self.drops.len() != n {
            self.drops = vec![Dropout::new(); n];
        }
        self.outputs.clear();
        let mut h = x.clone();
        for i in 0..n {
            let mut z = self.layers[i].forward_train(&h);
            self.activations[i].apply(&mut z);
            h = if i + 1 < n {
                self.drops[i].forward(&z, self.dropout, true, rng)
            } else {
                z.clone()
            };
            self.outputs.push(z);
        }
        h
    }

    /// Backward pass for the last [`FeedForward::forward_train`] call.
    pub fn backward(&mut self, grad_out: &Matrix) -> Matrix {
        let n = self.layers.len();
        let mut g = grad_out.clone();
        for i in (0..n).rev() {
            if i + 1 < n {
                g = self.drops[i].backward(&g);
            }
            self.activations[i].backward(&mut g, &self.outputs[i]);
            g = self.layers[i].backward(&g);
        }
        g
    }

    /// Forward pass returning the activations needed by
    /// [`FeedForward::backward_tape`]. Dropout is not applied.
    pub fn forward_tape(&self, x: &Matrix) -> (Matrix, FeedForwardTape) {
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut activated = Vec::with_capacity(self.layers.len());
        let mut h = x.clone();
        for (layer, act) in self.layers.iter().zip(&self.activations) {
            let mut z = layer.forward(&h);
            act.apply(&mut z);
            inputs.push(h);
            activated.push(z.clone());
            h = z;
        }
        (h, FeedForwardTape { inputs, activated })
    }

    /// Backward pass for a recorded tape. Parameter gradients are added to
    /// `flat`, laid out layer by layer as `[w, b]`.
    pub fn backward_tape(
        &self,
        tape: &FeedForwardTape,
        grad_out: &Matrix,
        flat: &mut [f32],
    ) -> Matrix {
        debug_assert_eq!(flat.len(), self.num_params());
        let mut offsets = Vec::with_capacity(self.layers.len());
        let mut off = 0;
        for l in &self.layers {
            offsets.push(off);
            off += l.num_params();
        }
        let mut g = grad_out.clone();
        for i in (0..self.layers.len()).rev() {
            self.activations[i].backward(&mut g, &tape.activated[i]);
            let layer = &self.layers[i];
            let span = &mut flat[offsets[i]..offsets[i] + layer.num_params()];
            g = layer.backward_into(&tape.inputs[i], &g, span);
        }
        g
    }

    /// Add a flat gradient produced by [`FeedForward::backward_tape`].
    pub fn accumulate_flat(&mut self, flat: &[f32]) {
        let mut off = 0;
        for l in self.layers.iter_mut() {
            let n = l.num_params();
            l.accumulate_flat(&flat[off..off + n]);
            off += n;
        }
    }

    pub fn zero_grad(&mut self) {
        self.layers.iter_mut().for_each(LinearT::zero_grad);
    }

    pub fn parameters(&mut self) -> Vec<&mut LinearT> {
        self.layers.iter_mut().collect()
    }
}
