use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::math::Matrix;

/// Serialised form of a [`LinearT`]: weights and bias only, optimiser state is
/// not persisted.
#[derive(Clone, Serialize, Deserialize)]
pub struct LinearParams {
    pub w: Matrix,
    pub b: Vec<f32>,
}

// Affine layer `y = x W + b` with hand-written backward. The layer keeps its
// accumulated gradients and Adam moments so optimiser state persists across
// iterations. `forward_train` caches the last input; `backward_from` takes the
// input explicitly for layers evaluated many times per step (recurrent cells,
// vector fields).

#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "LinearParams", into = "LinearParams")]
pub struct LinearT {
    pub w: Matrix,
    pub b: Vec<f32>,
    grad_w: Matrix,
    grad_b: Vec<f32>,
    m_w: Matrix,
    v_w: Matrix,
    m_b: Vec<f32>,
    v_b: Vec<f32>,
    t: usize,
    last_x: Matrix,
}

impl TryFrom<LinearParams> for LinearT {
    type Error = String;

    fn try_from(p: LinearParams) -> Result<Self, Self::Error> {
        if p.w.data.len() != p.w.rows * p.w.cols {
            return Err(format!(
                "weight matrix {}x{} holds {} values",
                p.w.rows,
                p.w.cols,
                p.w.data.len()
            ));
        }
        if p.w.cols != p.b.len() {
            return Err(format!(
                "bias of length {} does not match {} output columns",
                p.b.len(),
                p.w.cols
            ));
        }
        Ok(LinearT::from_parts(p.w, p.b))
    }
}

impl From<LinearT> for LinearParams {
    fn from(l: LinearT) -> Self {
        LinearParams { w: l.w, b: l.b }
    }
}

impl LinearT {
    /// Uniform `±1/sqrt(in_dim)` initialisation for weights and bias.
    pub fn new<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_dim.max(1) as f32).sqrt();
        let w = Matrix::from_vec(
            in_dim,
            out_dim,
            (0..in_dim * out_dim)
                .map(|_| rng.gen_range(-bound..bound))
                .collect(),
        );
        let b = (0..out_dim).map(|_| rng.gen_range(-bound..bound)).collect();
        Self::from_parts(w, b)
    }

    pub fn from_parts(w: Matrix, b: Vec<f32>) -> Self {
        assert_eq!(w.cols, b.len());
        let (rows, cols) = (w.rows, w.cols);
        Self {
            w,
            grad_w: Matrix::zeros(rows, cols),
            grad_b: vec![0.0; cols],
            m_w: Matrix::zeros(rows, cols),
            v_w: Matrix::zeros(rows, cols),
            m_b: vec![0.0; cols],
            v_b: vec![0.0; cols],
            b,
            t: 0,
            last_x: Matrix::zeros(0, 0),
        }
    }

    pub fn in_dim(&self) -> usize {
        self.w.rows
    }

    pub fn out_dim(&self) -> usize {
        self.w.cols
    }

    /// Number of scalar parameters (weights followed by bias).
    pub fn num_params(&self) -> usize {
        self.w.data.len() + self.b.len()
    }

    pub fn forward(&self, x: &Matrix) -> Matrix {
        let mut out = Matrix::matmul(x, &self.w);
        for r in 0..out.rows {
            for (v, b) in out.data[r * out.cols..(r + 1) * out.cols]
                .iter_mut()
                .zip(self.b.iter())
            {
                *v += b;
            }
        }
        out
    }

    /// Forward pass storing the input for [`LinearT::backward`].
    pub fn forward_train(&mut self, x: &Matrix) -> Matrix {
        self.last_x = x.clone();
        self.forward(x)
    }

    /// Backward pass against the cached input, accumulating gradients.
    pub fn backward(&mut self, grad_out: &Matrix) -> Matrix {
        let x = std::mem::take(&mut self.last_x);
        let grad_x = self.backward_from(&x, grad_out);
        self.last_x = x;
        grad_x
    }

    /// Backward pass for an explicitly supplied input, accumulating gradients.
    pub fn backward_from(&mut self, x: &Matrix, grad_out: &Matrix) -> Matrix {
        let grad_w = Matrix::matmul_tn(x, grad_out);
        self.grad_w.add_assign(&grad_w);
        for r in 0..grad_out.rows {
            for (gb, g) in self.grad_b.iter_mut().zip(grad_out.row(r)) {
                *gb += g;
            }
        }
        Matrix::matmul_nt(grad_out, &self.w)
    }

    /// Backward pass writing parameter gradients into a flat buffer laid out
    /// as `[w (row-major), b]` instead of the layer's own accumulators.
    pub fn backward_into(&self, x: &Matrix, grad_out: &Matrix, flat: &mut [f32]) -> Matrix {
        debug_assert_eq!(flat.len(), self.num_params());
        let (gw, gb) = flat.split_at_mut(self.w.data.len());
        let grad_w = Matrix::matmul_tn(x, grad_out);
        for (d, g) in gw.iter_mut().zip(grad_w.data.iter()) {
            *d += g;
        }
        for r in 0..grad_out.rows {
            for (d, g) in gb.iter_mut().zip(grad_out.row(r)) {
                *d += g;
            }
        }
        Matrix::matmul_nt(grad_out, &self.w)
    }

    /// Add a flat `[w, b]` gradient (see [`LinearT::backward_into`]).
    pub fn accumulate_flat(&mut self, flat: &[f32]) {
        debug_assert_eq!(flat.len(), self.num_params());
        let (gw, gb) = flat.split_at(self.w.data.len());
        for (d, g) in self.grad_w.data.iter_mut().zip(gw) {
            *d += g;
        }
        for (d, g) in self.grad_b.iter_mut().zip(gb) {
            *d += g;
        }
    }

    pub fn grad_w(&self) -> &Matrix {
        &self.grad_w
    }

    pub fn grad_b(&self) -> &[f32] {
        &self.grad_b
    }

    pub fn zero_grad(&mut self) {
        self.grad_w.data.iter_mut().for_each(|g| *g = 0.0);
        self.grad_b.iter_mut().for_each(|g| *g = 0.0);
    }

    pub fn sgd_step(&mut self, lr: f32, weight_decay: f32) {
        for i in 0..self.grad_w.data.len() {
            let g = self.grad_w.data[i] + weight_decay * self.w.data[i];
            self.w.data[i] -= lr * g;
        }
        for i in 0..self.grad_b.len() {
            self.b[i] -= lr * self.grad_b[i];
        }
    }

    /// Adam optimisation step. Weight decay is applied to weights only.
    pub fn adam_step(&mut self, lr: f32, beta1: f32, beta2: f32, eps: f32, weight_decay: f32) {
        self.t += 1;
        let bc1 = 1.0 - beta1.powi(self.t as i32);
        let bc2 = 1.0 - beta2.powi(self.t as i32);
        for i in 0..self.grad_w.data.len() {
            let g = self.grad_w.data[i] + weight_decay * self.w.data[i];
            self.m_w.data[i] = beta1 * self.m_w.data[i] + (1.0 - beta1) * g;
            self.v_w.data[i] = beta2 * self.v_w.data[i] + (1.0 - beta2) * g * g;
            let m_hat = self.m_w.data[i] / bc1;
            let v_hat = self.v_w.data[i] / bc2;
            self.w.data[i] -= lr * m_hat / (v_hat.sqrt() + eps);
        }
        for i in 0..self.grad_b.len() {
            let g = self.grad_b[i];
            self.m_b[i] = beta1 * self.m_b[i] + (1.0 - beta1) * g;
            self.v_b[i] = beta2 * self.v_b[i] + (1.0 - beta2) * g * g;
            let m_hat = self.m_b[i] / bc1;
            let v_hat = self.v_b[i] / bc2;
            self.b[i] -= lr * m_hat / (v_hat.sqrt() + eps);
        }
    }

    pub fn parameters(&mut self) -> Vec<&mut LinearT> {
        vec![self]
    }
}
