use rand::Rng;
use serde::{Deserialize, Serialize};

use super::linear::LinearT;
use super::Activation;
use crate::math::Matrix;

fn elem_sub(a: &Matrix, b: &Matrix) -> Matrix {
    let mut v = vec![0.0; a.data.len()];
    for i in 0..v.len() {
        v[i] = a.data[i] - b.data[i];
    }
    Matrix::from_vec(a.rows, a.cols, v)
}

fn elem_sub_from_one(a: &Matrix) -> Matrix {
    a.map(|v| 1.0 - v)
}

/// Gated Recurrent Unit consuming a sequence row by row from a caller
/// supplied initial hidden state.
///
/// r = σ(x W_ir + h W_hr), z = σ(x W_iz + h W_hz),
/// n = tanh(x W_in + (r ⊙ h) W_hn), h' = z ⊙ h + (1 - z) ⊙ n
#[derive(Clone, Serialize, Deserialize)]
pub struct GRU {
    pub w_ir: LinearT,
    pub w_iz: LinearT,
    pub w_in: LinearT,
    pub w_hr: LinearT,
    pub w_hz: LinearT,
    pub w_hn: LinearT,
    input_dim: usize,
    hidden_dim: usize,
    #[serde(skip)]
    cache: Vec<GRUCache>,
}

#[derive(Clone)]
struct GRUCache {
    x: Matrix,
    h_prev: Matrix,
    rh: Matrix,
    r: Matrix,
    z: Matrix,
    n: Matrix,
}

impl GRU {
    pub fn new<R: Rng + ?Sized>(input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        Self {
            w_ir: LinearT::new(input_dim, hidden_dim, rng),
            w_iz: LinearT::new(input_dim, hidden_dim, rng),
            w_in: LinearT::new(input_dim, hidden_dim, rng),
            w_hr: LinearT::new(hidden_dim, hidden_dim, rng),
            w_hz: LinearT::new(hidden_dim, hidden_dim, rng),
            w_hn: LinearT::new(hidden_dim, hidden_dim, rng),
            input_dim,
            hidden_dim,
            cache: Vec::new(),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    fn step(&self, x_t: &Matrix, h_prev: &Matrix) -> GRUCache {
        let mut r = self.w_ir.forward(x_t).add(&self.w_hr.forward(h_prev));
        Activation::Sigmoid.apply(&mut r);
        let mut z = self.w_iz.forward(x_t).add(&self.w_hz.forward(h_prev));
        Activation::Sigmoid.apply(&mut z);
        let rh = r.hadamard(h_prev);
        let mut n = self.w_in.forward(x_t).add(&self.w_hn.forward(&rh));
        Activation::Tanh.apply(&mut n);
        GRUCache {
            x: x_t.clone(),
            h_prev: h_prev.clone(),
            rh,
            r,
            z,
            n,
        }
    }

    fn next_hidden(c: &GRUCache) -> Matrix {
        let one_minus_z = elem_sub_from_one(&c.z);
        c.z.hadamard(&c.h_prev).add(&one_minus_z.hadamard(&c.n))
    }

    /// Run the sequence `x` (one row per step) and return the final hidden
    /// state.
    pub fn forward(&self, x: &Matrix, h0: &[f32]) -> Vec<f32> {
        assert_eq!(h0.len(), self.hidden_dim);
        let mut h = Matrix::row_vector(h0);
        for t in 0..x.rows {
            let x_t = Matrix::row_vector(x.row(t));
            let c = self.step(&x_t, &h);
            h = Self::next_hidden(&c);
        }
        h.data
    }

    /// Training forward pass caching every step for [`GRU::backward`].
    pub fn forward_train(&mut self, x: &Matrix, h0: &[f32]) -> Vec<f32> {
        assert_eq!(h0.len(), self.hidden_dim);
        self.cache.clear();
        let mut h = Matrix::row_vector(h0);
        for t in 0..x.rows {
            let x_t = Matrix::row_vector(x.row(t));
            let c = self.step(&x_t, &h);
            h = Self::next_hidden(&c);
            self.cache.push(c);
        }
        h.data
    }

    /// Backpropagate a gradient on the final hidden state through every
    /// cached step. Returns the gradient with respect to the input rows.
    pub fn backward(&mut self, grad_last: &[f32]) -> Matrix {
        let seq_len = self.cache.len();
        let mut grad_x = Matrix::zeros(seq_len, self.input_dim);
        let mut dh = Matrix::row_vector(grad_last);
        let cache = std::mem::take(&mut self.cache);
        for t in (0..seq_len).rev() {
            let c = &cache[t];
            let mut dn = dh.hadamard(&elem_sub_from_one(&c.z));
            Activation::Tanh.backward(&mut dn, &c.n);
            let mut gx = self.w_in.backward_from(&c.x, &dn);
            let drh = self.w_hn.backward_from(&c.rh, &dn);

            let mut dh_prev = dh.hadamard(&c.z).add(&drh.hadamard(&c.r));

            let mut dr = drh.hadamard(&c.h_prev);
            Activation::Sigmoid.backward(&mut dr, &c.r);
            gx.add_assign(&self.w_ir.backward_from(&c.x, &dr));
            dh_prev.add_assign(&self.w_hr.backward_from(&c.h_prev, &dr));

            let mut dz = dh.hadamard(&elem_sub(&c.h_prev, &c.n));
            Activation::Sigmoid.backward(&mut dz, &c.z);
            gx.add_assign(&self.w_iz.backward_from(&c.x, &dz));
            dh_prev.add_assign(&self.w_hz.backward_from(&c.h_prev, &dz));

            for j in 0..self.input_dim {
                grad_x.set(t, j, gx.get(0, j));
            }
            dh = dh_prev;
        }
        self.cache = cache;
        grad_x
    }

    pub fn zero_grad(&mut self) {
        for p in self.parameters() {
            p.zero_grad();
        }
    }

    pub fn parameters(&mut self) -> Vec<&mut LinearT> {
        let (w_ir, w_iz, w_in, w_hr, w_hz, w_hn) = (
            &mut self.w_ir,
            &mut self.w_iz,
            &mut self.w_in,
            &mut self.w_hr,
            &mut self.w_hz,
            &mut self.w_hn,
        );
        vec![w_ir, w_iz, w_in, w_hr, w_hz, w_hn]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn loss(gru: &GRU, x: &Matrix, h0: &[f32]) -> f32 {
        gru.forward(x, h0).iter().sum()
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut gru = GRU::new(2, 3, &mut rng);
        let x = Matrix::from_vec(4, 2, vec![0.1, 0.5, -0.3, 0.2, 0.7, -0.6, 0.0, 0.4]);
        let h0 = [0.2, -0.1, 0.3];

        let h = gru.forward_train(&x, &h0);
        assert_eq!(h.len(), 3);
        gru.zero_grad();
        let grad_x = gru.backward(&[1.0, 1.0, 1.0]);

        let eps = 1e-2;
        for idx in 0..6 {
            let base = gru.w_hn.w.data[idx];
            gru.w_hn.w.data[idx] = base + eps;
            let lp = loss(&gru, &x, &h0);
            gru.w_hn.w.data[idx] = base - eps;
            let lm = loss(&gru, &x, &h0);
            gru.w_hn.w.data[idx] = base;
            let fd = (lp - lm) / (2.0 * eps);
            let an = gru.w_hn.grad_w().data[idx];
            assert!((fd - an).abs() < 2e-3, "w_hn[{idx}] fd {fd} analytic {an}");
        }

        let mut xp = x.clone();
        xp.data[2] += eps;
        let mut xm = x.clone();
        xm.data[2] -= eps;
        let fd = (loss(&gru, &xp, &h0) - loss(&gru, &xm, &h0)) / (2.0 * eps);
        assert!((fd - grad_x.data[2]).abs() < 2e-3);
    }
}
