use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

static MATRIX_OPS: AtomicUsize = AtomicUsize::new(0);

pub fn reset_matrix_ops() {
    MATRIX_OPS.store(0, Ordering::SeqCst);
}

pub fn matrix_ops_count() -> usize {
    MATRIX_OPS.load(Ordering::SeqCst)
}

pub(crate) fn inc_ops() {
    MATRIX_OPS.fetch_add(1, Ordering::SeqCst);
}

/// Dense row-major `f32` matrix.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(r: usize, c: usize) -> Self {
        Matrix {
            rows: r,
            cols: c,
            data: vec![0.0; r * c],
        }
    }

    pub fn from_vec(r: usize, c: usize, v: Vec<f32>) -> Self {
        assert_eq!(v.len(), r * c);
        Matrix {
            rows: r,
            cols: c,
            data: v,
        }
    }

    /// Single-row matrix holding a copy of `v`.
    pub fn row_vector(v: &[f32]) -> Self {
        Matrix::from_vec(1, v.len(), v.to_vec())
    }

    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.data[r * self.cols + c]
    }

    pub fn set(&mut self, r: usize, c: usize, v: f32) {
        self.data[r * self.cols + c] = v;
    }

    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn matmul(a: &Matrix, b: &Matrix) -> Matrix {
        inc_ops();
        assert_eq!(a.cols, b.rows);
        let mut out = vec![0.0; a.rows * b.cols];
        for i in 0..a.rows {
            let a_row = &a.data[i * a.cols..(i + 1) * a.cols];
            for k in 0..a.cols {
                let a_val = a_row[k];
                if a_val == 0.0 {
                    continue;
                }
                let b_row = &b.data[k * b.cols..(k + 1) * b.cols];
                for j in 0..b.cols {
                    out[i * b.cols + j] += a_val * b_row[j];
                }
            }
        }
        Matrix::from_vec(a.rows, b.cols, out)
    }

    pub fn add(&self, other: &Matrix) -> Matrix {
        inc_ops();
        assert_eq!(self.rows, other.rows);
        assert_eq!(self.cols, other.cols);
        let mut v = vec![0.0; self.data.len()];
        for i in 0..v.len() {
            v[i] = self.data[i] + other.data[i];
        }
        Matrix::from_vec(self.rows, self.cols, v)
    }

    /// In-place elementwise accumulation.
    pub fn add_assign(&mut self, other: &Matrix) {
        assert_eq!(self.data.len(), other.data.len());
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }

    /// Elementwise (Hadamard) product.
    pub fn hadamard(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.rows, other.rows);
        assert_eq!(self.cols, other.cols);
        let v = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .collect();
        Matrix::from_vec(self.rows, self.cols, v)
    }

    pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> Matrix {
        Matrix::from_vec(self.rows, self.cols, self.data.iter().map(|&v| f(v)).collect())
    }

    pub fn transpose(&self) -> Matrix {
        inc_ops();
        let mut v = vec![0.0; self.rows * self.cols];
        for i in 0..self.rows {
            for j in 0..self.cols {
                v[j * self.rows + i] = self.get(i, j);
            }
        }
        Matrix::from_vec(self.cols, self.rows, v)
    }

    /// `a^T * b` without materialising the transpose.
    pub fn matmul_tn(a: &Matrix, b: &Matrix) -> Matrix {
        inc_ops();
        assert_eq!(a.rows, b.rows);
        let mut out = vec![0.0; a.cols * b.cols];
        for r in 0..a.rows {
            let a_row = a.row(r);
            let b_row = b.row(r);
            for (i, &a_val) in a_row.iter().enumerate() {
                if a_val == 0.0 {
                    continue;
                }
                let dst = &mut out[i * b.cols..(i + 1) * b.cols];
                for (d, &b_val) in dst.iter_mut().zip(b_row.iter()) {
                    *d += a_val * b_val;
                }
            }
        }
        Matrix::from_vec(a.cols, b.cols, out)
    }

    /// `a * b^T` without materialising the transpose.
    pub fn matmul_nt(a: &Matrix, b: &Matrix) -> Matrix {
        inc_ops();
        assert_eq!(a.cols, b.cols);
        let mut out = vec![0.0; a.rows * b.rows];
        for i in 0..a.rows {
            let a_row = a.row(i);
            for j in 0..b.rows {
                let b_row = b.row(j);
                out[i * b.rows + j] = a_row.iter().zip(b_row.iter()).map(|(x, y)| x * y).sum();
            }
        }
        Matrix::from_vec(a.rows, b.rows, out)
    }

    /// Concatenate two matrices with equal row counts along the column axis.
    pub fn concat_cols(a: &Matrix, b: &Matrix) -> Matrix {
        assert_eq!(a.rows, b.rows);
        let cols = a.cols + b.cols;
        let mut data = Vec::with_capacity(a.rows * cols);
        for r in 0..a.rows {
            data.extend_from_slice(a.row(r));
            data.extend_from_slice(b.row(r));
        }
        Matrix::from_vec(a.rows, cols, data)
    }

    /// Stack row slices of equal width into a matrix.
    pub fn from_rows(rows: &[Vec<f32>]) -> Matrix {
        if rows.is_empty() {
            return Matrix::zeros(0, 0);
        }
        let cols = rows[0].len();
        let mut data = Vec::with_capacity(rows.len() * cols);
        for r in rows {
            assert_eq!(r.len(), cols);
            data.extend_from_slice(r);
        }
        Matrix::from_vec(rows.len(), cols, data)
    }

    /// Reverse the order of the rows (time reversal for sequences).
    pub fn flip_rows(&self) -> Matrix {
        let mut data = Vec::with_capacity(self.data.len());
        for r in (0..self.rows).rev() {
            data.extend_from_slice(self.row(r));
        }
        Matrix::from_vec(self.rows, self.cols, data)
    }

    /// Gather the given rows, in the given order.
    pub fn select_rows(&self, idx: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(idx.len() * self.cols);
        for &r in idx {
            data.extend_from_slice(self.row(r));
        }
        Matrix::from_vec(idx.len(), self.cols, data)
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::Matrix;

    #[test]
    fn transposed_products_match_explicit_transpose() {
        let a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = Matrix::from_vec(2, 2, vec![0.5, -1.0, 2.0, 0.25]);
        assert_eq!(Matrix::matmul_tn(&a, &b), Matrix::matmul(&a.transpose(), &b));

        let c = Matrix::from_vec(4, 3, (0..12).map(|v| v as f32).collect());
        assert_eq!(Matrix::matmul_nt(&a, &c), Matrix::matmul(&a, &c.transpose()));
    }

    #[test]
    fn flip_and_select_rows() {
        let m = Matrix::from_vec(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(m.flip_rows().data, vec![5.0, 6.0, 3.0, 4.0, 1.0, 2.0]);
        assert_eq!(m.select_rows(&[2, 0]).data, vec![5.0, 6.0, 1.0, 2.0]);
    }

    #[test]
    fn concat_cols_interleaves_rows() {
        let a = Matrix::from_vec(2, 1, vec![1.0, 2.0]);
        let b = Matrix::from_vec(2, 2, vec![3.0, 4.0, 5.0, 6.0]);
        let c = Matrix::concat_cols(&a, &b);
        assert_eq!(c.cols, 3);
        assert_eq!(c.data, vec![1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
    }
}
