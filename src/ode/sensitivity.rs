//! Reverse passes through a solved trajectory.
//!
//! `backprop` differentiates the discrete scheme by replaying the recorded
//! stages in reverse. `adjoint` solves the continuous adjoint system
//! backwards in time and needs nothing but the output states.

use super::solver::{integrate, Step};
use super::tableau::Tableau;
use super::{Dynamics, Gradients, Solution};
use crate::error::NumericalError;

fn add_into(acc: &mut [f32], v: &[f32]) {
    for (a, b) in acc.iter_mut().zip(v) {
        *a += b;
    }
}

/// Chain the cotangent `g` of a step's output back to its input state.
fn reverse_step<D: Dynamics + ?Sized>(
    f: &mut D,
    tab: &Tableau,
    step: &Step,
    g: &[f32],
    params: &mut [f32],
) -> Result<Vec<f32>, NumericalError> {
    let h = step.h;
    let mut gk: Vec<Vec<f32>> = tab
        .b
        .iter()
        .map(|&b| g.iter().map(|v| h * b * v).collect())
        .collect();
    let mut gy = g.to_vec();
    for i in (0..tab.stages()).rev() {
        let cot = std::mem::take(&mut gk[i]);
        if cot.iter().all(|v| *v == 0.0) {
            continue;
        }
        let (ti, yi) = &step.stages[i];
        let g_stage = f.vjp(*ti, yi, &cot, params);
        if g_stage.iter().any(|v| !v.is_finite()) {
            return Err(NumericalError::NonFinite { stage: "reverse pass", t: *ti });
        }
        add_into(&mut gy, &g_stage);
        for (j, &a) in tab.a[i].iter().enumerate() {
            if a != 0.0 {
                for (acc, v) in gk[j].iter_mut().zip(&g_stage) {
                    *acc += h * a * v;
                }
            }
        }
    }
    Ok(gy)
}

pub(crate) fn backprop<D: Dynamics + ?Sized>(
    f: &mut D,
    sol: &Solution,
    grad_ys: &[Vec<f32>],
) -> Result<Gradients, NumericalError> {
    let tab = sol.options.solver.tableau();
    let mut params = vec![0.0; f.num_params()];
    let mut g = vec![0.0; f.state_dim()];
    let mut k = grad_ys.len();
    for s in (0..=sol.steps.len()).rev() {
        while k > 0 && sol.output_step[k - 1] == s {
            add_into(&mut g, &grad_ys[k - 1]);
            k -= 1;
        }
        if s == 0 {
            break;
        }
        g = reverse_step(f, tab, &sol.steps[s - 1], &g, &mut params)?;
    }
    Ok(Gradients { y0: g, params })
}

pub(crate) fn adjoint<D: Dynamics + ?Sized>(
    f: &mut D,
    sol: &Solution,
    grad_ys: &[Vec<f32>],
) -> Result<Gradients, NumericalError> {
    let n = f.state_dim();
    let p = f.num_params();
    let last = sol.times.len() - 1;
    let mut a = grad_ys[last].clone();
    let mut theta = vec![0.0; p];

    for k in (1..=last).rev() {
        let mut z = Vec::with_capacity(2 * n + p);
        z.extend_from_slice(&sol.ys[k]);
        z.extend_from_slice(&a);
        z.extend_from_slice(&theta);

        let mut augmented = |t: f32, z: &[f32]| -> Vec<f32> {
            let (y, rest) = z.split_at(n);
            let adj = &rest[..n];
            let mut out = f.eval(t, y);
            let mut pg = vec![0.0; p];
            let ga = f.vjp(t, y, adj, &mut pg);
            out.extend(ga.iter().map(|v| -v));
            out.extend(pg.iter().map(|v| -v));
            out
        };
        let traj = integrate(
            &mut augmented,
            &z,
            &[sol.times[k], sol.times[k - 1]],
            &sol.options,
            2 * n,
            false,
        )?;
        let zf = traj.ys.last().map(Vec::as_slice).unwrap_or(&z[..]);
        a = zf[n..2 * n].to_vec();
        add_into(&mut a, &grad_ys[k - 1]);
        theta = zf[2 * n..].to_vec();
    }
    Ok(Gradients { y0: a, params: theta })
}
