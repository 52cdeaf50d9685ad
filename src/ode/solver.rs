//! Explicit Runge–Kutta stepping on a fixed grid or with an embedded error
//! estimate and step-size control.

use super::tableau::Tableau;
use super::{OdeOptions, SolveStats};
use crate::error::NumericalError;

const SAFETY: f32 = 0.9;
const MIN_FACTOR: f32 = 0.2;
const MAX_FACTOR: f32 = 10.0;

/// One accepted step together with the stage inputs needed to replay it in
/// reverse.
#[derive(Clone, Debug)]
pub(crate) struct Step {
    pub h: f32,
    pub stages: Vec<(f32, Vec<f32>)>,
}

#[derive(Debug)]
pub(crate) struct Trajectory {
    pub ys: Vec<Vec<f32>>,
    pub steps: Vec<Step>,
    /// Number of accepted steps taken before each output was reached.
    pub output_step: Vec<usize>,
    pub stats: SolveStats,
}

struct Attempt {
    y_new: Vec<f32>,
    error: Option<Vec<f32>>,
    last_k: Vec<f32>,
    stages: Vec<(f32, Vec<f32>)>,
}

/// Validates the output grid and returns its direction (`1.0` or `-1.0`).
pub(crate) fn check_times(times: &[f32]) -> Result<f32, NumericalError> {
    if let Some(&t) = times.iter().find(|t| !t.is_finite()) {
        return Err(NumericalError::NonFinite { stage: "time", t });
    }
    if times.len() < 2 {
        return Ok(1.0);
    }
    let dir = if times[1] > times[0] { 1.0 } else { -1.0 };
    for i in 1..times.len() {
        if (times[i] - times[i - 1]) * dir <= 0.0 {
            return Err(NumericalError::NonMonotonicTimes { index: i });
        }
    }
    Ok(dir)
}

fn axpy(y: &mut [f32], alpha: f32, x: &[f32]) {
    for (a, b) in y.iter_mut().zip(x) {
        *a += alpha * b;
    }
}

fn all_finite(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Root-mean-square of `v[i] / scale(i)` over the first `dims` components.
fn rms_norm(v: &[f32], dims: usize, scale: impl Fn(usize) -> f32) -> f32 {
    let dims = dims.min(v.len());
    if dims == 0 {
        return 0.0;
    }
    let mut sum = 0.0f32;
    for i in 0..dims {
        let r = v[i] / scale(i);
        sum += r * r;
    }
    (sum / dims as f32).sqrt()
}

struct Integrator<'a, F> {
    f: &'a mut F,
    tab: &'static Tableau,
    opts: &'a OdeOptions,
    norm_dims: usize,
    record: bool,
    stats: SolveStats,
    steps: Vec<Step>,
}

impl<'a, F> Integrator<'a, F>
where
    F: FnMut(f32, &[f32]) -> Vec<f32>,
{
    fn eval(&mut self, t: f32, y: &[f32]) -> Result<Vec<f32>, NumericalError> {
        self.stats.nfe += 1;
        let k = (self.f)(t, y);
        if !all_finite(&k) {
            return Err(NumericalError::NonFinite { stage: "derivative", t });
        }
        Ok(k)
    }

    fn attempt(
        &mut self,
        t: f32,
        y: &[f32],
        h: f32,
        k1: Option<&[f32]>,
    ) -> Result<Attempt, NumericalError> {
        let tab = self.tab;
        let s = tab.stages();
        let mut ks: Vec<Vec<f32>> = Vec::with_capacity(s);
        let mut stages = Vec::with_capacity(if self.record { s } else { 0 });
        for i in 0..s {
            let ti = t + tab.c[i] * h;
            let mut yi = y.to_vec();
            for (j, &a) in tab.a[i].iter().enumerate() {
                if a != 0.0 {
                    axpy(&mut yi, h * a, &ks[j]);
                }
            }
            let k = match (i, k1) {
                (0, Some(k)) => k.to_vec(),
                _ => self.eval(ti, &yi)?,
            };
            if self.record {
                stages.push((ti, yi));
            }
            ks.push(k);
        }
        let mut y_new = y.to_vec();
        for (i, &b) in tab.b.iter().enumerate() {
            if b != 0.0 {
                axpy(&mut y_new, h * b, &ks[i]);
            }
        }
        let error = tab.err.map(|e| {
            let mut err = vec![0.0; y.len()];
            for (i, &c) in e.iter().enumerate() {
                if c != 0.0 {
                    axpy(&mut err, h * c, &ks[i]);
                }
            }
            err
        });
        let last_k = ks.pop().unwrap_or_default();
        Ok(Attempt {
            y_new,
            error,
            last_k,
            stages,
        })
    }

    fn accept(
        &mut self,
        t: f32,
        y: &[f32],
        h: f32,
        stages: Vec<(f32, Vec<f32>)>,
    ) -> Result<(), NumericalError> {
        if !all_finite(y) {
            return Err(NumericalError::NonFinite { stage: "state", t });
        }
        self.stats.accepted += 1;
        if self.record {
            self.steps.push(Step { h, stages });
        }
        Ok(())
    }

    fn fixed(
        &mut self,
        y0: &[f32],
        times: &[f32],
    ) -> Result<(Vec<Vec<f32>>, Vec<usize>), NumericalError> {
        let mut ys = vec![y0.to_vec()];
        let mut output_step = vec![0];
        let mut y = y0.to_vec();
        for w in times.windows(2) {
            let (t_a, t_b) = (w[0], w[1]);
            let span = t_b - t_a;
            let n_sub = match self.opts.step_size {
                Some(s) if s > 0.0 => (span.abs() / s).ceil().max(1.0),
                _ => 1.0,
            };
            // The step budget covers the whole integration, as on the adaptive path.
            let budget = self.opts.max_num_steps.saturating_sub(self.stats.accepted);
            if n_sub > budget as f32 {
                return Err(NumericalError::TooManySteps {
                    max_steps: self.opts.max_num_steps,
                    target: t_b,
                });
            }
            let n_sub = n_sub as usize;
            let h = span / n_sub as f32;
            for i in 0..n_sub {
                let t = t_a + i as f32 * h;
                let h_i = if i + 1 == n_sub { t_b - t } else { h };
                let att = self.attempt(t, &y, h_i, None)?;
                y = att.y_new;
                self.accept(t + h_i, &y, h_i, att.stages)?;
            }
            ys.push(y.clone());
            output_step.push(self.stats.accepted);
        }
        Ok((ys, output_step))
    }

    /// Initial step after Hairer, Nørsett & Wanner (II.4), limited to the
    /// integration span.
    fn initial_step(
        &mut self,
        t0: f32,
        y0: &[f32],
        f0: &[f32],
        dir: f32,
        span: f32,
    ) -> Result<f32, NumericalError> {
        let (rtol, atol) = (self.opts.rtol, self.opts.atol);
        let scale = |i: usize| atol + rtol * y0[i].abs();
        let d0 = rms_norm(y0, self.norm_dims, scale);
        let d1 = rms_norm(f0, self.norm_dims, scale);
        let h0 = if d0 < 1e-5 || d1 < 1e-5 { 1e-6 } else { 0.01 * d0 / d1 };
        let h0 = h0.min(span);
        let mut y1 = y0.to_vec();
        axpy(&mut y1, dir * h0, f0);
        let f1 = self.eval(t0 + dir * h0, &y1)?;
        let diff: Vec<f32> = f1.iter().zip(f0).map(|(a, b)| a - b).collect();
        let d2 = rms_norm(&diff, self.norm_dims, scale) / h0;
        let h1 = if d1.max(d2) <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / d1.max(d2)).powf(1.0 / self.tab.order as f32)
        };
        Ok((100.0 * h0).min(h1).min(span))
    }

    fn adaptive(
        &mut self,
        y0: &[f32],
        times: &[f32],
        dir: f32,
    ) -> Result<(Vec<Vec<f32>>, Vec<usize>), NumericalError> {
        let mut ys = vec![y0.to_vec()];
        let mut output_step = vec![0];
        if times.len() < 2 {
            return Ok((ys, output_step));
        }
        let (rtol, atol) = (self.opts.rtol, self.opts.atol);
        let exponent = -1.0 / self.tab.order as f32;
        let mut t = times[0];
        let mut y = y0.to_vec();
        let mut k1 = self.eval(t, &y)?;
        let span = (times[times.len() - 1] - t).abs();
        let mut h = match self.opts.step_size {
            Some(s) if s > 0.0 => s.min(span),
            _ => self.initial_step(t, &y, &k1, dir, span)?,
        } * dir;
        let mut attempts = 0usize;

        for &target in &times[1..] {
            loop {
                let remaining = target - t;
                if remaining * dir <= 4.0 * f32::EPSILON * target.abs().max(1.0) {
                    t = target;
                    break;
                }
                if attempts >= self.opts.max_num_steps {
                    return Err(NumericalError::TooManySteps {
                        max_steps: self.opts.max_num_steps,
                        target,
                    });
                }
                attempts += 1;
                let lands = (h - remaining) * dir >= 0.0;
                let h_try = if lands { remaining } else { h };
                if h_try.abs() <= 4.0 * f32::EPSILON * t.abs().max(1.0) {
                    return Err(NumericalError::StepSizeUnderflow { t, h: h_try });
                }

                let att = self.attempt(t, &y, h_try, Some(&k1))?;
                let err = match &att.error {
                    Some(e) => rms_norm(e, self.norm_dims, |i| {
                        atol + rtol * y[i].abs().max(att.y_new[i].abs())
                    }),
                    None => 0.0,
                };

                let factor = if !err.is_finite() {
                    MIN_FACTOR
                } else if err == 0.0 {
                    MAX_FACTOR
                } else {
                    (SAFETY * err.powf(exponent)).clamp(MIN_FACTOR, MAX_FACTOR)
                };

                if err.is_finite() && err <= 1.0 {
                    let t_new = if lands { target } else { t + h_try };
                    y = att.y_new;
                    self.accept(t_new, &y, h_try, att.stages)?;
                    k1 = if self.tab.fsal { att.last_k } else { self.eval(t_new, &y)? };
                    t = t_new;
                    h = h_try * factor;
                } else {
                    self.stats.rejected += 1;
                    h = h_try * factor.min(1.0);
                }
            }
            ys.push(y.clone());
            output_step.push(self.stats.accepted);
        }
        Ok((ys, output_step))
    }
}

/// Integrate `dy/dt = f(t, y)` from `times[0]` through every entry of
/// `times` (monotonic in either direction).
///
/// `norm_dims` limits adaptive error control to the leading state
/// components. With `record` set, the stage inputs of every accepted step are
/// kept for a reverse pass.
pub(crate) fn integrate<F>(
    f: &mut F,
    y0: &[f32],
    times: &[f32],
    opts: &OdeOptions,
    norm_dims: usize,
    record: bool,
) -> Result<Trajectory, NumericalError>
where
    F: FnMut(f32, &[f32]) -> Vec<f32>,
{
    let dir = check_times(times)?;
    if !all_finite(y0) {
        return Err(NumericalError::NonFinite {
            stage: "initial state",
            t: times.first().copied().unwrap_or(0.0),
        });
    }
    let tab = opts.solver.tableau();
    let mut integrator = Integrator {
        f,
        tab,
        opts,
        norm_dims,
        record,
        stats: SolveStats::default(),
        steps: Vec::new(),
    };
    let (ys, output_step) = if opts.solver.is_adaptive() {
        integrator.adaptive(y0, times, dir)?
    } else {
        integrator.fixed(y0, times)?
    };
    Ok(Trajectory {
        ys,
        steps: integrator.steps,
        output_step,
        stats: integrator.stats,
    })
}
