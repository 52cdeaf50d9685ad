//! Numerical integration of the latent dynamics.
//!
//! A small closed set of explicit Runge–Kutta schemes share one
//! "integrate trajectory" routine. Gradients flow back either through the
//! recorded steps or through a continuous adjoint solve.

mod sensitivity;
mod solver;
pub mod tableau;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, NumericalError};
use crate::math::Matrix;
pub use tableau::Tableau;

/// Right-hand side `dy/dt = f(t, y)` with vector-Jacobian products.
pub trait Dynamics {
    fn state_dim(&self) -> usize;

    /// Length of the flat parameter gradient filled by [`Dynamics::vjp`].
    fn num_params(&self) -> usize;

    fn eval(&mut self, t: f32, y: &[f32]) -> Vec<f32>;

    /// Returns `cotangentᵀ ∂f/∂y` and adds `cotangentᵀ ∂f/∂θ` to
    /// `param_grad`.
    fn vjp(&mut self, t: f32, y: &[f32], cotangent: &[f32], param_grad: &mut [f32]) -> Vec<f32>;
}

/// Integration scheme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Solver {
    /// Forward Euler on the output grid.
    #[default]
    Euler,
    /// Explicit midpoint on the output grid.
    Midpoint,
    /// Classic fourth order Runge–Kutta on the output grid.
    Rk4,
    /// Adaptive Dormand–Prince 5(4).
    Dopri5,
}

impl Solver {
    pub const ALL: [Solver; 4] = [Solver::Euler, Solver::Midpoint, Solver::Rk4, Solver::Dopri5];

    pub fn name(&self) -> &'static str {
        match self {
            Solver::Euler => "euler",
            Solver::Midpoint => "midpoint",
            Solver::Rk4 => "rk4",
            Solver::Dopri5 => "dopri5",
        }
    }

    pub fn tableau(&self) -> &'static Tableau {
        match self {
            Solver::Euler => &tableau::EULER,
            Solver::Midpoint => &tableau::MIDPOINT,
            Solver::Rk4 => &tableau::RK4,
            Solver::Dopri5 => &tableau::DOPRI5,
        }
    }

    pub fn is_adaptive(&self) -> bool {
        self.tableau().err.is_some()
    }
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Solver {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Solver::ALL
            .into_iter()
            .find(|m| m.name() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| {
                ForecastError::config(
                    "solver",
                    format!("unknown method '{s}' (expected euler, midpoint, rk4 or dopri5)"),
                )
            })
    }
}

/// How gradients are carried back through the integration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Differentiate the discrete steps (discretize-then-optimize).
    #[default]
    Backprop,
    /// Solve the continuous adjoint system backwards in time.
    Adjoint,
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sensitivity::Backprop => "backprop",
            Sensitivity::Adjoint => "adjoint",
        })
    }
}

impl FromStr for Sensitivity {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backprop" => Ok(Sensitivity::Backprop),
            "adjoint" => Ok(Sensitivity::Adjoint),
            other => Err(ForecastError::config(
                "sensitivity",
                format!("unknown strategy '{other}' (expected backprop or adjoint)"),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OdeOptions {
    pub solver: Solver,
    pub sensitivity: Sensitivity,
    pub rtol: f32,
    pub atol: f32,
    /// Maximum substep for fixed-grid schemes, first step for adaptive ones.
    pub step_size: Option<f32>,
    /// Budget of attempted steps for adaptive schemes.
    pub max_num_steps: usize,
}

impl Default for OdeOptions {
    fn default() -> Self {
        Self {
            solver: Solver::Euler,
            sensitivity: Sensitivity::Backprop,
            rtol: 1e-4,
            atol: 1e-6,
            step_size: None,
            max_num_steps: 10_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SolveStats {
    pub accepted: usize,
    pub rejected: usize,
    /// Number of right-hand side evaluations.
    pub nfe: usize,
}

/// Gradients of a scalar loss with respect to the initial state and the
/// dynamics parameters.
#[derive(Clone, Debug)]
pub struct Gradients {
    pub y0: Vec<f32>,
    pub params: Vec<f32>,
}

/// States at every requested time plus what the chosen sensitivity needs to
/// run the reverse pass.
#[derive(Clone, Debug)]
pub struct Solution {
    pub ys: Vec<Vec<f32>>,
    pub times: Vec<f32>,
    pub stats: SolveStats,
    options: OdeOptions,
    steps: Vec<solver::Step>,
    output_step: Vec<usize>,
}

impl Solution {
    /// States stacked as a `[num_times, state_dim]` matrix.
    pub fn to_matrix(&self) -> Matrix {
        Matrix::from_rows(&self.ys)
    }

    pub fn final_state(&self) -> &[f32] {
        self.ys.last().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn options(&self) -> &OdeOptions {
        &self.options
    }

    /// Pull `grad_ys` (one cotangent per output time) back to the initial
    /// state and the parameters of `f`. `f` must be the dynamics the
    /// trajectory was solved with.
    pub fn backward<D: Dynamics + ?Sized>(
        &self,
        f: &mut D,
        grad_ys: &[Vec<f32>],
    ) -> crate::error::Result<Gradients> {
        if grad_ys.len() != self.ys.len() {
            return Err(ForecastError::config(
                "integrator",
                format!("expected {} output cotangents, got {}", self.ys.len(), grad_ys.len()),
            ));
        }
        let grads = match self.options.sensitivity {
            Sensitivity::Backprop => sensitivity::backprop(f, self, grad_ys)?,
            Sensitivity::Adjoint => sensitivity::adjoint(f, self, grad_ys)?,
        };
        Ok(grads)
    }
}

/// Solve `f` from `y0` at `times[0]` and report the state at every entry of
/// `times`, which must be strictly monotonic.
pub fn odeint<D: Dynamics + ?Sized>(
    f: &mut D,
    y0: &[f32],
    times: &[f32],
    options: &OdeOptions,
) -> Result<Solution, NumericalError> {
    let record = options.sensitivity == Sensitivity::Backprop;
    let norm_dims = f.state_dim();
    let mut rhs = |t: f32, y: &[f32]| f.eval(t, y);
    let traj = solver::integrate(&mut rhs, y0, times, options, norm_dims, record)?;
    Ok(Solution {
        ys: traj.ys,
        times: times.to_vec(),
        stats: traj.stats,
        options: options.clone(),
        steps: traj.steps,
        output_step: traj.output_step,
    })
}
