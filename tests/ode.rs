use odecast::error::NumericalError;
use odecast::ode::{odeint, Dynamics, OdeOptions, Sensitivity, Solver};

/// dy/dt = -k y
struct Decay {
    k: f32,
}

impl Dynamics for Decay {
    fn state_dim(&self) -> usize {
        1
    }

    fn num_params(&self) -> usize {
        1
    }

    fn eval(&mut self, _t: f32, y: &[f32]) -> Vec<f32> {
        vec![-self.k * y[0]]
    }

    fn vjp(&mut self, _t: f32, y: &[f32], a: &[f32], pg: &mut [f32]) -> Vec<f32> {
        pg[0] -= a[0] * y[0];
        vec![-self.k * a[0]]
    }
}

/// Harmonic oscillator with a time-dependent forcing, two states.
struct Forced {
    w: f32,
}

impl Dynamics for Forced {
    fn state_dim(&self) -> usize {
        2
    }

    fn num_params(&self) -> usize {
        1
    }

    fn eval(&mut self, t: f32, y: &[f32]) -> Vec<f32> {
        vec![y[1], -self.w * y[0] + t.sin()]
    }

    fn vjp(&mut self, _t: f32, y: &[f32], a: &[f32], pg: &mut [f32]) -> Vec<f32> {
        pg[0] -= a[1] * y[0];
        vec![-self.w * a[1], a[0]]
    }
}

fn grid(n: usize, dt: f32) -> Vec<f32> {
    (0..=n).map(|i| i as f32 * dt).collect()
}

fn final_error(solver: Solver) -> f32 {
    let mut f = Decay { k: 1.0 };
    let opts = OdeOptions {
        solver,
        rtol: 1e-5,
        atol: 1e-7,
        ..OdeOptions::default()
    };
    let sol = odeint(&mut f, &[1.0], &grid(10, 0.1), &opts).unwrap();
    (sol.final_state()[0] - (-1.0f32).exp()).abs()
}

#[test]
fn higher_order_schemes_are_more_accurate() {
    let euler = final_error(Solver::Euler);
    let midpoint = final_error(Solver::Midpoint);
    let rk4 = final_error(Solver::Rk4);
    let dopri5 = final_error(Solver::Dopri5);
    assert!(euler > 1e-2, "euler {euler}");
    assert!(midpoint < euler, "midpoint {midpoint} euler {euler}");
    assert!(rk4 < midpoint, "rk4 {rk4} midpoint {midpoint}");
    assert!(rk4 < 1e-5, "rk4 {rk4}");
    assert!(dopri5 < 5e-4, "dopri5 {dopri5}");
}

#[test]
fn outputs_land_on_requested_times() {
    let mut f = Decay { k: 0.3 };
    let times = [0.0, 0.7, 2.5, 3.0];
    for solver in Solver::ALL {
        let opts = OdeOptions {
            solver,
            ..OdeOptions::default()
        };
        let sol = odeint(&mut f, &[2.0], &times, &opts).unwrap();
        assert_eq!(sol.ys.len(), times.len());
        assert_eq!(sol.ys[0], vec![2.0]);
        assert_eq!(sol.times, times.to_vec());
    }
}

#[test]
fn decreasing_times_integrate_backwards() {
    let mut f = Decay { k: 1.0 };
    let opts = OdeOptions {
        solver: Solver::Rk4,
        ..OdeOptions::default()
    };
    let sol = odeint(&mut f, &[(-1.0f32).exp()], &[1.0, 0.5, 0.0], &opts).unwrap();
    assert!((sol.final_state()[0] - 1.0).abs() < 1e-3);
}

#[test]
fn step_size_subdivides_fixed_grids() {
    let mut f = Decay { k: 1.0 };
    let coarse = OdeOptions {
        solver: Solver::Euler,
        ..OdeOptions::default()
    };
    let fine = OdeOptions {
        step_size: Some(0.125),
        ..coarse.clone()
    };
    let a = odeint(&mut f, &[1.0], &[0.0, 1.0], &coarse).unwrap();
    let b = odeint(&mut f, &[1.0], &[0.0, 1.0], &fine).unwrap();
    assert_eq!(a.final_state()[0], 0.0);
    assert!((b.final_state()[0] - 0.875f32.powi(8)).abs() < 1e-6);
    assert_eq!(b.stats.accepted, 8);
}

#[test]
fn non_finite_dynamics_are_reported() {
    struct Blowup;
    impl Dynamics for Blowup {
        fn state_dim(&self) -> usize {
            1
        }
        fn num_params(&self) -> usize {
            0
        }
        fn eval(&mut self, _t: f32, _y: &[f32]) -> Vec<f32> {
            vec![f32::NAN]
        }
        fn vjp(&mut self, _t: f32, _y: &[f32], a: &[f32], _pg: &mut [f32]) -> Vec<f32> {
            a.to_vec()
        }
    }
    for solver in Solver::ALL {
        let opts = OdeOptions {
            solver,
            ..OdeOptions::default()
        };
        let err = odeint(&mut Blowup, &[1.0], &[0.0, 1.0], &opts).unwrap_err();
        assert!(matches!(err, NumericalError::NonFinite { .. }), "{solver}: {err}");
    }
}

#[test]
fn euler_backprop_is_exact_for_the_discrete_scheme() {
    // y_N = y0 (1 - k h)^N with h = 0.25, N = 4.
    let (k, y0, h, n) = (0.5f32, 2.0f32, 0.25f32, 4);
    let mut f = Decay { k };
    let opts = OdeOptions {
        solver: Solver::Euler,
        step_size: Some(h),
        ..OdeOptions::default()
    };
    let sol = odeint(&mut f, &[y0], &[0.0, 1.0], &opts).unwrap();
    let g = sol.backward(&mut f, &[vec![0.0], vec![1.0]]).unwrap();
    let base = 1.0 - k * h;
    assert!((g.y0[0] - base.powi(n)).abs() < 1e-6);
    let dk = -(n as f32) * h * y0 * base.powi(n - 1);
    assert!((g.params[0] - dk).abs() < 1e-5, "{} vs {dk}", g.params[0]);
}

#[test]
fn backprop_and_adjoint_match_analytic_gradients() {
    // L = y(1) + y(2) for dy/dt = -k y.
    let (k, y0) = (0.5f32, 2.0f32);
    let times = [0.0, 1.0, 2.0];
    let dy0: f32 = (-k).exp() + (-2.0 * k).exp();
    let dk: f32 = -y0 * ((-k).exp() + 2.0 * (-2.0 * k).exp());
    let cot = vec![vec![0.0], vec![1.0], vec![1.0]];

    for (solver, sensitivity) in [
        (Solver::Rk4, Sensitivity::Backprop),
        (Solver::Dopri5, Sensitivity::Backprop),
        (Solver::Rk4, Sensitivity::Adjoint),
        (Solver::Dopri5, Sensitivity::Adjoint),
    ] {
        let mut f = Decay { k };
        let opts = OdeOptions {
            solver,
            sensitivity,
            rtol: 1e-5,
            atol: 1e-7,
            step_size: Some(0.05),
            ..OdeOptions::default()
        };
        let sol = odeint(&mut f, &[y0], &times, &opts).unwrap();
        let g = sol.backward(&mut f, &cot).unwrap();
        assert!((g.y0[0] - dy0).abs() < 1e-3, "{solver}/{sensitivity}: {} vs {dy0}", g.y0[0]);
        assert!((g.params[0] - dk).abs() < 1e-3, "{solver}/{sensitivity}: {} vs {dk}", g.params[0]);
    }
}

#[test]
fn adjoint_agrees_with_backprop_on_forced_oscillator() {
    let times = grid(8, 0.5);
    let cot: Vec<Vec<f32>> = times.iter().map(|t| vec![t.cos(), 0.5]).collect();
    let mut grads = Vec::new();
    for sensitivity in [Sensitivity::Backprop, Sensitivity::Adjoint] {
        let mut f = Forced { w: 1.3 };
        let opts = OdeOptions {
            solver: Solver::Dopri5,
            sensitivity,
            rtol: 1e-5,
            atol: 1e-7,
            ..OdeOptions::default()
        };
        let sol = odeint(&mut f, &[1.0, 0.0], &times, &opts).unwrap();
        grads.push(sol.backward(&mut f, &cot).unwrap());
    }
    for i in 0..2 {
        assert!(
            (grads[0].y0[i] - grads[1].y0[i]).abs() < 1e-2,
            "{:?} {:?}",
            grads[0].y0,
            grads[1].y0
        );
    }
    assert!((grads[0].params[0] - grads[1].params[0]).abs() < 1e-2);
}

#[test]
fn wrong_number_of_cotangents_is_rejected() {
    let mut f = Decay { k: 1.0 };
    let sol = odeint(&mut f, &[1.0], &[0.0, 1.0], &OdeOptions::default()).unwrap();
    assert!(sol.backward(&mut f, &[vec![1.0]]).is_err());
}
