//! Butcher tableaus of the explicit Runge–Kutta schemes.

/// Coefficients of an explicit Runge–Kutta method.
///
/// `a[i]` holds the coupling of stage `i` to the stages before it, so `a[0]`
/// is always empty. `err` holds `b - b_hat` for embedded pairs.
#[derive(Debug)]
pub struct Tableau {
    pub c: &'static [f32],
    pub a: &'static [&'static [f32]],
    pub b: &'static [f32],
    pub err: Option<&'static [f32]>,
    /// Order used by the step controller.
    pub order: u32,
    /// The last stage is evaluated at the new state and can seed the next step.
    pub fsal: bool,
}

impl Tableau {
    pub fn stages(&self) -> usize {
        self.c.len()
    }
}

pub static EULER: Tableau = Tableau {
    c: &[0.0],
    a: &[&[]],
    b: &[1.0],
    err: None,
    order: 1,
    fsal: false,
};

pub static MIDPOINT: Tableau = Tableau {
    c: &[0.0, 0.5],
    a: &[&[], &[0.5]],
    b: &[0.0, 1.0],
    err: None,
    order: 2,
    fsal: false,
};

pub static RK4: Tableau = Tableau {
    c: &[0.0, 0.5, 0.5, 1.0],
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
    err: None,
    order: 4,
    fsal: false,
};

/// Dormand–Prince 5(4).
pub static DOPRI5: Tableau = Tableau {
    c: &[0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0],
    a: &[
        &[],
        &[1.0 / 5.0],
        &[3.0 / 40.0, 9.0 / 40.0],
        &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
        &[19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0],
        &[
            9017.0 / 3168.0,
            -355.0 / 33.0,
            46732.0 / 5247.0,
            49.0 / 176.0,
            -5103.0 / 18656.0,
        ],
        &[
            35.0 / 384.0,
            0.0,
            500.0 / 1113.0,
            125.0 / 192.0,
            -2187.0 / 6784.0,
            11.0 / 84.0,
        ],
    ],
    b: &[
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
        0.0,
    ],
    err: Some(&[
        71.0 / 57600.0,
        0.0,
        -71.0 / 16695.0,
        71.0 / 1920.0,
        -17253.0 / 339200.0,
        22.0 / 525.0,
        -1.0 / 40.0,
    ]),
    order: 5,
    fsal: true,
};
