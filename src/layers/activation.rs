use serde::{Deserialize, Serialize};

use crate::math::Matrix;

/// Element-wise nonlinearity applied after an affine layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Identity,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn scalar(self, v: f32) -> f32 {
        match self {
            Activation::Identity => v,
            Activation::Relu => v.max(0.0),
            Activation::Tanh => v.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-v).exp()),
        }
    }

    /// Derivative expressed through the activated value `h`.
    fn slope(self, h: f32) -> f32 {
        match self {
            Activation::Identity => 1.0,
            Activation::Relu => {
                if h > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Tanh => 1.0 - h * h,
            Activation::Sigmoid => h * (1.0 - h),
        }
    }

    /// Apply in place.
    pub fn apply(self, m: &mut Matrix) {
        if self == Activation::Identity {
            return;
        }
        for v in m.data.iter_mut() {
            *v = self.scalar(*v);
        }
    }

    /// Chain `grad` through the activation given its output `activated`.
    pub fn backward(self, grad: &mut Matrix, activated: &Matrix) {
        if self == Activation::Identity {
            return;
        }
        for (g, &h) in grad.data.iter_mut().zip(activated.data.iter()) {
            *g *= self.slope(h);
        }
    }
}
