//! Scalar activations and their derivatives.

/// `ln(1 + e^x)`, stable for any finite `x` (no overflow at +1000).
pub fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Derivative of `softplus`: the logistic sigmoid.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Inverse of `softplus` for `y > 0`: `ln(e^y − 1)`.
pub fn inverse_softplus(y: f64) -> f64 {
    y + (-(-y).exp_m1()).ln()
}

pub fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// ReLU gradient mask; zero at the kink.
pub fn relu_grad(pre_activation: f64) -> f64 {
    if pre_activation > 0.0 { 1.0 } else { 0.0 }
}
