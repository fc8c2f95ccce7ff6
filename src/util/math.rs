//! Numeric helpers shared by the loss and scoring paths.

/// Logistic sigmoid.
pub(crate) fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Binary cross-entropy on a logit, in the overflow-free formulation
/// `max(x, 0) - x * z + ln(1 + exp(-|x|))`.
pub(crate) fn bce_with_logits(logit: f32, target: f32) -> f32 {
    logit.max(0.0) - logit * target + (-logit.abs()).exp().ln_1p()
}

#[cfg(test)]
mod tests {
    use super::{bce_with_logits, sigmoid};

    #[test]
    fn sigmoid_matches_reference_values() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!((sigmoid(2.0) - 0.880_797).abs() < 1e-5);
        assert!((sigmoid(-2.0) - 0.119_203).abs() < 1e-5);
    }

    #[test]
    fn sigmoid_saturates_without_overflow() {
        assert!(sigmoid(200.0) <= 1.0);
        assert!(sigmoid(-200.0) >= 0.0);
        assert!(sigmoid(200.0).is_finite());
        assert!(sigmoid(-200.0).is_finite());
    }

    #[test]
    fn bce_with_logits_matches_naive_formula() {
        for &(logit, target) in &[(0.3f32, 1.0f32), (-1.7, 0.0), (2.4, 0.0), (-0.2, 1.0)] {
            let p = sigmoid(logit);
            let naive = -(target * p.ln() + (1.0 - target) * (1.0 - p).ln());
            assert!((bce_with_logits(logit, target) - naive).abs() < 1e-5);
        }
    }

    #[test]
    fn bce_with_logits_is_finite_on_extreme_logits() {
        assert!(bce_with_logits(120.0, 0.0).is_finite());
        assert!(bce_with_logits(-120.0, 1.0).is_finite());
    }
}
