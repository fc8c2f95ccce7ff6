//! Training-loss primitives.
//!
//! Pure scalar functions over predictions and targets; gradient computation
//! belongs to the external automatic-differentiation collaborator. The
//! detector pipelines assemble these into per-image classification and
//! regression terms.

use crate::util::math::{bce_with_logits, sigmoid};

/// Focal-loss shaping parameters for the one-stage classification term.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FocalConfig {
    /// Positive-class balance weight; a negative value disables weighting.
    pub alpha: f32,
    /// Focusing exponent down-weighting well-classified examples.
    pub gamma: f32,
}

impl Default for FocalConfig {
    fn default() -> Self {
        Self {
            alpha: 0.25,
            gamma: 2.0,
        }
    }
}

/// Named loss terms for one image or one batch.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DetectionLoss {
    /// Classification (objectness or per-class) term.
    pub classification: f32,
    /// Box-regression term.
    pub regression: f32,
}

impl DetectionLoss {
    /// Scalar training objective.
    pub fn total(&self) -> f32 {
        self.classification + self.regression
    }
}

/// Smooth-L1 (Huber) penalty on a single residual.
///
/// Quadratic within `beta` of zero, linear beyond; `beta <= 0` degrades to
/// plain L1.
pub fn smooth_l1(diff: f32, beta: f32) -> f32 {
    let abs = diff.abs();
    if beta <= 0.0 {
        return abs;
    }
    if abs < beta {
        0.5 * diff * diff / beta
    } else {
        abs - 0.5 * beta
    }
}

/// Smooth-L1 summed over the four components of a delta quadruple.
pub fn smooth_l1_box(pred: [f32; 4], target: [f32; 4], beta: f32) -> f32 {
    pred.iter()
        .zip(target.iter())
        .map(|(p, t)| smooth_l1(p - t, beta))
        .sum()
}

/// Numerically stable binary cross-entropy on a logit.
pub fn binary_cross_entropy_with_logits(logit: f32, target: f32) -> f32 {
    bce_with_logits(logit, target)
}

/// Sigmoid focal loss on a single logit.
///
/// Reduces to plain BCE at `gamma = 0` with weighting disabled.
pub fn sigmoid_focal_loss(logit: f32, target: f32, focal: FocalConfig) -> f32 {
    let p = sigmoid(logit);
    let ce = bce_with_logits(logit, target);
    let p_t = p * target + (1.0 - p) * (1.0 - target);
    let mut loss = ce * (1.0 - p_t).powf(focal.gamma);
    if focal.alpha >= 0.0 {
        loss *= focal.alpha * target + (1.0 - focal.alpha) * (1.0 - target);
    }
    loss
}
