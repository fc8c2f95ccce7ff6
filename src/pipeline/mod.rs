//! Detector pipelines.
//!
//! Both variants share the anchor generator, matcher, box coder, and
//! post-processor; they differ in how raw per-anchor network outputs become
//! scored candidate boxes. That capability is the [`CandidateSource`] trait,
//! and [`detect`] is the common inference path consuming it.

pub mod one_stage;
pub mod two_stage;

use crate::coder::BoxCoder;
use crate::geometry::BBox;
use crate::matcher::Assignment;
use crate::postprocess::{Detection, Postprocessor};
use crate::util::{DetectError, DetectResult};

/// Ground-truth box with its class column index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroundTruth {
    /// Annotated box in image coordinates.
    pub bbox: BBox,
    /// Class column index, `0..num_classes`.
    pub label: usize,
}

/// Decoded candidate boxes with activated per-class scores, ready for the
/// shared post-processing path.
#[derive(Clone, Debug, Default)]
pub struct ScoredCandidates {
    /// Candidate boxes, clipped to the image.
    pub boxes: Vec<BBox>,
    /// Row-major `[candidate][class]` probabilities.
    pub scores: Vec<f32>,
    /// Score columns per candidate.
    pub num_classes: usize,
}

/// Capability shared by the detector variants: produce per-candidate
/// classified boxes for one image.
///
/// The dense one-stage head decodes every anchor directly; the two-stage
/// head decodes ROI-head refinements of its proposals. The shared
/// post-processor consumes either through this interface.
pub trait CandidateSource {
    /// Decodes and scores this image's candidates.
    fn candidates(&self) -> DetectResult<ScoredCandidates>;
}

/// Shared inference tail: candidates from `source`, detections out.
pub fn detect<S: CandidateSource>(
    source: &S,
    postprocessor: &Postprocessor,
) -> DetectResult<Vec<Detection>> {
    let candidates = source.candidates()?;
    postprocessor.run(
        &candidates.boxes,
        &candidates.scores,
        candidates.num_classes,
    )
}

/// Per-anchor supervision derived from one image's assignments.
#[derive(Clone, Debug)]
pub struct TargetSet {
    /// One assignment per anchor, in anchor order.
    pub assignments: Vec<Assignment>,
    /// Encoded regression targets, valid only at foreground rows (zeroed
    /// elsewhere).
    pub regression: Vec<[f32; 4]>,
    /// Number of foreground rows.
    pub num_foreground: usize,
}

/// Encodes regression targets for every foreground assignment.
pub(crate) fn build_targets(
    coder: &BoxCoder,
    anchors: &[BBox],
    ground_truth: &[GroundTruth],
    assignments: Vec<Assignment>,
) -> DetectResult<TargetSet> {
    if anchors.len() != assignments.len() {
        return Err(DetectError::LengthMismatch {
            left: anchors.len(),
            right: assignments.len(),
            context: "anchors vs assignments",
        });
    }

    let mut regression = vec![[0.0f32; 4]; anchors.len()];
    let mut num_foreground = 0usize;
    for (idx, assignment) in assignments.iter().enumerate() {
        if let Assignment::Foreground { gt } = assignment {
            regression[idx] = coder.encode(anchors[idx], ground_truth[*gt].bbox)?;
            num_foreground += 1;
        }
    }

    Ok(TargetSet {
        assignments,
        regression,
        num_foreground,
    })
}

/// Rejects ground-truth labels outside the score matrix.
pub(crate) fn check_labels(ground_truth: &[GroundTruth], num_classes: usize) -> DetectResult<()> {
    for gt in ground_truth {
        if gt.label >= num_classes {
            return Err(DetectError::ShapeMismatch {
                expected: num_classes,
                got: gt.label,
                context: "ground-truth class label",
            });
        }
    }
    Ok(())
}
