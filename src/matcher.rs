//! Ground-truth assignment for anchors and proposals.
//!
//! Each anchor receives exactly one assignment per image: the class-bearing
//! ground-truth box it supervises, background, or ignore (excluded from the
//! loss). Assignment is a pure function of the IoU matrix and the threshold
//! configuration, with lowest-index tie-breaks throughout so repeated runs
//! agree bit for bit.

use crate::geometry::{BBox, IouMatrix};
use crate::util::{DetectError, DetectResult};

/// IoU thresholds for [`Matcher`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatcherConfig {
    /// Anchors whose best IoU falls below this become background.
    pub low: f32,
    /// Anchors whose best IoU reaches this become foreground.
    pub high: f32,
    /// Guarantee every overlapped ground-truth box at least one foreground
    /// anchor, overriding the threshold bands for its best anchor.
    pub force_match: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            low: 0.4,
            high: 0.5,
            force_match: true,
        }
    }
}

/// Per-anchor match outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Assignment {
    /// Supervised by the ground-truth box at this index.
    Foreground { gt: usize },
    /// Negative example.
    Background,
    /// Excluded from the loss.
    Ignore,
}

impl Assignment {
    /// True for foreground assignments.
    pub fn is_foreground(&self) -> bool {
        matches!(self, Assignment::Foreground { .. })
    }

    /// Ground-truth index for foreground assignments.
    pub fn gt(&self) -> Option<usize> {
        match self {
            Assignment::Foreground { gt } => Some(*gt),
            _ => None,
        }
    }
}

/// Threshold-based anchor/ground-truth matcher.
#[derive(Clone, Copy, Debug)]
pub struct Matcher {
    cfg: MatcherConfig,
}

impl Matcher {
    /// Validates thresholds and builds a matcher.
    ///
    /// `low == high` is allowed and yields no ignore band (used by the
    /// proposal/ground-truth second pass of the two-stage variant).
    pub fn new(cfg: MatcherConfig) -> DetectResult<Self> {
        let valid = cfg.low.is_finite()
            && cfg.high.is_finite()
            && (0.0..=1.0).contains(&cfg.low)
            && (0.0..=1.0).contains(&cfg.high)
            && cfg.low <= cfg.high;
        if !valid {
            return Err(DetectError::InvalidConfig(
                "matcher thresholds must satisfy 0 <= low <= high <= 1",
            ));
        }
        Ok(Self { cfg })
    }

    /// Convenience wrapper computing the IoU matrix internally.
    pub fn match_boxes(&self, anchors: &[BBox], gt_boxes: &[BBox]) -> Vec<Assignment> {
        self.match_iou(&IouMatrix::between(anchors, gt_boxes))
    }

    /// Assigns every anchor row of `ious` to a ground-truth column,
    /// background, or ignore.
    ///
    /// With no ground truth every anchor is background. When force-matching
    /// is enabled, each ground-truth box left without a foreground anchor by
    /// the threshold bands claims its best-IoU anchor (ties toward the
    /// lowest anchor index, contested anchors toward the highest
    /// ground-truth index), provided that IoU is strictly positive.
    pub fn match_iou(&self, ious: &IouMatrix) -> Vec<Assignment> {
        let num_anchors = ious.rows();
        let num_gt = ious.cols();
        if num_gt == 0 {
            return vec![Assignment::Background; num_anchors];
        }

        let mut assignments = Vec::with_capacity(num_anchors);
        for row in 0..num_anchors {
            let (best_gt, best_iou) = argmax(ious.row(row));
            let assignment = if best_iou >= self.cfg.high {
                Assignment::Foreground { gt: best_gt }
            } else if best_iou < self.cfg.low {
                Assignment::Background
            } else {
                Assignment::Ignore
            };
            assignments.push(assignment);
        }

        if self.cfg.force_match {
            for gt in 0..num_gt {
                let already_matched = assignments
                    .iter()
                    .any(|a| *a == Assignment::Foreground { gt });
                if already_matched {
                    continue;
                }

                let mut best_row = 0usize;
                let mut best_iou = f32::NEG_INFINITY;
                for row in 0..num_anchors {
                    let value = ious.at(row, gt);
                    if value > best_iou {
                        best_iou = value;
                        best_row = row;
                    }
                }
                if best_iou > 0.0 {
                    assignments[best_row] = Assignment::Foreground { gt };
                }
            }
        }

        assignments
    }
}

fn argmax(row: &[f32]) -> (usize, f32) {
    let mut best_idx = 0usize;
    let mut best = f32::NEG_INFINITY;
    for (idx, &value) in row.iter().enumerate() {
        if value > best {
            best = value;
            best_idx = idx;
        }
    }
    (best_idx, best)
}
