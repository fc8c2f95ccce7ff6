//! Inference-time post-processing.
//!
//! Turns decoded candidate boxes with per-class scores into the final
//! per-image detection list: score filter, optional top-K cap, independent
//! per-class NMS, then a global sort and detections-per-image cap. The same
//! path serves both detector variants.

pub mod nms;
pub mod topk;

use crate::geometry::BBox;
use crate::postprocess::nms::nms;
use crate::postprocess::topk::{sort_scored_desc, Scored, TopK};
use crate::trace::{trace_event, trace_span};
use crate::util::{DetectError, DetectResult};

/// Configuration for [`Postprocessor`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PostprocessConfig {
    /// Candidates scoring below this are discarded before NMS.
    pub score_threshold: f32,
    /// Optional cap on candidates entering NMS, across all classes.
    pub pre_nms_topk: Option<usize>,
    /// Per-class suppression IoU threshold.
    pub nms_iou: f32,
    /// Maximum detections returned per image.
    pub max_detections: usize,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.05,
            pre_nms_topk: Some(1000),
            nms_iou: 0.5,
            max_detections: 100,
        }
    }
}

/// Final output unit: a box, its class, and its confidence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    /// Detected box in image coordinates.
    pub bbox: BBox,
    /// Class column index.
    pub label: usize,
    /// Confidence score in [0, 1].
    pub score: f32,
}

/// Score-filter + per-class-NMS post-processor.
#[derive(Clone, Copy, Debug, Default)]
pub struct Postprocessor {
    cfg: PostprocessConfig,
}

impl Postprocessor {
    /// Validates the configuration and builds a post-processor.
    pub fn new(cfg: PostprocessConfig) -> DetectResult<Self> {
        if !cfg.score_threshold.is_finite() {
            return Err(DetectError::InvalidConfig("score threshold must be finite"));
        }
        if !(cfg.nms_iou.is_finite() && (0.0..=1.0).contains(&cfg.nms_iou)) {
            return Err(DetectError::InvalidConfig("nms iou must lie in [0, 1]"));
        }
        if cfg.max_detections == 0 {
            return Err(DetectError::InvalidConfig("max detections must be positive"));
        }
        Ok(Self { cfg })
    }

    /// Runs the full post-processing pipeline for one image.
    ///
    /// `scores` is row-major `[candidate][class]` with `num_classes` columns
    /// of already-activated probabilities. Zero candidates in, zero
    /// detections out.
    pub fn run(
        &self,
        boxes: &[BBox],
        scores: &[f32],
        num_classes: usize,
    ) -> DetectResult<Vec<Detection>> {
        if num_classes == 0 {
            return Err(DetectError::InvalidConfig("num_classes must be positive"));
        }
        if scores.len() != boxes.len() * num_classes {
            return Err(DetectError::LengthMismatch {
                left: boxes.len() * num_classes,
                right: scores.len(),
                context: "candidate scores",
            });
        }

        let _span = trace_span!("postprocess", candidates = boxes.len()).entered();

        // Score filter, flattening (box, class) pairs.
        let mut candidates: Vec<(usize, usize, f32)> = Vec::new();
        for (box_idx, row) in scores.chunks_exact(num_classes).enumerate() {
            for (class, &score) in row.iter().enumerate() {
                if score >= self.cfg.score_threshold {
                    candidates.push((box_idx, class, score));
                }
            }
        }

        if let Some(cap) = self.cfg.pre_nms_topk {
            if candidates.len() > cap {
                let mut topk = TopK::new(cap);
                for (idx, &(_, _, score)) in candidates.iter().enumerate() {
                    topk.push(Scored { index: idx, score });
                }
                candidates = topk
                    .into_sorted_desc()
                    .into_iter()
                    .map(|s| candidates[s.index])
                    .collect();
            }
        }

        // Per-class suppression.
        let mut survivors: Vec<Scored> = Vec::new();
        for class in 0..num_classes {
            let class_candidates: Vec<usize> = (0..candidates.len())
                .filter(|&i| candidates[i].1 == class)
                .collect();
            if class_candidates.is_empty() {
                continue;
            }
            let class_boxes: Vec<BBox> = class_candidates
                .iter()
                .map(|&i| boxes[candidates[i].0])
                .collect();
            let class_scores: Vec<f32> =
                class_candidates.iter().map(|&i| candidates[i].2).collect();
            for kept in nms(&class_boxes, &class_scores, self.cfg.nms_iou)? {
                survivors.push(Scored {
                    index: class_candidates[kept],
                    score: class_scores[kept],
                });
            }
        }

        // Merge across classes, best first, capped.
        sort_scored_desc(&mut survivors);
        survivors.truncate(self.cfg.max_detections);

        let detections: Vec<Detection> = survivors
            .into_iter()
            .map(|s| {
                let (box_idx, class, score) = candidates[s.index];
                Detection {
                    bbox: boxes[box_idx],
                    label: class,
                    score,
                }
            })
            .collect();

        trace_event!("detections", count = detections.len());
        Ok(detections)
    }
}
