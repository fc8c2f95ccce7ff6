//! Single-stage dense detector (RetinaNet style).
//!
//! Every anchor is classified and regressed directly: matching runs against
//! the raw anchor grid, classification uses a sigmoid focal loss over all
//! non-ignored anchors (no sampling — the focal term absorbs the extreme
//! foreground/background imbalance), and regression is smooth-L1 over
//! foreground anchors only.

use std::sync::Arc;

use crate::anchors::cache::AnchorCache;
use crate::anchors::{AnchorConfig, AnchorGenerator, AnchorSet, FeatureMapShape};
use crate::coder::{BoxCoder, CoderConfig};
use crate::geometry::{clip, BBox, ImageSize};
use crate::loss::{sigmoid_focal_loss, smooth_l1_box, DetectionLoss, FocalConfig};
use crate::matcher::{Assignment, Matcher, MatcherConfig};
use crate::pipeline::{
    build_targets, check_labels, detect, CandidateSource, GroundTruth, ScoredCandidates,
};
use crate::postprocess::{Detection, PostprocessConfig, Postprocessor};
use crate::trace::{trace_event, trace_span};
use crate::util::math::sigmoid;
use crate::util::{DetectError, DetectResult};

/// Full configuration for [`OneStageDetector`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OneStageConfig {
    /// Anchor grid layout.
    pub anchors: AnchorConfig,
    /// Anchor/ground-truth matching thresholds.
    pub matcher: MatcherConfig,
    /// Box regression coding.
    pub coder: CoderConfig,
    /// Focal-loss shaping for the classification term.
    pub focal: FocalConfig,
    /// Smooth-L1 transition point for the regression term.
    pub smooth_l1_beta: f32,
    /// Inference-time filtering and suppression.
    pub postprocess: PostprocessConfig,
}

impl Default for OneStageConfig {
    fn default() -> Self {
        Self {
            anchors: AnchorConfig::default(),
            matcher: MatcherConfig::default(),
            coder: CoderConfig::default(),
            focal: FocalConfig::default(),
            smooth_l1_beta: 1.0 / 9.0,
            postprocess: PostprocessConfig::default(),
        }
    }
}

/// Raw dense-head outputs for one image, in anchor order.
#[derive(Clone, Copy, Debug)]
pub struct OneStageOutputs<'a> {
    /// Per-anchor per-class logits, row-major `[anchor][class]`.
    pub cls_logits: &'a [f32],
    /// Per-anchor regression deltas.
    pub deltas: &'a [[f32; 4]],
}

/// Dense single-stage detection pipeline.
pub struct OneStageDetector {
    num_classes: usize,
    anchor_cache: AnchorCache,
    matcher: Matcher,
    coder: BoxCoder,
    focal: FocalConfig,
    smooth_l1_beta: f32,
    postprocessor: Postprocessor,
}

impl OneStageDetector {
    /// Validates the configuration and builds the pipeline.
    pub fn new(num_classes: usize, cfg: OneStageConfig) -> DetectResult<Self> {
        if num_classes == 0 {
            return Err(DetectError::InvalidConfig("num_classes must be positive"));
        }
        if !(cfg.focal.gamma.is_finite() && cfg.focal.gamma >= 0.0) {
            return Err(DetectError::InvalidConfig("focal gamma must be non-negative"));
        }
        if !(cfg.focal.alpha.is_finite() && cfg.focal.alpha <= 1.0) {
            return Err(DetectError::InvalidConfig("focal alpha must not exceed 1"));
        }
        if !(cfg.smooth_l1_beta.is_finite() && cfg.smooth_l1_beta >= 0.0) {
            return Err(DetectError::InvalidConfig(
                "smooth-l1 beta must be non-negative",
            ));
        }
        Ok(Self {
            num_classes,
            anchor_cache: AnchorCache::new(AnchorGenerator::new(cfg.anchors)?),
            matcher: Matcher::new(cfg.matcher)?,
            coder: BoxCoder::new(cfg.coder),
            focal: cfg.focal,
            smooth_l1_beta: cfg.smooth_l1_beta,
            postprocessor: Postprocessor::new(cfg.postprocess)?,
        })
    }

    /// Score columns per anchor.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Anchor set for one feature-pyramid shape, generated on first use.
    pub fn anchors(&self, shapes: &[FeatureMapShape]) -> DetectResult<Arc<AnchorSet>> {
        self.anchor_cache.anchors(shapes)
    }

    /// Training loss for one image.
    ///
    /// Classification runs over every non-ignored anchor, regression over
    /// foreground anchors only; both terms are normalized by the foreground
    /// count (at least one). An image without ground truth contributes pure
    /// background classification and exactly zero regression.
    pub fn loss(
        &self,
        outputs: OneStageOutputs<'_>,
        shapes: &[FeatureMapShape],
        ground_truth: &[GroundTruth],
    ) -> DetectResult<DetectionLoss> {
        let anchors = self.anchors(shapes)?;
        anchors.validate_alignment(
            outputs.cls_logits.len(),
            self.num_classes,
            outputs.deltas.len(),
        )?;
        check_labels(ground_truth, self.num_classes)?;

        let _span = trace_span!("one_stage_loss", anchors = anchors.len()).entered();

        let gt_boxes: Vec<BBox> = ground_truth.iter().map(|gt| gt.bbox).collect();
        let assignments = self.matcher.match_boxes(anchors.anchors(), &gt_boxes);
        let targets = build_targets(&self.coder, anchors.anchors(), ground_truth, assignments)?;

        let mut cls_sum = 0.0f32;
        let mut reg_sum = 0.0f32;
        for (idx, assignment) in targets.assignments.iter().enumerate() {
            match assignment {
                Assignment::Ignore => {}
                Assignment::Background => {
                    let row = &outputs.cls_logits[idx * self.num_classes..][..self.num_classes];
                    for &logit in row {
                        cls_sum += sigmoid_focal_loss(logit, 0.0, self.focal);
                    }
                }
                Assignment::Foreground { gt } => {
                    let label = ground_truth[*gt].label;
                    let row = &outputs.cls_logits[idx * self.num_classes..][..self.num_classes];
                    for (class, &logit) in row.iter().enumerate() {
                        let target = if class == label { 1.0 } else { 0.0 };
                        cls_sum += sigmoid_focal_loss(logit, target, self.focal);
                    }
                    reg_sum += smooth_l1_box(
                        outputs.deltas[idx],
                        targets.regression[idx],
                        self.smooth_l1_beta,
                    );
                }
            }
        }

        let normalizer = targets.num_foreground.max(1) as f32;
        trace_event!("one_stage_targets", foreground = targets.num_foreground);
        Ok(DetectionLoss {
            classification: cls_sum / normalizer,
            regression: reg_sum / normalizer,
        })
    }

    /// Inference for one image through the shared post-processing path.
    pub fn detect(
        &self,
        outputs: OneStageOutputs<'_>,
        shapes: &[FeatureMapShape],
        image: ImageSize,
    ) -> DetectResult<Vec<Detection>> {
        let anchors = self.anchors(shapes)?;
        anchors.validate_alignment(
            outputs.cls_logits.len(),
            self.num_classes,
            outputs.deltas.len(),
        )?;

        let source = DenseCandidates {
            detector: self,
            outputs,
            anchors: &anchors,
            image,
        };
        detect(&source, &self.postprocessor)
    }
}

/// One-stage implementation of the shared candidate capability: every
/// anchor decodes to one candidate with sigmoid-activated class scores.
struct DenseCandidates<'a> {
    detector: &'a OneStageDetector,
    outputs: OneStageOutputs<'a>,
    anchors: &'a AnchorSet,
    image: ImageSize,
}

impl CandidateSource for DenseCandidates<'_> {
    fn candidates(&self) -> DetectResult<ScoredCandidates> {
        let num_classes = self.detector.num_classes;
        let mut boxes = Vec::with_capacity(self.anchors.len());
        for (idx, &anchor) in self.anchors.anchors().iter().enumerate() {
            let decoded = self.detector.coder.decode(anchor, self.outputs.deltas[idx])?;
            boxes.push(clip(decoded, self.image));
        }
        let scores = self.outputs.cls_logits.iter().map(|&l| sigmoid(l)).collect();
        Ok(ScoredCandidates {
            boxes,
            scores,
            num_classes,
        })
    }
}
