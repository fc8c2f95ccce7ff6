//! Two-stage detector (Faster R-CNN style).
//!
//! The region-proposal stage scores every anchor as object/not-object,
//! regresses it into a candidate box, and filters the candidates down to a
//! bounded proposal set. An external per-region head (the [`RoiHead`]
//! collaborator) pools features per proposal and classifies/regresses again;
//! this module supplies its training targets from a second, coarser matching
//! pass and turns its outputs into final detections through the shared
//! post-processing path.

use std::sync::Arc;

use rand::Rng;

use crate::anchors::cache::AnchorCache;
use crate::anchors::{AnchorConfig, AnchorGenerator, AnchorSet, FeatureMapShape};
use crate::coder::{BoxCoder, CoderConfig};
use crate::geometry::{clip, BBox, ImageSize};
use crate::loss::{binary_cross_entropy_with_logits, smooth_l1_box, DetectionLoss};
use crate::matcher::{Matcher, MatcherConfig};
use crate::pipeline::{
    build_targets, check_labels, detect, CandidateSource, GroundTruth, ScoredCandidates,
};
use crate::postprocess::nms::nms;
use crate::postprocess::topk::{Scored, TopK};
use crate::postprocess::{Detection, PostprocessConfig, Postprocessor};
use crate::sampler::{BalancedSampler, SamplerConfig};
use crate::trace::{trace_event, trace_span};
use crate::util::math::sigmoid;
use crate::util::{DetectError, DetectResult};

/// Whether proposal generation runs under training or evaluation limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Training: larger post-NMS proposal limit.
    Train,
    /// Evaluation: tighter post-NMS proposal limit.
    Eval,
}

/// Proposal-stage filtering configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProposalConfig {
    /// Candidates kept by objectness before NMS.
    pub pre_nms_topk: usize,
    /// Proposals kept after NMS during training.
    pub post_nms_topk_train: usize,
    /// Proposals kept after NMS during evaluation.
    pub post_nms_topk_eval: usize,
    /// Proposal suppression IoU threshold.
    pub nms_iou: f32,
    /// Minimum box side length in pixels after clipping.
    pub min_size: f32,
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            pre_nms_topk: 2000,
            post_nms_topk_train: 1000,
            post_nms_topk_eval: 300,
            nms_iou: 0.7,
            min_size: 1.0,
        }
    }
}

/// Full configuration for [`TwoStageDetector`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TwoStageConfig {
    /// Anchor grid layout for the proposal stage.
    pub anchors: AnchorConfig,
    /// Anchor/ground-truth matching for the proposal stage.
    pub rpn_matcher: MatcherConfig,
    /// Minibatch sampling for the proposal-stage loss.
    pub rpn_sampler: SamplerConfig,
    /// Box regression coding shared by both stages.
    pub coder: CoderConfig,
    /// Proposal filtering limits.
    pub proposals: ProposalConfig,
    /// Proposal/ground-truth matching for ROI-head targets.
    pub roi_matcher: MatcherConfig,
    /// Minibatch sampling for ROI-head targets.
    pub roi_sampler: SamplerConfig,
    /// Smooth-L1 transition point for regression terms.
    pub smooth_l1_beta: f32,
    /// Final-detection filtering and suppression.
    pub postprocess: PostprocessConfig,
}

impl Default for TwoStageConfig {
    fn default() -> Self {
        Self {
            anchors: AnchorConfig::default(),
            rpn_matcher: MatcherConfig {
                low: 0.3,
                high: 0.7,
                force_match: true,
            },
            rpn_sampler: SamplerConfig {
                batch_size: 256,
                foreground_fraction: 0.5,
            },
            coder: CoderConfig::default(),
            proposals: ProposalConfig::default(),
            roi_matcher: MatcherConfig {
                low: 0.5,
                high: 0.5,
                force_match: false,
            },
            roi_sampler: SamplerConfig {
                batch_size: 512,
                foreground_fraction: 0.25,
            },
            smooth_l1_beta: 1.0 / 9.0,
            postprocess: PostprocessConfig::default(),
        }
    }
}

/// Raw proposal-stage outputs for one image, in anchor order.
#[derive(Clone, Copy, Debug)]
pub struct RpnOutputs<'a> {
    /// Per-anchor objectness logits.
    pub objectness: &'a [f32],
    /// Per-anchor regression deltas.
    pub deltas: &'a [[f32; 4]],
}

/// Candidate object region handed to the per-region head.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Proposal {
    /// Proposed box, clipped to the image.
    pub bbox: BBox,
    /// Objectness probability.
    pub score: f32,
}

/// Per-proposal outputs of the external per-region head.
///
/// `scores` is row-major `[proposal][class]` of activated probabilities
/// with no background column; `deltas` refines each proposal once
/// (class-agnostic regression).
#[derive(Clone, Debug, Default)]
pub struct RoiOutputs {
    /// Activated per-class probabilities.
    pub scores: Vec<f32>,
    /// Per-proposal refinement deltas.
    pub deltas: Vec<[f32; 4]>,
}

/// External per-region head collaborator: pools features for each proposal
/// and classifies/regresses it.
pub trait RoiHead {
    /// Runs the head on one image's proposals.
    ///
    /// Must tolerate an empty proposal list.
    fn forward(&self, proposals: &[Proposal]) -> DetectResult<RoiOutputs>;
}

/// Training targets for the external per-region head.
#[derive(Clone, Debug, Default)]
pub struct RoiTargets {
    /// Sampled proposal indices, foreground first, each band ascending.
    pub indices: Vec<usize>,
    /// Class label per sampled proposal; `None` marks background.
    pub labels: Vec<Option<usize>>,
    /// Encoded regression targets, valid only at foreground rows.
    pub regression: Vec<[f32; 4]>,
}

/// Two-stage detection pipeline.
pub struct TwoStageDetector {
    num_classes: usize,
    anchor_cache: AnchorCache,
    rpn_matcher: Matcher,
    rpn_sampler: BalancedSampler,
    coder: BoxCoder,
    proposals_cfg: ProposalConfig,
    roi_matcher: Matcher,
    roi_sampler: BalancedSampler,
    smooth_l1_beta: f32,
    postprocessor: Postprocessor,
}

impl TwoStageDetector {
    /// Validates the configuration and builds the pipeline.
    pub fn new(num_classes: usize, cfg: TwoStageConfig) -> DetectResult<Self> {
        if num_classes == 0 {
            return Err(DetectError::InvalidConfig("num_classes must be positive"));
        }
        if cfg.proposals.pre_nms_topk == 0 {
            return Err(DetectError::InvalidConfig("pre-NMS top-K must be positive"));
        }
        if cfg.proposals.post_nms_topk_train == 0 || cfg.proposals.post_nms_topk_eval == 0 {
            return Err(DetectError::InvalidConfig("post-NMS top-K must be positive"));
        }
        if !(cfg.proposals.nms_iou.is_finite() && (0.0..=1.0).contains(&cfg.proposals.nms_iou)) {
            return Err(DetectError::InvalidConfig("proposal nms iou must lie in [0, 1]"));
        }
        if !(cfg.proposals.min_size.is_finite() && cfg.proposals.min_size >= 0.0) {
            return Err(DetectError::InvalidConfig(
                "proposal min size must be non-negative",
            ));
        }
        if !(cfg.smooth_l1_beta.is_finite() && cfg.smooth_l1_beta >= 0.0) {
            return Err(DetectError::InvalidConfig(
                "smooth-l1 beta must be non-negative",
            ));
        }
        Ok(Self {
            num_classes,
            anchor_cache: AnchorCache::new(AnchorGenerator::new(cfg.anchors)?),
            rpn_matcher: Matcher::new(cfg.rpn_matcher)?,
            rpn_sampler: BalancedSampler::new(cfg.rpn_sampler)?,
            coder: BoxCoder::new(cfg.coder),
            proposals_cfg: cfg.proposals,
            roi_matcher: Matcher::new(cfg.roi_matcher)?,
            roi_sampler: BalancedSampler::new(cfg.roi_sampler)?,
            smooth_l1_beta: cfg.smooth_l1_beta,
            postprocessor: Postprocessor::new(cfg.postprocess)?,
        })
    }

    /// Score columns per ROI-head output row.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Anchor set for one feature-pyramid shape, generated on first use.
    pub fn anchors(&self, shapes: &[FeatureMapShape]) -> DetectResult<Arc<AnchorSet>> {
        self.anchor_cache.anchors(shapes)
    }

    /// Generates the bounded proposal set for one image.
    ///
    /// Decode, clip, minimum-size filter, objectness top-K, NMS, then the
    /// phase-dependent truncation. Zero survivors is a valid outcome.
    pub fn proposals(
        &self,
        outputs: RpnOutputs<'_>,
        shapes: &[FeatureMapShape],
        image: ImageSize,
        phase: Phase,
    ) -> DetectResult<Vec<Proposal>> {
        let anchors = self.anchors(shapes)?;
        anchors.validate_alignment(outputs.objectness.len(), 1, outputs.deltas.len())?;

        let _span = trace_span!("proposals", anchors = anchors.len()).entered();

        // Decode and filter candidates in anchor order.
        let mut boxes = Vec::new();
        let mut scores = Vec::new();
        for (idx, &anchor) in anchors.anchors().iter().enumerate() {
            let decoded = self.coder.decode(anchor, outputs.deltas[idx])?;
            let clipped = clip(decoded, image);
            if clipped.width() < self.proposals_cfg.min_size
                || clipped.height() < self.proposals_cfg.min_size
            {
                continue;
            }
            boxes.push(clipped);
            scores.push(sigmoid(outputs.objectness[idx]));
        }

        // Objectness top-K ahead of suppression bounds the NMS cost.
        if boxes.len() > self.proposals_cfg.pre_nms_topk {
            let mut topk = TopK::new(self.proposals_cfg.pre_nms_topk);
            for (index, &score) in scores.iter().enumerate() {
                topk.push(Scored { index, score });
            }
            let kept = topk.into_sorted_desc();
            boxes = kept.iter().map(|s| boxes[s.index]).collect();
            scores = kept.iter().map(|s| s.score).collect();
        }

        let mut kept = nms(&boxes, &scores, self.proposals_cfg.nms_iou)?;
        let limit = match phase {
            Phase::Train => self.proposals_cfg.post_nms_topk_train,
            Phase::Eval => self.proposals_cfg.post_nms_topk_eval,
        };
        kept.truncate(limit);

        let proposals: Vec<Proposal> = kept
            .into_iter()
            .map(|i| Proposal {
                bbox: boxes[i],
                score: scores[i],
            })
            .collect();
        trace_event!("proposal_count", count = proposals.len());
        Ok(proposals)
    }

    /// Proposal-stage training loss for one image.
    ///
    /// Binary objectness cross-entropy plus smooth-L1 regression over a
    /// balanced anchor sample; ignore anchors are excluded by the sampler
    /// and both terms average over the sample size.
    pub fn rpn_loss<R: Rng>(
        &self,
        outputs: RpnOutputs<'_>,
        shapes: &[FeatureMapShape],
        ground_truth: &[GroundTruth],
        rng: &mut R,
    ) -> DetectResult<DetectionLoss> {
        let anchors = self.anchors(shapes)?;
        anchors.validate_alignment(outputs.objectness.len(), 1, outputs.deltas.len())?;

        let gt_boxes: Vec<BBox> = ground_truth.iter().map(|gt| gt.bbox).collect();
        let assignments = self.rpn_matcher.match_boxes(anchors.anchors(), &gt_boxes);
        let targets = build_targets(&self.coder, anchors.anchors(), ground_truth, assignments)?;

        let sampled = self.rpn_sampler.sample(&targets.assignments, rng);
        if sampled.is_empty() {
            return Ok(DetectionLoss::default());
        }

        let mut cls_sum = 0.0f32;
        let mut reg_sum = 0.0f32;
        for &idx in &sampled.foreground {
            cls_sum += binary_cross_entropy_with_logits(outputs.objectness[idx], 1.0);
            reg_sum += smooth_l1_box(
                outputs.deltas[idx],
                targets.regression[idx],
                self.smooth_l1_beta,
            );
        }
        for &idx in &sampled.background {
            cls_sum += binary_cross_entropy_with_logits(outputs.objectness[idx], 0.0);
        }

        let normalizer = sampled.len() as f32;
        trace_event!(
            "rpn_sample",
            foreground = sampled.foreground.len(),
            background = sampled.background.len(),
        );
        Ok(DetectionLoss {
            classification: cls_sum / normalizer,
            regression: reg_sum / normalizer,
        })
    }

    /// Assembles training targets for the external per-region head.
    ///
    /// Matches proposals against ground truth with the coarser second-pass
    /// thresholds, then draws a balanced sample of proposals to supervise.
    pub fn roi_targets<R: Rng>(
        &self,
        proposals: &[Proposal],
        ground_truth: &[GroundTruth],
        rng: &mut R,
    ) -> DetectResult<RoiTargets> {
        check_labels(ground_truth, self.num_classes)?;

        let proposal_boxes: Vec<BBox> = proposals.iter().map(|p| p.bbox).collect();
        let gt_boxes: Vec<BBox> = ground_truth.iter().map(|gt| gt.bbox).collect();
        let assignments = self.roi_matcher.match_boxes(&proposal_boxes, &gt_boxes);
        let sampled = self.roi_sampler.sample(&assignments, rng);

        let mut targets = RoiTargets::default();
        for &idx in &sampled.foreground {
            let gt = assignments[idx].gt().expect("sampled index is foreground");
            targets.indices.push(idx);
            targets.labels.push(Some(ground_truth[gt].label));
            targets
                .regression
                .push(self.coder.encode(proposal_boxes[idx], gt_boxes[gt])?);
        }
        for &idx in &sampled.background {
            targets.indices.push(idx);
            targets.labels.push(None);
            targets.regression.push([0.0; 4]);
        }
        Ok(targets)
    }

    /// Final detections from the per-region head's outputs.
    ///
    /// Refines each proposal with its delta, clips, and runs the shared
    /// post-processing path. Must be called with outputs aligned to
    /// `proposals`; an empty proposal set yields an empty detection list.
    pub fn detect(
        &self,
        proposals: &[Proposal],
        roi: &RoiOutputs,
        image: ImageSize,
    ) -> DetectResult<Vec<Detection>> {
        if roi.deltas.len() != proposals.len() {
            return Err(DetectError::ShapeMismatch {
                expected: proposals.len(),
                got: roi.deltas.len(),
                context: "roi deltas",
            });
        }
        if roi.scores.len() != proposals.len() * self.num_classes {
            return Err(DetectError::ShapeMismatch {
                expected: proposals.len() * self.num_classes,
                got: roi.scores.len(),
                context: "roi scores",
            });
        }

        let source = RefinedCandidates {
            detector: self,
            proposals,
            roi,
            image,
        };
        detect(&source, &self.postprocessor)
    }

    /// Convenience inference path driving the external head in between the
    /// proposal stage and final post-processing.
    pub fn detect_with_head<H: RoiHead>(
        &self,
        outputs: RpnOutputs<'_>,
        shapes: &[FeatureMapShape],
        image: ImageSize,
        head: &H,
    ) -> DetectResult<Vec<Detection>> {
        let proposals = self.proposals(outputs, shapes, image, Phase::Eval)?;
        let roi = head.forward(&proposals)?;
        self.detect(&proposals, &roi, image)
    }
}

/// Two-stage implementation of the shared candidate capability: each
/// proposal refined by the ROI head becomes one candidate.
struct RefinedCandidates<'a> {
    detector: &'a TwoStageDetector,
    proposals: &'a [Proposal],
    roi: &'a RoiOutputs,
    image: ImageSize,
}

impl CandidateSource for RefinedCandidates<'_> {
    fn candidates(&self) -> DetectResult<ScoredCandidates> {
        let mut boxes = Vec::with_capacity(self.proposals.len());
        for (idx, proposal) in self.proposals.iter().enumerate() {
            let refined = self
                .detector
                .coder
                .decode(proposal.bbox, self.roi.deltas[idx])?;
            boxes.push(clip(refined, self.image));
        }
        Ok(ScoredCandidates {
            boxes,
            scores: self.roi.scores.clone(),
            num_classes: self.detector.num_classes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ProposalConfig, TwoStageConfig, TwoStageDetector};

    #[test]
    fn constructor_validates_proposal_limits() {
        let cfg = TwoStageConfig {
            proposals: ProposalConfig {
                pre_nms_topk: 0,
                ..ProposalConfig::default()
            },
            ..TwoStageConfig::default()
        };
        assert!(TwoStageDetector::new(3, cfg).is_err());

        let cfg = TwoStageConfig {
            proposals: ProposalConfig {
                nms_iou: 2.0,
                ..ProposalConfig::default()
            },
            ..TwoStageConfig::default()
        };
        assert!(TwoStageDetector::new(3, cfg).is_err());
    }

    #[test]
    fn default_config_builds() {
        assert!(TwoStageDetector::new(10, TwoStageConfig::default()).is_ok());
    }
}
