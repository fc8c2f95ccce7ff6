//! Anchordet is the detection core shared by a two-stage (proposal + region
//! head) and a single-stage (dense head) object detector.
//!
//! The crate owns anchor generation over a feature pyramid, ground-truth
//! matching, box regression coding, loss assembly, proposal filtering, and
//! non-maximum suppression. Backbone features, datasets, and the optimizer
//! live behind the interfaces in [`pipeline`]; batch parallelism is optional
//! via the `rayon` feature.

pub mod anchors;
pub mod batch;
pub mod coder;
pub mod geometry;
pub mod loss;
pub mod matcher;
pub mod pipeline;
pub mod postprocess;
pub mod sampler;
mod trace;
pub mod util;

pub use anchors::cache::AnchorCache;
pub use anchors::{AnchorConfig, AnchorGenerator, AnchorSet, FeatureMapShape, LevelSpec};
pub use coder::{BoxCoder, CoderConfig};
pub use geometry::{area, clip, iou, BBox, ImageSize, IouMatrix};
pub use loss::{
    binary_cross_entropy_with_logits, sigmoid_focal_loss, smooth_l1, smooth_l1_box,
    DetectionLoss, FocalConfig,
};
pub use matcher::{Assignment, Matcher, MatcherConfig};
pub use pipeline::one_stage::{OneStageConfig, OneStageDetector, OneStageOutputs};
pub use pipeline::two_stage::{
    Phase, Proposal, ProposalConfig, RoiHead, RoiOutputs, RoiTargets, RpnOutputs,
    TwoStageConfig, TwoStageDetector,
};
pub use pipeline::{detect, CandidateSource, GroundTruth, ScoredCandidates, TargetSet};
pub use postprocess::nms::nms;
pub use postprocess::topk::{Scored, TopK};
pub use postprocess::{Detection, PostprocessConfig, Postprocessor};
pub use sampler::{BalancedSampler, SampledAnchors, SamplerConfig};
pub use util::{DetectError, DetectResult};

pub use batch::map_images;
#[cfg(feature = "rayon")]
pub use batch::map_images_par;
