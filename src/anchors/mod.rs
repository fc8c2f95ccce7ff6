//! Dense anchor grids over a feature pyramid.
//!
//! Anchors are reference boxes emitted in a fixed order: level-major, then
//! row-major over spatial cells, then scale-major/ratio-minor within a cell.
//! That order is the single source of truth pairing raw network outputs with
//! assignments and decoded boxes, so generation is fully deterministic:
//! identical shapes and configuration produce bit-identical anchors.

pub mod cache;

use std::ops::Range;

use crate::geometry::BBox;
use crate::util::{DetectError, DetectResult};

/// Spatial extent of one feature-pyramid level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FeatureMapShape {
    /// Cells along x.
    pub width: usize,
    /// Cells along y.
    pub height: usize,
}

/// Anchor layout for one pyramid level.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LevelSpec {
    /// Downsampling factor of this level relative to the input image.
    pub stride: f32,
    /// Anchor side lengths in input-image pixels at aspect ratio 1.
    pub scales: Vec<f32>,
}

/// Full anchor-grid configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnchorConfig {
    /// Per-level strides and scales, coarsest stride last.
    pub levels: Vec<LevelSpec>,
    /// Height/width ratios shared by every level.
    pub aspect_ratios: Vec<f32>,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        // P3..P7 with three octave scales per level.
        let octaves = [1.0f32, 2.0f32.powf(1.0 / 3.0), 2.0f32.powf(2.0 / 3.0)];
        let levels = (0..5)
            .map(|i| {
                let base = 32.0 * 2.0f32.powi(i);
                LevelSpec {
                    stride: 8.0 * 2.0f32.powi(i),
                    scales: octaves.iter().map(|o| base * o).collect(),
                }
            })
            .collect();
        Self {
            levels,
            aspect_ratios: vec![0.5, 1.0, 2.0],
        }
    }
}

/// Generates anchor sets for feature-pyramid shapes.
#[derive(Clone, Debug)]
pub struct AnchorGenerator {
    cfg: AnchorConfig,
}

impl AnchorGenerator {
    /// Validates the configuration and builds a generator.
    pub fn new(cfg: AnchorConfig) -> DetectResult<Self> {
        if cfg.levels.is_empty() {
            return Err(DetectError::InvalidConfig("anchor config has no levels"));
        }
        if cfg.aspect_ratios.is_empty() {
            return Err(DetectError::InvalidConfig("anchor config has no aspect ratios"));
        }
        for level in &cfg.levels {
            if !(level.stride.is_finite() && level.stride > 0.0) {
                return Err(DetectError::InvalidConfig("anchor stride must be positive"));
            }
            if level.scales.is_empty() {
                return Err(DetectError::InvalidConfig("anchor level has no scales"));
            }
            if level.scales.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
                return Err(DetectError::InvalidConfig("anchor scale must be positive"));
            }
        }
        if cfg
            .aspect_ratios
            .iter()
            .any(|r| !(r.is_finite() && *r > 0.0))
        {
            return Err(DetectError::InvalidConfig("aspect ratio must be positive"));
        }
        Ok(Self { cfg })
    }

    /// Number of pyramid levels this generator expects.
    pub fn num_levels(&self) -> usize {
        self.cfg.levels.len()
    }

    /// Anchors emitted per spatial cell at `level`.
    pub fn templates_per_cell(&self, level: usize) -> Option<usize> {
        self.cfg
            .levels
            .get(level)
            .map(|l| l.scales.len() * self.cfg.aspect_ratios.len())
    }

    /// Generates the anchor set for one feature pyramid.
    ///
    /// `shapes` must carry exactly one entry per configured level; a count
    /// mismatch is a wiring error and fails fast.
    pub fn generate(&self, shapes: &[FeatureMapShape]) -> DetectResult<AnchorSet> {
        if shapes.len() != self.cfg.levels.len() {
            return Err(DetectError::ShapeMismatch {
                expected: self.cfg.levels.len(),
                got: shapes.len(),
                context: "pyramid levels",
            });
        }

        let total: usize = shapes
            .iter()
            .zip(&self.cfg.levels)
            .map(|(shape, level)| {
                shape.width * shape.height * level.scales.len() * self.cfg.aspect_ratios.len()
            })
            .sum();

        let mut anchors = Vec::with_capacity(total);
        let mut level_ranges = Vec::with_capacity(shapes.len());

        for (shape, level) in shapes.iter().zip(&self.cfg.levels) {
            let start = anchors.len();
            for y in 0..shape.height {
                let cy = (y as f32 + 0.5) * level.stride;
                for x in 0..shape.width {
                    let cx = (x as f32 + 0.5) * level.stride;
                    for &scale in &level.scales {
                        for &ratio in &self.cfg.aspect_ratios {
                            // ratio = h/w, preserving area = scale^2.
                            let root = ratio.sqrt();
                            let w = scale / root;
                            let h = scale * root;
                            anchors.push(BBox::from_center(cx, cy, w, h)?);
                        }
                    }
                }
            }
            level_ranges.push(start..anchors.len());
        }

        Ok(AnchorSet {
            anchors,
            level_ranges,
        })
    }
}

/// Ordered anchor collection for one pyramid configuration and shape.
///
/// Immutable once generated; shared across images of the same size via
/// [`cache::AnchorCache`].
#[derive(Clone, Debug)]
pub struct AnchorSet {
    anchors: Vec<BBox>,
    level_ranges: Vec<Range<usize>>,
}

impl AnchorSet {
    /// Total anchor count across all levels.
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// True when no anchors were generated.
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Number of pyramid levels.
    pub fn num_levels(&self) -> usize {
        self.level_ranges.len()
    }

    /// All anchors in emission order.
    pub fn anchors(&self) -> &[BBox] {
        &self.anchors
    }

    /// Anchors belonging to one pyramid level.
    pub fn level(&self, level: usize) -> Option<&[BBox]> {
        self.level_ranges
            .get(level)
            .map(|range| &self.anchors[range.clone()])
    }

    /// Checks raw network outputs against the anchor count.
    ///
    /// `num_scores` is the flat length of the per-anchor class score slice
    /// and `num_deltas` the number of per-anchor delta quadruples. Called at
    /// setup so a channel-layout mistake fails before any per-image work.
    pub fn validate_alignment(
        &self,
        num_scores: usize,
        num_classes: usize,
        num_deltas: usize,
    ) -> DetectResult<()> {
        if num_classes == 0 {
            return Err(DetectError::InvalidConfig("num_classes must be positive"));
        }
        let expected_scores = self.anchors.len() * num_classes;
        if num_scores != expected_scores {
            return Err(DetectError::ShapeMismatch {
                expected: expected_scores,
                got: num_scores,
                context: "class scores",
            });
        }
        if num_deltas != self.anchors.len() {
            return Err(DetectError::ShapeMismatch {
                expected: self.anchors.len(),
                got: num_deltas,
                context: "box deltas",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AnchorConfig, AnchorGenerator, FeatureMapShape, LevelSpec};
    use crate::util::DetectError;

    fn single_level() -> AnchorConfig {
        AnchorConfig {
            levels: vec![LevelSpec {
                stride: 16.0,
                scales: vec![32.0],
            }],
            aspect_ratios: vec![1.0],
        }
    }

    #[test]
    fn generation_is_bit_identical_across_calls() {
        let gen = AnchorGenerator::new(AnchorConfig::default()).unwrap();
        let shapes = [
            FeatureMapShape {
                width: 10,
                height: 8,
            },
            FeatureMapShape {
                width: 5,
                height: 4,
            },
            FeatureMapShape {
                width: 3,
                height: 2,
            },
            FeatureMapShape {
                width: 2,
                height: 1,
            },
            FeatureMapShape {
                width: 1,
                height: 1,
            },
        ];
        let a = gen.generate(&shapes).unwrap();
        let b = gen.generate(&shapes).unwrap();
        assert_eq!(a.anchors(), b.anchors());
    }

    #[test]
    fn order_is_row_major_with_cell_centers() {
        let gen = AnchorGenerator::new(single_level()).unwrap();
        let set = gen
            .generate(&[FeatureMapShape {
                width: 2,
                height: 2,
            }])
            .unwrap();
        assert_eq!(set.len(), 4);

        let centers: Vec<(f32, f32)> = set.anchors().iter().map(|a| a.center()).collect();
        assert_eq!(
            centers,
            vec![(8.0, 8.0), (24.0, 8.0), (8.0, 24.0), (24.0, 24.0)]
        );
    }

    #[test]
    fn aspect_ratio_preserves_area() {
        let mut cfg = single_level();
        cfg.aspect_ratios = vec![0.5, 1.0, 2.0];
        let gen = AnchorGenerator::new(cfg).unwrap();
        let set = gen
            .generate(&[FeatureMapShape {
                width: 1,
                height: 1,
            }])
            .unwrap();
        for anchor in set.anchors() {
            let area = anchor.width() * anchor.height();
            assert!((area - 32.0 * 32.0).abs() < 1e-2);
        }
    }

    #[test]
    fn level_count_mismatch_fails_fast() {
        let gen = AnchorGenerator::new(single_level()).unwrap();
        let err = gen.generate(&[]).err().unwrap();
        assert_eq!(
            err,
            DetectError::ShapeMismatch {
                expected: 1,
                got: 0,
                context: "pyramid levels",
            }
        );
    }

    #[test]
    fn alignment_check_rejects_wrong_output_lengths() {
        let gen = AnchorGenerator::new(single_level()).unwrap();
        let set = gen
            .generate(&[FeatureMapShape {
                width: 2,
                height: 2,
            }])
            .unwrap();
        assert!(set.validate_alignment(4 * 3, 3, 4).is_ok());
        assert!(set.validate_alignment(4 * 3, 3, 5).is_err());
        assert!(set.validate_alignment(11, 3, 4).is_err());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let mut cfg = single_level();
        cfg.aspect_ratios = vec![-1.0];
        assert!(AnchorGenerator::new(cfg).is_err());

        let mut cfg = single_level();
        cfg.levels[0].stride = 0.0;
        assert!(AnchorGenerator::new(cfg).is_err());

        let mut cfg = single_level();
        cfg.levels[0].scales.clear();
        assert!(AnchorGenerator::new(cfg).is_err());
    }
}
