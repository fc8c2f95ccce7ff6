//! Balanced foreground/background minibatch sampling.
//!
//! The two-stage losses are computed over a fixed-size sample of anchors (or
//! proposals) with a configured foreground fraction, rather than over the
//! full dense grid. The RNG is supplied by the caller so training runs stay
//! reproducible under a fixed seed; ignore assignments are never sampled.

use rand::Rng;

use crate::matcher::Assignment;
use crate::util::{DetectError, DetectResult};

/// Configuration for [`BalancedSampler`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SamplerConfig {
    /// Total anchors sampled per image.
    pub batch_size: usize,
    /// Fraction of the batch reserved for foreground anchors.
    pub foreground_fraction: f32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            foreground_fraction: 0.5,
        }
    }
}

/// Indices drawn for one loss minibatch, each list sorted ascending.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampledAnchors {
    /// Sampled foreground anchor indices.
    pub foreground: Vec<usize>,
    /// Sampled background anchor indices.
    pub background: Vec<usize>,
}

impl SampledAnchors {
    /// Total sampled count.
    pub fn len(&self) -> usize {
        self.foreground.len() + self.background.len()
    }

    /// True when nothing was sampled.
    pub fn is_empty(&self) -> bool {
        self.foreground.is_empty() && self.background.is_empty()
    }
}

/// Uniform without-replacement sampler over match assignments.
#[derive(Clone, Copy, Debug)]
pub struct BalancedSampler {
    cfg: SamplerConfig,
}

impl BalancedSampler {
    /// Validates the configuration and builds a sampler.
    pub fn new(cfg: SamplerConfig) -> DetectResult<Self> {
        if cfg.batch_size == 0 {
            return Err(DetectError::InvalidConfig("sampler batch size must be positive"));
        }
        if !(cfg.foreground_fraction.is_finite()
            && (0.0..=1.0).contains(&cfg.foreground_fraction))
        {
            return Err(DetectError::InvalidConfig(
                "sampler foreground fraction must lie in [0, 1]",
            ));
        }
        Ok(Self { cfg })
    }

    /// Draws a balanced sample from `assignments`.
    ///
    /// Up to `batch_size * foreground_fraction` foreground anchors are drawn
    /// first; the remainder of the batch is filled with background anchors.
    /// Short supply on either side shrinks the sample instead of erroring.
    pub fn sample<R: Rng>(&self, assignments: &[Assignment], rng: &mut R) -> SampledAnchors {
        let mut foreground = Vec::new();
        let mut background = Vec::new();
        for (idx, assignment) in assignments.iter().enumerate() {
            match assignment {
                Assignment::Foreground { .. } => foreground.push(idx),
                Assignment::Background => background.push(idx),
                Assignment::Ignore => {}
            }
        }

        let want_fg = (self.cfg.batch_size as f32 * self.cfg.foreground_fraction).round() as usize;
        let num_fg = foreground.len().min(want_fg);
        let num_bg = background.len().min(self.cfg.batch_size - num_fg);

        let mut foreground = draw(foreground, num_fg, rng);
        let mut background = draw(background, num_bg, rng);
        foreground.sort_unstable();
        background.sort_unstable();

        SampledAnchors {
            foreground,
            background,
        }
    }
}

/// Partial Fisher-Yates draw of `count` items without replacement.
fn draw<R: Rng>(mut pool: Vec<usize>, count: usize, rng: &mut R) -> Vec<usize> {
    if count >= pool.len() {
        return pool;
    }
    for i in 0..count {
        let j = rng.random_range(i..pool.len());
        pool.swap(i, j);
    }
    pool.truncate(count);
    pool
}
