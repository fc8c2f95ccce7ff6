//! Box regression coding.
//!
//! `BoxCoder` converts between absolute corner boxes and the regression
//! parameterization used by both detector variants: center offsets scaled by
//! the anchor size and log-scale width/height ratios. Decoding clamps the
//! log-scale deltas before exponentiation; untrained weights can emit
//! arbitrarily large values and the clamp bounds the resulting boxes.

use crate::geometry::BBox;
use crate::util::{DetectError, DetectResult};

/// Configuration for [`BoxCoder`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoderConfig {
    /// Upper bound applied to dw/dh before exponentiation during decode.
    pub max_delta: f32,
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self {
            // Bounds decoded boxes to 1000/16 times the anchor size.
            max_delta: (1000.0f32 / 16.0).ln(),
        }
    }
}

/// Encoder/decoder between boxes and regression deltas.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoxCoder {
    cfg: CoderConfig,
}

impl BoxCoder {
    /// Creates a coder with the given configuration.
    pub fn new(cfg: CoderConfig) -> Self {
        Self { cfg }
    }

    /// Encodes the offset from `anchor` to `target` as (dx, dy, dw, dh).
    ///
    /// Both boxes must have positive width and height; the log-ratio terms
    /// are undefined otherwise.
    pub fn encode(&self, anchor: BBox, target: BBox) -> DetectResult<[f32; 4]> {
        if anchor.width() <= 0.0 || anchor.height() <= 0.0 {
            return Err(invalid(anchor));
        }
        if target.width() <= 0.0 || target.height() <= 0.0 {
            return Err(invalid(target));
        }
        let (a_cx, a_cy) = anchor.center();
        let (t_cx, t_cy) = target.center();
        Ok([
            (t_cx - a_cx) / anchor.width(),
            (t_cy - a_cy) / anchor.height(),
            (target.width() / anchor.width()).ln(),
            (target.height() / anchor.height()).ln(),
        ])
    }

    /// Decodes regression deltas relative to `anchor` into an absolute box.
    ///
    /// dw/dh are clamped to the configured maximum before exponentiation;
    /// this is the one sanctioned defensive correction in the pipeline.
    /// Deltas that still yield non-finite coordinates (NaN inputs) are
    /// rejected.
    pub fn decode(&self, anchor: BBox, deltas: [f32; 4]) -> DetectResult<BBox> {
        let [dx, dy, dw, dh] = deltas;
        let (a_cx, a_cy) = anchor.center();
        let cx = a_cx + dx * anchor.width();
        let cy = a_cy + dy * anchor.height();
        // Branching clamp so a NaN delta stays NaN and fails the corner
        // check instead of saturating at the bound.
        let dw = if dw > self.cfg.max_delta {
            self.cfg.max_delta
        } else {
            dw
        };
        let dh = if dh > self.cfg.max_delta {
            self.cfg.max_delta
        } else {
            dh
        };
        let w = anchor.width() * dw.exp();
        let h = anchor.height() * dh.exp();
        BBox::from_center(cx, cy, w, h)
    }
}

fn invalid(b: BBox) -> DetectError {
    DetectError::InvalidGeometry {
        x1: b.x1(),
        y1: b.y1(),
        x2: b.x2(),
        y2: b.y2(),
    }
}
