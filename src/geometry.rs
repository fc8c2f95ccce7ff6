//! Axis-aligned box geometry.
//!
//! `BBox` is an immutable corner-form box (x1, y1, x2, y2) in a single
//! image's pixel coordinate frame. Construction validates the corner
//! ordering invariant and finiteness once; the free functions below assume
//! validated inputs and stay pure.

use crate::util::{DetectError, DetectResult};

/// Image extent in pixels, used for clipping and as an anchor-cache key
/// component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Immutable axis-aligned box with `x1 <= x2` and `y1 <= y2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl BBox {
    /// Creates a box, rejecting non-finite coordinates and inverted corners.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> DetectResult<Self> {
        let finite = x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite();
        if !finite || x1 > x2 || y1 > y2 {
            return Err(DetectError::InvalidGeometry { x1, y1, x2, y2 });
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Creates a box from a center point and side lengths.
    ///
    /// Negative side lengths are rejected through the same corner check as
    /// [`BBox::new`].
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> DetectResult<Self> {
        Self::new(
            cx - 0.5 * width,
            cy - 0.5 * height,
            cx + 0.5 * width,
            cy + 0.5 * height,
        )
    }

    /// Left edge.
    pub fn x1(&self) -> f32 {
        self.x1
    }

    /// Top edge.
    pub fn y1(&self) -> f32 {
        self.y1
    }

    /// Right edge.
    pub fn x2(&self) -> f32 {
        self.x2
    }

    /// Bottom edge.
    pub fn y2(&self) -> f32 {
        self.y2
    }

    /// Width; never negative.
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    /// Height; never negative.
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Center point.
    pub fn center(&self) -> (f32, f32) {
        (
            0.5 * (self.x1 + self.x2),
            0.5 * (self.y1 + self.y2),
        )
    }
}

/// Box area; zero for degenerate boxes.
pub fn area(b: BBox) -> f32 {
    b.width() * b.height()
}

/// Intersection over union, in [0, 1].
///
/// Disjoint and degenerate (zero-area) pairs score 0. Identical boxes with
/// positive area score exactly 1.
pub fn iou(a: BBox, b: BBox) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = ix * iy;
    if inter <= 0.0 {
        return 0.0;
    }
    let union = area(a) + area(b) - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

/// Truncates a box to the image bounds.
///
/// The result may be degenerate (zero width or height) when the input lies
/// entirely outside the image; downstream minimum-size filters remove such
/// boxes.
pub fn clip(b: BBox, image: ImageSize) -> BBox {
    let w = image.width as f32;
    let h = image.height as f32;
    BBox {
        x1: b.x1.clamp(0.0, w),
        y1: b.y1.clamp(0.0, h),
        x2: b.x2.clamp(0.0, w),
        y2: b.y2.clamp(0.0, h),
    }
}

/// Dense IoU matrix with anchors as rows and ground-truth boxes as columns.
pub struct IouMatrix {
    data: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl IouMatrix {
    /// Computes pairwise IoU between `anchors` and `gt_boxes`.
    pub fn between(anchors: &[BBox], gt_boxes: &[BBox]) -> Self {
        let rows = anchors.len();
        let cols = gt_boxes.len();
        let mut data = Vec::with_capacity(rows * cols);
        for &anchor in anchors {
            for &gt in gt_boxes {
                data.push(iou(anchor, gt));
            }
        }
        Self { data, rows, cols }
    }

    /// Number of anchor rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of ground-truth columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// IoU between anchor `row` and ground-truth box `col`.
    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    /// One anchor's IoU against every ground-truth box.
    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }
}
