//! Greedy non-maximum suppression.

use crate::geometry::BBox;
use crate::util::{DetectError, DetectResult};

/// Suppresses lower-scoring boxes overlapping a kept box at or above
/// `iou_threshold`, returning the kept indices in descending score order.
///
/// Candidates are visited by descending score with ties broken toward the
/// lower input index, so identical inputs always produce identical output.
/// Running the function on its own output is a fixed point.
pub fn nms(boxes: &[BBox], scores: &[f32], iou_threshold: f32) -> DetectResult<Vec<usize>> {
    if boxes.len() != scores.len() {
        return Err(DetectError::LengthMismatch {
            left: boxes.len(),
            right: scores.len(),
            context: "nms boxes vs scores",
        });
    }
    let n = boxes.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let areas: Vec<f32> = boxes.iter().map(|b| b.width() * b.height()).collect();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then_with(|| a.cmp(&b)));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; n];

    for pos in 0..n {
        let i = order[pos];
        if suppressed[i] {
            continue;
        }
        keep.push(i);

        for &j in &order[pos + 1..] {
            if suppressed[j] {
                continue;
            }
            let ix = (boxes[i].x2().min(boxes[j].x2()) - boxes[i].x1().max(boxes[j].x1())).max(0.0);
            let iy = (boxes[i].y2().min(boxes[j].y2()) - boxes[i].y1().max(boxes[j].y1())).max(0.0);
            let inter = ix * iy;
            if inter <= 0.0 {
                continue;
            }
            let union = areas[i] + areas[j] - inter;
            if union > 0.0 && inter / union >= iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    Ok(keep)
}
