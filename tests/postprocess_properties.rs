use anchordet::{nms, BBox, PostprocessConfig, Postprocessor};

fn make_boxes(count: usize) -> (Vec<BBox>, Vec<f32>) {
    // Deterministic synthetic clusters: boxes drift right while overlapping
    // their neighbors, scores cycle through a fixed pattern.
    let mut boxes = Vec::with_capacity(count);
    let mut scores = Vec::with_capacity(count);
    for i in 0..count {
        let x = (i * 7 % 400) as f32;
        let y = (i * 13 % 300) as f32;
        boxes.push(BBox::new(x, y, x + 50.0, y + 50.0).unwrap());
        scores.push((((i * 37) ^ (i * 11)) % 1000) as f32 / 1000.0);
    }
    (boxes, scores)
}

#[test]
fn nms_output_is_a_subset_without_strong_overlaps() {
    let (boxes, scores) = make_boxes(200);
    let threshold = 0.5;
    let kept = nms(&boxes, &scores, threshold).unwrap();

    assert!(kept.len() <= boxes.len());
    assert!(kept.iter().all(|&i| i < boxes.len()));

    for (a, &i) in kept.iter().enumerate() {
        for &j in &kept[a + 1..] {
            assert!(
                anchordet::iou(boxes[i], boxes[j]) < threshold,
                "kept boxes {i} and {j} still overlap"
            );
        }
    }
}

#[test]
fn nms_is_idempotent() {
    let (boxes, scores) = make_boxes(150);
    let kept = nms(&boxes, &scores, 0.4).unwrap();

    let surviving_boxes: Vec<BBox> = kept.iter().map(|&i| boxes[i]).collect();
    let surviving_scores: Vec<f32> = kept.iter().map(|&i| scores[i]).collect();
    let again = nms(&surviving_boxes, &surviving_scores, 0.4).unwrap();

    assert_eq!(again, (0..surviving_boxes.len()).collect::<Vec<_>>());
}

#[test]
fn nms_is_deterministic_for_identical_input() {
    let (boxes, scores) = make_boxes(120);
    assert_eq!(
        nms(&boxes, &scores, 0.5).unwrap(),
        nms(&boxes, &scores, 0.5).unwrap()
    );
}

#[test]
fn overlapping_same_class_pair_keeps_the_higher_score() {
    // IoU of the pair is 0.9 > the 0.5 suppression threshold.
    let a = BBox::new(0.0, 0.0, 100.0, 100.0).unwrap();
    let b = BBox::new(0.0, 0.0, 100.0, 95.0).unwrap();
    assert!(anchordet::iou(a, b) > 0.9);

    let processor = Postprocessor::new(PostprocessConfig {
        score_threshold: 0.1,
        pre_nms_topk: None,
        nms_iou: 0.5,
        max_detections: 10,
    })
    .unwrap();

    let detections = processor.run(&[a, b], &[0.9, 0.8], 1).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].bbox, a);
    assert!((detections[0].score - 0.9).abs() < 1e-6);
}

#[test]
fn detection_cap_bounds_the_output() {
    let (boxes, scores) = make_boxes(300);
    let processor = Postprocessor::new(PostprocessConfig {
        score_threshold: 0.0,
        pre_nms_topk: None,
        nms_iou: 0.9,
        max_detections: 7,
    })
    .unwrap();
    let detections = processor.run(&boxes, &scores, 1).unwrap();
    assert!(detections.len() <= 7);
    // Best-first ordering.
    for pair in detections.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn zero_boxes_is_not_an_error() {
    let processor = Postprocessor::new(PostprocessConfig::default()).unwrap();
    assert!(processor.run(&[], &[], 4).unwrap().is_empty());
    assert!(nms(&[], &[], 0.5).unwrap().is_empty());
}
