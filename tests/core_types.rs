use anchordet::{
    AnchorConfig, AnchorGenerator, BBox, BoxCoder, CoderConfig, DetectError, FeatureMapShape,
    ImageSize, IouMatrix, LevelSpec,
};

#[test]
fn bbox_rejects_inverted_and_non_finite_corners() {
    let err = BBox::new(5.0, 0.0, 1.0, 1.0).err().unwrap();
    assert_eq!(
        err,
        DetectError::InvalidGeometry {
            x1: 5.0,
            y1: 0.0,
            x2: 1.0,
            y2: 1.0,
        }
    );

    assert!(BBox::new(0.0, f32::NAN, 1.0, 1.0).is_err());
    assert!(BBox::new(0.0, 0.0, 1.0, f32::INFINITY).is_err());
    // Degenerate but ordered corners are allowed.
    assert!(BBox::new(3.0, 3.0, 3.0, 3.0).is_ok());
}

#[test]
fn bbox_accessors_match_construction() {
    let b = BBox::new(10.0, 20.0, 110.0, 70.0).unwrap();
    assert_eq!(b.width(), 100.0);
    assert_eq!(b.height(), 50.0);
    assert_eq!(b.center(), (60.0, 45.0));

    let from_center = BBox::from_center(60.0, 45.0, 100.0, 50.0).unwrap();
    assert_eq!(from_center, b);
}

#[test]
fn clip_is_idempotent() {
    let image = ImageSize {
        width: 640,
        height: 480,
    };
    let b = BBox::new(-20.0, 30.0, 700.0, 500.0).unwrap();
    let once = anchordet::clip(b, image);
    let twice = anchordet::clip(once, image);
    assert_eq!(once, twice);
}

#[test]
fn coder_round_trips_across_scales_and_offsets() {
    let coder = BoxCoder::new(CoderConfig::default());
    let anchors = [
        BBox::new(0.0, 0.0, 32.0, 32.0).unwrap(),
        BBox::new(100.0, 200.0, 400.0, 350.0).unwrap(),
        BBox::new(7.0, 3.0, 19.0, 41.0).unwrap(),
    ];
    let targets = [
        BBox::new(5.0, 2.0, 30.0, 28.0).unwrap(),
        BBox::new(90.0, 180.0, 420.0, 380.0).unwrap(),
        BBox::new(6.0, 6.0, 22.0, 38.0).unwrap(),
    ];

    for &anchor in &anchors {
        for &target in &targets {
            let deltas = coder.encode(anchor, target).unwrap();
            let decoded = coder.decode(anchor, deltas).unwrap();
            assert!((decoded.x1() - target.x1()).abs() < 1e-2);
            assert!((decoded.y1() - target.y1()).abs() < 1e-2);
            assert!((decoded.x2() - target.x2()).abs() < 1e-2);
            assert!((decoded.y2() - target.y2()).abs() < 1e-2);
        }
    }
}

#[test]
fn iou_matrix_agrees_with_pairwise_iou() {
    let anchors = [
        BBox::new(0.0, 0.0, 10.0, 10.0).unwrap(),
        BBox::new(5.0, 5.0, 15.0, 15.0).unwrap(),
        BBox::new(100.0, 100.0, 120.0, 120.0).unwrap(),
    ];
    let gts = [
        BBox::new(0.0, 0.0, 10.0, 10.0).unwrap(),
        BBox::new(110.0, 110.0, 130.0, 130.0).unwrap(),
    ];
    let m = IouMatrix::between(&anchors, &gts);
    for (row, &anchor) in anchors.iter().enumerate() {
        for (col, &gt) in gts.iter().enumerate() {
            assert_eq!(m.at(row, col), anchordet::iou(anchor, gt));
        }
    }
}

#[test]
fn anchor_output_alignment_mismatch_fails_at_setup() {
    let cfg = AnchorConfig {
        levels: vec![LevelSpec {
            stride: 16.0,
            scales: vec![32.0, 64.0],
        }],
        aspect_ratios: vec![0.5, 1.0, 2.0],
    };
    let generator = AnchorGenerator::new(cfg).unwrap();
    let set = generator
        .generate(&[FeatureMapShape {
            width: 4,
            height: 4,
        }])
        .unwrap();

    // 4x4 cells x 6 templates.
    assert_eq!(set.len(), 96);
    assert!(set.validate_alignment(96 * 5, 5, 96).is_ok());

    let err = set.validate_alignment(96 * 5, 5, 95).err().unwrap();
    assert_eq!(
        err,
        DetectError::ShapeMismatch {
            expected: 96,
            got: 95,
            context: "box deltas",
        }
    );
}
