use anchordet::{
    nms, AnchorConfig, AnchorGenerator, BBox, FeatureMapShape, PostprocessConfig, Postprocessor,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn make_candidates(count: usize) -> (Vec<BBox>, Vec<f32>) {
    let mut boxes = Vec::with_capacity(count);
    let mut scores = Vec::with_capacity(count);
    for i in 0..count {
        let x = ((i * 37) % 700) as f32;
        let y = ((i * 53) % 500) as f32;
        let w = 40.0 + ((i * 11) % 60) as f32;
        let h = 40.0 + ((i * 17) % 60) as f32;
        boxes.push(BBox::new(x, y, x + w, y + h).unwrap());
        scores.push(((((i * 29) ^ (i * 13)) % 1000) as f32) / 1000.0);
    }
    (boxes, scores)
}

fn bench_nms(c: &mut Criterion) {
    let (boxes, scores) = make_candidates(2000);
    c.bench_function("nms_2000_boxes", |b| {
        b.iter(|| nms(black_box(&boxes), black_box(&scores), 0.5).unwrap())
    });
}

fn bench_postprocess(c: &mut Criterion) {
    let (boxes, raw) = make_candidates(2000);
    // Spread each candidate's score over four classes.
    let num_classes = 4;
    let scores: Vec<f32> = raw
        .iter()
        .flat_map(|&s| {
            [
                s,
                (s * 0.7).min(1.0),
                (s * 0.4).min(1.0),
                (s * 0.1).min(1.0),
            ]
        })
        .collect();
    let processor = Postprocessor::new(PostprocessConfig::default()).unwrap();
    c.bench_function("postprocess_2000_boxes_4_classes", |b| {
        b.iter(|| {
            processor
                .run(black_box(&boxes), black_box(&scores), num_classes)
                .unwrap()
        })
    });
}

fn bench_anchor_generation(c: &mut Criterion) {
    let generator = AnchorGenerator::new(AnchorConfig::default()).unwrap();
    // Pyramid shapes for an 800x800 input at strides 8..128.
    let shapes: Vec<FeatureMapShape> = [100usize, 50, 25, 13, 7]
        .iter()
        .map(|&side| FeatureMapShape {
            width: side,
            height: side,
        })
        .collect();
    c.bench_function("anchors_800px_pyramid", |b| {
        b.iter(|| generator.generate(black_box(&shapes)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_nms,
    bench_postprocess,
    bench_anchor_generation
);
criterion_main!(benches);
