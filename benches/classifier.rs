//! Benchmarks for the CPU keying path.
//!
//! Run with: cargo bench --bench classifier

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use chroma_keyer::{
    keying::{key_pixel, ClassifierBackend, CpuBackend, KeySettings},
    Frame,
};

fn bench_key_pixel(c: &mut Criterion) {
    let settings = KeySettings::green_screen();

    c.bench_function("key_pixel_screen", |bencher| {
        bencher.iter(|| key_pixel(black_box([0.1, 0.85, 0.15]), black_box(&settings)));
    });

    c.bench_function("key_pixel_subject", |bencher| {
        bencher.iter(|| key_pixel(black_box([0.8, 0.6, 0.5]), black_box(&settings)));
    });
}

fn gradient_frame(width: u32, height: u32) -> Frame {
    let mut frame = Frame::new_black(width, height);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(1)) as u8;
            let b = (y * 255 / height.max(1)) as u8;
            frame.set_pixel(x, y, [r, 200, b, 255]);
        }
    }
    frame
}

fn bench_cpu_classifier(c: &mut Criterion) {
    let settings = KeySettings::green_screen();
    let mut group = c.benchmark_group("cpu_classify");

    for &(width, height) in &[(320u32, 180u32), (1280, 720)] {
        let frame = gradient_frame(width, height);
        let mut classifier = CpuBackend::default()
            .create(width, height)
            .expect("classifier");

        group.throughput(Throughput::Elements(width as u64 * height as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, height)),
            &frame,
            |bencher, frame| {
                bencher.iter(|| {
                    classifier
                        .classify(black_box(frame), &settings)
                        .expect("classify")
                });
            },
        );

        classifier.destroy();
    }

    group.finish();
}

criterion_group!(benches, bench_key_pixel, bench_cpu_classifier);
criterion_main!(benches);
