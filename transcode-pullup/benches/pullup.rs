//! Pullup benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use transcode_pullup::metrics::{block_extent, comb_scalar, diff_scalar, var_scalar};
use transcode_pullup::{
    detect_simd, FieldOrder, MetricAcceleration, MetricSet, PullupConfig, PullupFilter,
};

fn generate_plane(width: usize, height: usize, seed: usize) -> Vec<u8> {
    (0..width * height)
        .map(|i| ((i * 7 + seed * 13 + (i / width) * 3) % 256) as u8)
        .collect()
}

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("pullup_kernels");
    let s = 2 * 720;
    let a = generate_plane(720, 16, 1);
    let b = generate_plane(720, 16, 2);
    assert!(a.len() >= block_extent(s));

    let simd = MetricSet::for_capabilities(&detect_simd());
    let sets = [("scalar", MetricSet::scalar()), (simd.name, simd)];

    for (name, set) in sets {
        group.bench_function(format!("diff_{}", name), |bench| {
            bench.iter(|| (set.diff)(black_box(&a), black_box(&b), s))
        });
        group.bench_function(format!("comb_{}", name), |bench| {
            bench.iter(|| (set.comb)(black_box(&a), black_box(&b), s))
        });
        group.bench_function(format!("var_{}", name), |bench| {
            bench.iter(|| (set.var)(black_box(&a), black_box(&b), s))
        });
    }

    // Keep the reference kernels honest against the selected ones.
    assert_eq!((simd.diff)(&a, &b, s), diff_scalar(&a, &b, s));
    assert_eq!((simd.comb)(&a, &b, s), comb_scalar(&a, &b, s));
    assert_eq!((simd.var)(&a, &b, s), var_scalar(&a, &b, s));

    group.finish();
}

fn bench_telecine_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("pullup_cycle");

    for (width, height, name) in &[(720usize, 480usize, "ntsc"), (1920, 1088, "1080")] {
        let pictures: Vec<Vec<u8>> = (0..4).map(|i| generate_plane(*width, *height, i)).collect();
        let flags = [
            (FieldOrder::TopFieldFirst, true),
            (FieldOrder::BottomFieldFirst, false),
            (FieldOrder::BottomFieldFirst, true),
            (FieldOrder::TopFieldFirst, false),
        ];
        group.throughput(Throughput::Elements(4));

        for acceleration in [MetricAcceleration::Scalar, MetricAcceleration::Auto] {
            let mut config = PullupConfig::luma(*width, *height);
            config.acceleration = acceleration;
            let Ok(mut filter) = PullupFilter::new(config) else {
                continue;
            };
            let label = format!("{}_{:?}", name, acceleration).to_lowercase();

            group.bench_function(label, |b| {
                b.iter(|| {
                    for (plane, &(order, rff)) in pictures.iter().zip(&flags) {
                        let out = filter.push_frame(&[plane.as_slice()], order, rff);
                        let _ = black_box(out);
                    }
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_kernels, bench_telecine_cycle);
criterion_main!(benches);
