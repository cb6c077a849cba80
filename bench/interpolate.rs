#![recursion_limit = "256"]

use burn::prelude::*;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use hero_depth::{
    InferenceBackend,
    interpolate::{InterpolationMethod, resize_bicubic, resize_gray_bicubic},
};
use image::GrayImage;
use std::hint::black_box;

criterion_group! {
    name = interpolation_benchmarks;
    config = Criterion::default().sample_size(20);
    targets = interpolation_benchmark, gray_resize_benchmark,
}
criterion_main!(interpolation_benchmarks);

struct ResizeCase {
    name: &'static str,
    in_height: usize,
    in_width: usize,
    out_height: usize,
    out_width: usize,
}

const CASES: [ResizeCase; 3] = [
    ResizeCase {
        name: "prediction_518x700_to_1080x1440",
        in_height: 518,
        in_width: 700,
        out_height: 1080,
        out_width: 1440,
    },
    ResizeCase {
        name: "prediction_518x924_to_2160x3840",
        in_height: 518,
        in_width: 924,
        out_height: 2160,
        out_width: 3840,
    },
    ResizeCase {
        name: "prediction_518x518_to_256x256",
        in_height: 518,
        in_width: 518,
        out_height: 256,
        out_width: 256,
    },
];

fn interpolation_benchmark(c: &mut Criterion) {
    let device = <InferenceBackend as Backend>::Device::default();

    let mut group = c.benchmark_group("hero_depth_bicubic");
    for case in CASES {
        let input: Tensor<InferenceBackend, 4> = Tensor::random(
            [1, 1, case.in_height, case.in_width],
            burn::tensor::Distribution::Default,
            &device,
        );
        let size = [case.out_height, case.out_width];
        group.throughput(Throughput::Elements((case.out_height * case.out_width) as u64));

        for (label, method) in [
            ("custom", InterpolationMethod::Custom),
            ("burn", InterpolationMethod::Burn),
        ] {
            group.bench_function(format!("{}::{label}", case.name), |b| {
                b.iter(|| {
                    let output = resize_bicubic(input.clone(), size, method).unwrap();
                    InferenceBackend::sync(&device);
                    black_box(output);
                });
            });
        }
    }
    group.finish();
}

fn gray_resize_benchmark(c: &mut Criterion) {
    let image = GrayImage::from_fn(1440, 1080, |x, y| image::Luma([((x ^ y) & 0xff) as u8]));

    let mut group = c.benchmark_group("hero_depth_gray_resize");
    group.throughput(Throughput::Elements(1920 * 1440));
    group.bench_function("gray_1440x1080_to_1920x1440", |b| {
        b.iter(|| black_box(resize_gray_bicubic(&image, 1920, 1440).unwrap()));
    });
    group.bench_function("gray_same_size_copy", |b| {
        b.iter(|| black_box(resize_gray_bicubic(&image, 1440, 1080).unwrap()));
    });
    group.finish();
}
