use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::{Duration, Instant};
use style_transfer as st;

fn synthetic(size: u32) -> st::image::DynamicImage {
    let img = st::image::RgbaImage::from_fn(size, size, |x, y| {
        st::image::Rgba([
            ((x * 255) / size) as u8,
            ((y * 255) / size) as u8,
            ((x + y) % 256) as u8,
            255,
        ])
    });
    st::image::DynamicImage::ImageRgba8(img)
}

fn stylize(c: &mut Criterion) {
    static DIM: u32 = 32;

    // Generate the images once to reduce variation between runs,
    // though we still do a memcpy each run
    let content = synthetic(16 * DIM);
    let style = synthetic(16 * DIM);

    let mut group = c.benchmark_group("stylize");
    group.sample_size(10);

    for dim in [DIM, 2 * DIM, 4 * DIM, 8 * DIM].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(dim), dim, |b, &dim| {
            b.iter_custom(|iters| {
                let mut total_elapsed = Duration::new(0, 0);
                for _i in 0..iters {
                    let sess = st::Session::builder()
                        .content(content.clone())
                        .add_style(style.clone())
                        .seed(120)
                        .output_size(st::Dims::square(dim))
                        .resize_input(st::Dims::square(dim))
                        .build()
                        .unwrap();

                    let start = Instant::now();
                    black_box(sess.run());
                    total_elapsed += start.elapsed();
                }

                total_elapsed
            });
        });
    }
    group.finish();
}

fn train_iteration(c: &mut Criterion) {
    static DIM: u32 = 32;

    let content = synthetic(4 * DIM);
    let style = synthetic(4 * DIM);

    let mut group = c.benchmark_group("train_iteration");
    group.sample_size(10);

    for dim in [DIM, 2 * DIM, 4 * DIM].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(dim), dim, |b, &dim| {
            b.iter_custom(|iters| {
                let trainer = st::Trainer::builder()
                    .add_content(content.clone())
                    .add_style(style.clone())
                    .resize_input(st::Dims::square(dim))
                    .iterations(iters.max(1) as usize)
                    .seed(120)
                    .build()
                    .unwrap();

                let start = Instant::now();
                black_box(trainer.run(None).unwrap());
                start.elapsed()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, stylize, train_iteration);
criterion_main!(benches);
