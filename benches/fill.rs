// Run with:  cargo bench --bench fill

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use rpi_hub75::framebuffer::Framebuffer;
use rpi_hub75::luminance::LuminanceTable;
use rpi_hub75::PanelGeometry;

const ROWS: usize = 16;
const CHAINED: usize = 2;
const BITPLANES: u8 = 11;

fn fill(c: &mut Criterion) {
    let geometry = PanelGeometry::new(ROWS, CHAINED).unwrap();
    let mut group = c.benchmark_group("fill");
    group.throughput(Throughput::Elements(
        (geometry.rows() * geometry.columns()) as u64,
    ));

    group.bench_function("full_depth", |b| {
        let table = Arc::new(LuminanceTable::new(BITPLANES).unwrap());
        let mut fb = Framebuffer::new(geometry, table);

        b.iter(|| {
            black_box(&mut fb).fill(black_box(30), black_box(200), black_box(90));
        });
    });

    group.bench_function("pwm_bits_7", |b| {
        let table = Arc::new(LuminanceTable::new(BITPLANES).unwrap());
        let mut fb = Framebuffer::new(geometry, table);
        fb.set_pwm_bits(7).unwrap();

        b.iter(|| {
            black_box(&mut fb).fill(black_box(30), black_box(200), black_box(90));
        });
    });

    group.finish();
}

fn configure_criterion() -> Criterion {
    Criterion::default()
        .sample_size(100)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(3))
        .confidence_level(0.95)
        .significance_level(0.05)
}

criterion_group! {
    name = benches;
    config = configure_criterion();
    targets = fill
}
criterion_main!(benches);
