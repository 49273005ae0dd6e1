//! Benchmarks for kernel generation, map conversion and emulation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qpu_remap::emu::{EmulatorOptions, Scene, YuyvFrame};
use qpu_remap::launch::Filter;
use qpu_remap::map::{DisplacementMap, MapHeader};
use qpu_remap::{build_kernel, KernelConfig};

fn bench_build_kernel(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_kernel");

    for threads in [2usize, 6, 12] {
        let config = KernelConfig::with_threads(threads);
        group.bench_with_input(BenchmarkId::from_parameter(threads), &config, |b, config| {
            b.iter(|| black_box(build_kernel(black_box(config))));
        });
    }

    group.finish();
}

fn bench_map_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_from_positions");

    for (w, h) in [(128u32, 12u32), (640, 480), (1920, 1080)] {
        let header = MapHeader::same_size(w, h);
        group.throughput(Throughput::Elements(u64::from(w * h)));
        group.bench_with_input(BenchmarkId::new("barrel", format!("{w}x{h}")), &header, |b, header| {
            let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
            b.iter(|| {
                black_box(DisplacementMap::from_positions(*header, 12, |x, y| {
                    let (dx, dy) = (x as f32 - cx, y as f32 - cy);
                    let k = 1.0 + 1e-7 * (dx * dx + dy * dy);
                    (cx + dx * k, cy + dy * k)
                }))
            });
        });
    }

    group.finish();
}

fn bench_emulate_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("emulate_frame");
    group.sample_size(10);

    for (threads, w, h) in [(2usize, 128u32, 8u32), (12, 256, 24)] {
        let map = match DisplacementMap::identity(MapHeader::same_size(w, h), threads) {
            Ok(map) => map,
            Err(e) => panic!("{e}"),
        };
        let source = YuyvFrame::from_fn(w, h, |x, y| [(x ^ y) as u8, 128, 128]);
        let scene = match Scene::new(&map, &source, Filter::Nearest) {
            Ok(scene) => scene,
            Err(e) => panic!("{e}"),
        };
        let program = match build_kernel(&KernelConfig::with_threads(threads)) {
            Ok(program) => program,
            Err(e) => panic!("{e}"),
        };
        group.throughput(Throughput::Elements(u64::from(w * h)));
        group.bench_function(BenchmarkId::new("identity", format!("{threads}t_{w}x{h}")), |b| {
            b.iter(|| black_box(scene.run(program.words(), EmulatorOptions::default())));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_build_kernel,
    bench_map_conversion,
    bench_emulate_frame
);
criterion_main!(benches);
