use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::Array3;
use std::hint::black_box;
use tempfile::TempDir;
use tilevol::tile::{decode_tile, encode_tile};
use tilevol::{DirectoryRing, StoreConfig, VolumeLayout, VolumeStore};

fn bench_codec(c: &mut Criterion) {
    let tile = Array3::from_shape_fn((32, 32, 32), |(a, b, c)| (a + b + c) as f32);
    let raw = encode_tile(tile.view());

    c.bench_function("encode_tile_32", |b| {
        b.iter(|| encode_tile(black_box(tile.view())))
    });
    c.bench_function("decode_tile_32", |b| {
        b.iter(|| decode_tile(black_box(&raw), [32, 32, 32]))
    });
}

fn bench_store(c: &mut Criterion) {
    let root = TempDir::new().unwrap();
    let layout = VolumeLayout::build(
        [0, 0, 0],
        [64, 64, 64],
        [1, 1, 1],
        [16, 16, 16],
        "bench_",
        ".bin",
        DirectoryRing::new([root.path().join("d0"), root.path().join("d1")]).unwrap(),
    )
    .unwrap();
    let data = Array3::from_elem((64, 64, 64), 1.5f32);
    let store = VolumeStore::create_from_array(layout, StoreConfig::default(), data.view()).unwrap();

    c.bench_function("read_whole_64", |b| b.iter(|| store.read_whole().unwrap()));
    c.bench_function("read_region_20", |b| {
        b.iter(|| store.read_region(black_box([10, 10, 10]), [20, 20, 20]).unwrap())
    });
    c.bench_function("write_region_20", |b| {
        let patch = Array3::from_elem((20, 20, 20), 2.5f32);
        b.iter(|| store.write_region(black_box([10, 10, 10]), patch.view()).unwrap())
    });
}

criterion_group!(benches, bench_codec, bench_store);
criterion_main!(benches);
