use assetcar::{catalog, decode, mutate, Archive, CatalogWriter, Color, PixelBuffer, Representation, Variant, WriteOptions};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn sample() -> Archive {
    let mut w = CatalogWriter::new();
    for i in 0..200 {
        let image = PixelBuffer::filled(64, 64, [i as u8, 40, 200, 255]);
        w.add_image(&format!("image{i}"), Variant::scaled(1 + i % 3), image).unwrap();
        w.add_color(&format!("color{i}"), Color::srgb(0.2, 0.4, 0.6, 1.0)).unwrap();
    }
    Archive::from_bytes(w.finish().unwrap()).unwrap()
}

fn bench_enumerate(c: &mut Criterion) {
    let archive = sample();
    c.bench_function("enumerate_400", |b| b.iter(|| catalog::enumerate(black_box(&archive))));
}

fn bench_decode(c: &mut Criterion) {
    let archive = sample();
    let renditions = catalog::enumerate(&archive);
    let image = renditions.find("image0").unwrap().clone();

    c.bench_function("decode_64x64_zip", |b| b.iter(|| decode(black_box(&archive), &image).unwrap()));
    c.bench_function("decode_all", |b| {
        b.iter(|| {
            for r in renditions.iter() {
                let _ = decode(&archive, r);
            }
        })
    });
}

fn bench_rewrite(c: &mut Criterion) {
    let archive = sample();
    let renditions = catalog::enumerate(&archive);
    let target = renditions.find("image100").unwrap().clone();
    let replacement = Representation::Image(PixelBuffer::filled(64, 64, [1, 2, 3, 255]));

    c.bench_function("remove_rewrite", |b| b.iter(|| mutate::remove(black_box(&archive), &target).unwrap()));
    c.bench_function("replace_rewrite", |b| {
        b.iter(|| mutate::replace(black_box(&archive), &target, &replacement, &WriteOptions::default()).unwrap())
    });
    c.bench_function("noop_save", |b| b.iter(|| black_box(&archive).to_bytes().unwrap()));
}

criterion_group!(benches, bench_enumerate, bench_decode, bench_rewrite);
criterion_main!(benches);
