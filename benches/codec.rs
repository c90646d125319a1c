use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use speckvol::prelude::*;
use speckvol::{bits, wavelet};

fn test_volume(dims: Vec3<usize>) -> Vec<f64> {
    (0 .. dims.volume())
        .map(|index| {
            (index as f64 * 0.013).sin() * 50.0 + ((index % 89) as f64 * 0.4).cos() * 5.0
        })
        .collect()
}

fn bench_bit_packing(criterion: &mut Criterion) {
    let bit_count = 1 << 20;
    let flags: Vec<bool> = (0 .. bit_count).map(|index| index % 3 == 0).collect();
    let mut packed = vec![0_u8; bit_count / 8];
    bits::pack_bits_into(&mut packed, 0, &flags).unwrap();

    let mut group = criterion.benchmark_group("bit packing");
    group.throughput(Throughput::Bytes((bit_count / 8) as u64));

    group.bench_function("pack one megabit", |bencher| {
        bencher.iter(|| {
            bits::pack_bits_into(black_box(&mut packed), 0, black_box(&flags)).unwrap();
        })
    });

    group.bench_function("unpack one megabit", |bencher| {
        bencher.iter(|| bits::unpack_bits_from(black_box(&packed), 0).unwrap())
    });

    group.finish();
}

fn bench_wavelet(criterion: &mut Criterion) {
    let dims = Vec3(64, 64, 64);
    let volume = test_volume(dims);

    criterion.bench_function("forward and inverse transform 64 cubed", |bencher| {
        bencher.iter(|| {
            let mut buffer = volume.clone();
            wavelet::forward_3d(&mut buffer, dims);
            wavelet::inverse_3d(&mut buffer, dims);
            buffer
        })
    });
}

fn bench_pipeline(criterion: &mut Criterion) {
    let dims = Vec3(64, 64, 64);
    let volume = test_volume(dims);

    criterion.bench_function("compress 64 cubed at 2 bits per sample", |bencher| {
        bencher.iter(|| {
            let mut compressor = Compressor::new(dims);
            compressor.take_data(volume.clone()).unwrap();
            compressor.set_target(RateTarget::BitsPerSample(2.0)).unwrap();
            compressor.compress().unwrap()
        })
    });

    let mut compressor = Compressor::new(dims);
    compressor.take_data(volume).unwrap();
    compressor.set_target(RateTarget::BitsPerSample(2.0)).unwrap();
    let stream = compressor.compress().unwrap();

    criterion.bench_function("decompress 64 cubed at 2 bits per sample", |bencher| {
        bencher.iter(|| {
            let mut decompressor = Decompressor::new();
            decompressor.use_stream(black_box(&stream)).unwrap();
            decompressor.decompress().unwrap()
        })
    });
}

criterion_group!(benches, bench_bit_packing, bench_wavelet, bench_pipeline);
criterion_main!(benches);
