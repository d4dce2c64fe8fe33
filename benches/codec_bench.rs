use blobby::blobette::{decode, encode};
use blobby::checksum::hash_bytes;
use blobby::io_stream::BlobReader;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::Cursor;

fn bench_checksum(c: &mut Criterion) {
    let data = vec![0xA5u8; 1024 * 1024];
    c.bench_function("pearson_1mb", |b| b.iter(|| hash_bytes(0, black_box(&data))));
}

fn bench_encode(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];
    c.bench_function("encode_1mb", |b| {
        b.iter(|| encode(0o100644, b"bench.bin", black_box(&data)).unwrap())
    });
}

fn bench_decode(c: &mut Criterion) {
    let record = encode(0o100644, b"bench.bin", &vec![42u8; 1024 * 1024]).unwrap();
    c.bench_function("decode_1mb", |b| {
        b.iter(|| decode(&mut Cursor::new(black_box(&record))).unwrap())
    });
}

fn bench_list_many_small(c: &mut Criterion) {
    let mut container = Vec::new();
    for i in 0..1000 {
        let path = format!("dir/file_{i:04}.txt");
        container.extend(encode(0o100644, path.as_bytes(), b"small file body").unwrap());
    }
    c.bench_function("list_1000_records", |b| {
        b.iter(|| BlobReader::from_reader(Cursor::new(black_box(&container))).count())
    });
}

criterion_group!(benches, bench_checksum, bench_encode, bench_decode, bench_list_many_small);
criterion_main!(benches);
