use fdrive_crypto::{decrypt, decrypt_bytes, encrypt, encrypt_bytes, DEFAULT_CHUNK_SIZE};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt(divan::black_box(&data)).unwrap());
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    let (payload, key) = encrypt(&data).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decrypt(divan::black_box(&payload), divan::black_box(&key), "").unwrap());
}

#[divan::bench(args = [65536, 1048576, 4194304])]
fn bench_encrypt_stream(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt_bytes(divan::black_box(&data), DEFAULT_CHUNK_SIZE).unwrap());
}

#[divan::bench(args = [65536, 1048576, 4194304])]
fn bench_decrypt_stream(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    let (payload, key) = encrypt_bytes(&data, DEFAULT_CHUNK_SIZE).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decrypt_bytes(divan::black_box(&payload), divan::black_box(&key), "").unwrap());
}

fn main() {
    divan::main();
}
