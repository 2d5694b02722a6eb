use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use openerp_kvapi::{Collect, KVError, Store, StoreConfig};

fn open_file_store(tmp: &TempDir) -> Store {
    let path = tmp.path().join("bench.redb");
    Store::open(path.to_str().unwrap()).unwrap()
}

fn bench_store(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let store = open_file_store(&tmp);

    c.bench_function("store", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("bench:key:{}", i);
            store
                .store(black_box(key.as_bytes()), black_box(b"hello world"))
                .unwrap();
            i += 1;
        });
    });
}

fn bench_append(c: &mut Criterion) {
    let store = Store::open(":mem:").unwrap();

    c.bench_function("append_mem", |b| {
        let mut i = 0u64;
        b.iter(|| {
            // Reset periodically so the record stays a realistic size.
            if i % 1000 == 0 {
                store.store(b"bench:log", b"").unwrap();
            }
            store.append(b"bench:log", black_box(b"entry;")).unwrap();
            i += 1;
        });
    });
}

fn bench_fetch(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let store = open_file_store(&tmp);

    // Pre-populate.
    for i in 0..1000 {
        let key = format!("bench:key:{:04}", i);
        store.store(key.as_bytes(), b"hello world").unwrap();
    }

    c.bench_function("fetch", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("bench:key:{:04}", i % 1000);
            let _ = store.fetch(black_box(key.as_bytes())).unwrap();
            i += 1;
        });
    });
}

fn bench_fetch_large(c: &mut Criterion) {
    let store = Store::open(":mem:").unwrap();
    let value = vec![0xABu8; 1024 * 1024];
    store.store(b"bench:large", &value).unwrap();

    c.bench_function("fetch_1mb", |b| {
        b.iter(|| {
            let v = store.fetch(black_box(b"bench:large")).unwrap();
            assert_eq!(v.len(), value.len());
        });
    });

    c.bench_function("fetch_streaming_1mb_collect", |b| {
        b.iter(|| {
            let mut collect = Collect::default();
            store
                .fetch_streaming(black_box(b"bench:large"), &mut collect)
                .unwrap();
            assert_eq!(collect.bytes.len(), value.len());
        });
    });
}

fn bench_fetch_streaming_count(c: &mut Criterion) {
    let store = Store::open_with(StoreConfig::default().chunk_size(64 * 1024)).unwrap();
    let value = vec![0x5Au8; 1024 * 1024];
    store.store(b"bench:large", &value).unwrap();

    c.bench_function("fetch_streaming_1mb_count", |b| {
        b.iter(|| {
            let mut total = 0usize;
            store
                .fetch_streaming(
                    black_box(b"bench:large"),
                    &mut |chunk: &[u8]| -> Result<(), KVError> {
                        total += chunk.len();
                        Ok(())
                    },
                )
                .unwrap();
            assert_eq!(total, value.len());
        });
    });
}

criterion_group!(
    benches,
    bench_store,
    bench_append,
    bench_fetch,
    bench_fetch_large,
    bench_fetch_streaming_count,
);
criterion_main!(benches);
