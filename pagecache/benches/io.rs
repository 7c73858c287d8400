use criterion::{Criterion, SamplingMode, Throughput, criterion_group, criterion_main};
use pagecache::cache::filesystem::FilesystemCache;
use pagecache::cache::object_store::ObjectStoreCache;
use pagecache::cache::{ArtifactMetadata, CacheBackend, CacheKey};
use pagecache::store::in_memory::InMemoryObjectStore;
use pagecache::util::close::Close;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::io;
use std::io::Write;
use tempfile::tempdir;

const SIZES_KIB: [usize; 4] = [4, 64, 1024, 16 * 1024];

struct IoBenchHarness {
    _tempdir: tempfile::TempDir,
    filesystem: FilesystemCache,
    object_store: ObjectStoreCache<InMemoryObjectStore>,
    rng: Xoshiro256PlusPlus,
}

impl Default for IoBenchHarness {
    fn default() -> Self {
        let tempdir = tempdir().unwrap();
        Self {
            filesystem: FilesystemCache::new(tempdir.path()),
            _tempdir: tempdir,
            object_store: ObjectStoreCache::new(InMemoryObjectStore::new()),
            rng: Xoshiro256PlusPlus::seed_from_u64(42),
        }
    }
}

impl IoBenchHarness {
    fn payload(&mut self, size: usize) -> Vec<u8> {
        let mut payload = vec![0; size];
        self.rng.fill_bytes(&mut payload);
        payload
    }
}

fn write<C: CacheBackend>(cache: &C, key: &CacheKey, payload: &[u8]) {
    let mut writer = cache
        .open_write(key, &ArtifactMetadata::new(key.file_name(), payload.len() as u64))
        .unwrap();
    writer.write_all(payload).unwrap();
    writer.close().unwrap();
}

fn read<C: CacheBackend>(cache: &C, key: &CacheKey) -> u64 {
    io::copy(&mut cache.open_read(key).unwrap(), &mut io::sink()).unwrap()
}

pub fn write_artifact_benchmark(c: &mut Criterion) {
    let mut harness = IoBenchHarness::default();
    let key = CacheKey::new("bench", "page_1", "png");

    let mut group = c.benchmark_group("I/O write artifact");
    group.sampling_mode(SamplingMode::Flat).sample_size(20);
    for size_kib in SIZES_KIB {
        let payload = harness.payload(size_kib * 1024);
        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_function(format!("filesystem {size_kib} KiB"), |b| {
            b.iter(|| write(&harness.filesystem, &key, &payload))
        });
        group.bench_function(format!("object store {size_kib} KiB"), |b| {
            b.iter(|| write(&harness.object_store, &key, &payload))
        });
    }
    group.finish();
}

pub fn read_artifact_benchmark(c: &mut Criterion) {
    let mut harness = IoBenchHarness::default();
    let key = CacheKey::new("bench", "page_1", "png");

    let mut group = c.benchmark_group("I/O read artifact");
    group.sampling_mode(SamplingMode::Flat).sample_size(20);
    for size_kib in SIZES_KIB {
        let payload = harness.payload(size_kib * 1024);
        write(&harness.filesystem, &key, &payload);
        write(&harness.object_store, &key, &payload);

        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_function(format!("filesystem {size_kib} KiB"), |b| {
            b.iter(|| read(&harness.filesystem, &key))
        });
        group.bench_function(format!("object store {size_kib} KiB"), |b| {
            b.iter(|| read(&harness.object_store, &key))
        });
    }
    group.finish();
}

criterion_group!(
    default_bench_config,
    write_artifact_benchmark,
    read_artifact_benchmark,
);
criterion_main!(default_bench_config);
