use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

use predictree::hashtree;
use predictree::{Engine, HashAlgorithm, MemoryStore, RocksDbStore};

const SIZES: [u64; 4] = [4, 256, 4096, 65536];

fn values(n: u64) -> Vec<f64> {
  let mut rng = StdRng::seed_from_u64(n);
  (0..n).map(|_| rng.random_range(-1000.0..1000.0)).collect()
}

fn bench_commit(c: &mut Criterion) {
  let mut group = c.benchmark_group("commit");
  for n in SIZES {
    let values = values(n);
    for algorithm in [HashAlgorithm::Keccak256, HashAlgorithm::Blake3] {
      let engine = Engine::with_algorithm(MemoryStore::new(), algorithm);
      let mut rng = StdRng::seed_from_u64(0);
      group.bench_with_input(BenchmarkId::new(format!("memory-{algorithm}"), n), &values, |b, values| {
        b.iter(|| engine.commit_with_rng(values, &mut rng).unwrap())
      });
    }
  }
  group.finish();

  let dir = tempfile::Builder::new().prefix(".tmp-predictree-bench").tempdir().unwrap();
  let engine = Engine::new(RocksDbStore::open(dir.path()).unwrap());
  let values = values(4096);
  let mut rng = StdRng::seed_from_u64(0);
  c.bench_function("commit rocksdb 4096", |b| b.iter(|| engine.commit_with_rng(&values, &mut rng).unwrap()));
}

fn bench_proof(c: &mut Criterion) {
  let mut group = c.benchmark_group("proof");
  for n in SIZES {
    let engine = Engine::new(MemoryStore::new());
    let meta = engine.commit_with_rng(&values(n), &mut StdRng::seed_from_u64(0)).unwrap();
    let mut i = 0;
    group.bench_function(BenchmarkId::new("memory", n), |b| {
      b.iter(|| {
        let proof = engine.proof(&meta.tree_id, i % n).unwrap();
        i += 1;
        proof
      })
    });
  }
  group.finish();
}

fn bench_verify(c: &mut Criterion) {
  let engine = Engine::new(MemoryStore::new());
  let meta = engine.commit_with_rng(&values(65536), &mut StdRng::seed_from_u64(0)).unwrap();
  let proof = engine.proof(&meta.tree_id, 12345).unwrap();
  let siblings = proof.digests();
  c.bench_function("verify 65536", |b| {
    b.iter(|| {
      hashtree::verify(meta.algorithm, black_box(&proof.leaf), black_box(proof.index), &siblings, &meta.root)
    })
  });
}

criterion_group!(benches, bench_commit, bench_proof, bench_verify);
criterion_main!(benches);
