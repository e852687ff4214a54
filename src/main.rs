use std::fs::create_dir_all;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Local;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::{Builder, TempDir};
use tracing_subscriber::EnvFilter;

use predictree::{Engine, EngineConfig, HashAlgorithm, MemoryStore, Result, RocksDbStore, Store, TreeId, file_size};

mod stat;

#[derive(Parser)]
#[command(name = "predictree-bench")]
#[command(about = "Measure commit and proof generation time against the number of predictions")]
struct Args {
  /// Output directory for CSV reports and working temporary databases
  #[arg(index = 1, default_value = ".")]
  dir: PathBuf,

  /// Largest tree to measure
  #[arg(long, default_value_t = 64 * 1024)]
  max_n: u64,

  /// Number of tree sizes measured between 0 and max-n
  #[arg(long, default_value_t = 8)]
  division: u64,

  /// Minimum repetitions per tree size
  #[arg(long, default_value_t = 10)]
  loops: usize,

  /// Maximum repetitions while the ±2σ spread stays above the threshold
  #[arg(long, default_value_t = 100)]
  max_loops: usize,

  /// Stability threshold for the ±2σ spread in percent of the mean
  #[arg(long, default_value_t = 5.0)]
  threshold: f64,

  /// Engine configuration; its hash function is used for every measured tree
  #[arg(long)]
  config: Option<PathBuf>,
}

struct Session {
  id: String,
  dir: PathBuf,
  algorithm: HashAlgorithm,
  loops: usize,
  max_loops: usize,
  threshold: f64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();
  let args = Args::parse();

  let config = match &args.config {
    Some(path) => EngineConfig::from_file(path)?,
    None => EngineConfig::default(),
  };

  let dir = args.dir.clone();
  create_dir_all(&dir)?;
  println!("Working directory: {:?}", &dir);

  let session = Session {
    id: Local::now().format("%Y%m%d%H%M%S").to_string(),
    dir,
    algorithm: config.hash,
    loops: args.loops.max(1),
    max_loops: args.max_loops.max(args.loops.max(1)),
    threshold: args.threshold,
  };
  let sizes = sizes(args.max_n, args.division);

  run_commit_memory(&session, &sizes)?;
  run_commit_rocksdb(&session, &sizes)?;
  run_proof_memory(&session, &sizes)?;
  run_proof_rocksdb(&session, &sizes)?;

  Ok(())
}

/// Tree sizes measured: `division` evenly spaced steps up to `max_n`, never empty trees.
fn sizes(max_n: u64, division: u64) -> Vec<u64> {
  let step = (max_n / division.max(1)).max(1);
  let mut sizes = (0..=max_n).step_by(step as usize).map(|n| n.max(1)).collect::<Vec<_>>();
  sizes.dedup();
  sizes
}

fn values(n: u64, seed: u64) -> Vec<f64> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..n).map(|_| rng.random_range(-1000.0..1000.0)).collect()
}

fn stable(report: &stat::Report<u64>, n: u64, count: usize, session: &Session) -> bool {
  if count < session.loops {
    return false;
  }
  if count >= session.max_loops {
    return true;
  }
  let s = report.single(n);
  s.mean <= 0.0 || 2.0 * s.std_dev / s.mean * 100.0 <= session.threshold
}

/// Prepares a fixture once per size, then repeats `run` against it until its timings are
/// stable, and writes the CSV report.
fn measure<T, P, F>(session: &Session, sizes: &[u64], name: &str, mut prepare: P, mut run: F) -> Result<()>
where
  P: FnMut(u64) -> Result<T>,
  F: FnMut(&T, u64, u64) -> Result<(Duration, u64)>,
{
  println!("[{name}]");
  let mut report = stat::Report::new("N");
  for &n in sizes {
    let fixture = prepare(n)?;
    let mut size = 0;
    let mut count = 0;
    while !stable(&report, n, count, session) {
      let (elapsed, bytes) = run(&fixture, n, count as u64)?;
      report.add(n, elapsed);
      size = bytes;
      count += 1;
    }
    let s = report.single(n);
    println!("  n={n}: {s}; {size} bytes");
  }

  let path = session.dir.join(format!("{}-{name}.csv", session.id));
  report.save_to_csv(&path)?;
  println!("==> {}", path.to_string_lossy());
  Ok(())
}

fn rocksdb_engine(session: &Session, prefix: &str) -> Result<(TempDir, Engine<RocksDbStore>)> {
  let tf = Builder::new().prefix(prefix).tempdir_in(&session.dir)?;
  let store = RocksDbStore::open(tf.path().join("db"))?;
  Ok((tf, Engine::with_algorithm(store, session.algorithm)))
}

fn run_commit_memory(session: &Session, sizes: &[u64]) -> Result<()> {
  measure(
    session,
    sizes,
    "memory-commit",
    |_| Ok(()),
    |_, n, seed| {
      let engine = Engine::with_algorithm(MemoryStore::new(), session.algorithm);
      let values = values(n, seed);
      let mut rng = StdRng::seed_from_u64(seed);

      let t0 = Instant::now();
      engine.commit_with_rng(&values, &mut rng)?;
      let t1 = Instant::now();

      Ok((t1 - t0, 0))
    },
  )
}

fn run_commit_rocksdb(session: &Session, sizes: &[u64]) -> Result<()> {
  measure(
    session,
    sizes,
    "rocksdb-commit",
    |_| Ok(()),
    |_, n, seed| {
      let (tf, engine) = rocksdb_engine(session, ".tmp-predictree-commit")?;
      let values = values(n, seed);
      let mut rng = StdRng::seed_from_u64(seed);

      let t0 = Instant::now();
      engine.commit_with_rng(&values, &mut rng)?;
      let t1 = Instant::now();

      engine.store().flush()?;
      Ok((t1 - t0, file_size(tf.path())))
    },
  )
}

fn run_proof_memory(session: &Session, sizes: &[u64]) -> Result<()> {
  measure(
    session,
    sizes,
    "memory-proof",
    |n| {
      let engine = Engine::with_algorithm(MemoryStore::new(), session.algorithm);
      let meta = engine.commit_with_rng(&values(n, 0), &mut StdRng::seed_from_u64(0))?;
      Ok((engine, meta.tree_id))
    },
    |(engine, tree_id): &(Engine<MemoryStore>, TreeId), n, seed| Ok((prove(engine, tree_id, n, seed)?, 0)),
  )
}

fn run_proof_rocksdb(session: &Session, sizes: &[u64]) -> Result<()> {
  measure(
    session,
    sizes,
    "rocksdb-proof",
    |n| {
      let (tf, engine) = rocksdb_engine(session, ".tmp-predictree-proof")?;
      let meta = engine.commit_with_rng(&values(n, 0), &mut StdRng::seed_from_u64(0))?;
      engine.store().flush()?;
      Ok((tf, engine, meta.tree_id))
    },
    |(tf, engine, tree_id): &(TempDir, Engine<RocksDbStore>, TreeId), n, seed| {
      Ok((prove(engine, tree_id, n, seed)?, file_size(tf.path())))
    },
  )
}

fn prove<S: Store>(engine: &Engine<S>, tree_id: &TreeId, n: u64, seed: u64) -> Result<Duration> {
  let index = StdRng::seed_from_u64(seed).random_range(0..n);

  let t0 = Instant::now();
  let proof = engine.proof(tree_id, index)?;
  let t1 = Instant::now();

  debug_assert!(proof.verify());
  Ok(t1 - t0)
}
