use ann_engine::{AnnIndex, TOP_K};
use clap::Parser;
use hdrhistogram::Histogram;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, about = "Build a random index, measure recall@10 and latency", long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 10_000)]
    num_vectors: usize,

    #[arg(short, long, default_value_t = 128)]
    dim: usize,

    #[arg(short, long, default_value_t = 100)]
    queries: usize,

    #[arg(short, long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    println!(
        "=== Benchmark: N={}, Dim={}, Queries={} ===",
        args.num_vectors, args.dim, args.queries
    );

    // 1. Generate Data
    println!("Generating data...");
    let mut rng = StdRng::seed_from_u64(args.seed);
    let base: Vec<f32> = (0..args.num_vectors * args.dim)
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect();
    let queries: Vec<Vec<f32>> = (0..args.queries)
        .map(|_| (0..args.dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();

    // 2. Build Index
    println!("Building index...");
    let start = Instant::now();
    let index = AnnIndex::build(args.dim, base)?;
    println!("Build time: {:.2?}", start.elapsed());

    // 3. Ground Truth (brute force, parallel over queries)
    println!("Computing ground truth...");
    let truth: Vec<[i32; TOP_K]> = queries
        .par_iter()
        .map(|q| {
            let mut out = [0i32; TOP_K];
            index.search_exhaustive(q, &mut out);
            out
        })
        .collect();

    // 4. Timed Queries
    println!("Running queries...");
    let mut hist = Histogram::<u64>::new(3)?;
    let mut hits = 0usize;
    let start = Instant::now();
    for (q, expected) in queries.iter().zip(truth.iter()) {
        let t0 = Instant::now();
        let mut out = [0i32; TOP_K];
        index.search(q, &mut out);
        hist.record(t0.elapsed().as_micros() as u64)?;
        hits += expected.iter().filter(|&e| out.contains(e)).count();
    }
    let total = start.elapsed();

    let recall = hits as f64 / (args.queries * TOP_K) as f64;
    let qps = args.queries as f64 / total.as_secs_f64();

    println!("Recall@10: {recall:.4}");
    println!("QPS: {qps:.0}");
    println!(
        "Latency (us): p50={} p99={} max={}",
        hist.value_at_quantile(0.50),
        hist.value_at_quantile(0.99),
        hist.max()
    );

    Ok(())
}
