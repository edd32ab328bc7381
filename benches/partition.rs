use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rcbpart::comm::threads;
use rcbpart::{Communicator, Dot, DotId, Rcb, RcbConfig, SoloComm, SplitStrategy};

const SIZES: [usize; 4] = [1000, 10_000, 100_000, 1_000_000];
const DOTS_PER_RANK: usize = 100_000;

fn random_dots(rank: usize, n: usize) -> Vec<Dot> {
    let mut rng = ChaCha8Rng::seed_from_u64(rank as u64);
    (0..n)
        .map(|i| {
            let coords = [rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)];
            Dot::new(DotId::new((rank * n + i) as u64, i as u64), coords)
        })
        .collect()
}

fn benchmark_serial(c: &mut Criterion) {
    let mut group = c.benchmark_group("serial");
    group.sample_size(10);

    for &size in &SIZES {
        let dots = random_dots(0, size);
        group.bench_with_input(BenchmarkId::new("64_parts", size), &size, |b, _| {
            let mut rcb = Rcb::new(RcbConfig::default().with_num_parts(64).with_return_lists(false));
            b.iter(|| rcb.partition(&SoloComm, dots.clone(), None).unwrap())
        });
    }
    group.finish();
}

fn benchmark_ranks(c: &mut Criterion) {
    let mut group = c.benchmark_group(format!("ranks_{}k_each", DOTS_PER_RANK / 1000));
    group.sample_size(10);

    let max_cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(8);
    let mut ranks = 1;
    while ranks <= max_cores {
        for (name, split) in [("duplicate", SplitStrategy::Duplicate), ("track_max", SplitStrategy::TrackMax)] {
            let config = RcbConfig::default()
                .with_num_parts(2 * ranks + 1)
                .with_split(split)
                .with_return_lists(false);
            group.bench_with_input(BenchmarkId::new(name, ranks), &ranks, |b, &n| {
                b.iter(|| {
                    threads::run(n, |comm| {
                        let dots = random_dots(comm.rank(), DOTS_PER_RANK);
                        Rcb::new(config.clone()).partition(&comm, dots, None).map(|o| o.dots.len())
                    })
                    .unwrap()
                })
            });
        }
        ranks *= 2;
    }
    group.finish();
}

fn benchmark_repartition(c: &mut Criterion) {
    let mut group = c.benchmark_group("repartition");
    group.sample_size(10);

    let dots = random_dots(0, 100_000);
    for reuse in [false, true] {
        group.bench_with_input(BenchmarkId::new("reuse_cuts", reuse), &reuse, |b, &reuse| {
            let config = RcbConfig::default().with_num_parts(32).with_keep_cuts(true).with_reuse_cuts(reuse);
            let mut rcb = Rcb::new(config);
            let first = rcb.partition(&SoloComm, dots.clone(), None).unwrap();
            b.iter(|| rcb.partition(&SoloComm, first.dots.clone(), None).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_serial, benchmark_ranks, benchmark_repartition);
criterion_main!(benches);
