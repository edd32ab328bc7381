//! Partitions random dots over MPI ranks and checks the result.
//!
//! Run with e.g. `mpirun -n 4 cargo run --release --features mpi-support --example mpi_partition`.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rcbpart::{CheckLevel, Communicator, Dot, DotId, MpiComm, Rcb, RcbConfig, SplitStrategy};

pub fn main() {
    env_logger::init();

    let universe = mpi::initialize().unwrap();
    let comm = MpiComm::new(universe.world());
    let mut rng = ChaCha8Rng::seed_from_u64(comm.rank() as u64);

    let npoints = 10000;
    let dots: Vec<Dot> = (0..npoints)
        .map(|i| {
            let coords = [rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)];
            Dot::new(DotId::new((comm.rank() * npoints + i) as u64, i as u64), coords)
        })
        .collect();

    let num_parts = 2 * comm.size() + 1;
    let config = RcbConfig::default()
        .with_num_parts(num_parts)
        .with_keep_cuts(true)
        .with_split(SplitStrategy::TrackMax)
        .with_check_geom(CheckLevel::Fatal)
        .with_output_level(1);
    let mut rcb = Rcb::new(config);
    let out = rcb.partition(&comm, dots, None).unwrap();

    for dot in &out.dots {
        assert_eq!(rcb.point_assign(&dot.coords).unwrap(), dot.part);
    }
    let held = comm.all_gather(out.dots.len()).unwrap();
    assert_eq!(held.iter().sum::<usize>(), npoints * comm.size());

    if comm.rank() == 0 {
        println!("{} dots in {} partitions, held per rank {:?}", npoints * comm.size(), num_parts, held);
    }
}
