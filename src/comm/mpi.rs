//! Communicator over MPI, one rank per process.
//!
//! Values are sent as their raw bytes: every collective first exchanges byte counts,
//! then the bytes themselves through the variable count collectives.

use std::mem::size_of;
use std::sync::Arc;

use ::mpi::datatype::{Partition, PartitionMut};
use ::mpi::topology::{Color, SimpleCommunicator};
use ::mpi::traits::{Communicator as MpiCommunicator, CommunicatorCollectives};
use ::mpi::Count;

use crate::comm::{Communicator, Wire};
use crate::error::{RcbError, Result};

/// Communicator backed by an MPI communicator.
///
/// ```no_run
/// use rcbpart::{MpiComm, Rcb, RcbConfig};
///
/// let universe = mpi::initialize().unwrap();
/// let comm = MpiComm::new(universe.world());
/// let out = Rcb::new(RcbConfig::default()).partition(&comm, Vec::new(), None);
/// ```
#[derive(Clone)]
pub struct MpiComm {
    comm: Arc<SimpleCommunicator>,
    rank: usize,
    size: usize,
}

impl MpiComm {
    pub fn new(comm: SimpleCommunicator) -> Self {
        let rank = comm.rank() as usize;
        let size = comm.size() as usize;
        Self { comm: Arc::new(comm), rank, size }
    }
}

impl std::fmt::Debug for MpiComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpiComm").field("rank", &self.rank).field("size", &self.size).finish()
    }
}

fn to_count(n: usize) -> Result<Count> {
    Count::try_from(n).map_err(|_| RcbError::Communication(format!("{} exceeds an MPI count", n)))
}

/// Offsets of consecutive blocks of the given sizes.
fn displacements(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0, |acc, &c| {
            let offset = *acc;
            *acc += c;
            Some(offset)
        })
        .collect()
}

/// Cuts received bytes into one list per source rank.
fn decode<T: Wire>(bytes: &[u8], counts: &[Count]) -> Result<Vec<Vec<T>>> {
    let width = size_of::<T>();
    let mut offset = 0;
    let mut lists = Vec::with_capacity(counts.len());
    for &count in counts {
        let len = count as usize;
        if len % width != 0 || offset + len > bytes.len() {
            return Err(RcbError::Communication(format!(
                "received {} bytes, not a whole number of {}-byte values",
                len, width
            )));
        }
        let block = &bytes[offset..offset + len];
        lists.push(block.chunks_exact(width).map(bytemuck::pod_read_unaligned).collect());
        offset += len;
    }
    Ok(lists)
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather_varcount<T: Wire>(&self, local: &[T]) -> Result<Vec<Vec<T>>> {
        let bytes: &[u8] = bytemuck::cast_slice(local);
        let mine = to_count(bytes.len())?;
        let mut counts = vec![0 as Count; self.size];
        self.comm.all_gather_into(&mine, &mut counts[..]);

        let displs = displacements(&counts);
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        let mut received = vec![0u8; total];
        {
            let mut partition = PartitionMut::new(&mut received[..], &counts[..], &displs[..]);
            self.comm.all_gather_varcount_into(bytes, &mut partition);
        }
        decode(&received, &counts)
    }

    fn all_to_all<T: Wire>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>> {
        if outgoing.len() != self.size {
            return Err(RcbError::Communication(format!(
                "expected {} outgoing lists, got {}",
                self.size,
                outgoing.len()
            )));
        }
        let mut send = Vec::new();
        let mut send_counts = Vec::with_capacity(self.size);
        for list in &outgoing {
            let bytes: &[u8] = bytemuck::cast_slice(list);
            send_counts.push(to_count(bytes.len())?);
            send.extend_from_slice(bytes);
        }
        let mut recv_counts = vec![0 as Count; self.size];
        self.comm.all_to_all_into(&send_counts[..], &mut recv_counts[..]);

        let send_displs = displacements(&send_counts);
        let recv_displs = displacements(&recv_counts);
        let total: usize = recv_counts.iter().map(|&c| c as usize).sum();
        let mut received = vec![0u8; total];
        {
            let partition = Partition::new(&send[..], &send_counts[..], &send_displs[..]);
            let mut incoming = PartitionMut::new(&mut received[..], &recv_counts[..], &recv_displs[..]);
            self.comm.all_to_all_varcount_into(&partition, &mut incoming);
        }
        decode(&received, &recv_counts)
    }

    fn split(&self, color: usize, key: usize) -> Result<Self> {
        let color = Color::with_value(to_count(color)?);
        self.comm
            .split_by_color_with_key(color, to_count(key)?)
            .map(MpiComm::new)
            .ok_or_else(|| RcbError::Communication("MPI split returned no communicator".to_string()))
    }

    fn duplicate(&self) -> Result<Self> {
        Ok(MpiComm::new(self.comm.duplicate()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dot, DotId, Rcb, RcbConfig};

    #[test]
    fn test_displacements() {
        assert_eq!(displacements(&[3, 0, 5, 2]), vec![0, 3, 3, 8]);
        assert!(displacements(&[]).is_empty());
    }

    #[test]
    fn test_decode_splits_by_source() {
        let values = [1.5f64, 2.5, 3.5];
        let bytes: &[u8] = bytemuck::cast_slice(&values);
        let lists: Vec<Vec<f64>> = decode(bytes, &[8, 0, 16]).unwrap();
        assert_eq!(lists, vec![vec![1.5], vec![], vec![2.5, 3.5]]);
        assert!(decode::<f64>(bytes, &[12, 12]).is_err());
    }

    // MPI can be initialized once per process, so every collective is checked here.
    #[test]
    fn test_collectives_on_the_world() {
        let Some(universe) = ::mpi::initialize() else { return };
        let comm = MpiComm::new(universe.world());
        let (rank, size) = (comm.rank(), comm.size());

        let gathered = comm.all_gather(rank * 10).unwrap();
        assert_eq!(gathered, (0..size).map(|r| r * 10).collect::<Vec<_>>());
        let lists = comm.all_gather_varcount(&vec![rank as u32; rank]).unwrap();
        assert!(lists.iter().enumerate().all(|(r, l)| l.len() == r));
        assert_eq!(comm.sum(&[1.0, rank as f64]).unwrap()[0], size as f64);

        let outgoing: Vec<Vec<usize>> = (0..size).map(|to| vec![rank * 100 + to]).collect();
        let received = comm.all_to_all(outgoing).unwrap();
        assert_eq!(received, (0..size).map(|from| vec![from * 100 + rank]).collect::<Vec<_>>());

        let child = comm.split(rank % 2, rank).unwrap();
        assert_eq!(child.rank(), rank / 2);
        assert_eq!(comm.duplicate().unwrap().size(), size);

        let dots: Vec<Dot> = (0..50)
            .map(|i| Dot::new(DotId::new((rank * 50 + i) as u64, i as u64), [i as f64, rank as f64, 0.0]))
            .collect();
        let config = RcbConfig::default().with_num_parts(2 * size).with_keep_cuts(true);
        let out = Rcb::new(config).partition(&comm, dots, None).unwrap();
        let total = comm.all_reduce(out.dots.len(), |a, b| a + b).unwrap();
        assert_eq!(total, 50 * size);
    }
}
