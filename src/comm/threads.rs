//! In-process communicator: every rank is a thread of a dedicated rayon pool.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use crate::comm::{Communicator, Wire};
use crate::error::{RcbError, Result};

type Shared = Arc<dyn Any + Send + Sync>;

/// First rank of a world to panic, with its message. Shared by every rendezvous
/// split off that world.
type Failure = Arc<OnceLock<(usize, String)>>;

/// How often a blocked rank looks for a failed peer.
const POLL: Duration = Duration::from_millis(20);

/// One collective round: every member deposits a payload, then reads all of them.
struct Round {
    slots: Vec<Option<Shared>>,
    arrived: usize,
    readers: usize,
    draining: bool,
    generation: u64,
}

/// Meeting point shared by all members of one communicator.
struct Rendezvous {
    size: usize,
    round: Mutex<Round>,
    turnstile: Condvar,
    failure: Failure,
}

fn poisoned<T>(_: PoisonError<T>) -> RcbError {
    RcbError::Communication("a peer rank panicked during a collective".to_string())
}

impl Rendezvous {
    fn new(size: usize, failure: Failure) -> Self {
        Self {
            size,
            round: Mutex::new(Round {
                slots: vec![None; size],
                arrived: 0,
                readers: 0,
                draining: false,
                generation: 0,
            }),
            turnstile: Condvar::new(),
            failure,
        }
    }

    fn check_peers(&self) -> Result<()> {
        match self.failure.get() {
            Some((rank, _)) => Err(RcbError::Communication(format!("rank {} panicked", rank))),
            None => Ok(()),
        }
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Round>) -> Result<MutexGuard<'a, Round>> {
        let (guard, _) = self.turnstile.wait_timeout(guard, POLL).map_err(poisoned)?;
        self.check_peers()?;
        Ok(guard)
    }

    /// Deposits `value` for `rank` and returns the payloads of every rank.
    fn exchange(&self, rank: usize, value: Shared) -> Result<Vec<Shared>> {
        self.check_peers()?;
        let mut round = self.round.lock().map_err(poisoned)?;
        // Previous round still being read.
        while round.draining {
            round = self.wait(round)?;
        }

        round.slots[rank] = Some(value);
        round.arrived += 1;
        let generation = round.generation;
        if round.arrived == self.size {
            round.draining = true;
            round.readers = self.size;
            self.turnstile.notify_all();
        } else {
            while !(round.draining && round.generation == generation) {
                round = self.wait(round)?;
            }
        }

        let payloads: Vec<Shared> = round.slots.iter().flatten().cloned().collect();
        round.readers -= 1;
        if round.readers == 0 {
            round.slots.iter_mut().for_each(|s| *s = None);
            round.arrived = 0;
            round.draining = false;
            round.generation += 1;
            self.turnstile.notify_all();
        }
        Ok(payloads)
    }
}

/// Communicator between threads of one process.
///
/// Created by [`run`]; split and duplicate produce new independent rendezvous points.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    rendezvous: Arc<Rendezvous>,
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.rendezvous.size)
            .finish()
    }
}

impl ThreadComm {
    /// Shares `value` with every rank and returns all of them, ordered by rank.
    fn gather_shared<T: Send + Sync + 'static>(&self, value: T) -> Result<Vec<Arc<T>>> {
        self.rendezvous
            .exchange(self.rank, Arc::new(value))?
            .into_iter()
            .map(|p| {
                p.downcast::<T>()
                    .map_err(|_| RcbError::Communication("ranks entered different collectives".to_string()))
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.rendezvous.size
    }

    fn all_gather_varcount<T: Wire>(&self, local: &[T]) -> Result<Vec<Vec<T>>> {
        let all = self.gather_shared(local.to_vec())?;
        Ok(all.iter().map(|values| values.as_ref().clone()).collect())
    }

    fn all_to_all<T: Wire>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>> {
        if outgoing.len() != self.size() {
            return Err(RcbError::Communication(format!(
                "expected {} outgoing lists, got {}",
                self.size(),
                outgoing.len()
            )));
        }
        let all = self.gather_shared(outgoing)?;
        Ok(all.iter().map(|lists| lists[self.rank].clone()).collect())
    }

    fn split(&self, color: usize, key: usize) -> Result<Self> {
        let entries = self.gather_shared((color, key, self.rank))?;
        let mut members: Vec<(usize, usize)> = entries
            .iter()
            .filter(|e| e.0 == color)
            .map(|e| (e.1, e.2))
            .collect();
        members.sort_unstable();
        let rank = members
            .iter()
            .position(|m| m.1 == self.rank)
            .ok_or_else(|| RcbError::Communication("rank missing from its own split".to_string()))?;

        // The first member of each color creates the child's rendezvous.
        let offer = (rank == 0).then(|| {
            let failure = Arc::clone(&self.rendezvous.failure);
            (color, Arc::new(Rendezvous::new(members.len(), failure)))
        });
        let offers = self.gather_shared(offer)?;
        let rendezvous = offers
            .iter()
            .find_map(|offer| match offer.as_ref() {
                Some((c, r)) if *c == color => Some(Arc::clone(r)),
                _ => None,
            })
            .ok_or_else(|| RcbError::Communication("no rendezvous for split color".to_string()))?;
        Ok(ThreadComm { rank, rendezvous })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `f` on `nprocs` ranks in parallel and returns their results by rank.
///
/// Each rank gets its own thread of a fresh rayon pool, so blocking collectives
/// never starve each other. If a rank panics, collectives on every other rank of
/// the world fail with [`RcbError::Communication`] instead of blocking, and the
/// call returns that error naming the first rank to panic.
pub fn run<F, R>(nprocs: usize, f: F) -> Result<Vec<R>>
where
    F: Fn(ThreadComm) -> R + Sync,
    R: Send,
{
    if nprocs == 0 {
        return Err(RcbError::InvalidInput("at least one rank is required".to_string()));
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(nprocs)
        .thread_name(|i| format!("rank-{}", i))
        .build()
        .map_err(|e| RcbError::Communication(e.to_string()))?;
    let failure: Failure = Arc::default();
    let world = Arc::new(Rendezvous::new(nprocs, Arc::clone(&failure)));
    let outcomes = pool.broadcast(|ctx| {
        let comm = ThreadComm {
            rank: ctx.index(),
            rendezvous: Arc::clone(&world),
        };
        panic::catch_unwind(AssertUnwindSafe(|| f(comm))).map_err(|payload| {
            let message = panic_message(payload.as_ref());
            if failure.set((ctx.index(), message.clone())).is_ok() {
                log::error!("[rank {}] panicked: {}", ctx.index(), message);
            }
        })
    });

    if let Some((rank, message)) = failure.get() {
        return Err(RcbError::Communication(format!("rank {} panicked: {}", rank, message)));
    }
    outcomes
        .into_iter()
        .map(|o| o.map_err(|_| RcbError::Communication("a rank panicked".to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_gather_orders_by_rank() {
        let results = run(4, |comm| comm.all_gather(comm.rank() * 10).unwrap()).unwrap();
        for gathered in results {
            assert_eq!(gathered, vec![0, 10, 20, 30]);
        }
    }

    #[test]
    fn test_consecutive_collectives_do_not_mix() {
        let results = run(3, |comm| {
            let mut sums = Vec::new();
            for round in 0..50 {
                sums.push(comm.all_reduce(comm.rank() + round, |a, b| a + b).unwrap());
            }
            sums
        })
        .unwrap();
        for sums in results {
            for (round, s) in sums.iter().enumerate() {
                assert_eq!(*s, 3 + 3 * round);
            }
        }
    }

    #[test]
    fn test_all_to_all_delivers_personalized_lists() {
        let results = run(3, |comm| {
            let outgoing: Vec<Vec<usize>> = (0..3).map(|to| vec![comm.rank() * 100 + to]).collect();
            comm.all_to_all(outgoing).unwrap()
        })
        .unwrap();
        for (rank, received) in results.iter().enumerate() {
            let expected: Vec<Vec<usize>> = (0..3).map(|from| vec![from * 100 + rank]).collect();
            assert_eq!(received, &expected);
        }
    }

    #[test]
    fn test_split_by_color() {
        let results = run(5, |comm| {
            let color = comm.rank() % 2;
            let child = comm.split(color, comm.rank()).unwrap();
            let members = child.all_gather(comm.rank()).unwrap();
            (child.rank(), child.size(), members)
        })
        .unwrap();
        assert_eq!(results[0], (0, 3, vec![0, 2, 4]));
        assert_eq!(results[1], (0, 2, vec![1, 3]));
        assert_eq!(results[2], (1, 3, vec![0, 2, 4]));
        assert_eq!(results[3], (1, 2, vec![1, 3]));
        assert_eq!(results[4], (2, 3, vec![0, 2, 4]));
    }

    #[test]
    fn test_agree_reports_peer_failure() {
        let results = run(3, |comm| {
            let local = if comm.rank() == 1 {
                Err(RcbError::OutOfMemory)
            } else {
                Ok(comm.rank())
            };
            comm.agree(local)
        })
        .unwrap();
        assert!(matches!(results[0], Err(RcbError::PeerFailure(crate::Status::OutOfMemory))));
        assert!(matches!(results[1], Err(RcbError::OutOfMemory)));
        assert!(matches!(results[2], Err(RcbError::PeerFailure(crate::Status::OutOfMemory))));
    }

    #[test]
    fn test_panicking_rank_releases_its_peers() {
        let result = run(3, |comm| {
            if comm.rank() == 1 {
                panic!("rank 1 gives up");
            }
            comm.all_gather(comm.rank()).is_ok()
        });
        match result {
            Err(RcbError::Communication(msg)) => assert!(msg.contains("rank 1 gives up"), "{}", msg),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_panic_reaches_ranks_of_split_communicators() {
        let result = run(4, |comm| {
            let child = comm.split(comm.rank() % 2, comm.rank()).unwrap();
            if comm.rank() == 3 {
                panic!("rank 3 gives up");
            }
            child.all_gather(comm.rank()).map(|all| all.len())
        });
        assert!(matches!(result, Err(RcbError::Communication(_))));
    }

    #[test]
    fn test_varcount_gather_keeps_lengths() {
        let results = run(3, |comm| {
            let local: Vec<u32> = (0..comm.rank() as u32).collect();
            comm.all_gather_varcount(&local).unwrap()
        })
        .unwrap();
        for gathered in results {
            assert_eq!(gathered, vec![vec![], vec![0], vec![0, 1]]);
        }
    }

    #[test]
    fn test_zero_ranks_rejected() {
        assert!(run(0, |comm| comm.rank()).is_err());
    }
}
