use crate::comm::{fold_in_order, Communicator, Wire};
use crate::config::SplitStrategy;
use crate::error::{RcbError, Result};
use crate::tree::Side;

/// The set of processes cooperating on one subproblem of the parallel bisection.
///
/// A group is a contiguous range of ranks `lower..lower + size` of its communicator.
/// With [`SplitStrategy::Duplicate`] the communicator holds exactly the group. With
/// [`SplitStrategy::TrackMax`] the communicator stays the original one: every
/// collective is entered by all of its ranks and each group keeps its own slice.
#[derive(Clone, Debug)]
pub(crate) struct ProcGroup<C: Communicator> {
    comm: C,
    lower: usize,
    size: usize,
}

impl<C: Communicator> ProcGroup<C> {
    /// A group covering every rank of `comm`.
    pub fn whole(comm: C) -> Self {
        let size = comm.size();
        Self { comm, lower: 0, size }
    }

    /// Position of this process within the group.
    pub fn index(&self) -> usize {
        self.comm.rank() - self.lower
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn is_whole(&self) -> bool {
        self.lower == 0 && self.size == self.comm.size()
    }

    /// Gathers one value per group member, ordered by group index.
    pub fn all_gather<T: Wire>(&self, value: T) -> Result<Vec<T>> {
        let mut all = self.comm.all_gather(value)?;
        if !self.is_whole() {
            all.truncate(self.lower + self.size);
            all.drain(..self.lower);
        }
        Ok(all)
    }

    /// Reduction over the group members only, folded in group order.
    pub fn all_reduce<T, F>(&self, value: T, op: F) -> Result<T>
    where
        T: Wire,
        F: Fn(&T, &T) -> T,
    {
        fold_in_order(self.all_gather(value)?, op)
    }

    /// Personalized exchange within the group, lists indexed by group index.
    pub fn all_to_all<T: Wire>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>> {
        if self.is_whole() {
            return self.comm.all_to_all(outgoing);
        }
        if outgoing.len() != self.size {
            return Err(RcbError::Communication(format!(
                "expected {} outgoing lists, got {}",
                self.size,
                outgoing.len()
            )));
        }
        let mut wide: Vec<Vec<T>> = (0..self.comm.size()).map(|_| Vec::new()).collect();
        for (slot, list) in wide[self.lower..self.lower + self.size].iter_mut().zip(outgoing) {
            *slot = list;
        }
        let mut incoming = self.comm.all_to_all(wide)?;
        incoming.truncate(self.lower + self.size);
        incoming.drain(..self.lower);
        Ok(incoming)
    }

    /// Status agreement over the communicator.
    ///
    /// Under [`SplitStrategy::TrackMax`] this spans every rank, so a failing group
    /// stops all the others at the same collective.
    pub fn agree<T>(&self, local: Result<T>) -> Result<T> {
        self.comm.agree(local)
    }

    /// True on every rank of the communicator if any rank passes `true`.
    pub fn any_across(&self, flag: bool) -> Result<bool> {
        self.comm.any(flag)
    }

    /// The half of this group containing the calling process.
    ///
    /// `procmid` is the group index of the first process of the high half.
    pub fn descend(self, strategy: SplitStrategy, side: Side, procmid: usize) -> Result<Self> {
        match strategy {
            SplitStrategy::Duplicate => {
                let key = self.comm.rank();
                let child = self.comm.split(side.index(), key)?;
                Ok(ProcGroup::whole(child))
            }
            SplitStrategy::TrackMax => {
                let (lower, size) = match side {
                    Side::Low => (self.lower, procmid),
                    Side::High => (self.lower + procmid, self.size - procmid),
                };
                Ok(ProcGroup { comm: self.comm, lower, size })
            }
        }
    }
}
