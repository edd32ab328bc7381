use bytemuck::Pod;

use crate::error::{RcbError, Result, Status};

#[cfg(feature = "mpi-support")]
pub mod mpi;
pub mod solo;
pub mod threads;

/// Plain data that every communicator can carry.
///
/// Values travel as raw bytes between MPI processes and are shared by reference
/// between threads, so they must be [`Pod`] and thread safe.
pub trait Wire: Pod + Send + Sync {}

impl<T: Pod + Send + Sync> Wire for T {}

/// A group of cooperating processes exchanging data through blocking collectives.
///
/// Every collective must be entered by all members of the communicator, in the same
/// order. A member never proceeds past a collective until the whole group reached it.
///
/// Implemented over MPI (`mpi::MpiComm`, feature `mpi-support`), over threads of one
/// process ([`threads::ThreadComm`]) and for a single member ([`solo::SoloComm`]).
pub trait Communicator: Clone + Sized {
    /// Rank of this member, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of members.
    fn size(&self) -> usize;

    /// Gathers a slice of any length from every member, ordered by rank.
    fn all_gather_varcount<T: Wire>(&self, local: &[T]) -> Result<Vec<Vec<T>>>;

    /// Personalized exchange: `outgoing[r]` is delivered to rank `r`.
    ///
    /// Returns the lists received from every rank, ordered by source rank.
    fn all_to_all<T: Wire>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>>;

    /// Splits into disjoint communicators, one per distinct `color`.
    ///
    /// Members of a child are ranked by `(key, parent rank)`.
    fn split(&self, color: usize, key: usize) -> Result<Self>;

    /// A new communicator with the same members, independent of this one.
    fn duplicate(&self) -> Result<Self> {
        self.split(0, self.rank())
    }

    /// Gathers one value from every member, ordered by rank.
    fn all_gather<T: Wire>(&self, value: T) -> Result<Vec<T>> {
        self.all_gather_varcount(std::slice::from_ref(&value))?
            .into_iter()
            .map(|values| match values.as_slice() {
                [one] => Ok(*one),
                _ => Err(RcbError::Communication(format!("expected 1 gathered value, got {}", values.len()))),
            })
            .collect()
    }

    /// Reduces one value per member with `op`.
    ///
    /// Values are folded in rank order on every member, so all members obtain
    /// bitwise identical results even for non-associative floating point operators.
    fn all_reduce<T, F>(&self, value: T, op: F) -> Result<T>
    where
        T: Wire,
        F: Fn(&T, &T) -> T,
    {
        fold_in_order(self.all_gather(value)?, op)
    }

    /// Element-wise reduction of equally long slices, folded in rank order.
    fn all_reduce_each<T, F>(&self, values: &[T], op: F) -> Result<Vec<T>>
    where
        T: Wire,
        F: Fn(&T, &T) -> T,
    {
        let all = self.all_gather_varcount(values)?;
        if let Some(other) = all.iter().find(|v| v.len() != values.len()) {
            return Err(RcbError::Communication(format!(
                "reduction over {} values met one over {}",
                values.len(),
                other.len()
            )));
        }
        fold_in_order(all, |a, b| a.iter().zip(b).map(|(x, y)| op(x, y)).collect())
    }

    /// Element-wise sum of equally sized slices.
    fn sum(&self, values: &[f64]) -> Result<Vec<f64>> {
        self.all_reduce_each(values, |a, b| a + b)
    }

    /// True on every member if `flag` is true on at least one member.
    fn any(&self, flag: bool) -> Result<bool> {
        Ok(self.all_reduce(u8::from(flag), |a, b| *a.max(b))? != 0)
    }

    /// True on every member if `flag` is true on all members.
    fn all(&self, flag: bool) -> Result<bool> {
        Ok(self.all_reduce(u8::from(flag), |a, b| *a.min(b))? != 0)
    }

    /// Agrees on the outcome of a local step.
    ///
    /// If any member failed, every member returns an error carrying the same
    /// [`Status`]: the most severe one reported. A member whose own error has that
    /// status returns it; every other member returns [`RcbError::PeerFailure`].
    fn agree<T>(&self, local: Result<T>) -> Result<T> {
        let mine = match &local {
            Ok(_) => Status::Ok,
            Err(e) => {
                log::error!("[rank {}] {}", self.rank(), e);
                e.status()
            }
        };
        let agreed = Status::from_code(self.all_reduce(mine.code(), |a, b| *a.max(b))?);
        match local {
            Ok(value) if agreed == Status::Ok => Ok(value),
            Err(e) if e.status() == agreed => Err(e),
            _ => Err(RcbError::PeerFailure(agreed)),
        }
    }
}

pub(crate) fn fold_in_order<T, F>(values: Vec<T>, op: F) -> Result<T>
where
    F: Fn(&T, &T) -> T,
{
    let mut iter = values.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| RcbError::Communication("reduction over an empty group".to_string()))?;
    Ok(iter.fold(first, |acc, v| op(&acc, &v)))
}
