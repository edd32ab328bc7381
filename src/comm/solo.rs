use crate::comm::{Communicator, Wire};
use crate::error::{RcbError, Result};

/// A communicator with a single member. Collectives return immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoloComm;

impl Communicator for SoloComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather_varcount<T: Wire>(&self, local: &[T]) -> Result<Vec<Vec<T>>> {
        Ok(vec![local.to_vec()])
    }

    fn all_to_all<T: Wire>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>> {
        if outgoing.len() != 1 {
            return Err(RcbError::Communication(format!(
                "expected 1 outgoing list, got {}",
                outgoing.len()
            )));
        }
        Ok(outgoing)
    }

    fn split(&self, _color: usize, _key: usize) -> Result<Self> {
        Ok(SoloComm)
    }
}
