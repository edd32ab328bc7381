use std::ops::Range;

use crate::error::{RcbError, Result};
use crate::tree::Side;

/// Static mapping of partitions onto processes.
///
/// Partition `i` of `N` is owned by process `floor(i * P / N)`, so each process owns a
/// contiguous, possibly empty, range of partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartLayout {
    num_parts: usize,
    num_procs: usize,
}

impl PartLayout {
    pub fn new(num_parts: usize, num_procs: usize) -> Self {
        Self { num_parts, num_procs }
    }

    pub fn num_parts(&self) -> usize {
        self.num_parts
    }

    pub fn num_procs(&self) -> usize {
        self.num_procs
    }

    pub fn owner(&self, part: usize) -> usize {
        part * self.num_procs / self.num_parts
    }

    /// First partition owned by `proc`, or the first one owned by a later process.
    pub fn first_part(&self, proc: usize) -> usize {
        (proc * self.num_parts).div_ceil(self.num_procs)
    }

    pub fn parts_of(&self, proc: usize) -> Range<usize> {
        self.first_part(proc)..self.first_part(proc + 1)
    }
}

/// Relative target sizes of the partitions.
#[derive(Clone, Debug, PartialEq)]
pub struct PartSizes {
    sizes: Vec<f64>,
}

impl PartSizes {
    pub fn uniform(num_parts: usize) -> Self {
        Self { sizes: vec![1.0; num_parts] }
    }

    /// Reads a table holding one size per partition, or `wdim` sizes per partition
    /// (row-major), in which case the first column is used.
    pub fn from_table(table: &[f64], num_parts: usize, wdim: usize) -> Result<Self> {
        let sizes: Vec<f64> = if table.len() == num_parts {
            table.to_vec()
        } else if wdim > 1 && table.len() == num_parts * wdim {
            table.iter().step_by(wdim).copied().collect()
        } else {
            return Err(RcbError::InvalidInput(format!(
                "{} partition sizes given for {} partitions",
                table.len(),
                num_parts
            )));
        };
        if let Some(bad) = sizes.iter().find(|s| !s.is_finite() || **s < 0.0) {
            return Err(RcbError::InvalidInput(format!("invalid partition size {}", bad)));
        }
        if !(sizes.iter().sum::<f64>() > 0.0) {
            return Err(RcbError::InvalidInput("partition sizes sum to zero".to_string()));
        }
        Ok(Self { sizes })
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn size(&self, part: usize) -> f64 {
        self.sizes[part]
    }

    pub fn sum(&self, parts: Range<usize>) -> f64 {
        self.sizes[parts].iter().sum()
    }

    /// Share of `all` that `low` should receive. Falls back to the partition count
    /// ratio when the sizes in `all` sum to zero.
    fn fraction(&self, low: Range<usize>, all: Range<usize>) -> f64 {
        let total = self.sum(all.clone());
        if total > 0.0 {
            self.sum(low) / total
        } else {
            low.len() as f64 / all.len().max(1) as f64
        }
    }
}

/// A group of consecutive processes working on a range of partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subproblem {
    pub proclower: usize,
    pub num_procs: usize,
    pub partlower: usize,
    pub num_parts: usize,
}

impl Subproblem {
    pub fn parts(&self) -> Range<usize> {
        self.partlower..self.partlower + self.num_parts
    }
}

/// Result of dividing a subproblem in two.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Division {
    /// Side of the calling process; always `Low` for a serial division.
    pub side: Side,
    /// First process of the high half.
    pub procmid: usize,
    /// First partition of the high half.
    pub partmid: usize,
    /// Share of the weight targeted at the low half.
    pub fraction: f64,
    pub low: Subproblem,
    pub high: Subproblem,
}

impl Division {
    /// Only cuts with partitions on both sides appear in the cut tree.
    pub fn splits_parts(&self) -> bool {
        self.low.num_parts > 0 && self.high.num_parts > 0
    }

    pub fn mine(&self) -> Subproblem {
        match self.side {
            Side::Low => self.low,
            Side::High => self.high,
        }
    }
}

/// Halves the processes of `sub`; partitions follow the processes that own them.
///
/// `sub.num_procs` must be at least 2.
pub fn divide_machine(layout: &PartLayout, sizes: &PartSizes, sub: &Subproblem, proc: usize) -> Division {
    let procmid = sub.proclower + sub.num_procs / 2;
    let partmid = layout
        .first_part(procmid)
        .clamp(sub.partlower, sub.partlower + sub.num_parts);
    let side = if proc < procmid { Side::Low } else { Side::High };
    let low = Subproblem {
        proclower: sub.proclower,
        num_procs: procmid - sub.proclower,
        partlower: sub.partlower,
        num_parts: partmid - sub.partlower,
    };
    let high = Subproblem {
        proclower: procmid,
        num_procs: sub.proclower + sub.num_procs - procmid,
        partlower: partmid,
        num_parts: sub.partlower + sub.num_parts - partmid,
    };
    Division {
        side,
        procmid,
        partmid,
        fraction: sizes.fraction(low.parts(), sub.parts()),
        low,
        high,
    }
}

/// Halves the partitions of a single-process subproblem.
///
/// `sub.num_parts` must be at least 2.
pub fn divide_parts(sizes: &PartSizes, sub: &Subproblem) -> Division {
    let partmid = sub.partlower + sub.num_parts / 2;
    let low = Subproblem { num_parts: partmid - sub.partlower, ..*sub };
    let high = Subproblem {
        partlower: partmid,
        num_parts: sub.partlower + sub.num_parts - partmid,
        ..*sub
    };
    Division {
        side: Side::Low,
        procmid: sub.proclower,
        partmid,
        fraction: sizes.fraction(low.parts(), sub.parts()),
        low,
        high,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_owner_matches_ranges() {
        for (n, p) in [(1, 1), (4, 4), (3, 2), (2, 8), (7, 3), (10, 4)] {
            let layout = PartLayout::new(n, p);
            let mut covered = 0;
            for proc in 0..p {
                for part in layout.parts_of(proc) {
                    assert_eq!(layout.owner(part), proc, "N={} P={} part {}", n, p, part);
                    covered += 1;
                }
            }
            assert_eq!(covered, n);
        }
    }

    #[test]
    fn test_divide_machine_fewer_parts_than_procs() {
        let layout = PartLayout::new(2, 8);
        let sizes = PartSizes::uniform(2);
        let sub = Subproblem { proclower: 0, num_procs: 8, partlower: 0, num_parts: 2 };
        let div = divide_machine(&layout, &sizes, &sub, 5);
        assert_eq!(div.procmid, 4);
        assert_eq!(div.partmid, 1);
        assert_eq!(div.side, Side::High);
        assert!((div.fraction - 0.5).abs() < 1e-12);
        assert_eq!(div.mine(), Subproblem { proclower: 4, num_procs: 4, partlower: 1, num_parts: 1 });
    }

    #[test]
    fn test_divide_machine_uneven_parts() {
        let layout = PartLayout::new(3, 2);
        let sizes = PartSizes::uniform(3);
        let sub = Subproblem { proclower: 0, num_procs: 2, partlower: 0, num_parts: 3 };
        let div = divide_machine(&layout, &sizes, &sub, 0);
        assert_eq!(div.partmid, 2);
        assert_eq!(div.low.num_parts, 2);
        assert_eq!(div.high.num_parts, 1);
        assert!((div.fraction - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_divide_parts_uses_sizes() {
        let sizes = PartSizes::from_table(&[0.25, 0.75], 2, 1).unwrap();
        let sub = Subproblem { proclower: 0, num_procs: 1, partlower: 0, num_parts: 2 };
        let div = divide_parts(&sizes, &sub);
        assert_eq!(div.partmid, 1);
        assert!(div.splits_parts());
        assert!((div.fraction - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_sizes_table_with_weight_columns() {
        let sizes = PartSizes::from_table(&[1.0, 9.0, 3.0, 9.0], 2, 2).unwrap();
        assert_eq!(sizes.size(0), 1.0);
        assert_eq!(sizes.size(1), 3.0);
        assert!(PartSizes::from_table(&[1.0, 2.0, 3.0], 2, 1).is_err());
        assert!(PartSizes::from_table(&[-1.0, 2.0], 2, 1).is_err());
        assert!(PartSizes::from_table(&[0.0, 0.0], 2, 1).is_err());
    }
}
