use std::time::Instant;

use crate::bounds::BoundingBox;
use crate::comm::solo::SoloComm;
use crate::direction::DirectionSelector;
use crate::divide::{divide_parts, PartSizes, Subproblem};
use crate::dot::{Dot, Weighting};
use crate::error::Result;
use crate::group::ProcGroup;
use crate::median::{find_median, MedianInput, LOW, UNDECIDED};
use crate::stats::{Phase, RcbStats};
use crate::tree::{CutTree, ParentLink, Side};

/// Bisection of the partitions left to a single process, once its dots are local.
pub(crate) struct SerialRcb<'a> {
    pub sizes: &'a PartSizes,
    pub directions: &'a DirectionSelector<'a>,
    /// Tree of the previous run, whose cuts seed the median searches.
    pub guesses: Option<&'a CutTree>,
    pub weighting: Weighting,
    pub rectilinear: bool,
    pub max_iterations: usize,
    pub tree: &'a mut CutTree,
    pub stats: &'a mut RcbStats,
}

/// Where a recursion step starts from.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Cursor {
    pub sub: Subproblem,
    pub bbox: BoundingBox,
    /// Weight of the dots of `sub`, over all its processes.
    pub weight: f64,
    pub parent: ParentLink,
    pub level: usize,
}

impl SerialRcb<'_> {
    /// Assigns a partition of `cursor.sub` to every dot.
    pub fn run(&mut self, dots: &mut [Dot], cursor: Cursor) -> Result<()> {
        let mut index: Vec<usize> = Vec::new();
        index.try_reserve_exact(dots.len())?;
        index.extend(0..dots.len());
        self.bisect(dots, &mut index, cursor)
    }

    fn bisect(&mut self, dots: &mut [Dot], index: &mut [usize], cursor: Cursor) -> Result<()> {
        if cursor.sub.num_parts <= 1 {
            for &i in index.iter() {
                dots[i].part = cursor.sub.partlower;
            }
            return Ok(());
        }

        let start = Instant::now();
        let div = divide_parts(self.sizes, &cursor.sub);
        let dim = self.directions.select(div.partmid, cursor.level, &cursor.bbox);
        let coords: Vec<f64> = index.iter().map(|&i| dots[i].coords[dim]).collect();
        let weights: Vec<f64> = index.iter().map(|&i| self.weighting.of(&dots[i])).collect();
        let first_guess = self
            .guesses
            .and_then(|t| t.cut_at(div.partmid))
            .filter(|(d, _)| *d == dim)
            .map(|(_, cut)| cut);
        if first_guess.is_some() { self.stats.first_guesses += 1; }
        self.stats.add_time(Phase::PreMedian, start);

        let start = Instant::now();
        let input = MedianInput {
            coords: &coords,
            weights: &weights,
            total_weight: cursor.weight,
            fraction: div.fraction,
            range: (cursor.bbox.min[dim], cursor.bbox.max[dim]),
            first_guess,
            rectilinear: self.rectilinear,
            max_iterations: self.max_iterations,
        };
        let mut marks = vec![UNDECIDED; index.len()];
        let outcome = find_median(&ProcGroup::whole(SoloComm), &input, &mut marks)?;
        self.stats.median_iterations += outcome.iterations;
        self.stats.add_time(Phase::Median, start);

        log::debug!(
            "serial cut at slot {}: dim {} value {} parts {}..{} (low {} high {})",
            div.partmid, dim, outcome.cut, div.low.partlower, div.high.partlower + div.high.num_parts,
            outcome.weight_lo, outcome.weight_hi
        );
        self.tree.record(div.partmid, dim, outcome.cut, cursor.parent, cursor.sub.partlower);

        // Low dots first, both sides in their current order.
        let mut reordered = Vec::with_capacity(index.len());
        reordered.extend(index.iter().zip(&marks).filter(|(_, m)| **m == LOW).map(|(i, _)| *i));
        let num_low = reordered.len();
        reordered.extend(index.iter().zip(&marks).filter(|(_, m)| **m != LOW).map(|(i, _)| *i));
        index.copy_from_slice(&reordered);
        let (low, high) = index.split_at_mut(num_low);

        let low_cursor = Cursor {
            sub: div.low,
            bbox: cursor.bbox.shrunk(dim, outcome.cut, false),
            weight: outcome.weight_lo,
            parent: ParentLink { node: div.partmid, side: Side::Low },
            level: cursor.level + 1,
        };
        let high_cursor = Cursor {
            sub: div.high,
            bbox: cursor.bbox.shrunk(dim, outcome.cut, true),
            weight: outcome.weight_hi,
            parent: ParentLink { node: div.partmid, side: Side::High },
            level: cursor.level + 1,
        };
        if low_cursor.sub.num_parts > 0 {
            self.bisect(dots, low, low_cursor)?;
        }
        if high_cursor.sub.num_parts > 0 {
            self.bisect(dots, high, high_cursor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::DotId;

    fn line(n: usize) -> Vec<Dot> {
        (0..n)
            .map(|i| Dot::new(DotId::new(i as u64, i as u64), [i as f64, 0.0, 0.0]))
            .collect()
    }

    fn run_serial(dots: &mut [Dot], num_parts: usize, sizes: &PartSizes) -> CutTree {
        let directions = DirectionSelector::new(None, None);
        let mut tree = CutTree::new(num_parts);
        let mut stats = RcbStats::new(dots.len());
        let bbox = BoundingBox::from_dots(dots);
        let cursor = Cursor {
            sub: Subproblem { proclower: 0, num_procs: 1, partlower: 0, num_parts },
            bbox,
            weight: dots.len() as f64,
            parent: ParentLink::ROOT,
            level: 0,
        };
        let mut serial = SerialRcb {
            sizes,
            directions: &directions,
            guesses: None,
            weighting: Weighting::Unit,
            rectilinear: false,
            max_iterations: 1000,
            tree: &mut tree,
            stats: &mut stats,
        };
        serial.run(dots, cursor).unwrap();
        CutTree::assemble(num_parts, tree.recorded())
    }

    #[test]
    fn test_two_parts_on_a_line() {
        let mut dots = line(8);
        let tree = run_serial(&mut dots, 2, &PartSizes::uniform(2));
        let parts: Vec<usize> = dots.iter().map(|d| d.part).collect();
        assert_eq!(parts, vec![0, 0, 0, 0, 1, 1, 1, 1]);
        assert_eq!(tree.cut_at(1), Some((0, 3.5)));
    }

    #[test]
    fn test_uneven_sizes() {
        let mut dots = line(8);
        let sizes = PartSizes::from_table(&[0.25, 0.75], 2, 1).unwrap();
        run_serial(&mut dots, 2, &sizes);
        assert_eq!(dots.iter().filter(|d| d.part == 0).count(), 2);
        assert_eq!(dots.iter().filter(|d| d.part == 1).count(), 6);
    }

    #[test]
    fn test_five_parts_build_a_full_tree() {
        let mut dots = line(50);
        let tree = run_serial(&mut dots, 5, &PartSizes::uniform(5));
        assert!(tree.is_consistent());
        for part in 0..5 {
            assert_eq!(dots.iter().filter(|d| d.part == part).count(), 10, "part {}", part);
        }
        for dot in &dots {
            assert_eq!(tree.point_assign(&dot.coords), Some(dot.part));
        }
    }

    #[test]
    fn test_more_parts_than_dots() {
        let mut dots = line(2);
        let tree = run_serial(&mut dots, 4, &PartSizes::uniform(4));
        assert!(tree.is_consistent());
        assert_eq!(tree.leaves(), vec![0, 1, 2, 3]);
    }
}
