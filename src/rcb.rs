use std::time::Instant;

use crate::bounds::BoundingBox;
use crate::check::{check_input, check_output};
use crate::comm::Communicator;
use crate::config::{CheckLevel, RcbConfig, SplitStrategy};
use crate::direction::{preset_sequence, DirectionOrder, DirectionSelector};
use crate::divide::{divide_machine, PartLayout, PartSizes, Subproblem};
use crate::dot::{Dot, DotId, Weighting, DIM};
use crate::error::{RcbError, Result};
use crate::group::ProcGroup;
use crate::median::{find_median, idle_median, MedianInput, UNDECIDED};
use crate::migrate::{send_nothing, send_outgoing, send_to_part, send_to_previous, DotBuffer, Traffic};
use crate::serial::{Cursor, SerialRcb};
use crate::stats::{Phase, RcbStats};
use crate::tree::{CutRecord, CutTree, ParentLink};

/// A dot that arrived on this process or changed partition during the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Import {
    pub id: DotId,
    /// Process that owned the dot when the call started.
    pub source_proc: usize,
    /// Partition the dot had when the call started.
    pub source_part: usize,
    /// Partition assigned by this call.
    pub part: usize,
}

/// Result of a partitioning call on one process.
#[derive(Clone, Debug)]
pub struct RcbOutput {
    /// Dots now owned by this process, each carrying its partition.
    pub dots: Vec<Dot>,
    /// `None` when import lists were not requested.
    pub imports: Option<Vec<Import>>,
    /// Sub-domain box of this process after the parallel bisection.
    pub bbox: BoundingBox,
    /// The assembled cut tree, when cuts are kept.
    pub tree: Option<CutTree>,
    /// Partitions with a nonzero target size that received no dots.
    pub empty_parts: Vec<usize>,
    pub stats: RcbStats,
}

/// Recursive coordinate bisection partitioner.
///
/// One instance lives on every process. Instances keep the cut tree of their last
/// call (when cuts are kept), which later calls use for reuse of cuts and directions
/// and which answers point and box queries.
#[derive(Clone, Debug, Default)]
pub struct Rcb {
    config: RcbConfig,
    tree: Option<CutTree>,
}

impl Rcb {
    pub fn new(config: RcbConfig) -> Self {
        Self { config, tree: None }
    }

    pub fn config(&self) -> &RcbConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RcbConfig {
        &mut self.config
    }

    /// Cut tree of the last call, if it was kept.
    pub fn tree(&self) -> Option<&CutTree> {
        self.tree.as_ref()
    }

    /// Forgets the kept cut tree.
    pub fn reset(&mut self) {
        self.tree = None;
    }

    /// Partition containing `point` according to the kept cut tree.
    pub fn point_assign(&self, point: &[f64; DIM]) -> Result<usize> {
        self.tree
            .as_ref()
            .and_then(|t| t.point_assign(point))
            .ok_or_else(|| RcbError::InvalidInput("no valid cut tree; keep cuts to locate points".to_string()))
    }

    /// Partitions intersecting the box `min..max` according to the kept cut tree.
    pub fn box_assign(&self, min: &[f64; DIM], max: &[f64; DIM]) -> Result<Vec<usize>> {
        match &self.tree {
            Some(tree) if tree.is_valid() => Ok(tree.box_assign(min, max)),
            _ => Err(RcbError::InvalidInput("no valid cut tree; keep cuts to locate boxes".to_string())),
        }
    }

    /// Partitions the dots held by all processes of `comm`. Collective.
    ///
    /// # Arguments
    ///
    /// * `comm` - The processes taking part; every one of them must make this call.
    /// * `dots` - The dots owned by this process. Their `part` is taken as the prior
    ///   assignment when building import lists.
    /// * `part_sizes` - Optional relative sizes, one per partition or one per
    ///   partition and weight component (row-major). Uniform when omitted.
    ///
    /// On failure every process returns an error; processes other than the one that
    /// failed return [`RcbError::PeerFailure`].
    pub fn partition<C: Communicator>(
        &mut self,
        comm: &C,
        dots: Vec<Dot>,
        part_sizes: Option<&[f64]>,
    ) -> Result<RcbOutput> {
        let started = Instant::now();
        let cfg = self.config.sanitized();
        let proc = comm.rank();
        let num_parts = cfg.num_parts.unwrap_or(comm.size());
        let weighting = Weighting::from_dim(cfg.weight_dim);
        let wdim = weighting.dims();
        let mut stats = RcbStats::new(dots.len());

        let sizes = comm.agree(resolve_sizes(num_parts, part_sizes, wdim))?;
        let layout = PartLayout::new(num_parts, comm.size());

        let mut dots = dots;
        for dot in dots.iter_mut() {
            dot.orig_proc = proc;
            dot.orig_part = dot.part;
        }
        let mut buffer = DotBuffer::new(dots, cfg.overalloc);
        let world = ProcGroup::whole(comm.clone());

        if cfg.check_geom != CheckLevel::Off {
            comm.agree(screen(cfg.check_geom, check_input(buffer.dots(), weighting)))?;
        }

        // The previous tree is used only if every process still has a matching one.
        let previous = self.tree.as_ref().filter(|t| t.is_valid() && t.num_parts() == num_parts);
        let previous = if comm.all(previous.is_some())? { previous } else { None };
        let guesses = previous.filter(|_| cfg.reuse_cuts);
        let locked = previous.filter(|_| cfg.lock_directions);

        if let Some(prev) = guesses {
            let traffic = send_to_previous(&world, &mut buffer, &layout, prev)?;
            stats.reuse_sends += traffic.sent;
            record_traffic(&mut stats, &traffic, buffer.len());
        }

        let weight_before = comm.sum(&weighting.sums(buffer.dots()))?;
        let bbox = comm.all_reduce(BoundingBox::from_dots(buffer.dots()), BoundingBox::merge)?;
        log::debug!(
            "[rank {}] partitioning {} local dots into {} parts; global box {:?}..{:?}",
            proc, buffer.len(), num_parts, bbox.min, bbox.max
        );

        let preset = DirectionOrder::from_code(cfg.preset_directions)
            .map(|order| preset_sequence(num_parts, order, &bbox));
        let directions = DirectionSelector::new(locked, preset);
        stats.add_time(Phase::Setup, started);

        let mut tree = CutTree::new(num_parts);
        let cursor = Cursor {
            sub: Subproblem { proclower: 0, num_procs: comm.size(), partlower: 0, num_parts },
            bbox,
            weight: weight_before[0],
            parent: ParentLink::ROOT,
            level: 0,
        };
        let bisector = ProcessBisection {
            cfg: &cfg,
            layout: &layout,
            sizes: &sizes,
            directions: &directions,
            guesses,
            weighting,
        };
        let parallel = bisector.run(comm, &mut buffer, &mut tree, &mut stats, cursor);
        let cursor = comm.agree(parallel)?;

        // Dots of a group with a single partition go to its owner.
        let last = num_parts - 1;
        for dot in buffer.dots_mut() {
            dot.part = cursor.sub.partlower.min(last);
        }
        let started_exchange = Instant::now();
        let traffic = send_to_part(&world, &mut buffer, &layout)?;
        stats.part_sends += traffic.sent;
        record_traffic(&mut stats, &traffic, buffer.len());
        stats.add_time(Phase::Exchange, started_exchange);

        let serial = if cursor.sub.num_parts > 1 {
            let mut serial = SerialRcb {
                sizes: &sizes,
                directions: &directions,
                guesses,
                weighting,
                rectilinear: cfg.rectilinear_blocks,
                max_iterations: cfg.median_max_iterations,
                tree: &mut tree,
                stats: &mut stats,
            };
            serial.run(buffer.dots_mut(), cursor)
        } else {
            Ok(())
        };
        comm.agree(serial)?;

        stats.dots_out = buffer.len();
        stats.reallocs = buffer.reallocs();

        if cfg.check_geom != CheckLevel::Off {
            let checked = check_output(comm, buffer.dots(), weighting, &cursor.bbox, &weight_before, &sizes);
            comm.agree(screen(cfg.check_geom, checked))?;
        }

        let tree = if cfg.keep_cuts {
            let recorded = comm.all_gather_varcount(&tree.records())?;
            Some(CutTree::assemble(num_parts, recorded.into_iter().flatten().map(CutRecord::unpack)))
        } else {
            None
        };

        let mut counts = vec![0usize; num_parts];
        for dot in buffer.dots() {
            counts[dot.part] += 1;
        }
        let counts = comm.all_reduce_each(&counts, |a, b| a + b)?;
        let empty_parts: Vec<usize> = (0..num_parts)
            .filter(|&p| counts[p] == 0 && sizes.size(p) > 0.0)
            .collect();
        if !empty_parts.is_empty() && proc == 0 {
            log::warn!("RCB left {} partitions empty: {:?}", empty_parts.len(), empty_parts);
        }

        stats.total = started.elapsed();
        if cfg.output_level > 0 {
            stats.report(comm, cfg.output_level)?;
        }

        let dots = buffer.into_dots();
        let imports = cfg.return_lists.then(|| {
            dots.iter()
                .filter(|d| d.orig_proc != proc || d.orig_part != d.part)
                .map(|d| Import {
                    id: d.id,
                    source_proc: d.orig_proc,
                    source_part: d.orig_part,
                    part: d.part,
                })
                .collect()
        });

        self.tree = tree.clone();
        Ok(RcbOutput {
            dots,
            imports,
            bbox: cursor.bbox,
            tree,
            empty_parts,
            stats,
        })
    }
}

fn resolve_sizes(num_parts: usize, table: Option<&[f64]>, wdim: usize) -> Result<PartSizes> {
    if num_parts == 0 {
        return Err(RcbError::InvalidInput("the number of partitions must be positive".to_string()));
    }
    match table {
        Some(table) => PartSizes::from_table(table, num_parts, wdim),
        None => Ok(PartSizes::uniform(num_parts)),
    }
}

/// Downgrades a failed check to a warning unless checks are fatal.
fn screen(level: CheckLevel, checked: Result<()>) -> Result<()> {
    match (level, checked) {
        (CheckLevel::Warn, Err(e)) => {
            log::warn!("{}", e);
            Ok(())
        }
        (_, checked) => checked,
    }
}

fn record_traffic(stats: &mut RcbStats, traffic: &Traffic, held: usize) {
    stats.dots_sent += traffic.sent;
    stats.dots_received += traffic.received;
    stats.track_dots(held);
}

/// Bisection of the process set, until every group is a single process or holds a
/// single partition.
struct ProcessBisection<'a> {
    cfg: &'a RcbConfig,
    layout: &'a PartLayout,
    sizes: &'a PartSizes,
    directions: &'a DirectionSelector<'a>,
    guesses: Option<&'a CutTree>,
    weighting: Weighting,
}

impl ProcessBisection<'_> {
    /// Returns where the serial continuation starts. Collective; failures are agreed
    /// within the group that saw them.
    fn run<C: Communicator>(
        &self,
        comm: &C,
        buffer: &mut DotBuffer,
        tree: &mut CutTree,
        stats: &mut RcbStats,
        mut cursor: Cursor,
    ) -> Result<Cursor> {
        let proc = comm.rank();
        let mut group = match self.cfg.split {
            SplitStrategy::Duplicate => ProcGroup::whole(comm.duplicate()?),
            SplitStrategy::TrackMax => ProcGroup::whole(comm.clone()),
        };

        loop {
            let active = cursor.sub.num_procs > 1 && cursor.sub.num_parts > 1;
            let proceed = match self.cfg.split {
                SplitStrategy::Duplicate => active,
                SplitStrategy::TrackMax => group.any_across(active)?,
            };
            if !proceed {
                break;
            }
            if !active {
                group.agree(idle_median(&group))?;
                send_nothing(&group, buffer)?;
                continue;
            }

            let start = Instant::now();
            let div = divide_machine(self.layout, self.sizes, &cursor.sub, proc);
            let dim = self.directions.select(div.partmid, cursor.level, &cursor.bbox);
            let coords: Vec<f64> = buffer.dots().iter().map(|d| d.coords[dim]).collect();
            let weights: Vec<f64> = buffer.dots().iter().map(|d| self.weighting.of(d)).collect();
            let first_guess = self
                .guesses
                .and_then(|t| t.cut_at(div.partmid))
                .filter(|(d, _)| *d == dim)
                .map(|(_, cut)| cut);
            if first_guess.is_some() { stats.first_guesses += 1; }
            stats.add_time(Phase::PreMedian, start);

            let start = Instant::now();
            let input = MedianInput {
                coords: &coords,
                weights: &weights,
                total_weight: cursor.weight,
                fraction: div.fraction,
                range: (cursor.bbox.min[dim], cursor.bbox.max[dim]),
                first_guess,
                rectilinear: self.cfg.rectilinear_blocks,
                max_iterations: self.cfg.median_max_iterations,
            };
            let mut marks = vec![UNDECIDED; coords.len()];
            let outcome = group.agree(find_median(&group, &input, &mut marks))?;
            stats.median_iterations += outcome.iterations;
            stats.add_time(Phase::Median, start);

            let start = Instant::now();
            log::debug!(
                "[rank {}] level {}: procs {}..{} parts {}..{} cut dim {} at {} (slot {})",
                proc, cursor.level, cursor.sub.proclower, cursor.sub.proclower + cursor.sub.num_procs,
                cursor.sub.partlower, cursor.sub.partlower + cursor.sub.num_parts, dim, outcome.cut, div.partmid
            );
            if div.splits_parts() {
                if self.layout.owner(div.partmid) == proc {
                    tree.record(div.partmid, dim, outcome.cut, cursor.parent, cursor.sub.partlower);
                }
                cursor.parent = ParentLink { node: div.partmid, side: div.side };
            }
            cursor.bbox = cursor.bbox.shrunk(dim, outcome.cut, div.side.is_high());
            cursor.weight = if div.side.is_high() { outcome.weight_hi } else { outcome.weight_lo };
            cursor.level += 1;

            let procmid = div.procmid - cursor.sub.proclower;
            let traffic = send_outgoing(&group, buffer, &marks, div.side, procmid)?;
            record_traffic(stats, &traffic, buffer.len());
            group = group.descend(self.cfg.split, div.side, procmid)?;
            cursor.sub = div.mine();
            stats.add_time(Phase::Exchange, start);
        }
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::solo::SoloComm;

    fn line(n: usize) -> Vec<Dot> {
        (0..n)
            .map(|i| Dot::new(DotId::new(i as u64, i as u64), [i as f64, 0.0, 0.0]))
            .collect()
    }

    #[test]
    fn test_single_process_two_parts() {
        let mut rcb = Rcb::new(RcbConfig::default().with_num_parts(2).with_keep_cuts(true));
        let out = rcb.partition(&SoloComm, line(8), None).unwrap();
        let low = out.dots.iter().filter(|d| d.part == 0).count();
        assert_eq!(low, 4);
        assert_eq!(out.tree.as_ref().and_then(|t| t.cut_at(1)), Some((0, 3.5)));
        assert_eq!(rcb.point_assign(&[1.0, 0.0, 0.0]).unwrap(), 0);
        assert_eq!(rcb.point_assign(&[6.0, 0.0, 0.0]).unwrap(), 1);
        assert_eq!(rcb.box_assign(&[3.0, 0.0, 0.0], &[4.0, 0.0, 0.0]).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_import_lists_name_moved_dots() {
        let mut rcb = Rcb::new(RcbConfig::default().with_num_parts(2));
        let out = rcb.partition(&SoloComm, line(8), None).unwrap();
        let imports = out.imports.unwrap();
        // Every dot started in partition 0; the high half changed partition.
        assert_eq!(imports.len(), 4);
        assert!(imports.iter().all(|i| i.source_part == 0 && i.part == 1));
        assert!(rcb.tree().is_none());
        assert!(rcb.point_assign(&[0.0; 3]).is_err());
    }

    #[test]
    fn test_zero_partitions_rejected() {
        let mut rcb = Rcb::new(RcbConfig::default().with_num_parts(0));
        assert!(matches!(rcb.partition(&SoloComm, line(4), None), Err(RcbError::InvalidInput(_))));
    }

    #[test]
    fn test_fatal_geometry_check() {
        let mut dots = line(4);
        dots[2].coords[1] = f64::INFINITY;
        let mut rcb = Rcb::new(RcbConfig::default().with_num_parts(2).with_check_geom(CheckLevel::Fatal));
        assert!(matches!(rcb.partition(&SoloComm, dots, None), Err(RcbError::GeometryCheck(_))));
    }

    #[test]
    fn test_unit_weights_when_weight_dim_is_zero() {
        let carried = [100.0, 1.0, 1.0, 1.0];
        let dots: Vec<Dot> = line(4)
            .into_iter()
            .zip(carried)
            .map(|(d, w)| Dot::with_weights(d.id, d.coords, &[w, 5.0]))
            .collect();
        let config = RcbConfig::default().with_num_parts(2).with_check_geom(CheckLevel::Fatal);
        let out = Rcb::new(config).partition(&SoloComm, dots, None).unwrap();
        assert_eq!(out.dots.iter().filter(|d| d.part == 0).count(), 2);
        for dot in &out.dots {
            assert_eq!(dot.weights, [carried[dot.id.local as usize], 5.0, 0.0, 0.0]);
        }
    }
}
