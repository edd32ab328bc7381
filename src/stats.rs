use std::time::{Duration, Instant};

use crate::comm::Communicator;
use crate::error::Result;

/// Phases timed during a partitioning call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Input checks, reductions of weight and box, reuse pre-migration.
    Setup,
    /// Division of processes and partitions, direction choice, coordinate copies.
    PreMedian,
    Median,
    /// Dot migration.
    Exchange,
}

impl Phase {
    fn index(self) -> usize {
        self as usize
    }
}

/// Counters and timers of one process for one partitioning call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RcbStats {
    pub dots_in: usize,
    pub dots_out: usize,
    /// Probes made by all median searches.
    pub median_iterations: usize,
    pub dots_sent: usize,
    pub dots_received: usize,
    /// Largest number of dots held at any time.
    pub max_dots: usize,
    pub reallocs: usize,
    /// Median searches seeded with a previous cut.
    pub first_guesses: usize,
    /// Dots sent while moving dots to the owners of their partitions.
    pub part_sends: usize,
    /// Dots sent by the pre-migration to the previous partitioning.
    pub reuse_sends: usize,
    pub timers: [Duration; 4],
    pub total: Duration,
}

impl RcbStats {
    pub(crate) fn new(dots_in: usize) -> Self {
        Self { dots_in, max_dots: dots_in, ..Default::default() }
    }

    pub(crate) fn add_time(&mut self, phase: Phase, since: Instant) {
        self.timers[phase.index()] += since.elapsed();
    }

    pub(crate) fn track_dots(&mut self, held: usize) {
        if held > self.max_dots { self.max_dots = held; }
    }

    /// Logs statistics for the whole communicator. Collective.
    ///
    /// Level 1 logs min, max and average of every counter from rank 0; level 2 also
    /// logs every process's own line.
    pub(crate) fn report<C: Communicator>(&self, comm: &C, level: u8) -> Result<()> {
        let all = comm.all_gather(COLUMNS.map(|(_, value)| value(self)))?;
        if level >= 2 {
            log::info!(
                "[rank {}] dots {} -> {}, sent {}, received {}, max {}, reallocs {}, probes {}, first guesses {}, total {:?}",
                comm.rank(), self.dots_in, self.dots_out, self.dots_sent, self.dots_received,
                self.max_dots, self.reallocs, self.median_iterations, self.first_guesses, self.total
            );
        }
        if comm.rank() != 0 {
            return Ok(());
        }

        log::info!("RCB statistics over {} processes:", all.len());
        for (column, (name, _)) in COLUMNS.iter().enumerate() {
            let values: Vec<f64> = all.iter().map(|row| row[column]).collect();
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let avg = values.iter().sum::<f64>() / values.len().max(1) as f64;
            log::info!("RCB {:<20} min {:>12.4} max {:>12.4} avg {:>12.4}", name, min, max, avg);
        }
        Ok(())
    }
}

/// Summarized counters, in report order.
const COLUMNS: [(&str, fn(&RcbStats) -> f64); 15] = [
    ("total time (s)", |s| s.total.as_secs_f64()),
    ("setup time (s)", |s| s.timers[0].as_secs_f64()),
    ("pre-median time (s)", |s| s.timers[1].as_secs_f64()),
    ("median time (s)", |s| s.timers[2].as_secs_f64()),
    ("exchange time (s)", |s| s.timers[3].as_secs_f64()),
    ("dots in", |s| s.dots_in as f64),
    ("dots out", |s| s.dots_out as f64),
    ("max dots", |s| s.max_dots as f64),
    ("median probes", |s| s.median_iterations as f64),
    ("dots sent", |s| s.dots_sent as f64),
    ("dots received", |s| s.dots_received as f64),
    ("reallocations", |s| s.reallocs as f64),
    ("first guesses", |s| s.first_guesses as f64),
    ("sent to parts", |s| s.part_sends as f64),
    ("reuse sends", |s| s.reuse_sends as f64),
];
