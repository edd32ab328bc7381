//! Parallel weighted median search along one axis.
//!
//! The search probes cut values inside a shrinking bracket of the values still
//! undecided. Each probe reduces, over the group, the weight below, at and above
//! the probe together with the nearest values on either side. Dots on the side that
//! cannot contain the target are marked for good, and the bracket moves to the
//! nearest remaining value, so every probe settles at least one distinct value.

use bytemuck::{Pod, Zeroable};

use crate::comm::Communicator;
use crate::error::{RcbError, Result};
use crate::group::ProcGroup;

/// Dot goes to the low side of the cut.
pub(crate) const LOW: u8 = 0;
/// Dot goes to the high side of the cut.
pub(crate) const HIGH: u8 = 1;
/// Not yet placed by the current search.
pub(crate) const UNDECIDED: u8 = u8::MAX;

/// Local share of one median search.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MedianInput<'a> {
    /// Coordinate of every local dot along the cut axis.
    pub coords: &'a [f64],
    pub weights: &'a [f64],
    /// Weight of the whole group.
    pub total_weight: f64,
    /// Share of `total_weight` wanted on the low side.
    pub fraction: f64,
    /// Extent of the group's box along the cut axis.
    pub range: (f64, f64),
    /// Cut from a previous run, probed first.
    pub first_guess: Option<f64>,
    /// Keep dots with equal coordinates on one side.
    pub rectilinear: bool,
    pub max_iterations: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct MedianOutcome {
    pub cut: f64,
    pub weight_lo: f64,
    pub weight_hi: f64,
    pub iterations: usize,
}

/// Undecided weight around a probe value.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct Probe {
    below: f64,
    at: f64,
    above: f64,
    n_below: usize,
    n_at: usize,
    n_above: usize,
    max_below: f64,
    min_above: f64,
}

impl Probe {
    const IDLE: Probe = Probe {
        below: 0.0,
        at: 0.0,
        above: 0.0,
        n_below: 0,
        n_at: 0,
        n_above: 0,
        max_below: f64::NEG_INFINITY,
        min_above: f64::INFINITY,
    };

    fn measure(input: &MedianInput<'_>, marks: &[u8], value: f64) -> Probe {
        let mut p = Probe::IDLE;
        for ((&x, &w), _) in input
            .coords
            .iter()
            .zip(input.weights)
            .zip(marks)
            .filter(|(_, m)| **m == UNDECIDED)
        {
            if x < value {
                p.below += w;
                p.n_below += 1;
                if x > p.max_below { p.max_below = x; }
            } else if x > value {
                p.above += w;
                p.n_above += 1;
                if x < p.min_above { p.min_above = x; }
            } else {
                p.at += w;
                p.n_at += 1;
            }
        }
        p
    }

    fn merge(&self, other: &Probe) -> Probe {
        Probe {
            below: self.below + other.below,
            at: self.at + other.at,
            above: self.above + other.above,
            n_below: self.n_below + other.n_below,
            n_at: self.n_at + other.n_at,
            n_above: self.n_above + other.n_above,
            max_below: self.max_below.max(other.max_below),
            min_above: self.min_above.min(other.min_above),
        }
    }

    fn count(&self) -> usize {
        self.n_below + self.n_at + self.n_above
    }
}

/// How dots sitting exactly on the cut are placed.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Ties {
    AllLow,
    AllHigh,
    /// Tied dots in rank order go low while their midpoint fits in `deficit`.
    Prefix { deficit: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    Probing,
    Found { cut: f64, ties: Ties },
    Failed,
}

/// Search state, identical on every member of the group.
struct Search {
    target: f64,
    tolerance: f64,
    weight_lo: f64,
    min: f64,
    max: f64,
    probe: f64,
    iterations: usize,
    max_iterations: usize,
    rectilinear: bool,
    state: State,
}

impl Search {
    fn new(input: &MedianInput<'_>) -> Search {
        let (min, max) = input.range;
        let probe = match input.first_guess {
            Some(guess) if guess.is_finite() => guess,
            _ => midpoint(min, max),
        };
        Search {
            target: input.fraction * input.total_weight,
            tolerance: 1e-12 * input.total_weight.abs(),
            weight_lo: 0.0,
            min,
            max,
            probe,
            iterations: 0,
            max_iterations: input.max_iterations,
            rectilinear: input.rectilinear,
            state: State::Probing,
        }
    }

    /// Folds the group-wide probe result into the bracket.
    ///
    /// Returns the side that undecided dots below and above the probe commit to.
    fn update(&mut self, g: &Probe) -> (Option<u8>, Option<u8>) {
        self.iterations += 1;
        let value = self.probe;
        if g.count() == 0 {
            self.state = State::Found { cut: value, ties: Ties::AllLow };
            return (None, None);
        }

        let low = self.weight_lo + g.below;
        log::trace!(
            "median probe {} at {}: below {} at {} above {} target {}",
            self.iterations, value, low, g.at, g.above, self.target
        );
        if low <= self.target + self.tolerance && self.target - self.tolerance <= low + g.at {
            let deficit = (self.target - low).max(0.0);
            let ties = if self.rectilinear {
                if g.at - deficit < deficit { Ties::AllLow } else { Ties::AllHigh }
            } else {
                Ties::Prefix { deficit }
            };
            self.state = State::Found { cut: value, ties };
            return (Some(LOW), Some(HIGH));
        }

        let commit = if low + g.at < self.target {
            // Target lies above the probe.
            self.weight_lo += g.below + g.at;
            if g.n_above == 0 {
                self.state = State::Found { cut: value, ties: Ties::AllLow };
            } else {
                self.min = g.min_above;
            }
            (Some(LOW), None)
        } else {
            if g.n_below == 0 {
                self.state = State::Found { cut: value, ties: Ties::AllHigh };
            } else {
                self.max = g.max_below;
            }
            (None, Some(HIGH))
        };
        if self.state == State::Probing {
            if self.iterations >= self.max_iterations {
                self.state = State::Failed;
            } else {
                self.probe = midpoint(self.min, self.max);
            }
        }
        commit
    }
}

fn midpoint(a: f64, b: f64) -> f64 {
    let m = 0.5 * (a + b);
    if m.is_finite() { m } else { 0.0 }
}

/// Marks undecided dots strictly below and above `value`, and dots at it per `at`.
fn commit(input: &MedianInput<'_>, marks: &mut [u8], value: f64, below: Option<u8>, at: Option<u8>, above: Option<u8>) {
    for (&x, mark) in input.coords.iter().zip(marks.iter_mut()) {
        if *mark != UNDECIDED {
            continue;
        }
        let side = if x < value {
            below
        } else if x > value {
            above
        } else {
            at
        };
        if let Some(side) = side {
            *mark = side;
        }
    }
}

/// Finds the cut placing `fraction` of the group's weight on the low side.
///
/// Collective over `group`. On success `marks` holds [`LOW`] or [`HIGH`] for every
/// local dot.
pub(crate) fn find_median<C: Communicator>(
    group: &ProcGroup<C>,
    input: &MedianInput<'_>,
    marks: &mut [u8],
) -> Result<MedianOutcome> {
    search(group, Some(input), marks)?
        .ok_or_else(|| RcbError::Communication("median search returned no cut".to_string()))
}

/// Enters every collective of a median search run by other members of the
/// communicator, without searching. Keeps idle processes in step under a tracked split.
pub(crate) fn idle_median<C: Communicator>(group: &ProcGroup<C>) -> Result<()> {
    search(group, None, &mut [])?;
    Ok(())
}

fn search<C: Communicator>(
    group: &ProcGroup<C>,
    input: Option<&MedianInput<'_>>,
    marks: &mut [u8],
) -> Result<Option<MedianOutcome>> {
    let mut search = input.map(Search::new);

    if let (Some(input), Some(search)) = (input, search.as_mut()) {
        marks.iter_mut().for_each(|m| *m = UNDECIDED);
        if input.fraction <= 0.0 {
            marks.iter_mut().for_each(|m| *m = HIGH);
            search.state = State::Found { cut: input.range.0, ties: Ties::AllHigh };
        } else if input.fraction >= 1.0 {
            marks.iter_mut().for_each(|m| *m = LOW);
            search.state = State::Found { cut: input.range.1, ties: Ties::AllLow };
        }
    }

    loop {
        let probing = search.as_ref().is_some_and(|s| s.state == State::Probing);
        let local = match (input, search.as_ref()) {
            (Some(input), Some(s)) if probing => Probe::measure(input, marks, s.probe),
            _ => Probe::IDLE,
        };
        let global = group.all_reduce(local, Probe::merge)?;
        if let (Some(input), Some(s)) = (input, search.as_mut()) {
            if probing {
                let value = s.probe;
                let (below, above) = s.update(&global);
                let at = match s.state {
                    State::Found { .. } => None,
                    _ => below.or(above),
                };
                commit(input, marks, value, below, at, above);
            }
        }
        let still_probing = search.as_ref().is_some_and(|s| s.state == State::Probing);
        if !group.any_across(still_probing)? {
            break;
        }
    }

    // Tied dots: exclusive prefix of the tied weight over the group, in rank order.
    let (cut, ties) = match search.as_ref().map(|s| s.state) {
        Some(State::Found { cut, ties }) => (cut, Some(ties)),
        _ => (0.0, None),
    };
    let local_tied = match (input, ties) {
        (Some(input), Some(Ties::Prefix { .. })) => input
            .coords
            .iter()
            .zip(input.weights)
            .zip(marks.iter())
            .filter(|((x, _), m)| **m == UNDECIDED && **x == cut)
            .map(|((_, w), _)| *w)
            .sum(),
        _ => 0.0,
    };
    let tied = group.all_gather(local_tied)?;
    if let (Some(input), Some(ties)) = (input, ties) {
        match ties {
            Ties::AllLow => commit(input, marks, cut, Some(LOW), Some(LOW), Some(HIGH)),
            Ties::AllHigh => commit(input, marks, cut, Some(LOW), Some(HIGH), Some(HIGH)),
            Ties::Prefix { deficit } => {
                let mut before: f64 = tied[..group.index()].iter().sum();
                for ((&x, &w), mark) in input.coords.iter().zip(input.weights).zip(marks.iter_mut()) {
                    if *mark == UNDECIDED && x == cut {
                        *mark = if before + 0.5 * w <= deficit { LOW } else { HIGH };
                        before += w;
                    }
                }
                commit(input, marks, cut, Some(LOW), None, Some(HIGH));
            }
        }
    }

    let mut sides = Sides::EMPTY;
    if let Some(input) = input {
        for ((&x, &w), &m) in input.coords.iter().zip(input.weights).zip(marks.iter()) {
            if m == LOW {
                sides.weight_lo += w;
                if x > sides.max_lo { sides.max_lo = x; }
            } else if m == HIGH {
                sides.weight_hi += w;
                if x < sides.min_hi { sides.min_hi = x; }
            }
        }
    }
    let sides = group.all_reduce(sides, Sides::merge)?;

    match search {
        None => Ok(None),
        Some(s) if s.state == State::Failed => Err(RcbError::MedianNotConverged { iterations: s.iterations }),
        Some(s) => {
            let cut = sides.separating_cut(cut);
            log::debug!(
                "median cut {} after {} probes: low {} high {} (target {})",
                cut, s.iterations, sides.weight_lo, sides.weight_hi, s.target
            );
            Ok(Some(MedianOutcome {
                cut,
                weight_lo: sides.weight_lo,
                weight_hi: sides.weight_hi,
                iterations: s.iterations,
            }))
        }
    }
}

/// Weight and innermost coordinate of each side once every dot is placed.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct Sides {
    weight_lo: f64,
    weight_hi: f64,
    max_lo: f64,
    min_hi: f64,
}

impl Sides {
    const EMPTY: Sides = Sides {
        weight_lo: 0.0,
        weight_hi: 0.0,
        max_lo: f64::NEG_INFINITY,
        min_hi: f64::INFINITY,
    };

    fn merge(&self, other: &Sides) -> Sides {
        Sides {
            weight_lo: self.weight_lo + other.weight_lo,
            weight_hi: self.weight_hi + other.weight_hi,
            max_lo: self.max_lo.max(other.max_lo),
            min_hi: self.min_hi.min(other.min_hi),
        }
    }

    /// Moves `probe` so that low dots lie at or below it and high dots above it.
    ///
    /// Points on a cut belong to its low side, so with an empty low side the cut
    /// drops just below the lowest high dot. When tied dots were split across the
    /// cut no such value exists and `probe` is kept.
    fn separating_cut(&self, probe: f64) -> f64 {
        if self.max_lo <= probe && probe < self.min_hi {
            return probe;
        }
        if !self.max_lo.is_finite() {
            return if self.min_hi.is_finite() { next_below(self.min_hi) } else { probe };
        }
        if !(self.max_lo < self.min_hi) {
            return probe;
        }
        if !self.min_hi.is_finite() {
            return self.max_lo;
        }
        let mid = 0.5 * (self.max_lo + self.min_hi);
        if mid < self.min_hi { mid } else { self.max_lo }
    }
}

/// Largest float strictly below the finite `x`.
fn next_below(x: f64) -> f64 {
    if x == 0.0 {
        return -f64::from_bits(1);
    }
    let bits = x.to_bits();
    f64::from_bits(if x > 0.0 { bits - 1 } else { bits + 1 })
}
