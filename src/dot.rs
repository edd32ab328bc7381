use bytemuck::{Pod, Zeroable};

/// Number of spatial dimensions of a dot.
pub const DIM: usize = 3;

/// Maximum number of weight components carried by a dot.
pub const MAX_WEIGHTS: usize = 4;

/// Identifier of a dot, opaque to the partitioner.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Pod, Zeroable)]
pub struct DotId {
    pub global: u64,
    pub local: u64,
}

impl DotId {
    pub fn new(global: u64, local: u64) -> Self {
        Self { global, local }
    }
}

/// A weighted point to be assigned to a partition.
///
/// A dot is owned by exactly one process at a time and always migrates as a whole,
/// as plain bytes when processes do not share memory.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Dot {
    pub id: DotId,
    pub coords: [f64; DIM],
    pub weights: [f64; MAX_WEIGHTS],
    /// Partition assigned by the partitioner. On input, the caller's prior assignment.
    pub part: usize,
    /// Process that owned the dot when the call started.
    pub(crate) orig_proc: usize,
    /// Partition the dot had when the call started.
    pub(crate) orig_part: usize,
}

impl Dot {
    /// A dot with unit weight in the first component.
    pub fn new(id: DotId, coords: [f64; DIM]) -> Self {
        let mut weights = [0.0; MAX_WEIGHTS];
        weights[0] = 1.0;
        Self {
            id,
            coords,
            weights,
            part: 0,
            orig_proc: 0,
            orig_part: 0,
        }
    }

    /// A dot with the given weight components; missing components are zero.
    pub fn with_weights(id: DotId, coords: [f64; DIM], weights: &[f64]) -> Self {
        let mut dot = Self::new(id, coords);
        dot.weights = [0.0; MAX_WEIGHTS];
        for (w, &v) in dot.weights.iter_mut().zip(weights) {
            *w = v;
        }
        dot
    }

    pub fn with_part(mut self, part: usize) -> Self {
        self.part = part;
        self
    }

    pub fn weight(&self) -> f64 {
        self.weights[0]
    }
}

/// How dot weights enter the balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Weighting {
    /// Every dot counts 1; the weights it carries are ignored and left untouched.
    Unit,
    /// The first `n` components are read; the first one drives the cuts.
    Components(usize),
}

impl Weighting {
    pub fn from_dim(weight_dim: usize) -> Self {
        match weight_dim {
            0 => Weighting::Unit,
            n => Weighting::Components(n.min(MAX_WEIGHTS)),
        }
    }

    /// Number of balanced components.
    pub fn dims(self) -> usize {
        match self {
            Weighting::Unit => 1,
            Weighting::Components(n) => n,
        }
    }

    /// Weight balanced by the cuts.
    pub fn of(self, dot: &Dot) -> f64 {
        match self {
            Weighting::Unit => 1.0,
            Weighting::Components(_) => dot.weights[0],
        }
    }

    /// Per-component weight sums over `dots`.
    pub fn sums(self, dots: &[Dot]) -> Vec<f64> {
        match self {
            Weighting::Unit => vec![dots.len() as f64],
            Weighting::Components(n) => {
                let mut sums = vec![0.0; n];
                for dot in dots {
                    for (s, w) in sums.iter_mut().zip(dot.weights.iter()) {
                        *s += *w;
                    }
                }
                sums
            }
        }
    }
}
