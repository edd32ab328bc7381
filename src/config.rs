use crate::dot::MAX_WEIGHTS;

/// How thoroughly input and output geometry is checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CheckLevel {
    #[default]
    Off,
    /// Report failures as warnings and continue.
    Warn,
    /// Report failures as errors and abort the call on every process.
    Fatal,
}

/// How a process group is divided at each bisection level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SplitStrategy {
    /// Split the communicator into two child communicators per level.
    #[default]
    Duplicate,
    /// Keep the original communicator. Every process walks through every level and
    /// takes part in each collective, idle once its own group is trivial.
    TrackMax,
}

/// Options of a recursive coordinate bisection run.
#[derive(Clone, Debug, PartialEq)]
pub struct RcbConfig {
    /// Total number of partitions. `None` means one per process.
    pub num_parts: Option<usize>,
    /// Number of weight components per dot. 0 means every dot weighs 1.
    pub weight_dim: usize,
    /// Growth factor applied when a dot buffer has to be enlarged (1.0 = exact fit).
    pub overalloc: f64,
    /// Seed the median search with the previous run's cuts.
    pub reuse_cuts: bool,
    /// Reuse the previous run's cut directions.
    pub lock_directions: bool,
    /// Fixed order of cut directions: 0 off, 1 xyz, 2 xzy, 3 yzx, 4 yxz, 5 zxy, 6 zyx.
    pub preset_directions: i32,
    /// Keep dots with coincident coordinates on one side of each cut.
    pub rectilinear_blocks: bool,
    /// Assemble the full cut tree on every process.
    pub keep_cuts: bool,
    pub check_geom: CheckLevel,
    /// 0 silent, 1 summary statistics, 2 statistics for every process.
    pub output_level: u8,
    /// Build the list of dots that changed process or partition.
    pub return_lists: bool,
    pub split: SplitStrategy,
    pub median_max_iterations: usize,
}

impl Default for RcbConfig {
    fn default() -> Self {
        Self {
            num_parts: None,
            weight_dim: 0,
            overalloc: 1.0,
            reuse_cuts: false,
            lock_directions: false,
            preset_directions: 0,
            rectilinear_blocks: false,
            keep_cuts: false,
            check_geom: CheckLevel::Off,
            output_level: 0,
            return_lists: true,
            split: SplitStrategy::Duplicate,
            median_max_iterations: 10_000,
        }
    }
}

impl RcbConfig {
    pub fn with_num_parts(mut self, num_parts: usize) -> Self {
        self.num_parts = Some(num_parts);
        self
    }

    pub fn with_weight_dim(mut self, weight_dim: usize) -> Self {
        self.weight_dim = weight_dim;
        self
    }

    pub fn with_overalloc(mut self, overalloc: f64) -> Self {
        self.overalloc = overalloc;
        self
    }

    pub fn with_reuse_cuts(mut self, reuse: bool) -> Self {
        self.reuse_cuts = reuse;
        self
    }

    pub fn with_lock_directions(mut self, lock: bool) -> Self {
        self.lock_directions = lock;
        self
    }

    pub fn with_preset_directions(mut self, code: i32) -> Self {
        self.preset_directions = code;
        self
    }

    pub fn with_rectilinear_blocks(mut self, rectilinear: bool) -> Self {
        self.rectilinear_blocks = rectilinear;
        self
    }

    pub fn with_keep_cuts(mut self, keep: bool) -> Self {
        self.keep_cuts = keep;
        self
    }

    pub fn with_check_geom(mut self, level: CheckLevel) -> Self {
        self.check_geom = level;
        self
    }

    pub fn with_output_level(mut self, level: u8) -> Self {
        self.output_level = level;
        self
    }

    pub fn with_return_lists(mut self, lists: bool) -> Self {
        self.return_lists = lists;
        self
    }

    pub fn with_split(mut self, split: SplitStrategy) -> Self {
        self.split = split;
        self
    }

    pub fn with_median_max_iterations(mut self, max_iterations: usize) -> Self {
        self.median_max_iterations = max_iterations;
        self
    }

    /// Copy with out-of-range values replaced by safe defaults.
    ///
    /// Each substitution is reported with a warning; none of them aborts the run.
    pub(crate) fn sanitized(&self) -> RcbConfig {
        let mut cfg = self.clone();
        if cfg.weight_dim > MAX_WEIGHTS {
            log::warn!(
                "Too many weights ({}) were given; only the first {} will be used.",
                cfg.weight_dim,
                MAX_WEIGHTS
            );
            cfg.weight_dim = MAX_WEIGHTS;
        }
        if !(cfg.overalloc >= 1.0) {
            log::warn!("Overallocation factor {} is below 1.0; reset to 1.0.", cfg.overalloc);
            cfg.overalloc = 1.0;
        }
        if cfg.preset_directions < 0 || cfg.preset_directions > 6 {
            log::warn!(
                "Preset direction code {} out of bounds; reset to 1.",
                cfg.preset_directions
            );
            cfg.preset_directions = 1;
        }
        if cfg.output_level > 2 {
            cfg.output_level = 2;
        }
        if cfg.median_max_iterations == 0 {
            cfg.median_max_iterations = 1;
        }
        // Reusing cuts or directions needs the whole tree from the previous run.
        if cfg.reuse_cuts || cfg.lock_directions {
            cfg.keep_cuts = true;
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_substitutes_defaults() {
        let cfg = RcbConfig::default()
            .with_preset_directions(9)
            .with_weight_dim(7)
            .with_overalloc(0.5)
            .sanitized();
        assert_eq!(cfg.preset_directions, 1);
        assert_eq!(cfg.weight_dim, MAX_WEIGHTS);
        assert_eq!(cfg.overalloc, 1.0);
    }

    #[test]
    fn test_median_iteration_cap_is_at_least_one() {
        let cfg = RcbConfig::default().with_median_max_iterations(0).sanitized();
        assert_eq!(cfg.median_max_iterations, 1);
        let cfg = RcbConfig::default().with_median_max_iterations(25).sanitized();
        assert_eq!(cfg.median_max_iterations, 25);
    }

    #[test]
    fn test_reuse_turns_on_keep_cuts() {
        let cfg = RcbConfig::default().with_reuse_cuts(true).sanitized();
        assert!(cfg.keep_cuts);
        let cfg = RcbConfig::default().with_lock_directions(true).sanitized();
        assert!(cfg.keep_cuts);
        let cfg = RcbConfig::default().sanitized();
        assert!(!cfg.keep_cuts);
    }
}
