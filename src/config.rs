// ============================================================================
// ENGINE CONFIGURATION — every tunable the growth pipeline reads
// ============================================================================
//
// All knobs are threaded explicitly from here into seeding / cost evaluation /
// batching, so a suggestion is a pure function of (rasters, strokes, config).
// The serde derives exist so a host application can persist user preferences;
// the engine itself never touches disk.

use serde::{Deserialize, Serialize};

/// Tunables for the suggestion-growth pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Exponent applied to the classifier's background probability when it
    /// becomes a traversal cost.  Larger values make growth stop harder at
    /// confident probability boundaries; smaller values make it more purely
    /// distance-driven. Default: 3.0.
    pub score_power: f64,
    /// Stride of the coarsened relaxation lattice.  Each visited node
    /// broadcast-fills a `step × step` block of the cost field, which is what
    /// keeps growth interactive on 10^8-pixel rasters. Default: 3.
    pub dijkstra_step: u32,
    /// Pen mode: relax at stride 1 regardless of `dijkstra_step`, trading
    /// speed for pixel-exact boundaries. Default: false.
    pub precision_mode: bool,
    /// When true, pixels that already carry a label are impassable and are
    /// never overwritten by a commit.  When false only NO_DATA is a hard
    /// barrier. Default: true.
    pub lock_labels: bool,
    /// Use 3×3 patch statistics (per-channel mean + std-dev) instead of
    /// single-pixel color features; slower but steadier on textured imagery.
    /// Default: false.
    pub patch_features: bool,
    /// How many committed label rasters the undo history retains. Default: 10.
    pub undo_capacity: usize,
    /// Number of fine-grained "interior" growth batches run right after
    /// training, which together cover roughly the painted area. Default: 10.
    pub interior_steps: usize,
    /// Ring index selected after the initial growth; also how far past the
    /// interior the initial batches extend. Default: 26.
    pub default_growth: usize,
    /// Per-ring multiplicative increase of batch size once past the interior
    /// rings, approximating visually uniform radial growth. Default: 1.02.
    pub growth_factor: f64,
    /// Base batch size for the geometric phase, as a fraction of the
    /// estimated painted-pixel count. Default: 0.02.
    pub growth_rate: f64,
    /// Classifier training parameters.
    pub train: TrainParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            score_power: 3.0,
            dijkstra_step: 3,
            precision_mode: false,
            lock_labels: true,
            patch_features: false,
            undo_capacity: 10,
            interior_steps: 10,
            default_growth: 26,
            growth_factor: 1.02,
            growth_rate: 0.02,
            train: TrainParams::default(),
        }
    }
}

impl EngineConfig {
    /// Relaxation stride in effect (collapses to 1 in precision mode).
    pub fn step(&self) -> u32 {
        if self.precision_mode {
            1
        } else {
            self.dijkstra_step.max(1)
        }
    }
}

/// Parameters for fitting the stroke classifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainParams {
    /// Below this many positive samples, training is silently skipped —
    /// "not enough paint yet" is a normal state, not an error. Default: 30.
    pub min_positives: usize,
    /// Minimum ring-interior positives before a spare model is trained for
    /// deeper growth; interior evidence is weak, so the bar is higher than
    /// for strokes. Default: 100.
    pub min_spare_positives: usize,
    /// Cap on positive training samples per fit. Default: 4000.
    pub max_positives: usize,
    /// Cap on negative training samples per fit. Default: 8000.
    pub max_negatives: usize,
    /// L2 regularization strength. Default: 0.1.
    pub lambda: f64,
    /// Gradient-norm convergence tolerance. Default: 1e-5.
    pub tolerance: f64,
    /// Iteration cap for the throwaway first pass. Default: 35.
    pub first_pass_iters: usize,
    /// Iteration cap for the refit on noise-filtered samples. Default: 100.
    pub refit_iters: usize,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            min_positives: 30,
            min_spare_positives: 100,
            max_positives: 4000,
            max_negatives: 8000,
            lambda: 0.1,
            tolerance: 1e-5,
            first_pass_iters: 35,
            refit_iters: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_mode_overrides_stride() {
        let mut cfg = EngineConfig::default();
        assert_eq!(cfg.step(), 3);
        cfg.precision_mode = true;
        assert_eq!(cfg.step(), 1);
        cfg.precision_mode = false;
        cfg.dijkstra_step = 0;
        assert_eq!(cfg.step(), 1); // stride never degenerates to zero
    }
}
