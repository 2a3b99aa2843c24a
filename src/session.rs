// ============================================================================
// SESSION — orchestrates strokes → train → grow → commit over one image
// ============================================================================
//
// The host application owns rendering, pan/zoom and input; it drives this
// type with raster-space coordinates and reads back state.  A session holds
// exactly two kinds of state: the durable label raster with its undo history
// (mutated only by `commit` / `undo` / `mark_no_data_color`), and the
// ephemeral per-cycle pipeline (strokes, classifier, cost field, rings) that
// is rebuilt on every stroke release and discarded at each commit.
//
// Classifier fits run off-thread via `rayon::spawn` and report back over an
// mpsc channel; every request carries a generation token, and a result whose
// token is stale by the time it arrives is discarded.  The host polls the
// channel once per frame (`poll`); headless callers block with
// `wait_for_jobs`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};

use image::{GrayImage, Luma, Rgba, RgbaImage};
use rayon::prelude::*;

use crate::classifier::{Classifier, LogisticModel, train_two_pass};
use crate::config::EngineConfig;
use crate::cost_field::{CostGrower, CostModel};
use crate::features::FeatureExtractor;
use crate::raster::{
    AnnotationMask, CostField, NO_DATA, STROKE_NEGATIVE, STROKE_NONE, STROKE_POSITIVE,
    ScalarLayer, UNLABELED, fill_no_data_by_corner_color, is_writable_label, mark_no_data,
};
use crate::sampler::sample_stratified;
use crate::{log_info, log_warn};

// -- Errors -------------------------------------------------------------

/// Structural failures a session can report.  Everything else (too little
/// paint, blocked seeds, stale ring indices) degrades to "nothing happened".
#[derive(Debug)]
pub enum SessionError {
    /// An auxiliary layer or the label raster does not match the master
    /// raster's dimensions.  Rejected at setup; never recoverable mid-session.
    DimensionMismatch {
        layer: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::DimensionMismatch { layer, expected, actual } => write!(
                f,
                "layer '{}' is {}×{} but the master raster is {}×{}",
                layer, actual.0, actual.1, expected.0, expected.1
            ),
        }
    }
}

// -- Background training plumbing ---------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ModelSlot {
    /// Drives the current suggestion; retrained on every stroke release.
    Active,
    /// Trained opportunistically from ring interiors; promoted at the next
    /// explicit grow, never mid-ring.
    Spare,
}

/// Delivered from a background fit; `model` is `None` when the fit was
/// structurally impossible or the job panicked.
struct TrainResult {
    slot: ModelSlot,
    token: u64,
    model: Option<LogisticModel>,
}

// ============================================================================
// SESSION
// ============================================================================

pub struct Session {
    master: Arc<RgbaImage>,
    layers: Arc<Vec<(String, ScalarLayer)>>,

    // Durable state: mutated only through commit / undo / mark_no_data_color.
    labels: GrayImage,
    undo_stack: VecDeque<GrayImage>,

    // Ephemeral per-cycle pipeline.
    mask: AnnotationMask,
    grower: CostGrower,
    active_ring: Option<usize>,
    model: Option<Arc<LogisticModel>>,
    spare: Option<Arc<LogisticModel>>,
    estimated_positives: usize,

    config: EngineConfig,

    sender: Sender<TrainResult>,
    receiver: Receiver<TrainResult>,
    active_token: u64,
    spare_token: u64,
    pending_jobs: usize,
}

impl Session {
    /// Start a labeling session over `master`.  `labels` may carry a
    /// previously saved raster; `None` starts all-UNLABELED.  Dimension
    /// mismatches are fatal here rather than surfacing later as bad growth.
    pub fn new(
        master: RgbaImage,
        layers: Vec<(String, ScalarLayer)>,
        labels: Option<GrayImage>,
        config: EngineConfig,
    ) -> Result<Self, SessionError> {
        let (w, h) = master.dimensions();
        for (name, layer) in &layers {
            if layer.dimensions() != (w, h) {
                return Err(SessionError::DimensionMismatch {
                    layer: name.clone(),
                    expected: (w, h),
                    actual: layer.dimensions(),
                });
            }
        }
        let mut labels = match labels {
            Some(l) => {
                if l.dimensions() != (w, h) {
                    return Err(SessionError::DimensionMismatch {
                        layer: "labels".to_string(),
                        expected: (w, h),
                        actual: l.dimensions(),
                    });
                }
                l
            }
            None => GrayImage::new(w, h),
        };

        let marked = fill_no_data_by_corner_color(&master, &mut labels);
        if marked > 0 {
            log_info!("corner color marked {} pixels as no-data", marked);
        }

        let (sender, receiver) = channel();
        Ok(Self {
            master: Arc::new(master),
            layers: Arc::new(layers),
            labels,
            undo_stack: VecDeque::with_capacity(config.undo_capacity),
            mask: AnnotationMask::new(w, h),
            grower: CostGrower::new(w, h),
            active_ring: None,
            model: None,
            spare: None,
            estimated_positives: 0,
            config,
            sender,
            receiver,
            active_token: 0,
            spare_token: 0,
            pending_jobs: 0,
        })
    }

    // -- Painting (driven by the excluded input subsystem) ---------------

    pub fn paint_positive(&mut self, cx: f32, cy: f32, radius: f32) {
        self.mask.paint_disc(cx, cy, radius, STROKE_POSITIVE);
    }

    pub fn paint_negative(&mut self, cx: f32, cy: f32, radius: f32) {
        self.mask.paint_disc(cx, cy, radius, STROKE_NEGATIVE);
    }

    pub fn erase_stroke(&mut self, cx: f32, cy: f32, radius: f32) {
        self.mask.erase_disc(cx, cy, radius);
    }

    /// Throw away all strokes and the suggestion built from them.
    pub fn clear_strokes(&mut self) {
        self.reset_cycle();
    }

    /// Stroke released: sample a training set and kick off a classifier fit.
    /// Supersedes any fit still in flight from the previous release — the
    /// suggestion is always rebuilt from the complete stroke state, never
    /// patched incrementally.
    pub fn end_stroke(&mut self) {
        let Some(pos_bounds) = self.mask.positive_bounds() else {
            log_info!("stroke ended with no positive paint; nothing to train");
            return;
        };
        let t = &self.config.train;

        let mask = &self.mask;
        let positives =
            sample_stratified(pos_bounds, t.max_positives, STROKE_POSITIVE, |x, y| {
                mask.code_at(x, y)
            });
        if positives.coords.len() < t.min_positives {
            log_info!(
                "{} positive samples (need {}); waiting for more paint",
                positives.coords.len(),
                t.min_positives
            );
            return;
        }
        self.estimated_positives = positives.estimated_total.max(positives.coords.len());

        let mut negatives = self.sample_stroke_negatives();
        self.top_up_negatives(&mut negatives, positives.coords.len(), false);

        log_info!(
            "training on {} positives / {} negatives (≈{} painted pixels)",
            positives.coords.len(),
            negatives.len(),
            self.estimated_positives
        );
        self.spawn_training(ModelSlot::Active, positives.coords, negatives);
    }

    // -- Growth controller -----------------------------------------------

    /// Step the suggestion outward one ring, computing it only if this is
    /// the first visit to that index.  A finished spare classifier takes
    /// over right before a newly computed ring, never mid-ring.
    pub fn grow_suggestion(&mut self) {
        let Some(active) = self.active_ring else {
            log_info!("grow ignored: no suggestion in progress");
            return;
        };
        let target = active + 1;
        if target < self.grower.rings().len() {
            self.active_ring = Some(target);
            return;
        }

        if let Some(spare) = self.spare.take() {
            log_info!("promoting spare classifier for deeper growth");
            self.model = Some(spare);
        }
        let Some(model) = self.model.clone() else {
            return;
        };
        let step = self.config.step();
        let reps = self.geometric_reps(self.grower.rings().len());
        let extractor =
            FeatureExtractor::new(self.master.as_ref(), &self.layers, self.config.patch_features);
        let cost = CostModel {
            labels: &self.labels,
            mask: &self.mask,
            model: model.as_ref(),
            extractor: &extractor,
            score_power: self.config.score_power,
            lock_labels: self.config.lock_labels,
        };
        self.grower.grow_batch(reps, &cost, step);
        self.active_ring = Some(self.grower.rings().len() - 1);
    }

    /// Step the suggestion inward one ring.  Earlier rings are retained, so
    /// this is always O(1) and re-growing is free.
    pub fn shrink_suggestion(&mut self) {
        if let Some(i) = self.active_ring
            && i > 0
        {
            self.active_ring = Some(i - 1);
        }
    }

    // -- Commit / undo ---------------------------------------------------

    /// Transfer the active ring into the label raster as `label`: within the
    /// ring's padded bounding box, every pixel whose cost is set and below
    /// the ring's frontier threshold is written.  Pixels barred by the lock
    /// flag or NO_DATA are left alone, so a commit can never clobber what an
    /// earlier commit produced.  Missing suggestion state makes this a
    /// silent no-op.
    pub fn commit(&mut self, label: u8) {
        if !is_writable_label(label) {
            log_warn!("commit ignored: {} is not a writable label code", label);
            return;
        }
        let Some(active) = self.active_ring else {
            log_info!("commit ignored: nothing suggested");
            return;
        };
        let Some(ring) = self.grower.ring(active) else {
            log_warn!("commit ignored: stale ring index {}", active);
            return;
        };
        let Some(threshold) = ring.threshold() else {
            log_info!("commit ignored: empty suggestion");
            return;
        };
        let (w, h) = self.master.dimensions();
        let step = self.config.step();
        let Some(bounds) = ring.bounds(step, w, h) else {
            return;
        };

        self.push_undo_snapshot();

        let lock = self.config.lock_labels;
        let mut written = 0usize;
        for y in bounds.min_y..bounds.max_y {
            for x in bounds.min_x..bounds.max_x {
                let v = self.grower.field().get(x, y) as f64;
                if v <= 0.0 || v >= threshold {
                    continue;
                }
                let existing = self.labels.get_pixel(x, y).0[0];
                if existing == NO_DATA || (lock && existing != UNLABELED) {
                    continue;
                }
                self.labels.put_pixel(x, y, Luma([label]));
                written += 1;
            }
        }
        log_info!("committed {} pixels as label {}", written, label);
        self.reset_cycle();
    }

    /// Restore the label raster to its state before the most recent commit.
    /// Returns false when there is nothing left to undo.
    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.undo_stack.pop_back() else {
            log_info!("nothing to undo");
            return false;
        };
        self.labels = previous;
        self.reset_cycle();
        true
    }

    /// Code every pixel of `color` as NO_DATA (e.g. a border fill the corner
    /// heuristic missed).  Undoable like a commit.
    pub fn mark_no_data_color(&mut self, color: Rgba<u8>) {
        self.push_undo_snapshot();
        let marked = mark_no_data(&self.master, &mut self.labels, color);
        log_info!("marked {} pixels of {:?} as no-data", marked, color);
        self.reset_cycle();
    }

    // -- Configuration toggles -------------------------------------------

    /// Toggle whether existing labels are locked against relabeling.  The
    /// current suggestion is rebuilt, since seed validity and passability
    /// both depend on the flag.
    pub fn set_lock_labels(&mut self, lock: bool) {
        if self.config.lock_labels == lock {
            return;
        }
        self.config.lock_labels = lock;
        if self.model.is_some() {
            self.rebuild_suggestion();
        }
    }

    /// Toggle pen-precision mode (stride-1 relaxation) and rebuild.
    pub fn set_precision_mode(&mut self, on: bool) {
        if self.config.precision_mode == on {
            return;
        }
        self.config.precision_mode = on;
        if self.model.is_some() {
            self.rebuild_suggestion();
        }
    }

    // -- Background-job pump ---------------------------------------------

    /// Drain finished background fits.  Returns true when the suggestion
    /// changed and the host should repaint.  Call once per frame.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(result) = self.receiver.try_recv() {
            changed |= self.absorb(result);
        }
        changed
    }

    /// Block until every in-flight fit has been absorbed.  For headless
    /// drivers and tests; interactive hosts use `poll`.
    pub fn wait_for_jobs(&mut self) {
        while self.pending_jobs > 0 {
            match self.receiver.recv() {
                Ok(result) => {
                    self.absorb(result);
                }
                Err(_) => break,
            }
        }
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending_jobs
    }

    // -- Read-only views for the display subsystem -----------------------

    pub fn width(&self) -> u32 {
        self.master.width()
    }

    pub fn height(&self) -> u32 {
        self.master.height()
    }

    pub fn labels(&self) -> &GrayImage {
        &self.labels
    }

    pub fn cost_field(&self) -> &CostField {
        self.grower.field()
    }

    pub fn mask(&self) -> &AnnotationMask {
        &self.mask
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn ring_count(&self) -> usize {
        self.grower.rings().len()
    }

    pub fn active_ring_index(&self) -> Option<usize> {
        self.active_ring
    }

    /// Frontier coordinates of the active ring, for outline rendering.
    pub fn active_frontier(&self) -> Option<Vec<(u32, u32)>> {
        let ring = self.grower.ring(self.active_ring?)?;
        Some(ring.coords().collect())
    }

    /// Extrapolated count of positively painted pixels this cycle.
    pub fn estimated_stroke_pixels(&self) -> usize {
        self.estimated_positives
    }

    /// Grayscale map of classifier confidence: 255 × P(background), the
    /// rendering the host offers as a "show classifier" overlay.  Pure
    /// per-pixel work, fanned out across rows.
    pub fn classifier_map(&self) -> Option<GrayImage> {
        let model = self.model.clone()?;
        let (w, h) = self.master.dimensions();
        let master = self.master.as_ref();
        let layers: &[(String, ScalarLayer)] = &self.layers;
        let patch = self.config.patch_features;

        let mut buf = vec![0u8; w as usize * h as usize];
        buf.par_chunks_mut(w as usize).enumerate().for_each(|(y, row)| {
            let extractor = FeatureExtractor::new(master, layers, patch);
            for (x, cell) in row.iter_mut().enumerate() {
                let p_background = 1.0 - model.predict(&extractor.features(x as u32, y as u32));
                *cell = (255.0 * p_background) as u8;
            }
        });
        GrayImage::from_raw(w, h, buf)
    }

    // -- Internals -------------------------------------------------------

    fn push_undo_snapshot(&mut self) {
        if self.undo_stack.len() >= self.config.undo_capacity.max(1) {
            self.undo_stack.pop_front();
        }
        self.undo_stack.push_back(self.labels.clone());
    }

    /// Reset everything ephemeral; bumping the tokens orphans any fit still
    /// in flight for the finished cycle.
    fn reset_cycle(&mut self) {
        self.mask.reset();
        self.grower.reset();
        self.active_ring = None;
        self.model = None;
        self.spare = None;
        self.estimated_positives = 0;
        self.active_token = self.active_token.wrapping_add(1);
        self.spare_token = self.spare_token.wrapping_add(1);
    }

    fn absorb(&mut self, result: TrainResult) -> bool {
        self.pending_jobs = self.pending_jobs.saturating_sub(1);
        let current = match result.slot {
            ModelSlot::Active => self.active_token,
            ModelSlot::Spare => self.spare_token,
        };
        if result.token != current {
            log_info!("discarding superseded {:?} training result", result.slot);
            return false;
        }
        match result.slot {
            ModelSlot::Active => {
                let Some(model) = result.model else {
                    log_warn!("classifier fit produced no model");
                    return false;
                };
                self.model = Some(Arc::new(model));
                self.rebuild_suggestion();
                self.spawn_spare_training();
                true
            }
            ModelSlot::Spare => {
                if let Some(model) = result.model {
                    self.spare = Some(Arc::new(model));
                }
                false
            }
        }
    }

    /// Seed from the current strokes and run the initial growth schedule:
    /// `interior_steps` fine batches that together cover roughly the painted
    /// area, then geometrically growing batches out to the default ring.
    fn rebuild_suggestion(&mut self) {
        self.grower.reset();
        self.active_ring = None;
        let Some(model) = self.model.clone() else {
            return;
        };
        let step = self.config.step();
        let planted = self.grower.seed(&self.mask, &self.labels, self.config.lock_labels, step);
        if planted == 0 {
            log_info!("every seed candidate was blocked; nothing to suggest");
            return;
        }

        let extractor =
            FeatureExtractor::new(self.master.as_ref(), &self.layers, self.config.patch_features);
        let cost = CostModel {
            labels: &self.labels,
            mask: &self.mask,
            model: model.as_ref(),
            extractor: &extractor,
            score_power: self.config.score_power,
            lock_labels: self.config.lock_labels,
        };

        let interior = self.config.interior_steps.max(1);
        let step_sq = (step * step) as usize;
        let interior_reps = self.estimated_positives / interior / step_sq.max(1);
        for _ in 0..interior {
            self.grower.grow_batch(interior_reps, &cost, step);
        }
        for _ in interior..=self.config.default_growth {
            let reps = self.geometric_reps(self.grower.rings().len());
            self.grower.grow_batch(reps, &cost, step);
        }
        self.active_ring = Some(self.config.default_growth.min(self.grower.rings().len() - 1));
        log_info!(
            "initial growth: {} rings, active {}",
            self.grower.rings().len(),
            self.config.default_growth
        );
    }

    /// Batch size for the ring that would be created at `new_ring_index`,
    /// increasing geometrically past the interior phase.
    fn geometric_reps(&self, new_ring_index: usize) -> usize {
        let k = new_ring_index.saturating_sub(self.config.interior_steps + 1);
        let est = self.estimated_positives.max(1) as f64;
        (est * self.config.growth_factor.powi(k as i32) * self.config.growth_rate) as usize
    }

    /// Painted negatives from the stroke bounds, budget-sampled.
    fn sample_stroke_negatives(&self) -> Vec<(u32, u32)> {
        let Some(bounds) = self.mask.negative_bounds() else {
            return Vec::new();
        };
        let mask = &self.mask;
        sample_stratified(
            bounds,
            self.config.train.max_negatives / 2,
            STROKE_NEGATIVE,
            |x, y| mask.code_at(x, y),
        )
        .coords
    }

    /// Grow the negative set to 2× the positives with uniformly random
    /// unpainted pixels.  Spare-model training additionally requires the
    /// pixel to be untouched by growth.
    fn top_up_negatives(
        &self,
        negatives: &mut Vec<(u32, u32)>,
        npos: usize,
        require_unreached: bool,
    ) {
        let (w, h) = self.master.dimensions();
        let want = (2 * npos).min(self.config.train.max_negatives);
        // LCG, deterministically seeded: reproducible sessions, no RNG crate.
        let mut state: u64 = (w as u64)
            .wrapping_mul(6364136223846793005)
            .wrapping_add((h as u64).wrapping_mul(982451653))
            .wrapping_add(npos as u64);
        let mut next = move || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            state >> 33
        };
        let mut attempts = 0usize;
        let budget = want * 20 + 1000;
        while negatives.len() < want && attempts < budget {
            attempts += 1;
            let x = (next() % w as u64) as u32;
            let y = (next() % h as u64) as u32;
            if self.mask.code_at(x, y) != STROKE_NONE {
                continue;
            }
            if require_unreached && self.grower.field().get(x, y) != 0.0 {
                continue;
            }
            negatives.push((x, y));
        }
    }

    fn spawn_training(
        &mut self,
        slot: ModelSlot,
        positives: Vec<(u32, u32)>,
        negatives: Vec<(u32, u32)>,
    ) {
        let token = match slot {
            ModelSlot::Active => {
                self.active_token = self.active_token.wrapping_add(1);
                self.active_token
            }
            ModelSlot::Spare => {
                self.spare_token = self.spare_token.wrapping_add(1);
                self.spare_token
            }
        };
        let master = Arc::clone(&self.master);
        let layers = Arc::clone(&self.layers);
        let params = self.config.train.clone();
        let patch = self.config.patch_features;
        let sender = self.sender.clone();
        self.pending_jobs += 1;

        rayon::spawn(move || {
            let fitted = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let extractor = FeatureExtractor::new(&master, &layers, patch);
                let pos_fvs: Vec<Vec<f64>> =
                    positives.iter().map(|&(x, y)| extractor.features(x, y)).collect();
                let neg_fvs: Vec<Vec<f64>> =
                    negatives.iter().map(|&(x, y)| extractor.features(x, y)).collect();
                train_two_pass(&pos_fvs, &neg_fvs, &params)
            }));
            let model = match fitted {
                Ok(m) => m,
                Err(_) => {
                    log_warn!("classifier fit panicked; treating as no model");
                    None
                }
            };
            let _ = sender.send(TrainResult { slot, token, model });
        });
    }

    /// Once a suggestion exists, opportunistically fit a second classifier
    /// from the newest ring's interior — weak positive evidence that helps
    /// when the user grows well beyond the painted area.
    fn spawn_spare_training(&mut self) {
        let Some(last) = self.grower.rings().last() else {
            return;
        };
        let Some(threshold) = last.threshold() else {
            return;
        };
        let (w, h) = self.master.dimensions();
        let step = self.config.step();
        let Some(bounds) = last.bounds(step, w, h) else {
            return;
        };

        let field = self.grower.field();
        let interior =
            sample_stratified(bounds, self.config.train.max_negatives, 1, |x, y| {
                let v = field.get(x, y) as f64;
                u8::from(v > 0.0 && v < threshold)
            });
        if interior.coords.len() < self.config.train.min_spare_positives {
            return;
        }

        let mut negatives = self.sample_stroke_negatives();
        self.top_up_negatives(&mut negatives, interior.coords.len(), true);
        log_info!(
            "spare fit queued: {} interior positives / {} negatives",
            interior.coords.len(),
            negatives.len()
        );
        self.spawn_training(ModelSlot::Spare, interior.coords, negatives);
    }
}
