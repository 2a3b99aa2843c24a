// ============================================================================
// COST FIELD BUILDER — seeding, edge costs, incremental ring growth
// ============================================================================
//
// Growth is Dijkstra on a coarsened lattice: nodes live on a `step`-stride
// grid, and every relaxed node broadcast-fills its `step × step` block of the
// cost field, which is simultaneously the coverage accelerator for huge
// rasters and the "already visited" test.  Growth never runs to convergence;
// it advances in batches, and each batch freezes the resulting frontier as an
// immutable ring.  Earlier rings are never mutated, so the suggestion can be
// shrunk and re-grown without recomputation.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use image::GrayImage;

use crate::classifier::Classifier;
use crate::features::FeatureExtractor;
use crate::raster::{
    AnnotationMask, CostField, PixelRect, NO_DATA, STROKE_NEGATIVE, STROKE_POSITIVE, UNLABELED,
};

/// Seed insertion cost: a small positive epsilon rather than zero, so heap
/// ordering stays well-defined and `cost > 0` keeps meaning "visited".
pub const SEED_COST: f64 = 1e-4;

/// Traversal cost of a freshly painted positive pixel.
const POSITIVE_STROKE_COST: f64 = 1e-4;

// ============================================================================
// FRONTIER
// ============================================================================

/// One frontier entry.  Ordered as a min-heap by cost (ties broken on
/// coordinates so growth is deterministic).
#[derive(Clone, Copy, Debug)]
pub struct FrontierNode {
    pub cost: f64,
    pub x: u32,
    pub y: u32,
}

impl Ord for FrontierNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.x.cmp(&self.x))
            .then_with(|| other.y.cmp(&self.y))
    }
}

impl PartialOrd for FrontierNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FrontierNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierNode {}

/// Immutable snapshot of the search frontier after one growth batch.
#[derive(Clone)]
pub struct GrowthRing {
    frontier: BinaryHeap<FrontierNode>,
}

impl GrowthRing {
    /// The cost this ring would pop next if grown further — the operative
    /// boundary of what the ring currently covers.
    pub fn threshold(&self) -> Option<f64> {
        self.frontier.peek().map(|n| n.cost)
    }

    pub fn len(&self) -> usize {
        self.frontier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frontier.is_empty()
    }

    /// Frontier coordinates, for outline rendering.  Unordered.
    pub fn coords(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.frontier.iter().map(|n| (n.x, n.y))
    }

    /// Bounding box of the frontier, padded by `margin` and clamped to
    /// `w × h`.  `None` for an empty frontier.
    pub fn bounds(&self, margin: u32, w: u32, h: u32) -> Option<PixelRect> {
        let mut it = self.frontier.iter();
        let first = it.next()?;
        let mut rect = PixelRect::new(first.x, first.y, first.x + 1, first.y + 1);
        for n in it {
            rect.include(n.x, n.y);
        }
        Some(rect.padded(margin, w, h))
    }
}

// ============================================================================
// EDGE COSTS
// ============================================================================

/// Everything the per-pixel traversal cost depends on, threaded explicitly so
/// growth is a pure function of (rasters, strokes, config).
pub struct CostModel<'a> {
    pub labels: &'a GrayImage,
    pub mask: &'a AnnotationMask,
    pub model: &'a dyn Classifier,
    pub extractor: &'a FeatureExtractor<'a>,
    pub score_power: f64,
    pub lock_labels: bool,
}

impl CostModel<'_> {
    /// Cost of stepping onto (x, y).  Infinite cells never enter a frontier.
    pub fn edge_cost(&self, x: u32, y: u32) -> f64 {
        let label = self.labels.get_pixel(x, y).0[0];
        if label == NO_DATA {
            return f64::INFINITY;
        }
        if self.lock_labels && label != UNLABELED {
            return f64::INFINITY;
        }
        match self.mask.code_at(x, y) {
            STROKE_NEGATIVE => f64::INFINITY,
            STROKE_POSITIVE => POSITIVE_STROKE_COST,
            _ => {
                let p_background = 1.0 - self.model.predict(&self.extractor.features(x, y));
                p_background.powf(self.score_power)
            }
        }
    }
}

// ============================================================================
// GROWER
// ============================================================================

/// Owns the cost field and the ring list; the only writer of either.
pub struct CostGrower {
    field: CostField,
    rings: Vec<GrowthRing>,
}

impl CostGrower {
    pub fn new(width: u32, height: u32) -> Self {
        Self { field: CostField::new(width, height), rings: Vec::new() }
    }

    pub fn field(&self) -> &CostField {
        &self.field
    }

    pub fn rings(&self) -> &[GrowthRing] {
        &self.rings
    }

    pub fn ring(&self, index: usize) -> Option<&GrowthRing> {
        self.rings.get(index)
    }

    /// Discard the cost field and every ring; start of a new cycle.
    pub fn reset(&mut self) {
        self.field.reset();
        self.rings.clear();
    }

    /// Build ring 0 from the positive brush centers.  Candidates are snapped
    /// to the stride grid and kept only if they are not barred by existing
    /// labels, not NO_DATA, and still positive in the mask (strokes can be
    /// erased mid-gesture).  Returns the number of seeds planted; zero seeds
    /// still produce an (empty) ring 0, and growth is then a no-op.
    pub fn seed(
        &mut self,
        mask: &AnnotationMask,
        labels: &GrayImage,
        lock_labels: bool,
        step: u32,
    ) -> usize {
        let mut frontier = BinaryHeap::with_capacity(mask.seed_candidates().len());
        for &(sx, sy) in mask.seed_candidates() {
            let x = sx - sx % step;
            let y = sy - sy % step;
            if self.field.get(x, y) != 0.0 {
                continue; // another candidate already seeded this cell
            }
            let label = labels.get_pixel(x, y).0[0];
            if label == NO_DATA {
                continue;
            }
            if lock_labels && label != UNLABELED {
                continue;
            }
            if mask.code_at(x, y) != STROKE_POSITIVE {
                continue;
            }
            frontier.push(FrontierNode { cost: SEED_COST, x, y });
            self.field.fill_block(x, y, step, SEED_COST as f32);
        }
        let planted = frontier.len();
        self.rings.push(GrowthRing { frontier });
        planted
    }

    /// Clone the newest ring's frontier, run `reps` pop/relax repetitions,
    /// and append the result as a new ring.  Standard 4-connected Dijkstra at
    /// stride `step`; a neighbor whose cost-field block is already set is
    /// skipped, an infinite-cost neighbor is never pushed.
    pub fn grow_batch(&mut self, reps: usize, cost: &CostModel<'_>, step: u32) {
        let Some(prev) = self.rings.last() else {
            return;
        };
        let mut frontier = prev.frontier.clone();
        let (w, h) = (self.field.width(), self.field.height());

        for _ in 0..reps {
            let Some(node) = frontier.pop() else {
                break; // searched everything reachable
            };
            for (nx, ny) in stride_neighbors(node.x, node.y, step, w, h) {
                if self.field.get(nx, ny) != 0.0 {
                    continue;
                }
                let edge = cost.edge_cost(nx, ny);
                if !edge.is_finite() {
                    continue;
                }
                let total = node.cost + edge;
                frontier.push(FrontierNode { cost: total, x: nx, y: ny });
                self.field.fill_block(nx, ny, step, total as f32);
            }
        }
        self.rings.push(GrowthRing { frontier });
    }
}

/// In-bounds 4-neighbors at the given stride.
fn stride_neighbors(x: u32, y: u32, step: u32, w: u32, h: u32) -> impl Iterator<Item = (u32, u32)> {
    let candidates = [
        (x as i64 + step as i64, y as i64),
        (x as i64 - step as i64, y as i64),
        (x as i64, y as i64 + step as i64),
        (x as i64, y as i64 - step as i64),
    ];
    candidates
        .into_iter()
        .filter(move |&(cx, cy)| cx >= 0 && cy >= 0 && cx < w as i64 && cy < h as i64)
        .map(|(cx, cy)| (cx as u32, cy as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::STROKE_POSITIVE;
    use image::RgbaImage;

    /// Classifier stub: constant positive probability everywhere.
    struct Flat(f64);

    impl Classifier for Flat {
        fn predict(&self, _fv: &[f64]) -> f64 {
            self.0
        }
    }

    fn fixtures(w: u32, h: u32) -> (RgbaImage, Vec<(String, crate::raster::ScalarLayer)>, GrayImage) {
        (RgbaImage::new(w, h), Vec::new(), GrayImage::new(w, h))
    }

    #[test]
    fn seeding_snaps_filters_and_block_fills() {
        let (_master, _layers, labels) = fixtures(30, 30);
        let mut mask = AnnotationMask::new(30, 30);
        mask.paint_disc(10.0, 10.0, 4.0, STROKE_POSITIVE);

        let mut grower = CostGrower::new(30, 30);
        let planted = grower.seed(&mask, &labels, true, 3);
        assert_eq!(planted, 1);
        assert_eq!(grower.rings().len(), 1);

        // (10, 10) snaps to (9, 9); the 3×3 block is stamped.
        assert_eq!(grower.field().get(9, 9), SEED_COST as f32);
        assert_eq!(grower.field().get(11, 11), SEED_COST as f32);
        assert_eq!(grower.field().get(12, 12), 0.0);
    }

    #[test]
    fn erased_strokes_plant_no_seeds() {
        let (_, _, labels) = fixtures(30, 30);
        let mut mask = AnnotationMask::new(30, 30);
        mask.paint_disc(10.0, 10.0, 4.0, STROKE_POSITIVE);
        mask.erase_disc(10.0, 10.0, 6.0);

        let mut grower = CostGrower::new(30, 30);
        assert_eq!(grower.seed(&mask, &labels, true, 3), 0);
        assert!(grower.rings()[0].is_empty());

        // Growth from an empty ring is a no-op, not a crash.
        let master = RgbaImage::new(30, 30);
        let layers = Vec::new();
        let extractor = FeatureExtractor::new(&master, &layers, false);
        let flat = Flat(0.5);
        let cost = CostModel {
            labels: &labels,
            mask: &mask,
            model: &flat,
            extractor: &extractor,
            score_power: 3.0,
            lock_labels: true,
        };
        grower.grow_batch(50, &cost, 3);
        assert!(grower.rings()[1].is_empty());
    }

    #[test]
    fn locked_labels_and_no_data_are_impassable() {
        let (master, layers, mut labels) = fixtures(30, 30);
        labels.put_pixel(15, 9, image::Luma([crate::raster::POSITIVE]));
        labels.put_pixel(9, 15, image::Luma([NO_DATA]));

        let mut mask = AnnotationMask::new(30, 30);
        mask.paint_disc(10.0, 10.0, 2.0, STROKE_POSITIVE);

        let extractor = FeatureExtractor::new(&master, &layers, false);
        let flat = Flat(0.5);
        let cost = CostModel {
            labels: &labels,
            mask: &mask,
            model: &flat,
            extractor: &extractor,
            score_power: 3.0,
            lock_labels: true,
        };
        assert!(cost.edge_cost(15, 9).is_infinite());
        assert!(cost.edge_cost(9, 15).is_infinite());

        let mut grower = CostGrower::new(30, 30);
        grower.seed(&mask, &labels, true, 3);
        grower.grow_batch(200, &cost, 3);

        // Relaxation walked around the barriers, never onto them.
        assert_eq!(grower.field().get(15, 9), 0.0);
        assert_eq!(grower.field().get(9, 15), 0.0);
    }

    #[test]
    fn relabel_mode_passes_labels_but_not_no_data() {
        let (master, layers, mut labels) = fixtures(12, 12);
        labels.put_pixel(6, 3, image::Luma([crate::raster::NEGATIVE]));
        labels.put_pixel(3, 6, image::Luma([NO_DATA]));
        let mask = AnnotationMask::new(12, 12);
        let extractor = FeatureExtractor::new(&master, &layers, false);
        let flat = Flat(0.5);
        let cost = CostModel {
            labels: &labels,
            mask: &mask,
            model: &flat,
            extractor: &extractor,
            score_power: 3.0,
            lock_labels: false,
        };
        assert!(cost.edge_cost(6, 3).is_finite());
        assert!(cost.edge_cost(3, 6).is_infinite());
    }

    #[test]
    fn frontier_costs_never_decrease_and_nest() {
        let (master, layers, labels) = fixtures(60, 60);
        let mut mask = AnnotationMask::new(60, 60);
        mask.paint_disc(30.0, 30.0, 4.0, STROKE_POSITIVE);

        let extractor = FeatureExtractor::new(&master, &layers, false);
        let flat = Flat(0.3); // background probability 0.7 everywhere
        let cost = CostModel {
            labels: &labels,
            mask: &mask,
            model: &flat,
            extractor: &extractor,
            score_power: 3.0,
            lock_labels: true,
        };

        let mut grower = CostGrower::new(60, 60);
        grower.seed(&mask, &labels, true, 3);

        let mut prev_threshold = 0.0f64;
        let mut prev_visited = 0usize;
        for _ in 0..5 {
            grower.grow_batch(20, &cost, 3);
            let ring = grower.rings().last().unwrap();
            let threshold = ring.threshold().unwrap();
            assert!(threshold >= prev_threshold, "frontier went backwards");
            prev_threshold = threshold;

            let visited = (0..60u32)
                .flat_map(|y| (0..60u32).map(move |x| (x, y)))
                .filter(|&(x, y)| grower.field().get(x, y) > 0.0)
                .count();
            assert!(visited >= prev_visited, "visited set must only grow");
            prev_visited = visited;
        }
        assert!(prev_visited > 9, "growth never left the seed block");
    }

    #[test]
    fn earlier_rings_survive_later_growth() {
        let (master, layers, labels) = fixtures(40, 40);
        let mut mask = AnnotationMask::new(40, 40);
        mask.paint_disc(20.0, 20.0, 3.0, STROKE_POSITIVE);

        let extractor = FeatureExtractor::new(&master, &layers, false);
        let flat = Flat(0.5);
        let cost = CostModel {
            labels: &labels,
            mask: &mask,
            model: &flat,
            extractor: &extractor,
            score_power: 3.0,
            lock_labels: true,
        };

        let mut grower = CostGrower::new(40, 40);
        grower.seed(&mask, &labels, true, 3);
        grower.grow_batch(10, &cost, 3);
        let ring1_len = grower.rings()[1].len();
        let ring1_threshold = grower.rings()[1].threshold();

        grower.grow_batch(25, &cost, 3);
        assert_eq!(grower.rings().len(), 3);
        assert_eq!(grower.rings()[1].len(), ring1_len);
        assert_eq!(grower.rings()[1].threshold(), ring1_threshold);
    }
}
