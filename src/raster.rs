// ============================================================================
// RASTER TYPES — label codes, annotation mask, cost field
// ============================================================================

use image::{GrayImage, ImageBuffer, Luma, Rgba, RgbaImage};

// -- Label raster pixel codes -------------------------------------------

pub const UNLABELED: u8 = 0;
pub const NO_DATA: u8 = 1;
pub const NEGATIVE: u8 = 2;
pub const POSITIVE: u8 = 3;
/// Extra class codes: CLASS_3 = 4 through CLASS_14 = 15, addressed by the
/// host's keybindings.
pub const CLASS_3: u8 = 4;
pub const CLASS_14: u8 = 15;

/// True for every code a commit may write.
pub fn is_writable_label(code: u8) -> bool {
    code != NO_DATA && code <= CLASS_14
}

// -- Annotation (fresh stroke) pixel codes ------------------------------

pub const STROKE_NONE: u8 = 0;
pub const STROKE_POSITIVE: u8 = 1;
pub const STROKE_NEGATIVE: u8 = 2;

/// Optional per-pixel scalar layer (elevation, NDVI, ...), same dimensions
/// as the master raster.
pub type ScalarLayer = ImageBuffer<Luma<f32>, Vec<f32>>;

// ============================================================================
// PIXEL RECT — inclusive-min / exclusive-max bounding rectangle
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl PixelRect {
    pub fn new(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> u32 {
        self.max_x.saturating_sub(self.min_x)
    }

    pub fn height(&self) -> u32 {
        self.max_y.saturating_sub(self.min_y)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.min_x >= self.max_x || self.min_y >= self.max_y
    }

    /// Grow to cover (x, y).
    pub fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x + 1);
        self.max_y = self.max_y.max(y + 1);
    }

    /// Pad by `margin` on every side, clamped to `w × h`.
    pub fn padded(&self, margin: u32, w: u32, h: u32) -> Self {
        Self {
            min_x: self.min_x.saturating_sub(margin),
            min_y: self.min_y.saturating_sub(margin),
            max_x: (self.max_x + margin).min(w),
            max_y: (self.max_y + margin).min(h),
        }
    }

    fn seed(x: u32, y: u32) -> Self {
        Self { min_x: x, min_y: y, max_x: x + 1, max_y: y + 1 }
    }
}

// ============================================================================
// ANNOTATION MASK — ephemeral per-cycle stroke raster
// ============================================================================

/// Fresh-paint mask for the current interaction cycle.  The painting
/// subsystem rasterizes brush strokes into it via `paint_disc` /
/// `erase_disc`; the engine reads codes, per-class bounds, and the recorded
/// positive brush centers (seed candidates for growth).
pub struct AnnotationMask {
    mask: GrayImage,
    positive_bounds: Option<PixelRect>,
    negative_bounds: Option<PixelRect>,
    seed_candidates: Vec<(u32, u32)>,
}

impl AnnotationMask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::new(width, height),
            positive_bounds: None,
            negative_bounds: None,
            seed_candidates: Vec::with_capacity(1000),
        }
    }

    pub fn width(&self) -> u32 {
        self.mask.width()
    }

    pub fn height(&self) -> u32 {
        self.mask.height()
    }

    /// Clear all strokes; called at the start of every interaction cycle.
    pub fn reset(&mut self) {
        for p in self.mask.pixels_mut() {
            p.0[0] = STROKE_NONE;
        }
        self.positive_bounds = None;
        self.negative_bounds = None;
        self.seed_candidates.clear();
    }

    pub fn code_at(&self, x: u32, y: u32) -> u8 {
        self.mask.get_pixel(x, y).0[0]
    }

    pub fn positive_bounds(&self) -> Option<PixelRect> {
        self.positive_bounds
    }

    pub fn negative_bounds(&self) -> Option<PixelRect> {
        self.negative_bounds
    }

    /// Brush-center points of positive strokes, in paint order.
    pub fn seed_candidates(&self) -> &[(u32, u32)] {
        &self.seed_candidates
    }

    /// True when not a single positive pixel has been painted.
    pub fn has_positive_paint(&self) -> bool {
        self.positive_bounds.is_some()
    }

    /// Stamp a filled brush disc of `code` centered at (`cx`, `cy`).
    /// Positive discs also record their center as a growth-seed candidate.
    pub fn paint_disc(&mut self, cx: f32, cy: f32, radius: f32, code: u8) {
        let (w, h) = self.mask.dimensions();
        let r = radius.max(0.5);
        let min_x = (cx - r).floor().max(0.0) as u32;
        let min_y = (cy - r).floor().max(0.0) as u32;
        let max_x = ((cx + r).ceil() as i64).clamp(0, w as i64) as u32;
        let max_y = ((cy + r).ceil() as i64).clamp(0, h as i64) as u32;
        if min_x >= max_x || min_y >= max_y {
            return;
        }

        let r2 = r * r;
        for y in min_y..max_y {
            for x in min_x..max_x {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy > r2 {
                    continue;
                }
                self.mask.put_pixel(x, y, Luma([code]));
                match code {
                    STROKE_POSITIVE => include_in(&mut self.positive_bounds, x, y),
                    STROKE_NEGATIVE => include_in(&mut self.negative_bounds, x, y),
                    _ => {}
                }
            }
        }

        if code == STROKE_POSITIVE {
            let sx = (cx as i64).clamp(0, w as i64 - 1) as u32;
            let sy = (cy as i64).clamp(0, h as i64 - 1) as u32;
            self.seed_candidates.push((sx, sy));
        }
    }

    /// Remove paint of either polarity under the disc.
    pub fn erase_disc(&mut self, cx: f32, cy: f32, radius: f32) {
        self.paint_disc(cx, cy, radius, STROKE_NONE);
    }
}

fn include_in(bounds: &mut Option<PixelRect>, x: u32, y: u32) {
    match bounds {
        Some(r) => r.include(x, y),
        None => *bounds = Some(PixelRect::seed(x, y)),
    }
}

// ============================================================================
// COST FIELD — dense traversal-cost grid, written only by the grower
// ============================================================================

/// Dense grid of cumulative traversal costs.  `0.0` means "not yet
/// computed"; set cells are strictly positive and are never unset except by
/// `reset`.  One allocation for the whole session.
pub struct CostField {
    width: u32,
    height: u32,
    cells: Vec<f32>,
}

impl CostField {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![0.0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn reset(&mut self) {
        self.cells.fill(0.0);
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.cells[(y * self.width + x) as usize]
    }

    /// Broadcast-fill the `step × step` block anchored at (x, y), clamped at
    /// the raster edge.  The block write is both the coverage accelerator for
    /// huge rasters and the "already visited" marker for relaxation.
    pub fn fill_block(&mut self, x: u32, y: u32, step: u32, cost: f32) {
        let max_x = (x + step).min(self.width);
        let max_y = (y + step).min(self.height);
        for yy in y..max_y {
            let row = (yy * self.width) as usize;
            for xx in x..max_x {
                self.cells[row + xx as usize] = cost;
            }
        }
    }
}

// ============================================================================
// NO-DATA DETECTION
// ============================================================================

/// If all four corners of the master raster share one color, code every pixel
/// of that color as NO_DATA in the label raster.  Partially scanned or
/// rotated imagery ships with a uniform border fill; without this, growth
/// happily floods into it.
///
/// Returns the number of pixels marked.
pub fn fill_no_data_by_corner_color(master: &RgbaImage, labels: &mut GrayImage) -> usize {
    let (w, h) = master.dimensions();
    if w == 0 || h == 0 {
        return 0;
    }
    let corners = [(0, 0), (0, h - 1), (w - 1, h - 1), (w - 1, 0)];
    let reference = *master.get_pixel(0, 0);
    if corners.iter().any(|&(x, y)| *master.get_pixel(x, y) != reference) {
        return 0;
    }
    mark_no_data(master, labels, reference)
}

/// Code every master pixel exactly matching `color` as NO_DATA, leaving
/// already-labeled pixels alone.  Returns the number of pixels marked.
pub fn mark_no_data(master: &RgbaImage, labels: &mut GrayImage, color: Rgba<u8>) -> usize {
    let (w, h) = master.dimensions();
    let mut marked = 0usize;
    for y in 0..h {
        for x in 0..w {
            if *master.get_pixel(x, y) == color && labels.get_pixel(x, y).0[0] == UNLABELED {
                labels.put_pixel(x, y, Luma([NO_DATA]));
                marked += 1;
            }
        }
    }
    marked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paint_disc_sets_codes_and_bounds() {
        let mut mask = AnnotationMask::new(32, 32);
        mask.paint_disc(10.0, 10.0, 3.0, STROKE_POSITIVE);

        assert_eq!(mask.code_at(10, 10), STROKE_POSITIVE);
        assert_eq!(mask.code_at(0, 0), STROKE_NONE);
        assert_eq!(mask.seed_candidates(), &[(10, 10)]);

        let b = mask.positive_bounds().unwrap();
        assert!(b.min_x >= 7 && b.max_x <= 14);
        assert!(b.min_y >= 7 && b.max_y <= 14);
    }

    #[test]
    fn erase_removes_paint() {
        let mut mask = AnnotationMask::new(32, 32);
        mask.paint_disc(10.0, 10.0, 3.0, STROKE_POSITIVE);
        mask.erase_disc(10.0, 10.0, 4.0);
        assert_eq!(mask.code_at(10, 10), STROKE_NONE);
        // Bounds are a sampling hint and may stay stale; codes are the truth.
    }

    #[test]
    fn paint_disc_clamps_at_edges() {
        let mut mask = AnnotationMask::new(16, 16);
        mask.paint_disc(0.0, 0.0, 5.0, STROKE_NEGATIVE);
        assert_eq!(mask.code_at(0, 0), STROKE_NEGATIVE);
        mask.paint_disc(40.0, 40.0, 3.0, STROKE_POSITIVE); // fully outside
        assert!(mask.positive_bounds().is_none());
    }

    #[test]
    fn block_fill_clamps_and_marks() {
        let mut field = CostField::new(10, 10);
        field.fill_block(8, 8, 3, 2.5);
        assert_eq!(field.get(8, 8), 2.5);
        assert_eq!(field.get(9, 9), 2.5);
        assert_eq!(field.get(7, 8), 0.0);
    }

    #[test]
    fn corner_fill_requires_agreeing_corners() {
        let mut master = RgbaImage::from_pixel(8, 8, Rgba([9, 9, 9, 255]));
        let mut labels = GrayImage::new(8, 8);
        master.put_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let marked = fill_no_data_by_corner_color(&master, &mut labels);
        assert_eq!(marked, 63);
        assert_eq!(labels.get_pixel(0, 0).0[0], NO_DATA);
        assert_eq!(labels.get_pixel(4, 4).0[0], UNLABELED);

        // Disagreeing corners: leave everything alone.
        master.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        let mut labels2 = GrayImage::new(8, 8);
        assert_eq!(fill_no_data_by_corner_color(&master, &mut labels2), 0);
    }
}
