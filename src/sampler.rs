// ============================================================================
// STRATIFIED SAMPLER — budgeted, spatially representative coordinate picking
// ============================================================================
//
// Collects up to `target` coordinates matching a pixel code from a bounding
// rectangle while visiting O(target) pixels, not O(area).  The rectangle is
// scanned at a power-of-two stride through a low-discrepancy ordering of the
// sub-grid offsets, so early stopping still leaves the matches spread across
// the whole rectangle instead of clustered at one edge.

use crate::raster::PixelRect;

/// Outcome of one sampling pass.
pub struct SampleSet {
    /// Matching coordinates, at most `target` of them.
    pub coords: Vec<(u32, u32)>,
    /// Tally of every visited pixel by code (codes clamped into 0..=3).
    pub histogram: [usize; 4],
    /// Total pixels visited; the denominator for extrapolation.
    pub visited: usize,
    /// `area × matches / visited` — extrapolated true match count for the
    /// rectangle.
    pub estimated_total: usize,
}

impl SampleSet {
    fn empty() -> Self {
        Self { coords: Vec::new(), histogram: [0; 4], visited: 0, estimated_total: 0 }
    }
}

/// Sample up to `target` coordinates inside `bounds` whose `classify` code
/// equals `want`.
///
/// Returns fewer than `target` only when the rectangle genuinely holds fewer
/// matches.  Work scales with `target`: the scan stride is chosen so one full
/// sub-grid pass visits about `target / 50` pixels.
pub fn sample_stratified(
    bounds: PixelRect,
    target: usize,
    want: u8,
    classify: impl Fn(u32, u32) -> u8,
) -> SampleSet {
    let mut out = SampleSet::empty();
    if bounds.is_empty() || target == 0 {
        return out;
    }
    let area = bounds.area();

    // Smallest power-of-two stride with area / L² ≤ target / 50, i.e. one
    // offset pass stays well under the sample budget.
    let quota = (target / 50) as u64;
    let mut stride = 1u64;
    while area / (stride * stride) > quota {
        stride *= 2;
    }
    let stride = stride.min(u32::MAX as u64) as u32;

    // Offsets are generated lazily, one refinement level at a time: each
    // level copies all previous offsets shifted by half the previous
    // separation into three of the four quadrant directions.
    let mut offsets: Vec<(u32, u32)> = vec![(0, 0)];
    let mut level = 0u32;
    let mut next = 0usize;
    let mut done = false;

    while !done {
        if next == offsets.len() {
            let filled = 4u64.saturating_pow(level);
            if filled >= stride as u64 * stride as u64 {
                break; // every sub-grid cell has an offset
            }
            let sep = stride / 2u32.pow(level + 1);
            let block = offsets.len().min(filled as usize);
            extend_offsets(&mut offsets, block, sep, sep);
            extend_offsets(&mut offsets, block, sep, 0);
            extend_offsets(&mut offsets, block, 0, sep);
            level += 1;
        }
        let (ox, oy) = offsets[next];
        next += 1;

        let mut base_y = bounds.min_y;
        'pass: while base_y < bounds.max_y {
            let y = base_y + oy;
            if y < bounds.max_y {
                let mut base_x = bounds.min_x;
                while base_x < bounds.max_x {
                    let x = base_x + ox;
                    if x < bounds.max_x {
                        let code = classify(x, y).min(3);
                        out.histogram[code as usize] += 1;
                        out.visited += 1;
                        if code == want {
                            out.coords.push((x, y));
                            if out.coords.len() >= target {
                                done = true;
                                break 'pass;
                            }
                        }
                    }
                    base_x = base_x.saturating_add(stride);
                }
            }
            base_y = base_y.saturating_add(stride);
        }
    }

    if out.visited > 0 {
        out.estimated_total =
            (area as u128 * out.histogram[want as usize] as u128 / out.visited as u128) as usize;
    }
    out
}

/// Append copies of the first `block` offsets, shifted by (dx, dy).
fn extend_offsets(offsets: &mut Vec<(u32, u32)>, block: usize, dx: u32, dy: u32) {
    for i in 0..block {
        let (x, y) = offsets[i];
        offsets.push((x + dx, y + dy));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exact_target_on_dense_region() {
        let bounds = PixelRect::new(0, 0, 100, 100);
        let got = sample_stratified(bounds, 50, 1, |_, _| 1);

        assert_eq!(got.coords.len(), 50);
        // Budget: far fewer visits than the 10,000-pixel area.
        assert!(got.visited <= 1000, "visited {} pixels", got.visited);
    }

    #[test]
    fn spreads_across_the_region() {
        let bounds = PixelRect::new(0, 0, 100, 100);
        let got = sample_stratified(bounds, 50, 1, |_, _| 1);

        let left = got.coords.iter().filter(|&&(x, _)| x < 50).count();
        let right = got.coords.len() - left;
        assert!(left >= 5 && right >= 5, "clustered: {} / {}", left, right);
        let top = got.coords.iter().filter(|&&(_, y)| y < 50).count();
        assert!(top >= 5 && got.coords.len() - top >= 5);
    }

    #[test]
    fn returns_all_matches_when_fewer_than_target() {
        let bounds = PixelRect::new(0, 0, 64, 64);
        // Only one matching row of 64 pixels.
        let got = sample_stratified(bounds, 4000, 1, |_, y| u8::from(y == 10));
        assert_eq!(got.coords.len(), 64);
        assert!(got.coords.iter().all(|&(_, y)| y == 10));
    }

    #[test]
    fn extrapolates_total_from_histogram() {
        let bounds = PixelRect::new(0, 0, 128, 128);
        // Left half matches: true total is 8192.
        let got = sample_stratified(bounds, 200, 1, |x, _| u8::from(x < 64));
        assert!(
            got.estimated_total > 4000 && got.estimated_total < 12500,
            "estimate {} is far from 8192",
            got.estimated_total
        );
    }

    #[test]
    fn empty_region_yields_nothing() {
        let got = sample_stratified(PixelRect::new(5, 5, 5, 9), 100, 1, |_, _| 1);
        assert!(got.coords.is_empty());
        assert_eq!(got.visited, 0);
        assert_eq!(got.estimated_total, 0);
    }
}
