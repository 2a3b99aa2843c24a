// ============================================================================
// CLASSIFIER — trainable binary probabilistic pixel model
// ============================================================================
//
// The growth pipeline only needs one capability: a probability per feature
// vector.  The `Classifier` trait is that seam; `LogisticModel` is the
// current implementation, an L2-regularized logistic regression fitted by
// gradient descent over standardized features.
//
// Class convention, fixed here and relied on by the cost function:
// class 1 = positive (foreground), class 0 = negative (background).
// `predict` returns P(class 1); background probability is `1 − predict`.

use ndarray::{Array1, Array2, Axis};

use crate::config::TrainParams;

/// Probabilities are clamped away from 0 and 1 so no downstream power or
/// logarithm ever sees an exact extreme.
const PROB_FLOOR: f64 = 1e-7;

/// A fitted binary probabilistic classifier.
pub trait Classifier: Send + Sync {
    /// P(class 1 = positive) for the given feature vector.
    fn predict(&self, fv: &[f64]) -> f64;
}

/// Logistic regression over standardized features.
#[derive(Clone, Debug)]
pub struct LogisticModel {
    weights: Array1<f64>,
    bias: f64,
    feat_mean: Array1<f64>,
    feat_scale: Array1<f64>,
}

impl Classifier for LogisticModel {
    fn predict(&self, fv: &[f64]) -> f64 {
        let mut z = self.bias;
        for (k, &v) in fv.iter().enumerate().take(self.weights.len()) {
            z += self.weights[k] * (v - self.feat_mean[k]) / self.feat_scale[k];
        }
        sigmoid(z).clamp(PROB_FLOOR, 1.0 - PROB_FLOOR)
    }
}

/// Fit with two-pass noise suppression.
///
/// Strokes are imprecise near the true region boundary, so some "negative"
/// samples are actually positive ground.  Pass one fits on everything and
/// scores the positives; their mean predicted positive-probability becomes a
/// cutoff, and negatives scoring above it (negatives that look too positive)
/// are dropped from the refit.
///
/// Returns `None` only for structurally unusable input (an empty class or
/// ragged feature vectors) — sample-count minimums are the caller's call.
pub fn train_two_pass(
    positives: &[Vec<f64>],
    negatives: &[Vec<f64>],
    params: &TrainParams,
) -> Option<LogisticModel> {
    let first = fit_logistic(positives, negatives, params, params.first_pass_iters)?;

    let cutoff = positives.iter().map(|fv| first.predict(fv)).sum::<f64>()
        / positives.len() as f64;

    let kept: Vec<Vec<f64>> = negatives
        .iter()
        .filter(|fv| first.predict(fv) < cutoff)
        .cloned()
        .collect();
    if kept.is_empty() {
        // Every negative scored above the cutoff; nothing left to refine on.
        return Some(first);
    }

    fit_logistic(positives, &kept, params, params.refit_iters)
}

/// Single gradient-descent fit; positives first in the design matrix.
fn fit_logistic(
    positives: &[Vec<f64>],
    negatives: &[Vec<f64>],
    params: &TrainParams,
    max_iters: usize,
) -> Option<LogisticModel> {
    if positives.is_empty() || negatives.is_empty() {
        return None;
    }
    let d = positives[0].len();
    if d == 0 || positives.iter().chain(negatives).any(|fv| fv.len() != d) {
        return None;
    }
    let npos = positives.len();
    let n = npos + negatives.len();

    let mut x = Array2::<f64>::zeros((n, d));
    for (i, fv) in positives.iter().chain(negatives).enumerate() {
        for (j, &v) in fv.iter().enumerate() {
            x[[i, j]] = v;
        }
    }
    let y = Array1::from_shape_fn(n, |i| if i < npos { 1.0 } else { 0.0 });

    // Standardize columns; a constant column gets scale 1 and contributes
    // nothing beyond the bias.
    let mean = x.mean_axis(Axis(0))?;
    let mut scale = x.std_axis(Axis(0), 0.0);
    scale.mapv_inplace(|s| if s < 1e-9 { 1.0 } else { s });
    let xs = (&x - &mean) / &scale;

    let nf = n as f64;
    let lr = 0.5;
    let mut w = Array1::<f64>::zeros(d);
    let mut b = 0.0f64;
    for _ in 0..max_iters {
        let p = (xs.dot(&w) + b).mapv(sigmoid);
        let err = &p - &y;
        let grad_w = xs.t().dot(&err) / nf + &w * (params.lambda / nf);
        let grad_b = err.sum() / nf;

        let gmax = grad_w.iter().fold(grad_b.abs(), |m, g| m.max(g.abs()));
        if gmax < params.tolerance {
            break;
        }
        w = w - grad_w * lr;
        b -= lr * grad_b;
    }

    Some(LogisticModel { weights: w, bias: b, feat_mean: mean, feat_scale: scale })
}

#[inline]
fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(center: &[f64], count: usize, spread: f64) -> Vec<Vec<f64>> {
        // Deterministic jitter; no RNG needed for a separability test.
        (0..count)
            .map(|i| {
                center
                    .iter()
                    .enumerate()
                    .map(|(k, &c)| c + spread * (((i * 7 + k * 3) % 11) as f64 / 11.0 - 0.5))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn separable_clusters_classify_confidently() {
        let pos = cluster(&[0.9, 0.8, 0.1], 60, 0.05);
        let neg = cluster(&[0.1, 0.2, 0.9], 120, 0.05);
        let model = train_two_pass(&pos, &neg, &TrainParams::default()).unwrap();

        assert!(model.predict(&[0.9, 0.8, 0.1]) > 0.9);
        assert!(model.predict(&[0.1, 0.2, 0.9]) < 0.1);
    }

    #[test]
    fn two_pass_drops_mislabeled_negatives() {
        let pos = cluster(&[1.0, 0.0], 80, 0.04);
        let mut neg = cluster(&[0.0, 1.0], 160, 0.04);
        // Sloppy strokes: a handful of "negatives" sitting on positive ground.
        neg.extend(cluster(&[1.0, 0.0], 12, 0.04));

        let model = train_two_pass(&pos, &neg, &TrainParams::default()).unwrap();
        assert!(
            model.predict(&[1.0, 0.0]) > 0.8,
            "noisy negatives should not drag the positive cluster down"
        );
        assert!(model.predict(&[0.0, 1.0]) < 0.2);
    }

    #[test]
    fn structurally_unusable_input_is_none() {
        let params = TrainParams::default();
        assert!(train_two_pass(&[], &[vec![1.0]], &params).is_none());
        assert!(train_two_pass(&[vec![1.0]], &[], &params).is_none());
        // Ragged rows.
        assert!(train_two_pass(&[vec![1.0], vec![1.0, 2.0]], &[vec![0.0]], &params).is_none());
    }

    #[test]
    fn predictions_stay_inside_open_interval() {
        let pos = cluster(&[5.0], 50, 0.01);
        let neg = cluster(&[-5.0], 50, 0.01);
        let model = train_two_pass(&pos, &neg, &TrainParams::default()).unwrap();
        let p = model.predict(&[1000.0]);
        assert!(p > 0.0 && p < 1.0);
    }
}
