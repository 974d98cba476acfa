//! Forced shapes for variations whose shape is known only qualitatively.

use ns_core::{Histogram, Result};

use crate::config::ForceShapeType;
use crate::report::{IssueKind, ValidationReport};
use crate::validate::ensure_same_binning;

/// Per-bin weight applied to the shift `variation - nominal`.
///
/// `None` when the histogram has too few bins for the shape.
pub fn shape_weights(shape: ForceShapeType, n_bins: usize) -> Option<Vec<f64>> {
    match shape {
        ForceShapeType::None => Some(vec![1.0; n_bins]),
        ForceShapeType::Linear => {
            if n_bins < 2 {
                return None;
            }
            let last = (n_bins - 1) as f64;
            Some((0..n_bins).map(|i| 1.0 - 2.0 * i as f64 / last).collect())
        }
        ForceShapeType::Triangular => {
            if n_bins < 3 {
                return None;
            }
            // mirror-symmetric around the centre; an odd centre bin gets 1
            let half = (n_bins / 2) as f64;
            let weights = (1..=n_bins)
                .map(|bin| (bin.min(n_bins + 1 - bin) - 1) as f64 / half)
                .collect();
            Some(weights)
        }
    }
}

/// Reshape the shift of `variation` with respect to `nominal`.
///
/// Histograms with too few bins for the requested shape are returned
/// unchanged with a warning. Negative results are clamped to 0.
pub fn force_shape(
    variation: &Histogram,
    nominal: &Histogram,
    shape: ForceShapeType,
    report: &mut ValidationReport,
) -> Result<Histogram> {
    if shape == ForceShapeType::None {
        return Ok(variation.clone());
    }
    ensure_same_binning(nominal, variation)?;
    let Some(weights) = shape_weights(shape, variation.n_bins()) else {
        report.warn(
            IssueKind::Config,
            format!(
                "cannot force a {shape} shape on '{}' with {} bins",
                variation.name(),
                variation.n_bins()
            ),
        );
        return Ok(variation.clone());
    };
    Ok(variation.map_contents(|i, v| {
        let n = nominal.content(i);
        ((v - n) * weights[i] + n).max(0.0)
    }))
}
