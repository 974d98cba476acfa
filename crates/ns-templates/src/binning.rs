//! Remapping of a histogram onto uniform bins over `[0, 1]` for model input.

use std::collections::BTreeSet;

use ns_core::{Error, Histogram, Result};

use crate::report::{IssueKind, ValidationReport};

/// Suffix appended to the name of transformed histograms.
pub const REGULAR_BIN_SUFFIX: &str = "_regBin";

/// Content and error given to negative bins.
const NEGATIVE_BIN_FILL: f64 = 1e-6;

/// Drop `blinded_bins` (0-based), remap the remaining bins to equal-width
/// bins over `[0, 1]` and apply `bin_scales` to content and error.
///
/// Negative bins become `1e-6 ± 1e-6`. A `bin_scales` whose length does not
/// match the remaining bin count is reported and ignored.
pub fn transform_binning(
    hist: &Histogram,
    blinded_bins: &[usize],
    bin_scales: &[f64],
    report: &mut ValidationReport,
) -> Result<Histogram> {
    let blinded: BTreeSet<usize> = blinded_bins.iter().copied().collect();
    if let Some(&bad) = blinded.iter().find(|&&b| b >= hist.n_bins()) {
        return Err(Error::Config(format!(
            "blinded bin {bad} is out of range for '{}' with {} bins",
            hist.name(),
            hist.n_bins()
        )));
    }
    if blinded.len() == hist.n_bins() {
        return Err(Error::Config(format!("all {} bins of '{}' are blinded", hist.n_bins(), hist.name())));
    }

    let (mut contents, mut errors): (Vec<f64>, Vec<f64>) = (0..hist.n_bins())
        .filter(|i| !blinded.contains(i))
        .map(|i| {
            let c = hist.content(i);
            if c < 0.0 { (NEGATIVE_BIN_FILL, NEGATIVE_BIN_FILL) } else { (c, hist.error(i)) }
        })
        .unzip();

    if !bin_scales.is_empty() {
        if bin_scales.len() == contents.len() {
            for ((c, e), s) in contents.iter_mut().zip(errors.iter_mut()).zip(bin_scales) {
                *c *= s;
                *e *= s;
            }
        } else {
            report.warn(
                IssueKind::Config,
                format!(
                    "'{}': {} bin scales for {} bins; scaling skipped",
                    hist.name(),
                    bin_scales.len(),
                    contents.len()
                ),
            );
        }
    }

    Histogram::uniform(format!("{}{REGULAR_BIN_SUFFIX}", hist.name()), 0.0, 1.0, contents, errors)
}
