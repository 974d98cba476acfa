//! Symmetrization of up/down variation pairs.
//!
//! Every algorithm works on per-bin ratios to the nominal, builds a new "up"
//! template and derives "down" as its mirror image ([`invert_shift`]).
//! Results never contain negative bins.

use ns_core::{Error, Histogram, Result};

use crate::config::SymmetrizationType;
use crate::report::{IssueKind, ValidationReport};
use crate::validate::{check_same_shift, ensure_same_binning};

/// Relative yield shift above which a pair is checked for same-direction bins.
pub const LARGE_YIELD_SHIFT: f64 = 0.005;

/// Separation below which a one-sided variation is considered equal to nominal.
const MIN_SEPARATION: f64 = 1e-5;

/// Mirror `variation` around `nominal`: `2 * nominal - variation`.
///
/// Errors are taken from the variation; negative bins are clamped to 0.
pub fn invert_shift(variation: &Histogram, nominal: &Histogram) -> Result<Histogram> {
    ensure_same_binning(nominal, variation)?;
    let contents = nominal
        .contents()
        .iter()
        .zip(variation.contents())
        .map(|(n, v)| (2.0 * n - v).max(0.0))
        .collect();
    variation.derive(contents, variation.errors().to_vec())
}

/// Sum of absolute per-bin differences.
pub fn separation(a: &Histogram, b: &Histogram) -> Result<f64> {
    ensure_same_binning(a, b)?;
    Ok(a.contents().iter().zip(b.contents()).map(|(x, y)| (x - y).abs()).sum())
}

/// Scale the shift `variation - nominal` by `factor`.
///
/// Errors are multiplied by `|factor|`; negative bins are clamped to 0.
pub fn scale_variation(variation: &Histogram, nominal: &Histogram, factor: f64) -> Result<Histogram> {
    ensure_same_binning(nominal, variation)?;
    if !factor.is_finite() {
        return Err(Error::Config(format!("scale factor must be finite, got {factor}")));
    }
    let contents = nominal
        .contents()
        .iter()
        .zip(variation.contents())
        .map(|(n, v)| ((v - n) * factor + n).max(0.0))
        .collect();
    let errors = variation.errors().iter().map(|e| e * factor.abs()).collect();
    variation.derive(contents, errors)
}

/// Per-bin ratio to nominal with first-order uncorrelated errors.
struct Ratio {
    values: Vec<f64>,
    errors: Vec<f64>,
}

impl Ratio {
    /// `variation / nominal`; bins with zero nominal get ratio 0 and error 0.
    fn of(variation: &Histogram, nominal: &Histogram) -> Self {
        let n_bins = nominal.n_bins();
        let mut values = Vec::with_capacity(n_bins);
        let mut errors = Vec::with_capacity(n_bins);
        for i in 0..n_bins {
            let (n, en) = (nominal.content(i), nominal.error(i));
            let (v, ev) = (variation.content(i), variation.error(i));
            if n == 0.0 {
                values.push(0.0);
                errors.push(0.0);
                continue;
            }
            values.push(v / n);
            let var = (ev * ev * n * n + en * en * v * v) / n.powi(4);
            errors.push(var.sqrt());
        }
        Self { values, errors }
    }

    /// Combine two ratios bin by bin; the combined error is `0.5 * hypot(eu, ed)`.
    fn combine(up: &Ratio, down: &Ratio, f: impl Fn(f64, f64) -> f64) -> Self {
        let values = up.values.iter().zip(&down.values).map(|(&u, &d)| f(u, d)).collect();
        let errors =
            up.errors.iter().zip(&down.errors).map(|(eu, ed)| 0.5 * eu.hypot(*ed)).collect();
        Self { values, errors }
    }

    /// Multiply back onto `nominal`, clamping negatives to 0.
    fn apply(&self, nominal: &Histogram, like: &Histogram) -> Result<Histogram> {
        let mut contents = Vec::with_capacity(self.values.len());
        let mut errors = Vec::with_capacity(self.values.len());
        for (i, (&r, &er)) in self.values.iter().zip(&self.errors).enumerate() {
            let (n, en) = (nominal.content(i), nominal.error(i));
            contents.push((r * n).max(0.0));
            errors.push((er * n).hypot(en * r));
        }
        like.derive(contents, errors)
    }
}

/// Result of one-sided symmetrization.
#[derive(Debug, Clone, PartialEq)]
pub struct OneSided {
    /// Up template.
    pub up: Histogram,
    /// Down template.
    pub down: Histogram,
    /// Whether the real variation ended up as the up side.
    pub is_up: bool,
}

/// Mirror a single real variation around the nominal.
///
/// With one side present, the real variation is "up" when its yield exceeds
/// the nominal yield and "down" when it is lower; equal yields keep the side
/// it was supplied on. With both present the side further from nominal
/// (by [`separation`]) is the real one and stays where it was supplied, ties
/// going to up.
pub fn symmetrize_one_sided(
    nominal: &Histogram,
    up: Option<&Histogram>,
    down: Option<&Histogram>,
    report: &mut ValidationReport,
) -> Result<OneSided> {
    let by_yield = |real: &Histogram, supplied_up: bool| {
        let (y_nom, y_real) = (nominal.integral(), real.integral());
        if y_real > y_nom {
            true
        } else if y_real < y_nom {
            false
        } else {
            supplied_up
        }
    };
    let (real, is_up) = match (up, down) {
        (Some(u), None) => (u, by_yield(u, true)),
        (None, Some(d)) => (d, by_yield(d, false)),
        (Some(u), Some(d)) => {
            if separation(nominal, u)? >= separation(nominal, d)? {
                (u, true)
            } else {
                (d, false)
            }
        }
        (None, None) => {
            return Err(Error::Config(
                "one-sided symmetrization needs at least one variation".into(),
            ));
        }
    };

    if separation(nominal, real)? < MIN_SEPARATION {
        report.warn(
            IssueKind::Diagnostic,
            format!("variation '{}' is indistinguishable from the nominal", real.name()),
        );
    }

    let mirrored = invert_shift(real, nominal)?;
    let (up, down) = if is_up { (real.clone(), mirrored) } else { (mirrored, real.clone()) };
    Ok(OneSided { up, down, is_up })
}

/// Average the signed deviations: `r = (r_up - r_down) / 2 + 1`.
pub fn symmetrize_two_sided(
    nominal: &Histogram,
    up: &Histogram,
    down: &Histogram,
    report: &mut ValidationReport,
) -> Result<(Histogram, Histogram)> {
    ensure_same_binning(nominal, up)?;
    ensure_same_binning(nominal, down)?;
    flag_large_shift(nominal, up, down, report);

    let r = Ratio::combine(&Ratio::of(up, nominal), &Ratio::of(down, nominal), |u, d| {
        ((u - 1.0) - (d - 1.0)) / 2.0 + 1.0
    });
    mirror_pair(r.apply(nominal, up)?, nominal, down)
}

/// Average the absolute deviations: `r = (|r_up - 1| + |r_down - 1|) / 2 + 1`.
pub fn symmetrize_abs_mean(
    nominal: &Histogram,
    up: &Histogram,
    down: &Histogram,
    report: &mut ValidationReport,
) -> Result<(Histogram, Histogram)> {
    ensure_same_binning(nominal, up)?;
    ensure_same_binning(nominal, down)?;
    flag_large_shift(nominal, up, down, report);

    let r = Ratio::combine(&Ratio::of(up, nominal), &Ratio::of(down, nominal), |u, d| {
        ((u - 1.0).abs() + (d - 1.0).abs()) / 2.0 + 1.0
    });
    mirror_pair(r.apply(nominal, up)?, nominal, down)
}

/// Keep, per bin, the ratio with the larger deviation from 1.
pub fn symmetrize_maximum(
    nominal: &Histogram,
    up: &Histogram,
    down: &Histogram,
) -> Result<(Histogram, Histogram)> {
    ensure_same_binning(nominal, up)?;
    ensure_same_binning(nominal, down)?;

    let ru = Ratio::of(up, nominal);
    let rd = Ratio::of(down, nominal);
    let mut r = Ratio { values: Vec::with_capacity(ru.values.len()), errors: Vec::new() };
    r.errors.reserve(ru.values.len());
    for i in 0..ru.values.len() {
        let pick_down = (ru.values[i] - 1.0).abs() < (rd.values[i] - 1.0).abs();
        let src = if pick_down { &rd } else { &ru };
        r.values.push(src.values[i]);
        r.errors.push(src.errors[i]);
    }
    mirror_pair(r.apply(nominal, up)?, nominal, down)
}

/// Symmetrize a variation pair with `sym`.
///
/// Only [`SymmetrizationType::OneSided`] accepts a missing side; the others
/// return [`Error::Structural`] when either side is absent.
pub fn symmetrize(
    sym: SymmetrizationType,
    nominal: &Histogram,
    up: Option<&Histogram>,
    down: Option<&Histogram>,
    report: &mut ValidationReport,
) -> Result<(Histogram, Histogram)> {
    let one_sided =
        |up: Option<&Histogram>, down: Option<&Histogram>, report: &mut ValidationReport| {
            symmetrize_one_sided(nominal, up, down, report).map(|o| (o.up, o.down))
        };
    let (Some(up), Some(down)) = (up, down) else {
        if sym == SymmetrizationType::OneSided {
            return one_sided(up, down, report);
        }
        return Err(Error::Structural(format!(
            "{sym} symmetrization needs both up and down variations"
        )));
    };
    match sym {
        SymmetrizationType::None => {
            ensure_same_binning(nominal, up)?;
            ensure_same_binning(nominal, down)?;
            Ok((up.clone(), down.clone()))
        }
        SymmetrizationType::OneSided => one_sided(Some(up), Some(down), report),
        SymmetrizationType::TwoSided => symmetrize_two_sided(nominal, up, down, report),
        SymmetrizationType::AbsMean => symmetrize_abs_mean(nominal, up, down, report),
        SymmetrizationType::Maximum => symmetrize_maximum(nominal, up, down),
    }
}

fn mirror_pair(
    new_up: Histogram,
    nominal: &Histogram,
    down: &Histogram,
) -> Result<(Histogram, Histogram)> {
    let new_down = invert_shift(&new_up, nominal)?.renamed(down.name());
    Ok((new_up, new_down))
}

/// Diagnostic only: large yield shifts trigger a same-direction scan.
fn flag_large_shift(
    nominal: &Histogram,
    up: &Histogram,
    down: &Histogram,
    report: &mut ValidationReport,
) {
    let y_nom = nominal.integral();
    if y_nom == 0.0 {
        return;
    }
    let rel = |h: &Histogram| (h.integral() / y_nom - 1.0).abs();
    if rel(up) <= LARGE_YIELD_SHIFT && rel(down) <= LARGE_YIELD_SHIFT {
        return;
    }
    let bins = check_same_shift(nominal, up, down);
    if !bins.is_empty() {
        report.warn(
            IssueKind::Diagnostic,
            format!(
                "'{}' and '{}' shift in the same direction in bins {bins:?}",
                up.name(),
                down.name()
            ),
        );
    }
}
