//! Removal of empty and negative bins with yield preservation.

use std::collections::BTreeMap;

use ns_core::{Error, Histogram, Result};

use crate::config::TemplateConfig;
use crate::report::{IssueKind, ValidationReport};

/// Content assigned to empty or negative bins.
pub const EMPTY_BIN_CONTENT: f64 = 1e-6;

/// Fallback error for repaired nominal bins.
pub const EMPTY_BIN_ERROR: f64 = 1e-6;

/// Up/down variation histograms of one systematic. Either side may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariationPair {
    /// Up variation.
    pub up: Option<Histogram>,
    /// Down variation.
    pub down: Option<Histogram>,
}

impl VariationPair {
    /// Pair from optional sides.
    pub fn new(up: Option<Histogram>, down: Option<Histogram>) -> Self {
        Self { up, down }
    }

    /// Pair with both sides present.
    pub fn both(up: Histogram, down: Histogram) -> Self {
        Self { up: Some(up), down: Some(down) }
    }

    /// Apply `f` to each present side.
    pub fn try_map(&self, mut f: impl FnMut(&Histogram) -> Result<Histogram>) -> Result<Self> {
        Ok(Self {
            up: self.up.as_ref().map(&mut f).transpose()?,
            down: self.down.as_ref().map(&mut f).transpose()?,
        })
    }
}

/// Sanitizer policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizePolicy {
    /// Borrow the smallest positive error for repaired nominal bins without one.
    pub guess_stat_error: bool,
    /// Rescale a nominal with non-positive initial yield to a total of `1e-6`.
    pub correct_norm_for_negative_integral: bool,
}

impl Default for SanitizePolicy {
    fn default() -> Self {
        Self { guess_stat_error: true, correct_norm_for_negative_integral: false }
    }
}

impl From<&TemplateConfig> for SanitizePolicy {
    fn from(cfg: &TemplateConfig) -> Self {
        Self {
            guess_stat_error: cfg.guess_stat_error,
            correct_norm_for_negative_integral: cfg.correct_norm_for_negative_integral,
        }
    }
}

/// Replaces empty/negative bins by `1e-6` and restores the original totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinSanitizer {
    policy: SanitizePolicy,
}

impl BinSanitizer {
    /// Sanitizer with `policy`.
    pub fn new(policy: SanitizePolicy) -> Self {
        Self { policy }
    }

    /// Sanitize a nominal and all variation pairs of one sample.
    pub fn sanitize(
        &self,
        nominal: &Histogram,
        variations: &BTreeMap<String, VariationPair>,
        report: &mut ValidationReport,
    ) -> Result<(Histogram, BTreeMap<String, VariationPair>)> {
        let nominal = self.sanitize_nominal(nominal, report)?;
        let mut out = BTreeMap::new();
        for (name, pair) in variations {
            let fixed = pair.try_map(|h| Ok(self.sanitize_variation(h, report)))?;
            out.insert(name.clone(), fixed);
        }
        Ok((nominal, out))
    }

    /// Clamp non-positive nominal bins and renormalize to the initial yield.
    ///
    /// Errors are left as they are, except on repaired bins without a
    /// positive error.
    pub fn sanitize_nominal(
        &self,
        nominal: &Histogram,
        report: &mut ValidationReport,
    ) -> Result<Histogram> {
        let name = nominal.name();
        let initial = nominal.integral();
        if initial < 0.0 {
            report.warn(
                IssueKind::DataQuality,
                format!("nominal '{name}' has negative total yield {initial}; normalization cannot be preserved"),
            );
        }

        let min_positive_error = nominal
            .contents()
            .iter()
            .zip(nominal.errors())
            .filter(|&(&c, &e)| c > 0.0 && e > 0.0)
            .map(|(_, &e)| e)
            .fold(None, |acc: Option<f64>, e| Some(acc.map_or(e, |m| m.min(e))));

        let mut contents = nominal.contents().to_vec();
        let mut errors = nominal.errors().to_vec();
        for i in 0..contents.len() {
            let c = contents[i];
            if c > 0.0 {
                continue;
            }
            contents[i] = EMPTY_BIN_CONTENT;
            if errors[i] <= 0.0 || errors[i].is_nan() {
                errors[i] = match min_positive_error {
                    Some(e) if self.policy.guess_stat_error => e,
                    _ => EMPTY_BIN_ERROR,
                };
            }
            report.warn(
                IssueKind::DataQuality,
                format!(
                    "nominal '{name}' bin {i} has content {c}; set to {EMPTY_BIN_CONTENT} +/- {}",
                    errors[i]
                ),
            );
        }

        let clamped: f64 = contents.iter().sum();
        if clamped != initial {
            let target = if initial > 0.0 {
                Some(initial)
            } else if self.policy.correct_norm_for_negative_integral {
                Some(EMPTY_BIN_CONTENT)
            } else {
                None
            };
            if let Some(target) = target {
                if clamped <= 0.0 || clamped.is_nan() {
                    return Err(Error::Data(format!(
                        "nominal '{name}' total is {clamped} after removing empty bins"
                    )));
                }
                let factor = target / clamped;
                contents.iter_mut().for_each(|c| *c *= factor);
            }
        }
        nominal.derive(contents, errors)
    }

    /// Clamp non-positive bins of a variation and rescale it to its pre-clamp total.
    pub fn sanitize_variation(
        &self,
        variation: &Histogram,
        report: &mut ValidationReport,
    ) -> Histogram {
        let name = variation.name();
        let before = variation.integral();
        let mut repaired = 0usize;
        let clamped = variation.map_contents(|i, c| {
            if c <= 0.0 {
                report.warn(
                    IssueKind::DataQuality,
                    format!("variation '{name}' bin {i} has content {c}; set to {EMPTY_BIN_CONTENT}"),
                );
                repaired += 1;
                EMPTY_BIN_CONTENT
            } else {
                c
            }
        });
        if repaired == 0 {
            return clamped;
        }
        if before <= 0.0 || before.is_nan() {
            report.warn(
                IssueKind::DataQuality,
                format!("variation '{name}' has total yield {before}; normalization cannot be preserved"),
            );
            return clamped;
        }
        clamped.scaled(before / clamped.integral())
    }
}
