//! Structural and numerical validation of a nominal/variation triple.
//!
//! Problems are classified as fatal or repairable. Repairable ones are fixed
//! on copies of the inputs, so running the validator on its own output is a
//! no-op.

use ns_core::{Error, Histogram, Result};

use crate::config::{SampleSettings, TemplateConfig};
use crate::report::{Issue, IssueKind, ValidationReport};

/// Tolerance on low edges and widths when comparing binnings.
pub const BINNING_TOLERANCE: f64 = 1e-5;

/// Content assigned to repaired bins.
pub const REPAIRED_CONTENT: f64 = 1e-6;

/// Error assigned to repaired nominal bins.
pub const REPAIRED_ERROR: f64 = 1e-7;

/// `|ratio - 1|` at or above which a variation bin is anomalous.
pub const MAX_RATIO_DEVIATION: f64 = 100.0;

/// Ratio an anomalous bin is clamped to outside strict mode.
const CLAMPED_RATIO: f64 = 100.0;

/// Fail with [`Error::Structural`] unless `other` has the binning of `nominal`.
pub fn ensure_same_binning(nominal: &Histogram, other: &Histogram) -> Result<()> {
    match binning_mismatch(nominal, other) {
        None => Ok(()),
        Some(msg) => Err(Error::Structural(msg)),
    }
}

fn binning_mismatch(nominal: &Histogram, other: &Histogram) -> Option<String> {
    if nominal.n_bins() != other.n_bins() {
        return Some(format!(
            "'{}' has {} bins, '{}' has {}",
            other.name(),
            other.n_bins(),
            nominal.name(),
            nominal.n_bins()
        ));
    }
    for i in 0..nominal.n_bins() {
        if (nominal.low_edge(i) - other.low_edge(i)).abs() > BINNING_TOLERANCE {
            return Some(format!(
                "'{}' bin {i}: low edge {} differs from nominal {}",
                other.name(),
                other.low_edge(i),
                nominal.low_edge(i)
            ));
        }
        if (nominal.width(i) - other.width(i)).abs() > BINNING_TOLERANCE {
            return Some(format!(
                "'{}' bin {i}: width {} differs from nominal {}",
                other.name(),
                other.width(i),
                nominal.width(i)
            ));
        }
    }
    None
}

/// Bins where up and down both deviate from the nominal beyond the combined
/// statistical error, in the same direction.
///
/// The ratio error is the first-order `var / nom` error; the nominal's own
/// contribution is the `nom / nom` error `sqrt(2) * err / nom`. Bins with zero
/// nominal are skipped.
pub fn check_same_shift(nominal: &Histogram, up: &Histogram, down: &Histogram) -> Vec<usize> {
    let mut bins = Vec::new();
    for i in 0..nominal.n_bins().min(up.n_bins()).min(down.n_bins()) {
        let (n, en) = (nominal.content(i), nominal.error(i));
        if n == 0.0 {
            continue;
        }
        let ratio = |h: &Histogram| {
            let (v, ev) = (h.content(i), h.error(i));
            let err = ((ev * ev * n * n + en * en * v * v) / n.powi(4)).sqrt();
            (v / n, err)
        };
        let nom_err = std::f64::consts::SQRT_2 * en / n;
        let (ru, eu) = ratio(up);
        let (rd, ed) = ratio(down);
        let significant_up = (ru - 1.0).abs() > eu.hypot(nom_err);
        let significant_down = (rd - 1.0).abs() > ed.hypot(nom_err);
        if significant_up && significant_down && (ru - 1.0) * (rd - 1.0) > 0.0 {
            bins.push(i);
        }
    }
    bins
}

/// Validator policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Data-quality problems and numeric anomalies are fatal instead of repaired.
    pub strict: bool,
    /// Missing histograms and binning mismatches are fatal instead of warnings.
    pub crash_on_structural_mismatch: bool,
    /// Nominal bins must be strictly positive (otherwise `>= 0` suffices).
    pub check_null_content: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self { strict: false, crash_on_structural_mismatch: true, check_null_content: true }
    }
}

impl ValidationOptions {
    /// Options for one sample under the global config.
    pub fn from_settings(config: &TemplateConfig, sample: &SampleSettings) -> Self {
        Self {
            strict: config.strict_mode,
            crash_on_structural_mismatch: config.crash_on_structural_mismatch,
            check_null_content: sample.check_null_content,
        }
    }
}

/// Histograms after repair.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    /// Nominal.
    pub nominal: Histogram,
    /// Up variation.
    pub up: Histogram,
    /// Down variation.
    pub down: Histogram,
}

/// Outcome of [`Validator::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// No fatal issue and all checks ran.
    pub ok: bool,
    /// At least one bin was changed by a repair.
    pub repaired: bool,
    /// Histograms after repair; `None` when checks stopped early or a fatal issue was found.
    pub histograms: Option<Repaired>,
    /// Issues recorded by this call.
    pub issues: Vec<Issue>,
}

impl ValidationResult {
    /// Convert to a typed error on the first fatal issue.
    ///
    /// `Ok(None)` means the checks stopped on a non-fatal structural problem.
    pub fn into_checked(self) -> Result<Option<Repaired>> {
        if let Some(fatal) = self.issues.iter().find(|i| i.is_fatal()) {
            return Err(fatal.to_error());
        }
        Ok(self.histograms)
    }
}

/// Checks a nominal/up/down triple in a fixed order: existence, binning,
/// nominal content, negative variation bins, ratio sanity.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    options: ValidationOptions,
}

impl Validator {
    /// Validator with the given policy.
    pub fn new(options: ValidationOptions) -> Self {
        Self { options }
    }

    /// Policy in use.
    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    /// Validate and repair. Every issue is also recorded in `report`.
    pub fn validate(
        &self,
        nominal: Option<&Histogram>,
        up: Option<&Histogram>,
        down: Option<&Histogram>,
        report: &mut ValidationReport,
    ) -> ValidationResult {
        let start = report.len();
        let histograms = self.run(nominal, up, down, report);
        let issues = report.issues()[start..].to_vec();
        let has_fatal = issues.iter().any(Issue::is_fatal);
        let histograms = if has_fatal { None } else { histograms };
        let repaired = match (&histograms, nominal, up, down) {
            (Some(h), Some(n), Some(u), Some(d)) => h.nominal != *n || h.up != *u || h.down != *d,
            _ => false,
        };
        ValidationResult { ok: histograms.is_some(), repaired, histograms, issues }
    }

    fn structural(&self, report: &mut ValidationReport, msg: String) {
        if self.options.crash_on_structural_mismatch {
            report.fatal(IssueKind::Structural, msg);
        } else {
            report.warn(IssueKind::Structural, msg);
        }
    }

    /// Fatal under strict mode, otherwise a warning followed by a repair.
    fn repairable(&self, report: &mut ValidationReport, kind: IssueKind, msg: String) -> bool {
        if self.options.strict {
            report.fatal(kind, msg);
            false
        } else {
            report.warn(kind, msg);
            true
        }
    }

    fn run(
        &self,
        nominal: Option<&Histogram>,
        up: Option<&Histogram>,
        down: Option<&Histogram>,
        report: &mut ValidationReport,
    ) -> Option<Repaired> {
        // 1. existence
        for (label, h) in [("nominal", nominal), ("up", up), ("down", down)] {
            if h.is_none() {
                self.structural(report, format!("the {label} histogram does not exist"));
            }
        }
        let (Some(nominal), Some(up), Some(down)) = (nominal, up, down) else {
            return None;
        };

        // 2. binning
        let mut mismatch = false;
        for h in [up, down] {
            if let Some(msg) = binning_mismatch(nominal, h) {
                self.structural(report, msg);
                mismatch = true;
            }
        }
        if mismatch {
            return None;
        }

        let mut nom_c = nominal.contents().to_vec();
        let mut nom_e = nominal.errors().to_vec();
        let mut up_c = up.contents().to_vec();
        let mut down_c = down.contents().to_vec();

        // 3. nominal content; variation bins follow a repaired nominal bin
        for i in self.repair_nominal(nominal.name(), &mut nom_c, &mut nom_e, report) {
            up_c[i] = nom_c[i];
            down_c[i] = nom_c[i];
        }

        // 4 + 5. variation bins
        for (h, c) in [(up, &mut up_c), (down, &mut down_c)] {
            self.repair_variation(h.name(), &nom_c, c, report);
        }

        let rebuilt = nominal.derive(nom_c, nom_e).and_then(|nominal| {
            Ok(Repaired {
                nominal,
                up: up.derive(up_c, up.errors().to_vec())?,
                down: down.derive(down_c, down.errors().to_vec())?,
            })
        });
        match rebuilt {
            Ok(r) => Some(r),
            Err(e) => {
                report.fatal(IssueKind::Structural, e.to_string());
                None
            }
        }
    }

    /// Returns the repaired bin indices.
    fn repair_nominal(
        &self,
        name: &str,
        contents: &mut [f64],
        errors: &mut [f64],
        report: &mut ValidationReport,
    ) -> Vec<usize> {
        let mut repaired = Vec::new();
        for i in 0..contents.len() {
            let c = contents[i];
            let acceptable = if self.options.check_null_content { c > 0.0 } else { c >= 0.0 };
            if acceptable {
                continue;
            }
            let msg = format!("nominal '{name}' bin {i} has content {c}");
            if self.repairable(report, IssueKind::DataQuality, msg) {
                contents[i] = REPAIRED_CONTENT;
                errors[i] = REPAIRED_ERROR;
                repaired.push(i);
            }
        }
        repaired
    }

    fn repair_variation(
        &self,
        name: &str,
        nominal: &[f64],
        contents: &mut [f64],
        report: &mut ValidationReport,
    ) {
        for i in 0..contents.len() {
            let n = nominal[i];
            let v = contents[i];

            if v.is_nan() {
                report.warn(
                    IssueKind::NumericAnomaly,
                    format!("'{name}' bin {i} is NaN; replaced by the nominal {n}"),
                );
                contents[i] = n;
                continue;
            }
            if v < 0.0 {
                let msg = format!("'{name}' bin {i} has negative content {v}");
                if !self.repairable(report, IssueKind::DataQuality, msg) {
                    continue;
                }
                contents[i] = REPAIRED_CONTENT;
            }
            let v = contents[i];
            if n == 0.0 {
                if v != 0.0 {
                    report.warn(
                        IssueKind::DataQuality,
                        format!("'{name}' bin {i} is {v} on an empty nominal bin"),
                    );
                }
                continue;
            }
            let r = v / n;
            if r < 0.0 || (r - 1.0).abs() >= MAX_RATIO_DEVIATION {
                let msg = format!("'{name}' bin {i} has ratio {r} to the nominal");
                if self.repairable(report, IssueKind::NumericAnomaly, msg) {
                    contents[i] = if r < 0.0 { REPAIRED_CONTENT } else { CLAMPED_RATIO * n };
                }
            }
        }
    }
}
