//! Per-(region, sample) template building.
//!
//! A [`SampleBuilder`] collects the nominal and its systematics; `finalize`
//! turns it into a read-only [`SampleRecord`].
//!
//! # Pipeline
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ BinSanitizer: nominal + every variation pair              │
//! ├───────────────────────────────────────────────────────────┤
//! │ Rayon par_iter over systematics (one unit each)           │
//! │  ├── ScaleVariation → ForceShape                          │
//! │  ├── SmoothingOrchestrator (symmetrize / smooth)          │
//! │  ├── Validator                                            │
//! │  ├── norm / shape decomposition                           │
//! │  └── BinningTransform                                     │
//! ├───────────────────────────────────────────────────────────┤
//! │ merge in name order: templates, failures, report          │
//! └───────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use ns_core::{Error, Histogram, Result, Smoother};
use rayon::prelude::*;
use serde::Serialize;

use crate::binning::transform_binning;
use crate::config::{Component, SampleSettings, SymmetrizationType, SystematicSettings, TemplateConfig};
use crate::report::{IssueKind, ValidationReport};
use crate::sanitize::{BinSanitizer, SanitizePolicy, VariationPair};
use crate::shape::force_shape;
use crate::smoothing::{SmoothingOrchestrator, cap_variation};
use crate::symmetrize::scale_variation;
use crate::validate::{ValidationOptions, Validator};

/// Stat errors of bins at or below this content are replaced by [`SMALL_BIN_STAT_ERROR`].
pub const SMALL_BIN_CONTENT: f64 = 1e-4;

/// Stat error used for nearly empty bins.
pub const SMALL_BIN_STAT_ERROR: f64 = 1e-7;

/// Where a systematic's variations come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SystematicSource {
    /// Up/down histograms.
    Histograms(VariationPair),
    /// Pure normalization shift: the nominal scaled by `1 + up` / `1 + down`.
    Overall {
        /// Relative up shift.
        up: f64,
        /// Relative down shift.
        down: f64,
    },
    /// Statistical uncertainty of one nominal bin (0-based).
    Stat {
        /// Bin index.
        bin: usize,
    },
}

#[derive(Debug, Clone)]
struct PendingSystematic {
    source: SystematicSource,
    settings: SystematicSettings,
}

/// A fully processed systematic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystematicTemplate {
    /// Systematic name.
    pub name: String,
    /// Settings it was built with.
    pub settings: SystematicSettings,
    /// Carries a shape component.
    pub is_shape: bool,
    /// Carries a normalization component; cleared when both norms are 0.
    pub is_norm: bool,
    /// `integral(up) / integral(nominal) - 1`.
    pub norm_up: f64,
    /// `integral(down) / integral(nominal) - 1`.
    pub norm_down: f64,
    /// Final up variation.
    pub up: Histogram,
    /// Final down variation.
    pub down: Histogram,
    /// Up variation normalized to the nominal yield.
    pub shape_up: Option<Histogram>,
    /// Down variation normalized to the nominal yield.
    pub shape_down: Option<Histogram>,
    /// `up` on the uniform model binning.
    pub model_up: Histogram,
    /// `down` on the uniform model binning.
    pub model_down: Histogram,
    /// `shape_up` on the uniform model binning.
    pub model_shape_up: Option<Histogram>,
    /// `shape_down` on the uniform model binning.
    pub model_shape_down: Option<Histogram>,
}

/// A systematic that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    /// Systematic name.
    pub systematic: String,
    /// Error category (see [`Error::category`]).
    pub category: &'static str,
    /// Error message.
    pub message: String,
}

impl UnitFailure {
    fn new(systematic: &str, err: &Error) -> Self {
        Self { systematic: systematic.to_string(), category: err.category(), message: err.to_string() }
    }
}

/// Finalized templates of one (region, sample).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    region: String,
    sample: String,
    settings: SampleSettings,
    nominal: Histogram,
    model_nominal: Histogram,
    systematics: BTreeMap<String, SystematicTemplate>,
    failures: Vec<UnitFailure>,
    report: ValidationReport,
}

impl SampleRecord {
    /// Region name.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sample name.
    pub fn sample(&self) -> &str {
        &self.sample
    }

    /// Settings the sample was built with.
    pub fn settings(&self) -> &SampleSettings {
        &self.settings
    }

    /// Sanitized nominal.
    pub fn nominal(&self) -> &Histogram {
        &self.nominal
    }

    /// Nominal on the uniform model binning.
    pub fn model_nominal(&self) -> &Histogram {
        &self.model_nominal
    }

    /// Templates by systematic name.
    pub fn systematics(&self) -> &BTreeMap<String, SystematicTemplate> {
        &self.systematics
    }

    /// Template of systematic `name`.
    pub fn systematic(&self, name: &str) -> Option<&SystematicTemplate> {
        self.systematics.get(name)
    }

    /// Systematics dropped because of a fatal error.
    pub fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }

    /// Everything recorded while building the sample.
    pub fn report(&self) -> &ValidationReport {
        &self.report
    }
}

/// Mutable builder for one (region, sample).
#[derive(Debug, Clone)]
pub struct SampleBuilder {
    region: String,
    sample: String,
    nominal: Histogram,
    settings: SampleSettings,
    systematics: BTreeMap<String, PendingSystematic>,
}

impl SampleBuilder {
    /// Builder for `nominal`.
    pub fn new(
        region: impl Into<String>,
        sample: impl Into<String>,
        nominal: Histogram,
        settings: SampleSettings,
    ) -> Self {
        Self {
            region: region.into(),
            sample: sample.into(),
            nominal,
            settings,
            systematics: BTreeMap::new(),
        }
    }

    /// Region name.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sample name.
    pub fn sample(&self) -> &str {
        &self.sample
    }

    /// Raw nominal.
    pub fn nominal(&self) -> &Histogram {
        &self.nominal
    }

    /// Sample settings.
    pub fn settings(&self) -> &SampleSettings {
        &self.settings
    }

    /// Number of systematics added so far.
    pub fn len(&self) -> usize {
        self.systematics.len()
    }

    /// Whether no systematic was added.
    pub fn is_empty(&self) -> bool {
        self.systematics.is_empty()
    }

    /// Whether systematic `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.systematics.contains_key(name)
    }

    fn insert(&mut self, name: &str, source: SystematicSource, settings: SystematicSettings) -> Result<()> {
        if self.systematics.contains_key(name) {
            return Err(Error::Config(format!(
                "systematic '{name}' already exists in {}/{}",
                self.region, self.sample
            )));
        }
        settings.check()?;
        self.systematics.insert(name.to_string(), PendingSystematic { source, settings });
        Ok(())
    }

    /// Add a histogram systematic.
    pub fn add_variation(
        &mut self,
        name: &str,
        variations: VariationPair,
        settings: SystematicSettings,
    ) -> Result<()> {
        self.insert(name, SystematicSource::Histograms(variations), settings)
    }

    /// Add a normalization-only systematic from relative shifts.
    pub fn add_overall(&mut self, name: &str, up: f64, down: f64) -> Result<()> {
        for v in [up, down] {
            if !v.is_finite() || v < -1.0 {
                return Err(Error::Config(format!(
                    "overall systematic '{name}': relative shift {v} must be finite and >= -1"
                )));
            }
        }
        let settings = SystematicSettings::new().component(Component::NormOnly);
        self.insert(name, SystematicSource::Overall { up, down }, settings)
    }

    /// Add the statistical uncertainty of nominal bin `bin` as a systematic.
    pub fn add_stat(&mut self, name: &str, bin: usize) -> Result<()> {
        if bin >= self.nominal.n_bins() {
            return Err(Error::Config(format!(
                "stat systematic '{name}': bin {bin} out of range ({} bins)",
                self.nominal.n_bins()
            )));
        }
        self.insert(name, SystematicSource::Stat { bin }, SystematicSettings::new())
    }

    fn variation_pairs(&self) -> BTreeMap<String, VariationPair> {
        self.systematics
            .iter()
            .filter_map(|(name, p)| match &p.source {
                SystematicSource::Histograms(pair) => Some((name.clone(), pair.clone())),
                _ => None,
            })
            .collect()
    }

    /// Sanitize and validate the raw inputs without building templates.
    ///
    /// A one-sided systematic with a single side is checked against that side
    /// only. Errors that would abort `finalize` are recorded as fatal entries.
    pub fn check(&self, config: &TemplateConfig) -> ValidationReport {
        let mut report = ValidationReport::scoped(format!("{}/{}", self.region, self.sample));
        let sanitizer = BinSanitizer::new(SanitizePolicy::from(config));
        let (nominal, pairs) = match sanitizer.sanitize(&self.nominal, &self.variation_pairs(), &mut report) {
            Ok(sanitized) => sanitized,
            Err(err) => {
                report.fatal(IssueKind::of(&err), err.to_string());
                return report;
            }
        };

        let validator = Validator::new(ValidationOptions::from_settings(config, &self.settings));
        for (name, pair) in &pairs {
            let one_sided = self
                .systematics
                .get(name)
                .is_some_and(|p| p.settings.symmetrization == SymmetrizationType::OneSided);
            let (up, down) = match (pair.up.as_ref(), pair.down.as_ref()) {
                (Some(h), None) | (None, Some(h)) if one_sided => (Some(h), Some(h)),
                sides => sides,
            };
            let mut unit = ValidationReport::scoped(format!("{}/{name}", report.scope()));
            validator.validate(Some(&nominal), up, down, &mut unit);
            report.merge(unit);
        }
        report
    }

    /// Sanitize, process every systematic and validate.
    ///
    /// A failing systematic is recorded as a [`UnitFailure`] and dropped,
    /// unless [`TemplateConfig::abort_on_unit_failure`] is set, in which case
    /// its error is returned.
    pub fn finalize(self, config: &TemplateConfig, smoother: &dyn Smoother) -> Result<SampleRecord> {
        let mut report = ValidationReport::scoped(format!("{}/{}", self.region, self.sample));

        let sanitizer = BinSanitizer::new(SanitizePolicy::from(config));
        let (nominal, mut pairs) = sanitizer.sanitize(&self.nominal, &self.variation_pairs(), &mut report)?;
        let nominal = nominal.renamed(format!("{}_{}", self.region, self.sample));

        let units: Vec<(String, SystematicSource, SystematicSettings)> = self
            .systematics
            .into_iter()
            .map(|(name, p)| {
                let source = match p.source {
                    SystematicSource::Histograms(_) => {
                        SystematicSource::Histograms(pairs.remove(&name).unwrap_or_default())
                    }
                    other => other,
                };
                (name, source, p.settings)
            })
            .collect();

        let ctx = UnitContext {
            prefix: nominal.name(),
            nominal: &nominal,
            sample: &self.settings,
            config,
            smoother,
            validator: Validator::new(ValidationOptions::from_settings(config, &self.settings)),
            scope: report.scope(),
        };
        let outcomes: Vec<(String, Result<Option<SystematicTemplate>>, ValidationReport)> = units
            .par_iter()
            .map(|(name, source, settings)| {
                let mut unit_report = ValidationReport::scoped(format!("{}/{name}", ctx.scope));
                let result = ctx.run(name, source, settings, &mut unit_report);
                (name.clone(), result, unit_report)
            })
            .collect();

        let mut systematics = BTreeMap::new();
        let mut failures = Vec::new();
        for (name, result, mut unit_report) in outcomes {
            match result {
                Ok(Some(template)) => {
                    systematics.insert(name, template);
                }
                Ok(None) => {}
                Err(err) => {
                    if config.abort_on_unit_failure {
                        return Err(err);
                    }
                    if !unit_report.has_fatal() {
                        unit_report.fatal(IssueKind::of(&err), err.to_string());
                    }
                    failures.push(UnitFailure::new(&name, &err));
                }
            }
            report.merge(unit_report);
        }

        let model_nominal =
            transform_binning(&nominal, &self.settings.blinded_bins, &self.settings.bin_scales, &mut report)?;

        Ok(SampleRecord {
            region: self.region,
            sample: self.sample,
            settings: self.settings,
            nominal,
            model_nominal,
            systematics,
            failures,
            report,
        })
    }
}

/// Shared, read-only state of one sample's units.
struct UnitContext<'a> {
    prefix: &'a str,
    nominal: &'a Histogram,
    sample: &'a SampleSettings,
    config: &'a TemplateConfig,
    smoother: &'a dyn Smoother,
    validator: Validator,
    scope: &'a str,
}

impl UnitContext<'_> {
    fn run(
        &self,
        name: &str,
        source: &SystematicSource,
        settings: &SystematicSettings,
        report: &mut ValidationReport,
    ) -> Result<Option<SystematicTemplate>> {
        let processed = match source {
            SystematicSource::Histograms(pair) => self.process_histograms(pair, settings, report)?,
            SystematicSource::Overall { up, down } => {
                Some((self.nominal.scaled(1.0 + up), self.nominal.scaled(1.0 + down)))
            }
            SystematicSource::Stat { bin } => Some(self.stat_pair(*bin)),
        };
        let Some((up, down)) = processed else {
            return Ok(None);
        };

        let Some(checked) = self
            .validator
            .validate(Some(self.nominal), Some(&up), Some(&down), report)
            .into_checked()?
        else {
            return Ok(None);
        };

        self.decompose(name, settings, checked.up, checked.down, report).map(Some)
    }

    /// Scale, force shape, symmetrize and smooth. `None` when a missing side
    /// was tolerated by the validation policy.
    fn process_histograms(
        &self,
        pair: &VariationPair,
        settings: &SystematicSettings,
        report: &mut ValidationReport,
    ) -> Result<Option<(Histogram, Histogram)>> {
        let one_sided = settings.symmetrization == SymmetrizationType::OneSided;
        let missing = match (&pair.up, &pair.down) {
            (Some(_), Some(_)) => false,
            (None, None) => true,
            _ => !one_sided,
        };
        if missing {
            let outcome = self.validator.validate(
                Some(self.nominal),
                pair.up.as_ref(),
                pair.down.as_ref(),
                report,
            );
            outcome.into_checked()?;
            return Ok(None);
        }

        let prepare = |h: &Histogram, factor: f64, report: &mut ValidationReport| {
            let scaled = scale_variation(h, self.nominal, factor)?;
            force_shape(&scaled, self.nominal, settings.force_shape, report)
        };
        let up = pair.up.as_ref().map(|h| prepare(h, settings.scale_up, report)).transpose()?;
        let down = pair.down.as_ref().map(|h| prepare(h, settings.scale_down, report)).transpose()?;

        let level = if settings.is_shape() { settings.smooth_level } else { 0 };
        let option = settings
            .smooth_option
            .or(self.sample.smooth_option)
            .unwrap_or(self.config.smooth_option);
        let (up, down) = SmoothingOrchestrator::new(self.smoother).process(
            settings.symmetrization,
            level,
            option,
            self.nominal,
            up.as_ref(),
            down.as_ref(),
            report,
        )?;

        if !self.sample.cap_variation {
            return Ok(Some((up, down)));
        }
        Ok(Some((
            cap_variation(&up, self.nominal, report),
            cap_variation(&down, self.nominal, report),
        )))
    }

    fn stat_pair(&self, bin: usize) -> (Histogram, Histogram) {
        let content = self.nominal.content(bin);
        let error =
            if content > SMALL_BIN_CONTENT { self.nominal.error(bin) } else { SMALL_BIN_STAT_ERROR };
        let shifted = |delta: f64| self.nominal.map_contents(|i, c| if i == bin { c + delta } else { c });
        (shifted(error), shifted(-error))
    }

    fn decompose(
        &self,
        name: &str,
        settings: &SystematicSettings,
        up: Histogram,
        down: Histogram,
        report: &mut ValidationReport,
    ) -> Result<SystematicTemplate> {
        let y_nom = self.nominal.integral();
        if y_nom <= 0.0 || y_nom.is_nan() {
            return Err(Error::Data(format!("nominal yield {y_nom} cannot normalize '{name}'")));
        }
        let stem = format!("{}_{name}", self.prefix);
        let up = up.renamed(format!("{stem}_Up"));
        let down = down.renamed(format!("{stem}_Down"));

        let (is_shape, mut is_norm) = match settings.component {
            Component::NormAndShape => (true, true),
            Component::NormOnly => (false, true),
            Component::ShapeOnly => (true, false),
        };
        let (norm_up, norm_down) = if is_norm {
            (up.integral() / y_nom - 1.0, down.integral() / y_nom - 1.0)
        } else {
            (0.0, 0.0)
        };
        if norm_up == 0.0 && norm_down == 0.0 {
            is_norm = false;
        }

        let to_nominal_yield = |h: &Histogram, side: &str| {
            let y = h.integral();
            let shape = if y > 0.0 { h.scaled(y_nom / y) } else { self.nominal.clone() };
            shape.renamed(format!("{stem}_Shape_{side}"))
        };
        let (shape_up, shape_down) = if is_shape {
            (Some(to_nominal_yield(&up, "Up")), Some(to_nominal_yield(&down, "Down")))
        } else {
            (None, None)
        };

        let blinded = &self.sample.blinded_bins;
        let scales = &self.sample.bin_scales;
        let mut model = |h: &Histogram| transform_binning(h, blinded, scales, report);
        let model_up = model(&up)?;
        let model_down = model(&down)?;
        let model_shape_up = shape_up.as_ref().map(&mut model).transpose()?;
        let model_shape_down = shape_down.as_ref().map(&mut model).transpose()?;

        Ok(SystematicTemplate {
            name: name.to_string(),
            settings: settings.clone(),
            is_shape,
            is_norm,
            norm_up,
            norm_down,
            up,
            down,
            shape_up,
            shape_down,
            model_up,
            model_down,
            model_shape_up,
            model_shape_down,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForceShapeType, SmoothOption};
    use crate::report::Severity;
    use approx::assert_relative_eq;
    use ns_core::PassThroughSmoother;

    fn hist(contents: &[f64]) -> Histogram {
        let errors = contents.iter().map(|c| c.abs().sqrt()).collect();
        Histogram::uniform("h", 0.0, contents.len() as f64, contents.to_vec(), errors).unwrap()
    }

    fn builder() -> SampleBuilder {
        SampleBuilder::new("SR", "ttbar", hist(&[10.0, 10.0, 10.0]), SampleSettings::default())
    }

    fn finalize(b: SampleBuilder, config: &TemplateConfig) -> Result<SampleRecord> {
        b.finalize(config, &PassThroughSmoother)
    }

    #[test]
    fn test_two_sided_template() {
        let mut b = builder();
        b.add_variation(
            "JES",
            VariationPair::both(hist(&[12.0, 9.0, 11.0]), hist(&[8.0, 11.0, 9.0])),
            SystematicSettings::new().symmetrization(SymmetrizationType::TwoSided),
        )
        .unwrap();
        let rec = finalize(b, &TemplateConfig::default()).unwrap();
        assert_eq!(rec.nominal().name(), "SR_ttbar");

        let t = rec.systematic("JES").unwrap();
        assert_eq!(t.up.name(), "SR_ttbar_JES_Up");
        assert_eq!(t.down.name(), "SR_ttbar_JES_Down");
        assert_relative_eq!(t.up.content(0), 12.0, epsilon = 1e-12);
        assert_relative_eq!(t.down.content(1), 11.0, epsilon = 1e-12);
        assert_relative_eq!(t.norm_up, 32.0 / 30.0 - 1.0, epsilon = 1e-12);
        assert!(t.is_shape && t.is_norm);

        let shape_up = t.shape_up.as_ref().unwrap();
        assert_relative_eq!(shape_up.integral(), 30.0, max_relative = 1e-12);
        assert_eq!(shape_up.name(), "SR_ttbar_JES_Shape_Up");
        assert_eq!(t.model_up.name(), "SR_ttbar_JES_Up_regBin");
        assert_eq!(t.model_up.edges()[3], 1.0);
        assert!(rec.failures().is_empty());
    }

    #[test]
    fn test_one_sided_down_only() {
        let mut b = builder();
        b.add_variation(
            "ISR",
            VariationPair::new(None, Some(hist(&[8.0, 8.0, 8.0]))),
            SystematicSettings::new().symmetrization(SymmetrizationType::OneSided),
        )
        .unwrap();
        let rec = finalize(b, &TemplateConfig::default()).unwrap();
        let t = rec.systematic("ISR").unwrap();
        assert_eq!(t.up.contents(), &[12.0, 12.0, 12.0]);
        assert_relative_eq!(t.norm_up, 0.2, epsilon = 1e-12);
        assert_relative_eq!(t.norm_down, -0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_duplicate_and_invalid_additions() {
        let mut b = builder();
        b.add_overall("lumi", 0.02, -0.02).unwrap();
        assert!(matches!(b.add_overall("lumi", 0.01, -0.01), Err(Error::Config(_))));
        assert!(matches!(b.add_stat("stat", 3), Err(Error::Config(_))));
        assert!(b.add_overall("bad", f64::NAN, 0.0).is_err());
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_overall_and_stat_systematics() {
        let mut b = SampleBuilder::new("SR", "tt", hist(&[100.0, 1e-5, 4.0]), SampleSettings::default());
        b.add_overall("lumi", 0.02, -0.03).unwrap();
        b.add_stat("stat_bin0", 0).unwrap();
        b.add_stat("stat_bin1", 1).unwrap();
        let rec = finalize(b, &TemplateConfig::default()).unwrap();

        let lumi = rec.systematic("lumi").unwrap();
        assert!(!lumi.is_shape);
        assert!(lumi.shape_up.is_none());
        assert_relative_eq!(lumi.norm_up, 0.02, epsilon = 1e-12);
        assert_relative_eq!(lumi.norm_down, -0.03, epsilon = 1e-12);

        let stat = rec.systematic("stat_bin0").unwrap();
        assert_relative_eq!(stat.up.content(0), 110.0);
        assert_relative_eq!(stat.down.content(0), 90.0);
        assert_eq!(stat.up.content(2), 4.0);

        let tiny = rec.systematic("stat_bin1").unwrap();
        assert_relative_eq!(tiny.up.content(1), 1e-5 + SMALL_BIN_STAT_ERROR);
    }

    #[test]
    fn test_shape_only_clears_norm() {
        let mut b = builder();
        b.add_variation(
            "shape",
            VariationPair::both(hist(&[12.0, 10.0, 8.0]), hist(&[8.0, 10.0, 12.0])),
            SystematicSettings::new().component(Component::ShapeOnly),
        )
        .unwrap();
        let rec = finalize(b, &TemplateConfig::default()).unwrap();
        let t = rec.systematic("shape").unwrap();
        assert!(!t.is_norm);
        assert_eq!((t.norm_up, t.norm_down), (0.0, 0.0));
        assert!(t.model_shape_up.is_some());
    }

    #[test]
    fn test_forced_shape_and_scaling() {
        let mut b = builder();
        b.add_variation(
            "tilt",
            VariationPair::both(hist(&[11.0, 11.0, 11.0]), hist(&[9.0, 9.0, 9.0])),
            SystematicSettings::new().scales(2.0, 2.0).force_shape(ForceShapeType::Linear),
        )
        .unwrap();
        let rec = finalize(b, &TemplateConfig::default()).unwrap();
        let t = rec.systematic("tilt").unwrap();
        assert_eq!(t.up.contents(), &[12.0, 10.0, 8.0]);
        assert_eq!(t.down.contents(), &[8.0, 10.0, 12.0]);
        assert!(!t.is_norm);
    }

    #[test]
    fn test_missing_side_policy() {
        let settings = SystematicSettings::new().symmetrization(SymmetrizationType::TwoSided);

        let mut b = builder();
        b.add_variation("JER", VariationPair::new(Some(hist(&[11.0; 3])), None), settings.clone())
            .unwrap();
        let rec = finalize(b, &TemplateConfig::default()).unwrap();
        assert!(rec.systematic("JER").is_none());
        assert_eq!(rec.failures().len(), 1);
        assert_eq!(rec.failures()[0].category, "structural");
        assert!(rec.report().has_fatal());

        let lenient = TemplateConfig { crash_on_structural_mismatch: false, ..Default::default() };
        let mut b = builder();
        b.add_variation("JER", VariationPair::new(Some(hist(&[11.0; 3])), None), settings.clone())
            .unwrap();
        let rec = finalize(b, &lenient).unwrap();
        assert!(rec.systematic("JER").is_none());
        assert!(rec.failures().is_empty());
        assert!(!rec.report().has_fatal());

        let abort = TemplateConfig { abort_on_unit_failure: true, ..Default::default() };
        let mut b = builder();
        b.add_variation("JER", VariationPair::new(Some(hist(&[11.0; 3])), None), settings).unwrap();
        assert!(matches!(finalize(b, &abort), Err(Error::Structural(_))));
    }

    #[test]
    fn test_strict_mode_drops_anomalous_unit() {
        let strict = TemplateConfig { strict_mode: true, ..Default::default() };
        let mut b = builder();
        b.add_variation(
            "wild",
            VariationPair::both(hist(&[5000.0, 10.0, 10.0]), hist(&[9.0, 9.0, 9.0])),
            SystematicSettings::new(),
        )
        .unwrap();
        b.add_overall("lumi", 0.02, -0.02).unwrap();
        let rec = finalize(b, &strict).unwrap();
        assert!(rec.systematic("wild").is_none());
        assert!(rec.systematic("lumi").is_some());
        assert_eq!(rec.failures()[0].category, "numeric-anomaly");
        assert_eq!(rec.report().count(Severity::Fatal), 1);
    }

    #[test]
    fn test_check_reports_without_building() {
        let mut b = SampleBuilder::new("SR", "ttbar", hist(&[10.0, 0.0, 10.0]), SampleSettings::default());
        b.add_variation(
            "ISR",
            VariationPair::new(Some(hist(&[11.0, 1.0, 11.0])), None),
            SystematicSettings::new().symmetrization(SymmetrizationType::OneSided),
        )
        .unwrap();
        b.add_variation(
            "JER",
            VariationPair::new(Some(hist(&[11.0, 1.0, 11.0])), None),
            SystematicSettings::new().symmetrization(SymmetrizationType::TwoSided),
        )
        .unwrap();

        let report = b.check(&TemplateConfig::default());
        assert!(report.count(Severity::Warning) >= 1);
        let fatal: Vec<_> = report.issues().iter().filter(|i| i.is_fatal()).collect();
        assert_eq!(fatal.len(), 1);
        assert_eq!(fatal[0].scope, "SR/ttbar/JER");
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_sanitized_nominal_and_capped_variations() {
        let settings = SampleSettings { cap_variation: true, ..Default::default() };
        let mut b = SampleBuilder::new("CR", "fakes", hist(&[10.0, 0.0, 10.0]), settings);
        b.add_variation(
            "FF",
            VariationPair::both(hist(&[30.0, 1.0, 10.0]), hist(&[10.0, 1.0, 10.0])),
            SystematicSettings::new().smooth_level(10).smooth_option(SmoothOption::TChannel),
        )
        .unwrap();
        let rec = finalize(b, &TemplateConfig::default()).unwrap();
        assert!(rec.nominal().contents().iter().all(|&c| c > 0.0));
        assert_relative_eq!(rec.nominal().integral(), 20.0, max_relative = 1e-12);

        let t = rec.systematic("FF").unwrap();
        let n0 = rec.nominal().content(0);
        assert_relative_eq!(t.up.content(0), n0 * 1.99, max_relative = 1e-12);
        assert!(rec.report().count(Severity::Warning) >= 2);
    }
}
