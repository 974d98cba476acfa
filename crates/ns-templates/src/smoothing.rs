//! Ordering of symmetrization and smoothing, and the variation cap.

use ns_core::{Error, Histogram, Result, Smoother, SmoothingAlgorithm};

use crate::config::{SmoothOption, SymmetrizationType};
use crate::report::{IssueKind, ValidationReport};
use crate::symmetrize::symmetrize;

/// Relative tolerance handed to the default smoothing algorithm.
pub const MAX_VARIATION_TOLERANCE: f64 = 0.08;

/// Largest relative deviation kept by [`cap_variation`].
pub const VARIATION_CAP: f64 = 0.99;

const TTRES_DEPENDENT: u32 = 10;
const TTRES_INDEPENDENT: u32 = 100;
const TTRES_UNKNOWN: u32 = 1000;

impl SmoothOption {
    /// Algorithm request for `level`, or `None` when the level is not
    /// supported by this option.
    pub fn algorithm(self, level: u32) -> Option<SmoothingAlgorithm> {
        let named = SmoothingAlgorithm::named;
        match self {
            SmoothOption::MaxVariation => Some(SmoothingAlgorithm {
                name: "smoothTRExDefault",
                tolerance: Some(MAX_VARIATION_TOLERANCE),
                n_bins: Some((level / 10) as usize),
            }),
            SmoothOption::TtbarResonance => match level {
                TTRES_DEPENDENT..TTRES_INDEPENDENT => Some(named("smoothTtresDependent")),
                TTRES_INDEPENDENT..TTRES_UNKNOWN => Some(named("smoothTtresIndependent")),
                _ => None,
            },
            SmoothOption::CommonToolSmoothMonotonic => Some(named("smoothRebinMonotonic")),
            SmoothOption::CommonToolSmoothParabolic => Some(named("smoothRebinParabolic")),
            SmoothOption::TChannel => Some(named("smoothTchannel")),
            SmoothOption::KernelRatioUniform => Some(named("smoothRatioUniformKernel")),
            SmoothOption::KernelDeltaGauss => Some(named("smoothDeltaGaussKernel")),
            SmoothOption::KernelRatioGauss => Some(named("smoothRatioGaussKernel")),
        }
    }
}

/// Runs symmetrization and smoothing in the order the symmetrization type needs.
///
/// Two-sided pairs are smoothed side by side first and symmetrized after;
/// every other type is symmetrized first and the results smoothed.
pub struct SmoothingOrchestrator<'a> {
    smoother: &'a dyn Smoother,
}

impl<'a> SmoothingOrchestrator<'a> {
    /// Orchestrator delegating the numerics to `smoother`.
    pub fn new(smoother: &'a dyn Smoother) -> Self {
        Self { smoother }
    }

    /// Symmetrize and smooth one variation pair.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &self,
        sym: SymmetrizationType,
        level: u32,
        option: SmoothOption,
        nominal: &Histogram,
        up: Option<&Histogram>,
        down: Option<&Histogram>,
        report: &mut ValidationReport,
    ) -> Result<(Histogram, Histogram)> {
        if sym == SymmetrizationType::TwoSided {
            let up = up.map(|h| self.smooth(level, option, nominal, h, report)).transpose()?;
            let down = down.map(|h| self.smooth(level, option, nominal, h, report)).transpose()?;
            return symmetrize(sym, nominal, up.as_ref(), down.as_ref(), report);
        }
        let (up, down) = symmetrize(sym, nominal, up, down, report)?;
        Ok((
            self.smooth(level, option, nominal, &up, report)?,
            self.smooth(level, option, nominal, &down, report)?,
        ))
    }

    /// Smooth a single variation; returns it unchanged when smoothing does not apply.
    pub fn smooth(
        &self,
        level: u32,
        option: SmoothOption,
        nominal: &Histogram,
        variation: &Histogram,
        report: &mut ValidationReport,
    ) -> Result<Histogram> {
        if level == 0 {
            return Ok(variation.clone());
        }
        if nominal.n_bins() == 1 {
            report.debug(format!("skipping smoothing of '{}': single bin", variation.name()));
            return Ok(variation.clone());
        }
        let Some(algorithm) = option.algorithm(level) else {
            report.warn(
                IssueKind::Config,
                format!("smoothing level {level} is not supported by {option}; no smoothing applied"),
            );
            return Ok(variation.clone());
        };

        let smoothed = self.smoother.smooth(nominal, variation, &algorithm)?;
        if smoothed.n_bins() != variation.n_bins() {
            return Err(Error::Structural(format!(
                "smoother '{}' returned {} bins for '{}' ({} expected)",
                self.smoother.name(),
                smoothed.n_bins(),
                variation.name(),
                variation.n_bins()
            )));
        }
        report.debug(format!("smoothed '{}' with {}", variation.name(), algorithm.name));
        variation.derive(smoothed.contents().to_vec(), smoothed.errors().to_vec())
    }
}

/// Clip relative deviations from the nominal to ±99%. Bins with zero
/// nominal are left alone.
pub fn cap_variation(
    variation: &Histogram,
    nominal: &Histogram,
    report: &mut ValidationReport,
) -> Histogram {
    let mut clipped = 0usize;
    let out = variation.map_contents(|i, v| {
        let n = nominal.content(i);
        if n == 0.0 {
            return v;
        }
        let rel = (v - n) / n;
        if rel.abs() > VARIATION_CAP {
            clipped += 1;
            n * (1.0 + VARIATION_CAP.copysign(rel))
        } else {
            v
        }
    });
    if clipped > 0 {
        report.warn(
            IssueKind::NumericAnomaly,
            format!("'{}': {clipped} bins capped at ±99% of the nominal", variation.name()),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ns_core::PassThroughSmoother;
    use std::sync::Mutex;

    /// Records the requested algorithms and flattens the variation to its mean.
    #[derive(Default)]
    struct Flatten {
        calls: Mutex<Vec<&'static str>>,
    }

    impl Smoother for Flatten {
        fn smooth(
            &self,
            _nominal: &Histogram,
            variation: &Histogram,
            algorithm: &SmoothingAlgorithm,
        ) -> Result<Histogram> {
            self.calls.lock().unwrap().push(algorithm.name);
            let mean = variation.integral() / variation.n_bins() as f64;
            Ok(variation.map_contents(|_, _| mean))
        }

        fn name(&self) -> &str {
            "flatten"
        }
    }

    struct Truncate;

    impl Smoother for Truncate {
        fn smooth(&self, _: &Histogram, v: &Histogram, _: &SmoothingAlgorithm) -> Result<Histogram> {
            Histogram::uniform("t", 0.0, 1.0, vec![1.0], vec![1.0])
                .map(|h| if v.n_bins() > 1 { h } else { v.clone() })
        }

        fn name(&self) -> &str {
            "truncate"
        }
    }

    fn hist(name: &str, contents: &[f64]) -> Histogram {
        let errors = vec![1.0; contents.len()];
        Histogram::uniform(name, 0.0, 1.0, contents.to_vec(), errors).unwrap()
    }

    #[test]
    fn test_algorithm_mapping() {
        let a = SmoothOption::MaxVariation.algorithm(40).unwrap();
        assert_eq!(a.name, "smoothTRExDefault");
        assert_eq!(a.n_bins, Some(4));
        assert_eq!(a.tolerance, Some(0.08));
        assert_eq!(SmoothOption::TtbarResonance.algorithm(10).unwrap().name, "smoothTtresDependent");
        assert_eq!(
            SmoothOption::TtbarResonance.algorithm(999).unwrap().name,
            "smoothTtresIndependent"
        );
        assert!(SmoothOption::TtbarResonance.algorithm(5).is_none());
        assert!(SmoothOption::TtbarResonance.algorithm(1000).is_none());
        assert_eq!(SmoothOption::TChannel.algorithm(1).unwrap().name, "smoothTchannel");
        assert_eq!(
            SmoothOption::KernelDeltaGauss.algorithm(1).unwrap().name,
            "smoothDeltaGaussKernel"
        );
    }

    #[test]
    fn test_two_sided_smooths_before_symmetrizing() {
        let smoother = Flatten::default();
        let orch = SmoothingOrchestrator::new(&smoother);
        let nom = hist("n", &[10.0, 10.0]);
        let up = hist("u", &[14.0, 10.0]);
        let down = hist("d", &[10.0, 10.0]);
        let mut report = ValidationReport::new();
        let (u, d) = orch
            .process(
                SymmetrizationType::TwoSided,
                20,
                SmoothOption::CommonToolSmoothMonotonic,
                &nom,
                Some(&up),
                Some(&down),
                &mut report,
            )
            .unwrap();
        // up flattened to 12, then symmetrized against the flat down
        assert_relative_eq!(u.content(0), 11.0);
        assert_relative_eq!(u.content(1), 11.0);
        assert_relative_eq!(d.content(0), 9.0);
        assert_eq!(smoother.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_one_sided_symmetrizes_before_smoothing() {
        let smoother = Flatten::default();
        let orch = SmoothingOrchestrator::new(&smoother);
        let nom = hist("n", &[10.0, 10.0]);
        let up = hist("u", &[14.0, 10.0]);
        let (u, d) = orch
            .process(
                SymmetrizationType::OneSided,
                20,
                SmoothOption::MaxVariation,
                &nom,
                Some(&up),
                None,
                &mut ValidationReport::new(),
            )
            .unwrap();
        assert_eq!(u.contents(), &[12.0, 12.0]);
        assert_eq!(d.contents(), &[8.0, 8.0]);
        assert_eq!(*smoother.calls.lock().unwrap(), vec!["smoothTRExDefault"; 2]);
    }

    #[test]
    fn test_smoothing_skipped() {
        let smoother = Flatten::default();
        let orch = SmoothingOrchestrator::new(&smoother);
        let mut report = ValidationReport::new();
        let nom = hist("n", &[10.0, 10.0]);
        let up = hist("u", &[14.0, 10.0]);

        assert_eq!(orch.smooth(0, SmoothOption::MaxVariation, &nom, &up, &mut report).unwrap(), up);
        let out = orch.smooth(5, SmoothOption::TtbarResonance, &nom, &up, &mut report).unwrap();
        assert_eq!(out, up);
        assert_eq!(report.count(crate::report::Severity::Warning), 1);

        let nom1 = hist("n", &[10.0]);
        let up1 = hist("u", &[14.0]);
        let out = orch.smooth(40, SmoothOption::MaxVariation, &nom1, &up1, &mut report).unwrap();
        assert_eq!(out, up1);
        assert!(smoother.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bin_count_change_is_structural() {
        let orch = SmoothingOrchestrator::new(&Truncate);
        let nom = hist("n", &[10.0, 10.0]);
        let up = hist("u", &[14.0, 10.0]);
        let err = orch
            .smooth(10, SmoothOption::KernelRatioGauss, &nom, &up, &mut ValidationReport::new())
            .unwrap_err();
        assert!(matches!(err, Error::Structural(_)));

        let pass = SmoothingOrchestrator::new(&PassThroughSmoother);
        let out = pass
            .smooth(10, SmoothOption::KernelRatioGauss, &nom, &up, &mut ValidationReport::new())
            .unwrap();
        assert_eq!(out, up);
    }

    #[test]
    fn test_cap_variation() {
        let nom = hist("n", &[10.0, 10.0, 0.0, 10.0]);
        let var = hist("v", &[25.0, 0.05, 3.0, 15.0]);
        let mut report = ValidationReport::new();
        let capped = cap_variation(&var, &nom, &mut report);
        assert_relative_eq!(capped.content(0), 19.9, max_relative = 1e-12);
        assert_relative_eq!(capped.content(1), 0.1, max_relative = 1e-12);
        assert_eq!(capped.content(2), 3.0);
        assert_eq!(capped.content(3), 15.0);
        assert_eq!(report.len(), 1);
    }
}
