//! Core traits for NextStat
//!
//! This module defines the collaborator seams of template building: the
//! engine depends only on these traits, never on a concrete smoothing
//! library or histogram store.

use crate::{Histogram, Result};

/// Smoothing algorithm request handed to a [`Smoother`].
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingAlgorithm {
    /// Algorithm name understood by the smoothing library (e.g. `"smoothTRExDefault"`).
    pub name: &'static str,
    /// Relative tolerance, for algorithms that take one.
    pub tolerance: Option<f64>,
    /// Maximum number of slope changes / rebinning level, for algorithms that take one.
    pub n_bins: Option<usize>,
}

impl SmoothingAlgorithm {
    /// Plain algorithm without extra parameters.
    pub const fn named(name: &'static str) -> Self {
        Self { name, tolerance: None, n_bins: None }
    }
}

/// External smoothing library.
///
/// Receives a nominal/variation pair and returns a smoothed variation with the
/// same number of bins. Implementations are stateless per call and may be
/// invoked concurrently.
pub trait Smoother: Send + Sync {
    /// Smooth `variation` relative to `nominal`.
    fn smooth(
        &self,
        nominal: &Histogram,
        variation: &Histogram,
        algorithm: &SmoothingAlgorithm,
    ) -> Result<Histogram>;

    /// Backend name (for logs)
    fn name(&self) -> &str;
}

/// Histogram source (ROOT files, JSON dumps, in-memory fixtures, ...).
pub trait HistogramLoader: Send + Sync {
    /// Load histogram `name` from `file`. Fails with [`crate::Error::NotFound`]
    /// when it does not exist.
    fn load(&self, file: &str, name: &str) -> Result<Histogram>;
}

/// Smoother that returns the variation unchanged.
///
/// Used when no smoothing library is linked in; every call is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughSmoother;

impl Smoother for PassThroughSmoother {
    fn smooth(
        &self,
        _nominal: &Histogram,
        variation: &Histogram,
        _algorithm: &SmoothingAlgorithm,
    ) -> Result<Histogram> {
        Ok(variation.clone())
    }

    fn name(&self) -> &str {
        "pass-through"
    }
}
