//! # ns-templates
//!
//! Systematic template construction and validation for NextStat.
//!
//! This crate provides:
//! - Bin sanitization of nominal and variation histograms (yield preserving)
//! - Symmetrization: one-sided, two-sided, absolute mean, maximum
//! - Smoothing orchestration against an external [`ns_core::Smoother`]
//! - Structural and numerical validation with local repairs
//! - Norm/shape decomposition and the uniform `[0, 1]` model binning
//!
//! ## Architecture
//!
//! Every stage is a function from histograms to new histograms plus entries
//! in an explicit [`ValidationReport`]. [`SampleBuilder::finalize`] chains the
//! stages for one (region, sample); [`TemplateEngine`] owns many builders and
//! finalizes them in parallel with rayon.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Uniform `[0, 1]` model binning, blinding and per-bin scales.
pub mod binning;
/// Engine, sample and systematic settings.
pub mod config;
/// Multi-sample engine.
pub mod engine;
/// Histogram loaders (in-memory, JSON files).
pub mod loader;
/// Validation report.
pub mod report;
/// Per-sample builder and finalized records.
pub mod sample;
/// Zero/negative bin repair.
pub mod sanitize;
/// Forced linear / triangular shapes.
pub mod shape;
/// Smoothing option mapping and orchestration.
pub mod smoothing;
/// Symmetrization algorithms.
pub mod symmetrize;
/// Structural and numerical checks.
pub mod validate;

pub use binning::transform_binning;
pub use config::{
    Component, ForceShapeType, SampleSettings, SmoothOption, SymmetrizationType, SystematicSettings,
    TemplateConfig,
};
pub use engine::{SampleKey, TemplateEngine};
pub use loader::{JsonLoader, MemoryLoader};
pub use report::{Issue, IssueKind, Severity, ValidationReport};
pub use sample::{SampleBuilder, SampleRecord, SystematicSource, SystematicTemplate, UnitFailure};
pub use sanitize::{BinSanitizer, SanitizePolicy, VariationPair};
pub use smoothing::SmoothingOrchestrator;
pub use symmetrize::symmetrize;
pub use validate::{ValidationOptions, ValidationResult, Validator};
