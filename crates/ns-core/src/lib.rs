//! # ns-core
//!
//! Core types for NextStat template building: the [`Histogram`] value type,
//! the [`Error`] taxonomy shared by every stage, and the collaborator traits
//! ([`Smoother`], [`HistogramLoader`]) the engine is written against.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{HistogramLoader, PassThroughSmoother, Smoother, SmoothingAlgorithm};
pub use types::Histogram;
