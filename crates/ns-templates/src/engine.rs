//! Template engine: owns the sample builders of a whole analysis.
//!
//! Samples are keyed by `(region, sample)`. Histograms can be added directly
//! or pulled through a [`HistogramLoader`]; `finalize_all` processes every
//! sample in parallel.

use std::collections::BTreeMap;
use std::sync::Arc;

use ns_core::{Error, Histogram, HistogramLoader, PassThroughSmoother, Result, Smoother};
use rayon::prelude::*;

use crate::config::{SampleSettings, SystematicSettings, TemplateConfig};
use crate::report::ValidationReport;
use crate::sample::{SampleBuilder, SampleRecord};
use crate::sanitize::VariationPair;

/// `(region, sample)` key.
pub type SampleKey = (String, String);

/// Builds [`SampleRecord`]s for many (region, sample) pairs.
pub struct TemplateEngine {
    config: TemplateConfig,
    smoother: Arc<dyn Smoother>,
    builders: BTreeMap<SampleKey, SampleBuilder>,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("config", &self.config)
            .field("smoother", &self.smoother.name())
            .field("samples", &self.builders.len())
            .finish()
    }
}

fn key(region: &str, sample: &str) -> SampleKey {
    (region.to_string(), sample.to_string())
}

impl TemplateEngine {
    /// Engine without a smoothing backend ([`PassThroughSmoother`]).
    pub fn new(config: TemplateConfig) -> Self {
        Self { config, smoother: Arc::new(PassThroughSmoother), builders: BTreeMap::new() }
    }

    /// Use `smoother` for every smoothing request.
    pub fn with_smoother(mut self, smoother: Arc<dyn Smoother>) -> Self {
        self.smoother = smoother;
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    /// Register a sample from its nominal histogram.
    pub fn register_sample(
        &mut self,
        region: &str,
        sample: &str,
        nominal: Histogram,
        settings: SampleSettings,
    ) -> Result<()> {
        let k = key(region, sample);
        if self.builders.contains_key(&k) {
            return Err(Error::Config(format!("sample {region}/{sample} is already registered")));
        }
        log::debug!("registering {region}/{sample} ({} bins)", nominal.n_bins());
        self.builders.insert(k, SampleBuilder::new(region, sample, nominal, settings));
        Ok(())
    }

    /// Register a sample whose nominal is loaded from `file`/`name`.
    pub fn load_sample(
        &mut self,
        loader: &dyn HistogramLoader,
        region: &str,
        sample: &str,
        file: &str,
        name: &str,
        settings: SampleSettings,
    ) -> Result<()> {
        let nominal = loader.load(file, name)?;
        self.register_sample(region, sample, nominal, settings)
    }

    fn builder_mut(&mut self, region: &str, sample: &str) -> Result<&mut SampleBuilder> {
        self.builders
            .get_mut(&key(region, sample))
            .ok_or_else(|| Error::NotFound(format!("sample {region}/{sample}")))
    }

    /// Add a histogram systematic to a registered sample.
    pub fn add_variation(
        &mut self,
        region: &str,
        sample: &str,
        name: &str,
        variations: VariationPair,
        settings: SystematicSettings,
    ) -> Result<()> {
        self.builder_mut(region, sample)?.add_variation(name, variations, settings)
    }

    /// Load the up/down histograms of a systematic and add it. A side that
    /// does not exist in its file is treated as missing.
    #[allow(clippy::too_many_arguments)]
    pub fn load_variation(
        &mut self,
        loader: &dyn HistogramLoader,
        region: &str,
        sample: &str,
        name: &str,
        up: Option<(&str, &str)>,
        down: Option<(&str, &str)>,
        settings: SystematicSettings,
    ) -> Result<()> {
        let fetch = |side: Option<(&str, &str)>| match side {
            None => Ok(None),
            Some((file, hist)) => match loader.load(file, hist) {
                Ok(h) => Ok(Some(h)),
                Err(Error::NotFound(msg)) => {
                    log::warn!("{region}/{sample}/{name}: {msg}");
                    Ok(None)
                }
                Err(e) => Err(e),
            },
        };
        let pair = VariationPair::new(fetch(up)?, fetch(down)?);
        self.add_variation(region, sample, name, pair, settings)
    }

    /// Add a normalization-only systematic.
    pub fn add_overall(&mut self, region: &str, sample: &str, name: &str, up: f64, down: f64) -> Result<()> {
        self.builder_mut(region, sample)?.add_overall(name, up, down)
    }

    /// Add the statistical uncertainty of one nominal bin.
    pub fn add_stat(&mut self, region: &str, sample: &str, name: &str, bin: usize) -> Result<()> {
        self.builder_mut(region, sample)?.add_stat(name, bin)
    }

    /// Builder of a registered sample.
    pub fn builder(&self, region: &str, sample: &str) -> Option<&SampleBuilder> {
        self.builders.get(&key(region, sample))
    }

    /// Keys of all pending samples, in order.
    pub fn samples(&self) -> impl Iterator<Item = &SampleKey> {
        self.builders.keys()
    }

    /// Sanitize and validate every pending sample without building templates.
    pub fn check_all(&self) -> BTreeMap<SampleKey, ValidationReport> {
        let config = &self.config;
        self.builders.par_iter().map(|(k, builder)| (k.clone(), builder.check(config))).collect()
    }

    /// Finalize one sample and remove its builder.
    pub fn finalize(&mut self, region: &str, sample: &str) -> Result<SampleRecord> {
        let builder = self
            .builders
            .remove(&key(region, sample))
            .ok_or_else(|| Error::NotFound(format!("sample {region}/{sample}")))?;
        builder.finalize(&self.config, &*self.smoother)
    }

    /// Finalize every pending sample in parallel.
    pub fn finalize_all(&mut self) -> BTreeMap<SampleKey, Result<SampleRecord>> {
        let builders = std::mem::take(&mut self.builders);
        log::info!("finalizing {} samples with smoother '{}'", builders.len(), self.smoother.name());
        let config = &self.config;
        let smoother = &*self.smoother;
        builders
            .into_par_iter()
            .map(|(k, builder)| {
                let record = builder.finalize(config, smoother);
                if let Err(e) = &record {
                    log::error!("{}/{}: {e}", k.0, k.1);
                }
                (k, record)
            })
            .collect()
    }
}
