//! Template job (JSON) parsing and engine setup.
//!
//! A job lists samples with their nominal and systematics. Histograms are
//! either inline or references into JSON histogram files resolved relative to
//! `histogram_dir` (itself relative to the job file).

use anyhow::{Context, Result, bail};
use ns_core::{Histogram, HistogramLoader};
use ns_templates::{
    JsonLoader, SampleSettings, SystematicSettings, TemplateConfig, TemplateEngine, VariationPair,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    #[serde(default)]
    pub config: TemplateConfig,
    /// Directory of histogram files, relative to the job file.
    #[serde(default)]
    pub histogram_dir: Option<PathBuf>,
    pub samples: Vec<SampleEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SampleEntry {
    pub region: String,
    pub sample: String,
    #[serde(default)]
    pub settings: SampleSettings,
    pub nominal: HistogramRef,
    #[serde(default)]
    pub systematics: Vec<SystematicEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystematicEntry {
    pub name: String,
    #[serde(default)]
    pub settings: SystematicSettings,
    #[serde(default)]
    pub up: Option<HistogramRef>,
    #[serde(default)]
    pub down: Option<HistogramRef>,
    /// Relative normalization shifts.
    #[serde(default)]
    pub overall: Option<OverallShift>,
    /// Nominal bin (0-based) whose stat error becomes a systematic.
    #[serde(default)]
    pub stat_bin: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverallShift {
    pub up: f64,
    pub down: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HistogramRef {
    File { file: String, name: String },
    Inline(Histogram),
}

impl HistogramRef {
    fn resolve(&self, loader: &dyn HistogramLoader) -> ns_core::Result<Histogram> {
        match self {
            HistogramRef::File { file, name } => loader.load(file, name),
            HistogramRef::Inline(h) => Ok(h.clone()),
        }
    }
}

pub fn read_job(path: &Path) -> Result<Job> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading job {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing job {}", path.display()))
}

impl Job {
    /// Build an engine holding every sample and systematic of the job.
    pub fn engine(&self, job_path: &Path) -> Result<TemplateEngine> {
        let base = job_path.parent().unwrap_or_else(|| Path::new("."));
        let loader = JsonLoader::new(match &self.histogram_dir {
            Some(dir) => base.join(dir),
            None => base.to_path_buf(),
        });

        let mut engine = TemplateEngine::new(self.config.clone());
        for s in &self.samples {
            let nominal = s
                .nominal
                .resolve(&loader)
                .with_context(|| format!("nominal of {}/{}", s.region, s.sample))?;
            engine.register_sample(&s.region, &s.sample, nominal, s.settings.clone())?;
            for syst in &s.systematics {
                add_systematic(&mut engine, &loader, s, syst)
                    .with_context(|| format!("systematic {}/{}/{}", s.region, s.sample, syst.name))?;
            }
        }
        tracing::info!(
            samples = self.samples.len(),
            root = %loader.root().display(),
            "job loaded"
        );
        Ok(engine)
    }
}

fn add_systematic(
    engine: &mut TemplateEngine,
    loader: &dyn HistogramLoader,
    sample: &SampleEntry,
    syst: &SystematicEntry,
) -> Result<()> {
    let (region, name) = (sample.region.as_str(), syst.name.as_str());
    let has_histograms = syst.up.is_some() || syst.down.is_some();
    match (syst.overall, syst.stat_bin, has_histograms) {
        (Some(shift), None, false) => {
            engine.add_overall(region, &sample.sample, name, shift.up, shift.down)?
        }
        (None, Some(bin), false) => engine.add_stat(region, &sample.sample, name, bin)?,
        (None, None, true) => {
            let side = |r: &Option<HistogramRef>| -> Result<Option<Histogram>> {
                match r.as_ref().map(|r| r.resolve(loader)).transpose() {
                    Ok(h) => Ok(h),
                    Err(ns_core::Error::NotFound(msg)) => {
                        tracing::warn!(systematic = name, "{msg}; treating side as missing");
                        Ok(None)
                    }
                    Err(e) => Err(e.into()),
                }
            };
            let pair = VariationPair::new(side(&syst.up)?, side(&syst.down)?);
            engine.add_variation(region, &sample.sample, name, pair, syst.settings.clone())?
        }
        _ => bail!("exactly one of up/down, overall or stat_bin must be given"),
    }
    Ok(())
}
