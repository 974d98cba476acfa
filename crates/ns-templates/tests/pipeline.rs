//! End-to-end template building through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use ns_core::{Histogram, HistogramLoader, Result, Smoother, SmoothingAlgorithm};
use ns_templates::{
    BinSanitizer, JsonLoader, MemoryLoader, SampleSettings, SanitizePolicy, Severity, SmoothOption,
    SymmetrizationType, SystematicSettings, TemplateConfig, TemplateEngine, ValidationOptions,
    ValidationReport, Validator, VariationPair,
};

fn hist(name: &str, contents: &[f64], errors: &[f64]) -> Histogram {
    Histogram::uniform(name, 0.0, contents.len() as f64, contents.to_vec(), errors.to_vec()).unwrap()
}

/// Replaces the relative deviation in every bin by the average relative deviation.
struct FlatRatio {
    calls: AtomicUsize,
}

impl Smoother for FlatRatio {
    fn smooth(
        &self,
        nominal: &Histogram,
        variation: &Histogram,
        _algorithm: &SmoothingAlgorithm,
    ) -> Result<Histogram> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let ratio = variation.integral() / nominal.integral();
        variation.derive(
            nominal.contents().iter().map(|n| n * ratio).collect(),
            variation.errors().to_vec(),
        )
    }

    fn name(&self) -> &str {
        "flat-ratio"
    }
}

#[test]
fn two_sided_pair_already_antisymmetric_is_kept() {
    let mut engine = TemplateEngine::new(TemplateConfig::default());
    engine
        .register_sample("SR", "ttbar", hist("nom", &[10.0; 3], &[1.0; 3]), SampleSettings::default())
        .unwrap();
    engine
        .add_variation(
            "SR",
            "ttbar",
            "JES",
            VariationPair::both(
                hist("up", &[12.0, 9.0, 11.0], &[1.0; 3]),
                hist("down", &[8.0, 11.0, 9.0], &[1.0; 3]),
            ),
            SystematicSettings::new().symmetrization(SymmetrizationType::TwoSided),
        )
        .unwrap();

    let rec = engine.finalize("SR", "ttbar").unwrap();
    let jes = rec.systematic("JES").unwrap();
    for (got, want) in jes.up.contents().iter().zip([12.0, 9.0, 11.0]) {
        assert_relative_eq!(*got, want, epsilon = 1e-12);
    }
    for (got, want) in jes.down.contents().iter().zip([8.0, 11.0, 9.0]) {
        assert_relative_eq!(*got, want, epsilon = 1e-12);
    }
}

#[test]
fn empty_nominal_bin_borrows_smallest_error() {
    let nominal = hist("nom", &[0.0, 5.0, 7.0], &[0.0, 0.5, 0.7]);
    let mut report = ValidationReport::new();
    let fixed = BinSanitizer::new(SanitizePolicy::default()).sanitize_nominal(&nominal, &mut report).unwrap();

    assert_relative_eq!(fixed.content(0), 1e-6, max_relative = 1e-6);
    assert_eq!(fixed.error(0), 0.5);
    assert_relative_eq!(fixed.integral(), 12.0, max_relative = 1e-9);
    assert!(report.count(Severity::Warning) >= 1);
}

#[test]
fn one_sided_down_only_synthesizes_up() {
    let mut engine = TemplateEngine::new(TemplateConfig::default());
    engine
        .register_sample("SR", "wjets", hist("nom", &[10.0; 3], &[1.0; 3]), SampleSettings::default())
        .unwrap();
    engine
        .add_variation(
            "SR",
            "wjets",
            "scale",
            VariationPair::new(None, Some(hist("down", &[8.0; 3], &[1.0; 3]))),
            SystematicSettings::new().symmetrization(SymmetrizationType::OneSided),
        )
        .unwrap();

    let rec = engine.finalize("SR", "wjets").unwrap();
    let t = rec.systematic("scale").unwrap();
    assert_eq!(t.up.contents(), &[12.0, 12.0, 12.0]);
    assert_eq!(t.down.contents(), &[8.0, 8.0, 8.0]);
    assert_eq!(t.up.name(), "SR_wjets_scale_Up");
}

#[test]
fn smoother_is_called_only_for_shape_systematics() {
    let smoother = Arc::new(FlatRatio { calls: AtomicUsize::new(0) });
    let mut engine = TemplateEngine::new(TemplateConfig::default()).with_smoother(smoother.clone());
    engine
        .register_sample("SR", "sig", hist("nom", &[10.0, 20.0, 30.0, 40.0], &[1.0; 4]), SampleSettings::default())
        .unwrap();
    engine
        .add_variation(
            "SR",
            "sig",
            "PDF",
            VariationPair::both(
                hist("up", &[11.0, 23.0, 31.0, 45.0], &[1.0; 4]),
                hist("down", &[9.0, 18.0, 29.0, 36.0], &[1.0; 4]),
            ),
            SystematicSettings::new()
                .symmetrization(SymmetrizationType::TwoSided)
                .smooth_level(2)
                .smooth_option(SmoothOption::MaxVariation),
        )
        .unwrap();
    engine.add_overall("SR", "sig", "lumi", 0.017, -0.017).unwrap();

    let rec = engine.finalize("SR", "sig").unwrap();
    assert_eq!(smoother.calls.load(Ordering::Relaxed), 2);

    let pdf = rec.systematic("PDF").unwrap();
    let ratios: Vec<f64> =
        pdf.up.contents().iter().zip(rec.nominal().contents()).map(|(u, n)| u / n).collect();
    for r in &ratios {
        assert_relative_eq!(*r, ratios[0], max_relative = 1e-12);
    }
    let shape_up = pdf.shape_up.as_ref().unwrap();
    assert_relative_eq!(shape_up.integral(), rec.nominal().integral(), max_relative = 1e-12);
}

#[test]
fn blinded_model_binning_follows_sample_settings() {
    let settings = SampleSettings { blinded_bins: vec![3], bin_scales: vec![1.0, 2.0, 1.0], ..Default::default() };
    let mut engine = TemplateEngine::new(TemplateConfig::default());
    engine.register_sample("SR", "sig", hist("nom", &[4.0, 5.0, 6.0, 7.0], &[1.0; 4]), settings).unwrap();
    engine.add_stat("SR", "sig", "stat_bin1", 1).unwrap();

    let rec = engine.finalize("SR", "sig").unwrap();
    let model = rec.model_nominal();
    assert_eq!(model.name(), "SR_sig_regBin");
    assert_eq!(model.n_bins(), 3);
    assert_relative_eq!(model.content(1), 10.0, max_relative = 1e-12);

    let stat = rec.systematic("stat_bin1").unwrap();
    assert_relative_eq!(stat.model_up.content(1), 12.0, max_relative = 1e-12);
    assert_relative_eq!(stat.model_down.content(1), 8.0, max_relative = 1e-12);
}

#[test]
fn finalize_all_isolates_failing_samples() {
    let mut engine = TemplateEngine::new(TemplateConfig::default());
    engine.register_sample("SR", "good", hist("nom", &[5.0, 5.0], &[1.0; 2]), SampleSettings::default()).unwrap();
    engine
        .register_sample(
            "SR",
            "blind",
            hist("nom", &[5.0, 5.0], &[1.0; 2]),
            SampleSettings { blinded_bins: vec![0, 1], ..Default::default() },
        )
        .unwrap();
    engine
        .add_variation(
            "SR",
            "good",
            "mismatch",
            VariationPair::both(hist("up", &[6.0; 3], &[1.0; 3]), hist("down", &[4.0; 3], &[1.0; 3])),
            SystematicSettings::new(),
        )
        .unwrap();

    let all = engine.finalize_all();
    let good = all[&("SR".to_string(), "good".to_string())].as_ref().unwrap();
    assert!(good.systematic("mismatch").is_none());
    assert_eq!(good.failures()[0].category, "structural");
    assert!(all[&("SR".to_string(), "blind".to_string())].is_err());
}

#[test]
fn validator_is_idempotent_on_sanitized_input() {
    let mut report = ValidationReport::new();
    let nominal = BinSanitizer::new(SanitizePolicy::default())
        .sanitize_nominal(&hist("nom", &[3.0, 0.0, -1.0, 8.0], &[1.0, 0.0, 1.0, 2.0]), &mut report)
        .unwrap();
    let up = nominal.scaled(1.1);
    let down = nominal.scaled(0.9);

    let validator = Validator::new(ValidationOptions::default());
    let first = validator
        .validate(Some(&nominal), Some(&up), Some(&down), &mut report)
        .into_checked()
        .unwrap()
        .unwrap();

    let mut second_report = ValidationReport::new();
    let second = validator
        .validate(Some(&first.nominal), Some(&first.up), Some(&first.down), &mut second_report)
        .into_checked()
        .unwrap()
        .unwrap();
    assert!(second_report.is_empty());
    assert_eq!(second.nominal, first.nominal);
    assert_eq!(second.up, first.up);
}

#[test]
fn loaders_feed_the_engine() {
    let dir = std::env::temp_dir().join(format!("ns-templates-pipeline-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let nominal = hist("", &[10.0, 10.0], &[1.0, 1.0]);
    let up = hist("", &[11.0, 12.0], &[1.0, 1.0]);
    let file: std::collections::BTreeMap<&str, &Histogram> = [("nom", &nominal), ("jer_up", &up)].into();
    std::fs::write(dir.join("ttbar.json"), serde_json::to_string(&file).unwrap()).unwrap();

    let json = JsonLoader::new(&dir);
    let mut memory = MemoryLoader::new();
    memory.insert("ttbar.json", "nom", json.load("ttbar.json", "nom").unwrap());

    let mut engine = TemplateEngine::new(TemplateConfig::default());
    engine.load_sample(&memory, "SR", "ttbar", "ttbar.json", "nom", SampleSettings::default()).unwrap();
    engine
        .load_variation(
            &json,
            "SR",
            "ttbar",
            "JER",
            Some(("ttbar.json", "jer_up")),
            None,
            SystematicSettings::new().symmetrization(SymmetrizationType::OneSided),
        )
        .unwrap();
    let rec = engine.finalize("SR", "ttbar").unwrap();
    let jer = rec.systematic("JER").unwrap();
    assert_eq!(jer.down.contents(), &[9.0, 8.0]);
    assert_relative_eq!(jer.norm_up, 0.15, epsilon = 1e-12);
    std::fs::remove_dir_all(&dir).ok();
}
