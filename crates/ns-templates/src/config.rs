//! Configuration types for template building.
//!
//! All option enums are closed: names are parsed once at the boundary
//! (`FromStr` / serde) and unknown names become [`Error::Config`].

use std::fmt;
use std::str::FromStr;

use ns_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Implements `Display`, `FromStr` and the string conversions serde uses.
///
/// Parsing is case-insensitive and ignores `_`, `-` and spaces, so both
/// `"TWO_SIDED"` and `"twosided"` are accepted.
macro_rules! named_enum {
    ($ty:ident, $what:literal, { $($variant:ident => $name:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $ty {
            /// Canonical name.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let key: String = s
                    .chars()
                    .filter(|c| !matches!(c, '_' | '-' | ' '))
                    .map(|c| c.to_ascii_uppercase())
                    .collect();
                $(
                    if key == $name.replace('_', "") $(|| key == $alias)* {
                        return Ok($ty::$variant);
                    }
                )+
                Err(Error::Config(format!(concat!("unknown ", $what, " '{}'"), s)))
            }
        }

        impl TryFrom<String> for $ty {
            type Error = Error;

            fn try_from(s: String) -> Result<Self> {
                s.parse()
            }
        }

        impl From<$ty> for String {
            fn from(v: $ty) -> String {
                v.as_str().to_string()
            }
        }
    };
}

/// How a variation pair is symmetrized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SymmetrizationType {
    /// Keep both sides as given.
    #[default]
    None,
    /// Mirror the single real variation around the nominal.
    OneSided,
    /// Average the signed up/down deviations.
    TwoSided,
    /// Average the absolute up/down deviations.
    AbsMean,
    /// Keep the larger of the two deviations per bin.
    Maximum,
}

named_enum!(SymmetrizationType, "symmetrization type", {
    None => "NONE" | "NOSYMMETRIZATION",
    OneSided => "ONE_SIDED" | "SYMMETRIZEONESIDED",
    TwoSided => "TWO_SIDED" | "SYMMETRIZETWOSIDED",
    AbsMean => "ABS_MEAN" | "SYMMETRIZEABSMEAN",
    Maximum => "MAXIMUM" | "SYMMETRIZEMAXIMUM",
});

/// Smoothing algorithm family handed to the external smoother.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SmoothOption {
    /// Rebin until the number of slope changes is below `level / 10`.
    #[default]
    MaxVariation,
    /// ttbar-resonance smoothing; the level selects the dependent/independent flavour.
    TtbarResonance,
    /// Monotonic rebinning.
    CommonToolSmoothMonotonic,
    /// Parabolic rebinning.
    CommonToolSmoothParabolic,
    /// Uniform kernel on the ratio.
    KernelRatioUniform,
    /// Gaussian kernel on the difference.
    KernelDeltaGauss,
    /// Gaussian kernel on the ratio.
    KernelRatioGauss,
    /// Single-top t-channel smoothing.
    TChannel,
}

named_enum!(SmoothOption, "smoothing option", {
    MaxVariation => "MAX_VARIATION" | "MAXVAR" | "TREXDEFAULT",
    TtbarResonance => "TTBAR_RESONANCE" | "TTBARRES",
    CommonToolSmoothMonotonic => "COMMON_TOOL_SMOOTH_MONOTONIC",
    CommonToolSmoothParabolic => "COMMON_TOOL_SMOOTH_PARABOLIC",
    KernelRatioUniform => "KERNEL_RATIO_UNIFORM",
    KernelDeltaGauss => "KERNEL_DELTA_GAUSS",
    KernelRatioGauss => "KERNEL_RATIO_GAUSS",
    TChannel => "T_CHANNEL",
});

/// Shape forced onto a variation before symmetrization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ForceShapeType {
    /// Leave the variation as it is.
    #[default]
    None,
    /// Shift weight falls linearly from +1 in the first bin to -1 in the last.
    Linear,
    /// Shift weight rises from 0 to 1 at the centre and falls back to 0.
    Triangular,
}

named_enum!(ForceShapeType, "force-shape type", {
    None => "NONE" | "NOSHAPE",
    Linear => "LINEAR",
    Triangular => "TRIANGULAR",
});

/// Which components of a histogram systematic enter the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Component {
    /// Normalization and shape.
    #[default]
    NormAndShape,
    /// Normalization only (shape dropped).
    NormOnly,
    /// Shape only (normalization dropped).
    ShapeOnly,
}

named_enum!(Component, "systematic component", {
    NormAndShape => "NORM_AND_SHAPE" | "NORMSHAPE" | "OVERALLHISTO",
    NormOnly => "NORM_ONLY" | "OVERALL",
    ShapeOnly => "SHAPE_ONLY" | "SHAPE",
});

/// Global template-building policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Promote data-quality issues and numeric anomalies to fatal.
    pub strict_mode: bool,
    /// Borrow the smallest positive error for repaired nominal bins without one.
    pub guess_stat_error: bool,
    /// Rescale a nominal with non-positive initial yield to a total of `1e-6`.
    pub correct_norm_for_negative_integral: bool,
    /// Treat missing histograms and binning mismatches as fatal.
    pub crash_on_structural_mismatch: bool,
    /// Fail the whole sample when one systematic fails.
    pub abort_on_unit_failure: bool,
    /// Default smoothing family.
    pub smooth_option: SmoothOption,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            guess_stat_error: true,
            correct_norm_for_negative_integral: false,
            crash_on_structural_mismatch: true,
            abort_on_unit_failure: false,
            smooth_option: SmoothOption::MaxVariation,
        }
    }
}

impl TemplateConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Per-(region, sample) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleSettings {
    /// Require strictly positive nominal bins (background-like samples);
    /// otherwise zero bins are accepted (signal-like samples).
    pub check_null_content: bool,
    /// Clip post-processing variations to ±99% of the nominal.
    pub cap_variation: bool,
    /// 0-based bins dropped before the model binning transform.
    pub blinded_bins: Vec<usize>,
    /// Per-bin scale factors applied in the model binning transform.
    pub bin_scales: Vec<f64>,
    /// Overrides [`TemplateConfig::smooth_option`] for this sample.
    pub smooth_option: Option<SmoothOption>,
}

impl Default for SampleSettings {
    fn default() -> Self {
        Self {
            check_null_content: true,
            cap_variation: false,
            blinded_bins: Vec::new(),
            bin_scales: Vec::new(),
            smooth_option: None,
        }
    }
}

/// Per-systematic processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystematicSettings {
    /// Symmetrization applied to the variation pair.
    pub symmetrization: SymmetrizationType,
    /// Smoothing level; 0 disables smoothing.
    pub smooth_level: u32,
    /// Overrides the sample/global smoothing family for this systematic.
    pub smooth_option: Option<SmoothOption>,
    /// Scale applied to the up shift before symmetrization.
    pub scale_up: f64,
    /// Scale applied to the down shift before symmetrization.
    pub scale_down: f64,
    /// Shape forced onto both sides.
    pub force_shape: ForceShapeType,
    /// Components kept for the model.
    pub component: Component,
}

impl Default for SystematicSettings {
    fn default() -> Self {
        Self {
            symmetrization: SymmetrizationType::None,
            smooth_level: 0,
            smooth_option: None,
            scale_up: 1.0,
            scale_down: 1.0,
            force_shape: ForceShapeType::None,
            component: Component::NormAndShape,
        }
    }
}

impl SystematicSettings {
    /// Default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the symmetrization type.
    pub fn symmetrization(mut self, sym: SymmetrizationType) -> Self {
        self.symmetrization = sym;
        self
    }

    /// Set the smoothing level.
    pub fn smooth_level(mut self, level: u32) -> Self {
        self.smooth_level = level;
        self
    }

    /// Override the smoothing family.
    pub fn smooth_option(mut self, opt: SmoothOption) -> Self {
        self.smooth_option = Some(opt);
        self
    }

    /// Set up/down shift scale factors.
    pub fn scales(mut self, up: f64, down: f64) -> Self {
        self.scale_up = up;
        self.scale_down = down;
        self
    }

    /// Force a shape onto the variations.
    pub fn force_shape(mut self, shape: ForceShapeType) -> Self {
        self.force_shape = shape;
        self
    }

    /// Restrict the model components.
    pub fn component(mut self, component: Component) -> Self {
        self.component = component;
        self
    }

    /// Whether the shape component is kept.
    pub fn is_shape(&self) -> bool {
        self.component != Component::NormOnly
    }

    /// Reject settings that cannot be processed.
    pub fn check(&self) -> Result<()> {
        for (label, v) in [("scale_up", self.scale_up), ("scale_down", self.scale_down)] {
            if !v.is_finite() {
                return Err(Error::Config(format!("{label} must be finite, got {v}")));
            }
        }
        Ok(())
    }
}
