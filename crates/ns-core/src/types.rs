//! Common data types for NextStat

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A 1D binned histogram: per-bin content and statistical error over
/// strictly increasing bin edges.
///
/// Histograms are values. Once constructed their binning never changes and
/// every transformation returns a new histogram; the engine never mutates a
/// histogram another component can observe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HistogramData", into = "HistogramData")]
pub struct Histogram {
    name: String,
    edges: Vec<f64>,
    contents: Vec<f64>,
    errors: Vec<f64>,
}

/// Serialized form of a [`Histogram`].
///
/// `errors` may be omitted, in which case Poisson errors `sqrt(max(content, 0))`
/// are assumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistogramData {
    #[serde(default)]
    name: String,
    edges: Vec<f64>,
    contents: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<f64>>,
}

impl TryFrom<HistogramData> for Histogram {
    type Error = Error;

    fn try_from(data: HistogramData) -> Result<Self> {
        match data.errors {
            Some(errors) => Histogram::new(data.name, data.edges, data.contents, errors),
            None => Histogram::with_poisson_errors(data.name, data.edges, data.contents),
        }
    }
}

impl From<Histogram> for HistogramData {
    fn from(h: Histogram) -> Self {
        HistogramData { name: h.name, edges: h.edges, contents: h.contents, errors: Some(h.errors) }
    }
}

impl Histogram {
    /// Create a histogram, validating the binning invariants.
    ///
    /// Requires at least one bin, `edges.len() == contents.len() + 1`,
    /// `errors.len() == contents.len()` and finite, strictly increasing edges.
    pub fn new(
        name: impl Into<String>,
        edges: Vec<f64>,
        contents: Vec<f64>,
        errors: Vec<f64>,
    ) -> Result<Self> {
        let name = name.into();
        let n_bins = contents.len();
        if n_bins == 0 {
            return Err(Error::Config(format!("histogram '{name}' has no bins")));
        }
        if edges.len() != n_bins + 1 {
            return Err(Error::Config(format!(
                "histogram '{name}': {} edges for {} bins (expected {})",
                edges.len(),
                n_bins,
                n_bins + 1
            )));
        }
        if errors.len() != n_bins {
            return Err(Error::Config(format!(
                "histogram '{name}': {} errors for {} bins",
                errors.len(),
                n_bins
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(Error::Config(format!("histogram '{name}' has non-finite bin edges")));
        }
        if let Some(i) = edges.windows(2).position(|w| w[1] <= w[0]) {
            return Err(Error::Config(format!(
                "histogram '{name}': bin edges not strictly increasing at edge {} ({} >= {})",
                i + 1,
                edges[i],
                edges[i + 1]
            )));
        }
        Ok(Self { name, edges, contents, errors })
    }

    /// Create a histogram with Poisson errors `sqrt(max(content, 0))`.
    pub fn with_poisson_errors(
        name: impl Into<String>,
        edges: Vec<f64>,
        contents: Vec<f64>,
    ) -> Result<Self> {
        let errors = contents.iter().map(|&c| c.max(0.0).sqrt()).collect();
        Self::new(name, edges, contents, errors)
    }

    /// Create a histogram with `contents.len()` equal-width bins over `[lo, hi]`.
    pub fn uniform(
        name: impl Into<String>,
        lo: f64,
        hi: f64,
        contents: Vec<f64>,
        errors: Vec<f64>,
    ) -> Result<Self> {
        let n = contents.len();
        if n == 0 {
            return Err(Error::Config("uniform histogram needs at least one bin".into()));
        }
        let step = (hi - lo) / n as f64;
        let mut edges: Vec<f64> = (0..n).map(|i| lo + step * i as f64).collect();
        edges.push(hi);
        Self::new(name, edges, contents, errors)
    }

    /// A histogram with the same name and binning but new contents and errors.
    pub fn derive(&self, contents: Vec<f64>, errors: Vec<f64>) -> Result<Self> {
        Self::new(self.name.clone(), self.edges.clone(), contents, errors)
    }

    /// Same histogram under a different name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Apply `f(bin, content)` to every bin content, keeping errors.
    pub fn map_contents(&self, mut f: impl FnMut(usize, f64) -> f64) -> Self {
        let contents = self.contents.iter().enumerate().map(|(i, &c)| f(i, c)).collect();
        Self {
            name: self.name.clone(),
            edges: self.edges.clone(),
            contents,
            errors: self.errors.clone(),
        }
    }

    /// Multiply contents and errors by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            name: self.name.clone(),
            edges: self.edges.clone(),
            contents: self.contents.iter().map(|c| c * factor).collect(),
            errors: self.errors.iter().map(|e| e * factor).collect(),
        }
    }

    /// Histogram name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.contents.len()
    }

    /// Bin edges (length = n_bins + 1).
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Bin contents.
    pub fn contents(&self) -> &[f64] {
        &self.contents
    }

    /// Per-bin statistical errors.
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// Content of bin `i` (0-based).
    pub fn content(&self, i: usize) -> f64 {
        self.contents[i]
    }

    /// Statistical error of bin `i` (0-based).
    pub fn error(&self, i: usize) -> f64 {
        self.errors[i]
    }

    /// Lower edge of bin `i`.
    pub fn low_edge(&self, i: usize) -> f64 {
        self.edges[i]
    }

    /// Width of bin `i`.
    pub fn width(&self, i: usize) -> f64 {
        self.edges[i + 1] - self.edges[i]
    }

    /// Sum of bin contents.
    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_histogram_basics() {
        let h = Histogram::new("h", vec![0.0, 1.0, 3.0], vec![2.0, 4.0], vec![0.5, 1.0]).unwrap();
        assert_eq!(h.n_bins(), 2);
        assert_eq!(h.name(), "h");
        assert_relative_eq!(h.integral(), 6.0);
        assert_relative_eq!(h.width(1), 2.0);
        assert_relative_eq!(h.low_edge(1), 1.0);

        let s = h.scaled(0.5);
        assert_eq!(s.contents(), &[1.0, 2.0]);
        assert_eq!(s.errors(), &[0.25, 0.5]);
    }

    #[test]
    fn test_histogram_rejects_bad_binning() {
        assert!(Histogram::new("h", vec![0.0], vec![], vec![]).is_err());
        assert!(Histogram::new("h", vec![0.0, 1.0], vec![1.0, 2.0], vec![1.0, 1.0]).is_err());
        assert!(Histogram::new("h", vec![0.0, 1.0, 1.0], vec![1.0, 2.0], vec![1.0, 1.0]).is_err());
        assert!(Histogram::new("h", vec![0.0, 2.0, 1.0], vec![1.0, 2.0], vec![1.0, 1.0]).is_err());
        assert!(Histogram::new("h", vec![0.0, 1.0], vec![1.0], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_uniform_edges() {
        let h = Histogram::uniform("u", 0.0, 1.0, vec![1.0; 4], vec![0.0; 4]).unwrap();
        assert_eq!(h.edges().len(), 5);
        assert_relative_eq!(h.width(2), 0.25);
        assert_eq!(h.edges()[4], 1.0);
    }

    #[test]
    fn test_serde_roundtrip_and_default_errors() {
        let json = r#"{"name":"n","edges":[0,1,2],"contents":[4.0,9.0]}"#;
        let h: Histogram = serde_json::from_str(json).unwrap();
        assert_eq!(h.errors(), &[2.0, 3.0]);

        let bad = r#"{"edges":[0,1],"contents":[1.0,2.0]}"#;
        assert!(serde_json::from_str::<Histogram>(bad).is_err());

        let back: Histogram = serde_json::from_str(&serde_json::to_string(&h).unwrap()).unwrap();
        assert_eq!(back, h);
    }
}
