//! Histogram loaders.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ns_core::{Error, Histogram, HistogramLoader, Result};

/// In-memory histogram store keyed by `(file, name)`.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    histograms: HashMap<(String, String), Histogram>,
}

impl MemoryLoader {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `hist` as `name` in `file`, replacing any previous entry.
    pub fn insert(&mut self, file: impl Into<String>, name: impl Into<String>, hist: Histogram) {
        self.histograms.insert((file.into(), name.into()), hist);
    }

    /// Number of stored histograms.
    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }
}

impl HistogramLoader for MemoryLoader {
    fn load(&self, file: &str, name: &str) -> Result<Histogram> {
        self.histograms
            .get(&(file.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("histogram '{name}' in '{file}'")))
    }
}

type HistogramFile = Arc<BTreeMap<String, Histogram>>;

/// Reads JSON files below a root directory. Each file is an object mapping
/// histogram names to serialized [`Histogram`]s; parsed files are cached.
#[derive(Debug)]
pub struct JsonLoader {
    root: PathBuf,
    cache: Mutex<HashMap<String, HistogramFile>>,
}

impl JsonLoader {
    /// Loader resolving file names relative to `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), cache: Mutex::new(HashMap::new()) }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file(&self, file: &str) -> Result<HistogramFile> {
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(file).cloned()) {
            return Ok(hit);
        }
        let path = self.root.join(file);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("histogram file '{}'", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        let parsed: HistogramFile = Arc::new(serde_json::from_str(&text)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(file.to_string(), parsed.clone());
        }
        Ok(parsed)
    }
}

impl HistogramLoader for JsonLoader {
    fn load(&self, file: &str, name: &str) -> Result<Histogram> {
        let hist = self
            .file(file)?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("histogram '{name}' in '{file}'")))?;
        Ok(if hist.name().is_empty() { hist.renamed(name) } else { hist })
    }
}
