//! Validation report: the diagnostics context threaded through every stage.
//!
//! Every stage receives a `&mut ValidationReport` and records what it saw and
//! what it repaired. Entries are mirrored to the `log` facade at the matching
//! level, so a binary only needs to install a subscriber to see them.

use ns_core::Error;
use serde::Serialize;

/// Severity of a report entry. `Fatal` entries abort the unit they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Verbose trace of what happened.
    Debug,
    /// Noteworthy but harmless.
    Info,
    /// A problem that was repaired or can be ignored.
    Warning,
    /// A problem that aborts processing of the unit.
    Fatal,
}

impl Severity {
    fn log_level(self) -> log::Level {
        match self {
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Fatal => log::Level::Error,
        }
    }
}

/// What kind of problem an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    /// Malformed caller input.
    Config,
    /// Shape mismatch or missing histogram.
    Structural,
    /// Negative, zero or NaN bin content.
    DataQuality,
    /// Out-of-bounds values produced by symmetrization or smoothing.
    NumericAnomaly,
    /// Informational diagnostics (same-shift bins, skipped steps, ...).
    Diagnostic,
}

impl IssueKind {
    /// Kind matching a typed error.
    pub fn of(err: &Error) -> Self {
        match err {
            Error::Config(_) | Error::Io(_) | Error::Json(_) => IssueKind::Config,
            Error::Structural(_) | Error::NotFound(_) => IssueKind::Structural,
            Error::DataQuality(_) | Error::Data(_) => IssueKind::DataQuality,
            Error::NumericAnomaly(_) => IssueKind::NumericAnomaly,
        }
    }
}

/// One report entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    /// Severity.
    pub severity: Severity,
    /// Kind.
    pub kind: IssueKind,
    /// Where it happened, e.g. `"SR/ttbar/JES"`.
    pub scope: String,
    /// Human-readable message.
    pub message: String,
}

impl Issue {
    /// Whether this entry aborts its unit.
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    /// Convert into the matching typed error.
    pub fn to_error(&self) -> Error {
        let msg = if self.scope.is_empty() {
            self.message.clone()
        } else {
            format!("{}: {}", self.scope, self.message)
        };
        match self.kind {
            IssueKind::Config => Error::Config(msg),
            IssueKind::Structural => Error::Structural(msg),
            IssueKind::DataQuality => Error::DataQuality(msg),
            IssueKind::NumericAnomaly | IssueKind::Diagnostic => Error::NumericAnomaly(msg),
        }
    }
}

/// Ordered collection of [`Issue`]s with a scope label.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    scope: String,
    issues: Vec<Issue>,
}

impl ValidationReport {
    /// Empty report without scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty report whose entries are tagged with `scope`.
    pub fn scoped(scope: impl Into<String>) -> Self {
        Self { scope: scope.into(), issues: Vec::new() }
    }

    /// Scope label.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Record an entry and mirror it to the log.
    pub fn push(&mut self, severity: Severity, kind: IssueKind, message: impl Into<String>) {
        let message = message.into();
        log::log!(severity.log_level(), "[{}] {}", self.scope, message);
        self.issues.push(Issue { severity, kind, scope: self.scope.clone(), message });
    }

    /// Record a debug entry.
    pub fn debug(&mut self, message: impl Into<String>) {
        self.push(Severity::Debug, IssueKind::Diagnostic, message);
    }

    /// Record a warning.
    pub fn warn(&mut self, kind: IssueKind, message: impl Into<String>) {
        self.push(Severity::Warning, kind, message);
    }

    /// Record a fatal entry.
    pub fn fatal(&mut self, kind: IssueKind, message: impl Into<String>) {
        self.push(Severity::Fatal, kind, message);
    }

    /// All entries in recording order.
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// `(severity, message)` pairs, for plain logging consumers.
    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.issues.iter().map(|i| (i.severity, format!("[{}] {}", i.scope, i.message))).collect()
    }

    /// Number of entries with exactly `severity`.
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Whether any entry is fatal.
    pub fn has_fatal(&self) -> bool {
        self.issues.iter().any(Issue::is_fatal)
    }

    /// First fatal entry, if any.
    pub fn first_fatal(&self) -> Option<&Issue> {
        self.issues.iter().find(|i| i.is_fatal())
    }

    /// Append all entries of `other`, keeping their original scopes.
    pub fn merge(&mut self, other: ValidationReport) {
        self.issues.extend(other.issues);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Whether the report is empty.
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}
