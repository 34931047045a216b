//! Error types.
//!
//! Two layers:
//!
//! - `AppError`: fatal to a stage (missing upstream table, malformed file name,
//!   bad configuration, I/O). Carries the process exit code.
//! - `RecordFailure`: a single record (one frequency slice, one prefix) could
//!   not be reduced. The stage skips it, records a `Diagnostic` and carries on.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Category of a fatal error. The category decides the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidConfig,
    Io,
    MissingInput,
    MalformedRecord,
    /// An aggregate fit (Kittel, linewidth) produced no usable result.
    FitFailed,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::InvalidConfig | ErrorKind::Io => 2,
            ErrorKind::MissingInput => 3,
            ErrorKind::MalformedRecord => 4,
            ErrorKind::FitFailed => 5,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, message)
    }

    pub fn missing_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingInput, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedRecord, message)
    }

    pub fn fit_failed(what: &str, cause: &RecordFailure) -> Self {
        Self::new(ErrorKind::FitFailed, format!("{what} fit failed: {cause}"))
    }

    pub fn io(path: &Path, action: &str, err: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::Io,
            format!("Failed to {action} '{}': {err}", path.display()),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("exit_code", &self.exit_code())
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Why a single record was skipped.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordFailure {
    #[error("no samples matched this record")]
    NoData,
    #[error("peak window of ±{delta} around x={center} contains no points")]
    EmptyWindow { center: f64, delta: f64 },
    #[error("{n} points cannot constrain {p} parameters")]
    InsufficientPoints { n: usize, p: usize },
    #[error("fit diverged: {reason}")]
    FitDivergence { reason: String },
    #[error("R²={r2:.4} does not exceed threshold {threshold}")]
    QualityRejected { r2: f64, threshold: f64 },
    #[error("sample step {observed} differs from configured step {configured}")]
    StepMismatch { configured: f64, observed: f64 },
}

impl RecordFailure {
    pub fn divergence(reason: impl Into<String>) -> Self {
        RecordFailure::FitDivergence {
            reason: reason.into(),
        }
    }

    /// Short stable label used when tallying diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            RecordFailure::NoData => "no data",
            RecordFailure::EmptyWindow { .. } => "empty window",
            RecordFailure::InsufficientPoints { .. } => "insufficient points",
            RecordFailure::FitDivergence { .. } => "fit divergence",
            RecordFailure::QualityRejected { .. } => "quality rejected",
            RecordFailure::StepMismatch { .. } => "step mismatch",
        }
    }
}

/// Whether a diagnostic dropped the record or only flagged it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Skipped,
}

/// One per-record event reported alongside a stage's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub stage: &'static str,
    pub key: i64,
    pub label: String,
    pub severity: Severity,
    pub cause: RecordFailure,
}

impl Diagnostic {
    pub fn skipped(
        stage: &'static str,
        key: i64,
        label: impl Into<String>,
        cause: RecordFailure,
    ) -> Self {
        Self {
            stage,
            key,
            label: label.into(),
            severity: Severity::Skipped,
            cause,
        }
    }

    pub fn warning(
        stage: &'static str,
        key: i64,
        label: impl Into<String>,
        cause: RecordFailure,
    ) -> Self {
        Self {
            stage,
            key,
            label: label.into(),
            severity: Severity::Warning,
            cause,
        }
    }
}
