//! Shared error utilities used across the compilation pipeline.
//!
//! User-facing problems are `CompileError`s carrying the offending source
//! location; the driver turns them into `Diagnostic` records and keeps
//! compiling the remaining definitions. Internal invariant violations are
//! not errors at all – they panic, because they indicate a bug in the
//! compiler rather than in the program being compiled.

use crate::location::Location;
use snafu::Snafu;
use std::fmt;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Clone, Snafu)]
#[snafu(display("{location}: {message}"))]
pub struct CompileError {
  pub location: Location,
  pub message: String,
}

impl CompileError {
  /// Construct an error anchored at a source location.
  pub fn at(location: &Location, message: impl Into<String>) -> Self {
    Self {
      location: location.clone(),
      message: message.into(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Error,
  Warning,
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Severity::Error => write!(f, "error"),
      Severity::Warning => write!(f, "warning"),
    }
  }
}

/// One record delivered to the driver's diagnostics callback.
#[derive(Debug, Clone)]
pub struct Diagnostic {
  pub location: Location,
  pub severity: Severity,
  pub message: String,
}

impl Diagnostic {
  pub fn error(error: &CompileError) -> Self {
    Self {
      location: error.location.clone(),
      severity: Severity::Error,
      message: error.message.clone(),
    }
  }

  pub fn warning(location: &Location, message: impl Into<String>) -> Self {
    Self {
      location: location.clone(),
      severity: Severity::Warning,
      message: message.into(),
    }
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}: {}", self.location, self.severity, self.message)
  }
}
