//! Error types for the ACL compiler.

use thiserror::Error;

/// Errors that can occur while building a rule set.
///
/// Matching itself never fails; every error here is raised at startup.
#[derive(Error, Debug)]
pub enum RulesError {
    /// A rule could not be compiled. `line` is the rule's 1-based line number.
    #[error("error at line {line}: {message}")]
    Compile { line: usize, message: String },

    #[error("invalid cache size: {0} (must be positive)")]
    InvalidCacheSize(usize),

    #[error("geoip error: {0}")]
    GeoIp(String),

    #[error("http error: {0}")]
    Http(String),
}

impl RulesError {
    pub(crate) fn at_line(line: usize, message: impl Into<String>) -> Self {
        RulesError::Compile {
            line,
            message: message.into(),
        }
    }

    /// Line number of the offending rule, if the error is line-attributed.
    pub fn line(&self) -> Option<usize> {
        match self {
            RulesError::Compile { line, .. } => Some(*line),
            _ => None,
        }
    }
}
