use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::payload::Channel;

pub type Result<T> = std::result::Result<T, HarnessError>;

/// A single check that evaluated false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailure {
    pub check: String,
    pub expected: String,
    pub actual: String,
}

impl AssertionFailure {
    pub fn new(check: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        AssertionFailure {
            check: check.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed\nexpected: {}\nactual:\n{}",
            self.check, self.expected, self.actual
        )
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("cannot derive binary name: host OS {raw_os:?} is not windows, linux or macos")]
    UnclassifiedPlatform { raw_os: String },
    #[error("{0}")]
    Assertion(AssertionFailure),
    #[error("no request recorded on the {channel} channel (was the upload step run first?)")]
    NoRecordedRequest { channel: Channel },
    #[error("no captured output: run the CLI before asserting on its output")]
    NoCapturedOutput,
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command {command:?} did not exit within {timeout:?}")]
    CommandTimedOut { command: String, timeout: Duration },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed request record in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

impl HarnessError {
    /// True for failures of the CLI under test, false for harness/setup faults.
    pub fn is_assertion(&self) -> bool {
        matches!(self, HarnessError::Assertion(_))
    }

    pub fn assertion(&self) -> Option<&AssertionFailure> {
        match self {
            HarnessError::Assertion(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<AssertionFailure> for HarnessError {
    fn from(failure: AssertionFailure) -> Self {
        HarnessError::Assertion(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertion_failure_renders_expected_and_actual() {
        let err: HarnessError = AssertionFailure::new("contains", "\"Usage\"", "nothing here").into();
        let text = err.to_string();
        assert!(text.starts_with("contains failed"));
        assert!(text.contains("expected: \"Usage\""));
        assert!(text.contains("nothing here"));
        assert!(err.is_assertion());
    }

    #[test]
    fn missing_request_is_not_an_assertion() {
        let err = HarnessError::NoRecordedRequest {
            channel: Channel::Sourcemaps,
        };
        assert!(!err.is_assertion());
        assert!(err.to_string().contains("sourcemaps channel"));
    }
}
