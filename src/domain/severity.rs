use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity attached to a `LogEvent`.
///
/// This is distinct from `app::config::LogLevel`, which configures the
/// sink's own tracing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Severity {
    Verbose,
    Debug,
    #[default]
    Information,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Verbose => "Verbose",
            Severity::Debug => "Debug",
            Severity::Information => "Information",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    /// Accepts full names and the usual short forms, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verbose" | "trace" | "vrb" => Ok(Severity::Verbose),
            "debug" | "dbg" => Ok(Severity::Debug),
            "information" | "info" | "inf" => Ok(Severity::Information),
            "warning" | "warn" | "wrn" => Ok(Severity::Warning),
            "error" | "err" | "eror" => Ok(Severity::Error),
            "fatal" | "critical" | "ftl" => Ok(Severity::Fatal),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("WARN".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("inf".parse::<Severity>().unwrap(), Severity::Information);
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Fatal);
        assert!("loud".parse::<Severity>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(Severity::Verbose < Severity::Information);
        assert!(Severity::Error < Severity::Fatal);
    }
}
