use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Level vocabulary of the bridge's log level select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
    Detail,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown log level '{0}'")]
pub struct UnknownLogLevel(pub String);

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Detail => "detail",
        }
    }

    /// `tracing` filter directive for this level.
    pub fn directive(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Detail => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "detail" | "trace" => Ok(Self::Detail),
            _ => Err(UnknownLogLevel(s.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies log level changes requested over the bridge state topic.
pub trait LogLevelControl: Send + Sync {
    fn set_level(&self, level: LogLevel) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_words_case_insensitively() {
        assert_eq!("DEBUG".parse(), Ok(LogLevel::Debug));
        assert_eq!("Warning".parse(), Ok(LogLevel::Warning));
        assert_eq!("detail".parse::<LogLevel>().map(|l| l.directive()), Ok("trace"));
        assert_eq!(
            "verbose".parse::<LogLevel>(),
            Err(UnknownLogLevel("verbose".to_string()))
        );
        assert_eq!(LogLevel::Warning.to_string(), "warning");
    }
}
