//! Small `envconfig`-compatible newtypes shared by every binary's `Config`.

use std::str::FromStr;
use std::time;

/// A `time::Duration` parsed from an environment variable expressed in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// A `time::Duration` parsed from an environment variable expressed in seconds.
#[derive(Debug, Clone, Copy)]
pub struct EnvSecDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvSecDurationError;

impl FromStr for EnvSecDuration {
    type Err = ParseEnvSecDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secs = s.parse::<u64>().map_err(|_| ParseEnvSecDurationError)?;

        Ok(EnvSecDuration(time::Duration::from_secs(secs)))
    }
}

/// A non-empty string, used for things like queue name prefixes that must not
/// silently default to the empty string.
#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

/// The two deployment modes, selected from the `MODE` env var, choosing
/// default paths for staging/log/model directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dev,
    Prod,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Dev
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseModeError(String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Mode::Dev),
            "prod" => Ok(Mode::Prod),
            other => Err(ParseModeError(other.to_owned())),
        }
    }
}

impl Mode {
    pub fn staging_root_default(&self) -> &'static str {
        match self {
            Mode::Dev => "./var/staging",
            Mode::Prod => "/approot/data/staging",
        }
    }

    pub fn result_root_default(&self) -> &'static str {
        match self {
            Mode::Dev => "./var/result",
            Mode::Prod => "/approot/data/result",
        }
    }

    pub fn log_dir_default(&self) -> &'static str {
        match self {
            Mode::Dev => "./var/log",
            Mode::Prod => "/approot/data/log",
        }
    }
}
