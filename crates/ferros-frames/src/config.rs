//! # Backtrace Options
//!
//! User-tunable policy for how far [`FrameCache::get_previous`](crate::FrameCache::get_previous)
//! walks when policy is applied.
//!
//! ## Environment Variables
//!
//! - `FERROS_BACKTRACE_LIMIT`: maximum number of frames (`unlimited` or `0` for no limit)
//! - `FERROS_BACKTRACE_PAST_MAIN`: keep unwinding past `main` (`on`/`off`, default `off`)
//! - `FERROS_BACKTRACE_PAST_ENTRY`: keep unwinding past the entry point (`on`/`off`, default `off`)
//!
//! Policy stops never mark a frame, so changing these options takes effect on
//! the next walk without invalidating the cache.

use std::env;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Environment variable holding the backtrace limit.
pub const LIMIT_ENV: &str = "FERROS_BACKTRACE_LIMIT";
/// Environment variable controlling unwinding past `main`.
pub const PAST_MAIN_ENV: &str = "FERROS_BACKTRACE_PAST_MAIN";
/// Environment variable controlling unwinding past the entry point.
pub const PAST_ENTRY_ENV: &str = "FERROS_BACKTRACE_PAST_ENTRY";

/// Configuration parsing error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError
{
    /// The backtrace limit isn't a number or `unlimited`.
    #[error("Invalid backtrace limit: {0}. Use a number or 'unlimited'")]
    InvalidLimit(String),

    /// A boolean setting isn't one of the accepted spellings.
    #[error("Invalid value for {name}: {value}. Use 'on' or 'off'")]
    InvalidSwitch
    {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },
}

/// Maximum number of frames a policy-filtered walk produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BacktraceLimit
{
    /// No limit (default).
    #[default]
    Unlimited,
    /// At most this many frames, counting the innermost as one.
    Frames(u32),
}

impl BacktraceLimit
{
    /// Returns `true` if a frame at `level` may not be given a predecessor.
    ///
    /// The predecessor of a frame at level `L` is the `L + 2`th frame.
    #[must_use]
    pub fn reached_at(self, level: i32) -> bool
    {
        match self {
            BacktraceLimit::Unlimited => false,
            BacktraceLimit::Frames(limit) => i64::from(level) + 2 > i64::from(limit),
        }
    }
}

impl FromStr for BacktraceLimit
{
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unlimited") {
            return Ok(BacktraceLimit::Unlimited);
        }
        match trimmed.parse::<u32>() {
            Ok(0) => Ok(BacktraceLimit::Unlimited),
            Ok(limit) => Ok(BacktraceLimit::Frames(limit)),
            Err(_) => Err(ConfigError::InvalidLimit(s.to_string())),
        }
    }
}

impl fmt::Display for BacktraceLimit
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            BacktraceLimit::Unlimited => write!(f, "unlimited"),
            BacktraceLimit::Frames(limit) => write!(f, "{limit}"),
        }
    }
}

/// Backtrace policy.
///
/// ## Example
///
/// ```rust
/// use ferros_frames::config::{BacktraceLimit, BacktraceOptions};
///
/// let options = BacktraceOptions {
///     limit: BacktraceLimit::Frames(10),
///     ..BacktraceOptions::default()
/// };
/// assert!(!options.past_main);
/// assert!(options.limit.reached_at(8));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacktraceOptions
{
    /// Maximum number of frames.
    pub limit: BacktraceLimit,
    /// Keep unwinding past the program's `main` function.
    pub past_main: bool,
    /// Keep unwinding past the process entry point.
    pub past_entry: bool,
}

impl BacktraceOptions
{
    /// Read options from the environment, falling back to defaults for
    /// variables that are unset.
    ///
    /// ## Errors
    ///
    /// Returns an error if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError>
    {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`BacktraceOptions::from_env`] with an explicit variable source.
    ///
    /// ## Errors
    ///
    /// Returns an error if a variable is set to an unparsable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError>
    {
        let mut options = Self::default();
        if let Some(limit) = lookup(LIMIT_ENV) {
            options.limit = limit.parse()?;
        }
        if let Some(value) = lookup(PAST_MAIN_ENV) {
            options.past_main = parse_switch("past-main", &value)?;
        }
        if let Some(value) = lookup(PAST_ENTRY_ENV) {
            options.past_entry = parse_switch("past-entry", &value)?;
        }
        Ok(options)
    }
}

/// Parse an on/off setting.
///
/// ## Errors
///
/// `ConfigError::InvalidSwitch` for anything but the accepted spellings.
pub fn parse_switch(name: &'static str, value: &str) -> Result<bool, ConfigError>
{
    match value.trim().to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidSwitch {
            name,
            value: value.to_string(),
        }),
    }
}
