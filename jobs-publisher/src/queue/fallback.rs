//! Fallback strategies for when the broker publish fails.

use std::fmt;
use std::str::FromStr;

use crate::errors::JobsError;

/// What an email send does when the broker cannot take the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fallback {
    /// Deliver through the mail backend on the calling task
    Sync,
    /// Deliver on a detached task; the caller does not wait
    #[default]
    AsyncThread,
    /// Return a delivery error to the caller
    Raise,
    /// Drop the message
    None,
}

impl Fallback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fallback::Sync => "sync",
            Fallback::AsyncThread => "async_thread",
            Fallback::Raise => "raise",
            Fallback::None => "none",
        }
    }
}

impl FromStr for Fallback {
    type Err = JobsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sync" => Ok(Fallback::Sync),
            "async_thread" => Ok(Fallback::AsyncThread),
            "raise" => Ok(Fallback::Raise),
            "none" => Ok(Fallback::None),
            other => Err(JobsError::InvalidFallback(other.to_string())),
        }
    }
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
