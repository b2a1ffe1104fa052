//! # Gosling
//!
//! Gosling is a small HTTP load generation engine. Give it one request definition and a
//! load profile, and it drives a changing number of virtual users against the endpoint,
//! one tick per second, for a fixed number of seconds.
//!
//! Every second the engine:
//!  1. asks the configured [`LoadProfile`](./profile/enum.LoadProfile.html) how many
//!     virtual users should be active,
//!  2. fires that many concurrent requests through an
//!     [`HttpExecutor`](./client/trait.HttpExecutor.html),
//!  3. waits for all of them to settle,
//!  4. publishes one [`MetricSample`](./metrics/struct.MetricSample.html) to anyone who
//!     subscribed,
//!  5. sleeps until the next whole second.
//!
//! When the run finishes (or is canceled) the full latency history is reduced into a
//! [`RunSummary`](./metrics/struct.RunSummary.html).
//!
//! ## Running a load test
//!
//! ```rust,no_run
//! use gosling::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), GoslingError> {
//!     let engine = LoadEngine::with_reqwest(&GoslingConfiguration::default())?;
//!
//!     let spec = RequestSpec::new(Method::GET, "http://127.0.0.1:8080/");
//!     let profile = ProfileConfig::new(LoadProfile::RampUp, 10, 30).set_ramp_up(10);
//!
//!     let handle = engine.start(spec, profile)?;
//!     let samples = engine.subscribe(&handle);
//!     while let Ok(sample) = samples.recv_async().await {
//!         println!("{}", sample);
//!     }
//!
//!     let summary = engine.wait(&handle).await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```
//!
//! ## Previewing a profile
//!
//! Profiles are pure functions, so they can be sampled before anything runs:
//!
//! ```rust
//! use gosling::prelude::*;
//!
//! let profile = ProfileConfig::new(LoadProfile::Stress, 40, 40);
//! let points = LoadEngine::preview_profile(&profile);
//! assert_eq!(points.first().map(|p| p.users), Some(10));
//! assert_eq!(points.last().map(|p| p.users), Some(40));
//! ```

#[macro_use]
extern crate log;

pub mod client;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod prelude;
pub mod profile;
pub mod report;
pub mod request;
mod scheduler;
pub mod util;

use serde::{Deserialize, Serialize};
use std::{fmt, io};

pub use crate::config::GoslingConfiguration;
pub use crate::engine::{LoadEngine, RunHandle};

/// An enumeration of all errors Gosling can return.
#[derive(Debug)]
pub enum GoslingError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Invalid option or value specified, may only be invalid in context. No run is
    /// created.
    InvalidConfig {
        /// The invalid option that caused this error.
        option: String,
        /// The invalid value that caused this error.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// The request URL could not be parsed.
    InvalidUrl {
        /// The URL that failed to parse.
        url: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// A run is already active on this engine; the active run is not affected.
    AlreadyRunning {
        /// Identifier of the active run.
        run_id: usize,
    },
    /// The run has not reached a terminal state yet.
    NotFinished {
        /// Identifier of the run that was queried.
        run_id: usize,
        /// The state the run was in when queried.
        state: RunState,
    },
    /// The engine was started outside of a Tokio runtime.
    NoRuntime {
        /// An optional explanation of the error.
        detail: String,
    },
}
/// Implement a helper to provide a text description of all possible types of errors.
impl GoslingError {
    fn describe(&self) -> &str {
        match *self {
            GoslingError::Io(_) => "io::Error",
            GoslingError::Reqwest(_) => "reqwest::Error",
            GoslingError::InvalidConfig { .. } => "invalid option or value specified",
            GoslingError::InvalidUrl { .. } => "failed to parse url",
            GoslingError::AlreadyRunning { .. } => "a run is already active",
            GoslingError::NotFinished { .. } => "run has not finished",
            GoslingError::NoRuntime { .. } => "no tokio runtime available",
        }
    }
}

/// Implement format trait to allow displaying errors.
impl fmt::Display for GoslingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            GoslingError::Io(ref source) => {
                write!(f, "GoslingError: {} ({})", self.describe(), source)
            }
            GoslingError::Reqwest(ref source) => {
                write!(f, "GoslingError: {} ({})", self.describe(), source)
            }
            GoslingError::InvalidConfig {
                ref option,
                ref detail,
                ..
            } => write!(f, "GoslingError: {} {} ({})", self.describe(), option, detail),
            GoslingError::InvalidUrl {
                ref parse_error, ..
            } => write!(f, "GoslingError: {} ({})", self.describe(), parse_error),
            GoslingError::AlreadyRunning { run_id } => {
                write!(f, "GoslingError: {} (run {})", self.describe(), run_id)
            }
            GoslingError::NotFinished { run_id, ref state } => write!(
                f,
                "GoslingError: {} (run {} is {})",
                self.describe(),
                run_id,
                state
            ),
            GoslingError::NoRuntime { ref detail } => {
                write!(f, "GoslingError: {} ({})", self.describe(), detail)
            }
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for GoslingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            GoslingError::Io(ref source) => Some(source),
            GoslingError::Reqwest(ref source) => Some(source),
            GoslingError::InvalidUrl {
                ref parse_error, ..
            } => Some(parse_error),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for GoslingError {
    fn from(err: reqwest::Error) -> GoslingError {
        GoslingError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for GoslingError {
    fn from(err: io::Error) -> GoslingError {
        GoslingError::Io(err)
    }
}

/// A run moves through each of the following states, in one direction only.
///
/// A finished run cannot be resumed; start a new run instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    /// The run has been created but the scheduler has not picked it up yet.
    NotStarted,
    /// The scheduler is issuing ticks.
    Running,
    /// Every configured tick ran.
    Completed,
    /// The run was canceled before every tick ran.
    Cancelled,
}
impl RunState {
    /// Returns `true` once the run can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled)
    }
}
impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match self {
            RunState::NotStarted => "not-started",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
        };
        write!(f, "{}", state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!RunState::NotStarted.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
    }

    #[test]
    fn error_display() {
        let error = GoslingError::NotFinished {
            run_id: 3,
            state: RunState::Running,
        };
        assert_eq!(
            error.to_string(),
            "GoslingError: run has not finished (run 3 is running)"
        );

        let error = GoslingError::AlreadyRunning { run_id: 1 };
        assert_eq!(
            error.to_string(),
            "GoslingError: a run is already active (run 1)"
        );
    }
}
