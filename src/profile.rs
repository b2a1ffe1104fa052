//! Load profiles: how many virtual users are active at each tick.
//!
//! Every profile is a pure function of `(tick, duration, max_users, ramp_up)`. Nothing
//! is remembered between calls, so the same function drives both
//! [`preview`](./struct.ProfileConfig.html#method.preview) and the real run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::GoslingError;

/// Number of points returned when previewing a profile.
pub const PREVIEW_POINTS: usize = 20;

/// Share of `max_users` kept active outside of the spike window.
const SPIKE_BASELINE: f64 = 0.1;
/// Share of the duration covered by the spike window (at least 3 ticks).
const SPIKE_WINDOW: f64 = 0.2;
/// Number of equal-length stages in the stress profile.
const STRESS_STAGES: usize = 4;

/// Selects which concurrency function is used during a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadProfile {
    /// Always `max_users`.
    Fixed,
    /// Scales linearly up to `max_users` over the ramp-up window.
    RampUp,
    /// Low baseline with a burst of `max_users` around the midpoint.
    Spike,
    /// Four equal stages at 25%, 50%, 75% and 100% of `max_users`.
    Stress,
    /// Same curve as `RampUp`, kept separate so it can be tuned independently.
    Custom,
}
impl LoadProfile {
    /// All profiles, in the order they are listed to users.
    pub const ALL: [LoadProfile; 5] = [
        LoadProfile::Fixed,
        LoadProfile::RampUp,
        LoadProfile::Spike,
        LoadProfile::Stress,
        LoadProfile::Custom,
    ];

    /// Returns how many virtual users are active during `tick` (0-based).
    ///
    /// The result is always in `1..=max_users` (`max_users` of 0 is treated as 1).
    ///
    /// # Example
    /// ```rust
    /// use gosling::profile::LoadProfile;
    ///
    /// // Ramp from 20 to 100 users over 5 seconds.
    /// assert_eq!(LoadProfile::RampUp.active_users(0, 30, 100, 5), 20);
    /// assert_eq!(LoadProfile::RampUp.active_users(4, 30, 100, 5), 100);
    /// assert_eq!(LoadProfile::RampUp.active_users(10, 30, 100, 5), 100);
    /// ```
    pub fn active_users(
        &self,
        tick: usize,
        duration: usize,
        max_users: usize,
        ramp_up: usize,
    ) -> usize {
        let max_users = max_users.max(1);
        let users = match self {
            LoadProfile::Fixed => max_users,
            LoadProfile::RampUp | LoadProfile::Custom => ramp(tick, max_users, ramp_up),
            LoadProfile::Spike => spike(tick, duration, max_users),
            LoadProfile::Stress => stress(tick, duration, max_users),
        };
        users.clamp(1, max_users)
    }
}

fn ramp(tick: usize, max_users: usize, ramp_up: usize) -> usize {
    if ramp_up == 0 {
        return max_users;
    }
    let progress = ((tick + 1) as f64 / ramp_up as f64).min(1.0);
    ((max_users as f64 * progress).floor() as usize).max(1)
}

fn spike(tick: usize, duration: usize, max_users: usize) -> usize {
    let baseline = ((max_users as f64 * SPIKE_BASELINE).floor() as usize).max(1);
    let window_start = (duration / 2).saturating_sub(1);
    let window_length = ((duration as f64 * SPIKE_WINDOW).floor() as usize).max(3);
    if tick >= window_start && tick < window_start + window_length {
        max_users
    } else {
        baseline
    }
}

fn stress(tick: usize, duration: usize, max_users: usize) -> usize {
    let stage_length = duration / STRESS_STAGES;
    // Runs shorter than one tick per stage go straight to the last stage.
    let stage = if stage_length == 0 {
        STRESS_STAGES - 1
    } else {
        (tick / stage_length).min(STRESS_STAGES - 1)
    };
    ((max_users * (stage + 1)) / STRESS_STAGES).max(1)
}

impl fmt::Display for LoadProfile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            LoadProfile::Fixed => "fixed",
            LoadProfile::RampUp => "ramp-up",
            LoadProfile::Spike => "spike",
            LoadProfile::Stress => "stress",
            LoadProfile::Custom => "custom",
        };
        write!(f, "{}", name)
    }
}

/// Allow `--profile ramp-up` and friends on the command line.
impl FromStr for LoadProfile {
    type Err = GoslingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(LoadProfile::Fixed),
            "ramp-up" | "rampup" | "ramp_up" => Ok(LoadProfile::RampUp),
            "spike" => Ok(LoadProfile::Spike),
            "stress" => Ok(LoadProfile::Stress),
            "custom" => Ok(LoadProfile::Custom),
            _ => Err(GoslingError::InvalidConfig {
                option: "`configuration.profile`".to_string(),
                value: s.to_string(),
                detail: "profile must be one of: fixed, ramp-up, spike, stress, custom."
                    .to_string(),
            }),
        }
    }
}

/// A profile together with the parameters shared by all profiles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Which concurrency function to use.
    pub profile: LoadProfile,
    /// Target number of concurrent virtual users, at least 1.
    pub max_users: usize,
    /// How many one-second ticks the run lasts, at least 1.
    pub duration: usize,
    /// Seconds over which ramping profiles reach `max_users`. Values up to
    /// `duration / 2` are recommended but not enforced.
    pub ramp_up: usize,
}

/// One point of a profile preview curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePoint {
    /// 0-based tick.
    pub tick: usize,
    /// Virtual users active during the tick.
    pub users: usize,
}

impl ProfileConfig {
    /// Create a new profile configuration with no ramp-up window.
    pub fn new(profile: LoadProfile, max_users: usize, duration: usize) -> Self {
        ProfileConfig {
            profile,
            max_users,
            duration,
            ramp_up: 0,
        }
    }

    /// Set the ramp-up window, in seconds.
    pub fn set_ramp_up(mut self, ramp_up: usize) -> Self {
        self.ramp_up = ramp_up;
        self
    }

    /// Returns the number of active virtual users for `tick`.
    pub fn active_users(&self, tick: usize) -> usize {
        self.profile
            .active_users(tick, self.duration, self.max_users, self.ramp_up)
    }

    /// Reject configurations that can't be run.
    pub fn validate(&self) -> Result<(), GoslingError> {
        if self.duration < 1 {
            return Err(GoslingError::InvalidConfig {
                option: "`profile.duration`".to_string(),
                value: self.duration.to_string(),
                detail: "`profile.duration` must be at least 1 second.".to_string(),
            });
        }
        if self.max_users < 1 {
            return Err(GoslingError::InvalidConfig {
                option: "`profile.max_users`".to_string(),
                value: self.max_users.to_string(),
                detail: "`profile.max_users` must be set to at least 1.".to_string(),
            });
        }
        if self.ramp_up > self.duration / 2 {
            debug!(
                "ramp-up of {}s is longer than half of the {}s run",
                self.ramp_up, self.duration
            );
        }
        Ok(())
    }

    /// Sample the profile at up to [`PREVIEW_POINTS`] evenly spaced ticks.
    ///
    /// The first and last ticks are always included and ticks are strictly increasing.
    /// A zero duration yields an empty preview.
    pub fn preview(&self) -> Vec<ProfilePoint> {
        if self.duration == 0 {
            return Vec::new();
        }
        let points = PREVIEW_POINTS.min(self.duration);
        let last_tick = self.duration - 1;
        (0..points)
            .map(|i| {
                let tick = if points > 1 {
                    i * last_tick / (points - 1)
                } else {
                    0
                };
                ProfilePoint {
                    tick,
                    users: self.active_users(tick),
                }
            })
            .collect()
    }
}
