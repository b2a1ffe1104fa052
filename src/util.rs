//! Utility functions used by Gosling.

use regex::Regex;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time;
use tokio_util::sync::CancellationToken;

use crate::engine::RunHandle;

// Set once the first ctrl-c has been caught.
static CANCELED: AtomicBool = AtomicBool::new(false);

/// Parse a string representing a time span and return the number of seconds.
///
/// Can be specified as an integer, indicating seconds. Or can use integers
/// together with one or more of "h", "m", and "s", in that order, indicating
/// "hours", "minutes", and "seconds".
///
/// Valid formats include: 20, 20s, 3m, 2h, 1h20m, 3h30m10s, etc.
///
/// # Example
/// ```rust
/// use gosling::util;
///
/// // 1 hour 2 minutes and 3 seconds is 3,723 seconds.
/// assert_eq!(util::parse_timespan("1h2m3s"), 3_723);
///
/// // 45 seconds is 45 seconds.
/// assert_eq!(util::parse_timespan("45"), 45);
///
/// // Invalid value is 0 seconds.
/// assert_eq!(util::parse_timespan("foo"), 0);
/// ```
pub fn parse_timespan(time_str: &str) -> usize {
    // If an integer is passed in, assume it's seconds.
    if let Ok(t) = usize::from_str(time_str) {
        trace!("{} is integer: {} seconds", time_str, t);
        return t;
    }

    // Otherwise use a regex to extract hours, minutes and seconds from string.
    let re = match Regex::new(r"((?P<hours>\d+?)h)?((?P<minutes>\d+?)m)?((?P<seconds>\d+?)s)?") {
        Ok(re) => re,
        Err(e) => {
            warn!("failed to compile timespan regex: {}", e);
            return 0;
        }
    };
    let time_matches = match re.captures(time_str) {
        Some(time_matches) => time_matches,
        None => return 0,
    };
    let unit = |name: &str| -> usize {
        time_matches
            .name(name)
            .and_then(|value| usize::from_str(value.as_str()).ok())
            .unwrap_or(0)
    };
    let (hours, minutes, seconds) = (unit("hours"), unit("minutes"), unit("seconds"));
    let total = hours * 60 * 60 + minutes * 60 + seconds;
    trace!(
        "{} hours {} minutes {} seconds: {} seconds",
        hours,
        minutes,
        seconds,
        total
    );
    total
}

/// Sleep until `duration` has passed since `started`, or until `cancel` fires.
///
/// If more than `duration` already passed, returns immediately: late ticks never wait
/// and missed time is never made up. Returns `false` if the sleep was interrupted by
/// cancellation.
///
/// # Example
/// ```rust
/// use gosling::util;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let started = tokio::time::Instant::now();
/// let cancel = CancellationToken::new();
///
/// // Do other stuff, this is the "drift" subtracted from the sleep.
/// tokio::time::sleep(std::time::Duration::from_millis(50)).await;
///
/// // Sleep for 100 milliseconds minus the time spent doing other stuff.
/// assert!(util::sleep_minus_drift(std::time::Duration::from_millis(100), started, &cancel).await);
/// assert!(started.elapsed() >= std::time::Duration::from_millis(100));
/// # });
/// ```
pub async fn sleep_minus_drift(
    duration: time::Duration,
    started: tokio::time::Instant,
    cancel: &CancellationToken,
) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    match duration.checked_sub(started.elapsed()) {
        Some(delay) if delay.as_nanos() > 0 => {
            tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = cancel.cancelled() => false,
            }
        }
        _ => {
            debug!("sleep_minus_drift: drift was greater than or equal to duration, not sleeping");
            true
        }
    }
}

/// Truncate strings when they're too long to display.
///
/// If a string is longer than the specified max length, this function removes extra
/// the characters and replaces the last two with a double-period ellipsis.
///
/// # Example
/// ```rust
/// use gosling::util;
///
/// // All but 7 characters are truncated, with ".." appended.
/// assert_eq!(util::truncate_string("this is a long string", 9), "this is..");
///
/// // All characters are returned as the string is less than 15 characters long.
/// assert_eq!(util::truncate_string("shorter string", 15), "shorter string");
/// ```
pub fn truncate_string(str_to_truncate: &str, max_length: usize) -> String {
    if str_to_truncate.char_indices().count() > max_length {
        match str_to_truncate.char_indices().nth(max_length.saturating_sub(2)) {
            None => str_to_truncate.to_string(),
            Some((idx, _)) => format!("{}..", &str_to_truncate[..idx]),
        }
    } else {
        str_to_truncate.to_string()
    }
}

/// Catch ctrl-c: the first one cancels `handle`, a second one exits immediately.
pub fn setup_ctrlc_handler(handle: &RunHandle) {
    let handle = handle.clone();
    match ctrlc::set_handler(move || {
        // We've caught a ctrl-c, determine if it's the first time or an additional time.
        if CANCELED.swap(true, Ordering::SeqCst) {
            warn!("caught another ctrl-c, exiting immediately...");
            std::process::exit(1);
        } else {
            warn!("caught ctrl-c, stopping...");
            handle.cancel();
        }
    }) {
        Ok(_) => (),
        Err(e) => {
            // Only one handler can be installed per process.
            info!("failed to set ctrl-c handler: {}", e);
        }
    }
}
