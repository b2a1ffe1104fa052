//! Functions and structures related to configuring a Gosling load test.
//!
//! Gosling can be configured at run time by passing in the options and flags defined by
//! the [`GoslingConfiguration`] structure, which is then converted into the
//! [`RequestSpec`] and [`ProfileConfig`] a run is started with.

use gumdrop::Options;
use serde::{Deserialize, Serialize};
use simplelog::*;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::profile::{LoadProfile, ProfileConfig};
use crate::request::{Auth, BodyKind, Method, RequestSpec};
use crate::util;
use crate::GoslingError;

/// Default request timeout, in seconds.
const DEFAULT_TIMEOUT: f64 = 60.0;

/// Runtime options available when launching a Gosling load test.
///
/// Gosling leverages [`gumdrop`](https://docs.rs/gumdrop/) to derive help from the
/// below structure.
#[derive(Options, Debug, Clone, Default, Serialize, Deserialize)]
#[options(
    help = r#"Gosling sends one HTTP request definition at a changing number of virtual
users, once per second, and reports latency, throughput and errors as it goes.

The following runtime options are available:"#
)]
pub struct GoslingConfiguration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,
    /// Prints the load profile curve and exits
    // Add a blank line and then a 'Request:' header after this option
    #[options(no_short, help = "Prints the load profile curve and exits\n\nRequest:")]
    pub preview: bool,

    /// Defines the URL to load test (ie http://10.21.32.33/path)
    #[options(short = "H", meta = "URL")]
    pub url: String,
    /// Sets the request method (default: GET)
    #[options(short = "X", meta = "METHOD")]
    pub method: Option<String>,
    /// Adds a request header, "Key: Value" (repeatable)
    #[options(no_short, meta = "HEADER")]
    pub header: Vec<String>,
    /// Adds a query parameter, key=value (repeatable)
    #[options(no_short, meta = "PAIR")]
    pub query: Vec<String>,
    /// Sets the request body
    #[options(no_short, meta = "BODY")]
    pub body: String,
    /// Sets how the body is sent: json, raw, form (default: json)
    #[options(no_short, meta = "KIND")]
    pub body_kind: Option<String>,
    /// Adds a form field, key=value (repeatable)
    #[options(no_short, meta = "PAIR")]
    pub form: Vec<String>,
    /// Sets authentication: none, bearer, basic, api-key (default: none)
    #[options(no_short, meta = "KIND")]
    pub auth: Option<String>,
    /// Sets the auth credential (token, or user:password for basic)
    #[options(no_short, meta = "SECRET")]
    pub credential: String,
    /// Sets the request timeout in seconds (default: 60)
    // Add a blank line and then a 'Load:' header after this option
    #[options(
        no_short,
        meta = "VALUE",
        help = "Sets the request timeout in seconds (default: 60)\n\nLoad:"
    )]
    pub timeout: Option<String>,

    /// Sets the load profile: fixed, ramp-up, spike, stress, custom (default: fixed)
    #[options(short = "p", meta = "PROFILE")]
    pub profile: Option<String>,
    /// Sets the maximum number of virtual users (default: 1)
    #[options(short = "u")]
    pub users: Option<usize>,
    /// Stops load test after (30s, 20m, 3h, 1h30m, etc)
    #[options(short = "t", meta = "TIME")]
    pub run_time: String,
    /// Ramps users up over (30s, 20m, 3h, 1h30m, etc)
    // Add a blank line and then an 'Output:' header after this option
    #[options(
        short = "r",
        meta = "TIME",
        help = "Ramps users up over (30s, 20m, 3h, 1h30m, etc)\n\nOutput:"
    )]
    pub ramp_up: String,

    /// Writes a report file (.json, .csv or .md)
    #[options(no_short, meta = "NAME")]
    pub report_file: String,
    /// Enables Gosling log file and sets name
    #[options(short = "G", meta = "NAME")]
    pub log_file: String,
    /// Increases Gosling log file level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases Gosling verbosity (-q, -qq, etc)
    #[options(count, short = "q")]
    pub quiet: u8,
    /// Increases Gosling verbosity (-v, -vv, etc)
    #[options(count, short = "v")]
    pub verbose: u8,
}

// Splits `key<separator>value`, trimming both sides. The key must not be empty.
fn split_pair(option: &str, pair: &str, separator: char) -> Result<(String, String), GoslingError> {
    match pair.split_once(separator) {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(GoslingError::InvalidConfig {
            option: option.to_string(),
            value: pair.to_string(),
            detail: format!("{} must be formatted as key{}value.", option, separator),
        }),
    }
}

impl GoslingConfiguration {
    /// Validate configured [`GoslingConfiguration`] values.
    ///
    /// The URL and run time are only required when not previewing, and the URL itself
    /// is checked when the request is materialized.
    pub fn validate(&self) -> Result<(), GoslingError> {
        // Can't set both --verbose and --quiet.
        if self.verbose > 0 && self.quiet > 0 {
            return Err(GoslingError::InvalidConfig {
                option: "`configuration.verbose`".to_string(),
                value: self.verbose.to_string(),
                detail: "`configuration.verbose` can not be set with `configuration.quiet`."
                    .to_string(),
            });
        }

        if !self.preview && self.url.is_empty() {
            return Err(GoslingError::InvalidConfig {
                option: "`configuration.url`".to_string(),
                value: self.url.to_string(),
                detail: "A URL must be defined via the --url option.".to_string(),
            });
        }

        self.request_timeout()?;
        self.profile_config()?;
        if !self.preview {
            self.request_spec()?;
        }

        if !self.report_file.is_empty() {
            crate::report::ReportFormat::from_path(&self.report_file)?;
        }

        Ok(())
    }

    /// Build the request definition from the request options.
    pub fn request_spec(&self) -> Result<RequestSpec, GoslingError> {
        let method = match self.method.as_ref() {
            Some(method) => Method::from_str(&method.trim().to_uppercase()).map_err(|e| {
                GoslingError::InvalidConfig {
                    option: "`configuration.method`".to_string(),
                    value: method.to_string(),
                    detail: format!("invalid request method: {}", e),
                }
            })?,
            None => Method::GET,
        };

        let mut spec = RequestSpec::new(method, self.url.trim());
        for header in &self.header {
            let (key, value) = split_pair("`configuration.header`", header, ':')?;
            spec = spec.set_header(&key, &value);
        }
        for pair in &self.query {
            let (key, value) = split_pair("`configuration.query`", pair, '=')?;
            spec = spec.set_query(&key, &value);
        }
        for pair in &self.form {
            let (key, value) = split_pair("`configuration.form`", pair, '=')?;
            spec = spec.set_form_field(&key, &value);
        }

        let body_kind = match self.body_kind.as_ref() {
            Some(body_kind) => BodyKind::from_str(body_kind)?,
            // Form fields without an explicit kind mean a form body.
            None if !self.form.is_empty() => BodyKind::Form,
            None => BodyKind::Json,
        };
        spec = spec.set_body(body_kind, &self.body);

        let auth = match self.auth.as_ref() {
            Some(kind) => Auth::from_kind(kind, &self.credential)?,
            None => Auth::None,
        };
        Ok(spec.set_auth(auth))
    }

    /// Build the load profile from the load options.
    pub fn profile_config(&self) -> Result<ProfileConfig, GoslingError> {
        let profile = match self.profile.as_ref() {
            Some(profile) => LoadProfile::from_str(profile)?,
            None => LoadProfile::Fixed,
        };

        let users = self.users.unwrap_or(1);
        if users == 0 {
            return Err(GoslingError::InvalidConfig {
                option: "`configuration.users`".to_string(),
                value: users.to_string(),
                detail: "`configuration.users` must be set to at least 1.".to_string(),
            });
        }

        let duration = util::parse_timespan(&self.run_time);
        if duration == 0 {
            return Err(GoslingError::InvalidConfig {
                option: "`configuration.run_time`".to_string(),
                value: self.run_time.to_string(),
                detail: "`configuration.run_time` must be at least 1 second (30s, 20m, 1h30m, etc)."
                    .to_string(),
            });
        }

        let ramp_up = util::parse_timespan(&self.ramp_up);
        Ok(ProfileConfig::new(profile, users, duration).set_ramp_up(ramp_up))
    }

    /// The per-request timeout.
    pub fn request_timeout(&self) -> Result<Duration, GoslingError> {
        let timeout = match self.timeout.as_ref() {
            Some(timeout) => f64::from_str(timeout.trim()).map_err(|e| {
                GoslingError::InvalidConfig {
                    option: "`configuration.timeout`".to_string(),
                    value: timeout.to_string(),
                    detail: format!("`configuration.timeout` must be a number: {}", e),
                }
            })?,
            None => DEFAULT_TIMEOUT,
        };
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(GoslingError::InvalidConfig {
                option: "`configuration.timeout`".to_string(),
                value: timeout.to_string(),
                detail: "`configuration.timeout` must be greater than 0.".to_string(),
            });
        }
        Duration::try_from_secs_f64(timeout).map_err(|e| GoslingError::InvalidConfig {
            option: "`configuration.timeout`".to_string(),
            value: timeout.to_string(),
            detail: format!("`configuration.timeout` is out of range: {}", e),
        })
    }

    /// Initialize the Gosling logger which writes to standard out and optionally to a
    /// log file.
    pub fn initialize_logger(&self) -> Result<(), GoslingError> {
        // Configure debug output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Info,
                1 => LevelFilter::Warn,
                _ => LevelFilter::Error,
            },
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
        loggers.push(SimpleLogger::new(debug_level, Config::default()));
        let log_file = if self.log_file.is_empty() {
            None
        } else {
            let path = PathBuf::from(&self.log_file);
            let file = std::fs::File::create(&path)?;
            loggers.push(WriteLogger::new(log_level, Config::default(), file));
            Some(path)
        };

        if let Err(e) = CombinedLogger::init(loggers) {
            // Only one logger per process, this happens when initialized twice.
            info!("failed to initialize CombinedLogger: {}", e);
        }
        if let Some(path) = log_file {
            info!("Writing to log file: {}", path.display());
        }

        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);
        Ok(())
    }
}
