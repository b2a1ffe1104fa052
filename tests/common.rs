use async_trait::async_trait;
use gumdrop::Options;
use httpmock::MockServer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use gosling::prelude::*;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.

/// An in-process executor with scripted results: every request takes `latency`, and
/// every `fail_every`th request fails with a transport error.
#[allow(dead_code)]
pub struct ScriptedExecutor {
    pub latency: Duration,
    pub fail_every: Option<usize>,
    pub status_code: u16,
    pub calls: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedExecutor {
    pub fn new(latency_ms: u64) -> Self {
        ScriptedExecutor {
            latency: Duration::from_millis(latency_ms),
            fail_every: None,
            status_code: 200,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_every(mut self, fail_every: usize) -> Self {
        self.fail_every = Some(fail_every);
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpExecutor for ScriptedExecutor {
    async fn execute(&self, template: &RequestTemplate) -> RequestOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.urls.lock().unwrap().push(template.url.clone());
        tokio::time::sleep(self.latency).await;
        let latency_ms = self.latency.as_millis() as f64;
        match self.fail_every {
            Some(every) if call % every == 0 => {
                RequestOutcome::failure(latency_ms, "connect: connection refused")
            }
            _ => RequestOutcome::success(latency_ms, self.status_code),
        }
    }
}

/// A GET request against an address nothing resolves, for scripted executors.
#[allow(dead_code)]
pub fn spec() -> RequestSpec {
    RequestSpec::new(Method::GET, "http://gosling.test/")
}

/// The following options are configured by default, if not set to a custom value:
///  --url <mock-server>
///  --users 1
///  --run-time 1
#[allow(dead_code)]
pub fn build_configuration(server: &MockServer, custom: Vec<&str>) -> GoslingConfiguration {
    // Start with an empty configuration.
    let mut configuration: Vec<&str> = vec![];
    // Declare server_url here no matter what, so its lifetime is sufficient when needed.
    let server_url = server.base_url();

    // Merge in all custom options first.
    configuration.extend_from_slice(&custom);

    // Default to using mock server if not otherwise configured.
    if !configuration.contains(&"--url") {
        configuration.extend_from_slice(&["--url", &server_url]);
    }

    // Default to testing with 1 user if not otherwise configured.
    if !configuration.contains(&"--users") {
        configuration.extend_from_slice(&["--users", "1"]);
    }

    // Default to running for 1 second if not otherwise configured.
    if !configuration.contains(&"--run-time") {
        configuration.extend_from_slice(&["--run-time", "1"]);
    }

    // Parse these options to generate a GoslingConfiguration.
    GoslingConfiguration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// Run a load test configured from the command line options to completion.
#[allow(dead_code)]
pub async fn run_load_test(
    configuration: &GoslingConfiguration,
) -> (RunSummary, Vec<MetricSample>) {
    configuration.validate().unwrap();
    let engine = LoadEngine::with_reqwest(configuration).unwrap();
    let handle = engine
        .start(
            configuration.request_spec().unwrap(),
            configuration.profile_config().unwrap(),
        )
        .unwrap();
    let summary = engine.wait(&handle).await.unwrap();
    (summary, engine.samples(&handle))
}
