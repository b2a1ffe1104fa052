//! The HTTP execution boundary.
//!
//! The scheduler only ever needs one thing from an HTTP client: send this request once,
//! and tell me how long it took and whether a response came back. That contract is the
//! [`HttpExecutor`] trait. [`ReqwestExecutor`] implements it with
//! [`reqwest`](https://docs.rs/reqwest/); tests and embedders can plug in their own.
//!
//! A response with any status code (including 4xx and 5xx) is a success at this layer.
//! Only transport level errors (refused connections, timeouts, DNS failures, ...) are
//! failures, reported as a [`TransportFailure`] inside the outcome and never returned
//! as an error.

use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::request::{RequestTemplate, TemplateBody};
use crate::GoslingError;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// A transport level failure of one request. Counted, never propagated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportFailure {
    pub detail: String,
}
impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.detail)
    }
}

/// The result of executing one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// Wall-clock time from dispatch to response (or failure), in milliseconds.
    pub latency_ms: f64,
    /// The HTTP status code, when a response was received.
    pub status_code: Option<u16>,
    /// Set when no response was received.
    pub failure: Option<TransportFailure>,
}
impl RequestOutcome {
    /// A response was received.
    pub fn success(latency_ms: f64, status_code: u16) -> Self {
        RequestOutcome {
            latency_ms,
            status_code: Some(status_code),
            failure: None,
        }
    }

    /// No response was received.
    pub fn failure(latency_ms: f64, detail: &str) -> Self {
        RequestOutcome {
            latency_ms,
            status_code: None,
            failure: Some(TransportFailure {
                detail: detail.to_string(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Sends one request built from a [`RequestTemplate`] and measures it.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, template: &RequestTemplate) -> RequestOutcome;
}

/// [`HttpExecutor`] backed by a shared [`reqwest::Client`].
///
/// The client is cloned into every virtual user, so all users share one connection
/// pool.
#[derive(Clone, Debug)]
pub struct ReqwestExecutor {
    client: Client,
}
impl ReqwestExecutor {
    /// Build an executor whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, GoslingError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(ReqwestExecutor { client })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: Client) -> Self {
        ReqwestExecutor { client }
    }

    fn request_builder(&self, template: &RequestTemplate) -> RequestBuilder {
        let mut request_builder = self
            .client
            .request(template.method.clone(), template.url.as_str());
        for (key, value) in &template.headers {
            request_builder = request_builder.header(key.as_str(), value.as_str());
        }
        match &template.body {
            Some(TemplateBody::Text(body)) => request_builder.body(body.clone()),
            Some(TemplateBody::Multipart(fields)) => {
                // Forms can't be cloned, build a fresh one for every request.
                let form = fields.iter().fold(Form::new(), |form, (key, value)| {
                    form.text(key.clone(), value.clone())
                });
                request_builder.multipart(form)
            }
            None => request_builder,
        }
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, template: &RequestTemplate) -> RequestOutcome {
        let started = Instant::now();
        let response = self.request_builder(template).send().await;
        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

        match response {
            Ok(response) => {
                let status_code = response.status().as_u16();
                trace!("{} {}: status_code {}", template.method, template.url, status_code);
                // Drain the body so the connection can be reused.
                if let Err(e) = response.bytes().await {
                    debug!("{}: failed to read body: {}", template.url, e);
                }
                RequestOutcome::success(latency_ms, status_code)
            }
            Err(e) => {
                debug!("{} {}: {}", template.method, template.url, e);
                RequestOutcome::failure(latency_ms, &transport_detail(&e))
            }
        }
    }
}

// Summarize a reqwest error so identical failures can be counted together.
fn transport_detail(error: &reqwest::Error) -> String {
    let kind = if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connect"
    } else if error.is_request() {
        "request"
    } else if error.is_body() {
        "body"
    } else {
        "transport"
    };
    match std::error::Error::source(error) {
        Some(source) => format!("{} error: {}", kind, source),
        None => format!("{} error", kind),
    }
}
