//! Request definitions, and the templates materialized from them.
//!
//! A [`RequestSpec`] mirrors what a user fills out in a request builder: a method, a
//! URL, lists of header and query pairs that can individually be switched off, a body
//! and some authentication. Before a run starts it is turned into a
//! [`RequestTemplate`] exactly once; every virtual user in every tick then sends that
//! same template.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
pub use http::Method;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

use crate::GoslingError;

/// Header used by the api-key authentication strategy.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// One key/value pair that can be switched on and off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub enabled: bool,
}
impl KeyValue {
    /// Create a new, enabled, key/value pair.
    pub fn new(key: &str, value: &str) -> Self {
        KeyValue {
            key: key.to_string(),
            value: value.to_string(),
            enabled: true,
        }
    }

    /// Create a new key/value pair that is kept in the definition but not sent.
    pub fn disabled(key: &str, value: &str) -> Self {
        KeyValue {
            enabled: false,
            ..KeyValue::new(key, value)
        }
    }

    // Disabled pairs and pairs without a key are never sent.
    fn is_active(&self) -> bool {
        self.enabled && !self.key.trim().is_empty()
    }
}

/// How the body text of a [`RequestSpec`] is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    /// Body text is sent unmodified, `Content-Type` defaults to `application/json`.
    Json,
    /// Body text is sent unmodified.
    Raw,
    /// A multipart form is built from [`RequestSpec::form_fields`].
    Form,
}
impl FromStr for BodyKind {
    type Err = GoslingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(BodyKind::Json),
            "raw" => Ok(BodyKind::Raw),
            "form" | "form-data" => Ok(BodyKind::Form),
            _ => Err(GoslingError::InvalidConfig {
                option: "`configuration.body_kind`".to_string(),
                value: s.to_string(),
                detail: "body kind must be one of: json, raw, form.".to_string(),
            }),
        }
    }
}

/// Authentication applied to every request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "credential")]
pub enum Auth {
    None,
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `Authorization: Basic <base64(credential)>`, credential is `user:password`.
    Basic(String),
    /// `X-API-Key: <token>`
    ApiKey(String),
}
impl Auth {
    /// Build an authentication strategy from its name and a credential.
    pub fn from_kind(kind: &str, credential: &str) -> Result<Self, GoslingError> {
        match kind.trim().to_lowercase().as_str() {
            "" | "none" => Ok(Auth::None),
            "bearer" => Ok(Auth::Bearer(credential.to_string())),
            "basic" => Ok(Auth::Basic(credential.to_string())),
            "api-key" | "apikey" | "api_key" => Ok(Auth::ApiKey(credential.to_string())),
            _ => Err(GoslingError::InvalidConfig {
                option: "`configuration.auth`".to_string(),
                value: kind.to_string(),
                detail: "auth must be one of: none, bearer, basic, api-key.".to_string(),
            }),
        }
    }

    // Returns the single header this strategy adds, if any.
    fn header(&self) -> Option<(String, String)> {
        match self {
            Auth::None => None,
            Auth::Bearer(token) => Some((AUTHORIZATION.to_string(), format!("Bearer {}", token))),
            Auth::Basic(credential) => Some((
                AUTHORIZATION.to_string(),
                format!("Basic {}", BASE64_STANDARD.encode(credential)),
            )),
            Auth::ApiKey(token) => Some((API_KEY_HEADER.to_string(), token.to_string())),
        }
    }
}

/// The request definition a run is built from. Never modified once a run starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(with = "method_serde")]
    pub method: Method,
    pub url: String,
    pub headers: Vec<KeyValue>,
    pub query: Vec<KeyValue>,
    pub body: String,
    pub body_kind: BodyKind,
    /// Fields sent when `body_kind` is [`BodyKind::Form`].
    pub form_fields: Vec<KeyValue>,
    pub auth: Auth,
}

impl RequestSpec {
    /// Create a new request definition with no headers, query, body or auth.
    pub fn new(method: Method, url: &str) -> Self {
        RequestSpec {
            method,
            url: url.to_string(),
            headers: Vec::new(),
            query: Vec::new(),
            body: String::new(),
            body_kind: BodyKind::Json,
            form_fields: Vec::new(),
            auth: Auth::None,
        }
    }

    pub fn set_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push(KeyValue::new(key, value));
        self
    }

    pub fn set_query(mut self, key: &str, value: &str) -> Self {
        self.query.push(KeyValue::new(key, value));
        self
    }

    pub fn set_body(mut self, body_kind: BodyKind, body: &str) -> Self {
        self.body_kind = body_kind;
        self.body = body.to_string();
        self
    }

    pub fn set_form_field(mut self, key: &str, value: &str) -> Self {
        self.form_fields.push(KeyValue::new(key, value));
        self
    }

    pub fn set_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Build the ready-to-send [`RequestTemplate`].
    ///
    /// # Example
    /// ```rust
    /// use gosling::request::{Auth, Method, RequestSpec};
    ///
    /// let spec = RequestSpec::new(Method::GET, "http://example.com/search?lang=en")
    ///     .set_query("q", "geese")
    ///     .set_auth(Auth::Bearer("secret".to_string()));
    /// let template = spec.materialize().unwrap();
    ///
    /// assert_eq!(template.url, "http://example.com/search?lang=en&q=geese");
    /// assert_eq!(template.header("authorization"), Some("Bearer secret"));
    /// assert_eq!(template.body, None);
    /// ```
    pub fn materialize(&self) -> Result<RequestTemplate, GoslingError> {
        let url = append_query(&self.url, &self.query);
        Url::parse(&url).map_err(|parse_error| GoslingError::InvalidUrl {
            url: url.clone(),
            detail: "request url must be absolute, ie http://example.com/".to_string(),
            parse_error,
        })?;

        let mut template = RequestTemplate {
            method: self.method.clone(),
            url,
            headers: self
                .headers
                .iter()
                .filter(|pair| pair.is_active())
                .map(|pair| (pair.key.clone(), pair.value.clone()))
                .collect(),
            body: None,
        };

        if let Some(header) = self.auth.header() {
            template.headers.push(header);
        }

        if self.method != Method::GET && self.method != Method::HEAD {
            template.body = Some(match self.body_kind {
                BodyKind::Json => {
                    if template.header(CONTENT_TYPE.as_str()).is_none() {
                        template
                            .headers
                            .push((CONTENT_TYPE.to_string(), "application/json".to_string()));
                    }
                    TemplateBody::Text(self.body.clone())
                }
                BodyKind::Raw => TemplateBody::Text(self.body.clone()),
                BodyKind::Form => TemplateBody::Multipart(
                    self.form_fields
                        .iter()
                        .filter(|field| field.is_active())
                        .map(|field| (field.key.clone(), field.value.clone()))
                        .collect(),
                ),
            });
        }

        debug!(
            "materialized {} {} with {} headers",
            template.method,
            template.url,
            template.headers.len()
        );
        Ok(template)
    }
}

// Append enabled query parameters, form-url-encoded.
fn append_query(url: &str, query: &[KeyValue]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut appended = false;
    for pair in query.iter().filter(|pair| pair.is_active()) {
        serializer.append_pair(&pair.key, &pair.value);
        appended = true;
    }
    if !appended {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, serializer.finish())
}

/// Body attached to a [`RequestTemplate`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "content")]
pub enum TemplateBody {
    /// Sent as-is.
    Text(String),
    /// Sent as `multipart/form-data`, one text part per field.
    Multipart(Vec<(String, String)>),
}

/// A fully materialized request, shared read-only by every virtual user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    #[serde(with = "method_serde")]
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<TemplateBody>,
}
impl RequestTemplate {
    /// Returns the first value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

// Methods are (de)serialized as their upper case names.
mod method_serde {
    use http::Method;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(method: &Method, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(method.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Method, D::Error> {
        let method = String::deserialize(deserializer)?;
        Method::from_str(&method.to_uppercase()).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://example.com/api";

    #[test]
    fn disabled_and_empty_pairs_are_dropped() {
        let mut spec = RequestSpec::new(Method::GET, URL)
            .set_header("Accept", "text/plain")
            .set_header("", "orphan")
            .set_query("page", "2")
            .set_query("  ", "orphan");
        spec.headers.push(KeyValue::disabled("X-Debug", "1"));
        spec.query.push(KeyValue::disabled("debug", "1"));

        let template = spec.materialize().unwrap();
        assert_eq!(
            template.headers,
            vec![("Accept".to_string(), "text/plain".to_string())]
        );
        assert_eq!(template.url, "http://example.com/api?page=2");
    }

    #[test]
    fn query_separator() {
        let spec = RequestSpec::new(Method::GET, "http://example.com/api?a=1").set_query("b", "2");
        assert_eq!(spec.materialize().unwrap().url, "http://example.com/api?a=1&b=2");

        let spec = RequestSpec::new(Method::GET, URL).set_query("q", "two words&more");
        assert_eq!(
            spec.materialize().unwrap().url,
            "http://example.com/api?q=two+words%26more"
        );

        // Nothing to append leaves the url untouched.
        let spec = RequestSpec::new(Method::GET, URL);
        assert_eq!(spec.materialize().unwrap().url, URL);
    }

    #[test]
    fn auth_strategies() {
        let template = RequestSpec::new(Method::GET, URL)
            .set_auth(Auth::Bearer("abc".to_string()))
            .materialize()
            .unwrap();
        assert_eq!(template.header("Authorization"), Some("Bearer abc"));

        let template = RequestSpec::new(Method::GET, URL)
            .set_auth(Auth::Basic("user:pass".to_string()))
            .materialize()
            .unwrap();
        assert_eq!(template.header("Authorization"), Some("Basic dXNlcjpwYXNz"));

        let template = RequestSpec::new(Method::GET, URL)
            .set_auth(Auth::ApiKey("k3y".to_string()))
            .materialize()
            .unwrap();
        assert_eq!(template.header("x-api-key"), Some("k3y"));
        assert_eq!(template.header("Authorization"), None);

        let template = RequestSpec::new(Method::GET, URL).materialize().unwrap();
        assert!(template.headers.is_empty());
    }

    #[test]
    fn get_and_head_never_carry_a_body() {
        for method in [Method::GET, Method::HEAD].iter() {
            let template = RequestSpec::new(method.clone(), URL)
                .set_body(BodyKind::Json, "{\"a\":1}")
                .materialize()
                .unwrap();
            assert_eq!(template.body, None);
            assert_eq!(template.header("Content-Type"), None);
        }
    }

    #[test]
    fn json_body_defaults_content_type() {
        let template = RequestSpec::new(Method::POST, URL)
            .set_body(BodyKind::Json, "{\"a\":1}")
            .materialize()
            .unwrap();
        assert_eq!(template.body, Some(TemplateBody::Text("{\"a\":1}".to_string())));
        assert_eq!(template.header("content-type"), Some("application/json"));

        // An explicit content type is kept.
        let template = RequestSpec::new(Method::POST, URL)
            .set_header("content-type", "application/vnd.api+json")
            .set_body(BodyKind::Json, "{}")
            .materialize()
            .unwrap();
        assert_eq!(template.header("Content-Type"), Some("application/vnd.api+json"));
        assert_eq!(template.headers.len(), 1);
    }

    #[test]
    fn raw_body_is_untouched() {
        let template = RequestSpec::new(Method::PUT, URL)
            .set_body(BodyKind::Raw, "plain text")
            .materialize()
            .unwrap();
        assert_eq!(template.body, Some(TemplateBody::Text("plain text".to_string())));
        assert_eq!(template.header("Content-Type"), None);
    }

    #[test]
    fn form_body() {
        let mut spec = RequestSpec::new(Method::POST, URL)
            .set_body(BodyKind::Form, "ignored")
            .set_form_field("name", "gosling");
        spec.form_fields.push(KeyValue::disabled("secret", "x"));
        let template = spec.materialize().unwrap();
        assert_eq!(
            template.body,
            Some(TemplateBody::Multipart(vec![(
                "name".to_string(),
                "gosling".to_string()
            )]))
        );

        // No fields sends an empty form.
        let template = RequestSpec::new(Method::POST, URL)
            .set_body(BodyKind::Form, "")
            .materialize()
            .unwrap();
        assert_eq!(template.body, Some(TemplateBody::Multipart(Vec::new())));
    }

    #[test]
    fn invalid_url() {
        let error = RequestSpec::new(Method::GET, "example.com/api")
            .materialize()
            .unwrap_err();
        assert!(matches!(error, GoslingError::InvalidUrl { .. }));
    }

    #[test]
    fn parse_kinds() {
        assert_eq!("JSON".parse::<BodyKind>().unwrap(), BodyKind::Json);
        assert_eq!("form".parse::<BodyKind>().unwrap(), BodyKind::Form);
        assert!("xml".parse::<BodyKind>().is_err());

        assert_eq!(Auth::from_kind("none", "x").unwrap(), Auth::None);
        assert_eq!(
            Auth::from_kind("api-key", "x").unwrap(),
            Auth::ApiKey("x".to_string())
        );
        assert!(Auth::from_kind("digest", "x").is_err());
    }
}
