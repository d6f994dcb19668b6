//! HTTP demographic providers backed by agify.io, genderize.io and nationalize.io.
//!
//! Every provider issues one `GET <base_url>/?name=<first_name>` per lookup. The
//! configured timeout bounds each socket operation and the whole call, body
//! included. There are no retries and no caching.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use people_core::{DemographicProvider, Enricher, EnrichmentError};
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub const DEFAULT_AGIFY_URL: &str = "https://api.agify.io";
pub const DEFAULT_GENDERIZE_URL: &str = "https://api.genderize.io";
pub const DEFAULT_NATIONALIZE_URL: &str = "https://api.nationalize.io";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = concat!("people-registry/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentConfig {
    pub agify_url: String,
    pub genderize_url: String,
    pub nationalize_url: String,
    pub timeout: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            agify_url: DEFAULT_AGIFY_URL.to_string(),
            genderize_url: DEFAULT_GENDERIZE_URL.to_string(),
            nationalize_url: DEFAULT_NATIONALIZE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Wire the three HTTP providers into an [`Enricher`].
#[must_use]
pub fn http_enricher(config: &EnrichmentConfig) -> Enricher {
    Enricher::new(
        Arc::new(AgifyProvider::new(&config.agify_url, config.timeout)),
        Arc::new(GenderizeProvider::new(&config.genderize_url, config.timeout)),
        Arc::new(NationalizeProvider::new(&config.nationalize_url, config.timeout)),
    )
}

#[derive(Debug, Clone)]
struct JsonEndpoint {
    provider: &'static str,
    base_url: String,
    agent: ureq::Agent,
}

impl JsonEndpoint {
    fn new(provider: &'static str, base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self { provider, base_url: base_url.to_string(), agent }
    }

    fn fetch<T: DeserializeOwned>(&self, first_name: &str) -> Result<T, EnrichmentError> {
        tracing::debug!(provider = self.provider, first_name, "calling demographic provider");
        let response = self
            .agent
            .get(&self.base_url)
            .set("Accept", "application/json")
            .query("name", first_name)
            .call()
            .map_err(|err| error_from_ureq(self.provider, err))?;
        let body =
            response.into_string().map_err(|err| error_from_body_read(self.provider, &err))?;
        serde_json::from_str(&body).map_err(|err| EnrichmentError::MalformedResponse {
            provider: self.provider,
            detail: err.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AgifyResponse {
    #[serde(default)]
    age: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenderizeResponse {
    #[serde(default)]
    gender: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NationalizeResponse {
    #[serde(default)]
    country: Vec<CountryCandidate>,
}

#[derive(Debug, Deserialize)]
struct CountryCandidate {
    country_id: String,
}

#[derive(Debug, Clone)]
pub struct AgifyProvider {
    endpoint: JsonEndpoint,
}

impl AgifyProvider {
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self { endpoint: JsonEndpoint::new("agify", base_url, timeout) }
    }
}

impl DemographicProvider for AgifyProvider {
    type Output = Option<u32>;

    fn provider(&self) -> &'static str {
        self.endpoint.provider
    }

    fn infer(&self, first_name: &str) -> Result<Option<u32>, EnrichmentError> {
        let body: AgifyResponse = self.endpoint.fetch(first_name)?;
        Ok(body.age)
    }
}

#[derive(Debug, Clone)]
pub struct GenderizeProvider {
    endpoint: JsonEndpoint,
}

impl GenderizeProvider {
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self { endpoint: JsonEndpoint::new("genderize", base_url, timeout) }
    }
}

impl DemographicProvider for GenderizeProvider {
    type Output = Option<String>;

    fn provider(&self) -> &'static str {
        self.endpoint.provider
    }

    fn infer(&self, first_name: &str) -> Result<Option<String>, EnrichmentError> {
        let body: GenderizeResponse = self.endpoint.fetch(first_name)?;
        Ok(body.gender)
    }
}

#[derive(Debug, Clone)]
pub struct NationalizeProvider {
    endpoint: JsonEndpoint,
}

impl NationalizeProvider {
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self { endpoint: JsonEndpoint::new("nationalize", base_url, timeout) }
    }
}

impl DemographicProvider for NationalizeProvider {
    type Output = String;

    fn provider(&self) -> &'static str {
        self.endpoint.provider
    }

    /// The provider ranks candidates; only the first one is kept.
    fn infer(&self, first_name: &str) -> Result<String, EnrichmentError> {
        let body: NationalizeResponse = self.endpoint.fetch(first_name)?;
        top_country(self.endpoint.provider, body)
    }
}

fn top_country(
    provider: &'static str,
    body: NationalizeResponse,
) -> Result<String, EnrichmentError> {
    body.country
        .into_iter()
        .next()
        .map(|candidate| candidate.country_id)
        .ok_or(EnrichmentError::NoCandidates { provider })
}

fn error_from_ureq(provider: &'static str, err: ureq::Error) -> EnrichmentError {
    match err {
        ureq::Error::Status(status, _) => EnrichmentError::Status { provider, status },
        ureq::Error::Transport(transport) => {
            let combined = format!("{:?} {}", transport.kind(), transport);
            EnrichmentError::Transport { provider, kind: classify_transport_error_kind(&combined) }
        }
    }
}

/// `ureq` reports an expired deadline mid-body as an I/O error, not a transport error.
fn error_from_body_read(provider: &'static str, err: &io::Error) -> EnrichmentError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            EnrichmentError::Transport { provider, kind: "timeout" }
        }
        // Oversized or non-UTF-8 body.
        io::ErrorKind::InvalidData => {
            EnrichmentError::MalformedResponse { provider, detail: err.to_string() }
        }
        other => EnrichmentError::Transport {
            provider,
            kind: classify_transport_error_kind(&format!("{other:?} {err}")),
        },
    }
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}
