//! # Transport Configuration
//!
//! Explicit configuration for the transmission client. Environments are
//! named values with their own endpoints, never environment variables read
//! at call time: a client is constructed from exactly one [`SifenConfig`]
//! and keeps it for its lifetime.

use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Size ceiling for single-document and event payloads, in kilobytes.
pub const SINGLE_PAYLOAD_LIMIT_KB: usize = 1_000;

/// Size ceiling for batch payloads, in kilobytes.
pub const BATCH_PAYLOAD_LIMIT_KB: usize = 10_000;

/// Maximum number of documents in one batch.
pub const BATCH_MAX_DOCUMENTS: usize = 50;

/// Configuration failure at construction time.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The endpoint URL could not be parsed.
    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    /// Client certificate material was rejected by the TLS stack.
    #[error("invalid client identity: {0}")]
    InvalidIdentity(String),
}

/// Named deployment environments with fixed endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// The live authority endpoint.
    Production,
    /// The authority's homologation/test endpoint.
    Test,
}

impl Environment {
    /// Default base URL for this environment.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Environment::Production => "https://sifen.set.gov.py/de/ws/",
            Environment::Test => "https://sifen-test.set.gov.py/de/ws/",
        }
    }
}

/// Everything the HTTP client needs, fixed at construction.
#[derive(Debug, Clone)]
pub struct SifenConfig {
    pub environment: Environment,
    pub base_url: Url,
    /// Timeout for single-document and event submissions.
    pub single_timeout: Duration,
    /// Timeout for batch submissions and queries.
    pub batch_timeout: Duration,
    /// Transport budget enforced by the shared token bucket.
    pub requests_per_second: u32,
    /// PEM-encoded client certificate plus key for mutual TLS. `None`
    /// builds a client without an identity, which the production endpoint
    /// will reject; useful only against local test servers.
    pub client_identity_pem: Option<Vec<u8>>,
}

impl SifenConfig {
    /// Configuration for an environment at its default endpoint.
    pub fn for_environment(environment: Environment) -> Result<Self, ConfigError> {
        Self::with_base_url(environment, environment.default_base_url())
    }

    /// Configuration with an explicit endpoint. Test suites point this at a
    /// local server.
    pub fn with_base_url(
        environment: Environment,
        base_url: &str,
    ) -> Result<Self, ConfigError> {
        // A missing trailing slash would make Url::join replace the last
        // path segment instead of appending.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        Ok(Self {
            environment,
            base_url: Url::parse(&normalized)?,
            single_timeout: Duration::from_secs(60),
            batch_timeout: Duration::from_secs(60),
            requests_per_second: 5,
            client_identity_pem: None,
        })
    }

    /// Attach the mutual-TLS client identity.
    pub fn with_client_identity(mut self, pem: Vec<u8>) -> Self {
        self.client_identity_pem = Some(pem);
        self
    }

    /// Resolve a service path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        Ok(self.base_url.join(path)?)
    }
}
