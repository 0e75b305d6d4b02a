//! Typed configuration (spec §6): the set of options recognized by a
//! dispatch endpoint, each bound to an upper-snake, `DISPATCH_`-prefixed
//! environment variable via `clap`'s `env` attribute, matching
//! `agent::Args`'s binding of `DATABASE_URL`/`BUILDS_ROOT`/etc.

use derivative::Derivative;
use std::fmt;

/// A secret string whose `Debug` impl never prints the value it holds.
/// Plays the same role as the teacher's `#[derivative(Debug = "ignore")]`
/// on `Args::database_url`, but as a reusable type rather than a
/// field-level annotation, since `api_key` has no other representation
/// worth printing in its place.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(\"...\")")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::str::FromStr for Secret {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(value))
    }
}

/// Options recognized by a dispatch endpoint (spec §6).
#[derive(Derivative, clap::Parser)]
#[derivative(Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    /// Base URL of the scheduler.
    #[clap(long = "endpoint-url", env = "DISPATCH_ENDPOINT_URL")]
    pub endpoint_url: url::Url,

    /// Bearer credential for outbound requests.
    #[clap(long = "api-key", env = "DISPATCH_API_KEY")]
    pub api_key: Secret,

    /// PEM public key. When set, inbound RunRequests must carry a valid
    /// message signature; when unset, signature verification is skipped
    /// (local testing only).
    #[clap(long = "verification-key", env = "DISPATCH_VERIFICATION_KEY")]
    pub verification_key: Option<String>,

    /// Dumps coroutine/frame state to stderr before each snapshot.
    #[clap(long = "trace", env = "DISPATCH_TRACE")]
    pub trace: bool,
}

impl Config {
    pub fn builder(endpoint_url: url::Url, api_key: impl Into<Secret>) -> ConfigBuilder {
        ConfigBuilder {
            endpoint_url,
            api_key: api_key.into(),
            verification_key: None,
            trace: false,
        }
    }

    pub fn requires_signature_verification(&self) -> bool {
        self.verification_key.is_some()
    }
}

/// Programmatic construction of a [`Config`], for embedders that don't
/// want to go through `clap::Parser::parse`.
pub struct ConfigBuilder {
    endpoint_url: url::Url,
    api_key: Secret,
    verification_key: Option<String>,
    trace: bool,
}

impl ConfigBuilder {
    pub fn verification_key(mut self, verification_key: impl Into<String>) -> Self {
        self.verification_key = Some(verification_key.into());
        self
    }

    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn build(self) -> Config {
        Config {
            endpoint_url: self.endpoint_url,
            api_key: self.api_key,
            verification_key: self.verification_key,
            trace: self.trace,
        }
    }
}
