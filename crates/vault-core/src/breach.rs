//! Password breach lookup using k-anonymity
//!
//! Only the first five hex characters of the password's SHA-1 ever leave
//! the process. The remote range API answers with every known suffix for
//! that prefix and the match happens locally.
//!
//! Results are advisory. [`check_password`] turns every failure into
//! [`BreachStatus::Unknown`] and never touches the vault session.

use async_trait::async_trait;
use reqwest::Client;
use sha1::{Digest, Sha1};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, VaultError};
use crate::settings::BreachCheckSettings;

/// Number of hash characters sent to the remote service
pub const PREFIX_LEN: usize = 5;

/// Answer from a breach corpus lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreachReport {
    pub is_breached: bool,
    /// Times the password appears in the corpus
    pub breach_count: Option<u64>,
}

/// Advisory outcome shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachStatus {
    Breached { count: u64 },
    NotBreached,
    /// The lookup failed or timed out
    Unknown,
}

impl BreachStatus {
    pub fn is_breached(&self) -> bool {
        matches!(self, BreachStatus::Breached { .. })
    }
}

impl From<BreachReport> for BreachStatus {
    fn from(report: BreachReport) -> Self {
        if report.is_breached {
            BreachStatus::Breached {
                count: report.breach_count.unwrap_or(1),
            }
        } else {
            BreachStatus::NotBreached
        }
    }
}

/// Anything that can tell whether a password is in a breach corpus
#[async_trait]
pub trait BreachOracle: Send + Sync {
    async fn check(&self, password: &str) -> Result<BreachReport>;
}

/// Upper-case SHA-1 hex of `password`, split into (prefix, suffix)
pub fn hash_prefix_suffix(password: &str) -> (String, String) {
    let digest = hex::encode_upper(Sha1::digest(password.as_bytes()));
    let suffix = digest[PREFIX_LEN..].to_string();
    let mut prefix = digest;
    prefix.truncate(PREFIX_LEN);
    (prefix, suffix)
}

/// Find `suffix` in a range response of `SUFFIX:COUNT` lines
///
/// Padding entries with a zero count are treated as absent.
pub fn find_suffix(body: &str, suffix: &str) -> Option<u64> {
    body.lines()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(suffix))
        .and_then(|(_, count)| count.trim().parse::<u64>().ok())
        .filter(|count| *count > 0)
}

/// Client for the Pwned Passwords range API
pub struct PwnedPasswordsClient {
    client: Client,
    endpoint: Url,
}

impl PwnedPasswordsClient {
    pub fn new(settings: &BreachCheckSettings) -> Result<Self> {
        let endpoint = Url::parse(&settings.endpoint)
            .map_err(|e| VaultError::ValidationError(format!("invalid breach endpoint: {}", e)))?;

        let client = Client::builder()
            .timeout(settings.timeout())
            .user_agent(concat!("secure-vault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VaultError::BreachCheckFailed(e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    fn range_url(&self, prefix: &str) -> String {
        format!(
            "{}/range/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            prefix
        )
    }
}

#[async_trait]
impl BreachOracle for PwnedPasswordsClient {
    async fn check(&self, password: &str) -> Result<BreachReport> {
        let (prefix, suffix) = hash_prefix_suffix(password);

        debug!("Querying breach range for prefix {}", prefix);

        let response = self
            .client
            .get(self.range_url(&prefix))
            .header("Add-Padding", "true")
            .send()
            .await
            .map_err(|e| VaultError::BreachCheckFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VaultError::BreachCheckFailed(format!(
                "range lookup returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| VaultError::BreachCheckFailed(e.to_string()))?;

        Ok(match find_suffix(&body, &suffix) {
            Some(count) => BreachReport {
                is_breached: true,
                breach_count: Some(count),
            },
            None => BreachReport {
                is_breached: false,
                breach_count: Some(0),
            },
        })
    }
}

/// Run a lookup bounded by `timeout`; failures degrade to `Unknown`
pub async fn check_password(
    oracle: &dyn BreachOracle,
    password: &str,
    timeout: Duration,
) -> BreachStatus {
    match tokio::time::timeout(timeout, oracle.check(password)).await {
        Ok(Ok(report)) => report.into(),
        Ok(Err(e)) => {
            warn!("Breach check unavailable: {}", e);
            BreachStatus::Unknown
        }
        Err(_) => {
            warn!("Breach check timed out after {:?}", timeout);
            BreachStatus::Unknown
        }
    }
}
