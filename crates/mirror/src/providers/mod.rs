//! Remote order-status endpoints. Only the response contracts matter here; every transport
//! or decoding failure collapses into [`MirrorError::TransientFetch`].

pub mod moonpay;
pub mod switchain;
pub mod transak;

use crate::errors::MirrorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use switchain::SwitchainOrder;

/// How a provider-specific status string maps onto the ledger state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Pending,
    Completed,
    Failed,
}

/// Keyed-ledger source: current snapshot of one swap order.
#[async_trait]
pub trait OrderStatusSource: Send + Sync {
    async fn order_status(&self, order_id: &str) -> Result<SwitchainOrder, MirrorError>;
}

/// Latest order reported by a single-order provider (card purchase).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOrder {
    pub order_id: String,
    pub status: String,
    pub from_amount: Option<String>,
    pub from_currency: Option<String>,
    pub to_amount: Option<String>,
    pub to_currency: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Provider-reported failure reason, when there is one.
    pub reason: Option<String>,
}

/// Single-order source. `Ok(None)` means the provider has no order for this wallet.
#[async_trait]
pub trait LatestOrderSource: Send + Sync {
    fn provider(&self) -> &'static str;

    fn classify(&self, status: &str) -> RemoteStatus;

    async fn latest_order(&self) -> Result<Option<ProviderOrder>, MirrorError>;
}

fn is_loopback_http(url: &str) -> bool {
    fn host_prefix_ok(s: &str, prefix: &str) -> bool {
        if !s.starts_with(prefix) {
            return false;
        }
        matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
    }
    let u = url.trim();
    host_prefix_ok(u, "http://127.0.0.1")
        || host_prefix_ok(u, "http://localhost")
        || host_prefix_ok(u, "http://[::1]")
}

/// Normalize a configured base URL. Plain http is only allowed for loopback.
pub(crate) fn checked_base_url(name: &str, url: &str) -> eyre::Result<String> {
    let base = url.trim().trim_end_matches('/');
    if !base.starts_with("https://") && !is_loopback_http(base) {
        eyre::bail!("{name} base url must use https (or loopback for local testing)");
    }
    Ok(base.to_owned())
}

pub(crate) fn http_client(timeout: Duration) -> eyre::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| eyre::eyre!("build http client: {e}"))
}

pub(crate) fn transient(what: &str, e: impl std::fmt::Display) -> MirrorError {
    MirrorError::TransientFetch(format!("{what}: {e}"))
}

/// Providers send amounts as JSON numbers or strings; keep the text as sent.
pub(crate) fn amount_text(v: Option<serde_json::Value>) -> Option<String> {
    match v? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Send a request and decode a JSON body, mapping every failure to `TransientFetch`.
pub(crate) async fn fetch_json<T: serde::de::DeserializeOwned>(
    what: &str,
    req: reqwest::RequestBuilder,
) -> Result<T, MirrorError> {
    let resp = req.send().await.map_err(|e| transient(what, e))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(transient(what, format!("http {status}")));
    }
    resp.json::<T>().await.map_err(|e| transient(what, e))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_requires_https_outside_loopback() -> eyre::Result<()> {
        assert_eq!(
            checked_base_url("switchain", "https://api.switchain.com/rest/v1/")?,
            "https://api.switchain.com/rest/v1"
        );
        assert!(checked_base_url("switchain", "http://127.0.0.1:8080").is_ok());
        assert!(checked_base_url("switchain", "http://localhost.evil.com").is_err());
        assert!(checked_base_url("switchain", "http://api.switchain.com").is_err());
        Ok(())
    }
}
