use super::{
    amount_text, checked_base_url, fetch_json, http_client, LatestOrderSource, ProviderOrder,
    RemoteStatus,
};
use crate::{config::MirrorConfig, errors::MirrorError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::ContextCompat as _;
use serde::Deserialize;

const HISTORY_QUERY: &str =
    "query($address: String!) { moonpayHistory(transactionId: $address, limit: 1) }";

/// One entry of `moonpayHistory`. Amounts arrive as JSON numbers or strings depending on the
/// backend version, so they are kept as raw values.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoonpayTransaction {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    base_currency_amount: Option<serde_json::Value>,
    #[serde(default)]
    base_currency: Option<String>,
    #[serde(default)]
    quote_currency_amount: Option<serde_json::Value>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphqlEnvelope {
    data: Option<HistoryData>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryData {
    #[serde(default)]
    moonpay_history: Option<Vec<MoonpayTransaction>>,
}

impl MoonpayTransaction {
    fn into_order(self) -> Option<ProviderOrder> {
        let status = self.status?;
        let created_at = self
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));
        // History entries without an id are keyed by their creation time.
        let order_id = self.id.or(self.created_at)?;
        Some(ProviderOrder {
            order_id,
            status,
            from_amount: amount_text(self.base_currency_amount),
            from_currency: self.base_currency,
            to_amount: amount_text(self.quote_currency_amount),
            to_currency: self.currency,
            created_at,
            reason: self.failure_reason,
        })
    }
}

/// `completed` and `failed` are terminal; every other Moonpay status is still settling.
pub fn classify(status: &str) -> RemoteStatus {
    match status.trim().to_ascii_lowercase().as_str() {
        "completed" => RemoteStatus::Completed,
        "failed" => RemoteStatus::Failed,
        _ => RemoteStatus::Pending,
    }
}

/// Latest card purchase for one wallet address, read through the app's GraphQL gateway.
#[derive(Debug, Clone)]
pub struct MoonpayClient {
    graphql_url: String,
    address: String,
    http: reqwest::Client,
}

impl MoonpayClient {
    pub fn new(cfg: &MirrorConfig, address: &str) -> eyre::Result<Self> {
        let url = cfg
            .moonpay
            .graphql_url
            .as_deref()
            .context("moonpay.graphql_url is not configured")?;
        Ok(Self {
            graphql_url: checked_base_url("moonpay", url)?,
            address: address.to_owned(),
            http: http_client(cfg.http_timeout())?,
        })
    }
}

#[async_trait]
impl LatestOrderSource for MoonpayClient {
    fn provider(&self) -> &'static str {
        "moonpay"
    }

    fn classify(&self, status: &str) -> RemoteStatus {
        classify(status)
    }

    async fn latest_order(&self) -> Result<Option<ProviderOrder>, MirrorError> {
        let body = serde_json::json!({
            "query": HISTORY_QUERY,
            "variables": { "address": self.address },
        });
        let env: GraphqlEnvelope =
            fetch_json("moonpay history", self.http.post(&self.graphql_url).json(&body)).await?;
        if let Some(errors) = env.errors {
            return Err(MirrorError::TransientFetch(format!(
                "moonpay history: graphql errors {errors}"
            )));
        }
        Ok(env
            .data
            .and_then(|d| d.moonpay_history)
            .and_then(|h| h.into_iter().next())
            .and_then(MoonpayTransaction::into_order))
    }
}
