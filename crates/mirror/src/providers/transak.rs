use super::{
    amount_text, checked_base_url, fetch_json, http_client, LatestOrderSource, ProviderOrder,
    RemoteStatus,
};
use crate::{config::MirrorConfig, errors::MirrorError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    response: TransakOrder,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusHistory {
    #[serde(default)]
    partner_event_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransakOrder {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    fiat_amount: Option<serde_json::Value>,
    #[serde(default)]
    fiat_currency: Option<String>,
    #[serde(default)]
    crypto_amount: Option<serde_json::Value>,
    #[serde(default)]
    crypto_currency: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    status_reason: Option<String>,
    #[serde(default)]
    status_histories: Vec<StatusHistory>,
}

impl TransakOrder {
    /// The newest partner event wins over the coarse `status` field.
    fn event(&self) -> Option<String> {
        self.status_histories
            .last()
            .and_then(|h| h.partner_event_id.clone())
            .or_else(|| self.status.clone())
    }

    fn into_order(self) -> Option<ProviderOrder> {
        let status = self.event()?;
        Some(ProviderOrder {
            order_id: self.id,
            status,
            from_amount: amount_text(self.fiat_amount),
            from_currency: self.fiat_currency,
            to_amount: amount_text(self.crypto_amount),
            to_currency: self.crypto_currency,
            created_at: self.created_at,
            reason: self.status_reason,
        })
    }
}

/// `ORDER_COMPLETED` completes and `ORDER_FAILED` fails. Created, verifying and processing
/// events are still settling.
pub fn classify(event: &str) -> RemoteStatus {
    match event.trim().to_ascii_uppercase().as_str() {
        "ORDER_COMPLETED" | "COMPLETED" => RemoteStatus::Completed,
        "ORDER_FAILED" | "FAILED" => RemoteStatus::Failed,
        _ => RemoteStatus::Pending,
    }
}

/// Polls one Transak partner order. Without an order id there is nothing to track.
#[derive(Debug, Clone)]
pub struct TransakClient {
    base_url: String,
    api_secret: Option<String>,
    order_id: Option<String>,
    http: reqwest::Client,
}

impl TransakClient {
    pub fn new(cfg: &MirrorConfig, order_id: Option<String>) -> eyre::Result<Self> {
        Ok(Self {
            base_url: checked_base_url("transak", cfg.transak_base_url())?,
            api_secret: cfg.transak.partner_api_secret.clone(),
            order_id,
            http: http_client(cfg.http_timeout())?,
        })
    }
}

#[async_trait]
impl LatestOrderSource for TransakClient {
    fn provider(&self) -> &'static str {
        "transak"
    }

    fn classify(&self, status: &str) -> RemoteStatus {
        classify(status)
    }

    async fn latest_order(&self) -> Result<Option<ProviderOrder>, MirrorError> {
        let Some(id) = self.order_id.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if id.is_empty() || id.contains('/') {
            return Err(MirrorError::TransientFetch(format!(
                "transak order: invalid order id {id:?}"
            )));
        }
        let mut req = self
            .http
            .get(format!("{}/partners/order/{id}", self.base_url));
        if let Some(secret) = &self.api_secret {
            req = req.query(&[("partnerAPISecret", secret)]);
        }
        let env: OrderEnvelope = fetch_json("transak order", req).await?;
        Ok(env.response.into_order())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_server;
    use eyre::ContextCompat as _;

    fn cfg_for(base: &str) -> MirrorConfig {
        let mut cfg = MirrorConfig::default();
        base.clone_into(&mut cfg.transak.base_url_mainnet);
        cfg.transak.partner_api_secret = Some("s3cret".to_owned());
        cfg
    }

    #[test]
    fn classification() {
        assert_eq!(classify("ORDER_COMPLETED"), RemoteStatus::Completed);
        assert_eq!(classify("ORDER_FAILED"), RemoteStatus::Failed);
        for s in ["ORDER_CREATED", "ORDER_PAYMENT_VERIFYING", "ORDER_PROCESSING"] {
            assert_eq!(classify(s), RemoteStatus::Pending, "{s}");
        }
    }

    #[tokio::test]
    async fn no_order_id_means_no_order() -> eyre::Result<()> {
        let client = TransakClient::new(&MirrorConfig::default(), None)?;
        assert_eq!(client.latest_order().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn last_status_history_event_is_the_status() -> eyre::Result<()> {
        let body = serde_json::json!({
            "response": {
                "id": "tk-7",
                "status": "PROCESSING",
                "fiatAmount": 100,
                "fiatCurrency": "EUR",
                "cryptoAmount": 98.5,
                "cryptoCurrency": "UST",
                "createdAt": "2021-06-01T10:00:00Z",
                "statusHistories": [
                    { "partnerEventId": "ORDER_CREATED" },
                    { "partnerEventId": "ORDER_PROCESSING" },
                    { "partnerEventId": "ORDER_COMPLETED" }
                ]
            }
        });
        let (base, mut heads) = test_server::serve(vec![(200, body.to_string())]).await?;
        let client = TransakClient::new(&cfg_for(&base), Some("tk-7".to_owned()))?;

        let order = client.latest_order().await?.context("expected an order")?;
        assert_eq!(order.order_id, "tk-7");
        assert_eq!(order.status, "ORDER_COMPLETED");
        assert_eq!(client.classify(&order.status), RemoteStatus::Completed);
        assert_eq!(order.to_amount.as_deref(), Some("98.5"));

        let head = heads.recv().await.context("request seen")?;
        assert!(
            head.starts_with("GET /partners/order/tk-7?partnerAPISecret=s3cret "),
            "{head}"
        );
        Ok(())
    }
}
