use super::{checked_base_url, fetch_json, http_client, OrderStatusSource, RemoteStatus};
use crate::{config::MirrorConfig, errors::MirrorError, ledger::OfferLedger};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Order snapshot as returned by `GET /order/{id}` and `POST /order`. Amounts stay strings,
/// exactly as the API sends them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchainOrder {
    pub order_id: String,
    pub pair: String,
    pub status: String,
    pub from_amount: String,
    #[serde(default)]
    pub rate: String,
    #[serde(default)]
    pub exchange_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_address_tag: Option<String>,
    #[serde(default)]
    pub to_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_address_tag: Option<String>,
    #[serde(default)]
    pub refund_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_address_tag: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

impl SwitchainOrder {
    pub fn remote_status(&self) -> RemoteStatus {
        classify(&self.status)
    }
}

/// `confirmed` completes; `refunded`, `failed` and `expired` fail. Everything else
/// (`waiting`, `received`, `exchanging`, `confirming`, or anything new) is still settling.
pub fn classify(status: &str) -> RemoteStatus {
    match status.trim().to_ascii_lowercase().as_str() {
        "confirmed" => RemoteStatus::Completed,
        "refunded" | "failed" | "expired" => RemoteStatus::Failed,
        _ => RemoteStatus::Pending,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketInfo {
    pub pair: String,
    pub quote: String,
    #[serde(default)]
    pub miner_fee: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub max_limit: String,
    #[serde(default)]
    pub min_limit: String,
    #[serde(default)]
    pub expiry_ts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub pair: String,
    pub from_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_amount: Option<String>,
    pub to_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_address_tag: Option<String>,
    pub refund_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_address_tag: Option<String>,
    /// Quote signature from `GET /offer`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub slippage: String,
}

#[derive(Debug, Clone)]
pub struct SwitchainClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl SwitchainClient {
    pub fn new(cfg: &MirrorConfig) -> eyre::Result<Self> {
        Ok(Self {
            base_url: checked_base_url("switchain", cfg.switchain_base_url())?,
            api_key: cfg.switchain.api_key.clone(),
            http: http_client(cfg.http_timeout())?,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let rb = self
            .http
            .request(method, format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(k) => rb.bearer_auth(k),
            None => rb,
        }
    }

    pub async fn market_info(&self) -> Result<Vec<MarketInfo>, MirrorError> {
        fetch_json(
            "switchain marketinfo",
            self.request(reqwest::Method::GET, "/marketinfo"),
        )
        .await
    }

    pub async fn pair_offer(&self, pair: &str) -> Result<MarketInfo, MirrorError> {
        fetch_json(
            "switchain offer",
            self.request(reqwest::Method::GET, "/offer")
                .query(&[("pair", pair)]),
        )
        .await
    }

    pub async fn create_order(&self, req: &OrderRequest) -> Result<SwitchainOrder, MirrorError> {
        fetch_json(
            "switchain create order",
            self.request(reqwest::Method::POST, "/order").json(req),
        )
        .await
    }

    pub async fn order_status(&self, order_id: &str) -> Result<SwitchainOrder, MirrorError> {
        let id = order_id.trim();
        if id.is_empty() || id.contains('/') {
            return Err(MirrorError::TransientFetch(format!(
                "switchain order status: invalid order id {order_id:?}"
            )));
        }
        fetch_json(
            "switchain order status",
            self.request(reqwest::Method::GET, &format!("/order/{id}")),
        )
        .await
    }
}

#[async_trait]
impl OrderStatusSource for SwitchainClient {
    async fn order_status(&self, order_id: &str) -> Result<SwitchainOrder, MirrorError> {
        Self::order_status(self, order_id).await
    }
}

/// Place a remote order and record it in the ledger under its pair.
///
/// The ledger is checked first so a pair with an order still in flight never reaches the
/// remote API.
pub async fn submit_order(
    client: &SwitchainClient,
    ledger: &OfferLedger,
    req: &OrderRequest,
) -> eyre::Result<SwitchainOrder> {
    ledger.ensure_can_open(&req.pair)?;
    let order = client.create_order(req).await?;
    ledger.upsert(&req.pair, order.clone())?;
    tracing::info!(pair = %req.pair, order_id = %order.order_id, "switchain order submitted");
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_server;
    use eyre::ContextCompat as _;

    fn cfg_for(base: &str) -> MirrorConfig {
        let mut cfg = MirrorConfig::default();
        base.clone_into(&mut cfg.switchain.base_url_mainnet);
        cfg.switchain.api_key = Some("k-123".to_owned());
        cfg
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify("confirmed"), RemoteStatus::Completed);
        for s in ["refunded", "failed", "expired"] {
            assert_eq!(classify(s), RemoteStatus::Failed, "{s}");
        }
        for s in ["waiting", "received", "exchanging", "confirming", "brand-new"] {
            assert_eq!(classify(s), RemoteStatus::Pending, "{s}");
        }
    }

    #[tokio::test]
    async fn order_status_sends_bearer_and_parses_snapshot() -> eyre::Result<()> {
        let body = serde_json::json!({
            "pair": "BTC-UST",
            "orderId": "x1",
            "status": "confirmed",
            "fromAmount": "0.01",
            "rate": "512.3",
            "exchangeAddress": "bc1qexchange",
            "toAddress": "terra1to",
            "refundAddress": "bc1qrefund",
            "createdAt": "2021-05-01T00:00:00Z",
        });
        let (base, mut heads) = test_server::serve(vec![(200, body.to_string())]).await?;
        let client = SwitchainClient::new(&cfg_for(&base))?;

        let order = client.order_status("x1").await?;
        assert_eq!(order.order_id, "x1");
        assert_eq!(order.remote_status(), RemoteStatus::Completed);

        let head = heads.recv().await.context("request seen")?;
        assert!(head.starts_with("GET /order/x1 "), "{head}");
        assert!(head.to_ascii_lowercase().contains("authorization: bearer k-123"));
        Ok(())
    }

    #[tokio::test]
    async fn http_errors_are_transient() -> eyre::Result<()> {
        let (base, _heads) =
            test_server::serve(vec![(503, "{}".to_owned()), (200, "not json".to_owned())]).await?;
        let client = SwitchainClient::new(&cfg_for(&base))?;
        for _ in 0..2 {
            assert!(matches!(
                client.order_status("x1").await,
                Err(MirrorError::TransientFetch(_))
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn market_info_and_pair_offer() -> eyre::Result<()> {
        let info = serde_json::json!([{
            "pair": "BTC-UST", "quote": "51234.12", "minerFee": "0.0001",
            "signature": "sig", "maxLimit": "1", "minLimit": "0.001", "expiryTs": 1_620_000_000
        }]);
        let offer = serde_json::json!({
            "pair": "BTC-UST", "quote": "51234.12", "signature": "sig2", "expiryTs": 1
        });
        let (base, mut heads) = test_server::serve(vec![
            (200, info.to_string()),
            (200, offer.to_string()),
        ])
        .await?;
        let client = SwitchainClient::new(&cfg_for(&base))?;

        let all = client.market_info().await?;
        assert_eq!(all.first().map(|m| m.pair.as_str()), Some("BTC-UST"));
        let one = client.pair_offer("BTC-UST").await?;
        assert_eq!(one.signature, "sig2");

        let _first = heads.recv().await.context("marketinfo")?;
        let second = heads.recv().await.context("offer")?;
        assert!(second.starts_with("GET /offer?pair=BTC-UST "), "{second}");
        Ok(())
    }

    #[tokio::test]
    async fn submit_records_order_in_ledger() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let ledger = OfferLedger::open(&crate::paths::MirrorPaths::under(td.path()));
        let created = serde_json::json!({
            "pair": "BTC-UST", "orderId": "o-9", "status": "waiting", "fromAmount": "0.5",
            "rate": "20000"
        });
        let (base, _heads) = test_server::serve(vec![(200, created.to_string())]).await?;
        let client = SwitchainClient::new(&cfg_for(&base))?;

        let req = OrderRequest {
            pair: "BTC-UST".to_owned(),
            from_amount: "0.5".to_owned(),
            to_amount: None,
            to_address: "terra1to".to_owned(),
            to_address_tag: None,
            refund_address: "bc1qrefund".to_owned(),
            refund_address_tag: None,
            signature: Some("sig".to_owned()),
            slippage: "2.5".to_owned(),
        };
        let order = submit_order(&client, &ledger, &req).await?;
        assert_eq!(order.order_id, "o-9");
        let entry = ledger.get("BTC-UST")?.context("ledger entry")?;
        assert_eq!(entry.order.order_id, "o-9");

        // Second submit for the same pair is rejected before any HTTP call.
        let err = submit_order(&client, &ledger, &req)
            .await
            .err()
            .context("in progress")?;
        assert!(matches!(
            crate::errors::mirror_error(&err),
            Some(MirrorError::OrderAlreadyInProgress(_))
        ));
        Ok(())
    }
}
