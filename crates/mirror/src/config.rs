use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SWITCHAIN_MAINNET_URL: &str = "https://api.switchain.com/rest/v1";
pub const SWITCHAIN_TESTNET_URL: &str = "https://api-testnet.switchain.com/rest/v1";
pub const TRANSAK_MAINNET_URL: &str = "https://api.transak.com/api/v2";
pub const TRANSAK_TESTNET_URL: &str = "https://api-stg.transak.com/api/v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Mainnet,
    Testnet,
}

/// KDF used when a new blob is written. Reading always honours the blob's own tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KdfKind {
    #[default]
    Scrypt,
    Argon2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SaltPolicy {
    /// 16 uniformly random bytes.
    #[default]
    FullEntropy,
    /// Every byte folded into 0x01..=0x7F, as older app versions wrote them.
    LegacyAscii,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Argon2Variant {
    Argon2d,
    Argon2i,
    #[default]
    Argon2id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScryptCost {
    /// CPU/memory cost. Must be a power of two greater than 1.
    #[serde(rename = "N")]
    pub n: u64,
    pub r: u32,
    pub p: u32,
}

impl Default for ScryptCost {
    fn default() -> Self {
        Self { n: 128, r: 8, p: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Argon2Cost {
    pub variant: Argon2Variant,
    /// Memory cost in KiB.
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for Argon2Cost {
    fn default() -> Self {
        // Mirrors the mobile argon2 binding the app shipped with.
        Self {
            variant: Argon2Variant::Argon2id,
            m_cost: 32 * 1024,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub default: KdfKind,
    pub scrypt: ScryptCost,
    pub argon2: Argon2Cost,
    pub salt_policy: SaltPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Bech32 human-readable prefix for account addresses.
    pub address_hrp: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            address_hrp: "terra".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchainConfig {
    pub base_url_mainnet: String,
    pub base_url_testnet: String,
    /// Bearer token for the Switchain REST API.
    pub api_key: Option<String>,
    /// Percent shaved off quoted receive amounts when displaying pending orders.
    pub slippage_percent: Decimal,
}

impl Default for SwitchainConfig {
    fn default() -> Self {
        Self {
            base_url_mainnet: SWITCHAIN_MAINNET_URL.into(),
            base_url_testnet: SWITCHAIN_TESTNET_URL.into(),
            api_key: None,
            slippage_percent: Decimal::new(25, 1),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MoonpayConfig {
    /// GraphQL endpoint that serves `moonpayHistory`. Tracking is off when unset.
    pub graphql_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransakConfig {
    pub base_url_mainnet: String,
    pub base_url_testnet: String,
    pub partner_api_secret: Option<String>,
}

impl Default for TransakConfig {
    fn default() -> Self {
        Self {
            base_url_mainnet: TRANSAK_MAINNET_URL.into(),
            base_url_testnet: TRANSAK_TESTNET_URL.into(),
            partner_api_secret: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_seconds: u64,
    pub http_timeout_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            http_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub network_mode: NetworkMode,
    pub kdf: KdfConfig,
    pub wallet: WalletConfig,
    pub switchain: SwitchainConfig,
    pub moonpay: MoonpayConfig,
    pub transak: TransakConfig,
    pub poller: PollerConfig,
}

impl MirrorConfig {
    pub fn switchain_base_url(&self) -> &str {
        match self.network_mode {
            NetworkMode::Mainnet => &self.switchain.base_url_mainnet,
            NetworkMode::Testnet => &self.switchain.base_url_testnet,
        }
    }

    pub fn transak_base_url(&self) -> &str {
        match self.network_mode {
            NetworkMode::Mainnet => &self.transak.base_url_mainnet,
            NetworkMode::Testnet => &self.transak.base_url_testnet,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poller.interval_seconds.max(1))
    }

    pub const fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.poller.http_timeout_ms)
    }
}
